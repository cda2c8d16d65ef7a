//! Global variable and initializer emission, shared by both backends
//!
//! `construct_initial_value` walks the type tree: scalars emit sized
//! directives with a literal or `label + offset`, arrays emit elements plus
//! explicit zero padding, strings emit `.ascii` with trailing NULs to the
//! declared size, structs honor member offsets with byte padding.

use crate::{AsmWriter, Target};
use rcc_common::{CcError, CcResult, Name};
use rcc_parser::{Context, Expr, ExprKind, Initializer, Program, Scopes, VarPlace};
use rcc_types::{FixnumKind, FlonumKind, Type, TypeKind};

fn emit_err(message: impl Into<String>) -> CcError {
    CcError::emit_error(message, None)
}

/// A link-time constant: optional symbol plus byte offset.
struct ConstAddr {
    label: Option<String>,
    offset: i64,
}

impl ConstAddr {
    fn render(&self) -> String {
        match (&self.label, self.offset) {
            (None, n) => n.to_string(),
            (Some(l), 0) => l.clone(),
            (Some(l), n) if n > 0 => format!("{} + {}", l, n),
            (Some(l), n) => format!("{} - {}", l, -n),
        }
    }
}

/// Symbol for a variable reference in a constant initializer, resolving
/// static locals to their synthesized globals.
fn var_label(ctx: &Context, prog: &Program, expr: &Expr, target: Target) -> CcResult<String> {
    let ExprKind::Var { name, scope } = &expr.kind else {
        return Err(emit_err("initializer is not a constant address"));
    };
    let Some((_, var)) = prog.scopes.find(*scope, *name) else {
        return Err(emit_err("unresolved symbol in initializer"));
    };
    match &var.place {
        VarPlace::StaticLocal { gvar } => Ok(ctx.interner.resolve(*gvar).to_string()),
        VarPlace::Global { .. } => {
            let text = ctx.interner.resolve(*name);
            if var.storage.is_static {
                Ok(text.to_string())
            } else {
                Ok(target.mangle(text))
            }
        }
        VarPlace::Local { .. } => Err(emit_err("address of a local in a constant initializer")),
    }
}

/// Evaluate a constant initializer expression to symbol + offset. Mirrors
/// the shapes the parser's constness check admits.
fn eval_initial_value(
    ctx: &Context,
    prog: &Program,
    expr: &Expr,
    target: Target,
) -> CcResult<ConstAddr> {
    match &expr.kind {
        ExprKind::Fixnum(v) => Ok(ConstAddr { label: None, offset: *v }),
        ExprKind::Str { label } => Ok(ConstAddr {
            label: Some(target.local_label(ctx.interner.resolve(*label))),
            offset: 0,
        }),
        ExprKind::Var { .. } => {
            // A global array or function decaying to its address.
            Ok(ConstAddr { label: Some(var_label(ctx, prog, expr, target)?), offset: 0 })
        }
        ExprKind::Ref(sub) => eval_lval_addr(ctx, prog, sub, target),
        ExprKind::Cast(sub) => eval_initial_value(ctx, prog, sub, target),
        ExprKind::Bin { op, lhs, rhs } => {
            use rcc_parser::BinOp;
            let scale = match op {
                BinOp::Add | BinOp::Sub => 1,
                BinOp::PtrAdd | BinOp::PtrSub => expr
                    .ty
                    .pointee()
                    .and_then(|p| ctx.types.type_size(p))
                    .unwrap_or(1) as i64,
                _ => return Err(emit_err("initializer is not constant")),
            };
            let negate = matches!(op, BinOp::Sub | BinOp::PtrSub);
            let l = eval_initial_value(ctx, prog, lhs, target)?;
            let r = eval_initial_value(ctx, prog, rhs, target)?;
            let label = match (&l.label, &r.label) {
                (Some(_), Some(_)) => {
                    return Err(emit_err("initializer adds two addresses"))
                }
                (Some(_), None) => l.label.clone(),
                (None, Some(_)) if !negate => r.label.clone(),
                (None, Some(_)) => return Err(emit_err("initializer negates an address")),
                (None, None) => None,
            };
            let roff = r.offset * scale;
            Ok(ConstAddr {
                label,
                offset: if negate { l.offset - roff } else { l.offset + roff },
            })
        }
        _ => Err(emit_err("initializer is not constant")),
    }
}

fn eval_lval_addr(
    ctx: &Context,
    prog: &Program,
    expr: &Expr,
    target: Target,
) -> CcResult<ConstAddr> {
    match &expr.kind {
        ExprKind::Var { .. } => {
            Ok(ConstAddr { label: Some(var_label(ctx, prog, expr, target)?), offset: 0 })
        }
        ExprKind::Str { label } => Ok(ConstAddr {
            label: Some(target.local_label(ctx.interner.resolve(*label))),
            offset: 0,
        }),
        ExprKind::Member { target: inner, index, .. } => {
            let base = eval_lval_addr(ctx, prog, inner, target)?;
            let id = ctx
                .types
                .resolve_struct(&inner.ty)
                .ok_or_else(|| emit_err("unresolved struct in initializer"))?;
            let offset = ctx.types.struct_info(id).members[*index].offset as i64;
            Ok(ConstAddr { label: base.label, offset: base.offset + offset })
        }
        ExprKind::Deref(sub) => eval_initial_value(ctx, prog, sub, target),
        _ => Err(emit_err("initializer is not a constant address")),
    }
}

pub fn escape_string(bytes: &[u8]) -> String {
    let mut out = String::new();
    for &b in bytes {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            b'\r' => out.push_str("\\r"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\{:03o}", b)),
        }
    }
    out
}

fn emit_zero_bytes(w: &mut AsmWriter, count: usize) -> CcResult<()> {
    for _ in 0..count {
        w.op1(".byte", "0")?;
    }
    Ok(())
}

pub fn construct_initial_value(
    w: &mut AsmWriter,
    ctx: &Context,
    prog: &Program,
    ty: &Type,
    init: Option<&Initializer>,
    target: Target,
) -> CcResult<()> {
    match &ty.kind {
        TypeKind::Flonum { kind } => {
            let mut value = 0.0f64;
            if let Some(init) = init {
                let Initializer::Single(expr) = init else {
                    return Err(emit_err("illegal initializer for a floating type"));
                };
                let ExprKind::Flonum(f) = &expr.kind else {
                    return Err(emit_err("constant number expected in initializer"));
                };
                value = *f;
            }
            match kind {
                FlonumKind::Double => {
                    w.op1(".quad", format!("0x{:016x}", value.to_bits()))?;
                }
                FlonumKind::Float => {
                    w.op1(".long", format!("0x{:08x}", (value as f32).to_bits()))?;
                }
            }
            Ok(())
        }
        TypeKind::Fixnum { kind, .. } => {
            let output = match init {
                None => "0".to_string(),
                Some(Initializer::Single(expr)) => {
                    eval_initial_value(ctx, prog, expr, target)?.render()
                }
                Some(_) => return Err(emit_err("illegal scalar initializer")),
            };
            let directive = if ty.is_ptr() {
                ".quad"
            } else {
                match kind {
                    FixnumKind::Char => ".byte",
                    FixnumKind::Short => ".word",
                    FixnumKind::Int | FixnumKind::Enum => ".long",
                    FixnumKind::Long | FixnumKind::LLong => ".quad",
                }
            };
            w.op1(directive, output)
        }
        TypeKind::Ptr { .. } => {
            let output = match init {
                None => "0".to_string(),
                Some(Initializer::Single(expr)) => {
                    eval_initial_value(ctx, prog, expr, target)?.render()
                }
                Some(_) => return Err(emit_err("illegal scalar initializer")),
            };
            w.op1(".quad", output)
        }
        TypeKind::Array { base, length } => {
            let length = (*length).ok_or_else(|| emit_err("array size is not fixed"))?;
            match init {
                Some(Initializer::Single(expr)) => {
                    // String literal into a char array.
                    let ExprKind::Str { label } = &expr.kind else {
                        return Err(emit_err("illegal array initializer"));
                    };
                    let lit = prog
                        .strings
                        .find(*label)
                        .ok_or_else(|| emit_err("missing pooled string"))?;
                    let src: &[u8] = if lit.bytes.len() > length {
                        &lit.bytes[..length]
                    } else {
                        &lit.bytes
                    };
                    let mut text = escape_string(src);
                    for _ in src.len()..length {
                        text.push_str("\\0");
                    }
                    w.op1(".ascii", format!("\"{}\"", text))
                }
                Some(Initializer::Multi(elems)) => {
                    for i in 0..length {
                        let elem = elems.get(i).and_then(|e| e.as_ref());
                        construct_initial_value(w, ctx, prog, base, elem, target)?;
                    }
                    Ok(())
                }
                None => {
                    for _ in 0..length {
                        construct_initial_value(w, ctx, prog, base, None, target)?;
                    }
                    Ok(())
                }
                _ => Err(emit_err("illegal array initializer")),
            }
        }
        TypeKind::Struct { .. } => {
            let id = ctx
                .types
                .resolve_struct(ty)
                .ok_or_else(|| emit_err("initializer for an incomplete struct"))?;
            let sinfo = ctx.types.struct_info(id).clone();
            let elems = match init {
                None => None,
                Some(Initializer::Multi(elems)) => Some(elems),
                Some(_) => return Err(emit_err("illegal struct initializer")),
            };
            let mut offset = 0usize;
            let mut emitted = 0usize;
            for (i, member) in sinfo.members.iter().enumerate() {
                let mem_init = elems.and_then(|e| e.get(i)).and_then(|e| e.as_ref());
                if sinfo.is_union && mem_init.is_none() {
                    continue;
                }
                emit_zero_bytes(w, member.offset - offset)?;
                construct_initial_value(w, ctx, prog, &member.ty, mem_init, target)?;
                offset = member.offset
                    + ctx
                        .types
                        .type_size(&member.ty)
                        .ok_or_else(|| emit_err("unsized struct member"))?;
                emitted += 1;
            }
            if sinfo.is_union && emitted == 0 {
                if let Some(member) = sinfo.members.first() {
                    construct_initial_value(w, ctx, prog, &member.ty, None, target)?;
                    offset = ctx.types.type_size(&member.ty).unwrap_or(0);
                }
            }
            emit_zero_bytes(w, sinfo.size - offset)
        }
        _ => Err(emit_err("global initial value for this type is not supported")),
    }
}

/// Emit one global: section choice, visibility, alignment, label and data;
/// uninitialized globals become `.comm`.
pub fn emit_varinfo(
    w: &mut AsmWriter,
    ctx: &Context,
    prog: &Program,
    name: Name,
    target: Target,
) -> CcResult<()> {
    let Some(var) = prog.scopes.find_in(Scopes::GLOBAL, name) else {
        return Err(emit_err("unresolved global"));
    };
    if var.storage.is_extern || var.storage.is_typedef || var.ty.is_func() {
        return Ok(());
    }
    let VarPlace::Global { init } = &var.place else {
        return Ok(());
    };
    let text = ctx.interner.resolve(name);
    let label = if var.storage.is_static {
        text.to_string()
    } else {
        target.mangle(text)
    };
    let size = ctx
        .types
        .type_size(&var.ty)
        .ok_or_else(|| emit_err(format!("global '{}' has incomplete type", text)))?
        .max(1);
    let align = ctx.types.align_size(&var.ty).unwrap_or(1).max(1);

    match init {
        Some(init) => {
            if var.ty.qual.is_const {
                w.directive(target.rodata_section())?;
            } else {
                w.directive(".data")?;
            }
            if var.storage.is_static {
                if !target.is_darwin() {
                    w.op1(".local", &label)?;
                }
            } else {
                w.op1(".globl", &label)?;
            }
            w.directive(&target.align_directive(align))?;
            w.label(&label)?;
            construct_initial_value(w, ctx, prog, &var.ty, Some(init), target)
        }
        None => {
            if var.storage.is_static && !target.is_darwin() {
                w.op1(".local", &label)?;
            }
            let align_operand = if target.is_darwin() {
                // Mach-O .comm takes a log2 alignment.
                align.trailing_zeros() as usize
            } else {
                align
            };
            w.op1(".comm", format!("{}, {}, {}", label, size, align_operand))
        }
    }
}

/// Pooled string literals, emitted once at the end of the unit.
pub fn emit_string_pool(
    w: &mut AsmWriter,
    ctx: &Context,
    prog: &Program,
    target: Target,
) -> CcResult<()> {
    if prog.strings.entries.is_empty() {
        return Ok(());
    }
    w.blank()?;
    w.directive(target.rodata_section())?;
    for lit in &prog.strings.entries {
        let label = target.local_label(ctx.interner.resolve(lit.label));
        w.label(&label)?;
        w.op1(".ascii", format!("\"{}\\0\"", escape_string(&lit.bytes)))?;
    }
    Ok(())
}
