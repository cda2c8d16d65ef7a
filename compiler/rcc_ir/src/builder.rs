//! AST to IR lowering
//!
//! Expressions lower left-to-right with the lvalue/rvalue distinction: an
//! lvalue evaluation yields a register holding an address, an rvalue a
//! register holding the value. Aggregates are always handled by address.
//! Widths come from the expression types; the builder never widens or
//! narrows implicitly, that is what `Cast` nodes are for.

use crate::ir::*;
use rcc_common::{CcError, CcResult, Loc, Name, SourceLoc};
use rcc_parser::{
    BinOp, Context, Declaration, Expr, ExprKind, Function, Initializer, LocalInit, Program,
    ScopeId, Stmt, UnaryOp, VarPlace,
};
use rcc_types::{Type, TypeKind};
use std::collections::{HashMap, HashSet};

struct SwitchFrame {
    case_bbs: Vec<(i64, BBId)>,
    default_bb: Option<BBId>,
}

struct FuncBuilder<'a> {
    prog: &'a Program,
    ctx: &'a Context,
    func: &'a Function,
    vregs: Vec<VRegInfo>,
    slots: Vec<FrameSlot>,
    bbs: Vec<BasicBlock>,
    cur: usize,
    break_targets: Vec<BBId>,
    cont_targets: Vec<BBId>,
    switches: Vec<SwitchFrame>,
    labels: HashMap<Name, BBId>,
    defined_labels: HashSet<Name>,
    gotos: Vec<(Name, Loc)>,
}

/// Lower every function of the translation unit.
pub fn build_program(prog: &Program, ctx: &Context) -> CcResult<Vec<FuncIr>> {
    let mut out = Vec::new();
    for decl in &prog.decls {
        if let Declaration::Defun(func) = decl {
            let fir = FuncBuilder::new(prog, ctx, func).build()?;
            log::debug!(
                "{}: {} blocks, {} vregs, {} slots",
                ctx.interner.resolve(func.name),
                fir.bbs.len(),
                fir.vregs.len(),
                fir.slots.len()
            );
            out.push(fir);
        }
    }
    Ok(out)
}

impl<'a> FuncBuilder<'a> {
    fn new(prog: &'a Program, ctx: &'a Context, func: &'a Function) -> Self {
        Self {
            prog,
            ctx,
            func,
            vregs: Vec::new(),
            slots: Vec::new(),
            bbs: vec![BasicBlock::default()],
            cur: 0,
            break_targets: Vec::new(),
            cont_targets: Vec::new(),
            switches: Vec::new(),
            labels: HashMap::new(),
            defined_labels: HashSet::new(),
            gotos: Vec::new(),
        }
    }

    fn build(mut self) -> CcResult<FuncIr> {
        let locals = self.func.locals.as_slice();
        for local in locals {
            let size = self.ctx.types.type_size(&local.ty).unwrap_or(1).max(1);
            let align = self.ctx.types.align_size(&local.ty).unwrap_or(1).max(1);
            self.slots.push(FrameSlot { name: Some(local.name), size, align });
        }
        let params = (0..self.func.param_count)
            .map(|i| {
                let ty = &self.func.locals[i].ty;
                ParamSlot {
                    slot: i,
                    size: self.type_width(ty),
                    is_flo: ty.is_flonum(),
                    is_agg: ty.is_struct(),
                }
            })
            .collect();

        let func = self.func;
        for stmt in &func.body {
            self.gen_stmt(stmt)?;
        }

        // Validate gotos before sealing the block list.
        for (label, loc) in std::mem::take(&mut self.gotos) {
            if !self.defined_labels.contains(&label) {
                return Err(self.err(
                    loc,
                    format!("use of undeclared label '{}'", self.ctx.interner.resolve(label)),
                ));
            }
        }

        // Seal: append the exit block and patch the placeholder jumps.
        self.emit(IrOp::Jmp { dest: EXIT_BB });
        let exit = BBId(self.bbs.len() as u32);
        self.bbs.push(BasicBlock::default());
        for bb in &mut self.bbs {
            for op in &mut bb.ops {
                match op {
                    IrOp::Jmp { dest } | IrOp::JmpIf { dest, .. } if *dest == EXIT_BB => {
                        *dest = exit;
                    }
                    _ => {}
                }
            }
        }

        Ok(FuncIr {
            name: self.func.name,
            is_static: self.func.is_static,
            vaargs: self.func.vaargs,
            params,
            slots: self.slots,
            vregs: self.vregs,
            bbs: self.bbs,
        })
    }

    // ---- infrastructure -------------------------------------------------

    fn err(&self, loc: Loc, message: impl Into<String>) -> CcError {
        CcError::ir_error(message, Some(SourceLoc::resolve(&self.ctx.lines, loc)))
    }

    fn new_vreg(&mut self, size: u8, is_flo: bool) -> VReg {
        let v = VReg(self.vregs.len() as u32);
        self.vregs.push(VRegInfo { size, is_flo });
        v
    }

    fn type_width(&self, ty: &Type) -> u8 {
        match &ty.kind {
            TypeKind::Struct { .. } | TypeKind::Array { .. } | TypeKind::Func { .. } => 8,
            _ => self.ctx.types.type_size(ty).unwrap_or(8).min(8) as u8,
        }
    }

    fn vreg_for_type(&mut self, ty: &Type) -> VReg {
        let size = self.type_width(ty);
        self.new_vreg(size, ty.is_flonum())
    }

    fn new_bb(&mut self) -> BBId {
        let id = BBId(self.bbs.len() as u32);
        self.bbs.push(BasicBlock::default());
        id
    }

    fn set_bb(&mut self, bb: BBId) {
        self.cur = bb.index();
    }

    fn emit(&mut self, op: IrOp) {
        self.bbs[self.cur].ops.push(op);
    }

    fn imm(&mut self, value: i64, size: u8) -> VReg {
        let dst = self.new_vreg(size, false);
        self.emit(IrOp::Imm { dst, value });
        dst
    }

    /// addr + byte offset, reusing `addr` when the offset is zero.
    fn addr_offset(&mut self, addr: VReg, offset: usize) -> VReg {
        if offset == 0 {
            return addr;
        }
        let off = self.imm(offset as i64, 8);
        let dst = self.new_vreg(8, false);
        self.emit(IrOp::Bin { op: IrBinOp::Add, dst, lhs: addr, rhs: off, unsigned: false });
        dst
    }

    // ---- lvalues --------------------------------------------------------

    fn var_addr(&mut self, name: Name, scope: ScopeId, loc: Loc) -> CcResult<VReg> {
        let Some((_, var)) = self.prog.scopes.find(scope, name) else {
            return Err(self.err(
                loc,
                format!("unresolved variable '{}'", self.ctx.interner.resolve(name)),
            ));
        };
        let (place, is_static) = (var.place.clone(), var.storage.is_static);
        let dst = self.new_vreg(8, false);
        match place {
            VarPlace::Local { index } => self.emit(IrOp::Bofs { dst, slot: index }),
            VarPlace::StaticLocal { gvar } => {
                self.emit(IrOp::Iofs { dst, label: gvar, mangle: false })
            }
            VarPlace::Global { .. } => {
                self.emit(IrOp::Iofs { dst, label: name, mangle: !is_static })
            }
        }
        Ok(dst)
    }

    fn gen_lval(&mut self, expr: &Expr) -> CcResult<VReg> {
        match &expr.kind {
            ExprKind::Var { name, scope } => self.var_addr(*name, *scope, expr.loc),
            ExprKind::Deref(sub) => self.gen_expr_rv(sub),
            ExprKind::Member { target, index, .. } => {
                let base = self.gen_lval(target)?;
                let Some(id) = self.ctx.types.resolve_struct(&target.ty) else {
                    return Err(self.err(expr.loc, "member access on an unresolved struct"));
                };
                let offset = self.ctx.types.struct_info(id).members[*index].offset;
                Ok(self.addr_offset(base, offset))
            }
            ExprKind::Str { label } => {
                let dst = self.new_vreg(8, false);
                self.emit(IrOp::Iofs { dst, label: *label, mangle: false });
                Ok(dst)
            }
            _ => Err(self.err(expr.loc, "expression is not an lvalue")),
        }
    }

    // ---- rvalues --------------------------------------------------------

    fn gen_expr_rv(&mut self, expr: &Expr) -> CcResult<VReg> {
        match self.gen_expr(expr)? {
            Some(v) => Ok(v),
            None => Err(self.err(expr.loc, "void value used where a value is required")),
        }
    }

    fn is_address_type(ty: &Type) -> bool {
        ty.is_struct() || ty.is_array() || ty.is_func()
    }

    fn gen_expr(&mut self, expr: &Expr) -> CcResult<Option<VReg>> {
        match &expr.kind {
            ExprKind::Fixnum(value) => {
                let dst = self.vreg_for_type(&expr.ty);
                self.emit(IrOp::Imm { dst, value: *value });
                Ok(Some(dst))
            }
            ExprKind::Flonum(value) => {
                let dst = self.vreg_for_type(&expr.ty);
                self.emit(IrOp::FImm { dst, value: *value });
                Ok(Some(dst))
            }
            ExprKind::Str { .. } | ExprKind::Ref(_) => {
                let addr = match &expr.kind {
                    ExprKind::Ref(sub) => self.gen_lval(sub)?,
                    _ => self.gen_lval(expr)?,
                };
                Ok(Some(addr))
            }
            ExprKind::Var { .. } => {
                let addr = self.gen_lval(expr)?;
                if Self::is_address_type(&expr.ty) {
                    return Ok(Some(addr));
                }
                let dst = self.vreg_for_type(&expr.ty);
                self.emit(IrOp::Load { dst, addr });
                Ok(Some(dst))
            }
            ExprKind::Deref(sub) => {
                let addr = self.gen_expr_rv(sub)?;
                if Self::is_address_type(&expr.ty) {
                    return Ok(Some(addr));
                }
                let dst = self.vreg_for_type(&expr.ty);
                self.emit(IrOp::Load { dst, addr });
                Ok(Some(dst))
            }
            ExprKind::Member { .. } => {
                let addr = self.gen_lval(expr)?;
                if Self::is_address_type(&expr.ty) {
                    return Ok(Some(addr));
                }
                let dst = self.vreg_for_type(&expr.ty);
                self.emit(IrOp::Load { dst, addr });
                Ok(Some(dst))
            }
            ExprKind::Cast(sub) => self.gen_cast(expr, sub),
            ExprKind::Unary { op, sub } => self.gen_unary(expr, *op, sub),
            ExprKind::Bin { op, lhs, rhs } => self.gen_bin(expr, *op, lhs, rhs).map(Some),
            ExprKind::Assign { lhs, rhs } => self.gen_assign(lhs, rhs).map(Some),
            ExprKind::AssignWith { op, lhs, rhs } => {
                self.gen_assign_with(expr, *op, lhs, rhs).map(Some)
            }
            ExprKind::Comma { lhs, rhs } => {
                self.gen_expr(lhs)?;
                self.gen_expr(rhs)
            }
            ExprKind::Ternary { cond, then_expr, else_expr } => {
                self.gen_ternary(expr, cond, then_expr, else_expr)
            }
            ExprKind::Funcall { func, args } => self.gen_funcall(expr, func, args),
        }
    }

    fn gen_cast(&mut self, expr: &Expr, sub: &Expr) -> CcResult<Option<VReg>> {
        if expr.ty.is_void() {
            self.gen_expr(sub)?;
            return Ok(None);
        }
        let src = self.gen_expr_rv(sub)?;
        let src_info = self.vregs[src.index()];
        let dst_size = self.type_width(&expr.ty);
        let dst_flo = expr.ty.is_flonum();
        if src_info.size == dst_size && src_info.is_flo == dst_flo {
            return Ok(Some(src));
        }
        let dst = self.new_vreg(dst_size, dst_flo);
        self.emit(IrOp::Cast { dst, src, src_unsigned: sub.ty.is_unsigned() });
        Ok(Some(dst))
    }

    fn gen_unary(&mut self, expr: &Expr, op: UnaryOp, sub: &Expr) -> CcResult<Option<VReg>> {
        match op {
            UnaryOp::Neg | UnaryOp::BitNot => {
                let src = self.gen_expr_rv(sub)?;
                let dst = self.vreg_for_type(&expr.ty);
                let op = if op == UnaryOp::Neg { IrUnOp::Neg } else { IrUnOp::BitNot };
                self.emit(IrOp::Un { op, dst, src });
                Ok(Some(dst))
            }
            UnaryOp::Not => {
                let src = self.gen_expr_rv(sub)?;
                let zero = self.zero_like(src);
                let dst = self.new_vreg(4, false);
                self.emit(IrOp::Cmp { cond: Cond::Eq, dst, lhs: src, rhs: zero, unsigned: false });
                Ok(Some(dst))
            }
            UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec => {
                let post = matches!(op, UnaryOp::PostInc | UnaryOp::PostDec);
                let dec = matches!(op, UnaryOp::PreDec | UnaryOp::PostDec);
                let addr = self.gen_lval(sub)?;
                let value = self.vreg_for_type(&sub.ty);
                self.emit(IrOp::Load { dst: value, addr });
                let old = if post {
                    let old = self.vreg_for_type(&sub.ty);
                    self.emit(IrOp::Mov { dst: old, src: value });
                    Some(old)
                } else {
                    None
                };
                let delta = match &sub.ty.kind {
                    TypeKind::Ptr { base } => {
                        self.ctx.types.type_size(base).unwrap_or(1) as i64
                    }
                    _ => 1,
                };
                let step = if sub.ty.is_flonum() {
                    let d = self.vreg_for_type(&sub.ty);
                    self.emit(IrOp::FImm { dst: d, value: 1.0 });
                    d
                } else {
                    self.imm(delta, self.vregs[value.index()].size)
                };
                let new = self.vreg_for_type(&sub.ty);
                let bop = if dec { IrBinOp::Sub } else { IrBinOp::Add };
                self.emit(IrOp::Bin { op: bop, dst: new, lhs: value, rhs: step, unsigned: false });
                self.emit(IrOp::Store { addr, src: new });
                Ok(Some(old.unwrap_or(new)))
            }
        }
    }

    fn zero_like(&mut self, reg: VReg) -> VReg {
        let info = self.vregs[reg.index()];
        let dst = self.new_vreg(info.size, info.is_flo);
        if info.is_flo {
            self.emit(IrOp::FImm { dst, value: 0.0 });
        } else {
            self.emit(IrOp::Imm { dst, value: 0 });
        }
        dst
    }

    fn gen_bin(&mut self, expr: &Expr, op: BinOp, lhs: &Expr, rhs: &Expr) -> CcResult<VReg> {
        match op {
            BinOp::LogAnd | BinOp::LogOr => {
                let res = self.new_vreg(4, false);
                let false_bb = self.new_bb();
                let end_bb = self.new_bb();
                if op == BinOp::LogAnd {
                    self.gen_cond_jmp(lhs, false, false_bb)?;
                    self.gen_cond_jmp(rhs, false, false_bb)?;
                    self.emit(IrOp::Imm { dst: res, value: 1 });
                } else {
                    let true_bb = self.new_bb();
                    self.gen_cond_jmp(lhs, true, true_bb)?;
                    self.gen_cond_jmp(rhs, false, false_bb)?;
                    self.emit(IrOp::Jmp { dest: true_bb });
                    self.set_bb(true_bb);
                    self.emit(IrOp::Imm { dst: res, value: 1 });
                }
                self.emit(IrOp::Jmp { dest: end_bb });
                self.set_bb(false_bb);
                self.emit(IrOp::Imm { dst: res, value: 0 });
                self.emit(IrOp::Jmp { dest: end_bb });
                self.set_bb(end_bb);
                Ok(res)
            }
            BinOp::PtrAdd | BinOp::PtrSub => {
                let base = self.gen_expr_rv(lhs)?;
                let index = self.gen_expr_rv(rhs)?;
                let index = self.extend_to(index, 8, rhs.ty.is_unsigned());
                let elem_size = expr
                    .ty
                    .pointee()
                    .and_then(|p| self.ctx.types.type_size(p))
                    .unwrap_or(1);
                let scaled = if elem_size == 1 {
                    index
                } else {
                    let size = self.imm(elem_size as i64, 8);
                    let scaled = self.new_vreg(8, false);
                    self.emit(IrOp::Bin {
                        op: IrBinOp::Mul,
                        dst: scaled,
                        lhs: index,
                        rhs: size,
                        unsigned: false,
                    });
                    scaled
                };
                let dst = self.new_vreg(8, false);
                let bop = if op == BinOp::PtrAdd { IrBinOp::Add } else { IrBinOp::Sub };
                self.emit(IrOp::Bin { op: bop, dst, lhs: base, rhs: scaled, unsigned: false });
                Ok(dst)
            }
            BinOp::PtrDiff => {
                let l = self.gen_expr_rv(lhs)?;
                let r = self.gen_expr_rv(rhs)?;
                let diff = self.new_vreg(8, false);
                self.emit(IrOp::Bin { op: IrBinOp::Sub, dst: diff, lhs: l, rhs: r, unsigned: false });
                let elem_size = lhs
                    .ty
                    .pointee()
                    .and_then(|p| self.ctx.types.type_size(p))
                    .unwrap_or(1);
                if elem_size == 1 {
                    return Ok(diff);
                }
                let size = self.imm(elem_size as i64, 8);
                let dst = self.new_vreg(8, false);
                self.emit(IrOp::Bin { op: IrBinOp::Div, dst, lhs: diff, rhs: size, unsigned: false });
                Ok(dst)
            }
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let l = self.gen_expr_rv(lhs)?;
                let r = self.gen_expr_rv(rhs)?;
                let unsigned = lhs.ty.is_unsigned() || lhs.ty.is_ptr_or_array();
                let dst = self.new_vreg(4, false);
                self.emit(IrOp::Cmp { cond: cond_of(op), dst, lhs: l, rhs: r, unsigned });
                Ok(dst)
            }
            _ => {
                let l = self.gen_expr_rv(lhs)?;
                let r = self.gen_expr_rv(rhs)?;
                // Shift counts arrive as int; match the left width.
                let r = if matches!(op, BinOp::LShift | BinOp::RShift) {
                    self.extend_to(r, self.vregs[l.index()].size, false)
                } else {
                    r
                };
                let dst = self.vreg_for_type(&expr.ty);
                self.emit(IrOp::Bin {
                    op: ir_bin_of(op),
                    dst,
                    lhs: l,
                    rhs: r,
                    unsigned: expr.ty.is_unsigned(),
                });
                Ok(dst)
            }
        }
    }

    fn extend_to(&mut self, reg: VReg, size: u8, src_unsigned: bool) -> VReg {
        let info = self.vregs[reg.index()];
        if info.size == size {
            return reg;
        }
        let dst = self.new_vreg(size, info.is_flo);
        self.emit(IrOp::Cast { dst, src: reg, src_unsigned });
        dst
    }

    fn gen_assign(&mut self, lhs: &Expr, rhs: &Expr) -> CcResult<VReg> {
        if lhs.ty.is_struct() {
            let src = self.gen_expr_rv(rhs)?;
            let dst = self.gen_lval(lhs)?;
            let size = self.ctx.types.type_size(&lhs.ty).unwrap_or(0);
            self.emit(IrOp::Memcpy { dst, src, size });
            return Ok(dst);
        }
        let src = self.gen_expr_rv(rhs)?;
        let addr = self.gen_lval(lhs)?;
        self.emit(IrOp::Store { addr, src });
        Ok(src)
    }

    fn gen_assign_with(
        &mut self,
        expr: &Expr,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> CcResult<VReg> {
        let addr = self.gen_lval(lhs)?;
        let value = self.vreg_for_type(&lhs.ty);
        self.emit(IrOp::Load { dst: value, addr });
        let r = self.gen_expr_rv(rhs)?;
        let new = match op {
            BinOp::PtrAdd | BinOp::PtrSub => {
                let index = self.extend_to(r, 8, rhs.ty.is_unsigned());
                let elem_size = lhs
                    .ty
                    .pointee()
                    .and_then(|p| self.ctx.types.type_size(p))
                    .unwrap_or(1);
                let scaled = if elem_size == 1 {
                    index
                } else {
                    let size = self.imm(elem_size as i64, 8);
                    let scaled = self.new_vreg(8, false);
                    self.emit(IrOp::Bin {
                        op: IrBinOp::Mul,
                        dst: scaled,
                        lhs: index,
                        rhs: size,
                        unsigned: false,
                    });
                    scaled
                };
                let dst = self.new_vreg(8, false);
                let bop = if op == BinOp::PtrAdd { IrBinOp::Add } else { IrBinOp::Sub };
                self.emit(IrOp::Bin { op: bop, dst, lhs: value, rhs: scaled, unsigned: false });
                dst
            }
            _ => {
                let r = if matches!(op, BinOp::LShift | BinOp::RShift) {
                    self.extend_to(r, self.vregs[value.index()].size, false)
                } else {
                    r
                };
                let dst = self.vreg_for_type(&expr.ty);
                self.emit(IrOp::Bin {
                    op: ir_bin_of(op),
                    dst,
                    lhs: value,
                    rhs: r,
                    unsigned: expr.ty.is_unsigned(),
                });
                dst
            }
        };
        self.emit(IrOp::Store { addr, src: new });
        Ok(new)
    }

    fn gen_ternary(
        &mut self,
        expr: &Expr,
        cond: &Expr,
        then_expr: &Expr,
        else_expr: &Expr,
    ) -> CcResult<Option<VReg>> {
        let else_bb = self.new_bb();
        let end_bb = self.new_bb();
        let res = if expr.ty.is_void() {
            None
        } else {
            Some(self.vreg_for_type(&expr.ty))
        };
        self.gen_cond_jmp(cond, false, else_bb)?;
        let tv = self.gen_expr(then_expr)?;
        if let (Some(res), Some(tv)) = (res, tv) {
            self.emit(IrOp::Mov { dst: res, src: tv });
        }
        self.emit(IrOp::Jmp { dest: end_bb });
        self.set_bb(else_bb);
        let ev = self.gen_expr(else_expr)?;
        if let (Some(res), Some(ev)) = (res, ev) {
            self.emit(IrOp::Mov { dst: res, src: ev });
        }
        self.emit(IrOp::Jmp { dest: end_bb });
        self.set_bb(end_bb);
        Ok(res)
    }

    fn gen_funcall(
        &mut self,
        expr: &Expr,
        func: &Expr,
        args: &[Expr],
    ) -> CcResult<Option<VReg>> {
        let fty = if func.ty.is_func() {
            func.ty.clone()
        } else {
            return Err(self.err(func.loc, "call target is not a function"));
        };
        let TypeKind::Func { vaargs, .. } = &fty.kind else { unreachable!() };
        let vaargs = *vaargs;

        // Aggregate return: the caller allocates a temporary and passes its
        // address as a hidden first argument.
        let ret_agg = expr.ty.is_struct();
        let mut call_args: Vec<CallArg> = Vec::with_capacity(args.len() + 1);
        let mut ret_slot_addr = None;
        if ret_agg {
            let size = self.ctx.types.type_size(&expr.ty).unwrap_or(8).max(1);
            let align = self.ctx.types.align_size(&expr.ty).unwrap_or(8).max(1);
            let slot = self.slots.len();
            self.slots.push(FrameSlot { name: None, size, align });
            let addr = self.new_vreg(8, false);
            self.emit(IrOp::Bofs { dst: addr, slot });
            call_args.push(CallArg { reg: addr, agg_size: None });
            ret_slot_addr = Some(addr);
        }

        for arg in args {
            let reg = self.gen_expr_rv(arg)?;
            let agg_size = if arg.ty.is_struct() {
                Some(self.ctx.types.type_size(&arg.ty).unwrap_or(8))
            } else {
                None
            };
            call_args.push(CallArg { reg, agg_size });
        }

        let target = match &func.kind {
            ExprKind::Var { name, scope } => {
                let is_static = self
                    .prog
                    .scopes
                    .find(*scope, *name)
                    .map(|(_, v)| v.storage.is_static)
                    .unwrap_or(false);
                CallTarget::Label { name: *name, mangle: !is_static }
            }
            _ => {
                let reg = self.gen_expr_rv(func)?;
                CallTarget::Reg(reg)
            }
        };

        let vararg_floats = if vaargs {
            let mut n = 0u8;
            for arg in &call_args {
                if self.vregs[arg.reg.index()].is_flo && n < 8 {
                    n += 1;
                }
            }
            Some(n)
        } else {
            None
        };

        let dst = if expr.ty.is_void() || ret_agg {
            None
        } else {
            Some(self.vreg_for_type(&expr.ty))
        };
        self.emit(IrOp::Call { dst, target, args: call_args, vararg_floats });
        Ok(dst.or(ret_slot_addr))
    }

    // ---- conditions ------------------------------------------------------

    fn gen_cond_jmp(&mut self, cond: &Expr, jump_if_true: bool, target: BBId) -> CcResult<()> {
        match &cond.kind {
            ExprKind::Fixnum(v) => {
                if (*v != 0) == jump_if_true {
                    self.emit(IrOp::Jmp { dest: target });
                    let dead = self.new_bb();
                    self.set_bb(dead);
                }
                Ok(())
            }
            ExprKind::Unary { op: UnaryOp::Not, sub } => {
                self.gen_cond_jmp(sub, !jump_if_true, target)
            }
            ExprKind::Bin { op, lhs, rhs }
                if matches!(
                    op,
                    BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
                ) =>
            {
                let l = self.gen_expr_rv(lhs)?;
                let r = self.gen_expr_rv(rhs)?;
                let unsigned = lhs.ty.is_unsigned() || lhs.ty.is_ptr_or_array();
                let mut c = cond_of(*op);
                if !jump_if_true {
                    c = c.invert();
                }
                self.emit(IrOp::JmpIf { cond: c, lhs: l, rhs: r, unsigned, dest: target });
                Ok(())
            }
            ExprKind::Bin { op: BinOp::LogAnd, lhs, rhs } => {
                if jump_if_true {
                    let skip = self.new_bb();
                    self.gen_cond_jmp(lhs, false, skip)?;
                    self.gen_cond_jmp(rhs, true, target)?;
                    self.emit(IrOp::Jmp { dest: skip });
                    self.set_bb(skip);
                } else {
                    self.gen_cond_jmp(lhs, false, target)?;
                    self.gen_cond_jmp(rhs, false, target)?;
                }
                Ok(())
            }
            ExprKind::Bin { op: BinOp::LogOr, lhs, rhs } => {
                if jump_if_true {
                    self.gen_cond_jmp(lhs, true, target)?;
                    self.gen_cond_jmp(rhs, true, target)?;
                } else {
                    let skip = self.new_bb();
                    self.gen_cond_jmp(lhs, true, skip)?;
                    self.gen_cond_jmp(rhs, false, target)?;
                    self.emit(IrOp::Jmp { dest: skip });
                    self.set_bb(skip);
                }
                Ok(())
            }
            _ => {
                let v = self.gen_expr_rv(cond)?;
                let zero = self.zero_like(v);
                let c = if jump_if_true { Cond::Ne } else { Cond::Eq };
                self.emit(IrOp::JmpIf { cond: c, lhs: v, rhs: zero, unsigned: false, dest: target });
                Ok(())
            }
        }
    }

    // ---- statements ------------------------------------------------------

    fn gen_stmt(&mut self, stmt: &Stmt) -> CcResult<()> {
        match stmt {
            Stmt::Empty => Ok(()),
            Stmt::Expr(expr) => {
                self.gen_expr(expr)?;
                Ok(())
            }
            Stmt::Block { stmts, .. } => {
                for s in stmts {
                    self.gen_stmt(s)?;
                }
                Ok(())
            }
            Stmt::If { cond, then_stmt, else_stmt } => {
                let end_bb = self.new_bb();
                match else_stmt {
                    Some(else_stmt) => {
                        let else_bb = self.new_bb();
                        self.gen_cond_jmp(cond, false, else_bb)?;
                        self.gen_stmt(then_stmt)?;
                        self.emit(IrOp::Jmp { dest: end_bb });
                        self.set_bb(else_bb);
                        self.gen_stmt(else_stmt)?;
                        self.emit(IrOp::Jmp { dest: end_bb });
                    }
                    None => {
                        self.gen_cond_jmp(cond, false, end_bb)?;
                        self.gen_stmt(then_stmt)?;
                        self.emit(IrOp::Jmp { dest: end_bb });
                    }
                }
                self.set_bb(end_bb);
                Ok(())
            }
            Stmt::While { cond, body } => {
                let cond_bb = self.new_bb();
                let end_bb = self.new_bb();
                self.emit(IrOp::Jmp { dest: cond_bb });
                self.set_bb(cond_bb);
                self.gen_cond_jmp(cond, false, end_bb)?;
                self.break_targets.push(end_bb);
                self.cont_targets.push(cond_bb);
                self.gen_stmt(body)?;
                self.break_targets.pop();
                self.cont_targets.pop();
                self.emit(IrOp::Jmp { dest: cond_bb });
                self.set_bb(end_bb);
                Ok(())
            }
            Stmt::DoWhile { body, cond } => {
                let body_bb = self.new_bb();
                let cond_bb = self.new_bb();
                let end_bb = self.new_bb();
                self.emit(IrOp::Jmp { dest: body_bb });
                self.set_bb(body_bb);
                self.break_targets.push(end_bb);
                self.cont_targets.push(cond_bb);
                self.gen_stmt(body)?;
                self.break_targets.pop();
                self.cont_targets.pop();
                self.emit(IrOp::Jmp { dest: cond_bb });
                self.set_bb(cond_bb);
                self.gen_cond_jmp(cond, true, body_bb)?;
                self.emit(IrOp::Jmp { dest: end_bb });
                self.set_bb(end_bb);
                Ok(())
            }
            Stmt::For { pre, cond, post, body } => {
                if let Some(pre) = pre {
                    self.gen_expr(pre)?;
                }
                let cond_bb = self.new_bb();
                let post_bb = self.new_bb();
                let end_bb = self.new_bb();
                self.emit(IrOp::Jmp { dest: cond_bb });
                self.set_bb(cond_bb);
                if let Some(cond) = cond {
                    self.gen_cond_jmp(cond, false, end_bb)?;
                }
                self.break_targets.push(end_bb);
                self.cont_targets.push(post_bb);
                self.gen_stmt(body)?;
                self.break_targets.pop();
                self.cont_targets.pop();
                self.emit(IrOp::Jmp { dest: post_bb });
                self.set_bb(post_bb);
                if let Some(post) = post {
                    self.gen_expr(post)?;
                }
                self.emit(IrOp::Jmp { dest: cond_bb });
                self.set_bb(end_bb);
                Ok(())
            }
            Stmt::Switch { value, body, cases, has_default } => {
                let v = self.gen_expr_rv(value)?;
                let case_bbs: Vec<(i64, BBId)> =
                    cases.iter().map(|&c| (c, self.new_bb())).collect();
                let default_bb = if *has_default { Some(self.new_bb()) } else { None };
                let end_bb = self.new_bb();
                let width = self.vregs[v.index()].size;
                for &(case_value, bb) in &case_bbs {
                    let c = self.imm(case_value, width);
                    self.emit(IrOp::JmpIf {
                        cond: Cond::Eq,
                        lhs: v,
                        rhs: c,
                        unsigned: false,
                        dest: bb,
                    });
                }
                self.emit(IrOp::Jmp { dest: default_bb.unwrap_or(end_bb) });
                let dead = self.new_bb();
                self.set_bb(dead);
                self.switches.push(SwitchFrame { case_bbs, default_bb });
                self.break_targets.push(end_bb);
                self.gen_stmt(body)?;
                self.break_targets.pop();
                self.switches.pop();
                self.emit(IrOp::Jmp { dest: end_bb });
                self.set_bb(end_bb);
                Ok(())
            }
            Stmt::Case { value } => {
                let frame = self.switches.last().expect("case outside switch");
                let bb = frame
                    .case_bbs
                    .iter()
                    .find(|(v, _)| v == value)
                    .map(|(_, bb)| *bb)
                    .expect("case block");
                self.emit(IrOp::Jmp { dest: bb });
                self.set_bb(bb);
                Ok(())
            }
            Stmt::Default => {
                let bb = self
                    .switches
                    .last()
                    .and_then(|f| f.default_bb)
                    .expect("default outside switch");
                self.emit(IrOp::Jmp { dest: bb });
                self.set_bb(bb);
                Ok(())
            }
            Stmt::Break => {
                let target = *self.break_targets.last().expect("break outside loop");
                self.emit(IrOp::Jmp { dest: target });
                let dead = self.new_bb();
                self.set_bb(dead);
                Ok(())
            }
            Stmt::Continue => {
                let target = *self.cont_targets.last().expect("continue outside loop");
                self.emit(IrOp::Jmp { dest: target });
                let dead = self.new_bb();
                self.set_bb(dead);
                Ok(())
            }
            Stmt::Return { value, loc } => {
                match value {
                    None => self.emit(IrOp::Result { src: None }),
                    Some(expr) if expr.ty.is_struct() => {
                        // Copy through the hidden pointer parameter.
                        let src = self.gen_expr_rv(expr)?;
                        let slot_addr = self.new_vreg(8, false);
                        self.emit(IrOp::Bofs { dst: slot_addr, slot: 0 });
                        let ret_ptr = self.new_vreg(8, false);
                        self.emit(IrOp::Load { dst: ret_ptr, addr: slot_addr });
                        let size = self
                            .ctx
                            .types
                            .type_size(&expr.ty)
                            .ok_or_else(|| self.err(*loc, "unsized return value"))?;
                        self.emit(IrOp::Memcpy { dst: ret_ptr, src, size });
                        self.emit(IrOp::Result { src: Some(ret_ptr) });
                    }
                    Some(expr) => {
                        let v = self.gen_expr_rv(expr)?;
                        self.emit(IrOp::Result { src: Some(v) });
                    }
                }
                self.emit(IrOp::Jmp { dest: EXIT_BB });
                let dead = self.new_bb();
                self.set_bb(dead);
                Ok(())
            }
            Stmt::Goto { label, loc } => {
                let bb = self.label_bb(*label);
                self.gotos.push((*label, *loc));
                self.emit(IrOp::Jmp { dest: bb });
                let dead = self.new_bb();
                self.set_bb(dead);
                Ok(())
            }
            Stmt::Label { name, stmt } => {
                let bb = self.label_bb(*name);
                self.defined_labels.insert(*name);
                self.emit(IrOp::Jmp { dest: bb });
                self.set_bb(bb);
                self.gen_stmt(stmt)
            }
            Stmt::VarDecl { inits } => {
                for init in inits {
                    self.gen_local_init(init)?;
                }
                Ok(())
            }
            Stmt::Asm { text } => {
                self.emit(IrOp::Asm { text: text.clone() });
                Ok(())
            }
        }
    }

    fn label_bb(&mut self, name: Name) -> BBId {
        if let Some(&bb) = self.labels.get(&name) {
            return bb;
        }
        let bb = self.new_bb();
        self.labels.insert(name, bb);
        bb
    }

    // ---- local initialization -------------------------------------------

    fn gen_local_init(&mut self, init: &LocalInit) -> CcResult<()> {
        let Some(init_value) = &init.init else {
            return Ok(());
        };
        let Some((_, var)) = self.prog.scopes.find(init.scope, init.name) else {
            return Err(self.err(init.loc, "unresolved local in initializer"));
        };
        let (ty, place) = (var.ty.clone(), var.place.clone());
        let VarPlace::Local { index } = place else {
            return Err(self.err(init.loc, "initializer on a non-local variable"));
        };
        let addr = self.new_vreg(8, false);
        self.emit(IrOp::Bofs { dst: addr, slot: index });

        if matches!(init_value, Initializer::Multi(_)) {
            // Zero-fill once, then store the explicit elements.
            let size = self.ctx.types.type_size(&ty).unwrap_or(0);
            if size > 0 {
                self.emit(IrOp::Clear { dst: addr, size });
            }
        }
        self.store_init(addr, &ty, init_value, init.loc)
    }

    fn store_init(
        &mut self,
        addr: VReg,
        ty: &Type,
        init: &Initializer,
        loc: Loc,
    ) -> CcResult<()> {
        match init {
            Initializer::Single(expr) => {
                if ty.is_array() {
                    // A string literal initializing a char array.
                    let ExprKind::Str { label } = &expr.kind else {
                        return Err(self.err(loc, "unsupported array initializer"));
                    };
                    let src = self.new_vreg(8, false);
                    self.emit(IrOp::Iofs { dst: src, label: *label, mangle: false });
                    let declared = self.ctx.types.type_size(ty).unwrap_or(0);
                    let str_size = self.ctx.types.type_size(&expr.ty).unwrap_or(0);
                    let copy = declared.min(str_size);
                    if copy > 0 {
                        self.emit(IrOp::Memcpy { dst: addr, src, size: copy });
                    }
                    if declared > copy {
                        let rest = self.addr_offset(addr, copy);
                        self.emit(IrOp::Clear { dst: rest, size: declared - copy });
                    }
                    return Ok(());
                }
                if ty.is_struct() {
                    let src = self.gen_expr_rv(expr)?;
                    let size = self.ctx.types.type_size(ty).unwrap_or(0);
                    self.emit(IrOp::Memcpy { dst: addr, src, size });
                    return Ok(());
                }
                let v = self.gen_expr_rv(expr)?;
                self.emit(IrOp::Store { addr, src: v });
                Ok(())
            }
            Initializer::Multi(elems) => match &ty.kind {
                TypeKind::Array { base, .. } => {
                    let elem_size = self.ctx.types.type_size(base).unwrap_or(1);
                    for (i, elem) in elems.iter().enumerate() {
                        let Some(elem) = elem else { continue };
                        let ea = self.addr_offset(addr, i * elem_size);
                        self.store_init(ea, &base.clone(), elem, loc)?;
                    }
                    Ok(())
                }
                TypeKind::Struct { .. } => {
                    let Some(id) = self.ctx.types.resolve_struct(ty) else {
                        return Err(self.err(loc, "initializer for an unresolved struct"));
                    };
                    let members: Vec<(usize, Type)> = self
                        .ctx
                        .types
                        .struct_info(id)
                        .members
                        .iter()
                        .map(|m| (m.offset, m.ty.clone()))
                        .collect();
                    for (i, elem) in elems.iter().enumerate() {
                        let Some(elem) = elem else { continue };
                        let (offset, mty) = &members[i];
                        let ma = self.addr_offset(addr, *offset);
                        self.store_init(ma, mty, elem, loc)?;
                    }
                    Ok(())
                }
                _ => Err(self.err(loc, "aggregate initializer on a scalar")),
            },
            _ => Err(self.err(loc, "designator survived normalization")),
        }
    }
}

fn cond_of(op: BinOp) -> Cond {
    match op {
        BinOp::Eq => Cond::Eq,
        BinOp::Ne => Cond::Ne,
        BinOp::Lt => Cond::Lt,
        BinOp::Le => Cond::Le,
        BinOp::Gt => Cond::Gt,
        BinOp::Ge => Cond::Ge,
        _ => unreachable!("not a comparison"),
    }
}

fn ir_bin_of(op: BinOp) -> IrBinOp {
    match op {
        BinOp::Add => IrBinOp::Add,
        BinOp::Sub => IrBinOp::Sub,
        BinOp::Mul => IrBinOp::Mul,
        BinOp::Div => IrBinOp::Div,
        BinOp::Mod => IrBinOp::Mod,
        BinOp::BitAnd => IrBinOp::BitAnd,
        BinOp::BitOr => IrBinOp::BitOr,
        BinOp::BitXor => IrBinOp::BitXor,
        BinOp::LShift => IrBinOp::LShift,
        BinOp::RShift => IrBinOp::RShift,
        _ => unreachable!("not an arithmetic operator"),
    }
}
