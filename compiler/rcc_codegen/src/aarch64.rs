//! AArch64 function emitter (AAPCS64)
//!
//! Virtual registers come from x19-x26 and d8-d15 (callee-saved) plus the
//! caller-saved x14/x15, which the allocator hands only to ranges that do
//! not cross a call; x9-x13 and d16/d17 are statement-local scratch. Every
//! ALU op is three-operand, so spilled values are loaded, combined and
//! stored back explicitly.

use crate::asm::AsmWriter;
use crate::Target;
use rcc_common::CcResult;
use rcc_ir::{
    Assign, CallArg, CallTarget, Cond, FuncIr, IrBinOp, IrOp, IrUnOp, RegAlloc, TargetConfig,
    VReg,
};
use rcc_parser::Context;
use rcc_types::round_up;

pub const CONFIG: TargetConfig = TargetConfig {
    int_regs: 10,
    int_callee_saved: 0b0011111111,
    float_regs: 8,
    float_callee_saved: 0b11111111,
    max_int_args: 8,
    max_float_args: 8,
    vaarg_area: 128,
};

const INT_X: [&str; 10] =
    ["x19", "x20", "x21", "x22", "x23", "x24", "x25", "x26", "x14", "x15"];
const INT_W: [&str; 10] =
    ["w19", "w20", "w21", "w22", "w23", "w24", "w25", "w26", "w14", "w15"];
const FLO_D: [&str; 8] = ["d8", "d9", "d10", "d11", "d12", "d13", "d14", "d15"];
const FLO_S: [&str; 8] = ["s8", "s9", "s10", "s11", "s12", "s13", "s14", "s15"];
const ARG_X: [&str; 8] = ["x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7"];
const ARG_W: [&str; 8] = ["w0", "w1", "w2", "w3", "w4", "w5", "w6", "w7"];
const FARG_D: [&str; 8] = ["d0", "d1", "d2", "d3", "d4", "d5", "d6", "d7"];
const FARG_S: [&str; 8] = ["s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7"];

/// Scratch register families, indexed by slot.
const SCRATCH_X: [&str; 3] = ["x9", "x10", "x11"];
const SCRATCH_W: [&str; 3] = ["w9", "w10", "w11"];
const SCRATCH_D: [&str; 2] = ["d16", "d17"];
const SCRATCH_S: [&str; 2] = ["s16", "s17"];

fn ldr_op(size: u8) -> &'static str {
    match size {
        1 => "ldrb",
        2 => "ldrh",
        _ => "ldr",
    }
}

fn str_op(size: u8) -> &'static str {
    match size {
        1 => "strb",
        2 => "strh",
        _ => "str",
    }
}

fn cond_name(cond: Cond, unsigned: bool) -> &'static str {
    match (cond, unsigned) {
        (Cond::Eq, _) => "eq",
        (Cond::Ne, _) => "ne",
        (Cond::Lt, false) => "lt",
        (Cond::Le, false) => "le",
        (Cond::Gt, false) => "gt",
        (Cond::Ge, false) => "ge",
        (Cond::Lt, true) => "lo",
        (Cond::Le, true) => "ls",
        (Cond::Gt, true) => "hi",
        (Cond::Ge, true) => "hs",
    }
}

fn cond_name_float(cond: Cond) -> &'static str {
    match cond {
        Cond::Eq => "eq",
        Cond::Ne => "ne",
        Cond::Lt => "mi",
        Cond::Le => "ls",
        Cond::Gt => "gt",
        Cond::Ge => "ge",
    }
}

/// The w-form of an x register name ("x19" -> "w19"); w names pass through.
fn w_form(name: &str) -> String {
    name.replacen('x', "w", 1)
}

struct Emitter<'a, 'w> {
    w: &'a mut AsmWriter<'w>,
    ctx: &'a Context,
    fir: &'a FuncIr,
    ra: &'a RegAlloc,
    target: Target,
    fname: String,
    saved_int: Vec<&'static str>,
    saved_flo: Vec<&'static str>,
    tmp_labels: u32,
}

pub fn emit_defun(
    w: &mut AsmWriter,
    ctx: &Context,
    fir: &FuncIr,
    ra: &RegAlloc,
    target: Target,
) -> CcResult<()> {
    let fname = ctx.interner.resolve(fir.name).to_string();
    let saved_int: Vec<&'static str> = (0..CONFIG.int_regs)
        .filter(|r| {
            ra.used_reg_bits & (1 << r) != 0 && CONFIG.int_callee_saved & (1 << r) != 0
        })
        .map(|r| INT_X[r])
        .collect();
    let saved_flo: Vec<&'static str> = (0..CONFIG.float_regs)
        .filter(|r| {
            ra.used_freg_bits & (1 << r) != 0 && CONFIG.float_callee_saved & (1 << r) != 0
        })
        .map(|r| FLO_D[r])
        .collect();

    w.blank()?;
    w.directive(".text")?;
    let label = if fir.is_static { fname.clone() } else { target.mangle(&fname) };
    if fir.is_static {
        w.comment(&format!("{}: static func", fname))?;
    } else {
        w.op1(".globl", &label)?;
    }
    w.label(&label)?;

    let mut e = Emitter {
        w,
        ctx,
        fir,
        ra,
        target,
        fname,
        saved_int,
        saved_flo,
        tmp_labels: 0,
    };
    e.prologue()?;
    for b in 0..e.fir.bbs.len() {
        let label = e.bb_label(b);
        e.w.label(&label)?;
        let ops = &e.fir.bbs[b].ops;
        for op in ops {
            e.emit_op(op)?;
        }
    }
    e.epilogue()
}

impl Emitter<'_, '_> {
    fn bb_label(&self, bb: usize) -> String {
        self.target.local_label(&format!(".L{}_{}", self.fname, bb))
    }

    fn new_tmp_label(&mut self, kind: &str) -> String {
        let n = self.tmp_labels;
        self.tmp_labels += 1;
        self.target.local_label(&format!(".L{}_{}_{}", kind, self.fname, n))
    }

    fn int_name(r: usize, size: u8) -> &'static str {
        if size <= 4 {
            INT_W[r]
        } else {
            INT_X[r]
        }
    }

    fn scratch_int(slot: usize, size: u8) -> &'static str {
        if size <= 4 {
            SCRATCH_W[slot]
        } else {
            SCRATCH_X[slot]
        }
    }

    fn scratch_flo(slot: usize, size: u8) -> &'static str {
        if size == 4 {
            SCRATCH_S[slot]
        } else {
            SCRATCH_D[slot]
        }
    }

    /// Frame memory operand; large offsets go through x12.
    fn frame_mem(&mut self, offset: i64) -> CcResult<String> {
        if (-255..=255).contains(&offset) {
            return Ok(format!("[fp, #{}]", offset));
        }
        if offset >= 0 {
            if offset <= 4095 {
                self.w.op3("add", "x12", "fp", format!("#{}", offset))?;
            } else {
                self.mov_imm("x12", offset)?;
                self.w.op3("add", "x12", "fp", "x12")?;
            }
        } else {
            let n = -offset;
            if n <= 4095 {
                self.w.op3("sub", "x12", "fp", format!("#{}", n))?;
            } else {
                self.mov_imm("x12", n)?;
                self.w.op3("sub", "x12", "fp", "x12")?;
            }
        }
        Ok("[x12]".to_string())
    }

    fn mov_imm(&mut self, dst: &str, value: i64) -> CcResult<()> {
        if (-65535..=65535).contains(&value) {
            return self.w.op2("mov", dst, format!("#{}", value));
        }
        let bits = value as u64;
        let chunks = if dst.starts_with('x') { 4 } else { 2 };
        let mut first = true;
        for i in 0..chunks {
            let c = (bits >> (i * 16)) & 0xffff;
            if c == 0 && !(first && i == chunks - 1) {
                continue;
            }
            if first {
                if i == 0 {
                    self.w.op2("movz", dst, format!("#{}", c))?;
                } else {
                    self.w.op3("movz", dst, format!("#{}", c), format!("lsl #{}", i * 16))?;
                }
                first = false;
            } else {
                self.w.op3("movk", dst, format!("#{}", c), format!("lsl #{}", i * 16))?;
            }
        }
        if first {
            self.w.op2("mov", dst, "#0")?;
        }
        Ok(())
    }

    /// Value of a vreg in a register: its own, or loaded into the given
    /// scratch slot.
    fn fetch(&mut self, v: VReg, slot: usize) -> CcResult<String> {
        let info = self.fir.vreg(v);
        match self.ra.assign[v.index()] {
            Assign::Reg(r) => Ok(Self::int_name(r as usize, info.size).to_string()),
            Assign::FReg(r) => Ok(if info.size == 4 {
                FLO_S[r as usize].to_string()
            } else {
                FLO_D[r as usize].to_string()
            }),
            Assign::Spill(offset) => {
                let mem = self.frame_mem(offset)?;
                if info.is_flo {
                    let name = Self::scratch_flo(slot.min(1), info.size);
                    self.w.op2("ldr", name, mem)?;
                    Ok(name.to_string())
                } else {
                    let name = Self::scratch_int(slot, info.size);
                    self.w.op2(ldr_op(info.size), name, mem)?;
                    Ok(name.to_string())
                }
            }
        }
    }

    /// Register to compute a result into: the vreg's own, or a scratch.
    fn dst_reg(&self, v: VReg, slot: usize) -> String {
        let info = self.fir.vreg(v);
        match self.ra.assign[v.index()] {
            Assign::Reg(r) => Self::int_name(r as usize, info.size).to_string(),
            Assign::FReg(r) => {
                if info.size == 4 {
                    FLO_S[r as usize].to_string()
                } else {
                    FLO_D[r as usize].to_string()
                }
            }
            Assign::Spill(_) => {
                if info.is_flo {
                    Self::scratch_flo(slot.min(1), info.size).to_string()
                } else {
                    Self::scratch_int(slot, info.size).to_string()
                }
            }
        }
    }

    /// Store the computed value back if the vreg lives in a spill slot.
    fn finish_dst(&mut self, v: VReg, name: &str) -> CcResult<()> {
        let info = self.fir.vreg(v);
        if let Assign::Spill(offset) = self.ra.assign[v.index()] {
            let mem = self.frame_mem(offset)?;
            let op = if info.is_flo { "str" } else { str_op(info.size) };
            self.w.op2(op, name, mem)?;
        }
        Ok(())
    }

    fn global_addr(&mut self, dst: &str, sym: &str) -> CcResult<()> {
        if self.target.is_darwin() {
            self.w.op2("adrp", dst, format!("{}@PAGE", sym))?;
            self.w.op3("add", dst, dst, format!("{}@PAGEOFF", sym))
        } else {
            self.w.op2("adrp", dst, sym)?;
            self.w.op3("add", dst, dst, format!(":lo12:{}", sym))
        }
    }

    fn sub_sp(&mut self, bytes: usize) -> CcResult<()> {
        if bytes == 0 {
            return Ok(());
        }
        if bytes <= 4095 {
            self.w.op3("sub", "sp", "sp", format!("#{}", bytes))
        } else {
            self.mov_imm("x9", bytes as i64)?;
            self.w.op3("sub", "sp", "sp", "x9")
        }
    }

    fn add_sp(&mut self, bytes: usize) -> CcResult<()> {
        if bytes == 0 {
            return Ok(());
        }
        if bytes <= 4095 {
            self.w.op3("add", "sp", "sp", format!("#{}", bytes))
        } else {
            self.mov_imm("x9", bytes as i64)?;
            self.w.op3("add", "sp", "sp", "x9")
        }
    }

    fn prologue(&mut self) -> CcResult<()> {
        self.w.op3("stp", "fp", "lr", "[sp, #-16]!")?;
        self.w.op2("mov", "fp", "sp")?;
        self.sub_sp(self.ra.frame_size)?;

        let saved_int = self.saved_int.clone();
        for pair in saved_int.chunks(2) {
            match pair {
                [a, b] => self.w.op3("stp", *a, *b, "[sp, #-16]!")?,
                [a] => self.w.op2("str", *a, "[sp, #-16]!")?,
                _ => unreachable!(),
            }
        }
        let saved_flo = self.saved_flo.clone();
        for pair in saved_flo.chunks(2) {
            match pair {
                [a, b] => self.w.op3("stp", *a, *b, "[sp, #-16]!")?,
                [a] => self.w.op2("str", *a, "[sp, #-16]!")?,
                _ => unreachable!(),
            }
        }

        if self.fir.vaargs {
            // Register save area: x0-x7, then d0-d7.
            for (i, reg) in ARG_X.iter().enumerate() {
                self.w
                    .op2("str", *reg, format!("[fp, #-{}]", CONFIG.vaarg_area - i * 8))?;
            }
            for (i, reg) in FARG_D.iter().enumerate() {
                self.w.op2("str", *reg, format!("[fp, #-{}]", 64 - i * 8))?;
            }
        }

        let mut int_idx = 0usize;
        let mut flo_idx = 0usize;
        for p in self.fir.params.clone() {
            if p.is_agg {
                continue;
            }
            let offset = self.ra.slot_offsets[p.slot];
            if p.is_flo {
                if flo_idx < CONFIG.max_float_args {
                    let mem = self.frame_mem(offset)?;
                    let reg = if p.size == 4 { FARG_S[flo_idx] } else { FARG_D[flo_idx] };
                    self.w.op2("str", reg, mem)?;
                }
                flo_idx += 1;
            } else {
                if int_idx < CONFIG.max_int_args {
                    let mem = self.frame_mem(offset)?;
                    let reg = if p.size <= 4 { ARG_W[int_idx] } else { ARG_X[int_idx] };
                    self.w.op2(str_op(p.size), reg, mem)?;
                }
                int_idx += 1;
            }
        }
        Ok(())
    }

    fn epilogue(&mut self) -> CcResult<()> {
        // Restore in exact reverse of the prologue pushes.
        let saved_flo = self.saved_flo.clone();
        let saved_int = self.saved_int.clone();
        let mut groups: Vec<Vec<&'static str>> = Vec::new();
        for pair in saved_int.chunks(2) {
            groups.push(pair.to_vec());
        }
        for pair in saved_flo.chunks(2) {
            groups.push(pair.to_vec());
        }
        for pair in groups.into_iter().rev() {
            match pair.as_slice() {
                [a, b] => self.w.op4("ldp", *a, *b, "[sp]", "#16".to_string())?,
                [a] => self.w.op2("ldr", *a, "[sp], #16")?,
                _ => unreachable!(),
            }
        }
        self.w.op2("mov", "sp", "fp")?;
        self.w.op3("ldp", "fp", "lr", "[sp], #16")?;
        self.w.op0("ret")
    }

    /// Sign- or zero-extend a small operand into a 32-bit scratch for
    /// compares and division.
    fn widen(&mut self, v: VReg, slot: usize, unsigned: bool) -> CcResult<String> {
        let info = self.fir.vreg(v);
        let name = self.fetch(v, slot)?;
        if info.size >= 4 {
            return Ok(name);
        }
        let wide = SCRATCH_W[slot];
        let mnm = match (info.size, unsigned) {
            (1, false) => "sxtb",
            (1, true) => "uxtb",
            (2, false) => "sxth",
            _ => "uxth",
        };
        self.w.op2(mnm, wide, w_form(&name))?;
        Ok(wide.to_string())
    }

    fn emit_compare(&mut self, lhs: VReg, rhs: VReg, unsigned: bool) -> CcResult<bool> {
        let info = self.fir.vreg(lhs);
        if info.is_flo {
            let l = self.fetch(lhs, 0)?;
            let r = self.fetch(rhs, 1)?;
            self.w.op2("fcmp", l, r)?;
            return Ok(true);
        }
        let (l, r) = if info.size < 4 {
            (self.widen(lhs, 0, unsigned)?, self.widen(rhs, 1, unsigned)?)
        } else {
            (self.fetch(lhs, 0)?, self.fetch(rhs, 1)?)
        };
        self.w.op2("cmp", l, r)?;
        Ok(false)
    }

    fn copy_loop(&mut self, size: usize) -> CcResult<()> {
        // x9 = source, x10 = destination, clobbers x11/w13.
        self.mov_imm("x11", size as i64)?;
        let label = self.new_tmp_label("copy");
        self.w.label(&label)?;
        self.w.op3("ldrb", "w13", "[x9]", "#1")?;
        self.w.op3("strb", "w13", "[x10]", "#1")?;
        self.w.op3("subs", "x11", "x11", "#1")?;
        self.w.op1("b.ne", &label)
    }

    fn emit_op(&mut self, op: &IrOp) -> CcResult<()> {
        match op {
            IrOp::Bofs { dst, slot } => {
                let offset = self.ra.slot_offsets[*slot];
                let d = self.dst_reg(*dst, 0);
                if offset >= 0 {
                    self.w.op3("add", &d, "fp", format!("#{}", offset))?;
                } else {
                    self.w.op3("sub", &d, "fp", format!("#{}", -offset))?;
                }
                self.finish_dst(*dst, &d)
            }
            IrOp::Iofs { dst, label, mangle } => {
                let text = self.ctx.interner.resolve(*label);
                let sym = if *mangle {
                    self.target.mangle(text)
                } else {
                    self.target.local_label(text)
                };
                let d = self.dst_reg(*dst, 0);
                self.global_addr(&d, &sym)?;
                self.finish_dst(*dst, &d)
            }
            IrOp::Load { dst, addr } => {
                let a = self.fetch(*addr, 0)?;
                let info = self.fir.vreg(*dst);
                let d = self.dst_reg(*dst, 1);
                let op = if info.is_flo { "ldr" } else { ldr_op(info.size) };
                self.w.op2(op, &d, format!("[{}]", a))?;
                self.finish_dst(*dst, &d)
            }
            IrOp::Store { addr, src } => {
                let a = self.fetch(*addr, 0)?;
                let s = self.fetch(*src, 1)?;
                let info = self.fir.vreg(*src);
                let op = if info.is_flo { "str" } else { str_op(info.size) };
                self.w.op2(op, s, format!("[{}]", a))
            }
            IrOp::Mov { dst, src } => {
                let s = self.fetch(*src, 0)?;
                let d = self.dst_reg(*dst, 1);
                if self.fir.vreg(*dst).is_flo {
                    self.w.op2("fmov", &d, s)?;
                } else if d != s {
                    self.w.op2("mov", &d, s)?;
                }
                self.finish_dst(*dst, &d)
            }
            IrOp::Imm { dst, value } => {
                let d = self.dst_reg(*dst, 0);
                self.mov_imm(&d, *value)?;
                self.finish_dst(*dst, &d)
            }
            IrOp::FImm { dst, value } => {
                let info = self.fir.vreg(*dst);
                let d = self.dst_reg(*dst, 0);
                if info.size == 4 {
                    self.mov_imm("w9", (*value as f32).to_bits() as i64)?;
                    self.w.op2("fmov", &d, "w9")?;
                } else {
                    self.mov_imm("x9", value.to_bits() as i64)?;
                    self.w.op2("fmov", &d, "x9")?;
                }
                self.finish_dst(*dst, &d)
            }
            IrOp::Bin { op, dst, lhs, rhs, unsigned } => {
                self.emit_bin(*op, *dst, *lhs, *rhs, *unsigned)
            }
            IrOp::Un { op, dst, src } => {
                let s = self.fetch(*src, 0)?;
                let d = self.dst_reg(*dst, 1);
                if self.fir.vreg(*dst).is_flo {
                    self.w.op2("fneg", &d, s)?;
                } else {
                    let mnm = match op {
                        IrUnOp::Neg => "neg",
                        IrUnOp::BitNot => "mvn",
                    };
                    self.w.op2(mnm, &d, s)?;
                }
                self.finish_dst(*dst, &d)
            }
            IrOp::Cmp { cond, dst, lhs, rhs, unsigned } => {
                let float = self.emit_compare(*lhs, *rhs, *unsigned)?;
                let name = if float {
                    cond_name_float(*cond)
                } else {
                    cond_name(*cond, *unsigned)
                };
                let d = self.dst_reg(*dst, 0);
                self.w.op2("cset", &d, name)?;
                self.finish_dst(*dst, &d)
            }
            IrOp::JmpIf { cond, lhs, rhs, unsigned, dest } => {
                let float = self.emit_compare(*lhs, *rhs, *unsigned)?;
                let name = if float {
                    cond_name_float(*cond)
                } else {
                    cond_name(*cond, *unsigned)
                };
                let label = self.bb_label(dest.index());
                self.w.op1(&format!("b.{}", name), label)
            }
            IrOp::Jmp { dest } => {
                let label = self.bb_label(dest.index());
                self.w.op1("b", label)
            }
            IrOp::Call { dst, target, args, vararg_floats: _ } => {
                self.emit_call(dst.as_ref(), target, args)
            }
            IrOp::Cast { dst, src, src_unsigned } => self.emit_cast(*dst, *src, *src_unsigned),
            IrOp::Memcpy { dst, src, size } => {
                let s = self.fetch(*src, 0)?;
                self.w.op2("mov", "x9", s)?;
                let d = self.fetch(*dst, 1)?;
                self.w.op2("mov", "x10", d)?;
                self.copy_loop(*size)
            }
            IrOp::Clear { dst, size } => {
                let d = self.fetch(*dst, 0)?;
                self.w.op2("mov", "x10", d)?;
                self.mov_imm("x11", *size as i64)?;
                let label = self.new_tmp_label("clear");
                self.w.label(&label)?;
                self.w.op3("strb", "wzr", "[x10]", "#1")?;
                self.w.op3("subs", "x11", "x11", "#1")?;
                self.w.op1("b.ne", &label)
            }
            IrOp::Result { src } => {
                let Some(src) = src else { return Ok(()) };
                let info = self.fir.vreg(*src);
                let s = self.fetch(*src, 0)?;
                if info.is_flo {
                    let d = if info.size == 4 { "s0" } else { "d0" };
                    self.w.op2("fmov", d, s)
                } else {
                    let d = if info.size <= 4 { "w0" } else { "x0" };
                    self.w.op2("mov", d, s)
                }
            }
            IrOp::Asm { text } => {
                self.w.raw("// ASM {{")?;
                for line in text.lines() {
                    self.w.op0(line)?;
                }
                self.w.raw("// }}")
            }
        }
    }

    fn emit_bin(
        &mut self,
        op: IrBinOp,
        dst: VReg,
        lhs: VReg,
        rhs: VReg,
        unsigned: bool,
    ) -> CcResult<()> {
        let info = self.fir.vreg(dst);
        let l = self.fetch(lhs, 0)?;
        let r = self.fetch(rhs, 1)?;
        let d = self.dst_reg(dst, 0);
        if info.is_flo {
            let mnm = match op {
                IrBinOp::Add => "fadd",
                IrBinOp::Sub => "fsub",
                IrBinOp::Mul => "fmul",
                IrBinOp::Div => "fdiv",
                _ => {
                    return Err(rcc_common::CcError::emit_error(
                        "unsupported floating-point operation",
                        None,
                    ))
                }
            };
            self.w.op3(mnm, &d, l, r)?;
            return self.finish_dst(dst, &d);
        }
        match op {
            IrBinOp::Mod => {
                let div = if unsigned { "udiv" } else { "sdiv" };
                let tmp = Self::scratch_int(2, info.size);
                self.w.op3(div, tmp, &l, &r)?;
                self.w.op4("msub", &d, tmp, &r, &l)?;
            }
            _ => {
                let mnm = match (op, unsigned) {
                    (IrBinOp::Add, _) => "add",
                    (IrBinOp::Sub, _) => "sub",
                    (IrBinOp::Mul, _) => "mul",
                    (IrBinOp::Div, true) => "udiv",
                    (IrBinOp::Div, false) => "sdiv",
                    (IrBinOp::BitAnd, _) => "and",
                    (IrBinOp::BitOr, _) => "orr",
                    (IrBinOp::BitXor, _) => "eor",
                    (IrBinOp::LShift, _) => "lsl",
                    (IrBinOp::RShift, true) => "lsr",
                    (IrBinOp::RShift, false) => "asr",
                    (IrBinOp::Mod, _) => unreachable!(),
                };
                self.w.op3(mnm, &d, l, r)?;
            }
        }
        self.finish_dst(dst, &d)
    }

    fn emit_cast(&mut self, dst: VReg, src: VReg, src_unsigned: bool) -> CcResult<()> {
        let si = self.fir.vreg(src);
        let di = self.fir.vreg(dst);
        match (si.is_flo, di.is_flo) {
            (false, false) => {
                let s = self.fetch(src, 0)?;
                let d = self.dst_reg(dst, 1);
                if di.size > si.size {
                    match (si.size, src_unsigned) {
                        (1, false) => self.w.op2("sxtb", &d, w_form(&s))?,
                        (1, true) => self.w.op2("uxtb", &w_form(&d), w_form(&s))?,
                        (2, false) => self.w.op2("sxth", &d, w_form(&s))?,
                        (2, true) => self.w.op2("uxth", &w_form(&d), w_form(&s))?,
                        (_, false) => self.w.op2("sxtw", &d, w_form(&s))?,
                        // A 32-bit move zero-extends to 64 bits.
                        (_, true) => self.w.op2("mov", &w_form(&d), w_form(&s))?,
                    }
                } else {
                    // Narrowing keeps the low bits.
                    let mnm = match di.size {
                        1 => "uxtb",
                        2 => "uxth",
                        _ => "mov",
                    };
                    self.w.op2(mnm, &d, w_form(&s))?;
                }
                self.finish_dst(dst, &d)
            }
            (false, true) => {
                let s = if si.size < 4 {
                    self.widen(src, 0, src_unsigned)?
                } else {
                    self.fetch(src, 0)?
                };
                let d = self.dst_reg(dst, 0);
                let mnm = if src_unsigned { "ucvtf" } else { "scvtf" };
                self.w.op2(mnm, &d, s)?;
                self.finish_dst(dst, &d)
            }
            (true, false) => {
                let s = self.fetch(src, 0)?;
                let d = self.dst_reg(dst, 1);
                self.w.op2("fcvtzs", &d, s)?;
                self.finish_dst(dst, &d)
            }
            (true, true) => {
                let s = self.fetch(src, 0)?;
                let d = self.dst_reg(dst, 0);
                self.w.op2("fcvt", &d, s)?;
                self.finish_dst(dst, &d)
            }
        }
    }

    fn emit_call(
        &mut self,
        dst: Option<&VReg>,
        target: &CallTarget,
        args: &[CallArg],
    ) -> CcResult<()> {
        let mut int_args: Vec<(usize, VReg)> = Vec::new();
        let mut flo_args: Vec<(usize, VReg)> = Vec::new();
        struct StackItem {
            reg: VReg,
            agg_size: Option<usize>,
            offset: usize,
        }
        let mut stack: Vec<StackItem> = Vec::new();
        let mut stack_bytes = 0usize;
        for arg in args {
            let is_flo = self.fir.vreg(arg.reg).is_flo;
            if let Some(size) = arg.agg_size {
                stack.push(StackItem { reg: arg.reg, agg_size: Some(size), offset: stack_bytes });
                stack_bytes += round_up(size, 8);
            } else if is_flo && flo_args.len() < CONFIG.max_float_args {
                flo_args.push((flo_args.len(), arg.reg));
            } else if !is_flo && int_args.len() < CONFIG.max_int_args {
                int_args.push((int_args.len(), arg.reg));
            } else {
                stack.push(StackItem { reg: arg.reg, agg_size: None, offset: stack_bytes });
                stack_bytes += 8;
            }
        }
        let stack_total = round_up(stack_bytes, 16);
        self.sub_sp(stack_total)?;

        for item in &stack {
            match item.agg_size {
                Some(size) => {
                    let s = self.fetch(item.reg, 0)?;
                    self.w.op2("mov", "x9", s)?;
                    if item.offset == 0 {
                        self.w.op2("mov", "x10", "sp")?;
                    } else {
                        self.w.op3("add", "x10", "sp", format!("#{}", item.offset))?;
                    }
                    self.copy_loop(size)?;
                }
                None => {
                    let s = self.fetch(item.reg, 0)?;
                    let info = self.fir.vreg(item.reg);
                    let op = if info.is_flo { "str" } else { str_op(info.size) };
                    self.w.op2(op, s, format!("[sp, #{}]", item.offset))?;
                }
            }
        }

        for (i, reg) in int_args {
            let info = self.fir.vreg(reg);
            let s = self.fetch(reg, 0)?;
            let d = if info.size <= 4 { ARG_W[i] } else { ARG_X[i] };
            self.w.op2("mov", d, s)?;
        }
        for (i, reg) in flo_args {
            let info = self.fir.vreg(reg);
            let s = self.fetch(reg, 0)?;
            let d = if info.size == 4 { FARG_S[i] } else { FARG_D[i] };
            self.w.op2("fmov", d, s)?;
        }

        match target {
            CallTarget::Label { name, mangle } => {
                let text = self.ctx.interner.resolve(*name);
                let sym = if *mangle { self.target.mangle(text) } else { text.to_string() };
                self.w.op1("bl", sym)?;
            }
            CallTarget::Reg(reg) => {
                let s = self.fetch(*reg, 0)?;
                self.w.op2("mov", "x9", s)?;
                self.w.op1("blr", "x9")?;
            }
        }

        self.add_sp(stack_total)?;

        if let Some(dst) = dst {
            let info = self.fir.vreg(*dst);
            let d = self.dst_reg(*dst, 0);
            if info.is_flo {
                let s = if info.size == 4 { "s0" } else { "d0" };
                self.w.op2("fmov", &d, s)?;
            } else {
                let s = if info.size <= 4 { "w0" } else { "x0" };
                self.w.op2("mov", &d, s)?;
            }
            self.finish_dst(*dst, &d)?;
        }
        Ok(())
    }
}
