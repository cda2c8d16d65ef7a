//! x86-64 function emitter (System V AMD64, Intel syntax)
//!
//! Virtual registers are allocated from the callee-saved set (rbx, r12-r15)
//! and xmm8-xmm13; rax/r10/r11 plus xmm14/xmm15 serve as statement-local
//! scratch. Spilled operands are addressed through rbp.

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
    int_regs: 5,
    int_callee_saved: 0b11111,
    float_regs: 6,
    float_callee_saved: 0,
    max_int_args: 6,
    max_float_args: 8,
    vaarg_area: 176,
};

const INT_REGS: [[&str; 5]; 4] = [
    ["bl", "r12b", "r13b", "r14b", "r15b"],
    ["bx", "r12w", "r13w", "r14w", "r15w"],
    ["ebx", "r12d", "r13d", "r14d", "r15d"],
    ["rbx", "r12", "r13", "r14", "r15"],
];
const FLOAT_REGS: [&str; 6] = ["xmm8", "xmm9", "xmm10", "xmm11", "xmm12", "xmm13"];
const ARG_REGS: [[&str; 6]; 4] = [
    ["dil", "sil", "dl", "cl", "r8b", "r9b"],
    ["di", "si", "dx", "cx", "r8w", "r9w"],
    ["edi", "esi", "edx", "ecx", "r8d", "r9d"],
    ["rdi", "rsi", "rdx", "rcx", "r8", "r9"],
];
const FARG_REGS: [&str; 8] = ["xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7"];

const RAX: [&str; 4] = ["al", "ax", "eax", "rax"];
const R10: [&str; 4] = ["r10b", "r10w", "r10d", "r10"];
const RCX: [&str; 4] = ["cl", "cx", "ecx", "rcx"];
const RDX: [&str; 4] = ["dl", "dx", "edx", "rdx"];

fn size_idx(size: u8) -> usize {
    match size {
        1 => 0,
        2 => 1,
        4 => 2,
        _ => 3,
    }
}

fn ptr_prefix(size: u8) -> &'static str {
    match size {
        1 => "byte ptr",
        2 => "word ptr",
        4 => "dword ptr",
        _ => "qword ptr",
    }
}

fn fmov(size: u8) -> &'static str {
    if size == 4 {
        "movss"
    } else {
        "movsd"
    }
}

fn setcc(cond: Cond, unsigned: bool) -> &'static str {
    match (cond, unsigned) {
        (Cond::Eq, _) => "sete",
        (Cond::Ne, _) => "setne",
        (Cond::Lt, false) => "setl",
        (Cond::Le, false) => "setle",
        (Cond::Gt, false) => "setg",
        (Cond::Ge, false) => "setge",
        (Cond::Lt, true) => "setb",
        (Cond::Le, true) => "setbe",
        (Cond::Gt, true) => "seta",
        (Cond::Ge, true) => "setae",
    }
}

fn jcc(cond: Cond, unsigned: bool) -> &'static str {
    match (cond, unsigned) {
        (Cond::Eq, _) => "je",
        (Cond::Ne, _) => "jne",
        (Cond::Lt, false) => "jl",
        (Cond::Le, false) => "jle",
        (Cond::Gt, false) => "jg",
        (Cond::Ge, false) => "jge",
        (Cond::Lt, true) => "jb",
        (Cond::Le, true) => "jbe",
        (Cond::Gt, true) => "ja",
        (Cond::Ge, true) => "jae",
    }
}

struct Emitter<'a, 'w> {
    w: &'a mut AsmWriter<'w>,
    ctx: &'a Context,
    fir: &'a FuncIr,
    ra: &'a RegAlloc,
    target: Target,
    fname: String,
    saved: Vec<&'static str>,
}

pub fn emit_defun(
    w: &mut AsmWriter,
    ctx: &Context,
    fir: &FuncIr,
    ra: &RegAlloc,
    target: Target,
) -> CcResult<()> {
    let fname = ctx.interner.resolve(fir.name).to_string();
    let saved: Vec<&'static str> = (0..CONFIG.int_regs)
        .filter(|r| {
            ra.used_reg_bits & (1 << r) != 0 && CONFIG.int_callee_saved & (1 << r) != 0
        })
        .map(|r| INT_REGS[3][r])
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

    let mut e = Emitter { w, ctx, fir, ra, target, fname, saved };
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

    fn rbp_mem(&self, offset: i64, size: u8) -> String {
        if offset < 0 {
            format!("{} [rbp - {}]", ptr_prefix(size), -offset)
        } else {
            format!("{} [rbp + {}]", ptr_prefix(size), offset)
        }
    }

    /// Operand text for a vreg: its register, or its spill slot.
    fn operand(&self, v: VReg) -> String {
        let info = self.fir.vreg(v);
        match self.ra.assign[v.index()] {
            Assign::Reg(r) => INT_REGS[size_idx(info.size)][r as usize].to_string(),
            Assign::FReg(r) => FLOAT_REGS[r as usize].to_string(),
            Assign::Spill(offset) => self.rbp_mem(offset, info.size),
        }
    }

    /// Load an integer vreg into the given scratch family; returns the sized
    /// scratch name.
    fn fetch_int(&mut self, v: VReg, family: &[&'static str; 4]) -> CcResult<&'static str> {
        let name = family[size_idx(self.fir.vreg(v).size)];
        let src = self.operand(v);
        self.w.op2("mov", name, src)?;
        Ok(name)
    }

    fn fetch_f(&mut self, v: VReg, scratch: &'static str) -> CcResult<&'static str> {
        let src = self.operand(v);
        self.w.op2(fmov(self.fir.vreg(v).size), scratch, src)?;
        Ok(scratch)
    }

    fn put_int(&mut self, v: VReg, from: &str) -> CcResult<()> {
        let dst = self.operand(v);
        self.w.op2("mov", dst, from)
    }

    fn put_f(&mut self, v: VReg, from: &str) -> CcResult<()> {
        let dst = self.operand(v);
        self.w.op2(fmov(self.fir.vreg(v).size), dst, from)
    }

    /// Widen a small integer operand into a 32-bit scratch for compares and
    /// division.
    fn widen(&mut self, v: VReg, family: &[&'static str; 4], unsigned: bool) -> CcResult<&'static str> {
        let size = self.fir.vreg(v).size;
        let name = self.fetch_int(v, family)?;
        if size >= 4 {
            return Ok(family[size_idx(size)]);
        }
        let wide = family[2];
        let mnm = if unsigned { "movzx" } else { "movsx" };
        self.w.op2(mnm, wide, name)?;
        Ok(wide)
    }

    fn prologue(&mut self) -> CcResult<()> {
        self.w.op1("push", "rbp")?;
        self.w.op2("mov", "rbp", "rsp")?;
        let pad = if self.saved.len() % 2 == 1 { 8 } else { 0 };
        let frame = self.ra.frame_size + pad;
        if frame > 0 {
            self.w.op2("sub", "rsp", frame.to_string())?;
        }
        for r in self.saved.clone() {
            self.w.op1("push", r)?;
        }

        if self.fir.vaargs {
            // Shadow save area: 6x8 bytes of integer registers followed by
            // 8x16 bytes of vector registers.
            for (i, reg) in ARG_REGS[3].iter().enumerate() {
                let mem = format!("qword ptr [rbp - {}]", CONFIG.vaarg_area - i * 8);
                self.w.op2("mov", mem, *reg)?;
            }
            for (i, reg) in FARG_REGS.iter().enumerate() {
                let mem = format!("qword ptr [rbp - {}]", 128 - i * 16);
                self.w.op2("movsd", mem, *reg)?;
            }
        }

        // Store register-passed parameters into their frame slots.
        let mut int_idx = 0usize;
        let mut flo_idx = 0usize;
        for p in self.fir.params.clone() {
            if p.is_agg {
                continue;
            }
            let offset = self.ra.slot_offsets[p.slot];
            if p.is_flo {
                if flo_idx < CONFIG.max_float_args {
                    let mem = self.rbp_mem(offset, p.size);
                    self.w.op2(fmov(p.size), mem, FARG_REGS[flo_idx])?;
                }
                flo_idx += 1;
            } else {
                if int_idx < CONFIG.max_int_args {
                    let mem = self.rbp_mem(offset, p.size);
                    self.w.op2("mov", mem, ARG_REGS[size_idx(p.size)][int_idx])?;
                }
                int_idx += 1;
            }
        }
        Ok(())
    }

    fn epilogue(&mut self) -> CcResult<()> {
        for r in self.saved.clone().into_iter().rev() {
            self.w.op1("pop", r)?;
        }
        self.w.op2("mov", "rsp", "rbp")?;
        self.w.op1("pop", "rbp")?;
        self.w.op0("ret")
    }

    fn emit_op(&mut self, op: &IrOp) -> CcResult<()> {
        match op {
            IrOp::Bofs { dst, slot } => {
                let offset = self.ra.slot_offsets[*slot];
                let mem = if offset < 0 {
                    format!("[rbp - {}]", -offset)
                } else {
                    format!("[rbp + {}]", offset)
                };
                self.w.op2("lea", "rax", mem)?;
                self.put_int(*dst, "rax")
            }
            IrOp::Iofs { dst, label, mangle } => {
                let text = self.ctx.interner.resolve(*label);
                let sym = if *mangle {
                    self.target.mangle(text)
                } else {
                    self.target.local_label(text)
                };
                self.w.op2("lea", "rax", format!("[rip + {}]", sym))?;
                self.put_int(*dst, "rax")
            }
            IrOp::Load { dst, addr } => {
                let a = self.fetch_int(*addr, &R10)?;
                debug_assert_eq!(a, "r10");
                let info = self.fir.vreg(*dst);
                if info.is_flo {
                    self.w.op2(fmov(info.size), "xmm14", format!("[{}]", "r10"))?;
                    self.put_f(*dst, "xmm14")
                } else {
                    let name = RAX[size_idx(info.size)];
                    self.w
                        .op2("mov", name, format!("{} [r10]", ptr_prefix(info.size)))?;
                    self.put_int(*dst, name)
                }
            }
            IrOp::Store { addr, src } => {
                let a = self.fetch_int(*addr, &R10)?;
                debug_assert_eq!(a, "r10");
                let info = self.fir.vreg(*src);
                if info.is_flo {
                    self.fetch_f(*src, "xmm14")?;
                    self.w.op2(fmov(info.size), format!("[{}]", "r10"), "xmm14")
                } else {
                    let name = self.fetch_int(*src, &RAX)?;
                    self.w
                        .op2("mov", format!("{} [r10]", ptr_prefix(info.size)), name)
                }
            }
            IrOp::Mov { dst, src } => {
                if self.fir.vreg(*dst).is_flo {
                    self.fetch_f(*src, "xmm14")?;
                    self.put_f(*dst, "xmm14")
                } else {
                    let name = self.fetch_int(*src, &RAX)?;
                    self.put_int(*dst, name)
                }
            }
            IrOp::Imm { dst, value } => {
                let name = RAX[size_idx(self.fir.vreg(*dst).size)];
                self.w.op2("mov", name, value.to_string())?;
                self.put_int(*dst, name)
            }
            IrOp::FImm { dst, value } => {
                if self.fir.vreg(*dst).size == 4 {
                    let bits = (*value as f32).to_bits();
                    self.w.op2("mov", "eax", format!("0x{:x}", bits))?;
                    self.w.op2("movd", "xmm14", "eax")?;
                } else {
                    let bits = value.to_bits();
                    self.w.op2("mov", "rax", format!("0x{:x}", bits))?;
                    self.w.op2("movq", "xmm14", "rax")?;
                }
                self.put_f(*dst, "xmm14")
            }
            IrOp::Bin { op, dst, lhs, rhs, unsigned } => {
                self.emit_bin(*op, *dst, *lhs, *rhs, *unsigned)
            }
            IrOp::Un { op, dst, src } => {
                let info = self.fir.vreg(*dst);
                if info.is_flo {
                    // Flip the sign bit.
                    self.fetch_f(*src, "xmm14")?;
                    if info.size == 4 {
                        self.w.op2("mov", "eax", "0x80000000")?;
                        self.w.op2("movd", "xmm15", "eax")?;
                        self.w.op2("xorps", "xmm14", "xmm15")?;
                    } else {
                        self.w.op2("mov", "rax", "0x8000000000000000")?;
                        self.w.op2("movq", "xmm15", "rax")?;
                        self.w.op2("xorpd", "xmm14", "xmm15")?;
                    }
                    self.put_f(*dst, "xmm14")
                } else {
                    let name = self.fetch_int(*src, &RAX)?;
                    let mnm = match op {
                        IrUnOp::Neg => "neg",
                        IrUnOp::BitNot => "not",
                    };
                    self.w.op1(mnm, name)?;
                    self.put_int(*dst, name)
                }
            }
            IrOp::Cmp { cond, dst, lhs, rhs, unsigned } => {
                self.emit_compare(*lhs, *rhs, *unsigned)?;
                let float = self.fir.vreg(*lhs).is_flo;
                self.w.op1(setcc(*cond, *unsigned || float), "al")?;
                self.w.op2("movzx", "eax", "al")?;
                self.put_int(*dst, RAX[size_idx(self.fir.vreg(*dst).size)])
            }
            IrOp::JmpIf { cond, lhs, rhs, unsigned, dest } => {
                self.emit_compare(*lhs, *rhs, *unsigned)?;
                let float = self.fir.vreg(*lhs).is_flo;
                let label = self.bb_label(dest.index());
                self.w.op1(jcc(*cond, *unsigned || float), label)
            }
            IrOp::Jmp { dest } => {
                let label = self.bb_label(dest.index());
                self.w.op1("jmp", label)
            }
            IrOp::Call { dst, target, args, vararg_floats } => {
                self.emit_call(dst.as_ref(), target, args, *vararg_floats)
            }
            IrOp::Cast { dst, src, src_unsigned } => self.emit_cast(*dst, *src, *src_unsigned),
            IrOp::Memcpy { dst, src, size } => {
                let s = self.operand(*src);
                self.w.op2("mov", "rsi", s)?;
                let d = self.operand(*dst);
                self.w.op2("mov", "rdi", d)?;
                self.w.op2("mov", "rcx", size.to_string())?;
                self.w.op0("rep movsb")
            }
            IrOp::Clear { dst, size } => {
                let d = self.operand(*dst);
                self.w.op2("mov", "rdi", d)?;
                self.w.op2("xor", "eax", "eax")?;
                self.w.op2("mov", "rcx", size.to_string())?;
                self.w.op0("rep stosb")
            }
            IrOp::Result { src } => {
                let Some(src) = src else { return Ok(()) };
                let info = self.fir.vreg(*src);
                if info.is_flo {
                    let s = self.operand(*src);
                    self.w.op2(fmov(info.size), "xmm0", s)
                } else {
                    let s = self.operand(*src);
                    self.w.op2("mov", RAX[size_idx(info.size)], s)
                }
            }
            IrOp::Asm { text } => {
                self.w.raw("# ASM {{")?;
                for line in text.lines() {
                    self.w.op0(line)?;
                }
                self.w.raw("# }}")
            }
        }
    }

    fn emit_compare(&mut self, lhs: VReg, rhs: VReg, unsigned: bool) -> CcResult<()> {
        let info = self.fir.vreg(lhs);
        if info.is_flo {
            self.fetch_f(lhs, "xmm14")?;
            self.fetch_f(rhs, "xmm15")?;
            let mnm = if info.size == 4 { "ucomiss" } else { "ucomisd" };
            return self.w.op2(mnm, "xmm14", "xmm15");
        }
        if info.size < 4 {
            // Widen so the 32-bit compare agrees with the C value.
            let l = self.widen(lhs, &RAX, unsigned)?;
            let r = self.widen(rhs, &R10, unsigned)?;
            return self.w.op2("cmp", l, r);
        }
        let l = self.fetch_int(lhs, &RAX)?;
        let r = self.operand(rhs);
        self.w.op2("cmp", l, r)
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
        if info.is_flo {
            self.fetch_f(lhs, "xmm14")?;
            let mnm = match (op, info.size) {
                (IrBinOp::Add, 4) => "addss",
                (IrBinOp::Add, _) => "addsd",
                (IrBinOp::Sub, 4) => "subss",
                (IrBinOp::Sub, _) => "subsd",
                (IrBinOp::Mul, 4) => "mulss",
                (IrBinOp::Mul, _) => "mulsd",
                (IrBinOp::Div, 4) => "divss",
                (IrBinOp::Div, _) => "divsd",
                _ => return Err(rcc_common::CcError::emit_error(
                    "unsupported floating-point operation",
                    None,
                )),
            };
            let r = self.operand(rhs);
            self.w.op2(mnm, "xmm14", r)?;
            return self.put_f(dst, "xmm14");
        }

        match op {
            IrBinOp::Add | IrBinOp::Sub | IrBinOp::BitAnd | IrBinOp::BitOr | IrBinOp::BitXor => {
                let name = self.fetch_int(lhs, &RAX)?;
                let mnm = match op {
                    IrBinOp::Add => "add",
                    IrBinOp::Sub => "sub",
                    IrBinOp::BitAnd => "and",
                    IrBinOp::BitOr => "or",
                    _ => "xor",
                };
                let r = self.operand(rhs);
                self.w.op2(mnm, name, r)?;
                self.put_int(dst, name)
            }
            IrBinOp::Mul => {
                if info.size == 1 {
                    let l = self.widen(lhs, &RAX, unsigned)?;
                    let r = self.widen(rhs, &R10, unsigned)?;
                    self.w.op2("imul", l, r)?;
                    self.put_int(dst, "al")
                } else {
                    let name = self.fetch_int(lhs, &RAX)?;
                    let r = self.operand(rhs);
                    self.w.op2("imul", name, r)?;
                    self.put_int(dst, name)
                }
            }
            IrBinOp::Div | IrBinOp::Mod => {
                let l = self.widen(lhs, &RAX, unsigned)?;
                let r = self.widen(rhs, &R10, unsigned)?;
                let wide = if self.fir.vreg(lhs).size == 8 { 3 } else { 2 };
                if unsigned {
                    self.w.op2("xor", "edx", "edx")?;
                    self.w.op1("div", r)?;
                } else {
                    self.w.op0(if wide == 3 { "cqo" } else { "cdq" })?;
                    self.w.op1("idiv", r)?;
                }
                let _ = l;
                let family = if op == IrBinOp::Div { &RAX } else { &RDX };
                self.put_int(dst, family[size_idx(info.size)])
            }
            IrBinOp::LShift | IrBinOp::RShift => {
                let name = self.fetch_int(lhs, &RAX)?;
                self.fetch_int(rhs, &RCX)?;
                let mnm = match (op, unsigned) {
                    (IrBinOp::LShift, _) => "sal",
                    (IrBinOp::RShift, true) => "shr",
                    _ => "sar",
                };
                self.w.op2(mnm, name, "cl")?;
                self.put_int(dst, name)
            }
        }
    }

    fn emit_cast(&mut self, dst: VReg, src: VReg, src_unsigned: bool) -> CcResult<()> {
        let si = self.fir.vreg(src);
        let di = self.fir.vreg(dst);
        match (si.is_flo, di.is_flo) {
            (false, false) => {
                let name = self.fetch_int(src, &RAX)?;
                if di.size > si.size {
                    match (si.size, src_unsigned) {
                        (4, false) => self.w.op2("movsxd", "rax", "eax")?,
                        // A 32-bit move zero-extends.
                        (4, true) => self.w.op2("mov", "eax", "eax")?,
                        (_, false) => {
                            self.w.op2("movsx", RAX[size_idx(di.size)], name)?
                        }
                        (_, true) => {
                            // movzx to 64-bit of 8/16-bit sources goes
                            // through the 32-bit form.
                            self.w.op2("movzx", "eax", name)?
                        }
                    }
                }
                self.put_int(dst, RAX[size_idx(di.size)])
            }
            (false, true) => {
                let int_name = if si.size == 8 {
                    self.fetch_int(src, &RAX)?;
                    "rax"
                } else {
                    self.widen(src, &RAX, src_unsigned)?;
                    "eax"
                };
                let mnm = if di.size == 4 { "cvtsi2ss" } else { "cvtsi2sd" };
                self.w.op2(mnm, "xmm14", int_name)?;
                self.put_f(dst, "xmm14")
            }
            (true, false) => {
                self.fetch_f(src, "xmm14")?;
                let mnm = if si.size == 4 { "cvttss2si" } else { "cvttsd2si" };
                let int_name = if di.size == 8 { "rax" } else { "eax" };
                self.w.op2(mnm, int_name, "xmm14")?;
                self.put_int(dst, RAX[size_idx(di.size)])
            }
            (true, true) => {
                self.fetch_f(src, "xmm14")?;
                let mnm = if si.size == 4 { "cvtss2sd" } else { "cvtsd2ss" };
                self.w.op2(mnm, "xmm14", "xmm14")?;
                self.put_f(dst, "xmm14")
            }
        }
    }

    fn emit_call(
        &mut self,
        dst: Option<&VReg>,
        target: &CallTarget,
        args: &[CallArg],
        vararg_floats: Option<u8>,
    ) -> CcResult<()> {
        // Classify arguments: first six integers and first eight floats go
        // in registers, everything else (and all aggregates) on the stack.
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
        if stack_total > 0 {
            self.w.op2("sub", "rsp", stack_total.to_string())?;
        }

        // Stack arguments first: the copies are free to clobber the argument
        // registers.
        for item in &stack {
            match item.agg_size {
                Some(size) => {
                    let s = self.operand(item.reg);
                    self.w.op2("mov", "rsi", s)?;
                    self.w.op2("lea", "rdi", format!("[rsp + {}]", item.offset))?;
                    self.w.op2("mov", "rcx", size.to_string())?;
                    self.w.op0("rep movsb")?;
                }
                None => {
                    let info = self.fir.vreg(item.reg);
                    if info.is_flo {
                        self.fetch_f(item.reg, "xmm14")?;
                        self.w.op2(
                            fmov(info.size),
                            format!("[rsp + {}]", item.offset),
                            "xmm14",
                        )?;
                    } else {
                        let name = self.fetch_int(item.reg, &RAX)?;
                        self.w.op2(
                            "mov",
                            format!("{} [rsp + {}]", ptr_prefix(info.size), item.offset),
                            name,
                        )?;
                    }
                }
            }
        }

        // Then the register arguments; sources live in callee-saved
        // registers or spill slots, which the moves above cannot touch.
        for (i, reg) in int_args {
            let info = self.fir.vreg(reg);
            let s = self.operand(reg);
            self.w.op2("mov", ARG_REGS[size_idx(info.size)][i], s)?;
        }
        for (i, reg) in flo_args {
            let info = self.fir.vreg(reg);
            let s = self.operand(reg);
            self.w.op2(fmov(info.size), FARG_REGS[i], s)?;
        }

        // The variadic convention: AL holds the vector-register count.
        if let Some(n) = vararg_floats {
            self.w.op2("mov", "al", n.to_string())?;
        }

        match target {
            CallTarget::Label { name, mangle } => {
                let text = self.ctx.interner.resolve(*name);
                let sym = if *mangle { self.target.mangle(text) } else { text.to_string() };
                self.w.op1("call", sym)?;
            }
            CallTarget::Reg(reg) => {
                let s = self.operand(*reg);
                self.w.op2("mov", "r11", s)?;
                self.w.op1("call", "r11")?;
            }
        }

        if stack_total > 0 {
            self.w.op2("add", "rsp", stack_total.to_string())?;
        }

        if let Some(dst) = dst {
            let info = self.fir.vreg(*dst);
            if info.is_flo {
                self.put_f(*dst, FARG_REGS[0])?;
            } else {
                self.put_int(*dst, RAX[size_idx(info.size)])?;
            }
        }
        Ok(())
    }
}
