//! IR operation and basic-block definitions

use rcc_common::Name;
use serde::{Deserialize, Serialize};

/// Virtual register id. Width and float-ness live in the per-function
/// `VRegInfo` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VReg(pub u32);

impl VReg {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VRegInfo {
    /// Operand width in bytes: 1, 2, 4 or 8.
    pub size: u8,
    pub is_flo: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BBId(pub u32);

impl BBId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Placeholder jump target for the function epilogue; patched to the real
/// exit block when the function is finished.
pub const EXIT_BB: BBId = BBId(u32::MAX);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IrBinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    LShift,
    RShift,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IrUnOp {
    Neg,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cond {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Cond {
    pub fn invert(self) -> Cond {
        match self {
            Cond::Eq => Cond::Ne,
            Cond::Ne => Cond::Eq,
            Cond::Lt => Cond::Ge,
            Cond::Le => Cond::Gt,
            Cond::Gt => Cond::Le,
            Cond::Ge => Cond::Lt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CallTarget {
    Label { name: Name, mangle: bool },
    Reg(VReg),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CallArg {
    pub reg: VReg,
    /// Set when the register holds the address of an aggregate passed by
    /// on-stack copy.
    pub agg_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IrOp {
    /// dst = frame base + offset(slot)
    Bofs { dst: VReg, slot: usize },
    /// dst = &label
    Iofs { dst: VReg, label: Name, mangle: bool },
    Load { dst: VReg, addr: VReg },
    Store { addr: VReg, src: VReg },
    Mov { dst: VReg, src: VReg },
    Imm { dst: VReg, value: i64 },
    FImm { dst: VReg, value: f64 },
    Bin { op: IrBinOp, dst: VReg, lhs: VReg, rhs: VReg, unsigned: bool },
    Un { op: IrUnOp, dst: VReg, src: VReg },
    /// dst = (lhs cond rhs) ? 1 : 0
    Cmp { cond: Cond, dst: VReg, lhs: VReg, rhs: VReg, unsigned: bool },
    JmpIf { cond: Cond, lhs: VReg, rhs: VReg, unsigned: bool, dest: BBId },
    Jmp { dest: BBId },
    Call { dst: Option<VReg>, target: CallTarget, args: Vec<CallArg>, vararg_floats: Option<u8> },
    /// Width change; source and destination widths come from the vreg table.
    Cast { dst: VReg, src: VReg, src_unsigned: bool },
    Memcpy { dst: VReg, src: VReg, size: usize },
    Clear { dst: VReg, size: usize },
    /// Move the value into the return register.
    Result { src: Option<VReg> },
    Asm { text: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BasicBlock {
    pub ops: Vec<IrOp>,
}

/// A local variable's frame slot request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSlot {
    pub name: Option<Name>,
    pub size: usize,
    pub align: usize,
}

/// Parameter classification for ABI marshaling and frame layout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamSlot {
    pub slot: usize,
    pub size: u8,
    pub is_flo: bool,
    pub is_agg: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncIr {
    pub name: Name,
    pub is_static: bool,
    pub vaargs: bool,
    pub params: Vec<ParamSlot>,
    pub slots: Vec<FrameSlot>,
    pub vregs: Vec<VRegInfo>,
    pub bbs: Vec<BasicBlock>,
}

impl FuncIr {
    pub fn vreg(&self, v: VReg) -> VRegInfo {
        self.vregs[v.index()]
    }

    /// Successor blocks: explicit jump targets plus the fallthrough unless
    /// the block ends in an unconditional jump.
    pub fn succs(&self, bb: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let ops = &self.bbs[bb].ops;
        for op in ops {
            match op {
                IrOp::JmpIf { dest, .. } | IrOp::Jmp { dest } => out.push(dest.index()),
                _ => {}
            }
        }
        let falls_through = !matches!(ops.last(), Some(IrOp::Jmp { .. }));
        if falls_through && bb + 1 < self.bbs.len() {
            out.push(bb + 1);
        }
        out.sort_unstable();
        out.dedup();
        out
    }
}

/// Per-op def/use extraction, shared by liveness and the emitters.
pub fn op_def(op: &IrOp) -> Option<VReg> {
    match op {
        IrOp::Bofs { dst, .. }
        | IrOp::Iofs { dst, .. }
        | IrOp::Load { dst, .. }
        | IrOp::Mov { dst, .. }
        | IrOp::Imm { dst, .. }
        | IrOp::FImm { dst, .. }
        | IrOp::Bin { dst, .. }
        | IrOp::Un { dst, .. }
        | IrOp::Cmp { dst, .. }
        | IrOp::Cast { dst, .. } => Some(*dst),
        IrOp::Call { dst, .. } => *dst,
        _ => None,
    }
}

pub fn op_uses(op: &IrOp, mut f: impl FnMut(VReg)) {
    match op {
        IrOp::Load { addr, .. } => f(*addr),
        IrOp::Store { addr, src } => {
            f(*addr);
            f(*src);
        }
        IrOp::Mov { src, .. } | IrOp::Un { src, .. } | IrOp::Cast { src, .. } => f(*src),
        IrOp::Bin { lhs, rhs, .. }
        | IrOp::Cmp { lhs, rhs, .. }
        | IrOp::JmpIf { lhs, rhs, .. } => {
            f(*lhs);
            f(*rhs);
        }
        IrOp::Call { target, args, .. } => {
            if let CallTarget::Reg(r) = target {
                f(*r);
            }
            for arg in args {
                f(arg.reg);
            }
        }
        IrOp::Memcpy { dst, src, .. } => {
            f(*dst);
            f(*src);
        }
        IrOp::Clear { dst, .. } => f(*dst),
        IrOp::Result { src: Some(src) } => f(*src),
        _ => {}
    }
}
