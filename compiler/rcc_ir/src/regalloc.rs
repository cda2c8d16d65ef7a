//! Linear-scan register allocation and frame layout
//!
//! Live ranges come from a block-level liveness fixed point over the
//! linearized operation list. Ranges are walked in start order, longer range
//! first on equal starts; each class keeps a free list in which callee-saved
//! registers are handed out preferentially, so the longer of two same-start
//! ranges gets the callee-saved register. A range that crosses a call may
//! only live in a callee-saved register; with none available it spills.
//! Under pressure the range with the farthest end spills.

use crate::ir::*;
use rcc_types::round_up;
use smallvec::SmallVec;
use std::cmp::Reverse;

/// Per-target allocation parameters. Register *names* live in the emitter;
/// the allocator deals in indices into the target's allocatable sets, with a
/// bitmap marking which indices are callee-saved.
#[derive(Debug, Clone, Copy)]
pub struct TargetConfig {
    /// Allocatable integer registers.
    pub int_regs: usize,
    /// Bitmap over the integer set: callee-saved members.
    pub int_callee_saved: u32,
    /// Allocatable float registers.
    pub float_regs: usize,
    /// Bitmap over the float set (SysV x86-64 xmm: none; AAPCS64 d8-d15:
    /// all).
    pub float_callee_saved: u32,
    pub max_int_args: usize,
    pub max_float_args: usize,
    /// Bytes reserved for the variadic register save area.
    pub vaarg_area: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assign {
    /// Index into the target's allocatable integer set.
    Reg(u8),
    /// Index into the target's allocatable float set.
    FReg(u8),
    /// Frame offset of an 8-byte spill slot.
    Spill(i64),
}

#[derive(Debug, Clone)]
pub struct RegAlloc {
    /// Per-vreg assignment.
    pub assign: Vec<Assign>,
    /// Frame offset per slot; negative offsets are locals, positive ones are
    /// incoming stack parameters relative to the frame base.
    pub slot_offsets: Vec<i64>,
    /// Locals + spill slots, rounded up to 16 bytes.
    pub frame_size: usize,
    /// Bitmap over the integer set: registers touched by the allocation.
    /// The prologue saves the callee-saved ones among them.
    pub used_reg_bits: u32,
    /// Bitmap over the float set.
    pub used_freg_bits: u32,
}

struct Interval {
    vreg: usize,
    start: usize,
    end: usize,
}

/// Pop a register from the free list, callee-saved members first. With
/// `require_callee` a caller-saved register never qualifies.
fn take_reg(pool: &mut Vec<u8>, callee_mask: u32, require_callee: bool) -> Option<u8> {
    if let Some(pos) = pool.iter().rposition(|&r| callee_mask & (1 << r) != 0) {
        return Some(pool.remove(pos));
    }
    if require_callee {
        return None;
    }
    pool.pop()
}

pub fn allocate(func: &FuncIr, cfg: &TargetConfig) -> RegAlloc {
    let nv = func.vregs.len();
    let nb = func.bbs.len();

    // Linearize: global position per op, block boundaries.
    let mut block_range = Vec::with_capacity(nb);
    let mut pos = 0usize;
    for bb in &func.bbs {
        let start = pos;
        pos += bb.ops.len().max(1);
        block_range.push((start, pos - 1));
    }

    // Block-level use/def sets.
    let mut use_set = vec![vec![false; nv]; nb];
    let mut def_set = vec![vec![false; nv]; nb];
    for (b, bb) in func.bbs.iter().enumerate() {
        for op in &bb.ops {
            op_uses(op, |v| {
                if !def_set[b][v.index()] {
                    use_set[b][v.index()] = true;
                }
            });
            if let Some(v) = op_def(op) {
                def_set[b][v.index()] = true;
            }
        }
    }

    // Backward fixed point for live-in/live-out.
    let mut live_in = vec![vec![false; nv]; nb];
    let mut live_out = vec![vec![false; nv]; nb];
    let mut changed = true;
    while changed {
        changed = false;
        for b in (0..nb).rev() {
            let mut out = vec![false; nv];
            for s in func.succs(b) {
                for v in 0..nv {
                    if live_in[s][v] {
                        out[v] = true;
                    }
                }
            }
            let mut inn = use_set[b].clone();
            for v in 0..nv {
                if out[v] && !def_set[b][v] {
                    inn[v] = true;
                }
            }
            if out != live_out[b] || inn != live_in[b] {
                live_out[b] = out;
                live_in[b] = inn;
                changed = true;
            }
        }
    }

    // Live ranges [first touch, last touch], widened to block boundaries
    // where a vreg is live across them. Call positions drive the save-class
    // constraint below.
    let mut start = vec![usize::MAX; nv];
    let mut end = vec![0usize; nv];
    let mut touch = |v: usize, p: usize, start: &mut Vec<usize>, end: &mut Vec<usize>| {
        if start[v] > p {
            start[v] = p;
        }
        if end[v] < p {
            end[v] = p;
        }
    };
    let mut call_positions = Vec::new();
    for (b, bb) in func.bbs.iter().enumerate() {
        let (bstart, bend) = block_range[b];
        for v in 0..nv {
            if live_in[b][v] {
                touch(v, bstart, &mut start, &mut end);
            }
            if live_out[b][v] {
                touch(v, bend, &mut start, &mut end);
            }
        }
        let mut p = bstart;
        for op in &bb.ops {
            op_uses(op, |v| touch(v.index(), p, &mut start, &mut end));
            if let Some(v) = op_def(op) {
                touch(v.index(), p, &mut start, &mut end);
            }
            if matches!(op, IrOp::Call { .. }) {
                call_positions.push(p);
            }
            p += 1;
        }
    }

    let mut intervals: Vec<Interval> = (0..nv)
        .filter(|&v| start[v] != usize::MAX)
        .map(|v| Interval { vreg: v, start: start[v], end: end[v] })
        .collect();
    // Equal-start ties walk the longer range first, so it gets first pick of
    // the callee-saved registers.
    intervals.sort_by_key(|iv| (iv.start, Reverse(iv.end)));

    let crosses_call = |iv: &Interval| {
        call_positions.iter().any(|&p| iv.start < p && p < iv.end)
    };

    // Scan.
    let mut assign = vec![Assign::Spill(0); nv];
    let mut free_int: Vec<u8> = (0..cfg.int_regs as u8).rev().collect();
    let mut free_flo: Vec<u8> = (0..cfg.float_regs as u8).rev().collect();
    let mut active: SmallVec<[usize; 16]> = SmallVec::new(); // indexes into `intervals`
    let mut spill_ids = vec![usize::MAX; nv];
    let mut free_spill_ids: Vec<usize> = Vec::new();
    let mut spill_count = 0usize;
    let mut active_spills: SmallVec<[usize; 16]> = SmallVec::new();
    let mut used_reg_bits = 0u32;
    let mut used_freg_bits = 0u32;

    let ends: Vec<usize> = intervals.iter().map(|iv| iv.end).collect();
    let starts_v: Vec<usize> = intervals.iter().map(|iv| iv.start).collect();
    let vreg_of: Vec<usize> = intervals.iter().map(|iv| iv.vreg).collect();

    for i in 0..intervals.len() {
        let cur_start = starts_v[i];
        // Expire finished intervals, returning registers and spill slots.
        active.retain(|a| {
            let a = *a;
            if ends[a] < cur_start {
                match assign[vreg_of[a]] {
                    Assign::Reg(r) => free_int.push(r),
                    Assign::FReg(r) => free_flo.push(r),
                    Assign::Spill(_) => {}
                }
                false
            } else {
                true
            }
        });
        active_spills.retain(|a| {
            let a = *a;
            if ends[a] < cur_start {
                free_spill_ids.push(spill_ids[vreg_of[a]]);
                false
            } else {
                true
            }
        });

        let v = vreg_of[i];
        let info = func.vregs[v];
        let callee_mask = if info.is_flo { cfg.float_callee_saved } else { cfg.int_callee_saved };
        // A range crossing a call survives only in a callee-saved register.
        let needs_callee = crosses_call(&intervals[i]);
        let mut spill_me = |spill_ids: &mut Vec<usize>,
                            free_spill_ids: &mut Vec<usize>,
                            spill_count: &mut usize| {
            let id = free_spill_ids.pop().unwrap_or_else(|| {
                let id = *spill_count;
                *spill_count += 1;
                id
            });
            spill_ids[v] = id;
        };

        let pool = if info.is_flo { &mut free_flo } else { &mut free_int };
        if let Some(r) = take_reg(pool, callee_mask, needs_callee) {
            if info.is_flo {
                assign[v] = Assign::FReg(r);
                used_freg_bits |= 1 << r;
            } else {
                assign[v] = Assign::Reg(r);
                used_reg_bits |= 1 << r;
            }
            active.push(i);
            continue;
        }

        // Pressure: spill whichever suitable interval ends farthest.
        let victim = active
            .iter()
            .copied()
            .filter(|&a| {
                let av = vreg_of[a];
                if func.vregs[av].is_flo != info.is_flo {
                    return false;
                }
                if !needs_callee {
                    return true;
                }
                match assign[av] {
                    Assign::Reg(r) | Assign::FReg(r) => callee_mask & (1 << r) != 0,
                    Assign::Spill(_) => false,
                }
            })
            .max_by_key(|&a| ends[a]);
        match victim {
            Some(victim_idx) if ends[victim_idx] > ends[i] => {
                let victim_vreg = vreg_of[victim_idx];
                let stolen = assign[victim_vreg];
                // The victim moves to a spill slot.
                let id = free_spill_ids.pop().unwrap_or_else(|| {
                    let id = spill_count;
                    spill_count += 1;
                    id
                });
                spill_ids[victim_vreg] = id;
                assign[victim_vreg] = Assign::Spill(0);
                active.retain(|a| *a != victim_idx);
                active_spills.push(victim_idx);
                assign[v] = stolen;
                match stolen {
                    Assign::Reg(r) => used_reg_bits |= 1 << r,
                    Assign::FReg(r) => used_freg_bits |= 1 << r,
                    Assign::Spill(_) => {}
                }
                active.push(i);
            }
            _ => {
                spill_me(&mut spill_ids, &mut free_spill_ids, &mut spill_count);
                active_spills.push(i);
            }
        }
    }

    // Frame layout: variadic save area first, then locals, then spill slots.
    // Stack-passed parameters live in the caller's frame at positive offsets.
    let mut slot_offsets = vec![0i64; func.slots.len()];
    let stack_params = classify_stack_params(func, cfg);
    let mut depth = if func.vaargs { cfg.vaarg_area } else { 0 };
    for (i, slot) in func.slots.iter().enumerate() {
        if let Some(offset) = stack_params[i] {
            slot_offsets[i] = offset;
            continue;
        }
        depth = round_up(depth + slot.size, slot.align);
        slot_offsets[i] = -(depth as i64);
    }
    let mut spill_offsets = vec![0i64; spill_count];
    for offset in spill_offsets.iter_mut() {
        depth = round_up(depth + 8, 8);
        *offset = -(depth as i64);
    }
    for v in 0..nv {
        if spill_ids[v] != usize::MAX {
            assign[v] = Assign::Spill(spill_offsets[spill_ids[v]]);
        }
    }
    let frame_size = round_up(depth, 16);

    log::debug!(
        "regalloc: frame {} bytes, {} spills, int regs {:b}",
        frame_size,
        spill_count,
        used_reg_bits
    );

    RegAlloc { assign, slot_offsets, frame_size, used_reg_bits, used_freg_bits }
}

/// Which parameter slots arrive on the caller's stack, and at what offset
/// from the frame base. Mirrors the call-site marshaling in the emitters.
pub fn classify_stack_params(func: &FuncIr, cfg: &TargetConfig) -> Vec<Option<i64>> {
    let mut out = vec![None; func.slots.len()];
    let mut int_used = 0usize;
    let mut float_used = 0usize;
    let mut stack_off = 16i64;
    for param in &func.params {
        let on_stack = if param.is_agg {
            true
        } else if param.is_flo {
            float_used += 1;
            float_used > cfg.max_float_args
        } else {
            int_used += 1;
            int_used > cfg.max_int_args
        };
        if on_stack {
            out[param.slot] = Some(stack_off);
            let size = if param.is_agg {
                round_up(func.slots[param.slot].size, 8)
            } else {
                8
            };
            stack_off += size as i64;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcc_common::Interner;

    const CFG: TargetConfig = TargetConfig {
        int_regs: 5,
        int_callee_saved: 0b11111,
        float_regs: 6,
        float_callee_saved: 0,
        max_int_args: 6,
        max_float_args: 8,
        vaarg_area: 176,
    };

    /// Two integer registers: index 0 callee-saved, index 1 caller-saved.
    const MIXED_CFG: TargetConfig = TargetConfig {
        int_regs: 2,
        int_callee_saved: 0b01,
        float_regs: 2,
        float_callee_saved: 0b11,
        max_int_args: 6,
        max_float_args: 8,
        vaarg_area: 176,
    };

    fn leaf_func(nregs: usize, chain: bool) -> FuncIr {
        // nregs vregs defined up front; when `chain` every vreg is used at
        // the very end, keeping all of them live at once.
        let mut name = Interner::new();
        let mut ops = Vec::new();
        for i in 0..nregs {
            ops.push(IrOp::Imm { dst: VReg(i as u32), value: i as i64 });
        }
        if chain {
            for i in 1..nregs {
                ops.push(IrOp::Bin {
                    op: IrBinOp::Add,
                    dst: VReg(0),
                    lhs: VReg(0),
                    rhs: VReg(i as u32),
                    unsigned: false,
                });
            }
        }
        ops.push(IrOp::Result { src: Some(VReg(0)) });
        FuncIr {
            name: name.intern("f"),
            is_static: false,
            vaargs: false,
            params: vec![],
            slots: vec![],
            vregs: vec![VRegInfo { size: 8, is_flo: false }; nregs],
            bbs: vec![BasicBlock { ops }],
        }
    }

    #[test]
    fn few_vregs_all_get_registers() {
        let func = leaf_func(3, true);
        let ra = allocate(&func, &CFG);
        assert!(ra.assign.iter().all(|a| matches!(a, Assign::Reg(_))));
        assert_eq!(ra.frame_size % 16, 0);
    }

    #[test]
    fn pressure_forces_spills() {
        let func = leaf_func(9, true);
        let ra = allocate(&func, &CFG);
        let spills = ra.assign.iter().filter(|a| matches!(a, Assign::Spill(_))).count();
        assert!(spills >= 9 - CFG.int_regs, "expected spills, got {:?}", ra.assign);
        // Spill slots land in the frame.
        assert!(ra.frame_size >= 8 * spills);
        assert_eq!(ra.frame_size % 16, 0);
    }

    #[test]
    fn non_overlapping_ranges_share_registers() {
        // Sequential short-lived vregs never overlap, so one register serves.
        let mut name = Interner::new();
        let mut ops = Vec::new();
        for i in 0..8u32 {
            ops.push(IrOp::Imm { dst: VReg(i), value: 1 });
            ops.push(IrOp::Result { src: Some(VReg(i)) });
        }
        let func = FuncIr {
            name: name.intern("f"),
            is_static: false,
            vaargs: false,
            params: vec![],
            slots: vec![],
            vregs: vec![VRegInfo { size: 4, is_flo: false }; 8],
            bbs: vec![BasicBlock { ops }],
        };
        let ra = allocate(&func, &CFG);
        assert!(ra.assign.iter().all(|a| matches!(a, Assign::Reg(0))));
        assert_eq!(ra.used_reg_bits, 1);
    }

    #[test]
    fn callee_saved_registers_are_preferred() {
        // Two overlapping ranges: the longer one is scanned first and takes
        // the callee-saved register, the shorter lands in the caller-saved
        // one.
        let mut name = Interner::new();
        let ops = vec![
            IrOp::Imm { dst: VReg(0), value: 1 },
            IrOp::Imm { dst: VReg(1), value: 2 },
            IrOp::Bin {
                op: IrBinOp::Add,
                dst: VReg(1),
                lhs: VReg(1),
                rhs: VReg(1),
                unsigned: false,
            },
            IrOp::Bin {
                op: IrBinOp::Add,
                dst: VReg(0),
                lhs: VReg(0),
                rhs: VReg(1),
                unsigned: false,
            },
            IrOp::Result { src: Some(VReg(0)) },
        ];
        let func = FuncIr {
            name: name.intern("f"),
            is_static: false,
            vaargs: false,
            params: vec![],
            slots: vec![],
            vregs: vec![VRegInfo { size: 8, is_flo: false }; 2],
            bbs: vec![BasicBlock { ops }],
        };
        let ra = allocate(&func, &MIXED_CFG);
        // v0 lives [0, 4] and gets the callee-saved register; v1 lives
        // [1, 3] and takes the caller-saved one.
        assert_eq!(ra.assign[0], Assign::Reg(0));
        assert_eq!(ra.assign[1], Assign::Reg(1));
    }

    #[test]
    fn call_crossing_range_requires_callee_saved() {
        let mut name = Interner::new();
        let f = name.intern("f");
        let ops = vec![
            IrOp::Imm { dst: VReg(0), value: 1 },
            IrOp::Imm { dst: VReg(1), value: 2 },
            IrOp::Call {
                dst: None,
                target: CallTarget::Label { name: f, mangle: true },
                args: vec![],
                vararg_floats: None,
            },
            IrOp::Bin {
                op: IrBinOp::Add,
                dst: VReg(0),
                lhs: VReg(0),
                rhs: VReg(1),
                unsigned: false,
            },
            IrOp::Result { src: Some(VReg(0)) },
        ];
        let func = FuncIr {
            name: f,
            is_static: false,
            vaargs: false,
            params: vec![],
            slots: vec![],
            vregs: vec![VRegInfo { size: 8, is_flo: false }; 2],
            bbs: vec![BasicBlock { ops }],
        };
        let ra = allocate(&func, &MIXED_CFG);
        // Both ranges cross the call, so only the callee-saved register
        // qualifies: the farthest-ending range (v0) spills, the other takes
        // the callee-saved register, and the caller-saved one stays empty.
        assert!(matches!(ra.assign[0], Assign::Spill(_)), "got {:?}", ra.assign);
        assert_eq!(ra.assign[1], Assign::Reg(0));
    }

    #[test]
    fn float_crossing_call_spills_when_caller_saved() {
        let mut name = Interner::new();
        let f = name.intern("f");
        let ops = vec![
            IrOp::FImm { dst: VReg(0), value: 1.0 },
            IrOp::Call {
                dst: None,
                target: CallTarget::Label { name: f, mangle: true },
                args: vec![],
                vararg_floats: None,
            },
            IrOp::Result { src: Some(VReg(0)) },
        ];
        let func = FuncIr {
            name: f,
            is_static: false,
            vaargs: false,
            params: vec![],
            slots: vec![],
            vregs: vec![VRegInfo { size: 8, is_flo: true }],
            bbs: vec![BasicBlock { ops }],
        };
        let ra = allocate(&func, &CFG);
        assert!(matches!(ra.assign[0], Assign::Spill(_)));

        let callee_saved = TargetConfig { float_callee_saved: 0b111111, ..CFG };
        let ra = allocate(&func, &callee_saved);
        assert!(matches!(ra.assign[0], Assign::FReg(_)));
    }

    #[test]
    fn frame_offsets_respect_alignment() {
        let mut name = Interner::new();
        let func = FuncIr {
            name: name.intern("f"),
            is_static: false,
            vaargs: false,
            params: vec![],
            slots: vec![
                FrameSlot { name: None, size: 1, align: 1 },
                FrameSlot { name: None, size: 4, align: 4 },
                FrameSlot { name: None, size: 8, align: 8 },
            ],
            vregs: vec![],
            bbs: vec![BasicBlock::default()],
        };
        let ra = allocate(&func, &CFG);
        assert_eq!(ra.slot_offsets[0], -1);
        assert_eq!(ra.slot_offsets[1], -8);
        assert_eq!(ra.slot_offsets[2], -16);
        assert_eq!(ra.frame_size, 16);
    }
}
