//! Dead-code elimination.
//!
//! Mark, then sweep. The roots are the instructions that must stay regardless of whether
//! anything reads their value — control flow, stores, monitor operations, anything that can
//! throw in its particular instance, debug markers — i.e. exactly the instructions whose
//! [InstT::can_be_dead_code] says `false`. Everything they (transitively) read is live, phis
//! included; the rest is removed, together with the values that thereby become unused.
//!
//! Sweeping removes an instruction only once its out-value has no remaining users, so the
//! sweep loops to a fixed point instead of ordering removals globally. A cycle of dead phis
//! feeding only each other never reaches the unused state; that shape exists only in
//! unreachable code and is deliberately left alone.

use crate::ir::{
    code::IrCode,
    inst::InstT,
    value::{Definition, PhiId, ValueId},
};
use vob::Vob;

pub fn run(code: &mut IrCode) {
    // Mark.
    let mut live_insts = Vob::from_elem(false, code.insts_len());
    let mut live_phis = Vob::from_elem(false, code.phis_len());
    let mut worklist: Vec<ValueId> = Vec::new();
    for b in code.block_ids().collect::<Vec<_>>() {
        for iid in code.block(b).insts().to_vec() {
            let data = code.inst(iid);
            if !data.inst.can_be_dead_code(code) {
                live_insts.set(usize::from(iid), true);
                worklist.extend(data.inst.in_values());
                worklist.extend(data.debug_values().iter().copied());
            }
        }
    }
    while let Some(v) = worklist.pop() {
        match code.value(v).definition() {
            Definition::Inst(iid) => {
                if !live_insts[usize::from(iid)] {
                    live_insts.set(usize::from(iid), true);
                    let data = code.inst(iid);
                    worklist.extend(data.inst.in_values());
                    worklist.extend(data.debug_values().iter().copied());
                }
            }
            Definition::Phi(pid) => {
                if !live_phis[usize::from(pid)] {
                    live_phis.set(usize::from(pid), true);
                    worklist.extend(code.phi(pid).operands().iter().copied());
                }
            }
        }
    }

    // Sweep to a fixed point.
    let mut changed = true;
    while changed {
        changed = false;
        for b in code.block_ids().collect::<Vec<_>>() {
            for iid in code.block(b).insts().to_vec().into_iter().rev() {
                if live_insts[usize::from(iid)] {
                    continue;
                }
                let data = code.inst(iid);
                let removable = match data.out_value() {
                    Some(out) => !code.value(out).is_used(),
                    // Instructions without an out-value are either roots or meaningless to
                    // remove in isolation.
                    None => false,
                };
                if removable {
                    code.remove_inst(iid);
                    changed = true;
                }
            }
        }
        for pid in 0..code.phis_len() {
            let pid = PhiId::from_usize(pid);
            if live_phis[usize::from(pid)] || code.phi(pid).removed {
                continue;
            }
            if !code.value(code.phi(pid).out).is_used() {
                code.remove_phi(pid);
                changed = true;
            }
        }
    }
    code.debug_validate();
}
