//! Load/store insertion.
//!
//! The stack machine has no registers, so before [super::lower] can emit anything, every value
//! must be given a local slot and every instruction rewritten into `loads; op; store` form.
//! This pass does that in place, inserting the stack-shaping instruction kinds ([Load], [Store],
//! [Pop], [Dup], [Dup2], [Swap]) around each original instruction.
//!
//! The store/load pair between a producer and its consumer is elided when the producer's only
//! (non-phi, non-debug) user is the immediately following instruction: the value then rides the
//! operand stack straight into it. Three shapes qualify:
//!
//! * the value is the consumer's deepest operand — nothing extra needed;
//! * the value is the shallower of two single-width operands — the other operand is loaded and
//!   a [Swap] restores the order;
//! * the consumer reads the value twice as its only operands — a [Dup] (or [Dup2] for wide
//!   values) replaces the second load.
//!
//! Phi operands become a load/store into the phi's slot at the end of each predecessor, so, as
//! in the register backend, critical edges into phi-carrying blocks must have been split.
//!
//! Slot assignment follows the calling convention: parameters take the leading slots (wide ones
//! two), everything else is appended in block order. [Argument] instructions therefore need no
//! code at all — their value is already in its slot on entry.

use crate::{
    errors::CompilationError,
    ir::{
        code::{BlockId, InstId, IrCode},
        inst::{Dup, Dup2, Inst, InstT, Load, Pop, Store, Swap},
        value::ValueId,
    },
};
use std::collections::HashMap;

pub struct SlotAssignment {
    slots: HashMap<ValueId, u16>,
    pub slots_used: u16,
}

impl SlotAssignment {
    pub fn slot_of(&self, v: ValueId) -> u16 {
        *self
            .slots
            .get(&v)
            .unwrap_or_else(|| panic!("v{} has no local slot", usize::from(v)))
    }
}

/// Rewrite `code` into explicit load/store form and return the slot assignment the stack
/// lowering needs. Must run exactly once per method, after all optimization passes.
pub fn insert_loads_and_stores(code: &mut IrCode) -> Result<SlotAssignment, CompilationError> {
    let mut slots = HashMap::new();
    let mut next: u16 = 0;
    for b in code.block_ids().collect::<Vec<_>>() {
        for pid in code.block(b).phis().to_vec() {
            let out = code.phi(pid).out;
            slots.insert(out, next);
            next += code.value(out).ty().required_registers() as u16;
        }
        for iid in code.block(b).insts().to_vec() {
            if let Some(out) = code.inst(iid).out_value() {
                slots.insert(out, next);
                next += code.value(out).ty().required_registers() as u16;
            }
        }
    }

    for b in code.block_ids().collect::<Vec<_>>() {
        rewrite_block(code, b)?;
    }
    code.debug_validate();
    Ok(SlotAssignment {
        slots,
        slots_used: next,
    })
}

/// Can `out`, produced by instruction `i`, be left on the stack for `next` to consume?
fn can_ride_stack(code: &IrCode, out: ValueId, next: Option<&InstId>) -> bool {
    let Some(next) = next else {
        return false;
    };
    let value = code.value(out);
    if !value.phi_users().is_empty() || !value.debug_users().is_empty() {
        return false;
    }
    if value.users().len() != 1 || value.users()[0] != *next {
        return false;
    }
    let ins = code.inst(*next).inst.in_values();
    let occurrences = ins.iter().filter(|v| **v == out).count();
    match occurrences {
        1 if ins[0] == out => true,
        1 if ins.len() == 2 && ins[1] == out => {
            // Restorable with a swap, which only handles single-width entries.
            code.value(ins[0]).ty().is_single() && value.ty().is_single()
        }
        2 if ins.len() == 2 => true,
        _ => false,
    }
}

fn rewrite_block(code: &mut IrCode, b: BlockId) -> Result<(), CompilationError> {
    let orig: Vec<InstId> = code.block(b).insts().to_vec();
    let mut pre: Vec<Vec<Inst>> = vec![Vec::new(); orig.len()];
    let mut post: Vec<Vec<Inst>> = vec![Vec::new(); orig.len()];
    let mut carried: Option<ValueId> = None;

    for (i, iid) in orig.iter().enumerate() {
        let data = code.inst(*iid);
        let ins = data.inst.in_values();

        if data.inst.is_control_flow() {
            // Materialize successor phis through their slots before the terminator's own
            // operands go onto the stack.
            let succs = code.block(b).succs().to_vec();
            for s in &succs {
                let block = code.block(*s);
                if block.phis().is_empty() {
                    continue;
                }
                if succs.len() > 1 && block.preds().len() > 1 {
                    return Err(CompilationError::Internal(format!(
                        "critical edge b{}->b{} into phis must be split before lowering",
                        usize::from(b),
                        usize::from(*s)
                    )));
                }
                let pred_index = block
                    .preds()
                    .iter()
                    .position(|p| *p == b)
                    .expect("successor does not know its predecessor");
                for pid in block.phis().to_vec() {
                    let phi = code.phi(pid);
                    let op = phi.operands()[pred_index];
                    let out = phi.out;
                    if op == out {
                        continue;
                    }
                    pre[i].push(Load { src: op }.into());
                    pre[i].push(Store { src: out }.into());
                }
            }
        }

        match carried.take() {
            Some(c) => {
                let occurrences = ins.iter().filter(|v| **v == c).count();
                if occurrences == 2 {
                    let wide = code.value(c).ty().is_wide();
                    pre[i].push(if wide {
                        Dup2 { src: c }.into()
                    } else {
                        Dup { src: c }.into()
                    });
                } else if ins[0] == c {
                    for v in &ins[1..] {
                        pre[i].push(Load { src: *v }.into());
                    }
                } else {
                    debug_assert_eq!(ins.len(), 2);
                    pre[i].push(Load { src: ins[0] }.into());
                    pre[i].push(Swap { lhs: ins[0], rhs: c }.into());
                }
            }
            None => {
                for v in &ins {
                    pre[i].push(Load { src: *v }.into());
                }
            }
        }

        if let Some(out) = data.out_value()
            && !matches!(data.inst, Inst::Argument(_))
        {
            if !code.value(out).is_used() {
                post[i].push(Pop { src: out }.into());
            } else if can_ride_stack(code, out, orig.get(i + 1)) {
                carried = Some(out);
            } else {
                post[i].push(Store { src: out }.into());
            }
        }
    }
    assert!(carried.is_none());

    let mut new_order = Vec::with_capacity(orig.len() * 2);
    for (i, iid) in orig.iter().enumerate() {
        let position = code.inst(*iid).position();
        for inst in pre[i].drain(..) {
            let (nid, _) = code.add_inst(b, inst, None, position);
            new_order.push(nid);
        }
        new_order.push(*iid);
        for inst in post[i].drain(..) {
            let (nid, _) = code.add_inst(b, inst, None, position);
            new_order.push(nid);
        }
    }
    code.set_block_insts(b, new_order);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{
        builder::tests::test_builder,
        inst::{Add, ConstNumber, Mul},
        types::{NumericType, ValueType},
    };
    use fm::FMatcher;

    fn assert_ir_matches(code: &IrCode, ptn: &str) {
        let ir = code.to_string();
        if let Err(e) = FMatcher::new(ptn).unwrap().matches(&ir) {
            panic!("{e}");
        }
    }

    #[test]
    fn operands_ride_the_stack_into_the_next_instruction() {
        let mut b = test_builder(&[ValueType::Int, ValueType::Int]);
        let lhs = b.read_register(0, ValueType::Int).unwrap();
        let rhs = b.read_register(1, ValueType::Int).unwrap();
        let sum = b.add_with_out(
            Add {
                ty: NumericType::Int,
                lhs,
                rhs,
            }
            .into(),
            ValueType::Int,
            0,
        );
        b.add_return(Some((sum, ValueType::Int)));
        let mut code = b.build().unwrap();
        insert_loads_and_stores(&mut code).unwrap();
        // The sum is the return's only operand: no store/load pair between them.
        assert_ir_matches(
            &code,
            "method Lcom/example/A;->f(II)I
b0: // preds: []
  v0: int = arg 0
  v1: int = arg 1
  load v0
  load v1
  v2: int = add-int v0, v1
  return v2",
        );
    }

    #[test]
    fn double_use_becomes_dup() {
        let mut b = test_builder(&[]);
        let c = b.add_with_out(
            ConstNumber {
                ty: ValueType::Int,
                bits: 3,
            }
            .into(),
            ValueType::Int,
            0,
        );
        let sq = b.add_with_out(
            Mul {
                ty: NumericType::Int,
                lhs: c,
                rhs: c,
            }
            .into(),
            ValueType::Int,
            0,
        );
        b.add_return(Some((sq, ValueType::Int)));
        let mut code = b.build().unwrap();
        insert_loads_and_stores(&mut code).unwrap();
        assert_ir_matches(
            &code,
            "method Lcom/example/A;->f()I
b0: // preds: []
  v0: int = const 3
  dup v0
  v1: int = mul-int v0, v0
  return v1",
        );
    }

    #[test]
    fn shallow_operand_needs_a_swap() {
        // sub(arg, const): the const is produced right before the sub but is consumed as the
        // shallower operand, so the elided store/load pair costs a swap.
        let mut b = test_builder(&[ValueType::Int]);
        let arg = b.read_register(0, ValueType::Int).unwrap();
        let c = b.add_with_out(
            ConstNumber {
                ty: ValueType::Int,
                bits: 1000,
            }
            .into(),
            ValueType::Int,
            1,
        );
        let d = b.add_with_out(
            crate::ir::inst::Sub {
                ty: NumericType::Int,
                lhs: arg,
                rhs: c,
            }
            .into(),
            ValueType::Int,
            0,
        );
        b.add_return(Some((d, ValueType::Int)));
        let mut code = b.build().unwrap();
        insert_loads_and_stores(&mut code).unwrap();
        assert_ir_matches(
            &code,
            "method Lcom/example/A;->f(I)I
b0: // preds: []
  v0: int = arg 0
  v1: int = const 1000
  load v0
  swap v0, v1
  v2: int = sub-int v0, v1
  return v2",
        );
    }

    #[test]
    fn unused_result_is_popped() {
        let mut b = test_builder(&[ValueType::Int]);
        let arg = b.read_register(0, ValueType::Int).unwrap();
        // A division whose result is unused but which may throw, so DCE keeps it.
        b.add_with_out(
            crate::ir::inst::Div {
                ty: NumericType::Int,
                lhs: arg,
                rhs: arg,
            }
            .into(),
            ValueType::Int,
            1,
        );
        b.add_return(None);
        let mut code = b.build().unwrap();
        insert_loads_and_stores(&mut code).unwrap();
        assert_ir_matches(
            &code,
            "method Lcom/example/A;->f(I)I
b0: // preds: []
  v0: int = arg 0
  load v0
  load v0
  v1: int = div-int v0, v0
  pop v1
  return-void",
        );
    }

    #[test]
    fn phi_operands_go_through_the_phi_slot() {
        use crate::ir::types::IfKind;
        let mut b = test_builder(&[ValueType::Int, ValueType::Int]);
        let then_b = b.create_block();
        let else_b = b.create_block();
        let join = b.create_block();
        let v0 = b.read_register(0, ValueType::Int).unwrap();
        b.add_if(IfKind::Eq, v0, None, then_b, else_b);
        b.switch_to(then_b);
        b.seal_block(then_b).unwrap();
        let lhs = b.read_register(0, ValueType::Int).unwrap();
        let rhs = b.read_register(1, ValueType::Int).unwrap();
        b.add_with_out(
            Add {
                ty: NumericType::Int,
                lhs,
                rhs,
            }
            .into(),
            ValueType::Int,
            2,
        );
        b.add_goto(join);
        b.switch_to(else_b);
        b.seal_block(else_b).unwrap();
        let rhs = b.read_register(1, ValueType::Int).unwrap();
        b.write_register(2, rhs);
        b.add_goto(join);
        b.switch_to(join);
        b.seal_block(join).unwrap();
        let r = b.read_register(2, ValueType::Int).unwrap();
        b.add_return(Some((r, ValueType::Int)));
        let mut code = b.build().unwrap();
        insert_loads_and_stores(&mut code).unwrap();
        assert_ir_matches(
            &code,
            "method Lcom/example/A;->f(II)I
b0: // preds: []
  v0: int = arg 0
  v1: int = arg 1
  load v0
  if-eqz v0 -> [b1, b2]
b1: // preds: [b0]
  load v0
  load v1
  v2: int = add-int v0, v1
  store v2
  load v2
  store v3
  goto
b2: // preds: [b0]
  load v1
  store v3
  goto
b3: // preds: [b1, b2]
  v3: int = phi(v2, v1)
  load v3
  return v3",
        );
    }
}
