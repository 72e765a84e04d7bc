//! The whole-graph trivial-phi sweep.
//!
//! SSA construction already eliminates trivial phis online, but later passes can re-create
//! triviality: replacing a value can collapse a phi's operands to one distinct value. This pass
//! re-runs elimination over every phi until nothing changes. The fixed point leaves no trivial
//! phi behind except the all-self-reference cycles that only unreachable code can produce,
//! which stay untouched by design.

use crate::ir::{code::IrCode, value::PhiId};

pub fn run(code: &mut IrCode) {
    let mut changed = true;
    while changed {
        changed = false;
        for pid in 0..code.phis_len() {
            let pid = PhiId::from_usize(pid);
            let phi = code.phi(pid);
            if phi.removed || !phi.is_completed() {
                continue;
            }
            if matches!(phi.trivial_operand(), Some(Some(_))) {
                code.try_eliminate_trivial_phi(pid);
                changed = true;
            }
        }
    }
    code.debug_validate();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{
        builder::tests::test_builder,
        inst::{Add, Inst},
        types::{IfKind, NumericType, ValueType},
    };

    #[test]
    fn replacement_induced_triviality_is_swept() {
        // Build a diamond whose phi merges two different values, then make them the same value
        // and check the sweep removes the phi and retargets its user.
        let mut b = test_builder(&[ValueType::Int, ValueType::Int]);
        let then_b = b.create_block();
        let else_b = b.create_block();
        let join = b.create_block();
        let v0 = b.read_register(0, ValueType::Int).unwrap();
        let v1 = b.read_register(1, ValueType::Int).unwrap();
        b.add_if(IfKind::Eq, v0, None, then_b, else_b);
        b.switch_to(then_b);
        b.seal_block(then_b).unwrap();
        b.write_register(2, v0);
        b.add_goto(join);
        b.switch_to(else_b);
        b.seal_block(else_b).unwrap();
        b.write_register(2, v1);
        b.add_goto(join);
        b.switch_to(join);
        b.seal_block(join).unwrap();
        let r = b.read_register(2, ValueType::Int).unwrap();
        let sum = b.add_with_out(
            Add {
                ty: NumericType::Int,
                lhs: r,
                rhs: r,
            }
            .into(),
            ValueType::Int,
            3,
        );
        b.add_return(Some((sum, ValueType::Int)));
        let mut code = b.build().unwrap();
        assert!(code.value(r).is_phi());

        code.replace_all_users_of(v1, v0);
        run(&mut code);
        for block in code.block_ids().collect::<Vec<_>>() {
            assert!(code.block(block).phis().is_empty());
        }
        let Some(Inst::Add(add)) = code.defining_inst(sum) else {
            panic!()
        };
        assert_eq!((add.lhs, add.rhs), (v0, v0));
        code.validate().unwrap();
    }
}
