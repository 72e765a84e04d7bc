//! Constant folding.
//!
//! A single forward pass in block order: each instruction is evaluated over the constant
//! lattice, and any instruction that (a) produced a constant, (b) is not already a constant,
//! and (c) has no observable effect beyond its value (it cannot throw in this instance and may
//! be dead code) is replaced by a `const` of the folded value. Phis are left to the lattice's
//! `Unknown` — a real conditional-propagation pass would refine them, but nothing in the IR
//! contracts needs that.

use crate::ir::{
    code::{InstId, IrCode},
    inst::{ConstNumber, Inst, InstT},
    types::{ConstValue, LatticeElement},
    value::ValueId,
};
use std::collections::HashMap;

pub fn run(code: &mut IrCode) {
    let mut lattice: HashMap<ValueId, LatticeElement> = HashMap::new();
    let mut folds: Vec<(InstId, ValueId, ConstValue)> = Vec::new();

    for b in code.block_ids().collect::<Vec<_>>() {
        for iid in code.block(b).insts().to_vec() {
            let data = code.inst(iid);
            let Some(out) = data.out_value() else {
                continue;
            };
            let get = |v: ValueId| {
                lattice
                    .get(&v)
                    .copied()
                    .unwrap_or(LatticeElement::Unknown)
            };
            let element = data.inst.evaluate(code, &get);
            lattice.insert(out, element);
            if let LatticeElement::Const(c) = element
                && !matches!(data.inst, Inst::ConstNumber(_))
                && data.inst.can_be_dead_code(code)
            {
                folds.push((iid, out, c));
            }
        }
    }

    for (iid, out, c) in folds {
        let block = code.inst(iid).block().unwrap();
        let index = code
            .block(block)
            .insts()
            .iter()
            .position(|i| *i == iid)
            .unwrap();
        let position = code.inst(iid).position();
        let (_, folded) = code.insert_inst_at(
            block,
            index,
            ConstNumber {
                ty: c.ty,
                bits: c.bits,
            }
            .into(),
            Some(c.ty),
            position,
        );
        code.replace_all_users_of(out, folded.unwrap());
        code.remove_inst(iid);
    }
    code.debug_validate();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{
        builder::tests::test_builder,
        inst::{Add, Div},
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
    fn add_of_a_constant_to_itself_folds_to_twice_it() {
        let mut b = test_builder(&[]);
        let c = b.add_with_out(
            ConstNumber {
                ty: ValueType::Int,
                bits: 21,
            }
            .into(),
            ValueType::Int,
            0,
        );
        let sum = b.add_with_out(
            Add {
                ty: NumericType::Int,
                lhs: c,
                rhs: c,
            }
            .into(),
            ValueType::Int,
            1,
        );
        b.add_return(Some((sum, ValueType::Int)));
        let mut code = b.build().unwrap();

        // The fold must already be visible through `evaluate`'s lattice...
        let get = |v: ValueId| {
            if v == c {
                LatticeElement::Const(ConstValue::int(21))
            } else {
                LatticeElement::Unknown
            }
        };
        let Inst::Add(add) = code.defining_inst(sum).unwrap() else {
            panic!()
        };
        assert_eq!(
            add.evaluate(&code, &get),
            LatticeElement::Const(ConstValue::int(42))
        );

        // ...and the pass must materialize it, retargeting the return.
        run(&mut code);
        crate::opt::dce::run(&mut code);
        assert_ir_matches(
            &code,
            "method Lcom/example/A;->f()I
b0: // preds: []
  v2: int = const 42
  return v2",
        );
    }

    #[test]
    fn folding_chains_through_dependent_instructions() {
        let mut b = test_builder(&[]);
        let c1 = b.add_with_out(
            ConstNumber {
                ty: ValueType::Int,
                bits: 6,
            }
            .into(),
            ValueType::Int,
            0,
        );
        let c2 = b.add_with_out(
            ConstNumber {
                ty: ValueType::Int,
                bits: 7,
            }
            .into(),
            ValueType::Int,
            1,
        );
        let sum = b.add_with_out(
            Add {
                ty: NumericType::Int,
                lhs: c1,
                rhs: c2,
            }
            .into(),
            ValueType::Int,
            2,
        );
        let doubled = b.add_with_out(
            Add {
                ty: NumericType::Int,
                lhs: sum,
                rhs: sum,
            }
            .into(),
            ValueType::Int,
            2,
        );
        b.add_return(Some((doubled, ValueType::Int)));
        let mut code = b.build().unwrap();
        run(&mut code);
        crate::opt::dce::run(&mut code);
        assert_ir_matches(
            &code,
            "method Lcom/example/A;->f()I
b0: // preds: []
  v5: int = const 26
  return v5",
        );
    }

    #[test]
    fn division_by_a_zero_constant_does_not_fold() {
        let mut b = test_builder(&[ValueType::Int]);
        let lhs = b.read_register(0, ValueType::Int).unwrap();
        let zero = b.add_with_out(
            ConstNumber {
                ty: ValueType::Int,
                bits: 0,
            }
            .into(),
            ValueType::Int,
            1,
        );
        let q = b.add_with_out(
            Div {
                ty: NumericType::Int,
                lhs,
                rhs: zero,
            }
            .into(),
            ValueType::Int,
            2,
        );
        b.add_return(Some((q, ValueType::Int)));
        let mut code = b.build().unwrap();
        run(&mut code);
        // The division must survive: it always throws at runtime.
        assert!(matches!(code.defining_inst(q), Some(Inst::Div(_))));
    }
}
