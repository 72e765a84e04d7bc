//! The register-allocator boundary.
//!
//! The production linear-scan allocator is a collaborator outside this crate's scope; the IR
//! exposes what it needs (per-instruction register ceilings on [crate::ir::inst::InstT] and the
//! numbered instruction stream from [IrCode::renumber]) and consumes its answers through
//! [RegisterAllocatorT]. [NaiveAllocator] is the spill-everything implementation used as the
//! default and by the lowering tests: every value gets its own register for its whole lifetime,
//! wide values get an aligned pair, so `allocated_register` ignores the program point.

use crate::ir::{
    code::IrCode,
    value::ValueId,
};
use std::collections::HashMap;

pub trait RegisterAllocatorT {
    /// The register holding `v` at the program point of the instruction numbered `number`.
    ///
    /// # Panics
    ///
    /// If `v` was never allocated a register (e.g. it is dead everywhere).
    fn allocated_register(&self, v: ValueId, number: u32) -> u32;

    /// The total number of registers the method uses. Registers at and above this index are
    /// free for lowering to use as scratch (e.g. to build an invoke-range argument block).
    fn registers_used(&self) -> u32;

    /// Are `args` sitting in consecutive registers (each wide value occupying an aligned pair)
    /// at `number`, as the range invoke encodings require?
    fn arguments_are_consecutive(&self, code: &IrCode, args: &[ValueId], number: u32) -> bool {
        let mut expected = None;
        for arg in args {
            let r = self.allocated_register(*arg, number);
            if let Some(e) = expected
                && r != e
            {
                return false;
            }
            expected = Some(r + code.value(*arg).ty().required_registers());
        }
        true
    }
}

pub struct NaiveAllocator {
    regs: HashMap<ValueId, u32>,
    used: u32,
}

impl NaiveAllocator {
    pub fn new(code: &IrCode) -> Self {
        let mut regs = HashMap::new();
        let mut next = 0u32;
        let mut assign = |regs: &mut HashMap<ValueId, u32>, v: ValueId, width: u32| {
            regs.insert(v, next);
            next += width;
        };
        for b in code.block_ids() {
            for pid in code.block(b).phis() {
                let out = code.phi(*pid).out;
                assign(&mut regs, out, code.value(out).ty().required_registers());
            }
            for iid in code.block(b).insts() {
                if let Some(out) = code.inst(*iid).out_value() {
                    assign(&mut regs, out, code.value(out).ty().required_registers());
                }
            }
        }
        Self { regs, used: next }
    }
}

impl RegisterAllocatorT for NaiveAllocator {
    fn allocated_register(&self, v: ValueId, _number: u32) -> u32 {
        *self
            .regs
            .get(&v)
            .unwrap_or_else(|| panic!("v{} has no register", usize::from(v)))
    }

    fn registers_used(&self) -> u32 {
        self.used
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{builder::tests::test_builder, inst::ConstNumber, types::ValueType};

    #[test]
    fn wide_values_take_register_pairs() {
        let mut b = test_builder(&[ValueType::Int]);
        let w = b.add_with_out(
            ConstNumber {
                ty: ValueType::Long,
                bits: 1,
            }
            .into(),
            ValueType::Long,
            1,
        );
        let n = b.add_with_out(
            ConstNumber {
                ty: ValueType::Int,
                bits: 2,
            }
            .into(),
            ValueType::Int,
            3,
        );
        let arg = b.read_register(0, ValueType::Int).unwrap();
        b.add_return(Some((n, ValueType::Int)));
        let code = b.build().unwrap();
        let ra = NaiveAllocator::new(&code);
        assert_eq!(ra.allocated_register(arg, 0), 0);
        assert_eq!(ra.allocated_register(w, 0), 1);
        assert_eq!(ra.allocated_register(n, 0), 3);
        assert_eq!(ra.registers_used(), 4);
        assert!(ra.arguments_are_consecutive(&code, &[arg, w, n], 0));
        assert!(!ra.arguments_are_consecutive(&code, &[arg, n], 0));
    }
}
