//! The SSA intermediate representation.
//!
//! The IR is a per-method graph ([code::IrCode]) of basic blocks holding instructions
//! ([inst::Inst]) and phis, with all def-use edges mirrored by value user sets. It is built by
//! [builder::IrBuilder] from decoded bytecode, mutated in place by the passes in [crate::opt],
//! and lowered by [crate::dex] (register machine) or [crate::cf] (stack machine).

pub mod builder;
pub mod code;
pub mod inst;
pub mod types;
pub mod value;
