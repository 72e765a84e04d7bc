//! dexopt: the SSA core of a bytecode-to-bytecode optimizer.
//!
//! This crate ingests decoded method bodies, builds a per-method SSA graph
//! ([ir::code::IrCode]), runs optimization passes over it, and lowers it back out to either
//! register-machine bytecode ([dex]) or stack-machine bytecode ([cf]). The physical readers and
//! writers, the shaking/reachability analysis, and the production register allocator are
//! collaborators behind narrow boundaries:
//!
//! * readers drive [ir::builder::IrBuilder] and intern descriptors into a [factory::ItemFactory];
//! * whole-program queries go through [appinfo::AppInfo];
//! * the allocator implements [regalloc::RegisterAllocatorT] against the instruction contracts
//!   in [ir::inst];
//! * writers consume the logical instruction streams the two backends emit.
//!
//! [pipeline::Pipeline] ties it together with a method-granular worker pool.

pub mod appinfo;
pub mod cf;
pub mod dex;
pub mod errors;
pub mod factory;
pub mod ir;
pub mod log;
pub mod opt;
pub mod pipeline;
pub mod regalloc;

pub use errors::CompilationError;
