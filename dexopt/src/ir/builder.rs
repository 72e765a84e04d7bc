//! SSA construction.
//!
//! [IrBuilder] is the bytecode-reader boundary: the reader walks a decoded method body, creates
//! one block per leader, and feeds instructions through this builder in terms of the source's
//! abstract registers. The builder turns register reads/writes into SSA form on the fly:
//!
//! * each block tracks its current definition per register;
//! * a read with no local definition consults predecessors, placing a phi at join points;
//! * blocks whose predecessor set is not final yet are *unsealed*: reads in them create
//!   *incomplete* phis (operand-less placeholders) that break the dependency cycles loop
//!   back-edges would otherwise cause. Sealing a block completes its pending phis exactly once.
//!
//! Every phi completion runs online trivial-phi elimination, so the graph never accumulates
//! phis a post-pass would have to clean up (the whole-graph sweep in [crate::opt] exists for
//! *optimization-induced* triviality, not construction).
//!
//! A read of a register with no reaching definition on some path is the canonical
//! malformed-input case: it surfaces as [CompilationError::InvalidCode], not a panic.

use crate::{
    errors::CompilationError,
    factory::{ItemFactory, MethodId},
    ir::{
        code::{BlockId, InstId, IrCode, Position},
        inst::{
            Argument, DebugLocalRead, DebugLocalWrite, Goto, If, Inst, Return, Switch, Throw,
        },
        types::{IfKind, ValueType},
        value::{LocalInfo, PhiId, ValueId},
    },
    log::{IRPhase, log_ir, should_log_ir},
};
use index_vec::IndexVec;
use std::{collections::HashMap, sync::Arc};

pub struct IrBuilder {
    code: IrCode,
    current: BlockId,
    position: Position,
    /// Per-block current definition of each abstract register.
    defs: IndexVec<BlockId, HashMap<u16, ValueId>>,
    /// Operand-less phis created in unsealed blocks, completed at seal.
    incomplete: HashMap<BlockId, Vec<(u16, PhiId)>>,
}

impl IrBuilder {
    /// Create a builder for `method`. The entry block is created, sealed (it has no
    /// predecessors), and populated with one [Argument] instruction per element of
    /// `param_types`, bound to consecutive abstract registers starting at 0 (wide parameters
    /// occupy two).
    pub fn new(factory: Arc<ItemFactory>, method: MethodId, param_types: &[ValueType]) -> Self {
        let mut code = IrCode::new(factory, method);
        let entry = code.create_block();
        code.blocks[entry].sealed = true;
        let mut this = Self {
            code,
            current: entry,
            position: Position::none(),
            defs: index_vec::index_vec![HashMap::new()],
            incomplete: HashMap::new(),
        };
        let mut reg = 0u16;
        for (index, ty) in param_types.iter().enumerate() {
            this.add_with_out(
                Argument {
                    index: index as u16,
                }
                .into(),
                *ty,
                reg,
            );
            reg += if ty.is_wide() { 2 } else { 1 };
        }
        this
    }

    pub fn code(&self) -> &IrCode {
        &self.code
    }

    pub fn current_block(&self) -> BlockId {
        self.current
    }

    pub fn set_position(&mut self, line: u32) {
        self.position = Position::at(line);
    }

    pub fn create_block(&mut self) -> BlockId {
        let b = self.code.create_block();
        let b2 = self.defs.push(HashMap::new());
        debug_assert_eq!(b, b2);
        b
    }

    /// Continue building in `block`. The caller must already have created the edges leading
    /// there (via the control-flow `add_*` methods from predecessor blocks).
    pub fn switch_to(&mut self, block: BlockId) {
        self.current = block;
    }

    pub fn write_register(&mut self, reg: u16, v: ValueId) {
        self.defs[self.current].insert(reg, v);
    }

    /// Read abstract register `reg`, expecting a value compatible with `ty`. This is where SSA
    /// form happens: see the module docs.
    pub fn read_register(&mut self, reg: u16, ty: ValueType) -> Result<ValueId, CompilationError> {
        self.read_register_in(self.current, reg, ty)
    }

    fn read_register_in(
        &mut self,
        block: BlockId,
        reg: u16,
        ty: ValueType,
    ) -> Result<ValueId, CompilationError> {
        if let Some(v) = self.defs[block].get(&reg).copied() {
            return self.refine_read(v, reg, ty);
        }
        if !self.code.block(block).is_sealed() {
            // The block's predecessors are not final: an incomplete phi stands in for whatever
            // will flow in, and is filled in at seal.
            let pid = self.code.add_phi(block, ty);
            let out = self.code.phi(pid).out;
            self.incomplete.entry(block).or_default().push((reg, pid));
            self.defs[block].insert(reg, out);
            return Ok(out);
        }
        let preds = self.code.block(block).preds().to_vec();
        match preds.as_slice() {
            [] => Err(self.code.invalid(format!(
                "read of register v{reg} with no reaching definition"
            ))),
            [pred] => {
                let v = self.read_register_in(*pred, reg, ty)?;
                self.defs[block].insert(reg, v);
                Ok(v)
            }
            _ => {
                // Write the phi before visiting predecessors so that loops terminate by reading
                // the phi itself.
                let pid = self.code.add_phi(block, ty);
                let out = self.code.phi(pid).out;
                self.defs[block].insert(reg, out);
                for pred in preds {
                    let v = self.read_register_in(pred, reg, ty)?;
                    self.code.append_phi_operand(pid, v);
                }
                self.code.mark_phi_completed(pid);
                Ok(self.eliminate_trivial(pid))
            }
        }
    }

    /// Reconcile a read-back value's type with the reader's expectation.
    fn refine_read(
        &mut self,
        v: ValueId,
        reg: u16,
        ty: ValueType,
    ) -> Result<ValueId, CompilationError> {
        let current = self.code.value(v).ty();
        match current.meet(ty) {
            Some(met) => {
                if met != current {
                    self.code.value_mut(v).refine_ty(met);
                }
                Ok(v)
            }
            None => Err(self.code.invalid(format!(
                "register v{reg} holds a {current} value where a {ty} value is expected"
            ))),
        }
    }

    /// Run trivial-phi elimination, keeping the register state maps in sync with every
    /// replacement it performs.
    fn eliminate_trivial(&mut self, pid: PhiId) -> ValueId {
        let defs = &mut self.defs;
        self.code.try_eliminate_trivial_phi_with(pid, &mut |old, new| {
            for map in defs.iter_mut() {
                for v in map.values_mut() {
                    if *v == old {
                        *v = new;
                    }
                }
            }
        })
    }

    /// Declare `block`'s predecessor set final, completing its pending incomplete phis.
    pub fn seal_block(&mut self, block: BlockId) -> Result<(), CompilationError> {
        assert!(!self.code.block(block).is_sealed(), "block sealed twice");
        self.code.blocks[block].sealed = true;
        if let Some(pending) = self.incomplete.remove(&block) {
            for (reg, pid) in pending {
                if self.code.phi(pid).removed {
                    continue;
                }
                let ty = self.code.value(self.code.phi(pid).out).ty();
                let preds = self.code.block(block).preds().to_vec();
                for pred in preds {
                    let v = self.read_register_in(pred, reg, ty)?;
                    self.code.append_phi_operand(pid, v);
                }
                self.code.mark_phi_completed(pid);
                self.eliminate_trivial(pid);
            }
        }
        Ok(())
    }

    /// Append `inst`, bind its out-value and write it to abstract register `dest`.
    pub fn add_with_out(&mut self, inst: Inst, out_ty: ValueType, dest: u16) -> ValueId {
        let (_, out) = self
            .code
            .add_inst(self.current, inst, Some(out_ty), self.position);
        let out = out.unwrap();
        self.write_register(dest, out);
        out
    }

    /// Append an instruction with no out-value (stores, monitor operations, void invokes, …).
    pub fn add_no_out(&mut self, inst: Inst) -> InstId {
        assert!(!inst.is_control_flow(), "use the control-flow methods");
        self.code
            .add_inst(self.current, inst, None, self.position)
            .0
    }

    /// Append an invoke whose result is unused (or void).
    pub fn add_void_invoke(&mut self, inst: Inst) -> InstId {
        assert!(inst.is_invoke());
        self.code
            .add_inst(self.current, inst, None, self.position)
            .0
    }

    pub fn add_goto(&mut self, target: BlockId) {
        self.code.add_edge(self.current, target);
        self.code
            .add_inst(self.current, Goto.into(), None, self.position);
    }

    /// A conditional branch: successor order is `[taken, fallthrough]`.
    pub fn add_if(
        &mut self,
        kind: IfKind,
        lhs: ValueId,
        rhs: Option<ValueId>,
        taken: BlockId,
        fallthrough: BlockId,
    ) {
        self.code.add_edge(self.current, taken);
        self.code.add_edge(self.current, fallthrough);
        self.code
            .add_inst(self.current, If { kind, lhs, rhs }.into(), None, self.position);
    }

    /// A multi-way branch: successor order is the case targets followed by the fallthrough.
    pub fn add_switch(&mut self, src: ValueId, keys: Box<[i32]>, targets: &[BlockId], fallthrough: BlockId) {
        assert_eq!(keys.len(), targets.len());
        for target in targets {
            self.code.add_edge(self.current, *target);
        }
        self.code.add_edge(self.current, fallthrough);
        self.code
            .add_inst(self.current, Switch { src, keys }.into(), None, self.position);
    }

    pub fn add_return(&mut self, src: Option<(ValueId, ValueType)>) {
        let (src, ty) = match src {
            Some((v, ty)) => (Some(v), Some(ty)),
            None => (None, None),
        };
        self.code
            .add_inst(self.current, Return { src, ty }.into(), None, self.position);
    }

    pub fn add_throw(&mut self, exception: ValueId) {
        self.code.add_inst(
            self.current,
            Throw { src: exception }.into(),
            None,
            self.position,
        );
    }

    /// Bind `src` to the debugger-visible local `local`, writing the binding to `dest`.
    pub fn add_debug_local_write(
        &mut self,
        dest: u16,
        src: ValueId,
        local: LocalInfo,
    ) -> ValueId {
        let ty = self.code.value(src).ty();
        let out = self.add_with_out(DebugLocalWrite { src }.into(), ty, dest);
        self.code.value_mut(out).local = Some(local);
        out
    }

    /// Keep `values` observable for the debugger at this point without reading them.
    pub fn add_debug_local_read(&mut self, values: &[ValueId]) -> InstId {
        let (iid, _) = self
            .code
            .add_inst(self.current, DebugLocalRead.into(), None, self.position);
        for v in values {
            self.code.add_debug_value(iid, *v);
        }
        iid
    }

    /// Finish construction. All blocks must have been sealed; the graph is validated (debug
    /// builds) and handed over for optimization and lowering.
    pub fn build(self) -> Result<IrCode, CompilationError> {
        assert!(
            self.incomplete.is_empty(),
            "unsealed blocks with pending phis at build"
        );
        for b in self.code.block_ids() {
            assert!(self.code.block(b).is_sealed(), "unsealed block at build");
        }
        self.code.debug_validate();
        if should_log_ir(IRPhase::Build) {
            log_ir(&self.code.to_string());
        }
        Ok(self.code)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ir::{
        inst::{Add, ConstNumber, Sub},
        types::NumericType,
    };
    use fm::FMatcher;

    /// Build an `ItemFactory` with a test method `Lcom/example/A;->f` of `n` int parameters.
    pub(crate) fn test_builder(params: &[ValueType]) -> IrBuilder {
        let mut factory = ItemFactory::new();
        let param_descs: Vec<&str> = params.iter().map(|_| "I").collect();
        let m = factory.intern_method("Lcom/example/A;", "f", "I", &param_descs);
        IrBuilder::new(Arc::new(factory), m, params)
    }

    fn assert_ir_matches(code: &IrCode, ptn: &str) {
        let ir = code.to_string();
        if let Err(e) = FMatcher::new(ptn).unwrap().matches(&ir) {
            panic!("{e}");
        }
    }

    #[test]
    fn straight_line() {
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
        let code = b.build().unwrap();
        assert_ir_matches(
            &code,
            "method Lcom/example/A;->f(II)I
b0: // preds: []
  v0: int = arg 0
  v1: int = arg 1
  v2: int = add-int v0, v1
  return v2",
        );
    }

    #[test]
    fn diamond_join_creates_phi() {
        // if (v0 == 0) { r = v0 + v1 } else { r = v0 - v1 }; return r
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
        let s = b.add_with_out(
            Add {
                ty: NumericType::Int,
                lhs,
                rhs,
            }
            .into(),
            ValueType::Int,
            2,
        );
        assert_eq!(b.code().value(s).ty(), ValueType::Int);
        b.add_goto(join);

        b.switch_to(else_b);
        b.seal_block(else_b).unwrap();
        let lhs = b.read_register(0, ValueType::Int).unwrap();
        let rhs = b.read_register(1, ValueType::Int).unwrap();
        b.add_with_out(
            Sub {
                ty: NumericType::Int,
                lhs,
                rhs,
            }
            .into(),
            ValueType::Int,
            2,
        );
        b.add_goto(join);

        b.switch_to(join);
        b.seal_block(join).unwrap();
        let r = b.read_register(2, ValueType::Int).unwrap();
        b.add_return(Some((r, ValueType::Int)));
        let code = b.build().unwrap();
        assert!(code.value(r).is_phi());
        assert_ir_matches(
            &code,
            "method Lcom/example/A;->f(II)I
b0: // preds: []
  v0: int = arg 0
  v1: int = arg 1
  if-eqz v0 -> [b1, b2]
b1: // preds: [b0]
  v2: int = add-int v0, v1
  goto
b2: // preds: [b0]
  v3: int = sub-int v0, v1
  goto
b3: // preds: [b1, b2]
  v4: int = phi(v2, v3)
  return v4",
        );
    }

    #[test]
    fn loop_invariant_register_needs_no_phi() {
        // A loop that only reads v0: the incomplete phi created for the back-edge must be
        // eliminated as trivial once the header seals, leaving a phi-free graph.
        let mut b = test_builder(&[ValueType::Int]);
        let header = b.create_block();
        let body = b.create_block();
        let exit = b.create_block();
        b.add_goto(header);

        b.switch_to(header);
        let v0 = b.read_register(0, ValueType::Int).unwrap();
        b.add_if(IfKind::Gt, v0, None, body, exit);

        b.switch_to(body);
        b.seal_block(body).unwrap();
        // This read sees the header's incomplete phi; sealing the header below must eliminate
        // it as trivial and rewrite the graph back to the argument.
        b.read_register(0, ValueType::Int).unwrap();
        b.add_goto(header);
        b.seal_block(header).unwrap();

        b.switch_to(exit);
        b.seal_block(exit).unwrap();
        let r = b.read_register(0, ValueType::Int).unwrap();
        b.add_return(Some((r, ValueType::Int)));
        let code = b.build().unwrap();
        for block in code.block_ids() {
            assert!(code.block(block).phis().is_empty());
        }
        // The exit's read must have been forwarded to the argument, not a leftover phi.
        assert!(!code.value(r).is_phi());
    }

    #[test]
    fn loop_variant_register_gets_a_phi() {
        // v1 = 0; while (v0 > 0) { v1 = v1 + v0 }; return v1
        let mut b = test_builder(&[ValueType::Int]);
        let header = b.create_block();
        let body = b.create_block();
        let exit = b.create_block();
        b.add_with_out(
            ConstNumber {
                ty: ValueType::Int,
                bits: 0,
            }
            .into(),
            ValueType::Int,
            1,
        );
        b.add_goto(header);

        b.switch_to(header);
        let v0 = b.read_register(0, ValueType::Int).unwrap();
        b.add_if(IfKind::Gt, v0, None, body, exit);

        b.switch_to(body);
        b.seal_block(body).unwrap();
        let acc = b.read_register(1, ValueType::Int).unwrap();
        let step = b.read_register(0, ValueType::Int).unwrap();
        b.add_with_out(
            Add {
                ty: NumericType::Int,
                lhs: acc,
                rhs: step,
            }
            .into(),
            ValueType::Int,
            1,
        );
        b.add_goto(header);
        b.seal_block(header).unwrap();

        b.switch_to(exit);
        b.seal_block(exit).unwrap();
        let r = b.read_register(1, ValueType::Int).unwrap();
        b.add_return(Some((r, ValueType::Int)));
        let code = b.build().unwrap();
        // The accumulator merges at the header; `r` reads that phi.
        assert_eq!(code.block(header).phis().len(), 1);
        assert!(code.value(r).is_phi());
        assert!(code.value(acc).is_phi());
    }

    #[test]
    fn undefined_register_read_is_a_compilation_error() {
        let mut b = test_builder(&[]);
        match b.read_register(3, ValueType::Int) {
            Err(CompilationError::InvalidCode { msg, .. }) => {
                assert!(msg.contains("no reaching definition"), "{msg}");
            }
            r => panic!("{r:?}"),
        }
    }

    #[test]
    fn incompatible_register_reuse_is_a_compilation_error() {
        let mut b = test_builder(&[ValueType::Int]);
        match b.read_register(0, ValueType::Object) {
            Err(CompilationError::InvalidCode { msg, .. }) => {
                assert!(msg.contains("int"), "{msg}");
            }
            r => panic!("{r:?}"),
        }
    }

    #[test]
    fn imprecise_reads_refine_the_value() {
        let mut b = test_builder(&[]);
        b.add_with_out(
            ConstNumber {
                ty: ValueType::IntOrFloat,
                bits: 0x3f80_0000,
            }
            .into(),
            ValueType::IntOrFloat,
            0,
        );
        let v = b.read_register(0, ValueType::Float).unwrap();
        assert_eq!(b.code().value(v).ty(), ValueType::Float);
    }
}
