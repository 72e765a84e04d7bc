//! The per-method SSA graph.
//!
//! [IrCode] owns four arenas — blocks, instructions, values, phis — and is the only thing
//! allowed to mutate the def-use edges between them. Operand lists (held by instructions and
//! phis) and user sets (held by values) are two views of the same edges; every mutator here
//! updates both, which is what makes the user-set bijection an invariant rather than a hope.
//! [IrCode::validate] checks the invariants and is meant to be called at mutation boundaries in
//! debug builds via [IrCode::debug_validate].
//!
//! Block successor conventions: an `If` terminator's successors are `[taken, fallthrough]`; a
//! `Switch`'s are `[case 0, …, case n-1, fallthrough]`; `Goto`'s single successor is the target.
//! Phi operand order follows the owning block's predecessor order.

use crate::{
    errors::CompilationError,
    factory::{ItemFactory, MethodId},
    ir::{
        inst::{Inst, InstT},
        types::{ConstValue, ValueType},
        value::{Definition, Phi, PhiId, Value, ValueId},
    },
};
use index_vec::IndexVec;
use smallvec::SmallVec;
use std::sync::Arc;

index_vec::define_index_type! {
    pub struct InstId = u32;
}

index_vec::define_index_type! {
    pub struct BlockId = u32;
}

/// A source position. Instructions without line information carry [Position::none].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Position {
    pub line: Option<u32>,
}

impl Position {
    pub fn none() -> Self {
        Self { line: None }
    }

    pub fn at(line: u32) -> Self {
        Self { line: Some(line) }
    }
}

/// An instruction plus the per-instruction state that is independent of its kind.
#[derive(Debug)]
pub struct InstrData {
    pub inst: Inst,
    out: Option<ValueId>,
    /// Set exactly once, normally at attach. [InstrData::force_set_position] exists for
    /// block-structural rewrites that materialize instructions out of order.
    position: Option<Position>,
    block: Option<BlockId>,
    /// Monotonic order number within the method, assigned by [IrCode::renumber]; `u32::MAX`
    /// until then.
    number: u32,
    /// Values whose debugger-visible live ranges this instruction extends without reading them
    /// as operands.
    pub(crate) debug_values: SmallVec<[ValueId; 2]>,
}

impl InstrData {
    pub fn out_value(&self) -> Option<ValueId> {
        self.out
    }

    pub fn block(&self) -> Option<BlockId> {
        self.block
    }

    pub fn position(&self) -> Position {
        self.position.expect("position not set")
    }

    pub fn set_position(&mut self, position: Position) {
        assert!(self.position.is_none(), "position is set-once");
        self.position = Some(position);
    }

    /// Overwrite the position. Only block-structural rewrites may use this.
    pub fn force_set_position(&mut self, position: Position) {
        self.position = Some(position);
    }

    pub fn number(&self) -> u32 {
        assert_ne!(self.number, u32::MAX, "instructions not yet numbered");
        self.number
    }

    pub fn debug_values(&self) -> &[ValueId] {
        &self.debug_values
    }
}

#[derive(Debug, Default)]
pub struct BasicBlock {
    pub(crate) preds: SmallVec<[BlockId; 2]>,
    pub(crate) succs: SmallVec<[BlockId; 2]>,
    pub(crate) insts: Vec<InstId>,
    pub(crate) phis: Vec<PhiId>,
    pub(crate) sealed: bool,
}

impl BasicBlock {
    pub fn preds(&self) -> &[BlockId] {
        &self.preds
    }

    pub fn succs(&self) -> &[BlockId] {
        &self.succs
    }

    pub fn insts(&self) -> &[InstId] {
        &self.insts
    }

    pub fn phis(&self) -> &[PhiId] {
        &self.phis
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }
}

#[derive(Debug)]
pub struct IrCode {
    pub method: MethodId,
    factory: Arc<ItemFactory>,
    pub(crate) blocks: IndexVec<BlockId, BasicBlock>,
    pub(crate) insts: IndexVec<InstId, InstrData>,
    pub(crate) values: IndexVec<ValueId, Value>,
    pub(crate) phis: IndexVec<PhiId, Phi>,
}

impl IrCode {
    pub fn new(factory: Arc<ItemFactory>, method: MethodId) -> Self {
        Self {
            method,
            factory,
            blocks: IndexVec::new(),
            insts: IndexVec::new(),
            values: IndexVec::new(),
            phis: IndexVec::new(),
        }
    }

    pub fn factory(&self) -> &ItemFactory {
        &self.factory
    }

    pub fn factory_arc(&self) -> Arc<ItemFactory> {
        Arc::clone(&self.factory)
    }

    /// The [ValueType] of `method`'s return type, or `None` for void.
    pub fn factory_value_type(&self, method: MethodId) -> Option<ValueType> {
        let ret = self.factory.method(method).proto.ret;
        self.factory.value_type_of(ret)
    }

    pub(crate) fn invalid(&self, msg: impl Into<String>) -> CompilationError {
        CompilationError::InvalidCode {
            method: self.factory.method_to_string(self.method),
            msg: msg.into(),
        }
    }

    pub fn block(&self, b: BlockId) -> &BasicBlock {
        &self.blocks[b]
    }

    pub fn blocks_len(&self) -> usize {
        self.blocks.len()
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len()).map(BlockId::from_usize)
    }

    pub fn inst(&self, i: InstId) -> &InstrData {
        &self.insts[i]
    }

    pub fn insts_len(&self) -> usize {
        self.insts.len()
    }

    pub fn phis_len(&self) -> usize {
        self.phis.len()
    }

    pub(crate) fn inst_mut(&mut self, i: InstId) -> &mut InstrData {
        &mut self.insts[i]
    }

    pub fn value(&self, v: ValueId) -> &Value {
        &self.values[v]
    }

    pub(crate) fn value_mut(&mut self, v: ValueId) -> &mut Value {
        &mut self.values[v]
    }

    pub fn phi(&self, p: PhiId) -> &Phi {
        &self.phis[p]
    }

    /// The instruction defining `v`, or `None` if `v` is a phi.
    pub fn defining_inst(&self, v: ValueId) -> Option<&Inst> {
        match self.values[v].definition() {
            Definition::Inst(i) => Some(&self.insts[i].inst),
            Definition::Phi(_) => None,
        }
    }

    /// If `v` is defined by a number constant, its value.
    pub fn const_of(&self, v: ValueId) -> Option<ConstValue> {
        if let Some(Inst::ConstNumber(c)) = self.defining_inst(v) {
            Some(ConstValue {
                bits: c.bits,
                ty: c.ty,
            })
        } else {
            None
        }
    }

    pub fn create_block(&mut self) -> BlockId {
        self.blocks.push(BasicBlock::default())
    }

    /// Add a control-flow edge. Phi operand order in `to` mirrors the order edges are added in.
    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from].succs.push(to);
        self.blocks[to].preds.push(from);
    }

    fn new_inst_data(inst: Inst, position: Position, block: BlockId) -> InstrData {
        InstrData {
            inst,
            out: None,
            position: Some(position),
            block: Some(block),
            number: u32::MAX,
            debug_values: SmallVec::new(),
        }
    }

    /// Append `inst` to `block`, creating its out-value (if `out_ty` is `Some`) and registering
    /// it as a user of each of its operands.
    pub fn add_inst(
        &mut self,
        block: BlockId,
        inst: Inst,
        out_ty: Option<ValueType>,
        position: Position,
    ) -> (InstId, Option<ValueId>) {
        let iid = self.insts.push(Self::new_inst_data(inst, position, block));
        let out = out_ty.map(|ty| {
            let v = self.values.push(Value::new(ty, Definition::Inst(iid)));
            self.insts[iid].out = Some(v);
            v
        });
        if let Some(out) = out
            && matches!(
                self.insts[iid].inst,
                Inst::NewInstance(_)
                    | Inst::NewArrayEmpty(_)
                    | Inst::InvokeNewArray(_)
                    | Inst::ConstString(_)
                    | Inst::ConstClass(_)
            )
        {
            // Freshly allocated objects and resolved constants are never null.
            self.values[out].mark_never_null();
        }
        for v in self.insts[iid].inst.in_values() {
            self.add_user(v, iid);
        }
        self.blocks[block].insts.push(iid);
        (iid, out)
    }

    /// As [IrCode::add_inst], but inserting at position `index` in the block's instruction list.
    pub fn insert_inst_at(
        &mut self,
        block: BlockId,
        index: usize,
        inst: Inst,
        out_ty: Option<ValueType>,
        position: Position,
    ) -> (InstId, Option<ValueId>) {
        let (iid, out) = self.add_inst(block, inst, out_ty, position);
        let popped = self.blocks[block].insts.pop();
        debug_assert_eq!(popped, Some(iid));
        self.blocks[block].insts.insert(index, iid);
        (iid, out)
    }

    /// Replace `block`'s instruction ordering wholesale. Used by passes that rebuild a block's
    /// contents (load/store insertion); every attached instruction must appear exactly once.
    pub(crate) fn set_block_insts(&mut self, block: BlockId, insts: Vec<InstId>) {
        self.blocks[block].insts = insts;
    }

    fn add_user(&mut self, v: ValueId, user: InstId) {
        let users = &mut self.values[v].users;
        if !users.contains(&user) {
            users.push(user);
        }
    }

    /// Record that `inst` keeps `v` observable for the debugger without reading it.
    pub fn add_debug_value(&mut self, inst: InstId, v: ValueId) {
        if !self.insts[inst].debug_values.contains(&v) {
            self.insts[inst].debug_values.push(v);
        }
        let debug_users = &mut self.values[v].debug_users;
        if !debug_users.contains(&inst) {
            debug_users.push(inst);
        }
    }

    /// Detach `iid` from its block, unregistering it from every value it reads. Its out-value, if
    /// any, must be unused.
    pub fn remove_inst(&mut self, iid: InstId) {
        if let Some(out) = self.insts[iid].out {
            assert!(
                !self.values[out].is_used(),
                "removing instruction whose out-value is still used"
            );
        }
        let block = self.insts[iid].block.take().expect("instruction not attached");
        self.blocks[block].insts.retain(|i| *i != iid);
        for v in self.insts[iid].inst.in_values() {
            self.values[v].users.retain(|u| *u != iid);
        }
        let debug_values = std::mem::take(&mut self.insts[iid].debug_values);
        for v in debug_values {
            self.values[v].debug_users.retain(|u| *u != iid);
        }
    }

    /// Replace every ordinary, phi, and debug use of `old` with `new`, transferring user-set
    /// memberships. `old` itself (its defining instruction or phi) is left for the caller to
    /// clean up explicitly.
    pub fn replace_all_users_of(&mut self, old: ValueId, new: ValueId) {
        assert_ne!(old, new);
        let users = std::mem::take(&mut self.values[old].users);
        for iid in users {
            self.insts[iid]
                .inst
                .rewrite_values(&mut |v| if v == old { new } else { v });
            self.add_user(new, iid);
        }
        let phi_users = std::mem::take(&mut self.values[old].phi_users);
        for pid in phi_users {
            for op in self.phis[pid].operands.iter_mut() {
                if *op == old {
                    *op = new;
                }
            }
            let new_phi_users = &mut self.values[new].phi_users;
            if !new_phi_users.contains(&pid) {
                new_phi_users.push(pid);
            }
        }
        let debug_users = std::mem::take(&mut self.values[old].debug_users);
        for iid in debug_users {
            for v in self.insts[iid].debug_values.iter_mut() {
                if *v == old {
                    *v = new;
                }
            }
            let new_debug_users = &mut self.values[new].debug_users;
            if !new_debug_users.contains(&iid) {
                new_debug_users.push(iid);
            }
        }
    }

    /// Create a phi at the head of `block`. Its operand list starts empty; use
    /// [IrCode::append_phi_operand] (in predecessor order) and [IrCode::mark_phi_completed].
    pub fn add_phi(&mut self, block: BlockId, ty: ValueType) -> PhiId {
        let pid = self.phis.len_idx();
        let out = self.values.push(Value::new(ty, Definition::Phi(pid)));
        let pid2 = self.phis.push(Phi {
            block,
            out,
            operands: SmallVec::new(),
            completed: false,
            removed: false,
        });
        debug_assert_eq!(pid, pid2);
        self.blocks[block].phis.push(pid);
        pid
    }

    pub fn append_phi_operand(&mut self, pid: PhiId, v: ValueId) {
        self.phis[pid].operands.push(v);
        let phi_users = &mut self.values[v].phi_users;
        if !phi_users.contains(&pid) {
            phi_users.push(pid);
        }
    }

    /// Replace the operand flowing in over predecessor edge `index`.
    pub fn replace_phi_operand(&mut self, pid: PhiId, index: usize, new: ValueId) {
        let old = self.phis[pid].operands[index];
        if old == new {
            return;
        }
        self.phis[pid].operands[index] = new;
        if !self.phis[pid].operands.contains(&old) {
            self.values[old].phi_users.retain(|p| *p != pid);
        }
        let phi_users = &mut self.values[new].phi_users;
        if !phi_users.contains(&pid) {
            phi_users.push(pid);
        }
    }

    /// A phi is completed exactly once, when its block's predecessor set is final.
    pub fn mark_phi_completed(&mut self, pid: PhiId) {
        assert!(!self.phis[pid].completed, "phi completed twice");
        self.phis[pid].completed = true;
    }

    /// Detach `pid` from its block. Its out-value must be unused.
    pub fn remove_phi(&mut self, pid: PhiId) {
        let out = self.phis[pid].out;
        assert!(!self.values[out].is_used());
        assert!(!self.phis[pid].removed);
        self.phis[pid].removed = true;
        let block = self.phis[pid].block;
        self.blocks[block].phis.retain(|p| *p != pid);
        let operands = std::mem::take(&mut self.phis[pid].operands);
        for v in operands {
            if v != out {
                self.values[v].phi_users.retain(|p| *p != pid);
            }
        }
    }

    /// If `pid` is trivial, replace it everywhere by its single distinct operand and remove it,
    /// cascading into phi users that this makes trivial in turn. Returns the value every former
    /// user of the phi now sees: the replacement, or the phi's own out-value if it was not
    /// eliminated.
    ///
    /// A phi whose operands are all self-references (possible only in unreachable code) is left
    /// in place: there is nothing to replace it with, and nothing reachable reads it.
    pub fn try_eliminate_trivial_phi(&mut self, pid: PhiId) -> ValueId {
        self.try_eliminate_trivial_phi_with(pid, &mut |_, _| ())
    }

    /// As [IrCode::try_eliminate_trivial_phi], additionally reporting every `(old, new)` value
    /// replacement performed (including cascaded ones), so callers holding value maps outside
    /// the graph — the SSA builder's register state — can track them.
    pub fn try_eliminate_trivial_phi_with(
        &mut self,
        pid: PhiId,
        on_replace: &mut dyn FnMut(ValueId, ValueId),
    ) -> ValueId {
        let out = self.phis[pid].out;
        let mut worklist = vec![pid];
        let mut replacement = out;
        let mut first = true;
        while let Some(pid) = worklist.pop() {
            // Incomplete phis cannot be judged trivial: their operand lists are still growing.
            if self.phis[pid].removed || !self.phis[pid].completed {
                continue;
            }
            let phi_out = self.phis[pid].out;
            let Some(Some(same)) = self.phis[pid].trivial_operand() else {
                first = false;
                continue;
            };
            // Phi users of the eliminated value may now be trivial themselves; queue them before
            // the user sets are rewritten.
            worklist.extend(
                self.values[phi_out]
                    .phi_users
                    .iter()
                    .filter(|p| **p != pid),
            );
            self.replace_all_users_of(phi_out, same);
            self.remove_phi(pid);
            on_replace(phi_out, same);
            if first {
                replacement = same;
            } else if replacement == phi_out {
                // The value we were going to report has itself just been eliminated.
                replacement = same;
            }
            first = false;
        }
        replacement
    }

    /// Assign each attached instruction a monotonically increasing order number, in block order,
    /// stepping by two so a register allocator can number the moves it inserts between
    /// instructions.
    pub fn renumber(&mut self) {
        let mut next = 0;
        for b in 0..self.blocks.len() {
            for i in 0..self.blocks[BlockId::from_usize(b)].insts.len() {
                let iid = self.blocks[BlockId::from_usize(b)].insts[i];
                self.insts[iid].number = next;
                next += 2;
            }
        }
    }

    /// Check the graph invariants, returning the first violation. This is `Ok` by construction
    /// after any sequence of calls through the edit API; a violation means a pass went behind the
    /// API's back.
    pub fn validate(&self) -> Result<(), CompilationError> {
        let err = |msg: String| Err(CompilationError::Internal(msg));

        // The forward half of the def-use graph.
        let mut uses: Vec<Vec<InstId>> = vec![Vec::new(); self.values.len()];
        let mut debug_uses: Vec<Vec<InstId>> = vec![Vec::new(); self.values.len()];
        let mut phi_uses: Vec<Vec<PhiId>> = vec![Vec::new(); self.values.len()];
        for (bid, block) in self.blocks.iter_enumerated() {
            for (i, iid) in block.insts.iter().enumerate() {
                let data = &self.insts[*iid];
                if data.block != Some(bid) {
                    return err(format!("i{}: wrong block membership", usize::from(*iid)));
                }
                if block.insts.iter().filter(|x| **x == *iid).count() != 1 {
                    return err(format!("i{}: appears twice in its block", usize::from(*iid)));
                }
                if data.position.is_none() {
                    return err(format!("i{}: attached without position", usize::from(*iid)));
                }
                if data.inst.is_control_flow() && i != block.insts.len() - 1 {
                    return err(format!(
                        "i{}: control flow before the end of b{}",
                        usize::from(*iid),
                        usize::from(bid)
                    ));
                }
                for v in data.inst.in_values() {
                    if !uses[usize::from(v)].contains(iid) {
                        uses[usize::from(v)].push(*iid);
                    }
                }
                for v in &data.debug_values {
                    if !debug_uses[usize::from(*v)].contains(iid) {
                        debug_uses[usize::from(*v)].push(*iid);
                    }
                }
            }
            for pid in &block.phis {
                let phi = &self.phis[*pid];
                if phi.removed {
                    return err(format!("phi{}: removed but still attached", usize::from(*pid)));
                }
                if phi.block != bid {
                    return err(format!("phi{}: wrong block membership", usize::from(*pid)));
                }
                if phi.completed && phi.operands.len() != block.preds.len() {
                    return err(format!(
                        "phi{}: {} operands for {} predecessors",
                        usize::from(*pid),
                        phi.operands.len(),
                        block.preds.len()
                    ));
                }
                let out_ty = self.values[phi.out].ty();
                for v in &phi.operands {
                    if !phi_uses[usize::from(*v)].contains(pid) {
                        phi_uses[usize::from(*v)].push(*pid);
                    }
                    if self.values[*v].ty().meet(out_ty).is_none() {
                        return err(format!(
                            "phi{}: operand v{} type {} incompatible with {}",
                            usize::from(*pid),
                            usize::from(*v),
                            self.values[*v].ty(),
                            out_ty
                        ));
                    }
                }
            }
        }

        // The user sets must mirror the forward half exactly.
        for (vid, value) in self.values.iter_enumerated() {
            let claimed: Vec<InstId> = value.users().to_vec();
            let actual = &uses[usize::from(vid)];
            if claimed.len() != actual.len() || !actual.iter().all(|i| claimed.contains(i)) {
                return err(format!(
                    "v{}: user set {claimed:?} does not match operand occurrences {actual:?}",
                    usize::from(vid)
                ));
            }
            let claimed: Vec<PhiId> = value.phi_users().to_vec();
            let actual: Vec<PhiId> = phi_uses[usize::from(vid)]
                .iter()
                .filter(|p| {
                    // A self-operand of a removed phi has already been cleared.
                    !self.phis[**p].removed
                })
                .copied()
                .collect();
            if claimed.len() != actual.len() || !actual.iter().all(|p| claimed.contains(p)) {
                return err(format!(
                    "v{}: phi-user set {claimed:?} does not match operand occurrences {actual:?}",
                    usize::from(vid)
                ));
            }
            let claimed: Vec<InstId> = value.debug_users().to_vec();
            let actual = &debug_uses[usize::from(vid)];
            if claimed.len() != actual.len() || !actual.iter().all(|i| claimed.contains(i)) {
                return err(format!(
                    "v{}: debug-user set {claimed:?} does not match {actual:?}",
                    usize::from(vid)
                ));
            }
            match value.definition() {
                Definition::Inst(iid) => {
                    if self.insts[iid].out != Some(vid) {
                        return err(format!("v{}: definition mismatch", usize::from(vid)));
                    }
                }
                Definition::Phi(pid) => {
                    if self.phis[pid].out != vid {
                        return err(format!("v{}: definition mismatch", usize::from(vid)));
                    }
                }
            }
        }
        Ok(())
    }

    /// Validate in debug builds, panicking on a violation; compiled to nothing in release builds.
    pub fn debug_validate(&self) {
        #[cfg(debug_assertions)]
        if let Err(e) = self.validate() {
            panic!("{e}");
        }
    }

    fn fmt_value_def(&self, v: ValueId) -> String {
        format!("v{}: {}", usize::from(v), self.values[v].ty())
    }

    pub fn to_string(&self) -> String {
        let mut out = Vec::new();
        out.push(format!("method {}", self.factory.method_to_string(self.method)));
        for (bid, block) in self.blocks.iter_enumerated() {
            let preds = block
                .preds
                .iter()
                .map(|p| format!("b{}", usize::from(*p)))
                .collect::<Vec<_>>()
                .join(", ");
            out.push(format!("b{}: // preds: [{}]", usize::from(bid), preds));
            for pid in &block.phis {
                let phi = &self.phis[*pid];
                let ops = phi
                    .operands
                    .iter()
                    .map(|v| format!("v{}", usize::from(*v)))
                    .collect::<Vec<_>>()
                    .join(", ");
                out.push(format!("  {} = phi({})", self.fmt_value_def(phi.out), ops));
            }
            for iid in &block.insts {
                let data = &self.insts[*iid];
                let mut line = match data.out {
                    Some(v) => format!(
                        "  {} = {}",
                        self.fmt_value_def(v),
                        data.inst.to_display_string(&self.factory)
                    ),
                    None => format!("  {}", data.inst.to_display_string(&self.factory)),
                };
                if data.inst.is_control_flow() && !block.succs.is_empty() {
                    let succs = block
                        .succs
                        .iter()
                        .map(|s| format!("b{}", usize::from(*s)))
                        .collect::<Vec<_>>()
                        .join(", ");
                    line.push_str(&format!(" -> [{succs}]"));
                }
                out.push(line);
            }
        }
        out.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{
        inst::{Add, ConstNumber},
        types::NumericType,
    };

    fn test_code() -> IrCode {
        let mut factory = ItemFactory::new();
        let m = factory.intern_method("Lcom/example/A;", "f", "I", &[]);
        IrCode::new(Arc::new(factory), m)
    }

    fn const_int(code: &mut IrCode, b: BlockId, v: i32) -> ValueId {
        code.add_inst(
            b,
            ConstNumber {
                ty: ValueType::Int,
                bits: i64::from(v),
            }
            .into(),
            Some(ValueType::Int),
            Position::none(),
        )
        .1
        .unwrap()
    }

    #[test]
    fn user_sets_track_mutations() {
        let mut code = test_code();
        let b = code.create_block();
        let c1 = const_int(&mut code, b, 1);
        let c2 = const_int(&mut code, b, 2);
        let (add, sum) = code.add_inst(
            b,
            Add {
                ty: NumericType::Int,
                lhs: c1,
                rhs: c2,
            }
            .into(),
            Some(ValueType::Int),
            Position::none(),
        );
        code.validate().unwrap();
        assert_eq!(code.value(c1).users(), &[add]);
        assert_eq!(code.value(c2).users(), &[add]);

        // Replacing c2 with c1 everywhere turns the add into `c1 + c1` and empties c2's users.
        code.replace_all_users_of(c2, c1);
        code.validate().unwrap();
        assert_eq!(code.value(c1).users(), &[add]);
        assert!(code.value(c2).users().is_empty());
        let Inst::Add(a) = &code.inst(add).inst else {
            panic!()
        };
        assert_eq!(a.lhs, a.rhs);

        // Removing the add empties c1's users too; then the unused constants can go.
        code.remove_inst(add);
        code.validate().unwrap();
        assert!(!code.value(c1).is_used());
        assert!(sum.is_some());
    }

    #[test]
    #[should_panic(expected = "still used")]
    fn removing_a_used_instruction_panics() {
        let mut code = test_code();
        let b = code.create_block();
        let c1 = const_int(&mut code, b, 1);
        let Definition::Inst(c1_def) = code.value(c1).definition() else {
            panic!()
        };
        code.add_inst(
            b,
            Add {
                ty: NumericType::Int,
                lhs: c1,
                rhs: c1,
            }
            .into(),
            Some(ValueType::Int),
            Position::none(),
        );
        code.remove_inst(c1_def);
    }

    #[test]
    fn trivial_phi_elimination_cascades() {
        // b0 -> b1 (three edges via b2, b3, b4 would be overkill: give b1 three predecessors).
        let mut code = test_code();
        let b0 = code.create_block();
        let b1 = code.create_block();
        let b2 = code.create_block();
        let b3 = code.create_block();
        code.add_edge(b0, b3);
        code.add_edge(b1, b3);
        code.add_edge(b2, b3);
        let v1 = const_int(&mut code, b0, 1);
        let v2 = const_int(&mut code, b1, 1);

        // phi0 = phi(v1, v2, v1); phi1 = phi(phi0, phi0, phi1) reads it.
        let phi0 = code.add_phi(b3, ValueType::Int);
        code.append_phi_operand(phi0, v1);
        code.append_phi_operand(phi0, v2);
        code.append_phi_operand(phi0, v1);
        code.mark_phi_completed(phi0);
        let phi0_out = code.phi(phi0).out;
        let phi1 = code.add_phi(b3, ValueType::Int);
        let phi1_out = code.phi(phi1).out;
        code.append_phi_operand(phi1, phi0_out);
        code.append_phi_operand(phi1, phi0_out);
        code.append_phi_operand(phi1, phi1_out);
        code.mark_phi_completed(phi1);
        // A user so phi1 is observably rewritten.
        let (user, _) = code.add_inst(
            b3,
            Add {
                ty: NumericType::Int,
                lhs: phi1_out,
                rhs: phi1_out,
            }
            .into(),
            Some(ValueType::Int),
            Position::none(),
        );
        code.validate().unwrap();

        // Not yet trivial: v1 and v2 are distinct values.
        assert_eq!(code.try_eliminate_trivial_phi(phi0), phi0_out);
        // Once v2 is replaced by v1, phi0 becomes phi(v1, v1, v1): eliminating it must cascade
        // into phi1 (which becomes phi(v1, v1, self)) and retarget the add to v1.
        code.replace_all_users_of(v2, v1);
        assert_eq!(code.try_eliminate_trivial_phi(phi0), v1);
        code.validate().unwrap();
        assert!(code.phi(phi0).removed);
        assert!(code.phi(phi1).removed);
        assert!(code.block(b3).phis().is_empty());
        let Inst::Add(a) = &code.inst(user).inst else {
            panic!()
        };
        assert_eq!((a.lhs, a.rhs), (v1, v1));
        // Phi minimality: no non-removed phi in the graph remains trivially eliminable.
        for pid in 0..code.phis.len() {
            let pid = PhiId::from_usize(pid);
            if !code.phi(pid).removed {
                assert!(matches!(code.phi(pid).trivial_operand(), None | Some(None)));
            }
        }
    }

    #[test]
    fn self_referencing_phi_cycle_is_left_in_place() {
        let mut code = test_code();
        let b0 = code.create_block();
        // An unreachable single-block loop: the phi's only operand is itself.
        code.add_edge(b0, b0);
        let phi = code.add_phi(b0, ValueType::Int);
        let out = code.phi(phi).out;
        code.append_phi_operand(phi, out);
        code.mark_phi_completed(phi);
        assert_eq!(code.try_eliminate_trivial_phi(phi), out);
        assert!(!code.phi(phi).removed);
        code.validate().unwrap();
    }

    #[test]
    fn renumbering_is_monotonic_with_gaps() {
        let mut code = test_code();
        let b = code.create_block();
        const_int(&mut code, b, 1);
        const_int(&mut code, b, 2);
        code.renumber();
        let ns: Vec<u32> = code.block(b).insts().iter().map(|i| code.inst(*i).number()).collect();
        assert_eq!(ns, vec![0, 2]);
    }

    #[test]
    #[should_panic(expected = "set-once")]
    fn position_is_set_once() {
        let mut code = test_code();
        let b = code.create_block();
        let (iid, _) = code.add_inst(
            b,
            ConstNumber {
                ty: ValueType::Int,
                bits: 0,
            }
            .into(),
            Some(ValueType::Int),
            Position::none(),
        );
        code.inst_mut(iid).set_position(Position::at(7));
    }
}
