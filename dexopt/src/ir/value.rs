//! SSA values and phis.
//!
//! Values and phis live in arenas on [IrCode](super::code::IrCode) and are referenced by plain
//! [ValueId]/[PhiId] handles. A value records which instruction or phi defines it and which
//! instructions and phis read it. The user sets are the *backward* half of the def-use graph;
//! the forward half is the operand lists held by the instructions and phis themselves. Keeping
//! the two halves in sync is the job of `IrCode`'s edit API — nothing else may touch the user
//! sets, which is why their mutators are `pub(crate)` and live behind that API.

use crate::{
    factory::{StringId, TypeId},
    ir::{
        code::{BlockId, InstId},
        types::ValueType,
    },
};
use smallvec::SmallVec;

index_vec::define_index_type! {
    /// A value's handle, which doubles as its unique, monotonically increasing value number.
    pub struct ValueId = u32;
}

index_vec::define_index_type! {
    pub struct PhiId = u32;
}

/// What defines a value. Phis self-define; everything else is the out-value of exactly one
/// instruction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Definition {
    Inst(InstId),
    Phi(PhiId),
}

/// Debug metadata tying a value to a source-level local variable.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LocalInfo {
    pub name: StringId,
    pub ty: TypeId,
}

#[derive(Debug)]
pub struct Value {
    ty: ValueType,
    definition: Definition,
    pub(crate) users: SmallVec<[InstId; 4]>,
    pub(crate) phi_users: SmallVec<[PhiId; 2]>,
    pub(crate) debug_users: SmallVec<[InstId; 2]>,
    can_be_null: bool,
    pub local: Option<LocalInfo>,
}

impl Value {
    pub(crate) fn new(ty: ValueType, definition: Definition) -> Self {
        Self {
            ty,
            definition,
            users: SmallVec::new(),
            phi_users: SmallVec::new(),
            debug_users: SmallVec::new(),
            // Only object-typed values can be null, and they are assumed nullable until an
            // analysis proves otherwise.
            can_be_null: matches!(ty, ValueType::Object | ValueType::IntOrFloatOrNull),
            local: None,
        }
    }

    pub fn ty(&self) -> ValueType {
        self.ty
    }

    /// Refine this value's type. The new type must be reachable from the old one via
    /// [ValueType::meet]; callers are expected to have computed it that way.
    pub(crate) fn refine_ty(&mut self, ty: ValueType) {
        debug_assert_eq!(self.ty.meet(ty), Some(ty));
        self.ty = ty;
        if !matches!(ty, ValueType::Object | ValueType::IntOrFloatOrNull) {
            self.can_be_null = false;
        }
    }

    pub fn definition(&self) -> Definition {
        self.definition
    }

    pub fn is_phi(&self) -> bool {
        matches!(self.definition, Definition::Phi(_))
    }

    pub fn users(&self) -> &[InstId] {
        &self.users
    }

    pub fn phi_users(&self) -> &[PhiId] {
        &self.phi_users
    }

    pub fn debug_users(&self) -> &[InstId] {
        &self.debug_users
    }

    /// True if anything reads this value, including debug reads: a value with only debug users
    /// must stay materialized for the debugger.
    pub fn is_used(&self) -> bool {
        !self.users.is_empty() || !self.phi_users.is_empty() || !self.debug_users.is_empty()
    }

    pub fn can_be_null(&self) -> bool {
        self.can_be_null
    }

    /// Mark this value as never null. Monotonic: there is deliberately no way back, so an
    /// analysis can never "unlearn" non-nullness.
    pub fn mark_never_null(&mut self) {
        self.can_be_null = false;
    }
}

/// A merge point at the head of a block with multiple predecessors. `operands[i]` is the value
/// flowing in over `preds[i]`, in the same order as the block's predecessor list.
#[derive(Debug)]
pub struct Phi {
    pub block: BlockId,
    pub out: ValueId,
    pub(crate) operands: SmallVec<[ValueId; 2]>,
    /// Phis created while their block's predecessors are not yet all known start incomplete and
    /// are completed exactly once, at block seal.
    pub(crate) completed: bool,
    /// Set when the phi has been eliminated and detached from its block. The arena slot is kept
    /// so outstanding [PhiId]s stay valid; a removed phi must never be read again.
    pub(crate) removed: bool,
}

impl Phi {
    pub fn operands(&self) -> &[ValueId] {
        &self.operands
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// The single distinct operand this phi would be replaced by if it is trivial:
    /// `Some(Some(v))` for an eliminable phi, `Some(None)` for the degenerate all-self-references
    /// case, `None` for a genuine (non-trivial) phi. Self-references are `operands[i] == out`.
    pub fn trivial_operand(&self) -> Option<Option<ValueId>> {
        let mut same: Option<ValueId> = None;
        for &op in &self.operands {
            if op == self.out {
                continue;
            }
            match same {
                None => same = Some(op),
                Some(s) if s == op => (),
                Some(_) => return None,
            }
        }
        Some(same)
    }
}
