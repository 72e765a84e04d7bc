//! The instruction taxonomy.
//!
//! Every instruction is a struct of its own kind, collected into the closed [Inst] enum. Operands
//! are [ValueId]s; the out-value, position, owning block, and order number live in the
//! [InstrData](super::code::InstrData) wrapper so that they are represented once rather than per
//! kind. Pattern matching on [Inst] replaces the boolean-probe-then-downcast idiom an open class
//! hierarchy would need, and gives exhaustiveness checking in both lowering backends.
//!
//! Each kind implements [InstT], which carries the per-instruction contract:
//!
//! * *Identity*: [InstT::identical_same_kind] / [InstT::compare_same_kind] over the non-operand,
//!   non-position state. Use the [Inst::identical_non_value_non_position_parts] /
//!   [Inst::compare_non_value_parts] wrappers, which order across kinds first. The two must
//!   agree: `compare == Equal` iff `identical`.
//! * *Effects*: [InstKind::can_throw] is the static per-kind classification;
//!   [InstT::instance_can_throw] refines it per instance (e.g. a division by a nonzero constant
//!   cannot throw). [InstT::can_be_dead_code] defaults to "removable iff this instance cannot
//!   throw" and is overridden by kinds with externally visible effects.
//! * *Null semantics*: [InstT::throws_npe_if_value_is_null].
//! * *Register ceilings*: [InstT::max_in_value_register] / [InstT::max_out_value_register] give
//!   the largest register index the register-machine encoding of this kind can express (the
//!   4-bit/8-bit/16-bit tiers). Kinds with no value in the queried role panic: asking is a bug in
//!   the calling pass.
//! * *Inlining*: [InstT::inlining_constraint].
//! * *Evaluation*: [InstT::evaluate] over the constant lattice.
//!
//! Lowering itself deliberately does *not* live here: the two backends
//! ([crate::dex::lower], [crate::cf::lower]) each hold an exhaustive match over [Inst], so that a
//! kind with no encoding in one backend fails loudly there rather than silently no-opping.
//!
//! The kinds `NewArrayFilledData` and `InvokeNewArray` exist only in the register machine; the
//! stack-manipulation kinds (`Load`, `Store`, `Pop`, `Dup`, `Dup2`, `Swap`) are created by
//! load/store insertion and exist only in the stack machine. Register-width queries on the
//! stack-only kinds panic for the same reason backend mismatches do.

use crate::{
    appinfo::{AppInfo, Constraint},
    factory::{FieldId, ItemFactory, MethodId, StringId, TypeId},
    ir::{
        code::IrCode,
        types::{
            Bias, ConstValue, IfKind, LatticeElement, MemberType, MonitorKind, NumericType,
            ValueType,
        },
        value::ValueId,
    },
};
use enum_dispatch::enum_dispatch;
use smallvec::{SmallVec, smallvec};
use std::cmp::Ordering;
use strum::{EnumCount, EnumDiscriminants};

/// The largest register index encodable in a 4-bit register field.
pub const U4BIT_MAX: u32 = 0xf;
/// The largest register index encodable in an 8-bit register field.
pub const U8BIT_MAX: u32 = 0xff;
/// The largest register index encodable in a 16-bit register field.
pub const U16BIT_MAX: u32 = 0xffff;

/// An identity another subsystem may need to register reachability for (tree shaking visits
/// these without seeing any of the graph's internals).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Reference {
    String(StringId),
    Type(TypeId),
    Field(FieldId),
    Method(MethodId),
}

fn vstr(v: ValueId) -> String {
    format!("v{}", usize::from(v))
}

fn vlist(vs: &[ValueId]) -> String {
    vs.iter()
        .map(|v| vstr(*v))
        .collect::<Vec<_>>()
        .join(", ")
}

/// The trait every instruction kind conforms to. See the module docs for the contract.
#[enum_dispatch]
pub trait InstT: std::fmt::Debug {
    /// This instruction's operands, in consumption order (for the stack backend, deepest operand
    /// first).
    fn in_values(&self) -> SmallVec<[ValueId; 2]>;

    /// Apply `map` to each operand, mutating `self` with the result.
    fn rewrite_values(&mut self, map: &mut dyn FnMut(ValueId) -> ValueId);

    /// Is `other` — which must be the same kind as `self` — identical to `self` ignoring
    /// operands and position?
    fn identical_same_kind(&self, other: &Inst) -> bool;

    /// Total order over the state [InstT::identical_same_kind] compares. `other` must be the
    /// same kind as `self`.
    fn compare_same_kind(&self, other: &Inst) -> Ordering;

    /// Can this particular instruction throw? At most as often true as
    /// [InstKind::can_throw]; an instance may be provably safe even when its kind can throw.
    fn instance_can_throw(&self, _code: &IrCode) -> bool {
        false
    }

    /// May this instruction be removed if its out-value is unused? The default — removable iff
    /// this instance cannot throw — is overridden by kinds with externally visible side effects.
    fn can_be_dead_code(&self, code: &IrCode) -> bool {
        !self.instance_can_throw(code)
    }

    /// Does this instruction dereference `v`, so that it throws a `NullPointerException`
    /// whenever `v` is null?
    fn throws_npe_if_value_is_null(&self, _v: ValueId) -> bool {
        false
    }

    /// The largest register index the register-machine encoding of this kind allows for its
    /// operands.
    ///
    /// # Panics
    ///
    /// If this kind has no operands, or no register-machine encoding.
    fn max_in_value_register(&self, _code: &IrCode) -> u32 {
        panic!("{self:?} has no in-values");
    }

    /// The largest register index the register-machine encoding of this kind allows for its
    /// result.
    ///
    /// # Panics
    ///
    /// If this kind has no out-value, or no register-machine encoding.
    fn max_out_value_register(&self) -> u32 {
        panic!("{self:?} has no out-value");
    }

    /// Under what constraint may this instruction be moved into `context` by inlining?
    fn inlining_constraint(
        &self,
        _appinfo: &AppInfo,
        _factory: &ItemFactory,
        _context: TypeId,
    ) -> Constraint {
        Constraint::Always
    }

    /// Evaluate this instruction over the constant lattice. `get` supplies the lattice element
    /// currently known for any value.
    fn evaluate(
        &self,
        _code: &IrCode,
        _get: &dyn Fn(ValueId) -> LatticeElement,
    ) -> LatticeElement {
        LatticeElement::Unknown
    }

    /// Visit each external identity this instruction references.
    fn for_each_reference(&self, _f: &mut dyn FnMut(Reference)) {}

    /// Render this instruction (excluding its out-value, which the code printer prefixes).
    fn to_display_string(&self, factory: &ItemFactory) -> String;
}

#[enum_dispatch(InstT)]
#[derive(Clone, Debug, EnumCount, EnumDiscriminants)]
#[strum_discriminants(name(InstKind), derive(PartialOrd, Ord, Hash))]
pub enum Inst {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Ushr,
    Neg,
    Not,
    NumberConversion,
    Cmp,
    If,
    Goto,
    Switch,
    Return,
    Throw,
    ConstNumber,
    ConstString,
    ConstClass,
    Argument,
    Move,
    ArrayLength,
    NewArrayEmpty,
    NewArrayFilledData,
    InvokeNewArray,
    ArrayGet,
    ArrayPut,
    InstanceGet,
    InstancePut,
    StaticGet,
    StaticPut,
    NewInstance,
    CheckCast,
    InstanceOf,
    Monitor,
    InvokeVirtual,
    InvokeInterface,
    InvokeDirect,
    InvokeStatic,
    InvokeSuper,
    DebugPosition,
    DebugLocalWrite,
    DebugLocalRead,
    Load,
    Store,
    Pop,
    Dup,
    Dup2,
    Swap,
}

// An `Inst` is carried in every `InstrData`; keep it from growing silently.
static_assertions::const_assert!(std::mem::size_of::<Inst>() <= 64);

impl Inst {
    pub fn kind(&self) -> InstKind {
        InstKind::from(self)
    }

    /// True iff `other` is the same kind with the same non-operand, non-position state.
    pub fn identical_non_value_non_position_parts(&self, other: &Inst) -> bool {
        self.kind() == other.kind() && self.identical_same_kind(other)
    }

    /// Total order over kinds and their non-operand state, for value-numbering/sorting passes.
    /// Agrees with [Inst::identical_non_value_non_position_parts]: `Equal` iff identical.
    pub fn compare_non_value_parts(&self, other: &Inst) -> Ordering {
        self.kind()
            .cmp(&other.kind())
            .then_with(|| self.compare_same_kind(other))
    }

    /// Is this a block terminator?
    pub fn is_control_flow(&self) -> bool {
        matches!(
            self,
            Inst::If(_) | Inst::Goto(_) | Inst::Switch(_) | Inst::Return(_) | Inst::Throw(_)
        )
    }

    pub fn is_invoke(&self) -> bool {
        matches!(
            self,
            Inst::InvokeVirtual(_)
                | Inst::InvokeInterface(_)
                | Inst::InvokeDirect(_)
                | Inst::InvokeStatic(_)
                | Inst::InvokeSuper(_)
        )
    }
}

impl InstKind {
    /// The static can-this-kind-throw classification. Per-instance refinements live in
    /// [InstT::instance_can_throw].
    pub fn can_throw(self) -> bool {
        match self {
            // Integral division and remainder throw on a zero divisor.
            InstKind::Div | InstKind::Rem => true,
            // Anything that dereferences, allocates, or resolves can throw.
            InstKind::ArrayLength
            | InstKind::NewArrayEmpty
            | InstKind::NewArrayFilledData
            | InstKind::InvokeNewArray
            | InstKind::ArrayGet
            | InstKind::ArrayPut
            | InstKind::InstanceGet
            | InstKind::InstancePut
            | InstKind::StaticGet
            | InstKind::StaticPut
            | InstKind::NewInstance
            | InstKind::CheckCast
            | InstKind::Monitor
            | InstKind::InvokeVirtual
            | InstKind::InvokeInterface
            | InstKind::InvokeDirect
            | InstKind::InvokeStatic
            | InstKind::InvokeSuper
            | InstKind::Throw
            // String/class constants resolve against the constant pool.
            | InstKind::ConstString
            | InstKind::ConstClass => true,
            InstKind::Add
            | InstKind::Sub
            | InstKind::Mul
            | InstKind::And
            | InstKind::Or
            | InstKind::Xor
            | InstKind::Shl
            | InstKind::Shr
            | InstKind::Ushr
            | InstKind::Neg
            | InstKind::Not
            | InstKind::NumberConversion
            | InstKind::Cmp
            | InstKind::If
            | InstKind::Goto
            | InstKind::Switch
            | InstKind::Return
            | InstKind::ConstNumber
            | InstKind::Argument
            | InstKind::Move
            | InstKind::InstanceOf
            | InstKind::DebugPosition
            | InstKind::DebugLocalWrite
            | InstKind::DebugLocalRead
            | InstKind::Load
            | InstKind::Store
            | InstKind::Pop
            | InstKind::Dup
            | InstKind::Dup2
            | InstKind::Swap => false,
        }
    }
}

// Constant folding helpers. Int values are stored sign-extended in the low 32 bits; float values
// are stored as their bit pattern, zero-extended. All arithmetic follows the target's semantics:
// wrapping integers, masked shift distances, saturating float-to-int casts.

fn f32_of(bits: i64) -> f32 {
    f32::from_bits(bits as u32)
}

fn f64_of(bits: i64) -> f64 {
    f64::from_bits(bits as u64)
}

fn f32_bits(v: f32) -> i64 {
    i64::from(v.to_bits())
}

fn f64_bits(v: f64) -> i64 {
    v.to_bits() as i64
}

fn fold_add(ty: NumericType, a: i64, b: i64) -> Option<i64> {
    Some(match ty {
        NumericType::Int => i64::from((a as i32).wrapping_add(b as i32)),
        NumericType::Long => a.wrapping_add(b),
        NumericType::Float => f32_bits(f32_of(a) + f32_of(b)),
        NumericType::Double => f64_bits(f64_of(a) + f64_of(b)),
        _ => unreachable!(),
    })
}

fn fold_sub(ty: NumericType, a: i64, b: i64) -> Option<i64> {
    Some(match ty {
        NumericType::Int => i64::from((a as i32).wrapping_sub(b as i32)),
        NumericType::Long => a.wrapping_sub(b),
        NumericType::Float => f32_bits(f32_of(a) - f32_of(b)),
        NumericType::Double => f64_bits(f64_of(a) - f64_of(b)),
        _ => unreachable!(),
    })
}

fn fold_mul(ty: NumericType, a: i64, b: i64) -> Option<i64> {
    Some(match ty {
        NumericType::Int => i64::from((a as i32).wrapping_mul(b as i32)),
        NumericType::Long => a.wrapping_mul(b),
        NumericType::Float => f32_bits(f32_of(a) * f32_of(b)),
        NumericType::Double => f64_bits(f64_of(a) * f64_of(b)),
        _ => unreachable!(),
    })
}

fn fold_div(ty: NumericType, a: i64, b: i64) -> Option<i64> {
    match ty {
        NumericType::Int => {
            let b = b as i32;
            if b == 0 {
                return None;
            }
            Some(i64::from((a as i32).wrapping_div(b)))
        }
        NumericType::Long => {
            if b == 0 {
                return None;
            }
            Some(a.wrapping_div(b))
        }
        NumericType::Float => Some(f32_bits(f32_of(a) / f32_of(b))),
        NumericType::Double => Some(f64_bits(f64_of(a) / f64_of(b))),
        _ => unreachable!(),
    }
}

fn fold_rem(ty: NumericType, a: i64, b: i64) -> Option<i64> {
    match ty {
        NumericType::Int => {
            let b = b as i32;
            if b == 0 {
                return None;
            }
            Some(i64::from((a as i32).wrapping_rem(b)))
        }
        NumericType::Long => {
            if b == 0 {
                return None;
            }
            Some(a.wrapping_rem(b))
        }
        NumericType::Float => Some(f32_bits(f32_of(a) % f32_of(b))),
        NumericType::Double => Some(f64_bits(f64_of(a) % f64_of(b))),
        _ => unreachable!(),
    }
}

fn fold_and(ty: NumericType, a: i64, b: i64) -> Option<i64> {
    Some(match ty {
        NumericType::Int => i64::from((a as i32) & (b as i32)),
        NumericType::Long => a & b,
        _ => unreachable!(),
    })
}

fn fold_or(ty: NumericType, a: i64, b: i64) -> Option<i64> {
    Some(match ty {
        NumericType::Int => i64::from((a as i32) | (b as i32)),
        NumericType::Long => a | b,
        _ => unreachable!(),
    })
}

fn fold_xor(ty: NumericType, a: i64, b: i64) -> Option<i64> {
    Some(match ty {
        NumericType::Int => i64::from((a as i32) ^ (b as i32)),
        NumericType::Long => a ^ b,
        _ => unreachable!(),
    })
}

fn fold_shl(ty: NumericType, a: i64, b: i64) -> Option<i64> {
    Some(match ty {
        NumericType::Int => i64::from((a as i32).wrapping_shl(b as u32 & 0x1f)),
        NumericType::Long => a.wrapping_shl(b as u32 & 0x3f),
        _ => unreachable!(),
    })
}

fn fold_shr(ty: NumericType, a: i64, b: i64) -> Option<i64> {
    Some(match ty {
        NumericType::Int => i64::from((a as i32).wrapping_shr(b as u32 & 0x1f)),
        NumericType::Long => a.wrapping_shr(b as u32 & 0x3f),
        _ => unreachable!(),
    })
}

fn fold_ushr(ty: NumericType, a: i64, b: i64) -> Option<i64> {
    Some(match ty {
        NumericType::Int => i64::from(((a as u32) >> (b as u32 & 0x1f)) as i32),
        NumericType::Long => ((a as u64).wrapping_shr(b as u32 & 0x3f)) as i64,
        _ => unreachable!(),
    })
}

/// The shared visibility computation for invokes. Direct/static/super dispatch has a single
/// target; virtual/interface dispatch must take the minimum over *all* possible targets, since
/// inlining may commit to any of them being reachable from the new context.
fn invoke_constraint(
    appinfo: &AppInfo,
    factory: &ItemFactory,
    method: MethodId,
    context: TypeId,
    virtual_dispatch: bool,
) -> Constraint {
    let targets = if virtual_dispatch {
        appinfo.lookup_dispatch_targets(factory, method)
    } else {
        match appinfo.resolve_method(factory, method) {
            Some(t) => vec![t],
            None => Vec::new(),
        }
    };
    if targets.is_empty() {
        return Constraint::Never;
    }
    let mut result = Constraint::Always;
    for (class, def) in targets {
        let member = Constraint::for_member(def.access, class.ty, context);
        let holder = Constraint::for_member(class.access, class.ty, context);
        let both = member.min(holder);
        result = result.min(appinfo.refine_package_constraint(factory, both, class.ty, context));
    }
    result
}

/// The visibility constraint of referring to type `ty` from `context`. Types without a program
/// definition are library types, which are visible to everything that could see the reference in
/// the first place.
fn class_constraint(
    appinfo: &AppInfo,
    factory: &ItemFactory,
    ty: TypeId,
    context: TypeId,
) -> Constraint {
    match appinfo.definition_for(ty) {
        Some(class) => {
            let c = Constraint::for_member(class.access, ty, context);
            appinfo.refine_package_constraint(factory, c, ty, context)
        }
        None => Constraint::Always,
    }
}

fn field_constraint(
    appinfo: &AppInfo,
    factory: &ItemFactory,
    field: FieldId,
    context: TypeId,
) -> Constraint {
    match appinfo.resolve_field(factory, field) {
        Some((class, def)) => {
            let member = Constraint::for_member(def.access, class.ty, context);
            let holder = Constraint::for_member(class.access, class.ty, context);
            appinfo.refine_package_constraint(factory, member.min(holder), class.ty, context)
        }
        None => Constraint::Never,
    }
}

macro_rules! arith_binop {
    ($name:ident, $mnemonic:literal, commutative: $comm:literal, int_division: $division:literal,
     fold: $fold:path) => {
        #[derive(Clone, Debug)]
        pub struct $name {
            pub ty: NumericType,
            pub lhs: ValueId,
            pub rhs: ValueId,
        }

        impl $name {
            pub const COMMUTATIVE: bool = $comm;
        }

        impl InstT for $name {
            fn in_values(&self) -> SmallVec<[ValueId; 2]> {
                smallvec![self.lhs, self.rhs]
            }

            fn rewrite_values(&mut self, map: &mut dyn FnMut(ValueId) -> ValueId) {
                self.lhs = map(self.lhs);
                self.rhs = map(self.rhs);
            }

            fn identical_same_kind(&self, other: &Inst) -> bool {
                let Inst::$name(o) = other else { panic!() };
                self.ty == o.ty
            }

            fn compare_same_kind(&self, other: &Inst) -> Ordering {
                let Inst::$name(o) = other else { panic!() };
                self.ty.cmp(&o.ty)
            }

            fn instance_can_throw(&self, code: &IrCode) -> bool {
                if !$division || matches!(self.ty, NumericType::Float | NumericType::Double) {
                    return false;
                }
                // An integral division throws unless the divisor is a nonzero constant.
                match code.const_of(self.rhs) {
                    Some(c) => c.bits == 0,
                    None => true,
                }
            }

            fn max_in_value_register(&self, _code: &IrCode) -> u32 {
                U8BIT_MAX
            }

            fn max_out_value_register(&self) -> u32 {
                U8BIT_MAX
            }

            fn evaluate(
                &self,
                _code: &IrCode,
                get: &dyn Fn(ValueId) -> LatticeElement,
            ) -> LatticeElement {
                if let (Some(l), Some(r)) = (get(self.lhs).as_const(), get(self.rhs).as_const())
                    && let Some(bits) = $fold(self.ty, l.bits, r.bits)
                {
                    return LatticeElement::Const(ConstValue {
                        bits,
                        ty: self.ty.value_type(),
                    });
                }
                LatticeElement::Typed(self.ty.value_type())
            }

            fn to_display_string(&self, _factory: &ItemFactory) -> String {
                format!(
                    "{}-{} {}, {}",
                    $mnemonic,
                    self.ty,
                    vstr(self.lhs),
                    vstr(self.rhs)
                )
            }
        }
    };
}

arith_binop!(Add, "add", commutative: true, int_division: false, fold: fold_add);
arith_binop!(Sub, "sub", commutative: false, int_division: false, fold: fold_sub);
arith_binop!(Mul, "mul", commutative: true, int_division: false, fold: fold_mul);
arith_binop!(Div, "div", commutative: false, int_division: true, fold: fold_div);
arith_binop!(Rem, "rem", commutative: false, int_division: true, fold: fold_rem);
arith_binop!(And, "and", commutative: true, int_division: false, fold: fold_and);
arith_binop!(Or, "or", commutative: true, int_division: false, fold: fold_or);
arith_binop!(Xor, "xor", commutative: true, int_division: false, fold: fold_xor);
arith_binop!(Shl, "shl", commutative: false, int_division: false, fold: fold_shl);
arith_binop!(Shr, "shr", commutative: false, int_division: false, fold: fold_shr);
arith_binop!(Ushr, "ushr", commutative: false, int_division: false, fold: fold_ushr);

#[derive(Clone, Debug)]
pub struct Neg {
    pub ty: NumericType,
    pub src: ValueId,
}

impl InstT for Neg {
    fn in_values(&self) -> SmallVec<[ValueId; 2]> {
        smallvec![self.src]
    }

    fn rewrite_values(&mut self, map: &mut dyn FnMut(ValueId) -> ValueId) {
        self.src = map(self.src);
    }

    fn identical_same_kind(&self, other: &Inst) -> bool {
        let Inst::Neg(o) = other else { panic!() };
        self.ty == o.ty
    }

    fn compare_same_kind(&self, other: &Inst) -> Ordering {
        let Inst::Neg(o) = other else { panic!() };
        self.ty.cmp(&o.ty)
    }

    // Unary ops only have the two-nibble encoding.
    fn max_in_value_register(&self, _code: &IrCode) -> u32 {
        U4BIT_MAX
    }

    fn max_out_value_register(&self) -> u32 {
        U4BIT_MAX
    }

    fn evaluate(&self, _code: &IrCode, get: &dyn Fn(ValueId) -> LatticeElement) -> LatticeElement {
        if let Some(c) = get(self.src).as_const() {
            let bits = match self.ty {
                NumericType::Int => i64::from((c.bits as i32).wrapping_neg()),
                NumericType::Long => c.bits.wrapping_neg(),
                NumericType::Float => f32_bits(-f32_of(c.bits)),
                NumericType::Double => f64_bits(-f64_of(c.bits)),
                _ => unreachable!(),
            };
            return LatticeElement::Const(ConstValue {
                bits,
                ty: self.ty.value_type(),
            });
        }
        LatticeElement::Typed(self.ty.value_type())
    }

    fn to_display_string(&self, _factory: &ItemFactory) -> String {
        format!("neg-{} {}", self.ty, vstr(self.src))
    }
}

#[derive(Clone, Debug)]
pub struct Not {
    pub ty: NumericType,
    pub src: ValueId,
}

impl InstT for Not {
    fn in_values(&self) -> SmallVec<[ValueId; 2]> {
        smallvec![self.src]
    }

    fn rewrite_values(&mut self, map: &mut dyn FnMut(ValueId) -> ValueId) {
        self.src = map(self.src);
    }

    fn identical_same_kind(&self, other: &Inst) -> bool {
        let Inst::Not(o) = other else { panic!() };
        self.ty == o.ty
    }

    fn compare_same_kind(&self, other: &Inst) -> Ordering {
        let Inst::Not(o) = other else { panic!() };
        self.ty.cmp(&o.ty)
    }

    fn max_in_value_register(&self, _code: &IrCode) -> u32 {
        U4BIT_MAX
    }

    fn max_out_value_register(&self) -> u32 {
        U4BIT_MAX
    }

    fn evaluate(&self, _code: &IrCode, get: &dyn Fn(ValueId) -> LatticeElement) -> LatticeElement {
        if let Some(c) = get(self.src).as_const() {
            let bits = match self.ty {
                NumericType::Int => i64::from(!(c.bits as i32)),
                NumericType::Long => !c.bits,
                _ => unreachable!(),
            };
            return LatticeElement::Const(ConstValue {
                bits,
                ty: self.ty.value_type(),
            });
        }
        LatticeElement::Typed(self.ty.value_type())
    }

    fn to_display_string(&self, _factory: &ItemFactory) -> String {
        format!("not-{} {}", self.ty, vstr(self.src))
    }
}

/// A primitive conversion (`int-to-long`, `double-to-int`, …). Narrowing to the sub-int kinds is
/// represented as `from: Int, to: Byte` and so on.
#[derive(Clone, Debug)]
pub struct NumberConversion {
    pub from: NumericType,
    pub to: NumericType,
    pub src: ValueId,
}

impl InstT for NumberConversion {
    fn in_values(&self) -> SmallVec<[ValueId; 2]> {
        smallvec![self.src]
    }

    fn rewrite_values(&mut self, map: &mut dyn FnMut(ValueId) -> ValueId) {
        self.src = map(self.src);
    }

    fn identical_same_kind(&self, other: &Inst) -> bool {
        let Inst::NumberConversion(o) = other else {
            panic!()
        };
        self.from == o.from && self.to == o.to
    }

    fn compare_same_kind(&self, other: &Inst) -> Ordering {
        let Inst::NumberConversion(o) = other else {
            panic!()
        };
        self.from.cmp(&o.from).then(self.to.cmp(&o.to))
    }

    fn max_in_value_register(&self, _code: &IrCode) -> u32 {
        U4BIT_MAX
    }

    fn max_out_value_register(&self) -> u32 {
        U4BIT_MAX
    }

    fn evaluate(&self, _code: &IrCode, get: &dyn Fn(ValueId) -> LatticeElement) -> LatticeElement {
        if let Some(c) = get(self.src).as_const() {
            // Go via f64/i64, relying on `as` casts saturating and mapping NaN to zero, which are
            // exactly the target's float-to-int semantics.
            let bits = match (self.from, self.to) {
                (NumericType::Int, NumericType::Byte) => i64::from(c.bits as i8),
                (NumericType::Int, NumericType::Char) => i64::from(c.bits as u16),
                (NumericType::Int, NumericType::Short) => i64::from(c.bits as i16),
                (NumericType::Int, NumericType::Long) => c.bits as i32 as i64,
                (NumericType::Int, NumericType::Float) => f32_bits(c.bits as i32 as f32),
                (NumericType::Int, NumericType::Double) => f64_bits(c.bits as i32 as f64),
                (NumericType::Long, NumericType::Int) => i64::from(c.bits as i32),
                (NumericType::Long, NumericType::Float) => f32_bits(c.bits as f32),
                (NumericType::Long, NumericType::Double) => f64_bits(c.bits as f64),
                (NumericType::Float, NumericType::Int) => i64::from(f32_of(c.bits) as i32),
                (NumericType::Float, NumericType::Long) => f32_of(c.bits) as i64,
                (NumericType::Float, NumericType::Double) => f64_bits(f64::from(f32_of(c.bits))),
                (NumericType::Double, NumericType::Int) => i64::from(f64_of(c.bits) as i32),
                (NumericType::Double, NumericType::Long) => f64_of(c.bits) as i64,
                (NumericType::Double, NumericType::Float) => f32_bits(f64_of(c.bits) as f32),
                (from, to) => panic!("invalid conversion {from} -> {to}"),
            };
            return LatticeElement::Const(ConstValue {
                bits,
                ty: self.to.value_type(),
            });
        }
        LatticeElement::Typed(self.to.value_type())
    }

    fn to_display_string(&self, _factory: &ItemFactory) -> String {
        format!("{}-to-{} {}", self.from, self.to, vstr(self.src))
    }
}

/// The three-way comparison producing -1/0/1 into an int register. `bias` picks the result for
/// unordered float comparisons; it is [Bias::None] exactly for the long comparison.
#[derive(Clone, Debug)]
pub struct Cmp {
    pub ty: NumericType,
    pub bias: Bias,
    pub lhs: ValueId,
    pub rhs: ValueId,
}

impl Cmp {
    pub fn mnemonic(&self) -> String {
        match self.bias {
            Bias::None => format!("cmp-{}", self.ty),
            Bias::Gt => format!("cmpg-{}", self.ty),
            Bias::Lt => format!("cmpl-{}", self.ty),
        }
    }
}

impl InstT for Cmp {
    fn in_values(&self) -> SmallVec<[ValueId; 2]> {
        smallvec![self.lhs, self.rhs]
    }

    fn rewrite_values(&mut self, map: &mut dyn FnMut(ValueId) -> ValueId) {
        self.lhs = map(self.lhs);
        self.rhs = map(self.rhs);
    }

    fn identical_same_kind(&self, other: &Inst) -> bool {
        let Inst::Cmp(o) = other else { panic!() };
        self.ty == o.ty && self.bias == o.bias
    }

    fn compare_same_kind(&self, other: &Inst) -> Ordering {
        let Inst::Cmp(o) = other else { panic!() };
        self.ty.cmp(&o.ty).then(self.bias.cmp(&o.bias))
    }

    fn max_in_value_register(&self, _code: &IrCode) -> u32 {
        U8BIT_MAX
    }

    fn max_out_value_register(&self) -> u32 {
        U8BIT_MAX
    }

    fn evaluate(&self, _code: &IrCode, get: &dyn Fn(ValueId) -> LatticeElement) -> LatticeElement {
        if let (Some(l), Some(r)) = (get(self.lhs).as_const(), get(self.rhs).as_const()) {
            let result: i32 = match self.ty {
                NumericType::Long => match l.bits.cmp(&r.bits) {
                    Ordering::Less => -1,
                    Ordering::Equal => 0,
                    Ordering::Greater => 1,
                },
                NumericType::Float => {
                    let (a, b) = (f32_of(l.bits), f32_of(r.bits));
                    match a.partial_cmp(&b) {
                        Some(Ordering::Less) => -1,
                        Some(Ordering::Equal) => 0,
                        Some(Ordering::Greater) => 1,
                        None => match self.bias {
                            Bias::Gt => 1,
                            Bias::Lt => -1,
                            Bias::None => panic!("unordered cmp without bias"),
                        },
                    }
                }
                NumericType::Double => {
                    let (a, b) = (f64_of(l.bits), f64_of(r.bits));
                    match a.partial_cmp(&b) {
                        Some(Ordering::Less) => -1,
                        Some(Ordering::Equal) => 0,
                        Some(Ordering::Greater) => 1,
                        None => match self.bias {
                            Bias::Gt => 1,
                            Bias::Lt => -1,
                            Bias::None => panic!("unordered cmp without bias"),
                        },
                    }
                }
                _ => panic!("cmp of {}", self.ty),
            };
            return LatticeElement::Const(ConstValue::int(result));
        }
        LatticeElement::Typed(ValueType::Int)
    }

    fn to_display_string(&self, _factory: &ItemFactory) -> String {
        format!("{} {}, {}", self.mnemonic(), vstr(self.lhs), vstr(self.rhs))
    }
}

/// A conditional branch. `rhs` of `None` is the compare-against-zero form. The owning block's
/// successor list is `[taken-target, fallthrough]`.
#[derive(Clone, Debug)]
pub struct If {
    pub kind: IfKind,
    pub lhs: ValueId,
    pub rhs: Option<ValueId>,
}

impl If {
    pub fn is_zero_test(&self) -> bool {
        self.rhs.is_none()
    }
}

impl InstT for If {
    fn in_values(&self) -> SmallVec<[ValueId; 2]> {
        match self.rhs {
            Some(rhs) => smallvec![self.lhs, rhs],
            None => smallvec![self.lhs],
        }
    }

    fn rewrite_values(&mut self, map: &mut dyn FnMut(ValueId) -> ValueId) {
        self.lhs = map(self.lhs);
        if let Some(rhs) = self.rhs {
            self.rhs = Some(map(rhs));
        }
    }

    fn identical_same_kind(&self, other: &Inst) -> bool {
        let Inst::If(o) = other else { panic!() };
        self.kind == o.kind && self.rhs.is_some() == o.rhs.is_some()
    }

    fn compare_same_kind(&self, other: &Inst) -> Ordering {
        let Inst::If(o) = other else { panic!() };
        self.kind
            .cmp(&o.kind)
            .then(self.rhs.is_some().cmp(&o.rhs.is_some()))
    }

    fn can_be_dead_code(&self, _code: &IrCode) -> bool {
        false
    }

    fn max_in_value_register(&self, _code: &IrCode) -> u32 {
        // The two-register test packs both registers into nibbles; the zero test has a full byte.
        if self.is_zero_test() {
            U8BIT_MAX
        } else {
            U4BIT_MAX
        }
    }

    fn to_display_string(&self, _factory: &ItemFactory) -> String {
        match self.rhs {
            Some(rhs) => format!("if-{} {}, {}", self.kind, vstr(self.lhs), vstr(rhs)),
            None => format!("if-{}z {}", self.kind, vstr(self.lhs)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Goto;

impl InstT for Goto {
    fn in_values(&self) -> SmallVec<[ValueId; 2]> {
        smallvec![]
    }

    fn rewrite_values(&mut self, _map: &mut dyn FnMut(ValueId) -> ValueId) {}

    fn identical_same_kind(&self, _other: &Inst) -> bool {
        true
    }

    fn compare_same_kind(&self, _other: &Inst) -> Ordering {
        Ordering::Equal
    }

    fn can_be_dead_code(&self, _code: &IrCode) -> bool {
        false
    }

    fn to_display_string(&self, _factory: &ItemFactory) -> String {
        "goto".to_string()
    }
}

/// A multi-way branch on an int value. The owning block's successor list is
/// `[target(keys[0]), …, target(keys[n-1]), fallthrough]`.
#[derive(Clone, Debug)]
pub struct Switch {
    pub src: ValueId,
    pub keys: Box<[i32]>,
}

impl Switch {
    /// The packed encoding carries only the first key and jump table; it is exact when the keys
    /// are contiguous.
    pub fn is_packed(&self) -> bool {
        !self.keys.is_empty()
            && self
                .keys
                .windows(2)
                .all(|w| i64::from(w[1]) == i64::from(w[0]) + 1)
    }
}

impl InstT for Switch {
    fn in_values(&self) -> SmallVec<[ValueId; 2]> {
        smallvec![self.src]
    }

    fn rewrite_values(&mut self, map: &mut dyn FnMut(ValueId) -> ValueId) {
        self.src = map(self.src);
    }

    fn identical_same_kind(&self, other: &Inst) -> bool {
        let Inst::Switch(o) = other else { panic!() };
        self.keys == o.keys
    }

    fn compare_same_kind(&self, other: &Inst) -> Ordering {
        let Inst::Switch(o) = other else { panic!() };
        self.keys.cmp(&o.keys)
    }

    fn can_be_dead_code(&self, _code: &IrCode) -> bool {
        false
    }

    fn max_in_value_register(&self, _code: &IrCode) -> u32 {
        U8BIT_MAX
    }

    fn to_display_string(&self, _factory: &ItemFactory) -> String {
        format!("switch {}, keys={:?}", vstr(self.src), self.keys)
    }
}

/// `ty` is `Some` exactly when `src` is, and records the return width for opcode selection.
#[derive(Clone, Debug)]
pub struct Return {
    pub src: Option<ValueId>,
    pub ty: Option<ValueType>,
}

impl InstT for Return {
    fn in_values(&self) -> SmallVec<[ValueId; 2]> {
        match self.src {
            Some(src) => smallvec![src],
            None => smallvec![],
        }
    }

    fn rewrite_values(&mut self, map: &mut dyn FnMut(ValueId) -> ValueId) {
        if let Some(src) = self.src {
            self.src = Some(map(src));
        }
    }

    fn identical_same_kind(&self, other: &Inst) -> bool {
        let Inst::Return(o) = other else { panic!() };
        self.ty == o.ty && self.src.is_some() == o.src.is_some()
    }

    fn compare_same_kind(&self, other: &Inst) -> Ordering {
        let Inst::Return(o) = other else { panic!() };
        self.ty
            .cmp(&o.ty)
            .then(self.src.is_some().cmp(&o.src.is_some()))
    }

    fn can_be_dead_code(&self, _code: &IrCode) -> bool {
        false
    }

    fn max_in_value_register(&self, _code: &IrCode) -> u32 {
        match self.src {
            Some(_) => U8BIT_MAX,
            None => panic!("return-void has no in-values"),
        }
    }

    fn to_display_string(&self, _factory: &ItemFactory) -> String {
        match self.src {
            Some(src) => format!("return {}", vstr(src)),
            None => "return-void".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Throw {
    pub src: ValueId,
}

impl InstT for Throw {
    fn in_values(&self) -> SmallVec<[ValueId; 2]> {
        smallvec![self.src]
    }

    fn rewrite_values(&mut self, map: &mut dyn FnMut(ValueId) -> ValueId) {
        self.src = map(self.src);
    }

    fn identical_same_kind(&self, _other: &Inst) -> bool {
        true
    }

    fn compare_same_kind(&self, _other: &Inst) -> Ordering {
        Ordering::Equal
    }

    fn instance_can_throw(&self, _code: &IrCode) -> bool {
        true
    }

    fn can_be_dead_code(&self, _code: &IrCode) -> bool {
        false
    }

    fn throws_npe_if_value_is_null(&self, v: ValueId) -> bool {
        // Throwing a null exception reference throws NPE instead.
        v == self.src
    }

    fn max_in_value_register(&self, _code: &IrCode) -> u32 {
        U8BIT_MAX
    }

    fn to_display_string(&self, _factory: &ItemFactory) -> String {
        format!("throw {}", vstr(self.src))
    }
}

/// A number (or null-reference) constant. `bits` holds the value as raw bits: ints sign-extended,
/// f32 bit patterns zero-extended. The type may be imprecise right up until lowering, which
/// requires it refined.
#[derive(Clone, Debug)]
pub struct ConstNumber {
    pub ty: ValueType,
    pub bits: i64,
}

impl ConstNumber {
    pub fn is_zero(&self) -> bool {
        self.bits == 0
    }

    pub fn int_value(&self) -> i32 {
        self.bits as i32
    }

    /// The number of 16-bit code units the register-machine constant encoding of this value
    /// needs, given that the destination register is `reg`. This deliberately re-derives the
    /// encoding choice from the value alone so it can be computed before register allocation and
    /// cross-checked against the opcode variant lowering actually picks.
    pub fn encoded_units(&self, reg: u32) -> u32 {
        if self.ty.is_wide() {
            if self.bits == i64::from(self.bits as i16) {
                2
            } else if self.bits & 0xffff_ffff_ffff == 0 {
                2
            } else if self.bits == i64::from(self.bits as i32) {
                3
            } else {
                5
            }
        } else {
            let v = self.bits as i32;
            if reg <= U4BIT_MAX && v == i32::from(v as i8) && (-8..8).contains(&v) {
                1
            } else if v == i32::from(v as i16) {
                2
            } else if v & 0xffff == 0 {
                2
            } else {
                3
            }
        }
    }
}

impl InstT for ConstNumber {
    fn in_values(&self) -> SmallVec<[ValueId; 2]> {
        smallvec![]
    }

    fn rewrite_values(&mut self, _map: &mut dyn FnMut(ValueId) -> ValueId) {}

    fn identical_same_kind(&self, other: &Inst) -> bool {
        let Inst::ConstNumber(o) = other else { panic!() };
        self.ty == o.ty && self.bits == o.bits
    }

    fn compare_same_kind(&self, other: &Inst) -> Ordering {
        let Inst::ConstNumber(o) = other else { panic!() };
        self.ty.cmp(&o.ty).then(self.bits.cmp(&o.bits))
    }

    fn max_out_value_register(&self) -> u32 {
        U8BIT_MAX
    }

    fn evaluate(&self, _code: &IrCode, _get: &dyn Fn(ValueId) -> LatticeElement) -> LatticeElement {
        LatticeElement::Const(ConstValue {
            bits: self.bits,
            ty: self.ty,
        })
    }

    fn to_display_string(&self, _factory: &ItemFactory) -> String {
        match self.ty {
            ValueType::Float => format!("const {}f", f32_of(self.bits)),
            ValueType::Double => format!("const {}d", f64_of(self.bits)),
            ValueType::Object => "const null".to_string(),
            _ => format!("const {}", self.bits),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConstString {
    pub value: StringId,
}

impl InstT for ConstString {
    fn in_values(&self) -> SmallVec<[ValueId; 2]> {
        smallvec![]
    }

    fn rewrite_values(&mut self, _map: &mut dyn FnMut(ValueId) -> ValueId) {}

    fn identical_same_kind(&self, other: &Inst) -> bool {
        let Inst::ConstString(o) = other else { panic!() };
        self.value == o.value
    }

    fn compare_same_kind(&self, other: &Inst) -> Ordering {
        let Inst::ConstString(o) = other else { panic!() };
        self.value.cmp(&o.value)
    }

    fn instance_can_throw(&self, _code: &IrCode) -> bool {
        // Resolution of the string constant can fail at runtime.
        true
    }

    fn max_out_value_register(&self) -> u32 {
        U8BIT_MAX
    }

    fn evaluate(&self, _code: &IrCode, _get: &dyn Fn(ValueId) -> LatticeElement) -> LatticeElement {
        LatticeElement::Typed(ValueType::Object)
    }

    fn for_each_reference(&self, f: &mut dyn FnMut(Reference)) {
        f(Reference::String(self.value));
    }

    fn to_display_string(&self, factory: &ItemFactory) -> String {
        format!("const-string {:?}", factory.string(self.value))
    }
}

#[derive(Clone, Debug)]
pub struct ConstClass {
    pub ty: TypeId,
}

impl InstT for ConstClass {
    fn in_values(&self) -> SmallVec<[ValueId; 2]> {
        smallvec![]
    }

    fn rewrite_values(&mut self, _map: &mut dyn FnMut(ValueId) -> ValueId) {}

    fn identical_same_kind(&self, other: &Inst) -> bool {
        let Inst::ConstClass(o) = other else { panic!() };
        self.ty == o.ty
    }

    fn compare_same_kind(&self, other: &Inst) -> Ordering {
        let Inst::ConstClass(o) = other else { panic!() };
        self.ty.cmp(&o.ty)
    }

    fn instance_can_throw(&self, _code: &IrCode) -> bool {
        true
    }

    fn max_out_value_register(&self) -> u32 {
        U8BIT_MAX
    }

    fn inlining_constraint(
        &self,
        appinfo: &AppInfo,
        factory: &ItemFactory,
        context: TypeId,
    ) -> Constraint {
        class_constraint(appinfo, factory, self.ty, context)
    }

    fn evaluate(&self, _code: &IrCode, _get: &dyn Fn(ValueId) -> LatticeElement) -> LatticeElement {
        LatticeElement::Typed(ValueType::Object)
    }

    fn for_each_reference(&self, f: &mut dyn FnMut(Reference)) {
        f(Reference::Type(self.ty));
    }

    fn to_display_string(&self, factory: &ItemFactory) -> String {
        format!("const-class {}", factory.descriptor(self.ty))
    }
}

/// Binds incoming parameter `index` to a value. Argument instructions appear first in the entry
/// block, in parameter order, and nowhere else.
#[derive(Clone, Debug)]
pub struct Argument {
    pub index: u16,
}

impl InstT for Argument {
    fn in_values(&self) -> SmallVec<[ValueId; 2]> {
        smallvec![]
    }

    fn rewrite_values(&mut self, _map: &mut dyn FnMut(ValueId) -> ValueId) {}

    fn identical_same_kind(&self, other: &Inst) -> bool {
        let Inst::Argument(o) = other else { panic!() };
        self.index == o.index
    }

    fn compare_same_kind(&self, other: &Inst) -> Ordering {
        let Inst::Argument(o) = other else { panic!() };
        self.index.cmp(&o.index)
    }

    fn can_be_dead_code(&self, _code: &IrCode) -> bool {
        // Arguments define the frame layout; an unused argument still occupies its register.
        false
    }

    fn max_out_value_register(&self) -> u32 {
        U16BIT_MAX
    }

    fn to_display_string(&self, _factory: &ItemFactory) -> String {
        format!("arg {}", self.index)
    }
}

/// A register-to-register copy. These only survive to lowering when debug info pins a value to a
/// named local; otherwise copy propagation removes them.
#[derive(Clone, Debug)]
pub struct Move {
    pub src: ValueId,
}

impl InstT for Move {
    fn in_values(&self) -> SmallVec<[ValueId; 2]> {
        smallvec![self.src]
    }

    fn rewrite_values(&mut self, map: &mut dyn FnMut(ValueId) -> ValueId) {
        self.src = map(self.src);
    }

    fn identical_same_kind(&self, _other: &Inst) -> bool {
        true
    }

    fn compare_same_kind(&self, _other: &Inst) -> Ordering {
        Ordering::Equal
    }

    fn max_in_value_register(&self, _code: &IrCode) -> u32 {
        U16BIT_MAX
    }

    fn max_out_value_register(&self) -> u32 {
        U16BIT_MAX
    }

    fn evaluate(&self, _code: &IrCode, get: &dyn Fn(ValueId) -> LatticeElement) -> LatticeElement {
        get(self.src)
    }

    fn to_display_string(&self, _factory: &ItemFactory) -> String {
        format!("move {}", vstr(self.src))
    }
}

#[derive(Clone, Debug)]
pub struct ArrayLength {
    pub array: ValueId,
}

impl InstT for ArrayLength {
    fn in_values(&self) -> SmallVec<[ValueId; 2]> {
        smallvec![self.array]
    }

    fn rewrite_values(&mut self, map: &mut dyn FnMut(ValueId) -> ValueId) {
        self.array = map(self.array);
    }

    fn identical_same_kind(&self, _other: &Inst) -> bool {
        true
    }

    fn compare_same_kind(&self, _other: &Inst) -> Ordering {
        Ordering::Equal
    }

    fn instance_can_throw(&self, code: &IrCode) -> bool {
        code.value(self.array).can_be_null()
    }

    fn throws_npe_if_value_is_null(&self, v: ValueId) -> bool {
        v == self.array
    }

    fn max_in_value_register(&self, _code: &IrCode) -> u32 {
        U4BIT_MAX
    }

    fn max_out_value_register(&self) -> u32 {
        U4BIT_MAX
    }

    fn evaluate(&self, code: &IrCode, _get: &dyn Fn(ValueId) -> LatticeElement) -> LatticeElement {
        // The length of an array created with a constant size is that constant.
        if let Some(Inst::NewArrayEmpty(new_array)) = code.defining_inst(self.array)
            && let Some(c) = code.const_of(new_array.size)
        {
            return LatticeElement::Const(ConstValue::int(c.as_int()));
        }
        LatticeElement::Typed(ValueType::Int)
    }

    fn to_display_string(&self, _factory: &ItemFactory) -> String {
        format!("array-length {}", vstr(self.array))
    }
}

#[derive(Clone, Debug)]
pub struct NewArrayEmpty {
    pub ty: TypeId,
    pub size: ValueId,
}

impl InstT for NewArrayEmpty {
    fn in_values(&self) -> SmallVec<[ValueId; 2]> {
        smallvec![self.size]
    }

    fn rewrite_values(&mut self, map: &mut dyn FnMut(ValueId) -> ValueId) {
        self.size = map(self.size);
    }

    fn identical_same_kind(&self, other: &Inst) -> bool {
        let Inst::NewArrayEmpty(o) = other else { panic!() };
        self.ty == o.ty
    }

    fn compare_same_kind(&self, other: &Inst) -> Ordering {
        let Inst::NewArrayEmpty(o) = other else { panic!() };
        self.ty.cmp(&o.ty)
    }

    fn instance_can_throw(&self, code: &IrCode) -> bool {
        // A negative constant size always throws; a non-negative one still can (allocation), so
        // only a provably absent allocation failure would let us refine this to false — which we
        // never can.
        let _ = code;
        true
    }

    fn max_in_value_register(&self, _code: &IrCode) -> u32 {
        U4BIT_MAX
    }

    fn max_out_value_register(&self) -> u32 {
        U4BIT_MAX
    }

    fn inlining_constraint(
        &self,
        appinfo: &AppInfo,
        factory: &ItemFactory,
        context: TypeId,
    ) -> Constraint {
        class_constraint(appinfo, factory, self.ty, context)
    }

    fn evaluate(&self, _code: &IrCode, _get: &dyn Fn(ValueId) -> LatticeElement) -> LatticeElement {
        LatticeElement::Typed(ValueType::Object)
    }

    fn for_each_reference(&self, f: &mut dyn FnMut(Reference)) {
        f(Reference::Type(self.ty));
    }

    fn to_display_string(&self, factory: &ItemFactory) -> String {
        format!(
            "new-array-empty {}, {}",
            factory.descriptor(self.ty),
            vstr(self.size)
        )
    }
}

/// The fill-array-data payload form: bulk-initializes a freshly created primitive array from
/// an inline data table. This is a register-machine construct with no stack-machine equivalent;
/// the class-file backend refuses it loudly.
#[derive(Clone, Debug)]
pub struct NewArrayFilledData {
    pub array: ValueId,
    pub element_width: u16,
    pub size: u32,
    pub data: Box<[u16]>,
}

impl InstT for NewArrayFilledData {
    fn in_values(&self) -> SmallVec<[ValueId; 2]> {
        smallvec![self.array]
    }

    fn rewrite_values(&mut self, map: &mut dyn FnMut(ValueId) -> ValueId) {
        self.array = map(self.array);
    }

    fn identical_same_kind(&self, other: &Inst) -> bool {
        let Inst::NewArrayFilledData(o) = other else {
            panic!()
        };
        self.element_width == o.element_width && self.size == o.size && self.data == o.data
    }

    fn compare_same_kind(&self, other: &Inst) -> Ordering {
        let Inst::NewArrayFilledData(o) = other else {
            panic!()
        };
        self.element_width
            .cmp(&o.element_width)
            .then(self.size.cmp(&o.size))
            .then(self.data.cmp(&o.data))
    }

    fn instance_can_throw(&self, _code: &IrCode) -> bool {
        true
    }

    fn can_be_dead_code(&self, _code: &IrCode) -> bool {
        // Writes through its array operand.
        false
    }

    fn throws_npe_if_value_is_null(&self, v: ValueId) -> bool {
        v == self.array
    }

    fn max_in_value_register(&self, _code: &IrCode) -> u32 {
        U8BIT_MAX
    }

    fn to_display_string(&self, _factory: &ItemFactory) -> String {
        format!(
            "fill-array-data {}, width={}, size={}",
            vstr(self.array),
            self.element_width,
            self.size
        )
    }
}

/// `filled-new-array`: creates an array from up to five argument registers. Like
/// [NewArrayFilledData] this is register-machine only.
#[derive(Clone, Debug)]
pub struct InvokeNewArray {
    pub ty: TypeId,
    pub args: SmallVec<[ValueId; 4]>,
}

impl InstT for InvokeNewArray {
    fn in_values(&self) -> SmallVec<[ValueId; 2]> {
        self.args.iter().copied().collect()
    }

    fn rewrite_values(&mut self, map: &mut dyn FnMut(ValueId) -> ValueId) {
        for arg in self.args.iter_mut() {
            *arg = map(*arg);
        }
    }

    fn identical_same_kind(&self, other: &Inst) -> bool {
        let Inst::InvokeNewArray(o) = other else {
            panic!()
        };
        self.ty == o.ty && self.args.len() == o.args.len()
    }

    fn compare_same_kind(&self, other: &Inst) -> Ordering {
        let Inst::InvokeNewArray(o) = other else {
            panic!()
        };
        self.ty.cmp(&o.ty).then(self.args.len().cmp(&o.args.len()))
    }

    fn instance_can_throw(&self, _code: &IrCode) -> bool {
        true
    }

    fn max_in_value_register(&self, _code: &IrCode) -> u32 {
        U4BIT_MAX
    }

    fn max_out_value_register(&self) -> u32 {
        U8BIT_MAX
    }

    fn inlining_constraint(
        &self,
        appinfo: &AppInfo,
        factory: &ItemFactory,
        context: TypeId,
    ) -> Constraint {
        class_constraint(appinfo, factory, self.ty, context)
    }

    fn evaluate(&self, _code: &IrCode, _get: &dyn Fn(ValueId) -> LatticeElement) -> LatticeElement {
        LatticeElement::Typed(ValueType::Object)
    }

    fn for_each_reference(&self, f: &mut dyn FnMut(Reference)) {
        f(Reference::Type(self.ty));
    }

    fn to_display_string(&self, factory: &ItemFactory) -> String {
        format!(
            "filled-new-array {} ({})",
            factory.descriptor(self.ty),
            vlist(&self.args)
        )
    }
}

/// Can an array access at `index` into `array` be statically classified? Returns
/// `Some(in_bounds)` when both the array's creation size and the index are compile-time
/// constants and the array value is known non-null.
fn array_access_static_bounds(code: &IrCode, array: ValueId, index: ValueId) -> Option<bool> {
    let Some(Inst::NewArrayEmpty(new_array)) = code.defining_inst(array) else {
        return None;
    };
    let size = code.const_of(new_array.size)?.as_int();
    let index = code.const_of(index)?.as_int();
    Some(index >= 0 && index < size)
}

#[derive(Clone, Debug)]
pub struct ArrayGet {
    pub ty: MemberType,
    pub array: ValueId,
    pub index: ValueId,
}

impl InstT for ArrayGet {
    fn in_values(&self) -> SmallVec<[ValueId; 2]> {
        smallvec![self.array, self.index]
    }

    fn rewrite_values(&mut self, map: &mut dyn FnMut(ValueId) -> ValueId) {
        self.array = map(self.array);
        self.index = map(self.index);
    }

    fn identical_same_kind(&self, other: &Inst) -> bool {
        let Inst::ArrayGet(o) = other else { panic!() };
        self.ty == o.ty
    }

    fn compare_same_kind(&self, other: &Inst) -> Ordering {
        let Inst::ArrayGet(o) = other else { panic!() };
        self.ty.cmp(&o.ty)
    }

    fn instance_can_throw(&self, code: &IrCode) -> bool {
        if code.value(self.array).can_be_null() {
            return true;
        }
        match array_access_static_bounds(code, self.array, self.index) {
            Some(in_bounds) => !in_bounds,
            None => true,
        }
    }

    fn throws_npe_if_value_is_null(&self, v: ValueId) -> bool {
        v == self.array
    }

    fn max_in_value_register(&self, _code: &IrCode) -> u32 {
        U8BIT_MAX
    }

    fn max_out_value_register(&self) -> u32 {
        U8BIT_MAX
    }

    fn evaluate(&self, _code: &IrCode, _get: &dyn Fn(ValueId) -> LatticeElement) -> LatticeElement {
        LatticeElement::Typed(self.ty.value_type())
    }

    fn to_display_string(&self, _factory: &ItemFactory) -> String {
        format!(
            "aget-{} {}, {}",
            self.ty,
            vstr(self.array),
            vstr(self.index)
        )
    }
}

#[derive(Clone, Debug)]
pub struct ArrayPut {
    pub ty: MemberType,
    pub array: ValueId,
    pub index: ValueId,
    pub src: ValueId,
}

impl InstT for ArrayPut {
    fn in_values(&self) -> SmallVec<[ValueId; 2]> {
        smallvec![self.array, self.index, self.src]
    }

    fn rewrite_values(&mut self, map: &mut dyn FnMut(ValueId) -> ValueId) {
        self.array = map(self.array);
        self.index = map(self.index);
        self.src = map(self.src);
    }

    fn identical_same_kind(&self, other: &Inst) -> bool {
        let Inst::ArrayPut(o) = other else { panic!() };
        self.ty == o.ty
    }

    fn compare_same_kind(&self, other: &Inst) -> Ordering {
        let Inst::ArrayPut(o) = other else { panic!() };
        self.ty.cmp(&o.ty)
    }

    fn instance_can_throw(&self, code: &IrCode) -> bool {
        if code.value(self.array).can_be_null() {
            return true;
        }
        // Reference stores additionally carry a runtime type check that we make no attempt to
        // discharge statically.
        if self.ty == MemberType::Object {
            return true;
        }
        match array_access_static_bounds(code, self.array, self.index) {
            Some(in_bounds) => !in_bounds,
            None => true,
        }
    }

    fn can_be_dead_code(&self, _code: &IrCode) -> bool {
        false
    }

    fn throws_npe_if_value_is_null(&self, v: ValueId) -> bool {
        v == self.array
    }

    fn max_in_value_register(&self, _code: &IrCode) -> u32 {
        U8BIT_MAX
    }

    fn to_display_string(&self, _factory: &ItemFactory) -> String {
        format!(
            "aput-{} {}, {}, {}",
            self.ty,
            vstr(self.array),
            vstr(self.index),
            vstr(self.src)
        )
    }
}

#[derive(Clone, Debug)]
pub struct InstanceGet {
    pub field: FieldId,
    pub ty: MemberType,
    pub object: ValueId,
}

impl InstT for InstanceGet {
    fn in_values(&self) -> SmallVec<[ValueId; 2]> {
        smallvec![self.object]
    }

    fn rewrite_values(&mut self, map: &mut dyn FnMut(ValueId) -> ValueId) {
        self.object = map(self.object);
    }

    fn identical_same_kind(&self, other: &Inst) -> bool {
        let Inst::InstanceGet(o) = other else { panic!() };
        self.field == o.field && self.ty == o.ty
    }

    fn compare_same_kind(&self, other: &Inst) -> Ordering {
        let Inst::InstanceGet(o) = other else { panic!() };
        self.field.cmp(&o.field).then(self.ty.cmp(&o.ty))
    }

    fn instance_can_throw(&self, code: &IrCode) -> bool {
        code.value(self.object).can_be_null()
    }

    fn throws_npe_if_value_is_null(&self, v: ValueId) -> bool {
        v == self.object
    }

    fn max_in_value_register(&self, _code: &IrCode) -> u32 {
        U4BIT_MAX
    }

    fn max_out_value_register(&self) -> u32 {
        U4BIT_MAX
    }

    fn inlining_constraint(
        &self,
        appinfo: &AppInfo,
        factory: &ItemFactory,
        context: TypeId,
    ) -> Constraint {
        field_constraint(appinfo, factory, self.field, context)
    }

    fn evaluate(&self, _code: &IrCode, _get: &dyn Fn(ValueId) -> LatticeElement) -> LatticeElement {
        LatticeElement::Typed(self.ty.value_type())
    }

    fn for_each_reference(&self, f: &mut dyn FnMut(Reference)) {
        f(Reference::Field(self.field));
    }

    fn to_display_string(&self, factory: &ItemFactory) -> String {
        format!(
            "iget-{} {}, {}",
            self.ty,
            vstr(self.object),
            factory.field_to_string(self.field)
        )
    }
}

#[derive(Clone, Debug)]
pub struct InstancePut {
    pub field: FieldId,
    pub ty: MemberType,
    pub object: ValueId,
    pub src: ValueId,
}

impl InstT for InstancePut {
    fn in_values(&self) -> SmallVec<[ValueId; 2]> {
        smallvec![self.object, self.src]
    }

    fn rewrite_values(&mut self, map: &mut dyn FnMut(ValueId) -> ValueId) {
        self.object = map(self.object);
        self.src = map(self.src);
    }

    fn identical_same_kind(&self, other: &Inst) -> bool {
        let Inst::InstancePut(o) = other else { panic!() };
        self.field == o.field && self.ty == o.ty
    }

    fn compare_same_kind(&self, other: &Inst) -> Ordering {
        let Inst::InstancePut(o) = other else { panic!() };
        self.field.cmp(&o.field).then(self.ty.cmp(&o.ty))
    }

    fn instance_can_throw(&self, code: &IrCode) -> bool {
        code.value(self.object).can_be_null()
    }

    fn can_be_dead_code(&self, _code: &IrCode) -> bool {
        false
    }

    fn throws_npe_if_value_is_null(&self, v: ValueId) -> bool {
        v == self.object
    }

    fn max_in_value_register(&self, _code: &IrCode) -> u32 {
        U4BIT_MAX
    }

    fn inlining_constraint(
        &self,
        appinfo: &AppInfo,
        factory: &ItemFactory,
        context: TypeId,
    ) -> Constraint {
        field_constraint(appinfo, factory, self.field, context)
    }

    fn for_each_reference(&self, f: &mut dyn FnMut(Reference)) {
        f(Reference::Field(self.field));
    }

    fn to_display_string(&self, factory: &ItemFactory) -> String {
        format!(
            "iput-{} {}, {}, {}",
            self.ty,
            vstr(self.object),
            vstr(self.src),
            factory.field_to_string(self.field)
        )
    }
}

#[derive(Clone, Debug)]
pub struct StaticGet {
    pub field: FieldId,
    pub ty: MemberType,
}

impl InstT for StaticGet {
    fn in_values(&self) -> SmallVec<[ValueId; 2]> {
        smallvec![]
    }

    fn rewrite_values(&mut self, _map: &mut dyn FnMut(ValueId) -> ValueId) {}

    fn identical_same_kind(&self, other: &Inst) -> bool {
        let Inst::StaticGet(o) = other else { panic!() };
        self.field == o.field && self.ty == o.ty
    }

    fn compare_same_kind(&self, other: &Inst) -> Ordering {
        let Inst::StaticGet(o) = other else { panic!() };
        self.field.cmp(&o.field).then(self.ty.cmp(&o.ty))
    }

    fn instance_can_throw(&self, _code: &IrCode) -> bool {
        // Static access may trigger class initialization.
        true
    }

    fn max_out_value_register(&self) -> u32 {
        U8BIT_MAX
    }

    fn inlining_constraint(
        &self,
        appinfo: &AppInfo,
        factory: &ItemFactory,
        context: TypeId,
    ) -> Constraint {
        field_constraint(appinfo, factory, self.field, context)
    }

    fn evaluate(&self, _code: &IrCode, _get: &dyn Fn(ValueId) -> LatticeElement) -> LatticeElement {
        LatticeElement::Typed(self.ty.value_type())
    }

    fn for_each_reference(&self, f: &mut dyn FnMut(Reference)) {
        f(Reference::Field(self.field));
    }

    fn to_display_string(&self, factory: &ItemFactory) -> String {
        format!("sget-{} {}", self.ty, factory.field_to_string(self.field))
    }
}

#[derive(Clone, Debug)]
pub struct StaticPut {
    pub field: FieldId,
    pub ty: MemberType,
    pub src: ValueId,
}

impl InstT for StaticPut {
    fn in_values(&self) -> SmallVec<[ValueId; 2]> {
        smallvec![self.src]
    }

    fn rewrite_values(&mut self, map: &mut dyn FnMut(ValueId) -> ValueId) {
        self.src = map(self.src);
    }

    fn identical_same_kind(&self, other: &Inst) -> bool {
        let Inst::StaticPut(o) = other else { panic!() };
        self.field == o.field && self.ty == o.ty
    }

    fn compare_same_kind(&self, other: &Inst) -> Ordering {
        let Inst::StaticPut(o) = other else { panic!() };
        self.field.cmp(&o.field).then(self.ty.cmp(&o.ty))
    }

    fn instance_can_throw(&self, _code: &IrCode) -> bool {
        true
    }

    fn can_be_dead_code(&self, _code: &IrCode) -> bool {
        false
    }

    fn max_in_value_register(&self, _code: &IrCode) -> u32 {
        U8BIT_MAX
    }

    fn inlining_constraint(
        &self,
        appinfo: &AppInfo,
        factory: &ItemFactory,
        context: TypeId,
    ) -> Constraint {
        field_constraint(appinfo, factory, self.field, context)
    }

    fn for_each_reference(&self, f: &mut dyn FnMut(Reference)) {
        f(Reference::Field(self.field));
    }

    fn to_display_string(&self, factory: &ItemFactory) -> String {
        format!(
            "sput-{} {}, {}",
            self.ty,
            vstr(self.src),
            factory.field_to_string(self.field)
        )
    }
}

#[derive(Clone, Debug)]
pub struct NewInstance {
    pub ty: TypeId,
}

impl InstT for NewInstance {
    fn in_values(&self) -> SmallVec<[ValueId; 2]> {
        smallvec![]
    }

    fn rewrite_values(&mut self, _map: &mut dyn FnMut(ValueId) -> ValueId) {}

    fn identical_same_kind(&self, other: &Inst) -> bool {
        let Inst::NewInstance(o) = other else { panic!() };
        self.ty == o.ty
    }

    fn compare_same_kind(&self, other: &Inst) -> Ordering {
        let Inst::NewInstance(o) = other else { panic!() };
        self.ty.cmp(&o.ty)
    }

    fn instance_can_throw(&self, _code: &IrCode) -> bool {
        true
    }

    fn max_out_value_register(&self) -> u32 {
        U8BIT_MAX
    }

    fn inlining_constraint(
        &self,
        appinfo: &AppInfo,
        factory: &ItemFactory,
        context: TypeId,
    ) -> Constraint {
        class_constraint(appinfo, factory, self.ty, context)
    }

    fn evaluate(&self, _code: &IrCode, _get: &dyn Fn(ValueId) -> LatticeElement) -> LatticeElement {
        LatticeElement::Typed(ValueType::Object)
    }

    fn for_each_reference(&self, f: &mut dyn FnMut(Reference)) {
        f(Reference::Type(self.ty));
    }

    fn to_display_string(&self, factory: &ItemFactory) -> String {
        format!("new-instance {}", factory.descriptor(self.ty))
    }
}

/// The out-value is the same reference as `object`, refined to `ty`. Lowering keeps the two in
/// one register (emitting a copy when the allocator did not).
#[derive(Clone, Debug)]
pub struct CheckCast {
    pub ty: TypeId,
    pub object: ValueId,
}

impl InstT for CheckCast {
    fn in_values(&self) -> SmallVec<[ValueId; 2]> {
        smallvec![self.object]
    }

    fn rewrite_values(&mut self, map: &mut dyn FnMut(ValueId) -> ValueId) {
        self.object = map(self.object);
    }

    fn identical_same_kind(&self, other: &Inst) -> bool {
        let Inst::CheckCast(o) = other else { panic!() };
        self.ty == o.ty
    }

    fn compare_same_kind(&self, other: &Inst) -> Ordering {
        let Inst::CheckCast(o) = other else { panic!() };
        self.ty.cmp(&o.ty)
    }

    fn instance_can_throw(&self, _code: &IrCode) -> bool {
        true
    }

    fn max_in_value_register(&self, _code: &IrCode) -> u32 {
        U8BIT_MAX
    }

    fn max_out_value_register(&self) -> u32 {
        U8BIT_MAX
    }

    fn inlining_constraint(
        &self,
        appinfo: &AppInfo,
        factory: &ItemFactory,
        context: TypeId,
    ) -> Constraint {
        class_constraint(appinfo, factory, self.ty, context)
    }

    fn evaluate(&self, _code: &IrCode, get: &dyn Fn(ValueId) -> LatticeElement) -> LatticeElement {
        // A cast passes its operand through unchanged (when it does not throw).
        get(self.object)
    }

    fn for_each_reference(&self, f: &mut dyn FnMut(Reference)) {
        f(Reference::Type(self.ty));
    }

    fn to_display_string(&self, factory: &ItemFactory) -> String {
        format!(
            "check-cast {}, {}",
            vstr(self.object),
            factory.descriptor(self.ty)
        )
    }
}

#[derive(Clone, Debug)]
pub struct InstanceOf {
    pub ty: TypeId,
    pub object: ValueId,
}

impl InstT for InstanceOf {
    fn in_values(&self) -> SmallVec<[ValueId; 2]> {
        smallvec![self.object]
    }

    fn rewrite_values(&mut self, map: &mut dyn FnMut(ValueId) -> ValueId) {
        self.object = map(self.object);
    }

    fn identical_same_kind(&self, other: &Inst) -> bool {
        let Inst::InstanceOf(o) = other else { panic!() };
        self.ty == o.ty
    }

    fn compare_same_kind(&self, other: &Inst) -> Ordering {
        let Inst::InstanceOf(o) = other else { panic!() };
        self.ty.cmp(&o.ty)
    }

    fn max_in_value_register(&self, _code: &IrCode) -> u32 {
        U4BIT_MAX
    }

    fn max_out_value_register(&self) -> u32 {
        U4BIT_MAX
    }

    fn inlining_constraint(
        &self,
        appinfo: &AppInfo,
        factory: &ItemFactory,
        context: TypeId,
    ) -> Constraint {
        class_constraint(appinfo, factory, self.ty, context)
    }

    fn evaluate(&self, code: &IrCode, _get: &dyn Fn(ValueId) -> LatticeElement) -> LatticeElement {
        // `null instanceof T` is false for every T.
        if let Some(Inst::ConstNumber(c)) = code.defining_inst(self.object)
            && c.is_zero()
        {
            return LatticeElement::Const(ConstValue::int(0));
        }
        LatticeElement::Typed(ValueType::Int)
    }

    fn for_each_reference(&self, f: &mut dyn FnMut(Reference)) {
        f(Reference::Type(self.ty));
    }

    fn to_display_string(&self, factory: &ItemFactory) -> String {
        format!(
            "instance-of {}, {}",
            vstr(self.object),
            factory.descriptor(self.ty)
        )
    }
}

#[derive(Clone, Debug)]
pub struct Monitor {
    pub kind: MonitorKind,
    pub object: ValueId,
}

impl InstT for Monitor {
    fn in_values(&self) -> SmallVec<[ValueId; 2]> {
        smallvec![self.object]
    }

    fn rewrite_values(&mut self, map: &mut dyn FnMut(ValueId) -> ValueId) {
        self.object = map(self.object);
    }

    fn identical_same_kind(&self, other: &Inst) -> bool {
        let Inst::Monitor(o) = other else { panic!() };
        self.kind == o.kind
    }

    fn compare_same_kind(&self, other: &Inst) -> Ordering {
        let Inst::Monitor(o) = other else { panic!() };
        self.kind.cmp(&o.kind)
    }

    fn instance_can_throw(&self, _code: &IrCode) -> bool {
        true
    }

    fn can_be_dead_code(&self, _code: &IrCode) -> bool {
        // Lock effects are visible to other threads.
        false
    }

    fn throws_npe_if_value_is_null(&self, v: ValueId) -> bool {
        v == self.object
    }

    fn max_in_value_register(&self, _code: &IrCode) -> u32 {
        U8BIT_MAX
    }

    fn to_display_string(&self, _factory: &ItemFactory) -> String {
        let kind = match self.kind {
            MonitorKind::Enter => "enter",
            MonitorKind::Exit => "exit",
        };
        format!("monitor-{} {}", kind, vstr(self.object))
    }
}

macro_rules! invoke_inst {
    ($name:ident, $mnemonic:literal, has_receiver: $recv:literal, virtual_dispatch: $virt:literal) => {
        #[derive(Clone, Debug)]
        pub struct $name {
            pub method: MethodId,
            pub args: SmallVec<[ValueId; 4]>,
        }

        impl $name {
            pub const HAS_RECEIVER: bool = $recv;

            /// The number of argument register slots this call needs (wide arguments need two).
            pub fn required_argument_slots(&self, code: &IrCode) -> u32 {
                self.args
                    .iter()
                    .map(|a| code.value(*a).ty().required_registers())
                    .sum()
            }
        }

        impl InstT for $name {
            fn in_values(&self) -> SmallVec<[ValueId; 2]> {
                self.args.iter().copied().collect()
            }

            fn rewrite_values(&mut self, map: &mut dyn FnMut(ValueId) -> ValueId) {
                for arg in self.args.iter_mut() {
                    *arg = map(*arg);
                }
            }

            fn identical_same_kind(&self, other: &Inst) -> bool {
                let Inst::$name(o) = other else { panic!() };
                self.method == o.method
            }

            fn compare_same_kind(&self, other: &Inst) -> Ordering {
                let Inst::$name(o) = other else { panic!() };
                self.method.cmp(&o.method)
            }

            fn instance_can_throw(&self, _code: &IrCode) -> bool {
                true
            }

            fn throws_npe_if_value_is_null(&self, v: ValueId) -> bool {
                $recv && !self.args.is_empty() && v == self.args[0]
            }

            fn max_in_value_register(&self, code: &IrCode) -> u32 {
                // Beyond five argument slots only the range encoding is available, which
                // addresses a full 16-bit register but requires consecutive registers.
                if self.required_argument_slots(code) > 5 {
                    U16BIT_MAX
                } else {
                    U4BIT_MAX
                }
            }

            fn max_out_value_register(&self) -> u32 {
                // Results materialize through a move-result, which has an 8-bit register.
                U8BIT_MAX
            }

            fn inlining_constraint(
                &self,
                appinfo: &AppInfo,
                factory: &ItemFactory,
                context: TypeId,
            ) -> Constraint {
                invoke_constraint(appinfo, factory, self.method, context, $virt)
            }

            fn evaluate(
                &self,
                code: &IrCode,
                _get: &dyn Fn(ValueId) -> LatticeElement,
            ) -> LatticeElement {
                match code.factory_value_type(self.method) {
                    Some(ty) => LatticeElement::Typed(ty),
                    None => LatticeElement::Unknown,
                }
            }

            fn for_each_reference(&self, f: &mut dyn FnMut(Reference)) {
                f(Reference::Method(self.method));
            }

            fn to_display_string(&self, factory: &ItemFactory) -> String {
                format!(
                    "{} {} ({})",
                    $mnemonic,
                    factory.method_to_string(self.method),
                    vlist(&self.args)
                )
            }
        }
    };
}

invoke_inst!(InvokeVirtual, "invoke-virtual", has_receiver: true, virtual_dispatch: true);
invoke_inst!(InvokeInterface, "invoke-interface", has_receiver: true, virtual_dispatch: true);
invoke_inst!(InvokeDirect, "invoke-direct", has_receiver: true, virtual_dispatch: false);
invoke_inst!(InvokeStatic, "invoke-static", has_receiver: false, virtual_dispatch: false);
invoke_inst!(InvokeSuper, "invoke-super", has_receiver: true, virtual_dispatch: false);

/// A source-position marker that must survive even when no materialized instruction sits on that
/// line (so the debugger can break there).
#[derive(Clone, Debug)]
pub struct DebugPosition;

impl InstT for DebugPosition {
    fn in_values(&self) -> SmallVec<[ValueId; 2]> {
        smallvec![]
    }

    fn rewrite_values(&mut self, _map: &mut dyn FnMut(ValueId) -> ValueId) {}

    fn identical_same_kind(&self, _other: &Inst) -> bool {
        true
    }

    fn compare_same_kind(&self, _other: &Inst) -> Ordering {
        Ordering::Equal
    }

    fn can_be_dead_code(&self, _code: &IrCode) -> bool {
        false
    }

    fn to_display_string(&self, _factory: &ItemFactory) -> String {
        "debug-position".to_string()
    }
}

/// Starts (or retargets) a named local's debugger-visible live range at `src`.
#[derive(Clone, Debug)]
pub struct DebugLocalWrite {
    pub src: ValueId,
}

impl InstT for DebugLocalWrite {
    fn in_values(&self) -> SmallVec<[ValueId; 2]> {
        smallvec![self.src]
    }

    fn rewrite_values(&mut self, map: &mut dyn FnMut(ValueId) -> ValueId) {
        self.src = map(self.src);
    }

    fn identical_same_kind(&self, _other: &Inst) -> bool {
        true
    }

    fn compare_same_kind(&self, _other: &Inst) -> Ordering {
        Ordering::Equal
    }

    fn can_be_dead_code(&self, _code: &IrCode) -> bool {
        false
    }

    fn max_in_value_register(&self, _code: &IrCode) -> u32 {
        U16BIT_MAX
    }

    fn max_out_value_register(&self) -> u32 {
        U16BIT_MAX
    }

    fn evaluate(&self, _code: &IrCode, get: &dyn Fn(ValueId) -> LatticeElement) -> LatticeElement {
        get(self.src)
    }

    fn to_display_string(&self, _factory: &ItemFactory) -> String {
        format!("debug-local-write {}", vstr(self.src))
    }
}

/// Keeps the values listed in its debug-value set observable at this point without reading them
/// as ordinary operands.
#[derive(Clone, Debug)]
pub struct DebugLocalRead;

impl InstT for DebugLocalRead {
    fn in_values(&self) -> SmallVec<[ValueId; 2]> {
        smallvec![]
    }

    fn rewrite_values(&mut self, _map: &mut dyn FnMut(ValueId) -> ValueId) {}

    fn identical_same_kind(&self, _other: &Inst) -> bool {
        true
    }

    fn compare_same_kind(&self, _other: &Inst) -> Ordering {
        Ordering::Equal
    }

    fn can_be_dead_code(&self, _code: &IrCode) -> bool {
        false
    }

    fn to_display_string(&self, _factory: &ItemFactory) -> String {
        "debug-local-read".to_string()
    }
}

macro_rules! stack_inst {
    ($name:ident, $mnemonic:literal, $($field:ident),+) => {
        #[derive(Clone, Debug)]
        pub struct $name {
            $(pub $field: ValueId,)+
        }

        impl InstT for $name {
            fn in_values(&self) -> SmallVec<[ValueId; 2]> {
                smallvec![$(self.$field,)+]
            }

            fn rewrite_values(&mut self, map: &mut dyn FnMut(ValueId) -> ValueId) {
                $(self.$field = map(self.$field);)+
            }

            fn identical_same_kind(&self, _other: &Inst) -> bool {
                true
            }

            fn compare_same_kind(&self, _other: &Inst) -> Ordering {
                Ordering::Equal
            }

            fn can_be_dead_code(&self, _code: &IrCode) -> bool {
                // Stack discipline instructions balance the operand stack; removing one in
                // isolation would unbalance it.
                false
            }

            fn to_display_string(&self, _factory: &ItemFactory) -> String {
                let vs: &[ValueId] = &[$(self.$field,)+];
                format!("{} {}", $mnemonic, vlist(vs))
            }
        }
    };
}

// The stack-machine shaping kinds, created by load/store insertion and meaningful only to the
// class-file backend. `Load` pushes a local slot; `Store` pops into one; `Pop` discards an
// unused result; `Dup`/`Dup2` duplicate the top (wide) entry; `Swap` exchanges the top two
// single-width entries.
stack_inst!(Load, "load", src);
stack_inst!(Store, "store", src);
stack_inst!(Pop, "pop", src);
stack_inst!(Dup, "dup", src);
stack_inst!(Dup2, "dup2", src);
stack_inst!(Swap, "swap", lhs, rhs);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::NumericType;

    fn v(n: usize) -> ValueId {
        ValueId::from_usize(n)
    }

    #[test]
    fn identity_and_ordering_agree() {
        // For a representative set of same-kind pairs, `compare == Equal` must coincide with
        // `identical`.
        let pairs: Vec<(Inst, Inst)> = vec![
            (
                Add {
                    ty: NumericType::Int,
                    lhs: v(0),
                    rhs: v(1),
                }
                .into(),
                Add {
                    ty: NumericType::Int,
                    lhs: v(2),
                    rhs: v(3),
                }
                .into(),
            ),
            (
                Add {
                    ty: NumericType::Int,
                    lhs: v(0),
                    rhs: v(1),
                }
                .into(),
                Add {
                    ty: NumericType::Long,
                    lhs: v(0),
                    rhs: v(1),
                }
                .into(),
            ),
            (
                ConstNumber {
                    ty: ValueType::Int,
                    bits: 3,
                }
                .into(),
                ConstNumber {
                    ty: ValueType::Int,
                    bits: 4,
                }
                .into(),
            ),
            (
                ConstNumber {
                    ty: ValueType::Int,
                    bits: 3,
                }
                .into(),
                ConstNumber {
                    ty: ValueType::Int,
                    bits: 3,
                }
                .into(),
            ),
            (
                Cmp {
                    ty: NumericType::Float,
                    bias: Bias::Gt,
                    lhs: v(0),
                    rhs: v(1),
                }
                .into(),
                Cmp {
                    ty: NumericType::Float,
                    bias: Bias::Lt,
                    lhs: v(0),
                    rhs: v(1),
                }
                .into(),
            ),
            (
                If {
                    kind: IfKind::Eq,
                    lhs: v(0),
                    rhs: None,
                }
                .into(),
                If {
                    kind: IfKind::Eq,
                    lhs: v(1),
                    rhs: Some(v(2)),
                }
                .into(),
            ),
        ];
        for (a, b) in &pairs {
            assert_eq!(
                a.compare_non_value_parts(b) == Ordering::Equal,
                a.identical_non_value_non_position_parts(b),
                "{a:?} vs {b:?}"
            );
            assert_eq!(a.compare_non_value_parts(b), b.compare_non_value_parts(a).reverse());
        }
    }

    #[test]
    fn cross_kind_ordering_is_never_equal() {
        let a: Inst = Add {
            ty: NumericType::Int,
            lhs: v(0),
            rhs: v(1),
        }
        .into();
        let b: Inst = Sub {
            ty: NumericType::Int,
            lhs: v(0),
            rhs: v(1),
        }
        .into();
        assert_ne!(a.compare_non_value_parts(&b), Ordering::Equal);
        assert!(!a.identical_non_value_non_position_parts(&b));
    }

    #[test]
    fn folds_match_target_semantics() {
        assert_eq!(
            fold_add(NumericType::Int, i64::from(i32::MAX), 1),
            Some(i64::from(i32::MIN))
        );
        assert_eq!(fold_div(NumericType::Int, 7, 0), None);
        assert_eq!(
            fold_div(NumericType::Int, i64::from(i32::MIN), -1),
            Some(i64::from(i32::MIN))
        );
        assert_eq!(fold_shl(NumericType::Int, 1, 33), Some(2));
        assert_eq!(fold_ushr(NumericType::Int, -2, 1), Some(i64::from(i32::MAX)));
        // Float division is always foldable; 0/0 folds to a NaN.
        let bits = fold_div(NumericType::Float, f32_bits(0.0), f32_bits(0.0)).unwrap();
        assert!(f32_of(bits).is_nan());
    }

    #[test]
    fn const_encoded_units() {
        let c = |ty, bits| ConstNumber { ty, bits };
        assert_eq!(c(ValueType::Int, 7).encoded_units(0), 1);
        assert_eq!(c(ValueType::Int, 7).encoded_units(16), 2);
        assert_eq!(c(ValueType::Int, 0x1234).encoded_units(0), 2);
        assert_eq!(c(ValueType::Int, 0x7fff0000).encoded_units(0), 2);
        assert_eq!(c(ValueType::Int, 0x12345678).encoded_units(0), 3);
        assert_eq!(c(ValueType::Long, 42).encoded_units(0), 2);
        assert_eq!(c(ValueType::Long, 0x12345678).encoded_units(0), 3);
        assert_eq!(c(ValueType::Double, f64_bits(2.0)).encoded_units(0), 2);
        assert_eq!(c(ValueType::Long, 0x1234567812345678).encoded_units(0), 5);
    }

    #[test]
    fn array_access_bounds_refine_instance_can_throw() {
        use crate::ir::inst;
        let mut factory = crate::factory::ItemFactory::new();
        let arr_ty = factory.intern_type("[I");
        let m = factory.intern_method("Lcom/example/A;", "f", "V", &[]);
        let mut b = crate::ir::builder::IrBuilder::new(std::sync::Arc::new(factory), m, &[]);
        let size = b.add_with_out(
            ConstNumber {
                ty: ValueType::Int,
                bits: 3,
            }
            .into(),
            ValueType::Int,
            0,
        );
        let arr = b.add_with_out(
            inst::NewArrayEmpty { ty: arr_ty, size }.into(),
            ValueType::Object,
            1,
        );
        let in_bounds = b.add_with_out(
            ConstNumber {
                ty: ValueType::Int,
                bits: 1,
            }
            .into(),
            ValueType::Int,
            2,
        );
        let out_of_bounds = b.add_with_out(
            ConstNumber {
                ty: ValueType::Int,
                bits: 5,
            }
            .into(),
            ValueType::Int,
            3,
        );
        let val = b.add_with_out(
            ConstNumber {
                ty: ValueType::Int,
                bits: 9,
            }
            .into(),
            ValueType::Int,
            4,
        );
        b.add_return(None);
        let code = b.build().unwrap();

        // The kind can always throw; the in-bounds instance provably cannot, while the
        // out-of-bounds instance provably always does — both report through the same query.
        assert!(InstKind::ArrayPut.can_throw());
        let safe = inst::ArrayPut {
            ty: MemberType::Int,
            array: arr,
            index: in_bounds,
            src: val,
        };
        assert!(!safe.instance_can_throw(&code));
        let throws = inst::ArrayPut {
            ty: MemberType::Int,
            array: arr,
            index: out_of_bounds,
            src: val,
        };
        assert!(throws.instance_can_throw(&code));
        let get_safe = inst::ArrayGet {
            ty: MemberType::Int,
            array: arr,
            index: in_bounds,
        };
        assert!(!get_safe.instance_can_throw(&code));
    }

    #[test]
    fn npe_queries_name_the_dereferenced_operand() {
        let array = v(0);
        let index = v(1);
        let get = ArrayGet {
            ty: MemberType::Int,
            array,
            index,
        };
        assert!(get.throws_npe_if_value_is_null(array));
        assert!(!get.throws_npe_if_value_is_null(index));

        let recv = v(2);
        let arg = v(3);
        let m = crate::factory::MethodId::from_usize(0);
        let virt = InvokeVirtual {
            method: m,
            args: smallvec![recv, arg],
        };
        assert!(virt.throws_npe_if_value_is_null(recv));
        assert!(!virt.throws_npe_if_value_is_null(arg));
        let stat = InvokeStatic {
            method: m,
            args: smallvec![recv, arg],
        };
        assert!(!stat.throws_npe_if_value_is_null(recv));
    }

    #[test]
    fn register_ceilings_follow_the_encoding_tiers() {
        use crate::ir::builder::tests::test_builder;
        let code = {
            let mut b = test_builder(&[]);
            b.add_return(None);
            b.build().unwrap()
        };
        let add = Add {
            ty: NumericType::Int,
            lhs: v(0),
            rhs: v(1),
        };
        assert_eq!(add.max_in_value_register(&code), U8BIT_MAX);
        assert_eq!(add.max_out_value_register(), U8BIT_MAX);
        let neg = Neg {
            ty: NumericType::Int,
            src: v(0),
        };
        assert_eq!(neg.max_in_value_register(&code), U4BIT_MAX);
        let two_op = If {
            kind: IfKind::Lt,
            lhs: v(0),
            rhs: Some(v(1)),
        };
        assert_eq!(two_op.max_in_value_register(&code), U4BIT_MAX);
        let zero_op = If {
            kind: IfKind::Lt,
            lhs: v(0),
            rhs: None,
        };
        assert_eq!(zero_op.max_in_value_register(&code), U8BIT_MAX);
        let mv = Move { src: v(0) };
        assert_eq!(mv.max_out_value_register(), U16BIT_MAX);
    }

    #[test]
    #[should_panic(expected = "no in-values")]
    fn register_ceiling_without_inputs_panics() {
        use crate::ir::builder::tests::test_builder;
        let code = {
            let mut b = test_builder(&[]);
            b.add_return(None);
            b.build().unwrap()
        };
        let _ = Goto.max_in_value_register(&code);
    }

    #[test]
    fn references_are_visitable() {
        let mut factory = crate::factory::ItemFactory::new();
        let m = factory.intern_method("Lcom/example/A;", "f", "I", &[]);
        let f = factory.intern_field("Lcom/example/A;", "I", "x");
        let s = factory.intern_string("hello");
        let t = factory.intern_type("Lcom/example/B;");
        let insts: Vec<Inst> = vec![
            InvokeStatic {
                method: m,
                args: smallvec![],
            }
            .into(),
            StaticGet {
                field: f,
                ty: MemberType::Int,
            }
            .into(),
            ConstString { value: s }.into(),
            ConstClass { ty: t }.into(),
            Goto.into(),
        ];
        let mut refs = Vec::new();
        for inst in &insts {
            inst.for_each_reference(&mut |r| refs.push(r));
        }
        assert_eq!(
            refs,
            vec![
                Reference::Method(m),
                Reference::Field(f),
                Reference::String(s),
                Reference::Type(t),
            ]
        );
    }

    #[test]
    fn invoke_constraints_take_the_strictest_dispatch_target() {
        use crate::appinfo::tests::test_app;
        let mut factory = crate::factory::ItemFactory::new();
        let app = test_app(&mut factory);
        let context_a = factory.intern_type("Lcom/example/A;");
        let context_other = factory.intern_type("Lcom/other/C;");
        let a_f = factory.intern_method("Lcom/example/A;", "f", "I", &[]);
        let a_g = factory.intern_method("Lcom/example/A;", "g", "I", &[]);

        // Virtual dispatch of the public f(): the package-private subclass B overrides it, so
        // the strictest target wins.
        let virt = InvokeVirtual {
            method: a_f,
            args: smallvec![v(0)],
        };
        assert_eq!(
            virt.inlining_constraint(&app, &factory, context_a),
            Constraint::Package
        );
        assert_eq!(
            virt.inlining_constraint(&app, &factory, context_other),
            Constraint::Never
        );

        // Direct dispatch of the private g() has a single target.
        let direct = InvokeDirect {
            method: a_g,
            args: smallvec![v(0)],
        };
        assert_eq!(
            direct.inlining_constraint(&app, &factory, context_a),
            Constraint::Always
        );
        assert_eq!(
            direct.inlining_constraint(&app, &factory, context_other),
            Constraint::SameClass
        );

        // An unresolvable reference can never be inlined.
        let missing = factory.intern_method("Lcom/example/A;", "nope", "I", &[]);
        let bad = InvokeStatic {
            method: missing,
            args: smallvec![],
        };
        assert_eq!(
            bad.inlining_constraint(&app, &factory, context_a),
            Constraint::Never
        );
    }

    #[test]
    fn switch_packedness() {
        let s = |keys: &[i32]| Switch {
            src: v(0),
            keys: keys.into(),
        };
        assert!(s(&[1, 2, 3]).is_packed());
        assert!(!s(&[1, 3, 4]).is_packed());
        assert!(s(&[-1, 0, 1]).is_packed());
        assert!(!s(&[]).is_packed());
        assert!(!s(&[i32::MAX, i32::MIN]).is_packed());
    }
}
