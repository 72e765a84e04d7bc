//! Verification types.
//!
//! The class-file writer needs the verifier-visible type of every value to emit stack map
//! frames. Primitives map straight off the value's width class; reference values take the
//! precise class their definition pins down, and phis join their operands to the most specific
//! common supertype, with null operands contributing the universal null type (they never
//! constrain the join). Cycles through phis are broken by treating a revisited phi as null —
//! it constrains nothing the other operands don't.

use crate::{
    appinfo::AppInfo,
    factory::TypeId,
    ir::{
        code::IrCode,
        inst::Inst,
        types::ValueType,
        value::{Definition, PhiId, ValueId},
    },
};
use std::collections::HashSet;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VerificationType {
    Int,
    Float,
    Long,
    Double,
    /// The type of the null constant: a subtype of every reference type.
    Null,
    Object(TypeId),
}

/// The most specific common supertype of two verification types.
///
/// # Panics
///
/// On a primitive mismatch, which a well-typed graph cannot produce.
pub fn join(appinfo: &AppInfo, code: &IrCode, a: VerificationType, b: VerificationType) -> VerificationType {
    match (a, b) {
        (VerificationType::Null, x) | (x, VerificationType::Null) => x,
        (VerificationType::Object(x), VerificationType::Object(y)) => {
            VerificationType::Object(appinfo.join_types(code.factory(), x, y))
        }
        (x, y) if x == y => x,
        (x, y) => panic!("joining incompatible verification types {x:?} and {y:?}"),
    }
}

/// The verification type of `v`. The value's [ValueType] must be precise.
pub fn verification_type(appinfo: &AppInfo, code: &IrCode, v: ValueId) -> VerificationType {
    match code.value(v).ty() {
        ValueType::Int => VerificationType::Int,
        ValueType::Float => VerificationType::Float,
        ValueType::Long => VerificationType::Long,
        ValueType::Double => VerificationType::Double,
        ValueType::Object => {
            let mut visited = HashSet::new();
            reference_type(appinfo, code, v, &mut visited)
        }
        ty => panic!("imprecise type {ty} has no verification type"),
    }
}

fn reference_type(
    appinfo: &AppInfo,
    code: &IrCode,
    v: ValueId,
    visited: &mut HashSet<PhiId>,
) -> VerificationType {
    let factory = code.factory();
    match code.value(v).definition() {
        Definition::Phi(pid) => {
            if !visited.insert(pid) {
                return VerificationType::Null;
            }
            let mut result = VerificationType::Null;
            for op in code.phi(pid).operands().to_vec() {
                let ty = reference_type(appinfo, code, op, visited);
                result = join(appinfo, code, result, ty);
            }
            result
        }
        Definition::Inst(iid) => match &code.inst(iid).inst {
            // The null constant is the only number constant with a reference type.
            Inst::ConstNumber(_) => VerificationType::Null,
            Inst::ConstString(_) => VerificationType::Object(factory.known.string),
            Inst::ConstClass(_) => VerificationType::Object(factory.known.class),
            Inst::NewInstance(x) => VerificationType::Object(x.ty),
            Inst::NewArrayEmpty(x) => VerificationType::Object(x.ty),
            Inst::InvokeNewArray(x) => VerificationType::Object(x.ty),
            Inst::CheckCast(x) => VerificationType::Object(x.ty),
            Inst::InvokeVirtual(x) => VerificationType::Object(factory.method(x.method).proto.ret),
            Inst::InvokeInterface(x) => {
                VerificationType::Object(factory.method(x.method).proto.ret)
            }
            Inst::InvokeDirect(x) => VerificationType::Object(factory.method(x.method).proto.ret),
            Inst::InvokeStatic(x) => VerificationType::Object(factory.method(x.method).proto.ret),
            Inst::InvokeSuper(x) => VerificationType::Object(factory.method(x.method).proto.ret),
            Inst::InstanceGet(x) => VerificationType::Object(factory.field(x.field).ty),
            Inst::StaticGet(x) => VerificationType::Object(factory.field(x.field).ty),
            Inst::ArrayGet(x) => {
                match reference_type(appinfo, code, x.array, visited) {
                    VerificationType::Object(arr) => match factory.ty(arr).elem {
                        Some(elem) => VerificationType::Object(elem),
                        None => VerificationType::Object(factory.known.object),
                    },
                    // Loading from the null array only ever throws; any reference type will do.
                    _ => VerificationType::Null,
                }
            }
            Inst::Move(x) => reference_type(appinfo, code, x.src, visited),
            Inst::DebugLocalWrite(x) => reference_type(appinfo, code, x.src, visited),
            Inst::Argument(x) => {
                let proto = &factory.method(code.method).proto;
                match proto.params.get(usize::from(x.index)) {
                    Some(ty) => VerificationType::Object(*ty),
                    // An index past the parameter list is the receiver of an instance method.
                    None => VerificationType::Object(factory.method(code.method).holder),
                }
            }
            inst => panic!("{inst:?} does not produce a reference"),
        },
    }
}
