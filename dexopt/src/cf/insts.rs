//! Logical stack-machine instructions.
//!
//! Operands are implicit on the operand stack; what remains symbolic is local slots, branch
//! targets ([BlockId]s, with a [CfInst::Label] marking each block start) and constant-pool
//! references (factory handles). Integer constants pick their smallest push form at display
//! time, mirroring how the register backend picks constant widths.

use crate::{
    factory::{FieldId, ItemFactory, MethodId, StringId, TypeId},
    ir::{
        code::BlockId,
        types::{Bias, IfKind, MemberType, NumericType, ValueType},
    },
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CfBinop {
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
}

impl CfBinop {
    fn mnemonic(&self, ty: NumericType) -> String {
        let prefix = match ty {
            NumericType::Int => "i",
            NumericType::Long => "l",
            NumericType::Float => "f",
            NumericType::Double => "d",
            _ => panic!("no {ty} arithmetic in the stack machine"),
        };
        let op = match self {
            CfBinop::Add => "add",
            CfBinop::Sub => "sub",
            CfBinop::Mul => "mul",
            CfBinop::Div => "div",
            CfBinop::Rem => "rem",
            CfBinop::And => "and",
            CfBinop::Or => "or",
            CfBinop::Xor => "xor",
            CfBinop::Shl => "shl",
            CfBinop::Shr => "shr",
            CfBinop::Ushr => "ushr",
        };
        format!("{prefix}{op}")
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CfInvokeKind {
    Virtual,
    Special,
    Static,
    Interface,
}

impl CfInvokeKind {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            CfInvokeKind::Virtual => "invokevirtual",
            CfInvokeKind::Special => "invokespecial",
            CfInvokeKind::Static => "invokestatic",
            CfInvokeKind::Interface => "invokeinterface",
        }
    }
}

fn ty_prefix(ty: ValueType) -> &'static str {
    match ty {
        ValueType::Int => "i",
        ValueType::Float => "f",
        ValueType::Long => "l",
        ValueType::Double => "d",
        ValueType::Object => "a",
        _ => panic!("imprecise type {ty} in stack-machine code"),
    }
}

fn member_prefix(ty: MemberType) -> &'static str {
    match ty {
        MemberType::Boolean | MemberType::Byte => "b",
        MemberType::Char => "c",
        MemberType::Short => "s",
        MemberType::Int => "i",
        MemberType::Float => "f",
        MemberType::Long => "l",
        MemberType::Double => "d",
        MemberType::Object => "a",
        _ => panic!("imprecise member type {ty} in stack-machine code"),
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum CfInst {
    /// Marks the start of a block; branch targets resolve to these.
    Label(BlockId),
    Load {
        slot: u16,
        ty: ValueType,
    },
    Store {
        slot: u16,
        ty: ValueType,
    },
    ConstInt(i32),
    ConstLong(i64),
    ConstFloat(u32),
    ConstDouble(u64),
    ConstNull,
    ConstString(StringId),
    ConstClass(TypeId),
    Binop {
        op: CfBinop,
        ty: NumericType,
    },
    Neg {
        ty: NumericType,
    },
    Conversion {
        from: NumericType,
        to: NumericType,
    },
    Cmp {
        ty: NumericType,
        bias: Bias,
    },
    /// Compare the top two stack entries (`if_icmp*` / `if_acmp*`).
    IfCmp {
        kind: IfKind,
        ty: ValueType,
        target: BlockId,
    },
    /// Compare the top stack entry against zero/null (`if*` / `ifnull` / `ifnonnull`).
    IfZero {
        kind: IfKind,
        ty: ValueType,
        target: BlockId,
    },
    Goto {
        target: BlockId,
    },
    TableSwitch {
        low: i32,
        targets: Vec<BlockId>,
        default: BlockId,
    },
    LookupSwitch {
        keys: Vec<i32>,
        targets: Vec<BlockId>,
        default: BlockId,
    },
    Return {
        ty: Option<ValueType>,
    },
    Throw,
    GetField(FieldId),
    PutField(FieldId),
    GetStatic(FieldId),
    PutStatic(FieldId),
    Invoke {
        kind: CfInvokeKind,
        method: MethodId,
    },
    New(TypeId),
    NewArray(TypeId),
    ArrayLength,
    ArrayLoad {
        ty: MemberType,
    },
    ArrayStore {
        ty: MemberType,
    },
    CheckCast(TypeId),
    InstanceOf(TypeId),
    MonitorEnter,
    MonitorExit,
    Pop,
    Pop2,
    Dup,
    Dup2,
    Swap,
}

impl CfInst {
    pub fn to_display_string(&self, factory: &ItemFactory) -> String {
        let b = |b: &BlockId| format!(":b{}", usize::from(*b));
        match self {
            CfInst::Label(l) => format!("b{}:", usize::from(*l)),
            CfInst::Load { slot, ty } => format!("{}load {slot}", ty_prefix(*ty)),
            CfInst::Store { slot, ty } => format!("{}store {slot}", ty_prefix(*ty)),
            CfInst::ConstInt(v) => {
                if (-1..=5).contains(v) {
                    if *v == -1 {
                        "iconst_m1".to_string()
                    } else {
                        format!("iconst_{v}")
                    }
                } else if *v == i32::from(*v as i8) {
                    format!("bipush {v}")
                } else if *v == i32::from(*v as i16) {
                    format!("sipush {v}")
                } else {
                    format!("ldc {v}")
                }
            }
            CfInst::ConstLong(v) => {
                if *v == 0 || *v == 1 {
                    format!("lconst_{v}")
                } else {
                    format!("ldc2_w {v}")
                }
            }
            CfInst::ConstFloat(bits) => format!("ldc {}f", f32::from_bits(*bits)),
            CfInst::ConstDouble(bits) => format!("ldc2_w {}d", f64::from_bits(*bits)),
            CfInst::ConstNull => "aconst_null".to_string(),
            CfInst::ConstString(s) => format!("ldc {:?}", factory.string(*s)),
            CfInst::ConstClass(t) => format!("ldc {}", factory.descriptor(*t)),
            CfInst::Binop { op, ty } => op.mnemonic(*ty),
            CfInst::Neg { ty } => format!("{}neg", ty_prefix(ty.value_type())),
            CfInst::Conversion { from, to } => {
                let short = |ty: NumericType| match ty {
                    NumericType::Byte => "b",
                    NumericType::Char => "c",
                    NumericType::Short => "s",
                    NumericType::Int => "i",
                    NumericType::Long => "l",
                    NumericType::Float => "f",
                    NumericType::Double => "d",
                };
                format!("{}2{}", short(*from), short(*to))
            }
            CfInst::Cmp { ty, bias } => match (ty, bias) {
                (NumericType::Long, _) => "lcmp".to_string(),
                (ty, Bias::Lt) => format!("{}cmpl", ty_prefix(ty.value_type())),
                (ty, Bias::Gt) => format!("{}cmpg", ty_prefix(ty.value_type())),
                _ => panic!("float cmp without bias"),
            },
            CfInst::IfCmp { kind, ty, target } => {
                if ty.is_object() {
                    format!("if_acmp{kind} {}", b(target))
                } else {
                    format!("if_icmp{kind} {}", b(target))
                }
            }
            CfInst::IfZero { kind, ty, target } => {
                if ty.is_object() {
                    match kind {
                        IfKind::Eq => format!("ifnull {}", b(target)),
                        IfKind::Ne => format!("ifnonnull {}", b(target)),
                        _ => panic!("ordered null test"),
                    }
                } else {
                    format!("if{kind} {}", b(target))
                }
            }
            CfInst::Goto { target } => format!("goto {}", b(target)),
            CfInst::TableSwitch {
                low,
                targets,
                default,
            } => {
                let targets = targets.iter().map(|t| b(t)).collect::<Vec<_>>().join(", ");
                format!(
                    "tableswitch low={low} [{targets}] default={}",
                    b(default)
                )
            }
            CfInst::LookupSwitch {
                keys,
                targets,
                default,
            } => {
                let cases = keys
                    .iter()
                    .zip(targets.iter())
                    .map(|(k, t)| format!("{k} -> {}", b(t)))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("lookupswitch [{cases}] default={}", b(default))
            }
            CfInst::Return { ty } => match ty {
                Some(ty) => format!("{}return", ty_prefix(*ty)),
                None => "return".to_string(),
            },
            CfInst::Throw => "athrow".to_string(),
            CfInst::GetField(f) => format!("getfield {}", factory.field_to_string(*f)),
            CfInst::PutField(f) => format!("putfield {}", factory.field_to_string(*f)),
            CfInst::GetStatic(f) => format!("getstatic {}", factory.field_to_string(*f)),
            CfInst::PutStatic(f) => format!("putstatic {}", factory.field_to_string(*f)),
            CfInst::Invoke { kind, method } => {
                format!("{} {}", kind.mnemonic(), factory.method_to_string(*method))
            }
            CfInst::New(t) => format!("new {}", factory.descriptor(*t)),
            CfInst::NewArray(t) => {
                let elem = factory.ty(*t).elem.expect("new-array of non-array type");
                if factory.is_primitive(elem) {
                    format!("newarray {}", factory.descriptor(elem))
                } else {
                    format!("anewarray {}", factory.descriptor(elem))
                }
            }
            CfInst::ArrayLength => "arraylength".to_string(),
            CfInst::ArrayLoad { ty } => format!("{}aload", member_prefix(*ty)),
            CfInst::ArrayStore { ty } => format!("{}astore", member_prefix(*ty)),
            CfInst::CheckCast(t) => format!("checkcast {}", factory.descriptor(*t)),
            CfInst::InstanceOf(t) => format!("instanceof {}", factory.descriptor(*t)),
            CfInst::MonitorEnter => "monitorenter".to_string(),
            CfInst::MonitorExit => "monitorexit".to_string(),
            CfInst::Pop => "pop".to_string(),
            CfInst::Pop2 => "pop2".to_string(),
            CfInst::Dup => "dup".to_string(),
            CfInst::Dup2 => "dup2".to_string(),
            CfInst::Swap => "swap".to_string(),
        }
    }
}
