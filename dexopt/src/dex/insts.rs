//! Logical register-machine instructions.
//!
//! These mirror the target's opcode families but keep symbolic operands: registers are plain
//! numbers, branch targets are [BlockId]s, and references are factory handles. The physical
//! writer chooses final pc offsets and payload placement; what *is* decided here is the
//! encoding variant (2-address vs. 3-register vs. literal binops, the constant width forms,
//! small-arity vs. range invokes), because those choices depend on register allocation and
//! value knowledge the writer no longer has. [DexInst::size_units] reports each variant's size
//! in 16-bit code units so size estimates can be cross-checked against encoding choices.

use crate::{
    factory::{FieldId, ItemFactory, MethodId, StringId, TypeId},
    ir::{
        code::BlockId,
        types::{Bias, IfKind, MemberType, NumericType, ValueType},
    },
};
use smallvec::SmallVec;

pub type Reg = u16;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArithOp {
    Add,
    Sub,
    Rsub,
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

impl ArithOp {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "sub",
            ArithOp::Rsub => "rsub",
            ArithOp::Mul => "mul",
            ArithOp::Div => "div",
            ArithOp::Rem => "rem",
            ArithOp::And => "and",
            ArithOp::Or => "or",
            ArithOp::Xor => "xor",
            ArithOp::Shl => "shl",
            ArithOp::Shr => "shr",
            ArithOp::Ushr => "ushr",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InvokeKind {
    Virtual,
    Super,
    Direct,
    Static,
    Interface,
}

impl InvokeKind {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            InvokeKind::Virtual => "invoke-virtual",
            InvokeKind::Super => "invoke-super",
            InvokeKind::Direct => "invoke-direct",
            InvokeKind::Static => "invoke-static",
            InvokeKind::Interface => "invoke-interface",
        }
    }
}

/// The width/GC suffix of a move/return/move-result family opcode.
fn value_suffix(ty: ValueType) -> &'static str {
    match ty {
        ValueType::Object => "-object",
        ValueType::Long | ValueType::Double => "-wide",
        _ => "",
    }
}

/// The member-kind suffix of an array or field access opcode. Int and float share the plain
/// width-based form.
fn member_suffix(ty: MemberType) -> &'static str {
    match ty {
        MemberType::Int | MemberType::Float | MemberType::IntOrFloat => "",
        MemberType::Long | MemberType::Double | MemberType::LongOrDouble => "-wide",
        MemberType::Object => "-object",
        MemberType::Boolean => "-boolean",
        MemberType::Byte => "-byte",
        MemberType::Char => "-char",
        MemberType::Short => "-short",
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum DexInst {
    Move {
        ty: ValueType,
        dest: Reg,
        src: Reg,
    },
    MoveResult {
        ty: ValueType,
        dest: Reg,
    },
    Const4 {
        dest: Reg,
        value: i8,
    },
    Const16 {
        dest: Reg,
        value: i16,
    },
    /// `value` is the *high* half: the encoded constant is `value << 16`.
    ConstHigh16 {
        dest: Reg,
        value: i16,
    },
    Const32 {
        dest: Reg,
        value: i32,
    },
    ConstWide16 {
        dest: Reg,
        value: i16,
    },
    ConstWide32 {
        dest: Reg,
        value: i32,
    },
    /// `value` is the high 16 bits: the encoded constant is `(value as i64) << 48`.
    ConstWideHigh16 {
        dest: Reg,
        value: i16,
    },
    ConstWide64 {
        dest: Reg,
        value: i64,
    },
    ConstString {
        dest: Reg,
        value: StringId,
    },
    ConstClass {
        dest: Reg,
        ty: TypeId,
    },
    MonitorEnter {
        src: Reg,
    },
    MonitorExit {
        src: Reg,
    },
    CheckCast {
        src: Reg,
        ty: TypeId,
    },
    InstanceOf {
        dest: Reg,
        src: Reg,
        ty: TypeId,
    },
    ArrayLength {
        dest: Reg,
        array: Reg,
    },
    NewInstance {
        dest: Reg,
        ty: TypeId,
    },
    NewArray {
        dest: Reg,
        size: Reg,
        ty: TypeId,
    },
    FilledNewArray {
        ty: TypeId,
        args: SmallVec<[Reg; 5]>,
    },
    FilledNewArrayRange {
        ty: TypeId,
        first: Reg,
        count: u16,
    },
    FillArrayData {
        array: Reg,
        element_width: u16,
        size: u32,
        data: Box<[u16]>,
    },
    Throw {
        src: Reg,
    },
    Goto {
        target: BlockId,
    },
    PackedSwitch {
        src: Reg,
        first_key: i32,
        targets: Vec<BlockId>,
    },
    SparseSwitch {
        src: Reg,
        keys: Vec<i32>,
        targets: Vec<BlockId>,
    },
    Cmp {
        ty: NumericType,
        bias: Bias,
        dest: Reg,
        lhs: Reg,
        rhs: Reg,
    },
    If {
        kind: IfKind,
        lhs: Reg,
        rhs: Reg,
        target: BlockId,
    },
    IfZ {
        kind: IfKind,
        src: Reg,
        target: BlockId,
    },
    Aget {
        ty: MemberType,
        dest: Reg,
        array: Reg,
        index: Reg,
    },
    Aput {
        ty: MemberType,
        src: Reg,
        array: Reg,
        index: Reg,
    },
    Iget {
        ty: MemberType,
        dest: Reg,
        object: Reg,
        field: FieldId,
    },
    Iput {
        ty: MemberType,
        src: Reg,
        object: Reg,
        field: FieldId,
    },
    Sget {
        ty: MemberType,
        dest: Reg,
        field: FieldId,
    },
    Sput {
        ty: MemberType,
        src: Reg,
        field: FieldId,
    },
    Invoke {
        kind: InvokeKind,
        method: MethodId,
        args: SmallVec<[Reg; 5]>,
    },
    InvokeRange {
        kind: InvokeKind,
        method: MethodId,
        first: Reg,
        count: u16,
    },
    ReturnVoid,
    Return {
        ty: ValueType,
        src: Reg,
    },
    Binop {
        op: ArithOp,
        ty: NumericType,
        dest: Reg,
        lhs: Reg,
        rhs: Reg,
    },
    Binop2Addr {
        op: ArithOp,
        ty: NumericType,
        srcdest: Reg,
        src: Reg,
    },
    BinopLit16 {
        op: ArithOp,
        dest: Reg,
        src: Reg,
        lit: i16,
    },
    BinopLit8 {
        op: ArithOp,
        dest: Reg,
        src: Reg,
        lit: i8,
    },
    Neg {
        ty: NumericType,
        dest: Reg,
        src: Reg,
    },
    Not {
        ty: NumericType,
        dest: Reg,
        src: Reg,
    },
    Conversion {
        from: NumericType,
        to: NumericType,
        dest: Reg,
        src: Reg,
    },
}

impl DexInst {
    /// This instruction's size in 16-bit code units (switch/fill payload tables excluded: the
    /// writer places those out of line).
    pub fn size_units(&self) -> u32 {
        match self {
            DexInst::Move { dest, src, .. } => {
                if *dest <= 0xf && *src <= 0xf {
                    1
                } else if *dest <= 0xff {
                    2
                } else {
                    3
                }
            }
            DexInst::MoveResult { .. } => 1,
            DexInst::Const4 { .. } => 1,
            DexInst::Const16 { .. } | DexInst::ConstHigh16 { .. } => 2,
            DexInst::Const32 { .. } => 3,
            DexInst::ConstWide16 { .. } | DexInst::ConstWideHigh16 { .. } => 2,
            DexInst::ConstWide32 { .. } => 3,
            DexInst::ConstWide64 { .. } => 5,
            DexInst::ConstString { .. } | DexInst::ConstClass { .. } => 2,
            DexInst::MonitorEnter { .. } | DexInst::MonitorExit { .. } => 1,
            DexInst::CheckCast { .. } | DexInst::InstanceOf { .. } => 2,
            DexInst::ArrayLength { .. } => 1,
            DexInst::NewInstance { .. } | DexInst::NewArray { .. } => 2,
            DexInst::FilledNewArray { .. } | DexInst::FilledNewArrayRange { .. } => 3,
            DexInst::FillArrayData { .. } => 3,
            DexInst::Throw { .. } => 1,
            // Branch distances are symbolic here; the writer may need goto/16 or goto/32.
            DexInst::Goto { .. } => 1,
            DexInst::PackedSwitch { .. } | DexInst::SparseSwitch { .. } => 3,
            DexInst::Cmp { .. } => 2,
            DexInst::If { .. } | DexInst::IfZ { .. } => 2,
            DexInst::Aget { .. } | DexInst::Aput { .. } => 2,
            DexInst::Iget { .. } | DexInst::Iput { .. } => 2,
            DexInst::Sget { .. } | DexInst::Sput { .. } => 2,
            DexInst::Invoke { .. } | DexInst::InvokeRange { .. } => 3,
            DexInst::ReturnVoid | DexInst::Return { .. } => 1,
            DexInst::Binop { .. } => 2,
            DexInst::Binop2Addr { .. } => 1,
            DexInst::BinopLit16 { .. } | DexInst::BinopLit8 { .. } => 2,
            DexInst::Neg { .. } | DexInst::Not { .. } | DexInst::Conversion { .. } => 1,
        }
    }

    pub fn to_display_string(&self, factory: &ItemFactory) -> String {
        let b = |b: &BlockId| format!(":b{}", usize::from(*b));
        match self {
            DexInst::Move { ty, dest, src } => {
                let wide = match self.size_units() {
                    1 => "",
                    2 => "/from16",
                    _ => "/16",
                };
                format!("move{}{} v{dest}, v{src}", value_suffix(*ty), wide)
            }
            DexInst::MoveResult { ty, dest } => {
                format!("move-result{} v{dest}", value_suffix(*ty))
            }
            DexInst::Const4 { dest, value } => format!("const/4 v{dest}, #{value}"),
            DexInst::Const16 { dest, value } => format!("const/16 v{dest}, #{value}"),
            DexInst::ConstHigh16 { dest, value } => {
                format!("const/high16 v{dest}, #{}", (i32::from(*value)) << 16)
            }
            DexInst::Const32 { dest, value } => format!("const v{dest}, #{value}"),
            DexInst::ConstWide16 { dest, value } => format!("const-wide/16 v{dest}, #{value}"),
            DexInst::ConstWide32 { dest, value } => format!("const-wide/32 v{dest}, #{value}"),
            DexInst::ConstWideHigh16 { dest, value } => {
                format!("const-wide/high16 v{dest}, #{}", i64::from(*value) << 48)
            }
            DexInst::ConstWide64 { dest, value } => format!("const-wide v{dest}, #{value}"),
            DexInst::ConstString { dest, value } => {
                format!("const-string v{dest}, {:?}", factory.string(*value))
            }
            DexInst::ConstClass { dest, ty } => {
                format!("const-class v{dest}, {}", factory.descriptor(*ty))
            }
            DexInst::MonitorEnter { src } => format!("monitor-enter v{src}"),
            DexInst::MonitorExit { src } => format!("monitor-exit v{src}"),
            DexInst::CheckCast { src, ty } => {
                format!("check-cast v{src}, {}", factory.descriptor(*ty))
            }
            DexInst::InstanceOf { dest, src, ty } => {
                format!("instance-of v{dest}, v{src}, {}", factory.descriptor(*ty))
            }
            DexInst::ArrayLength { dest, array } => format!("array-length v{dest}, v{array}"),
            DexInst::NewInstance { dest, ty } => {
                format!("new-instance v{dest}, {}", factory.descriptor(*ty))
            }
            DexInst::NewArray { dest, size, ty } => {
                format!("new-array v{dest}, v{size}, {}", factory.descriptor(*ty))
            }
            DexInst::FilledNewArray { ty, args } => {
                let args = args
                    .iter()
                    .map(|r| format!("v{r}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("filled-new-array {{{args}}}, {}", factory.descriptor(*ty))
            }
            DexInst::FilledNewArrayRange { ty, first, count } => format!(
                "filled-new-array/range {{v{first} .. v{}}}, {}",
                first + count - 1,
                factory.descriptor(*ty)
            ),
            DexInst::FillArrayData {
                array,
                element_width,
                size,
                ..
            } => format!("fill-array-data v{array}, width={element_width}, size={size}"),
            DexInst::Throw { src } => format!("throw v{src}"),
            DexInst::Goto { target } => format!("goto {}", b(target)),
            DexInst::PackedSwitch {
                src,
                first_key,
                targets,
            } => {
                let targets = targets.iter().map(|t| b(t)).collect::<Vec<_>>().join(", ");
                format!("packed-switch v{src}, first_key={first_key}, [{targets}]")
            }
            DexInst::SparseSwitch { src, keys, targets } => {
                let cases = keys
                    .iter()
                    .zip(targets.iter())
                    .map(|(k, t)| format!("{k} -> {}", b(t)))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("sparse-switch v{src}, [{cases}]")
            }
            DexInst::Cmp {
                ty,
                bias,
                dest,
                lhs,
                rhs,
            } => {
                let m = match bias {
                    Bias::None => "cmp",
                    Bias::Gt => "cmpg",
                    Bias::Lt => "cmpl",
                };
                format!("{m}-{ty} v{dest}, v{lhs}, v{rhs}")
            }
            DexInst::If {
                kind,
                lhs,
                rhs,
                target,
            } => format!("if-{kind} v{lhs}, v{rhs}, {}", b(target)),
            DexInst::IfZ { kind, src, target } => format!("if-{kind}z v{src}, {}", b(target)),
            DexInst::Aget {
                ty,
                dest,
                array,
                index,
            } => format!("aget{} v{dest}, v{array}, v{index}", member_suffix(*ty)),
            DexInst::Aput {
                ty,
                src,
                array,
                index,
            } => format!("aput{} v{src}, v{array}, v{index}", member_suffix(*ty)),
            DexInst::Iget {
                ty,
                dest,
                object,
                field,
            } => format!(
                "iget{} v{dest}, v{object}, {}",
                member_suffix(*ty),
                factory.field_to_string(*field)
            ),
            DexInst::Iput {
                ty,
                src,
                object,
                field,
            } => format!(
                "iput{} v{src}, v{object}, {}",
                member_suffix(*ty),
                factory.field_to_string(*field)
            ),
            DexInst::Sget { ty, dest, field } => format!(
                "sget{} v{dest}, {}",
                member_suffix(*ty),
                factory.field_to_string(*field)
            ),
            DexInst::Sput { ty, src, field } => format!(
                "sput{} v{src}, {}",
                member_suffix(*ty),
                factory.field_to_string(*field)
            ),
            DexInst::Invoke { kind, method, args } => {
                let args = args
                    .iter()
                    .map(|r| format!("v{r}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "{} {{{args}}}, {}",
                    kind.mnemonic(),
                    factory.method_to_string(*method)
                )
            }
            DexInst::InvokeRange {
                kind,
                method,
                first,
                count,
            } => format!(
                "{}/range {{v{first} .. v{}}}, {}",
                kind.mnemonic(),
                first + count - 1,
                factory.method_to_string(*method)
            ),
            DexInst::ReturnVoid => "return-void".to_string(),
            DexInst::Return { ty, src } => format!("return{} v{src}", value_suffix(*ty)),
            DexInst::Binop {
                op,
                ty,
                dest,
                lhs,
                rhs,
            } => format!("{}-{ty} v{dest}, v{lhs}, v{rhs}", op.mnemonic()),
            DexInst::Binop2Addr {
                op,
                ty,
                srcdest,
                src,
            } => format!("{}-{ty}/2addr v{srcdest}, v{src}", op.mnemonic()),
            // The 16-bit-literal reverse subtraction has no "/lit16" suffix in the target's
            // mnemonic scheme.
            DexInst::BinopLit16 {
                op: ArithOp::Rsub,
                dest,
                src,
                lit,
            } => format!("rsub-int v{dest}, v{src}, #{lit}"),
            DexInst::BinopLit16 { op, dest, src, lit } => {
                format!("{}-int/lit16 v{dest}, v{src}, #{lit}", op.mnemonic())
            }
            DexInst::BinopLit8 { op, dest, src, lit } => {
                format!("{}-int/lit8 v{dest}, v{src}, #{lit}", op.mnemonic())
            }
            DexInst::Neg { ty, dest, src } => format!("neg-{ty} v{dest}, v{src}"),
            DexInst::Not { ty, dest, src } => format!("not-{ty} v{dest}, v{src}"),
            DexInst::Conversion { from, to, dest, src } => {
                format!("{from}-to-{to} v{dest}, v{src}")
            }
        }
    }
}
