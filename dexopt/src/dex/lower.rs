//! Register-machine lowering.
//!
//! [DexBuilder] walks the IR in block order and emits logical [DexInst]s, consulting the
//! register allocation for every operand. The interesting decisions, per the instruction set's
//! encoding tiers:
//!
//! * binary int ops prefer the 2-address form when the destination register coincides with an
//!   operand's register (either operand for commutative ops) and both fit the 4-bit tier; then
//!   the literal forms when an operand is an inlineable constant (`lit8` for i8 literals with
//!   8-bit registers, `lit16` for i16 literals with 4-bit registers, `rsub` for a constant
//!   left-hand side of a subtraction, and `sub x, #c` becomes `add x, #-c`); then the
//!   3-register form;
//! * constants pick the smallest exact encoding, independently re-deriving the choice that
//!   [ConstNumber::encoded_units] estimates before allocation;
//! * invokes use the small-arity encoding unless the arguments exceed five register slots or
//!   the 4-bit tier (range required), or the allocator reports them already consecutive (range
//!   preferred); a non-consecutive range is built by moving arguments into scratch registers.
//!
//! Phi operands are materialized as moves at the end of predecessor blocks, which requires
//! critical edges into phi-carrying blocks to have been split — the builder reports a violation
//! rather than emitting wrong moves.
//!
//! Imprecise value types must have been refined away before lowering; the builder panics on
//! them, as it does on the stack-machine-only instruction kinds. Both are bugs in the calling
//! pass, not properties of the input.

use crate::{
    dex::insts::{ArithOp, DexInst, InvokeKind, Reg},
    errors::CompilationError,
    ir::{
        code::{BlockId, InstId, IrCode},
        inst::*,
        types::{NumericType, ValueType},
        value::ValueId,
    },
    log::{IRPhase, log_ir, should_log_ir},
    regalloc::RegisterAllocatorT,
};
use smallvec::{SmallVec, smallvec};

/// The lowered form of one method: logical instructions plus the index at which each block
/// starts (in block order), for the writer's branch fixups.
pub struct DexCode {
    pub insts: Vec<DexInst>,
    pub block_starts: Vec<usize>,
}

impl DexCode {
    pub fn to_display_string(&self, factory: &crate::factory::ItemFactory) -> String {
        let mut lines = Vec::new();
        for (bi, start) in self.block_starts.iter().enumerate() {
            let end = self
                .block_starts
                .get(bi + 1)
                .copied()
                .unwrap_or(self.insts.len());
            lines.push(format!("b{bi}:"));
            for inst in &self.insts[*start..end] {
                lines.push(format!("  {}", inst.to_display_string(factory)));
            }
        }
        lines.join("\n")
    }
}

pub fn build_dex(
    code: &IrCode,
    alloc: &dyn RegisterAllocatorT,
) -> Result<DexCode, CompilationError> {
    DexBuilder {
        code,
        alloc,
        out: Vec::new(),
        block_starts: Vec::new(),
    }
    .build()
}

struct DexBuilder<'a> {
    code: &'a IrCode,
    alloc: &'a dyn RegisterAllocatorT,
    out: Vec<DexInst>,
    block_starts: Vec<usize>,
}

impl<'a> DexBuilder<'a> {
    fn build(mut self) -> Result<DexCode, CompilationError> {
        let blocks: Vec<BlockId> = self.code.block_ids().collect();
        for (ordinal, b) in blocks.iter().enumerate() {
            self.block_starts.push(self.out.len());
            let next = blocks.get(ordinal + 1).copied();
            let insts = self.code.block(*b).insts().to_vec();
            for (i, iid) in insts.iter().enumerate() {
                let data = self.code.inst(*iid);
                if data.inst.is_control_flow() {
                    assert_eq!(i, insts.len() - 1, "control flow before block end");
                    self.emit_phi_moves(*b)?;
                }
                self.p_inst(*iid, next)?;
            }
        }
        let result = DexCode {
            insts: self.out,
            block_starts: self.block_starts,
        };
        if should_log_ir(IRPhase::Dex) {
            log_ir(&result.to_display_string(self.code.factory()));
        }
        Ok(result)
    }

    fn reg(&self, v: ValueId, number: u32) -> Reg {
        let r = self.alloc.allocated_register(v, number);
        assert!(r <= u32::from(u16::MAX), "register {r} out of encodable range");
        r as Reg
    }

    fn out_reg(&self, iid: InstId) -> Reg {
        let data = self.code.inst(iid);
        self.reg(data.out_value().expect("no out-value"), data.number())
    }

    /// The register-machine width/GC class of `v`'s type, which must be precise by now.
    fn value_type(&self, v: ValueId) -> ValueType {
        let ty = self.code.value(v).ty();
        assert!(ty.is_precise(), "imprecise type {ty} at lowering");
        ty
    }

    /// Emit the moves that realize the phis of `b`'s successors for the edges out of `b`.
    fn emit_phi_moves(&mut self, b: BlockId) -> Result<(), CompilationError> {
        let succs = self.code.block(b).succs().to_vec();
        for s in &succs {
            let block = self.code.block(*s);
            if block.phis().is_empty() {
                continue;
            }
            if succs.len() > 1 && block.preds().len() > 1 {
                return Err(CompilationError::Internal(format!(
                    "critical edge b{}->b{} into phis must be split before lowering",
                    usize::from(b),
                    usize::from(*s)
                )));
            }
            let pred_index = block
                .preds()
                .iter()
                .position(|p| *p == b)
                .expect("successor does not know its predecessor");
            for pid in block.phis().to_vec() {
                let phi = self.code.phi(pid);
                let src = phi.operands()[pred_index];
                let ty = self.value_type(phi.out);
                // Phis are not numbered; both ends are queried at the edge's source terminator.
                let number = {
                    let last = *self.code.block(b).insts().last().unwrap();
                    self.code.inst(last).number()
                };
                let (sreg, dreg) = (self.reg(src, number), self.reg(phi.out, number));
                if sreg != dreg {
                    self.out.push(DexInst::Move {
                        ty,
                        dest: dreg,
                        src: sreg,
                    });
                }
            }
        }
        Ok(())
    }

    fn p_inst(&mut self, iid: InstId, next: Option<BlockId>) -> Result<(), CompilationError> {
        let data = self.code.inst(iid);
        let n = data.number();
        match &data.inst {
            Inst::Add(x) => self.i_binop(iid, ArithOp::Add, x.ty, x.lhs, x.rhs, true, true),
            Inst::Sub(x) => self.i_binop(iid, ArithOp::Sub, x.ty, x.lhs, x.rhs, false, true),
            Inst::Mul(x) => self.i_binop(iid, ArithOp::Mul, x.ty, x.lhs, x.rhs, true, true),
            Inst::Div(x) => self.i_binop(iid, ArithOp::Div, x.ty, x.lhs, x.rhs, false, true),
            Inst::Rem(x) => self.i_binop(iid, ArithOp::Rem, x.ty, x.lhs, x.rhs, false, true),
            Inst::And(x) => self.i_binop(iid, ArithOp::And, x.ty, x.lhs, x.rhs, true, true),
            Inst::Or(x) => self.i_binop(iid, ArithOp::Or, x.ty, x.lhs, x.rhs, true, true),
            Inst::Xor(x) => self.i_binop(iid, ArithOp::Xor, x.ty, x.lhs, x.rhs, true, true),
            Inst::Shl(x) => self.i_binop(iid, ArithOp::Shl, x.ty, x.lhs, x.rhs, false, false),
            Inst::Shr(x) => self.i_binop(iid, ArithOp::Shr, x.ty, x.lhs, x.rhs, false, false),
            Inst::Ushr(x) => self.i_binop(iid, ArithOp::Ushr, x.ty, x.lhs, x.rhs, false, false),
            Inst::Neg(x) => {
                let (dest, src) = (self.out_reg(iid), self.reg(x.src, n));
                assert!(dest <= 0xf && src <= 0xf);
                self.out.push(DexInst::Neg {
                    ty: x.ty,
                    dest,
                    src,
                });
            }
            Inst::Not(x) => {
                let (dest, src) = (self.out_reg(iid), self.reg(x.src, n));
                assert!(dest <= 0xf && src <= 0xf);
                self.out.push(DexInst::Not {
                    ty: x.ty,
                    dest,
                    src,
                });
            }
            Inst::NumberConversion(x) => {
                let (dest, src) = (self.out_reg(iid), self.reg(x.src, n));
                assert!(dest <= 0xf && src <= 0xf);
                self.out.push(DexInst::Conversion {
                    from: x.from,
                    to: x.to,
                    dest,
                    src,
                });
            }
            Inst::Cmp(x) => {
                self.out.push(DexInst::Cmp {
                    ty: x.ty,
                    bias: x.bias,
                    dest: self.out_reg(iid),
                    lhs: self.reg(x.lhs, n),
                    rhs: self.reg(x.rhs, n),
                });
            }
            Inst::If(x) => {
                let block = data.block().unwrap();
                let succs = self.code.block(block).succs().to_vec();
                let (taken, fallthrough) = (succs[0], succs[1]);
                match x.rhs {
                    Some(rhs) => self.out.push(DexInst::If {
                        kind: x.kind,
                        lhs: self.reg(x.lhs, n),
                        rhs: self.reg(rhs, n),
                        target: taken,
                    }),
                    None => self.out.push(DexInst::IfZ {
                        kind: x.kind,
                        src: self.reg(x.lhs, n),
                        target: taken,
                    }),
                }
                if next != Some(fallthrough) {
                    self.out.push(DexInst::Goto {
                        target: fallthrough,
                    });
                }
            }
            Inst::Goto(_) => {
                let block = data.block().unwrap();
                let target = self.code.block(block).succs()[0];
                // A goto to the next block in layout order is the writer's fallthrough.
                if next != Some(target) {
                    self.out.push(DexInst::Goto { target });
                }
            }
            Inst::Switch(x) => {
                let block = data.block().unwrap();
                let succs = self.code.block(block).succs().to_vec();
                let case_targets = succs[..x.keys.len()].to_vec();
                let fallthrough = succs[x.keys.len()];
                let src = self.reg(x.src, n);
                if x.is_packed() {
                    self.out.push(DexInst::PackedSwitch {
                        src,
                        first_key: x.keys[0],
                        targets: case_targets,
                    });
                } else {
                    self.out.push(DexInst::SparseSwitch {
                        src,
                        keys: x.keys.to_vec(),
                        targets: case_targets,
                    });
                }
                if next != Some(fallthrough) {
                    self.out.push(DexInst::Goto {
                        target: fallthrough,
                    });
                }
            }
            Inst::Return(x) => match x.src {
                Some(src) => {
                    let ty = x.ty.expect("typed return without type");
                    assert!(ty.is_precise());
                    self.out.push(DexInst::Return {
                        ty,
                        src: self.reg(src, n),
                    });
                }
                None => self.out.push(DexInst::ReturnVoid),
            },
            Inst::Throw(x) => {
                self.out.push(DexInst::Throw {
                    src: self.reg(x.src, n),
                });
            }
            Inst::ConstNumber(x) => self.i_const(iid, x),
            Inst::ConstString(x) => {
                self.out.push(DexInst::ConstString {
                    dest: self.out_reg(iid),
                    value: x.value,
                });
            }
            Inst::ConstClass(x) => {
                self.out.push(DexInst::ConstClass {
                    dest: self.out_reg(iid),
                    ty: x.ty,
                });
            }
            Inst::Argument(_) => {
                // Argument values live in the registers the calling convention delivers them
                // in; the allocator accounts for that, so nothing is emitted.
            }
            Inst::Move(x) => {
                let (dest, src) = (self.out_reg(iid), self.reg(x.src, n));
                if dest != src {
                    self.out.push(DexInst::Move {
                        ty: self.value_type(x.src),
                        dest,
                        src,
                    });
                }
            }
            Inst::ArrayLength(x) => {
                self.out.push(DexInst::ArrayLength {
                    dest: self.out_reg(iid),
                    array: self.reg(x.array, n),
                });
            }
            Inst::NewArrayEmpty(x) => {
                self.out.push(DexInst::NewArray {
                    dest: self.out_reg(iid),
                    size: self.reg(x.size, n),
                    ty: x.ty,
                });
            }
            Inst::NewArrayFilledData(x) => {
                self.out.push(DexInst::FillArrayData {
                    array: self.reg(x.array, n),
                    element_width: x.element_width,
                    size: x.size,
                    data: x.data.clone(),
                });
            }
            Inst::InvokeNewArray(x) => self.i_filled_new_array(iid, x),
            Inst::ArrayGet(x) => {
                assert!(x.ty.is_precise(), "imprecise array access at lowering");
                self.out.push(DexInst::Aget {
                    ty: x.ty,
                    dest: self.out_reg(iid),
                    array: self.reg(x.array, n),
                    index: self.reg(x.index, n),
                });
            }
            Inst::ArrayPut(x) => {
                assert!(x.ty.is_precise(), "imprecise array access at lowering");
                self.out.push(DexInst::Aput {
                    ty: x.ty,
                    src: self.reg(x.src, n),
                    array: self.reg(x.array, n),
                    index: self.reg(x.index, n),
                });
            }
            Inst::InstanceGet(x) => {
                self.out.push(DexInst::Iget {
                    ty: x.ty,
                    dest: self.out_reg(iid),
                    object: self.reg(x.object, n),
                    field: x.field,
                });
            }
            Inst::InstancePut(x) => {
                self.out.push(DexInst::Iput {
                    ty: x.ty,
                    src: self.reg(x.src, n),
                    object: self.reg(x.object, n),
                    field: x.field,
                });
            }
            Inst::StaticGet(x) => {
                self.out.push(DexInst::Sget {
                    ty: x.ty,
                    dest: self.out_reg(iid),
                    field: x.field,
                });
            }
            Inst::StaticPut(x) => {
                self.out.push(DexInst::Sput {
                    ty: x.ty,
                    src: self.reg(x.src, n),
                    field: x.field,
                });
            }
            Inst::NewInstance(x) => {
                self.out.push(DexInst::NewInstance {
                    dest: self.out_reg(iid),
                    ty: x.ty,
                });
            }
            Inst::CheckCast(x) => {
                // check-cast refines in place; a distinct out register needs a copy.
                let src = self.reg(x.object, n);
                self.out.push(DexInst::CheckCast { src, ty: x.ty });
                if let Some(out) = data.out_value()
                    && self.code.value(out).is_used()
                {
                    let dest = self.reg(out, n);
                    if dest != src {
                        self.out.push(DexInst::Move {
                            ty: ValueType::Object,
                            dest,
                            src,
                        });
                    }
                }
            }
            Inst::InstanceOf(x) => {
                self.out.push(DexInst::InstanceOf {
                    dest: self.out_reg(iid),
                    src: self.reg(x.object, n),
                    ty: x.ty,
                });
            }
            Inst::Monitor(x) => {
                let src = self.reg(x.object, n);
                self.out.push(match x.kind {
                    crate::ir::types::MonitorKind::Enter => DexInst::MonitorEnter { src },
                    crate::ir::types::MonitorKind::Exit => DexInst::MonitorExit { src },
                });
            }
            Inst::InvokeVirtual(x) => {
                self.i_invoke(iid, InvokeKind::Virtual, x.method, &x.args)
            }
            Inst::InvokeInterface(x) => {
                self.i_invoke(iid, InvokeKind::Interface, x.method, &x.args)
            }
            Inst::InvokeDirect(x) => self.i_invoke(iid, InvokeKind::Direct, x.method, &x.args),
            Inst::InvokeStatic(x) => self.i_invoke(iid, InvokeKind::Static, x.method, &x.args),
            Inst::InvokeSuper(x) => self.i_invoke(iid, InvokeKind::Super, x.method, &x.args),
            Inst::DebugPosition(_) | Inst::DebugLocalRead(_) => {
                // Materialized through the writer's debug info tables, not as code.
            }
            Inst::DebugLocalWrite(x) => {
                let (dest, src) = (self.out_reg(iid), self.reg(x.src, n));
                if dest != src {
                    self.out.push(DexInst::Move {
                        ty: self.value_type(x.src),
                        dest,
                        src,
                    });
                }
            }
            Inst::Load(_)
            | Inst::Store(_)
            | Inst::Pop(_)
            | Inst::Dup(_)
            | Inst::Dup2(_)
            | Inst::Swap(_) => {
                unreachable!("stack-machine instruction {:?} has no register-machine form", data.inst)
            }
        }
        Ok(())
    }

    fn i_const(&mut self, iid: InstId, x: &ConstNumber) {
        assert!(x.ty.is_precise(), "imprecise constant type at lowering");
        let dest = self.out_reg(iid);
        let inst = if x.ty.is_wide() {
            if x.bits == i64::from(x.bits as i16) {
                DexInst::ConstWide16 {
                    dest,
                    value: x.bits as i16,
                }
            } else if x.bits & 0xffff_ffff_ffff == 0 {
                DexInst::ConstWideHigh16 {
                    dest,
                    value: (x.bits >> 48) as i16,
                }
            } else if x.bits == i64::from(x.bits as i32) {
                DexInst::ConstWide32 {
                    dest,
                    value: x.bits as i32,
                }
            } else {
                DexInst::ConstWide64 {
                    dest,
                    value: x.bits,
                }
            }
        } else {
            let v = x.bits as i32;
            if dest <= 0xf && (-8..8).contains(&v) {
                DexInst::Const4 {
                    dest,
                    value: v as i8,
                }
            } else if v == i32::from(v as i16) {
                DexInst::Const16 {
                    dest,
                    value: v as i16,
                }
            } else if v & 0xffff == 0 {
                DexInst::ConstHigh16 {
                    dest,
                    value: (v >> 16) as i16,
                }
            } else {
                DexInst::Const32 { dest, value: v }
            }
        };
        debug_assert_eq!(inst.size_units(), x.encoded_units(u32::from(dest)));
        self.out.push(inst);
    }

    #[allow(clippy::too_many_arguments)]
    fn i_binop(
        &mut self,
        iid: InstId,
        op: ArithOp,
        ty: NumericType,
        lhs: ValueId,
        rhs: ValueId,
        commutative: bool,
        lit16: bool,
    ) {
        let n = self.code.inst(iid).number();
        let dest = self.out_reg(iid);
        let (l, r) = (self.reg(lhs, n), self.reg(rhs, n));

        // 1. The two-address form, when the destination aliases an operand in the nibble tier.
        if dest == l && dest <= 0xf && r <= 0xf {
            self.out.push(DexInst::Binop2Addr {
                op,
                ty,
                srcdest: dest,
                src: r,
            });
            return;
        }
        if commutative && dest == r && dest <= 0xf && l <= 0xf {
            self.out.push(DexInst::Binop2Addr {
                op,
                ty,
                srcdest: dest,
                src: l,
            });
            return;
        }

        // 2. Literal forms, int only.
        if ty == NumericType::Int {
            let rhs_const = self.code.const_of(rhs).map(|c| c.as_int());
            let lhs_const = self.code.const_of(lhs).map(|c| c.as_int());
            // `sub x, #c` has no literal encoding of its own; it becomes `add x, #-c`.
            let (lit_op, lit, src) = match (op, rhs_const, lhs_const) {
                (ArithOp::Sub, Some(c), _) if c != i32::MIN => (ArithOp::Add, Some(-c), l),
                (ArithOp::Sub, _, Some(c)) => (ArithOp::Rsub, Some(c), r),
                (_, Some(c), _) if op != ArithOp::Sub => (op, Some(c), l),
                // A constant on the left of a commutative op can take the literal slot too.
                (_, None, Some(c)) if commutative => (op, Some(c), r),
                _ => (op, None, l),
            };
            if let Some(lit) = lit {
                if lit == i32::from(lit as i8) && dest <= 0xff && src <= 0xff {
                    self.out.push(DexInst::BinopLit8 {
                        op: lit_op,
                        dest,
                        src,
                        lit: lit as i8,
                    });
                    return;
                }
                if lit16 && lit == i32::from(lit as i16) && dest <= 0xf && src <= 0xf {
                    self.out.push(DexInst::BinopLit16 {
                        op: lit_op,
                        dest,
                        src,
                        lit: lit as i16,
                    });
                    return;
                }
            }
        }

        // 3. The plain 3-register form.
        assert!(
            dest <= 0xff && l <= 0xff && r <= 0xff,
            "binop registers out of the 8-bit tier"
        );
        self.out.push(DexInst::Binop {
            op,
            ty,
            dest,
            lhs: l,
            rhs: r,
        });
    }

    /// Collect the flattened argument register slots of a call-shaped instruction.
    fn arg_slots(&self, args: &[ValueId], n: u32) -> SmallVec<[Reg; 5]> {
        let mut slots: SmallVec<[Reg; 5]> = smallvec![];
        for arg in args {
            let r = self.reg(*arg, n);
            slots.push(r);
            if self.value_type(*arg).is_wide() {
                slots.push(r + 1);
            }
        }
        slots
    }

    /// Decide small-arity vs. range and return the range base after materializing any moves
    /// needed to make the arguments consecutive.
    fn range_base(&mut self, args: &[ValueId], slots: &[Reg], n: u32) -> Reg {
        if self.alloc.arguments_are_consecutive(self.code, args, n) {
            return slots[0];
        }
        // Build the argument block in scratch registers above the allocation.
        let base = self.alloc.registers_used();
        assert!(base + slots.len() as u32 <= u32::from(u16::MAX));
        let mut at = base as Reg;
        for arg in args {
            let ty = self.value_type(*arg);
            self.out.push(DexInst::Move {
                ty,
                dest: at,
                src: self.reg(*arg, n),
            });
            at += ty.required_registers() as Reg;
        }
        base as Reg
    }

    fn i_invoke(&mut self, iid: InstId, kind: InvokeKind, method: crate::factory::MethodId, args: &[ValueId]) {
        let data = self.code.inst(iid);
        let n = data.number();
        let slots = self.arg_slots(args, n);
        let needs_range = slots.len() > 5 || slots.iter().any(|r| *r > 0xf);
        let prefers_range =
            args.len() >= 2 && self.alloc.arguments_are_consecutive(self.code, args, n);
        if needs_range || prefers_range {
            let count = slots.len() as u16;
            let first = self.range_base(args, &slots, n);
            self.out.push(DexInst::InvokeRange {
                kind,
                method,
                first,
                count,
            });
        } else {
            self.out.push(DexInst::Invoke {
                kind,
                method,
                args: slots,
            });
        }
        if let Some(out) = data.out_value()
            && self.code.value(out).is_used()
        {
            let ty = self.value_type(out);
            self.out.push(DexInst::MoveResult {
                ty,
                dest: self.reg(out, n),
            });
        }
    }

    fn i_filled_new_array(&mut self, iid: InstId, x: &InvokeNewArray) {
        let data = self.code.inst(iid);
        let n = data.number();
        let slots = self.arg_slots(&x.args, n);
        if slots.len() > 5 || slots.iter().any(|r| *r > 0xf) {
            let count = slots.len() as u16;
            let first = self.range_base(&x.args, &slots, n);
            self.out.push(DexInst::FilledNewArrayRange {
                ty: x.ty,
                first,
                count,
            });
        } else {
            self.out.push(DexInst::FilledNewArray {
                ty: x.ty,
                args: slots,
            });
        }
        if let Some(out) = data.out_value()
            && self.code.value(out).is_used()
        {
            self.out.push(DexInst::MoveResult {
                ty: ValueType::Object,
                dest: self.reg(out, n),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{builder::tests::test_builder, types::IfKind},
        regalloc::NaiveAllocator,
    };
    use fm::FMatcher;
    use std::collections::HashMap;

    /// An allocator with a hand-written value-to-register map, so tests can exercise specific
    /// encoding tiers (the naive allocator never aliases registers, which e.g. the 2-address
    /// forms require).
    struct TestAllocator {
        regs: HashMap<ValueId, u32>,
        used: u32,
    }

    impl TestAllocator {
        fn new(pairs: &[(ValueId, u32)]) -> Self {
            let used = pairs.iter().map(|(_, r)| r + 2).max().unwrap_or(0);
            Self {
                regs: pairs.iter().copied().collect(),
                used,
            }
        }
    }

    impl RegisterAllocatorT for TestAllocator {
        fn allocated_register(&self, v: ValueId, _number: u32) -> u32 {
            self.regs[&v]
        }

        fn registers_used(&self) -> u32 {
            self.used
        }
    }

    fn assert_dex_matches(dex: &DexCode, factory: &crate::factory::ItemFactory, ptn: &str) {
        let text = dex.to_display_string(factory);
        if let Err(e) = FMatcher::new(ptn).unwrap().matches(&text) {
            panic!("{e}");
        }
    }

    fn int_add_code() -> (IrCode, ValueId, ValueId, ValueId) {
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
        let mut code = b.build().unwrap();
        code.renumber();
        (code, lhs, rhs, sum)
    }

    #[test]
    fn binop_two_address_form() {
        let (code, lhs, rhs, sum) = int_add_code();
        // dest aliases lhs: 2addr.
        let ra = TestAllocator::new(&[(lhs, 0), (rhs, 1), (sum, 0)]);
        let dex = build_dex(&code, &ra).unwrap();
        assert_dex_matches(
            &dex,
            code.factory(),
            "b0:
  add-int/2addr v0, v1
  return v0",
        );
        // dest aliases rhs: still 2addr because add is commutative.
        let ra = TestAllocator::new(&[(lhs, 0), (rhs, 1), (sum, 1)]);
        let dex = build_dex(&code, &ra).unwrap();
        assert_dex_matches(
            &dex,
            code.factory(),
            "b0:
  add-int/2addr v1, v0
  return v1",
        );
    }

    #[test]
    fn binop_three_register_form() {
        let (code, lhs, rhs, sum) = int_add_code();
        let ra = TestAllocator::new(&[(lhs, 0), (rhs, 1), (sum, 2)]);
        let dex = build_dex(&code, &ra).unwrap();
        assert_dex_matches(
            &dex,
            code.factory(),
            "b0:
  add-int v2, v0, v1
  return v2",
        );
        // 2addr needs the nibble tier: an aliased destination above v15 falls back.
        let ra = TestAllocator::new(&[(lhs, 16), (rhs, 1), (sum, 16)]);
        let dex = build_dex(&code, &ra).unwrap();
        assert_dex_matches(
            &dex,
            code.factory(),
            "b0:
  add-int v16, v16, v1
  return v16",
        );
    }

    fn add_lit_code(c: i64) -> (IrCode, ValueId, ValueId, ValueId) {
        let mut b = test_builder(&[ValueType::Int]);
        let lhs = b.read_register(0, ValueType::Int).unwrap();
        let konst = b.add_with_out(
            ConstNumber {
                ty: ValueType::Int,
                bits: c,
            }
            .into(),
            ValueType::Int,
            1,
        );
        let sum = b.add_with_out(
            Add {
                ty: NumericType::Int,
                lhs,
                rhs: konst,
            }
            .into(),
            ValueType::Int,
            0,
        );
        b.add_return(Some((sum, ValueType::Int)));
        let mut code = b.build().unwrap();
        code.renumber();
        (code, lhs, konst, sum)
    }

    #[test]
    fn binop_literal_forms() {
        // An i8 literal takes the lit8 form even with 8-bit registers.
        let (code, lhs, konst, sum) = add_lit_code(100);
        let ra = TestAllocator::new(&[(lhs, 20), (konst, 21), (sum, 22)]);
        let dex = build_dex(&code, &ra).unwrap();
        assert_dex_matches(
            &dex,
            code.factory(),
            "b0:
  const/16 v21, #100
  add-int/lit8 v22, v20, #100
  return v22",
        );
        // An i16 literal needs lit16, which only has nibble registers.
        let (code, lhs, konst, sum) = add_lit_code(1000);
        let ra = TestAllocator::new(&[(lhs, 2), (konst, 3), (sum, 4)]);
        let dex = build_dex(&code, &ra).unwrap();
        assert_dex_matches(
            &dex,
            code.factory(),
            "b0:
  const/16 v3, #1000
  add-int/lit16 v4, v2, #1000
  return v4",
        );
        // Too big for any literal: 3-register form.
        let (code, lhs, konst, sum) = add_lit_code(100_000);
        let ra = TestAllocator::new(&[(lhs, 2), (konst, 3), (sum, 4)]);
        let dex = build_dex(&code, &ra).unwrap();
        assert_dex_matches(
            &dex,
            code.factory(),
            "b0:
  const v3, #100000
  add-int v4, v2, v3
  return v4",
        );
    }

    #[test]
    fn sub_by_constant_becomes_add_or_rsub() {
        // sub v0, #10 => add-int/lit8 with -10.
        let mut b = test_builder(&[ValueType::Int]);
        let lhs = b.read_register(0, ValueType::Int).unwrap();
        let k = b.add_with_out(
            ConstNumber {
                ty: ValueType::Int,
                bits: 10,
            }
            .into(),
            ValueType::Int,
            1,
        );
        let d = b.add_with_out(
            Sub {
                ty: NumericType::Int,
                lhs,
                rhs: k,
            }
            .into(),
            ValueType::Int,
            0,
        );
        // #20 - v0 => rsub-int/lit8.
        let d2 = b.add_with_out(
            Sub {
                ty: NumericType::Int,
                lhs: k,
                rhs: d,
            }
            .into(),
            ValueType::Int,
            2,
        );
        b.add_return(Some((d2, ValueType::Int)));
        let mut code = b.build().unwrap();
        code.renumber();
        let ra = NaiveAllocator::new(&code);
        let dex = build_dex(&code, &ra).unwrap();
        assert_dex_matches(
            &dex,
            code.factory(),
            "b0:
  const/4 v1, #10
  add-int/lit8 v2, v0, #-10
  rsub-int/lit8 v3, v2, #10
  return v3",
        );
    }

    #[test]
    fn const_encodings_match_their_estimates() {
        let cases: Vec<(ValueType, i64)> = vec![
            (ValueType::Int, 7),
            (ValueType::Int, -8),
            (ValueType::Int, 1000),
            (ValueType::Int, 0x70000),
            (ValueType::Int, 0x7fff0000),
            (ValueType::Int, 0x12345678),
            (ValueType::Long, 0),
            (ValueType::Long, 0x7fff),
            (ValueType::Long, 0x123456),
            (ValueType::Long, 0x7fff_0000_0000_0000),
            (ValueType::Long, 0x1234_5678_9abc_def0),
            (ValueType::Double, f64::to_bits(2.0) as i64),
        ];
        for (ty, bits) in cases {
            let mut b = test_builder(&[]);
            let v = b.add_with_out(ConstNumber { ty, bits }.into(), ty, 0);
            b.add_return(Some((v, ty)));
            let mut code = b.build().unwrap();
            code.renumber();
            let ra = NaiveAllocator::new(&code);
            let dex = build_dex(&code, &ra).unwrap();
            let reg = ra.allocated_register(v, 0);
            let Some(Inst::ConstNumber(c)) = code.defining_inst(v) else {
                panic!()
            };
            // The width chosen with a register in hand must equal the allocation-independent
            // estimate.
            assert_eq!(
                dex.insts[0].size_units(),
                c.encoded_units(reg),
                "{ty:?} {bits:#x}"
            );
        }
    }

    #[test]
    fn invoke_forms() {
        let mut factory = crate::factory::ItemFactory::new();
        let callee2 = factory.intern_method("Lcom/example/A;", "two", "V", &["I", "I"]);
        let callee7 = factory.intern_method(
            "Lcom/example/A;",
            "seven",
            "I",
            &["I", "I", "I", "I", "I", "I", "I"],
        );
        let m = factory.intern_method("Lcom/example/A;", "f", "I", &["I", "I"]);
        let mut b = crate::ir::builder::IrBuilder::new(
            std::sync::Arc::new(factory),
            m,
            &[ValueType::Int, ValueType::Int],
        );
        let a0 = b.read_register(0, ValueType::Int).unwrap();
        let a1 = b.read_register(1, ValueType::Int).unwrap();
        b.add_void_invoke(
            InvokeStatic {
                method: callee2,
                args: smallvec![a0, a1],
            }
            .into(),
        );
        let r = b.add_with_out(
            InvokeStatic {
                method: callee7,
                args: smallvec![a0, a1, a0, a1, a0, a1, a0],
            }
            .into(),
            ValueType::Int,
            2,
        );
        b.add_return(Some((r, ValueType::Int)));
        let mut code = b.build().unwrap();
        code.renumber();
        let ra = NaiveAllocator::new(&code);
        let dex = build_dex(&code, &ra).unwrap();
        assert_dex_matches(
            &dex,
            code.factory(),
            "b0:
  invoke-static/range {v0 .. v1}, Lcom/example/A;->two(II)V
  move v3, v0
  move v4, v1
  move v5, v0
  move v6, v1
  move v7, v0
  move v8, v1
  move v9, v0
  invoke-static/range {v3 .. v9}, Lcom/example/A;->seven(IIIIIII)I
  move-result v2
  return v2",
        );
    }

    #[test]
    fn invoke_small_arity_when_not_consecutive() {
        let mut factory = crate::factory::ItemFactory::new();
        let callee = factory.intern_method("Lcom/example/A;", "g", "V", &["I", "I"]);
        let m = factory.intern_method("Lcom/example/A;", "f", "V", &["I", "I"]);
        let mut b = crate::ir::builder::IrBuilder::new(
            std::sync::Arc::new(factory),
            m,
            &[ValueType::Int, ValueType::Int],
        );
        let a0 = b.read_register(0, ValueType::Int).unwrap();
        let a1 = b.read_register(1, ValueType::Int).unwrap();
        b.add_void_invoke(
            InvokeStatic {
                method: callee,
                args: smallvec![a1, a0],
            }
            .into(),
        );
        b.add_return(None);
        let mut code = b.build().unwrap();
        code.renumber();
        let ra = NaiveAllocator::new(&code);
        let dex = build_dex(&code, &ra).unwrap();
        // (v1, v0) is not a consecutive run, so the small-arity form is used.
        assert_dex_matches(
            &dex,
            code.factory(),
            "b0:
  invoke-static {v1, v0}, Lcom/example/A;->g(II)V
  return-void",
        );
    }

    #[test]
    fn phi_moves_and_fallthrough() {
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
        b.add_with_out(
            Add {
                ty: NumericType::Int,
                lhs,
                rhs,
            }
            .into(),
            ValueType::Int,
            2,
        );
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
        let mut code = b.build().unwrap();
        code.renumber();
        let ra = NaiveAllocator::new(&code);
        let dex = build_dex(&code, &ra).unwrap();
        // The phi lands in v4 (allocated after both block bodies); each predecessor moves its
        // operand in before jumping, and the goto from b2 to b3 is elided as a fallthrough.
        assert_dex_matches(
            &dex,
            code.factory(),
            "b0:
  if-eqz v0, :b1
  goto :b2
b1:
  add-int v2, v0, v1
  move v4, v2
  goto :b3
b2:
  sub-int v3, v0, v1
  move v4, v3
b3:
  return v4",
        );
    }

    #[test]
    #[should_panic(expected = "no register-machine form")]
    fn stack_instructions_refuse_dex_lowering() {
        let mut b = test_builder(&[ValueType::Int]);
        let v = b.read_register(0, ValueType::Int).unwrap();
        b.add_no_out(Load { src: v }.into());
        b.add_return(Some((v, ValueType::Int)));
        let mut code = b.build().unwrap();
        code.renumber();
        let ra = NaiveAllocator::new(&code);
        let _ = build_dex(&code, &ra);
    }
}
