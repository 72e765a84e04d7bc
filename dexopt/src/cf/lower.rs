//! Stack-machine lowering.
//!
//! By the time [build_cf] runs, load/store insertion has made every operand an explicit push
//! and every live result an explicit store, so each instruction lowers in isolation: it trusts
//! that the operand stack holds its inputs in declared order and emits its opcode(s). The only
//! multi-opcode case is bitwise not, which the stack machine spells as an xor with all-ones.

use crate::{
    cf::{
        insts::{CfBinop, CfInst, CfInvokeKind},
        load_store::SlotAssignment,
    },
    errors::CompilationError,
    factory::ItemFactory,
    ir::{
        code::{BlockId, IrCode},
        inst::Inst,
        types::{MonitorKind, NumericType, ValueType},
        value::ValueId,
    },
    log::{IRPhase, log_ir, should_log_ir},
};

pub fn build_cf(code: &IrCode, slots: &SlotAssignment) -> Result<Vec<CfInst>, CompilationError> {
    CfBuilder {
        code,
        slots,
        out: Vec::new(),
    }
    .build()
}

pub fn cf_to_display_string(insts: &[CfInst], factory: &ItemFactory) -> String {
    insts
        .iter()
        .map(|inst| match inst {
            CfInst::Label(_) => inst.to_display_string(factory),
            _ => format!("  {}", inst.to_display_string(factory)),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

struct CfBuilder<'a> {
    code: &'a IrCode,
    slots: &'a SlotAssignment,
    out: Vec<CfInst>,
}

impl<'a> CfBuilder<'a> {
    fn build(mut self) -> Result<Vec<CfInst>, CompilationError> {
        let blocks: Vec<BlockId> = self.code.block_ids().collect();
        for (ordinal, b) in blocks.iter().enumerate() {
            self.out.push(CfInst::Label(*b));
            let next = blocks.get(ordinal + 1).copied();
            for iid in self.code.block(*b).insts().to_vec() {
                self.p_inst(iid, next)?;
            }
        }
        if should_log_ir(IRPhase::Cf) {
            log_ir(&cf_to_display_string(&self.out, self.code.factory()));
        }
        Ok(self.out)
    }

    fn value_type(&self, v: ValueId) -> ValueType {
        let ty = self.code.value(v).ty();
        assert!(ty.is_precise(), "imprecise type {ty} at lowering");
        ty
    }

    fn i_binop(&mut self, op: CfBinop, ty: NumericType) {
        assert!(
            matches!(
                ty,
                NumericType::Int | NumericType::Long | NumericType::Float | NumericType::Double
            ),
            "sub-int arithmetic has no stack-machine opcodes"
        );
        self.out.push(CfInst::Binop { op, ty });
    }

    fn p_inst(&mut self, iid: crate::ir::code::InstId, next: Option<BlockId>) -> Result<(), CompilationError> {
        let data = self.code.inst(iid);
        match &data.inst {
            Inst::Add(x) => self.i_binop(CfBinop::Add, x.ty),
            Inst::Sub(x) => self.i_binop(CfBinop::Sub, x.ty),
            Inst::Mul(x) => self.i_binop(CfBinop::Mul, x.ty),
            Inst::Div(x) => self.i_binop(CfBinop::Div, x.ty),
            Inst::Rem(x) => self.i_binop(CfBinop::Rem, x.ty),
            Inst::And(x) => self.i_binop(CfBinop::And, x.ty),
            Inst::Or(x) => self.i_binop(CfBinop::Or, x.ty),
            Inst::Xor(x) => self.i_binop(CfBinop::Xor, x.ty),
            Inst::Shl(x) => self.i_binop(CfBinop::Shl, x.ty),
            Inst::Shr(x) => self.i_binop(CfBinop::Shr, x.ty),
            Inst::Ushr(x) => self.i_binop(CfBinop::Ushr, x.ty),
            Inst::Neg(x) => self.out.push(CfInst::Neg { ty: x.ty }),
            Inst::Not(x) => {
                // The stack machine has no bitwise not: xor with all-ones.
                match x.ty {
                    NumericType::Int => self.out.push(CfInst::ConstInt(-1)),
                    NumericType::Long => self.out.push(CfInst::ConstLong(-1)),
                    ty => panic!("not-{ty}"),
                }
                self.i_binop(CfBinop::Xor, x.ty);
            }
            Inst::NumberConversion(x) => self.out.push(CfInst::Conversion {
                from: x.from,
                to: x.to,
            }),
            Inst::Cmp(x) => self.out.push(CfInst::Cmp {
                ty: x.ty,
                bias: x.bias,
            }),
            Inst::If(x) => {
                let block = data.block().unwrap();
                let succs = self.code.block(block).succs().to_vec();
                let (taken, fallthrough) = (succs[0], succs[1]);
                let ty = self.value_type(x.lhs);
                match x.rhs {
                    Some(_) => self.out.push(CfInst::IfCmp {
                        kind: x.kind,
                        ty,
                        target: taken,
                    }),
                    None => self.out.push(CfInst::IfZero {
                        kind: x.kind,
                        ty,
                        target: taken,
                    }),
                }
                if next != Some(fallthrough) {
                    self.out.push(CfInst::Goto {
                        target: fallthrough,
                    });
                }
            }
            Inst::Goto(_) => {
                let block = data.block().unwrap();
                let target = self.code.block(block).succs()[0];
                if next != Some(target) {
                    self.out.push(CfInst::Goto { target });
                }
            }
            Inst::Switch(x) => {
                let block = data.block().unwrap();
                let succs = self.code.block(block).succs().to_vec();
                let targets = succs[..x.keys.len()].to_vec();
                let default = succs[x.keys.len()];
                if x.is_packed() {
                    self.out.push(CfInst::TableSwitch {
                        low: x.keys[0],
                        targets,
                        default,
                    });
                } else {
                    self.out.push(CfInst::LookupSwitch {
                        keys: x.keys.to_vec(),
                        targets,
                        default,
                    });
                }
            }
            Inst::Return(x) => self.out.push(CfInst::Return { ty: x.ty }),
            Inst::Throw(_) => self.out.push(CfInst::Throw),
            Inst::ConstNumber(x) => {
                assert!(x.ty.is_precise(), "imprecise constant type at lowering");
                self.out.push(match x.ty {
                    ValueType::Int => CfInst::ConstInt(x.bits as i32),
                    ValueType::Long => CfInst::ConstLong(x.bits),
                    ValueType::Float => CfInst::ConstFloat(x.bits as u32),
                    ValueType::Double => CfInst::ConstDouble(x.bits as u64),
                    ValueType::Object => {
                        assert!(x.is_zero());
                        CfInst::ConstNull
                    }
                    _ => unreachable!(),
                });
            }
            Inst::ConstString(x) => self.out.push(CfInst::ConstString(x.value)),
            Inst::ConstClass(x) => self.out.push(CfInst::ConstClass(x.ty)),
            Inst::Argument(_) => {
                // Parameters are already in their slots on frame entry.
            }
            Inst::Move(_) | Inst::DebugLocalWrite(_) => {
                // The surrounding load/store pair is the whole copy.
            }
            Inst::ArrayLength(_) => self.out.push(CfInst::ArrayLength),
            Inst::NewArrayEmpty(x) => self.out.push(CfInst::NewArray(x.ty)),
            Inst::NewArrayFilledData(_) | Inst::InvokeNewArray(_) => {
                unreachable!(
                    "register-machine instruction {:?} has no stack-machine form",
                    data.inst
                )
            }
            Inst::ArrayGet(x) => {
                assert!(x.ty.is_precise(), "imprecise array access at lowering");
                self.out.push(CfInst::ArrayLoad { ty: x.ty });
            }
            Inst::ArrayPut(x) => {
                assert!(x.ty.is_precise(), "imprecise array access at lowering");
                self.out.push(CfInst::ArrayStore { ty: x.ty });
            }
            Inst::InstanceGet(x) => self.out.push(CfInst::GetField(x.field)),
            Inst::InstancePut(x) => self.out.push(CfInst::PutField(x.field)),
            Inst::StaticGet(x) => self.out.push(CfInst::GetStatic(x.field)),
            Inst::StaticPut(x) => self.out.push(CfInst::PutStatic(x.field)),
            Inst::NewInstance(x) => self.out.push(CfInst::New(x.ty)),
            Inst::CheckCast(x) => self.out.push(CfInst::CheckCast(x.ty)),
            Inst::InstanceOf(x) => self.out.push(CfInst::InstanceOf(x.ty)),
            Inst::Monitor(x) => self.out.push(match x.kind {
                MonitorKind::Enter => CfInst::MonitorEnter,
                MonitorKind::Exit => CfInst::MonitorExit,
            }),
            Inst::InvokeVirtual(x) => self.out.push(CfInst::Invoke {
                kind: CfInvokeKind::Virtual,
                method: x.method,
            }),
            Inst::InvokeInterface(x) => self.out.push(CfInst::Invoke {
                kind: CfInvokeKind::Interface,
                method: x.method,
            }),
            // Direct and super dispatch both use the special-invocation opcode.
            Inst::InvokeDirect(x) => self.out.push(CfInst::Invoke {
                kind: CfInvokeKind::Special,
                method: x.method,
            }),
            Inst::InvokeSuper(x) => self.out.push(CfInst::Invoke {
                kind: CfInvokeKind::Special,
                method: x.method,
            }),
            Inst::InvokeStatic(x) => self.out.push(CfInst::Invoke {
                kind: CfInvokeKind::Static,
                method: x.method,
            }),
            Inst::DebugPosition(_) | Inst::DebugLocalRead(_) => {
                // Line number and local tables are the writer's concern.
            }
            Inst::Load(x) => {
                let ty = self.value_type(x.src);
                self.out.push(CfInst::Load {
                    slot: self.slots.slot_of(x.src),
                    ty,
                });
            }
            Inst::Store(x) => {
                let ty = self.value_type(x.src);
                self.out.push(CfInst::Store {
                    slot: self.slots.slot_of(x.src),
                    ty,
                });
            }
            Inst::Pop(x) => {
                self.out.push(if self.value_type(x.src).is_wide() {
                    CfInst::Pop2
                } else {
                    CfInst::Pop
                });
            }
            Inst::Dup(_) => self.out.push(CfInst::Dup),
            Inst::Dup2(_) => self.out.push(CfInst::Dup2),
            Inst::Swap(_) => self.out.push(CfInst::Swap),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cf::load_store::insert_loads_and_stores,
        ir::{
            builder::tests::test_builder,
            inst::{Add, NewArrayFilledData, Not},
            types::{IfKind, NumericType},
        },
    };
    use fm::FMatcher;

    fn assert_cf_matches(insts: &[CfInst], factory: &ItemFactory, ptn: &str) {
        let text = cf_to_display_string(insts, factory);
        if let Err(e) = FMatcher::new(ptn).unwrap().matches(&text) {
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
        let mut code = b.build().unwrap();
        let slots = insert_loads_and_stores(&mut code).unwrap();
        let cf = build_cf(&code, &slots).unwrap();
        assert_cf_matches(
            &cf,
            code.factory(),
            "b0:
  iload 0
  iload 1
  iadd
  ireturn",
        );
    }

    #[test]
    fn bitwise_not_is_xor_with_all_ones() {
        let mut b = test_builder(&[ValueType::Int]);
        let v = b.read_register(0, ValueType::Int).unwrap();
        let n = b.add_with_out(
            Not {
                ty: NumericType::Int,
                src: v,
            }
            .into(),
            ValueType::Int,
            0,
        );
        b.add_return(Some((n, ValueType::Int)));
        let mut code = b.build().unwrap();
        let slots = insert_loads_and_stores(&mut code).unwrap();
        let cf = build_cf(&code, &slots).unwrap();
        assert_cf_matches(
            &cf,
            code.factory(),
            "b0:
  iload 0
  iconst_m1
  ixor
  ireturn",
        );
    }

    #[test]
    fn diamond_with_phi() {
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
        let rhs = b.read_register(1, ValueType::Int).unwrap();
        b.write_register(2, rhs);
        b.add_goto(join);
        b.switch_to(join);
        b.seal_block(join).unwrap();
        let r = b.read_register(2, ValueType::Int).unwrap();
        b.add_return(Some((r, ValueType::Int)));
        let mut code = b.build().unwrap();
        let slots = insert_loads_and_stores(&mut code).unwrap();
        let cf = build_cf(&code, &slots).unwrap();
        // Slots: parameters 0/1, the add 2, the phi 3. The goto from b2 to b3 is a fallthrough.
        assert_cf_matches(
            &cf,
            code.factory(),
            "b0:
  iload 0
  ifeq :b1
  goto :b2
b1:
  iload 0
  iload 1
  iadd
  istore 2
  iload 2
  istore 3
  goto :b3
b2:
  iload 1
  istore 3
b3:
  iload 3
  ireturn",
        );
    }

    #[test]
    #[should_panic(expected = "no stack-machine form")]
    fn fill_array_data_refuses_cf_lowering() {
        let mut b = test_builder(&[ValueType::Object]);
        let arr = b.read_register(0, ValueType::Object).unwrap();
        b.add_no_out(
            NewArrayFilledData {
                array: arr,
                element_width: 4,
                size: 2,
                data: vec![1, 0, 2, 0].into_boxed_slice(),
            }
            .into(),
        );
        b.add_return(None);
        let mut code = b.build().unwrap();
        let slots = insert_loads_and_stores(&mut code).unwrap();
        let _ = build_cf(&code, &slots);
    }
}
