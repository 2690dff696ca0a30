//! Per-opcode instruction compilers.
//!
//! Each handler either emits the instruction inline and returns `true`,
//! or returns `false` before emitting anything so the caller falls back
//! to the interpreter.

use rec_core::cpu::NPC_OFFSET;
use rec_core::{CodeBlockInstruction, GuestReg, Opcode};

use super::{BlockState, CodeGenerator};
use crate::label::Label;
use crate::value::{RegSize, Value};
use crate::x86_64::{emit_cmovcc, emit_movzx, emit_setcc, X86Cond, OPC_MOVZBL};

type CompileFn = fn(&mut CodeGenerator<'_>, &mut BlockState, &CodeBlockInstruction) -> bool;

static COMPILE_TABLE: [Option<CompileFn>; Opcode::COUNT] = build_table();

const fn build_table() -> [Option<CompileFn>; Opcode::COUNT] {
    let mut t: [Option<CompileFn>; Opcode::COUNT] = [None; Opcode::COUNT];

    t[Opcode::Lui as usize] = Some(compile_lui as CompileFn);
    t[Opcode::Ori as usize] = Some(compile_bitwise_imm as CompileFn);
    t[Opcode::Andi as usize] = Some(compile_bitwise_imm as CompileFn);
    t[Opcode::Xori as usize] = Some(compile_bitwise_imm as CompileFn);
    t[Opcode::Addiu as usize] = Some(compile_addiu as CompileFn);
    t[Opcode::Slti as usize] = Some(compile_set_less as CompileFn);
    t[Opcode::Sltiu as usize] = Some(compile_set_less as CompileFn);
    t[Opcode::Slt as usize] = Some(compile_set_less as CompileFn);
    t[Opcode::Sltu as usize] = Some(compile_set_less as CompileFn);

    t[Opcode::Sll as usize] = Some(compile_shift as CompileFn);
    t[Opcode::Srl as usize] = Some(compile_shift as CompileFn);
    t[Opcode::Sra as usize] = Some(compile_shift as CompileFn);
    t[Opcode::Sllv as usize] = Some(compile_shift as CompileFn);
    t[Opcode::Srlv as usize] = Some(compile_shift as CompileFn);
    t[Opcode::Srav as usize] = Some(compile_shift as CompileFn);

    t[Opcode::Addu as usize] = Some(compile_alu as CompileFn);
    t[Opcode::Subu as usize] = Some(compile_alu as CompileFn);
    t[Opcode::And as usize] = Some(compile_alu as CompileFn);
    t[Opcode::Or as usize] = Some(compile_alu as CompileFn);
    t[Opcode::Xor as usize] = Some(compile_alu as CompileFn);
    t[Opcode::Nor as usize] = Some(compile_alu as CompileFn);

    t[Opcode::Add as usize] = Some(compile_add_sub_checked as CompileFn);
    t[Opcode::Addi as usize] = Some(compile_add_sub_checked as CompileFn);
    t[Opcode::Sub as usize] = Some(compile_add_sub_checked as CompileFn);

    t[Opcode::Mfhi as usize] = Some(compile_move_hi_lo as CompileFn);
    t[Opcode::Mflo as usize] = Some(compile_move_hi_lo as CompileFn);
    t[Opcode::Mthi as usize] = Some(compile_move_hi_lo as CompileFn);
    t[Opcode::Mtlo as usize] = Some(compile_move_hi_lo as CompileFn);
    t[Opcode::Mult as usize] = Some(compile_multiply as CompileFn);
    t[Opcode::Multu as usize] = Some(compile_multiply as CompileFn);

    t[Opcode::J as usize] = Some(compile_branch as CompileFn);
    t[Opcode::Jal as usize] = Some(compile_branch as CompileFn);
    t[Opcode::Jr as usize] = Some(compile_branch as CompileFn);
    t[Opcode::Jalr as usize] = Some(compile_branch as CompileFn);
    t[Opcode::Beq as usize] = Some(compile_branch as CompileFn);
    t[Opcode::Bne as usize] = Some(compile_branch as CompileFn);
    t[Opcode::Blez as usize] = Some(compile_branch as CompileFn);
    t[Opcode::Bgtz as usize] = Some(compile_branch as CompileFn);
    t[Opcode::Bltz as usize] = Some(compile_branch as CompileFn);
    t[Opcode::Bgez as usize] = Some(compile_branch as CompileFn);
    t[Opcode::Bltzal as usize] = Some(compile_branch as CompileFn);
    t[Opcode::Bgezal as usize] = Some(compile_branch as CompileFn);

    t
}

pub(super) fn compile_fn(op: Opcode) -> Option<CompileFn> {
    COMPILE_TABLE[op as usize]
}

/// Whether `op` is emitted inline rather than through the interpreter.
pub fn has_specialized_compiler(op: Opcode) -> bool {
    COMPILE_TABLE[op as usize].is_some()
}

impl CodeGenerator<'_> {
    /// Read a source operand and keep its host register alive until the
    /// end of the instruction.
    fn read_operand(&mut self, reg: GuestReg) -> Value {
        let v = self.regs.read_guest_register(self.buf, reg);
        if let Some(r) = v.host_reg() {
            self.regs.lock(r);
        }
        v
    }

    fn write_result(&mut self, st: &mut BlockState, reg: GuestReg, value: &Value) {
        if reg.is_zero() {
            return;
        }
        self.regs.write_guest_register(self.buf, reg, value);
        st.instruction_writes |= 1u64 << reg.index();
    }

    /// `lhs < rhs` as 0 or 1.
    fn set_less_values(&mut self, lhs: &Value, rhs: &Value, signed: bool) -> Value {
        if let (Some(a), Some(b)) = (lhs.constant_value(), rhs.constant_value()) {
            let less = if signed {
                (a as u32 as i32) < (b as u32 as i32)
            } else {
                (a as u32) < (b as u32)
            };
            return Value::constant_u32(u32::from(less));
        }
        let res = self.regs.allocate_host_reg(self.buf);
        self.emit_copy_value(res, lhs);
        self.emit_cmp(res, RegSize::S32, rhs);
        emit_setcc(self.buf, if signed { X86Cond::Jl } else { X86Cond::Jb }, res);
        emit_movzx(self.buf, OPC_MOVZBL, res, res);
        Value::scratch(res, RegSize::S32)
    }

    /// Slow path of an overflowing `add`/`addi`/`sub`: let the interpreter
    /// re-execute the instruction and raise the exception, then leave.
    /// Compile-time state is left as the main line expects it.
    fn emit_overflow_exit(&mut self, st: &BlockState, insn: &CodeBlockInstruction) {
        use rec_core::cpu::CURRENT_INSTRUCTION_IN_BRANCH_DELAY_SLOT_OFFSET;

        self.regs.emit_flush_for_exit(self.buf);
        self.sync_current_instruction_pc(st);
        if st.delayed_pc_add > 0 {
            self.emit_pc_add(st.delayed_pc_add);
        }
        if st.in_delay_slot {
            self.emit_store_cpu_struct_field(
                CURRENT_INSTRUCTION_IN_BRANCH_DELAY_SLOT_OFFSET,
                &Value::constant(1, RegSize::S8),
            );
        }
        let interpret = self.functions.interpret_instruction as *const u8;
        self.emit_function_call_ptr(
            None,
            interpret,
            &[
                Value::host(crate::x86_64::STATE_REG, RegSize::S64),
                Value::constant_u32(insn.bits()),
            ],
        );
        self.emit_exit_stub(st, false);
    }
}

fn compile_lui(
    gen: &mut CodeGenerator<'_>,
    st: &mut BlockState,
    insn: &CodeBlockInstruction,
) -> bool {
    let i = insn.instruction;
    gen.write_result(st, i.rt(), &Value::constant_u32(i.imm_zext() << 16));
    true
}

fn compile_bitwise_imm(
    gen: &mut CodeGenerator<'_>,
    st: &mut BlockState,
    insn: &CodeBlockInstruction,
) -> bool {
    let i = insn.instruction;
    if i.rt().is_zero() {
        return true;
    }
    let lhs = gen.read_operand(i.rs());
    let imm = Value::constant_u32(i.imm_zext());
    let res = match insn.op {
        Opcode::Ori => gen.or_values(&lhs, &imm),
        Opcode::Andi => gen.and_values(&lhs, &imm),
        _ => gen.xor_values(&lhs, &imm),
    };
    gen.write_result(st, i.rt(), &res);
    true
}

fn compile_addiu(
    gen: &mut CodeGenerator<'_>,
    st: &mut BlockState,
    insn: &CodeBlockInstruction,
) -> bool {
    let i = insn.instruction;
    if i.rt().is_zero() {
        return true;
    }
    let lhs = gen.read_operand(i.rs());
    let res = gen.add_values(&lhs, &Value::constant_u32(i.imm_sext()));
    gen.write_result(st, i.rt(), &res);
    true
}

fn compile_set_less(
    gen: &mut CodeGenerator<'_>,
    st: &mut BlockState,
    insn: &CodeBlockInstruction,
) -> bool {
    let i = insn.instruction;
    let (dest, rhs_reg) = match insn.op {
        Opcode::Slti | Opcode::Sltiu => (i.rt(), None),
        _ => (i.rd(), Some(i.rt())),
    };
    if dest.is_zero() {
        return true;
    }
    let signed = matches!(insn.op, Opcode::Slt | Opcode::Slti);
    let lhs = gen.read_operand(i.rs());
    let rhs = match rhs_reg {
        Some(r) => gen.read_operand(r),
        // sltiu compares against the sign-extended immediate too.
        None => Value::constant_u32(i.imm_sext()),
    };
    let res = gen.set_less_values(&lhs, &rhs, signed);
    gen.write_result(st, dest, &res);
    true
}

fn compile_shift(
    gen: &mut CodeGenerator<'_>,
    st: &mut BlockState,
    insn: &CodeBlockInstruction,
) -> bool {
    let i = insn.instruction;
    if i.rd().is_zero() {
        return true;
    }
    let value = gen.read_operand(i.rt());
    let amount = match insn.op {
        Opcode::Sll | Opcode::Srl | Opcode::Sra => Value::constant_u32(i.sa()),
        _ => gen.read_operand(i.rs()),
    };
    let res = match insn.op {
        Opcode::Sll | Opcode::Sllv => gen.shl_values(&value, &amount),
        Opcode::Srl | Opcode::Srlv => gen.shr_values(&value, &amount),
        _ => gen.sar_values(&value, &amount),
    };
    gen.write_result(st, i.rd(), &res);
    true
}

fn compile_alu(
    gen: &mut CodeGenerator<'_>,
    st: &mut BlockState,
    insn: &CodeBlockInstruction,
) -> bool {
    let i = insn.instruction;
    if i.rd().is_zero() {
        return true;
    }
    let lhs = gen.read_operand(i.rs());
    let rhs = gen.read_operand(i.rt());
    let res = match insn.op {
        Opcode::Addu => gen.add_values(&lhs, &rhs),
        Opcode::Subu => gen.sub_values(&lhs, &rhs),
        Opcode::And => gen.and_values(&lhs, &rhs),
        Opcode::Or => gen.or_values(&lhs, &rhs),
        Opcode::Xor => gen.xor_values(&lhs, &rhs),
        _ => {
            let or = gen.or_values(&lhs, &rhs);
            match or.constant_u32_value() {
                Some(c) => Value::constant_u32(!c),
                None => {
                    if let Some(r) = or.host_reg() {
                        gen.emit_not(r, RegSize::S32);
                    }
                    or
                }
            }
        }
    };
    gen.write_result(st, i.rd(), &res);
    true
}

fn compile_add_sub_checked(
    gen: &mut CodeGenerator<'_>,
    st: &mut BlockState,
    insn: &CodeBlockInstruction,
) -> bool {
    let i = insn.instruction;
    let is_sub = insn.op == Opcode::Sub;
    let (dest, rhs_reg) = match insn.op {
        Opcode::Addi => (i.rt(), None),
        _ => (i.rd(), Some(i.rt())),
    };

    let lhs = gen.read_operand(i.rs());
    let rhs = match rhs_reg {
        Some(r) => gen.read_operand(r),
        None => Value::constant_u32(i.imm_sext()),
    };

    if let (Some(a), Some(b)) = (lhs.constant_u32_value(), rhs.constant_u32_value()) {
        let (a, b) = (a as i32, b as i32);
        let result = if is_sub {
            a.checked_sub(b)
        } else {
            a.checked_add(b)
        };
        // A guaranteed overflow is left to the interpreter.
        return match result {
            Some(v) => {
                gen.write_result(st, dest, &Value::constant_u32(v as u32));
                true
            }
            None => false,
        };
    }

    let res = gen.regs.allocate_host_reg(gen.buf);
    let flags = gen.regs.allocate_host_reg(gen.buf);
    gen.emit_copy_value(res, &lhs);
    if is_sub {
        gen.emit_sub(res, RegSize::S32, &rhs);
    } else {
        gen.emit_add(res, RegSize::S32, &rhs);
    }
    gen.read_flags_from_host(flags);
    gen.emit_test(flags, RegSize::S32, &Value::constant_u32(X86_FLAGS_OF));
    gen.regs.release_scratch(flags);

    let mut no_overflow = Label::new();
    gen.emit_jump_if(X86Cond::Je, &mut no_overflow);
    gen.emit_overflow_exit(st, insn);
    gen.bind_label(&mut no_overflow);

    gen.write_result(st, dest, &Value::scratch(res, RegSize::S32));
    true
}

/// Overflow flag in RFLAGS.
const X86_FLAGS_OF: u32 = 1 << 11;

fn compile_move_hi_lo(
    gen: &mut CodeGenerator<'_>,
    st: &mut BlockState,
    insn: &CodeBlockInstruction,
) -> bool {
    let i = insn.instruction;
    let (dest, src) = match insn.op {
        Opcode::Mfhi => (i.rd(), GuestReg::HI),
        Opcode::Mflo => (i.rd(), GuestReg::LO),
        Opcode::Mthi => (GuestReg::HI, i.rs()),
        _ => (GuestReg::LO, i.rs()),
    };
    if dest.is_zero() {
        return true;
    }
    let v = gen.read_operand(src);
    gen.write_result(st, dest, &v);
    true
}

fn compile_multiply(
    gen: &mut CodeGenerator<'_>,
    st: &mut BlockState,
    insn: &CodeBlockInstruction,
) -> bool {
    let i = insn.instruction;
    let signed = insn.op == Opcode::Mult;

    let lhs = gen.read_operand(i.rs());
    let rhs = gen.read_operand(i.rt());
    let lhs64 = gen.convert_value_size(&lhs, RegSize::S64, signed);
    let rhs64 = gen.convert_value_size(&rhs, RegSize::S64, signed);
    let product = gen.mul_values(&lhs64, &rhs64);

    let lo = gen.convert_value_size(&product, RegSize::S32, false);
    let hi64 = gen.shr_values(&product, &Value::constant(32, RegSize::S64));
    let hi = gen.convert_value_size(&hi64, RegSize::S32, false);

    gen.write_result(st, GuestReg::HI, &hi);
    gen.write_result(st, GuestReg::LO, &lo);
    true
}

/// Condition with the operands of the comparison exchanged.
fn swap_operands(cond: X86Cond) -> X86Cond {
    match cond {
        X86Cond::Jl => X86Cond::Jg,
        X86Cond::Jg => X86Cond::Jl,
        X86Cond::Jle => X86Cond::Jge,
        X86Cond::Jge => X86Cond::Jle,
        X86Cond::Jb => X86Cond::Ja,
        X86Cond::Ja => X86Cond::Jb,
        X86Cond::Jbe => X86Cond::Jae,
        X86Cond::Jae => X86Cond::Jbe,
        c => c,
    }
}

fn condition_holds(cond: X86Cond, a: u32, b: u32) -> bool {
    let (sa, sb) = (a as i32, b as i32);
    match cond {
        X86Cond::Je => a == b,
        X86Cond::Jne => a != b,
        X86Cond::Jl => sa < sb,
        X86Cond::Jle => sa <= sb,
        X86Cond::Jg => sa > sb,
        X86Cond::Jge => sa >= sb,
        other => unreachable!("no guest branch uses {other:?}"),
    }
}

fn compile_branch(
    gen: &mut CodeGenerator<'_>,
    st: &mut BlockState,
    insn: &CodeBlockInstruction,
) -> bool {
    let i = insn.instruction;
    let pc = insn.pc;
    let return_address = Value::constant_u32(pc.wrapping_add(8));

    // Operands are captured before the link register is written.
    let (target, condition) = match insn.op {
        Opcode::J | Opcode::Jal => (Value::constant_u32(i.jump_target(pc)), None),
        Opcode::Jr | Opcode::Jalr => (gen.read_operand(i.rs()), None),
        op => {
            let lhs = gen.read_operand(i.rs());
            let (rhs, cond) = match op {
                Opcode::Beq => (gen.read_operand(i.rt()), X86Cond::Je),
                Opcode::Bne => (gen.read_operand(i.rt()), X86Cond::Jne),
                Opcode::Blez => (Value::constant_u32(0), X86Cond::Jle),
                Opcode::Bgtz => (Value::constant_u32(0), X86Cond::Jg),
                Opcode::Bltz | Opcode::Bltzal => (Value::constant_u32(0), X86Cond::Jl),
                _ => (Value::constant_u32(0), X86Cond::Jge),
            };
            (
                Value::constant_u32(i.branch_target(pc)),
                Some((lhs, rhs, cond)),
            )
        }
    };

    gen.sync_pc(st);

    match insn.op {
        Opcode::Jal | Opcode::Bltzal | Opcode::Bgezal => {
            gen.write_result(st, GuestReg::RA, &return_address)
        }
        Opcode::Jalr => gen.write_result(st, i.rd(), &return_address),
        _ => {}
    }

    let next_pc = match condition {
        None => target,
        Some((lhs, rhs, cond)) => {
            match (lhs.constant_u32_value(), rhs.constant_u32_value()) {
                (Some(a), Some(b)) => {
                    if condition_holds(cond, a, b) {
                        target
                    } else {
                        return_address
                    }
                }
                _ => {
                    let (lhs, rhs, cond) = if lhs.is_constant() {
                        (rhs, lhs, swap_operands(cond))
                    } else {
                        (lhs, rhs, cond)
                    };
                    let res = gen.regs.allocate_host_reg(gen.buf);
                    let taken = gen.regs.allocate_host_reg(gen.buf);
                    gen.emit_copy_value(res, &return_address);
                    gen.emit_copy_value(taken, &target);
                    if let Some(l) = lhs.host_reg() {
                        gen.emit_cmp(l, RegSize::S32, &rhs);
                    }
                    emit_cmovcc(gen.buf, cond, false, res, taken);
                    gen.regs.release_scratch(taken);
                    Value::scratch(res, RegSize::S32)
                }
            }
        }
    };
    gen.emit_store_cpu_struct_field(NPC_OFFSET, &next_pc);

    st.next_is_delay_slot = true;
    true
}
