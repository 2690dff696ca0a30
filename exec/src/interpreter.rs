//! Reference interpreter.
//!
//! Executes one guest instruction at a time against [`Core`]. Compiled
//! code calls [`interpret_instruction`] for everything it does not emit
//! inline, so the semantics here are the ones the recompiler is measured
//! against.

use rec_backend::AsmFunctions;
use rec_core::{Cop0Regs, CpuState, GuestReg, Instruction, Opcode, LOAD_DELAY_NONE};

use crate::memory::Memory;

/// Exception vector with SR.BEV clear.
pub const EXCEPTION_VECTOR: u32 = 0x8000_0080;
/// Exception vector with SR.BEV set.
pub const BOOT_EXCEPTION_VECTOR: u32 = 0xBFC0_0180;

/// COP0 `cause` exception codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Exception {
    AddressErrorLoad = 4,
    AddressErrorStore = 5,
    Syscall = 8,
    Breakpoint = 9,
    ReservedInstruction = 10,
    Overflow = 12,
}

/// Guest CPU plus the memory it sees. `cpu` comes first so a pointer to
/// the state is a pointer to the core.
#[repr(C)]
pub struct Core {
    pub cpu: CpuState,
    pub memory: Memory,
}

impl Core {
    pub fn new(memory: Memory) -> Self {
        Self {
            cpu: CpuState::default(),
            memory,
        }
    }

    /// Fetch and execute one instruction. Returns whether it raised an
    /// exception.
    pub fn step(&mut self) -> bool {
        let pc = self.cpu.pc;
        if pc & 3 != 0 {
            self.begin_instruction(pc);
            self.cpu.cop0.bad_vaddr = pc;
            self.raise_exception(Exception::AddressErrorLoad);
            return self.end_instruction();
        }
        let bits = self.memory.read_u32(pc);
        self.step_with(bits)
    }

    /// Execute `bits` as the instruction at `pc`, skipping the fetch.
    pub fn step_with(&mut self, bits: u32) -> bool {
        self.begin_instruction(self.cpu.pc);
        self.cpu.pc = self.cpu.npc;
        self.cpu.npc = self.cpu.npc.wrapping_add(4);
        self.execute(Instruction(bits));
        self.update_load_delay();
        self.end_instruction()
    }

    fn begin_instruction(&mut self, pc: u32) {
        let cpu = &mut self.cpu;
        cpu.current_instruction_pc = pc;
        cpu.current_instruction_in_branch_delay_slot =
            std::mem::take(&mut cpu.next_instruction_is_branch_delay_slot);
    }

    fn end_instruction(&mut self) -> bool {
        self.cpu.pending_ticks = self.cpu.pending_ticks.wrapping_add(1);
        std::mem::take(&mut self.cpu.exception_raised) != 0
    }

    /// Entry for compiled code: `pc`/`npc` already point past the
    /// instruction and the load delay slot is advanced by the caller.
    pub fn execute_fallback(&mut self, bits: u32) {
        self.execute(Instruction(bits));
    }

    // -- Register file --

    fn reg(&self, reg: GuestReg) -> u32 {
        self.cpu.reg(reg)
    }

    /// Direct write; cancels a pending load to the same register.
    fn write_reg(&mut self, reg: GuestReg, value: u32) {
        if self.cpu.load_delay_reg as usize == reg.index() {
            self.cpu.load_delay_reg = LOAD_DELAY_NONE;
        }
        self.cpu.set_reg(reg, value);
    }

    /// Write through the load delay slot.
    fn write_reg_delayed(&mut self, reg: GuestReg, value: u32) {
        if reg.is_zero() {
            return;
        }
        if self.cpu.load_delay_reg as usize == reg.index() {
            self.cpu.load_delay_reg = LOAD_DELAY_NONE;
        }
        self.cpu.next_load_delay_reg = reg.index() as u8;
        self.cpu.next_load_delay_value = value;
    }

    /// Value a load merging into `reg` starts from: the in-flight load
    /// if one targets it.
    fn reg_for_merge(&self, reg: GuestReg) -> u32 {
        if self.cpu.load_delay_reg as usize == reg.index() {
            self.cpu.load_delay_value
        } else {
            self.reg(reg)
        }
    }

    /// Commit the pending load and move the next one into its place.
    pub fn update_load_delay(&mut self) {
        let cpu = &mut self.cpu;
        if let Some(r) = GuestReg::from_index(cpu.load_delay_reg as usize) {
            cpu.set_reg(r, cpu.load_delay_value);
        }
        cpu.load_delay_reg = cpu.next_load_delay_reg;
        cpu.load_delay_value = cpu.next_load_delay_value;
        cpu.next_load_delay_reg = LOAD_DELAY_NONE;
    }

    fn branch(&mut self, target: u32) {
        self.cpu.npc = target;
        self.cpu.next_instruction_is_branch_delay_slot = 1;
    }

    // -- Exceptions --

    pub fn raise_exception(&mut self, code: Exception) {
        let cpu = &mut self.cpu;
        let in_delay_slot = cpu.current_instruction_in_branch_delay_slot != 0;
        cpu.cop0.epc = if in_delay_slot {
            cpu.current_instruction_pc.wrapping_sub(4)
        } else {
            cpu.current_instruction_pc
        };
        cpu.cop0.cause = (cpu.cop0.cause & 0x0000_FF00)
            | ((code as u32) << 2)
            | if in_delay_slot { Cop0Regs::CAUSE_BD } else { 0 };
        // Push the KU/IE mode stack.
        cpu.cop0.sr = (cpu.cop0.sr & !0x3F) | ((cpu.cop0.sr << 2) & 0x3F);

        if let Some(r) = GuestReg::from_index(cpu.load_delay_reg as usize) {
            cpu.set_reg(r, cpu.load_delay_value);
        }
        cpu.load_delay_reg = LOAD_DELAY_NONE;
        cpu.next_load_delay_reg = LOAD_DELAY_NONE;

        let vector = if cpu.cop0.sr & Cop0Regs::SR_BEV != 0 {
            BOOT_EXCEPTION_VECTOR
        } else {
            EXCEPTION_VECTOR
        };
        cpu.pc = vector;
        cpu.npc = vector.wrapping_add(4);
        cpu.next_instruction_is_branch_delay_slot = 0;
        cpu.exception_raised = 1;
        tracing::trace!(
            code = ?code,
            epc = format_args!("{:#010x}", cpu.cop0.epc),
            "exception"
        );
    }

    fn address_error(&mut self, code: Exception, addr: u32) {
        self.cpu.cop0.bad_vaddr = addr;
        self.raise_exception(code);
    }

    // -- Execution --

    fn execute(&mut self, i: Instruction) {
        let pc = self.cpu.current_instruction_pc;
        let link = pc.wrapping_add(8);
        match i.opcode() {
            Opcode::Sll => self.write_reg(i.rd(), self.reg(i.rt()) << i.sa()),
            Opcode::Srl => self.write_reg(i.rd(), self.reg(i.rt()) >> i.sa()),
            Opcode::Sra => self.write_reg(i.rd(), ((self.reg(i.rt()) as i32) >> i.sa()) as u32),
            Opcode::Sllv => {
                let v = self.reg(i.rt()) << (self.reg(i.rs()) & 31);
                self.write_reg(i.rd(), v)
            }
            Opcode::Srlv => {
                let v = self.reg(i.rt()) >> (self.reg(i.rs()) & 31);
                self.write_reg(i.rd(), v)
            }
            Opcode::Srav => {
                let v = ((self.reg(i.rt()) as i32) >> (self.reg(i.rs()) & 31)) as u32;
                self.write_reg(i.rd(), v)
            }
            Opcode::Jr => self.branch(self.reg(i.rs())),
            Opcode::Jalr => {
                let target = self.reg(i.rs());
                self.write_reg(i.rd(), link);
                self.branch(target);
            }
            Opcode::Syscall => self.raise_exception(Exception::Syscall),
            Opcode::Break => self.raise_exception(Exception::Breakpoint),
            Opcode::Mfhi => self.write_reg(i.rd(), self.cpu.hi),
            Opcode::Mthi => self.cpu.hi = self.reg(i.rs()),
            Opcode::Mflo => self.write_reg(i.rd(), self.cpu.lo),
            Opcode::Mtlo => self.cpu.lo = self.reg(i.rs()),
            Opcode::Mult => {
                let p = (self.reg(i.rs()) as i32 as i64) * (self.reg(i.rt()) as i32 as i64);
                self.cpu.hi = (p >> 32) as u32;
                self.cpu.lo = p as u32;
            }
            Opcode::Multu => {
                let p = u64::from(self.reg(i.rs())) * u64::from(self.reg(i.rt()));
                self.cpu.hi = (p >> 32) as u32;
                self.cpu.lo = p as u32;
            }
            Opcode::Div => {
                let n = self.reg(i.rs()) as i32;
                let d = self.reg(i.rt()) as i32;
                let (lo, hi) = if d == 0 {
                    (if n >= 0 { u32::MAX } else { 1 }, n as u32)
                } else if n == i32::MIN && d == -1 {
                    (0x8000_0000, 0)
                } else {
                    ((n / d) as u32, (n % d) as u32)
                };
                self.cpu.lo = lo;
                self.cpu.hi = hi;
            }
            Opcode::Divu => {
                let n = self.reg(i.rs());
                let d = self.reg(i.rt());
                let (lo, hi) = if d == 0 { (u32::MAX, n) } else { (n / d, n % d) };
                self.cpu.lo = lo;
                self.cpu.hi = hi;
            }
            Opcode::Add => {
                match (self.reg(i.rs()) as i32).checked_add(self.reg(i.rt()) as i32) {
                    Some(v) => self.write_reg(i.rd(), v as u32),
                    None => self.raise_exception(Exception::Overflow),
                }
            }
            Opcode::Addu => {
                let v = self.reg(i.rs()).wrapping_add(self.reg(i.rt()));
                self.write_reg(i.rd(), v)
            }
            Opcode::Sub => {
                match (self.reg(i.rs()) as i32).checked_sub(self.reg(i.rt()) as i32) {
                    Some(v) => self.write_reg(i.rd(), v as u32),
                    None => self.raise_exception(Exception::Overflow),
                }
            }
            Opcode::Subu => {
                let v = self.reg(i.rs()).wrapping_sub(self.reg(i.rt()));
                self.write_reg(i.rd(), v)
            }
            Opcode::And => self.write_reg(i.rd(), self.reg(i.rs()) & self.reg(i.rt())),
            Opcode::Or => self.write_reg(i.rd(), self.reg(i.rs()) | self.reg(i.rt())),
            Opcode::Xor => self.write_reg(i.rd(), self.reg(i.rs()) ^ self.reg(i.rt())),
            Opcode::Nor => self.write_reg(i.rd(), !(self.reg(i.rs()) | self.reg(i.rt()))),
            Opcode::Slt => {
                let v = (self.reg(i.rs()) as i32) < (self.reg(i.rt()) as i32);
                self.write_reg(i.rd(), u32::from(v))
            }
            Opcode::Sltu => {
                let v = self.reg(i.rs()) < self.reg(i.rt());
                self.write_reg(i.rd(), u32::from(v))
            }

            op @ (Opcode::Bltz | Opcode::Bgez | Opcode::Bltzal | Opcode::Bgezal) => {
                let v = self.reg(i.rs()) as i32;
                let taken = match op {
                    Opcode::Bltz | Opcode::Bltzal => v < 0,
                    _ => v >= 0,
                };
                // The link register is written whether or not the branch
                // is taken.
                if matches!(op, Opcode::Bltzal | Opcode::Bgezal) {
                    self.write_reg(GuestReg::RA, link);
                }
                if taken {
                    self.branch(i.branch_target(pc));
                } else {
                    self.cpu.next_instruction_is_branch_delay_slot = 1;
                }
            }
            Opcode::J => self.branch(i.jump_target(pc)),
            Opcode::Jal => {
                self.write_reg(GuestReg::RA, link);
                self.branch(i.jump_target(pc));
            }
            op @ (Opcode::Beq | Opcode::Bne | Opcode::Blez | Opcode::Bgtz) => {
                let a = self.reg(i.rs());
                let b = self.reg(i.rt());
                let taken = match op {
                    Opcode::Beq => a == b,
                    Opcode::Bne => a != b,
                    Opcode::Blez => (a as i32) <= 0,
                    _ => (a as i32) > 0,
                };
                if taken {
                    self.branch(i.branch_target(pc));
                } else {
                    self.cpu.next_instruction_is_branch_delay_slot = 1;
                }
            }

            Opcode::Addi => match (self.reg(i.rs()) as i32).checked_add(i.imm_sext() as i32) {
                Some(v) => self.write_reg(i.rt(), v as u32),
                None => self.raise_exception(Exception::Overflow),
            },
            Opcode::Addiu => {
                let v = self.reg(i.rs()).wrapping_add(i.imm_sext());
                self.write_reg(i.rt(), v)
            }
            Opcode::Slti => {
                let v = (self.reg(i.rs()) as i32) < (i.imm_sext() as i32);
                self.write_reg(i.rt(), u32::from(v))
            }
            Opcode::Sltiu => {
                let v = self.reg(i.rs()) < i.imm_sext();
                self.write_reg(i.rt(), u32::from(v))
            }
            Opcode::Andi => self.write_reg(i.rt(), self.reg(i.rs()) & i.imm_zext()),
            Opcode::Ori => self.write_reg(i.rt(), self.reg(i.rs()) | i.imm_zext()),
            Opcode::Xori => self.write_reg(i.rt(), self.reg(i.rs()) ^ i.imm_zext()),
            Opcode::Lui => self.write_reg(i.rt(), i.imm_zext() << 16),

            Opcode::Mfc0 => {
                let cop0 = &self.cpu.cop0;
                let v = match i.cop_reg() {
                    8 => cop0.bad_vaddr,
                    12 => cop0.sr,
                    13 => cop0.cause,
                    14 => cop0.epc,
                    15 => Cop0Regs::PRID,
                    _ => 0,
                };
                self.write_reg_delayed(i.rt(), v);
            }
            Opcode::Mtc0 => {
                let v = self.reg(i.rt());
                let cop0 = &mut self.cpu.cop0;
                match i.cop_reg() {
                    12 => cop0.sr = v,
                    // Only the software interrupt bits are writable.
                    13 => cop0.cause = (cop0.cause & !0x300) | (v & 0x300),
                    _ => {}
                }
            }
            Opcode::Rfe => {
                let sr = self.cpu.cop0.sr;
                self.cpu.cop0.sr = (sr & !0x0F) | ((sr & 0x3C) >> 2);
            }

            op if op.is_load() => self.execute_load(op, i),
            op if op.is_store() => self.execute_store(op, i),

            _ => self.raise_exception(Exception::ReservedInstruction),
        }
    }

    fn effective_address(&self, i: Instruction) -> u32 {
        self.reg(i.rs()).wrapping_add(i.imm_sext())
    }

    fn execute_load(&mut self, op: Opcode, i: Instruction) {
        let addr = self.effective_address(i);
        let misaligned = match op {
            Opcode::Lh | Opcode::Lhu => addr & 1 != 0,
            Opcode::Lw => addr & 3 != 0,
            _ => false,
        };
        if misaligned {
            return self.address_error(Exception::AddressErrorLoad, addr);
        }
        let m = &self.memory;
        let value = match op {
            Opcode::Lb => m.read_u8(addr) as i8 as i32 as u32,
            Opcode::Lbu => u32::from(m.read_u8(addr)),
            Opcode::Lh => m.read_u16(addr) as i16 as i32 as u32,
            Opcode::Lhu => u32::from(m.read_u16(addr)),
            Opcode::Lw => m.read_u32(addr),
            Opcode::Lwl => {
                let shift = (addr & 3) * 8;
                let mem = m.read_u32(addr & !3);
                let old = self.reg_for_merge(i.rt());
                (old & (0x00FF_FFFF >> shift)) | (mem << (24 - shift))
            }
            Opcode::Lwr => {
                let shift = (addr & 3) * 8;
                let mem = m.read_u32(addr & !3);
                let old = self.reg_for_merge(i.rt());
                (old & (0xFFFF_FF00 << (24 - shift))) | (mem >> shift)
            }
            _ => unreachable!("{op:?} is not a load"),
        };
        self.write_reg_delayed(i.rt(), value);
    }

    fn execute_store(&mut self, op: Opcode, i: Instruction) {
        let addr = self.effective_address(i);
        let value = self.reg(i.rt());
        let misaligned = match op {
            Opcode::Sh => addr & 1 != 0,
            Opcode::Sw => addr & 3 != 0,
            _ => false,
        };
        if misaligned {
            return self.address_error(Exception::AddressErrorStore, addr);
        }
        // Isolated cache: stores never reach memory.
        if self.cpu.cop0.sr & Cop0Regs::SR_ISC != 0 {
            return;
        }
        let m = &mut self.memory;
        match op {
            Opcode::Sb => m.write_u8(addr, value as u8),
            Opcode::Sh => m.write_u16(addr, value as u16),
            Opcode::Sw => m.write_u32(addr, value),
            Opcode::Swl => {
                let shift = (addr & 3) * 8;
                let mem = m.read_u32(addr & !3);
                let merged = (mem & (0xFFFF_FF00 << shift)) | (value >> (24 - shift));
                m.write_u32(addr & !3, merged);
            }
            Opcode::Swr => {
                let shift = (addr & 3) * 8;
                let mem = m.read_u32(addr & !3);
                let merged = (mem & (0x00FF_FFFF >> (24 - shift))) | (value << shift);
                m.write_u32(addr & !3, merged);
            }
            _ => unreachable!("{op:?} is not a store"),
        }
    }
}

/// Fallback entry called from compiled code.
///
/// # Safety
/// `state` must point at the `cpu` field of a live [`Core`].
pub unsafe extern "C" fn interpret_instruction(state: *mut CpuState, bits: u32) {
    let core = &mut *state.cast::<Core>();
    core.execute_fallback(bits);
}

/// Runtime routines for [`rec_backend::CodeGenerator`].
pub fn asm_functions() -> AsmFunctions {
    AsmFunctions {
        interpret_instruction,
    }
}
