pub mod block;
pub mod cpu;
pub mod insn;

pub use block::{physical_page, CodeBlock, CodeBlockInstruction, GUEST_PAGE_SHIFT, GUEST_PAGE_SIZE};
pub use cpu::{Cop0Regs, CpuState, GuestReg, LOAD_DELAY_NONE, NUM_GPRS, NUM_GUEST_REGS};
pub use insn::{Instruction, Opcode};
