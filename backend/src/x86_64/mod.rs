pub mod emitter;
pub mod regs;

pub use emitter::*;
pub use regs::{Reg, RegSet, NUM_HOST_REGS, STATE_REG, TEMP_REG};
