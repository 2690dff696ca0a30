//! Execution engine: guest memory, reference interpreter, block cache
//! and the driver that picks between interpreting and running compiled
//! blocks.

pub mod block_cache;
pub mod exec_loop;
pub mod interpreter;
pub mod memory;
pub mod settings;

pub use block_cache::{BlockCache, CachedBlock};
pub use exec_loop::{interpret_block, System};
pub use interpreter::{asm_functions, interpret_instruction, Core, Exception};
pub use memory::Memory;
pub use settings::{ExecutionMode, RecompilerSettings, Settings, SettingsError};

use rec_backend::CompileError;

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("block compilation failed")]
    Compile(#[from] CompileError),
    #[error("failed to allocate code buffer")]
    CodeBuffer(#[from] std::io::Error),
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

pub type Result<T> = std::result::Result<T, ExecError>;
