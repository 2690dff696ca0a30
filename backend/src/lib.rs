pub mod abi;
pub mod code_buffer;
pub mod codegen;
pub mod error;
pub mod label;
pub mod regcache;
pub mod value;
pub mod x86_64;

pub use abi::{Abi, HOST_ABI, SYSV, WIN64};
pub use code_buffer::CodeBuffer;
pub use codegen::{
    compile_block, has_specialized_compiler, AsmFunctions, BlockFn, BlockState, CodeGenerator,
    CompilePhase, CompiledBlock, CompilerOptions, InterpretFn, ValueOp,
};
pub use error::{CompileError, Result};
pub use regcache::{GuestRegLocation, RegisterCache, RegisterCacheEntry};
pub use value::{RegSize, Value, ValueKind};
