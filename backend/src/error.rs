/// Why a block could not be compiled.
///
/// Instruction forms a specialized compiler cannot handle never show up
/// here: they fall back to the interpreter inside the block.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    /// The code buffer ran out of space. Nothing of the block remains in
    /// the buffer; reset it and retry.
    #[error("code buffer full")]
    CodeBufferFull,

    #[error("block contains no instructions")]
    EmptyBlock,

    /// A branch sits in the delay slot of another branch.
    #[error("branch in delay slot at 0x{pc:08x}")]
    BranchInDelaySlot { pc: u32 },

    /// The block ends with a branch whose delay slot is not part of it.
    #[error("branch at 0x{pc:08x} has no delay slot in the block")]
    MissingDelaySlot { pc: u32 },

    /// Instructions follow the delay slot of the branch at `pc`.
    #[error("instructions after the delay slot of the branch at 0x{pc:08x}")]
    InstructionsAfterDelaySlot { pc: u32 },
}

pub type Result<T> = std::result::Result<T, CompileError>;
