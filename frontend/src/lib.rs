//! Guest block decoding.
//!
//! Walks guest memory from an entry pc and collects the instructions of
//! one basic block: up to and including the delay slot of the first
//! branch, or up to the first instruction that always leaves compiled
//! code.

use rec_core::{CodeBlock, CodeBlockInstruction};

/// Default cap on instructions per block.
pub const DEFAULT_MAX_BLOCK_INSTRUCTIONS: u32 = 64;

/// Source of guest instruction words.
pub trait InstructionFetch {
    /// The word at `addr`, or `None` if nothing is mapped there.
    fn fetch_instruction(&self, addr: u32) -> Option<u32>;
}

impl<F: Fn(u32) -> Option<u32>> InstructionFetch for F {
    fn fetch_instruction(&self, addr: u32) -> Option<u32> {
        self(addr)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("instruction fetch failed at 0x{pc:08x}")]
    FetchFailed { pc: u32 },
    #[error("misaligned block entry 0x{pc:08x}")]
    Misaligned { pc: u32 },
}

pub type Result<T> = std::result::Result<T, DecodeError>;

/// Why decoding stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockEnd {
    /// Keep going with the next sequential instruction.
    Next,
    /// Delay slot of a branch decoded.
    Branch,
    /// Instruction that always leaves compiled code.
    Exit,
    /// Instruction limit reached.
    TooMany,
    /// Next address could not be fetched.
    FetchFailed,
}

/// Loop state while decoding one block.
pub struct DecodeContext {
    pub pc_first: u32,
    /// Address of the next instruction to decode.
    pub pc_next: u32,
    pub end: BlockEnd,
    pub max_insns: u32,
    /// The instruction decoded last was a branch.
    in_branch: bool,
    block: CodeBlock,
}

impl DecodeContext {
    pub fn new(pc: u32, max_insns: u32) -> Self {
        Self {
            pc_first: pc,
            pc_next: pc,
            end: BlockEnd::Next,
            max_insns: max_insns.max(1),
            in_branch: false,
            block: CodeBlock::new(pc),
        }
    }

    pub fn num_insns(&self) -> u32 {
        self.block.len() as u32
    }

    /// Decode the instruction at `pc_next` and decide whether the block
    /// continues.
    fn decode_insn<F: InstructionFetch + ?Sized>(&mut self, fetch: &F) {
        let pc = self.pc_next;
        let Some(bits) = fetch.fetch_instruction(pc) else {
            self.end = BlockEnd::FetchFailed;
            return;
        };

        let in_delay_slot = std::mem::take(&mut self.in_branch);
        let insn = CodeBlockInstruction::new(pc, bits, in_delay_slot);
        self.in_branch = insn.is_branch;
        let ends_block = insn.ends_block;
        self.block.instructions.push(insn);
        self.pc_next = pc.wrapping_add(4);

        if in_delay_slot {
            self.end = BlockEnd::Branch;
        } else if ends_block && !self.in_branch {
            self.end = BlockEnd::Exit;
        }
    }
}

/// Decode the block starting at `pc`.
///
/// A branch at the instruction limit still takes its delay slot. A
/// fetch failure after at least one instruction ends the block early;
/// the failing address is left for the executor to fault on.
pub fn decode_block<F: InstructionFetch + ?Sized>(
    fetch: &F,
    pc: u32,
    max_insns: u32,
) -> Result<CodeBlock> {
    if pc & 3 != 0 {
        return Err(DecodeError::Misaligned { pc });
    }
    let mut ctx = DecodeContext::new(pc, max_insns);

    loop {
        ctx.decode_insn(fetch);
        if ctx.end != BlockEnd::Next {
            break;
        }
        if ctx.num_insns() >= ctx.max_insns && !ctx.in_branch {
            ctx.end = BlockEnd::TooMany;
            break;
        }
    }

    if ctx.end == BlockEnd::FetchFailed {
        if ctx.block.is_empty() {
            return Err(DecodeError::FetchFailed { pc });
        }
        // A branch whose delay slot is unreadable cannot be compiled.
        if ctx.in_branch {
            ctx.block.instructions.pop();
            if ctx.block.is_empty() {
                return Err(DecodeError::FetchFailed { pc: ctx.pc_next });
            }
        }
    }

    tracing::trace!(
        pc = format_args!("{:#010x}", pc),
        insns = ctx.block.len(),
        end = ?ctx.end,
        "decoded block"
    );
    Ok(ctx.block)
}
