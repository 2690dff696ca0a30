use crate::insn::{Instruction, Opcode};

/// Guest page granularity used for code invalidation.
pub const GUEST_PAGE_SHIFT: u32 = 12;
pub const GUEST_PAGE_SIZE: u32 = 1 << GUEST_PAGE_SHIFT;

/// One decoded guest instruction inside a [`CodeBlock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeBlockInstruction {
    /// Guest address of the instruction.
    pub pc: u32,
    pub instruction: Instruction,
    pub op: Opcode,
    pub is_branch: bool,
    pub is_unconditional_branch: bool,
    /// Sits in the delay slot of the preceding branch.
    pub is_in_delay_slot: bool,
    pub is_load_delay_producing: bool,
    pub can_trap: bool,
    pub ends_block: bool,
}

impl CodeBlockInstruction {
    pub fn new(pc: u32, bits: u32, is_in_delay_slot: bool) -> Self {
        let instruction = Instruction(bits);
        let op = instruction.opcode();
        Self {
            pc,
            instruction,
            op,
            is_branch: op.is_branch(),
            is_unconditional_branch: op.is_unconditional_branch(),
            is_in_delay_slot,
            is_load_delay_producing: op.is_load(),
            can_trap: op.can_trap(),
            ends_block: op.ends_block(),
        }
    }

    #[inline]
    pub fn bits(&self) -> u32 {
        self.instruction.bits()
    }
}

/// A straight-line run of guest instructions compiled as one unit.
///
/// Built once by the decoder and never mutated afterwards. A branch is
/// always followed by its delay slot, which is the last instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    /// Guest address of the first instruction.
    pub pc: u32,
    pub instructions: Vec<CodeBlockInstruction>,
}

impl CodeBlock {
    pub fn new(pc: u32) -> Self {
        Self {
            pc,
            instructions: Vec::new(),
        }
    }

    /// Build a block from raw words laid out contiguously from `pc`,
    /// marking delay slots after branches.
    pub fn from_words(pc: u32, words: &[u32]) -> Self {
        let mut block = Self::new(pc);
        let mut in_delay_slot = false;
        for (i, &bits) in words.iter().enumerate() {
            let insn = CodeBlockInstruction::new(pc.wrapping_add(i as u32 * 4), bits, in_delay_slot);
            in_delay_slot = insn.is_branch;
            block.instructions.push(insn);
        }
        block
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Size of the guest code covered by this block, in bytes.
    pub fn size_in_bytes(&self) -> u32 {
        self.instructions.len() as u32 * 4
    }

    /// Address just past the last instruction.
    pub fn end_pc(&self) -> u32 {
        self.pc.wrapping_add(self.size_in_bytes())
    }

    /// Physical guest pages (4 KiB) the block's code occupies.
    pub fn pages(&self) -> std::ops::RangeInclusive<u32> {
        let first = physical_page(self.pc);
        let last = physical_page(self.end_pc().wrapping_sub(4).max(self.pc));
        first..=last
    }
}

/// Page index of a guest address with the segment bits stripped.
pub fn physical_page(addr: u32) -> u32 {
    (addr & 0x1FFF_FFFF) >> GUEST_PAGE_SHIFT
}
