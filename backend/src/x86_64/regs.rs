use crate::value::RegSize;

/// x86-64 general-purpose register indices.
///
/// Encoding matches the x86-64 ModR/M and REX register numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

pub const NUM_HOST_REGS: usize = 16;

impl Reg {
    pub const ALL: [Reg; NUM_HOST_REGS] = [
        Reg::Rax,
        Reg::Rcx,
        Reg::Rdx,
        Reg::Rbx,
        Reg::Rsp,
        Reg::Rbp,
        Reg::Rsi,
        Reg::Rdi,
        Reg::R8,
        Reg::R9,
        Reg::R10,
        Reg::R11,
        Reg::R12,
        Reg::R13,
        Reg::R14,
        Reg::R15,
    ];

    /// Low 3 bits of the register encoding (for ModR/M).
    #[inline]
    pub const fn low3(self) -> u8 {
        (self as u8) & 0x7
    }

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Assembler name of the register at the given width.
    pub const fn name(self, size: RegSize) -> &'static str {
        let i = self as usize;
        match size {
            RegSize::S8 => NAMES8[i],
            RegSize::S16 => NAMES16[i],
            RegSize::S32 => NAMES32[i],
            RegSize::S64 => NAMES64[i],
        }
    }
}

const NAMES64: [&str; NUM_HOST_REGS] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12", "r13",
    "r14", "r15",
];
const NAMES32: [&str; NUM_HOST_REGS] = [
    "eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi", "r8d", "r9d", "r10d", "r11d", "r12d",
    "r13d", "r14d", "r15d",
];
const NAMES16: [&str; NUM_HOST_REGS] = [
    "ax", "cx", "dx", "bx", "sp", "bp", "si", "di", "r8w", "r9w", "r10w", "r11w", "r12w", "r13w",
    "r14w", "r15w",
];
const NAMES8: [&str; NUM_HOST_REGS] = [
    "al", "cl", "dl", "bl", "spl", "bpl", "sil", "dil", "r8b", "r9b", "r10b", "r11b", "r12b",
    "r13b", "r14b", "r15b",
];

/// RBP holds the guest-state pointer for the whole block.
pub const STATE_REG: Reg = Reg::Rbp;

/// Call target / return value scratch. Never handed out by the register
/// cache, so call sequences can clobber it freely.
pub const TEMP_REG: Reg = Reg::Rax;

/// Set of host registers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RegSet(u16);

impl RegSet {
    pub const EMPTY: RegSet = RegSet(0);

    pub const fn from_regs(regs: &[Reg]) -> Self {
        let mut bits = 0u16;
        let mut i = 0;
        while i < regs.len() {
            bits |= 1 << regs[i] as u16;
            i += 1;
        }
        Self(bits)
    }

    pub const fn set(self, reg: Reg) -> Self {
        Self(self.0 | (1 << reg as u16))
    }

    pub const fn clear(self, reg: Reg) -> Self {
        Self(self.0 & !(1 << reg as u16))
    }

    pub const fn contains(self, reg: Reg) -> bool {
        self.0 & (1 << reg as u16) != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    pub fn iter(self) -> impl Iterator<Item = Reg> {
        Reg::ALL.into_iter().filter(move |&r| self.contains(r))
    }
}

impl std::fmt::Debug for RegSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter().map(|r| r.name(RegSize::S64))).finish()
    }
}
