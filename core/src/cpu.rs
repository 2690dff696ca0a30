//! R3000A guest-state structure.

use std::mem::offset_of;

/// Number of general-purpose registers (r0-r31).
pub const NUM_GPRS: usize = 32;

/// GPRs plus HI and LO.
pub const NUM_GUEST_REGS: usize = NUM_GPRS + 2;

/// Marker stored in `load_delay_reg` / `next_load_delay_reg` when no
/// load is in flight.
pub const LOAD_DELAY_NONE: u8 = 0xFF;

/// Reset vector (KSEG1 BIOS).
pub const RESET_VECTOR: u32 = 0xBFC0_0000;

/// A guest architectural register.
///
/// Indices 0..=31 are the GPRs, 32 is HI and 33 is LO. Because `hi` and
/// `lo` directly follow `regs` in [`CpuState`], every guest register `n`
/// lives at byte offset `4 * n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GuestReg(u8);

impl GuestReg {
    pub const ZERO: GuestReg = GuestReg(0);
    pub const AT: GuestReg = GuestReg(1);
    pub const SP: GuestReg = GuestReg(29);
    pub const RA: GuestReg = GuestReg(31);
    pub const HI: GuestReg = GuestReg(32);
    pub const LO: GuestReg = GuestReg(33);

    /// GPR from a 5-bit instruction field.
    pub const fn gpr(index: u8) -> Self {
        assert!(index < NUM_GPRS as u8);
        GuestReg(index)
    }

    pub const fn from_index(index: usize) -> Option<Self> {
        if index < NUM_GUEST_REGS {
            Some(GuestReg(index as u8))
        } else {
            None
        }
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn all() -> impl Iterator<Item = GuestReg> {
        (0..NUM_GUEST_REGS as u8).map(GuestReg)
    }

    pub const fn name(self) -> &'static str {
        REG_NAMES[self.0 as usize]
    }
}

impl std::fmt::Display for GuestReg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

const REG_NAMES: [&str; NUM_GUEST_REGS] = [
    "zero", "at", "v0", "v1", "a0", "a1", "a2", "a3", "t0", "t1", "t2", "t3", "t4", "t5", "t6",
    "t7", "s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7", "t8", "t9", "k0", "k1", "gp", "sp", "fp",
    "ra", "hi", "lo",
];

/// System control coprocessor registers that the core models.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cop0Regs {
    /// r8: last faulting virtual address.
    pub bad_vaddr: u32,
    /// r12: status register.
    pub sr: u32,
    /// r13: exception cause.
    pub cause: u32,
    /// r14: exception return address.
    pub epc: u32,
}

impl Cop0Regs {
    /// Boot exception vectors select bit.
    pub const SR_BEV: u32 = 1 << 22;
    /// Isolate cache: stores go to the scratch cache, not RAM.
    pub const SR_ISC: u32 = 1 << 16;
    /// Branch delay flag in CAUSE.
    pub const CAUSE_BD: u32 = 1 << 31;
    /// PRId value reported by `mfc0 $15`.
    pub const PRID: u32 = 0x0000_0002;
}

/// R3000A architectural state.
///
/// `#[repr(C)]` because generated code addresses every field by a fixed
/// byte offset from the state pointer.
#[repr(C)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuState {
    /// r0-r31. r0 is kept at zero by every writer.
    pub regs: [u32; NUM_GPRS],
    pub hi: u32,
    pub lo: u32,
    /// Address of the next instruction to execute.
    pub pc: u32,
    /// Address of the instruction after `pc` (branch target once a
    /// branch has executed).
    pub npc: u32,
    /// Address of the instruction currently executing, for exceptions.
    pub current_instruction_pc: u32,
    /// Ticks consumed in the current time slice.
    pub pending_ticks: u32,
    /// Tick budget of the current time slice.
    pub downcount: u32,
    /// Value of the load currently in its delay slot.
    pub load_delay_value: u32,
    /// Value of the load issued by the instruction executing now.
    pub next_load_delay_value: u32,
    pub cop0: Cop0Regs,
    pub load_delay_reg: u8,
    pub next_load_delay_reg: u8,
    pub current_instruction_in_branch_delay_slot: u8,
    pub next_instruction_is_branch_delay_slot: u8,
    /// Set by the exception path, cleared by compiled code on exit.
    pub exception_raised: u8,
    _pad: [u8; 3],
}

impl CpuState {
    pub fn new(pc: u32) -> Self {
        Self {
            regs: [0; NUM_GPRS],
            hi: 0,
            lo: 0,
            pc,
            npc: pc.wrapping_add(4),
            current_instruction_pc: pc,
            pending_ticks: 0,
            downcount: 0,
            load_delay_value: 0,
            next_load_delay_value: 0,
            cop0: Cop0Regs::default(),
            load_delay_reg: LOAD_DELAY_NONE,
            next_load_delay_reg: LOAD_DELAY_NONE,
            current_instruction_in_branch_delay_slot: 0,
            next_instruction_is_branch_delay_slot: 0,
            exception_raised: 0,
            _pad: [0; 3],
        }
    }

    /// Read any guest register, including HI/LO.
    pub fn reg(&self, reg: GuestReg) -> u32 {
        match reg {
            GuestReg::HI => self.hi,
            GuestReg::LO => self.lo,
            r => self.regs[r.index()],
        }
    }

    /// Write any guest register. Writes to r0 are dropped.
    pub fn set_reg(&mut self, reg: GuestReg, value: u32) {
        match reg {
            GuestReg::ZERO => {}
            GuestReg::HI => self.hi = value,
            GuestReg::LO => self.lo = value,
            r => self.regs[r.index()] = value,
        }
    }

    /// Jump to `pc` as if a branch had just committed.
    pub fn set_pc(&mut self, pc: u32) {
        self.pc = pc;
        self.npc = pc.wrapping_add(4);
    }
}

impl Default for CpuState {
    fn default() -> Self {
        Self::new(RESET_VECTOR)
    }
}

// Field offsets (bytes) from the start of CpuState.
// Generated code addresses the structure only through these.

/// Byte offset of guest register `reg` (GPRs, then HI and LO).
pub const fn guest_reg_offset(reg: GuestReg) -> i32 {
    (REGS_OFFSET as usize + reg.index() * 4) as i32
}

pub const REGS_OFFSET: i32 = offset_of!(CpuState, regs) as i32;
pub const HI_OFFSET: i32 = offset_of!(CpuState, hi) as i32;
pub const LO_OFFSET: i32 = offset_of!(CpuState, lo) as i32;
pub const PC_OFFSET: i32 = offset_of!(CpuState, pc) as i32;
pub const NPC_OFFSET: i32 = offset_of!(CpuState, npc) as i32;
pub const CURRENT_INSTRUCTION_PC_OFFSET: i32 =
    offset_of!(CpuState, current_instruction_pc) as i32;
pub const PENDING_TICKS_OFFSET: i32 = offset_of!(CpuState, pending_ticks) as i32;
pub const DOWNCOUNT_OFFSET: i32 = offset_of!(CpuState, downcount) as i32;
pub const LOAD_DELAY_VALUE_OFFSET: i32 = offset_of!(CpuState, load_delay_value) as i32;
pub const NEXT_LOAD_DELAY_VALUE_OFFSET: i32 = offset_of!(CpuState, next_load_delay_value) as i32;
pub const LOAD_DELAY_REG_OFFSET: i32 = offset_of!(CpuState, load_delay_reg) as i32;
pub const NEXT_LOAD_DELAY_REG_OFFSET: i32 = offset_of!(CpuState, next_load_delay_reg) as i32;
pub const CURRENT_INSTRUCTION_IN_BRANCH_DELAY_SLOT_OFFSET: i32 =
    offset_of!(CpuState, current_instruction_in_branch_delay_slot) as i32;
pub const NEXT_INSTRUCTION_IS_BRANCH_DELAY_SLOT_OFFSET: i32 =
    offset_of!(CpuState, next_instruction_is_branch_delay_slot) as i32;
pub const EXCEPTION_RAISED_OFFSET: i32 = offset_of!(CpuState, exception_raised) as i32;

const _: () = assert!(HI_OFFSET == guest_reg_offset(GuestReg::HI));
const _: () = assert!(LO_OFFSET == guest_reg_offset(GuestReg::LO));
