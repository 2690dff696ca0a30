//! Host calling conventions.
//!
//! Everything that differs between the two supported x86-64 conventions
//! lives in an [`Abi`] table; call emission and register allocation only
//! consult the table.

use crate::x86_64::{Reg, RegSet};

#[cfg(not(target_arch = "x86_64"))]
compile_error!("the recompiler only generates x86-64 host code");

/// One host calling convention.
#[derive(Debug, PartialEq, Eq)]
pub struct Abi {
    pub name: &'static str,
    /// Integer argument registers, in order.
    pub arg_regs: &'static [Reg],
    pub return_reg: Reg,
    /// Registers a callee must preserve. Pushed by the block prologue.
    pub callee_saved: &'static [Reg],
    /// Registers a call may clobber.
    pub caller_saved: RegSet,
    /// Order in which the register cache hands out registers.
    /// Callee-saved registers come first so they survive calls for free.
    pub allocation_order: &'static [Reg],
    /// Required `rsp` alignment at a `call` instruction.
    pub stack_align: u32,
    /// Bytes the caller reserves above the return address for the callee.
    pub shadow_space: u32,
}

/// System V AMD64 (Linux, macOS, BSD).
pub const SYSV: Abi = Abi {
    name: "sysv",
    arg_regs: &[Reg::Rdi, Reg::Rsi, Reg::Rdx, Reg::Rcx, Reg::R8, Reg::R9],
    return_reg: Reg::Rax,
    callee_saved: &[Reg::Rbp, Reg::Rbx, Reg::R12, Reg::R13, Reg::R14, Reg::R15],
    caller_saved: RegSet::from_regs(&[
        Reg::Rax,
        Reg::Rcx,
        Reg::Rdx,
        Reg::Rsi,
        Reg::Rdi,
        Reg::R8,
        Reg::R9,
        Reg::R10,
        Reg::R11,
    ]),
    allocation_order: &[
        Reg::Rbx,
        Reg::R12,
        Reg::R13,
        Reg::R14,
        Reg::R15,
        Reg::Rcx,
        Reg::Rdx,
        Reg::Rsi,
        Reg::Rdi,
        Reg::R8,
        Reg::R9,
        Reg::R10,
        Reg::R11,
    ],
    stack_align: 16,
    shadow_space: 0,
};

/// Microsoft x64 (Windows).
pub const WIN64: Abi = Abi {
    name: "win64",
    arg_regs: &[Reg::Rcx, Reg::Rdx, Reg::R8, Reg::R9],
    return_reg: Reg::Rax,
    callee_saved: &[
        Reg::Rbp,
        Reg::Rbx,
        Reg::Rsi,
        Reg::Rdi,
        Reg::R12,
        Reg::R13,
        Reg::R14,
        Reg::R15,
    ],
    caller_saved: RegSet::from_regs(&[
        Reg::Rax,
        Reg::Rcx,
        Reg::Rdx,
        Reg::R8,
        Reg::R9,
        Reg::R10,
        Reg::R11,
    ]),
    allocation_order: &[
        Reg::Rbx,
        Reg::Rsi,
        Reg::Rdi,
        Reg::R12,
        Reg::R13,
        Reg::R14,
        Reg::R15,
        Reg::Rcx,
        Reg::Rdx,
        Reg::R8,
        Reg::R9,
        Reg::R10,
        Reg::R11,
    ],
    stack_align: 16,
    shadow_space: 32,
};

/// Convention of the platform this crate is built for.
#[cfg(windows)]
pub const HOST_ABI: &Abi = &WIN64;
#[cfg(not(windows))]
pub const HOST_ABI: &Abi = &SYSV;

/// Most arguments `emit_function_call_ptr` accepts.
pub const MAX_CALL_ARGS: usize = 4;

impl Abi {
    #[inline]
    pub fn is_caller_saved(&self, reg: Reg) -> bool {
        self.caller_saved.contains(reg)
    }

    /// Bytes to subtract from `rsp` before a call, given `depth` bytes
    /// already pushed since function entry (return address included).
    /// Covers the shadow space and restores alignment.
    pub fn call_stack_adjust(&self, depth: u32) -> u32 {
        let align = self.stack_align;
        let unaligned = (depth + self.shadow_space) % align;
        self.shadow_space + if unaligned == 0 { 0 } else { align - unaligned }
    }
}
