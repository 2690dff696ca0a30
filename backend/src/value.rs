//! Operands flowing between instruction compilers and emission helpers.

use rec_core::GuestReg;

use crate::x86_64::Reg;

/// Operand width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegSize {
    S8,
    S16,
    S32,
    S64,
}

impl RegSize {
    pub const fn bits(self) -> u32 {
        match self {
            RegSize::S8 => 8,
            RegSize::S16 => 16,
            RegSize::S32 => 32,
            RegSize::S64 => 64,
        }
    }

    pub const fn mask(self) -> u64 {
        match self {
            RegSize::S64 => u64::MAX,
            s => (1u64 << s.bits()) - 1,
        }
    }

    /// Truncate a constant to this width.
    pub const fn truncate(self, value: u64) -> u64 {
        value & self.mask()
    }

    /// Sign-extend a constant of this width to 64 bits.
    pub const fn sign_extend(self, value: u64) -> u64 {
        let shift = 64 - self.bits();
        (((value << shift) as i64) >> shift) as u64
    }
}

/// Where a [`Value`] lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Compile-time constant, already truncated to the width.
    Constant(u64),
    /// Guest register that has not been materialized yet.
    Guest(GuestReg),
    /// Live host register.
    Host(Reg),
}

/// A tagged operand: constant, unmaterialized guest register, or host
/// register, plus its width.
///
/// `scratch` marks host registers owned by the current instruction; the
/// register cache reclaims them at the end of the instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Value {
    pub kind: ValueKind,
    pub size: RegSize,
    pub scratch: bool,
}

impl Value {
    pub const fn constant(value: u64, size: RegSize) -> Self {
        Self {
            kind: ValueKind::Constant(size.truncate(value)),
            size,
            scratch: false,
        }
    }

    pub const fn constant_u32(value: u32) -> Self {
        Self::constant(value as u64, RegSize::S32)
    }

    pub const fn guest(reg: GuestReg) -> Self {
        Self {
            kind: ValueKind::Guest(reg),
            size: RegSize::S32,
            scratch: false,
        }
    }

    pub const fn host(reg: Reg, size: RegSize) -> Self {
        Self {
            kind: ValueKind::Host(reg),
            size,
            scratch: false,
        }
    }

    pub const fn scratch(reg: Reg, size: RegSize) -> Self {
        Self {
            kind: ValueKind::Host(reg),
            size,
            scratch: true,
        }
    }

    #[inline]
    pub const fn is_constant(&self) -> bool {
        matches!(self.kind, ValueKind::Constant(_))
    }

    #[inline]
    pub const fn is_in_host_reg(&self) -> bool {
        matches!(self.kind, ValueKind::Host(_))
    }

    pub const fn constant_value(&self) -> Option<u64> {
        match self.kind {
            ValueKind::Constant(v) => Some(v),
            _ => None,
        }
    }

    /// Constant reinterpreted as a 32-bit guest word.
    pub fn constant_u32_value(&self) -> Option<u32> {
        self.constant_value().map(|v| v as u32)
    }

    pub const fn host_reg(&self) -> Option<Reg> {
        match self.kind {
            ValueKind::Host(r) => Some(r),
            _ => None,
        }
    }

    /// Constant sign-extended from its width to 64 bits.
    pub fn signed_constant(&self) -> Option<i64> {
        self.constant_value().map(|v| self.size.sign_extend(v) as i64)
    }

    /// Constant usable as a sign-extended imm32 at this operand's width.
    pub fn imm32(&self) -> Option<i32> {
        let v = self.constant_value()?;
        match self.size {
            RegSize::S64 => i32::try_from(v as i64).ok(),
            s => Some(s.sign_extend(v) as i32),
        }
    }

    /// Same location viewed at a different width. Constants are truncated.
    pub fn with_size(self, size: RegSize) -> Self {
        match self.kind {
            ValueKind::Constant(v) => Value::constant(v, size),
            _ => Self { size, ..self },
        }
    }
}
