//! Arithmetic over [`Value`]s. Constant operands fold at compile time;
//! otherwise the result lands in a fresh scratch register.

use super::CodeGenerator;
use crate::value::{RegSize, Value, ValueKind};
use crate::x86_64::{Reg, RegSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueOp {
    Add,
    Sub,
    Mul,
    Shl,
    Shr,
    Sar,
    And,
    Or,
    Xor,
}

impl ValueOp {
    /// Result of the operation on two constants of width `size`.
    pub fn fold(self, lhs: u64, rhs: u64, size: RegSize) -> u64 {
        let shift = (rhs as u32) & (size.bits() - 1);
        let v = match self {
            ValueOp::Add => lhs.wrapping_add(rhs),
            ValueOp::Sub => lhs.wrapping_sub(rhs),
            ValueOp::Mul => lhs.wrapping_mul(rhs),
            ValueOp::Shl => lhs << shift,
            ValueOp::Shr => size.truncate(lhs) >> shift,
            ValueOp::Sar => ((size.sign_extend(lhs) as i64) >> shift) as u64,
            ValueOp::And => lhs & rhs,
            ValueOp::Or => lhs | rhs,
            ValueOp::Xor => lhs ^ rhs,
        };
        size.truncate(v)
    }

    fn is_shift(self) -> bool {
        matches!(self, ValueOp::Shl | ValueOp::Shr | ValueOp::Sar)
    }
}

impl CodeGenerator<'_> {
    pub fn add_values(&mut self, lhs: &Value, rhs: &Value) -> Value {
        self.binary_value_op(ValueOp::Add, lhs, rhs)
    }

    pub fn sub_values(&mut self, lhs: &Value, rhs: &Value) -> Value {
        self.binary_value_op(ValueOp::Sub, lhs, rhs)
    }

    /// Low `size` bits of the product.
    pub fn mul_values(&mut self, lhs: &Value, rhs: &Value) -> Value {
        self.binary_value_op(ValueOp::Mul, lhs, rhs)
    }

    pub fn shl_values(&mut self, lhs: &Value, rhs: &Value) -> Value {
        self.binary_value_op(ValueOp::Shl, lhs, rhs)
    }

    pub fn shr_values(&mut self, lhs: &Value, rhs: &Value) -> Value {
        self.binary_value_op(ValueOp::Shr, lhs, rhs)
    }

    pub fn sar_values(&mut self, lhs: &Value, rhs: &Value) -> Value {
        self.binary_value_op(ValueOp::Sar, lhs, rhs)
    }

    pub fn and_values(&mut self, lhs: &Value, rhs: &Value) -> Value {
        self.binary_value_op(ValueOp::And, lhs, rhs)
    }

    pub fn or_values(&mut self, lhs: &Value, rhs: &Value) -> Value {
        self.binary_value_op(ValueOp::Or, lhs, rhs)
    }

    pub fn xor_values(&mut self, lhs: &Value, rhs: &Value) -> Value {
        self.binary_value_op(ValueOp::Xor, lhs, rhs)
    }

    /// `lhs op rhs` at `lhs`'s width. Shift amounts may be narrower.
    pub fn binary_value_op(&mut self, op: ValueOp, lhs: &Value, rhs: &Value) -> Value {
        let size = lhs.size;
        debug_assert!(op.is_shift() || rhs.size == size, "{op:?} on mixed widths");
        if let (Some(a), Some(b)) = (lhs.constant_value(), rhs.constant_value()) {
            return Value::constant(op.fold(a, b, size), size);
        }

        let exclude = if op.is_shift() {
            RegSet::EMPTY.set(Reg::Rcx)
        } else {
            RegSet::EMPTY
        };
        let res = self.regs.allocate_host_reg_excluding(self.buf, exclude);
        let rhs = match rhs.kind {
            // Materialized before `res` is written in case both name the
            // same register.
            ValueKind::Guest(g) => self.regs.read_guest_register(self.buf, g),
            _ => *rhs,
        };
        self.emit_copy_value(res, lhs);
        match op {
            ValueOp::Add => self.emit_add(res, size, &rhs),
            ValueOp::Sub => self.emit_sub(res, size, &rhs),
            ValueOp::Mul => self.emit_mul(res, size, &rhs),
            ValueOp::Shl => self.emit_shl(res, size, &rhs),
            ValueOp::Shr => self.emit_shr(res, size, &rhs),
            ValueOp::Sar => self.emit_sar(res, size, &rhs),
            ValueOp::And => self.emit_and(res, size, &rhs),
            ValueOp::Or => self.emit_or(res, size, &rhs),
            ValueOp::Xor => self.emit_xor(res, size, &rhs),
        }
        Value::scratch(res, size)
    }

    /// Widen or narrow `value` to `size`.
    pub fn convert_value_size(&mut self, value: &Value, size: RegSize, sign_extend: bool) -> Value {
        if value.size == size {
            return *value;
        }
        match value.kind {
            ValueKind::Constant(c) => {
                let widened = if sign_extend {
                    value.size.sign_extend(c)
                } else {
                    c
                };
                Value::constant(widened, size)
            }
            ValueKind::Guest(g) => {
                let v = self.regs.read_guest_register(self.buf, g);
                self.convert_value_size(&v, size, sign_extend)
            }
            ValueKind::Host(src) => {
                let res = self.regs.allocate_host_reg(self.buf);
                if size > value.size {
                    if sign_extend {
                        self.emit_sign_extend(size, res, value.size, src);
                    } else {
                        self.emit_zero_extend(size, res, value.size, src);
                    }
                } else {
                    // Consumers only look at the low `size` bits.
                    self.emit_zero_extend(RegSize::S64, res, RegSize::S32, src);
                }
                Value::scratch(res, size)
            }
        }
    }
}
