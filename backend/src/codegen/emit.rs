//! Emission helpers over [`Value`] operands, guest-state fields and host
//! function calls.

use rec_core::cpu::guest_reg_offset;
use rec_core::GuestReg;

use super::CodeGenerator;
use crate::abi::MAX_CALL_ARGS;
use crate::label::Label;
use crate::value::{RegSize, Value, ValueKind};
use crate::x86_64::*;

/// Extension opcode for `(to, from)` widths, `None` for a plain move.
fn extend_opcode(to: RegSize, from: RegSize, signed: bool) -> Option<u32> {
    let w = if to == RegSize::S64 { P_REXW } else { 0 };
    match (from, signed) {
        (RegSize::S8, true) => Some(OPC_MOVSBL | w),
        (RegSize::S16, true) => Some(OPC_MOVSWL | w),
        (RegSize::S32, true) if to == RegSize::S64 => Some(OPC_MOVSLQ),
        (RegSize::S8, false) => Some(OPC_MOVZBL),
        (RegSize::S16, false) => Some(OPC_MOVZWL),
        _ => None,
    }
}

impl CodeGenerator<'_> {
    // -- Stack --

    pub fn emit_push_host_reg(&mut self, reg: Reg) {
        emit_push(self.buf, reg);
        self.stack_depth += 8;
    }

    pub fn emit_pop_host_reg(&mut self, reg: Reg) {
        emit_pop(self.buf, reg);
        self.stack_depth -= 8;
    }

    /// Copy RFLAGS into `reg`.
    pub fn read_flags_from_host(&mut self, reg: Reg) {
        emit_pushf(self.buf);
        self.stack_depth += 8;
        self.emit_pop_host_reg(reg);
    }

    // -- Labels --

    pub fn emit_jump(&mut self, label: &mut Label) {
        let at = emit_jmp_placeholder(self.buf);
        label.add_use(self.buf, at);
    }

    pub fn emit_jump_if(&mut self, cond: X86Cond, label: &mut Label) {
        let at = emit_jcc_placeholder(self.buf, cond);
        label.add_use(self.buf, at);
    }

    pub fn bind_label(&mut self, label: &mut Label) {
        label.bind(self.buf);
    }

    // -- Moves --

    /// Host register holding `value`. Guest values are loaded into the
    /// temporary register; constants are materialized there.
    fn value_in_reg(&mut self, value: &Value) -> Reg {
        match value.kind {
            ValueKind::Host(r) => r,
            ValueKind::Constant(c) => {
                emit_mov_ri(self.buf, value.size == RegSize::S64, TEMP_REG, c);
                TEMP_REG
            }
            ValueKind::Guest(g) => {
                self.emit_load_guest_register(TEMP_REG, g);
                TEMP_REG
            }
        }
    }

    /// `to = value` at `value`'s width.
    pub fn emit_copy_value(&mut self, to: Reg, value: &Value) {
        let rexw = value.size == RegSize::S64;
        match value.kind {
            ValueKind::Constant(c) => emit_mov_ri(self.buf, rexw, to, c),
            ValueKind::Host(r) if r == to => {}
            ValueKind::Host(r) => emit_mov_rr(self.buf, rexw, to, r),
            ValueKind::Guest(g) => self.emit_load_guest_register(to, g),
        }
    }

    /// `to = value` without touching the flags.
    pub fn emit_copy_value_keep_flags(&mut self, to: Reg, value: &Value) {
        match value.kind {
            ValueKind::Constant(c) => {
                emit_mov_ri_keep_flags(self.buf, value.size == RegSize::S64, to, c)
            }
            _ => self.emit_copy_value(to, value),
        }
    }

    pub fn emit_sign_extend(&mut self, to_size: RegSize, to: Reg, from_size: RegSize, from: Reg) {
        match extend_opcode(to_size, from_size, true) {
            Some(opc) => emit_movsx(self.buf, opc, to, from),
            None if to != from => emit_mov_rr(self.buf, to_size == RegSize::S64, to, from),
            None => {}
        }
    }

    pub fn emit_zero_extend(&mut self, to_size: RegSize, to: Reg, from_size: RegSize, from: Reg) {
        match extend_opcode(to_size, from_size, false) {
            Some(opc) => emit_movzx(self.buf, opc, to, from),
            // A 32-bit move clears bits 63..32.
            None if from_size == RegSize::S32 => emit_mov_rr(self.buf, false, to, from),
            None if to != from => emit_mov_rr(self.buf, true, to, from),
            None => {}
        }
    }

    // -- Arithmetic --

    fn emit_arith(&mut self, op: ArithOp, to: Reg, size: RegSize, value: &Value) {
        let rexw = size == RegSize::S64;
        match value.kind {
            ValueKind::Constant(_) => match value.with_size(size).imm32() {
                Some(imm) => emit_arith_ri(self.buf, op, rexw, to, imm),
                None => {
                    let src = self.value_in_reg(value);
                    emit_arith_rr(self.buf, op, rexw, to, src);
                }
            },
            _ => {
                let src = self.value_in_reg(value);
                emit_arith_rr(self.buf, op, rexw, to, src);
            }
        }
    }

    pub fn emit_add(&mut self, to: Reg, size: RegSize, value: &Value) {
        self.emit_arith(ArithOp::Add, to, size, value);
    }

    pub fn emit_sub(&mut self, to: Reg, size: RegSize, value: &Value) {
        self.emit_arith(ArithOp::Sub, to, size, value);
    }

    pub fn emit_and(&mut self, to: Reg, size: RegSize, value: &Value) {
        self.emit_arith(ArithOp::And, to, size, value);
    }

    pub fn emit_or(&mut self, to: Reg, size: RegSize, value: &Value) {
        self.emit_arith(ArithOp::Or, to, size, value);
    }

    pub fn emit_xor(&mut self, to: Reg, size: RegSize, value: &Value) {
        self.emit_arith(ArithOp::Xor, to, size, value);
    }

    pub fn emit_cmp(&mut self, to: Reg, size: RegSize, value: &Value) {
        self.emit_arith(ArithOp::Cmp, to, size, value);
    }

    pub fn emit_test(&mut self, to: Reg, size: RegSize, value: &Value) {
        let rexw = size == RegSize::S64;
        match value.imm32() {
            Some(imm) => emit_test_ri(self.buf, rexw, to, imm),
            None => {
                let src = self.value_in_reg(value);
                emit_test_rr(self.buf, rexw, to, src);
            }
        }
    }

    /// Two-operand multiply, `to *= value`.
    pub fn emit_mul(&mut self, to: Reg, size: RegSize, value: &Value) {
        let src = self.value_in_reg(value);
        emit_imul_rr(self.buf, size == RegSize::S64, to, src);
    }

    pub fn emit_inc(&mut self, to: Reg, size: RegSize) {
        emit_inc(self.buf, size == RegSize::S64, to);
    }

    pub fn emit_dec(&mut self, to: Reg, size: RegSize) {
        emit_dec(self.buf, size == RegSize::S64, to);
    }

    pub fn emit_not(&mut self, to: Reg, size: RegSize) {
        emit_not(self.buf, size == RegSize::S64, to);
    }

    // -- Shifts --

    fn emit_shift(&mut self, op: ShiftOp, to: Reg, size: RegSize, amount: &Value) {
        let rexw = size == RegSize::S64;
        if let Some(n) = amount.constant_value() {
            let n = (n as u32) & (size.bits() - 1);
            if n != 0 {
                emit_shift_ri(self.buf, op, rexw, to, n as u8);
            }
            return;
        }

        assert_ne!(to, Reg::Rcx, "variable shift destination must not be rcx");
        let src = self.value_in_reg(amount);
        if src == Reg::Rcx {
            emit_shift_cl(self.buf, op, rexw, to);
        } else if self.regs.is_in_use(Reg::Rcx) || self.regs.is_locked(Reg::Rcx) {
            self.emit_push_host_reg(Reg::Rcx);
            emit_mov_rr(self.buf, false, Reg::Rcx, src);
            emit_shift_cl(self.buf, op, rexw, to);
            self.emit_pop_host_reg(Reg::Rcx);
        } else {
            emit_mov_rr(self.buf, false, Reg::Rcx, src);
            emit_shift_cl(self.buf, op, rexw, to);
        }
    }

    pub fn emit_shl(&mut self, to: Reg, size: RegSize, amount: &Value) {
        self.emit_shift(ShiftOp::Shl, to, size, amount);
    }

    pub fn emit_shr(&mut self, to: Reg, size: RegSize, amount: &Value) {
        self.emit_shift(ShiftOp::Shr, to, size, amount);
    }

    pub fn emit_sar(&mut self, to: Reg, size: RegSize, amount: &Value) {
        self.emit_shift(ShiftOp::Sar, to, size, amount);
    }

    // -- Guest state --

    pub fn emit_load_guest_register(&mut self, to: Reg, guest: GuestReg) {
        emit_load(self.buf, false, to, STATE_REG, guest_reg_offset(guest));
    }

    pub fn emit_store_guest_register(&mut self, guest: GuestReg, value: &Value) {
        self.emit_store_cpu_struct_field(guest_reg_offset(guest), &value.with_size(RegSize::S32));
    }

    pub fn emit_load_cpu_struct_field(&mut self, to: Reg, size: RegSize, offset: i32) {
        match size {
            RegSize::S8 => emit_load_zx(self.buf, OPC_MOVZBL, to, STATE_REG, offset),
            RegSize::S16 => emit_load_zx(self.buf, OPC_MOVZWL, to, STATE_REG, offset),
            RegSize::S32 => emit_load(self.buf, false, to, STATE_REG, offset),
            RegSize::S64 => emit_load(self.buf, true, to, STATE_REG, offset),
        }
    }

    /// Store `value` at its own width.
    pub fn emit_store_cpu_struct_field(&mut self, offset: i32, value: &Value) {
        match (value.size, value.constant_value()) {
            (RegSize::S8, Some(c)) => emit_store_imm8(self.buf, STATE_REG, offset, c as u8),
            (RegSize::S8, None) => {
                let src = self.value_in_reg(value);
                emit_store_byte(self.buf, src, STATE_REG, offset);
            }
            (RegSize::S16, Some(c)) => {
                self.buf.emit_u8(OPSIZE_PREFIX);
                emit_modrm_ext_offset(self.buf, OPC_MOVL_EvIz, 0, STATE_REG, offset);
                self.buf.emit_u16(c as u16);
            }
            (RegSize::S16, None) => {
                let src = self.value_in_reg(value);
                self.buf.emit_u8(OPSIZE_PREFIX);
                emit_store(self.buf, false, src, STATE_REG, offset);
            }
            (size, _) => {
                let rexw = size == RegSize::S64;
                match value.imm32() {
                    Some(imm) => emit_store_imm(self.buf, rexw, STATE_REG, offset, imm),
                    None => {
                        let src = self.value_in_reg(value);
                        emit_store(self.buf, rexw, src, STATE_REG, offset);
                    }
                }
            }
        }
    }

    /// `field += value` for 32- and 64-bit fields.
    pub fn emit_add_cpu_struct_field(&mut self, offset: i32, value: &Value) {
        let rexw = value.size == RegSize::S64;
        match value.imm32() {
            Some(imm) => emit_arith_mi(self.buf, ArithOp::Add, rexw, STATE_REG, offset, imm),
            None => {
                let src = self.value_in_reg(value);
                emit_arith_mr(self.buf, ArithOp::Add, rexw, STATE_REG, offset, src);
            }
        }
    }

    // -- Calls --

    /// Align the stack and reserve shadow space. Returns the adjustment
    /// to hand to [`restore_stack_after_call`](Self::restore_stack_after_call).
    pub fn prepare_stack_for_call(&mut self) -> u32 {
        let adjust = self.abi.call_stack_adjust(self.stack_depth);
        if adjust > 0 {
            emit_arith_ri(self.buf, ArithOp::Sub, true, Reg::Rsp, adjust as i32);
            self.stack_depth += adjust;
        }
        adjust
    }

    pub fn restore_stack_after_call(&mut self, adjust: u32) {
        if adjust > 0 {
            emit_arith_ri(self.buf, ArithOp::Add, true, Reg::Rsp, adjust as i32);
            self.stack_depth -= adjust;
        }
    }

    /// Call a host function with up to four integer arguments.
    ///
    /// Live caller-saved registers are preserved around the call. With
    /// `return_size` the return value comes back in a scratch register.
    pub fn emit_function_call_ptr(
        &mut self,
        return_size: Option<RegSize>,
        ptr: *const u8,
        args: &[Value],
    ) -> Option<Value> {
        assert!(
            args.len() <= MAX_CALL_ARGS && args.len() <= self.abi.arg_regs.len(),
            "too many call arguments: {}",
            args.len()
        );

        let mut resolved = [Value::constant_u32(0); MAX_CALL_ARGS];
        for (slot, arg) in resolved.iter_mut().zip(args) {
            *slot = match arg.kind {
                ValueKind::Guest(g) => self.regs.read_guest_register(self.buf, g),
                _ => *arg,
            };
        }
        let args = &resolved[..args.len()];
        for reg in args.iter().filter_map(Value::host_reg) {
            self.regs.lock(reg);
        }

        let result = return_size.map(|size| self.regs.allocate_scratch(self.buf, size));
        let mut save = self.regs.live_caller_saved();
        if let Some(r) = result.as_ref().and_then(Value::host_reg) {
            save = save.clear(r);
        }
        let save: Vec<Reg> = save.iter().collect();

        for &reg in &save {
            self.emit_push_host_reg(reg);
        }
        self.emit_move_call_args(args);

        let adjust = self.prepare_stack_for_call();
        emit_mov_ri(self.buf, true, TEMP_REG, ptr as u64);
        emit_call_reg(self.buf, TEMP_REG);
        self.restore_stack_after_call(adjust);

        if let Some(r) = result.as_ref().and_then(Value::host_reg) {
            let size = return_size.unwrap_or(RegSize::S64);
            emit_mov_rr(self.buf, size == RegSize::S64, r, self.abi.return_reg);
        }
        for &reg in save.iter().rev() {
            self.emit_pop_host_reg(reg);
        }
        for reg in args.iter().filter_map(Value::host_reg) {
            self.regs.unlock(reg);
        }
        result
    }

    fn emit_move_call_args(&mut self, args: &[Value]) {
        let dests = &self.abi.arg_regs[..args.len()];
        // A source living in another argument's register would be
        // overwritten by a direct move.
        let conflict = args.iter().enumerate().any(|(i, a)| {
            a.host_reg()
                .is_some_and(|r| dests.iter().enumerate().any(|(j, &d)| j != i && d == r))
        });

        if conflict {
            for a in args {
                if let Some(r) = a.host_reg() {
                    self.emit_push_host_reg(r);
                }
            }
            for (a, &d) in args.iter().zip(dests).rev() {
                if a.host_reg().is_some() {
                    self.emit_pop_host_reg(d);
                }
            }
            for (a, &d) in args.iter().zip(dests) {
                if a.host_reg().is_none() {
                    self.emit_copy_value(d, a);
                }
            }
        } else {
            for (a, &d) in args.iter().zip(dests) {
                self.emit_copy_value(d, a);
            }
        }
    }
}
