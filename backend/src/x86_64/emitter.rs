//! x86-64 instruction encoders.
//!
//! Opcodes are carried as a `u32`: the low byte is the opcode itself and
//! the upper bits are prefix flags (`P_*`). Every register or memory form
//! funnels through [`encode`], which writes the REX prefix, the opcode
//! and the ModRM/SIB/displacement tail.

#![allow(non_upper_case_globals)]

use crate::code_buffer::CodeBuffer;
use crate::x86_64::regs::Reg;

/// Two-byte opcode (0x0F escape).
pub const P_EXT: u32 = 0x100;
/// 64-bit operand size.
pub const P_REXW: u32 = 0x1000;
/// Reg field names a byte register; spl..dil need a REX.
pub const P_REXB_R: u32 = 0x2000;
/// R/M field names a byte register.
pub const P_REXB_RM: u32 = 0x4000;

/// Operand-size override, selects 16-bit operands.
pub const OPSIZE_PREFIX: u8 = 0x66;

pub const OPC_MOVL_EvIz: u32 = 0xC7;
pub const OPC_MOVZBL: u32 = 0xB6 | P_EXT;
pub const OPC_MOVZWL: u32 = 0xB7 | P_EXT;
pub const OPC_MOVSBL: u32 = 0xBE | P_EXT;
pub const OPC_MOVSWL: u32 = 0xBF | P_EXT;
pub const OPC_MOVSLQ: u32 = 0x63 | P_REXW;

const ARITH_EvGv: u32 = 0x01;
const ARITH_GvEv: u32 = 0x03;
const ARITH_EvIz: u32 = 0x81;
const ARITH_EvIb: u32 = 0x83;
const XOR_EvGv: u32 = 0x31;
const TEST_EvGv: u32 = 0x85;
const MOVB_EvGv: u32 = 0x88 | P_REXB_R;
const MOV_EvGv: u32 = 0x89;
const MOV_GvEv: u32 = 0x8B;
const MOV_Iv: u32 = 0xB8;
const SHIFT_Ib: u32 = 0xC1;
const MOVB_EvIb: u32 = 0xC6;
const SHIFT_1: u32 = 0xD1;
const SHIFT_CL: u32 = 0xD3;
const GRP3_Ev: u32 = 0xF7;
const GRP5_Ev: u32 = 0xFF;
const CMOVCC: u32 = 0x40 | P_EXT;
const JCC_rel32: u32 = 0x80 | P_EXT;
const SETCC: u32 = 0x90 | P_EXT | P_REXB_RM;
const IMUL_GvEv: u32 = 0xAF | P_EXT;

/// ALU group selector: the `/digit` of 0x81/0x83 and bits 3..5 of the
/// two-operand forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ArithOp {
    Add = 0,
    Or = 1,
    Adc = 2,
    Sbb = 3,
    And = 4,
    Sub = 5,
    Xor = 6,
    Cmp = 7,
}

/// Shift group selector for 0xC1/0xD1/0xD3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShiftOp {
    Rol = 0,
    Ror = 1,
    Shl = 4,
    Shr = 5,
    Sar = 7,
}

/// Condition codes, numbered as in the low nibble of Jcc/SETcc/CMOVcc.
/// Each even code and its odd neighbour are complements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum X86Cond {
    Jo = 0x0,
    Jno = 0x1,
    Jb = 0x2,
    Jae = 0x3,
    Je = 0x4,
    Jne = 0x5,
    Jbe = 0x6,
    Ja = 0x7,
    Js = 0x8,
    Jns = 0x9,
    Jp = 0xA,
    Jnp = 0xB,
    Jl = 0xC,
    Jge = 0xD,
    Jle = 0xE,
    Jg = 0xF,
}

impl X86Cond {
    const ALL: [X86Cond; 16] = [
        X86Cond::Jo,
        X86Cond::Jno,
        X86Cond::Jb,
        X86Cond::Jae,
        X86Cond::Je,
        X86Cond::Jne,
        X86Cond::Jbe,
        X86Cond::Ja,
        X86Cond::Js,
        X86Cond::Jns,
        X86Cond::Jp,
        X86Cond::Jnp,
        X86Cond::Jl,
        X86Cond::Jge,
        X86Cond::Jle,
        X86Cond::Jg,
    ];

    pub fn invert(self) -> Self {
        Self::ALL[(self as usize) ^ 1]
    }
}

/// The r/m side of an instruction.
#[derive(Clone, Copy)]
enum Rm {
    Reg(Reg),
    Mem { base: Reg, disp: i32 },
    Sib { base: Reg, index: Reg, scale: u8, disp: i32 },
}

#[inline]
fn width(rexw: bool) -> u32 {
    if rexw {
        P_REXW
    } else {
        0
    }
}

/// REX, escape and opcode bytes. `r`, `x` and `b` are full register
/// numbers for the reg, index and base/rm fields.
fn opcode(buf: &mut CodeBuffer, opc: u32, r: u8, x: u8, b: u8) {
    let rex = (u8::from(opc & P_REXW != 0) << 3)
        | (u8::from(r >= 8) << 2)
        | (u8::from(x >= 8) << 1)
        | u8::from(b >= 8);
    let byte_reg = (opc & P_REXB_R != 0 && r >= 4) || (opc & P_REXB_RM != 0 && b >= 4);
    if rex != 0 || byte_reg {
        buf.emit_u8(0x40 | rex);
    }
    if opc & P_EXT != 0 {
        buf.emit_u8(0x0F);
    }
    buf.emit_u8(opc as u8);
}

/// Mod bits and displacement width for `[base + disp]`. rbp and r13
/// cannot use the no-displacement form.
fn disp_mode(base: Reg, disp: i32) -> u8 {
    if disp == 0 && base.low3() != 5 {
        0x00
    } else if i8::try_from(disp).is_ok() {
        0x40
    } else {
        0x80
    }
}

fn encode(buf: &mut CodeBuffer, opc: u32, reg: u8, rm: Rm) {
    let reg3 = (reg & 7) << 3;
    match rm {
        Rm::Reg(r) => {
            opcode(buf, opc, reg, 0, r as u8);
            buf.emit_u8(0xC0 | reg3 | r.low3());
        }
        Rm::Mem { base, disp } => {
            opcode(buf, opc, reg, 0, base as u8);
            let mode = disp_mode(base, disp);
            if base.low3() == 4 {
                // rsp/r12 as a base always take a SIB byte.
                buf.emit_u8(mode | reg3 | 0x04);
                buf.emit_u8(0x24);
            } else {
                buf.emit_u8(mode | reg3 | base.low3());
            }
            emit_disp(buf, mode, disp);
        }
        Rm::Sib {
            base,
            index,
            scale,
            disp,
        } => {
            opcode(buf, opc, reg, index as u8, base as u8);
            let mode = disp_mode(base, disp);
            buf.emit_u8(mode | reg3 | 0x04);
            buf.emit_u8((scale << 6) | (index.low3() << 3) | base.low3());
            emit_disp(buf, mode, disp);
        }
    }
}

fn emit_disp(buf: &mut CodeBuffer, mode: u8, disp: i32) {
    match mode {
        0x40 => buf.emit_u8(disp as u8),
        0x80 => buf.emit_u32(disp as u32),
        _ => {}
    }
}

/// Immediate ALU forms pick imm8 when the value sign-extends from a byte.
fn arith_imm(buf: &mut CodeBuffer, op: ArithOp, rexw: bool, rm: Rm, imm: i32) {
    match i8::try_from(imm) {
        Ok(imm8) => {
            encode(buf, ARITH_EvIb | width(rexw), op as u8, rm);
            buf.emit_u8(imm8 as u8);
        }
        Err(_) => {
            encode(buf, ARITH_EvIz | width(rexw), op as u8, rm);
            buf.emit_u32(imm as u32);
        }
    }
}

fn arith_opc(base: u32, op: ArithOp, rexw: bool) -> u32 {
    (base + ((op as u32) << 3)) | width(rexw)
}

/// `op dst, src`
pub fn emit_arith_rr(buf: &mut CodeBuffer, op: ArithOp, rexw: bool, dst: Reg, src: Reg) {
    encode(buf, arith_opc(ARITH_GvEv, op, rexw), dst as u8, Rm::Reg(src));
}

/// `op dst, imm`
pub fn emit_arith_ri(buf: &mut CodeBuffer, op: ArithOp, rexw: bool, dst: Reg, imm: i32) {
    arith_imm(buf, op, rexw, Rm::Reg(dst), imm);
}

/// `op [base+disp], src`
pub fn emit_arith_mr(
    buf: &mut CodeBuffer,
    op: ArithOp,
    rexw: bool,
    base: Reg,
    disp: i32,
    src: Reg,
) {
    encode(buf, arith_opc(ARITH_EvGv, op, rexw), src as u8, Rm::Mem { base, disp });
}

/// `op dst, [base+disp]`
pub fn emit_arith_rm(
    buf: &mut CodeBuffer,
    op: ArithOp,
    rexw: bool,
    dst: Reg,
    base: Reg,
    disp: i32,
) {
    encode(buf, arith_opc(ARITH_GvEv, op, rexw), dst as u8, Rm::Mem { base, disp });
}

/// `op [base+disp], imm`
pub fn emit_arith_mi(
    buf: &mut CodeBuffer,
    op: ArithOp,
    rexw: bool,
    base: Reg,
    disp: i32,
    imm: i32,
) {
    arith_imm(buf, op, rexw, Rm::Mem { base, disp }, imm);
}

/// Group opcode with a `/digit` against `[base+disp]`. Any immediate is
/// left to the caller.
pub fn emit_modrm_ext_offset(buf: &mut CodeBuffer, opc: u32, ext: u8, base: Reg, disp: i32) {
    encode(buf, opc, ext, Rm::Mem { base, disp });
}

pub fn emit_not(buf: &mut CodeBuffer, rexw: bool, reg: Reg) {
    encode(buf, GRP3_Ev | width(rexw), 2, Rm::Reg(reg));
}

pub fn emit_inc(buf: &mut CodeBuffer, rexw: bool, reg: Reg) {
    encode(buf, GRP5_Ev | width(rexw), 0, Rm::Reg(reg));
}

pub fn emit_dec(buf: &mut CodeBuffer, rexw: bool, reg: Reg) {
    encode(buf, GRP5_Ev | width(rexw), 1, Rm::Reg(reg));
}

/// Shift by a constant. A count of one has its own short form.
pub fn emit_shift_ri(buf: &mut CodeBuffer, op: ShiftOp, rexw: bool, dst: Reg, count: u8) {
    if count == 1 {
        encode(buf, SHIFT_1 | width(rexw), op as u8, Rm::Reg(dst));
    } else {
        encode(buf, SHIFT_Ib | width(rexw), op as u8, Rm::Reg(dst));
        buf.emit_u8(count);
    }
}

/// Shift by `cl`.
pub fn emit_shift_cl(buf: &mut CodeBuffer, op: ShiftOp, rexw: bool, dst: Reg) {
    encode(buf, SHIFT_CL | width(rexw), op as u8, Rm::Reg(dst));
}

pub fn emit_imul_rr(buf: &mut CodeBuffer, rexw: bool, dst: Reg, src: Reg) {
    encode(buf, IMUL_GvEv | width(rexw), dst as u8, Rm::Reg(src));
}

pub fn emit_mov_rr(buf: &mut CodeBuffer, rexw: bool, dst: Reg, src: Reg) {
    encode(buf, MOV_EvGv | width(rexw), src as u8, Rm::Reg(dst));
}

/// Load a constant. Zero becomes `xor r32, r32`, which clobbers flags.
pub fn emit_mov_ri(buf: &mut CodeBuffer, rexw: bool, reg: Reg, val: u64) {
    if val == 0 {
        encode(buf, XOR_EvGv, reg as u8, Rm::Reg(reg));
    } else {
        emit_mov_ri_keep_flags(buf, rexw, reg, val);
    }
}

/// Load a constant with the shortest flag-preserving `mov`.
pub fn emit_mov_ri_keep_flags(buf: &mut CodeBuffer, rexw: bool, reg: Reg, val: u64) {
    let short = MOV_Iv + u32::from(reg.low3());
    if !rexw || val <= u64::from(u32::MAX) {
        opcode(buf, short, 0, 0, reg as u8);
        buf.emit_u32(val as u32);
    } else if i32::try_from(val as i64).is_ok() {
        encode(buf, OPC_MOVL_EvIz | P_REXW, 0, Rm::Reg(reg));
        buf.emit_u32(val as u32);
    } else {
        opcode(buf, short | P_REXW, 0, 0, reg as u8);
        buf.emit_u64(val);
    }
}

/// `movzx dst, src` with `opc` one of the `OPC_MOVZ*` forms.
pub fn emit_movzx(buf: &mut CodeBuffer, opc: u32, dst: Reg, src: Reg) {
    encode(buf, opc | P_REXB_RM, dst as u8, Rm::Reg(src));
}

/// `movsx dst, src` with `opc` one of the `OPC_MOVS*` forms.
pub fn emit_movsx(buf: &mut CodeBuffer, opc: u32, dst: Reg, src: Reg) {
    encode(buf, opc | P_REXB_RM, dst as u8, Rm::Reg(src));
}

pub fn emit_load(buf: &mut CodeBuffer, rexw: bool, dst: Reg, base: Reg, disp: i32) {
    encode(buf, MOV_GvEv | width(rexw), dst as u8, Rm::Mem { base, disp });
}

/// Narrow load extended to 32 bits, `opc` as for [`emit_movzx`].
pub fn emit_load_zx(buf: &mut CodeBuffer, opc: u32, dst: Reg, base: Reg, disp: i32) {
    encode(buf, opc, dst as u8, Rm::Mem { base, disp });
}

pub fn emit_store(buf: &mut CodeBuffer, rexw: bool, src: Reg, base: Reg, disp: i32) {
    encode(buf, MOV_EvGv | width(rexw), src as u8, Rm::Mem { base, disp });
}

pub fn emit_store_byte(buf: &mut CodeBuffer, src: Reg, base: Reg, disp: i32) {
    encode(buf, MOVB_EvGv, src as u8, Rm::Mem { base, disp });
}

/// `mov [base+disp], imm32`, sign-extended when `rexw`.
pub fn emit_store_imm(buf: &mut CodeBuffer, rexw: bool, base: Reg, disp: i32, imm: i32) {
    encode(buf, OPC_MOVL_EvIz | width(rexw), 0, Rm::Mem { base, disp });
    buf.emit_u32(imm as u32);
}

pub fn emit_store_imm8(buf: &mut CodeBuffer, base: Reg, disp: i32, imm: u8) {
    encode(buf, MOVB_EvIb, 0, Rm::Mem { base, disp });
    buf.emit_u8(imm);
}

/// `mov [base + index << scale + disp], src`
pub fn emit_store_sib(
    buf: &mut CodeBuffer,
    rexw: bool,
    src: Reg,
    base: Reg,
    index: Reg,
    scale: u8,
    disp: i32,
) {
    let rm = Rm::Sib {
        base,
        index,
        scale,
        disp,
    };
    encode(buf, MOV_EvGv | width(rexw), src as u8, rm);
}

pub fn emit_test_rr(buf: &mut CodeBuffer, rexw: bool, a: Reg, b: Reg) {
    encode(buf, TEST_EvGv | width(rexw), a as u8, Rm::Reg(b));
}

pub fn emit_test_ri(buf: &mut CodeBuffer, rexw: bool, reg: Reg, imm: i32) {
    encode(buf, GRP3_Ev | width(rexw), 0, Rm::Reg(reg));
    buf.emit_u32(imm as u32);
}

/// `setcc` into the low byte of `dst`. The upper bits are left as they were.
pub fn emit_setcc(buf: &mut CodeBuffer, cond: X86Cond, dst: Reg) {
    encode(buf, SETCC + cond as u32, 0, Rm::Reg(dst));
}

pub fn emit_cmovcc(buf: &mut CodeBuffer, cond: X86Cond, rexw: bool, dst: Reg, src: Reg) {
    encode(buf, (CMOVCC + cond as u32) | width(rexw), dst as u8, Rm::Reg(src));
}

/// `jcc rel32` with a zero displacement. Returns the displacement's
/// offset for [`patch_rel32`].
pub fn emit_jcc_placeholder(buf: &mut CodeBuffer, cond: X86Cond) -> usize {
    opcode(buf, JCC_rel32 + cond as u32, 0, 0, 0);
    let at = buf.offset();
    buf.emit_u32(0);
    at
}

/// `jmp rel32` with a zero displacement.
pub fn emit_jmp_placeholder(buf: &mut CodeBuffer) -> usize {
    buf.emit_u8(0xE9);
    let at = buf.offset();
    buf.emit_u32(0);
    at
}

/// Point the rel32 at `disp_offset` to `target_offset`.
pub fn patch_rel32(buf: &mut CodeBuffer, disp_offset: usize, target_offset: usize) {
    let disp = target_offset as i64 - (disp_offset as i64 + 4);
    let disp = i32::try_from(disp).unwrap_or_else(|_| panic!("rel32 out of range: {disp:#x}"));
    buf.patch_u32(disp_offset, disp as u32);
}

pub fn emit_call_reg(buf: &mut CodeBuffer, reg: Reg) {
    encode(buf, GRP5_Ev, 2, Rm::Reg(reg));
}

pub fn emit_push(buf: &mut CodeBuffer, reg: Reg) {
    opcode(buf, 0x50 + u32::from(reg.low3()), 0, 0, reg as u8);
}

pub fn emit_pop(buf: &mut CodeBuffer, reg: Reg) {
    opcode(buf, 0x58 + u32::from(reg.low3()), 0, 0, reg as u8);
}

/// `pushfq`
pub fn emit_pushf(buf: &mut CodeBuffer) {
    buf.emit_u8(0x9C);
}

pub fn emit_ret(buf: &mut CodeBuffer) {
    buf.emit_u8(0xC3);
}

pub fn emit_int3(buf: &mut CodeBuffer) {
    buf.emit_u8(0xCC);
}
