//! End-to-end block tests: guest words in, guest state out, compiled
//! code checked against the interpreter.


use rec_backend::code_buffer::CodeBuffer;
use rec_backend::{CompileError, CompilerOptions};
use rec_core::insn::encode::*;
use rec_core::{CodeBlock, Cop0Regs, GuestReg};
use rec_exec::interpreter::EXCEPTION_VECTOR;
use rec_exec::{asm_functions, Core};

use crate::harness::{
    assert_matches_interpreter, run_compiled, run_compiled_with, CODE_BASE, DATA_BASE,
};

fn g(n: u8) -> GuestReg {
    GuestReg::gpr(n)
}

const Z: GuestReg = GuestReg::ZERO;
const RA: GuestReg = GuestReg::RA;

// ==========================================================
// Reference scenarios
// ==========================================================

#[test]
fn test_constant_chain() {
    let core = run_compiled(
        &[lui(g(1), 0x1000), ori(g(1), g(1), 0x00FF), addiu(g(2), g(1), 1)],
        |_| {},
    );
    assert_eq!(core.cpu.regs[1], 0x1000_00FF);
    // 0x1000_00FF + 1; the carry reaches bit 8, not bit 24.
    assert_eq!(core.cpu.regs[2], 0x1000_0100);
    assert_eq!(core.cpu.pc, CODE_BASE + 12);
    assert_eq!(core.cpu.npc, CODE_BASE + 16);
    assert_eq!(core.cpu.pending_ticks, 3);
}

#[test]
fn test_branch_commits_after_delay_slot() {
    let core = run_compiled(&[beq(Z, Z, 4), addiu(g(3), Z, 5)], |_| {});
    assert_eq!(core.cpu.regs[3], 5);
    assert_eq!(core.cpu.pc, CODE_BASE + 4 + 16);
    assert_eq!(core.cpu.npc, CODE_BASE + 4 + 20);
    assert_eq!(core.cpu.pending_ticks, 2);
}

#[test]
fn test_branch_commits_after_delay_slot_under_pressure() {
    // Fill the cache first so the delay slot has to evict.
    let mut words: Vec<u32> = (1..=20).map(|n| addiu(g(n), g(n), 1)).collect();
    words.push(beq(Z, Z, 4));
    words.push(addiu(g(3), Z, 5));
    let core = run_compiled(&words, |core| {
        for n in 1..=20 {
            core.cpu.regs[n] = 100 * n as u32;
        }
    });
    assert_eq!(core.cpu.regs[3], 5);
    assert_eq!(core.cpu.regs[20], 2001);
    assert_eq!(core.cpu.pc, CODE_BASE + 4 * 21 + 16);
}

// ==========================================================
// Differential cases: compiled == interpreted
// ==========================================================

macro_rules! differential {
    ($($name:ident: [$($insn:expr),* $(,)?] $(, $reg:literal = $val:expr)*;)*) => {
        $(
            #[test]
            #[allow(unused_variables)]
            fn $name() {
                assert_matches_interpreter(&[$($insn),*], |core: &mut Core| {
                    $(core.cpu.regs[$reg] = ($val) as u32;)*
                });
            }
        )*
    };
}

differential! {
    test_alu_register_ops: [
        addu(g(3), g(1), g(2)),
        subu(g(4), g(1), g(2)),
        and(g(5), g(1), g(2)),
        or(g(6), g(1), g(2)),
        xor(g(7), g(1), g(2)),
        nor(g(8), g(1), g(2)),
        slt(g(9), g(1), g(2)),
        sltu(g(10), g(1), g(2)),
    ], 1 = 0x8000_0001u32, 2 = 0x7FFF_FFFFu32;

    test_alu_same_register: [
        addu(g(1), g(1), g(1)),
        subu(g(2), g(2), g(1)),
        xor(g(3), g(3), g(3)),
        slt(g(4), g(4), g(4)),
    ], 1 = 5, 2 = 3, 3 = 77, 4 = 1;

    test_immediates: [
        addiu(g(2), g(1), -4),
        slti(g(3), g(1), -1),
        sltiu(g(4), g(1), -1),
        andi(g(5), g(1), 0xFFFF),
        ori(g(6), g(1), 0x8000),
        xori(g(7), g(1), 0xF0F0),
        lui(g(8), 0x8000),
    ], 1 = 0xFFFF_0003u32;

    test_constant_propagation: [
        lui(g(1), 0x1234),
        ori(g(1), g(1), 0x5678),
        addiu(g(2), g(1), -1),
        sll(g(3), g(2), 4),
        sra(g(4), g(3), 8),
        srl(g(5), g(3), 8),
        sltu(g(6), g(5), g(4)),
    ];

    test_constant_shifts: [
        sll(g(2), g(1), 0),
        sll(g(3), g(1), 31),
        srl(g(4), g(1), 1),
        sra(g(5), g(1), 31),
    ], 1 = 0x8000_00F1u32;

    test_variable_shifts: [
        sllv(g(3), g(1), g(2)),
        srlv(g(4), g(1), g(2)),
        srav(g(5), g(1), g(2)),
        sllv(g(6), g(1), g(7)),
    ], 1 = 0x8000_00F0u32, 2 = 36, 7 = 31;

    test_shift_by_itself: [sllv(g(1), g(1), g(1)), srav(g(2), g(2), g(2))], 1 = 3, 2 = -2i32;

    test_writes_to_r0_are_dropped: [
        addu(Z, g(1), g(2)),
        addiu(Z, g(1), 5),
        lui(Z, 1),
        addu(g(3), Z, g(1)),
    ], 1 = 9, 2 = 1;

    test_mult_and_hi_lo_moves: [
        mult(g(1), g(2)),
        mfhi(g(3)),
        mflo(g(4)),
        multu(g(1), g(2)),
        mfhi(g(5)),
        mflo(g(6)),
        mthi(g(1)),
        mtlo(g(2)),
        mfhi(g(7)),
        mflo(g(8)),
    ], 1 = 0xFFFF_FFF0u32, 2 = 0x1234_5678;

    test_divide_falls_back: [
        div(g(1), g(2)),
        mflo(g(3)),
        mfhi(g(4)),
        divu(g(1), Z),
        mflo(g(5)),
        mfhi(g(6)),
    ], 1 = -7i32, 2 = 2;

    test_bne_taken: [bne(g(1), g(2), 3), addiu(g(3), Z, 5)], 1 = 1, 2 = 2;
    test_bne_not_taken: [bne(g(1), g(2), 3), addiu(g(3), Z, 5)], 1 = 2, 2 = 2;
    test_blez_zero: [blez(g(1), 5), addiu(g(3), g(1), 1)], 1 = 0;
    test_blez_positive: [blez(g(1), 5), addiu(g(3), g(1), 1)], 1 = 1;
    test_bgtz_negative: [bgtz(g(1), 5), nop()], 1 = -1i32;
    test_bltz_constant_operand: [bltz(Z, 5), nop()];
    test_bgez_constant_operand: [bgez(Z, 5), nop()];
    test_bltzal_links_and_delay_slot_sees_link: [bltzal(g(1), 8), addu(g(3), RA, Z)], 1 = -1i32;
    test_bgezal_links_when_not_taken: [bgezal(g(1), 8), nop()], 1 = -5i32;
    test_jal_delay_slot_modifies_link: [jal(CODE_BASE + 0x100), addiu(RA, RA, 4)];
    test_jr_uses_value_before_delay_slot: [jr(g(1)), addiu(g(1), g(1), 8)], 1 = CODE_BASE + 0x40;
    test_jalr_same_source_and_link: [jalr(g(1), g(1)), nop()], 1 = CODE_BASE + 0x80;
    test_branch_on_dirty_register: [
        addiu(g(1), g(1), 1),
        beq(g(1), g(2), 4),
        nop(),
    ], 1 = 4, 2 = 5;

    test_add_without_overflow: [
        add(g(3), g(1), g(2)),
        addi(g(4), g(1), -1),
        sub(g(5), g(1), g(2)),
    ], 1 = -5i32, 2 = 3;
    test_add_overflow_mid_block: [
        addiu(g(5), Z, 1),
        add(g(3), g(1), g(2)),
        addiu(g(6), Z, 1),
    ], 1 = 0x7FFF_FFFF, 2 = 1, 3 = 0x33;
    test_addi_overflow: [addi(g(3), g(1), 1)], 1 = 0x7FFF_FFFF;
    test_sub_overflow: [sub(g(3), g(1), g(2))], 1 = 0x8000_0000u32, 2 = 1;
    test_overflow_in_delay_slot: [bne(g(1), Z, 4), add(g(3), g(1), g(1))], 1 = 0x4000_0000;
    test_syscall_ends_block: [addiu(g(1), g(1), 1), syscall()];
    test_break_in_delay_slot: [j(CODE_BASE + 0x40), brk()];
    test_reserved_instruction: [addiu(g(5), Z, 1), 0x4800_0000];
    test_rfe: [rfe()];
}

fn with_data(core: &mut Core) {
    core.cpu.regs[1] = DATA_BASE;
    core.cpu.regs[2] = 0x1111_1111;
    core.memory.write_u32(DATA_BASE, 0x4433_2211);
    core.memory.write_u32(DATA_BASE + 4, 0x8877_6655);
    core.memory.write_u32(DATA_BASE + 8, 0x8001_00F0);
}

#[test]
fn test_load_visible_after_delay_slot() {
    assert_matches_interpreter(
        &[lw(g(2), 0, g(1)), addu(g(3), g(2), Z), addu(g(4), g(2), Z)],
        with_data,
    );
}

#[test]
fn test_write_in_load_delay_slot_cancels_load() {
    assert_matches_interpreter(
        &[lw(g(2), 0, g(1)), addiu(g(2), Z, 7), addu(g(3), g(2), Z)],
        with_data,
    );
    assert_matches_interpreter(&[lw(g(2), 0, g(1)), lw(g(2), 4, g(1)), nop()], with_data);
}

#[test]
fn test_load_pending_at_block_end() {
    assert_matches_interpreter(&[addiu(g(5), Z, 1), lw(g(2), 4, g(1))], with_data);
    assert_matches_interpreter(&[beq(Z, Z, 4), lw(g(2), 0, g(1))], with_data);
}

#[test]
fn test_load_delay_carried_into_block() {
    let incoming = |core: &mut Core| {
        with_data(core);
        core.cpu.load_delay_reg = 2;
        core.cpu.load_delay_value = 0xAB;
    };
    assert_matches_interpreter(&[addu(g(3), g(2), Z), nop()], incoming);
    assert_matches_interpreter(&[addiu(g(2), Z, 1), addu(g(3), g(2), Z)], incoming);
    assert_matches_interpreter(&[sb(g(2), 0, g(1)), nop()], incoming);
    assert_matches_interpreter(&[lw(g(2), 4, g(1)), nop()], incoming);
}

#[test]
fn test_partial_loads() {
    assert_matches_interpreter(
        &[
            lb(g(3), 8, g(1)),
            lbu(g(4), 8, g(1)),
            lh(g(5), 10, g(1)),
            lhu(g(6), 10, g(1)),
            lwr(g(7), 1, g(1)),
            lwl(g(7), 4, g(1)),
            nop(),
        ],
        with_data,
    );
}

#[test]
fn test_stores() {
    assert_matches_interpreter(
        &[
            sw(g(2), 0, g(1)),
            sh(g(2), 6, g(1)),
            sb(g(2), 9, g(1)),
            swl(g(2), 17, g(1)),
            swr(g(2), 21, g(1)),
        ],
        with_data,
    );
}

#[test]
fn test_memory_exceptions() {
    assert_matches_interpreter(
        &[addiu(g(5), Z, 1), lw(g(2), 1, g(1)), addiu(g(6), Z, 1)],
        with_data,
    );
    assert_matches_interpreter(&[sh(g(2), 3, g(1)), nop()], with_data);
    // The first load still commits when the second one faults.
    assert_matches_interpreter(&[lw(g(2), 0, g(1)), lw(g(3), 2, g(1))], with_data);
}

#[test]
fn test_cop0_access() {
    let status = |core: &mut Core| {
        core.cpu.regs[1] = Cop0Regs::SR_ISC;
        core.cpu.cop0.sr = 0x401;
        core.cpu.cop0.cause = 0x24;
    };
    assert_matches_interpreter(&[mfc0(g(2), 12), addu(g(3), g(2), Z), nop()], status);
    assert_matches_interpreter(&[mfc0(g(2), 13), mfc0(g(3), 15), nop()], status);
    assert_matches_interpreter(&[addiu(g(4), Z, 1), mtc0(g(1), 12)], status);
    assert_matches_interpreter(&[mtc0(g(1), 13)], status);
}

#[test]
fn test_isolated_cache_store() {
    assert_matches_interpreter(&[sw(g(2), 0, g(1))], |core| {
        with_data(core);
        core.cpu.cop0.sr = Cop0Regs::SR_ISC;
    });
}

#[test]
fn test_register_pressure() {
    // Chain through 25 registers so every host register is needed and
    // older values get spilled and reloaded.
    let mut words = Vec::new();
    for n in 3..28u8 {
        words.push(addu(g(n), g(n - 1), g(n - 2)));
    }
    for n in 3..28u8 {
        words.push(xor(g(n), g(n), g(30 - n)));
    }
    assert_matches_interpreter(&words, |core| {
        for n in 1..32 {
            core.cpu.regs[n] = 0x0101_0101u32.wrapping_mul(n as u32);
        }
    });
}

// ==========================================================
// Block exits
// ==========================================================

#[test]
fn test_overflow_exception_state() {
    let core = run_compiled(&[bne(g(1), Z, 4), add(g(3), g(1), g(1))], |core| {
        core.cpu.regs[1] = 0x4000_0000;
        core.cpu.regs[3] = 0x33;
    });
    assert_eq!(core.cpu.pc, EXCEPTION_VECTOR);
    assert_eq!(core.cpu.cop0.epc, CODE_BASE);
    assert_ne!(core.cpu.cop0.cause & Cop0Regs::CAUSE_BD, 0);
    assert_eq!((core.cpu.cop0.cause >> 2) & 0x1F, 12);
    assert_eq!(core.cpu.regs[3], 0x33);
    assert_eq!(core.cpu.exception_raised, 0);
}

#[test]
fn test_downcount_exit_before_first_instruction() {
    let options = CompilerOptions {
        check_downcount: true,
        disable_specialization: false,
    };
    let words = [addiu(g(1), g(1), 1), addiu(g(2), g(2), 1)];

    let core = run_compiled_with(&words, options, |core| {
        core.cpu.pending_ticks = 10;
        core.cpu.downcount = 10;
    });
    assert_eq!(core.cpu.regs[1], 0);
    assert_eq!(core.cpu.pc, CODE_BASE);
    assert_eq!(core.cpu.pending_ticks, 10);

    let core = run_compiled_with(&words, options, |core| {
        core.cpu.downcount = 10;
    });
    assert_eq!((core.cpu.regs[1], core.cpu.regs[2]), (1, 1));
    assert_eq!(core.cpu.pc, CODE_BASE + 8);
    assert_eq!(core.cpu.pending_ticks, 2);
}

// ==========================================================
// Rejected blocks
// ==========================================================

fn try_compile(words: &[u32]) -> Result<(), CompileError> {
    let mut buf = CodeBuffer::new(1 << 16).unwrap();
    let block = CodeBlock::from_words(CODE_BASE, words);
    rec_backend::compile_block(&mut buf, asm_functions(), CompilerOptions::default(), &block)
        .map(|_| ())
}

#[test]
fn test_malformed_blocks_are_rejected() {
    assert_eq!(try_compile(&[]), Err(CompileError::EmptyBlock));
    assert_eq!(
        try_compile(&[j(0), jr(RA), nop()]),
        Err(CompileError::BranchInDelaySlot { pc: CODE_BASE + 4 })
    );
    assert_eq!(
        try_compile(&[nop(), j(0)]),
        Err(CompileError::MissingDelaySlot { pc: CODE_BASE + 4 })
    );
    assert_eq!(
        try_compile(&[j(0), nop(), nop()]),
        Err(CompileError::InstructionsAfterDelaySlot { pc: CODE_BASE })
    );
}

#[test]
fn test_full_buffer_is_rewound() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    let words: Vec<u32> = (0..1024).map(|_| sb(Z, 0, Z)).collect();
    let block = CodeBlock::from_words(CODE_BASE, &words);
    let err = rec_backend::compile_block(
        &mut buf,
        asm_functions(),
        CompilerOptions::default(),
        &block,
    )
    .unwrap_err();
    assert_eq!(err, CompileError::CodeBufferFull);
    assert_eq!(buf.offset(), 0);
    assert!(!buf.overflowed());
}
