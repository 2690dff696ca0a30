use rec_core::insn::encode::*;
use rec_core::{physical_page, CodeBlock, GuestReg, Opcode};

#[test]
fn test_from_words_marks_delay_slots() {
    let r1 = GuestReg::gpr(1);
    let block = CodeBlock::from_words(
        0x8000_1000,
        &[addiu(r1, r1, 1), bne(r1, GuestReg::ZERO, -2), nop()],
    );
    assert_eq!(block.len(), 3);
    let flags: Vec<bool> = block.instructions.iter().map(|i| i.is_in_delay_slot).collect();
    assert_eq!(flags, [false, false, true]);
    assert!(block.instructions[1].is_branch);
    assert_eq!(block.instructions[2].pc, 0x8000_1008);
    assert_eq!(block.end_pc(), 0x8000_100C);
    assert_eq!(block.size_in_bytes(), 12);
}

#[test]
fn test_instruction_flags() {
    let block = CodeBlock::from_words(0, &[lw(GuestReg::gpr(2), 0, GuestReg::gpr(1)), syscall()]);
    let lw_insn = &block.instructions[0];
    assert_eq!(lw_insn.op, Opcode::Lw);
    assert!(lw_insn.is_load_delay_producing);
    assert!(lw_insn.can_trap);
    assert!(block.instructions[1].ends_block);
    assert_eq!(block.instructions[1].bits(), syscall());
}

#[test]
fn test_pages_strip_segment_bits() {
    assert_eq!(physical_page(0x8000_1234), 1);
    assert_eq!(physical_page(0xA000_1234), 1);
    assert_eq!(physical_page(0x0000_1234), 1);

    let words = [nop(); 4];
    let block = CodeBlock::from_words(0x8000_0FF8, &words);
    assert_eq!(block.pages(), 0..=1);
    let block = CodeBlock::from_words(0x8000_2000, &words);
    assert_eq!(block.pages(), 2..=2);
}
