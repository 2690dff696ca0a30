use std::collections::HashMap;

use rec_core::insn::encode::*;
use rec_core::{GuestReg, Opcode};
use rec_frontend::{decode_block, DecodeError};

const BASE: u32 = 0x8000_1000;

fn g(n: u8) -> GuestReg {
    GuestReg::gpr(n)
}

/// Guest code laid out from `BASE`; everything else is unmapped.
struct Program(HashMap<u32, u32>);

impl Program {
    fn new(words: &[u32]) -> Self {
        Self(
            words
                .iter()
                .enumerate()
                .map(|(i, &w)| (BASE + 4 * i as u32, w))
                .collect(),
        )
    }

    fn fetch(&self) -> impl Fn(u32) -> Option<u32> + '_ {
        |addr| self.0.get(&addr).copied()
    }
}

fn ops(block: &rec_core::CodeBlock) -> Vec<Opcode> {
    block.instructions.iter().map(|i| i.op).collect()
}

#[test]
fn test_block_ends_after_delay_slot() {
    let prog = Program::new(&[
        addiu(g(1), g(1), 1),
        beq(g(1), g(2), 4),
        addiu(g(3), g(0), 5),
        addiu(g(4), g(0), 6),
    ]);
    let block = decode_block(&prog.fetch(), BASE, 64).unwrap();
    assert_eq!(ops(&block), [Opcode::Addiu, Opcode::Beq, Opcode::Addiu]);
    assert!(block.instructions[2].is_in_delay_slot);
    assert_eq!(block.end_pc(), BASE + 12);
}

#[test]
fn test_block_ends_at_exit_instruction() {
    let prog = Program::new(&[
        addiu(g(1), g(0), 1),
        syscall(),
        addiu(g(2), g(0), 2),
    ]);
    let block = decode_block(&prog.fetch(), BASE, 64).unwrap();
    assert_eq!(ops(&block), [Opcode::Addiu, Opcode::Syscall]);

    let prog = Program::new(&[mtc0(g(1), 12), nop()]);
    let block = decode_block(&prog.fetch(), BASE, 64).unwrap();
    assert_eq!(block.len(), 1);
}

#[test]
fn test_instruction_limit() {
    let prog = Program::new(&[nop(); 16]);
    let block = decode_block(&prog.fetch(), BASE, 5).unwrap();
    assert_eq!(block.len(), 5);

    // A limit of zero still yields one instruction.
    let block = decode_block(&prog.fetch(), BASE, 0).unwrap();
    assert_eq!(block.len(), 1);
}

#[test]
fn test_branch_at_limit_takes_delay_slot() {
    let prog = Program::new(&[nop(), nop(), j(0), nop(), nop()]);
    let block = decode_block(&prog.fetch(), BASE, 3).unwrap();
    assert_eq!(block.len(), 4);
    assert!(block.instructions[3].is_in_delay_slot);
}

#[test]
fn test_fetch_failure() {
    let empty = Program::new(&[]);
    assert_eq!(
        decode_block(&empty.fetch(), BASE, 64),
        Err(DecodeError::FetchFailed { pc: BASE })
    );

    // Runs off the end of mapped code: keep what was decoded.
    let prog = Program::new(&[nop(), nop()]);
    let block = decode_block(&prog.fetch(), BASE, 64).unwrap();
    assert_eq!(block.len(), 2);

    // A branch without a readable delay slot is dropped.
    let prog = Program::new(&[nop(), bne(g(1), g(2), 8)]);
    let block = decode_block(&prog.fetch(), BASE, 64).unwrap();
    assert_eq!(ops(&block), [Opcode::Sll]);

    let prog = Program::new(&[jr(GuestReg::RA)]);
    assert_eq!(
        decode_block(&prog.fetch(), BASE, 64),
        Err(DecodeError::FetchFailed { pc: BASE + 4 })
    );
}

#[test]
fn test_misaligned_entry() {
    let prog = Program::new(&[nop(); 4]);
    assert_eq!(
        decode_block(&prog.fetch(), BASE + 2, 64),
        Err(DecodeError::Misaligned { pc: BASE + 2 })
    );
}

#[test]
fn test_branch_in_delay_slot_is_kept_for_compiler() {
    let prog = Program::new(&[j(0), jr(GuestReg::RA), nop()]);
    let block = decode_block(&prog.fetch(), BASE, 64).unwrap();
    assert_eq!(ops(&block), [Opcode::J, Opcode::Jr]);
    assert!(block.instructions[1].is_in_delay_slot);
}
