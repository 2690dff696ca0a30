use rec_core::insn::encode::*;
use rec_core::{GuestReg, Instruction, Opcode};

fn g(n: u8) -> GuestReg {
    GuestReg::gpr(n)
}

#[test]
fn test_decode_special() {
    assert_eq!(Opcode::decode(nop()), Opcode::Sll);
    assert_eq!(Opcode::decode(addu(g(1), g(2), g(3))), Opcode::Addu);
    assert_eq!(Opcode::decode(jr(GuestReg::RA)), Opcode::Jr);
    assert_eq!(Opcode::decode(syscall()), Opcode::Syscall);
    assert_eq!(Opcode::decode(brk()), Opcode::Break);
    assert_eq!(Opcode::decode(divu(g(4), g(5))), Opcode::Divu);
    // funct 0x01 is unassigned
    assert_eq!(Opcode::decode(0x0000_0001), Opcode::Invalid);
}

#[test]
fn test_decode_regimm_uses_only_ge_and_link_bits() {
    assert_eq!(Opcode::decode(bltz(g(1), 4)), Opcode::Bltz);
    assert_eq!(Opcode::decode(bgez(g(1), 4)), Opcode::Bgez);
    assert_eq!(Opcode::decode(bltzal(g(1), 4)), Opcode::Bltzal);
    assert_eq!(Opcode::decode(bgezal(g(1), 4)), Opcode::Bgezal);
    // rt = 0x03: bit 0 set, link pattern not matched
    let odd = (0x01 << 26) | (1 << 21) | (0x03 << 16);
    assert_eq!(Opcode::decode(odd), Opcode::Bgez);
}

#[test]
fn test_decode_cop0() {
    assert_eq!(Opcode::decode(mfc0(g(2), 12)), Opcode::Mfc0);
    assert_eq!(Opcode::decode(mtc0(g(2), 12)), Opcode::Mtc0);
    assert_eq!(Opcode::decode(rfe()), Opcode::Rfe);
    // COP2 is not modelled.
    assert_eq!(Opcode::decode(0x4800_0000), Opcode::Invalid);
}

#[test]
fn test_fields() {
    let i = Instruction(addiu(g(2), g(1), -4));
    assert_eq!(i.rt(), g(2));
    assert_eq!(i.rs(), g(1));
    assert_eq!(i.imm_sext(), 0xFFFF_FFFC);
    assert_eq!(i.imm_zext(), 0xFFFC);

    let i = Instruction(sra(g(3), g(4), 7));
    assert_eq!((i.rd(), i.rt(), i.sa()), (g(3), g(4), 7));

    let i = Instruction(mtc0(g(9), 13));
    assert_eq!(i.cop_reg(), 13);
    assert_eq!(i.rt(), g(9));
}

#[test]
fn test_branch_targets() {
    let i = Instruction(beq(GuestReg::ZERO, GuestReg::ZERO, -1));
    assert_eq!(i.branch_target(0x8000_1000), 0x8000_1000);
    let i = Instruction(bne(g(1), g(2), 3));
    assert_eq!(i.branch_target(0x8000_1000), 0x8000_1010);
    // j keeps the top four bits of the delay slot address
    let i = Instruction(j(0x0012_3450));
    assert_eq!(i.jump_target(0x8000_1000), 0x8012_3450);
    assert_eq!(i.jump_target(0x8FFF_FFFC), 0x9012_3450);
}

#[test]
fn test_classification() {
    assert!(Opcode::Jalr.is_branch());
    assert!(Opcode::J.is_unconditional_branch());
    assert!(!Opcode::Beq.is_unconditional_branch());
    assert!(Opcode::Lwl.is_load());
    assert!(Opcode::Mfc0.is_load());
    assert!(!Opcode::Sw.is_load());
    assert!(Opcode::Swr.is_store());
    assert!(Opcode::Add.can_trap());
    assert!(!Opcode::Addu.can_trap());
    assert!(Opcode::Lw.can_trap());
    assert!(!Opcode::Lb.can_trap());
    assert!(Opcode::Mtc0.ends_block());
    assert!(Opcode::Syscall.ends_block());
    assert!(!Opcode::Jr.ends_block());
}

#[test]
fn test_written_register() {
    assert_eq!(Instruction(addu(g(3), g(1), g(2))).written_register(), Some(g(3)));
    assert_eq!(Instruction(lui(g(7), 1)).written_register(), Some(g(7)));
    assert_eq!(Instruction(jal(0)).written_register(), Some(GuestReg::RA));
    assert_eq!(Instruction(nop()).written_register(), None);
    // Loads write through the delay slot.
    assert_eq!(Instruction(lw(g(4), 0, g(1))).written_register(), None);
}

#[test]
fn test_display() {
    assert_eq!(Instruction(addiu(g(2), g(1), -4)).to_string(), "addiu v0, at, -4");
    assert_eq!(Instruction(lw(g(8), 16, GuestReg::SP)).to_string(), "lw t0, 16(sp)");
    assert_eq!(Instruction(lui(g(1), 0x1000)).to_string(), "lui at, 0x1000");
}
