//! MIPS I instruction decoding.

use modular_bitfield::{bitfield, specifiers::*};

use crate::cpu::GuestReg;

#[bitfield(bits = 32)]
#[derive(Debug, Copy, Clone)]
pub struct IType {
    pub imm: B16,
    pub rt: B5,
    pub rs: B5,
    #[skip]
    op: B6,
}

#[bitfield(bits = 32)]
#[derive(Debug, Copy, Clone)]
pub struct JType {
    pub target: B26,
    #[skip]
    op: B6,
}

#[bitfield(bits = 32)]
#[derive(Debug, Copy, Clone)]
pub struct RType {
    pub funct: B6,
    pub sa: B5,
    pub rd: B5,
    pub rt: B5,
    pub rs: B5,
    pub op: B6,
}

/// Opcode tag of a decoded instruction.
///
/// One variant per distinct guest operation; used as the index into the
/// instruction compiler dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Sll,
    Srl,
    Sra,
    Sllv,
    Srlv,
    Srav,
    Jr,
    Jalr,
    Syscall,
    Break,
    Mfhi,
    Mthi,
    Mflo,
    Mtlo,
    Mult,
    Multu,
    Div,
    Divu,
    Add,
    Addu,
    Sub,
    Subu,
    And,
    Or,
    Xor,
    Nor,
    Slt,
    Sltu,
    Bltz,
    Bgez,
    Bltzal,
    Bgezal,
    J,
    Jal,
    Beq,
    Bne,
    Blez,
    Bgtz,
    Addi,
    Addiu,
    Slti,
    Sltiu,
    Andi,
    Ori,
    Xori,
    Lui,
    Mfc0,
    Mtc0,
    Rfe,
    Lb,
    Lh,
    Lwl,
    Lw,
    Lbu,
    Lhu,
    Lwr,
    Sb,
    Sh,
    Swl,
    Sw,
    Swr,
    /// Anything the core does not implement (COP2, reserved encodings).
    Invalid,
}

impl Opcode {
    pub const COUNT: usize = Opcode::Invalid as usize + 1;

    /// Decode the opcode tag of a raw instruction word.
    pub fn decode(bits: u32) -> Opcode {
        let r = RType::from_bytes(bits.to_le_bytes());
        match r.op() {
            0x00 => match r.funct() {
                0x00 => Opcode::Sll,
                0x02 => Opcode::Srl,
                0x03 => Opcode::Sra,
                0x04 => Opcode::Sllv,
                0x06 => Opcode::Srlv,
                0x07 => Opcode::Srav,
                0x08 => Opcode::Jr,
                0x09 => Opcode::Jalr,
                0x0C => Opcode::Syscall,
                0x0D => Opcode::Break,
                0x10 => Opcode::Mfhi,
                0x11 => Opcode::Mthi,
                0x12 => Opcode::Mflo,
                0x13 => Opcode::Mtlo,
                0x18 => Opcode::Mult,
                0x19 => Opcode::Multu,
                0x1A => Opcode::Div,
                0x1B => Opcode::Divu,
                0x20 => Opcode::Add,
                0x21 => Opcode::Addu,
                0x22 => Opcode::Sub,
                0x23 => Opcode::Subu,
                0x24 => Opcode::And,
                0x25 => Opcode::Or,
                0x26 => Opcode::Xor,
                0x27 => Opcode::Nor,
                0x2A => Opcode::Slt,
                0x2B => Opcode::Sltu,
                _ => Opcode::Invalid,
            },
            // The R3000 decodes only bit 0 (ge) and bits 4..1 (link) of rt.
            0x01 => {
                let rt = r.rt();
                let ge = rt & 1 != 0;
                let link = rt & 0x1E == 0x10;
                match (ge, link) {
                    (false, false) => Opcode::Bltz,
                    (true, false) => Opcode::Bgez,
                    (false, true) => Opcode::Bltzal,
                    (true, true) => Opcode::Bgezal,
                }
            }
            0x02 => Opcode::J,
            0x03 => Opcode::Jal,
            0x04 => Opcode::Beq,
            0x05 => Opcode::Bne,
            0x06 => Opcode::Blez,
            0x07 => Opcode::Bgtz,
            0x08 => Opcode::Addi,
            0x09 => Opcode::Addiu,
            0x0A => Opcode::Slti,
            0x0B => Opcode::Sltiu,
            0x0C => Opcode::Andi,
            0x0D => Opcode::Ori,
            0x0E => Opcode::Xori,
            0x0F => Opcode::Lui,
            0x10 => match r.rs() {
                0x00 => Opcode::Mfc0,
                0x04 => Opcode::Mtc0,
                0x10 if r.funct() == 0x10 => Opcode::Rfe,
                _ => Opcode::Invalid,
            },
            0x20 => Opcode::Lb,
            0x21 => Opcode::Lh,
            0x22 => Opcode::Lwl,
            0x23 => Opcode::Lw,
            0x24 => Opcode::Lbu,
            0x25 => Opcode::Lhu,
            0x26 => Opcode::Lwr,
            0x28 => Opcode::Sb,
            0x29 => Opcode::Sh,
            0x2A => Opcode::Swl,
            0x2B => Opcode::Sw,
            0x2E => Opcode::Swr,
            _ => Opcode::Invalid,
        }
    }

    pub const fn is_branch(self) -> bool {
        matches!(
            self,
            Opcode::J
                | Opcode::Jal
                | Opcode::Jr
                | Opcode::Jalr
                | Opcode::Beq
                | Opcode::Bne
                | Opcode::Blez
                | Opcode::Bgtz
                | Opcode::Bltz
                | Opcode::Bgez
                | Opcode::Bltzal
                | Opcode::Bgezal
        )
    }

    pub const fn is_unconditional_branch(self) -> bool {
        matches!(self, Opcode::J | Opcode::Jal | Opcode::Jr | Opcode::Jalr)
    }

    /// Writes its result through the load delay slot.
    pub const fn is_load(self) -> bool {
        matches!(
            self,
            Opcode::Lb
                | Opcode::Lh
                | Opcode::Lwl
                | Opcode::Lw
                | Opcode::Lbu
                | Opcode::Lhu
                | Opcode::Lwr
                | Opcode::Mfc0
        )
    }

    pub const fn is_store(self) -> bool {
        matches!(
            self,
            Opcode::Sb | Opcode::Sh | Opcode::Swl | Opcode::Sw | Opcode::Swr
        )
    }

    /// May raise a guest exception.
    pub const fn can_trap(self) -> bool {
        matches!(
            self,
            Opcode::Add
                | Opcode::Addi
                | Opcode::Sub
                | Opcode::Syscall
                | Opcode::Break
                | Opcode::Invalid
                | Opcode::Lh
                | Opcode::Lw
                | Opcode::Lhu
                | Opcode::Sh
                | Opcode::Sw
        )
    }

    /// Changes processor mode or always leaves the block.
    pub const fn ends_block(self) -> bool {
        matches!(
            self,
            Opcode::Syscall | Opcode::Break | Opcode::Rfe | Opcode::Mtc0 | Opcode::Invalid
        )
    }

    pub const fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Sll => "sll",
            Opcode::Srl => "srl",
            Opcode::Sra => "sra",
            Opcode::Sllv => "sllv",
            Opcode::Srlv => "srlv",
            Opcode::Srav => "srav",
            Opcode::Jr => "jr",
            Opcode::Jalr => "jalr",
            Opcode::Syscall => "syscall",
            Opcode::Break => "break",
            Opcode::Mfhi => "mfhi",
            Opcode::Mthi => "mthi",
            Opcode::Mflo => "mflo",
            Opcode::Mtlo => "mtlo",
            Opcode::Mult => "mult",
            Opcode::Multu => "multu",
            Opcode::Div => "div",
            Opcode::Divu => "divu",
            Opcode::Add => "add",
            Opcode::Addu => "addu",
            Opcode::Sub => "sub",
            Opcode::Subu => "subu",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Xor => "xor",
            Opcode::Nor => "nor",
            Opcode::Slt => "slt",
            Opcode::Sltu => "sltu",
            Opcode::Bltz => "bltz",
            Opcode::Bgez => "bgez",
            Opcode::Bltzal => "bltzal",
            Opcode::Bgezal => "bgezal",
            Opcode::J => "j",
            Opcode::Jal => "jal",
            Opcode::Beq => "beq",
            Opcode::Bne => "bne",
            Opcode::Blez => "blez",
            Opcode::Bgtz => "bgtz",
            Opcode::Addi => "addi",
            Opcode::Addiu => "addiu",
            Opcode::Slti => "slti",
            Opcode::Sltiu => "sltiu",
            Opcode::Andi => "andi",
            Opcode::Ori => "ori",
            Opcode::Xori => "xori",
            Opcode::Lui => "lui",
            Opcode::Mfc0 => "mfc0",
            Opcode::Mtc0 => "mtc0",
            Opcode::Rfe => "rfe",
            Opcode::Lb => "lb",
            Opcode::Lh => "lh",
            Opcode::Lwl => "lwl",
            Opcode::Lw => "lw",
            Opcode::Lbu => "lbu",
            Opcode::Lhu => "lhu",
            Opcode::Lwr => "lwr",
            Opcode::Sb => "sb",
            Opcode::Sh => "sh",
            Opcode::Swl => "swl",
            Opcode::Sw => "sw",
            Opcode::Swr => "swr",
            Opcode::Invalid => "invalid",
        }
    }
}

/// A raw instruction word with typed field accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction(pub u32);

impl Instruction {
    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    fn i_type(self) -> IType {
        IType::from_bytes(self.0.to_le_bytes())
    }

    #[inline]
    fn r_type(self) -> RType {
        RType::from_bytes(self.0.to_le_bytes())
    }

    pub fn opcode(self) -> Opcode {
        Opcode::decode(self.0)
    }

    pub fn rs(self) -> GuestReg {
        GuestReg::gpr(self.i_type().rs())
    }

    pub fn rt(self) -> GuestReg {
        GuestReg::gpr(self.i_type().rt())
    }

    pub fn rd(self) -> GuestReg {
        GuestReg::gpr(self.r_type().rd())
    }

    pub fn sa(self) -> u32 {
        u32::from(self.r_type().sa())
    }

    pub fn funct(self) -> u32 {
        u32::from(self.r_type().funct())
    }

    /// Zero-extended 16-bit immediate.
    pub fn imm_zext(self) -> u32 {
        u32::from(self.i_type().imm())
    }

    /// Sign-extended 16-bit immediate.
    pub fn imm_sext(self) -> u32 {
        self.i_type().imm() as i16 as i32 as u32
    }

    /// 26-bit jump target field.
    pub fn target(self) -> u32 {
        JType::from_bytes(self.0.to_le_bytes()).target()
    }

    /// Target of a PC-relative branch located at `pc`.
    pub fn branch_target(self, pc: u32) -> u32 {
        pc.wrapping_add(4).wrapping_add(self.imm_sext() << 2)
    }

    /// Target of a `j`/`jal` located at `pc`.
    pub fn jump_target(self, pc: u32) -> u32 {
        (pc.wrapping_add(4) & 0xF000_0000) | (self.target() << 2)
    }

    /// COP0 register number for `mfc0`/`mtc0`.
    pub fn cop_reg(self) -> u8 {
        self.r_type().rd()
    }

    /// Guest register written directly (not through the load delay).
    pub fn written_register(self) -> Option<GuestReg> {
        let reg = match self.opcode() {
            Opcode::Sll
            | Opcode::Srl
            | Opcode::Sra
            | Opcode::Sllv
            | Opcode::Srlv
            | Opcode::Srav
            | Opcode::Jalr
            | Opcode::Mfhi
            | Opcode::Mflo
            | Opcode::Add
            | Opcode::Addu
            | Opcode::Sub
            | Opcode::Subu
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Nor
            | Opcode::Slt
            | Opcode::Sltu => self.rd(),
            Opcode::Addi
            | Opcode::Addiu
            | Opcode::Slti
            | Opcode::Sltiu
            | Opcode::Andi
            | Opcode::Ori
            | Opcode::Xori
            | Opcode::Lui => self.rt(),
            Opcode::Jal | Opcode::Bltzal | Opcode::Bgezal => GuestReg::RA,
            _ => return None,
        };
        (!reg.is_zero()).then_some(reg)
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = self.opcode();
        let m = op.mnemonic();
        match op {
            Opcode::Sll | Opcode::Srl | Opcode::Sra => {
                write!(f, "{m} {}, {}, {}", self.rd(), self.rt(), self.sa())
            }
            Opcode::Sllv | Opcode::Srlv | Opcode::Srav => {
                write!(f, "{m} {}, {}, {}", self.rd(), self.rt(), self.rs())
            }
            Opcode::Jr | Opcode::Mthi | Opcode::Mtlo => write!(f, "{m} {}", self.rs()),
            Opcode::Jalr => write!(f, "{m} {}, {}", self.rd(), self.rs()),
            Opcode::Mfhi | Opcode::Mflo => write!(f, "{m} {}", self.rd()),
            Opcode::Mult | Opcode::Multu | Opcode::Div | Opcode::Divu => {
                write!(f, "{m} {}, {}", self.rs(), self.rt())
            }
            Opcode::Add
            | Opcode::Addu
            | Opcode::Sub
            | Opcode::Subu
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Nor
            | Opcode::Slt
            | Opcode::Sltu => write!(f, "{m} {}, {}, {}", self.rd(), self.rs(), self.rt()),
            Opcode::Bltz | Opcode::Bgez | Opcode::Bltzal | Opcode::Bgezal => {
                write!(f, "{m} {}, {}", self.rs(), self.imm_sext() as i32)
            }
            Opcode::J | Opcode::Jal => write!(f, "{m} 0x{:07x}", self.target() << 2),
            Opcode::Beq | Opcode::Bne => write!(
                f,
                "{m} {}, {}, {}",
                self.rs(),
                self.rt(),
                self.imm_sext() as i32
            ),
            Opcode::Blez | Opcode::Bgtz => {
                write!(f, "{m} {}, {}", self.rs(), self.imm_sext() as i32)
            }
            Opcode::Andi | Opcode::Ori | Opcode::Xori => {
                write!(f, "{m} {}, {}, 0x{:04x}", self.rt(), self.rs(), self.imm_zext())
            }
            Opcode::Addi | Opcode::Addiu | Opcode::Slti | Opcode::Sltiu => write!(
                f,
                "{m} {}, {}, {}",
                self.rt(),
                self.rs(),
                self.imm_sext() as i32
            ),
            Opcode::Lui => write!(f, "{m} {}, 0x{:04x}", self.rt(), self.imm_zext()),
            Opcode::Mfc0 | Opcode::Mtc0 => write!(f, "{m} {}, $cop0_{}", self.rt(), self.cop_reg()),
            Opcode::Lb
            | Opcode::Lh
            | Opcode::Lwl
            | Opcode::Lw
            | Opcode::Lbu
            | Opcode::Lhu
            | Opcode::Lwr
            | Opcode::Sb
            | Opcode::Sh
            | Opcode::Swl
            | Opcode::Sw
            | Opcode::Swr => write!(
                f,
                "{m} {}, {}({})",
                self.rt(),
                self.imm_sext() as i32,
                self.rs()
            ),
            Opcode::Syscall | Opcode::Break | Opcode::Rfe => f.write_str(m),
            Opcode::Invalid => write!(f, "{m} 0x{:08x}", self.0),
        }
    }
}

/// Instruction word builders, mainly for tests and tools.
pub mod encode {
    use crate::cpu::GuestReg;

    fn r(rs: GuestReg, rt: GuestReg, rd: GuestReg, sa: u32, funct: u32) -> u32 {
        ((rs.index() as u32) << 21)
            | ((rt.index() as u32) << 16)
            | ((rd.index() as u32) << 11)
            | ((sa & 0x1F) << 6)
            | funct
    }

    fn i(op: u32, rs: GuestReg, rt: GuestReg, imm: u16) -> u32 {
        (op << 26) | ((rs.index() as u32) << 21) | ((rt.index() as u32) << 16) | u32::from(imm)
    }

    pub fn nop() -> u32 {
        0
    }
    pub fn sll(rd: GuestReg, rt: GuestReg, sa: u32) -> u32 {
        r(GuestReg::ZERO, rt, rd, sa, 0x00)
    }
    pub fn srl(rd: GuestReg, rt: GuestReg, sa: u32) -> u32 {
        r(GuestReg::ZERO, rt, rd, sa, 0x02)
    }
    pub fn sra(rd: GuestReg, rt: GuestReg, sa: u32) -> u32 {
        r(GuestReg::ZERO, rt, rd, sa, 0x03)
    }
    pub fn sllv(rd: GuestReg, rt: GuestReg, rs: GuestReg) -> u32 {
        r(rs, rt, rd, 0, 0x04)
    }
    pub fn srlv(rd: GuestReg, rt: GuestReg, rs: GuestReg) -> u32 {
        r(rs, rt, rd, 0, 0x06)
    }
    pub fn srav(rd: GuestReg, rt: GuestReg, rs: GuestReg) -> u32 {
        r(rs, rt, rd, 0, 0x07)
    }
    pub fn jr(rs: GuestReg) -> u32 {
        r(rs, GuestReg::ZERO, GuestReg::ZERO, 0, 0x08)
    }
    pub fn jalr(rd: GuestReg, rs: GuestReg) -> u32 {
        r(rs, GuestReg::ZERO, rd, 0, 0x09)
    }
    pub fn syscall() -> u32 {
        0x0C
    }
    pub fn brk() -> u32 {
        0x0D
    }
    pub fn mfhi(rd: GuestReg) -> u32 {
        r(GuestReg::ZERO, GuestReg::ZERO, rd, 0, 0x10)
    }
    pub fn mthi(rs: GuestReg) -> u32 {
        r(rs, GuestReg::ZERO, GuestReg::ZERO, 0, 0x11)
    }
    pub fn mflo(rd: GuestReg) -> u32 {
        r(GuestReg::ZERO, GuestReg::ZERO, rd, 0, 0x12)
    }
    pub fn mtlo(rs: GuestReg) -> u32 {
        r(rs, GuestReg::ZERO, GuestReg::ZERO, 0, 0x13)
    }
    pub fn mult(rs: GuestReg, rt: GuestReg) -> u32 {
        r(rs, rt, GuestReg::ZERO, 0, 0x18)
    }
    pub fn multu(rs: GuestReg, rt: GuestReg) -> u32 {
        r(rs, rt, GuestReg::ZERO, 0, 0x19)
    }
    pub fn div(rs: GuestReg, rt: GuestReg) -> u32 {
        r(rs, rt, GuestReg::ZERO, 0, 0x1A)
    }
    pub fn divu(rs: GuestReg, rt: GuestReg) -> u32 {
        r(rs, rt, GuestReg::ZERO, 0, 0x1B)
    }
    pub fn add(rd: GuestReg, rs: GuestReg, rt: GuestReg) -> u32 {
        r(rs, rt, rd, 0, 0x20)
    }
    pub fn addu(rd: GuestReg, rs: GuestReg, rt: GuestReg) -> u32 {
        r(rs, rt, rd, 0, 0x21)
    }
    pub fn sub(rd: GuestReg, rs: GuestReg, rt: GuestReg) -> u32 {
        r(rs, rt, rd, 0, 0x22)
    }
    pub fn subu(rd: GuestReg, rs: GuestReg, rt: GuestReg) -> u32 {
        r(rs, rt, rd, 0, 0x23)
    }
    pub fn and(rd: GuestReg, rs: GuestReg, rt: GuestReg) -> u32 {
        r(rs, rt, rd, 0, 0x24)
    }
    pub fn or(rd: GuestReg, rs: GuestReg, rt: GuestReg) -> u32 {
        r(rs, rt, rd, 0, 0x25)
    }
    pub fn xor(rd: GuestReg, rs: GuestReg, rt: GuestReg) -> u32 {
        r(rs, rt, rd, 0, 0x26)
    }
    pub fn nor(rd: GuestReg, rs: GuestReg, rt: GuestReg) -> u32 {
        r(rs, rt, rd, 0, 0x27)
    }
    pub fn slt(rd: GuestReg, rs: GuestReg, rt: GuestReg) -> u32 {
        r(rs, rt, rd, 0, 0x2A)
    }
    pub fn sltu(rd: GuestReg, rs: GuestReg, rt: GuestReg) -> u32 {
        r(rs, rt, rd, 0, 0x2B)
    }
    pub fn bltz(rs: GuestReg, offset: i16) -> u32 {
        i(0x01, rs, GuestReg::gpr(0x00), offset as u16)
    }
    pub fn bgez(rs: GuestReg, offset: i16) -> u32 {
        i(0x01, rs, GuestReg::gpr(0x01), offset as u16)
    }
    pub fn bltzal(rs: GuestReg, offset: i16) -> u32 {
        i(0x01, rs, GuestReg::gpr(0x10), offset as u16)
    }
    pub fn bgezal(rs: GuestReg, offset: i16) -> u32 {
        i(0x01, rs, GuestReg::gpr(0x11), offset as u16)
    }
    pub fn j(target: u32) -> u32 {
        (0x02 << 26) | ((target >> 2) & 0x03FF_FFFF)
    }
    pub fn jal(target: u32) -> u32 {
        (0x03 << 26) | ((target >> 2) & 0x03FF_FFFF)
    }
    pub fn beq(rs: GuestReg, rt: GuestReg, offset: i16) -> u32 {
        i(0x04, rs, rt, offset as u16)
    }
    pub fn bne(rs: GuestReg, rt: GuestReg, offset: i16) -> u32 {
        i(0x05, rs, rt, offset as u16)
    }
    pub fn blez(rs: GuestReg, offset: i16) -> u32 {
        i(0x06, rs, GuestReg::ZERO, offset as u16)
    }
    pub fn bgtz(rs: GuestReg, offset: i16) -> u32 {
        i(0x07, rs, GuestReg::ZERO, offset as u16)
    }
    pub fn addi(rt: GuestReg, rs: GuestReg, imm: i16) -> u32 {
        i(0x08, rs, rt, imm as u16)
    }
    pub fn addiu(rt: GuestReg, rs: GuestReg, imm: i16) -> u32 {
        i(0x09, rs, rt, imm as u16)
    }
    pub fn slti(rt: GuestReg, rs: GuestReg, imm: i16) -> u32 {
        i(0x0A, rs, rt, imm as u16)
    }
    pub fn sltiu(rt: GuestReg, rs: GuestReg, imm: i16) -> u32 {
        i(0x0B, rs, rt, imm as u16)
    }
    pub fn andi(rt: GuestReg, rs: GuestReg, imm: u16) -> u32 {
        i(0x0C, rs, rt, imm)
    }
    pub fn ori(rt: GuestReg, rs: GuestReg, imm: u16) -> u32 {
        i(0x0D, rs, rt, imm)
    }
    pub fn xori(rt: GuestReg, rs: GuestReg, imm: u16) -> u32 {
        i(0x0E, rs, rt, imm)
    }
    pub fn lui(rt: GuestReg, imm: u16) -> u32 {
        i(0x0F, GuestReg::ZERO, rt, imm)
    }
    pub fn mfc0(rt: GuestReg, cop_reg: u8) -> u32 {
        (0x10 << 26) | ((rt.index() as u32) << 16) | (u32::from(cop_reg & 0x1F) << 11)
    }
    pub fn mtc0(rt: GuestReg, cop_reg: u8) -> u32 {
        (0x10 << 26) | (0x04 << 21) | ((rt.index() as u32) << 16) | (u32::from(cop_reg & 0x1F) << 11)
    }
    pub fn rfe() -> u32 {
        (0x10 << 26) | (0x10 << 21) | 0x10
    }
    pub fn lb(rt: GuestReg, offset: i16, base: GuestReg) -> u32 {
        i(0x20, base, rt, offset as u16)
    }
    pub fn lh(rt: GuestReg, offset: i16, base: GuestReg) -> u32 {
        i(0x21, base, rt, offset as u16)
    }
    pub fn lwl(rt: GuestReg, offset: i16, base: GuestReg) -> u32 {
        i(0x22, base, rt, offset as u16)
    }
    pub fn lw(rt: GuestReg, offset: i16, base: GuestReg) -> u32 {
        i(0x23, base, rt, offset as u16)
    }
    pub fn lbu(rt: GuestReg, offset: i16, base: GuestReg) -> u32 {
        i(0x24, base, rt, offset as u16)
    }
    pub fn lhu(rt: GuestReg, offset: i16, base: GuestReg) -> u32 {
        i(0x25, base, rt, offset as u16)
    }
    pub fn lwr(rt: GuestReg, offset: i16, base: GuestReg) -> u32 {
        i(0x26, base, rt, offset as u16)
    }
    pub fn sb(rt: GuestReg, offset: i16, base: GuestReg) -> u32 {
        i(0x28, base, rt, offset as u16)
    }
    pub fn sh(rt: GuestReg, offset: i16, base: GuestReg) -> u32 {
        i(0x29, base, rt, offset as u16)
    }
    pub fn swl(rt: GuestReg, offset: i16, base: GuestReg) -> u32 {
        i(0x2A, base, rt, offset as u16)
    }
    pub fn sw(rt: GuestReg, offset: i16, base: GuestReg) -> u32 {
        i(0x2B, base, rt, offset as u16)
    }
    pub fn swr(rt: GuestReg, offset: i16, base: GuestReg) -> u32 {
        i(0x2E, base, rt, offset as u16)
    }
}
