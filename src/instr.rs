//! Instruction decoding
//!
//! A canonical 32-bit instruction word is converted into the Instr
//! enum, which holds the operation and its fields ready for
//! execution. Dispatch is an exhaustive match on the opcode field,
//! refined by funct3 and (for OP and the shift immediates) funct7.
//! Any combination without a row in the table is an illegal
//! instruction.

use crate::fields::*;
use crate::opcodes::*;
use crate::utils::to_signed;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("illegal instruction 0x{0:08x}")]
    IllegalInstruction(u32),
    #[error("illegal or reserved compressed instruction 0x{0:04x}")]
    IllegalCompressed(u16),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Branch {
    Beq,
    Bne,
    Blt,
    Bge,
    Bltu,
    Bgeu,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Load {
    Lb,
    Lh,
    Lw,
    Lbu,
    Lhu,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Store {
    Sb,
    Sh,
    Sw,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RegImm {
    Addi,
    Slti,
    Sltiu,
    Xori,
    Ori,
    Andi,
    Slli,
    Srli,
    Srai,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RegReg {
    Add,
    Sub,
    Sll,
    Slt,
    Sltu,
    Xor,
    Srl,
    Sra,
    Or,
    And,
}

/// Multiply/divide operations of the M extension. These share the
/// OP opcode with the base register-register instructions and are
/// selected by funct7 = 0000001.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MulDiv {
    Mul,
    Mulh,
    Mulhsu,
    Mulhu,
    Div,
    Divu,
    Rem,
    Remu,
}

/// RV32IM instructions
///
/// Field names correspond to the names in the instruction set
/// reference. Offsets and immediates are stored as the raw
/// (unextended) field; sign extension happens during execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instr {
    /// Load u_immediate into bits 31:12 of dest, filling the low
    /// 12 bits with zeros. u_immediate is 20 bits long.
    Lui { dest: u8, u_immediate: u32 },
    /// Concatenate u_immediate with 12 low-order zeros, add pc to
    /// the result, and place the result in dest.
    Auipc { dest: u8, u_immediate: u32 },
    /// Store pc+4 in dest, and set pc = pc + offset, where offset
    /// is a multiple of 2 (21 bits long including its zero LSB).
    Jal { dest: u8, offset: u32 },
    /// Store pc+4 in dest, compute base + offset, set bit 0 to
    /// zero, and jump to the result. The offset is 12 bits long.
    Jalr { dest: u8, base: u8, offset: u16 },
    /// If the condition given by the mnemonic holds between src1
    /// and src2, set pc = pc + offset (13 bits long including its
    /// zero LSB); else fall through.
    Branch {
        mnemonic: Branch,
        src1: u8,
        src2: u8,
        offset: u16,
    },
    /// Load the data at address base + offset into dest. The width
    /// and the extension of the result depend on the mnemonic.
    Load {
        mnemonic: Load,
        dest: u8,
        base: u8,
        offset: u16,
    },
    /// Store the low byte/halfword/word of src at address
    /// base + offset.
    Store {
        mnemonic: Store,
        src: u8,
        base: u8,
        offset: u16,
    },
    /// Operation between register src and the sign-extended 12-bit
    /// i_immediate (for the shifts, the low 5 bits are the shift
    /// amount), placed in dest.
    RegImm {
        mnemonic: RegImm,
        dest: u8,
        src: u8,
        i_immediate: u16,
    },
    /// Operation between registers src1 and src2, placed in dest.
    RegReg {
        mnemonic: RegReg,
        dest: u8,
        src1: u8,
        src2: u8,
    },
    /// M-extension multiply/divide between src1 and src2, placed
    /// in dest.
    MulDiv {
        mnemonic: MulDiv,
        dest: u8,
        src1: u8,
        src2: u8,
    },
    /// Memory ordering fence; a no-op on a single hart.
    Fence,
    /// Environment call into the emulated kernel.
    Ecall,
    /// Debug breakpoint; halts the machine.
    Ebreak,
}

impl Instr {
    pub fn decode(instr: u32) -> Result<Self, DecodeError> {
        let op = opcode!(instr);
        match op {
            OP_LUI => Ok(Self::Lui {
                dest: rd!(instr),
                u_immediate: imm_utype!(instr),
            }),
            OP_AUIPC => Ok(Self::Auipc {
                dest: rd!(instr),
                u_immediate: imm_utype!(instr),
            }),
            OP_JAL => Ok(Self::Jal {
                dest: rd!(instr),
                offset: imm_jtype!(instr),
            }),
            OP_JALR => {
                if funct3!(instr) != 0b000 {
                    return Err(DecodeError::IllegalInstruction(instr));
                }
                Ok(Self::Jalr {
                    dest: rd!(instr),
                    base: rs1!(instr),
                    offset: imm_itype!(instr),
                })
            }
            OP_BRANCH => {
                let mnemonic = match funct3!(instr) {
                    FUNCT3_BEQ => Branch::Beq,
                    FUNCT3_BNE => Branch::Bne,
                    FUNCT3_BLT => Branch::Blt,
                    FUNCT3_BGE => Branch::Bge,
                    FUNCT3_BLTU => Branch::Bltu,
                    FUNCT3_BGEU => Branch::Bgeu,
                    _ => return Err(DecodeError::IllegalInstruction(instr)),
                };
                let offset = imm_btype!(instr)
                    .try_into()
                    .expect("13-bit field fits in u16");
                Ok(Self::Branch {
                    mnemonic,
                    src1: rs1!(instr),
                    src2: rs2!(instr),
                    offset,
                })
            }
            OP_LOAD => {
                let mnemonic = match funct3!(instr) {
                    FUNCT3_B => Load::Lb,
                    FUNCT3_H => Load::Lh,
                    FUNCT3_W => Load::Lw,
                    FUNCT3_BU => Load::Lbu,
                    FUNCT3_HU => Load::Lhu,
                    _ => return Err(DecodeError::IllegalInstruction(instr)),
                };
                Ok(Self::Load {
                    mnemonic,
                    dest: rd!(instr),
                    base: rs1!(instr),
                    offset: imm_itype!(instr),
                })
            }
            OP_STORE => {
                let mnemonic = match funct3!(instr) {
                    FUNCT3_B => Store::Sb,
                    FUNCT3_H => Store::Sh,
                    FUNCT3_W => Store::Sw,
                    _ => return Err(DecodeError::IllegalInstruction(instr)),
                };
                Ok(Self::Store {
                    mnemonic,
                    src: rs2!(instr),
                    base: rs1!(instr),
                    offset: imm_stype!(instr),
                })
            }
            OP_IMM => {
                let mut i_immediate = imm_itype!(instr);
                let mnemonic = match (funct3!(instr), funct7!(instr)) {
                    (FUNCT3_ADDI, _) => RegImm::Addi,
                    (FUNCT3_SLTI, _) => RegImm::Slti,
                    (FUNCT3_SLTIU, _) => RegImm::Sltiu,
                    (FUNCT3_XORI, _) => RegImm::Xori,
                    (FUNCT3_ORI, _) => RegImm::Ori,
                    (FUNCT3_ANDI, _) => RegImm::Andi,
                    (FUNCT3_SLLI, FUNCT7_ZERO) => {
                        i_immediate = shamt!(instr).into();
                        RegImm::Slli
                    }
                    (FUNCT3_SRLI, FUNCT7_ZERO) => {
                        i_immediate = shamt!(instr).into();
                        RegImm::Srli
                    }
                    (FUNCT3_SRLI, FUNCT7_SRA) => {
                        i_immediate = shamt!(instr).into();
                        RegImm::Srai
                    }
                    _ => return Err(DecodeError::IllegalInstruction(instr)),
                };
                Ok(Self::RegImm {
                    mnemonic,
                    dest: rd!(instr),
                    src: rs1!(instr),
                    i_immediate,
                })
            }
            OP => {
                let dest = rd!(instr);
                let src1 = rs1!(instr);
                let src2 = rs2!(instr);
                if funct7!(instr) == FUNCT7_MULDIV {
                    let mnemonic = match funct3!(instr) {
                        FUNCT3_MUL => MulDiv::Mul,
                        FUNCT3_MULH => MulDiv::Mulh,
                        FUNCT3_MULHSU => MulDiv::Mulhsu,
                        FUNCT3_MULHU => MulDiv::Mulhu,
                        FUNCT3_DIV => MulDiv::Div,
                        FUNCT3_DIVU => MulDiv::Divu,
                        FUNCT3_REM => MulDiv::Rem,
                        FUNCT3_REMU => MulDiv::Remu,
                        _ => return Err(DecodeError::IllegalInstruction(instr)),
                    };
                    return Ok(Self::MulDiv {
                        mnemonic,
                        dest,
                        src1,
                        src2,
                    });
                }
                let mnemonic = match (funct3!(instr), funct7!(instr)) {
                    (FUNCT3_ADD, FUNCT7_ZERO) => RegReg::Add,
                    (FUNCT3_ADD, FUNCT7_SUB) => RegReg::Sub,
                    (FUNCT3_SLL, FUNCT7_ZERO) => RegReg::Sll,
                    (FUNCT3_SLT, FUNCT7_ZERO) => RegReg::Slt,
                    (FUNCT3_SLTU, FUNCT7_ZERO) => RegReg::Sltu,
                    (FUNCT3_XOR, FUNCT7_ZERO) => RegReg::Xor,
                    (FUNCT3_SRL, FUNCT7_ZERO) => RegReg::Srl,
                    (FUNCT3_SRL, FUNCT7_SRA) => RegReg::Sra,
                    (FUNCT3_OR, FUNCT7_ZERO) => RegReg::Or,
                    (FUNCT3_AND, FUNCT7_ZERO) => RegReg::And,
                    _ => return Err(DecodeError::IllegalInstruction(instr)),
                };
                Ok(Self::RegReg {
                    mnemonic,
                    dest,
                    src1,
                    src2,
                })
            }
            OP_MISC_MEM => match funct3!(instr) {
                0b000 => Ok(Self::Fence),
                _ => Err(DecodeError::IllegalInstruction(instr)),
            },
            OP_SYSTEM => {
                if funct3!(instr) != 0b000 || rd!(instr) != 0 || rs1!(instr) != 0 {
                    return Err(DecodeError::IllegalInstruction(instr));
                }
                match imm_itype!(instr) {
                    0 => Ok(Self::Ecall),
                    1 => Ok(Self::Ebreak),
                    _ => Err(DecodeError::IllegalInstruction(instr)),
                }
            }
            _ => Err(DecodeError::IllegalInstruction(instr)),
        }
    }
}

fn signed_offset(offset: u32, bits: u32) -> i32 {
    to_signed(crate::utils::sign_extend(offset, bits))
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lui { dest, u_immediate } => write!(f, "lui x{dest}, 0x{u_immediate:x}"),
            Self::Auipc { dest, u_immediate } => write!(f, "auipc x{dest}, 0x{u_immediate:x}"),
            Self::Jal { dest, offset } => {
                write!(f, "jal x{dest}, {}", signed_offset(*offset, 21))
            }
            Self::Jalr { dest, base, offset } => {
                let offset = signed_offset((*offset).into(), 12);
                write!(f, "jalr x{dest}, {offset}(x{base})")
            }
            Self::Branch {
                mnemonic,
                src1,
                src2,
                offset,
            } => {
                let mnemonic = match mnemonic {
                    Branch::Beq => "beq",
                    Branch::Bne => "bne",
                    Branch::Blt => "blt",
                    Branch::Bge => "bge",
                    Branch::Bltu => "bltu",
                    Branch::Bgeu => "bgeu",
                };
                let offset = signed_offset((*offset).into(), 13);
                write!(f, "{mnemonic} x{src1}, x{src2}, {offset}")
            }
            Self::Load {
                mnemonic,
                dest,
                base,
                offset,
            } => {
                let mnemonic = match mnemonic {
                    Load::Lb => "lb",
                    Load::Lh => "lh",
                    Load::Lw => "lw",
                    Load::Lbu => "lbu",
                    Load::Lhu => "lhu",
                };
                let offset = signed_offset((*offset).into(), 12);
                write!(f, "{mnemonic} x{dest}, {offset}(x{base})")
            }
            Self::Store {
                mnemonic,
                src,
                base,
                offset,
            } => {
                let mnemonic = match mnemonic {
                    Store::Sb => "sb",
                    Store::Sh => "sh",
                    Store::Sw => "sw",
                };
                let offset = signed_offset((*offset).into(), 12);
                write!(f, "{mnemonic} x{src}, {offset}(x{base})")
            }
            Self::RegImm {
                mnemonic,
                dest,
                src,
                i_immediate,
            } => {
                let mnemonic = match mnemonic {
                    RegImm::Addi => "addi",
                    RegImm::Slti => "slti",
                    RegImm::Sltiu => "sltiu",
                    RegImm::Xori => "xori",
                    RegImm::Ori => "ori",
                    RegImm::Andi => "andi",
                    RegImm::Slli => "slli",
                    RegImm::Srli => "srli",
                    RegImm::Srai => "srai",
                };
                let i_immediate = signed_offset((*i_immediate).into(), 12);
                write!(f, "{mnemonic} x{dest}, x{src}, {i_immediate}")
            }
            Self::RegReg {
                mnemonic,
                dest,
                src1,
                src2,
            } => {
                let mnemonic = match mnemonic {
                    RegReg::Add => "add",
                    RegReg::Sub => "sub",
                    RegReg::Sll => "sll",
                    RegReg::Slt => "slt",
                    RegReg::Sltu => "sltu",
                    RegReg::Xor => "xor",
                    RegReg::Srl => "srl",
                    RegReg::Sra => "sra",
                    RegReg::Or => "or",
                    RegReg::And => "and",
                };
                write!(f, "{mnemonic} x{dest}, x{src1}, x{src2}")
            }
            Self::MulDiv {
                mnemonic,
                dest,
                src1,
                src2,
            } => {
                let mnemonic = match mnemonic {
                    MulDiv::Mul => "mul",
                    MulDiv::Mulh => "mulh",
                    MulDiv::Mulhsu => "mulhsu",
                    MulDiv::Mulhu => "mulhu",
                    MulDiv::Div => "div",
                    MulDiv::Divu => "divu",
                    MulDiv::Rem => "rem",
                    MulDiv::Remu => "remu",
                };
                write!(f, "{mnemonic} x{dest}, x{src1}, x{src2}")
            }
            Self::Fence => write!(f, "fence"),
            Self::Ecall => write!(f, "ecall"),
            Self::Ebreak => write!(f, "ebreak"),
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::encode::*;

    #[test]
    fn check_decode_addi() -> Result<(), &'static str> {
        let instr = Instr::decode(addi!(x1, x2, -23)).unwrap();
        assert_eq!(
            instr,
            Instr::RegImm {
                mnemonic: RegImm::Addi,
                dest: 1,
                src: 2,
                i_immediate: 0xfe9,
            }
        );
        Ok(())
    }

    #[test]
    fn check_decode_lui() -> Result<(), &'static str> {
        let instr = Instr::decode(lui!(x5, 0x12345)).unwrap();
        assert_eq!(
            instr,
            Instr::Lui {
                dest: 5,
                u_immediate: 0x12345,
            }
        );
        Ok(())
    }

    #[test]
    fn check_decode_branch() -> Result<(), &'static str> {
        let instr = Instr::decode(beq!(x1, x2, 16)).unwrap();
        assert_eq!(
            instr,
            Instr::Branch {
                mnemonic: Branch::Beq,
                src1: 1,
                src2: 2,
                offset: 16,
            }
        );
        Ok(())
    }

    #[test]
    fn check_decode_shifts() -> Result<(), &'static str> {
        let srai = Instr::decode(srai!(x1, x2, 4)).unwrap();
        assert_eq!(
            srai,
            Instr::RegImm {
                mnemonic: RegImm::Srai,
                dest: 1,
                src: 2,
                i_immediate: 4,
            }
        );
        let srli = Instr::decode(srli!(x1, x2, 4)).unwrap();
        assert_eq!(
            srli,
            Instr::RegImm {
                mnemonic: RegImm::Srli,
                dest: 1,
                src: 2,
                i_immediate: 4,
            }
        );
        Ok(())
    }

    #[test]
    fn check_decode_muldiv() -> Result<(), &'static str> {
        let instr = Instr::decode(divu!(x3, x4, x5)).unwrap();
        assert_eq!(
            instr,
            Instr::MulDiv {
                mnemonic: MulDiv::Divu,
                dest: 3,
                src1: 4,
                src2: 5,
            }
        );
        Ok(())
    }

    #[test]
    fn check_decode_system() {
        assert_eq!(Instr::decode(0x0000_0073).unwrap(), Instr::Ecall);
        assert_eq!(Instr::decode(0x0010_0073).unwrap(), Instr::Ebreak);
    }

    #[test]
    fn check_decode_fence() {
        // fence iorw, iorw
        assert_eq!(Instr::decode(0x0ff0_000f).unwrap(), Instr::Fence);
    }

    #[test]
    fn check_illegal_opcode() {
        // The all-zero word has opcode 0000000, which has no table entry
        assert!(matches!(
            Instr::decode(0),
            Err(DecodeError::IllegalInstruction(0))
        ));
    }

    #[test]
    fn check_illegal_funct7() {
        // add with a nonsense funct7
        let instr = 0b1000000 << 25 | 0x33;
        assert!(matches!(
            Instr::decode(instr),
            Err(DecodeError::IllegalInstruction(_))
        ));
    }

    #[test]
    fn check_system_with_nonzero_rd_is_illegal() {
        // ecall pattern but rd = 1
        let instr = 1 << 7 | 0x73;
        assert!(matches!(
            Instr::decode(instr),
            Err(DecodeError::IllegalInstruction(_))
        ));
    }
}
