//! Instruction encoders
//!
//! The functions here assemble canonical 32-bit instruction words from
//! their fields. They are used by the compressed-instruction expander
//! and by the per-mnemonic macros at the bottom of the file, which let
//! tests write short assembly-like programs (e.g. `addi!(x1, x2, -23)`).

use crate::utils::{bit_range, to_unsigned};

pub use super::opcodes::*;

/// Make an I-type instruction. Only produces a valid I-type
/// instruction if the arguments are in range.
pub fn itype(imm: u32, rs1: u32, funct3: u32, rd: u32, opcode: u32) -> u32 {
    imm << 20 | rs1 << 15 | funct3 << 12 | rd << 7 | opcode
}

/// Make an U- or J-type instruction (if you are making
/// a J-type instruction, make sure to construct the
/// immediate field correctly using jtype_imm_field)
pub fn ujtype(imm: u32, rd: u32, opcode: u32) -> u32 {
    bit_range(imm, 19, 0) << 12 | rd << 7 | opcode
}

/// Make an R- or S-type instruction. These instructions
/// have the same number of fields of the same size. The meaning
/// of a and b is:
///
/// R-type: a = funct7, b = rd
/// S-type: a = imm[11:5], b = imm[4:0]
pub fn rstype(a: u32, rs2: u32, rs1: u32, funct3: u32, b: u32, opcode: u32) -> u32 {
    a << 25 | rs2 << 20 | rs1 << 15 | funct3 << 12 | b << 7 | opcode
}

/// Make a B-type instruction from a byte offset (must be even)
pub fn btype(offset: i32, rs2: u32, rs1: u32, funct3: u32, opcode: u32) -> u32 {
    let (a, b) = btype_imm_fields(offset);
    rstype(a, rs2, rs1, funct3, b, opcode)
}

/// Make an S-type instruction from a signed 12-bit offset
pub fn stype(offset: i32, rs2: u32, rs1: u32, funct3: u32, opcode: u32) -> u32 {
    let imm = to_unsigned(offset);
    let imm11_5 = bit_range(imm, 11, 5);
    let imm4_0 = bit_range(imm, 4, 0);
    rstype(imm11_5, rs2, rs1, funct3, imm4_0, opcode)
}

/// Make a J-type instruction from a byte offset (must be even)
pub fn jtype(offset: i32, rd: u32, opcode: u32) -> u32 {
    ujtype(jtype_imm_field(offset), rd, opcode)
}

/// The shift-by-immediate instructions use I-type,
/// but with a special encoding of the immediate that
/// uses the lower 5 bits for the shift amount (shamt)
/// and the upper 7 bits to distinguish between arithmetical
/// and logical right shift
pub fn shifts_imm_field(shamt: u32, upper: u32) -> u32 {
    let shamt = bit_range(shamt, 4, 0);
    (upper << 5) | shamt
}

/// Takes an immediate and shuffles it into the
/// format required for the 20-bit field of the
/// U-type instruction (making it J-type)
pub fn jtype_imm_field(imm: i32) -> u32 {
    let imm = to_unsigned(imm);
    let imm20 = bit_range(imm, 20, 20);
    let imm19_12 = bit_range(imm, 19, 12);
    let imm11 = bit_range(imm, 11, 11);
    let imm10_1 = bit_range(imm, 10, 1);
    (imm20 << 19) | (imm10_1 << 9) | (imm11 << 8) | imm19_12
}

/// Returns (a, b) suitable for use with rstype for
/// the conditional branch instructions (btype)
pub fn btype_imm_fields(imm: i32) -> (u32, u32) {
    let imm = to_unsigned(imm);
    let imm12 = bit_range(imm, 12, 12);
    let imm11 = bit_range(imm, 11, 11);
    let imm10_5 = bit_range(imm, 10, 5);
    let imm4_1 = bit_range(imm, 4, 1);
    let a = (imm12 << 6) | imm10_5;
    let b = (imm4_1 << 1) | imm11;
    (a, b)
}

/// Convert a RISC-V register name (e.g. x3) to the register value
/// (e.g. 3)
pub fn reg_num_impl(reg_name: &str) -> Result<u32, &'static str> {
    let digits = reg_name
        .strip_prefix('x')
        .ok_or("register name must begin with x")?;
    digits
        .parse::<u32>()
        .map_err(|_| "register name must end in one or two digits")
}

#[macro_export]
macro_rules! reg_num {
    ($reg:expr) => {
        reg_num_impl(std::stringify!($reg))?
    };
}
pub use reg_num;

macro_rules! itype_instr {
    ($instruction:ident, $funct3:expr, $opcode:expr) => {
        #[macro_export]
        macro_rules! $instruction {
            ($rd:ident, $rs1:expr, $imm:expr) => {{
                use crate::utils::to_unsigned;
                let rd = reg_num!($rd);
                let rs1 = reg_num!($rs1);
                let imm = to_unsigned($imm.into());
                itype(imm, rs1, $funct3, rd, $opcode)
            }};
        }
        pub use $instruction;
    };
}

/// Here, upper is the only special value, which is always zero
/// apart from in srai, where it is 0b0100000.
macro_rules! shift_instr {
    ($instruction:ident, $upper:expr, $funct3:expr, $opcode:expr) => {
        #[macro_export]
        macro_rules! $instruction {
            ($rd:ident, $rs1:expr, $imm:expr) => {{
                let rd = reg_num!($rd);
                let rs1 = reg_num!($rs1);
                let imm = shifts_imm_field($imm, $upper);
                itype(imm, rs1, $funct3, rd, $opcode)
            }};
        }
        pub use $instruction;
    };
}

macro_rules! rtype_instr {
    ($instruction:ident, $funct7:expr, $funct3:expr, $opcode:expr) => {
        #[macro_export]
        macro_rules! $instruction {
            ($rd:ident, $rs1:expr, $rs2:expr) => {{
                let rd = reg_num!($rd);
                let rs1 = reg_num!($rs1);
                let rs2 = reg_num!($rs2);
                rstype($funct7, rs2, rs1, $funct3, rd, $opcode)
            }};
        }
        pub use $instruction;
    };
}

macro_rules! stype_instr {
    ($instruction:ident, $funct3:expr, $opcode:expr) => {
        #[macro_export]
        macro_rules! $instruction {
            ($rs2:expr, $rs1:expr, $imm:expr) => {{
                let rs1 = reg_num!($rs1);
                let rs2 = reg_num!($rs2);
                stype($imm, rs2, rs1, $funct3, $opcode)
            }};
        }
        pub use $instruction;
    };
}

macro_rules! btype_instr {
    ($instruction:ident, $funct3:expr, $opcode:expr) => {
        #[macro_export]
        macro_rules! $instruction {
            ($rs1:expr, $rs2:expr, $imm:expr) => {{
                let rs1 = reg_num!($rs1);
                let rs2 = reg_num!($rs2);
                btype($imm, rs2, rs1, $funct3, $opcode)
            }};
        }
        pub use $instruction;
    };
}

#[macro_export]
macro_rules! jal {
    ($rd:expr, $imm:expr) => {{
        let rd = reg_num!($rd);
        jtype($imm, rd, OP_JAL)
    }};
}
pub use jal;

/// Note: in these instructions (LUI and AUIPC), the immediate imm
/// is already the upper 20 bits that will be loaded -- it will not
/// be shifted up.
macro_rules! utype_instr {
    ($instruction:ident, $opcode:expr) => {
        #[macro_export]
        macro_rules! $instruction {
            ($rd:expr, $imm:expr) => {{
                use crate::utils::to_unsigned;
                let rd = reg_num!($rd);
                let imm = to_unsigned($imm);
                ujtype(imm, rd, $opcode)
            }};
        }
        pub use $instruction;
    };
}

#[macro_export]
macro_rules! ecall {
    () => {
        itype(0, 0, 0b000, 0, OP_SYSTEM)
    };
}
pub use ecall;

#[macro_export]
macro_rules! ebreak {
    () => {
        itype(1, 0, 0b000, 0, OP_SYSTEM)
    };
}
pub use ebreak;

#[macro_export]
macro_rules! fence {
    () => {
        itype(0, 0, 0b000, 0, OP_MISC_MEM)
    };
}
pub use fence;

// === RV32I ===

utype_instr!(lui, OP_LUI);
utype_instr!(auipc, OP_AUIPC);
// jal is defined above
itype_instr!(jalr, 0b000, OP_JALR);

// Conditional branches
btype_instr!(beq, FUNCT3_BEQ, OP_BRANCH);
btype_instr!(bne, FUNCT3_BNE, OP_BRANCH);
btype_instr!(blt, FUNCT3_BLT, OP_BRANCH);
btype_instr!(bge, FUNCT3_BGE, OP_BRANCH);
btype_instr!(bltu, FUNCT3_BLTU, OP_BRANCH);
btype_instr!(bgeu, FUNCT3_BGEU, OP_BRANCH);

// Loads
itype_instr!(lb, FUNCT3_B, OP_LOAD);
itype_instr!(lh, FUNCT3_H, OP_LOAD);
itype_instr!(lw, FUNCT3_W, OP_LOAD);
itype_instr!(lbu, FUNCT3_BU, OP_LOAD);
itype_instr!(lhu, FUNCT3_HU, OP_LOAD);

// Stores
stype_instr!(sb, FUNCT3_B, OP_STORE);
stype_instr!(sh, FUNCT3_H, OP_STORE);
stype_instr!(sw, FUNCT3_W, OP_STORE);

// Integer register-immediate instructions
itype_instr!(addi, FUNCT3_ADDI, OP_IMM);
itype_instr!(slti, FUNCT3_SLTI, OP_IMM);
itype_instr!(sltiu, FUNCT3_SLTIU, OP_IMM);
itype_instr!(xori, FUNCT3_XORI, OP_IMM);
itype_instr!(ori, FUNCT3_ORI, OP_IMM);
itype_instr!(andi, FUNCT3_ANDI, OP_IMM);

// Shift-by-immediate instructions
shift_instr!(slli, 0b0000000, FUNCT3_SLLI, OP_IMM);
shift_instr!(srli, 0b0000000, FUNCT3_SRLI, OP_IMM);
shift_instr!(srai, 0b0100000, FUNCT3_SRLI, OP_IMM);

// Integer register-register instructions
rtype_instr!(add, FUNCT7_ZERO, FUNCT3_ADD, OP);
rtype_instr!(sub, FUNCT7_SUB, FUNCT3_ADD, OP);
rtype_instr!(sll, FUNCT7_ZERO, FUNCT3_SLL, OP);
rtype_instr!(slt, FUNCT7_ZERO, FUNCT3_SLT, OP);
rtype_instr!(sltu, FUNCT7_ZERO, FUNCT3_SLTU, OP);
rtype_instr!(xor, FUNCT7_ZERO, FUNCT3_XOR, OP);
rtype_instr!(srl, FUNCT7_ZERO, FUNCT3_SRL, OP);
rtype_instr!(sra, FUNCT7_SRA, FUNCT3_SRL, OP);
rtype_instr!(or, FUNCT7_ZERO, FUNCT3_OR, OP);
rtype_instr!(and, FUNCT7_ZERO, FUNCT3_AND, OP);

// === RV32M ===

rtype_instr!(mul, FUNCT7_MULDIV, FUNCT3_MUL, OP);
rtype_instr!(mulh, FUNCT7_MULDIV, FUNCT3_MULH, OP);
rtype_instr!(mulhsu, FUNCT7_MULDIV, FUNCT3_MULHSU, OP);
rtype_instr!(mulhu, FUNCT7_MULDIV, FUNCT3_MULHU, OP);
rtype_instr!(div, FUNCT7_MULDIV, FUNCT3_DIV, OP);
rtype_instr!(divu, FUNCT7_MULDIV, FUNCT3_DIVU, OP);
rtype_instr!(rem, FUNCT7_MULDIV, FUNCT3_REM, OP);
rtype_instr!(remu, FUNCT7_MULDIV, FUNCT3_REMU, OP);

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn check_itype_encoding() -> Result<(), &'static str> {
        assert_eq!(addi!(x1, x2, -23), 0xfe91_0093);
        assert_eq!(jalr!(x4, x6, -4), 0xffc3_0267);
        Ok(())
    }

    #[test]
    fn check_utype_encoding() -> Result<(), &'static str> {
        assert_eq!(lui!(x5, 0x12345), 0x1234_52b7);
        Ok(())
    }

    #[test]
    fn check_jtype_encoding() -> Result<(), &'static str> {
        assert_eq!(jal!(x4, -4), 0xffdf_f26f);
        Ok(())
    }

    #[test]
    fn check_btype_encoding() -> Result<(), &'static str> {
        assert_eq!(beq!(x1, x2, 16), 0x0020_8863);
        Ok(())
    }

    #[test]
    fn check_stype_encoding() -> Result<(), &'static str> {
        assert_eq!(sw!(x1, x2, -15), 0xfe11_28a3);
        Ok(())
    }

    #[test]
    fn check_system_encodings() {
        assert_eq!(ecall!(), 0x0000_0073);
        assert_eq!(ebreak!(), 0x0010_0073);
    }
}
