//! C-extension expansion
//!
//! Every defined 16-bit encoding aliases a canonical 32-bit
//! instruction; expand() performs that mapping so the rest of the
//! pipeline only ever sees canonical words. Reserved encodings and
//! the floating-point compressed forms return None, which the fetch
//! path reports as an illegal compressed instruction.
//!
//! The immediate extractors below each reassemble one of the
//! scrambled compressed immediate layouts (CI, CJ, CB, CL/CS, CIW,
//! and the addi16sp/lwsp/swsp specials).

use crate::encode::{btype, itype, jtype, rstype, ujtype};
use crate::opcodes::*;
use crate::utils::{sign_extend, to_signed};

/// Stack pointer, the implicit base register of the SP-relative forms
const SP: u32 = 2;
/// Link register, the implicit destination of c.jal and c.jalr
const RA: u32 = 1;

fn rd_full(c_inst: u16) -> u32 {
    u32::from((c_inst >> 7) & 0x1f)
}

fn rs2_full(c_inst: u16) -> u32 {
    u32::from((c_inst >> 2) & 0x1f)
}

/// The three-bit register fields of the compressed formats address
/// x8..x15
fn rd_prime(c_inst: u16) -> u32 {
    8 + u32::from((c_inst >> 2) & 0x7)
}

fn rs1_prime(c_inst: u16) -> u32 {
    8 + u32::from((c_inst >> 7) & 0x7)
}

fn rs2_prime(c_inst: u16) -> u32 {
    rd_prime(c_inst)
}

/// CI immediate: {inst[12], inst[6:2]}, 6-bit signed
fn imm_ci(c_inst: u16) -> i32 {
    let c_inst = u32::from(c_inst);
    let imm = ((c_inst >> 2) & 0x1f) | ((c_inst >> 12) & 0x1) << 5;
    to_signed(sign_extend(imm, 6))
}

/// CJ offset: {inst[12], inst[8], inst[10:9], inst[6], inst[7],
/// inst[2], inst[11], inst[5:3]}, 11-bit signed, scaled by 2
fn imm_cj(c_inst: u16) -> i32 {
    let c_inst = u32::from(c_inst);
    let imm = ((c_inst >> 3) & 0x7)
        | ((c_inst >> 11) & 0x1) << 3
        | ((c_inst >> 2) & 0x1) << 4
        | ((c_inst >> 7) & 0x1) << 5
        | ((c_inst >> 6) & 0x1) << 6
        | ((c_inst >> 9) & 0x3) << 7
        | ((c_inst >> 8) & 0x1) << 9
        | ((c_inst >> 12) & 0x1) << 10;
    to_signed(sign_extend(imm, 11)) << 1
}

/// CB offset: {inst[12], inst[6:5], inst[2], inst[11:10],
/// inst[4:3]}, 8-bit signed, scaled by 2
fn imm_cb(c_inst: u16) -> i32 {
    let c_inst = u32::from(c_inst);
    let imm = ((c_inst >> 3) & 0x3)
        | ((c_inst >> 10) & 0x3) << 2
        | ((c_inst >> 2) & 0x1) << 4
        | ((c_inst >> 5) & 0x3) << 5
        | ((c_inst >> 12) & 0x1) << 7;
    to_signed(sign_extend(imm, 8)) << 1
}

/// CL/CS offset: {inst[5], inst[12:10], inst[6]}, unsigned, scaled
/// by 4
fn imm_cl_cs(c_inst: u16) -> u32 {
    let c_inst = u32::from(c_inst);
    let imm = ((c_inst >> 6) & 0x1) | ((c_inst >> 10) & 0x7) << 1 | ((c_inst >> 5) & 0x1) << 4;
    imm << 2
}

/// Expand a 16-bit code unit (low bits 00, 01 or 10) to its
/// canonical 32-bit instruction, or None for reserved and
/// unsupported (floating-point) encodings.
pub fn expand(c_inst: u16) -> Option<u32> {
    let quadrant = c_inst & 0b11;
    let funct3 = (c_inst >> 13) & 0b111;
    match (quadrant, funct3) {
        (0b00, 0b000) => expand_addi4spn(c_inst),
        (0b00, 0b010) => expand_lw(c_inst),
        (0b00, 0b110) => expand_sw(c_inst),
        (0b01, 0b000) => expand_addi(c_inst),
        (0b01, 0b001) => expand_jal(c_inst),
        (0b01, 0b010) => expand_li(c_inst),
        (0b01, 0b011) => expand_lui_addi16sp(c_inst),
        (0b01, 0b100) => expand_misc_alu(c_inst),
        (0b01, 0b101) => expand_j(c_inst),
        (0b01, 0b110) => expand_beqz(c_inst),
        (0b01, 0b111) => expand_bnez(c_inst),
        (0b10, 0b000) => expand_slli(c_inst),
        (0b10, 0b010) => expand_lwsp(c_inst),
        (0b10, 0b100) => expand_jr_mv_add(c_inst),
        (0b10, 0b110) => expand_swsp(c_inst),
        // c.fld, c.flw, c.fsd, c.fsw, their SP forms, and quadrant-0
        // funct3 100 are not supported
        _ => None,
    }
}

/// c.addi4spn -> addi rd', x2, nzuimm. CIW immediate:
/// {inst[10:7], inst[12:11], inst[5], inst[6]}, unsigned, scaled
/// by 4. Zero immediate is reserved (covers the all-zero word).
fn expand_addi4spn(c_inst: u16) -> Option<u32> {
    let c = u32::from(c_inst);
    let imm =
        ((c >> 6) & 0x1) | ((c >> 5) & 0x1) << 1 | ((c >> 11) & 0x3) << 2 | ((c >> 7) & 0xf) << 4;
    if imm == 0 {
        return None;
    }
    Some(itype(imm << 2, SP, FUNCT3_ADDI, rd_prime(c_inst), OP_IMM))
}

/// c.lw -> lw rd', offset(rs1')
fn expand_lw(c_inst: u16) -> Option<u32> {
    Some(itype(
        imm_cl_cs(c_inst),
        rs1_prime(c_inst),
        FUNCT3_W,
        rd_prime(c_inst),
        OP_LOAD,
    ))
}

/// c.sw -> sw rs2', offset(rs1')
fn expand_sw(c_inst: u16) -> Option<u32> {
    let imm = imm_cl_cs(c_inst);
    let imm11_5 = imm >> 5;
    let imm4_0 = imm & 0x1f;
    Some(rstype(
        imm11_5,
        rs2_prime(c_inst),
        rs1_prime(c_inst),
        FUNCT3_W,
        imm4_0,
        OP_STORE,
    ))
}

/// c.addi -> addi rd, rd, imm (rd = 0 encodes c.nop)
fn expand_addi(c_inst: u16) -> Option<u32> {
    let rd = rd_full(c_inst);
    let imm = imm_ci(c_inst) as u32;
    Some(itype(imm, rd, FUNCT3_ADDI, rd, OP_IMM))
}

/// c.jal -> jal x1, offset
fn expand_jal(c_inst: u16) -> Option<u32> {
    Some(jtype(imm_cj(c_inst), RA, OP_JAL))
}

/// c.li -> addi rd, x0, imm
fn expand_li(c_inst: u16) -> Option<u32> {
    let imm = imm_ci(c_inst) as u32;
    Some(itype(imm, 0, FUNCT3_ADDI, rd_full(c_inst), OP_IMM))
}

/// rd = 2: c.addi16sp -> addi x2, x2, nzimm, with immediate
/// {inst[12], inst[4:3], inst[5], inst[2], inst[6]} scaled by 16.
/// Otherwise c.lui -> lui rd, nzimm. A zero immediate is reserved
/// in both forms.
fn expand_lui_addi16sp(c_inst: u16) -> Option<u32> {
    let rd = rd_full(c_inst);
    if rd == SP {
        let c = u32::from(c_inst);
        let imm = ((c >> 6) & 0x1)
            | ((c >> 2) & 0x1) << 1
            | ((c >> 5) & 0x1) << 2
            | ((c >> 3) & 0x3) << 3
            | ((c >> 12) & 0x1) << 5;
        if imm == 0 {
            return None;
        }
        let imm = sign_extend(imm, 6) << 4;
        Some(itype(imm, SP, FUNCT3_ADDI, SP, OP_IMM))
    } else {
        let imm = imm_ci(c_inst);
        if imm == 0 {
            return None;
        }
        Some(ujtype(imm as u32, rd, OP_LUI))
    }
}

/// The quadrant-1 funct3 100 group: c.srli, c.srai, c.andi, and the
/// register-register c.sub/c.xor/c.or/c.and
fn expand_misc_alu(c_inst: u16) -> Option<u32> {
    let rs1 = rs1_prime(c_inst);
    let imm = imm_ci(c_inst) as u32;
    match (c_inst >> 10) & 0x3 {
        0b00 => Some(itype(imm & 0x3f, rs1, FUNCT3_SRLI, rs1, OP_IMM)),
        0b01 => Some(itype(
            (imm & 0x3f) | (FUNCT7_SRA << 5),
            rs1,
            FUNCT3_SRLI,
            rs1,
            OP_IMM,
        )),
        0b10 => Some(itype(imm, rs1, FUNCT3_ANDI, rs1, OP_IMM)),
        _ => {
            // Bit 12 set selects the (unsupported) 64-bit subw/addw row
            if (c_inst >> 12) & 0x1 == 1 {
                return None;
            }
            let rs2 = rs2_prime(c_inst);
            let (funct3, funct7) = match (c_inst >> 5) & 0x3 {
                0b00 => (FUNCT3_ADD, FUNCT7_SUB),
                0b01 => (FUNCT3_XOR, FUNCT7_ZERO),
                0b10 => (FUNCT3_OR, FUNCT7_ZERO),
                _ => (FUNCT3_AND, FUNCT7_ZERO),
            };
            Some(rstype(funct7, rs2, rs1, funct3, rs1, OP))
        }
    }
}

/// c.j -> jal x0, offset
fn expand_j(c_inst: u16) -> Option<u32> {
    Some(jtype(imm_cj(c_inst), 0, OP_JAL))
}

/// c.beqz -> beq rs1', x0, offset
fn expand_beqz(c_inst: u16) -> Option<u32> {
    Some(btype(
        imm_cb(c_inst),
        0,
        rs1_prime(c_inst),
        FUNCT3_BEQ,
        OP_BRANCH,
    ))
}

/// c.bnez -> bne rs1', x0, offset
fn expand_bnez(c_inst: u16) -> Option<u32> {
    Some(btype(
        imm_cb(c_inst),
        0,
        rs1_prime(c_inst),
        FUNCT3_BNE,
        OP_BRANCH,
    ))
}

/// c.slli -> slli rd, rd, shamt
fn expand_slli(c_inst: u16) -> Option<u32> {
    let rd = rd_full(c_inst);
    let imm = (imm_ci(c_inst) as u32) & 0x3f;
    Some(itype(imm, rd, FUNCT3_SLLI, rd, OP_IMM))
}

/// c.lwsp -> lw rd, offset(x2), with immediate
/// {inst[3:2], inst[12], inst[6:4]} scaled by 4. rd = 0 is reserved.
fn expand_lwsp(c_inst: u16) -> Option<u32> {
    let rd = rd_full(c_inst);
    if rd == 0 {
        return None;
    }
    let c = u32::from(c_inst);
    let imm = ((c >> 4) & 0x7) | ((c >> 12) & 0x1) << 3 | ((c >> 2) & 0x3) << 4;
    Some(itype(imm << 2, SP, FUNCT3_W, rd, OP_LOAD))
}

/// The quadrant-2 funct3 100 group, distinguished by bit 12 and the
/// two register fields: c.jr, c.mv, c.ebreak, c.jalr and c.add
fn expand_jr_mv_add(c_inst: u16) -> Option<u32> {
    let rd = rd_full(c_inst);
    let rs2 = rs2_full(c_inst);
    if (c_inst >> 12) & 0x1 == 1 {
        if rs2 == 0 {
            if rd == 0 {
                // c.ebreak
                return Some(itype(1, 0, 0b000, 0, OP_SYSTEM));
            }
            // c.jalr -> jalr x1, 0(rd)
            Some(itype(0, rd, 0b000, RA, OP_JALR))
        } else {
            // c.add -> add rd, rd, rs2
            Some(rstype(FUNCT7_ZERO, rs2, rd, FUNCT3_ADD, rd, OP))
        }
    } else if rs2 == 0 {
        if rd == 0 {
            return None;
        }
        // c.jr -> jalr x0, 0(rd)
        Some(itype(0, rd, 0b000, 0, OP_JALR))
    } else {
        // c.mv -> add rd, x0, rs2
        Some(rstype(FUNCT7_ZERO, rs2, 0, FUNCT3_ADD, rd, OP))
    }
}

/// c.swsp -> sw rs2, offset(x2), with immediate
/// {inst[8:7], inst[12:9]} scaled by 4
fn expand_swsp(c_inst: u16) -> Option<u32> {
    let c = u32::from(c_inst);
    let imm = (((c >> 9) & 0xf) | ((c >> 7) & 0x3) << 4) << 2;
    let imm11_5 = imm >> 5;
    let imm4_0 = imm & 0x1f;
    Some(rstype(
        imm11_5,
        rs2_full(c_inst),
        SP,
        FUNCT3_W,
        imm4_0,
        OP_STORE,
    ))
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::encode::*;
    use crate::instr::Instr;

    /// Expansion must decode identically to the canonical encoding
    fn check_expands_to(c_inst: u16, canonical: u32) {
        let expanded = expand(c_inst).unwrap();
        assert_eq!(
            Instr::decode(expanded).unwrap(),
            Instr::decode(canonical).unwrap(),
            "0x{c_inst:04x} expanded to 0x{expanded:08x}, expected 0x{canonical:08x}"
        );
    }

    #[test]
    fn check_li() -> Result<(), &'static str> {
        // c.li x10, 1
        check_expands_to(0x4505, addi!(x10, x0, 1));
        // c.li x8, -3
        check_expands_to(0x5475, addi!(x8, x0, -3));
        Ok(())
    }

    #[test]
    fn check_addi() -> Result<(), &'static str> {
        // c.addi x10, -1
        check_expands_to(0x157d, addi!(x10, x10, -1));
        // c.addi x15, 4
        check_expands_to(0x0791, addi!(x15, x15, 4));
        Ok(())
    }

    #[test]
    fn check_addi4spn() -> Result<(), &'static str> {
        // c.addi4spn x12, 16
        check_expands_to(0x0830, addi!(x12, x2, 16));
        Ok(())
    }

    #[test]
    fn check_addi4spn_zero_imm_reserved() {
        // Covers the all-zero halfword
        assert_eq!(expand(0x0000), None);
    }

    #[test]
    fn check_lw_sw() -> Result<(), &'static str> {
        // c.lw x14, 8(x15)
        check_expands_to(0x4798, lw!(x14, x15, 8));
        // c.sw x14, 8(x15)
        check_expands_to(0xc798, sw!(x14, x15, 8));
        Ok(())
    }

    #[test]
    fn check_lui() -> Result<(), &'static str> {
        // c.lui x10, 1
        check_expands_to(0x6505, lui!(x10, 1));
        // c.lui x10, 0xfffe1 (negative nzimm)
        check_expands_to(0x7505, lui!(x10, 0xfffe1u32 as i32));
        Ok(())
    }

    #[test]
    fn check_lui_zero_imm_reserved() {
        // c.lui x10 with nzimm = 0
        assert_eq!(expand(0x6501), None);
    }

    #[test]
    fn check_addi16sp() -> Result<(), &'static str> {
        // c.addi16sp 32
        check_expands_to(0x6105, addi!(x2, x2, 32));
        // c.addi16sp -64
        check_expands_to(0x7139, addi!(x2, x2, -64));
        Ok(())
    }

    #[test]
    fn check_jumps() -> Result<(), &'static str> {
        // c.j -8
        check_expands_to(0xbfe5, jal!(x0, -8));
        // c.jal 8
        check_expands_to(0x2021, jal!(x1, 8));
        Ok(())
    }

    #[test]
    fn check_branches() -> Result<(), &'static str> {
        // c.beqz x8, 16
        check_expands_to(0xc801, beq!(x8, x0, 16));
        // c.bnez x8, -6
        check_expands_to(0xfc6d, bne!(x8, x0, -6));
        Ok(())
    }

    #[test]
    fn check_misc_alu() -> Result<(), &'static str> {
        // c.srli x8, 2
        check_expands_to(0x8009, srli!(x8, x8, 2));
        // c.srai x9, 3
        check_expands_to(0x848d, srai!(x9, x9, 3));
        // c.andi x10, 15
        check_expands_to(0x893d, andi!(x10, x10, 15));
        // c.sub x8, x9
        check_expands_to(0x8c05, sub!(x8, x8, x9));
        // c.xor x8, x9
        check_expands_to(0x8c25, xor!(x8, x8, x9));
        // c.or x8, x9
        check_expands_to(0x8c45, or!(x8, x8, x9));
        // c.and x8, x9
        check_expands_to(0x8c65, and!(x8, x8, x9));
        Ok(())
    }

    #[test]
    fn check_slli() -> Result<(), &'static str> {
        // c.slli x10, 3
        check_expands_to(0x050e, slli!(x10, x10, 3));
        Ok(())
    }

    #[test]
    fn check_lwsp_swsp() -> Result<(), &'static str> {
        // c.lwsp x10, 12(x2)
        check_expands_to(0x4532, lw!(x10, x2, 12));
        // c.swsp x10, 12(x2)
        check_expands_to(0xc62a, sw!(x10, x2, 12));
        Ok(())
    }

    #[test]
    fn check_lwsp_x0_reserved() {
        // c.lwsp with rd = 0
        assert_eq!(expand(0x4032), None);
    }

    #[test]
    fn check_jr_mv_add_group() -> Result<(), &'static str> {
        // c.jr x1
        check_expands_to(0x8082, jalr!(x0, x1, 0));
        // c.jalr x10
        check_expands_to(0x9502, jalr!(x1, x10, 0));
        // c.mv x10, x11
        check_expands_to(0x852e, add!(x10, x0, x11));
        // c.add x10, x11
        check_expands_to(0x952e, add!(x10, x10, x11));
        Ok(())
    }

    #[test]
    fn check_jr_x0_reserved() {
        assert_eq!(expand(0x8002), None);
    }

    #[test]
    fn check_ebreak() {
        let expanded = expand(0x9002).unwrap();
        assert_eq!(Instr::decode(expanded).unwrap(), Instr::Ebreak);
    }

    #[test]
    fn check_float_forms_unsupported() {
        // c.fld x8, 0(x9)
        assert_eq!(expand(0x2080 | 0x0000), None);
        // c.fsw-style quadrant 0 funct3 111
        assert_eq!(expand(0xe000 | 0x0080), None);
        // c.flwsp
        assert_eq!(expand(0x6002 | 0x0080), None);
    }
}
