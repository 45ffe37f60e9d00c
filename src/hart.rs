//! RISC-V hardware thread
//!
//! This is a single RV32IMC hart with no notion of privilege: all
//! of guest memory is readable and writable, and every trap is
//! fatal to the execution environment. The member function step()
//! controls execution: each call fetches the code unit at the
//! current pc (expanding it first if it is a compressed
//! instruction), decodes it, and executes it against the machine
//! state. Faults are returned as a Trap for the caller to report;
//! clean termination (the exit syscall, or ebreak) is signalled by
//! the halt flag instead.
//!
//! The executors stage the address of the following instruction in
//! next_pc; step() commits it to pc only if the machine has not
//! halted, so a halted machine still points at the instruction
//! that stopped it.

use crate::compressed;
use crate::instr::{Branch, DecodeError, Instr, Load, MulDiv, RegImm, RegReg, Store};
use crate::syscall::{self, SyscallError};
use crate::utils::{sign_extend, to_signed, to_unsigned};

use self::memory::{Memory, MemoryError};
use self::registers::{RegisterError, Registers};
use thiserror::Error;

pub mod memory;
pub mod registers;

/// Stack pointer register (x2)
const SP: u8 = 2;

#[derive(Debug)]
pub struct Hart {
    pub pc: u32,
    /// Address of the following instruction, staged by the
    /// executors and committed by step()
    pub next_pc: u32,
    pub registers: Registers,
    pub memory: Memory,
    /// Once set, no further state is committed
    pub halt: bool,
    pub exit_code: i32,
    /// Current end of the guest heap, moved by the brk syscall
    pub program_break: u32,
}

impl Default for Hart {
    fn default() -> Self {
        Self::new()
    }
}

/// Jump targets must be 2-byte aligned (odd targets are an
/// instruction-address-misaligned exception; 2-byte alignment is
/// legal because compressed instructions are supported)
fn check_jump_target(target: u32) -> Result<(), ExecutionError> {
    if target % 2 != 0 {
        Err(ExecutionError::InstructionAddressMisaligned(target))
    } else {
        Ok(())
    }
}

/// Load upper immediate
///
/// Load u_immediate into the upper 20 bits of dest and fill the
/// lower 12 bits with zeros.
fn execute_lui(hart: &mut Hart, dest: u8, u_immediate: u32) -> Result<(), ExecutionError> {
    hart.set_x(dest, u_immediate << 12)?;
    Ok(())
}

/// Add upper immediate to pc
///
/// Make a 32-bit value by setting its upper 20 bits to u_immediate
/// and its lower 12 bits to zero, add the address of this
/// instruction, and store the result in dest.
fn execute_auipc(hart: &mut Hart, dest: u8, u_immediate: u32) -> Result<(), ExecutionError> {
    let value = hart.pc.wrapping_add(u_immediate << 12);
    hart.set_x(dest, value)?;
    Ok(())
}

/// Jump and link
///
/// Store the address of the following instruction in dest, then
/// jump relative to pc. The link value is the staged next_pc, so
/// an expanded c.jal correctly links pc + 2.
fn execute_jal(hart: &mut Hart, dest: u8, offset: u32) -> Result<(), ExecutionError> {
    let return_address = hart.next_pc;
    hart.set_x(dest, return_address)?;
    let target = hart.pc.wrapping_add(sign_extend(offset, 21));
    check_jump_target(target)?;
    hart.next_pc = target;
    Ok(())
}

/// Jump and link register
///
/// Compute base + offset, clear bit 0, and jump there. The base
/// register is read before the link register is written, which
/// matters when dest and base coincide.
fn execute_jalr(hart: &mut Hart, dest: u8, base: u8, offset: u16) -> Result<(), ExecutionError> {
    let target = 0xffff_fffe & hart.x(base)?.wrapping_add(sign_extend(offset.into(), 12));
    let return_address = hart.next_pc;
    hart.set_x(dest, return_address)?;
    check_jump_target(target)?;
    hart.next_pc = target;
    Ok(())
}

/// Conditional branch
///
/// Evaluate the condition given by the mnemonic between src1 and
/// src2; on taken branches jump relative to pc, otherwise fall
/// through to the staged next_pc.
fn execute_branch(
    hart: &mut Hart,
    mnemonic: Branch,
    src1: u8,
    src2: u8,
    offset: u16,
) -> Result<(), ExecutionError> {
    let src1 = hart.x(src1)?;
    let src2 = hart.x(src2)?;
    let branch_taken = match mnemonic {
        Branch::Beq => src1 == src2,
        Branch::Bne => src1 != src2,
        Branch::Blt => to_signed(src1) < to_signed(src2),
        Branch::Bge => to_signed(src1) >= to_signed(src2),
        Branch::Bltu => src1 < src2,
        Branch::Bgeu => src1 >= src2,
    };
    if branch_taken {
        let target = hart.pc.wrapping_add(sign_extend(offset.into(), 13));
        check_jump_target(target)?;
        hart.next_pc = target;
    }
    Ok(())
}

/// Compute a load address by adding base to the sign-extended
/// offset, and load the data there into dest. The width, and
/// whether the result is sign- or zero-extended, depends on the
/// mnemonic.
fn execute_load(
    hart: &mut Hart,
    mnemonic: Load,
    dest: u8,
    base: u8,
    offset: u16,
) -> Result<(), ExecutionError> {
    let address = hart.x(base)?.wrapping_add(sign_extend(offset.into(), 12));
    let value = match mnemonic {
        Load::Lb => sign_extend(hart.memory.read_u8(address)?.into(), 8),
        Load::Lh => sign_extend(hart.memory.read_u16(address)?.into(), 16),
        Load::Lw => hart.memory.read_u32(address)?,
        Load::Lbu => hart.memory.read_u8(address)?.into(),
        Load::Lhu => hart.memory.read_u16(address)?.into(),
    };
    hart.set_x(dest, value)?;
    Ok(())
}

/// Compute a store address by adding base to the sign-extended
/// offset, and write the low byte/halfword/word of src there.
fn execute_store(
    hart: &mut Hart,
    mnemonic: Store,
    src: u8,
    base: u8,
    offset: u16,
) -> Result<(), ExecutionError> {
    let address = hart.x(base)?.wrapping_add(sign_extend(offset.into(), 12));
    let value = hart.x(src)?;
    match mnemonic {
        Store::Sb => hart.memory.write_u8(address, value as u8)?,
        Store::Sh => hart.memory.write_u16(address, value as u16)?,
        Store::Sw => hart.memory.write_u32(address, value)?,
    }
    Ok(())
}

/// Operation between register src and the sign-extended immediate,
/// placed in dest. Arithmetic wraps on 32 bits; the shifts use the
/// low 5 bits of the immediate as the shift amount.
fn execute_reg_imm(
    hart: &mut Hart,
    mnemonic: RegImm,
    dest: u8,
    src: u8,
    i_immediate: u16,
) -> Result<(), ExecutionError> {
    let src = hart.x(src)?;
    let i_immediate = sign_extend(i_immediate.into(), 12);
    let value = match mnemonic {
        RegImm::Addi => src.wrapping_add(i_immediate),
        RegImm::Slti => {
            (to_signed(src) < to_signed(i_immediate)) as u32
        }
        RegImm::Sltiu => (src < i_immediate) as u32,
        RegImm::Xori => src ^ i_immediate,
        RegImm::Ori => src | i_immediate,
        RegImm::Andi => src & i_immediate,
        RegImm::Slli => src << (0x1f & i_immediate),
        RegImm::Srli => src >> (0x1f & i_immediate),
        RegImm::Srai => {
            to_unsigned(to_signed(src) >> (0x1f & i_immediate))
        }
    };
    hart.set_x(dest, value)?;
    Ok(())
}

/// Operation between registers src1 and src2, placed in dest.
fn execute_reg_reg(
    hart: &mut Hart,
    mnemonic: RegReg,
    dest: u8,
    src1: u8,
    src2: u8,
) -> Result<(), ExecutionError> {
    let src1 = hart.x(src1)?;
    let src2 = hart.x(src2)?;
    let value = match mnemonic {
        RegReg::Add => src1.wrapping_add(src2),
        RegReg::Sub => src1.wrapping_sub(src2),
        RegReg::Sll => src1 << (0x1f & src2),
        RegReg::Slt => (to_signed(src1) < to_signed(src2)) as u32,
        RegReg::Sltu => (src1 < src2) as u32,
        RegReg::Xor => src1 ^ src2,
        RegReg::Srl => src1 >> (0x1f & src2),
        RegReg::Sra => to_unsigned(to_signed(src1) >> (0x1f & src2)),
        RegReg::Or => src1 | src2,
        RegReg::And => src1 & src2,
    };
    hart.set_x(dest, value)?;
    Ok(())
}

/// M-extension multiply/divide between src1 and src2, placed in
/// dest.
///
/// Division follows the RISC-V conventions: division by zero
/// returns all ones (quotient) or the dividend (remainder), and
/// the overflowing INT32_MIN / -1 returns INT32_MIN (quotient) or
/// zero (remainder). The mulh variants return the upper 32 bits of
/// the widened 64-bit product.
fn execute_mul_div(
    hart: &mut Hart,
    mnemonic: MulDiv,
    dest: u8,
    src1: u8,
    src2: u8,
) -> Result<(), ExecutionError> {
    let src1 = hart.x(src1)?;
    let src2 = hart.x(src2)?;
    let value = match mnemonic {
        MulDiv::Mul => src1.wrapping_mul(src2),
        MulDiv::Mulh => {
            let product =
                i64::from(to_signed(src1)) * i64::from(to_signed(src2));
            (product >> 32) as u32
        }
        MulDiv::Mulhsu => {
            let product = i64::from(to_signed(src1)) * i64::from(src2);
            (product >> 32) as u32
        }
        MulDiv::Mulhu => {
            let product = u64::from(src1) * u64::from(src2);
            (product >> 32) as u32
        }
        MulDiv::Div => {
            if src2 == 0 {
                0xffff_ffff
            } else {
                let quotient =
                    to_signed(src1).wrapping_div(to_signed(src2));
                to_unsigned(quotient)
            }
        }
        MulDiv::Divu => {
            if src2 == 0 {
                0xffff_ffff
            } else {
                src1 / src2
            }
        }
        MulDiv::Rem => {
            if src2 == 0 {
                src1
            } else {
                let remainder =
                    to_signed(src1).wrapping_rem(to_signed(src2));
                to_unsigned(remainder)
            }
        }
        MulDiv::Remu => {
            if src2 == 0 {
                src1
            } else {
                src1 % src2
            }
        }
    };
    hart.set_x(dest, value)?;
    Ok(())
}

impl Hart {
    /// Make a hart with zeroed registers and memory, pc = 0, and
    /// the stack pointer at the top of guest memory
    pub fn new() -> Self {
        let memory = Memory::new();
        let mut registers = Registers::default();
        registers
            .write(SP, memory.base().wrapping_add(memory.size()))
            .expect("stack pointer index is valid");
        Self {
            pc: 0,
            next_pc: 0,
            registers,
            memory,
            halt: false,
            exit_code: 0,
            program_break: 0,
        }
    }

    /// Read the value of the register xn
    pub fn x(&self, n: u8) -> Result<u32, RegisterError> {
        self.registers.read(n)
    }

    /// Write the value of the register xn
    pub fn set_x(&mut self, n: u8, value: u32) -> Result<(), RegisterError> {
        self.registers.write(n, value)
    }

    fn execute(&mut self, instr: Instr) -> Result<(), ExecutionError> {
        match instr {
            Instr::Lui { dest, u_immediate } => execute_lui(self, dest, u_immediate),
            Instr::Auipc { dest, u_immediate } => execute_auipc(self, dest, u_immediate),
            Instr::Jal { dest, offset } => execute_jal(self, dest, offset),
            Instr::Jalr { dest, base, offset } => execute_jalr(self, dest, base, offset),
            Instr::Branch {
                mnemonic,
                src1,
                src2,
                offset,
            } => execute_branch(self, mnemonic, src1, src2, offset),
            Instr::Load {
                mnemonic,
                dest,
                base,
                offset,
            } => execute_load(self, mnemonic, dest, base, offset),
            Instr::Store {
                mnemonic,
                src,
                base,
                offset,
            } => execute_store(self, mnemonic, src, base, offset),
            Instr::RegImm {
                mnemonic,
                dest,
                src,
                i_immediate,
            } => execute_reg_imm(self, mnemonic, dest, src, i_immediate),
            Instr::RegReg {
                mnemonic,
                dest,
                src1,
                src2,
            } => execute_reg_reg(self, mnemonic, dest, src1, src2),
            Instr::MulDiv {
                mnemonic,
                dest,
                src1,
                src2,
            } => execute_mul_div(self, mnemonic, dest, src1, src2),
            // No reordering to forbid on a single hart
            Instr::Fence => Ok(()),
            Instr::Ecall => {
                syscall::handle_ecall(self)?;
                Ok(())
            }
            Instr::Ebreak => {
                eprintln!("EBREAK executed at PC: 0x{:08x}", self.pc);
                self.exit_code = 1;
                self.halt = true;
                Ok(())
            }
        }
    }

    /// Fetch, decode and execute the code unit at pc
    ///
    /// A half-word is always fetched first; its low two bits decide
    /// whether this is a 32-bit instruction (read the second
    /// half-word) or a 16-bit one (expand it to its canonical
    /// form). next_pc is staged as pc plus the code unit length
    /// before execution, and committed afterwards unless the
    /// machine halted.
    pub fn step(&mut self) -> Result<(), Trap> {
        let lower = self
            .memory
            .read_u16(self.pc)
            .map_err(ExecutionError::from)?;
        let (word, length) = if lower & 0b11 == 0b11 {
            let upper = self
                .memory
                .read_u16(self.pc.wrapping_add(2))
                .map_err(ExecutionError::from)?;
            (u32::from(lower) | u32::from(upper) << 16, 4)
        } else {
            match compressed::expand(lower) {
                Some(word) => (word, 2),
                None => return Err(DecodeError::IllegalCompressed(lower).into()),
            }
        };
        self.next_pc = self.pc.wrapping_add(length);
        let instr = Instr::decode(word)?;
        log::trace!("pc=0x{:08x}: {instr}", self.pc);
        self.execute(instr)?;
        if !self.halt {
            self.pc = self.next_pc;
        }
        Ok(())
    }

    /// Print the diagnostic register dump to stderr
    pub fn dump_registers(&self) {
        eprintln!("================================================================");
        eprintln!("Register Dump:");
        eprintln!("PC : 0x{:08x}", self.pc);
        for n in 0..32u8 {
            let value = self.x(n).expect("indices below 32 are valid");
            eprint!("x{n:<2}: 0x{value:08x} ");
            if (n + 1) % 4 == 0 {
                eprintln!();
            }
        }
        eprintln!("================================================================");
    }
}

#[derive(Error, Debug)]
pub enum Trap {
    #[error("instruction decode failed: {0}")]
    DecodeFailed(DecodeError),
    #[error("instruction execution failed: {0}")]
    ExecutionFailed(ExecutionError),
}

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("instruction address misaligned (target 0x{0:08x})")]
    InstructionAddressMisaligned(u32),
    #[error("register access error: {0}")]
    RegisterError(RegisterError),
    #[error("memory access error: {0}")]
    MemoryError(MemoryError),
    #[error("syscall failed: {0}")]
    SyscallError(SyscallError),
}

impl From<RegisterError> for ExecutionError {
    fn from(e: RegisterError) -> ExecutionError {
        ExecutionError::RegisterError(e)
    }
}

impl From<MemoryError> for ExecutionError {
    fn from(e: MemoryError) -> ExecutionError {
        ExecutionError::MemoryError(e)
    }
}

impl From<SyscallError> for ExecutionError {
    fn from(e: SyscallError) -> ExecutionError {
        ExecutionError::SyscallError(e)
    }
}

impl From<DecodeError> for Trap {
    fn from(d: DecodeError) -> Trap {
        Trap::DecodeFailed(d)
    }
}

impl From<ExecutionError> for Trap {
    fn from(e: ExecutionError) -> Trap {
        Trap::ExecutionFailed(e)
    }
}
