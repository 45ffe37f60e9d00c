//! ELF executable loading
//!
//! Reads a statically linked 32-bit little-endian RISC-V ET_EXEC
//! file and populates guest memory from its PT_LOAD segments.
//! Section headers are never consulted. The lowest loaded virtual
//! address becomes the base of the guest address window, the stack
//! pointer is re-initialised to the top of guest memory, and the
//! pc is set to the entry point.

use std::path::Path;

use elf::abi::{EM_RISCV, ET_EXEC, PT_LOAD};
use elf::endian::AnyEndian;
use elf::file::Class;
use elf::ElfBytes;
use thiserror::Error;

use crate::hart::memory::MemoryError;
use crate::hart::Hart;

/// Stack pointer register (x2)
const SP: u8 = 2;

#[derive(Error, Debug)]
pub enum ElfError {
    #[error("failed to read executable: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse ELF: {0}")]
    Parse(#[from] elf::ParseError),
    #[error("not a 32-bit ELF file")]
    NotClass32,
    #[error("not a little-endian ELF file")]
    NotLittleEndian,
    #[error("not an executable ELF file (e_type={0})")]
    NotExecutable(u16),
    #[error("not a RISC-V ELF file (e_machine={0})")]
    NotRiscv(u16),
    #[error("invalid ELF version (e_version={0})")]
    BadVersion(u32),
    #[error("no loadable segments")]
    NoLoadableSegments,
    #[error("segment load address out of bounds (0x{vaddr:08x} + {memsz}, base: 0x{base:08x})")]
    SegmentOutOfBounds { vaddr: u32, memsz: u32, base: u32 },
    #[error("memory access error: {0}")]
    Memory(#[from] MemoryError),
}

/// Read an ELF executable from disk and load it into the hart
pub fn load_elf(hart: &mut Hart, path: &Path) -> Result<(), ElfError> {
    let file_data = std::fs::read(path)?;
    load_elf_bytes(hart, &file_data)
}

/// Load an in-memory ELF image into the hart
pub fn load_elf_bytes(hart: &mut Hart, file_data: &[u8]) -> Result<(), ElfError> {
    let file = ElfBytes::<AnyEndian>::minimal_parse(file_data)?;

    if file.ehdr.class != Class::ELF32 {
        return Err(ElfError::NotClass32);
    }
    if !matches!(file.ehdr.endianness, AnyEndian::Little) {
        return Err(ElfError::NotLittleEndian);
    }
    if file.ehdr.e_type != ET_EXEC {
        return Err(ElfError::NotExecutable(file.ehdr.e_type));
    }
    if file.ehdr.e_machine != EM_RISCV {
        return Err(ElfError::NotRiscv(file.ehdr.e_machine));
    }
    if file.ehdr.version != 1 {
        return Err(ElfError::BadVersion(file.ehdr.version));
    }

    let segments = file.segments().ok_or(ElfError::NoLoadableSegments)?;

    // The lowest loaded virtual address becomes the base of the
    // guest address window
    let memory_base = segments
        .iter()
        .filter(|phdr| phdr.p_type == PT_LOAD)
        .map(|phdr| phdr.p_vaddr as u32)
        .min()
        .ok_or(ElfError::NoLoadableSegments)?;
    hart.memory.set_base(memory_base);

    let mut program_break = memory_base;
    for phdr in segments.iter().filter(|phdr| phdr.p_type == PT_LOAD) {
        let vaddr = phdr.p_vaddr as u32;
        let memsz = phdr.p_memsz as u32;
        if u64::from(vaddr - memory_base) + u64::from(memsz) > u64::from(hart.memory.size()) {
            return Err(ElfError::SegmentOutOfBounds {
                vaddr,
                memsz,
                base: memory_base,
            });
        }
        let data = file.segment_data(&phdr)?;
        let filesz = data.len() as u32;
        log::info!("loading segment: vaddr=0x{vaddr:08x} filesz={filesz} memsz={memsz}");
        hart.memory.slice_mut(vaddr, filesz)?.copy_from_slice(data);
        if memsz > filesz {
            hart.memory.slice_mut(vaddr + filesz, memsz - filesz)?.fill(0);
        }
        program_break = program_break.max(vaddr.wrapping_add(memsz));
    }

    hart.program_break = program_break;
    hart.set_x(SP, memory_base.wrapping_add(hart.memory.size()))
        .expect("stack pointer index is valid");
    hart.pc = file.ehdr.e_entry as u32;
    log::info!(
        "entry pc=0x{:08x}, stack pointer=0x{:08x}, break=0x{program_break:08x}",
        hart.pc,
        hart.x(SP).expect("stack pointer index is valid"),
    );
    Ok(())
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::encode::*;

    /// Assemble a single-segment ELF32 image: header, one PT_LOAD
    /// program header, then the code bytes at offset 84
    fn minimal_elf(entry: u32, vaddr: u32, code: &[u8], memsz: u32) -> Vec<u8> {
        let mut bytes = vec![0x7f, b'E', b'L', b'F', 1, 1, 1, 0];
        bytes.extend([0u8; 8]);
        bytes.extend(2u16.to_le_bytes()); // ET_EXEC
        bytes.extend(243u16.to_le_bytes()); // EM_RISCV
        bytes.extend(1u32.to_le_bytes()); // version
        bytes.extend(entry.to_le_bytes());
        bytes.extend(52u32.to_le_bytes()); // e_phoff
        bytes.extend(0u32.to_le_bytes()); // e_shoff
        bytes.extend(0u32.to_le_bytes()); // e_flags
        bytes.extend(52u16.to_le_bytes()); // e_ehsize
        bytes.extend(32u16.to_le_bytes()); // e_phentsize
        bytes.extend(1u16.to_le_bytes()); // e_phnum
        bytes.extend(0u16.to_le_bytes()); // e_shentsize
        bytes.extend(0u16.to_le_bytes()); // e_shnum
        bytes.extend(0u16.to_le_bytes()); // e_shstrndx
        bytes.extend(1u32.to_le_bytes()); // PT_LOAD
        bytes.extend(84u32.to_le_bytes()); // p_offset
        bytes.extend(vaddr.to_le_bytes());
        bytes.extend(vaddr.to_le_bytes()); // p_paddr
        bytes.extend((code.len() as u32).to_le_bytes()); // p_filesz
        bytes.extend(memsz.to_le_bytes());
        bytes.extend(5u32.to_le_bytes()); // p_flags (R + X)
        bytes.extend(4u32.to_le_bytes()); // p_align
        bytes.extend_from_slice(code);
        bytes
    }

    #[test]
    fn check_load_populates_machine() {
        let code: Vec<u8> = [0xdead_beefu32, 0x0bad_f00d]
            .iter()
            .flat_map(|word| word.to_le_bytes())
            .collect();
        let image = minimal_elf(0x10000, 0x10000, &code, 16);
        let mut hart = Hart::new();
        load_elf_bytes(&mut hart, &image).unwrap();
        assert_eq!(hart.pc, 0x10000);
        assert_eq!(hart.memory.base(), 0x10000);
        assert_eq!(hart.memory.read_u32(0x10000).unwrap(), 0xdead_beef);
        assert_eq!(hart.memory.read_u32(0x10004).unwrap(), 0x0bad_f00d);
        // BSS tail beyond the file contents is zeroed
        assert_eq!(hart.memory.read_u32(0x10008).unwrap(), 0);
        assert_eq!(
            hart.x(2).unwrap(),
            0x10000 + hart.memory.size()
        );
        assert_eq!(hart.program_break, 0x10010);
    }

    #[test]
    fn check_load_then_run_to_exit() -> Result<(), &'static str> {
        let program = [
            addi!(x10, x0, 7),
            addi!(x17, x0, 93),
            itype(0, 0, 0b000, 0, OP_SYSTEM), // ecall
        ];
        let code: Vec<u8> = program
            .iter()
            .flat_map(|word| word.to_le_bytes())
            .collect();
        let image = minimal_elf(0x10000, 0x10000, &code, code.len() as u32);
        let mut hart = Hart::new();
        load_elf_bytes(&mut hart, &image).unwrap();
        while !hart.halt {
            hart.step().unwrap();
        }
        assert_eq!(hart.exit_code, 7);
        Ok(())
    }

    #[test]
    fn check_bad_magic_rejected() {
        let mut image = minimal_elf(0x10000, 0x10000, &[0; 4], 4);
        image[0] = 0x7e;
        let mut hart = Hart::new();
        assert!(matches!(
            load_elf_bytes(&mut hart, &image),
            Err(ElfError::Parse(_))
        ));
    }

    #[test]
    fn check_wrong_machine_rejected() {
        let mut image = minimal_elf(0x10000, 0x10000, &[0; 4], 4);
        // e_machine lives at offset 18
        image[18] = 40;
        let mut hart = Hart::new();
        assert!(matches!(
            load_elf_bytes(&mut hart, &image),
            Err(ElfError::NotRiscv(40))
        ));
    }

    #[test]
    fn check_non_executable_rejected() {
        let mut image = minimal_elf(0x10000, 0x10000, &[0; 4], 4);
        // e_type lives at offset 16; 3 = ET_DYN
        image[16] = 3;
        let mut hart = Hart::new();
        assert!(matches!(
            load_elf_bytes(&mut hart, &image),
            Err(ElfError::NotExecutable(3))
        ));
    }

    #[test]
    fn check_oversized_segment_rejected() {
        let image = minimal_elf(0x10000, 0x10000, &[0; 4], 0x2000_0000);
        let mut hart = Hart::new();
        assert!(matches!(
            load_elf_bytes(&mut hart, &image),
            Err(ElfError::SegmentOutOfBounds { .. })
        ));
    }
}
