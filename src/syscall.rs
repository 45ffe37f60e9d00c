//! Linux-style syscall emulation
//!
//! The guest requests a service with ecall, passing the syscall
//! number in a7 and up to three arguments in a0-a2; the result
//! comes back in a0. Only the small set of calls a statically
//! linked program needs to do console I/O, manage its heap, and
//! terminate is provided. read and write forward the guest's file
//! descriptor to the host unchanged and operate directly on the
//! mapped guest byte range, so there is no intermediate copy; a
//! buffer that does not fit in guest memory makes the call return
//! -1 without stopping the machine, which is the only recoverable
//! fault in the system. Unknown syscall numbers are fatal.

use std::fs::File;
use std::io::{self, Read, Write};
use std::mem::ManuallyDrop;
use std::os::fd::{FromRawFd, RawFd};

use thiserror::Error;

use crate::hart::registers::RegisterError;
use crate::hart::Hart;
use crate::utils::{to_signed, to_unsigned};

pub const SYS_READ: u32 = 63;
pub const SYS_WRITE: u32 = 64;
pub const SYS_EXIT: u32 = 93;
pub const SYS_BRK: u32 = 214;

// Argument and result registers of the syscall ABI
const A0: u8 = 10;
const A1: u8 = 11;
const A2: u8 = 12;
const A7: u8 = 17;
const SP: u8 = 2;

/// The guest may not move the break closer to the stack pointer
/// than this
const BRK_STACK_GUARD: u32 = 4096;

#[derive(Error, Debug)]
pub enum SyscallError {
    #[error("unknown syscall number {0}")]
    Unknown(u32),
    #[error("register access error: {0}")]
    RegisterError(RegisterError),
}

impl From<RegisterError> for SyscallError {
    fn from(e: RegisterError) -> SyscallError {
        SyscallError::RegisterError(e)
    }
}

/// Dispatch the syscall selected by a7. The caller has already
/// staged next_pc past the ecall, so a non-exit call resumes at
/// the following instruction.
pub fn handle_ecall(hart: &mut Hart) -> Result<(), SyscallError> {
    let number = hart.x(A7)?;
    log::debug!("ecall {number} at pc=0x{:08x}", hart.pc);
    match number {
        SYS_READ => sys_read(hart),
        SYS_WRITE => sys_write(hart),
        SYS_EXIT => sys_exit(hart),
        SYS_BRK => sys_brk(hart),
        other => Err(SyscallError::Unknown(other)),
    }
}

/// Borrow the host file descriptor named by the guest for the
/// duration of one syscall. The descriptor is owned by the host
/// environment, not by us, so the File must never be dropped.
#[allow(unsafe_code)]
fn borrow_fd(fd: u32) -> ManuallyDrop<File> {
    // SAFETY: the File is wrapped in ManuallyDrop and never
    // dropped, so the borrowed descriptor is not closed. A number
    // that names no open descriptor makes the host read or write
    // fail with EBADF, which reaches the guest as -1.
    ManuallyDrop::new(unsafe { File::from_raw_fd(fd as RawFd) })
}

fn host_read(fd: u32, buf: &mut [u8]) -> io::Result<usize> {
    let mut file = borrow_fd(fd);
    file.read(buf)
}

fn host_write(fd: u32, buf: &[u8]) -> io::Result<usize> {
    let mut file = borrow_fd(fd);
    file.write(buf)
}

/// read(fd, buf, count): host read directly into the mapped guest
/// range. Returns the number of bytes read, or -1 for a buffer
/// outside guest memory or a host error.
fn sys_read(hart: &mut Hart) -> Result<(), SyscallError> {
    let fd = hart.x(A0)?;
    let buf = hart.x(A1)?;
    let count = hart.x(A2)?;
    let result = match hart.memory.slice_mut(buf, count) {
        Ok(bytes) => match host_read(fd, bytes) {
            Ok(count) => count as u32,
            Err(e) => {
                log::debug!("read syscall failed: {e}");
                to_unsigned(-1)
            }
        },
        Err(e) => {
            log::debug!("read syscall buffer rejected: {e}");
            to_unsigned(-1)
        }
    };
    hart.set_x(A0, result)?;
    Ok(())
}

/// write(fd, buf, count): host write directly from the mapped
/// guest range. Returns the number of bytes written, or -1 for a
/// buffer outside guest memory or a host error.
fn sys_write(hart: &mut Hart) -> Result<(), SyscallError> {
    let fd = hart.x(A0)?;
    let buf = hart.x(A1)?;
    let count = hart.x(A2)?;
    let result = match hart.memory.slice(buf, count) {
        Ok(bytes) => match host_write(fd, bytes) {
            Ok(count) => count as u32,
            Err(e) => {
                log::debug!("write syscall failed: {e}");
                to_unsigned(-1)
            }
        },
        Err(e) => {
            log::debug!("write syscall buffer rejected: {e}");
            to_unsigned(-1)
        }
    };
    hart.set_x(A0, result)?;
    Ok(())
}

/// exit(status): record the exit status and halt. The pc is left
/// pointing at the ecall.
fn sys_exit(hart: &mut Hart) -> Result<(), SyscallError> {
    hart.exit_code = to_signed(hart.x(A0)?);
    hart.halt = true;
    Ok(())
}

/// brk(addr): move the program break. addr = 0 queries the current
/// break; an address outside guest memory, or too close to the
/// stack pointer, leaves the break unchanged. The (possibly
/// unchanged) break is returned in a0.
fn sys_brk(hart: &mut Hart) -> Result<(), SyscallError> {
    let new_break = hart.x(A0)?;
    let base = hart.memory.base();
    let sp = hart.x(SP)?;
    let in_range = new_break >= base && new_break - base <= hart.memory.size();
    if new_break != 0 && in_range && new_break < sp.saturating_sub(BRK_STACK_GUARD) {
        hart.program_break = new_break;
    }
    hart.set_x(A0, hart.program_break)?;
    Ok(())
}
