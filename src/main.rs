use std::path::PathBuf;
use std::process;

use clap::Parser;

use rv32emu::elf_utils::load_elf;
use rv32emu::hart::Hart;

/// Emulate a statically linked 32-bit RISC-V (RV32IMC) user-mode
/// program
///
/// The program is loaded from a little-endian ELF executable and
/// run until it exits; its exit status becomes the process exit
/// status. Loader, decode, memory and syscall faults exit with
/// status 1 and a register dump on stderr.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about)]
struct Args {
    /// Path to the input executable file
    input: PathBuf,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let mut hart = Hart::new();
    if let Err(e) = load_elf(&mut hart, &args.input) {
        eprintln!("Error: {e}");
        process::exit(1);
    }

    while !hart.halt {
        if let Err(trap) = hart.step() {
            eprintln!("Error: {trap} (pc=0x{:08x})", hart.pc);
            hart.exit_code = 1;
            break;
        }
    }

    if hart.exit_code != 0 {
        hart.dump_registers();
    }

    process::exit(hart.exit_code);
}
