//! Subcommand implementations, monomorphized per memory preset.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::Path;
use std::time::{Duration, Instant};

use log::{debug, info};
use vasm_machine::assembler::assemble;
use vasm_machine::{DEFAULT_MEMORY_SIZE, Machine};

use crate::cli::{CheckArgs, Command, EmitArgs, LoadArgs, MemoryPreset, RunArgs};
use crate::error::CliError;
use crate::report;

const SMALL: usize = 1024;
const STANDARD: usize = DEFAULT_MEMORY_SIZE;
const LARGE: usize = 64 * 1024;

/// Diagnostics printed before the rest are summarized.
const DIAGNOSTIC_CAP: usize = 32;

pub fn dispatch(command: &Command, memory: MemoryPreset) -> Result<(), CliError> {
    // The code region is a quarter of memory, one instruction per 4 bytes.
    match memory {
        MemoryPreset::Small => execute::<SMALL, { SMALL / 16 }>(command),
        MemoryPreset::Standard => execute::<STANDARD, { STANDARD / 16 }>(command),
        MemoryPreset::Large => execute::<LARGE, { LARGE / 16 }>(command),
    }
}

fn execute<const MEMORY: usize, const CODE_CAP: usize>(command: &Command) -> Result<(), CliError> {
    match command {
        Command::Run(args) => run::<MEMORY, CODE_CAP>(args),
        Command::Check(args) => check::<CODE_CAP>(args),
        Command::Emit(args) => emit::<CODE_CAP>(args),
        Command::Load(args) => load::<MEMORY>(args),
    }
}

fn run<const MEMORY: usize, const CODE_CAP: usize>(args: &RunArgs) -> Result<(), CliError> {
    let started = Instant::now();
    let image = assemble_file::<CODE_CAP>(&args.file)?;
    let assembled = started.elapsed();
    if args.debug {
        print!("{}", report::listing(&image));
        println!("assembled {} bytes in {:?}", image.len(), assembled);
    }

    let mut machine: Machine<MEMORY> = Machine::new();
    machine.load(&image).map_err(|error| CliError::Image {
        path: args.file.display().to_string(),
        error,
    })?;
    execute_image(&mut machine, args.time, args.debug)
}

fn check<const CODE_CAP: usize>(args: &CheckArgs) -> Result<(), CliError> {
    let started = Instant::now();
    let image = assemble_file::<CODE_CAP>(&args.file)?;
    if args.debug {
        print!("{}", report::listing(&image));
        println!("assembled {} bytes in {:?}", image.len(), started.elapsed());
    }
    println!("{}: ok", args.file.display());
    Ok(())
}

fn emit<const CODE_CAP: usize>(args: &EmitArgs) -> Result<(), CliError> {
    let image = assemble_file::<CODE_CAP>(&args.file)?;
    fs::write(&args.output, &image).map_err(|cause| CliError::Write {
        path: args.output.display().to_string(),
        cause,
    })?;
    info!("wrote {} bytes to {}", image.len(), args.output.display());
    Ok(())
}

fn load<const MEMORY: usize>(args: &LoadArgs) -> Result<(), CliError> {
    let image = fs::read(&args.file).map_err(|cause| read_failed(&args.file, cause))?;
    if args.debug {
        print!("{}", report::listing(&image));
    }
    let mut machine: Machine<MEMORY> = Machine::new();
    machine.load(&image).map_err(|error| CliError::Image {
        path: args.file.display().to_string(),
        error,
    })?;
    execute_image(&mut machine, 1, args.debug)
}

/// Runs the loaded program `rounds` times, resetting in between, and
/// prints the final registers.
fn execute_image<const MEMORY: usize>(
    machine: &mut Machine<MEMORY>,
    rounds: u32,
    debug: bool,
) -> Result<(), CliError> {
    let started = Instant::now();
    for round in 0..rounds {
        if round > 0 {
            machine.reset();
        }
        machine.run().map_err(|error| CliError::Fault {
            pc: machine.pc(),
            error,
        })?;
    }
    let elapsed = started.elapsed();
    debug!("halted at pc {:#06x}", machine.pc());

    if debug {
        println!("executed {} steps in {:?}", machine.steps(), average(elapsed, rounds));
    }
    if rounds > 1 {
        println!(
            "{} runs in {:?}, average {:?}",
            rounds,
            elapsed,
            average(elapsed, rounds)
        );
    }
    print!("{}", report::registers(machine.registers()));
    Ok(())
}

fn average(total: Duration, rounds: u32) -> Duration {
    total.checked_div(rounds).unwrap_or(total)
}

fn assemble_file<const CODE_CAP: usize>(path: &Path) -> Result<Vec<u8>, CliError> {
    if path.extension().and_then(OsStr::to_str) != Some("vasm") {
        return Err(CliError::NotSource(path.display().to_string()));
    }
    let source = fs::read_to_string(path).map_err(|cause| read_failed(path, cause))?;

    let mut image = vec![0u8; CODE_CAP * 4];
    match assemble::<CODE_CAP, CODE_CAP, DIAGNOSTIC_CAP>(&source, &mut image) {
        Ok(descriptor) => {
            info!(
                "assembled {} instructions from {}",
                descriptor.instructions,
                path.display()
            );
            image.truncate(descriptor.length);
            Ok(image)
        }
        Err(diagnostics) => {
            report::diagnostics(path, &diagnostics);
            Err(CliError::Assembly {
                path: path.display().to_string(),
                count: diagnostics.len(),
            })
        }
    }
}

fn read_failed(path: &Path, cause: io::Error) -> CliError {
    CliError::Read {
        path: path.display().to_string(),
        cause,
    }
}
