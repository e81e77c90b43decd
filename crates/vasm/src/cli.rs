//! Command line arguments.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const LONG_ABOUT: &str = "Assembler and virtual machine for the VASM instruction set.

Source files use the .vasm extension. Every instruction assembles to one
4 byte word; `emit` writes those words as a raw .vbc image which `load`
runs directly.";

#[derive(Parser, Debug)]
#[command(
    name = "vasm",
    version = VERSION,
    about = "Assemble and run VASM programs",
    long_about = LONG_ABOUT
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        global = true,
        long_help = "Raise log verbosity: -v info, -vv debug, -vvv trace of every executed instruction."
    )]
    pub verbose: u8,
    #[arg(
        long = "memory",
        value_enum,
        default_value_t = MemoryPreset::Standard,
        global = true,
        long_help = "Machine memory size. A quarter of it holds code, the top quarter is the stack."
    )]
    pub memory: MemoryPreset,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Assemble a source file and execute it.
    Run(RunArgs),
    /// Assemble a source file and report diagnostics.
    Check(CheckArgs),
    /// Assemble a source file into a raw image.
    Emit(EmitArgs),
    /// Execute a raw image written by `emit`.
    Load(LoadArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[arg(value_name = "FILE.vasm")]
    pub file: PathBuf,
    #[arg(
        short = 'd',
        long = "debug",
        action = ArgAction::SetTrue,
        long_help = "Print the encoded program, timings, the step count and the final registers."
    )]
    pub debug: bool,
    #[arg(
        short = 't',
        long = "time",
        value_name = "N",
        default_value_t = 1,
        value_parser = clap::value_parser!(u32).range(1..),
        long_help = "Reset and run the program N times, then report total and average time."
    )]
    pub time: u32,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    #[arg(value_name = "FILE.vasm")]
    pub file: PathBuf,
    #[arg(short = 'd', long = "debug", action = ArgAction::SetTrue)]
    pub debug: bool,
}

#[derive(Args, Debug)]
pub struct EmitArgs {
    #[arg(value_name = "FILE.vasm")]
    pub file: PathBuf,
    #[arg(value_name = "OUT.vbc")]
    pub output: PathBuf,
}

#[derive(Args, Debug)]
pub struct LoadArgs {
    #[arg(value_name = "FILE.vbc")]
    pub file: PathBuf,
    #[arg(short = 'd', long = "debug", action = ArgAction::SetTrue)]
    pub debug: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum MemoryPreset {
    /// 1 KiB
    Small,
    /// 16 KiB
    Standard,
    /// 64 KiB
    Large,
}

#[cfg(test)]
mod test;
