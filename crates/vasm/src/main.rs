use std::process::ExitCode;
use std::thread;

use clap::Parser;
use log::error;

mod cli;
mod commands;
mod error;
mod logger;
mod report;

use cli::Cli;

/// The assembler keeps its tables inline, which outgrows the default main
/// stack with the large memory preset.
const WORKER_STACK: usize = 64 << 20;

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = logger::init(cli.verbose) {
        eprintln!("logger: {err}");
    }

    let worker = thread::Builder::new()
        .name("vasm".into())
        .stack_size(WORKER_STACK)
        .spawn(move || commands::dispatch(&cli.command, cli.memory));
    let result = match worker {
        Ok(handle) => handle.join(),
        Err(err) => {
            report::error_line(None, &format!("could not start worker thread: {err}"));
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(err)) => {
            report::error_line(None, &err.to_string());
            ExitCode::FAILURE
        }
        Err(_) => {
            error!("worker thread panicked");
            ExitCode::FAILURE
        }
    }
}
