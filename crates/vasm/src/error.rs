use std::io;

use thiserror_no_std::Error;
use vasm_machine::MachineError;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("`{0}` is not a .vasm source file")]
    NotSource(String),
    #[error("could not read `{path}`: {cause}")]
    Read { path: String, cause: io::Error },
    #[error("could not write `{path}`: {cause}")]
    Write { path: String, cause: io::Error },
    #[error("could not assemble `{path}` due to {count} previous errors")]
    Assembly { path: String, count: usize },
    #[error("`{path}` is not a valid image: {error}")]
    Image { path: String, error: MachineError },
    #[error("machine fault at pc {pc:#06x}: {error}")]
    Fault { pc: usize, error: MachineError },
}
