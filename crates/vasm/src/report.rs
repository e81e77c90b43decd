//! Console output: diagnostics, listings and the register file.

use std::fmt::Write as _;
use std::io::Write;
use std::path::Path;

use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use vasm_machine::Word;
use vasm_machine::assembler::encoder::decode;
use vasm_machine::assembler::{AssemblerError, Diagnostics};
use vasm_machine::isa::INSTRUCTION_SIZE;

/// `<file>:<line>: error: <message>`, or without the line when the error
/// belongs to the whole program.
pub fn diagnostic_line(path: &Path, error: &AssemblerError) -> (String, String) {
    let location = match error.line_number() {
        Some(line) => format!("{}:{}:", path.display(), line),
        None => format!("{}:", path.display()),
    };
    (location, error.error_kind().to_string())
}

pub fn diagnostics<const CAP: usize>(path: &Path, diagnostics: &Diagnostics<CAP>) {
    for error in diagnostics.iter() {
        let (location, message) = diagnostic_line(path, error);
        error_line(Some(&location), &message);
    }
    if diagnostics.omitted() > 0 {
        eprintln!("... and {} more", diagnostics.omitted());
    }
}

pub fn error_line(location: Option<&str>, message: &str) {
    let mut stderr = StandardStream::stderr(ColorChoice::Auto);
    if let Some(location) = location {
        let _ = write!(stderr, "{location} ");
    }
    let _ = stderr.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true));
    let _ = write!(stderr, "error:");
    let _ = stderr.reset();
    let _ = writeln!(stderr, " {message}");
}

/// One line per instruction: address, raw bytes and disassembly.
pub fn listing(image: &[u8]) -> String {
    let mut out = String::new();
    for (index, chunk) in image.chunks_exact(INSTRUCTION_SIZE).enumerate() {
        let Ok(word) = <[u8; INSTRUCTION_SIZE]>::try_from(chunk) else {
            continue;
        };
        let address = index.saturating_mul(INSTRUCTION_SIZE);
        let [b0, b1, b2, b3] = word;
        let text = match decode(word) {
            Ok(decoded) => decoded.to_string(),
            Err(err) => format!("<{err}>"),
        };
        let _ = writeln!(out, "{address:04x}:  {b0:02x} {b1:02x} {b2:02x} {b3:02x}  {text}");
    }
    out
}

pub fn registers(registers: &[Word]) -> String {
    let mut out = String::new();
    for (index, value) in registers.iter().enumerate() {
        let name = format!("R{index}");
        let _ = writeln!(out, "{name:<3} = {value:#018x} ({})", *value as i64);
    }
    out
}
