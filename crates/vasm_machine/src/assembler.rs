//! Two pass assembler for the 4 byte instruction set.
//!
//! Pass one runs as lines are added: words are classified and checked
//! against the opcode signatures, labels are bound to the address of the
//! next instruction. Pass two runs in `finish`: branch targets are resolved
//! to offsets, each generic JMP/CALL gets the narrowest encoding that holds
//! its offset, and the image is written. Every problem found along the way
//! is collected so a single run reports all of them.

use core::fmt;

use heapless::Vec;
use log::{debug, trace};
use thiserror_no_std::Error;

use crate::ProgramDescriptor;
use crate::builder::{ImageBuilder, ImageBuilderError};
use crate::isa::{INSTRUCTION_SIZE, OffsetWidth, Opcode, OperandKind, is_reserved_word};

pub mod encoder;
pub mod lexer;

use encoder::{EncodeError, MAX_OPERANDS, encode};
use lexer::{Name, Token, TokenKind, check_characters, classify, is_label_name, to_name, truncated_name};

/// Mnemonic, operands and the line marker.
const MAX_TOKENS: usize = MAX_OPERANDS + 2;
const MAX_WORDS: usize = MAX_OPERANDS + 1;
pub const NAME_CAP: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblerError {
    #[error("{0}")]
    Kind(AssemblerErrorKind),
    #[error("line {line}: {kind}")]
    WithLine { line: u32, kind: AssemblerErrorKind },
}

impl AssemblerError {
    fn with_line(self, line: u32) -> Self {
        match self {
            AssemblerError::WithLine { .. } => self,
            AssemblerError::Kind(kind) => AssemblerError::WithLine { line, kind },
        }
    }

    /// One based source line, when the error belongs to one.
    pub fn line_number(&self) -> Option<u32> {
        match self {
            Self::Kind(_) => None,
            Self::WithLine { line, .. } => Some(*line),
        }
    }

    pub fn error_kind(&self) -> &AssemblerErrorKind {
        match self {
            Self::Kind(kind) => kind,
            Self::WithLine { kind, .. } => kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblerErrorKind {
    #[error("invalid character `{character}` in `{word}`")]
    InvalidCharacter { word: Name, character: char },
    #[error("unrecognized token `{0}`")]
    UnrecognizedToken(Name),
    #[error("immediate `{0}` is too big for its operand")]
    ImmediateTooBig(Name),
    #[error("`{0}` is too long")]
    NameTooLong(Name),
    #[error("syntax error: expected an instruction or a label, found `{0}`")]
    UnknownInstruction(Name),
    #[error("wrong number of arguments: {mnemonic} takes {expected}, found {found}")]
    WrongArgumentCount {
        mnemonic: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("syntax error: argument {position} of {mnemonic} must be a {expected}")]
    OperandMismatch {
        mnemonic: &'static str,
        position: usize,
        expected: OperandKind,
    },
    #[error("label `{0}` must be alone on its line")]
    LabelWithOperands(Name),
    #[error("`{0}` is not a valid label name")]
    InvalidLabelName(Name),
    #[error("`{0}` is a reserved word and can not be a label")]
    ReservedLabel(Name),
    #[error("duplicate label `{0}`")]
    DuplicateLabel(Name),
    #[error("undefined label `{0}`")]
    UndefinedLabel(Name),
    #[error("jump to `{label}` is too far ({offset} bytes)")]
    JumpTooFar { label: Name, offset: i64 },
    #[error("too many instructions")]
    MaxInstructionsExceeded,
    #[error("instruction holds more tokens than fit in one word")]
    TokenOverflow,
    #[error("too many labels")]
    MaxLabelsExceeded,
    #[error("line number overflow")]
    LineNumberOverflow,
    #[error("address overflow")]
    CursorOverflow,
    #[error("encoding failed: {0}")]
    Encode(EncodeError),
    #[error("image: {0}")]
    Builder(ImageBuilderError),
}

impl From<AssemblerErrorKind> for AssemblerError {
    fn from(kind: AssemblerErrorKind) -> Self {
        AssemblerError::Kind(kind)
    }
}

impl From<ImageBuilderError> for AssemblerError {
    fn from(err: ImageBuilderError) -> Self {
        AssemblerError::Kind(AssemblerErrorKind::Builder(err))
    }
}

impl From<EncodeError> for AssemblerError {
    fn from(err: EncodeError) -> Self {
        AssemblerError::Kind(AssemblerErrorKind::Encode(err))
    }
}

/// Errors collected over a whole assembly run. Keeps the first `CAP` and
/// counts the rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostics<const CAP: usize> {
    errors: Vec<AssemblerError, CAP>,
    omitted: usize,
}

impl<const CAP: usize> Diagnostics<CAP> {
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            omitted: 0,
        }
    }

    pub fn push(&mut self, error: AssemblerError) {
        if self.errors.push(error).is_err() {
            self.omitted = self.omitted.saturating_add(1);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &AssemblerError> {
        self.errors.iter()
    }

    /// Total number of errors, including the omitted ones.
    pub fn len(&self) -> usize {
        self.errors.len().saturating_add(self.omitted)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn omitted(&self) -> usize {
        self.omitted
    }
}

impl<const CAP: usize> Default for Diagnostics<CAP> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const CAP: usize> fmt::Display for Diagnostics<CAP> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for error in self.iter() {
            writeln!(f, "{error}")?;
        }
        if self.omitted > 0 {
            writeln!(f, "... and {} more", self.omitted)?;
        }
        Ok(())
    }
}

#[derive(Clone)]
struct Label {
    name: Name,
    address: u32,
}

/// An instruction as written, before encoding.
#[derive(Debug, Clone)]
pub struct SourceInstruction {
    tokens: Vec<Token, MAX_TOKENS>,
    address: u32,
}

impl SourceInstruction {
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn opcode(&self) -> Option<Opcode> {
        let head = self.tokens.first()?;
        u8::try_from(head.value).ok().and_then(|code| Opcode::try_from(code).ok())
    }

    /// One based source line from the trailing line marker.
    pub fn line(&self) -> u32 {
        self.tokens
            .last()
            .and_then(|marker| u32::try_from(marker.value).ok())
            .map_or(0, |index| index.saturating_add(1))
    }

    fn operands(&self) -> impl Iterator<Item = &Token> {
        self.tokens
            .iter()
            .filter(|token| matches!(token.kind, TokenKind::Operand(_)))
    }
}

pub struct Assembler<'a, const INSTRUCTION_CAP: usize, const LABEL_CAP: usize, const DIAGNOSTIC_CAP: usize> {
    builder: ImageBuilder<'a>,
    instructions: Vec<SourceInstruction, INSTRUCTION_CAP>,
    labels: Vec<Label, LABEL_CAP>,
    diagnostics: Diagnostics<DIAGNOSTIC_CAP>,
    cursor: u32,
    line_number: u32,
}

impl<'a, const INSTRUCTION_CAP: usize, const LABEL_CAP: usize, const DIAGNOSTIC_CAP: usize>
    Assembler<'a, INSTRUCTION_CAP, LABEL_CAP, DIAGNOSTIC_CAP>
{
    pub fn new(builder: ImageBuilder<'a>) -> Self {
        Self {
            builder,
            instructions: Vec::new(),
            labels: Vec::new(),
            diagnostics: Diagnostics::new(),
            cursor: 0,
            line_number: 0,
        }
    }

    /// Feeds every line of `source`.
    pub fn add_source(&mut self, source: &str) {
        for line in source.lines() {
            self.add_line(line);
        }
    }

    /// Runs the first pass over one source line. Problems are recorded and
    /// returned from [`Assembler::finish`].
    pub fn add_line(&mut self, line: &str) {
        let Some(line_number) = self.line_number.checked_add(1) else {
            self.diagnostics
                .push(AssemblerErrorKind::LineNumberOverflow.into());
            return;
        };
        self.line_number = line_number;

        let Some(first) = line.split_whitespace().next() else {
            return;
        };

        if first.ends_with(':') {
            if let Err(err) = self.add_label(line) {
                self.diagnostics.push(err.with_line(line_number));
            }
            return;
        }

        match self.parse_instruction(line) {
            Ok(instruction) => {
                if self.instructions.push(instruction).is_err() {
                    self.diagnostics.push(
                        AssemblerError::from(AssemblerErrorKind::MaxInstructionsExceeded)
                            .with_line(line_number),
                    );
                }
            }
            Err(errors) => {
                for err in errors {
                    self.diagnostics.push(err.with_line(line_number));
                }
            }
        }

        // Bad lines still take their slot so later addresses do not move.
        match self.cursor.checked_add(INSTRUCTION_SIZE as u32) {
            Some(cursor) => self.cursor = cursor,
            None => self.diagnostics.push(
                AssemblerError::from(AssemblerErrorKind::CursorOverflow).with_line(line_number),
            ),
        }
    }

    /// Instructions that passed the first pass.
    pub fn instructions(&self) -> &[SourceInstruction] {
        &self.instructions
    }

    /// Resolves labels and writes the image. Nothing is written unless the
    /// whole program is free of errors.
    pub fn finish(mut self) -> Result<ProgramDescriptor, Diagnostics<DIAGNOSTIC_CAP>> {
        debug!(
            "pass 1: {} instructions, {} labels, {} errors",
            self.instructions.len(),
            self.labels.len(),
            self.diagnostics.len()
        );
        self.resolve_branches();
        if !self.diagnostics.is_empty() {
            return Err(self.diagnostics);
        }

        for instruction in self.instructions.iter() {
            if let Err(err) = emit(&mut self.builder, instruction) {
                self.diagnostics.push(err.with_line(instruction.line()));
            }
        }
        if !self.diagnostics.is_empty() {
            return Err(self.diagnostics);
        }

        let descriptor = self.builder.finish_image();
        debug!(
            "pass 2: wrote {} instructions, {} bytes",
            descriptor.instructions, descriptor.length
        );
        Ok(descriptor)
    }

    fn add_label(&mut self, line: &str) -> Result<(), AssemblerError> {
        let mut words = line.split_whitespace();
        let word = words.next().unwrap_or_default();
        check_characters(word)?;
        let name = word.strip_suffix(':').unwrap_or(word);
        if words.next().is_some() {
            return Err(AssemblerErrorKind::LabelWithOperands(truncated_name(name)).into());
        }
        if !is_label_name(name) {
            return Err(AssemblerErrorKind::InvalidLabelName(truncated_name(word)).into());
        }
        let name = to_name(name)?;
        if is_reserved_word(&name) {
            return Err(AssemblerErrorKind::ReservedLabel(name).into());
        }
        if self.labels.iter().any(|label| label.name == name) {
            return Err(AssemblerErrorKind::DuplicateLabel(name).into());
        }
        trace!("label {} at {:#x}", name, self.cursor);
        self.labels
            .push(Label {
                name,
                address: self.cursor,
            })
            .map_err(|_| AssemblerErrorKind::MaxLabelsExceeded)?;
        Ok(())
    }

    fn parse_instruction(
        &self,
        line: &str,
    ) -> Result<SourceInstruction, Vec<AssemblerError, MAX_WORDS>> {
        let mut errors: Vec<AssemblerError, MAX_WORDS> = Vec::new();
        let mut words = line.split_whitespace();
        let head = words.next().unwrap_or_default();

        let Some(opcode) = Opcode::from_mnemonic(head) else {
            let kind = match check_characters(head) {
                Err(kind) => kind,
                Ok(()) => AssemblerErrorKind::UnknownInstruction(truncated_name(head)),
            };
            let _ = errors.push(kind.into());
            return Err(errors);
        };
        let descriptor = opcode.descriptor();
        let signature = descriptor.signature;

        let mut tokens: Vec<Token, MAX_TOKENS> = Vec::new();
        let mut classified = match Token::new(TokenKind::Mnemonic, head, i32::from(u8::from(opcode))) {
            Ok(token) => push_token(&mut tokens, token, &mut errors),
            Err(kind) => {
                let _ = errors.push(kind.into());
                false
            }
        };

        let mut previous = head;
        let mut found = 0usize;
        for (position, word) in words.enumerate() {
            found = position.saturating_add(1);
            if position >= signature.len() {
                continue;
            }
            let expected = signature.get(position).copied();
            match classify(word, Some(previous), expected, opcode.sign_extends_immediate()) {
                Ok(token) => classified &= push_token(&mut tokens, token, &mut errors),
                Err(kind) => {
                    let _ = errors.push(kind.into());
                    classified = false;
                }
            }
            previous = word;
        }

        if found != signature.len() {
            let _ = errors.push(
                AssemblerErrorKind::WrongArgumentCount {
                    mnemonic: descriptor.mnemonic,
                    expected: signature.len(),
                    found,
                }
                .into(),
            );
            return Err(errors);
        }
        if !classified {
            return Err(errors);
        }

        for (position, (token, expected)) in tokens.iter().skip(1).zip(signature).enumerate() {
            if token.kind != TokenKind::Operand(*expected) {
                let _ = errors.push(
                    AssemblerErrorKind::OperandMismatch {
                        mnemonic: descriptor.mnemonic,
                        position: position.saturating_add(1),
                        expected: *expected,
                    }
                    .into(),
                );
            }
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        let line_index = self.line_number.saturating_sub(1);
        if tokens.push(Token::line_marker(line_index)).is_err() {
            let _ = errors.push(AssemblerErrorKind::TokenOverflow.into());
            return Err(errors);
        }
        Ok(SourceInstruction {
            tokens,
            address: self.cursor,
        })
    }

    /// Rewrites every generic branch into its sized form with the offset
    /// from the following instruction to the label.
    fn resolve_branches(&mut self) {
        for instruction in self.instructions.iter_mut() {
            let Some(opcode) = instruction.opcode() else {
                continue;
            };
            if !opcode.is_generic_branch() {
                continue;
            }
            let line = instruction.line();
            let next = i64::from(instruction.address).saturating_add(INSTRUCTION_SIZE as i64);
            let Some(target) = instruction.tokens.get_mut(1) else {
                continue;
            };
            let Some(label) = self.labels.iter().find(|label| label.name == target.text) else {
                self.diagnostics.push(
                    AssemblerError::from(AssemblerErrorKind::UndefinedLabel(target.text.clone()))
                        .with_line(line),
                );
                continue;
            };
            let offset = i64::from(label.address).saturating_sub(next);
            let sized = OffsetWidth::for_offset(offset)
                .and_then(|width| opcode.with_offset_width(width))
                .zip(i32::try_from(offset).ok());
            let Some((sized, offset)) = sized else {
                self.diagnostics.push(
                    AssemblerError::from(AssemblerErrorKind::JumpTooFar {
                        label: target.text.clone(),
                        offset,
                    })
                    .with_line(line),
                );
                continue;
            };
            trace!("{} {} -> {} {:+}", opcode, target.text, sized, offset);
            target.value = offset;
            if let Some(head) = instruction.tokens.first_mut() {
                head.value = i32::from(u8::from(sized));
            }
        }
    }
}

fn push_token(
    tokens: &mut Vec<Token, MAX_TOKENS>,
    token: Token,
    errors: &mut Vec<AssemblerError, MAX_WORDS>,
) -> bool {
    if tokens.push(token).is_ok() {
        return true;
    }
    let _ = errors.push(AssemblerErrorKind::TokenOverflow.into());
    false
}

fn emit(builder: &mut ImageBuilder<'_>, instruction: &SourceInstruction) -> Result<(), AssemblerError> {
    let opcode = instruction
        .opcode()
        .ok_or(AssemblerErrorKind::UnknownInstruction(Name::new()))?;
    let mut operands: Vec<i32, MAX_OPERANDS> = Vec::new();
    for token in instruction.operands() {
        operands
            .push(token.value)
            .map_err(|_| AssemblerErrorKind::TokenOverflow)?;
    }
    let word = encode(opcode, &operands)?;
    let address = builder.add_instruction(word)?;
    trace!("{:#06x}: {:02x?} {}", address, word, opcode);
    Ok(())
}

/// Assembles a whole source text into `image`.
pub fn assemble<const INSTRUCTION_CAP: usize, const LABEL_CAP: usize, const DIAGNOSTIC_CAP: usize>(
    source: &str,
    image: &mut [u8],
) -> Result<ProgramDescriptor, Diagnostics<DIAGNOSTIC_CAP>> {
    let mut assembler: Assembler<'_, INSTRUCTION_CAP, LABEL_CAP, DIAGNOSTIC_CAP> =
        Assembler::new(ImageBuilder::new(image));
    assembler.add_source(source);
    assembler.finish()
}
