use super::*;
use crate::assembler::encoder::{EncodeError, encode};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageBuilderError {
    #[error("image buffer too small for instruction {0}")]
    BufferTooSmall(usize),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Writes a program image into a caller provided buffer.
///
/// Image is
/// [instruction 0][instruction 1]...
/// with every instruction taking exactly `INSTRUCTION_SIZE` bytes so the
/// address of instruction `n` is always `4 * n`.
pub struct ImageBuilder<'a> {
    buffer: &'a mut [u8],
    free: usize,
    instructions: usize,
}

impl<'a> ImageBuilder<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self {
            buffer,
            free: 0,
            instructions: 0,
        }
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.free
    }

    pub fn is_empty(&self) -> bool {
        self.free == 0
    }

    /// Appends one instruction and returns the byte address it landed at.
    pub fn add_instruction(&mut self, instruction: Instruction) -> Result<usize, ImageBuilderError> {
        let index = self.instructions;
        let address = self.free;
        let Some(end) = self.free.checked_add(INSTRUCTION_SIZE) else {
            return Err(ImageBuilderError::BufferTooSmall(index));
        };
        self.buffer
            .get_mut(self.free..end)
            .ok_or(ImageBuilderError::BufferTooSmall(index))?
            .copy_from_slice(&instruction);
        self.free = end;
        self.instructions = index
            .checked_add(1)
            .ok_or(ImageBuilderError::BufferTooSmall(index))?;
        Ok(address)
    }

    /// Encodes `opcode` with its operand values and appends it.
    pub fn add_op(
        &mut self,
        opcode: Opcode,
        operands: &[i32],
    ) -> Result<usize, ImageBuilderError> {
        let instruction = encode(opcode, operands)?;
        self.add_instruction(instruction)
    }

    pub fn finish_image(self) -> ProgramDescriptor {
        let mut descriptor = ProgramDescriptor::new();
        descriptor.length = self.free;
        descriptor.instructions = self.instructions;
        descriptor
    }
}
