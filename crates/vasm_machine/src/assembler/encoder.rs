//! Packs operand values into 4 byte instruction words and back.

use core::fmt;

use heapless::Vec;
use thiserror_no_std::Error;

use crate::isa::{
    Comparison, INSTRUCTION_SIZE, Opcode, OpcodeDescriptor, OperandKind, REGISTER_COUNT,
};
use crate::{Instruction, MachineError};

/// Most operands any opcode takes.
pub const MAX_OPERANDS: usize = 3;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    #[error("{0} must be resolved to a sized branch before encoding")]
    GenericBranch(Opcode),
    #[error("{opcode} takes {expected} operands, {found} given")]
    OperandCount {
        opcode: Opcode,
        expected: usize,
        found: usize,
    },
    #[error("{value} is not a valid {kind} operand of {opcode}")]
    OperandOutOfRange {
        opcode: Opcode,
        kind: OperandKind,
        value: i32,
    },
}

/// Accepted source values of each operand kind.
///
/// Immediates take the signed or the unsigned range of their width,
/// matching how the opcode extends them.
pub fn operand_range(descriptor: &OpcodeDescriptor, kind: OperandKind) -> (i32, i32) {
    let signed = descriptor.opcode.sign_extends_immediate();
    match kind {
        OperandKind::Register | OperandKind::Address => (0, 15),
        OperandKind::Int8 | OperandKind::Int16 | OperandKind::Int24 => {
            kind.immediate_range(signed).unwrap_or((0, 0))
        }
        OperandKind::Comparison => (1, 4),
        OperandKind::Size => (1, 8),
        OperandKind::Offset => match descriptor.operand_width(kind) {
            1 => (-128, 127),
            2 => (-32_768, 32_767),
            _ => (-8_388_608, 8_388_607),
        },
    }
}

fn check_operand(
    descriptor: &OpcodeDescriptor,
    kind: OperandKind,
    value: i32,
) -> Result<(), EncodeError> {
    let (min, max) = operand_range(descriptor, kind);
    let size_ok = kind != OperandKind::Size || matches!(value, 1 | 2 | 4 | 8);
    if (min..=max).contains(&value) && size_ok {
        Ok(())
    } else {
        Err(EncodeError::OperandOutOfRange {
            opcode: descriptor.opcode,
            kind,
            value,
        })
    }
}

pub fn encode(opcode: Opcode, operands: &[i32]) -> Result<Instruction, EncodeError> {
    if opcode.is_generic_branch() {
        return Err(EncodeError::GenericBranch(opcode));
    }
    let descriptor = opcode.descriptor();
    if operands.len() != descriptor.signature.len() {
        return Err(EncodeError::OperandCount {
            opcode,
            expected: descriptor.signature.len(),
            found: operands.len(),
        });
    }

    let mut word = [0u8; INSTRUCTION_SIZE];
    let (head, body) = word.split_at_mut(1);
    if let Some(code) = head.first_mut() {
        *code = u8::from(opcode);
    }
    let mut body = body.iter_mut();
    for (kind, value) in descriptor.signature.iter().zip(operands) {
        check_operand(&descriptor, *kind, *value)?;
        let width = descriptor.operand_width(*kind);
        // Two's complement truncation to the operand width.
        for (byte, slot) in value.to_le_bytes().into_iter().take(width).zip(body.by_ref()) {
            *slot = byte;
        }
    }
    Ok(word)
}

/// A decoded instruction with operand values as the assembler would write
/// them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub opcode: Opcode,
    pub operands: Vec<i32, MAX_OPERANDS>,
}

pub fn decode(word: Instruction) -> Result<Decoded, MachineError> {
    let [code, operand_bytes @ ..] = word;
    let opcode = Opcode::try_from(code)?;
    if opcode.is_generic_branch() {
        return Err(MachineError::InvalidOpcode(code));
    }
    let descriptor = opcode.descriptor();
    let mut operands = Vec::new();
    let mut bytes = operand_bytes.into_iter();
    for kind in descriptor.signature {
        let width = descriptor.operand_width(*kind);
        let mut raw = [0u8; 4];
        for (slot, byte) in raw.iter_mut().zip(bytes.by_ref().take(width)) {
            *slot = byte;
        }
        let value = operand_value(opcode, *kind, width, raw)?;
        operands
            .push(value)
            .map_err(|_| MachineError::InvalidOpcode(code))?;
    }
    Ok(Decoded { opcode, operands })
}

fn operand_value(
    opcode: Opcode,
    kind: OperandKind,
    width: usize,
    raw: [u8; 4],
) -> Result<i32, MachineError> {
    let [low, mid, high, _] = raw;
    let signed = kind == OperandKind::Offset || (kind.is_immediate() && opcode.sign_extends_immediate());
    let value = match (width, signed) {
        (1, true) => i32::from(i8::from_le_bytes([low])),
        (2, true) => i32::from(i16::from_le_bytes([low, mid])),
        (_, true) => {
            let fill = if high & 0x80 != 0 { 0xff } else { 0 };
            i32::from_le_bytes([low, mid, high, fill])
        }
        (_, false) => i32::from_le_bytes([low, mid, high, 0]),
    };
    match kind {
        OperandKind::Register | OperandKind::Address if usize::from(low) >= REGISTER_COUNT => {
            Err(MachineError::InvalidRegister(low))
        }
        OperandKind::Comparison if Comparison::from_code(low).is_none() => {
            Err(MachineError::InvalidComparison(low))
        }
        OperandKind::Size if !matches!(low, 1 | 2 | 4 | 8) => Err(MachineError::InvalidSize(low)),
        _ => Ok(value),
    }
}

impl fmt::Display for Decoded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.opcode.mnemonic())?;
        let signature = self.opcode.descriptor().signature;
        for (kind, value) in signature.iter().zip(self.operands.iter()) {
            match kind {
                OperandKind::Register => write!(f, " R{value}")?,
                OperandKind::Address => write!(f, " *R{value}")?,
                OperandKind::Size => write!(f, " @{}", value.saturating_mul(8))?,
                OperandKind::Offset => write!(f, " {value:+}")?,
                OperandKind::Comparison => {
                    let name = u8::try_from(*value)
                        .ok()
                        .and_then(Comparison::from_code)
                        .map_or("?", Comparison::name);
                    write!(f, " {name}")?
                }
                OperandKind::Int8 | OperandKind::Int16 | OperandKind::Int24 => {
                    write!(f, " {value}")?
                }
            }
        }
        Ok(())
    }
}
