//! The instruction set: opcodes, their operand signatures and the small
//! vocabularies (registers, comparison codes) shared by the assembler and
//! the machine.
//!
//! Every instruction is one 4 byte word. Byte 0 is the opcode, bytes 1..=3
//! hold the operands packed in signature order, little endian, with unused
//! bytes left zero.

use core::fmt;
use core::mem::transmute;

use variant_count::VariantCount;

use crate::MachineError;

pub const INSTRUCTION_SIZE: usize = 4;
pub const REGISTER_COUNT: usize = 16;
/// R15 holds the address of the top stack byte.
pub const STACK_POINTER: u8 = 15;

#[repr(u8)]
#[derive(VariantCount, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Halt,
    And,
    AndByte,
    AndWord,
    Or,
    OrByte,
    OrWord,
    Not,
    ShiftLeft,
    ShiftLeftImmediate,
    ShiftRight,
    ShiftRightImmediate,
    Add,
    AddByte,
    AddWord,
    Increment,
    Decrement,
    Multiply,
    MultiplyByte,
    MultiplyWord,
    Divide,
    DivideByte,
    DivideWord,
    Mod,
    ModByte,
    ModWord,
    Clear,
    MoveByte1,
    MoveByte2,
    MoveByte3,
    MoveByte4,
    MoveWord1,
    MoveWord2,
    MoveWord3,
    MoveWord4,
    MoveRegister,
    Swap,
    Push,
    PushByte,
    PushWord,
    PushTriple,
    Pop,
    Peek,
    Compare,
    Jump,
    JumpByte,
    JumpWord,
    JumpTriple,
    Call,
    CallByte,
    CallWord,
    CallTriple,
    Return,
    Write,
    Read,
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> u8 {
        op as u8
    }
}

impl TryFrom<u8> for Opcode {
    type Error = MachineError;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        // SAFTY: `repr(u8)` keeps every variant in range of a byte.
        if usize::from(value) >= Opcode::VARIANT_COUNT {
            return Err(MachineError::InvalidOpcode(value));
        }

        // SAFTY: We just checked that the value names a variant.
        let op = unsafe { transmute::<u8, Self>(value) };
        Ok(op)
    }
}

/// What an operand position accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    Register,
    Int8,
    Int16,
    Int24,
    Comparison,
    Offset,
    Size,
    Address,
}

impl OperandKind {
    /// Encoded width in bytes. Offsets take their width from the branch
    /// variant, see [`OpcodeDescriptor::operand_width`].
    pub const fn width(self) -> usize {
        match self {
            OperandKind::Int16 => 2,
            OperandKind::Int24 => 3,
            _ => 1,
        }
    }

    pub const fn is_immediate(self) -> bool {
        matches!(self, OperandKind::Int8 | OperandKind::Int16 | OperandKind::Int24)
    }

    /// Values an immediate of this kind can carry. `signed` immediates are
    /// sign extended by the machine, the rest zero extended, so each value
    /// decodes back to itself.
    pub const fn immediate_range(self, signed: bool) -> Option<(i32, i32)> {
        match (self, signed) {
            (OperandKind::Int8, true) => Some((-128, 127)),
            (OperandKind::Int8, false) => Some((0, 255)),
            (OperandKind::Int16, true) => Some((-32_768, 32_767)),
            (OperandKind::Int16, false) => Some((0, 65_535)),
            (OperandKind::Int24, true) => Some((-8_388_608, 8_388_607)),
            (OperandKind::Int24, false) => Some((0, 16_777_215)),
            _ => None,
        }
    }
}

impl fmt::Display for OperandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperandKind::Register => "register",
            OperandKind::Int8 => "8-bit immediate",
            OperandKind::Int16 => "16-bit immediate",
            OperandKind::Int24 => "24-bit immediate",
            OperandKind::Comparison => "comparison",
            OperandKind::Offset => "label",
            OperandKind::Size => "size",
            OperandKind::Address => "address",
        };
        f.write_str(name)
    }
}

/// Encoded width of a relative branch offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetWidth {
    Byte,
    Word,
    Triple,
}

impl OffsetWidth {
    pub const TRIPLE_MIN: i32 = -8_388_608;
    pub const TRIPLE_MAX: i32 = 8_388_607;

    /// Narrowest width holding `offset`, or `None` when even 24 bits are
    /// not enough.
    pub fn for_offset(offset: i64) -> Option<OffsetWidth> {
        if i8::try_from(offset).is_ok() {
            Some(OffsetWidth::Byte)
        } else if i16::try_from(offset).is_ok() {
            Some(OffsetWidth::Word)
        } else if (i64::from(Self::TRIPLE_MIN)..=i64::from(Self::TRIPLE_MAX)).contains(&offset) {
            Some(OffsetWidth::Triple)
        } else {
            None
        }
    }

    pub const fn bytes(self) -> usize {
        match self {
            OffsetWidth::Byte => 1,
            OffsetWidth::Word => 2,
            OffsetWidth::Triple => 3,
        }
    }
}

use OperandKind::{Address, Comparison as Cmp, Int16, Int24, Int8, Offset, Register as Reg, Size};

const NONE: &[OperandKind] = &[];
const REG: &[OperandKind] = &[Reg];
const REG_REG: &[OperandKind] = &[Reg, Reg];
const REG_BYTE: &[OperandKind] = &[Reg, Int8];
const REG_WORD: &[OperandKind] = &[Reg, Int16];
const BRANCH: &[OperandKind] = &[Offset];

/// Static description of one opcode.
#[derive(Debug, Clone, Copy)]
pub struct OpcodeDescriptor {
    pub opcode: Opcode,
    pub mnemonic: &'static str,
    pub signature: &'static [OperandKind],
    /// Set on the concrete branch encodings.
    pub offset_width: Option<OffsetWidth>,
    /// Concrete branch encodings are chosen by the assembler and may not be
    /// written in source.
    pub in_source: bool,
}

impl OpcodeDescriptor {
    const fn new(opcode: Opcode, mnemonic: &'static str, signature: &'static [OperandKind]) -> Self {
        Self {
            opcode,
            mnemonic,
            signature,
            offset_width: None,
            in_source: true,
        }
    }

    const fn branch(opcode: Opcode, mnemonic: &'static str, width: OffsetWidth) -> Self {
        Self {
            opcode,
            mnemonic,
            signature: BRANCH,
            offset_width: Some(width),
            in_source: false,
        }
    }

    pub fn operand_width(&self, kind: OperandKind) -> usize {
        match (kind, self.offset_width) {
            (OperandKind::Offset, Some(width)) => width.bytes(),
            _ => kind.width(),
        }
    }
}

impl Opcode {
    pub const fn descriptor(self) -> OpcodeDescriptor {
        use Opcode::*;
        use OpcodeDescriptor as D;
        match self {
            Halt => D::new(self, "HLT", NONE),
            And => D::new(self, "AND", REG_REG),
            AndByte => D::new(self, "ANDIB", REG_BYTE),
            AndWord => D::new(self, "ANDIW", REG_WORD),
            Or => D::new(self, "OR", REG_REG),
            OrByte => D::new(self, "ORIB", REG_BYTE),
            OrWord => D::new(self, "ORIW", REG_WORD),
            Not => D::new(self, "NOT", REG),
            ShiftLeft => D::new(self, "SHIL", REG_REG),
            ShiftLeftImmediate => D::new(self, "SHILI", REG_BYTE),
            ShiftRight => D::new(self, "SHIR", REG_REG),
            ShiftRightImmediate => D::new(self, "SHIRI", REG_BYTE),
            Add => D::new(self, "ADD", REG_REG),
            AddByte => D::new(self, "ADDIB", REG_BYTE),
            AddWord => D::new(self, "ADDIW", REG_WORD),
            Increment => D::new(self, "INCR", REG),
            Decrement => D::new(self, "DECR", REG),
            Multiply => D::new(self, "MUL", REG_REG),
            MultiplyByte => D::new(self, "MULIB", REG_BYTE),
            MultiplyWord => D::new(self, "MULIW", REG_WORD),
            Divide => D::new(self, "DIV", REG_REG),
            DivideByte => D::new(self, "DIVIB", REG_BYTE),
            DivideWord => D::new(self, "DIVIW", REG_WORD),
            Mod => D::new(self, "MOD", REG_REG),
            ModByte => D::new(self, "MODIB", REG_BYTE),
            ModWord => D::new(self, "MODIW", REG_WORD),
            Clear => D::new(self, "CLEAR", REG),
            MoveByte1 => D::new(self, "MOV1B", REG_BYTE),
            MoveByte2 => D::new(self, "MOV2B", REG_BYTE),
            MoveByte3 => D::new(self, "MOV3B", REG_BYTE),
            MoveByte4 => D::new(self, "MOV4B", REG_BYTE),
            MoveWord1 => D::new(self, "MOV1W", REG_WORD),
            MoveWord2 => D::new(self, "MOV2W", REG_WORD),
            MoveWord3 => D::new(self, "MOV3W", REG_WORD),
            MoveWord4 => D::new(self, "MOV4W", REG_WORD),
            MoveRegister => D::new(self, "MOVR", REG_REG),
            Swap => D::new(self, "SWAP", REG_REG),
            Push => D::new(self, "PUSH", REG),
            PushByte => D::new(self, "PUSHIB", &[Int8]),
            PushWord => D::new(self, "PUSHIW", &[Int16]),
            PushTriple => D::new(self, "PUSHIT", &[Int24]),
            Pop => D::new(self, "POP", REG),
            Peek => D::new(self, "PEEK", REG),
            Compare => D::new(self, "CMP", &[Reg, Reg, Cmp]),
            Jump => D::new(self, "JMP", BRANCH),
            JumpByte => D::branch(self, "JMPB", OffsetWidth::Byte),
            JumpWord => D::branch(self, "JMPW", OffsetWidth::Word),
            JumpTriple => D::branch(self, "JMPT", OffsetWidth::Triple),
            Call => D::new(self, "CALL", BRANCH),
            CallByte => D::branch(self, "CALLB", OffsetWidth::Byte),
            CallWord => D::branch(self, "CALLW", OffsetWidth::Word),
            CallTriple => D::branch(self, "CALLT", OffsetWidth::Triple),
            Return => D::new(self, "RET", NONE),
            Write => D::new(self, "WRT", &[Size, Address, Reg]),
            Read => D::new(self, "READ", &[Reg, Size, Address]),
        }
    }

    pub fn mnemonic(self) -> &'static str {
        self.descriptor().mnemonic
    }

    /// Every opcode in code order.
    pub fn all() -> impl Iterator<Item = Opcode> {
        (0..=u8::MAX).map_while(|code| Opcode::try_from(code).ok())
    }

    /// Looks up an opcode accepted in source text. Matching is exact and
    /// case sensitive.
    pub fn from_mnemonic(text: &str) -> Option<Opcode> {
        Opcode::all().find(|op| {
            let descriptor = op.descriptor();
            descriptor.in_source && descriptor.mnemonic == text
        })
    }

    /// True for any mnemonic, including the concrete branch encodings.
    pub fn is_reserved(text: &str) -> bool {
        Opcode::all().any(|op| op.mnemonic() == text)
    }

    /// Concrete encoding of a generic `JMP` or `CALL` for an offset width.
    pub fn with_offset_width(self, width: OffsetWidth) -> Option<Opcode> {
        use OffsetWidth::*;
        match (self, width) {
            (Opcode::Jump, Byte) => Some(Opcode::JumpByte),
            (Opcode::Jump, Word) => Some(Opcode::JumpWord),
            (Opcode::Jump, Triple) => Some(Opcode::JumpTriple),
            (Opcode::Call, Byte) => Some(Opcode::CallByte),
            (Opcode::Call, Word) => Some(Opcode::CallWord),
            (Opcode::Call, Triple) => Some(Opcode::CallTriple),
            _ => None,
        }
    }

    /// Arithmetic immediates are sign extended, logical ones zero extended.
    pub fn sign_extends_immediate(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            AddByte
                | AddWord
                | MultiplyByte
                | MultiplyWord
                | DivideByte
                | DivideWord
                | ModByte
                | ModWord
                | PushByte
                | PushWord
                | PushTriple
        )
    }

    pub fn is_generic_branch(self) -> bool {
        matches!(self, Opcode::Jump | Opcode::Call)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Condition code of `CMP`. `L` and `G` compare as signed integers.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Less = 1,
    Greater = 2,
    Equal = 3,
    NotEqual = 4,
}

impl Comparison {
    pub fn from_name(text: &str) -> Option<Comparison> {
        match text {
            "L" => Some(Comparison::Less),
            "G" => Some(Comparison::Greater),
            "E" => Some(Comparison::Equal),
            "NE" => Some(Comparison::NotEqual),
            _ => None,
        }
    }

    pub fn from_code(code: u8) -> Option<Comparison> {
        match code {
            1 => Some(Comparison::Less),
            2 => Some(Comparison::Greater),
            3 => Some(Comparison::Equal),
            4 => Some(Comparison::NotEqual),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Comparison::Less => "L",
            Comparison::Greater => "G",
            Comparison::Equal => "E",
            Comparison::NotEqual => "NE",
        }
    }

    pub fn holds(self, lhs: u64, rhs: u64) -> bool {
        const SIGN: u64 = 0x8000_0000_0000_0000;
        match self {
            Comparison::Less => (lhs ^ SIGN) < (rhs ^ SIGN),
            Comparison::Greater => (lhs ^ SIGN) > (rhs ^ SIGN),
            Comparison::Equal => lhs == rhs,
            Comparison::NotEqual => lhs != rhs,
        }
    }
}

/// Parses `R0`..`R15`, upper or lower case.
pub fn parse_register(text: &str) -> Option<u8> {
    let digits = text.strip_prefix('R').or_else(|| text.strip_prefix('r'))?;
    if digits.is_empty() || (digits.len() > 1 && digits.starts_with('0')) {
        return None;
    }
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let index = digits.parse::<u8>().ok()?;
    if usize::from(index) < REGISTER_COUNT {
        Some(index)
    } else {
        None
    }
}

/// Names a label may not take.
pub fn is_reserved_word(text: &str) -> bool {
    parse_register(text).is_some() || Comparison::from_name(text).is_some() || Opcode::is_reserved(text)
}
