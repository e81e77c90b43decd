#![no_std]

#![cfg_attr(
    not(test),
    deny(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing,
        clippy::string_slice,
        clippy::arithmetic_side_effects,
        clippy::panicking_unwrap,
        clippy::out_of_bounds_indexing,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
    )
)]
#![cfg_attr(not(test), warn(clippy::missing_panics_doc))]

use core::ops::Range;

use log::{debug, trace};
use thiserror_no_std::Error;

use crate::isa::{Comparison, INSTRUCTION_SIZE, Opcode, REGISTER_COUNT, STACK_POINTER};

pub mod assembler;
pub mod builder;
pub mod isa;

#[cfg(test)]
mod assembler_test;

/// Register width of the machine.
pub type Word = u64;
/// One encoded instruction.
pub type Instruction = [u8; INSTRUCTION_SIZE];

const STACK_SLOT: usize = 8;
const SLOT_TAIL: usize = STACK_SLOT - 1;

/// Memory used when the caller does not pick a size.
pub const DEFAULT_MEMORY_SIZE: usize = 16 * 1024;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineError {
    #[error("the value {0} is an invalid opcode")]
    InvalidOpcode(u8),
    #[error("operand byte {0} does not name a register")]
    InvalidRegister(u8),
    #[error("operand byte {0} is not an access size")]
    InvalidSize(u8),
    #[error("operand byte {0} is not a comparison code")]
    InvalidComparison(u8),
    #[error("program counter {0} is outside the code region")]
    ProgramCounterOutOfBounds(i64),
    #[error("attempted push would overflow the stack")]
    StackOverflow,
    #[error("attempted pop on an empty stack")]
    StackUnderflow,
    #[error("return executed with an empty call stack")]
    ReturnOnEmptyStack,
    #[error("access of {size} bytes at address {address} is out of memory bounds")]
    OutOfBoundsAccess { address: Word, size: u8 },
    #[error("write to address {0} inside the code region")]
    WriteToCodeRegion(Word),
    #[error("division by zero")]
    DivisionByZero,
    #[error("program of {length} bytes does not fit the {capacity} byte code region")]
    ProgramTooLarge { length: usize, capacity: usize },
    #[error("program length {0} is not a whole number of instructions")]
    UnalignedProgram(usize),
    #[error("the machine is not running")]
    NotRunning,
}

/// Size of an assembled program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgramDescriptor {
    /// Bytes written to the image.
    pub length: usize,
    pub instructions: usize,
}

impl ProgramDescriptor {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    Running,
    Halted,
    Faulted(MachineError),
}

/// A register machine executing 4 byte instructions straight out of its
/// own memory.
///
/// The memory is split in three regions:
/// `
///     code:  [0, MEMORY_SIZE / 4)
///     data:  [MEMORY_SIZE / 4, MEMORY_SIZE - MEMORY_SIZE / 4)
///     stack: [MEMORY_SIZE - MEMORY_SIZE / 4, MEMORY_SIZE)
/// `
/// The program is loaded at address 0 and may only be fetched from the code
/// region, which `WRT` can not modify. The stack grows down from the top
/// byte in 8 byte slots; R15 holds the address of the highest free byte.
///
/// Each machine owns its registers and memory so any number of them may
/// run side by side.
pub struct Machine<const MEMORY_SIZE: usize> {
    registers: [Word; REGISTER_COUNT],
    memory: [u8; MEMORY_SIZE],
    pc: usize,
    state: MachineState,
    steps: u64,
}

impl<const MEMORY_SIZE: usize> Machine<MEMORY_SIZE> {
    pub const CODE_END: usize = MEMORY_SIZE / 4;
    pub const STACK_FLOOR: usize = MEMORY_SIZE - MEMORY_SIZE / 4;
    pub const STACK_TOP: usize = MEMORY_SIZE - 1;

    pub fn new() -> Self {
        const {
            assert!(MEMORY_SIZE >= 64 && MEMORY_SIZE % 32 == 0);
        }
        let mut machine = Self {
            registers: [0; REGISTER_COUNT],
            memory: [0; MEMORY_SIZE],
            pc: 0,
            state: MachineState::Running,
            steps: 0,
        };
        machine.reset();
        machine
    }

    /// Copies `program` to address 0 and resets the machine.
    pub fn load(&mut self, program: &[u8]) -> Result<(), MachineError> {
        let length = program.len();
        if length % INSTRUCTION_SIZE != 0 {
            return Err(MachineError::UnalignedProgram(length));
        }
        let too_large = MachineError::ProgramTooLarge {
            length,
            capacity: Self::CODE_END,
        };
        if length > Self::CODE_END {
            return Err(too_large);
        }
        self.memory.fill(0);
        self.memory
            .get_mut(..length)
            .ok_or(too_large)?
            .copy_from_slice(program);
        self.reset();
        debug!("loaded {} byte program into {} bytes of memory", length, MEMORY_SIZE);
        Ok(())
    }

    /// Puts the machine back in its just-loaded state. The code region is
    /// kept, everything above it is cleared.
    pub fn reset(&mut self) {
        self.registers = [0; REGISTER_COUNT];
        if let Some(sp) = self.registers.get_mut(usize::from(STACK_POINTER)) {
            *sp = Self::STACK_TOP as Word;
        }
        if let Some(data) = self.memory.get_mut(Self::CODE_END..) {
            data.fill(0);
        }
        self.pc = 0;
        self.state = MachineState::Running;
        self.steps = 0;
    }

    pub fn registers(&self) -> &[Word; REGISTER_COUNT] {
        &self.registers
    }

    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    /// Instructions executed since the last reset.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Runs until `HLT` or a fault.
    pub fn run(&mut self) -> Result<(), MachineError> {
        loop {
            match self.step() {
                Ok(MachineState::Running) => {}
                Ok(_) => {
                    debug!("halted at {:#x} after {} steps", self.pc, self.steps);
                    return Ok(());
                }
                Err(err) => {
                    debug!("fault at {:#x} after {} steps: {err}", self.pc, self.steps);
                    return Err(err);
                }
            }
        }
    }

    /// Executes a single instruction. A fault leaves the machine in
    /// [`MachineState::Faulted`] with the program counter on the faulting
    /// instruction.
    pub fn step(&mut self) -> Result<MachineState, MachineError> {
        if self.state != MachineState::Running {
            return Err(MachineError::NotRunning);
        }
        match self.execute() {
            Ok(state) => {
                self.state = state;
                Ok(state)
            }
            Err(err) => {
                self.state = MachineState::Faulted(err);
                Err(err)
            }
        }
    }

    fn execute(&mut self) -> Result<MachineState, MachineError> {
        let pc = self.pc;
        let [code, a, b, c] = self.fetch(pc)?;
        let op = Opcode::try_from(code)?;
        trace!("{pc:#06x}: {op} {a:#04x} {b:#04x} {c:#04x}");
        self.steps = self.steps.wrapping_add(1);

        let mut next = next_pc(pc)?;
        match op {
            Opcode::Halt => return Ok(MachineState::Halted),
            Opcode::And => self.binary(a, b, |lhs, rhs| Ok(lhs & rhs))?,
            Opcode::AndByte => self.unary(a, |value| Ok(value & zero_extend_byte(b)))?,
            Opcode::AndWord => self.unary(a, |value| Ok(value & zero_extend_word(b, c)))?,
            Opcode::Or => self.binary(a, b, |lhs, rhs| Ok(lhs | rhs))?,
            Opcode::OrByte => self.unary(a, |value| Ok(value | zero_extend_byte(b)))?,
            Opcode::OrWord => self.unary(a, |value| Ok(value | zero_extend_word(b, c)))?,
            Opcode::Not => self.unary(a, |value| Ok(!value))?,
            Opcode::ShiftLeft => self.binary(a, b, |lhs, rhs| Ok(shift_left(lhs, rhs)))?,
            Opcode::ShiftLeftImmediate => {
                self.unary(a, |value| Ok(shift_left(value, zero_extend_byte(b))))?
            }
            Opcode::ShiftRight => self.binary(a, b, |lhs, rhs| Ok(shift_right(lhs, rhs)))?,
            Opcode::ShiftRightImmediate => {
                self.unary(a, |value| Ok(shift_right(value, zero_extend_byte(b))))?
            }
            Opcode::Add => self.binary(a, b, |lhs, rhs| Ok(lhs.wrapping_add(rhs)))?,
            Opcode::AddByte => {
                self.unary(a, |value| Ok(value.wrapping_add(sign_extend_byte(b))))?
            }
            Opcode::AddWord => {
                self.unary(a, |value| Ok(value.wrapping_add(sign_extend_word(b, c))))?
            }
            Opcode::Increment => self.unary(a, |value| Ok(value.wrapping_add(1)))?,
            Opcode::Decrement => self.unary(a, |value| Ok(value.wrapping_sub(1)))?,
            Opcode::Multiply => self.binary(a, b, |lhs, rhs| Ok(lhs.wrapping_mul(rhs)))?,
            Opcode::MultiplyByte => {
                self.unary(a, |value| Ok(value.wrapping_mul(sign_extend_byte(b))))?
            }
            Opcode::MultiplyWord => {
                self.unary(a, |value| Ok(value.wrapping_mul(sign_extend_word(b, c))))?
            }
            Opcode::Divide => self.binary(a, b, signed_div)?,
            Opcode::DivideByte => self.unary(a, |value| signed_div(value, sign_extend_byte(b)))?,
            Opcode::DivideWord => {
                self.unary(a, |value| signed_div(value, sign_extend_word(b, c)))?
            }
            Opcode::Mod => self.binary(a, b, signed_rem)?,
            Opcode::ModByte => self.unary(a, |value| signed_rem(value, sign_extend_byte(b)))?,
            Opcode::ModWord => self.unary(a, |value| signed_rem(value, sign_extend_word(b, c)))?,
            Opcode::Clear => self.write_register(a, 0)?,
            Opcode::MoveByte1 => self.unary(a, |value| Ok(set_lane_byte(value, 0, b)))?,
            Opcode::MoveByte2 => self.unary(a, |value| Ok(set_lane_byte(value, 1, b)))?,
            Opcode::MoveByte3 => self.unary(a, |value| Ok(set_lane_byte(value, 2, b)))?,
            Opcode::MoveByte4 => self.unary(a, |value| Ok(set_lane_byte(value, 3, b)))?,
            Opcode::MoveWord1 => self.unary(a, |value| Ok(set_lane_word(value, 0, b, c)))?,
            Opcode::MoveWord2 => self.unary(a, |value| Ok(set_lane_word(value, 1, b, c)))?,
            Opcode::MoveWord3 => self.unary(a, |value| Ok(set_lane_word(value, 2, b, c)))?,
            Opcode::MoveWord4 => self.unary(a, |value| Ok(set_lane_word(value, 3, b, c)))?,
            Opcode::MoveRegister => self.binary(a, b, |_, rhs| Ok(rhs))?,
            Opcode::Swap => {
                let lhs = self.read_register(a)?;
                let rhs = self.read_register(b)?;
                self.write_register(a, rhs)?;
                self.write_register(b, lhs)?;
            }
            Opcode::Push => {
                let value = self.read_register(a)?;
                self.push(value)?;
            }
            Opcode::PushByte => self.push(sign_extend_byte(a))?,
            Opcode::PushWord => self.push(sign_extend_word(a, b))?,
            Opcode::PushTriple => self.push(sign_extend_triple(a, b, c))?,
            Opcode::Pop => {
                let value = self.pop()?;
                self.write_register(a, value)?;
            }
            Opcode::Peek => {
                let value = self.peek()?;
                self.write_register(a, value)?;
            }
            Opcode::Compare => {
                let comparison =
                    Comparison::from_code(c).ok_or(MachineError::InvalidComparison(c))?;
                let lhs = self.read_register(a)?;
                let rhs = self.read_register(b)?;
                if !comparison.holds(lhs, rhs) {
                    next = next_pc(next)?;
                }
            }
            Opcode::JumpByte => next = branch_target(next, i32::from(i8::from_le_bytes([a])))?,
            Opcode::JumpWord => next = branch_target(next, i32::from(i16::from_le_bytes([a, b])))?,
            Opcode::JumpTriple => next = branch_target(next, triple(a, b, c))?,
            Opcode::CallByte => next = self.call(next, i32::from(i8::from_le_bytes([a])))?,
            Opcode::CallWord => next = self.call(next, i32::from(i16::from_le_bytes([a, b])))?,
            Opcode::CallTriple => next = self.call(next, triple(a, b, c))?,
            Opcode::Return => {
                if self.stack_is_empty()? {
                    return Err(MachineError::ReturnOnEmptyStack);
                }
                let target = self.pop()?;
                next = usize::try_from(target)
                    .map_err(|_| MachineError::ProgramCounterOutOfBounds(target as i64))?;
            }
            Opcode::Write => {
                let size = access_size(a)?;
                let address = self.read_register(b)?;
                let value = self.read_register(c)?;
                let span = self.span(address, size)?;
                if span.start < Self::CODE_END {
                    return Err(MachineError::WriteToCodeRegion(address));
                }
                let bytes = value.to_le_bytes();
                let bytes = bytes
                    .get(..usize::from(size))
                    .ok_or(MachineError::InvalidSize(size))?;
                self.memory
                    .get_mut(span)
                    .ok_or(MachineError::OutOfBoundsAccess { address, size })?
                    .copy_from_slice(bytes);
            }
            Opcode::Read => {
                let size = access_size(b)?;
                let address = self.read_register(c)?;
                let span = self.span(address, size)?;
                let mut bytes = [0u8; STACK_SLOT];
                let source = self
                    .memory
                    .get(span)
                    .ok_or(MachineError::OutOfBoundsAccess { address, size })?;
                bytes
                    .get_mut(..usize::from(size))
                    .ok_or(MachineError::InvalidSize(size))?
                    .copy_from_slice(source);
                self.write_register(a, Word::from_le_bytes(bytes))?;
            }
            // Generic branches never reach an image.
            Opcode::Jump | Opcode::Call => return Err(MachineError::InvalidOpcode(code)),
        }
        self.pc = next;
        Ok(MachineState::Running)
    }

    fn fetch(&self, pc: usize) -> Result<Instruction, MachineError> {
        let out_of_bounds = MachineError::ProgramCounterOutOfBounds(pc as i64);
        let end = pc.checked_add(INSTRUCTION_SIZE).ok_or(out_of_bounds)?;
        if end > Self::CODE_END {
            return Err(out_of_bounds);
        }
        let word = self.memory.get(pc..end).ok_or(out_of_bounds)?;
        Instruction::try_from(word).map_err(|_| out_of_bounds)
    }

    fn read_register(&self, index: u8) -> Result<Word, MachineError> {
        self.registers
            .get(usize::from(index))
            .copied()
            .ok_or(MachineError::InvalidRegister(index))
    }

    fn write_register(&mut self, index: u8, value: Word) -> Result<(), MachineError> {
        let slot = self
            .registers
            .get_mut(usize::from(index))
            .ok_or(MachineError::InvalidRegister(index))?;
        *slot = value;
        Ok(())
    }

    fn unary(
        &mut self,
        target: u8,
        op: impl FnOnce(Word) -> Result<Word, MachineError>,
    ) -> Result<(), MachineError> {
        let value = self.read_register(target)?;
        self.write_register(target, op(value)?)
    }

    fn binary(
        &mut self,
        target: u8,
        source: u8,
        op: impl FnOnce(Word, Word) -> Result<Word, MachineError>,
    ) -> Result<(), MachineError> {
        let lhs = self.read_register(target)?;
        let rhs = self.read_register(source)?;
        self.write_register(target, op(lhs, rhs)?)
    }

    fn span(&self, address: Word, size: u8) -> Result<Range<usize>, MachineError> {
        let out_of_bounds = MachineError::OutOfBoundsAccess { address, size };
        let start = usize::try_from(address).map_err(|_| out_of_bounds)?;
        let end = start.checked_add(usize::from(size)).ok_or(out_of_bounds)?;
        if end > MEMORY_SIZE {
            return Err(out_of_bounds);
        }
        Ok(start..end)
    }

    fn stack_pointer(&self) -> Result<usize, MachineError> {
        let sp = self.read_register(STACK_POINTER)?;
        usize::try_from(sp).map_err(|_| MachineError::OutOfBoundsAccess {
            address: sp,
            size: STACK_SLOT as u8,
        })
    }

    fn stack_is_empty(&self) -> Result<bool, MachineError> {
        Ok(self.stack_pointer()? >= Self::STACK_TOP)
    }

    /// The slot ending at `top` must sit entirely inside the stack region.
    fn slot(&self, top: usize) -> Result<Range<usize>, MachineError> {
        let start = top
            .checked_sub(SLOT_TAIL)
            .filter(|start| *start >= Self::STACK_FLOOR)
            .ok_or(MachineError::StackOverflow)?;
        let end = top.checked_add(1).ok_or(MachineError::StackOverflow)?;
        if end > MEMORY_SIZE {
            return Err(MachineError::OutOfBoundsAccess {
                address: start as Word,
                size: STACK_SLOT as u8,
            });
        }
        Ok(start..end)
    }

    fn push(&mut self, value: Word) -> Result<(), MachineError> {
        let sp = self.stack_pointer()?;
        let slot = self.slot(sp)?;
        self.memory
            .get_mut(slot)
            .ok_or(MachineError::StackOverflow)?
            .copy_from_slice(&value.to_le_bytes());
        let sp = sp.checked_sub(STACK_SLOT).ok_or(MachineError::StackOverflow)?;
        self.write_register(STACK_POINTER, sp as Word)
    }

    fn read_slot(&self, top: usize) -> Result<Word, MachineError> {
        let slot = self.slot(top)?;
        let bytes = self.memory.get(slot).ok_or(MachineError::StackUnderflow)?;
        let bytes = <[u8; STACK_SLOT]>::try_from(bytes).map_err(|_| MachineError::StackUnderflow)?;
        Ok(Word::from_le_bytes(bytes))
    }

    fn top_slot(&self) -> Result<(usize, Word), MachineError> {
        if self.stack_is_empty()? {
            return Err(MachineError::StackUnderflow);
        }
        let top = self
            .stack_pointer()?
            .checked_add(STACK_SLOT)
            .filter(|top| *top <= Self::STACK_TOP)
            .ok_or(MachineError::StackUnderflow)?;
        Ok((top, self.read_slot(top)?))
    }

    fn pop(&mut self) -> Result<Word, MachineError> {
        let (top, value) = self.top_slot()?;
        self.write_register(STACK_POINTER, top as Word)?;
        Ok(value)
    }

    fn peek(&self) -> Result<Word, MachineError> {
        let (_, value) = self.top_slot()?;
        Ok(value)
    }

    fn call(&mut self, next: usize, offset: i32) -> Result<usize, MachineError> {
        let target = branch_target(next, offset)?;
        self.push(next as Word)?;
        Ok(target)
    }
}

impl<const MEMORY_SIZE: usize> Default for Machine<MEMORY_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

fn next_pc(pc: usize) -> Result<usize, MachineError> {
    pc.checked_add(INSTRUCTION_SIZE)
        .ok_or(MachineError::ProgramCounterOutOfBounds(pc as i64))
}

/// Offsets count from the instruction after the branch.
fn branch_target(next: usize, offset: i32) -> Result<usize, MachineError> {
    let target = (next as i64)
        .checked_add(i64::from(offset))
        .ok_or(MachineError::ProgramCounterOutOfBounds(next as i64))?;
    usize::try_from(target).map_err(|_| MachineError::ProgramCounterOutOfBounds(target))
}

fn access_size(byte: u8) -> Result<u8, MachineError> {
    match byte {
        1 | 2 | 4 | 8 => Ok(byte),
        _ => Err(MachineError::InvalidSize(byte)),
    }
}

fn zero_extend_byte(byte: u8) -> Word {
    Word::from(byte)
}

fn zero_extend_word(low: u8, high: u8) -> Word {
    Word::from(u16::from_le_bytes([low, high]))
}

fn sign_extend_byte(byte: u8) -> Word {
    i64::from(i8::from_le_bytes([byte])) as Word
}

fn sign_extend_word(low: u8, high: u8) -> Word {
    i64::from(i16::from_le_bytes([low, high])) as Word
}

fn triple(low: u8, mid: u8, high: u8) -> i32 {
    let fill = if high & 0x80 != 0 { 0xff } else { 0 };
    i32::from_le_bytes([low, mid, high, fill])
}

fn sign_extend_triple(low: u8, mid: u8, high: u8) -> Word {
    i64::from(triple(low, mid, high)) as Word
}

fn shift_left(value: Word, amount: Word) -> Word {
    u32::try_from(amount)
        .ok()
        .and_then(|amount| value.checked_shl(amount))
        .unwrap_or(0)
}

fn shift_right(value: Word, amount: Word) -> Word {
    u32::try_from(amount)
        .ok()
        .and_then(|amount| value.checked_shr(amount))
        .unwrap_or(0)
}

fn signed_div(lhs: Word, rhs: Word) -> Result<Word, MachineError> {
    if rhs == 0 {
        return Err(MachineError::DivisionByZero);
    }
    Ok((lhs as i64).wrapping_div(rhs as i64) as Word)
}

fn signed_rem(lhs: Word, rhs: Word) -> Result<Word, MachineError> {
    if rhs == 0 {
        return Err(MachineError::DivisionByZero);
    }
    Ok((lhs as i64).wrapping_rem(rhs as i64) as Word)
}

/// Lanes are the four 16 bit quarters of a register, lane 0 the lowest.
fn lane_shift(lane: u32) -> u32 {
    lane.wrapping_mul(16)
}

fn set_lane_byte(value: Word, lane: u32, byte: u8) -> Word {
    let shift = lane_shift(lane);
    let mask = !0xff_u64.wrapping_shl(shift);
    (value & mask) | zero_extend_byte(byte).wrapping_shl(shift)
}

fn set_lane_word(value: Word, lane: u32, low: u8, high: u8) -> Word {
    let shift = lane_shift(lane);
    let mask = !0xffff_u64.wrapping_shl(shift);
    (value & mask) | zero_extend_word(low, high).wrapping_shl(shift)
}
