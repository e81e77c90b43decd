use crate::assembler::encoder::{EncodeError, decode, encode, operand_range};
use crate::assembler::{Assembler, AssemblerError, AssemblerErrorKind, Diagnostics, assemble};
use crate::builder::ImageBuilder;
use crate::isa::{Opcode, OpcodeDescriptor, OperandKind};

extern crate std;
use std::format;
use std::string::ToString;
use std::vec;
use std::vec::Vec as StdVec;

const CAP: usize = 64;

fn assemble_lines(lines: &[&str]) -> Result<StdVec<u8>, Diagnostics<8>> {
    let mut buffer = [0u8; CAP * 4];
    let builder = ImageBuilder::new(&mut buffer);
    let mut asm: Assembler<CAP, 16, 8> = Assembler::new(builder);
    for line in lines {
        asm.add_line(line);
    }
    let descriptor = asm.finish()?;
    Ok(buffer[..descriptor.length].to_vec())
}

fn errors_of(lines: &[&str]) -> StdVec<AssemblerError> {
    assemble_lines(lines).unwrap_err().iter().cloned().collect()
}

fn only_error(lines: &[&str]) -> (u32, AssemblerErrorKind) {
    let errors = errors_of(lines);
    assert_eq!(errors.len(), 1, "{errors:?}");
    let error = &errors[0];
    (error.line_number().unwrap(), error.error_kind().clone())
}

#[test]
fn assembles_basic_program() {
    let image = assemble_lines(&["MOV1W R1 5", "ADDIB R1 -1", "PUSH R1", "HLT"]).unwrap();
    assert_eq!(
        image,
        vec![
            u8::from(Opcode::MoveWord1), 1, 5, 0,
            u8::from(Opcode::AddByte), 1, 0xff, 0,
            u8::from(Opcode::Push), 1, 0, 0,
            u8::from(Opcode::Halt), 0, 0, 0,
        ]
    );
}

#[test]
fn addresses_advance_by_instruction_size() {
    let mut buffer = [0u8; 64];
    let mut asm: Assembler<8, 4, 4> = Assembler::new(ImageBuilder::new(&mut buffer));
    asm.add_line("CLEAR R1");
    asm.add_line("");
    asm.add_line("start:");
    asm.add_line("INCR R1");
    asm.add_line("BOGUS");
    asm.add_line("DECR R1");
    let addresses: StdVec<u32> = asm.instructions().iter().map(|i| i.address()).collect();
    assert_eq!(addresses, vec![0, 4, 12]);
    let lines: StdVec<u32> = asm.instructions().iter().map(|i| i.line()).collect();
    assert_eq!(lines, vec![1, 4, 6]);
}

#[test]
fn encodes_all_operand_kinds() {
    let image = assemble_lines(&[
        "CMP R1 R2 NE",
        "WRT @64 *R3 R4",
        "READ R5 @16 *R6",
        "PUSHIT -2",
        "ORIW r7 0xabcd",
    ])
    .unwrap();
    assert_eq!(image[0..4], [u8::from(Opcode::Compare), 1, 2, 4]);
    assert_eq!(image[4..8], [u8::from(Opcode::Write), 8, 3, 4]);
    assert_eq!(image[8..12], [u8::from(Opcode::Read), 5, 2, 6]);
    assert_eq!(image[12..16], [u8::from(Opcode::PushTriple), 0xfe, 0xff, 0xff]);
    assert_eq!(image[16..20], [u8::from(Opcode::OrWord), 7, 0xcd, 0xab]);
}

#[test]
fn resolves_forward_and_backward_labels() {
    let image = assemble_lines(&["loop:", "INCR R1", "JMP loop", "CALL end", "HLT", "end:", "RET"]).unwrap();
    // Offsets count from the instruction after the branch.
    assert_eq!(image[4..8], [u8::from(Opcode::JumpByte), 0xf8, 0, 0]);
    assert_eq!(image[8..12], [u8::from(Opcode::CallByte), 4, 0, 0]);
}

#[test]
fn label_on_next_instruction_gives_zero_offset() {
    let image = assemble_lines(&["JMP next", "next:", "HLT"]).unwrap();
    assert_eq!(image[0..4], [u8::from(Opcode::JumpByte), 0, 0, 0]);
}

fn branch_over(fillers: usize, backward: bool) -> StdVec<u8> {
    let mut lines: StdVec<&str> = StdVec::new();
    if backward {
        lines.push("target:");
        lines.extend(std::iter::repeat("INCR R1").take(fillers));
        lines.push("JMP target");
    } else {
        lines.push("JMP target");
        lines.extend(std::iter::repeat("INCR R1").take(fillers));
        lines.push("target:");
        lines.push("HLT");
    }
    let source = lines.join("\n");
    let mut buffer = vec![0u8; (fillers + 2) * 4];
    // Large programs need a bigger stack than the default test thread.
    std::thread::Builder::new()
        .stack_size(64 << 20)
        .spawn(move || {
            let descriptor = assemble::<9000, 4, 4>(&source, &mut buffer).unwrap();
            buffer.truncate(descriptor.length);
            buffer
        })
        .unwrap()
        .join()
        .unwrap()
}

fn branch_of(image: &[u8], backward: bool) -> (Opcode, i32) {
    let word = if backward {
        &image[image.len() - 4..]
    } else {
        &image[..4]
    };
    let decoded = decode(word.try_into().unwrap()).unwrap();
    (decoded.opcode, decoded.operands[0])
}

#[test]
fn picks_narrowest_forward_branch() {
    assert_eq!(branch_of(&branch_over(31, false), false), (Opcode::JumpByte, 124));
    assert_eq!(branch_of(&branch_over(32, false), false), (Opcode::JumpWord, 128));
    assert_eq!(branch_of(&branch_over(8191, false), false), (Opcode::JumpWord, 32764));
    assert_eq!(branch_of(&branch_over(8192, false), false), (Opcode::JumpTriple, 32768));
}

#[test]
fn picks_narrowest_backward_branch() {
    assert_eq!(branch_of(&branch_over(31, true), true), (Opcode::JumpByte, -128));
    assert_eq!(branch_of(&branch_over(32, true), true), (Opcode::JumpWord, -132));
    assert_eq!(branch_of(&branch_over(8191, true), true), (Opcode::JumpWord, -32768));
    assert_eq!(branch_of(&branch_over(8192, true), true), (Opcode::JumpTriple, -32772));
}

#[test]
fn undefined_label_reports_once_and_writes_nothing() {
    let mut buffer = [0u8; 32];
    let mut asm: Assembler<8, 4, 4> = Assembler::new(ImageBuilder::new(&mut buffer));
    asm.add_line("INCR R1");
    asm.add_line("JMP nowhere");
    let diagnostics = asm.finish().unwrap_err();
    assert_eq!(diagnostics.len(), 1);
    let error = diagnostics.iter().next().unwrap();
    assert_eq!(error.line_number(), Some(2));
    assert_eq!(error.to_string(), "line 2: undefined label `nowhere`");
    assert_eq!(buffer, [0u8; 32]);
}

#[test]
fn reports_label_errors() {
    assert!(matches!(
        only_error(&["a:", "a:", "HLT"]),
        (2, AssemblerErrorKind::DuplicateLabel(name)) if name == "a"
    ));
    for reserved in ["R1:", "r15:", "ADD:", "JMPW:", "E:", "NE:"] {
        assert!(matches!(
            only_error(&[reserved, "HLT"]),
            (1, AssemblerErrorKind::ReservedLabel(_))
        ));
    }
    assert!(matches!(
        only_error(&["HLT", "end: HLT"]),
        (2, AssemblerErrorKind::LabelWithOperands(name)) if name == "end"
    ));
    assert!(matches!(
        only_error(&["*x:", "HLT"]),
        (1, AssemblerErrorKind::InvalidLabelName(_))
    ));
}

#[test]
fn reports_argument_count() {
    let (line, kind) = only_error(&["HLT", "ADD R1"]);
    assert_eq!(line, 2);
    assert_eq!(
        kind,
        AssemblerErrorKind::WrongArgumentCount {
            mnemonic: "ADD",
            expected: 2,
            found: 1
        }
    );
    assert!(matches!(
        only_error(&["RET R1"]),
        (1, AssemblerErrorKind::WrongArgumentCount { found: 1, .. })
    ));
    assert!(matches!(
        only_error(&["CMP R1 R2 E R3 R4"]),
        (1, AssemblerErrorKind::WrongArgumentCount { expected: 3, found: 5, .. })
    ));
    assert!(assemble_lines(&["WRT @64 *R1 R2", "CMP R1 R2 G", "HLT"]).is_ok());
    assert_ne!(
        AssemblerErrorKind::TokenOverflow.to_string(),
        AssemblerErrorKind::MaxInstructionsExceeded.to_string()
    );
}

#[test]
fn reports_operand_mismatch() {
    assert_eq!(
        only_error(&["ADD R1 5"]),
        (
            1,
            AssemblerErrorKind::OperandMismatch {
                mnemonic: "ADD",
                position: 2,
                expected: OperandKind::Register
            }
        )
    );
    assert!(matches!(
        only_error(&["WRT R1 *R2 R3"]),
        (1, AssemblerErrorKind::OperandMismatch { position: 1, .. })
    ));
    assert!(matches!(
        only_error(&["CMP R1 R2 R3"]),
        (1, AssemblerErrorKind::OperandMismatch { position: 3, expected: OperandKind::Comparison, .. })
    ));
}

#[test]
fn reports_token_errors() {
    assert!(matches!(
        only_error(&["ADDIB R1 300"]),
        (1, AssemblerErrorKind::ImmediateTooBig(_))
    ));
    assert!(matches!(
        only_error(&["ADD R1, R2"]),
        (1, AssemblerErrorKind::InvalidCharacter { character: ',', .. })
    ));
    assert!(matches!(
        only_error(&["PUSH R16"]),
        (1, AssemblerErrorKind::UnrecognizedToken(_))
    ));
    assert!(matches!(
        only_error(&["FOO R1"]),
        (1, AssemblerErrorKind::UnknownInstruction(name)) if name == "FOO"
    ));
    assert!(matches!(
        only_error(&["add R1 R2"]),
        (1, AssemblerErrorKind::UnknownInstruction(_))
    ));
    assert!(matches!(
        only_error(&["a:", "JMPB a"]),
        (2, AssemblerErrorKind::UnknownInstruction(_))
    ));
}

#[test]
fn collects_every_error() {
    let errors = errors_of(&["FOO", "ADD R1", "x:", "x:", "JMP nowhere", "HLT"]);
    let lines: StdVec<Option<u32>> = errors.iter().map(AssemblerError::line_number).collect();
    assert_eq!(lines, vec![Some(1), Some(2), Some(4), Some(5)]);
}

#[test]
fn caps_diagnostics() {
    let mut buffer = [0u8; 32];
    let mut asm: Assembler<8, 4, 2> = Assembler::new(ImageBuilder::new(&mut buffer));
    asm.add_source("FOO\nBAR\nBAZ\n");
    let diagnostics = asm.finish().unwrap_err();
    assert_eq!(diagnostics.len(), 3);
    assert_eq!(diagnostics.omitted(), 1);
    assert_eq!(diagnostics.iter().count(), 2);
    assert!(format!("{diagnostics}").ends_with("... and 1 more\n"));
}

#[test]
fn reports_full_image() {
    let mut buffer = [0u8; 4];
    let mut asm: Assembler<8, 4, 4> = Assembler::new(ImageBuilder::new(&mut buffer));
    asm.add_source("HLT\nHLT");
    let diagnostics = asm.finish().unwrap_err();
    assert!(matches!(
        diagnostics.iter().next().map(AssemblerError::error_kind),
        Some(AssemblerErrorKind::Builder(_))
    ));
}

#[test]
fn reports_too_many_instructions() {
    let mut buffer = [0u8; 64];
    let mut asm: Assembler<1, 4, 4> = Assembler::new(ImageBuilder::new(&mut buffer));
    asm.add_source("HLT\nHLT");
    let diagnostics = asm.finish().unwrap_err();
    assert!(matches!(
        diagnostics.iter().next().map(AssemblerError::error_kind),
        Some(AssemblerErrorKind::MaxInstructionsExceeded)
    ));
}

/// Values worth encoding for one operand: every value of narrow kinds,
/// the edges and the values around zero for wide ones.
fn sweep_values(descriptor: &OpcodeDescriptor, kind: OperandKind) -> StdVec<i32> {
    let (min, max) = operand_range(descriptor, kind);
    if kind == OperandKind::Size {
        return vec![1, 2, 4, 8];
    }
    if i64::from(max) - i64::from(min) <= 255 {
        return (min..=max).collect();
    }
    [min, max, -1, 0, 1]
        .into_iter()
        .filter(|value| (min..=max).contains(value))
        .collect()
}

#[test]
fn encode_decode_round_trip() {
    for opcode in Opcode::all().filter(|op| !op.is_generic_branch()) {
        let descriptor = opcode.descriptor();
        let base: StdVec<i32> = descriptor
            .signature
            .iter()
            .map(|kind| sweep_values(&descriptor, *kind)[0])
            .collect();
        for (position, kind) in descriptor.signature.iter().enumerate() {
            for value in sweep_values(&descriptor, *kind) {
                let mut operands = base.clone();
                operands[position] = value;
                let word = encode(opcode, &operands).unwrap();
                assert_eq!(word[0], u8::from(opcode));
                let decoded = decode(word).unwrap();
                assert_eq!(decoded.opcode, opcode);
                assert_eq!(
                    decoded.operands.as_slice(),
                    operands.as_slice(),
                    "{opcode} operand {position}"
                );
            }
        }
    }
}

#[test]
fn encoder_rejects_the_other_extension() {
    let out_of_range = |opcode: Opcode, operands: &[i32]| {
        matches!(
            encode(opcode, operands),
            Err(EncodeError::OperandOutOfRange { .. })
        )
    };
    assert!(out_of_range(Opcode::AddByte, &[1, 255]));
    assert!(out_of_range(Opcode::AddWord, &[1, 65_535]));
    assert!(out_of_range(Opcode::PushTriple, &[16_777_215]));
    assert!(out_of_range(Opcode::AndByte, &[1, -1]));
    assert!(out_of_range(Opcode::OrWord, &[1, -32_768]));
    assert!(encode(Opcode::AndByte, &[1, 255]).is_ok());
    assert!(encode(Opcode::AddByte, &[1, -128]).is_ok());
}

#[test]
fn immediates_follow_the_opcode_extension() {
    assert!(matches!(
        only_error(&["ADDIB R1 255"]),
        (1, AssemblerErrorKind::ImmediateTooBig(_))
    ));
    assert!(matches!(
        only_error(&["ANDIB R2 -1"]),
        (1, AssemblerErrorKind::ImmediateTooBig(_))
    ));
    assert!(matches!(
        only_error(&["ORIW R2 -32768"]),
        (1, AssemblerErrorKind::ImmediateTooBig(_))
    ));
    assert!(matches!(
        only_error(&["PUSHIT 16777215"]),
        (1, AssemblerErrorKind::ImmediateTooBig(_))
    ));

    let image = assemble_lines(&["ANDIB R2 255", "ADDIB R1 -128", "HLT"]).unwrap();
    let first = decode([image[0], image[1], image[2], image[3]]).unwrap();
    assert_eq!(first.operands.as_slice(), &[2, 255]);
    let second = decode([image[4], image[5], image[6], image[7]]).unwrap();
    assert_eq!(second.operands.as_slice(), &[1, -128]);
}

#[test]
fn literal_beyond_i64_is_too_big() {
    assert!(matches!(
        only_error(&["ADDIB R1 99999999999999999999"]),
        (1, AssemblerErrorKind::ImmediateTooBig(_))
    ));
    assert!(matches!(
        only_error(&["PUSHIT -99999999999999999999"]),
        (1, AssemblerErrorKind::ImmediateTooBig(_))
    ));
}

#[test]
fn disassembles() {
    let listing = |opcode: Opcode, operands: &[i32]| {
        decode(encode(opcode, operands).unwrap()).unwrap().to_string()
    };
    assert_eq!(listing(Opcode::Compare, &[1, 2, 1]), "CMP R1 R2 L");
    assert_eq!(listing(Opcode::Write, &[8, 1, 2]), "WRT @64 *R1 R2");
    assert_eq!(listing(Opcode::JumpWord, &[-400]), "JMPW -400");
    assert_eq!(listing(Opcode::AddByte, &[3, -1]), "ADDIB R3 -1");
    assert_eq!(listing(Opcode::Halt, &[]), "HLT");
}
