use heapless::String;

use super::{AssemblerErrorKind, NAME_CAP};
use crate::isa::{Comparison, Opcode, OperandKind, parse_register};

pub type Name = String<NAME_CAP>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Mnemonic,
    Operand(OperandKind),
    /// Ends every instruction; its value is the zero based source line.
    LineMarker,
}

/// A classified word. `value` holds the numeric meaning: opcode byte,
/// register index, immediate, comparison code, size in bytes, or the
/// resolved branch offset once labels are known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: Name,
    pub value: i32,
}

impl Token {
    pub fn new(kind: TokenKind, text: &str, value: i32) -> Result<Self, AssemblerErrorKind> {
        Ok(Self {
            kind,
            text: to_name(text)?,
            value,
        })
    }

    pub fn line_marker(line: u32) -> Self {
        Self {
            kind: TokenKind::LineMarker,
            text: Name::new(),
            value: i32::try_from(line).unwrap_or(i32::MAX),
        }
    }
}

pub fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, ':' | '-' | '*' | '@')
}

/// Rejects the whole word on the first character outside the source
/// alphabet.
pub fn check_characters(word: &str) -> Result<(), AssemblerErrorKind> {
    match word.chars().find(|c| !is_allowed_char(*c)) {
        None => Ok(()),
        Some(character) => Err(AssemblerErrorKind::InvalidCharacter {
            word: truncated_name(word),
            character,
        }),
    }
}

/// Label names are letters, digits and `-`.
pub fn is_label_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Classifies one operand word. `previous` is the word before it on the
/// line and `expected` what the mnemonic's signature wants at this
/// position, which decides the width class of integer literals. `signed`
/// picks the signed or unsigned range of that class.
pub fn classify(
    word: &str,
    previous: Option<&str>,
    expected: Option<OperandKind>,
    signed: bool,
) -> Result<Token, AssemblerErrorKind> {
    check_characters(word)?;

    if let Some(opcode) = Opcode::from_mnemonic(word) {
        return Token::new(TokenKind::Mnemonic, word, i32::from(u8::from(opcode)));
    }
    if let Some(comparison) = Comparison::from_name(word) {
        return Token::new(
            TokenKind::Operand(OperandKind::Comparison),
            word,
            i32::from(comparison as u8),
        );
    }
    if word.ends_with(':') || matches!(previous, Some("JMP" | "CALL")) {
        return Token::new(TokenKind::Operand(OperandKind::Offset), word, 0);
    }
    if let Some(index) = parse_register(word) {
        return Token::new(TokenKind::Operand(OperandKind::Register), word, i32::from(index));
    }
    if let Some(bytes) = word.strip_prefix('@').and_then(parse_size) {
        return Token::new(TokenKind::Operand(OperandKind::Size), word, bytes);
    }
    if let Some(index) = word.strip_prefix('*').and_then(parse_register) {
        return Token::new(TokenKind::Operand(OperandKind::Address), word, i32::from(index));
    }
    if is_integer_literal(word) {
        let too_big = || AssemblerErrorKind::ImmediateTooBig(truncated_name(word));
        let value = parse_integer(word).ok_or_else(too_big)?;
        let kind = immediate_kind(value, expected, signed).ok_or_else(too_big)?;
        let value = i32::try_from(value).map_err(|_| too_big())?;
        return Token::new(TokenKind::Operand(kind), word, value);
    }
    Err(AssemblerErrorKind::UnrecognizedToken(truncated_name(word)))
}

/// `@8`, `@16`, `@32` or `@64`, as a byte count.
fn parse_size(bits: &str) -> Option<i32> {
    match bits {
        "8" => Some(1),
        "16" => Some(2),
        "32" => Some(4),
        "64" => Some(8),
        _ => None,
    }
}

fn split_literal(word: &str) -> (bool, &str, u32) {
    let (negative, digits) = match word.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, word),
    };
    match digits.strip_prefix("0x") {
        Some(hex) => (negative, hex, 16),
        None => (negative, digits, 10),
    }
}

/// Decimal or `0x` hexadecimal digits with an optional leading `-`,
/// whatever their magnitude.
pub fn is_integer_literal(word: &str) -> bool {
    let (_, digits, radix) = split_literal(word);
    !digits.is_empty() && digits.chars().all(|c| c.is_digit(radix))
}

/// Value of an integer literal, `None` when it is malformed or does not
/// fit in 64 bits.
pub fn parse_integer(word: &str) -> Option<i64> {
    if !is_integer_literal(word) {
        return None;
    }
    let (negative, digits, radix) = split_literal(word);
    let magnitude = i64::from_str_radix(digits, radix).ok()?;
    if negative {
        magnitude.checked_neg()
    } else {
        Some(magnitude)
    }
}

fn fits(kind: OperandKind, value: i64, signed: bool) -> bool {
    kind.immediate_range(signed)
        .is_some_and(|(min, max)| (i64::from(min)..=i64::from(max)).contains(&value))
}

fn immediate_kind(value: i64, expected: Option<OperandKind>, signed: bool) -> Option<OperandKind> {
    match expected {
        Some(kind) if kind.is_immediate() => fits(kind, value, signed).then_some(kind),
        // Not an immediate position, so the validator will reject the
        // operand whatever class it ends up in.
        _ => [OperandKind::Int8, OperandKind::Int16, OperandKind::Int24]
            .into_iter()
            .find(|kind| fits(*kind, value, true) || fits(*kind, value, false)),
    }
}

pub fn to_name(name: &str) -> Result<Name, AssemblerErrorKind> {
    // Cap name length to keep identifiers bounded in heapless storage.
    let mut out = Name::new();
    out.push_str(name)
        .map_err(|_| AssemblerErrorKind::NameTooLong(truncated_name(name)))?;
    Ok(out)
}

/// Keeps as much of `word` as fits, for use in diagnostics.
pub fn truncated_name(word: &str) -> Name {
    let mut out = Name::new();
    for c in word.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind_of(word: &str, previous: Option<&str>, expected: Option<OperandKind>) -> TokenKind {
        classify(word, previous, expected, false).unwrap().kind
    }

    #[test]
    fn classification_order() {
        assert_eq!(kind_of("ADD", None, None), TokenKind::Mnemonic);
        assert_eq!(kind_of("NE", None, None), TokenKind::Operand(OperandKind::Comparison));
        assert_eq!(kind_of("loop:", None, None), TokenKind::Operand(OperandKind::Offset));
        assert_eq!(kind_of("R3", Some("JMP"), None), TokenKind::Operand(OperandKind::Offset));
        assert_eq!(kind_of("r3", Some("PUSH"), None), TokenKind::Operand(OperandKind::Register));
        assert_eq!(kind_of("@32", None, None), TokenKind::Operand(OperandKind::Size));
        assert_eq!(kind_of("*R1", None, None), TokenKind::Operand(OperandKind::Address));
    }

    #[test]
    fn integer_width_follows_signature() {
        let token = classify("200", None, Some(OperandKind::Int16), true).unwrap();
        assert_eq!(token.kind, TokenKind::Operand(OperandKind::Int16));
        assert_eq!(token.value, 200);

        let token = classify("-0x10", None, Some(OperandKind::Int8), true).unwrap();
        assert_eq!(token.value, -16);

        assert!(matches!(
            classify("256", None, Some(OperandKind::Int8), false),
            Err(AssemblerErrorKind::ImmediateTooBig(_))
        ));
        assert!(matches!(
            classify("-32769", None, Some(OperandKind::Int16), true),
            Err(AssemblerErrorKind::ImmediateTooBig(_))
        ));
        assert_eq!(
            kind_of("70000", None, Some(OperandKind::Register)),
            TokenKind::Operand(OperandKind::Int24)
        );
    }

    #[test]
    fn range_follows_extension() {
        assert!(classify("255", None, Some(OperandKind::Int8), false).is_ok());
        assert!(matches!(
            classify("255", None, Some(OperandKind::Int8), true),
            Err(AssemblerErrorKind::ImmediateTooBig(_))
        ));
        assert!(classify("-128", None, Some(OperandKind::Int8), true).is_ok());
        assert!(matches!(
            classify("-1", None, Some(OperandKind::Int8), false),
            Err(AssemblerErrorKind::ImmediateTooBig(_))
        ));
        assert!(matches!(
            classify("0x8000", None, Some(OperandKind::Int16), true),
            Err(AssemblerErrorKind::ImmediateTooBig(_))
        ));
        assert!(classify("0xffffff", None, Some(OperandKind::Int24), false).is_ok());
    }

    #[test]
    fn oversized_literal_is_too_big() {
        for word in ["99999999999999999999", "-99999999999999999999", "0xfffffffffffffffff"] {
            assert!(matches!(
                classify(word, None, Some(OperandKind::Int8), true),
                Err(AssemblerErrorKind::ImmediateTooBig(_))
            ));
        }
    }

    #[test]
    fn rejects_invalid_characters() {
        assert!(matches!(
            classify("R1,", None, None, false),
            Err(AssemblerErrorKind::InvalidCharacter { character: ',', .. })
        ));
        assert!(matches!(
            classify("foo", None, None, false),
            Err(AssemblerErrorKind::UnrecognizedToken(_))
        ));
        assert!(matches!(
            classify("@12", None, None, false),
            Err(AssemblerErrorKind::UnrecognizedToken(_))
        ));
    }

    #[test]
    fn parses_integers() {
        assert_eq!(parse_integer("42"), Some(42));
        assert_eq!(parse_integer("-7"), Some(-7));
        assert_eq!(parse_integer("0xff"), Some(255));
        assert_eq!(parse_integer("0x"), None);
        assert_eq!(parse_integer("-"), None);
        assert_eq!(parse_integer("12a"), None);
        assert_eq!(parse_integer("99999999999999999999"), None);
        assert!(is_integer_literal("99999999999999999999"));
        assert!(is_integer_literal("-0xFF"));
        assert!(!is_integer_literal("0x"));
        assert!(!is_integer_literal("-"));
    }
}
