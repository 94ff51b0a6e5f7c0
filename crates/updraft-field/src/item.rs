//! Bare-item parsing and serialization (RFC 8941 subset).
//!
//! Only the three item types the upload headers use are implemented:
//! sf-integer, sf-boolean, and sf-binary. Parsing is strict — leading and
//! trailing SP is tolerated (field-value OWS), everything else must match
//! the canonical grammar. An item followed by parameters (`;key=value`)
//! fails the grammar and is rejected, which is what the protocol wants:
//! none of the upload headers admit parameters.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

/// Rejection reasons for a structured-field value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("empty field value")]
    Empty,

    #[error("not a structured-field integer")]
    Integer,

    #[error("integer exceeds the structured-field range")]
    OutOfRange,

    #[error("negative value not allowed here")]
    Negative,

    #[error("not a structured-field boolean")]
    Boolean,

    #[error("not a structured-field byte sequence")]
    ByteSequence,

    #[error("field value is not visible ASCII")]
    Encoding,

    #[error("header sent more than once")]
    Repeated,

    #[error("upload token in header and path disagree")]
    TokenMismatch,
}

/// Maximum magnitude of an sf-integer: 15 digits.
const MAX_DIGITS: usize = 15;

fn trim_ows(input: &str) -> &str {
    input.trim_matches(|c| c == ' ' || c == '\t')
}

/// Parse an sf-integer.
///
/// Grammar: `["-"] 1*15DIGIT`, no parameters, nothing else on the value.
pub fn parse_integer(input: &str) -> Result<i64, FieldError> {
    let s = trim_ows(input);
    if s.is_empty() {
        return Err(FieldError::Empty);
    }
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    if digits.is_empty() || digits.len() > MAX_DIGITS {
        return Err(if digits.len() > MAX_DIGITS {
            FieldError::OutOfRange
        } else {
            FieldError::Integer
        });
    }
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FieldError::Integer);
    }
    let magnitude: i64 = digits.parse().map_err(|_| FieldError::OutOfRange)?;
    Ok(if negative { -magnitude } else { magnitude })
}

/// Parse an sf-integer that the protocol requires to be non-negative
/// (offsets, lengths, interop versions).
pub fn parse_non_negative(input: &str) -> Result<u64, FieldError> {
    let value = parse_integer(input)?;
    u64::try_from(value).map_err(|_| FieldError::Negative)
}

/// Parse an sf-boolean: exactly `?1` or `?0`.
pub fn parse_boolean(input: &str) -> Result<bool, FieldError> {
    match trim_ows(input) {
        "?1" => Ok(true),
        "?0" => Ok(false),
        "" => Err(FieldError::Empty),
        _ => Err(FieldError::Boolean),
    }
}

/// Parse an sf-binary: `":" base64 ":"` with the standard alphabet and
/// canonical padding. Returns the decoded octets; equality on the decoded
/// form is exact-length and case-sensitive, as token comparison requires.
pub fn parse_byte_sequence(input: &str) -> Result<Vec<u8>, FieldError> {
    let s = trim_ows(input);
    if s.is_empty() {
        return Err(FieldError::Empty);
    }
    let inner = s
        .strip_prefix(':')
        .and_then(|rest| rest.strip_suffix(':'))
        .ok_or(FieldError::ByteSequence)?;
    STANDARD.decode(inner).map_err(|_| FieldError::ByteSequence)
}

/// Serialize an sf-integer.
pub fn serialize_integer(value: u64) -> String {
    value.to_string()
}

/// Serialize an sf-boolean.
pub fn serialize_boolean(value: bool) -> &'static str {
    if value {
        "?1"
    } else {
        "?0"
    }
}

/// Serialize an sf-binary in its canonical (padded) form.
pub fn serialize_byte_sequence(octets: &[u8]) -> String {
    format!(":{}:", STANDARD.encode(octets))
}
