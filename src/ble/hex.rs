//! Hexadecimal payload codec.
//!
//! Diagnostic logging and test fixtures describe payloads as hex
//! strings; this module converts between that representation and raw
//! bytes. Decoding is strict - malformed input fails instead of being
//! silently truncated.

use thiserror::Error;

/// Error decoding a hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The input length is not a multiple of two.
    #[error("hex string has odd length {0}")]
    OddLength(usize),

    /// A byte outside `[0-9a-fA-F]` was encountered.
    #[error("invalid hex digit {byte:#04x} at offset {offset}")]
    InvalidDigit { byte: u8, offset: usize },
}

/// Encode `bytes` as continuous uppercase hex pairs.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;

    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02X}");
    }
    out
}

/// Decode an even-length hex string into raw bytes.
///
/// Accepts both cases; `bytes_to_hex(hex_to_bytes(s)?)` equals the
/// uppercased input for every valid `s`.
pub fn hex_to_bytes(s: &str) -> Result<Vec<u8>, DecodeError> {
    let raw = s.as_bytes();
    if raw.len() % 2 != 0 {
        return Err(DecodeError::OddLength(raw.len()));
    }

    let mut out = Vec::with_capacity(raw.len() / 2);
    for (i, pair) in raw.chunks_exact(2).enumerate() {
        let hi = digit(pair[0]).ok_or(DecodeError::InvalidDigit {
            byte: pair[0],
            offset: i * 2,
        })?;
        let lo = digit(pair[1]).ok_or(DecodeError::InvalidDigit {
            byte: pair[1],
            offset: i * 2 + 1,
        })?;
        out.push(hi << 4 | lo);
    }
    Ok(out)
}

fn digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
