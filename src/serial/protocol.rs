use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Start-of-text byte that opens every response frame.
pub const STX: u8 = 0x02;

/// Exact length of a response frame.
pub const RESPONSE_LEN: usize = 9;

/// Byte range of the ASCII weight field (weight x 100).
const WEIGHT_FIELD: Range<usize> = 2..7;

/// Fixed-point weight with two decimal places, stored as hundredths.
///
/// Non-negative values are measured weights in the scale's unit. The two
/// negative sentinels report why a read produced no measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Weight(i64);

impl Weight {
    pub const ZERO: Weight = Weight(0);

    /// The read command could not be written to the port.
    pub const WRITE_FAILED: Weight = Weight(-100);

    /// No connection could be (re)opened.
    pub const NO_CONNECTION: Weight = Weight(-200);

    pub const fn from_hundredths(hundredths: i64) -> Self {
        Weight(hundredths)
    }

    pub const fn hundredths(self) -> i64 {
        self.0
    }

    /// True for real measurements, false for the failure sentinels.
    pub const fn is_measurement(self) -> bool {
        self.0 >= 0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 100.0
    }
}

impl fmt::Display for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

/// Why a received chunk was not accepted as a response frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum FrameError {
    #[error("expected 9 bytes, got {0}")]
    Length(usize),

    #[error("frame starts with 0x{0:02X} instead of STX")]
    MissingStx(u8),

    #[error("weight field {0:?} is not a number")]
    InvalidDigits(String),
}

/// Decode one response frame: `STX, <ignored>, 5 ASCII digits, <ignored x2>`.
///
/// The weight field may be padded with ASCII whitespace (`"  150"`), but
/// signs and any other characters are rejected.
pub fn decode_frame(chunk: &[u8]) -> Result<Weight, FrameError> {
    if chunk.len() != RESPONSE_LEN {
        return Err(FrameError::Length(chunk.len()));
    }
    if chunk[0] != STX {
        return Err(FrameError::MissingStx(chunk[0]));
    }

    let field = &chunk[WEIGHT_FIELD];
    let invalid = || FrameError::InvalidDigits(String::from_utf8_lossy(field).into_owned());

    let digits = trim_whitespace(field);
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }

    let hundredths = digits
        .iter()
        .fold(0i64, |acc, d| acc * 10 + i64::from(d - b'0'));
    Ok(Weight(hundredths))
}

fn trim_whitespace(field: &[u8]) -> &[u8] {
    let start = field
        .iter()
        .position(|b| !is_padding(*b))
        .unwrap_or(field.len());
    let end = field.iter().rposition(|b| !is_padding(*b)).map_or(start, |i| i + 1);
    &field[start..end]
}

/// ASCII whitespace, including the vertical tab that `u8::is_ascii_whitespace` skips.
fn is_padding(b: u8) -> bool {
    b.is_ascii_whitespace() || b == 0x0B
}

/// What actually happened during the most recent read.
///
/// Callers only see the returned [`Weight`]; a silent scale, a garbled
/// reply and an empty pan all read as zero. This keeps them apart for
/// diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReadOutcome {
    Weighed { weight: Weight },
    NoResponse,
    Garbled { error: FrameError },
    NoConnection,
    WriteFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(field: &[u8; 5]) -> [u8; RESPONSE_LEN] {
        let mut f = [STX, 0xFF, 0, 0, 0, 0, 0, 0x00, 0x00];
        f[WEIGHT_FIELD].copy_from_slice(field);
        f
    }

    #[test]
    fn decodes_reference_frame() {
        let bytes = [0x02, 0xFF, 0x31, 0x32, 0x33, 0x34, 0x35, 0x00, 0x00];
        let weight = decode_frame(&bytes).unwrap();
        assert_eq!(weight.hundredths(), 12345);
        assert_eq!(weight.to_string(), "123.45");
    }

    #[test]
    fn decodes_every_digit_position() {
        for value in [0i64, 1, 9, 10, 99, 100, 4250, 50000, 99999] {
            let text = format!("{:05}", value);
            let field: [u8; 5] = text.as_bytes().try_into().unwrap();
            assert_eq!(decode_frame(&frame(&field)), Ok(Weight::from_hundredths(value)));
        }
    }

    #[test]
    fn accepts_whitespace_padding() {
        assert_eq!(decode_frame(&frame(b"  150")), Ok(Weight::from_hundredths(150)));
        assert_eq!(decode_frame(&frame(b"0075 ")), Ok(Weight::from_hundredths(75)));
        assert_eq!(decode_frame(&frame(b"\t\r150")), Ok(Weight::from_hundredths(150)));
        assert_eq!(decode_frame(&frame(b"\x0B\x0C12\n")), Ok(Weight::from_hundredths(12)));
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(decode_frame(b""), Err(FrameError::Length(0)));
        assert_eq!(decode_frame(&[STX, 0, b'1', b'2', b'3', b'4', b'5', 0]), Err(FrameError::Length(8)));
        let mut long = frame(b"12345").to_vec();
        long.push(0);
        assert_eq!(decode_frame(&long), Err(FrameError::Length(10)));
    }

    #[test]
    fn rejects_missing_stx() {
        let mut f = frame(b"12345");
        f[0] = 0x03;
        assert_eq!(decode_frame(&f), Err(FrameError::MissingStx(0x03)));
    }

    #[test]
    fn rejects_non_digits() {
        for field in [b"12a45", b"-1234", b"+1234", b"     ", b"1 2 3"] {
            assert!(matches!(decode_frame(&frame(field)), Err(FrameError::InvalidDigits(_))));
        }
    }

    #[test]
    fn formats_sentinels_and_small_values() {
        assert_eq!(Weight::WRITE_FAILED.to_string(), "-1.00");
        assert_eq!(Weight::NO_CONNECTION.to_string(), "-2.00");
        assert_eq!(Weight::from_hundredths(5).to_string(), "0.05");
        assert_eq!(Weight::ZERO.to_string(), "0.00");
        assert!(!Weight::WRITE_FAILED.is_measurement());
        assert!(Weight::ZERO.is_measurement());
    }

    #[test]
    fn serializes_outcome_with_kind_tag() {
        let outcome = ReadOutcome::Weighed { weight: Weight::from_hundredths(250) };
        let json = serde_json::to_string(&outcome).unwrap();
        assert_eq!(json, r#"{"kind":"weighed","weight":250}"#);
    }
}
