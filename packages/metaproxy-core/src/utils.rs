//! General utilities shared across the crate.

use std::borrow::Cow;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Time Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Percent-Decoding
// ─────────────────────────────────────────────────────────────────────────────

/// Why a percent-encoded string was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PercentDecodeError {
    /// A `%` without two following characters.
    #[error("truncated escape at byte {0}")]
    Truncated(usize),

    /// A `%` followed by something other than two hex digits.
    #[error("invalid escape at byte {0}")]
    InvalidHex(usize),

    /// The decoded bytes are not UTF-8.
    #[error("decoded bytes are not valid UTF-8")]
    InvalidUtf8,
}

/// Percent-decodes `input`, rejecting malformed escapes.
///
/// `urlencoding::decode` passes a stray `%` through untouched; callers here
/// need to know the input was malformed, so escapes are checked first.
/// `+` is left as-is.
pub fn percent_decode_strict(input: &str) -> Result<String, PercentDecodeError> {
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 2 >= bytes.len() {
                return Err(PercentDecodeError::Truncated(i));
            }
            if !bytes[i + 1].is_ascii_hexdigit() || !bytes[i + 2].is_ascii_hexdigit() {
                return Err(PercentDecodeError::InvalidHex(i));
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    urlencoding::decode(input)
        .map(Cow::into_owned)
        .map_err(|_| PercentDecodeError::InvalidUtf8)
}

/// Form-decodes `input` (`+` is a space), falling back to the literal text
/// on any error.
#[must_use]
pub fn percent_decode_or_literal(input: &str) -> String {
    percent_decode_strict(&input.replace('+', " ")).unwrap_or_else(|e| {
        log::trace!("Keeping literal text {:?}: {}", input, e);
        input.to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_multibyte_sequences() {
        assert_eq!(percent_decode_strict("Bj%C3%B6rk").unwrap(), "Björk");
    }

    #[test]
    fn plus_is_not_a_space() {
        assert_eq!(percent_decode_strict("a+b").unwrap(), "a+b");
    }

    #[test]
    fn rejects_truncated_escape() {
        assert_eq!(
            percent_decode_strict("100%"),
            Err(PercentDecodeError::Truncated(3))
        );
        assert_eq!(
            percent_decode_strict("ab%4"),
            Err(PercentDecodeError::Truncated(2))
        );
    }

    #[test]
    fn rejects_non_hex_escape() {
        assert_eq!(
            percent_decode_strict("%zz"),
            Err(PercentDecodeError::InvalidHex(0))
        );
    }

    #[test]
    fn rejects_invalid_utf8() {
        assert_eq!(
            percent_decode_strict("%FF%FE"),
            Err(PercentDecodeError::InvalidUtf8)
        );
    }

    #[test]
    fn literal_fallback_keeps_input() {
        assert_eq!(percent_decode_or_literal("50% off"), "50% off");
        assert_eq!(percent_decode_or_literal("E%3DMC2"), "E=MC2");
    }

    #[test]
    fn form_decoding_reads_plus_as_space() {
        assert_eq!(percent_decode_or_literal("Simon+%26+Garfunkel"), "Simon & Garfunkel");
        assert_eq!(percent_decode_or_literal("1%2B1"), "1+1");
        // Malformed input is kept untouched, plus signs included
        assert_eq!(percent_decode_or_literal("100%+Hits"), "100%+Hits");
    }

    #[test]
    fn now_millis_is_after_2020() {
        assert!(now_millis() > 1_577_836_800_000);
    }
}
