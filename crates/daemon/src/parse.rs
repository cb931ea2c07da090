//! Primitive value decoders used by the configuration loader.
//!
//! Each decoder takes the bytes starting at a value and returns the decoded
//! value together with the number of bytes it consumed. Whatever follows the
//! consumed bytes belongs to the caller.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// The token contained no digit at all.
    NoDigits,
    /// The number does not fit in a `u32`.
    Overflow,
    /// Neither `true` nor `false`.
    NotBoolean,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoDigits => write!(f, "expected an unsigned number"),
            Self::Overflow => write!(f, "number out of range"),
            Self::NotBoolean => write!(f, "expected `true` or `false`"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Separators that may appear anywhere inside a numeric token.
fn is_separator(b: u8) -> bool {
    b == b' ' || b == b'_'
}

/// Decode an unsigned number. Digits may be interleaved with `' '` and `'_'`
/// (`"1_000"`, `"1 000"`). The token ends at the first byte that is neither a
/// digit nor a separator, so a newline or the next directive stops it.
pub fn parse_uint(input: &[u8]) -> Result<(u32, usize), ParseError> {
    let mut value: u32 = 0;
    let mut seen_digit = false;
    let mut consumed = 0;

    for &b in input {
        if b.is_ascii_digit() {
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add(u32::from(b - b'0')))
                .ok_or(ParseError::Overflow)?;
            seen_digit = true;
        } else if !is_separator(b) {
            break;
        }
        consumed += 1;
    }

    if seen_digit {
        Ok((value, consumed))
    } else {
        Err(ParseError::NoDigits)
    }
}

/// Decode exactly `true` or `false` (case-sensitive).
pub fn parse_bool(input: &[u8]) -> Result<(bool, usize), ParseError> {
    if input.starts_with(b"true") {
        Ok((true, 4))
    } else if input.starts_with(b"false") {
        Ok((false, 5))
    } else {
        Err(ParseError::NotBoolean)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -- parse_uint ---------------------------------------------------------

    #[test]
    fn uint_plain() {
        assert_eq!(parse_uint(b"45"), Ok((45, 2)));
    }

    #[test]
    fn uint_stops_at_newline() {
        assert_eq!(parse_uint(b"33\nlow_temp 1"), Ok((33, 2)));
    }

    #[test]
    fn uint_underscore_and_space_separators() {
        assert_eq!(parse_uint(b"1_000"), Ok((1000, 5)));
        assert_eq!(parse_uint(b"1 0 0"), Ok((100, 5)));
    }

    #[test]
    fn uint_separators_need_not_touch_digits() {
        assert_eq!(parse_uint(b"__ 4 _2__"), Ok((42, 9)));
    }

    #[test]
    fn uint_trailing_spaces_are_consumed() {
        assert_eq!(parse_uint(b"7   \n"), Ok((7, 4)));
    }

    #[test]
    fn uint_stops_at_next_directive() {
        let (v, n) = parse_uint(b"29 trigger_temp 33").unwrap();
        assert_eq!(v, 29);
        assert_eq!(n, 3);
    }

    #[test]
    fn uint_without_digits_rejected() {
        assert_eq!(parse_uint(b"abc"), Err(ParseError::NoDigits));
        assert_eq!(parse_uint(b"  __ \n"), Err(ParseError::NoDigits));
        assert_eq!(parse_uint(b""), Err(ParseError::NoDigits));
    }

    #[test]
    fn uint_max_accepted() {
        assert_eq!(parse_uint(b"4294967295"), Ok((u32::MAX, 10)));
    }

    #[test]
    fn uint_overflow_rejected() {
        assert_eq!(parse_uint(b"4294967296"), Err(ParseError::Overflow));
    }

    // -- parse_bool ---------------------------------------------------------

    #[test]
    fn bool_literals() {
        assert_eq!(parse_bool(b"true"), Ok((true, 4)));
        assert_eq!(parse_bool(b"false\n"), Ok((false, 5)));
    }

    #[test]
    fn bool_is_case_sensitive() {
        assert_eq!(parse_bool(b"True"), Err(ParseError::NotBoolean));
        assert_eq!(parse_bool(b"FALSE"), Err(ParseError::NotBoolean));
    }

    #[test]
    fn bool_other_spellings_rejected() {
        assert_eq!(parse_bool(b"1"), Err(ParseError::NotBoolean));
        assert_eq!(parse_bool(b"yes"), Err(ParseError::NotBoolean));
        assert_eq!(parse_bool(b"tru"), Err(ParseError::NotBoolean));
    }
}
