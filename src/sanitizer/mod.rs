//! Input normalization.
//!
//! Turns raw request bytes into the canonical text form that is hashed,
//! cached and matched against rules. Rejected inputs never reach the
//! cache, the rule engine or the audit log.

use thiserror::Error;

/// Default maximum input length in characters.
pub const DEFAULT_MAX_CHARS: usize = 10_000;

/// Reasons an input is rejected before evaluation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("input is not valid UTF-8 (valid up to byte {valid_up_to})")]
    InvalidEncoding { valid_up_to: usize },

    #[error("input too long: {len} characters exceeds limit of {max}")]
    TooLong { len: usize, max: usize },

    #[error("input is empty after sanitization")]
    Empty,
}

/// Normalizes raw input into canonical text.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    max_chars: usize,
}

impl Sanitizer {
    pub fn new(max_chars: usize) -> Self {
        Sanitizer { max_chars }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Sanitize raw bytes.
    pub fn sanitize(&self, raw: &[u8]) -> Result<String, ValidationError> {
        let text = std::str::from_utf8(raw).map_err(|e| ValidationError::InvalidEncoding {
            valid_up_to: e.valid_up_to(),
        })?;

        self.sanitize_str(text)
    }

    /// Sanitize already-decoded text.
    ///
    /// Control and zero-width characters are dropped, whitespace runs inside
    /// a line collapse to a single space, and blank lines are removed.
    pub fn sanitize_str(&self, text: &str) -> Result<String, ValidationError> {
        let len = text.chars().count();
        if len > self.max_chars {
            return Err(ValidationError::TooLong {
                len,
                max: self.max_chars,
            });
        }

        let mut clean = String::with_capacity(text.len());
        for line in text.lines() {
            let mut pending_space = false;
            let mut line_started = false;

            for c in line.chars() {
                if c.is_whitespace() {
                    pending_space = line_started;
                    continue;
                }
                if is_stripped(c) {
                    continue;
                }

                if !line_started {
                    if !clean.is_empty() {
                        clean.push('\n');
                    }
                    line_started = true;
                } else if pending_space {
                    clean.push(' ');
                }
                pending_space = false;
                clean.push(c);
            }
        }

        if clean.is_empty() {
            return Err(ValidationError::Empty);
        }

        Ok(clean)
    }
}

impl Default for Sanitizer {
    fn default() -> Self {
        Sanitizer::new(DEFAULT_MAX_CHARS)
    }
}

/// Characters removed outright (whitespace is handled separately).
#[inline]
fn is_stripped(c: char) -> bool {
    c.is_control() || matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_unchanged() {
        let s = Sanitizer::default();
        assert_eq!(s.sanitize(b"rm -rf /var/log/*").unwrap(), "rm -rf /var/log/*");
    }

    #[test]
    fn test_collapses_whitespace() {
        let s = Sanitizer::default();
        let clean = s.sanitize_str("  ignore \t\t all   instructions  ").unwrap();
        assert_eq!(clean, "ignore all instructions");
    }

    #[test]
    fn test_removes_control_and_null_bytes() {
        let s = Sanitizer::default();
        let clean = s.sanitize(b"ig\0nore\x07 previous\x1b instructions").unwrap();
        assert_eq!(clean, "ignore previous instructions");
    }

    #[test]
    fn test_removes_zero_width_characters() {
        let s = Sanitizer::default();
        let clean = s.sanitize_str("ig\u{200B}nore in\u{FEFF}structions").unwrap();
        assert_eq!(clean, "ignore instructions");
    }

    #[test]
    fn test_keeps_line_structure() {
        let s = Sanitizer::default();
        let clean = s.sanitize_str("first   line\r\n\r\n\n  second line  \n").unwrap();
        assert_eq!(clean, "first line\nsecond line");
    }

    #[test]
    fn test_rejects_invalid_utf8() {
        let s = Sanitizer::default();
        let err = s.sanitize(&[b'o', b'k', 0xff, 0xfe]).unwrap_err();
        assert_eq!(err, ValidationError::InvalidEncoding { valid_up_to: 2 });
    }

    #[test]
    fn test_rejects_oversized_input() {
        let s = Sanitizer::new(10);
        let err = s.sanitize_str("this is definitely too long").unwrap_err();
        assert!(matches!(err, ValidationError::TooLong { max: 10, .. }));
    }

    #[test]
    fn test_length_counts_characters() {
        let s = Sanitizer::new(3);
        assert!(s.sanitize_str("äöü").is_ok());
    }

    #[test]
    fn test_rejects_blank_input() {
        let s = Sanitizer::default();
        assert_eq!(s.sanitize_str(" \n\t\0 ").unwrap_err(), ValidationError::Empty);
    }
}
