use std::fmt;

/// Display wrapper that hides chat content in logs, keeping only its length.
///
/// ```
/// use courier_types::redact::Redacted;
/// assert_eq!(Redacted("hello").to_string(), "[REDACTED: 5 chars]");
/// ```
#[derive(Clone, Copy)]
pub struct Redacted<'a>(pub &'a str);

impl fmt::Display for Redacted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED: {} chars]", self.0.chars().count())
    }
}

impl fmt::Debug for Redacted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Truncated, redaction-safe preview of a raw frame for diagnostics.
/// Only the frame length is kept; frames may carry message bodies.
pub fn frame_summary(raw: &str) -> String {
    format!("<frame {} bytes>", raw.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_chars_not_bytes() {
        assert_eq!(Redacted("héllo").to_string(), "[REDACTED: 5 chars]");
        assert_eq!(format!("{:?}", Redacted("")), "[REDACTED: 0 chars]");
    }
}
