//! Channel/key id validation shared by the publish handshake and the HTTP
//! commands surface.

/// Default max length for a channel or stream-key id, overridable via
/// `ID_MAX_LENGTH`. A malformed override (non-numeric, zero) silently
/// falls back to this default rather than failing startup.
pub const DEFAULT_ID_MAX_LENGTH: usize = 128;

/// `true` iff `s` is non-empty, at most `max_length` bytes, and composed
/// only of ASCII letters, digits, `_`, and `-`.
pub fn is_valid_id(s: &str, max_length: usize) -> bool {
    !s.is_empty()
        && s.len() <= max_length
        && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_ids() {
        assert!(is_valid_id("channel-1_ABC", DEFAULT_ID_MAX_LENGTH));
    }

    #[test]
    fn rejects_empty() {
        assert!(!is_valid_id("", DEFAULT_ID_MAX_LENGTH));
    }

    #[test]
    fn rejects_disallowed_characters() {
        assert!(!is_valid_id("chan/nel", DEFAULT_ID_MAX_LENGTH));
        assert!(!is_valid_id("chan nel", DEFAULT_ID_MAX_LENGTH));
    }

    #[test]
    fn rejects_over_length() {
        let long = "a".repeat(200);
        assert!(!is_valid_id(&long, DEFAULT_ID_MAX_LENGTH));
    }
}
