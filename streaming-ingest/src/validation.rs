//! Channel/key id validation. Duplicated from the coordinator's copy
//! rather than shared: each binary in the distilled source carries its own
//! `server_utils.go`-equivalent, and the two crates have no other reason
//! to depend on each other.

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
    fn rejects_empty_and_oversized() {
        assert!(!is_valid_id("", DEFAULT_ID_MAX_LENGTH));
        assert!(!is_valid_id(&"a".repeat(200), DEFAULT_ID_MAX_LENGTH));
    }

    #[test]
    fn rejects_disallowed_characters() {
        assert!(!is_valid_id("chan/nel", DEFAULT_ID_MAX_LENGTH));
        assert!(!is_valid_id("chan nel", DEFAULT_ID_MAX_LENGTH));
    }
}
