//! Line-oriented control-plane message codec.
//!
//! Wire format: an upper-cased method on the first line, then zero or more
//! `key: value` parameter lines (keys case-insensitive, stored lower-case),
//! a blank line, and an optional body made of the remaining lines joined by
//! `\n`. Parsing never fails — malformed lines before the blank separator
//! are simply ignored, matching the tolerance of the wire format used by
//! every control-plane participant (coordinator, ingest, encoder).

mod typed;

use std::collections::BTreeMap;
use std::fmt;

pub use typed::{ControlMessage, MessageError};

/// A parsed or to-be-serialized control-plane message.
///
/// Parameters are a mapping keyed by lower-cased names; insertion order is
/// not meaningful (the wire format says so explicitly) so a `BTreeMap` gives
/// us deterministic serialization for free without claiming an ordering
/// guarantee callers should rely on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    method: String,
    params: BTreeMap<String, String>,
    body: Option<String>,
}

impl Message {
    /// Starts building a message with the given method, upper-cased.
    pub fn new(method: impl AsRef<str>) -> Self {
        Message {
            method: method.as_ref().to_uppercase(),
            params: BTreeMap::new(),
            body: None,
        }
    }

    /// Sets a parameter. The key is lower-cased; the value is stored as-is
    /// (callers are expected to pass already-meaningful values — trimming
    /// only happens on parse, where it recovers values that travelled over
    /// the wire).
    #[must_use]
    pub fn with_param(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.params.insert(key.as_ref().to_lowercase(), value.into());
        self
    }

    /// Sets the body. An empty body is equivalent to no body at all: it will
    /// not be serialized and `body()` will return `None` for it.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        let body = body.into();
        self.body = if body.is_empty() { None } else { Some(body) };
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Looks up a parameter by name, case-insensitively.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(&key.to_lowercase()).map(String::as_str)
    }

    pub fn params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// Parses a raw message off the wire. Always succeeds: a message with no
    /// recognizable method is simply a `Message` whose method is the empty
    /// string, left for the caller to reject.
    #[must_use]
    pub fn parse(raw: &str) -> Message {
        let mut lines = raw.split('\n');
        let method = lines.next().unwrap_or("").trim().to_uppercase();

        let mut params = BTreeMap::new();
        let mut body_lines: Vec<&str> = Vec::new();
        let mut in_body = false;

        for line in lines {
            if in_body {
                body_lines.push(line);
                continue;
            }

            if line.is_empty() {
                in_body = true;
                continue;
            }

            if let Some(colon) = line.find(':') {
                let key = line[..colon].trim().to_lowercase();
                let value = line[colon + 1..].trim().to_string();
                params.insert(key, value);
            }
            // A header line with no colon is dropped rather than rejecting
            // the whole message; a single stray line must not take down an
            // otherwise-well-formed control connection.
        }

        let body = if body_lines.is_empty() {
            None
        } else {
            Some(body_lines.join("\n"))
        };

        Message { method, params, body }
    }

    /// Serializes back to the wire format. `parse(serialize(m)) == m` holds
    /// for any `m` built through this API (params are already unique and
    /// lower-cased by construction).
    #[must_use]
    pub fn serialize(&self) -> String {
        let mut out = String::with_capacity(32 + self.params.len() * 24);
        out.push_str(&self.method);

        for (key, value) in &self.params {
            out.push('\n');
            out.push_str(key);
            out.push_str(": ");
            out.push_str(value);
        }

        if let Some(body) = &self.body {
            out.push_str("\n\n");
            out.push_str(body);
        }

        out
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_method_only() {
        let m = Message::new("heartbeat");
        assert_eq!(Message::parse(&m.serialize()), m);
    }

    #[test]
    fn round_trips_params_and_body() {
        let m = Message::new("error")
            .with_param("Error-Code", "404")
            .with_param("error-message", "not found")
            .with_body("extra diagnostic text\nsecond line");
        let wire = m.serialize();
        assert_eq!(Message::parse(&wire), m);
    }

    #[test]
    fn method_is_upper_cased() {
        let m = Message::parse("publish-request\nrequest-id: 1\n\n");
        assert_eq!(m.method(), "PUBLISH-REQUEST");
    }

    #[test]
    fn param_keys_are_case_insensitive_on_lookup() {
        let m = Message::parse("REGISTER\nCapacity: 4\n");
        assert_eq!(m.param("CAPACITY"), Some("4"));
        assert_eq!(m.param("capacity"), Some("4"));
    }

    #[test]
    fn param_values_are_trimmed() {
        let m = Message::parse("REGISTER\nCapacity:    4   \n");
        assert_eq!(m.param("capacity"), Some("4"));
    }

    #[test]
    fn empty_body_is_not_serialized() {
        let m = Message::new("heartbeat").with_body("");
        assert_eq!(m.serialize(), "HEARTBEAT");
        assert_eq!(m.body(), None);
    }

    #[test]
    fn stray_header_lines_without_colon_are_ignored() {
        let m = Message::parse("REGISTER\nnot-a-param-line\nCapacity: 4\n");
        assert_eq!(m.param("capacity"), Some("4"));
        assert_eq!(m.params().count(), 1);
    }

    #[test]
    fn body_can_contain_blank_lines() {
        let m = Message::new("error").with_body("line one\n\nline three");
        let wire = m.serialize();
        assert_eq!(Message::parse(&wire).body(), Some("line one\n\nline three"));
    }
}
