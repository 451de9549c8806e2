//! The config-stream control messages carried as msg-frame bodies
//! during login/kickout/logout: `name=value;name=value;...` lines, the
//! same shape as the original protocol's "config string" rather than a
//! binary struct, because these are rare, small, and meant to be easy
//! to tcpdump by eye.

use crate::rtp::collections::{hash_map, HashMap};
use crate::rtp::error::*;

/// A parsed `name=value;` control message, order-preserving only in
/// that later duplicate keys overwrite earlier ones (matching a
/// streaming parser that can't look ahead).
pub struct CtrlMessage {
    fields: HashMap<String, String>,
}

impl CtrlMessage {
    pub fn new() -> Self {
        Self { fields: hash_map() }
    }

    pub fn set(mut self, key: &str, value: impl ToString) -> Self {
        self.fields.insert(key.to_owned(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(|s| s.as_str())
    }

    pub fn get_u64(&self, key: &str) -> Result<u64> {
        self.get(key).ok_or(()).simple(ErrorKind::MsgClient)?.parse().simple(ErrorKind::MsgClient)
    }

    /// Parses a `name=value;name=value;` control string. Empty segments
    /// (from a trailing `;` or doubled `;;`) are skipped; a segment with
    /// no `=` is a protocol error.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(body).simple(ErrorKind::MsgClient)?;
        let mut fields = hash_map();
        for segment in text.split(';') {
            if segment.is_empty() {
                continue;
            }
            let mut parts = segment.splitn(2, '=');
            let key = parts.next().unwrap();
            let value = parts.next().ok_or(()).simple(ErrorKind::MsgClient)?;
            fields.insert(key.to_owned(), value.to_owned());
        }
        Ok(Self { fields })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = String::new();
        for (k, v) in &self.fields {
            out.push_str(k);
            out.push('=');
            out.push_str(v);
            out.push(';');
        }
        out.into_bytes()
    }
}

impl Default for CtrlMessage {
    fn default() -> Self {
        Self::new()
    }
}

/// The control messages a session exchanges while logging in, being
/// kicked, or logging out, named the way the original protocol's
/// config-stream types are: `client_login`, `client_login_ok`,
/// `client_login_error`, `client_kickout`, `client_logout`.
pub mod kind {
    pub const CLIENT_LOGIN: &str = "client_login";
    pub const CLIENT_LOGIN_OK: &str = "client_login_ok";
    pub const CLIENT_LOGIN_ERROR: &str = "client_login_error";
    pub const CLIENT_KICKOUT: &str = "client_kickout";
    pub const CLIENT_LOGOUT: &str = "client_logout";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_simple_fields() {
        let msg = CtrlMessage::new().set("userId", 42).set("passwordHash", "deadbeef");
        let encoded = msg.encode();
        let back = CtrlMessage::parse(&encoded).unwrap();
        assert_eq!(back.get("userId"), Some("42"));
        assert_eq!(back.get("passwordHash"), Some("deadbeef"));
    }

    #[test]
    fn tolerates_trailing_semicolon() {
        let back = CtrlMessage::parse(b"a=1;b=2;").unwrap();
        assert_eq!(back.get("a"), Some("1"));
        assert_eq!(back.get("b"), Some("2"));
    }

    #[test]
    fn rejects_segment_without_equals() {
        assert!(CtrlMessage::parse(b"a=1;garbage;").is_err());
    }

    #[test]
    fn get_u64_parses_numeric_field() {
        let msg = CtrlMessage::parse(b"userId=100;").unwrap();
        assert_eq!(msg.get_u64("userId").unwrap(), 100);
    }
}
