//! The user identity model: a `(classId, userId, instId)` triple, its
//! wire encoding as `RTP_MSG_USER`, and the `"cid-uid-iid"` string
//! format used by the config-stream control messages.

use std::cmp::Ordering;
use std::fmt;

#[cfg(feature = "serialize_serde")]
use serde::{Deserialize, Serialize};

use crate::rtp::error::*;

/// Upper bound (inclusive) of the statically-allocated `userId` range.
pub const USER_ID_STATIC_MAX: u64 = 0xEF_FFFF_FFFF;
/// Lower bound (inclusive) of the dynamically-allocated `userId` range.
pub const USER_ID_DYNAMIC_MIN: u64 = 0xF0_0000_0000;
/// Upper bound (inclusive) of the `userId` space (40 bits).
pub const USER_ID_MAX: u64 = 0xFF_FFFF_FFFF;

/// `classId` of the hub and of C2S relay links.
pub const CLASS_ID_SERVER: u8 = 1;

/// A user identity: `(classId, userId, instId)`.
///
/// Compared lexicographically in the order `classId, userId, instId` —
/// a stable total order, which the router relies on for its per-user
/// map.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
pub struct User {
    class_id: u8,
    user_id: u64,
    inst_id: u16,
}

impl User {
    /// The reserved root identity `(1, 1, *)` denoting the hub itself.
    /// `instId` is not compared for "is this the root class+user".
    pub const ROOT_CLASS: u8 = CLASS_ID_SERVER;
    pub const ROOT_USER_ID: u64 = 1;

    pub fn new(class_id: u8, user_id: u64, inst_id: u16) -> Result<Self> {
        if class_id == 0 {
            return Err("classId 0 is invalid").wrapped(ErrorKind::Identity);
        }
        if user_id == 0 || user_id > USER_ID_MAX {
            return Err("userId out of range").wrapped(ErrorKind::Identity);
        }
        Ok(Self { class_id, user_id, inst_id })
    }

    /// Constructs a `User` without validating ranges; used when
    /// decoding a pending/zero identity that admission will validate
    /// or replace later (e.g. `userId == 0` requesting dynamic
    /// allocation).
    pub fn new_unchecked(class_id: u8, user_id: u64, inst_id: u16) -> Self {
        Self { class_id, user_id, inst_id }
    }

    pub fn class_id(&self) -> u8 {
        self.class_id
    }

    pub fn user_id(&self) -> u64 {
        self.user_id
    }

    pub fn inst_id(&self) -> u16 {
        self.inst_id
    }

    /// `true` for the reserved root identity `(1, 1, *)`.
    pub fn is_root(&self) -> bool {
        self.class_id == Self::ROOT_CLASS && self.user_id == Self::ROOT_USER_ID
    }

    /// `true` when `classId == 1`, i.e. this identity belongs to the
    /// server/C2S address space.
    pub fn is_c2s_class(&self) -> bool {
        self.class_id == CLASS_ID_SERVER
    }

    /// `true` when `userId` requests dynamic allocation by the hub.
    pub fn wants_dynamic_id(&self) -> bool {
        self.user_id == 0
    }

    /// `true` when `userId` falls in the dynamic-allocation range.
    pub fn is_dynamic(&self) -> bool {
        (USER_ID_DYNAMIC_MIN..=USER_ID_MAX).contains(&self.user_id)
    }

    /// Returns a copy of this identity with `userId` replaced.
    pub fn with_user_id(&self, user_id: u64) -> Self {
        Self { user_id, ..*self }
    }

    /// The per-link base/sub-user comparison key, ignoring `instId`.
    pub fn class_and_user(&self) -> (u8, u64) {
        (self.class_id, self.user_id)
    }
}

impl Ord for User {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.class_id, self.user_id, self.inst_id).cmp(&(
            other.class_id,
            other.user_id,
            other.inst_id,
        ))
    }
}

impl PartialOrd for User {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.class_id, self.user_id, self.inst_id)
    }
}

impl std::str::FromStr for User {
    type Err = Error;

    /// Parses `"cid-uid"` (instId defaults to 0) or `"cid-uid-iid"`.
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('-');
        let class_id: u8 = parts
            .next()
            .ok_or(())
            .simple(ErrorKind::Identity)?
            .parse()
            .simple(ErrorKind::Identity)?;
        let user_id: u64 = parts
            .next()
            .ok_or(())
            .simple(ErrorKind::Identity)?
            .parse()
            .simple(ErrorKind::Identity)?;
        let inst_id: u16 = match parts.next() {
            Some(s) => s.parse().simple(ErrorKind::Identity)?,
            None => 0,
        };
        if parts.next().is_some() {
            return Err("too many components in identity string").wrapped(ErrorKind::Identity);
        }
        Ok(User::new_unchecked(class_id, user_id, inst_id))
    }
}

/// Wire layout of `RTP_MSG_USER`: `classId:u8`, `userId` as 5
/// big-endian bytes, `instId:u16` network order.
pub const WIRE_LEN: usize = 1 + 5 + 2;

/// Encodes a `User` into its `RTP_MSG_USER` wire representation.
pub fn encode(user: &User, out: &mut [u8]) -> Result<()> {
    if out.len() < WIRE_LEN {
        return Err("buffer too small for RTP_MSG_USER").wrapped(ErrorKind::Identity);
    }
    out[0] = user.class_id;
    let uid_be = user.user_id.to_be_bytes(); // 8 bytes, top 3 are zero
    out[1..6].copy_from_slice(&uid_be[3..8]);
    let iid_be = user.inst_id.to_be_bytes();
    out[6..8].copy_from_slice(&iid_be);
    Ok(())
}

/// Decodes a `User` from its `RTP_MSG_USER` wire representation.
pub fn decode(buf: &[u8]) -> Result<User> {
    if buf.len() < WIRE_LEN {
        return Err("buffer too small for RTP_MSG_USER").wrapped(ErrorKind::Identity);
    }
    let class_id = buf[0];
    let mut uid_be = [0u8; 8];
    uid_be[3..8].copy_from_slice(&buf[1..6]);
    let user_id = u64::from_be_bytes(uid_be);
    let inst_id = u16::from_be_bytes([buf[6], buf[7]]);
    Ok(User::new_unchecked(class_id, user_id, inst_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_round_trip() {
        for s in ["2-1-1", "1-10-65535", "255-1099511627775-0"] {
            let user: User = s.parse().unwrap();
            assert_eq!(user.to_string(), s);
        }
    }

    #[test]
    fn string_defaults_inst_id_to_zero() {
        let user: User = "2-1".parse().unwrap();
        assert_eq!(user.inst_id(), 0);
    }

    #[test]
    fn wire_round_trip() {
        let user = User::new(2, USER_ID_MAX, 65535).unwrap();
        let mut buf = [0u8; WIRE_LEN];
        encode(&user, &mut buf).unwrap();
        let back = decode(&buf).unwrap();
        assert_eq!(user, back);
    }

    #[test]
    fn ordering_is_lexicographic() {
        let a = User::new_unchecked(1, 1, 0);
        let b = User::new_unchecked(1, 2, 0);
        let c = User::new_unchecked(2, 1, 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn root_identity() {
        let root = User::new_unchecked(1, 1, 65535);
        assert!(root.is_root());
    }

    #[test]
    fn dynamic_range_detection() {
        assert!(!User::new(2, 1, 0).unwrap().is_dynamic());
        assert!(User::new(2, USER_ID_DYNAMIC_MIN, 0).unwrap().is_dynamic());
    }
}
