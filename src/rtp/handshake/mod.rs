//! The three-frame handshake that follows a raw TCP accept or connect:
//! `RTP_MSG_HEADER0` (who's calling), `RTP_SESSION_INFO` (negotiated
//! parameters plus the password proof), and `RTP_SESSION_ACK` (the
//! responder's confirmation). `Acceptor` and `Connector` bound how many
//! of these are in flight at once; `Handshaker` builds and validates
//! the frames themselves.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::rtp::codec::{Header0, PackMode, SessionAck, SessionInfo};
use crate::rtp::crypto::hash::{password_hash, Digest};
use crate::rtp::error::*;
use crate::rtp::identity::User;
use crate::rtp::prng;

/// Current protocol version this build speaks.
pub const PROTOCOL_VERSION: u16 = 3;

/// A counting admission gate shared by `Acceptor` and `Connector`: both
/// need the same "cap in-flight handshakes, release on drop" behavior,
/// just against different limits.
struct Gate {
    pending: AtomicUsize,
    pending_max: usize,
}

impl Gate {
    fn new(pending_max: usize) -> Self {
        Self { pending: AtomicUsize::new(0), pending_max }
    }

    fn try_admit(&self) -> Result<PendingSlot<'_>> {
        let prev = self.pending.fetch_add(1, Ordering::AcqRel);
        if prev >= self.pending_max {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return Err("pending-handshake cap reached").wrapped(ErrorKind::Handshake);
        }
        Ok(PendingSlot { pending: &self.pending })
    }
}

/// RAII guard releasing a pending-accept slot when the preamble
/// resolves (or times out).
pub struct PendingSlot<'a> {
    pending: &'a AtomicUsize,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Bounds the number of freshly-accepted sockets waiting on their
/// preamble, so a flood of half-open connections can't grow without
/// bound while legitimate clients are still completing the handshake.
pub struct Acceptor(Gate);

impl Acceptor {
    pub fn new(pending_max: usize) -> Self {
        Self(Gate::new(pending_max))
    }

    /// Reserves a pending-accept slot. `Err` means the cap is hit and
    /// the new connection should be dropped without being read from.
    pub fn try_admit(&self) -> Result<PendingSlot<'_>> {
        self.0.try_admit()
    }
}

/// The active side's mirror of `Acceptor`: bounds in-flight outbound
/// connects the same way.
pub struct Connector(Gate);

impl Connector {
    pub fn new(pending_max: usize) -> Self {
        Self(Gate::new(pending_max))
    }

    pub fn try_admit(&self) -> Result<PendingSlot<'_>> {
        self.0.try_admit()
    }
}

/// Builds and validates the session-info/ack exchange.
pub struct Handshaker {
    local_version: u16,
}

impl Handshaker {
    pub fn new() -> Self {
        Self { local_version: PROTOCOL_VERSION }
    }

    pub fn build_header0(&self, user: User, public_ip: [u8; 4]) -> Header0 {
        Header0 { version: self.local_version, user, public_ip }
    }

    /// Builds the `RTP_SESSION_INFO` an initiator sends, proving its
    /// claimed identity by hashing `nonce` (received from the accepting
    /// side during the preamble) with the shared password, and
    /// embedding `RTP_MSG_HEADER0` for `claimed_user` in `userData` so
    /// the acceptor learns which identity is dialing in before the
    /// session is `Ready`.
    #[allow(clippy::too_many_arguments)]
    pub fn build_session_info(
        &self,
        remote_version: u16,
        session_type: u8,
        mm_type: u8,
        pack_mode: PackMode,
        nonce: &[u8],
        password: &[u8],
        mm_id: u32,
        claimed_user: User,
    ) -> SessionInfo {
        let digest = password_hash(nonce, password);
        let header0 = Header0 { version: self.local_version, user: claimed_user, public_ip: [0u8; 4] };
        let mut user_data = [0u8; 64];
        user_data[..Header0::LENGTH].copy_from_slice(&header0.serialize());
        SessionInfo {
            local_version: self.local_version,
            remote_version,
            session_type,
            mm_type,
            pack_mode,
            password_hash: *digest.as_ref_array(),
            some_id: prng::nonce()[0] as u32,
            mm_id,
            in_src_mm_id: 0,
            out_src_mm_id: 0,
            user_data,
        }
    }

    /// Recovers the claimed identity a connecting side embedded in
    /// `RTP_SESSION_INFO.userData` via `build_session_info`.
    pub fn claimed_user(info: &SessionInfo) -> Result<User> {
        Header0::parse(&info.user_data).map(|h| h.user)
    }

    /// Validates a received `RTP_SESSION_INFO` against the password we
    /// expect for the claimed identity.
    pub fn validate_session_info(&self, info: &SessionInfo, nonce: &[u8], expected_password: &[u8]) -> Result<()> {
        let expected = password_hash(nonce, expected_password);
        if info.password_hash != *expected.as_ref_array() {
            return Err("password hash mismatch").wrapped(ErrorKind::Handshake);
        }
        Ok(())
    }

    pub fn build_session_ack(&self) -> SessionAck {
        SessionAck { version: self.local_version, user_data: [0u8; 62] }
    }
}

impl Default for Handshaker {
    fn default() -> Self {
        Self::new()
    }
}

trait DigestExt {
    fn as_ref_array(&self) -> &[u8; 32];
}

impl DigestExt for Digest {
    fn as_ref_array(&self) -> &[u8; 32] {
        let slice = self.as_ref();
        slice.try_into().expect("digest is always 32 bytes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_cap_is_enforced() {
        let acceptor = Acceptor::new(1);
        let _slot = acceptor.try_admit().unwrap();
        assert!(acceptor.try_admit().is_err());
    }

    #[test]
    fn slot_release_frees_capacity() {
        let acceptor = Acceptor::new(1);
        {
            let _slot = acceptor.try_admit().unwrap();
        }
        assert!(acceptor.try_admit().is_ok());
    }

    #[test]
    fn matching_password_validates() {
        let hs = Handshaker::new();
        let nonce = b"abcdefgh";
        let user = User::new(2, 10, 0).unwrap();
        let info = hs.build_session_info(3, 0, 1, PackMode::Tcp4, nonce, b"secret", 7, user);
        assert!(hs.validate_session_info(&info, nonce, b"secret").is_ok());
        assert!(hs.validate_session_info(&info, nonce, b"wrong").is_err());
    }

    #[test]
    fn claimed_user_round_trips_through_session_info() {
        let hs = Handshaker::new();
        let nonce = b"abcdefgh";
        let user = User::new(2, 42, 7).unwrap();
        let info = hs.build_session_info(3, 0, 1, PackMode::Tcp4, nonce, b"secret", 7, user);
        assert_eq!(Handshaker::claimed_user(&info).unwrap(), user);
    }
}
