use std::sync::Arc;

use crate::rtp::error::*;
use crate::rtp::identity::{self, User};

/// Hard ceiling on a msg-layer body, independent of the pack mode's own
/// frame-size ceiling. Chosen below the 60 KiB frame cap so a
/// maximum-size body still leaves room for the header and destination
/// list in a single TCP4 frame.
pub const MSG_BODY_MAX: usize = 60 * 1024 - 4 * 1024;

/// Destination list is capped at 255 entries: `dstCount` is one byte
/// on the wire.
pub const MSG_DST_MAX: usize = 255;

const RESERVED: u8 = 0;

/// `RTP_MSG_HEADER` plus its trailing `dstUsers[dstCount-1]` and body:
/// `{charset:u16 net, srcUser:RTP_MSG_USER, reserved:u8, dstCount:u8,
/// dstUsers[1]:RTP_MSG_USER}` followed by `dstCount - 1` more
/// `RTP_MSG_USER` entries and then the opaque body.
///
/// `dstCount == 0` on the wire means "send to exactly the peer this
/// frame arrived from"; callers normalize that to a one-element
/// destination list on receive, so the rest of the stack never special
/// cases it. The header's embedded destination slot is always present
/// on the wire, even when `dstCount == 0` (its contents are then
/// unused).
#[derive(Clone)]
pub struct MsgFrame {
    src: User,
    charset: u16,
    dsts: Vec<User>,
    body: Arc<[u8]>,
}

impl MsgFrame {
    /// Header length through the embedded first destination slot:
    /// `charset(2) + srcUser(8) + reserved(1) + dstCount(1) + dstUsers[0](8)`.
    pub const HEADER_LEN: usize = 2 + identity::WIRE_LEN + 1 + 1 + identity::WIRE_LEN;

    pub fn new(src: User, charset: u16, dsts: Vec<User>, body: Arc<[u8]>) -> Result<Self> {
        if body.len() > MSG_BODY_MAX {
            return Err("msg body exceeds the configured ceiling").wrapped(ErrorKind::Codec);
        }
        if dsts.len() > MSG_DST_MAX {
            return Err("too many destinations for one frame").wrapped(ErrorKind::Codec);
        }
        Ok(Self { src, charset, dsts, body })
    }

    pub fn src(&self) -> User {
        self.src
    }

    pub fn charset(&self) -> u16 {
        self.charset
    }

    pub fn dsts(&self) -> &[User] {
        &self.dsts
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Serializes per `RTP_MSG_HEADER`.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.dsts.len() > MSG_DST_MAX {
            return Err("too many destinations for one frame").wrapped(ErrorKind::Codec);
        }
        let mut out = Vec::with_capacity(Self::HEADER_LEN + self.dsts.len().saturating_sub(1) * identity::WIRE_LEN + self.body.len());
        out.extend_from_slice(&self.charset.to_be_bytes());
        let mut user_buf = [0u8; identity::WIRE_LEN];
        identity::encode(&self.src, &mut user_buf)?;
        out.extend_from_slice(&user_buf);
        out.push(RESERVED);
        out.push(self.dsts.len() as u8);
        if self.dsts.is_empty() {
            out.extend_from_slice(&[0u8; identity::WIRE_LEN]);
        } else {
            identity::encode(&self.dsts[0], &mut user_buf)?;
            out.extend_from_slice(&user_buf);
            for dst in &self.dsts[1..] {
                identity::encode(dst, &mut user_buf)?;
                out.extend_from_slice(&user_buf);
            }
        }
        out.extend_from_slice(&self.body);
        Ok(out)
    }

    /// Parses a frame previously produced by `encode`. `fallback_dst` is
    /// used in place of the destination list when `dstCount == 0`: the
    /// peer this frame arrived on, for a reply-to-sender frame.
    pub fn decode(buf: &[u8], fallback_dst: User) -> Result<Self> {
        if buf.len() < Self::HEADER_LEN {
            return Err("buffer too small for RTP_MSG_HEADER").wrapped(ErrorKind::Codec);
        }
        let charset = u16::from_be_bytes([buf[0], buf[1]]);
        let mut off = 2;
        let src = identity::decode(&buf[off..off + identity::WIRE_LEN])?;
        off += identity::WIRE_LEN;
        let _reserved = buf[off];
        off += 1;
        let dst_count = buf[off] as usize;
        off += 1;
        let first_dst = identity::decode(&buf[off..off + identity::WIRE_LEN])?;
        off += identity::WIRE_LEN;

        let dsts = if dst_count == 0 {
            vec![fallback_dst]
        } else {
            let mut dsts = Vec::with_capacity(dst_count);
            dsts.push(first_dst);
            for _ in 1..dst_count {
                if buf.len() < off + identity::WIRE_LEN {
                    return Err("truncated destination list").wrapped(ErrorKind::Codec);
                }
                dsts.push(identity::decode(&buf[off..off + identity::WIRE_LEN])?);
                off += identity::WIRE_LEN;
            }
            dsts
        };

        let body = &buf[off..];
        if body.len() > MSG_BODY_MAX {
            return Err("msg body exceeds the configured ceiling").wrapped(ErrorKind::Codec);
        }
        Ok(Self { src, charset, dsts, body: Arc::from(body) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_with_explicit_destinations() {
        let src = User::new(2, 10, 0).unwrap();
        let dst1 = User::new(2, 20, 0).unwrap();
        let dst2 = User::new(2, 21, 0).unwrap();
        let frame = MsgFrame::new(src, 936, vec![dst1, dst2], Arc::from(&b"payload"[..])).unwrap();
        let wire = frame.encode().unwrap();

        let back = MsgFrame::decode(&wire, src).unwrap();
        assert_eq!(back.src(), src);
        assert_eq!(back.charset(), 936);
        assert_eq!(back.dsts(), &[dst1, dst2]);
        assert_eq!(back.body(), b"payload");
    }

    #[test]
    fn zero_dst_count_normalizes_to_fallback() {
        let src = User::new(2, 10, 0).unwrap();
        let frame = MsgFrame::new(src, 0, vec![], Arc::from(&b"x"[..])).unwrap();
        let wire = frame.encode().unwrap();

        let fallback = User::new(2, 99, 0).unwrap();
        let back = MsgFrame::decode(&wire, fallback).unwrap();
        assert_eq!(back.dsts(), &[fallback]);
    }

    #[test]
    fn oversized_body_is_rejected() {
        let src = User::new(2, 10, 0).unwrap();
        let body: Arc<[u8]> = Arc::from(vec![0u8; MSG_BODY_MAX + 1]);
        assert!(MsgFrame::new(src, 0, vec![], body).is_err());
    }

    #[test]
    fn too_many_destinations_is_rejected() {
        let src = User::new(2, 10, 0).unwrap();
        let dsts: Vec<User> = (0..=MSG_DST_MAX as u64).map(|i| User::new(2, 100 + i, 0).unwrap()).collect();
        assert!(MsgFrame::new(src, 0, dsts, Arc::from(&b""[..])).is_err());
    }
}
