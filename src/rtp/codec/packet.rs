use std::sync::Arc;

use crate::rtp::codec::{PackMode, RtpExt, RTP_HEADER_LEN, TCP4_PAYLOAD_SIZE_MAX};
use crate::rtp::error::*;

/// A packet ready to go on the wire, or just received off it.
///
/// The header is plain data and the payload is `Arc`-backed, so a
/// cheap `Clone` fans a single packet out to many destination sessions
/// at the cost of one atomic increment per destination, not a copy.
#[derive(Clone)]
pub struct Packet {
    ext: RtpExt,
    payload: Arc<[u8]>,
}

impl Packet {
    /// Builds a new packet around the extension header and payload.
    pub fn new(ext: RtpExt, payload: Arc<[u8]>) -> Self {
        Self { ext, payload }
    }

    pub fn from_slice(ext: RtpExt, payload: &[u8]) -> Self {
        Self { ext, payload: Arc::from(payload) }
    }

    /// An empty, zeroed packet: the heartbeat frame.
    pub fn heartbeat() -> Self {
        Self { ext: RtpExt::default(), payload: Arc::from(&[][..]) }
    }

    pub fn ext(&self) -> &RtpExt {
        &self.ext
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn is_heartbeat(&self) -> bool {
        self.ext.is_heartbeat() && self.payload.is_empty()
    }

    /// Serializes this packet for the wire, in the given pack mode.
    pub fn encode(&self, mode: PackMode) -> Result<Vec<u8>> {
        match mode {
            PackMode::Default => {
                let mut buf =
                    Vec::with_capacity(RtpExt::LENGTH + RTP_HEADER_LEN + self.payload.len());
                let mut ext = self.ext;
                ext.hdr_and_payload_size =
                    (RTP_HEADER_LEN + self.payload.len()).try_into().map_err(|_| {
                        Error::simple(ErrorKind::Codec)
                    })?;
                buf.extend_from_slice(&ext.serialize());
                buf.extend_from_slice(&[0u8; RTP_HEADER_LEN]);
                buf.extend_from_slice(&self.payload);
                Ok(buf)
            }
            PackMode::Tcp2 => {
                if self.payload.len() > u16::MAX as usize {
                    return Err("payload too large for TCP2 pack mode").wrapped(ErrorKind::Codec);
                }
                let mut buf = Vec::with_capacity(2 + self.payload.len());
                buf.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
                buf.extend_from_slice(&self.payload);
                Ok(buf)
            }
            PackMode::Tcp4 => {
                if self.payload.len() > TCP4_PAYLOAD_SIZE_MAX {
                    return Err("payload too large for TCP4 pack mode").wrapped(ErrorKind::Codec);
                }
                let mut buf = Vec::with_capacity(4 + self.payload.len());
                buf.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
                buf.extend_from_slice(&self.payload);
                Ok(buf)
            }
        }
    }
}
