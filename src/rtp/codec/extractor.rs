use crate::rtp::codec::{PackMode, Packet, RtpExt, RTP_HEADER_LEN};
use crate::rtp::error::*;

/// Application-level ceiling on a single frame, shared by `TCP2` and
/// `TCP4` pack modes.
pub const FRAME_SIZE_MAX: usize = 60 * 1024;

/// Minimal view over a transport's receive-side ring buffer that the
/// extractor needs. Implemented by `transport::RecvPool`; kept here,
/// rather than depending on `transport`, to avoid a cycle between the
/// codec and transport modules.
pub trait RecvPool {
    /// Total capacity of the underlying ring buffer.
    fn capacity(&self) -> usize;
    /// Number of contiguous bytes currently buffered and unread.
    fn peek_data_size(&self) -> usize;
    /// Copies up to `buf.len()` buffered bytes into `buf` without
    /// consuming them. Returns the number of bytes copied.
    fn peek_data(&self, buf: &mut [u8]) -> usize;
    /// Discards `n` buffered bytes (already consumed via `peek_data`).
    fn flush(&mut self, n: usize);
}

struct BigPacket {
    buf: Vec<u8>,
    filled: usize,
}

/// Extracts whole packets from a session's receive pool, one at a
/// time, preserving the streaming "big packet" reassembly path for
/// frames that don't fit contiguously in the pool.
pub struct PacketExtractor {
    mode: PackMode,
    big: Option<BigPacket>,
}

/// Result of one extraction attempt.
pub enum ExtractOutcome {
    /// Not enough bytes buffered yet; wait for the next read.
    NeedMoreData,
    /// A complete packet was extracted.
    Packet(Packet),
}

impl PacketExtractor {
    pub fn new(mode: PackMode) -> Self {
        Self { mode, big: None }
    }

    /// The pack mode this extractor was built with, so a session can
    /// encode outgoing packets the same way it decodes incoming ones.
    pub fn mode(&self) -> PackMode {
        self.mode
    }

    fn prefix_len(&self) -> usize {
        match self.mode {
            PackMode::Tcp2 => 2,
            PackMode::Tcp4 => 4,
            PackMode::Default => RtpExt::LENGTH,
        }
    }

    /// Attempts to extract a single packet. Call in a loop, draining
    /// `ExtractOutcome::Packet` results, until `NeedMoreData` is
    /// returned, each time more bytes arrive on the transport.
    pub fn extract_one<P: RecvPool>(&mut self, pool: &mut P) -> Result<ExtractOutcome> {
        if let Some(big) = &mut self.big {
            let need = big.buf.len() - big.filled;
            let avail = pool.peek_data_size().min(need);
            if avail > 0 {
                let mut tmp = vec![0u8; avail];
                pool.peek_data(&mut tmp);
                pool.flush(avail);
                big.buf[big.filled..big.filled + avail].copy_from_slice(&tmp);
                big.filled += avail;
            }
            if big.filled < big.buf.len() {
                return Ok(ExtractOutcome::NeedMoreData);
            }
            let BigPacket { buf, .. } = self.big.take().unwrap();
            return Ok(ExtractOutcome::Packet(Packet::from_slice(RtpExt::default(), &buf)));
        }

        let prefix_len = self.prefix_len();
        if pool.peek_data_size() < prefix_len {
            return Ok(ExtractOutcome::NeedMoreData);
        }
        let mut prefix = [0u8; RtpExt::LENGTH];
        pool.peek_data(&mut prefix[..prefix_len]);

        let (payload_len, ext, header_len) = match self.mode {
            PackMode::Tcp2 => {
                (u16::from_be_bytes([prefix[0], prefix[1]]) as usize, RtpExt::default(), 0)
            }
            PackMode::Tcp4 => (
                u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize,
                RtpExt::default(),
                0,
            ),
            PackMode::Default => {
                let ext = RtpExt::parse(&prefix[..RtpExt::LENGTH])?;
                let total = ext.hdr_and_payload_size as usize;
                let payload_len = total.saturating_sub(RTP_HEADER_LEN);
                (payload_len, ext, RTP_HEADER_LEN)
            }
        };

        if matches!(self.mode, PackMode::Tcp2 | PackMode::Tcp4) && payload_len > FRAME_SIZE_MAX {
            return Err("frame exceeds the 60 KiB application ceiling").wrapped(ErrorKind::Codec);
        }

        let total_frame = prefix_len + header_len + payload_len;

        if total_frame > pool.capacity() {
            if !matches!(self.mode, PackMode::Tcp4) {
                return Err("oversized frame in a pack mode without reassembly")
                    .wrapped(ErrorKind::Codec);
            }
            // Big-packet path: drain the length prefix now, and
            // incrementally reassemble the payload across future reads.
            pool.flush(prefix_len);
            let mut big = BigPacket { buf: vec![0u8; payload_len], filled: 0 };
            let avail = pool.peek_data_size().min(payload_len);
            if avail > 0 {
                let mut tmp = vec![0u8; avail];
                pool.peek_data(&mut tmp);
                pool.flush(avail);
                big.buf[..avail].copy_from_slice(&tmp);
                big.filled = avail;
            }
            if big.filled == big.buf.len() {
                return Ok(ExtractOutcome::Packet(Packet::from_slice(RtpExt::default(), &big.buf)));
            }
            self.big = Some(big);
            return Ok(ExtractOutcome::NeedMoreData);
        }

        if pool.peek_data_size() < total_frame {
            return Ok(ExtractOutcome::NeedMoreData);
        }

        let mut frame = vec![0u8; total_frame];
        pool.peek_data(&mut frame);
        pool.flush(total_frame);
        let payload = &frame[prefix_len + header_len..];
        Ok(ExtractOutcome::Packet(Packet::from_slice(ext, payload)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakePool {
        buf: Vec<u8>,
        capacity: usize,
    }

    impl RecvPool for FakePool {
        fn capacity(&self) -> usize {
            self.capacity
        }
        fn peek_data_size(&self) -> usize {
            self.buf.len()
        }
        fn peek_data(&self, out: &mut [u8]) -> usize {
            let n = out.len().min(self.buf.len());
            out[..n].copy_from_slice(&self.buf[..n]);
            n
        }
        fn flush(&mut self, n: usize) {
            self.buf.drain(..n.min(self.buf.len()));
        }
    }

    #[test]
    fn tcp4_simple_frame() {
        let mut pool = FakePool { buf: Vec::new(), capacity: 65536 };
        let body = b"hello world";
        pool.buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
        pool.buf.extend_from_slice(body);

        let mut extractor = PacketExtractor::new(PackMode::Tcp4);
        match extractor.extract_one(&mut pool).unwrap() {
            ExtractOutcome::Packet(p) => assert_eq!(p.payload(), body),
            ExtractOutcome::NeedMoreData => panic!("expected a packet"),
        }
    }

    #[test]
    fn tcp4_needs_more_data() {
        let mut pool = FakePool { buf: vec![0, 0, 0, 5, b'h', b'i'], capacity: 65536 };
        let mut extractor = PacketExtractor::new(PackMode::Tcp4);
        match extractor.extract_one(&mut pool).unwrap() {
            ExtractOutcome::NeedMoreData => {}
            ExtractOutcome::Packet(_) => panic!("should not have a full frame yet"),
        }
    }

    #[test]
    fn tcp4_big_packet_reassembly() {
        // pool can only ever hold 16 bytes contiguously, frame is 40
        let mut pool = FakePool { buf: Vec::new(), capacity: 16 };
        let body: Vec<u8> = (0..40u8).collect();
        pool.buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
        pool.buf.extend_from_slice(&body[..10]);

        let mut extractor = PacketExtractor::new(PackMode::Tcp4);
        match extractor.extract_one(&mut pool).unwrap() {
            ExtractOutcome::NeedMoreData => {}
            ExtractOutcome::Packet(_) => panic!("frame incomplete"),
        }

        pool.buf.extend_from_slice(&body[10..]);
        match extractor.extract_one(&mut pool).unwrap() {
            ExtractOutcome::Packet(p) => assert_eq!(p.payload(), &body[..]),
            ExtractOutcome::NeedMoreData => panic!("expected the reassembled packet"),
        }
    }

    #[test]
    fn oversized_frame_is_a_protocol_error() {
        let mut pool = FakePool { buf: Vec::new(), capacity: 65536 };
        pool.buf.extend_from_slice(&((FRAME_SIZE_MAX + 1) as u32).to_be_bytes());
        let mut extractor = PacketExtractor::new(PackMode::Tcp4);
        assert!(extractor.extract_one(&mut pool).is_err());
    }
}
