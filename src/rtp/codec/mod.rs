//! The packet codec: frame layouts for the three pack modes, the
//! reference-counted `Packet` type, the streaming extractor (including
//! the big-packet reassembly path), and the msg-layer frame
//! (`RTP_MSG_HEADER` + destinations + body).

mod extractor;
mod msg_frame;
mod packet;
mod rtp_ext;
mod session_frame;

pub use extractor::{ExtractOutcome, PacketExtractor, RecvPool};
pub use msg_frame::{MsgFrame, MSG_BODY_MAX, MSG_DST_MAX};
pub use packet::Packet;
pub use rtp_ext::{PacketFlags, RtpExt};
pub use session_frame::{Header0, SessionAck, SessionInfo};

/// Framing mode of a session.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum PackMode {
    /// `[RTP_EXT:8][RTP_HEADER:12][payload]`.
    Default,
    /// `[len:u16 net][payload]`, `len` counts payload only.
    Tcp2,
    /// `[len:u32 net][payload]`, `len <= PRO_TCP4_PAYLOAD_SIZE`.
    Tcp4,
}

/// Transport-layer ceiling on a single TCP4 frame's payload
/// (`PRO_TCP4_PAYLOAD_SIZE`).
pub const TCP4_PAYLOAD_SIZE_MAX: usize = 65520;

/// `RTP_HEADER` is a fixed 12-byte structure in `DEFAULT` pack mode;
/// its contents are opaque to the msg layer, which only cares about
/// `RTP_EXT` and the payload.
pub const RTP_HEADER_LEN: usize = 12;
