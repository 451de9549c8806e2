use crate::rtp::codec::PackMode;
use crate::rtp::error::*;
use crate::rtp::identity::{self, User};

/// `RTP_MSG_HEADER0`: the very first frame sent by the connecting side
/// of a handshake, identifying which user is dialing in before any
/// session parameters are agreed.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Header0 {
    pub version: u16,
    pub user: User,
    pub public_ip: [u8; 4],
}

impl Header0 {
    pub const LENGTH: usize = 2 + identity::WIRE_LEN + 4;

    pub fn serialize(&self) -> [u8; Self::LENGTH] {
        let mut buf = [0u8; Self::LENGTH];
        buf[0..2].copy_from_slice(&self.version.to_be_bytes());
        let mut user_buf = [0u8; identity::WIRE_LEN];
        identity::encode(&self.user, &mut user_buf).expect("fixed-size buffer");
        buf[2..2 + identity::WIRE_LEN].copy_from_slice(&user_buf);
        buf[2 + identity::WIRE_LEN..].copy_from_slice(&self.public_ip);
        buf
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::LENGTH {
            return Err("buffer too small for RTP_MSG_HEADER0").wrapped(ErrorKind::Codec);
        }
        let version = u16::from_be_bytes([buf[0], buf[1]]);
        let user = identity::decode(&buf[2..2 + identity::WIRE_LEN])?;
        let mut public_ip = [0u8; 4];
        public_ip.copy_from_slice(&buf[2 + identity::WIRE_LEN..Self::LENGTH]);
        Ok(Self { version, user, public_ip })
    }
}

/// `RTP_SESSION_INFO`: the parameters the two sides of a handshake
/// negotiate once the connecting identity is known — protocol
/// versions, the agreed pack mode, the password hash proving the
/// claimed identity, and the multiplexed-channel ids this link will
/// carry.
#[derive(Copy, Clone)]
pub struct SessionInfo {
    pub local_version: u16,
    pub remote_version: u16,
    pub session_type: u8,
    pub mm_type: u8,
    pub pack_mode: PackMode,
    pub password_hash: [u8; 32],
    pub some_id: u32,
    pub mm_id: u32,
    pub in_src_mm_id: u32,
    pub out_src_mm_id: u32,
    pub user_data: [u8; 64],
}

impl SessionInfo {
    pub const LENGTH: usize = 2 + 2 + 1 + 1 + 1 + 32 + 4 + 4 + 4 + 4 + 64;

    fn pack_mode_byte(mode: PackMode) -> u8 {
        match mode {
            PackMode::Default => 0,
            PackMode::Tcp2 => 1,
            PackMode::Tcp4 => 2,
        }
    }

    fn pack_mode_from_byte(b: u8) -> Result<PackMode> {
        match b {
            0 => Ok(PackMode::Default),
            1 => Ok(PackMode::Tcp2),
            2 => Ok(PackMode::Tcp4),
            _ => Err("unrecognized pack mode byte").wrapped(ErrorKind::Codec),
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::LENGTH);
        buf.extend_from_slice(&self.local_version.to_be_bytes());
        buf.extend_from_slice(&self.remote_version.to_be_bytes());
        buf.push(self.session_type);
        buf.push(self.mm_type);
        buf.push(Self::pack_mode_byte(self.pack_mode));
        buf.extend_from_slice(&self.password_hash);
        buf.extend_from_slice(&self.some_id.to_be_bytes());
        buf.extend_from_slice(&self.mm_id.to_be_bytes());
        buf.extend_from_slice(&self.in_src_mm_id.to_be_bytes());
        buf.extend_from_slice(&self.out_src_mm_id.to_be_bytes());
        buf.extend_from_slice(&self.user_data);
        buf
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::LENGTH {
            return Err("buffer too small for RTP_SESSION_INFO").wrapped(ErrorKind::Codec);
        }
        let mut off = 0;
        let local_version = u16::from_be_bytes([buf[0], buf[1]]);
        off += 2;
        let remote_version = u16::from_be_bytes([buf[off], buf[off + 1]]);
        off += 2;
        let session_type = buf[off];
        off += 1;
        let mm_type = buf[off];
        off += 1;
        let pack_mode = Self::pack_mode_from_byte(buf[off])?;
        off += 1;
        let mut password_hash = [0u8; 32];
        password_hash.copy_from_slice(&buf[off..off + 32]);
        off += 32;
        let some_id = u32::from_be_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let mm_id = u32::from_be_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let in_src_mm_id = u32::from_be_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let out_src_mm_id = u32::from_be_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let mut user_data = [0u8; 64];
        user_data.copy_from_slice(&buf[off..off + 64]);
        Ok(Self {
            local_version,
            remote_version,
            session_type,
            mm_type,
            pack_mode,
            password_hash,
            some_id,
            mm_id,
            in_src_mm_id,
            out_src_mm_id,
            user_data,
        })
    }
}

/// `RTP_SESSION_ACK`: the responder's final acknowledgement, closing
/// the handshake.
#[derive(Copy, Clone)]
pub struct SessionAck {
    pub version: u16,
    pub user_data: [u8; 62],
}

impl SessionAck {
    pub const LENGTH: usize = 2 + 62;

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::LENGTH);
        buf.extend_from_slice(&self.version.to_be_bytes());
        buf.extend_from_slice(&self.user_data);
        buf
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::LENGTH {
            return Err("buffer too small for RTP_SESSION_ACK").wrapped(ErrorKind::Codec);
        }
        let version = u16::from_be_bytes([buf[0], buf[1]]);
        let mut user_data = [0u8; 62];
        user_data.copy_from_slice(&buf[2..Self::LENGTH]);
        Ok(Self { version, user_data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header0_round_trip() {
        let h = Header0 { version: 3, user: User::new(2, 10, 0).unwrap(), public_ip: [10, 0, 0, 1] };
        let back = Header0::parse(&h.serialize()).unwrap();
        assert_eq!(h, back);
    }

    #[test]
    fn session_info_round_trip() {
        let info = SessionInfo {
            local_version: 3,
            remote_version: 3,
            session_type: 1,
            mm_type: 5,
            pack_mode: PackMode::Tcp4,
            password_hash: [7u8; 32],
            some_id: 0xAABB_CCDD,
            mm_id: 1,
            in_src_mm_id: 2,
            out_src_mm_id: 3,
            user_data: [9u8; 64],
        };
        let back = SessionInfo::parse(&info.serialize()).unwrap();
        assert_eq!(back.pack_mode, PackMode::Tcp4);
        assert_eq!(back.password_hash, [7u8; 32]);
        assert_eq!(back.some_id, 0xAABB_CCDD);
    }

    #[test]
    fn session_ack_round_trip() {
        let ack = SessionAck { version: 3, user_data: [1u8; 62] };
        let back = SessionAck::parse(&ack.serialize()).unwrap();
        assert_eq!(back.version, 3);
        assert_eq!(back.user_data, [1u8; 62]);
    }
}
