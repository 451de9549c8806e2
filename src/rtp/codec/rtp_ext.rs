use crate::rtp::error::*;

/// A tiny hand-rolled bitflags macro: the crate avoids a dependency
/// for a 3-bit flag set.
macro_rules! bitflags_like {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $ty:ty {
            $(const $flag:ident = $value:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Eq, PartialEq, Default)]
        pub struct $name(pub $ty);

        impl $name {
            $(pub const $flag: $name = $name($value);)*

            pub const fn empty() -> Self {
                $name(0)
            }

            pub fn contains(self, other: Self) -> bool {
                (self.0 & other.0) == other.0
            }

            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}(0x{:02x})", stringify!($name), self.0)
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                $name(self.0 | rhs.0)
            }
        }
    };
}

bitflags_like! {
    /// Per-packet flags carried in `RTP_EXT::flags`.
    pub struct PacketFlags: u8 {
        const KEY_FRAME = 0b0000_0001;
        const FIRST_OF_FRAME = 0b0000_0010;
        const UDPX_SYNC = 0b0000_0100;
    }
}

/// The 8-byte extension header carried by every `DEFAULT`-pack-mode
/// packet: `{mmId:u32 net, mmType:u8, flags:u8, hdrAndPayloadSize:u16
/// net}`.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct RtpExt {
    pub mm_id: u32,
    pub mm_type: u8,
    pub flags: PacketFlags,
    pub hdr_and_payload_size: u16,
}

impl RtpExt {
    pub const LENGTH: usize = 8;

    /// Serializes this extension header into a fresh 8-byte buffer.
    pub fn serialize(&self) -> [u8; Self::LENGTH] {
        let mut buf = [0u8; Self::LENGTH];
        buf[0..4].copy_from_slice(&self.mm_id.to_be_bytes());
        buf[4] = self.mm_type;
        buf[5] = self.flags.0;
        buf[6..8].copy_from_slice(&self.hdr_and_payload_size.to_be_bytes());
        buf
    }

    /// Parses an extension header out of a buffer of at least
    /// `RtpExt::LENGTH` bytes.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::LENGTH {
            return Err("buffer too small for RTP_EXT").wrapped(ErrorKind::Codec);
        }
        let mm_id = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let mm_type = buf[4];
        let flags = PacketFlags(buf[5]);
        let hdr_and_payload_size = u16::from_be_bytes([buf[6], buf[7]]);
        Ok(Self { mm_id, mm_type, flags, hdr_and_payload_size })
    }

    /// `true` when this is the reserved heartbeat/keepalive frame: a
    /// zero-length payload in the current pack mode. For `DEFAULT` pack
    /// mode, that's an all-zero `RTP_EXT`.
    pub fn is_heartbeat(&self) -> bool {
        self.mm_id == 0
            && self.mm_type == 0
            && self.flags == PacketFlags::empty()
            && self.hdr_and_payload_size == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let ext = RtpExt {
            mm_id: 0xdead_beef,
            mm_type: 12,
            flags: PacketFlags::KEY_FRAME | PacketFlags::FIRST_OF_FRAME,
            hdr_and_payload_size: 4242,
        };
        let buf = ext.serialize();
        let back = RtpExt::parse(&buf).unwrap();
        assert_eq!(ext, back);
        assert!(back.flags.contains(PacketFlags::KEY_FRAME));
        assert!(back.flags.contains(PacketFlags::FIRST_OF_FRAME));
        assert!(!back.flags.contains(PacketFlags::UDPX_SYNC));
    }

    #[test]
    fn heartbeat_is_all_zero() {
        assert!(RtpExt::default().is_heartbeat());
    }
}
