use ring::digest::{self, SHA256};

use crate::rtp::error::*;

/// A 256-bit opaque digest.
#[derive(Copy, Clone, Eq, PartialEq)]
#[repr(transparent)]
pub struct Digest([u8; Digest::LENGTH]);

impl Digest {
    pub const LENGTH: usize = 32;

    pub fn compute(nonce: &[u8], password: &[u8]) -> Self {
        let mut ctx = digest::Context::new(&SHA256);
        ctx.update(nonce);
        ctx.update(password);
        let mut out = [0; Self::LENGTH];
        out.copy_from_slice(ctx.finish().as_ref());
        Self(out)
    }

    pub fn from_bytes(raw_bytes: &[u8]) -> Result<Self> {
        if raw_bytes.len() < Self::LENGTH {
            return Err("digest has an invalid length").wrapped(ErrorKind::Crypto);
        }
        let mut inner = [0; Self::LENGTH];
        inner.copy_from_slice(&raw_bytes[..Self::LENGTH]);
        Ok(Self(inner))
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Digest({})", hex::encode(self.0))
    }
}
