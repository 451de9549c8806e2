//! A small, fast, non-cryptographic PRNG used to pick connection ids,
//! jitter timer retries, and other book-keeping that doesn't need a
//! cryptographically secure source. The initial seed, however, is
//! pulled from the OS via `rand_core::OsRng`.

use rand_core::{OsRng, RngCore};

/// A xorshift64* generator. Cheap to carry one per thread/connection.
pub struct State(u64);

impl State {
    /// Seeds a new generator from the OS entropy source.
    pub fn new() -> Self {
        let mut seed = 0u64;
        while seed == 0 {
            seed = OsRng.next_u64();
        }
        Self(seed)
    }

    /// Returns the next pseudo-random `u64` in the sequence.
    pub fn next_state(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

/// Generates an 8-byte handshake nonce.
pub fn nonce() -> [u8; 8] {
    let mut buf = [0u8; 8];
    OsRng.fill_bytes(&mut buf);
    buf
}
