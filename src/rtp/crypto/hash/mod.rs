//! Selects the hash backend behind a feature flag.

#[cfg(feature = "crypto_hash_blake3")]
mod blake3;
#[cfg(feature = "crypto_hash_blake3")]
pub use self::blake3::Digest;

#[cfg(all(feature = "crypto_hash_ring_sha2", not(feature = "crypto_hash_blake3")))]
mod ring_sha2;
#[cfg(all(feature = "crypto_hash_ring_sha2", not(feature = "crypto_hash_blake3")))]
pub use self::ring_sha2::Digest;

/// Computes the opaque 256-bit password hash `H(nonce || password)`
/// exchanged during the handshake: a single pass of the selected
/// digest over the concatenation.
pub fn password_hash(nonce: &[u8], password: &[u8]) -> Digest {
    Digest::compute(nonce, password)
}

/// Renders a password hash as 64 lowercase hex characters, the wire
/// format used in the `client_login` config-stream message.
pub fn to_hex_string(digest: &Digest) -> String {
    hex::encode(digest.as_ref())
}
