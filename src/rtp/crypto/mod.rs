//! Cryptographic primitives used by the handshake: a 256-bit password
//! hash, treated as an opaque MAC over `nonce || password`.

pub mod hash;
