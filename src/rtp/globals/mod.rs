//! Small atomic primitives used in place of global mutable statics: a
//! one-shot `Flag`, and a `Knob<T>` for runtime-tunable values such as
//! the heartbeat period or the backpressure redline.

use std::sync::atomic::{AtomicU64, Ordering};

/// A one-shot boolean flag, set at most once, safe to read from any
/// thread without additional synchronization.
pub struct Flag(AtomicU64);

impl Flag {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn test(&self) -> bool {
        self.0.load(Ordering::Acquire) != 0
    }

    pub fn set(&self) {
        self.0.store(1, Ordering::Release);
    }

    pub fn unset(&self) {
        self.0.store(0, Ordering::Release);
    }
}

impl Default for Flag {
    fn default() -> Self {
        Self::new()
    }
}

/// An atomically-swappable `u64`-encodable runtime knob.
///
/// Used for values an operator may adjust while the system is running,
/// e.g. the heartbeat period or the backpressure redline. Reads never
/// block; writes are a single atomic store.
pub struct Knob<T> {
    raw: AtomicU64,
    decode: fn(u64) -> T,
    encode: fn(T) -> u64,
}

impl<T: Copy> Knob<T> {
    pub const fn new(initial: u64, encode: fn(T) -> u64, decode: fn(u64) -> T) -> Self {
        Self { raw: AtomicU64::new(initial), decode, encode }
    }

    pub fn get(&self) -> T {
        (self.decode)(self.raw.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: T) {
        self.raw.store((self.encode)(value), Ordering::Relaxed);
    }
}
