//! Locking primitives used throughout `meshlink`.
//!
//! We use `parking_lot` rather than the standard library's mutexes:
//! smaller, faster, and without poisoning semantics we'd otherwise have
//! to handle at every call site.

pub use parking_lot::{Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
