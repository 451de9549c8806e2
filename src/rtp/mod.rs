//! This module contains the implementation details of `meshlink`.
//!
//! By default, it is hidden to the user, unless explicitly enabled
//! with the feature flag `expose_impl`.

pub mod codec;
pub mod collections;
pub mod config;
pub mod crypto;
pub mod error;
pub mod globals;
pub mod handshake;
pub mod identity;
pub mod msg;
pub mod prng;
pub mod reactor;
pub mod service;
pub mod session;
pub mod store;
pub mod sync;
pub mod timer;
pub mod transport;

use std::ops::Drop;

use error::*;
use globals::Flag;

static INITIALIZED: Flag = Flag::new();

/// Configure the init process of the library.
pub struct InitConfig {
    /// Number of I/O worker threads owned by the reactor.
    pub io_threads: usize,
}

/// Handle to the global data.
///
/// When dropped, the data is deinitialized.
pub struct InitGuard;

/// Initializes global data.
///
/// Should always be called before other methods, otherwise runtime
/// panics may ensue.
pub unsafe fn init(_c: InitConfig) -> Result<Option<InitGuard>> {
    if INITIALIZED.test() {
        return Ok(None);
    }
    INITIALIZED.set();
    Ok(Some(InitGuard))
}

impl Drop for InitGuard {
    fn drop(&mut self) {
        unsafe { drop().unwrap() }
    }
}

unsafe fn drop() -> Result<()> {
    INITIALIZED.unset();
    Ok(())
}
