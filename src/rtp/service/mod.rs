//! A `Service` binds one listening port to one `mmType`: every
//! connection accepted on it is handed to the same observer once it
//! clears the handshake, the unit `MsgServer`'s hub composes one of per
//! link type it serves.

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;

use mio::net::TcpListener;

use crate::rtp::config::{ReactorConfig, SessionConfig};
use crate::rtp::error::*;
use crate::rtp::handshake::Acceptor;
use crate::rtp::reactor::{run_accept_loop, Reactor};

/// Notified for every raw connection accepted on a `Service`, before
/// the handshake has even started.
pub trait ServiceObserver: Send + Sync {
    fn on_accept(&self, stream: mio::net::TcpStream, addr: SocketAddr);
}

/// One listening port, serving one `mmType`.
pub struct Service {
    mm_type: u8,
    acceptor: Arc<Acceptor>,
    thread: Option<JoinHandle<()>>,
    stopping: Arc<AtomicBool>,
}

impl Service {
    /// Binds `addr` and starts the dedicated accept thread. `observer`
    /// is invoked for each accepted connection, on the accept thread;
    /// it should do only enough work to hand the socket off to a
    /// reactor worker (e.g. wrap it in a `Session` and register it),
    /// since it blocks further accepts while running.
    pub fn bind(
        addr: SocketAddr,
        mm_type: u8,
        reactor_config: &ReactorConfig,
        observer: Arc<dyn ServiceObserver>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).wrapped(ErrorKind::Service)?;
        let acceptor = Arc::new(Acceptor::new(reactor_config.pending_accept_max));
        let stopping = Arc::new(AtomicBool::new(false));

        let thread_stopping = stopping.clone();
        let thread_acceptor = acceptor.clone();
        let thread = std::thread::Builder::new()
            .name(format!("meshlink-accept-{}", mm_type))
            .spawn(move || {
                run_accept_loop(listener, &thread_stopping, move |stream, addr| {
                    match thread_acceptor.try_admit() {
                        Ok(slot) => {
                            observer.on_accept(stream, addr);
                            drop(slot);
                        }
                        Err(_) => {
                            log::warn!("dropping connection from {}: pending-accept cap reached", addr);
                        }
                    }
                });
            })
            .wrapped(ErrorKind::Service)?;

        Ok(Self { mm_type, acceptor, thread: Some(thread), stopping })
    }

    pub fn mm_type(&self) -> u8 {
        self.mm_type
    }

    pub fn pending_accepts(&self) -> Arc<Acceptor> {
        self.acceptor.clone()
    }

    pub fn shutdown(&mut self) {
        self.stopping.store(true, std::sync::atomic::Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Binds a session's default send/recv configuration and reactor
/// together for a given mm type; a convenience bundle `MsgServer` uses
/// when it stands up one `Service` per attached link type.
pub struct ServiceBundle {
    pub service: Service,
    pub reactor: Arc<Reactor>,
    pub session_config: SessionConfig,
}
