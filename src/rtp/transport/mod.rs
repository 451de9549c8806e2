//! Transport-layer abstraction over a byte stream: a plain TCP
//! transport and, behind the `tls_rustls` feature, a `rustls`-backed
//! one. Both sides speak the same non-blocking, ring-buffered API so
//! the session state machine never has to know which one it's holding.

mod recv_pool;
mod tcp;
#[cfg(feature = "tls_rustls")]
mod tls;

pub use recv_pool::RingRecvPool;
pub use tcp::TcpTransport;
#[cfg(feature = "tls_rustls")]
pub use tls::TlsTransport;

use crate::rtp::error::*;

/// Outcome of a single non-blocking I/O attempt.
pub enum IoOutcome {
    /// `n` bytes were moved.
    Progress(usize),
    /// The operation would block; nothing was moved.
    WouldBlock,
    /// The peer closed its end.
    Closed,
}

/// A non-blocking, ring-buffered byte transport.
///
/// Implementations never block: `fill_recv_pool` and `drain_send_pool`
/// each perform at most one underlying `read`/`write` syscall (or TLS
/// record operation) and report how far they got, leaving the reactor
/// to call back in once the socket is next readable/writable.
pub trait Transport: Send {
    /// Reads as much as the underlying source will currently yield into
    /// the receive pool, up to its free capacity.
    fn fill_recv_pool(&mut self, pool: &mut RingRecvPool) -> Result<IoOutcome>;

    /// Writes as much of `data` as the underlying sink will currently
    /// accept.
    fn send(&mut self, data: &[u8]) -> Result<IoOutcome>;

    /// `true` once the handshake (TLS or otherwise) has completed and
    /// the transport is ready to carry application bytes.
    fn is_ready(&self) -> bool {
        true
    }

    /// The remote address of the underlying socket, when known.
    fn peer_addr(&self) -> Option<std::net::SocketAddr> {
        None
    }

    /// The underlying `mio` event source, so a `Session` can register
    /// or reregister itself with a reactor without its owner needing
    /// to hold on to the raw stream separately.
    fn as_source(&mut self) -> &mut dyn mio::event::Source {
        unimplemented!("this transport cannot be registered with a reactor")
    }
}
