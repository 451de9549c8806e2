use std::io::{self, Read, Write};
use std::sync::Arc;

use mio::net::TcpStream;
use rustls::Session;

use crate::rtp::error::*;
use crate::rtp::transport::{IoOutcome, RingRecvPool, Transport};

/// A `rustls`-backed transport, driven synchronously: each reactor
/// callback pumps at most one round of ciphertext in or out, mirroring
/// the non-blocking discipline of `TcpTransport`. `rustls::Session` is
/// object-safe, so the client/server distinction lives behind one
/// `Box<dyn Session>` rather than a duplicated code path.
pub struct TlsTransport {
    stream: TcpStream,
    session: Box<dyn Session + Send>,
}

impl TlsTransport {
    pub fn client(stream: TcpStream, config: Arc<rustls::ClientConfig>, server_name: webpki::DNSNameRef<'_>) -> Self {
        let session = rustls::ClientSession::new(&config, server_name);
        Self { stream, session: Box::new(session) }
    }

    pub fn server(stream: TcpStream, config: Arc<rustls::ServerConfig>) -> Self {
        let session = rustls::ServerSession::new(&config);
        Self { stream, session: Box::new(session) }
    }

    fn pump_tls_read(&mut self) -> Result<bool> {
        match self.session.read_tls(&mut self.stream) {
            Ok(0) => Ok(false),
            Ok(_) => {
                self.session.process_new_packets().wrapped(ErrorKind::Transport)?;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(true),
            Err(e) => Err(e).wrapped(ErrorKind::Transport),
        }
    }

    fn pump_tls_write(&mut self) -> Result<()> {
        while self.session.wants_write() {
            match self.session.write_tls(&mut self.stream) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e).wrapped(ErrorKind::Transport),
            }
        }
        Ok(())
    }
}

impl Transport for TlsTransport {
    fn fill_recv_pool(&mut self, pool: &mut RingRecvPool) -> Result<IoOutcome> {
        if self.session.wants_read() {
            let still_open = self.pump_tls_read()?;
            if !still_open {
                return Ok(IoOutcome::Closed);
            }
        }
        self.pump_tls_write()?;

        let mut scratch = [0u8; 16 * 1024];
        let want = pool.free_size().min(scratch.len());
        if want == 0 {
            return Ok(IoOutcome::WouldBlock);
        }
        match self.session.read(&mut scratch[..want]) {
            Ok(0) => Ok(IoOutcome::WouldBlock),
            Ok(n) => Ok(IoOutcome::Progress(pool.push(&scratch[..n]))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(IoOutcome::WouldBlock),
            Err(e) => Err(e).wrapped(ErrorKind::Transport),
        }
    }

    fn send(&mut self, data: &[u8]) -> Result<IoOutcome> {
        if data.is_empty() {
            return Ok(IoOutcome::Progress(0));
        }
        let n = self.session.write(data).wrapped(ErrorKind::Transport)?;
        self.pump_tls_write()?;
        Ok(IoOutcome::Progress(n))
    }

    fn is_ready(&self) -> bool {
        !self.session.is_handshaking()
    }

    fn peer_addr(&self) -> Option<std::net::SocketAddr> {
        self.stream.peer_addr().ok()
    }

    fn as_source(&mut self) -> &mut dyn mio::event::Source {
        &mut self.stream
    }
}
