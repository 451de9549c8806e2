use std::io::{self, Read, Write};

use mio::net::TcpStream;

use crate::rtp::error::*;
use crate::rtp::transport::{IoOutcome, RingRecvPool, Transport};

/// A plain, non-blocking TCP transport.
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }
}

impl Transport for TcpTransport {
    fn fill_recv_pool(&mut self, pool: &mut RingRecvPool) -> Result<IoOutcome> {
        let mut scratch = [0u8; 16 * 1024];
        let want = pool.free_size().min(scratch.len());
        if want == 0 {
            return Ok(IoOutcome::WouldBlock);
        }
        match self.stream.read(&mut scratch[..want]) {
            Ok(0) => Ok(IoOutcome::Closed),
            Ok(n) => {
                let accepted = pool.push(&scratch[..n]);
                Ok(IoOutcome::Progress(accepted))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(IoOutcome::WouldBlock),
            Err(e) => Err(e).wrapped(ErrorKind::Transport),
        }
    }

    fn send(&mut self, data: &[u8]) -> Result<IoOutcome> {
        if data.is_empty() {
            return Ok(IoOutcome::Progress(0));
        }
        match self.stream.write(data) {
            Ok(0) => Ok(IoOutcome::Closed),
            Ok(n) => Ok(IoOutcome::Progress(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(IoOutcome::WouldBlock),
            Err(e) => Err(e).wrapped(ErrorKind::Transport),
        }
    }

    fn peer_addr(&self) -> Option<std::net::SocketAddr> {
        self.stream.peer_addr().ok()
    }

    fn as_source(&mut self) -> &mut dyn mio::event::Source {
        &mut self.stream
    }
}
