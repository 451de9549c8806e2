//! Tunable parameters for the reactor, a session, and the router,
//! replacing the scattered global constants of a hand-tuned C
//! implementation with explicit, overridable configuration structs.

use std::time::Duration;

/// Reactor-wide tuning: thread counts and the accept backlog.
#[derive(Clone, Debug)]
pub struct ReactorConfig {
    /// Number of I/O worker threads, each owning its own poller.
    pub io_threads: usize,
    /// Maximum number of accepted sockets awaiting their first byte
    /// (the service-extension preamble) before the acceptor starts
    /// dropping new connections outright.
    pub pending_accept_max: usize,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self { io_threads: num_cpus_hint(), pending_accept_max: 10_000 }
    }
}

fn num_cpus_hint() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

/// Per-session tuning: buffer sizes, timeouts, and backpressure.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Size of the receive-side ring buffer.
    pub recv_pool_size: usize,
    /// Size of the send-side ring buffer.
    pub send_pool_size: usize,
    /// Interval between heartbeat frames on an idle session.
    pub heartbeat_period: Duration,
    /// How long to wait for the msg-layer handshake (session info +
    /// ack) to complete before closing the connection.
    pub handshake_timeout: Duration,
    /// How long to wait for the service-extension preamble
    /// (`RTP_MSG_HEADER0`) before closing an accepted connection.
    pub preamble_timeout: Duration,
    /// Unsent-bytes watermark past which the session is closed rather
    /// than allowed to buffer without bound.
    pub send_redline: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            recv_pool_size: 64 * 1024,
            send_pool_size: 64 * 1024,
            heartbeat_period: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(20),
            preamble_timeout: Duration::from_secs(10),
            send_redline: 8 * 1024 * 1024,
        }
    }
}

/// Router-wide tuning: table capacities that bound memory use under a
/// flood of logins or kicks.
#[derive(Clone, Debug)]
pub struct RouterConfig {
    /// Maximum number of logins awaiting a store lookup at once.
    pub pending_login_max: usize,
    /// Keepalive probe interval used on the listening socket itself.
    pub tcp_keepalive: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self { pending_login_max: 5_000, tcp_keepalive: Duration::from_secs(60) }
    }
}
