//! The I/O reactor: one acceptor thread, `N` worker threads each owning
//! its own `mio::Poll`, and the shared `TimerFactory`. Handlers register
//! interest in readability/writability on a `mio::Token`; the reactor
//! places each new handler on whichever worker currently holds the
//! fewest of them. `mio::Registry` is itself thread safe, so a session
//! living on any thread can register, reregister, or deregister its
//! socket directly on a worker's poller without routing through that
//! worker's own thread; the worker's `mio::Waker` is reserved for
//! waking a blocked `poll()` for shutdown.

use std::collections::HashMap as StdHashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Registry, Token, Waker};

use crate::rtp::config::ReactorConfig;
use crate::rtp::error::*;
use crate::rtp::sync::Mutex;
use crate::rtp::timer::TimerFactory;

const WAKER_TOKEN: Token = Token(usize::MAX);

/// What a registered handler wants to be told about.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct InterestMask {
    pub readable: bool,
    pub writable: bool,
}

impl InterestMask {
    pub const READ: InterestMask = InterestMask { readable: true, writable: false };
    pub const WRITE: InterestMask = InterestMask { readable: false, writable: true };
    pub const READ_WRITE: InterestMask = InterestMask { readable: true, writable: true };

    fn to_mio(self) -> Interest {
        match (self.readable, self.writable) {
            (true, true) => Interest::READABLE | Interest::WRITABLE,
            (true, false) => Interest::READABLE,
            (false, true) => Interest::WRITABLE,
            (false, false) => Interest::READABLE,
        }
    }
}

/// Callbacks a registered handler receives. Invoked from whichever
/// worker thread owns its token; implementations must not block.
pub trait Handler: Send + Sync {
    fn on_readable(&self) {}
    fn on_writable(&self) {}
    /// The peer half-closed or the socket errored; the handler should
    /// tear down whatever it owns.
    fn on_exception(&self) {}
}

struct WorkerShared {
    registry: Registry,
    waker: Waker,
    handlers: Mutex<StdHashMap<usize, Arc<dyn Handler>>>,
    load: AtomicUsize,
    shutdown: AtomicBool,
}

struct Worker {
    shared: Arc<WorkerShared>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(name: String) -> io::Result<Self> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;
        let shared = Arc::new(WorkerShared {
            registry,
            waker,
            handlers: Mutex::new(StdHashMap::new()),
            load: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
        });
        let worker_shared = shared.clone();
        let thread = std::thread::Builder::new().name(name).spawn(move || run_worker(poll, worker_shared))?;
        Ok(Self { shared, thread: Some(thread) })
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        let _ = self.shared.waker.wake();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run_worker(mut poll: Poll, shared: Arc<WorkerShared>) {
    let mut events = Events::with_capacity(256);
    loop {
        if let Err(err) = poll.poll(&mut events, None) {
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            log::warn!("reactor worker poll failed: {}", err);
            break;
        }
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }

        for event in events.iter() {
            if event.token() == WAKER_TOKEN {
                continue;
            }

            let handler = shared.handlers.lock().get(&event.token().0).cloned();
            let handler = match handler {
                Some(h) => h,
                None => continue,
            };
            if event.is_read_closed() || event.is_write_closed() || event.is_error() {
                handler.on_exception();
                continue;
            }
            if event.is_readable() {
                handler.on_readable();
            }
            if event.is_writable() {
                handler.on_writable();
            }
        }
    }
}

/// A live registration: the worker it lives on and the token it was
/// assigned, needed to reregister or remove it later.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Registration {
    pub worker: usize,
    pub token: Token,
}

/// The reactor: owns the I/O worker pool and the shared timer factory.
pub struct Reactor {
    workers: Vec<Worker>,
    timers: Arc<TimerFactory>,
    next_token: AtomicUsize,
    stopping: AtomicBool,
}

impl Reactor {
    pub fn new(config: &ReactorConfig) -> Result<Self> {
        let mut workers = Vec::with_capacity(config.io_threads.max(1));
        for i in 0..config.io_threads.max(1) {
            workers.push(Worker::spawn(format!("meshlink-io-{}", i)).wrapped(ErrorKind::Reactor)?);
        }
        Ok(Self {
            workers,
            timers: Arc::new(TimerFactory::new()),
            next_token: AtomicUsize::new(0),
            stopping: AtomicBool::new(false),
        })
    }

    pub fn timers(&self) -> &Arc<TimerFactory> {
        &self.timers
    }

    fn least_loaded_worker(&self) -> usize {
        self.workers
            .iter()
            .enumerate()
            .min_by_key(|(_, w)| w.shared.load.load(Ordering::Relaxed))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    /// Registers `handler` for events on `source`, placed on whichever
    /// worker currently owns the fewest handlers.
    pub fn add_handler<S>(
        &self,
        source: &mut S,
        interest: InterestMask,
        handler: Arc<dyn Handler>,
    ) -> Result<Registration>
    where
        S: mio::event::Source + ?Sized,
    {
        let worker_idx = self.least_loaded_worker();
        let token = Token(self.next_token.fetch_add(1, Ordering::Relaxed));
        let worker = &self.workers[worker_idx];
        worker.shared.registry.register(source, token, interest.to_mio()).wrapped(ErrorKind::Reactor)?;
        worker.shared.handlers.lock().insert(token.0, handler);
        worker.shared.load.fetch_add(1, Ordering::Relaxed);
        Ok(Registration { worker: worker_idx, token })
    }

    /// Changes the interest mask for an already-registered source.
    pub fn reregister<S>(&self, registration: Registration, source: &mut S, interest: InterestMask) -> Result<()>
    where
        S: mio::event::Source + ?Sized,
    {
        let worker = self.workers.get(registration.worker).ok_or(()).simple(ErrorKind::Reactor)?;
        worker
            .shared
            .registry
            .reregister(source, registration.token, interest.to_mio())
            .wrapped(ErrorKind::Reactor)
    }

    /// Removes a previously registered handler. `source` must be the
    /// same source that was registered.
    pub fn remove_handler<S>(&self, registration: Registration, source: &mut S) -> Result<()>
    where
        S: mio::event::Source + ?Sized,
    {
        let worker = self.workers.get(registration.worker).ok_or(()).simple(ErrorKind::Reactor)?;
        worker.shared.handlers.lock().remove(&registration.token.0);
        worker.shared.load.fetch_sub(1, Ordering::Relaxed);
        worker.shared.registry.deregister(source).wrapped(ErrorKind::Reactor)
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::Release);
    }
}

/// Runs the blocking accept loop for one listener on the calling
/// thread, handing each accepted stream to `on_accept`. Intended to be
/// spawned as the dedicated "accept thread".
pub fn run_accept_loop<F>(mut listener: TcpListener, stopping: &AtomicBool, mut on_accept: F)
where
    F: FnMut(mio::net::TcpStream, std::net::SocketAddr),
{
    let mut poll = match Poll::new() {
        Ok(p) => p,
        Err(err) => {
            log::error!("failed to create accept-loop poller: {}", err);
            return;
        }
    };
    const LISTENER_TOKEN: Token = Token(0);
    if let Err(err) = poll.registry().register(&mut listener, LISTENER_TOKEN, Interest::READABLE) {
        log::error!("failed to register listener: {}", err);
        return;
    }
    let mut events = Events::with_capacity(16);
    while !stopping.load(Ordering::Acquire) {
        if let Err(err) = poll.poll(&mut events, Some(Duration::from_millis(250))) {
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            log::warn!("accept loop poll failed: {}", err);
            break;
        }
        for event in events.iter() {
            if event.token() != LISTENER_TOKEN {
                continue;
            }
            loop {
                match listener.accept() {
                    Ok((stream, addr)) => {
                        on_accept(stream, addr);
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                    Err(err) => {
                        log::warn!("accept failed: {}", err);
                        break;
                    }
                }
            }
        }
    }
}
