//! A monotonic timer factory shared by the reactor, a session's
//! heartbeat, and the handshake timeouts: one background thread serving
//! a min-heap of deadlines, so none of those call sites need their own
//! sleeping thread.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::rtp::sync::{Condvar, Mutex};

/// Opaque handle to a scheduled timer. Never zero.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct TimerId(u64);

impl TimerId {
    /// The numeric value underlying this handle, for callers that hand
    /// it to a remote peer as a correlation token (e.g. a C2S's
    /// pending-login table) and need it back as plain data.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

struct Entry {
    deadline: Instant,
    id: TimerId,
    period: Option<Duration>,
    callback: Arc<dyn Fn(TimerId) + Send + Sync>,
}

impl Eq for Entry {}
impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}
impl Ord for Entry {
    // Reversed so `BinaryHeap` (a max-heap) pops the earliest deadline.
    fn cmp(&self, other: &Self) -> Ordering {
        other.deadline.cmp(&self.deadline).then_with(|| other.id.0.cmp(&self.id.0))
    }
}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct State {
    heap: BinaryHeap<Entry>,
    cancelled: std::collections::HashSet<TimerId>,
    shutdown: bool,
}

/// A background timer service. Dropping it stops the worker thread.
pub struct TimerFactory {
    next_id: AtomicU64,
    state: Arc<Mutex<State>>,
    condvar: Arc<Condvar>,
    thread: Option<JoinHandle<()>>,
}

impl TimerFactory {
    pub fn new() -> Self {
        let state = Arc::new(Mutex::new(State {
            heap: BinaryHeap::new(),
            cancelled: std::collections::HashSet::new(),
            shutdown: false,
        }));
        let condvar = Arc::new(Condvar::new());

        let worker_state = state.clone();
        let worker_condvar = condvar.clone();
        let thread = std::thread::Builder::new()
            .name("meshlink-timer".into())
            .spawn(move || run(worker_state, worker_condvar))
            .expect("failed to spawn timer thread");

        Self { next_id: AtomicU64::new(1), state, condvar, thread: Some(thread) }
    }

    fn alloc_id(&self) -> TimerId {
        TimerId(self.next_id.fetch_add(1, AtomicOrdering::Relaxed))
    }

    /// Schedules `callback` to run once, after `delay`.
    pub fn schedule_once<F>(&self, delay: Duration, callback: F) -> TimerId
    where
        F: Fn(TimerId) + Send + Sync + 'static,
    {
        self.schedule(delay, None, callback)
    }

    /// Schedules `callback` to run every `period`, first firing after
    /// one period has elapsed.
    pub fn schedule_recurring<F>(&self, period: Duration, callback: F) -> TimerId
    where
        F: Fn(TimerId) + Send + Sync + 'static,
    {
        self.schedule(period, Some(period), callback)
    }

    /// Convenience alias for a recurring timer used to drive a
    /// session's heartbeat.
    pub fn schedule_heartbeat<F>(&self, period: Duration, callback: F) -> TimerId
    where
        F: Fn(TimerId) + Send + Sync + 'static,
    {
        self.schedule_recurring(period, callback)
    }

    fn schedule<F>(&self, delay: Duration, period: Option<Duration>, callback: F) -> TimerId
    where
        F: Fn(TimerId) + Send + Sync + 'static,
    {
        let id = self.alloc_id();
        let entry = Entry { deadline: Instant::now() + delay, id, period, callback: Arc::new(callback) };
        {
            let mut state = self.state.lock();
            state.heap.push(entry);
        }
        self.condvar.notify_one();
        id
    }

    /// Cancels a pending timer. Idempotent: cancelling an id twice, or
    /// one that already fired, is a no-op and returns `false`.
    pub fn cancel(&self, id: TimerId) -> bool {
        let mut state = self.state.lock();
        if state.heap.iter().any(|e| e.id == id) {
            state.cancelled.insert(id);
            true
        } else {
            false
        }
    }
}

impl Default for TimerFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimerFactory {
    fn drop(&mut self) {
        {
            let mut state = self.state.lock();
            state.shutdown = true;
        }
        self.condvar.notify_one();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run(state: Arc<Mutex<State>>, condvar: Arc<Condvar>) {
    loop {
        let mut guard = state.lock();
        if guard.shutdown {
            return;
        }
        match guard.heap.peek() {
            None => {
                condvar.wait(&mut guard);
            }
            Some(next) => {
                let now = Instant::now();
                if next.deadline > now {
                    let wait_for = next.deadline - now;
                    condvar.wait_for(&mut guard, wait_for);
                } else {
                    let entry = guard.heap.pop().unwrap();
                    let was_cancelled = guard.cancelled.remove(&entry.id);
                    if let Some(period) = entry.period {
                        if !was_cancelled {
                            guard.heap.push(Entry {
                                deadline: entry.deadline + period,
                                id: entry.id,
                                period: Some(period),
                                callback: entry.callback.clone(),
                            });
                        }
                    }
                    drop(guard);
                    if !was_cancelled {
                        (entry.callback)(entry.id);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn one_shot_fires_once() {
        let factory = TimerFactory::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        factory.schedule_once(Duration::from_millis(20), move |_| {
            count2.fetch_add(1, AtomicOrdering::SeqCst);
        });
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(count.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn cancel_before_fire_prevents_callback() {
        let factory = TimerFactory::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let id = factory.schedule_once(Duration::from_millis(100), move |_| {
            count2.fetch_add(1, AtomicOrdering::SeqCst);
        });
        assert!(factory.cancel(id));
        assert!(!factory.cancel(id));
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(count.load(AtomicOrdering::SeqCst), 0);
    }

    #[test]
    fn recurring_fires_multiple_times() {
        let factory = TimerFactory::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let _id = factory.schedule_recurring(Duration::from_millis(20), move |_| {
            count2.fetch_add(1, AtomicOrdering::SeqCst);
        });
        std::thread::sleep(Duration::from_millis(150));
        assert!(count.load(AtomicOrdering::SeqCst) >= 3);
    }
}
