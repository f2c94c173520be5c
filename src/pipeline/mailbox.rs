//! Capacity-1 overwrite channel between pipeline stages.
//!
//! A send never blocks: it replaces whatever value the receiver has not taken
//! yet. The receiver therefore always sees the most recent value, and stale
//! work is discarded by construction instead of being drained by hand.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};

use super::cancel::{CancelToken, Wake};

/// Anything a stage can hand its output to.
pub trait Handoff<T> {
    /// Accept one item. Returns `true` when an unconsumed item was discarded.
    fn accept(&mut self, item: T) -> bool;
}

struct State<T> {
    value: Option<T>,
    disconnected: bool,
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    dropped: AtomicU64,
    received: AtomicU64,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
    counters: Arc<Counters>,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Send> Wake for Shared<T> {
    fn wake(&self) {
        let _guard = self.lock();
        self.ready.notify_all();
    }
}

pub struct MailboxSender<T> {
    shared: Arc<Shared<T>>,
}

pub struct MailboxReceiver<T> {
    shared: Arc<Shared<T>>,
    cancel: CancelToken,
}

/// Read-only view of a mailbox's counters, usable after both ends moved to their threads.
#[derive(Clone)]
pub struct MailboxMonitor {
    counters: Arc<Counters>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MailboxStats {
    pub sent: u64,
    pub dropped: u64,
    pub received: u64,
}

/// Create a mailbox whose receiver wakes up when `cancel` fires.
pub fn mailbox<T: Send + 'static>(cancel: &CancelToken) -> (MailboxSender<T>, MailboxReceiver<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            value: None,
            disconnected: false,
        }),
        ready: Condvar::new(),
        counters: Arc::new(Counters::default()),
    });
    let waker: Weak<dyn Wake> = Arc::downgrade(&shared) as Weak<dyn Wake>;
    cancel.register(waker);

    (
        MailboxSender {
            shared: Arc::clone(&shared),
        },
        MailboxReceiver {
            shared,
            cancel: cancel.clone(),
        },
    )
}

impl<T> MailboxSender<T> {
    /// Store `value`, replacing any value not yet received. Returns `true` on replacement.
    pub fn send(&self, value: T) -> bool {
        let replaced = {
            let mut state = self.shared.lock();
            state.value.replace(value).is_some()
        };
        self.shared.counters.sent.fetch_add(1, Ordering::Relaxed);
        if replaced {
            self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.shared.ready.notify_one();
        replaced
    }

    pub fn monitor(&self) -> MailboxMonitor {
        MailboxMonitor {
            counters: Arc::clone(&self.shared.counters),
        }
    }
}

impl<T> Handoff<T> for MailboxSender<T> {
    fn accept(&mut self, item: T) -> bool {
        self.send(item)
    }
}

impl<T> Drop for MailboxSender<T> {
    fn drop(&mut self) {
        self.shared.lock().disconnected = true;
        self.shared.ready.notify_all();
    }
}

impl<T> MailboxReceiver<T> {
    /// Block until a value is available.
    ///
    /// Returns `None` once the session is cancelled, or once the sender is gone
    /// and the last value has been taken. Cancellation wins over a pending value.
    pub fn recv(&self) -> Option<T> {
        let mut state = self.shared.lock();
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            if let Some(value) = state.value.take() {
                self.shared.counters.received.fetch_add(1, Ordering::Relaxed);
                return Some(value);
            }
            if state.disconnected {
                return None;
            }
            state = self
                .shared
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Take the pending value without waiting, even after cancellation.
    pub fn take_pending(&self) -> Option<T> {
        let value = self.shared.lock().value.take();
        if value.is_some() {
            self.shared.counters.received.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn monitor(&self) -> MailboxMonitor {
        MailboxMonitor {
            counters: Arc::clone(&self.shared.counters),
        }
    }
}

impl MailboxMonitor {
    pub fn stats(&self) -> MailboxStats {
        MailboxStats {
            sent: self.counters.sent.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            received: self.counters.received.load(Ordering::Relaxed),
        }
    }
}
