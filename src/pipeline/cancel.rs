use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Something parked on a condition that must be re-checked once the session stops.
pub trait Wake: Send + Sync {
    fn wake(&self);
}

/// Session-wide stop signal.
///
/// Cloning shares the same flag. Cancelling wakes every registered waiter so
/// stages blocked in a hand-off observe the stop without polling.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    wakers: Mutex<Vec<Weak<dyn Wake>>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let wakers = {
            let mut guard = self
                .inner
                .wakers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        for waker in wakers.iter().filter_map(Weak::upgrade) {
            waker.wake();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Register a waiter. Wakes it immediately if the token is already cancelled.
    pub(crate) fn register(&self, waker: Weak<dyn Wake>) {
        let mut wakers = self
            .inner
            .wakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // The flag is set before the list is taken, so checking under the lock
        // cannot miss a concurrent cancel.
        if self.is_cancelled() {
            drop(wakers);
            if let Some(waker) = waker.upgrade() {
                waker.wake();
            }
            return;
        }
        wakers.retain(|w| w.strong_count() > 0);
        wakers.push(waker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counter(AtomicUsize);

    impl Wake for Counter {
        fn wake(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn cancel_wakes_registered_once() {
        let token = CancelToken::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let weak: Weak<dyn Wake> = Arc::downgrade(&counter) as Weak<dyn Wake>;
        token.register(weak);

        token.cancel();
        token.cancel();

        assert!(token.is_cancelled());
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn register_after_cancel_wakes_immediately() {
        let token = CancelToken::new();
        token.clone().cancel();

        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        token.register(Arc::downgrade(&counter) as Weak<dyn Wake>);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }
}
