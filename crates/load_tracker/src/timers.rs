use futures::future::BoxFuture;
use std::time::Duration;

/// Source of delays, injected so tests can drive time by hand.
pub trait Timers: Send + Sync {
    fn timer(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeTimers;

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use futures::FutureExt as _;
    use futures::channel::oneshot;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Timers that only fire when the test calls [`FakeTimers::advance`].
    #[derive(Default)]
    pub struct FakeTimers {
        state: Mutex<FakeTimersState>,
    }

    #[derive(Default)]
    struct FakeTimersState {
        now: Duration,
        pending: Vec<(Duration, oneshot::Sender<()>)>,
    }

    impl FakeTimers {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Time elapsed since creation.
        pub fn now(&self) -> Duration {
            self.state.lock().now
        }

        /// Move time forward, firing every timer that is now due.
        pub fn advance(&self, by: Duration) {
            let due = {
                let mut state = self.state.lock();
                state.now += by;
                let now = state.now;
                let (due, pending): (Vec<_>, Vec<_>) = state
                    .pending
                    .drain(..)
                    .partition(|(deadline, _)| *deadline <= now);
                state.pending = pending;
                due
            };
            for (_, tx) in due {
                tx.send(()).ok();
            }
        }

        pub fn pending_count(&self) -> usize {
            self.state.lock().pending.len()
        }
    }

    impl Timers for FakeTimers {
        fn timer(&self, duration: Duration) -> BoxFuture<'static, ()> {
            if duration.is_zero() {
                return futures::future::ready(()).boxed();
            }
            let (tx, rx) = oneshot::channel();
            let mut state = self.state.lock();
            let deadline = state.now + duration;
            state.pending.push((deadline, tx));
            rx.map(|_| ()).boxed()
        }
    }
}
