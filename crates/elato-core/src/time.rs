//! Time source abstraction and bounded retry windows.

use core::sync::atomic::{AtomicBool, Ordering};

/// Monotonic millisecond clock with a cooperative sleep.
#[allow(async_fn_in_trait)]
pub trait Clock {
    fn now_ms(&self) -> u64;

    /// Yields the current task for at least `ms` milliseconds.
    async fn sleep_ms(&self, ms: u64);
}

impl<C: Clock> Clock for &C {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }

    async fn sleep_ms(&self, ms: u64) {
        (**self).sleep_ms(ms).await
    }
}

/// Shared, resettable cancellation flag checked between retry attempts.
#[derive(Debug)]
pub struct CancelToken {
    cancelled: AtomicBool,
}

impl CancelToken {
    pub const fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Timeout and pause between attempts of a polling loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    pub timeout_ms: u64,
    pub interval_ms: u64,
}

impl RetryPolicy {
    pub const fn new(timeout_ms: u64, interval_ms: u64) -> Self {
        Self {
            timeout_ms,
            interval_ms,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WindowEnd {
    Expired,
    Cancelled,
}

/// One run of a [`RetryPolicy`]. The first attempt is always allowed, even
/// with a zero timeout.
#[derive(Clone, Copy, Debug)]
pub struct RetryWindow {
    policy: RetryPolicy,
    started_ms: u64,
    attempts: u32,
}

impl RetryWindow {
    pub fn start<C: Clock>(clock: &C, policy: RetryPolicy) -> Self {
        Self {
            policy,
            started_ms: clock.now_ms(),
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn elapsed_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.started_ms)
    }

    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        self.policy.timeout_ms.saturating_sub(self.elapsed_ms(now_ms))
    }

    /// Admits the next attempt or reports why the window is closed.
    pub fn begin_attempt<C: Clock>(
        &mut self,
        clock: &C,
        cancel: &CancelToken,
    ) -> Result<(), WindowEnd> {
        if cancel.is_cancelled() {
            return Err(WindowEnd::Cancelled);
        }
        if self.attempts > 0 && self.remaining_ms(clock.now_ms()) == 0 {
            return Err(WindowEnd::Expired);
        }
        self.attempts = self.attempts.saturating_add(1);
        Ok(())
    }

    /// Sleeps one interval, clipped to what is left of the window.
    pub async fn pause<C: Clock>(&self, clock: &C) {
        let wait = self.policy.interval_ms.min(self.remaining_ms(clock.now_ms()));
        if wait > 0 {
            clock.sleep_ms(wait).await;
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use core::cell::Cell;

    use super::Clock;

    /// Virtual clock: sleeping advances time instantly.
    #[derive(Debug, Default)]
    pub struct ManualClock {
        now: Cell<u64>,
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn advance(&self, ms: u64) {
            self.now.set(self.now.get() + ms);
        }
    }

    impl Clock for ManualClock {
        fn now_ms(&self) -> u64 {
            self.now.get()
        }

        async fn sleep_ms(&self, ms: u64) {
            self.advance(ms);
            embassy_futures::yield_now().await;
        }
    }
}
