use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use super::{InputEvent, InputProvider};

/// Raises [`InputEvent::InactivityTimeout`] once no activity has been
/// recorded for `timeout_ms`.
///
/// Activity is recorded from any task; timestamps are kept as the low 32
/// bits of the millisecond clock.
#[derive(Debug)]
pub struct InactivityTimer {
    timeout_ms: u32,
    last_activity_ms: AtomicU32,
    fired: AtomicBool,
}

impl InactivityTimer {
    pub const fn new(timeout_ms: u32) -> Self {
        Self {
            timeout_ms,
            last_activity_ms: AtomicU32::new(0),
            fired: AtomicBool::new(false),
        }
    }

    pub fn timeout_ms(&self) -> u32 {
        self.timeout_ms
    }

    pub fn record_activity(&self, now_ms: u64) {
        self.last_activity_ms.store(now_ms as u32, Ordering::Release);
        self.fired.store(false, Ordering::Release);
    }

    pub fn idle_ms(&self, now_ms: u64) -> u32 {
        (now_ms as u32).wrapping_sub(self.last_activity_ms.load(Ordering::Acquire))
    }

    pub fn poll(&self, now_ms: u64) -> Option<InputEvent> {
        if self.timeout_ms == 0 || self.idle_ms(now_ms) < self.timeout_ms {
            return None;
        }
        if self.fired.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(InputEvent::InactivityTimeout)
    }
}

impl InputProvider for &InactivityTimer {
    type Error = core::convert::Infallible;

    fn poll_event(&mut self, now_ms: u64) -> Result<Option<InputEvent>, Self::Error> {
        Ok(self.poll(now_ms))
    }
}
