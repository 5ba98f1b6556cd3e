use elato_core::time::Clock;
use embassy_time::{Instant, Timer};

/// [`Clock`] over the embassy time driver installed by `esp_rtos::start`.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmbassyClock;

impl Clock for EmbassyClock {
    fn now_ms(&self) -> u64 {
        Instant::now().as_millis()
    }

    async fn sleep_ms(&self, ms: u64) {
        Timer::after_millis(ms).await
    }
}
