//! Deep-sleep entry with an RTC IO wake source.

use elato_core::lifecycle::{PowerControl, WakeSource};
use esp_hal::{
    gpio::{Input, InputConfig, Pull, RtcPin},
    peripherals::{GPIO2, LPWR},
    rtc_cntl::{
        Rtc,
        sleep::{RtcioWakeupSource, WakeupLevel},
    },
};
use log::info;

/// RTC-capable GPIO shared by the push button and the touch module output.
pub const WAKE_GPIO: u8 = 2;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PowerError {
    /// Only [`WAKE_GPIO`] is wired to the RTC wake logic.
    UnsupportedWakePin(u8),
}

pub struct DeepSleepPower {
    wake_level: WakeupLevel,
    pull: Pull,
    armed: Option<WakeupLevel>,
}

impl DeepSleepPower {
    /// `wake_level` is the level [`WAKE_GPIO`] shows while the wake input is
    /// asserted; `pull` matches how the input task configured the pin.
    pub const fn new(wake_level: WakeupLevel, pull: Pull) -> Self {
        Self {
            wake_level,
            pull,
            armed: None,
        }
    }
}

impl PowerControl for DeepSleepPower {
    type Error = PowerError;

    fn wake_input_active(&mut self) -> bool {
        // The input task has parked by now; borrow the pin for one read.
        let pin = Input::new(
            unsafe { GPIO2::steal() },
            InputConfig::default().with_pull(self.pull),
        );
        match self.wake_level {
            WakeupLevel::High => pin.is_high(),
            WakeupLevel::Low => pin.is_low(),
        }
    }

    fn arm_wake(&mut self, source: WakeSource) -> Result<(), Self::Error> {
        let (gpio, level) = match source {
            WakeSource::ButtonLevelLow { gpio } => (gpio, WakeupLevel::Low),
            // The digital touch module drives its output high while touched;
            // the analog threshold is applied by the module itself.
            WakeSource::TouchThreshold { pad, threshold } => {
                info!("power: touch wake pad={} threshold={}", pad, threshold);
                (pad, WakeupLevel::High)
            }
        };
        if gpio != WAKE_GPIO {
            return Err(PowerError::UnsupportedWakePin(gpio));
        }
        self.armed = Some(level);
        Ok(())
    }

    fn enter_deep_sleep(&mut self) {
        // Without an armed source the button level still wakes the device.
        let level = self.armed.unwrap_or(WakeupLevel::Low);
        let mut rtc = Rtc::new(unsafe { LPWR::steal() });
        let mut wake_gpio = unsafe { GPIO2::steal() };
        let mut wake_pins: [(&mut dyn RtcPin, WakeupLevel); 1] = [(&mut wake_gpio, level)];
        let wake_source = RtcioWakeupSource::new(&mut wake_pins);

        rtc.sleep_deep(&[&wake_source]);
    }
}
