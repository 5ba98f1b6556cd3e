use core::fmt::Debug;

use super::{InputEvent, InputProvider};

/// Raw capacitive reading; larger means touched.
pub trait TouchSensor {
    type Error: Debug;

    fn read(&mut self) -> Result<u32, Self::Error>;
}

impl<S: TouchSensor> TouchSensor for &mut S {
    type Error = S::Error;

    fn read(&mut self) -> Result<u32, Self::Error> {
        (**self).read()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TouchConfig {
    threshold: u32,
    debounce_ms: u64,
    long_press_ms: u64,
    listen_delay_ms: u64,
    poll_interval_ms: u64,
}

impl Default for TouchConfig {
    fn default() -> Self {
        Self {
            threshold: 22_500,
            debounce_ms: 500,
            long_press_ms: 500,
            listen_delay_ms: 100,
            poll_interval_ms: 20,
        }
    }
}

impl TouchConfig {
    pub const fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    pub const fn with_debounce_ms(mut self, debounce_ms: u64) -> Self {
        self.debounce_ms = debounce_ms;
        self
    }

    pub const fn with_long_press_ms(mut self, long_press_ms: u64) -> Self {
        self.long_press_ms = long_press_ms;
        self
    }

    pub const fn with_listen_delay_ms(mut self, listen_delay_ms: u64) -> Self {
        self.listen_delay_ms = listen_delay_ms;
        self
    }

    pub const fn with_poll_interval_ms(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    pub const fn threshold(&self) -> u32 {
        self.threshold
    }

    pub const fn poll_interval_ms(&self) -> u64 {
        self.poll_interval_ms
    }

    pub fn is_touched(&self, reading: u32) -> bool {
        reading > self.threshold
    }
}

/// Turns pad readings into listen restarts and sleep holds.
///
/// A press only counts when the pad goes down at least `debounce_ms` after
/// the previous accepted press; a contact rejected there stays ignored until
/// it is released. Holding an accepted press for `long_press_ms` reports
/// [`InputEvent::TouchHold`] once.
#[derive(Debug, Clone)]
pub struct TouchSleepDetector {
    config: TouchConfig,
    /// Raw pad level of the previous sample.
    pad_down: bool,
    /// An accepted press is in progress.
    touched: bool,
    pressed_at_ms: u64,
    last_press_ms: Option<u64>,
    hold_reported: bool,
}

impl TouchSleepDetector {
    pub fn new(config: TouchConfig) -> Self {
        Self {
            config,
            pad_down: false,
            touched: false,
            pressed_at_ms: 0,
            last_press_ms: None,
            hold_reported: false,
        }
    }

    pub fn config(&self) -> &TouchConfig {
        &self.config
    }

    pub fn is_touched(&self) -> bool {
        self.touched
    }

    pub fn sample(&mut self, reading: u32, now_ms: u64) -> Option<InputEvent> {
        let touched_now = self.config.is_touched(reading);

        if !touched_now {
            self.pad_down = false;
            self.touched = false;
            return None;
        }

        if !self.pad_down {
            self.pad_down = true;
            let debounced = self
                .last_press_ms
                .is_none_or(|last| now_ms.saturating_sub(last) > self.config.debounce_ms);
            if !debounced {
                return None;
            }
            self.touched = true;
            self.hold_reported = false;
            self.pressed_at_ms = now_ms;
            self.last_press_ms = Some(now_ms);
            return Some(InputEvent::ListenRequested {
                at_ms: now_ms + self.config.listen_delay_ms,
            });
        }

        if self.touched
            && !self.hold_reported
            && now_ms.saturating_sub(self.pressed_at_ms) >= self.config.long_press_ms
        {
            self.hold_reported = true;
            return Some(InputEvent::TouchHold);
        }

        None
    }
}

/// [`TouchSensor`] plus [`TouchSleepDetector`] as an [`InputProvider`].
#[derive(Debug)]
pub struct TouchInput<S> {
    sensor: S,
    detector: TouchSleepDetector,
}

impl<S: TouchSensor> TouchInput<S> {
    pub fn new(sensor: S, config: TouchConfig) -> Self {
        Self {
            sensor,
            detector: TouchSleepDetector::new(config),
        }
    }

    pub fn sensor_mut(&mut self) -> &mut S {
        &mut self.sensor
    }
}

impl<S: TouchSensor> InputProvider for TouchInput<S> {
    type Error = S::Error;

    fn poll_event(&mut self, now_ms: u64) -> Result<Option<InputEvent>, Self::Error> {
        let reading = self.sensor.read()?;
        Ok(self.detector.sample(reading, now_ms))
    }
}
