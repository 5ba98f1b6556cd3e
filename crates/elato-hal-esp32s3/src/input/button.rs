use elato_core::input::button::{ButtonConfig, ButtonGestureDetector};
use elato_core::input::{InputEvent, InputProvider};
use embedded_hal::digital::InputPin;

/// Push button on a GPIO, sampled by the input task.
#[derive(Debug)]
pub struct ButtonInput<SW> {
    sw: SW,
    detector: ButtonGestureDetector,
}

impl<SW: InputPin> ButtonInput<SW> {
    pub fn new(mut sw: SW, config: ButtonConfig) -> Result<Self, SW::Error> {
        let level_high = sw.is_high()?;
        Ok(Self {
            sw,
            detector: ButtonGestureDetector::new(config, level_high),
        })
    }

    pub fn is_pressed(&self) -> bool {
        self.detector.is_pressed()
    }
}

impl<SW: InputPin> InputProvider for ButtonInput<SW> {
    type Error = SW::Error;

    fn poll_event(&mut self, now_ms: u64) -> Result<Option<InputEvent>, Self::Error> {
        let level_high = self.sw.is_high()?;
        Ok(self.detector.sample(level_high, now_ms))
    }
}
