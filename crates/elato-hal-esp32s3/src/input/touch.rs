use elato_core::input::touch::TouchSensor;
use embedded_hal::digital::InputPin;

/// Full-scale reading reported while the pad is active.
pub const ACTIVE_READING: u32 = u32::MAX;

/// Capacitive touch module with a digital output (TTP223 style), exposed as
/// a [`TouchSensor`]: any threshold below full scale detects a touch.
#[derive(Debug)]
pub struct DigitalTouchPad<P> {
    pin: P,
    active_high: bool,
}

impl<P: InputPin> DigitalTouchPad<P> {
    pub const fn new(pin: P, active_high: bool) -> Self {
        Self { pin, active_high }
    }

    pub fn is_active(&mut self) -> Result<bool, P::Error> {
        Ok(self.pin.is_high()? == self.active_high)
    }
}

impl<P: InputPin> TouchSensor for DigitalTouchPad<P> {
    type Error = P::Error;

    fn read(&mut self) -> Result<u32, Self::Error> {
        Ok(if self.is_active()? { ACTIVE_READING } else { 0 })
    }
}
