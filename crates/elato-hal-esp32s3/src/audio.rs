//! Microphone and speaker port handles.
//!
//! The streaming tasks own the sample path; this handle is the control
//! surface the lifecycle controller uses to halt and release each direction.

use core::sync::atomic::{AtomicU8, Ordering};

use elato_core::AudioDirection;
use elato_core::lifecycle::AudioPeripheral;
use log::debug;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum PortState {
    Uninstalled = 0,
    Stopped = 1,
    Running = 2,
}

impl PortState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Stopped,
            2 => Self::Running,
            _ => Self::Uninstalled,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AudioPortError {
    NotInstalled(AudioDirection),
}

#[derive(Debug)]
pub struct AudioPorts {
    input: AtomicU8,
    output: AtomicU8,
}

impl AudioPorts {
    pub const fn new() -> Self {
        Self {
            input: AtomicU8::new(PortState::Uninstalled as u8),
            output: AtomicU8::new(PortState::Uninstalled as u8),
        }
    }

    /// Installs the driver for `direction` and starts it.
    pub fn install(&self, direction: AudioDirection) {
        self.cell(direction)
            .store(PortState::Running as u8, Ordering::Release);
        debug!("audio: {} installed", direction.as_str());
    }

    pub fn state(&self, direction: AudioDirection) -> PortState {
        PortState::from_raw(self.cell(direction).load(Ordering::Acquire))
    }

    /// Streaming tasks move samples only while this holds.
    pub fn is_running(&self, direction: AudioDirection) -> bool {
        self.state(direction) == PortState::Running
    }

    fn cell(&self, direction: AudioDirection) -> &AtomicU8 {
        match direction {
            AudioDirection::Input => &self.input,
            AudioDirection::Output => &self.output,
        }
    }
}

impl Default for AudioPorts {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioPeripheral for &AudioPorts {
    type Error = AudioPortError;

    fn stop(&mut self, direction: AudioDirection) -> Result<(), Self::Error> {
        self.cell(direction)
            .compare_exchange(
                PortState::Running as u8,
                PortState::Stopped as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .or_else(|current| match PortState::from_raw(current) {
                PortState::Uninstalled => Err(AudioPortError::NotInstalled(direction)),
                _ => Ok(()),
            })
    }

    fn uninstall(&mut self, direction: AudioDirection) -> Result<(), Self::Error> {
        let previous = self
            .cell(direction)
            .swap(PortState::Uninstalled as u8, Ordering::AcqRel);
        match PortState::from_raw(previous) {
            PortState::Uninstalled => Err(AudioPortError::NotInstalled(direction)),
            _ => Ok(()),
        }
    }
}
