//! Process-wide device state register.
//!
//! Every task reads the register to gate its work. Once the register holds
//! [`DeviceState::Sleep`] it can never leave it during the current wake cycle;
//! only a cold boot constructs a fresh register.

use core::sync::atomic::{AtomicU8, Ordering};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum DeviceState {
    Setup = 0,
    Idle = 1,
    SoftAp = 2,
    Listening = 3,
    Speaking = 4,
    Processing = 5,
    Waiting = 6,
    FactoryReset = 7,
    Sleep = 8,
}

impl DeviceState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Idle,
            2 => Self::SoftAp,
            3 => Self::Listening,
            4 => Self::Speaking,
            5 => Self::Processing,
            6 => Self::Waiting,
            7 => Self::FactoryReset,
            8 => Self::Sleep,
            _ => Self::Setup,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Idle => "idle",
            Self::SoftAp => "soft_ap",
            Self::Listening => "listening",
            Self::Speaking => "speaking",
            Self::Processing => "processing",
            Self::Waiting => "waiting",
            Self::FactoryReset => "factory_reset",
            Self::Sleep => "sleep",
        }
    }

    /// Audio pipelines may only move samples in these states.
    pub const fn accepts_audio(self) -> bool {
        !matches!(self, Self::Sleep | Self::FactoryReset | Self::Setup)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StateError {
    /// The register is in `Sleep`; nothing moves it out.
    Sleeping,
    /// Compare-and-set lost against a concurrent writer.
    Contended { actual: DeviceState },
}

/// Lock-free state register shared by reference with every task.
#[derive(Debug)]
pub struct DeviceStateCell {
    raw: AtomicU8,
}

impl DeviceStateCell {
    pub const fn new() -> Self {
        Self {
            raw: AtomicU8::new(DeviceState::Setup as u8),
        }
    }

    pub fn get(&self) -> DeviceState {
        DeviceState::from_raw(self.raw.load(Ordering::Acquire))
    }

    pub fn is_sleeping(&self) -> bool {
        self.get() == DeviceState::Sleep
    }

    /// Atomically replaces `current` with `next`.
    ///
    /// Fails with [`StateError::Sleeping`] if the register already holds
    /// `Sleep`, regardless of `current`.
    pub fn compare_and_set(
        &self,
        current: DeviceState,
        next: DeviceState,
    ) -> Result<(), StateError> {
        if current == DeviceState::Sleep && next != DeviceState::Sleep {
            return Err(StateError::Sleeping);
        }

        match self.raw.compare_exchange(
            current as u8,
            next as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(()),
            Err(raw) => {
                let actual = DeviceState::from_raw(raw);
                if actual == DeviceState::Sleep {
                    Err(StateError::Sleeping)
                } else {
                    Err(StateError::Contended { actual })
                }
            }
        }
    }

    /// Unconditional write for any state other than `Sleep`; refused once
    /// sleeping.
    pub fn set(&self, next: DeviceState) -> Result<DeviceState, StateError> {
        let mut current = self.raw.load(Ordering::Acquire);
        loop {
            if current == DeviceState::Sleep as u8 {
                return if next == DeviceState::Sleep {
                    Ok(DeviceState::Sleep)
                } else {
                    Err(StateError::Sleeping)
                };
            }
            match self.raw.compare_exchange_weak(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(previous) => return Ok(DeviceState::from_raw(previous)),
                Err(actual) => current = actual,
            }
        }
    }

    /// Moves the register into `Sleep` and returns the previous state.
    ///
    /// Returns `None` when the register was already sleeping, which lets the
    /// caller run the sleep-entry sequence at most once per wake cycle.
    pub fn enter_sleep(&self) -> Option<DeviceState> {
        let previous = self.raw.swap(DeviceState::Sleep as u8, Ordering::AcqRel);
        if previous == DeviceState::Sleep as u8 {
            None
        } else {
            Some(DeviceState::from_raw(previous))
        }
    }
}

impl Default for DeviceStateCell {
    fn default() -> Self {
        Self::new()
    }
}
