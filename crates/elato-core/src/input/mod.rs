//! Input abstraction layer: gesture detectors and the sleep-trigger funnel.

pub mod button;
pub mod inactivity;
pub mod touch;

use core::fmt::Debug;

use embassy_sync::blocking_mutex::raw::RawMutex;
use log::{info, warn};

use crate::signals::DeviceContext;
use crate::time::Clock;

/// Logical events produced by the input detectors.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InputEvent {
    /// Button released after a long press.
    LongPressUp,
    DoubleClick,
    SingleClick,
    /// Touch pad held past the long-press threshold.
    TouchHold,
    /// Fresh touch press; listening should restart at `at_ms`.
    ListenRequested { at_ms: u64 },
    InactivityTimeout,
}

impl InputEvent {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LongPressUp => "long-press-up",
            Self::DoubleClick => "double-click",
            Self::SingleClick => "single-click",
            Self::TouchHold => "touch-hold",
            Self::ListenRequested { .. } => "listen-requested",
            Self::InactivityTimeout => "inactivity-timeout",
        }
    }

    pub const fn requests_sleep(self) -> bool {
        matches!(
            self,
            Self::LongPressUp | Self::DoubleClick | Self::TouchHold | Self::InactivityTimeout
        )
    }
}

/// Polled input provider.
pub trait InputProvider {
    type Error: Debug;

    fn poll_event(&mut self, now_ms: u64) -> Result<Option<InputEvent>, Self::Error>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InputAction {
    SleepRequested,
    ListenScheduled,
    Ignored,
}

/// Routes one event into the signal channel. Producers never touch the state
/// register directly.
pub fn dispatch<M: RawMutex>(
    ctx: &DeviceContext<M>,
    event: InputEvent,
    link_up: bool,
) -> InputAction {
    if event.requests_sleep() {
        info!("input: {} requests sleep", event.as_str());
        ctx.signals.request_sleep();
        return InputAction::SleepRequested;
    }

    match event {
        InputEvent::ListenRequested { at_ms } if link_up && !ctx.state.is_sleeping() => {
            ctx.signals.schedule_listen(at_ms);
            InputAction::ListenScheduled
        }
        _ => InputAction::Ignored,
    }
}

/// Polls `provider` every `interval_ms` until the device enters sleep.
pub async fn poll_inputs<P, M, C, F>(
    provider: &mut P,
    ctx: &DeviceContext<M>,
    clock: &C,
    interval_ms: u64,
    mut link_up: F,
) where
    P: InputProvider,
    M: RawMutex,
    C: Clock,
    F: FnMut() -> bool,
{
    while !ctx.state.is_sleeping() {
        match provider.poll_event(clock.now_ms()) {
            Ok(Some(event)) => {
                dispatch(ctx, event, link_up());
            }
            Ok(None) => {}
            Err(err) => warn!("input: poll failed ({:?})", err),
        }
        clock.sleep_ms(interval_ms).await;
    }
}
