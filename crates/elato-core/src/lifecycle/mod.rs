//! Sleep entry: the ordered teardown that ends every wake cycle.
//!
//! Once started it always reaches deep sleep. Each step runs at most once;
//! failures are logged, counted and skipped.

use core::fmt::Debug;

use embassy_futures::select::{Either, select};
use embassy_sync::{blocking_mutex::raw::RawMutex, mutex::Mutex};
use log::{info, warn};

use crate::signals::{AudioDirection, DeviceContext};
use crate::state::DeviceState;
use crate::time::Clock;

const DIRECTIONS: [AudioDirection; 2] = [AudioDirection::Input, AudioDirection::Output];

/// Control handle for the microphone and speaker streams.
pub trait AudioPeripheral {
    type Error: Debug;

    fn stop(&mut self, direction: AudioDirection) -> Result<(), Self::Error>;

    /// Releases the driver for `direction`; only called after [`Self::stop`].
    fn uninstall(&mut self, direction: AudioDirection) -> Result<(), Self::Error>;
}

/// The server connection guarded by the network mutex.
#[allow(async_fn_in_trait)]
pub trait NetworkLink {
    type Error: Debug;

    fn is_connected(&self) -> bool;

    async fn disconnect(&mut self) -> Result<(), Self::Error>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WakeSource {
    /// RTC GPIO pulled low by the push button.
    ButtonLevelLow { gpio: u8 },
    /// Touch pad reading crossing `threshold`.
    TouchThreshold { pad: u8, threshold: u32 },
}

pub trait PowerControl {
    type Error: Debug;

    /// Whether the wake input is asserted right now (button held, finger on
    /// the pad).
    fn wake_input_active(&mut self) -> bool;

    fn arm_wake(&mut self, source: WakeSource) -> Result<(), Self::Error>;

    /// On hardware this never returns.
    fn enter_deep_sleep(&mut self);
}

#[derive(Debug, Clone, Copy)]
pub struct SleepTimings {
    ack_grace_ms: u64,
    disconnect_grace_ms: u64,
    settle_ms: u64,
    release_poll_ms: u64,
    release_settle_ms: u64,
    release_timeout_ms: u64,
}

impl Default for SleepTimings {
    fn default() -> Self {
        Self {
            ack_grace_ms: 100,
            disconnect_grace_ms: 100,
            settle_ms: 100,
            release_poll_ms: 50,
            release_settle_ms: 500,
            release_timeout_ms: 10_000,
        }
    }
}

impl SleepTimings {
    pub const fn with_ack_grace_ms(mut self, ack_grace_ms: u64) -> Self {
        self.ack_grace_ms = ack_grace_ms;
        self
    }

    pub const fn with_disconnect_grace_ms(mut self, disconnect_grace_ms: u64) -> Self {
        self.disconnect_grace_ms = disconnect_grace_ms;
        self
    }

    pub const fn with_settle_ms(mut self, settle_ms: u64) -> Self {
        self.settle_ms = settle_ms;
        self
    }

    pub const fn with_release_wait(mut self, poll_ms: u64, settle_ms: u64, timeout_ms: u64) -> Self {
        self.release_poll_ms = poll_ms;
        self.release_settle_ms = settle_ms;
        self.release_timeout_ms = timeout_ms;
        self
    }
}

/// What happened during one sleep entry. Only observable where
/// [`PowerControl::enter_deep_sleep`] returns.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SleepReport {
    pub previous: DeviceState,
    pub acknowledged: bool,
    pub disconnected: bool,
    pub wake_armed: bool,
    pub faults: u8,
}

pub struct LifecycleController<'a, M, LM, L, A, P, C>
where
    M: RawMutex,
    LM: RawMutex,
{
    ctx: &'a DeviceContext<M>,
    link: &'a Mutex<LM, L>,
    audio: A,
    power: P,
    clock: C,
    wake: WakeSource,
    timings: SleepTimings,
}

impl<'a, M, LM, L, A, P, C> LifecycleController<'a, M, LM, L, A, P, C>
where
    M: RawMutex,
    LM: RawMutex,
    L: NetworkLink,
    A: AudioPeripheral,
    P: PowerControl,
    C: Clock,
{
    pub fn new(
        ctx: &'a DeviceContext<M>,
        link: &'a Mutex<LM, L>,
        audio: A,
        power: P,
        clock: C,
        wake: WakeSource,
        timings: SleepTimings,
    ) -> Self {
        Self {
            ctx,
            link,
            audio,
            power,
            clock,
            wake,
            timings,
        }
    }

    pub fn wake_source(&self) -> WakeSource {
        self.wake
    }

    /// Runs sleep entry if a request is pending. Called from the main loop.
    pub async fn poll_sleep_request(&mut self) -> Option<SleepReport> {
        if !self.ctx.signals.take_sleep_request() {
            return None;
        }
        self.enter_sleep().await
    }

    /// Returns `None` when sleep entry already happened in this wake cycle.
    pub async fn enter_sleep(&mut self) -> Option<SleepReport> {
        let previous = self.ctx.state.enter_sleep()?;
        info!("lifecycle: entering sleep from={}", previous.as_str());
        self.ctx.signals.cancel_listen();
        let mut faults = 0u8;

        for direction in DIRECTIONS {
            self.ctx.signals.schedule_flush(direction);
        }

        let acknowledged = match select(
            self.ctx.signals.wait_stop_acks(),
            self.clock.sleep_ms(self.timings.ack_grace_ms),
        )
        .await
        {
            Either::First(()) => true,
            Either::Second(()) => {
                warn!(
                    "lifecycle: audio tasks silent after {}ms; stopping anyway",
                    self.timings.ack_grace_ms
                );
                false
            }
        };

        let link_mutex = self.link;
        let disconnected = {
            let mut link = link_mutex.lock().await;

            for direction in DIRECTIONS {
                if let Err(err) = self.audio.stop(direction) {
                    warn!("lifecycle: stop {} failed ({:?})", direction.as_str(), err);
                    faults = faults.saturating_add(1);
                }
            }

            if link.is_connected() {
                let closed = match link.disconnect().await {
                    Ok(()) => {
                        info!("lifecycle: server link closed");
                        true
                    }
                    Err(err) => {
                        warn!("lifecycle: disconnect failed ({:?})", err);
                        faults = faults.saturating_add(1);
                        false
                    }
                };
                self.clock.sleep_ms(self.timings.disconnect_grace_ms).await;
                closed
            } else {
                false
            }
        };

        self.clock.sleep_ms(self.timings.settle_ms).await;
        for direction in DIRECTIONS {
            if let Err(err) = self.audio.uninstall(direction) {
                warn!(
                    "lifecycle: uninstall {} failed ({:?})",
                    direction.as_str(),
                    err
                );
                faults = faults.saturating_add(1);
            }
        }

        info!("lifecycle: peripherals released faults={}", faults);
        log::logger().flush();

        if matches!(self.wake, WakeSource::TouchThreshold { .. }) {
            self.wait_for_wake_release().await;
        }

        let wake_armed = match self.power.arm_wake(self.wake) {
            Ok(()) => {
                info!("lifecycle: wake armed source={:?}", self.wake);
                true
            }
            Err(err) => {
                warn!("lifecycle: arming wake failed ({:?})", err);
                faults = faults.saturating_add(1);
                false
            }
        };

        let report = SleepReport {
            previous,
            acknowledged,
            disconnected,
            wake_armed,
            faults,
        };
        info!("lifecycle: entering deep sleep");
        log::logger().flush();
        self.power.enter_deep_sleep();
        Some(report)
    }

    /// Keeps the finger that asked for sleep from immediately waking the
    /// device again.
    async fn wait_for_wake_release(&mut self) {
        let started = self.clock.now_ms();
        while self.power.wake_input_active() {
            if self.clock.now_ms().saturating_sub(started) >= self.timings.release_timeout_ms {
                warn!("lifecycle: wake input still active; arming anyway");
                break;
            }
            self.clock.sleep_ms(self.timings.release_poll_ms).await;
        }
        self.clock.sleep_ms(self.timings.release_settle_ms).await;
    }
}
