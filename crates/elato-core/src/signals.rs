//! Cross-task signal channel and the owned device context.
//!
//! Producers (button, touch, inactivity) only ever set flags; the main loop
//! and the audio tasks consume them. Nothing here blocks except
//! [`LifecycleSignals::wait_stop_acks`].

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use embassy_futures::join::join;
use embassy_sync::{blocking_mutex::raw::RawMutex, signal::Signal};

use crate::state::{DeviceState, DeviceStateCell};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AudioDirection {
    Input,
    Output,
}

impl AudioDirection {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

pub struct LifecycleSignals<M: RawMutex> {
    sleep_requested: AtomicBool,
    input_flush: AtomicBool,
    output_flush: AtomicBool,
    // Low 32 bits of the deadline; 0 means nothing scheduled.
    listen_at_ms: AtomicU32,
    input_stopped: Signal<M, ()>,
    output_stopped: Signal<M, ()>,
}

impl<M: RawMutex> LifecycleSignals<M> {
    pub const fn new() -> Self {
        Self {
            sleep_requested: AtomicBool::new(false),
            input_flush: AtomicBool::new(false),
            output_flush: AtomicBool::new(false),
            listen_at_ms: AtomicU32::new(0),
            input_stopped: Signal::new(),
            output_stopped: Signal::new(),
        }
    }

    pub fn request_sleep(&self) {
        self.sleep_requested.store(true, Ordering::Release);
    }

    pub fn sleep_requested(&self) -> bool {
        self.sleep_requested.load(Ordering::Acquire)
    }

    /// Clears the request and reports whether one was pending. Only the main
    /// polling loop calls this.
    pub fn take_sleep_request(&self) -> bool {
        self.sleep_requested.swap(false, Ordering::AcqRel)
    }

    pub fn schedule_flush(&self, direction: AudioDirection) {
        self.flush_flag(direction).store(true, Ordering::Release);
    }

    pub fn take_flush(&self, direction: AudioDirection) -> bool {
        self.flush_flag(direction).swap(false, Ordering::AcqRel)
    }

    pub fn schedule_listen(&self, at_ms: u64) {
        self.listen_at_ms
            .store((at_ms as u32).max(1), Ordering::Release);
    }

    pub fn cancel_listen(&self) {
        self.listen_at_ms.store(0, Ordering::Release);
    }

    pub fn listen_scheduled(&self) -> bool {
        self.listen_at_ms.load(Ordering::Acquire) != 0
    }

    /// Consumes a scheduled listening restart once its deadline has passed.
    pub fn take_due_listen(&self, now_ms: u64) -> bool {
        let at = self.listen_at_ms.load(Ordering::Acquire);
        if at == 0 {
            return false;
        }
        // Wrapping distance keeps the comparison valid across u32 rollover.
        let overdue = (now_ms as u32).wrapping_sub(at) < u32::MAX / 2;
        overdue
            && self
                .listen_at_ms
                .compare_exchange(at, 0, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    /// Called by an audio task once it has observed `Sleep` and parked.
    pub fn acknowledge_stop(&self, direction: AudioDirection) {
        self.stop_signal(direction).signal(());
    }

    pub fn stop_acknowledged(&self, direction: AudioDirection) -> bool {
        self.stop_signal(direction).signaled()
    }

    /// Resolves once both audio tasks have acknowledged the stop request.
    pub async fn wait_stop_acks(&self) {
        join(self.input_stopped.wait(), self.output_stopped.wait()).await;
    }

    fn flush_flag(&self, direction: AudioDirection) -> &AtomicBool {
        match direction {
            AudioDirection::Input => &self.input_flush,
            AudioDirection::Output => &self.output_flush,
        }
    }

    fn stop_signal(&self, direction: AudioDirection) -> &Signal<M, ()> {
        match direction {
            AudioDirection::Input => &self.input_stopped,
            AudioDirection::Output => &self.output_stopped,
        }
    }
}

impl<M: RawMutex> Default for LifecycleSignals<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// What an audio task should do with its current buffers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PipelineAction {
    Run,
    /// Drop in-flight buffers, then keep running.
    Flush,
    /// No samples may move in the current state.
    Pause,
    /// Sleep entry has begun; the task has acknowledged and must park.
    Halt,
}

/// State register plus signal channel, constructed once at boot and handed to
/// every task by reference.
pub struct DeviceContext<M: RawMutex> {
    pub state: DeviceStateCell,
    pub signals: LifecycleSignals<M>,
}

impl<M: RawMutex> DeviceContext<M> {
    pub const fn new() -> Self {
        Self {
            state: DeviceStateCell::new(),
            signals: LifecycleSignals::new(),
        }
    }

    /// Setup -> Idle once device metadata is loaded.
    pub fn finish_boot(&self) -> bool {
        self.state
            .compare_and_set(DeviceState::Setup, DeviceState::Idle)
            .is_ok()
    }

    /// Polled by the audio tasks at the top of every loop iteration.
    pub fn audio_gate(&self, direction: AudioDirection) -> PipelineAction {
        let state = self.state.get();
        if state == DeviceState::Sleep {
            let _ = self.signals.take_flush(direction);
            self.signals.acknowledge_stop(direction);
            return PipelineAction::Halt;
        }
        if self.signals.take_flush(direction) {
            return PipelineAction::Flush;
        }
        if state.accepts_audio() {
            PipelineAction::Run
        } else {
            PipelineAction::Pause
        }
    }
}

impl<M: RawMutex> Default for DeviceContext<M> {
    fn default() -> Self {
        Self::new()
    }
}
