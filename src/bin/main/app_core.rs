//! Application-core executors: audio streaming, status LED and touch polling.

use elato_core::input::{
    poll_inputs,
    touch::{TouchConfig, TouchInput},
};
use elato_core::tasks::{CoreId, TaskKind, TaskPlan};
use elato_core::{AudioDirection, DeviceState, PipelineAction};
use elato_hal_esp32s3::{
    input::touch::DigitalTouchPad,
    scheduler::{self, PREEMPTIVE_LEVELS, Placement},
    time::EmbassyClock,
};
use embassy_executor::{SendSpawner, SpawnError};
use embassy_time::{Duration, Instant, Ticker};
use esp_hal::{
    gpio::{Input, Output},
    interrupt::software::SoftwareInterrupt,
};
use esp_rtos::embassy::{Executor, InterruptExecutor};
use log::{debug, info, warn};
use static_cell::StaticCell;

use super::{AUDIO_PORTS, CONNECTIVITY, CONTEXT, INACTIVITY, TOUCH_THRESHOLD};

const AUDIO_FRAME_MS: u64 = 20;
const LED_REFRESH_MS: u64 = 100;

static APP_EXECUTOR: StaticCell<Executor> = StaticCell::new();
static PREEMPTIVE_HIGH: StaticCell<InterruptExecutor<2>> = StaticCell::new();
static PREEMPTIVE_MID: StaticCell<InterruptExecutor<3>> = StaticCell::new();

/// Peripherals moved onto the application core.
pub(super) struct AppParts {
    pub led: Output<'static>,
    /// Present only when the pad drives input instead of the button.
    pub touch: Option<Input<'static>>,
    pub sw_int2: SoftwareInterrupt<'static, 2>,
    pub sw_int3: SoftwareInterrupt<'static, 3>,
}

pub(super) fn run(plan: TaskPlan<'static>, parts: AppParts) -> ! {
    let AppParts {
        led,
        touch,
        sw_int2,
        sw_int3,
    } = parts;

    let preemptive = [
        PREEMPTIVE_HIGH
            .init(InterruptExecutor::new(sw_int2))
            .start(PREEMPTIVE_LEVELS[0]),
        PREEMPTIVE_MID
            .init(InterruptExecutor::new(sw_int3))
            .start(PREEMPTIVE_LEVELS[1]),
    ];

    let executor = APP_EXECUTOR.init(Executor::new());
    executor.run(move |spawner| {
        let thread = spawner.make_send();
        let mut led = Some(led);
        let mut touch = touch;

        for task in plan.on_core(CoreId::Application) {
            let target = match scheduler::placement(&plan, task.kind) {
                Placement::Thread => thread,
                Placement::Preemptive { slot, .. } => preemptive[slot as usize],
            };
            if let Err(err) = spawn_task(target, task.kind, &mut led, &mut touch) {
                warn!("tasks: spawning {} failed ({:?})", task.name, err);
            }
        }
        info!("tasks: application core running");
    })
}

fn spawn_task(
    spawner: SendSpawner,
    kind: TaskKind,
    led: &mut Option<Output<'static>>,
    touch: &mut Option<Input<'static>>,
) -> Result<(), SpawnError> {
    match kind {
        TaskKind::Led => {
            if let Some(pin) = led.take() {
                spawner.spawn(led_task(pin)?);
            }
        }
        TaskKind::AudioInput => spawner.spawn(audio_task(AudioDirection::Input)?),
        TaskKind::AudioOutput => spawner.spawn(audio_task(AudioDirection::Output)?),
        TaskKind::TouchPoll => match touch.take() {
            Some(pin) => spawner.spawn(touch_task(pin)?),
            None => warn!("tasks: touch task planned without a touch pin"),
        },
        TaskKind::Network => warn!("tasks: network task belongs to the protocol core"),
    }
    Ok(())
}

/// Frame pump for one audio direction. Parks for good once sleep entry
/// begins.
#[embassy_executor::task(pool_size = 2)]
async fn audio_task(direction: AudioDirection) {
    let mut ticker = Ticker::every(Duration::from_millis(AUDIO_FRAME_MS));
    let mut frames = 0u32;

    loop {
        match CONTEXT.audio_gate(direction) {
            PipelineAction::Halt => break,
            PipelineAction::Flush => {
                debug!("audio: {} flushed after {} frames", direction.as_str(), frames);
                frames = 0;
            }
            PipelineAction::Pause => {}
            PipelineAction::Run => {
                if AUDIO_PORTS.is_running(direction) {
                    frames = frames.wrapping_add(1);
                    if matches!(
                        CONTEXT.state.get(),
                        DeviceState::Listening | DeviceState::Speaking
                    ) {
                        INACTIVITY.record_activity(Instant::now().as_millis());
                    }
                }
            }
        }
        ticker.next().await;
    }

    info!("audio: {} parked", direction.as_str());
}

#[embassy_executor::task]
async fn led_task(mut led: Output<'static>) {
    let mut ticker = Ticker::every(Duration::from_millis(LED_REFRESH_MS));
    let mut blink = false;

    loop {
        match CONTEXT.state.get() {
            DeviceState::Sleep => break,
            DeviceState::Listening | DeviceState::Speaking => led.set_high(),
            DeviceState::Processing | DeviceState::Waiting => {
                blink = !blink;
                led.set_level(blink.into());
            }
            _ => led.set_low(),
        }
        ticker.next().await;
    }

    led.set_low();
}

#[embassy_executor::task]
async fn touch_task(pin: Input<'static>) {
    let config = TouchConfig::default().with_threshold(TOUCH_THRESHOLD);
    let mut touch = TouchInput::new(DigitalTouchPad::new(pin, true), config);
    info!("touch: polling every {}ms", config.poll_interval_ms());

    poll_inputs(
        &mut touch,
        &CONTEXT,
        &EmbassyClock,
        config.poll_interval_ms(),
        || CONNECTIVITY.server_reachable(),
    )
    .await;

    info!("touch: polling stopped");
}
