#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use elato_core::discovery::{DiscoveryConfig, Resolver};
use elato_core::input::{InputProvider, button::ButtonConfig, dispatch, inactivity::InactivityTimer};
use elato_core::lifecycle::{LifecycleController, SleepTimings, WakeSource};
use elato_core::tasks::{
    BUTTON_MODE_TASKS, CoreId, TOUCH_MODE_TASKS, TaskDescriptor, TaskPlan, stack_budget,
};
use elato_core::time::{CancelToken, Clock};
use elato_core::{AudioDirection, DeviceContext, DeviceState};
use elato_hal_esp32s3::{
    audio::AudioPorts,
    input::button::ButtonInput,
    network::{
        ConnectivityHandle, WifiConfig,
        announce::{AnnouncementBuffers, UdpAnnouncementListener},
        link::{LinkBuffers, ServerLink},
        mdns::{MdnsBuffers, UdpServiceBrowser},
        probe::TcpProber,
    },
    power::{DeepSleepPower, WAKE_GPIO},
    scheduler,
    time::EmbassyClock,
};
use embassy_executor::Spawner;
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, mutex::Mutex};
use embassy_time::Timer;
use esp_hal::{
    clock::CpuClock,
    gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull},
    interrupt::software::SoftwareInterruptControl,
    rtc_cntl::sleep::WakeupLevel,
    system::Stack,
    timer::timg::TimerGroup,
};
use esp_radio::wifi::{ClientConfig, ModeConfig};
use log::{LevelFilter, info, warn};
use static_cell::StaticCell;

#[path = "main/app_core.rs"]
mod app_core;
#[path = "main/boot.rs"]
mod boot;
#[path = "main/network.rs"]
mod network;

const TOUCH_MODE: bool = cfg!(feature = "touch-mode");
const TASKS: &[TaskDescriptor] = if TOUCH_MODE {
    &TOUCH_MODE_TASKS
} else {
    &BUTTON_MODE_TASKS
};
// Task stacks plus headroom for the executors themselves.
const APP_CORE_STACK_BYTES: usize = stack_budget(TASKS, CoreId::Application) as usize + 4096;

const TOUCH_THRESHOLD: u32 = 22_500;
const WAKE_SOURCE: WakeSource = if TOUCH_MODE {
    WakeSource::TouchThreshold {
        pad: WAKE_GPIO,
        threshold: TOUCH_THRESHOLD,
    }
} else {
    WakeSource::ButtonLevelLow { gpio: WAKE_GPIO }
};
// Button pulls the line low; the touch module drives it high.
const WAKE_LEVEL: WakeupLevel = if TOUCH_MODE {
    WakeupLevel::High
} else {
    WakeupLevel::Low
};
const WAKE_PULL: Pull = if TOUCH_MODE { Pull::Down } else { Pull::Up };

const CONTROL_POLL_INTERVAL_MS: u64 = 10;
const INACTIVITY_TIMEOUT_MS: u32 = 300_000;

const WIFI_SSID: &str = env!(
    "ELATO_WIFI_SSID",
    "Set ELATO_WIFI_SSID in your environment before building/flashing."
);
const WIFI_PASSWORD: &str = env!(
    "ELATO_WIFI_PASSWORD",
    "Set ELATO_WIFI_PASSWORD in your environment before building/flashing."
);
const WIFI_CONFIG: WifiConfig = WifiConfig::new(WIFI_SSID, WIFI_PASSWORD);
const AUTH_TOKEN: Option<&str> = option_env!("ELATO_AUTH_TOKEN");

static CONTEXT: DeviceContext<CriticalSectionRawMutex> = DeviceContext::new();
static CONNECTIVITY: ConnectivityHandle = ConnectivityHandle::new();
static AUDIO_PORTS: AudioPorts = AudioPorts::new();
static INACTIVITY: InactivityTimer = InactivityTimer::new(INACTIVITY_TIMEOUT_MS);
static DISCOVERY_CANCEL: CancelToken = CancelToken::new();

static NET_RESOURCES: StaticCell<embassy_net::StackResources<4>> = StaticCell::new();
static LINK_BUFFERS: StaticCell<LinkBuffers> = StaticCell::new();
static MDNS_BUFFERS: StaticCell<MdnsBuffers> = StaticCell::new();
static ANNOUNCE_BUFFERS: StaticCell<AnnouncementBuffers> = StaticCell::new();
static APP_CORE_STACK: StaticCell<Stack<APP_CORE_STACK_BYTES>> = StaticCell::new();

#[panic_handler]
fn panic(_: &core::panic::PanicInfo) -> ! {
    loop {}
}

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(_spawner: Spawner) -> ! {
    esp_println::logger::init_logger(LevelFilter::Info);
    esp_println::println!("boot: elato starting");

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);
    let woke_from_deep_sleep = boot::log_boot_cause();

    // esp-radio requires an allocator.
    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 65536);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    let cache = boot::load_preferences(AUTH_TOKEN);
    if CONTEXT.finish_boot() {
        info!(
            "state: {} woke_from_deep_sleep={}",
            CONTEXT.state.get().as_str(),
            woke_from_deep_sleep
        );
    }
    INACTIVITY.record_activity(EmbassyClock.now_ms());

    let plan = match TaskPlan::new(TASKS) {
        Ok(plan) => plan,
        Err(err) => {
            info!("tasks: invalid task table: {:?}", err);
            loop {
                Timer::after_secs(1).await;
            }
        }
    };
    scheduler::log_plan(&plan);

    AUDIO_PORTS.install(AudioDirection::Input);
    AUDIO_PORTS.install(AudioDirection::Output);

    // Wiring: BUTTON/TOUCH=GPIO2 (RTC wake), LED=GPIO13
    let wake_pin = Input::new(
        peripherals.GPIO2,
        InputConfig::default().with_pull(WAKE_PULL),
    );
    let led = Output::new(peripherals.GPIO13, Level::Low, OutputConfig::default());
    let (touch_pin, mut button) = if TOUCH_MODE {
        (Some(wake_pin), None)
    } else {
        match ButtonInput::new(wake_pin, ButtonConfig::default()) {
            Ok(button) => (None, Some(button)),
            Err(err) => {
                warn!("input: button init failed: {:?}", err);
                (None, None)
            }
        }
    };
    info!(
        "input: {} on GPIO{} wake_source={:?}",
        if TOUCH_MODE { "touch" } else { "button" },
        WAKE_GPIO,
        WAKE_SOURCE
    );

    let sw_ints = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    let app_parts = app_core::AppParts {
        led,
        touch: touch_pin,
        sw_int2: sw_ints.software_interrupt2,
        sw_int3: sw_ints.software_interrupt3,
    };
    esp_rtos::start_second_core(
        peripherals.CPU_CTRL,
        sw_ints.software_interrupt0,
        sw_ints.software_interrupt1,
        APP_CORE_STACK.init(Stack::new()),
        move || app_core::run(plan, app_parts),
    );

    let radio = match esp_radio::init() {
        Ok(radio) => radio,
        Err(err) => {
            info!("esp-radio init failed: {:?}", err);
            loop {
                Timer::after_secs(1).await;
            }
        }
    };

    let (mut wifi_controller, interfaces) =
        match esp_radio::wifi::new(&radio, peripherals.WIFI, esp_radio::wifi::Config::default()) {
            Ok(parts) => parts,
            Err(err) => {
                info!("wifi peripheral init failed: {:?}", err);
                loop {
                    Timer::after_secs(1).await;
                }
            }
        };

    let client_config = ClientConfig::default()
        .with_ssid(WIFI_CONFIG.ssid.into())
        .with_password(WIFI_CONFIG.password.into());
    let wifi_mode = ModeConfig::Client(client_config);
    if let Err(err) = wifi_controller.set_config(&wifi_mode) {
        info!("wifi mode config failed: {:?}", err);
        loop {
            Timer::after_secs(1).await;
        }
    }

    let stack_config = embassy_net::Config::dhcpv4(Default::default());
    let (stack, mut net_runner) = embassy_net::new(
        interfaces.sta,
        stack_config,
        NET_RESOURCES.init(embassy_net::StackResources::<4>::new()),
        0x5A17_2B34_D099_EE11,
    );

    let link: network::Link = Mutex::new(ServerLink::new(
        stack,
        LINK_BUFFERS.init(LinkBuffers::new()),
        &CONNECTIVITY,
    ));
    let mut resolver: network::ServerResolver = Resolver::new(
        UdpServiceBrowser::new(stack, MDNS_BUFFERS.init(MdnsBuffers::new())),
        UdpAnnouncementListener::new(stack, ANNOUNCE_BUFFERS.init(AnnouncementBuffers::new())),
        TcpProber::new(stack),
        cache,
        EmbassyClock,
        DiscoveryConfig::default(),
    );
    let mut lifecycle = LifecycleController::new(
        &CONTEXT,
        &link,
        &AUDIO_PORTS,
        DeepSleepPower::new(WAKE_LEVEL, WAKE_PULL),
        EmbassyClock,
        WAKE_SOURCE,
        SleepTimings::default(),
    );

    info!(
        "elato started: inactivity_timeout_ms={} cache_first={}",
        INACTIVITY_TIMEOUT_MS,
        resolver.config().cache_first
    );

    let net_future = async {
        net_runner.run().await;
    };
    let wifi_future = network::wifi_connection_loop(&mut wifi_controller, stack, &CONNECTIVITY);
    let server_future = network::server_loop(&mut resolver, &link, &CONNECTIVITY);

    let control_future = async {
        let clock = EmbassyClock;
        let mut last_state = CONTEXT.state.get();

        loop {
            let now_ms = clock.now_ms();

            if let Some(button) = button.as_mut() {
                match button.poll_event(now_ms) {
                    Ok(Some(event)) => {
                        INACTIVITY.record_activity(now_ms);
                        dispatch(&CONTEXT, event, CONNECTIVITY.server_reachable());
                    }
                    Ok(None) => {}
                    Err(err) => warn!("input: button poll failed: {:?}", err),
                }
            }

            if let Some(event) = INACTIVITY.poll(now_ms) {
                dispatch(&CONTEXT, event, false);
            }

            if CONTEXT.signals.take_due_listen(now_ms)
                && let Err(err) = CONTEXT.state.set(DeviceState::Listening)
            {
                warn!("state: listen restart rejected: {:?}", err);
            }

            let state = CONTEXT.state.get();
            if state != last_state {
                info!("state: {} -> {}", last_state.as_str(), state.as_str());
                last_state = state;
            }

            if CONTEXT.signals.sleep_requested() {
                // Unblocks a resolver still walking its tiers.
                DISCOVERY_CANCEL.cancel();
            }
            if let Some(report) = lifecycle.poll_sleep_request().await {
                warn!("lifecycle: deep sleep returned: {:?}", report);
            }

            Timer::after_millis(CONTROL_POLL_INTERVAL_MS).await;
        }
    };

    let _ = embassy_futures::join::join4(net_future, wifi_future, server_future, control_future)
        .await;
    unreachable!()
}
