use elato_core::discovery::{DEFAULT_SERVICE_BUDGET_MS, DiscoveryError, Resolver};
use elato_core::time::CancelToken;
use elato_hal_esp32s3::{
    network::{
        ConnectivityHandle,
        announce::UdpAnnouncementListener,
        link::ServerLink,
        mdns::UdpServiceBrowser,
        probe::TcpProber,
    },
    time::EmbassyClock,
};
use embassy_net::Stack;
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, mutex::Mutex};
use embassy_time::{Duration as EmbassyDuration, Timer, WithTimeout};
use esp_radio::wifi::WifiController;
use log::{info, warn};

use super::{CONTEXT, DISCOVERY_CANCEL, boot::Cache};

const WIFI_RETRY_BACKOFF_MIN_SECS: u64 = 2;
const WIFI_RETRY_BACKOFF_MAX_SECS: u64 = 120;
const NETWORK_POLL_INTERVAL_MS: u64 = 500;
const DHCP_TIMEOUT_SECS: u64 = 15;
const DISCOVERY_RETRY_SECS: u64 = 5;
const LINK_CHECK_INTERVAL_MS: u64 = 1_000;
const LINK_CONNECT_TIMEOUT_MS: u64 = 3_000;

pub(super) type Link = Mutex<CriticalSectionRawMutex, ServerLink<'static>>;

pub(super) type ServerResolver = Resolver<
    UdpServiceBrowser<'static>,
    UdpAnnouncementListener<'static>,
    TcpProber<'static>,
    Option<Cache>,
    EmbassyClock,
>;

fn wifi_retry_backoff_secs(consecutive_failures: u32) -> u64 {
    // 2, 4, 8, 16, 32, 64, 120, 120, ...
    let shift = consecutive_failures.min(6);
    WIFI_RETRY_BACKOFF_MIN_SECS
        .saturating_mul(1u64 << shift)
        .min(WIFI_RETRY_BACKOFF_MAX_SECS)
}

async fn wait_before_wifi_retry(consecutive_failures: &mut u32) {
    let delay_secs = wifi_retry_backoff_secs(*consecutive_failures);
    *consecutive_failures = consecutive_failures.saturating_add(1);
    info!(
        "wifi retrying in {}s (consecutive_failures={})",
        delay_secs, *consecutive_failures
    );
    Timer::after_secs(delay_secs).await;
}

fn link_lost(connectivity: &ConnectivityHandle, cancel: &CancelToken) {
    connectivity.mark_disconnected();
    cancel.cancel();
}

pub(super) async fn wifi_connection_loop(
    wifi_controller: &mut WifiController<'_>,
    stack: Stack<'_>,
    connectivity: &'static ConnectivityHandle,
) -> ! {
    let mut consecutive_failures = 0u32;

    loop {
        connectivity.mark_connecting();

        if !wifi_controller.is_started().unwrap_or(false)
            && let Err(err) = wifi_controller.start_async().await
        {
            info!("wifi start failed: {:?}", err);
            link_lost(connectivity, &DISCOVERY_CANCEL);
            wait_before_wifi_retry(&mut consecutive_failures).await;
            continue;
        }

        if let Err(err) = wifi_controller.connect_async().await {
            info!("wifi connect failed: {:?}", err);
            link_lost(connectivity, &DISCOVERY_CANCEL);
            let _ = wifi_controller.disconnect_async().await;
            wait_before_wifi_retry(&mut consecutive_failures).await;
            continue;
        }

        match stack
            .wait_config_up()
            .with_timeout(EmbassyDuration::from_secs(DHCP_TIMEOUT_SECS))
            .await
        {
            Ok(()) => {
                connectivity.update_from_stack(stack);
                DISCOVERY_CANCEL.reset();
                info!("wifi connected and dhcp ready");
            }
            Err(_) => {
                info!("dhcp timeout; forcing reconnect");
                connectivity.update_link_ip(stack.is_link_up(), None);
                let _ = wifi_controller.disconnect_async().await;
                wait_before_wifi_retry(&mut consecutive_failures).await;
                continue;
            }
        }

        consecutive_failures = 0;

        loop {
            let link_up = stack.is_link_up();
            let has_ipv4 = stack.config_v4().is_some();
            let is_connected = matches!(wifi_controller.is_connected(), Ok(true));

            connectivity.update_from_stack(stack);

            if !(link_up && has_ipv4 && is_connected) {
                info!(
                    "wifi state lost (link_up={} has_ipv4={} connected={}); reconnecting",
                    link_up, has_ipv4, is_connected
                );
                break;
            }

            Timer::after_millis(NETWORK_POLL_INTERVAL_MS).await;
        }

        link_lost(connectivity, &DISCOVERY_CANCEL);
        let _ = wifi_controller.disconnect_async().await;
        wait_before_wifi_retry(&mut consecutive_failures).await;
    }
}

/// Keeps a verified server linked while the device is awake: discovers an
/// endpoint whenever the link is down, then watches the connection.
pub(super) async fn server_loop(
    resolver: &mut ServerResolver,
    link: &Link,
    connectivity: &'static ConnectivityHandle,
) -> ! {
    loop {
        if CONTEXT.state.is_sleeping() {
            Timer::after_secs(1).await;
            continue;
        }

        let Some(local) = connectivity.snapshot().local else {
            Timer::after_millis(NETWORK_POLL_INTERVAL_MS).await;
            continue;
        };

        if link.lock().await.refresh() {
            Timer::after_millis(LINK_CHECK_INTERVAL_MS).await;
            continue;
        }

        match resolver
            .resolve(DEFAULT_SERVICE_BUDGET_MS, local, &DISCOVERY_CANCEL)
            .await
        {
            Ok(record) => {
                let mut guard = link.lock().await;
                if CONTEXT.state.is_sleeping() {
                    continue;
                }
                if guard
                    .connect(record.socket_addr(), LINK_CONNECT_TIMEOUT_MS)
                    .await
                    .is_err()
                {
                    drop(guard);
                    Timer::after_secs(DISCOVERY_RETRY_SECS).await;
                }
            }
            Err(DiscoveryError::Cancelled) => {
                info!("discovery: cancelled");
                Timer::after_millis(NETWORK_POLL_INTERVAL_MS).await;
            }
            Err(DiscoveryError::NotFound) => {
                warn!("discovery: retrying in {}s", DISCOVERY_RETRY_SECS);
                Timer::after_secs(DISCOVERY_RETRY_SECS).await;
            }
        }
    }
}
