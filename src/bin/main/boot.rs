use elato_core::DeviceState;
use elato_core::cache::PersistentCache;
use elato_hal_esp32s3::storage::flash_namespace::FlashNamespaceStore;
use esp_hal::{
    rtc_cntl::{SocResetReason, reset_reason, wakeup_cause},
    system::Cpu,
};
use log::{info, warn};

use super::CONTEXT;

pub(super) type Cache = PersistentCache<FlashNamespaceStore>;

/// Logs why the chip is running; returns whether it woke from deep sleep.
pub(super) fn log_boot_cause() -> bool {
    let boot_reset_reason = reset_reason(Cpu::ProCpu);
    let boot_wakeup_cause = wakeup_cause();
    info!(
        "boot reset_reason={:?} wakeup_cause={:?}",
        boot_reset_reason, boot_wakeup_cause
    );
    boot_reset_reason == Some(SocResetReason::CoreDeepSleep)
}

/// Opens the preference store and loads the device credential. Boot
/// continues without persistence if the flash partition is unusable.
pub(super) fn load_preferences(provisioned_token: Option<&str>) -> Option<Cache> {
    let mut cache = match FlashNamespaceStore::new() {
        Ok(store) => PersistentCache::new(store),
        Err(err) => {
            warn!("prefs: flash store unavailable ({:?}); running without cache", err);
            return None;
        }
    };

    if cfg!(feature = "factory-reset-on-boot") {
        factory_reset(&mut cache);
    }

    if let Some(token) = provisioned_token.filter(|token| !token.is_empty()) {
        match cache.load_auth_token() {
            Ok(stored) if stored.as_str() == token => {}
            _ => match cache.store_auth_token(token) {
                Ok(()) => info!("auth: provisioned token stored len={}", token.len()),
                Err(err) => warn!("auth: storing provisioned token failed ({:?})", err),
            },
        }
    }

    match cache.load_auth_token() {
        Ok(token) if token.is_empty() => info!("auth: no token stored"),
        Ok(token) => info!("auth: token loaded len={}", token.len()),
        Err(err) => warn!("auth: token read failed ({:?})", err),
    }

    Some(cache)
}

fn factory_reset(cache: &mut Cache) {
    if let Err(err) = CONTEXT
        .state
        .compare_and_set(DeviceState::Setup, DeviceState::FactoryReset)
    {
        warn!("prefs: factory reset skipped ({:?})", err);
        return;
    }
    if let Err(err) = cache.factory_reset() {
        warn!("prefs: factory reset failed ({:?})", err);
    }
    let _ = CONTEXT
        .state
        .compare_and_set(DeviceState::FactoryReset, DeviceState::Setup);
}
