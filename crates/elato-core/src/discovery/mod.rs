//! Tiered server discovery with verification and persistent fallback.
//!
//! Tiers run in order: mDNS service query, broadcast announcement, mDNS host
//! query, cached endpoint. A candidate is only returned after a TCP probe
//! succeeds, and every returned endpoint is written back to the cache.

pub mod announce;
pub mod mdns;

use core::fmt::{self, Debug};
use core::net::{Ipv4Addr, SocketAddrV4};

use embassy_futures::select::{Either, select};
use log::{debug, info, warn};

use crate::cache::{CachedServer, DEFAULT_SERVER_PORT, EndpointCache};
use crate::time::{CancelToken, Clock, RetryPolicy, RetryWindow, WindowEnd};

use announce::{ANNOUNCEMENT_MAX_BYTES, parse_announcement};

/// Overall budget for the service query tier when the caller has no opinion.
pub const DEFAULT_SERVICE_BUDGET_MS: u64 = 10_000;

/// Multicast DNS browsing, as provided by the board's network stack.
#[allow(async_fn_in_trait)]
pub trait ServiceBrowser {
    type Error: Debug;

    /// Brings the responder up. Called before every resolve until it works.
    async fn start(&mut self) -> Result<(), Self::Error>;

    /// One query round for `_<service>._<protocol>.local`.
    async fn query_service(
        &mut self,
        service: &str,
        protocol: &str,
    ) -> Result<Option<SocketAddrV4>, Self::Error>;

    /// One query round for `<host>.local`.
    async fn query_host(&mut self, host: &str) -> Result<Option<Ipv4Addr>, Self::Error>;
}

/// Receiver for `"<MARKER> <ipv4> <port>"` broadcast datagrams.
#[allow(async_fn_in_trait)]
pub trait AnnouncementListener {
    type Error: Debug;

    async fn bind(&mut self, port: u16) -> Result<(), Self::Error>;

    /// Waits for the next datagram and returns its length.
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    fn close(&mut self);
}

/// Connect-only liveness check.
#[allow(async_fn_in_trait)]
pub trait ReachabilityProbe {
    async fn probe(&mut self, target: SocketAddrV4, timeout_ms: u64) -> bool;
}

impl<T: ServiceBrowser> ServiceBrowser for &mut T {
    type Error = T::Error;

    async fn start(&mut self) -> Result<(), Self::Error> {
        (**self).start().await
    }

    async fn query_service(
        &mut self,
        service: &str,
        protocol: &str,
    ) -> Result<Option<SocketAddrV4>, Self::Error> {
        (**self).query_service(service, protocol).await
    }

    async fn query_host(&mut self, host: &str) -> Result<Option<Ipv4Addr>, Self::Error> {
        (**self).query_host(host).await
    }
}

impl<T: AnnouncementListener> AnnouncementListener for &mut T {
    type Error = T::Error;

    async fn bind(&mut self, port: u16) -> Result<(), Self::Error> {
        (**self).bind(port).await
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        (**self).recv(buf).await
    }

    fn close(&mut self) {
        (**self).close()
    }
}

impl<T: ReachabilityProbe> ReachabilityProbe for &mut T {
    async fn probe(&mut self, target: SocketAddrV4, timeout_ms: u64) -> bool {
        (**self).probe(target, timeout_ms).await
    }
}

/// The device's own interface address and netmask.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Ipv4Subnet {
    pub address: Ipv4Addr,
    pub mask: Ipv4Addr,
}

impl Ipv4Subnet {
    pub const fn new(address: Ipv4Addr, mask: Ipv4Addr) -> Self {
        Self { address, mask }
    }

    pub fn from_prefix(address: Ipv4Addr, prefix_len: u8) -> Self {
        let bits = match prefix_len {
            0 => 0,
            len => u32::MAX << (32 - u32::from(len.min(32))),
        };
        Self::new(address, Ipv4Addr::from(bits))
    }

    /// `(candidate & mask) == (address & mask)`.
    pub fn contains(&self, candidate: Ipv4Addr) -> bool {
        let mask = u32::from(self.mask);
        u32::from(candidate) & mask == u32::from(self.address) & mask
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Tier {
    ServiceQuery,
    Announcement,
    HostQuery,
    Cache,
}

impl Tier {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ServiceQuery => "service-query",
            Self::Announcement => "announcement",
            Self::HostQuery => "host-query",
            Self::Cache => "cache",
        }
    }
}

/// A server endpoint that passed the reachability probe.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EndpointRecord {
    pub address: Ipv4Addr,
    pub port: u16,
    pub verified: bool,
    pub source: Tier,
}

impl EndpointRecord {
    pub fn socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.address, self.port)
    }
}

impl fmt::Display for EndpointRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DiscoveryError {
    /// Every tier was exhausted.
    NotFound,
    Cancelled,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DiscoveryConfig {
    pub service_name: &'static str,
    pub protocol: &'static str,
    pub host_name: &'static str,
    pub announcement_marker: &'static str,
    pub announcement_port: u16,
    pub default_port: u16,
    pub service_query_interval_ms: u64,
    pub announcement_listen_ms: u64,
    pub probe_timeout_ms: u64,
    /// Try the cached endpoint before any network query.
    pub cache_first: bool,
}

impl DiscoveryConfig {
    pub const fn with_service(mut self, service_name: &'static str, protocol: &'static str) -> Self {
        self.service_name = service_name;
        self.protocol = protocol;
        self
    }

    pub const fn with_host_name(mut self, host_name: &'static str) -> Self {
        self.host_name = host_name;
        self
    }

    pub const fn with_announcement(mut self, marker: &'static str, port: u16) -> Self {
        self.announcement_marker = marker;
        self.announcement_port = port;
        self
    }

    pub const fn with_default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    pub const fn with_service_query_interval_ms(mut self, interval_ms: u64) -> Self {
        self.service_query_interval_ms = interval_ms;
        self
    }

    pub const fn with_announcement_listen_ms(mut self, listen_ms: u64) -> Self {
        self.announcement_listen_ms = listen_ms;
        self
    }

    pub const fn with_probe_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.probe_timeout_ms = timeout_ms;
        self
    }

    pub const fn with_cache_first(mut self, cache_first: bool) -> Self {
        self.cache_first = cache_first;
        self
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            service_name: "elato",
            protocol: "tcp",
            host_name: "elato",
            announcement_marker: "ELATO_SERVER",
            announcement_port: 1900,
            default_port: DEFAULT_SERVER_PORT,
            service_query_interval_ms: 250,
            announcement_listen_ms: 3_000,
            probe_timeout_ms: 1_500,
            cache_first: false,
        }
    }
}

/// Owns the tier back-ends for the lifetime of the network task. Nothing
/// about a resolved endpoint is retained between calls except what the cache
/// persists.
pub struct Resolver<S, A, P, K, C> {
    browser: S,
    listener: A,
    prober: P,
    cache: K,
    clock: C,
    config: DiscoveryConfig,
    browser_started: bool,
}

impl<S, A, P, K, C> Resolver<S, A, P, K, C>
where
    S: ServiceBrowser,
    A: AnnouncementListener,
    P: ReachabilityProbe,
    K: EndpointCache,
    C: Clock,
{
    pub fn new(browser: S, listener: A, prober: P, cache: K, clock: C, config: DiscoveryConfig) -> Self {
        Self {
            browser,
            listener,
            prober,
            cache,
            clock,
            config,
            browser_started: false,
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn cache_mut(&mut self) -> &mut K {
        &mut self.cache
    }

    /// Finds and verifies a server endpoint.
    ///
    /// `budget_ms` bounds the service query tier; the other tiers carry their
    /// own configured limits. `local` is the device's interface, used for the
    /// subnet check of the host query and cache tiers.
    pub async fn resolve(
        &mut self,
        budget_ms: u64,
        local: Ipv4Subnet,
        cancel: &CancelToken,
    ) -> Result<EndpointRecord, DiscoveryError> {
        info!(
            "discovery: resolving service=_{}._{} budget_ms={}",
            self.config.service_name, self.config.protocol, budget_ms
        );

        if self.config.cache_first
            && let Some(record) = self.cache_tier(local).await
        {
            return Ok(record);
        }

        ensure_live(cancel)?;
        if let Some(candidate) = self.service_query_tier(budget_ms, cancel).await?
            && let Some(record) = self.accept(Tier::ServiceQuery, candidate).await
        {
            return Ok(record);
        }

        ensure_live(cancel)?;
        if let Some(candidate) = self.announcement_tier(cancel).await?
            && let Some(record) = self.accept(Tier::Announcement, candidate).await
        {
            return Ok(record);
        }

        ensure_live(cancel)?;
        if let Some(record) = self.host_query_tier(local).await {
            return Ok(record);
        }

        if !self.config.cache_first {
            ensure_live(cancel)?;
            if let Some(record) = self.cache_tier(local).await {
                return Ok(record);
            }
        }

        warn!("discovery: no server found");
        Err(DiscoveryError::NotFound)
    }

    async fn service_query_tier(
        &mut self,
        budget_ms: u64,
        cancel: &CancelToken,
    ) -> Result<Option<SocketAddrV4>, DiscoveryError> {
        if !self.browser_started {
            match self.browser.start().await {
                Ok(()) => self.browser_started = true,
                Err(err) => {
                    warn!("discovery: mdns responder unavailable ({:?}); skipping service query", err);
                    return Ok(None);
                }
            }
        }

        let policy = RetryPolicy::new(budget_ms, self.config.service_query_interval_ms);
        let mut window = RetryWindow::start(&self.clock, policy);
        loop {
            match window.begin_attempt(&self.clock, cancel) {
                Ok(()) => {}
                Err(WindowEnd::Cancelled) => return Err(DiscoveryError::Cancelled),
                Err(WindowEnd::Expired) => {
                    info!(
                        "discovery: service query timed out attempts={}",
                        window.attempts()
                    );
                    return Ok(None);
                }
            }

            match self
                .browser
                .query_service(self.config.service_name, self.config.protocol)
                .await
            {
                Ok(Some(found)) => {
                    info!("discovery: service query answered by {}", found);
                    return Ok(Some(found));
                }
                Ok(None) => {}
                Err(err) => debug!("discovery: service query failed ({:?})", err),
            }
            window.pause(&self.clock).await;
        }
    }

    async fn announcement_tier(
        &mut self,
        cancel: &CancelToken,
    ) -> Result<Option<SocketAddrV4>, DiscoveryError> {
        let port = self.config.announcement_port;
        if let Err(err) = self.listener.bind(port).await {
            warn!("discovery: cannot listen on udp port={} ({:?})", port, err);
            return Ok(None);
        }

        let listen_ms = self.config.announcement_listen_ms;
        let mut window = RetryWindow::start(&self.clock, RetryPolicy::new(listen_ms, listen_ms));
        let mut buf = [0u8; ANNOUNCEMENT_MAX_BYTES];
        let outcome = loop {
            match window.begin_attempt(&self.clock, cancel) {
                Ok(()) => {}
                Err(WindowEnd::Cancelled) => break Err(DiscoveryError::Cancelled),
                Err(WindowEnd::Expired) => break Ok(None),
            }
            let remaining = window.remaining_ms(self.clock.now_ms());
            if remaining == 0 {
                break Ok(None);
            }

            match select(self.listener.recv(&mut buf), self.clock.sleep_ms(remaining)).await {
                Either::First(Ok(len)) => {
                    let len = len.min(buf.len());
                    match parse_announcement(&buf[..len], self.config.announcement_marker) {
                        Some(found) => {
                            info!("discovery: announcement from {}", found);
                            break Ok(Some(found));
                        }
                        None => debug!("discovery: ignoring datagram len={}", len),
                    }
                }
                // Oversized or otherwise unreadable datagrams are dropped;
                // the window keeps listening.
                Either::First(Err(err)) => {
                    debug!("discovery: announcement receive failed ({:?})", err)
                }
                Either::Second(()) => break Ok(None),
            }
        };
        self.listener.close();
        outcome
    }

    async fn host_query_tier(&mut self, local: Ipv4Subnet) -> Option<EndpointRecord> {
        let host = self.config.host_name;
        let address = match self.browser.query_host(host).await {
            Ok(Some(address)) => address,
            Ok(None) => {
                info!("discovery: no answer for {}.local", host);
                return None;
            }
            Err(err) => {
                debug!("discovery: host query failed ({:?})", err);
                return None;
            }
        };

        if !local.contains(address) {
            info!(
                "discovery: ignoring {}.local at {} (different subnet than {})",
                host, address, local.address
            );
            return None;
        }

        let port = match self
            .browser
            .query_service(self.config.service_name, self.config.protocol)
            .await
        {
            Ok(Some(found)) => found.port(),
            _ => self.config.default_port,
        };
        self.accept(Tier::HostQuery, SocketAddrV4::new(address, port))
            .await
    }

    async fn cache_tier(&mut self, local: Ipv4Subnet) -> Option<EndpointRecord> {
        let cached = match self.cache.load_server() {
            Ok(Some(cached)) => cached,
            Ok(None) => return None,
            Err(err) => {
                warn!("discovery: cache unreadable ({:?})", err);
                return None;
            }
        };

        let stale = match cached {
            CachedServer::Endpoint(endpoint) if local.contains(*endpoint.ip()) => {
                if let Some(record) = self.accept(Tier::Cache, endpoint).await {
                    return Some(record);
                }
                "unreachable"
            }
            CachedServer::Endpoint(_) => "different subnet",
            CachedServer::Malformed => "malformed",
        };

        info!("discovery: evicting cached server ({})", stale);
        if let Err(err) = self.cache.evict_server() {
            warn!("discovery: cache eviction failed ({:?})", err);
        }
        None
    }

    /// Probes `candidate` and persists it on success.
    async fn accept(&mut self, tier: Tier, candidate: SocketAddrV4) -> Option<EndpointRecord> {
        if !self
            .prober
            .probe(candidate, self.config.probe_timeout_ms)
            .await
        {
            info!(
                "discovery: {} candidate {} not reachable",
                tier.as_str(),
                candidate
            );
            return None;
        }

        let record = EndpointRecord {
            address: *candidate.ip(),
            port: candidate.port(),
            verified: true,
            source: tier,
        };
        if let Err(err) = self.cache.store_server(candidate) {
            warn!("discovery: failed to cache {} ({:?})", record, err);
        }
        info!("discovery: using server {} via {}", record, tier.as_str());
        Some(record)
    }
}

fn ensure_live(cancel: &CancelToken) -> Result<(), DiscoveryError> {
    if cancel.is_cancelled() {
        Err(DiscoveryError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing;

#[cfg(test)]
mod tests;
