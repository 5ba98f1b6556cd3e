use core::net::{Ipv4Addr, SocketAddrV4};

use super::testing::{RecordingProber, ScriptedBrowser, ScriptedListener};
use super::*;
use crate::cache::{CachedServer, EndpointCache, PersistentCache};
use crate::storage::testing::MemoryBackend;
use crate::time::testing::ManualClock;

fn endpoint(a: u8, b: u8, c: u8, d: u8, port: u16) -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::new(a, b, c, d), port)
}

fn home_subnet() -> Ipv4Subnet {
    Ipv4Subnet::new(Ipv4Addr::new(10, 0, 0, 5), Ipv4Addr::new(255, 255, 255, 0))
}

struct Rig {
    browser: ScriptedBrowser,
    listener: ScriptedListener,
    prober: RecordingProber,
    cache: PersistentCache<MemoryBackend>,
    clock: ManualClock,
    cancel: CancelToken,
    config: DiscoveryConfig,
}

impl Rig {
    fn new() -> Self {
        Self {
            browser: ScriptedBrowser::default(),
            listener: ScriptedListener::default(),
            prober: RecordingProber::default(),
            cache: PersistentCache::new(MemoryBackend::new()),
            clock: ManualClock::new(),
            cancel: CancelToken::new(),
            config: DiscoveryConfig::default(),
        }
    }

    fn resolve(&mut self, budget_ms: u64) -> Result<EndpointRecord, DiscoveryError> {
        let mut resolver = Resolver::new(
            &mut self.browser,
            &mut self.listener,
            &mut self.prober,
            &mut self.cache,
            &self.clock,
            self.config,
        );
        embassy_futures::block_on(resolver.resolve(budget_ms, home_subnet(), &self.cancel))
    }

    fn cached(&mut self) -> Option<CachedServer> {
        self.cache.load_server().unwrap()
    }
}

#[test]
fn broadcast_announcement_is_verified_and_cached() {
    let server = endpoint(192, 168, 1, 50, 8000);
    let mut rig = Rig::new();
    rig.listener.push(b"ELATO_SERVER 192.168.1.50 8000");
    rig.prober = RecordingProber::reaching(&[server]);

    let record = rig.resolve(1_000).unwrap();

    assert_eq!(record.socket_addr(), server);
    assert!(record.verified);
    assert_eq!(record.source, Tier::Announcement);
    assert_eq!(rig.prober.probed, [server]);
    assert_eq!(rig.prober.last_timeout_ms, Some(1_500));
    assert_eq!(rig.listener.bound, Some(1900));
    assert!(rig.listener.closed);
    assert_eq!(rig.cached(), Some(CachedServer::Endpoint(server)));
}

#[test]
fn stale_cache_entry_is_evicted() {
    let mut rig = Rig::new();
    rig.cache.store_server(endpoint(10, 0, 0, 9, 8000)).unwrap();

    assert_eq!(rig.resolve(500), Err(DiscoveryError::NotFound));
    assert_eq!(rig.prober.probed, [endpoint(10, 0, 0, 9, 8000)]);
    assert_eq!(rig.cached(), None);
}

#[test]
fn reachable_cache_entry_is_used_last() {
    let server = endpoint(10, 0, 0, 9, 8000);
    let mut rig = Rig::new();
    rig.cache.store_server(server).unwrap();
    rig.prober = RecordingProber::reaching(&[server]);

    let record = rig.resolve(500).unwrap();

    assert_eq!(record.source, Tier::Cache);
    assert!(rig.browser.service_queries > 0);
    assert_eq!(rig.browser.host_queries, 1);
    assert_eq!(rig.cached(), Some(CachedServer::Endpoint(server)));
}

#[test]
fn cache_entry_on_other_subnet_is_evicted_without_probing() {
    let mut rig = Rig::new();
    rig.cache.store_server(endpoint(192, 168, 1, 50, 8000)).unwrap();
    rig.prober = RecordingProber::reaching(&[endpoint(192, 168, 1, 50, 8000)]);

    assert_eq!(rig.resolve(0), Err(DiscoveryError::NotFound));
    assert!(rig.prober.probed.is_empty());
    assert_eq!(rig.cached(), None);
}

#[test]
fn service_answer_is_probed_before_acceptance() {
    let advertised = endpoint(10, 0, 0, 99, 9000);
    let mut rig = Rig::new();
    rig.browser.service = Some(advertised);

    assert_eq!(rig.resolve(1_000), Err(DiscoveryError::NotFound));
    assert_eq!(rig.prober.probed.first(), Some(&advertised));
    assert_eq!(rig.cached(), None);
}

#[test]
fn service_query_repeats_until_answered() {
    let server = endpoint(10, 0, 0, 20, 8000);
    let mut rig = Rig::new();
    rig.browser.service = Some(server);
    rig.browser.silent_rounds = 2;
    rig.prober = RecordingProber::reaching(&[server]);

    let record = rig.resolve(10_000).unwrap();

    assert_eq!(record.source, Tier::ServiceQuery);
    assert_eq!(rig.browser.service_queries, 3);
    assert_eq!(rig.clock.now_ms(), 500);
    assert!(rig.listener.bound.is_none());
}

#[test]
fn service_query_has_no_subnet_check() {
    let server = endpoint(172, 16, 0, 2, 8000);
    let mut rig = Rig::new();
    rig.browser.service = Some(server);
    rig.prober = RecordingProber::reaching(&[server]);

    assert_eq!(rig.resolve(1_000).map(|r| r.socket_addr()), Ok(server));
}

#[test]
fn exhausted_tiers_respect_their_time_limits() {
    let mut rig = Rig::new();

    assert_eq!(rig.resolve(1_000), Err(DiscoveryError::NotFound));
    assert_eq!(rig.browser.service_queries, 4);
    assert_eq!(rig.browser.host_queries, 1);
    assert_eq!(rig.clock.now_ms(), 1_000 + 3_000);
    assert!(rig.listener.closed);
}

#[test]
fn host_on_other_subnet_is_discarded_before_probing() {
    let mut rig = Rig::new();
    rig.browser.host = Some(Ipv4Addr::new(192, 168, 5, 5));
    rig.prober = RecordingProber::reaching(&[endpoint(192, 168, 5, 5, 8000)]);

    assert_eq!(rig.resolve(0), Err(DiscoveryError::NotFound));
    assert!(rig.prober.probed.is_empty());
}

#[test]
fn unreachable_announcement_is_neither_returned_nor_cached() {
    let announced = endpoint(10, 0, 0, 31, 8001);
    let mut rig = Rig::new();
    rig.listener.push(b"ELATO_SERVER 10.0.0.31 8001");

    assert_eq!(rig.resolve(0), Err(DiscoveryError::NotFound));
    assert_eq!(rig.prober.probed, [announced]);
    assert_eq!(rig.cached(), None);
}

#[test]
fn unreadable_datagram_does_not_end_the_announcement_window() {
    let announced = endpoint(10, 0, 0, 31, 8001);
    let mut rig = Rig::new();
    rig.listener.recv_errors = 1;
    rig.listener.push(b"ELATO_SERVER 10.0.0.31 8001");
    rig.prober = RecordingProber::reaching(&[announced]);

    let record = rig.resolve(0).unwrap();

    assert_eq!(record.source, Tier::Announcement);
    assert_eq!(record.socket_addr(), announced);
    assert_eq!(rig.listener.recv_calls, 2);
    assert!(rig.clock.now_ms() < 3_000);
}

#[test]
fn unreachable_host_on_local_subnet_is_neither_returned_nor_cached() {
    let mut rig = Rig::new();
    rig.browser.host = Some(Ipv4Addr::new(10, 0, 0, 7));

    assert_eq!(rig.resolve(0), Err(DiscoveryError::NotFound));
    assert_eq!(rig.prober.probed, [endpoint(10, 0, 0, 7, 8000)]);
    assert_eq!(rig.cached(), None);
}

#[test]
fn host_answer_uses_default_port_without_service_answer() {
    let mut rig = Rig::new();
    rig.browser.host = Some(Ipv4Addr::new(10, 0, 0, 7));
    rig.prober = RecordingProber::reaching(&[endpoint(10, 0, 0, 7, 8000)]);

    let record = rig.resolve(0).unwrap();
    assert_eq!(record.source, Tier::HostQuery);
    assert_eq!(record.socket_addr(), endpoint(10, 0, 0, 7, 8000));
}

#[test]
fn host_answer_takes_port_from_service_query() {
    let mut rig = Rig::new();
    rig.browser.service = Some(endpoint(10, 0, 0, 99, 9000));
    rig.browser.host = Some(Ipv4Addr::new(10, 0, 0, 7));
    rig.prober = RecordingProber::reaching(&[endpoint(10, 0, 0, 7, 9000)]);

    let record = rig.resolve(0).unwrap();
    assert_eq!(record.socket_addr(), endpoint(10, 0, 0, 7, 9000));
    assert_eq!(
        rig.prober.probed,
        [endpoint(10, 0, 0, 99, 9000), endpoint(10, 0, 0, 7, 9000)]
    );
    assert_eq!(
        rig.cached(),
        Some(CachedServer::Endpoint(endpoint(10, 0, 0, 7, 9000)))
    );
}

#[test]
fn responder_failure_skips_service_query() {
    let server = endpoint(10, 0, 0, 30, 8000);
    let mut rig = Rig::new();
    rig.browser.start_fails = true;
    rig.browser.service = Some(server);
    rig.listener.push(b"ELATO_SERVER 10.0.0.30 8000");
    rig.prober = RecordingProber::reaching(&[server]);

    let record = rig.resolve(10_000).unwrap();
    assert_eq!(record.source, Tier::Announcement);
    assert_eq!(rig.browser.service_queries, 0);
    assert_eq!(rig.clock.now_ms(), 0);
}

#[test]
fn malformed_announcements_are_skipped_within_the_window() {
    let server = endpoint(10, 0, 0, 31, 8001);
    let mut rig = Rig::new();
    rig.listener.push(b"hello");
    rig.listener.push(b"ELATO_SERVER 10.0.0.31");
    rig.listener.push(b"ELATO_SERVER 10.0.0.31 8001\n");
    rig.prober = RecordingProber::reaching(&[server]);

    assert_eq!(rig.resolve(0).map(|r| r.socket_addr()), Ok(server));
}

#[test]
fn cancelled_token_stops_before_any_query() {
    let mut rig = Rig::new();
    rig.cancel.cancel();

    assert_eq!(rig.resolve(10_000), Err(DiscoveryError::Cancelled));
    assert_eq!(rig.browser.service_queries, 0);
    assert!(rig.listener.bound.is_none());
}

#[test]
fn cache_first_skips_network_tiers() {
    let server = endpoint(10, 0, 0, 9, 8000);
    let mut rig = Rig::new();
    rig.config = DiscoveryConfig::default().with_cache_first(true);
    rig.cache.store_server(server).unwrap();
    rig.prober = RecordingProber::reaching(&[server]);

    let record = rig.resolve(10_000).unwrap();
    assert_eq!(record.source, Tier::Cache);
    assert_eq!(rig.browser.starts, 0);
    assert_eq!(rig.cache.preferences().backend_mut().writes, 1);
}

#[test]
fn subnet_membership_masks_both_sides() {
    let subnet = Ipv4Subnet::from_prefix(Ipv4Addr::new(10, 0, 0, 5), 24);
    assert_eq!(subnet.mask, Ipv4Addr::new(255, 255, 255, 0));
    assert!(subnet.contains(Ipv4Addr::new(10, 0, 0, 9)));
    assert!(!subnet.contains(Ipv4Addr::new(10, 0, 1, 9)));

    let everything = Ipv4Subnet::from_prefix(Ipv4Addr::new(10, 0, 0, 5), 0);
    assert!(everything.contains(Ipv4Addr::new(8, 8, 8, 8)));
}

#[test]
fn endpoint_renders_as_dotted_text() {
    let record = EndpointRecord {
        address: Ipv4Addr::new(192, 168, 1, 50),
        port: 8000,
        verified: true,
        source: Tier::Announcement,
    };
    assert_eq!(std::format!("{}", record), "192.168.1.50:8000");
}
