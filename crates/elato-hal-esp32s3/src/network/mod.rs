//! Wi-Fi/network connectivity state shared between the network workers and
//! the input and lifecycle tasks, plus embassy-net adapters for discovery.

pub mod announce;
pub mod link;
pub mod mdns;
pub mod probe;

use core::net::Ipv4Addr;
use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

use elato_core::discovery::Ipv4Subnet;
use embassy_net::Stack;

/// High-level connectivity state for logs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum ConnectivityState {
    Disconnected = 0,
    Connecting = 1,
    LinkUpNoIp = 2,
    /// Wi-Fi and DHCP are up but no server is linked.
    NoServer = 3,
    Connected = 4,
}

impl ConnectivityState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Connecting,
            2 => Self::LinkUpNoIp,
            3 => Self::NoServer,
            4 => Self::Connected,
            _ => Self::Disconnected,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::LinkUpNoIp => "link_up_no_ip",
            Self::NoServer => "no_server",
            Self::Connected => "connected",
        }
    }
}

/// Wi-Fi credentials source.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WifiConfig {
    pub ssid: &'static str,
    pub password: &'static str,
}

impl WifiConfig {
    pub const fn new(ssid: &'static str, password: &'static str) -> Self {
        Self { ssid, password }
    }
}

/// Immutable connectivity snapshot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ConnectivitySnapshot {
    pub state: ConnectivityState,
    pub link_up: bool,
    pub has_ipv4: bool,
    pub server_linked: bool,
    /// Interface address and netmask while DHCP holds a lease.
    pub local: Option<Ipv4Subnet>,
    pub revision: u32,
}

impl ConnectivitySnapshot {
    /// What the touch listen restart checks before scheduling.
    pub const fn server_reachable(self) -> bool {
        self.link_up && self.has_ipv4 && self.server_linked
    }
}

/// Lock-free shared connectivity status.
#[derive(Debug)]
pub struct ConnectivityHandle {
    state: AtomicU8,
    link_up: AtomicBool,
    has_ipv4: AtomicBool,
    server_linked: AtomicBool,
    address: AtomicU32,
    prefix_len: AtomicU8,
    revision: AtomicU32,
}

impl ConnectivityHandle {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectivityState::Disconnected as u8),
            link_up: AtomicBool::new(false),
            has_ipv4: AtomicBool::new(false),
            server_linked: AtomicBool::new(false),
            address: AtomicU32::new(0),
            prefix_len: AtomicU8::new(0),
            revision: AtomicU32::new(0),
        }
    }

    pub fn snapshot(&self) -> ConnectivitySnapshot {
        let has_ipv4 = self.has_ipv4.load(Ordering::Acquire);
        let local = has_ipv4.then(|| {
            Ipv4Subnet::from_prefix(
                Ipv4Addr::from_bits(self.address.load(Ordering::Acquire)),
                self.prefix_len.load(Ordering::Acquire),
            )
        });
        ConnectivitySnapshot {
            state: ConnectivityState::from_raw(self.state.load(Ordering::Acquire)),
            link_up: self.link_up.load(Ordering::Acquire),
            has_ipv4,
            server_linked: self.server_linked.load(Ordering::Acquire),
            local,
            revision: self.revision.load(Ordering::Acquire),
        }
    }

    pub fn server_reachable(&self) -> bool {
        self.snapshot().server_reachable()
    }

    pub fn mark_connecting(&self) {
        self.update_state(ConnectivityState::Connecting);
    }

    pub fn mark_disconnected(&self) {
        let mut changed = false;
        changed |= self.store_bool(&self.link_up, false);
        changed |= self.store_bool(&self.has_ipv4, false);
        changed |= self.store_bool(&self.server_linked, false);
        changed |= self.store_state(ConnectivityState::Disconnected);
        if changed {
            self.bump_revision();
        }
    }

    /// Mirrors the embassy-net stack: link state and the DHCP lease.
    pub fn update_from_stack(&self, stack: Stack<'_>) {
        let lease = stack
            .config_v4()
            .map(|config| (config.address.address(), config.address.prefix_len()));
        self.update_link_ip(stack.is_link_up(), lease);
    }

    pub fn update_link_ip(&self, link_up: bool, lease: Option<(Ipv4Addr, u8)>) {
        let mut changed = false;
        changed |= self.store_bool(&self.link_up, link_up);
        changed |= self.store_bool(&self.has_ipv4, lease.is_some());
        if let Some((address, prefix_len)) = lease {
            changed |= self.address.swap(address.to_bits(), Ordering::AcqRel) != address.to_bits();
            changed |= self.prefix_len.swap(prefix_len, Ordering::AcqRel) != prefix_len;
        }

        let server_linked = self.server_linked.load(Ordering::Acquire);
        changed |= self.store_state(Self::state_for(link_up, lease.is_some(), server_linked));

        if changed {
            self.bump_revision();
        }
    }

    pub fn update_server(&self, server_linked: bool) {
        let mut changed = false;
        changed |= self.store_bool(&self.server_linked, server_linked);

        let link_up = self.link_up.load(Ordering::Acquire);
        let has_ipv4 = self.has_ipv4.load(Ordering::Acquire);
        changed |= self.store_state(Self::state_for(link_up, has_ipv4, server_linked));

        if changed {
            self.bump_revision();
        }
    }

    fn update_state(&self, next: ConnectivityState) {
        if self.store_state(next) {
            self.bump_revision();
        }
    }

    fn state_for(link_up: bool, has_ipv4: bool, server_linked: bool) -> ConnectivityState {
        if !link_up {
            ConnectivityState::Disconnected
        } else if !has_ipv4 {
            ConnectivityState::LinkUpNoIp
        } else if server_linked {
            ConnectivityState::Connected
        } else {
            ConnectivityState::NoServer
        }
    }

    fn store_state(&self, next: ConnectivityState) -> bool {
        self.state.swap(next as u8, Ordering::AcqRel) != next as u8
    }

    fn store_bool(&self, cell: &AtomicBool, next: bool) -> bool {
        cell.swap(next, Ordering::AcqRel) != next
    }

    fn bump_revision(&self) {
        self.revision.fetch_add(1, Ordering::AcqRel);
    }
}

impl Default for ConnectivityHandle {
    fn default() -> Self {
        Self::new()
    }
}
