use core::net::{Ipv4Addr, SocketAddrV4};
use std::collections::VecDeque;
use std::vec::Vec;

use super::{AnnouncementListener, ReachabilityProbe, ServiceBrowser};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Unavailable;

/// mDNS stand-in answering from a fixed script.
#[derive(Debug, Default)]
pub struct ScriptedBrowser {
    pub start_fails: bool,
    pub service: Option<SocketAddrV4>,
    /// Empty service query rounds before `service` is returned.
    pub silent_rounds: usize,
    pub host: Option<Ipv4Addr>,
    pub starts: usize,
    pub service_queries: usize,
    pub host_queries: usize,
}

impl ServiceBrowser for ScriptedBrowser {
    type Error = Unavailable;

    async fn start(&mut self) -> Result<(), Self::Error> {
        self.starts += 1;
        if self.start_fails {
            Err(Unavailable)
        } else {
            Ok(())
        }
    }

    async fn query_service(
        &mut self,
        service: &str,
        protocol: &str,
    ) -> Result<Option<SocketAddrV4>, Self::Error> {
        assert_eq!((service, protocol), ("elato", "tcp"));
        self.service_queries += 1;
        if self.service_queries > self.silent_rounds {
            Ok(self.service)
        } else {
            Ok(None)
        }
    }

    async fn query_host(&mut self, host: &str) -> Result<Option<Ipv4Addr>, Self::Error> {
        assert_eq!(host, "elato");
        self.host_queries += 1;
        Ok(self.host)
    }
}

/// Fails `recv_errors` receives, delivers queued datagrams, then blocks
/// forever.
#[derive(Debug, Default)]
pub struct ScriptedListener {
    pub datagrams: VecDeque<Vec<u8>>,
    pub recv_errors: usize,
    pub recv_calls: usize,
    pub bind_fails: bool,
    pub bound: Option<u16>,
    pub closed: bool,
}

impl ScriptedListener {
    pub fn push(&mut self, datagram: &[u8]) {
        self.datagrams.push_back(datagram.to_vec());
    }
}

impl AnnouncementListener for ScriptedListener {
    type Error = Unavailable;

    async fn bind(&mut self, port: u16) -> Result<(), Self::Error> {
        if self.bind_fails {
            return Err(Unavailable);
        }
        self.bound = Some(port);
        self.closed = false;
        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.recv_calls += 1;
        if self.recv_errors > 0 {
            self.recv_errors -= 1;
            return Err(Unavailable);
        }
        match self.datagrams.pop_front() {
            Some(datagram) => {
                let len = datagram.len().min(buf.len());
                buf[..len].copy_from_slice(&datagram[..len]);
                Ok(len)
            }
            None => core::future::pending().await,
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Accepts only the listed endpoints and records every probe.
#[derive(Debug, Default)]
pub struct RecordingProber {
    pub reachable: Vec<SocketAddrV4>,
    pub probed: Vec<SocketAddrV4>,
    pub last_timeout_ms: Option<u64>,
}

impl RecordingProber {
    pub fn reaching(endpoints: &[SocketAddrV4]) -> Self {
        Self {
            reachable: endpoints.to_vec(),
            ..Self::default()
        }
    }
}

impl ReachabilityProbe for RecordingProber {
    async fn probe(&mut self, target: SocketAddrV4, timeout_ms: u64) -> bool {
        self.probed.push(target);
        self.last_timeout_ms = Some(timeout_ms);
        self.reachable.contains(&target)
    }
}
