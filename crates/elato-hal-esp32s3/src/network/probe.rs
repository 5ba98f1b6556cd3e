use core::net::SocketAddrV4;

use elato_core::discovery::ReachabilityProbe;
use embassy_net::tcp::TcpSocket;
use embassy_net::{IpAddress, IpEndpoint, Stack};
use embassy_time::{Duration, WithTimeout};
use log::debug;

/// Connect-only TCP check; the connection is aborted as soon as the
/// handshake completes.
pub struct TcpProber<'d> {
    stack: Stack<'d>,
}

impl<'d> TcpProber<'d> {
    pub const fn new(stack: Stack<'d>) -> Self {
        Self { stack }
    }
}

impl ReachabilityProbe for TcpProber<'_> {
    async fn probe(&mut self, target: SocketAddrV4, timeout_ms: u64) -> bool {
        let mut rx = [0u8; 64];
        let mut tx = [0u8; 64];
        let mut socket = TcpSocket::new(self.stack, &mut rx, &mut tx);
        let timeout = Duration::from_millis(timeout_ms);
        socket.set_timeout(Some(timeout));

        let endpoint = IpEndpoint::new(IpAddress::Ipv4(*target.ip()), target.port());
        let reachable = match socket.connect(endpoint).with_timeout(timeout).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                debug!("probe: {} refused ({:?})", target, err);
                false
            }
            Err(_) => {
                debug!("probe: {} timed out after {}ms", target, timeout_ms);
                false
            }
        };
        socket.abort();
        reachable
    }
}
