//! One-shot mDNS queries over an embassy-net UDP socket.

use core::net::{Ipv4Addr, SocketAddrV4};

use elato_core::discovery::ServiceBrowser;
use elato_core::discovery::mdns::{
    self, MAX_PACKET_BYTES, MDNS_GROUP, MDNS_PORT, MdnsError, Question,
};
use embassy_net::udp::{BindError, PacketMetadata, SendError, UdpSocket};
use embassy_net::{IpAddress, IpEndpoint, Stack};
use embassy_time::{Duration, Instant, WithTimeout};
use log::debug;

/// How long one query round waits for answers.
const DEFAULT_ROUND_MS: u64 = 200;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MdnsClientError {
    NotStarted,
    Bind(BindError),
    Send(SendError),
    Codec(MdnsError),
}

/// Socket storage for [`UdpServiceBrowser`]; must outlive it.
pub struct MdnsBuffers {
    rx_meta: [PacketMetadata; 4],
    tx_meta: [PacketMetadata; 2],
    rx: [u8; 1024],
    tx: [u8; MAX_PACKET_BYTES],
}

impl MdnsBuffers {
    pub const fn new() -> Self {
        Self {
            rx_meta: [PacketMetadata::EMPTY; 4],
            tx_meta: [PacketMetadata::EMPTY; 2],
            rx: [0; 1024],
            tx: [0; MAX_PACKET_BYTES],
        }
    }
}

impl Default for MdnsBuffers {
    fn default() -> Self {
        Self::new()
    }
}

/// Sends legacy unicast queries from an ephemeral port; responders answer
/// straight to that port, so no multicast membership is needed.
pub struct UdpServiceBrowser<'d> {
    socket: UdpSocket<'d>,
    bound: bool,
    next_id: u16,
    round: Duration,
}

impl<'d> UdpServiceBrowser<'d> {
    pub fn new(stack: Stack<'d>, buffers: &'d mut MdnsBuffers) -> Self {
        let socket = UdpSocket::new(
            stack,
            &mut buffers.rx_meta,
            &mut buffers.rx,
            &mut buffers.tx_meta,
            &mut buffers.tx,
        );
        Self {
            socket,
            bound: false,
            next_id: 1,
            round: Duration::from_millis(DEFAULT_ROUND_MS),
        }
    }

    pub fn with_round_ms(mut self, round_ms: u64) -> Self {
        self.round = Duration::from_millis(round_ms);
        self
    }

    /// Sends `question` and feeds every reply to `matcher` until it yields a
    /// value or the round ends.
    async fn exchange<T>(
        &mut self,
        question: Question<'_>,
        mut matcher: impl FnMut(&[u8]) -> Result<Option<T>, MdnsError>,
    ) -> Result<Option<T>, MdnsClientError> {
        if !self.bound {
            return Err(MdnsClientError::NotStarted);
        }

        let mut packet = [0u8; MAX_PACKET_BYTES];
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        let len = mdns::encode_query(question, id, &mut packet).map_err(MdnsClientError::Codec)?;
        let group = IpEndpoint::new(IpAddress::Ipv4(MDNS_GROUP), MDNS_PORT);
        self.socket
            .send_to(&packet[..len], group)
            .await
            .map_err(MdnsClientError::Send)?;

        let deadline = Instant::now() + self.round;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let reply = match self
                .socket
                .recv_from(&mut packet)
                .with_timeout(deadline - now)
                .await
            {
                Err(_) => return Ok(None),
                Ok(Err(err)) => {
                    debug!("mdns: reply dropped ({:?})", err);
                    continue;
                }
                Ok(Ok((len, _meta))) => &packet[..len],
            };

            match matcher(reply) {
                Ok(Some(found)) => return Ok(Some(found)),
                Ok(None) => {}
                // Other traffic on the port is not fatal to the round.
                Err(err) => debug!("mdns: unparsable reply ({:?})", err),
            }
        }
    }
}

impl ServiceBrowser for UdpServiceBrowser<'_> {
    type Error = MdnsClientError;

    async fn start(&mut self) -> Result<(), Self::Error> {
        if !self.bound {
            // Port 0 picks an ephemeral local port.
            self.socket.bind(0).map_err(MdnsClientError::Bind)?;
            self.bound = true;
        }
        Ok(())
    }

    async fn query_service(
        &mut self,
        service: &str,
        protocol: &str,
    ) -> Result<Option<SocketAddrV4>, Self::Error> {
        let answer = self
            .exchange(Question::Service { service, protocol }, |reply| {
                mdns::find_service(reply, service, protocol)
            })
            .await?;

        let Some(answer) = answer else {
            return Ok(None);
        };
        if let Some(address) = answer.address {
            return Ok(Some(SocketAddrV4::new(address, answer.port)));
        }

        // Responder left out the A record; ask for the target directly.
        let target = answer.target;
        let address = self.query_host(target.as_str()).await?;
        Ok(address.map(|address| SocketAddrV4::new(address, answer.port)))
    }

    async fn query_host(&mut self, host: &str) -> Result<Option<Ipv4Addr>, Self::Error> {
        self.exchange(Question::Host(host), |reply| mdns::find_host(reply, host))
            .await
    }
}
