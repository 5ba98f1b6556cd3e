use core::net::SocketAddrV4;

use elato_core::lifecycle::NetworkLink;
use embassy_net::tcp::{ConnectError, Error as TcpError, State, TcpSocket};
use embassy_net::{IpAddress, IpEndpoint, Stack};
use embassy_time::{Duration, WithTimeout};
use log::{info, warn};

use super::ConnectivityHandle;

const CLOSE_TIMEOUT_MS: u64 = 500;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum LinkError {
    Connect(ConnectError),
    ConnectTimeout,
    Io(TcpError),
    CloseTimeout,
}

/// Socket storage for [`ServerLink`].
pub struct LinkBuffers {
    rx: [u8; 2048],
    tx: [u8; 2048],
}

impl LinkBuffers {
    pub const fn new() -> Self {
        Self {
            rx: [0; 2048],
            tx: [0; 2048],
        }
    }
}

impl Default for LinkBuffers {
    fn default() -> Self {
        Self::new()
    }
}

/// TCP connection to the backend, kept behind the network mutex.
pub struct ServerLink<'d> {
    socket: TcpSocket<'d>,
    remote: Option<SocketAddrV4>,
    connectivity: &'d ConnectivityHandle,
}

impl<'d> ServerLink<'d> {
    pub fn new(
        stack: Stack<'d>,
        buffers: &'d mut LinkBuffers,
        connectivity: &'d ConnectivityHandle,
    ) -> Self {
        Self {
            socket: TcpSocket::new(stack, &mut buffers.rx, &mut buffers.tx),
            remote: None,
            connectivity,
        }
    }

    pub fn remote(&self) -> Option<SocketAddrV4> {
        self.remote
    }

    /// Notices a connection the peer or the stack has torn down.
    pub fn refresh(&mut self) -> bool {
        let connected = self.is_connected();
        if !connected && let Some(remote) = self.remote {
            info!("link: connection to {} lost", remote);
            self.drop_connection();
        }
        connected
    }

    pub async fn connect(&mut self, remote: SocketAddrV4, timeout_ms: u64) -> Result<(), LinkError> {
        if self.is_connected() {
            return Ok(());
        }
        // A socket left in a closing state cannot connect again.
        self.socket.abort();

        let endpoint = IpEndpoint::new(IpAddress::Ipv4(*remote.ip()), remote.port());
        match self
            .socket
            .connect(endpoint)
            .with_timeout(Duration::from_millis(timeout_ms))
            .await
        {
            Ok(Ok(())) => {
                info!("link: connected to {}", remote);
                self.remote = Some(remote);
                self.connectivity.update_server(true);
                Ok(())
            }
            Ok(Err(err)) => {
                warn!("link: connect to {} failed ({:?})", remote, err);
                self.connectivity.update_server(false);
                Err(LinkError::Connect(err))
            }
            Err(_) => {
                warn!("link: connect to {} timed out", remote);
                self.socket.abort();
                self.connectivity.update_server(false);
                Err(LinkError::ConnectTimeout)
            }
        }
    }

    fn drop_connection(&mut self) {
        self.socket.abort();
        self.remote = None;
        self.connectivity.update_server(false);
    }
}

impl NetworkLink for ServerLink<'_> {
    type Error = LinkError;

    fn is_connected(&self) -> bool {
        self.socket.state() == State::Established
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        self.socket.close();
        let flushed = self
            .socket
            .flush()
            .with_timeout(Duration::from_millis(CLOSE_TIMEOUT_MS))
            .await;
        self.drop_connection();
        match flushed {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(LinkError::Io(err)),
            Err(_) => Err(LinkError::CloseTimeout),
        }
    }
}
