use elato_core::discovery::AnnouncementListener;
use elato_core::discovery::announce::ANNOUNCEMENT_MAX_BYTES;
use embassy_net::Stack;
use embassy_net::udp::{BindError, PacketMetadata, RecvError, UdpSocket};
use log::debug;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AnnouncementError {
    Bind(BindError),
    Recv(RecvError),
}

/// Socket storage for [`UdpAnnouncementListener`].
pub struct AnnouncementBuffers {
    rx_meta: [PacketMetadata; 4],
    tx_meta: [PacketMetadata; 1],
    rx: [u8; 4 * ANNOUNCEMENT_MAX_BYTES],
    tx: [u8; 16],
}

impl AnnouncementBuffers {
    pub const fn new() -> Self {
        Self {
            rx_meta: [PacketMetadata::EMPTY; 4],
            tx_meta: [PacketMetadata::EMPTY; 1],
            rx: [0; 4 * ANNOUNCEMENT_MAX_BYTES],
            tx: [0; 16],
        }
    }
}

impl Default for AnnouncementBuffers {
    fn default() -> Self {
        Self::new()
    }
}

/// Receive-only UDP socket for server broadcast announcements.
pub struct UdpAnnouncementListener<'d> {
    socket: UdpSocket<'d>,
}

impl<'d> UdpAnnouncementListener<'d> {
    pub fn new(stack: Stack<'d>, buffers: &'d mut AnnouncementBuffers) -> Self {
        let socket = UdpSocket::new(
            stack,
            &mut buffers.rx_meta,
            &mut buffers.rx,
            &mut buffers.tx_meta,
            &mut buffers.tx,
        );
        Self { socket }
    }
}

impl AnnouncementListener for UdpAnnouncementListener<'_> {
    type Error = AnnouncementError;

    async fn bind(&mut self, port: u16) -> Result<(), Self::Error> {
        if self.socket.is_open() {
            self.socket.close();
        }
        self.socket.bind(port).map_err(AnnouncementError::Bind)
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let (len, meta) = self
            .socket
            .recv_from(buf)
            .await
            .map_err(AnnouncementError::Recv)?;
        debug!("announce: {} bytes from {}", len, meta.endpoint);
        Ok(len)
    }

    fn close(&mut self) {
        self.socket.close();
    }
}
