//! Data-channel client.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::Bytes;
use roomcast_proto::{MAX_OUTBOUND_DATAGRAM, RelayFrame};
use tokio::net::UdpSocket;

use crate::{client::Capability, error::ClientError};

/// UDP socket connected to the relay, carrying one capability.
pub struct DataChannel {
    socket: UdpSocket,
    capability: Capability,
}

impl DataChannel {
    /// Bind a local socket, connect it to the relay and register with a
    /// keep-alive.
    ///
    /// The relay learns this endpoint from the first valid datagram, so
    /// nothing is delivered here before `connect` returns.
    pub async fn connect(
        relay_addr: SocketAddr,
        capability: Capability,
    ) -> Result<Self, ClientError> {
        let local = if relay_addr.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(relay_addr).await?;

        let channel = Self { socket, capability };
        channel.keepalive().await?;
        tracing::debug!(
            "data channel for {} registered with {}",
            channel.capability.room,
            relay_addr
        );
        Ok(channel)
    }

    /// Send a message to every other member of the room.
    pub async fn send(&self, message: &[u8]) -> Result<(), ClientError> {
        let max = self.max_message_len();
        if message.len() > max {
            return Err(ClientError::MessageTooLarge { size: message.len(), max });
        }

        let frame = RelayFrame::new(
            self.capability.room.clone(),
            self.capability.token.clone(),
            Bytes::copy_from_slice(message),
        );
        self.socket.send(&frame.encode()?).await?;
        Ok(())
    }

    /// Refresh liveness without delivering anything.
    pub async fn keepalive(&self) -> Result<(), ClientError> {
        self.send(&[]).await
    }

    /// Wait for the next relayed message.
    pub async fn recv(&self) -> Result<Bytes, ClientError> {
        let mut buf = vec![0u8; MAX_OUTBOUND_DATAGRAM];
        let len = self.socket.recv(&mut buf).await?;
        buf.truncate(len);
        Ok(Bytes::from(buf))
    }

    /// Largest message [`Self::send`] accepts.
    pub fn max_message_len(&self) -> usize {
        RelayFrame::max_message_len(self.capability.room.len(), self.capability.token.len())
    }

    /// Capability this channel presents.
    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    /// Local endpoint the relay sees.
    pub fn local_addr(&self) -> Result<SocketAddr, ClientError> {
        Ok(self.socket.local_addr()?)
    }
}
