//! UDP bus binding
//!
//! Development/bench transport standing in for the field bus: one UDP
//! socket per agent and an address book mapping agent ids to socket
//! addresses. Frame loss and reordering semantics match what the channel
//! is built to tolerate.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use furrow_core::{AgentId, FurrowError, FurrowResult};
use furrow_wire::MAX_FRAME_SIZE;

use crate::Outgoing;

/// UDP-backed bus endpoint.
pub struct UdpBus {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    peers: HashMap<AgentId, SocketAddr>,
}

impl UdpBus {
    /// Bind to a local address with a fixed peer address book.
    pub async fn bind(
        addr: SocketAddr,
        peers: HashMap<AgentId, SocketAddr>,
    ) -> FurrowResult<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| FurrowError::TransportError(e.to_string()))?;

        let local_addr = socket
            .local_addr()
            .map_err(|e| FurrowError::TransportError(e.to_string()))?;

        Ok(UdpBus {
            socket: Arc::new(socket),
            local_addr,
            peers,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Put one batch of channel output on the wire.
    pub async fn send_outgoing(&self, outgoing: &Outgoing) -> FurrowResult<()> {
        let dest = self
            .peers
            .get(&outgoing.destination)
            .copied()
            .ok_or_else(|| {
                FurrowError::UnknownDestination(outgoing.destination.as_str().to_string())
            })?;

        for frame in &outgoing.frames {
            let bytes = frame.serialize()?;
            self.socket
                .send_to(&bytes, dest)
                .await
                .map_err(|e| FurrowError::TransportError(e.to_string()))?;
        }
        Ok(())
    }

    /// Socket handle for the receive loop.
    pub fn socket(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.socket)
    }
}

/// Raw frame receiver channel.
pub type FrameReceiver = mpsc::Receiver<Vec<u8>>;

/// Start a background receive loop forwarding raw frames.
pub fn start_receive_loop(socket: Arc<UdpSocket>, buffer_size: usize) -> FrameReceiver {
    let (tx, rx) = mpsc::channel(buffer_size);

    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_FRAME_SIZE];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, _addr)) => {
                    if tx.send(buf[..len].to_vec()).await.is_err() {
                        break; // Receiver dropped
                    }
                }
                Err(e) => {
                    tracing::warn!("bus receive error: {}", e);
                }
            }
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_udp_bus_bind() {
        let bus = UdpBus::bind("127.0.0.1:0".parse().unwrap(), HashMap::new())
            .await
            .unwrap();
        assert_ne!(bus.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_unknown_destination_is_error() {
        let bus = UdpBus::bind("127.0.0.1:0".parse().unwrap(), HashMap::new())
            .await
            .unwrap();
        let outgoing = Outgoing {
            destination: AgentId::new("ghost"),
            frames: Vec::new(),
        };
        assert!(matches!(
            bus.send_outgoing(&outgoing).await,
            Err(FurrowError::UnknownDestination(_))
        ));
    }
}
