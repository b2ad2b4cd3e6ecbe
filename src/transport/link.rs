//! Underlying packet links

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::packet::StreamPacket;
use crate::Result;

/// Ordered packet channel beneath the stream transport
///
/// Implementations must deliver packets for one participant in send order.
#[async_trait]
pub trait StreamLink: Send + Sync {
    /// Send one packet on behalf of `participant`
    async fn send(&self, participant: &str, packet: StreamPacket) -> Result<()>;
}

/// A packet tagged with the participant whose stream it belongs to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutedPacket {
    pub participant: String,
    pub packet: StreamPacket,
}

/// In-process fan-out link backing the WebSocket receiving endpoint
#[derive(Debug, Clone)]
pub struct ChannelLink {
    tx: broadcast::Sender<RoutedPacket>,
}

impl ChannelLink {
    /// Create a link buffering up to `capacity` packets per subscriber
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Receive every packet sent from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RoutedPacket> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl StreamLink for ChannelLink {
    async fn send(&self, participant: &str, packet: StreamPacket) -> Result<()> {
        let routed = RoutedPacket {
            participant: participant.to_string(),
            packet,
        };
        if self.tx.send(routed).is_err() {
            tracing::trace!(participant, "no stream subscribers");
        }
        Ok(())
    }
}
