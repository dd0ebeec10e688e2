use async_trait::async_trait;
use chatrelay_core::RegionId;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::{Error, Result};
use crate::events::RelayEnvelope;

/// Outbound side of one region's event channel.
///
/// Everything published to a region's channel ends up at that region's
/// `EventRelay::accept`.
#[async_trait]
pub trait EventChannel: Send + Sync {
    /// Region whose channel this is
    fn region(&self) -> &RegionId;

    /// Hand the envelope to the channel. Fails with `Error::RelayUnavailable`.
    async fn publish(&self, envelope: &RelayEnvelope) -> Result<()>;
}

/// Bounded in-process channel, used in single-node mode and to wire several
/// regions together inside one test process.
#[derive(Clone)]
pub struct InMemoryEventChannel {
    region: RegionId,
    tx: mpsc::Sender<RelayEnvelope>,
}

impl InMemoryEventChannel {
    /// Create the channel and the receiver its region consumes.
    #[must_use]
    pub fn new(region: RegionId, capacity: usize) -> (Self, mpsc::Receiver<RelayEnvelope>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { region, tx }, rx)
    }
}

#[async_trait]
impl EventChannel for InMemoryEventChannel {
    fn region(&self) -> &RegionId {
        &self.region
    }

    async fn publish(&self, envelope: &RelayEnvelope) -> Result<()> {
        match self.tx.try_send(envelope.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::relay_unavailable(&self.region, "channel full")),
            Err(TrySendError::Closed(_)) => {
                Err(Error::relay_unavailable(&self.region, "channel closed"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MessageEvent;

    fn envelope() -> RelayEnvelope {
        RelayEnvelope::client(MessageEvent::new(
            "default".into(),
            "c1".into(),
            "hi".to_string(),
            "eu".into(),
        ))
    }

    #[tokio::test]
    async fn test_publish_reaches_receiver() {
        let (channel, mut rx) = InMemoryEventChannel::new("eu".into(), 4);
        channel.publish(&envelope()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().event.message, "hi");
    }

    #[tokio::test]
    async fn test_full_channel_is_unavailable() {
        let (channel, _rx) = InMemoryEventChannel::new("eu".into(), 1);
        channel.publish(&envelope()).await.unwrap();
        let err = channel.publish(&envelope()).await.unwrap_err();
        assert!(matches!(err, Error::RelayUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_closed_channel_is_unavailable() {
        let (channel, rx) = InMemoryEventChannel::new("eu".into(), 1);
        drop(rx);
        assert!(channel.publish(&envelope()).await.is_err());
    }
}
