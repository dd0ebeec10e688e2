//! Connection lifecycle
//!
//! Entry points for the transport: a connection opens, closes, or sends a
//! message. The handler is the only caller of [`EventRelay::publish`].

use std::sync::Arc;
use std::time::Duration;

use chatrelay_core::{ChatId, ConnectionId, RegionId};
use tracing::{info, warn};

use crate::error::Result;
use crate::events::MessageEvent;
use crate::registry::ConnectionRegistry;
use crate::relay::{EventRelay, PublishReport};

pub struct LifecycleHandler {
    region: RegionId,
    registry: Arc<dyn ConnectionRegistry>,
    relay: Arc<EventRelay>,
    lease: Duration,
}

impl LifecycleHandler {
    pub fn new(registry: Arc<dyn ConnectionRegistry>, relay: Arc<EventRelay>, lease: Duration) -> Self {
        Self {
            region: relay.region().clone(),
            registry,
            relay,
            lease,
        }
    }

    #[must_use]
    pub const fn region(&self) -> &RegionId {
        &self.region
    }

    #[must_use]
    pub const fn lease(&self) -> Duration {
        self.lease
    }

    /// Register the connection in the chat with a fresh lease. A repeated
    /// connect for the same id only renews the lease.
    pub async fn on_connect(&self, chat_id: &ChatId, connection_id: &ConnectionId) -> Result<()> {
        self.registry.upsert(chat_id, connection_id, self.lease).await?;
        info!(
            region = %self.region,
            chat_id = %chat_id,
            connection_id = %connection_id,
            "Connection registered"
        );
        Ok(())
    }

    /// Remove the connection from the chat. Succeeds if it was never there.
    pub async fn on_disconnect(&self, chat_id: &ChatId, connection_id: &ConnectionId) -> Result<()> {
        self.registry.delete(chat_id, connection_id).await?;
        info!(
            region = %self.region,
            chat_id = %chat_id,
            connection_id = %connection_id,
            "Connection removed"
        );
        Ok(())
    }

    /// Publish a client message to this region and every peer.
    ///
    /// The body is forwarded unparsed. Does not wait for any delivery; the
    /// report only says which channels accepted the event.
    pub async fn on_inbound_message(
        &self,
        chat_id: &ChatId,
        sender: &ConnectionId,
        body: String,
    ) -> PublishReport {
        let event = MessageEvent::new(chat_id.clone(), sender.clone(), body, self.region.clone());
        let report = self.relay.publish(event).await;
        if !report.fully_delivered() {
            warn!(
                event_id = %report.event_id,
                local_delivered = report.local_delivered,
                peers_failed = ?report.peers_failed,
                "Message event only partially published"
            );
        }
        report
    }
}
