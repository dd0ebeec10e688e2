//! Event relay between regions
//!
//! A client message is published once to the origin region's own channel
//! and once to each peer's channel, tagged as a replica. Envelopes arriving
//! on a region's channel go through [`EventRelay::accept`], which only ever
//! hands them to the local dispatcher. Nothing on the ingress path can
//! publish, so an event crosses at most one region boundary.

mod channel;
mod redis;
mod topology;

pub use channel::{EventChannel, InMemoryEventChannel};
pub use redis::{channel_name, EventSubscriber, RedisEventChannel};
pub use topology::FanoutTopology;

use std::sync::Arc;

use chatrelay_core::metrics::record_relay_publish;
use chatrelay_core::resilience::circuit_breaker::{self, CircuitBreaker, PeerBreaker};
use chatrelay_core::RegionId;
use futures::future::join_all;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::events::{MessageEvent, RelayEnvelope};

/// Outcome of publishing one client message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub event_id: String,
    /// Accepted by this region's own channel
    pub local_delivered: bool,
    pub peers_delivered: Vec<RegionId>,
    pub peers_failed: Vec<RegionId>,
}

impl PublishReport {
    #[must_use]
    pub fn fully_delivered(&self) -> bool {
        self.local_delivered && self.peers_failed.is_empty()
    }
}

struct PeerLink {
    channel: Arc<dyn EventChannel>,
    breaker: PeerBreaker,
}

/// Fans client messages out to the local channel and every peer channel,
/// and feeds channel ingress to the local dispatcher.
pub struct EventRelay {
    topology: FanoutTopology,
    local: Arc<dyn EventChannel>,
    peers: Vec<PeerLink>,
    dispatch_tx: mpsc::Sender<MessageEvent>,
}

impl EventRelay {
    /// `local` must be the origin's channel and `peers` must cover exactly
    /// the topology's peers.
    pub fn new(
        topology: FanoutTopology,
        local: Arc<dyn EventChannel>,
        peers: Vec<Arc<dyn EventChannel>>,
        dispatch_tx: mpsc::Sender<MessageEvent>,
    ) -> Result<Self> {
        if local.region() != topology.origin() {
            return Err(Error::Configuration(format!(
                "Local channel belongs to {} but this region is {}",
                local.region(),
                topology.origin()
            )));
        }

        if let Some(stray) = peers.iter().find(|c| !topology.is_peer(c.region())) {
            return Err(Error::Configuration(format!(
                "Event channel given for {} which is not a peer of {}",
                stray.region(),
                topology.origin()
            )));
        }

        let mut links = Vec::with_capacity(topology.peers().len());
        for region in topology.peers() {
            let channel = peers
                .iter()
                .find(|c| c.region() == region)
                .cloned()
                .ok_or_else(|| {
                    Error::Configuration(format!("No event channel for peer region {region}"))
                })?;
            links.push(PeerLink {
                channel,
                breaker: circuit_breaker::create_default(),
            });
        }
        Ok(Self {
            topology,
            local,
            peers: links,
            dispatch_tx,
        })
    }

    #[must_use]
    pub const fn region(&self) -> &RegionId {
        self.topology.origin()
    }

    #[must_use]
    pub const fn topology(&self) -> &FanoutTopology {
        &self.topology
    }

    /// Publish a client message to this region and all peers.
    ///
    /// Never fails as a whole: each target is attempted independently and
    /// the report says which ones took the event. An event that did not
    /// originate here is only published locally.
    pub async fn publish(&self, event: MessageEvent) -> PublishReport {
        let mut report = PublishReport {
            event_id: event.event_id.clone(),
            local_delivered: false,
            peers_delivered: Vec::new(),
            peers_failed: Vec::new(),
        };

        let replicate = event.origin_region == *self.region();
        if !replicate {
            warn!(
                event_id = %event.event_id,
                origin = %event.origin_region,
                region = %self.region(),
                "Refusing to replicate an event that originated elsewhere"
            );
        }

        let local_envelope = RelayEnvelope::client(event.clone());
        match self.local.publish(&local_envelope).await {
            Ok(()) => {
                report.local_delivered = true;
                record_relay_publish("local", self.region().as_str(), "ok");
            }
            Err(e) => {
                record_relay_publish("local", self.region().as_str(), "error");
                warn!(event_id = %event.event_id, error = %e, "Failed to publish to local channel");
            }
        }

        if !replicate || self.peers.is_empty() {
            return report;
        }

        let replica = RelayEnvelope::replica(event);
        let results = join_all(self.peers.iter().map(|peer| self.publish_to_peer(peer, &replica))).await;
        for (region, delivered) in results {
            if delivered {
                report.peers_delivered.push(region);
            } else {
                report.peers_failed.push(region);
            }
        }

        debug!(
            event_id = %report.event_id,
            local = report.local_delivered,
            peers_delivered = report.peers_delivered.len(),
            peers_failed = report.peers_failed.len(),
            "Published message event"
        );
        report
    }

    async fn publish_to_peer(&self, peer: &PeerLink, envelope: &RelayEnvelope) -> (RegionId, bool) {
        let region = peer.channel.region().clone();

        if !peer.breaker.is_call_permitted() {
            record_relay_publish("peer", region.as_str(), "circuit_open");
            debug!(peer = %region, "Peer circuit open, skipping replication");
            return (region, false);
        }

        match peer.channel.publish(envelope).await {
            Ok(()) => {
                peer.breaker.on_success();
                record_relay_publish("peer", region.as_str(), "ok");
                (region, true)
            }
            Err(e) => {
                peer.breaker.on_error();
                record_relay_publish("peer", region.as_str(), "error");
                warn!(
                    peer = %region,
                    event_id = %envelope.event.event_id,
                    error = %e,
                    "Failed to replicate message event"
                );
                (region, false)
            }
        }
    }

    /// Take an envelope that arrived on this region's channel and hand it
    /// to the local dispatcher. Never publishes anywhere.
    ///
    /// Returns whether the event was queued for dispatch.
    pub fn accept(&self, envelope: RelayEnvelope) -> bool {
        if !envelope.is_chat_message() {
            debug!(detail_type = %envelope.detail_type, "Ignoring envelope with unknown detail type");
            return false;
        }

        let is_replica = envelope.is_replica();
        let event = envelope.event;
        if is_replica && event.origin_region == *self.region() {
            warn!(
                event_id = %event.event_id,
                "Dropping replica of an event that originated in this region"
            );
            return false;
        }

        match self.dispatch_tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!(event_id = %event.event_id, "Dispatch queue full, dropping message event");
                false
            }
            Err(TrySendError::Closed(event)) => {
                warn!(event_id = %event.event_id, "Dispatcher stopped, dropping message event");
                false
            }
        }
    }

    /// Drain an in-process channel receiver into [`Self::accept`].
    pub fn spawn_ingress(
        self: &Arc<Self>,
        mut rx: mpsc::Receiver<RelayEnvelope>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let relay = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    envelope = rx.recv() => match envelope {
                        Some(envelope) => {
                            relay.accept(envelope);
                        }
                        None => break,
                    },
                }
            }
            info!(region = %relay.region(), "Event ingress stopped");
        })
    }
}
