use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatrelay_core::resilience::backoff::ExponentialBackoff;
use chatrelay_core::RegionId;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::Client as RedisClient;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{EventChannel, EventRelay};
use crate::error::{Error, Result};
use crate::events::{RelayEnvelope, DETAIL_TYPE};

/// Pub/Sub channel name carrying message events for `region`
#[must_use]
pub fn channel_name(key_prefix: &str, region: &RegionId) -> String {
    format!("{key_prefix}region:{region}:{DETAIL_TYPE}")
}

/// Publishes envelopes to a region's Redis Pub/Sub channel.
///
/// The connection is opened on first publish, so an unreachable peer does
/// not prevent this region from starting.
pub struct RedisEventChannel {
    region: RegionId,
    client: RedisClient,
    connection: OnceCell<ConnectionManager>,
    channel: String,
    timeout: Duration,
}

impl RedisEventChannel {
    pub fn new(region: RegionId, redis_url: &str, key_prefix: &str, op_timeout: Duration) -> Result<Self> {
        let client = RedisClient::open(redis_url).map_err(|e| {
            Error::Configuration(format!("Invalid Redis URL for region {region}: {e}"))
        })?;
        let channel = channel_name(key_prefix, &region);
        Ok(Self {
            region,
            client,
            connection: OnceCell::new(),
            channel,
            timeout: op_timeout,
        })
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let conn = self
            .connection
            .get_or_try_init(|| async {
                timeout(self.timeout, self.client.get_connection_manager())
                    .await
                    .map_err(|_| Error::relay_unavailable(&self.region, "timed out connecting"))?
                    .map_err(|e| Error::relay_unavailable(&self.region, e))
            })
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl EventChannel for RedisEventChannel {
    fn region(&self) -> &RegionId {
        &self.region
    }

    async fn publish(&self, envelope: &RelayEnvelope) -> Result<()> {
        let payload = envelope.to_json()?;
        let mut conn = self.connection().await?;

        let receivers: i64 = timeout(
            self.timeout,
            redis::cmd("PUBLISH")
                .arg(&self.channel)
                .arg(payload)
                .query_async(&mut conn),
        )
        .await
        .map_err(|_| Error::relay_unavailable(&self.region, "publish timed out"))?
        .map_err(|e| Error::relay_unavailable(&self.region, e))?;

        debug!(
            channel = %self.channel,
            event_id = %envelope.event.event_id,
            source = envelope.source.as_str(),
            receivers,
            "Published envelope"
        );
        Ok(())
    }
}

/// Why one subscription attempt ended
enum SubscriberExit {
    /// Connected, then the stream ended
    Disconnected,
    /// Could not connect or subscribe
    ConnectFailed(String),
    Cancelled,
}

/// Consumes this region's Pub/Sub channel and hands every envelope to
/// [`EventRelay::accept`].
///
/// Reconnects with exponential backoff. Pub/Sub is fire-and-forget, so
/// envelopes published while disconnected are lost.
pub struct EventSubscriber {
    client: RedisClient,
    channel: String,
    relay: Arc<EventRelay>,
    timeout: Duration,
}

impl EventSubscriber {
    pub fn new(
        redis_url: &str,
        key_prefix: &str,
        relay: Arc<EventRelay>,
        op_timeout: Duration,
    ) -> Result<Self> {
        let client = RedisClient::open(redis_url)
            .map_err(|e| Error::Configuration(format!("Invalid subscriber Redis URL: {e}")))?;
        let channel = channel_name(key_prefix, relay.region());
        Ok(Self {
            client,
            channel,
            relay,
            timeout: op_timeout,
        })
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    async fn run(self, cancel: CancellationToken) {
        let mut backoff = ExponentialBackoff::default();

        loop {
            match self.run_subscription(&cancel).await {
                SubscriberExit::Cancelled => {
                    info!(channel = %self.channel, "Event subscriber stopped");
                    return;
                }
                SubscriberExit::Disconnected => {
                    // The server was reachable; start over from the short delay
                    backoff.reset();
                    error!(channel = %self.channel, "Event subscription lost, reconnecting");
                }
                SubscriberExit::ConnectFailed(reason) => {
                    error!(
                        channel = %self.channel,
                        error = %reason,
                        "Event subscriber failed to connect, retrying after backoff"
                    );
                }
            }

            let delay = backoff.next_delay();
            tokio::select! {
                () = cancel.cancelled() => {
                    info!(channel = %self.channel, "Event subscriber cancelled during backoff");
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn run_subscription(&self, cancel: &CancellationToken) -> SubscriberExit {
        let mut pubsub = match timeout(self.timeout, self.client.get_async_pubsub()).await {
            Ok(Ok(pubsub)) => pubsub,
            Ok(Err(e)) => return SubscriberExit::ConnectFailed(e.to_string()),
            Err(_) => {
                return SubscriberExit::ConnectFailed(
                    "timed out getting Pub/Sub connection".to_string(),
                )
            }
        };

        match timeout(self.timeout, pubsub.subscribe(&self.channel)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return SubscriberExit::ConnectFailed(e.to_string()),
            Err(_) => return SubscriberExit::ConnectFailed("timed out subscribing".to_string()),
        }

        info!(channel = %self.channel, "Event subscriber connected");
        let mut stream = pubsub.on_message();

        loop {
            let msg = tokio::select! {
                () = cancel.cancelled() => return SubscriberExit::Cancelled,
                msg = stream.next() => msg,
            };
            let Some(msg) = msg else {
                return SubscriberExit::Disconnected;
            };

            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, channel = %self.channel, "Invalid payload");
                    continue;
                }
            };

            match RelayEnvelope::from_json(&payload) {
                Ok(envelope) => {
                    self.relay.accept(envelope);
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        channel = %self.channel,
                        payload = %payload,
                        "Failed to deserialize relay envelope"
                    );
                }
            }
        }
    }
}
