//! One running region
//!
//! Wires the registry, relay, dispatcher and lifecycle handler together and
//! owns the background tasks:
//! - channel ingress (Redis subscriber or in-process receiver)
//! - dispatch worker
//! - registry reaper

use std::sync::Arc;
use std::time::Duration;

use chatrelay_core::models::ConnectionFailurePolicy;
use chatrelay_core::{Config, RegionId};
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dispatch::{DispatchStats, DispatchWorker, Dispatcher, HttpPushClient, PushClient};
use crate::error::Result;
use crate::events::RelayEnvelope;
use crate::lifecycle::LifecycleHandler;
use crate::registry::{
    ConnectionRegistry, InMemoryConnectionRegistry, RedisConnectionRegistry, RegistryReaper,
};
use crate::relay::{
    EventChannel, EventRelay, EventSubscriber, FanoutTopology, InMemoryEventChannel,
    RedisEventChannel,
};

/// Tunables shared by every region component
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub lease: Duration,
    pub reap_interval: Duration,
    pub failure_policy: ConnectionFailurePolicy,
    pub push_concurrency: usize,
    pub max_in_flight: usize,
    pub queue_capacity: usize,
}

impl NodeSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            lease: config.lease(),
            reap_interval: config.reap_interval(),
            failure_policy: config.dispatcher.failure_policy,
            push_concurrency: config.dispatcher.push_concurrency,
            max_in_flight: config.dispatcher.max_in_flight,
            queue_capacity: config.dispatcher.queue_capacity,
        }
    }
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Where this region's own channel is consumed from
pub enum ChannelIngress {
    /// Receiver paired with an [`InMemoryEventChannel`]
    InMemory(mpsc::Receiver<RelayEnvelope>),
    /// Redis Pub/Sub subscription
    Redis {
        redis_url: String,
        key_prefix: String,
        timeout: Duration,
    },
}

/// Everything a region needs, already constructed
pub struct RegionComponents {
    pub topology: FanoutTopology,
    pub registry: Arc<dyn ConnectionRegistry>,
    pub local_channel: Arc<dyn EventChannel>,
    pub ingress: ChannelIngress,
    pub peer_channels: Vec<Arc<dyn EventChannel>>,
    pub push: Arc<dyn PushClient>,
}

impl RegionComponents {
    /// Build components from configuration.
    ///
    /// With an empty Redis URL the region runs single-node: in-memory
    /// registry, in-process channel, and no peers.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let region = config.region_id();
        let push: Arc<dyn PushClient> =
            Arc::new(HttpPushClient::new(&config.push.endpoint, config.push_timeout())?);

        if !config.redis_enabled() {
            warn!(region = %region, "Redis URL not provided, running in single-node mode");
            if !config.region.peers.is_empty() {
                warn!("Peer regions are ignored in single-node mode");
            }
            let (local, rx) =
                InMemoryEventChannel::new(region.clone(), config.dispatcher.queue_capacity);
            return Ok(Self {
                topology: FanoutTopology::single_region(region),
                registry: Arc::new(InMemoryConnectionRegistry::new()),
                local_channel: Arc::new(local),
                ingress: ChannelIngress::InMemory(rx),
                peer_channels: Vec::new(),
                push,
            });
        }

        let timeout = config.redis_timeout();
        let prefix = &config.redis.key_prefix;
        let topology = FanoutTopology::new(region.clone(), config.peer_region_ids())?;

        let registry =
            RedisConnectionRegistry::connect(&config.redis.url, prefix, timeout).await?;
        let local = RedisEventChannel::new(region, &config.redis.url, prefix, timeout)?;

        let mut peer_channels: Vec<Arc<dyn EventChannel>> = Vec::new();
        for peer in &config.region.peers {
            let channel = RedisEventChannel::new(
                RegionId::from_string(peer.name.clone()),
                &peer.redis_url,
                prefix,
                timeout,
            )?;
            peer_channels.push(Arc::new(channel));
        }

        Ok(Self {
            topology,
            registry: Arc::new(registry),
            local_channel: Arc::new(local),
            ingress: ChannelIngress::Redis {
                redis_url: config.redis.url.clone(),
                key_prefix: prefix.clone(),
                timeout,
            },
            peer_channels,
            push,
        })
    }
}

/// A started region
pub struct RegionNode {
    region: RegionId,
    registry: Arc<dyn ConnectionRegistry>,
    relay: Arc<EventRelay>,
    lifecycle: Arc<LifecycleHandler>,
    stats: Arc<DispatchStats>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl RegionNode {
    /// Build from configuration and start all background tasks
    pub async fn from_config(config: &Config) -> Result<Self> {
        let components = RegionComponents::from_config(config).await?;
        Self::start(components, NodeSettings::from_config(config))
    }

    /// Start a region from prebuilt components. Must be called inside a
    /// Tokio runtime.
    pub fn start(components: RegionComponents, settings: NodeSettings) -> Result<Self> {
        let RegionComponents {
            topology,
            registry,
            local_channel,
            ingress,
            peer_channels,
            push,
        } = components;
        let region = topology.origin().clone();
        let cancel = CancellationToken::new();

        let (dispatch_tx, dispatch_rx) = mpsc::channel(settings.queue_capacity.max(1));
        let relay = Arc::new(EventRelay::new(
            topology,
            local_channel,
            peer_channels,
            dispatch_tx,
        )?);

        let dispatcher = Arc::new(Dispatcher::new(
            region.clone(),
            Arc::clone(&registry),
            push,
            settings.failure_policy,
            settings.push_concurrency,
        ));
        let lifecycle = Arc::new(LifecycleHandler::new(
            Arc::clone(&registry),
            Arc::clone(&relay),
            settings.lease,
        ));

        let mut tasks = Vec::with_capacity(3);

        let worker = DispatchWorker::new(dispatcher, dispatch_rx, settings.max_in_flight);
        let stats = worker.stats();
        tasks.push(worker.spawn(cancel.child_token()));

        match ingress {
            ChannelIngress::InMemory(rx) => {
                tasks.push(relay.spawn_ingress(rx, cancel.child_token()));
            }
            ChannelIngress::Redis {
                redis_url,
                key_prefix,
                timeout,
            } => {
                let subscriber =
                    EventSubscriber::new(&redis_url, &key_prefix, Arc::clone(&relay), timeout)?;
                tasks.push(subscriber.spawn(cancel.child_token()));
            }
        }

        tasks.push(
            RegistryReaper::new(Arc::clone(&registry), settings.reap_interval)
                .spawn(cancel.child_token()),
        );

        info!(
            region = %region,
            edges = ?relay
                .topology()
                .edges()
                .map(|(from, to)| format!("{from}->{to}"))
                .collect::<Vec<_>>(),
            policy = %settings.failure_policy,
            "Region node started"
        );

        Ok(Self {
            region,
            registry,
            relay,
            lifecycle,
            stats,
            cancel,
            tasks,
        })
    }

    #[must_use]
    pub const fn region(&self) -> &RegionId {
        &self.region
    }

    #[must_use]
    pub const fn lifecycle(&self) -> &Arc<LifecycleHandler> {
        &self.lifecycle
    }

    #[must_use]
    pub const fn relay(&self) -> &Arc<EventRelay> {
        &self.relay
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<dyn ConnectionRegistry> {
        &self.registry
    }

    #[must_use]
    pub const fn dispatch_stats(&self) -> &Arc<DispatchStats> {
        &self.stats
    }

    /// Stop background tasks and wait for them to finish
    pub async fn shutdown(self) {
        info!(region = %self.region, "Shutting down region node");
        self.cancel.cancel();
        for result in join_all(self.tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "Region task ended abnormally");
            }
        }
    }
}
