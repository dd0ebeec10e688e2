//! Shared helpers for multi-region tests: in-process regions wired together
//! through in-memory channels, with recording push clients.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chatrelay_cluster::node::ChannelIngress;
use chatrelay_cluster::{
    EventChannel, FanoutTopology, InMemoryConnectionRegistry, InMemoryEventChannel, NodeSettings,
    PushClient, PushFailure, RegionComponents, RegionNode, RelayEnvelope, Result,
};
use chatrelay_core::models::ConnectionFailurePolicy;
use chatrelay_core::{ConnectionId, RegionId};

/// Push client that records what it was asked to deliver.
#[derive(Default)]
pub struct RecordingPushClient {
    pushes: Mutex<Vec<(ConnectionId, serde_json::Value)>>,
    gone: Mutex<HashSet<ConnectionId>>,
    broken: Mutex<HashSet<ConnectionId>>,
}

impl RecordingPushClient {
    pub fn mark_gone(&self, id: &str) {
        self.gone.lock().unwrap().insert(id.into());
    }

    pub fn mark_broken(&self, id: &str) {
        self.broken.lock().unwrap().insert(id.into());
    }

    /// Successful pushes, in completion order
    pub fn pushes(&self) -> Vec<(ConnectionId, serde_json::Value)> {
        self.pushes.lock().unwrap().clone()
    }

    pub fn pushes_to(&self, id: &str) -> Vec<serde_json::Value> {
        self.pushes()
            .into_iter()
            .filter(|(c, _)| c.as_str() == id)
            .map(|(_, body)| body)
            .collect()
    }
}

#[async_trait]
impl PushClient for RecordingPushClient {
    async fn push(
        &self,
        connection_id: &ConnectionId,
        payload: Bytes,
    ) -> std::result::Result<(), PushFailure> {
        if self.gone.lock().unwrap().contains(connection_id) {
            return Err(PushFailure::Gone);
        }
        if self.broken.lock().unwrap().contains(connection_id) {
            return Err(PushFailure::Transport("connection reset".to_string()));
        }
        let body = serde_json::from_slice(&payload).expect("push payload is JSON");
        self.pushes
            .lock()
            .unwrap()
            .push((connection_id.clone(), body));
        Ok(())
    }
}

/// Everything published to one region's channel, by any publisher
#[derive(Default)]
pub struct ChannelLog {
    envelopes: Mutex<Vec<RelayEnvelope>>,
}

impl ChannelLog {
    pub fn envelopes(&self) -> Vec<RelayEnvelope> {
        self.envelopes.lock().unwrap().clone()
    }

    pub fn replicas(&self) -> usize {
        self.envelopes().iter().filter(|e| e.is_replica()).count()
    }

    pub fn originals(&self) -> usize {
        self.envelopes().iter().filter(|e| !e.is_replica()).count()
    }
}

/// In-memory channel that also logs into the target region's [`ChannelLog`]
pub struct LoggingChannel {
    inner: InMemoryEventChannel,
    log: Arc<ChannelLog>,
    down: Arc<Mutex<bool>>,
}

#[async_trait]
impl EventChannel for LoggingChannel {
    fn region(&self) -> &RegionId {
        self.inner.region()
    }

    async fn publish(&self, envelope: &RelayEnvelope) -> Result<()> {
        if *self.down.lock().unwrap() {
            return Err(chatrelay_cluster::Error::RelayUnavailable {
                region: self.inner.region().clone(),
                reason: "region down".to_string(),
            });
        }
        self.inner.publish(envelope).await?;
        self.log.envelopes.lock().unwrap().push(envelope.clone());
        Ok(())
    }
}

pub struct TestRegion {
    pub node: RegionNode,
    pub registry: Arc<InMemoryConnectionRegistry>,
    pub push: Arc<RecordingPushClient>,
    pub channel_log: Arc<ChannelLog>,
    /// When set, every publisher sees this region's channel as unavailable
    pub channel_down: Arc<Mutex<bool>>,
}

/// Full mesh of in-process regions
pub struct Mesh {
    pub regions: HashMap<String, TestRegion>,
}

impl Mesh {
    pub fn start(names: &[&str], policy: ConnectionFailurePolicy) -> Self {
        let mut channels = HashMap::new();
        let mut receivers = HashMap::new();
        let mut logs = HashMap::new();
        let mut downs = HashMap::new();
        for name in names {
            let (channel, rx) = InMemoryEventChannel::new(RegionId::from(*name), 64);
            channels.insert(name.to_string(), channel);
            receivers.insert(name.to_string(), rx);
            logs.insert(name.to_string(), Arc::new(ChannelLog::default()));
            downs.insert(name.to_string(), Arc::new(Mutex::new(false)));
        }

        let channel_to = |name: &str| -> Arc<dyn EventChannel> {
            Arc::new(LoggingChannel {
                inner: channels[name].clone(),
                log: Arc::clone(&logs[name]),
                down: Arc::clone(&downs[name]),
            })
        };

        let mut regions = HashMap::new();
        for name in names {
            let peers: Vec<&str> = names.iter().copied().filter(|n| n != name).collect();
            let topology = FanoutTopology::new(
                RegionId::from(*name),
                peers.iter().map(|p| RegionId::from(*p)).collect(),
            )
            .unwrap();

            let registry = Arc::new(InMemoryConnectionRegistry::new());
            let push = Arc::new(RecordingPushClient::default());
            let components = RegionComponents {
                topology,
                registry: registry.clone(),
                local_channel: channel_to(*name),
                ingress: ChannelIngress::InMemory(receivers.remove(*name).unwrap()),
                peer_channels: peers.iter().map(|p| channel_to(*p)).collect(),
                push: push.clone(),
            };
            let settings = NodeSettings {
                failure_policy: policy,
                ..NodeSettings::default()
            };
            let node = RegionNode::start(components, settings).unwrap();

            regions.insert(
                name.to_string(),
                TestRegion {
                    node,
                    registry,
                    push,
                    channel_log: Arc::clone(&logs[*name]),
                    channel_down: Arc::clone(&downs[*name]),
                },
            );
        }

        Self { regions }
    }

    pub fn region(&self, name: &str) -> &TestRegion {
        &self.regions[name]
    }

    /// Wait until every region has dispatched `count` events in total.
    pub async fn wait_for_dispatches(&self, count: u64) {
        for region in self.regions.values() {
            eventually(|| region.node.dispatch_stats().processed() >= count).await;
        }
        // Give anything that should not happen a chance to happen
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    pub async fn shutdown(self) {
        for (_, region) in self.regions {
            region.node.shutdown().await;
        }
    }
}

/// Poll `condition` for up to two seconds.
pub async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 2s");
}
