//! Cross-region relay for chat messages
//!
//! This crate provides:
//! - Per-chat connection registry with lease-based expiry (`registry`)
//! - Event channels and the single-hop fan-out relay between regions (`relay`)
//! - Region-local dispatch of message events to live connections (`dispatch`)
//! - Connect, disconnect and inbound message handling (`lifecycle`)
//! - Wiring of all of the above into one running region (`node`)

pub mod dispatch;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod node;
pub mod registry;
pub mod relay;

pub use dispatch::{
    DispatchReport, DispatchStats, DispatchWorker, Dispatcher, HttpPushClient, PushClient,
};
pub use error::{Error, PushFailure, Result};
pub use events::{EventSource, MessageEvent, RelayEnvelope, DETAIL_TYPE};
pub use lifecycle::LifecycleHandler;
pub use node::{ChannelIngress, NodeSettings, RegionComponents, RegionNode};
pub use registry::{
    ConnectionRegistry, InMemoryConnectionRegistry, RedisConnectionRegistry, RegistryReaper,
};
pub use relay::{
    EventChannel, EventRelay, EventSubscriber, FanoutTopology, InMemoryEventChannel,
    PublishReport, RedisEventChannel,
};
