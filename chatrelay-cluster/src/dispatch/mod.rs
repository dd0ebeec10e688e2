//! Region-local dispatch
//!
//! Turns one message event into pushes to every live connection of its chat
//! in this region, except the sender.

mod push;
mod worker;

pub use push::{encode_payload, HttpPushClient, PushClient};
pub use worker::{DispatchStats, DispatchWorker};

use std::sync::Arc;

use chatrelay_core::metrics::DISPATCH_PUSH_TOTAL;
use chatrelay_core::models::ConnectionFailurePolicy;
use chatrelay_core::{ConnectionId, RegionId};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::error::{PushFailure, Result};
use crate::events::MessageEvent;
use crate::registry::ConnectionRegistry;

/// What happened to one message event in this region
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Live connections other than the sender
    pub targets: usize,
    pub delivered: usize,
    pub gone: usize,
    pub failed: usize,
    /// Gone connections removed from the registry
    pub removed: usize,
}

pub struct Dispatcher {
    region: RegionId,
    registry: Arc<dyn ConnectionRegistry>,
    push: Arc<dyn PushClient>,
    policy: ConnectionFailurePolicy,
    push_concurrency: usize,
}

impl Dispatcher {
    pub fn new(
        region: RegionId,
        registry: Arc<dyn ConnectionRegistry>,
        push: Arc<dyn PushClient>,
        policy: ConnectionFailurePolicy,
        push_concurrency: usize,
    ) -> Self {
        Self {
            region,
            registry,
            push,
            policy,
            push_concurrency: push_concurrency.max(1),
        }
    }

    #[must_use]
    pub const fn region(&self) -> &RegionId {
        &self.region
    }

    /// Push the event's message to every live connection of its chat in this
    /// region, excluding the sender.
    ///
    /// Individual push failures are counted, never returned. Only a registry
    /// read failure fails the whole dispatch.
    pub async fn on_message_event(&self, event: &MessageEvent) -> Result<DispatchReport> {
        let live = self.registry.list_live(&event.chat_id).await?;
        let targets: Vec<ConnectionId> = live
            .into_iter()
            .filter(|id| *id != event.sender_connection_id)
            .collect();

        let mut report = DispatchReport {
            targets: targets.len(),
            ..DispatchReport::default()
        };
        if targets.is_empty() {
            debug!(event_id = %event.event_id, chat_id = %event.chat_id, "No connections to dispatch to");
            return Ok(report);
        }

        let payload = encode_payload(&event.message)?;
        let outcomes: Vec<(ConnectionId, std::result::Result<(), PushFailure>)> =
            stream::iter(targets)
                .map(|connection_id| {
                    let payload = payload.clone();
                    async move {
                        let outcome = self.push.push(&connection_id, payload).await;
                        (connection_id, outcome)
                    }
                })
                .buffer_unordered(self.push_concurrency)
                .collect()
                .await;

        for (connection_id, outcome) in outcomes {
            match outcome {
                Ok(()) => {
                    report.delivered += 1;
                    DISPATCH_PUSH_TOTAL.with_label_values(&["delivered"]).inc();
                }
                Err(failure) => {
                    DISPATCH_PUSH_TOTAL
                        .with_label_values(&[failure.as_label()])
                        .inc();
                    warn!(
                        event_id = %event.event_id,
                        connection_id = %connection_id,
                        error = %failure,
                        "Push failed"
                    );
                    if failure == PushFailure::Gone {
                        report.gone += 1;
                        if self.policy.deletes_on_gone() {
                            self.remove_gone(event, &connection_id, &mut report).await;
                        }
                    } else {
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            event_id = %event.event_id,
            chat_id = %event.chat_id,
            origin = %event.origin_region,
            targets = report.targets,
            delivered = report.delivered,
            gone = report.gone,
            failed = report.failed,
            "Dispatched message event"
        );
        Ok(report)
    }

    async fn remove_gone(
        &self,
        event: &MessageEvent,
        connection_id: &ConnectionId,
        report: &mut DispatchReport,
    ) {
        match self.registry.delete(&event.chat_id, connection_id).await {
            Ok(()) => report.removed += 1,
            Err(e) => warn!(
                connection_id = %connection_id,
                error = %e,
                "Failed to remove gone connection"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::push::MockPushClient;
    use super::*;
    use crate::error::Error;
    use crate::registry::{InMemoryConnectionRegistry, MockConnectionRegistry};
    use std::time::Duration;

    const LEASE: Duration = Duration::from_secs(3600);

    fn event(sender: &str) -> MessageEvent {
        MessageEvent::new("default".into(), sender.into(), "hello".to_string(), "eu".into())
    }

    async fn registry_with(ids: &[&str]) -> Arc<InMemoryConnectionRegistry> {
        let registry = Arc::new(InMemoryConnectionRegistry::new());
        for id in ids {
            registry
                .upsert(&"default".into(), &(*id).into(), LEASE)
                .await
                .unwrap();
        }
        registry
    }

    fn push_where_gone(gone: &'static [&'static str]) -> MockPushClient {
        let mut push = MockPushClient::new();
        push.expect_push().returning(move |id, _| {
            if gone.iter().any(|g| *g == id.as_str()) {
                Err(PushFailure::Gone)
            } else if id.as_str() == "broken" {
                Err(PushFailure::Transport("connection reset".to_string()))
            } else {
                Ok(())
            }
        });
        push
    }

    #[tokio::test]
    async fn test_sender_is_excluded() {
        let registry = registry_with(&["a", "b", "c"]).await;
        let mut push = MockPushClient::new();
        push.expect_push()
            .withf(|id, _| id.as_str() != "a")
            .times(2)
            .returning(|_, _| Ok(()));

        let dispatcher = Dispatcher::new(
            "eu".into(),
            registry,
            Arc::new(push),
            ConnectionFailurePolicy::Ignore,
            4,
        );
        let report = dispatcher.on_message_event(&event("a")).await.unwrap();
        assert_eq!(report.targets, 2);
        assert_eq!(report.delivered, 2);
    }

    #[tokio::test]
    async fn test_sender_not_in_region_pushes_to_all() {
        let registry = registry_with(&["a", "b"]).await;
        let mut push = MockPushClient::new();
        push.expect_push().times(2).returning(|_, _| Ok(()));

        let dispatcher = Dispatcher::new(
            "us".into(),
            registry,
            Arc::new(push),
            ConnectionFailurePolicy::Ignore,
            4,
        );
        let report = dispatcher.on_message_event(&event("remote-sender")).await.unwrap();
        assert_eq!(report.delivered, 2);
    }

    #[tokio::test]
    async fn test_empty_chat_pushes_nothing() {
        let registry = registry_with(&["a"]).await;
        let mut push = MockPushClient::new();
        push.expect_push().never();

        let dispatcher = Dispatcher::new(
            "eu".into(),
            registry,
            Arc::new(push),
            ConnectionFailurePolicy::Ignore,
            4,
        );
        let report = dispatcher.on_message_event(&event("a")).await.unwrap();
        assert_eq!(report, DispatchReport::default());
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_other_pushes() {
        let registry = registry_with(&["a", "b", "broken", "stale"]).await;
        let dispatcher = Dispatcher::new(
            "eu".into(),
            registry.clone(),
            Arc::new(push_where_gone(&["stale"])),
            ConnectionFailurePolicy::Ignore,
            2,
        );

        let report = dispatcher.on_message_event(&event("sender")).await.unwrap();
        assert_eq!(report.targets, 4);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.gone, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.removed, 0);

        // Ignore policy leaves the stale entry in place
        let live = registry.list_live(&"default".into()).await.unwrap();
        assert!(live.contains(&ConnectionId::from("stale")));
    }

    #[tokio::test]
    async fn test_delete_on_gone_removes_only_gone_connections() {
        let registry = registry_with(&["a", "broken", "stale"]).await;
        let dispatcher = Dispatcher::new(
            "eu".into(),
            registry.clone(),
            Arc::new(push_where_gone(&["stale"])),
            ConnectionFailurePolicy::DeleteOnGone,
            2,
        );

        let report = dispatcher.on_message_event(&event("sender")).await.unwrap();
        assert_eq!(report.removed, 1);

        let live = registry.list_live(&"default".into()).await.unwrap();
        assert_eq!(live, vec![ConnectionId::from("a"), ConnectionId::from("broken")]);
    }

    #[tokio::test]
    async fn test_registry_failure_fails_dispatch() {
        let mut registry = MockConnectionRegistry::new();
        registry
            .expect_list_live()
            .returning(|_| Err(Error::RegistryUnavailable("down".to_string())));
        let mut push = MockPushClient::new();
        push.expect_push().never();

        let dispatcher = Dispatcher::new(
            "eu".into(),
            Arc::new(registry),
            Arc::new(push),
            ConnectionFailurePolicy::Ignore,
            4,
        );
        let result = dispatcher.on_message_event(&event("a")).await;
        assert!(matches!(result, Err(Error::RegistryUnavailable(_))));
    }

    #[tokio::test]
    async fn test_same_payload_for_every_target() {
        let registry = registry_with(&["a", "b"]).await;
        let mut push = MockPushClient::new();
        push.expect_push()
            .withf(|_, payload| payload[..] == br#"{"data":"hello"}"#[..])
            .times(2)
            .returning(|_, _| Ok(()));

        let dispatcher = Dispatcher::new(
            "eu".into(),
            registry,
            Arc::new(push),
            ConnectionFailurePolicy::Ignore,
            1,
        );
        dispatcher.on_message_event(&event("sender")).await.unwrap();
    }
}
