use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chatrelay_core::metrics::DISPATCH_DURATION;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::Dispatcher;
use crate::events::MessageEvent;

/// Counters for events taken off the dispatch queue
#[derive(Debug, Default)]
pub struct DispatchStats {
    processed: AtomicU64,
    failed: AtomicU64,
}

impl DispatchStats {
    /// Events dispatched, successfully or not
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Acquire)
    }

    /// Events whose dispatch failed as a whole
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Acquire)
    }
}

/// Consumes the dispatch queue, running up to `max_in_flight` events at once.
///
/// Each event is dispatched on its own task, so a connection that stalls
/// until the push timeout only holds up the event it belongs to.
pub struct DispatchWorker {
    dispatcher: Arc<Dispatcher>,
    rx: mpsc::Receiver<MessageEvent>,
    stats: Arc<DispatchStats>,
    permits: Arc<Semaphore>,
}

impl DispatchWorker {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        rx: mpsc::Receiver<MessageEvent>,
        max_in_flight: usize,
    ) -> Self {
        Self {
            dispatcher,
            rx,
            stats: Arc::new(DispatchStats::default()),
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    #[must_use]
    pub fn stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    async fn run(mut self, cancel: CancellationToken) {
        info!(region = %self.dispatcher.region(), "Dispatch worker started");
        let mut in_flight = JoinSet::new();
        loop {
            let permit = tokio::select! {
                () = cancel.cancelled() => break,
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let event = tokio::select! {
                () = cancel.cancelled() => break,
                event = self.rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let dispatcher = Arc::clone(&self.dispatcher);
            let stats = Arc::clone(&self.stats);
            in_flight.spawn(async move {
                handle(&dispatcher, &stats, &event).await;
                drop(permit);
            });
            while in_flight.try_join_next().is_some() {}
        }

        // Let dispatches already started finish their pushes
        while in_flight.join_next().await.is_some() {}
        info!(region = %self.dispatcher.region(), "Dispatch worker stopped");
    }
}

async fn handle(dispatcher: &Dispatcher, stats: &DispatchStats, event: &MessageEvent) {
    let start = Instant::now();
    let result = dispatcher.on_message_event(event).await;
    let elapsed = start.elapsed();

    match result {
        Ok(_) => {
            DISPATCH_DURATION
                .with_label_values(&["ok"])
                .observe(elapsed.as_secs_f64());
            info!(event_id = %event.event_id, "Dispatch took {} ms", elapsed.as_millis());
        }
        Err(e) => {
            stats.failed.fetch_add(1, Ordering::AcqRel);
            DISPATCH_DURATION
                .with_label_values(&["registry_unavailable"])
                .observe(elapsed.as_secs_f64());
            error!(
                event_id = %event.event_id,
                error = %e,
                "Dispatch failed after {} ms",
                elapsed.as_millis()
            );
        }
    }
    stats.processed.fetch_add(1, Ordering::AcqRel);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::push::{MockPushClient, PushClient};
    use crate::error::PushFailure;
    use crate::registry::{ConnectionRegistry, InMemoryConnectionRegistry};
    use chatrelay_core::models::ConnectionFailurePolicy;
    use std::time::Duration;

    #[tokio::test]
    async fn test_worker_processes_queue() {
        let registry = Arc::new(InMemoryConnectionRegistry::new());
        registry
            .upsert(&"default".into(), &"listener".into(), Duration::from_secs(60))
            .await
            .unwrap();

        let mut push = MockPushClient::new();
        push.expect_push().times(3).returning(|_, _| Ok(()));
        let dispatcher = Arc::new(Dispatcher::new(
            "eu".into(),
            registry,
            Arc::new(push),
            ConnectionFailurePolicy::Ignore,
            4,
        ));

        let (tx, rx) = mpsc::channel(8);
        let worker = DispatchWorker::new(dispatcher, rx, 4);
        let stats = worker.stats();
        let cancel = CancellationToken::new();
        let handle = worker.spawn(cancel.clone());

        for i in 0..3 {
            tx.send(MessageEvent::new(
                "default".into(),
                "sender".into(),
                format!("message {i}"),
                "eu".into(),
            ))
            .await
            .unwrap();
        }

        for _ in 0..100 {
            if stats.processed() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(stats.processed(), 3);
        assert_eq!(stats.failed(), 0);

        cancel.cancel();
        handle.await.unwrap();
    }

    /// Push client where one connection stalls and then fails
    struct StallingPushClient {
        stall: Duration,
    }

    #[async_trait::async_trait]
    impl PushClient for StallingPushClient {
        async fn push(
            &self,
            connection_id: &chatrelay_core::ConnectionId,
            _payload: bytes::Bytes,
        ) -> std::result::Result<(), PushFailure> {
            if connection_id.as_str() == "stalled" {
                tokio::time::sleep(self.stall).await;
                return Err(PushFailure::Transport("timed out".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_stalled_connection_does_not_serialize_events() {
        let registry = Arc::new(InMemoryConnectionRegistry::new());
        for id in ["stalled", "healthy"] {
            registry
                .upsert(&"default".into(), &id.into(), Duration::from_secs(60))
                .await
                .unwrap();
        }

        let stall = Duration::from_millis(300);
        let dispatcher = Arc::new(Dispatcher::new(
            "eu".into(),
            registry,
            Arc::new(StallingPushClient { stall }),
            ConnectionFailurePolicy::Ignore,
            4,
        ));

        let (tx, rx) = mpsc::channel(16);
        for i in 0..6 {
            tx.send(MessageEvent::new(
                "default".into(),
                "sender".into(),
                format!("message {i}"),
                "eu".into(),
            ))
            .await
            .unwrap();
        }

        let worker = DispatchWorker::new(dispatcher, rx, 16);
        let stats = worker.stats();
        let cancel = CancellationToken::new();
        let started = std::time::Instant::now();
        let handle = worker.spawn(cancel.clone());

        while stats.processed() < 6 {
            assert!(
                started.elapsed() < stall * 3,
                "events were dispatched one after another"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(stats.failed(), 0);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_dispatches() {
        let registry = Arc::new(InMemoryConnectionRegistry::new());
        registry
            .upsert(&"default".into(), &"stalled".into(), Duration::from_secs(60))
            .await
            .unwrap();
        let dispatcher = Arc::new(Dispatcher::new(
            "eu".into(),
            registry,
            Arc::new(StallingPushClient {
                stall: Duration::from_millis(100),
            }),
            ConnectionFailurePolicy::Ignore,
            4,
        ));

        let (tx, rx) = mpsc::channel(4);
        tx.send(MessageEvent::new(
            "default".into(),
            "sender".into(),
            "hi".to_string(),
            "eu".into(),
        ))
        .await
        .unwrap();

        let worker = DispatchWorker::new(dispatcher, rx, 4);
        let stats = worker.stats();
        let cancel = CancellationToken::new();
        let handle = worker.spawn(cancel.clone());

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(stats.processed(), 1);
    }
}
