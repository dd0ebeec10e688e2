use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatrelay_core::metrics::record_registry_operation;
use chatrelay_core::{ChatId, Clock, ConnectionId, SystemClock};
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::{lease_expiry, ConnectionRegistry};
use crate::error::Result;

/// Process-local registry used in single-node mode and in tests.
///
/// Liveness is evaluated against the injected [`Clock`] at read time, so
/// expiry tests can move time forward without sleeping.
pub struct InMemoryConnectionRegistry {
    chats: DashMap<ChatId, HashMap<ConnectionId, DateTime<Utc>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            chats: DashMap::new(),
            clock,
        }
    }

    /// Number of stored entries for a chat, live or not
    #[must_use]
    pub fn stored_len(&self, chat_id: &ChatId) -> usize {
        self.chats.get(chat_id).map_or(0, |c| c.len())
    }

    /// Number of chats with at least one stored entry
    #[must_use]
    pub fn chat_count(&self) -> usize {
        self.chats.len()
    }
}

impl Default for InMemoryConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionRegistry for InMemoryConnectionRegistry {
    async fn upsert(
        &self,
        chat_id: &ChatId,
        connection_id: &ConnectionId,
        lease: Duration,
    ) -> Result<()> {
        let expires_at = lease_expiry(self.clock.now(), lease);
        self.chats
            .entry(chat_id.clone())
            .or_default()
            .insert(connection_id.clone(), expires_at);
        record_registry_operation("upsert", true);
        Ok(())
    }

    async fn delete(&self, chat_id: &ChatId, connection_id: &ConnectionId) -> Result<()> {
        if let Some(mut connections) = self.chats.get_mut(chat_id) {
            connections.remove(connection_id);
        }
        self.chats.remove_if(chat_id, |_, connections| connections.is_empty());
        record_registry_operation("delete", true);
        Ok(())
    }

    async fn list_live(&self, chat_id: &ChatId) -> Result<Vec<ConnectionId>> {
        let now = self.clock.now();
        let mut live: Vec<ConnectionId> = self
            .chats
            .get(chat_id)
            .map(|connections| {
                connections
                    .iter()
                    .filter(|(_, expires_at)| **expires_at > now)
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default();
        live.sort();
        record_registry_operation("list_live", true);
        Ok(live)
    }

    async fn reap_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut reaped = 0;
        for mut connections in self.chats.iter_mut() {
            let before = connections.len();
            connections.retain(|_, expires_at| *expires_at > now);
            reaped += before - connections.len();
        }
        self.chats.retain(|_, connections| !connections.is_empty());
        record_registry_operation("reap_expired", true);
        Ok(reaped)
    }
}
