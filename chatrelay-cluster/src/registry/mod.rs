//! Connection registry
//!
//! Per-region mapping from chat id to the connection ids currently joined to
//! it. Every entry carries a lease; an entry whose lease has passed is no
//! longer live and is never returned by [`ConnectionRegistry::list_live`],
//! whether or not a reaper has physically removed it yet.

mod memory;
mod reaper;
mod redis;

pub use memory::InMemoryConnectionRegistry;
pub use reaper::RegistryReaper;
pub use redis::RedisConnectionRegistry;

use std::time::Duration;

use async_trait::async_trait;
use chatrelay_core::{ChatId, ConnectionId};
use chrono::{DateTime, Utc};

use crate::error::Result;

/// Storage of live connections per chat.
///
/// Implementations must be safe for concurrent use by the lifecycle handler,
/// the dispatcher and the reaper. All failures surface as
/// `Error::RegistryUnavailable`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    /// Insert the connection or extend its lease to `now + lease`.
    async fn upsert(
        &self,
        chat_id: &ChatId,
        connection_id: &ConnectionId,
        lease: Duration,
    ) -> Result<()>;

    /// Remove the connection. Removing an absent entry succeeds.
    async fn delete(&self, chat_id: &ChatId, connection_id: &ConnectionId) -> Result<()>;

    /// Connections of the chat whose lease is strictly in the future, sorted.
    async fn list_live(&self, chat_id: &ChatId) -> Result<Vec<ConnectionId>>;

    /// Physically remove expired entries. Returns how many were removed.
    async fn reap_expired(&self) -> Result<usize>;
}

/// Lease end for an entry written at `now`, saturating instead of
/// overflowing for absurd leases.
pub(crate) fn lease_expiry(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(lease)
        .ok()
        .and_then(|lease| now.checked_add_signed(lease))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
