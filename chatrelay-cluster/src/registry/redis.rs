use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatrelay_core::metrics::record_registry_operation;
use chatrelay_core::{ChatId, Clock, ConnectionId, SystemClock};
use redis::aio::ConnectionManager;
use redis::RedisResult;
use tokio::time::timeout;
use tracing::debug;

use super::{lease_expiry, ConnectionRegistry};
use crate::error::{Error, Result};

/// Removes expired members of one chat and drops the chat from the index
/// once it is empty, in one round trip.
const REAP_CHAT_SCRIPT: &str = r"
local removed = redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
if redis.call('ZCARD', KEYS[1]) == 0 then
    redis.call('SREM', KEYS[2], ARGV[2])
end
return removed
";

/// Redis-backed registry shared by every process of one region.
///
/// Layout:
/// - `{prefix}chat:{chat_id}:connections` sorted set, member = connection id,
///   score = lease end in epoch seconds
/// - `{prefix}chats` set of chat ids that may have stored entries, used by
///   the reaper
///
/// Liveness is decided by score at read time (`ZRANGEBYSCORE (now +inf`), so
/// expired members are invisible even before they are reaped.
pub struct RedisConnectionRegistry {
    redis: ConnectionManager,
    key_prefix: String,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl RedisConnectionRegistry {
    pub fn new(redis: ConnectionManager, key_prefix: impl Into<String>, timeout: Duration) -> Self {
        Self {
            redis,
            key_prefix: key_prefix.into(),
            timeout,
            clock: Arc::new(SystemClock),
        }
    }

    /// Open a managed connection to `redis_url`.
    pub async fn connect(redis_url: &str, key_prefix: &str, op_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::Configuration(format!("Invalid registry Redis URL: {e}")))?;
        let manager = timeout(op_timeout, client.get_connection_manager())
            .await
            .map_err(|_| Error::RegistryUnavailable("Timed out connecting to Redis".to_string()))?
            .map_err(|e| Error::RegistryUnavailable(format!("Failed to connect to Redis: {e}")))?;
        Ok(Self::new(manager, key_prefix, op_timeout))
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn chat_key(&self, chat_id: &ChatId) -> String {
        format!("{}chat:{}:connections", self.key_prefix, chat_id)
    }

    fn index_key(&self) -> String {
        format!("{}chats", self.key_prefix)
    }

    fn now_secs(&self) -> i64 {
        self.clock.now().timestamp()
    }

    /// Run one Redis call under the operation timeout and record its outcome.
    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = RedisResult<T>>,
    ) -> Result<T> {
        let result = match timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(Error::RegistryUnavailable(format!(
                "Redis {operation} failed: {e}"
            ))),
            Err(_) => Err(Error::RegistryUnavailable(format!(
                "Redis {operation} timed out after {:?}",
                self.timeout
            ))),
        };
        record_registry_operation(operation, result.is_ok());
        result
    }
}

#[async_trait]
impl ConnectionRegistry for RedisConnectionRegistry {
    async fn upsert(
        &self,
        chat_id: &ChatId,
        connection_id: &ConnectionId,
        lease: Duration,
    ) -> Result<()> {
        let expires_at = lease_expiry(self.clock.now(), lease).timestamp();
        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("ZADD")
            .arg(self.chat_key(chat_id))
            .arg(expires_at)
            .arg(connection_id.as_str())
            .ignore()
            .cmd("SADD")
            .arg(self.index_key())
            .arg(chat_id.as_str())
            .ignore();

        self.bounded("upsert", pipe.query_async::<()>(&mut conn))
            .await
    }

    async fn delete(&self, chat_id: &ChatId, connection_id: &ConnectionId) -> Result<()> {
        let mut conn = self.redis.clone();
        let removed: i64 = self
            .bounded(
                "delete",
                redis::cmd("ZREM")
                    .arg(self.chat_key(chat_id))
                    .arg(connection_id.as_str())
                    .query_async(&mut conn),
            )
            .await?;
        debug!(chat_id = %chat_id, connection_id = %connection_id, removed, "Deleted connection");
        Ok(())
    }

    async fn list_live(&self, chat_id: &ChatId) -> Result<Vec<ConnectionId>> {
        let mut conn = self.redis.clone();
        let mut members: Vec<String> = self
            .bounded(
                "list_live",
                redis::cmd("ZRANGEBYSCORE")
                    .arg(self.chat_key(chat_id))
                    .arg(format!("({}", self.now_secs()))
                    .arg("+inf")
                    .query_async(&mut conn),
            )
            .await?;
        members.sort();
        Ok(members.into_iter().map(ConnectionId::from_string).collect())
    }

    async fn reap_expired(&self) -> Result<usize> {
        let mut conn = self.redis.clone();
        let chats: Vec<String> = self
            .bounded(
                "reap_index",
                redis::cmd("SMEMBERS").arg(self.index_key()).query_async(&mut conn),
            )
            .await?;

        let script = redis::Script::new(REAP_CHAT_SCRIPT);
        let now = self.now_secs();
        let index_key = self.index_key();
        let mut reaped = 0usize;
        for chat in chats {
            let chat_id = ChatId::from_string(chat);
            let removed: i64 = self
                .bounded(
                    "reap_expired",
                    script
                        .key(self.chat_key(&chat_id))
                        .key(&index_key)
                        .arg(now)
                        .arg(chat_id.as_str())
                        .invoke_async(&mut conn),
                )
                .await?;
            reaped += usize::try_from(removed).unwrap_or(0);
        }
        Ok(reaped)
    }
}
