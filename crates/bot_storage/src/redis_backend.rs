//! Redis-backed state store
//!
//! Atomic primitives run as Lua scripts so each one is a single,
//! server-serialized round-trip.

use crate::error::{StoreError, StoreResult};
use crate::key::StorageKey;
use crate::store::StateStore;
use async_trait::async_trait;
use deadpool_redis::redis::{self, AsyncCommands, Script};
use deadpool_redis::{Config, Connection, Pool, Runtime};
use std::time::Duration;

const INCREMENT_WITH_EXPIRY: &str = r#"
local count = redis.call("INCRBY", KEYS[1], ARGV[1])
if redis.call("PTTL", KEYS[1]) < 0 then
    redis.call("PEXPIRE", KEYS[1], ARGV[2])
end
return count
"#;

const COMPARE_AND_SET: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    if ARGV[3] == "0" then
        redis.call("SET", KEYS[1], ARGV[2])
    else
        redis.call("SET", KEYS[1], ARGV[2], "PX", ARGV[3])
    end
    return 1
end
return 0
"#;

const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

pub struct RedisStateStore {
    pool: Pool,
    increment_script: Script,
    compare_and_set_script: Script,
    compare_and_delete_script: Script,
}

impl RedisStateStore {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            increment_script: Script::new(INCREMENT_WITH_EXPIRY),
            compare_and_set_script: Script::new(COMPARE_AND_SET),
            compare_and_delete_script: Script::new(COMPARE_AND_DELETE),
        }
    }

    /// Build a pooled store from a `redis://` URL. No connection is opened
    /// until the first command.
    pub fn connect(url: &str) -> StoreResult<Self> {
        let pool = Config::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StoreError::BackendUnavailable(e.to_string()))?;
        Ok(Self::new(pool))
    }

    async fn conn(&self) -> StoreResult<Connection> {
        Ok(self.pool.get().await?)
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn get(&self, key: &StorageKey) -> StoreResult<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        let value: Option<Vec<u8>> = conn.get(key.as_str()).await?;
        Ok(value)
    }

    async fn set(&self, key: &StorageKey, value: &[u8], ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key.as_str()).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn delete(&self, key: &StorageKey) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.del(key.as_str()).await?;
        Ok(())
    }

    async fn increment_with_expiry(
        &self,
        key: &StorageKey,
        amount: i64,
        window: Duration,
    ) -> StoreResult<i64> {
        let mut conn = self.conn().await?;
        self.increment_script
            .key(key.as_str())
            .arg(amount)
            .arg(ttl_millis(window))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| match e.kind() {
                // INCRBY on a non-integer value
                redis::ErrorKind::ResponseError | redis::ErrorKind::ExtensionError => {
                    StoreError::InvalidValue {
                        key: key.to_string(),
                        reason: e.to_string(),
                    }
                }
                _ => StoreError::from(e),
            })
    }

    async fn compare_and_set(
        &self,
        key: &StorageKey,
        expected: Option<&[u8]>,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        match expected {
            None => {
                let mut cmd = redis::cmd("SET");
                cmd.arg(key.as_str()).arg(value).arg("NX");
                if let Some(ttl) = ttl {
                    cmd.arg("PX").arg(ttl_millis(ttl));
                }
                let reply: Option<String> = cmd.query_async(&mut conn).await?;
                Ok(reply.is_some())
            }
            Some(expected) => {
                let written: i64 = self
                    .compare_and_set_script
                    .key(key.as_str())
                    .arg(expected)
                    .arg(value)
                    .arg(ttl.map(ttl_millis).unwrap_or(0))
                    .invoke_async(&mut conn)
                    .await?;
                Ok(written == 1)
            }
        }
    }

    async fn compare_and_delete(&self, key: &StorageKey, expected: &[u8]) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = self
            .compare_and_delete_script
            .key(key.as_str())
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
