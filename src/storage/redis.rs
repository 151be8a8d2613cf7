// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis backends for migration status and the syncer lock.
//!
//! Status records are stored as flat JSON strings, one key per resource type:
//! ```text
//! {prefix}migration_status:folders → {"resourceType":"folders","writeLegacy":true,...,"updateKey":3}
//! ```
//! Compare-and-set runs as a Lua script so the read of `updateKey` and the
//! write happen atomically on the server, whichever service instance calls it.
//!
//! Locks are plain `SET key holder NX PX <stale>` leases: an expired key is
//! the stale-lease takeover.

use std::time::Duration;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use tracing::debug;

use crate::resilience::retry::{retry, RetryConfig};
use crate::status::StatusRecord;
use super::traits::{LockService, StatusStore, StorageError};

const STATUS_KEY_SEGMENT: &str = "migration_status:";
const LOCK_KEY_SEGMENT: &str = "lock:";

/// KEYS[1] = status key, ARGV[1] = expected update key ("" = must not exist), ARGV[2] = new JSON
///
/// Writing the record that is already stored reports success, so a retry after
/// a lost reply does not look like a lost race.
const CAS_SCRIPT: &str = r"
local current = redis.call('GET', KEYS[1])
if current == ARGV[2] then
  return 1
end
if not current then
  if ARGV[1] == '' then
    redis.call('SET', KEYS[1], ARGV[2])
    return 1
  end
  return 0
end
if ARGV[1] == '' then
  return 0
end
local stored = cjson.decode(current)
if tostring(stored['updateKey']) == ARGV[1] then
  redis.call('SET', KEYS[1], ARGV[2])
  return 1
end
return 0
";

/// KEYS[1] = lock key, ARGV[1] = holder, ARGV[2] = stale-after millis
const ACQUIRE_SCRIPT: &str = r"
if redis.call('SET', KEYS[1], ARGV[1], 'NX', 'PX', ARGV[2]) then
  return 1
end
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('PEXPIRE', KEYS[1], ARGV[2])
  return 1
end
return 0
";

/// KEYS[1] = lock key, ARGV[1] = holder
const RELEASE_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
";

/// Open a connection manager, fast-failing on bad configuration.
pub async fn connect(connection_string: &str) -> Result<ConnectionManager, StorageError> {
    let client = Client::open(connection_string)
        .map_err(|e| StorageError::Backend(e.to_string()))?;

    retry("redis_connect", &RetryConfig::startup(), || async {
        ConnectionManager::new(client.clone()).await
    })
    .await
    .map_err(|e: redis::RedisError| StorageError::Backend(e.to_string()))
}

fn prefixed(prefix: &str, segment: &str, key: &str) -> String {
    format!("{}{}{}", prefix, segment, key)
}

pub struct RedisStatusStore {
    connection: ConnectionManager,
    /// Optional key prefix for namespacing (e.g., "myapp:")
    prefix: String,
    cas: Script,
}

impl RedisStatusStore {
    pub async fn new(connection_string: &str, prefix: Option<&str>) -> Result<Self, StorageError> {
        Ok(Self::from_connection(connect(connection_string).await?, prefix))
    }

    /// Share an existing connection (e.g. with [`RedisLockService`]).
    pub fn from_connection(connection: ConnectionManager, prefix: Option<&str>) -> Self {
        Self {
            connection,
            prefix: prefix.unwrap_or("").to_string(),
            cas: Script::new(CAS_SCRIPT),
        }
    }

    fn key(&self, resource_type: &str) -> String {
        prefixed(&self.prefix, STATUS_KEY_SEGMENT, resource_type)
    }
}

#[async_trait]
impl StatusStore for RedisStatusStore {
    async fn get(&self, resource_type: &str) -> Result<Option<StatusRecord>, StorageError> {
        let key = self.key(resource_type);
        let raw: Option<String> = retry("redis_status_get", &RetryConfig::query(), || {
            let mut conn = self.connection.clone();
            let key = key.clone();
            async move { conn.get(&key).await }
        })
        .await
        .map_err(|e: redis::RedisError| StorageError::Backend(e.to_string()))?;

        raw.map(|json| {
            serde_json::from_str(&json)
                .map_err(|e| StorageError::Backend(format!("Invalid status record for '{}': {}", resource_type, e)))
        })
        .transpose()
    }

    async fn compare_and_set(
        &self,
        resource_type: &str,
        expected: Option<i64>,
        record: &StatusRecord,
    ) -> Result<bool, StorageError> {
        let key = self.key(resource_type);
        let expected = expected.map(|k| k.to_string()).unwrap_or_default();
        let json = serde_json::to_string(record).map_err(|e| StorageError::Backend(e.to_string()))?;

        let written: i64 = retry("redis_status_cas", &RetryConfig::query(), || {
            let mut conn = self.connection.clone();
            let (script, key, expected, json) = (&self.cas, &key, &expected, &json);
            async move {
                let mut invocation = script.prepare_invoke();
                invocation.key(key).arg(expected).arg(json);
                invocation.invoke_async(&mut conn).await
            }
        })
        .await
        .map_err(|e: redis::RedisError| StorageError::Backend(e.to_string()))?;

        debug!(resource_type, written = written == 1, "Status compare-and-set");
        Ok(written == 1)
    }
}

pub struct RedisLockService {
    connection: ConnectionManager,
    prefix: String,
    acquire: Script,
    release: Script,
}

impl RedisLockService {
    pub async fn new(connection_string: &str, prefix: Option<&str>) -> Result<Self, StorageError> {
        Ok(Self::from_connection(connect(connection_string).await?, prefix))
    }

    pub fn from_connection(connection: ConnectionManager, prefix: Option<&str>) -> Self {
        Self {
            connection,
            prefix: prefix.unwrap_or("").to_string(),
            acquire: Script::new(ACQUIRE_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
        }
    }

    fn key(&self, key: &str) -> String {
        prefixed(&self.prefix, LOCK_KEY_SEGMENT, key)
    }
}

#[async_trait]
impl LockService for RedisLockService {
    async fn try_acquire(&self, key: &str, holder: &str, stale_after: Duration) -> Result<bool, StorageError> {
        let key = self.key(key);
        let ttl_ms = stale_after.as_millis().max(1) as u64;

        let acquired: i64 = retry("redis_lock_acquire", &RetryConfig::query(), || {
            let mut conn = self.connection.clone();
            let (script, key) = (&self.acquire, &key);
            async move {
                let mut invocation = script.prepare_invoke();
                invocation.key(key).arg(holder).arg(ttl_ms);
                invocation.invoke_async(&mut conn).await
            }
        })
        .await
        .map_err(|e: redis::RedisError| StorageError::Backend(e.to_string()))?;

        Ok(acquired == 1)
    }

    async fn release(&self, key: &str, holder: &str) -> Result<(), StorageError> {
        let key = self.key(key);
        let _: i64 = retry("redis_lock_release", &RetryConfig::query(), || {
            let mut conn = self.connection.clone();
            let (script, key) = (&self.release, &key);
            async move {
                let mut invocation = script.prepare_invoke();
                invocation.key(key).arg(holder);
                invocation.invoke_async(&mut conn).await
            }
        })
        .await
        .map_err(|e: redis::RedisError| StorageError::Backend(e.to_string()))?;
        Ok(())
    }
}
