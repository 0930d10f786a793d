//! Shared counter store backed by Redis.
//!
//! Counters and blocks are ordinary Redis keys with millisecond TTLs, so every
//! process pointed at the same Redis database and namespace enforces one
//! combined limit per identity. The whole check runs as a single server-side
//! script: Redis executes scripts atomically, which serializes concurrent
//! checks for the same identity and guarantees the window expiry is set in the
//! same step as the first increment.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{IntoConnectionInfo, Script};
use tracing::{debug, info, trace, warn};

use super::identity::Identity;
use super::policy::Policy;
use super::store::{Admission, CounterStore, StoreError};
use crate::config::SharedStoreConfig;

/// KEYS[1] = block key, KEYS[2] = count key
/// ARGV[1] = limit, ARGV[2] = window in ms, ARGV[3] = block duration in ms
///
/// Durations are passed through to `PEXPIRE`/`SET PX` as integer strings and
/// never converted to script numbers.
///
/// Returns `{allowed, remaining}` with `allowed` as 0 or 1.
const ALLOW_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return {0, 0}
end

local count = redis.call('INCR', KEYS[2])
if count == 1 or redis.call('PTTL', KEYS[2]) < 0 then
  redis.call('PEXPIRE', KEYS[2], ARGV[2])
end

local limit = tonumber(ARGV[1])
if count > limit then
  redis.call('DEL', KEYS[2])
  if ARGV[3] ~= '0' then
    redis.call('SET', KEYS[1], '1', 'PX', ARGV[3])
  end
  return {0, 0}
end

return {1, limit - count}
"#;

/// Redis-backed counter store for multi-process deployments.
#[derive(Clone)]
pub struct SharedStore {
    conn: MultiplexedConnection,
    script: Script,
    namespace: String,
    command_timeout: Duration,
}

impl SharedStore {
    /// Connect to the Redis server described by `config`.
    pub async fn connect(config: &SharedStoreConfig) -> Result<Self, StoreError> {
        let url = format!("redis://{}/{}", config.address, config.database);
        let mut info = url
            .into_connection_info()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        info.redis.username = config.username.clone();
        info.redis.password = config.password.clone();

        let client = redis::Client::open(info).map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let command_timeout = config.command_timeout();
        let conn = tokio::time::timeout(command_timeout, client.get_multiplexed_tokio_connection())
            .await
            .map_err(|_| StoreError::Timeout(command_timeout))?
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        info!(
            address = %config.address,
            database = config.database,
            namespace = %config.namespace,
            "Connected to shared counter store"
        );

        Ok(Self::from_connection(conn, &config.namespace, command_timeout))
    }

    /// Wrap an existing connection.
    pub fn from_connection(
        conn: MultiplexedConnection,
        namespace: &str,
        command_timeout: Duration,
    ) -> Self {
        Self {
            conn,
            script: Script::new(ALLOW_SCRIPT),
            namespace: namespace.to_string(),
            command_timeout,
        }
    }
}

fn count_key(namespace: &str, identity: &Identity) -> String {
    format!("{}:count:{}", namespace, identity.storage_key())
}

fn block_key(namespace: &str, identity: &Identity) -> String {
    format!("{}:block:{}", namespace, identity.storage_key())
}

/// A zero TTL expires the key on the spot, so every TTL is at least 1ms.
fn ttl_millis(duration: Duration) -> u64 {
    (duration.as_millis() as u64).max(1)
}

/// `KEYS` for the allow script, in script order.
fn script_keys(namespace: &str, identity: &Identity) -> [String; 2] {
    [block_key(namespace, identity), count_key(namespace, identity)]
}

/// `ARGV` for the allow script, in script order. A zero block duration is sent
/// as `"0"` and establishes no block.
fn script_args(policy: &Policy) -> [String; 3] {
    let block_ms = if policy.block_duration().is_zero() {
        0
    } else {
        ttl_millis(policy.block_duration())
    };
    [
        policy.limit().to_string(),
        ttl_millis(policy.window()).to_string(),
        block_ms.to_string(),
    ]
}

#[async_trait]
impl CounterStore for SharedStore {
    async fn allow(&self, identity: &Identity, policy: &Policy) -> Result<Admission, StoreError> {
        let [block_key, count_key] = script_keys(&self.namespace, identity);
        let [limit, window_ms, block_ms] = script_args(policy);

        let mut conn = self.conn.clone();
        let mut invocation = self.script.key(block_key);
        invocation
            .key(count_key)
            .arg(limit)
            .arg(window_ms)
            .arg(block_ms);

        let reply: (i64, i64) = tokio::time::timeout(
            self.command_timeout,
            invocation.invoke_async(&mut conn),
        )
        .await
        .map_err(|_| {
            warn!(identity = %identity, "Shared counter store timed out");
            StoreError::Timeout(self.command_timeout)
        })?
        .map_err(|e: redis::RedisError| {
            warn!(identity = %identity, error = %e, "Shared counter store unavailable");
            StoreError::Unavailable(e.to_string())
        })?;

        let admission = match reply {
            (1, remaining) => Admission::allowed(remaining.max(0) as u64),
            _ => {
                debug!(identity = %identity, "Shared store denied request");
                Admission::denied()
            }
        };
        trace!(identity = %identity, ?admission, "Shared store decision");
        Ok(admission)
    }
}

impl std::fmt::Debug for SharedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStore")
            .field("namespace", &self.namespace)
            .field("command_timeout", &self.command_timeout)
            .finish_non_exhaustive()
    }
}
