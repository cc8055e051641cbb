//! Redis-backed key-value store (optional).
//!
//! Uses the synchronous client: each operation checks out its own connection,
//! so the store holds no per-call state and can be shared across threads.
//! Pub/sub subscriptions run on a dedicated background thread per channel.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use redis::{Commands, Connection, RedisError};
use tracing::{debug, warn};

use super::r#trait::{KeyValueStore, StoreError, StoreResult, Subscription};

impl From<RedisError> for StoreError {
    fn from(value: RedisError) -> Self {
        let detail = value.detail().unwrap_or_default();
        if value.code() == Some("WRONGTYPE") {
            StoreError::WrongType(value.to_string())
        } else if detail.contains("not an integer") || detail.contains("would overflow") {
            StoreError::NotAnInteger(value.to_string())
        } else {
            StoreError::Unavailable(value.to_string())
        }
    }
}

/// Key-value store over a Redis server.
#[derive(Debug, Clone)]
pub struct RedisStore {
    client: Arc<redis::Client>,
}

impl RedisStore {
    /// Open a client for `redis_url` (e.g. `redis://localhost:6379/0`).
    ///
    /// No connection is made until the first command; call [`KeyValueStore::ping`]
    /// to verify reachability up front.
    pub fn open(redis_url: impl AsRef<str>) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url.as_ref())?;
        Ok(Self {
            client: Arc::new(client),
        })
    }

    fn conn(&self) -> StoreResult<Connection> {
        Ok(self.client.get_connection()?)
    }
}

/// How often an idle subscriber thread checks whether its [`Subscription`]
/// is still held.
const SUBSCRIBER_POLL: Duration = Duration::from_secs(1);

/// Milliseconds for `PX`, never zero (Redis rejects a zero expiry).
fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

impl KeyValueStore for RedisStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.conn()?.get(key)?)
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        cmd.query::<()>(&mut self.conn()?)?;
        Ok(())
    }

    fn set_if_absent(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        // `SET .. NX` replies OK when written and nil otherwise.
        let reply: Option<String> = cmd.query(&mut self.conn()?)?;
        Ok(reply.is_some())
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        let removed: u64 = self.conn()?.del(key)?;
        Ok(removed > 0)
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.conn()?.exists(key)?)
    }

    fn increment(&self, key: &str, by: i64) -> StoreResult<i64> {
        Ok(self.conn()?.incr(key, by)?)
    }

    fn decrement(&self, key: &str, by: i64) -> StoreResult<i64> {
        Ok(self.conn()?.decr(key, by)?)
    }

    fn hash_set(&self, key: &str, field: &str, value: &[u8]) -> StoreResult<()> {
        self.conn()?.hset::<_, _, _, ()>(key, field, value)?;
        Ok(())
    }

    fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.conn()?.hget(key, field)?)
    }

    fn hash_get_all(&self, key: &str) -> StoreResult<BTreeMap<String, Vec<u8>>> {
        Ok(self.conn()?.hgetall(key)?)
    }

    fn list_push_left(&self, key: &str, value: &[u8]) -> StoreResult<usize> {
        Ok(self.conn()?.lpush(key, value)?)
    }

    fn list_pop_right(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(redis::cmd("RPOP").arg(key).query(&mut self.conn()?)?)
    }

    fn list_len(&self, key: &str) -> StoreResult<usize> {
        Ok(self.conn()?.llen(key)?)
    }

    fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        // SCAN instead of KEYS so large keyspaces don't block the server.
        let mut conn = self.conn()?;
        let mut keys: Vec<String> = conn.scan_match::<_, String>(pattern)?.collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    fn publish(&self, channel: &str, payload: &[u8]) -> StoreResult<usize> {
        Ok(self.conn()?.publish(channel, payload)?)
    }

    fn subscribe(&self, channel: &str) -> StoreResult<Subscription> {
        let (tx, rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel::<StoreResult<()>>();

        let mut conn = self.conn()?;
        let channel_name = channel.to_string();
        let subscription = Subscription::new(channel, rx);
        let alive = subscription.liveness();

        thread::Builder::new()
            .name(format!("redis-sub:{channel}"))
            .spawn(move || {
                let mut pubsub = conn.as_pubsub();
                let subscribed = pubsub
                    .subscribe(&channel_name)
                    .and_then(|_| pubsub.set_read_timeout(Some(SUBSCRIBER_POLL)));
                if let Err(e) = subscribed {
                    let _ = ready_tx.send(Err(e.into()));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                loop {
                    let msg = match pubsub.get_message() {
                        Ok(m) => m,
                        Err(e) if e.is_timeout() => {
                            if alive.upgrade().is_none() {
                                debug!(channel = %channel_name, "subscription dropped, unsubscribing");
                                return;
                            }
                            continue;
                        }
                        Err(e) => {
                            warn!(channel = %channel_name, error = %e, "redis subscription closed");
                            return;
                        }
                    };

                    let payload: Vec<u8> = match msg.get_payload() {
                        Ok(p) => p,
                        Err(e) => {
                            debug!(channel = %channel_name, error = %e, "skipping non-binary payload");
                            continue;
                        }
                    };

                    if tx.send(payload).is_err() {
                        return;
                    }
                }
            })
            .map_err(|e| StoreError::unavailable(format!("failed to spawn subscriber: {e}")))?;

        ready_rx
            .recv()
            .map_err(|_| StoreError::unavailable("subscriber thread exited early"))??;

        Ok(subscription)
    }

    fn ping(&self) -> StoreResult<()> {
        redis::cmd("PING").query::<String>(&mut self.conn()?)?;
        Ok(())
    }
}
