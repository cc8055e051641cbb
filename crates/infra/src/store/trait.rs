use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::sync::mpsc::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use thiserror::Error;

/// Error surfaced by a key-value store adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store could not be reached or failed to execute the command.
    ///
    /// Transient: callers may retry with backoff.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The key holds a value of another kind (e.g. `INCRBY` on a hash).
    #[error("wrong value type for key {0}")]
    WrongType(String),

    /// A counter operation hit a non-integer value or would overflow `i64`
    /// (Redis `ERR value is not an integer or out of range`).
    #[error("value at {0} is not an integer or out of range")]
    NotAnInteger(String),
}

impl StoreError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A subscription to one pub/sub channel.
///
/// Payloads arrive in publish order. Dropping the subscription detaches it
/// from the channel (the store stops forwarding on its next publish).
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    receiver: Receiver<Vec<u8>>,
    alive: Arc<()>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, receiver: Receiver<Vec<u8>>) -> Self {
        Self {
            channel: channel.into(),
            receiver,
            alive: Arc::new(()),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Token that stops upgrading once the subscription is dropped.
    ///
    /// Background forwarders poll it so they can exit on a quiet channel,
    /// where a failed send would never be attempted.
    pub fn liveness(&self) -> Weak<()> {
        Arc::downgrade(&self.alive)
    }

    /// Block until the next payload is available.
    pub fn recv(&self) -> Result<Vec<u8>, RecvError> {
        self.receiver.recv()
    }

    pub fn try_recv(&self) -> Result<Vec<u8>, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a payload.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Vec<u8>, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Capability interface over a shared, network-accessible key-value store.
///
/// Every operation touches a single key (or channel) and relies on the
/// store's own atomicity; implementations perform no client-side locking
/// beyond what is needed to guard their own in-process state.
///
/// ## Value kinds
///
/// A key holds exactly one kind of value: plain bytes (`get`/`set`, counters),
/// a hash (`hash_*`) or a list (`list_*`). Using an operation of another kind
/// on an existing key yields [`StoreError::WrongType`].
///
/// ## Expiry
///
/// `ttl` applies to the whole key. Writing with `ttl: None` clears any
/// previous expiry, the same as a plain Redis `SET`.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()>;

    /// Write only if the key does not exist yet. Returns whether it was written.
    fn set_if_absent(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<bool>;

    /// Delete a key of any kind. Returns whether something was removed.
    fn delete(&self, key: &str) -> StoreResult<bool>;

    fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Atomically add `by` to the integer at `key` (missing keys start at 0).
    fn increment(&self, key: &str, by: i64) -> StoreResult<i64>;

    fn decrement(&self, key: &str, by: i64) -> StoreResult<i64>;

    fn hash_set(&self, key: &str, field: &str, value: &[u8]) -> StoreResult<()>;

    fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<Vec<u8>>>;

    /// All fields of a hash; empty when the key does not exist.
    fn hash_get_all(&self, key: &str) -> StoreResult<BTreeMap<String, Vec<u8>>>;

    /// Push onto the head of a list. Returns the new list length.
    fn list_push_left(&self, key: &str, value: &[u8]) -> StoreResult<usize>;

    /// Pop from the tail of a list.
    fn list_pop_right(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    fn list_len(&self, key: &str) -> StoreResult<usize>;

    /// Keys matching a glob (`*`, `?`). Not a snapshot: concurrent writers may
    /// add or remove matching keys while the enumeration runs.
    fn keys(&self, pattern: &str) -> StoreResult<Vec<String>>;

    /// Publish to a channel. Returns the number of subscribers reached.
    fn publish(&self, channel: &str, payload: &[u8]) -> StoreResult<usize>;

    fn subscribe(&self, channel: &str) -> StoreResult<Subscription>;

    fn ping(&self) -> StoreResult<()>;
}

impl<S> KeyValueStore for Arc<S>
where
    S: KeyValueStore + ?Sized,
{
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()> {
        (**self).set(key, value, ttl)
    }

    fn set_if_absent(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<bool> {
        (**self).set_if_absent(key, value, ttl)
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        (**self).delete(key)
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        (**self).exists(key)
    }

    fn increment(&self, key: &str, by: i64) -> StoreResult<i64> {
        (**self).increment(key, by)
    }

    fn decrement(&self, key: &str, by: i64) -> StoreResult<i64> {
        (**self).decrement(key, by)
    }

    fn hash_set(&self, key: &str, field: &str, value: &[u8]) -> StoreResult<()> {
        (**self).hash_set(key, field, value)
    }

    fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<Vec<u8>>> {
        (**self).hash_get(key, field)
    }

    fn hash_get_all(&self, key: &str) -> StoreResult<BTreeMap<String, Vec<u8>>> {
        (**self).hash_get_all(key)
    }

    fn list_push_left(&self, key: &str, value: &[u8]) -> StoreResult<usize> {
        (**self).list_push_left(key, value)
    }

    fn list_pop_right(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        (**self).list_pop_right(key)
    }

    fn list_len(&self, key: &str) -> StoreResult<usize> {
        (**self).list_len(key)
    }

    fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        (**self).keys(pattern)
    }

    fn publish(&self, channel: &str, payload: &[u8]) -> StoreResult<usize> {
        (**self).publish(channel, payload)
    }

    fn subscribe(&self, channel: &str) -> StoreResult<Subscription> {
        (**self).subscribe(channel)
    }

    fn ping(&self) -> StoreResult<()> {
        (**self).ping()
    }
}
