use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard, mpsc};
use std::time::{Duration, Instant};

use super::glob::glob_match;
use super::r#trait::{KeyValueStore, StoreError, StoreResult, Subscription};

#[derive(Debug, Clone)]
enum Value {
    Bytes(Vec<u8>),
    Hash(BTreeMap<String, Vec<u8>>),
    List(VecDeque<Vec<u8>>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

type Entries = HashMap<String, Entry>;

/// In-memory key-value store for tests/dev.
///
/// Mirrors the Redis semantics the services rely on: per-key expiry (checked
/// lazily on access), typed values, empty lists disappearing, and fire-and-forget
/// pub/sub that only reaches subscribers attached at publish time.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<Entries>,
    channels: Mutex<HashMap<String, Vec<mpsc::Sender<Vec<u8>>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Entries>> {
        self.entries
            .read()
            .map_err(|_| StoreError::unavailable("in-memory store lock poisoned"))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Entries>> {
        self.entries
            .write()
            .map_err(|_| StoreError::unavailable("in-memory store lock poisoned"))
    }

    fn live<'a>(entries: &'a Entries, key: &str) -> Option<&'a Entry> {
        entries
            .get(key)
            .filter(|entry| !entry.is_expired(Instant::now()))
    }

    /// Mutable access to a live entry, evicting it first if it has expired.
    fn live_mut<'a>(entries: &'a mut Entries, key: &str) -> Option<&'a mut Entry> {
        if entries
            .get(key)
            .is_some_and(|entry| entry.is_expired(Instant::now()))
        {
            entries.remove(key);
        }
        entries.get_mut(key)
    }

    fn add(&self, key: &str, delta: i64) -> StoreResult<i64> {
        let mut entries = self.write()?;
        let (current, expires_at) = match Self::live_mut(&mut entries, key) {
            None => (0, None),
            Some(Entry {
                value: Value::Bytes(bytes),
                expires_at,
            }) => {
                let parsed = std::str::from_utf8(bytes)
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok())
                    .ok_or_else(|| StoreError::NotAnInteger(key.to_string()))?;
                (parsed, *expires_at)
            }
            Some(_) => return Err(StoreError::WrongType(key.to_string())),
        };

        let next = current
            .checked_add(delta)
            .ok_or_else(|| StoreError::NotAnInteger(key.to_string()))?;

        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Bytes(next.to_string().into_bytes()),
                expires_at,
            },
        );
        Ok(next)
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let entries = self.read()?;
        match Self::live(&entries, key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Bytes(bytes),
                ..
            }) => Ok(Some(bytes.clone())),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()> {
        let mut entries = self.write()?;
        entries.insert(key.to_string(), Entry::new(Value::Bytes(value.to_vec()), ttl));
        Ok(())
    }

    fn set_if_absent(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<bool> {
        let mut entries = self.write()?;
        if Self::live_mut(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(key.to_string(), Entry::new(Value::Bytes(value.to_vec()), ttl));
        Ok(true)
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut entries = self.write()?;
        Ok(Self::live_mut(&mut entries, key).is_some() && entries.remove(key).is_some())
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        let entries = self.read()?;
        Ok(Self::live(&entries, key).is_some())
    }

    fn increment(&self, key: &str, by: i64) -> StoreResult<i64> {
        self.add(key, by)
    }

    fn decrement(&self, key: &str, by: i64) -> StoreResult<i64> {
        let delta = by
            .checked_neg()
            .ok_or_else(|| StoreError::NotAnInteger(key.to_string()))?;
        self.add(key, delta)
    }

    fn hash_set(&self, key: &str, field: &str, value: &[u8]) -> StoreResult<()> {
        let mut entries = self.write()?;
        match Self::live_mut(&mut entries, key) {
            None => {
                let mut hash = BTreeMap::new();
                hash.insert(field.to_string(), value.to_vec());
                entries.insert(key.to_string(), Entry::new(Value::Hash(hash), None));
                Ok(())
            }
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => {
                hash.insert(field.to_string(), value.to_vec());
                Ok(())
            }
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<Vec<u8>>> {
        let entries = self.read()?;
        match Self::live(&entries, key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => Ok(hash.get(field).cloned()),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn hash_get_all(&self, key: &str) -> StoreResult<BTreeMap<String, Vec<u8>>> {
        let entries = self.read()?;
        match Self::live(&entries, key) {
            None => Ok(BTreeMap::new()),
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => Ok(hash.clone()),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn list_push_left(&self, key: &str, value: &[u8]) -> StoreResult<usize> {
        let mut entries = self.write()?;
        match Self::live_mut(&mut entries, key) {
            None => {
                let mut list = VecDeque::new();
                list.push_front(value.to_vec());
                entries.insert(key.to_string(), Entry::new(Value::List(list), None));
                Ok(1)
            }
            Some(Entry {
                value: Value::List(list),
                ..
            }) => {
                list.push_front(value.to_vec());
                Ok(list.len())
            }
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn list_pop_right(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut entries = self.write()?;
        let (popped, now_empty) = match Self::live_mut(&mut entries, key) {
            None => return Ok(None),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => {
                let popped = list.pop_back();
                (popped, list.is_empty())
            }
            Some(_) => return Err(StoreError::WrongType(key.to_string())),
        };

        // An emptied list ceases to exist, as in Redis.
        if now_empty {
            entries.remove(key);
        }
        Ok(popped)
    }

    fn list_len(&self, key: &str) -> StoreResult<usize> {
        let entries = self.read()?;
        match Self::live(&entries, key) {
            None => Ok(0),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => Ok(list.len()),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let entries = self.read()?;
        let now = Instant::now();
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(key, entry)| !entry.is_expired(now) && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn publish(&self, channel: &str, payload: &[u8]) -> StoreResult<usize> {
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| StoreError::unavailable("in-memory channel lock poisoned"))?;

        let Some(subscribers) = channels.get_mut(channel) else {
            return Ok(0);
        };

        // Drop any dead subscribers while publishing.
        subscribers.retain(|tx| tx.send(payload.to_vec()).is_ok());
        Ok(subscribers.len())
    }

    fn subscribe(&self, channel: &str) -> StoreResult<Subscription> {
        let (tx, rx) = mpsc::channel();
        self.channels
            .lock()
            .map_err(|_| StoreError::unavailable("in-memory channel lock poisoned"))?
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(Subscription::new(channel, rx))
    }

    fn ping(&self) -> StoreResult<()> {
        self.read().map(|_| ())
    }
}
