//! Key-value store boundary.
//!
//! The services in this crate never talk to Redis directly: they are generic
//! over [`KeyValueStore`], injected at construction. Tests and local runs use
//! [`InMemoryStore`]; production uses `RedisStore` (feature `redis`).

pub mod glob;
pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod r#trait;

pub use in_memory::InMemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
pub use r#trait::{KeyValueStore, StoreError, StoreResult, Subscription};
