//! Dedupe memory for CallHub
//!
//! Short-lived memory of recently seen `(owner, destination, time bucket)`
//! keys and call ids, used by the call record store to fold duplicate
//! webhook deliveries into updates instead of new sessions.
//!
//! Two implementations of [`callhub_core::traits::DedupeStore`]:
//!
//! - [`MemoryDedupeCache`] - lock-protected maps, one engine process
//! - [`RedisDedupeCache`] - shared Redis using `SET NX EX`, several processes

pub mod keys;
pub mod memory;
pub mod redis_store;

pub use memory::MemoryDedupeCache;
pub use redis_store::RedisDedupeCache;
