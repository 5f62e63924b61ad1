//! Store adapters that satisfy the domain storage traits: a Redis client
//! shared by every worker, and an in-memory store for tests and local runs.

mod errors;
mod memory_store;
mod redis_store;

pub use memory_store::MemoryCounterStore;
pub use redis_store::RedisCounterStore;
