//! Response cache backends beyond the in-memory map in `ideaforge-core`.

pub mod redis;

pub use self::redis::RedisResponseCache;
