//! Durable room/peer mirror.
//!
//! - `kv` - key-value contract and in-memory mock
//! - `redis_store` - Redis implementation
//! - `room_storage` - room/peer key layout and cleanup
//! - `mirror` - ordered non-blocking writer used by the hub

pub mod kv;
mod mirror;
mod redis_store;
mod room_storage;

pub use kv::KeyValueStore;
pub use mirror::{MirrorHandle, MirrorOp, StorageMirror, MIRROR_CHANNEL_BUFFER};
pub use redis_store::RedisKeyValueStore;
pub use room_storage::{CleanupReport, RoomStorage, DEFAULT_ROOM_TTL};
