//! Durable event bus backends, layered on top of `escore_events::EventBus`.

#[cfg(feature = "redis")]
mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::{RedisStreamsError, RedisStreamsEventBus};
