//! Message broker plumbing: message envelopes, the publish helper used by the
//! scheduler and the events service, and a Redis list transport with
//! per-message expiration.

pub mod consumer;
pub mod envelope;
pub mod memory;
pub mod publisher;
pub mod redis_transport;

pub use consumer::{MessageHandler, QueueConsumer};
pub use envelope::{Envelope, UrlFetchItem};
pub use memory::InMemoryTransport;
pub use publisher::{BrokerPublisher, Transport};
pub use redis_transport::RedisTransport;
