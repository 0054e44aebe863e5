//! Facilities to publish messages to a RabbitMq queue. Check out [`Publisher`] as a starting point.
mod message_envelope;
mod publisher;

pub use message_envelope::{MessageEnvelope, JSON_CONTENT_TYPE, PERSISTENT};
pub use publisher::{Publisher, PublisherBuilder, PublisherError};
