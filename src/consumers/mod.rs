//! Consume messages from a RabbitMq queue.
//!
//! [`Consumer`] is the entrypoint: it pulls one message at a time, decodes it and hands it to a
//! [`Handler`]. The delivery is then acked, or nacked without requeue (dead-lettered), according
//! to the outcome.
mod consumer;
mod delivery;
mod handler;
mod outcome;

pub use consumer::{Consumer, ConsumerBuilder, ConsumerError, DEFAULT_PREFETCH_COUNT};
pub use delivery::{Acknowledger, Delivery};
pub use handler::{ClosureHandler, Handler};
pub use outcome::{BrokerAction, ProcessingError, ProcessingOutcome};
