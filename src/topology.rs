//! Declare a work queue together with its dead letter queue.
//!
//! ```text
//!   publisher ──► <queue_name> ──nack(requeue: false)──► <queue_name>_dlq
//!                 durable, TTL 1h                         durable, TTL 24h
//! ```
//!
//! Dead-lettering goes through the default exchange, with the dead letter queue name as routing
//! key: no exchange or binding needs to be declared.
use crate::connection::{BrokerChannel, ConnectionManager, Transport, TransportError};
use amq_protocol_types::{AMQPValue, FieldTable};
use std::time::Duration;

/// The queue carrying onboarding messages from the API to the worker.
pub const USER_ONBOARDING_QUEUE: &str = "user_onboarding_queue";

pub const DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
pub const DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";
pub const MESSAGE_TTL: &str = "x-message-ttl";

/// The shape of a work queue and of its dead letter queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueTopology {
    pub queue_name: String,
    /// How long a message can wait in the work queue before the broker dead-letters it.
    pub message_ttl: Duration,
    /// How long a message is retained in the dead letter queue before being dropped.
    pub dead_letter_ttl: Duration,
}

impl QueueTopology {
    /// A topology with the default retention: 1 hour in the work queue, 24 hours in the dead
    /// letter queue.
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            message_ttl: Duration::from_secs(60 * 60),
            dead_letter_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// The dead letter queue name is derived from the work queue name: `<queue_name>_dlq`.
    pub fn dead_letter_queue_name(&self) -> String {
        format!("{}_dlq", self.queue_name)
    }

    /// Arguments of the work queue: message TTL and dead-lettering to the paired queue through
    /// the default exchange.
    pub fn queue_arguments(&self) -> FieldTable {
        let mut args = FieldTable::default();
        args.insert(MESSAGE_TTL.into(), ttl(self.message_ttl));
        args.insert(DEAD_LETTER_EXCHANGE.into(), AMQPValue::LongString("".into()));
        args.insert(
            DEAD_LETTER_ROUTING_KEY.into(),
            AMQPValue::LongString(self.dead_letter_queue_name().into()),
        );
        args
    }

    /// Arguments of the dead letter queue: message TTL only, it is a terminal sink.
    pub fn dead_letter_queue_arguments(&self) -> FieldTable {
        let mut args = FieldTable::default();
        args.insert(MESSAGE_TTL.into(), ttl(self.dead_letter_ttl));
        args
    }
}

impl Default for QueueTopology {
    fn default() -> Self {
        Self::new(USER_ONBOARDING_QUEUE)
    }
}

fn ttl(duration: Duration) -> AMQPValue {
    AMQPValue::LongInt(i32::try_from(duration.as_millis()).unwrap_or(i32::MAX))
}

#[derive(thiserror::Error, Debug)]
pub enum TopologyError {
    /// The queue already exists with different arguments. Retrying won't help: the queue must be
    /// deleted (or the topology changed) first.
    #[error("Queue {queue_name} already exists with incompatible arguments.")]
    Conflict {
        queue_name: String,
        #[source]
        source: TransportError,
    },
    #[error("Failed to declare queue {queue_name}.")]
    Transport {
        queue_name: String,
        #[source]
        source: TransportError,
    },
}

impl TopologyError {
    fn new(queue_name: &str, source: TransportError) -> Self {
        let queue_name = queue_name.to_owned();
        match source {
            TransportError::PreconditionFailed(_) => Self::Conflict { queue_name, source },
            source => Self::Transport { queue_name, source },
        }
    }
}

/// Declare the dead letter queue, then the work queue.
///
/// Declaring an identical topology again is a no-op. Declaring a queue that already exists with
/// different arguments fails with [`TopologyError::Conflict`].
#[tracing::instrument(name = "declare_topology", skip_all, fields(queue_name = %topology.queue_name))]
pub async fn declare_topology<T: Transport>(
    manager: &ConnectionManager<T>,
    topology: &QueueTopology,
) -> Result<(), TopologyError> {
    let dead_letter_queue_name = topology.dead_letter_queue_name();
    let queues = [
        (
            dead_letter_queue_name.as_str(),
            topology.dead_letter_queue_arguments(),
        ),
        (topology.queue_name.as_str(), topology.queue_arguments()),
    ];

    for (queue_name, arguments) in queues {
        let channel = manager
            .ensure_connection()
            .await
            .map_err(|e| TopologyError::new(queue_name, e))?;
        if let Err(e) = channel.declare_queue(queue_name, arguments).await {
            tracing::error!(error = %e, queue_name, "Failed to declare queue");
            return Err(TopologyError::new(queue_name, e));
        }
        tracing::info!(queue_name, "Queue declared");
    }
    Ok(())
}
