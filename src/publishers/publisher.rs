use crate::amqp::ConnectionFactory;
use crate::connection::{
    BrokerChannel, ChannelOf, Confirmation, ConnectionManager, Transport, TransportError,
};
use crate::publishers::MessageEnvelope;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};
use uuid::Uuid;

/// A high-level interface to publish messages to a queue.
///
/// # Fault tolerance
///
/// Every publish starts with [`ConnectionManager::ensure_connection`]: a closed channel or
/// connection is replaced before sending.
/// If the channel or the connection breaks while the message is being sent, the publisher asks
/// for a fresh channel and sends the message again, once. A second failure is returned to the
/// caller.
///
/// Negative acknowledgements, unroutable messages and timeouts are not retried.
///
/// # How do I build a `Publisher`?
///
/// `Publisher` provides a fluent API to add configuration step-by-step, known as
/// "builder pattern" in Rust.
/// The starting point is [`Publisher::builder`].
pub struct Publisher<T: Transport = ConnectionFactory> {
    manager: Arc<ConnectionManager<T>>,
    /// Timeout on each publishing attempt.
    timeout: Duration,
}

impl<T: Transport> Publisher<T> {
    /// Start building a [`Publisher`].
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use user_onboarding::amqp::configuration::RabbitMqSettings;
    /// use user_onboarding::amqp::ConnectionFactory;
    /// use user_onboarding::connection::ConnectionManager;
    /// use user_onboarding::publishers::Publisher;
    ///
    /// pub fn get_publisher() -> Publisher {
    ///     let settings = RabbitMqSettings::default();
    ///     let connection_factory = ConnectionFactory::new_from_config(&settings).unwrap();
    ///     let manager = Arc::new(ConnectionManager::new(connection_factory));
    ///
    ///     Publisher::builder(manager)
    ///         .publish_timeout(std::time::Duration::from_secs(3))
    ///         .build()
    /// }
    /// ```
    pub fn builder(manager: Arc<ConnectionManager<T>>) -> PublisherBuilder<T> {
        PublisherBuilder::new(manager)
    }

    /// Serialize `message` as JSON and publish it, as a persistent message, to `queue_name`.
    pub async fn publish<M: Serialize + ?Sized>(
        &self,
        queue_name: &str,
        message: &M,
    ) -> Result<(), PublisherError> {
        let envelope =
            MessageEnvelope::json(queue_name, message).map_err(PublisherError::Serialization)?;
        self.publish_envelope(envelope).await
    }

    /// Publish a pre-built message.
    ///
    /// A `message_id` and a `timestamp` are added to the message properties, unless already set.
    #[tracing::instrument(
        name = "publish_message",
        skip_all,
        fields(queue_name = %envelope.routing_key)
    )]
    pub async fn publish_envelope(&self, envelope: MessageEnvelope) -> Result<(), PublisherError> {
        let envelope = inject_amqp_properties(envelope);

        let first_attempt = {
            let channel = self.manager.ensure_connection().await?;
            self.send(&channel, &envelope).await
        };
        let outcome = match first_attempt {
            Err(PublisherError::Transport(e)) if e.is_transient() => {
                warn!(error = %e, "Publishing failed on a broken channel, retrying once");
                let channel = self.manager.ensure_connection().await?;
                self.send(&channel, &envelope).await
            }
            outcome => outcome,
        };

        match &outcome {
            Ok(()) => info!(
                message_id = envelope.properties.message_id().as_ref().map(|id| id.as_str()),
                "Message published"
            ),
            Err(e) => tracing::error!(error = %e, "Failed to publish message"),
        }
        outcome
    }

    async fn send(
        &self,
        channel: &ChannelOf<T>,
        envelope: &MessageEnvelope,
    ) -> Result<(), PublisherError> {
        // Publishing and waiting for the confirmation are put under the same timeout.
        let publish_future = channel.publish(
            "",
            &envelope.routing_key,
            &envelope.payload,
            envelope.properties.clone(),
        );
        let confirmation = tokio::time::timeout(self.timeout, publish_future)
            .await
            .map_err(|_| PublisherError::Timeout)??;

        match confirmation {
            Confirmation::Ack | Confirmation::NotRequested => Ok(()),
            Confirmation::Nack => Err(PublisherError::NegativeAck),
            Confirmation::Returned {
                reply_code,
                reply_text,
            } => Err(PublisherError::Unroutable {
                routing_key: envelope.routing_key.clone(),
                reply_code,
                reply_text,
            }),
        }
    }
}

/// Error returned when trying to publish a message using `Publisher`.
#[derive(thiserror::Error, Debug)]
pub enum PublisherError {
    #[error("Failed to serialize the message")]
    Serialization(#[source] serde_json::Error),
    #[error("Error encountered when interacting with the RabbitMq broker")]
    Transport(#[from] TransportError),
    #[error("The timeout threshold was reached while trying to publish the message")]
    Timeout,
    #[error("The message could not be routed to queue {routing_key}: {reply_code} {reply_text}")]
    Unroutable {
        routing_key: String,
        reply_code: u16,
        reply_text: String,
    },
    #[error("The RabbitMq broker nacked the publishing of the message")]
    NegativeAck,
}

/// A builder for [`Publisher`].
///
/// Use [`Publisher::builder`] as entrypoint.
pub struct PublisherBuilder<T: Transport> {
    manager: Arc<ConnectionManager<T>>,
    timeout: Duration,
}

impl<T: Transport> PublisherBuilder<T> {
    fn new(manager: Arc<ConnectionManager<T>>) -> Self {
        Self {
            manager,
            timeout: Duration::from_secs(3),
        }
    }

    /// Timeout applied when attempting to publish a message.
    /// Defaults to 3 seconds if left unspecified.
    #[must_use]
    pub fn publish_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Finalise the builder and get an instance of [`Publisher`].
    pub fn build(self) -> Publisher<T> {
        Publisher {
            manager: self.manager,
            timeout: self.timeout,
        }
    }
}

fn inject_amqp_properties(mut envelope: MessageEnvelope) -> MessageEnvelope {
    let current_timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|ct| ct.as_secs());

    let props = envelope.properties;
    let props = if let Some(ct) = current_timestamp {
        let ts = *props.timestamp();
        props.with_timestamp(ts.unwrap_or(ct))
    } else {
        warn!("System time is before 1970");
        props
    };

    let message_id = props.message_id().clone();
    envelope.properties =
        props.with_message_id(message_id.unwrap_or_else(|| Uuid::new_v4().to_string().into()));

    envelope
}
