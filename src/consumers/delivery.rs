use crate::connection::TransportError;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use lapin::BasicProperties;

/// Settles a delivery with the broker.
///
/// AMQP requires each delivery to be settled exactly once: handlers never get to see the
/// acknowledger, the consumer loop settles the delivery according to the processing outcome.
#[async_trait::async_trait]
pub trait Acknowledger: Send + Sync + 'static {
    /// The message was processed: the broker can forget about it.
    async fn ack(&self) -> Result<(), TransportError>;

    /// The message was not processed. With `requeue: false` the broker dead-letters it
    /// according to the queue's arguments (or drops it if none are configured).
    async fn nack(&self, requeue: bool) -> Result<(), TransportError>;
}

#[async_trait::async_trait]
impl Acknowledger for lapin::acker::Acker {
    async fn ack(&self) -> Result<(), TransportError> {
        lapin::acker::Acker::ack(self, BasicAckOptions { multiple: false }).await?;
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<(), TransportError> {
        lapin::acker::Acker::nack(
            self,
            BasicNackOptions {
                multiple: false,
                requeue,
            },
        )
        .await?;
        Ok(())
    }
}

/// A received AMQP message.
pub struct Delivery {
    /// The delivery tag of the message.
    pub delivery_tag: u64,

    /// The routing key of the message.
    pub routing_key: String,

    /// Whether this message was redelivered.
    pub redelivered: bool,

    /// Contains the properties and the headers of the message.
    pub properties: BasicProperties,

    /// The payload of the message in binary format.
    pub data: Vec<u8>,

    pub(crate) acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub async fn ack(&self) -> Result<(), TransportError> {
        self.acker.ack().await
    }

    pub async fn nack(&self, requeue: bool) -> Result<(), TransportError> {
        self.acker.nack(requeue).await
    }

    /// The `message_id` property, if the publisher set one.
    pub fn message_id(&self) -> Option<&str> {
        self.properties.message_id().as_ref().map(|id| id.as_str())
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("routing_key", &self.routing_key)
            .field("redelivered", &self.redelivered)
            .field("properties", &self.properties)
            .field("data_len", &self.data.len())
            .finish()
    }
}

impl From<lapin::message::Delivery> for Delivery {
    fn from(value: lapin::message::Delivery) -> Self {
        Self {
            delivery_tag: value.delivery_tag,
            routing_key: value.routing_key.as_str().to_owned(),
            redelivered: value.redelivered,
            properties: value.properties,
            data: value.data,
            acker: Box::new(value.acker),
        }
    }
}
