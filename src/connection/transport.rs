use crate::connection::TransportError;
use crate::consumers::Delivery;
use amq_protocol_types::FieldTable;
use futures_util::stream::BoxStream;
use lapin::BasicProperties;

/// The stream of deliveries pushed by the broker to a consumer.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, TransportError>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// What the broker told us about a published message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Confirmation {
    /// The broker took responsibility for the message.
    Ack,
    /// The broker refused to take responsibility for the message.
    Nack,
    /// The message was returned to us, e.g. because no queue matched the routing key.
    Returned { reply_code: u16, reply_text: String },
    /// Publisher confirms are disabled on the channel.
    NotRequested,
}

/// `Transport` defines an interface for types that are capable of opening a connection
/// to the broker.
///
/// [`ConnectionFactory`](crate::amqp::ConnectionFactory) is the RabbitMq implementation.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    type Connection: BrokerConnection;

    /// Open a new connection.
    ///
    /// Implementations are free to retry internally, but they must give up after a bounded
    /// number of attempts and surface the last failure.
    async fn connect(&self) -> Result<Self::Connection, TransportError>;
}

/// A "physical" connection to the broker, multiplexing logical channels.
#[async_trait::async_trait]
pub trait BrokerConnection: Send + Sync + 'static {
    type Channel: BrokerChannel;

    fn status(&self) -> HealthStatus;

    async fn open_channel(&self) -> Result<Self::Channel, TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

/// A logical channel on top of a [`BrokerConnection`].
///
/// All publishing goes through the default exchange semantics of AMQP 0-9-1: with an empty
/// exchange name the routing key is the name of the destination queue.
#[async_trait::async_trait]
pub trait BrokerChannel: Clone + Send + Sync + 'static {
    fn status(&self) -> HealthStatus;

    /// Declare a durable queue with the given arguments.
    ///
    /// Redeclaring a queue with identical arguments is a no-op, redeclaring it with different
    /// arguments fails with [`TransportError::PreconditionFailed`].
    async fn declare_queue(
        &self,
        queue_name: &str,
        arguments: FieldTable,
    ) -> Result<(), TransportError>;

    /// The number of messages ready for delivery in an existing queue.
    async fn queue_depth(&self, queue_name: &str) -> Result<u32, TransportError>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<Confirmation, TransportError>;

    /// Register a manual-acknowledgement consumer on a queue.
    ///
    /// At most `prefetch_count` deliveries are in flight (unacknowledged) at any time.
    async fn consume(
        &self,
        queue_name: &str,
        consumer_tag: &str,
        prefetch_count: u16,
    ) -> Result<DeliveryStream, TransportError>;

    /// Stop the broker from pushing new deliveries to a consumer.
    async fn cancel(&self, consumer_tag: &str) -> Result<(), TransportError>;

    /// Pull a single message from a queue, if any. The delivery must be acknowledged.
    async fn fetch(&self, queue_name: &str) -> Result<Option<Delivery>, TransportError>;
}
