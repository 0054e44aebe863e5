use amq_protocol_types::ShortString;
use lapin::BasicProperties;
use serde::Serialize;

/// `delivery_mode` of messages that survive a broker restart (when sent to a durable queue).
pub const PERSISTENT: u8 = 2;

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A message to be published via `Publisher`.
///
/// Messages go through the default exchange: the routing key is the name of the destination
/// queue.
#[derive(Clone, Debug, Default)]
pub struct MessageEnvelope {
    // The body of the message - as a sequence of bytes.
    pub payload: Vec<u8>,
    // The name of the queue the message is routed to.
    pub routing_key: String,
    // AMQP properties attached to the message.
    pub properties: BasicProperties,
}

impl MessageEnvelope {
    /// A persistent message carrying `message` encoded as a JSON object.
    pub fn json<M: Serialize + ?Sized>(
        queue_name: &str,
        message: &M,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            payload: serde_json::to_vec(message)?,
            routing_key: queue_name.to_owned(),
            properties: BasicProperties::default(),
        }
        .with_content_type(JSON_CONTENT_TYPE.into())
        .with_delivery_mode(PERSISTENT))
    }

    fn props(mut self, f: impl FnOnce(BasicProperties) -> BasicProperties) -> Self {
        self.properties = f(self.properties);
        self
    }

    pub fn with_content_type(self, value: ShortString) -> Self {
        self.props(|p| p.with_content_type(value))
    }

    pub fn with_delivery_mode(self, value: u8) -> Self {
        self.props(|p| p.with_delivery_mode(value))
    }

    pub fn with_message_id(self, value: ShortString) -> Self {
        self.props(|p| p.with_message_id(value))
    }
}
