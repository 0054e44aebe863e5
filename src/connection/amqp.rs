//! [`lapin`]-backed implementations of the transport traits.
use crate::amqp::ConnectionFactory;
use crate::connection::{
    BrokerChannel, BrokerConnection, Confirmation, DeliveryStream, HealthStatus, Transport,
    TransportError,
};
use crate::consumers::Delivery;
use amq_protocol_types::FieldTable;
use futures_util::StreamExt;
use lapin::{
    options::{
        BasicCancelOptions, BasicConsumeOptions, BasicGetOptions, BasicPublishOptions,
        BasicQosOptions, ConfirmSelectOptions, QueueDeclareOptions,
    },
    publisher_confirm, BasicProperties, ChannelState, ConnectionState,
};

/// A connection to a RabbitMq broker.
pub struct AmqpConnection {
    inner: lapin::Connection,
    publisher_confirms: bool,
}

/// A RabbitMq channel.
#[derive(Clone)]
pub struct AmqpChannel {
    inner: lapin::Channel,
    publisher_confirms: bool,
}

#[async_trait::async_trait]
impl Transport for ConnectionFactory {
    type Connection = AmqpConnection;

    async fn connect(&self) -> Result<AmqpConnection, TransportError> {
        Ok(AmqpConnection {
            inner: self.new_connection().await?,
            publisher_confirms: self.publisher_confirms,
        })
    }
}

#[async_trait::async_trait]
impl BrokerConnection for AmqpConnection {
    type Channel = AmqpChannel;

    fn status(&self) -> HealthStatus {
        match self.inner.status().state() {
            ConnectionState::Connected => HealthStatus::Healthy,
            _ => HealthStatus::Unhealthy,
        }
    }

    #[tracing::instrument(name = "rabbitmq_create_channel", skip(self))]
    async fn open_channel(&self) -> Result<AmqpChannel, TransportError> {
        let channel = self.inner.create_channel().await?;
        if self.publisher_confirms {
            channel
                .confirm_select(ConfirmSelectOptions { nowait: false })
                .await?;
        }
        Ok(AmqpChannel {
            inner: channel,
            publisher_confirms: self.publisher_confirms,
        })
    }

    async fn close(&self) -> Result<(), TransportError> {
        // Reply Code 200 - REPLY_SUCCESS
        self.inner.close(200, "Shutting down").await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl BrokerChannel for AmqpChannel {
    fn status(&self) -> HealthStatus {
        match self.inner.status().state() {
            ChannelState::Connected => HealthStatus::Healthy,
            _ => HealthStatus::Unhealthy,
        }
    }

    async fn declare_queue(
        &self,
        queue_name: &str,
        arguments: FieldTable,
    ) -> Result<(), TransportError> {
        self.inner
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    passive: false,
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    nowait: false,
                },
                arguments,
            )
            .await?;
        Ok(())
    }

    async fn queue_depth(&self, queue_name: &str) -> Result<u32, TransportError> {
        let queue = self
            .inner
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    passive: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(queue.message_count())
    }

    #[tracing::instrument(level = "debug", skip(self, payload, properties))]
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<Confirmation, TransportError> {
        let options = BasicPublishOptions {
            mandatory: self.publisher_confirms,
            // The immediate flag was dropped in RabbitMQ 3.0 - see https://www.rabbitmq.com/blog/2012/11/19/breaking-things-with-rabbitmq-3-0/
            immediate: false,
        };
        let confirm = self
            .inner
            .basic_publish(exchange, routing_key, options, payload, properties)
            .await?
            .await?;

        Ok(match confirm {
            publisher_confirm::Confirmation::Ack(None) => Confirmation::Ack,
            publisher_confirm::Confirmation::Ack(Some(returned)) => Confirmation::Returned {
                reply_code: returned.reply_code,
                reply_text: returned.reply_text.as_str().to_owned(),
            },
            publisher_confirm::Confirmation::Nack(_) => Confirmation::Nack,
            publisher_confirm::Confirmation::NotRequested => Confirmation::NotRequested,
        })
    }

    async fn consume(
        &self,
        queue_name: &str,
        consumer_tag: &str,
        prefetch_count: u16,
    ) -> Result<DeliveryStream, TransportError> {
        self.inner
            .basic_qos(prefetch_count, BasicQosOptions { global: false })
            .await?;
        let consumer = self
            .inner
            .basic_consume(
                queue_name,
                consumer_tag,
                // `no_ack: false` - the broker keeps every delivery until we ack or nack it.
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(consumer
            .map(|delivery| delivery.map(Delivery::from).map_err(TransportError::from))
            .boxed())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), TransportError> {
        self.inner
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await?;
        Ok(())
    }

    async fn fetch(&self, queue_name: &str) -> Result<Option<Delivery>, TransportError> {
        let message = self
            .inner
            .basic_get(queue_name, BasicGetOptions { no_ack: false })
            .await?;
        Ok(message.map(|message| Delivery::from(message.delivery)))
    }
}
