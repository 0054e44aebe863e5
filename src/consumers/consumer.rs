use crate::connection::{BrokerChannel, ConnectionManager, Transport, TransportError};
use crate::consumers::outcome::{BrokerAction, ProcessingError, ProcessingOutcome};
use crate::consumers::{Delivery, Handler};
use futures_util::{Future, FutureExt, StreamExt};
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use uuid::Uuid;

/// The number of unacknowledged deliveries the broker pushes to a consumer when not overridden.
///
/// With a single delivery in flight messages are processed in queue order.
pub const DEFAULT_PREFETCH_COUNT: u16 = 1;

#[derive(thiserror::Error, Debug)]
pub enum ConsumerError {
    /// We could not get a channel or register the consumer with the broker.
    #[error("Failed to start consuming from queue {queue_name}.")]
    Subscribe {
        queue_name: String,
        #[source]
        source: TransportError,
    },
    /// The broker stopped delivering messages (e.g. the channel was closed).
    #[error("The delivery stream of queue {queue_name} failed.")]
    Delivery {
        queue_name: String,
        #[source]
        source: TransportError,
    },
}

/// Pulls messages from a queue, one at a time, and hands them over to a [`Handler`].
///
/// Every delivery is settled according to the processing outcome:
///
/// - the handler returned `Ok(true)`: the message is acked;
/// - the payload could not be deserialized, the handler returned `Ok(false)`, an error or
///   panicked: the message is nacked **without requeue**, the broker routes it to the dead
///   letter queue configured on the work queue.
///
/// There is no automatic retry: each delivery gets exactly one processing attempt.
///
/// The consumer shares the [`ConnectionManager`] with the rest of the process but never closes
/// it: that's left to orchestrated shutdown.
pub struct Consumer<T: Transport, M, H> {
    manager: Arc<ConnectionManager<T>>,
    /// The name of the queue we will be consuming messages from.
    queue_name: String,
    handler: H,
    prefetch_count: u16,
    /// The maximum number of messages `Consumer` is going to process before exiting the processing
    /// loop.
    /// The consumer will process messages indefinitely if set to `None`.
    exit_after: Option<usize>,
    _message: PhantomData<fn() -> M>,
}

impl<T, M, H> Consumer<T, M, H>
where
    T: Transport,
    M: DeserializeOwned + Send + 'static,
    H: Handler<M>,
{
    /// Start building a [`Consumer`] for `queue_name`.
    pub fn builder(
        manager: Arc<ConnectionManager<T>>,
        queue_name: impl Into<String>,
        handler: H,
    ) -> ConsumerBuilder<T, M, H> {
        ConsumerBuilder {
            manager,
            queue_name: queue_name.into(),
            handler,
            prefetch_count: DEFAULT_PREFETCH_COUNT,
            exit_after: None,
            _message: PhantomData,
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Run the consumer, which will notify RabbitMq to start pushing messages on the queue.
    ///
    /// `run_until_shutdown` returns:
    /// - `Ok(())` once `shutdown` resolves, after the message in flight (if any) has been settled;
    /// - `Ok(())` if the broker ends the subscription or after `exit_after` messages;
    /// - `Err(_)` if the consumer fails with an error (e.g. the channel is closed or the
    ///   connection with RabbitMq is lost).
    #[tracing::instrument(skip_all, name = "consumer_run", fields(queue_name = %self.queue_name))]
    pub async fn run_until_shutdown(
        self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), ConsumerError> {
        let subscribe_error = |source| ConsumerError::Subscribe {
            queue_name: self.queue_name.clone(),
            source,
        };

        // Work on our own handle to the channel: the guard must not be held for the whole
        // lifetime of the consumer, publishers in the same process need it too.
        let channel = {
            let guard = self
                .manager
                .ensure_connection()
                .await
                .map_err(subscribe_error)?;
            (*guard).clone()
        };
        let consumer_tag = Uuid::new_v4().to_string();
        let mut deliveries = channel
            .consume(&self.queue_name, &consumer_tag, self.prefetch_count)
            .await
            .map_err(subscribe_error)?;
        tracing::info!(%consumer_tag, "Waiting for messages");

        let mut counter = 0;

        let shutdown = shutdown.fuse();
        tokio::pin!(shutdown);

        'event_loop: loop {
            // have we consumed all the events we want?
            if self.exit_after == Some(counter) {
                tracing::info!(processed = counter, "Stopping the consumer");
                cancel(&channel, &consumer_tag).await;
                break 'event_loop Ok(());
            }

            tokio::select! {
                // we want to poll in the specified order - preferring the handling of shutdowns before
                // going on with processing more events
                biased;

                _ = &mut shutdown => {
                    tracing::info!("Consumer received shutdown event");
                    cancel(&channel, &consumer_tag).await;
                    break 'event_loop Ok(());
                }

                event = deliveries.next() => {
                    match event {
                        // the broker cancelled the consumer
                        None => {
                            tracing::info!("Delivery stream ended");
                            break 'event_loop Ok(());
                        }
                        Some(Err(e)) => {
                            tracing::error!(error = %e, "Consumer error");
                            break 'event_loop Err(ConsumerError::Delivery {
                                queue_name: self.queue_name.clone(),
                                source: e,
                            });
                        }
                        // Processing happens inline: the next delivery is not looked at until
                        // the current one has been settled.
                        Some(Ok(delivery)) => {
                            self.process(delivery).await;
                            counter += 1;
                        }
                    }
                }
            }
        }
    }

    /// Process a delivery - deserialization, handler, ack/nack against the AMQP broker.
    ///
    /// A failure to settle the delivery is logged and reported in the outcome; it does not stop
    /// the consumer.
    #[tracing::instrument(
        name = "process_message",
        skip_all,
        fields(
            delivery_tag = delivery.delivery_tag,
            message_id = delivery.message_id().unwrap_or_default(),
            redelivered = delivery.redelivered
        ),
        level = "debug"
    )]
    pub async fn process(&self, delivery: Delivery) -> ProcessingOutcome {
        let outcome = self.handle(&delivery).await;

        let (broker_action, settlement) = match &outcome {
            Ok(()) => (BrokerAction::Ack, delivery.ack().await),
            Err(e) => {
                tracing::warn!(error = %e, "Message processing failed, dead-lettering it");
                (BrokerAction::DeadLetter, delivery.nack(false).await)
            }
        };

        match &settlement {
            Ok(()) if broker_action == BrokerAction::Ack => tracing::info!("Message acked"),
            Ok(()) => {}
            Err(e) => tracing::error!(error = %e, ?broker_action, "Failed to settle message"),
        }

        ProcessingOutcome {
            outcome,
            broker_action,
            settlement,
        }
    }

    async fn handle(&self, delivery: &Delivery) -> Result<(), ProcessingError> {
        let message: M =
            serde_json::from_slice(&delivery.data).map_err(ProcessingError::Deserialization)?;

        match AssertUnwindSafe(self.handler.handle(message))
            .catch_unwind()
            .await
        {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(ProcessingError::Rejected),
            Ok(Err(e)) => Err(ProcessingError::Handler(e)),
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic payload".to_owned());
                Err(ProcessingError::Panicked(reason))
            }
        }
    }
}

/// Stop the broker from pushing further deliveries to a consumer we are done with.
async fn cancel<C: BrokerChannel>(channel: &C, consumer_tag: &str) {
    if let Err(e) = channel.cancel(consumer_tag).await {
        tracing::warn!(error = %e, "Failed to cancel the consumer");
    }
}

/// Configure a [`Consumer`] step by step.
///
/// Use [`Consumer::builder`] as entrypoint.
pub struct ConsumerBuilder<T: Transport, M, H> {
    manager: Arc<ConnectionManager<T>>,
    queue_name: String,
    handler: H,
    prefetch_count: u16,
    exit_after: Option<usize>,
    _message: PhantomData<fn() -> M>,
}

impl<T, M, H> ConsumerBuilder<T, M, H>
where
    T: Transport,
    M: DeserializeOwned + Send + 'static,
    H: Handler<M>,
{
    /// The maximum number of unacknowledged messages the broker pushes to us.
    ///
    /// Defaults to [`DEFAULT_PREFETCH_COUNT`]. Raising it does not make processing concurrent,
    /// it only saves round trips.
    #[must_use]
    pub fn prefetch_count(mut self, prefetch_count: u16) -> Self {
        self.prefetch_count = prefetch_count;
        self
    }

    /// Stop consuming after `n` messages have been processed.
    ///
    /// Mostly useful in tests.
    #[must_use]
    pub fn exit_after(mut self, n: usize) -> Self {
        self.exit_after = Some(n);
        self
    }

    pub fn build(self) -> Consumer<T, M, H> {
        Consumer {
            manager: self.manager,
            queue_name: self.queue_name,
            handler: self.handler,
            prefetch_count: self.prefetch_count,
            exit_after: self.exit_after,
            _message: PhantomData,
        }
    }
}
