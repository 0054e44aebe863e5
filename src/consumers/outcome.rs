use crate::connection::TransportError;

/// The action we asked the broker to take when finalising the processing of
/// the current message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerAction {
    /// Positive acknowledgement - the message is removed from the queue.
    Ack,
    /// Negative acknowledgement without requeue - the message is removed from the queue and
    /// routed to the dead letter queue, if the queue has one.
    DeadLetter,
}

/// Why a message was not processed successfully.
#[derive(thiserror::Error, Debug)]
pub enum ProcessingError {
    /// The payload is not a valid message.
    #[error("Failed to deserialize the message payload.")]
    Deserialization(#[source] serde_json::Error),
    /// The handler reported a failure.
    #[error("The handler could not process the message.")]
    Rejected,
    /// The handler returned an error.
    #[error("The handler failed while processing the message.")]
    Handler(#[source] anyhow::Error),
    /// The handler panicked.
    #[error("The handler panicked while processing the message: {0}")]
    Panicked(String),
}

/// The outcome of processing a single delivery:
/// - deserialization;
/// - message handler;
/// - ack/nack against the AMQP broker.
#[derive(Debug)]
pub struct ProcessingOutcome {
    pub(super) outcome: Result<(), ProcessingError>,
    pub(super) broker_action: BrokerAction,
    pub(super) settlement: Result<(), TransportError>,
}

impl ProcessingOutcome {
    pub fn result(&self) -> &Result<(), ProcessingError> {
        &self.outcome
    }

    pub fn broker_action(&self) -> BrokerAction {
        self.broker_action
    }

    /// Returns `true` if we asked the broker to dead-letter the message.
    ///
    /// It returns `true` even if we experienced an issue when dispatching the nack instruction to
    /// the AMQP broker (e.g. network timeout).
    pub fn was_dead_lettered(&self) -> bool {
        self.broker_action == BrokerAction::DeadLetter
    }

    /// The outcome of the ack/nack instruction sent to the broker.
    pub fn settlement(&self) -> &Result<(), TransportError> {
        &self.settlement
    }
}
