use lapin::protocol::{AMQPErrorKind, AMQPSoftError};

/// Failures raised while talking to the broker over a connection or channel.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    /// The transport could not be established within its own attempt budget.
    #[error("Failed to connect to the RabbitMq broker after {attempts} attempt(s)")]
    Connect {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
    /// The connection or the channel we tried to use is no longer open.
    #[error("The RabbitMq connection or channel is closed")]
    Closed(#[source] anyhow::Error),
    /// The broker refused the operation because it conflicts with existing state,
    /// e.g. a queue redeclared with different arguments.
    #[error("The RabbitMq broker refused the operation: {0}")]
    PreconditionFailed(String),
    /// The broker could not find the resource the operation refers to.
    #[error("The RabbitMq broker could not find the resource: {0}")]
    NotFound(String),
    /// The connection manager was shut down and does not hand out channels anymore.
    #[error("The connection manager has been shut down")]
    Shutdown,
    /// Any other error reported by the broker or the client library.
    #[error("Generic error encountered when interacting with the RabbitMq broker")]
    Broker(#[source] anyhow::Error),
}

impl TransportError {
    /// `true` if reconnecting and retrying the same operation might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

impl From<lapin::Error> for TransportError {
    fn from(err: lapin::Error) -> Self {
        let closed = match &err {
            lapin::Error::ProtocolError(e) => match e.kind() {
                AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED) => {
                    return Self::PreconditionFailed(e.to_string())
                }
                AMQPErrorKind::Soft(AMQPSoftError::NOTFOUND) => {
                    return Self::NotFound(e.to_string())
                }
                // Hard errors tear the whole connection down.
                AMQPErrorKind::Hard(_) => true,
                AMQPErrorKind::Soft(_) => false,
            },
            lapin::Error::InvalidChannelState(_)
            | lapin::Error::InvalidConnectionState(_)
            | lapin::Error::IOError(_)
            | lapin::Error::MissingHeartbeatError => true,
            _ => false,
        };
        if closed {
            Self::Closed(err.into())
        } else {
            Self::Broker(err.into())
        }
    }
}
