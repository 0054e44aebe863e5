//! Lifecycle of the broker connection and of the logical channel on top of it.
//!
//! [`ConnectionManager`] owns a single connection/channel pair, created lazily and re-created
//! on demand when the broker (or the network) closes either of them:
//!
//! ```rust,no_run
//! use user_onboarding::amqp::{configuration::RabbitMqSettings, ConnectionFactory};
//! use user_onboarding::connection::ConnectionManager;
//!
//! async fn example() -> anyhow::Result<()> {
//!     let settings = RabbitMqSettings::default();
//!     let manager = ConnectionManager::new(ConnectionFactory::new_from_config(&settings)?);
//!
//!     // Connects on first use, reuses the same channel afterwards.
//!     let channel = manager.ensure_connection().await?;
//!     drop(channel);
//!
//!     manager.close().await?;
//!     Ok(())
//! }
//! ```
mod amqp;
mod error;
mod transport;

pub use amqp::{AmqpChannel, AmqpConnection};
pub use error::TransportError;
pub use transport::{
    BrokerChannel, BrokerConnection, Confirmation, DeliveryStream, HealthStatus, Transport,
};

use crate::amqp::ConnectionFactory;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{info, warn};

/// The channel type of a [`Transport`].
pub type ChannelOf<T> = <<T as Transport>::Connection as BrokerConnection>::Channel;

/// Exclusive access to the live channel of a [`ConnectionManager`].
///
/// Channels are not meant to be driven concurrently by multiple tasks: the guard serialises
/// access to the shared channel. Drop it as soon as the broker operation completes.
pub type ChannelGuard<'a, T> = MappedMutexGuard<'a, ChannelOf<T>>;

/// Where the [`ConnectionManager`] stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No connection has been established yet, or the last one was lost.
    Disconnected,
    /// A connection and a channel are available.
    Connected,
    /// The manager was shut down.
    Closed,
}

enum ConnectionState<C: BrokerConnection> {
    Disconnected,
    Connected { connection: C, channel: C::Channel },
    Closed,
}

/// Owns the connection/channel pair shared by publishers and consumers within a process.
///
/// Only the manager mutates the connection state; everyone else goes through
/// [`ConnectionManager::ensure_connection`], an idempotent guard that:
///
/// - connects (and opens a channel) if there is no connection or the connection is closed;
/// - opens a new channel on the existing connection if only the channel is closed;
/// - hands out the current channel otherwise.
///
/// Build it once at startup, wrap it in an `Arc` and pass it to every publisher and consumer
/// that needs it.
pub struct ConnectionManager<T: Transport = ConnectionFactory> {
    transport: T,
    state: Mutex<ConnectionState<T::Connection>>,
}

impl<T: Transport> ConnectionManager<T> {
    /// Create a manager. No connection is established until it is first needed.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            state: Mutex::new(ConnectionState::Disconnected),
        }
    }

    pub async fn status(&self) -> ConnectionStatus {
        match &*self.state.lock().await {
            ConnectionState::Disconnected => ConnectionStatus::Disconnected,
            ConnectionState::Connected { .. } => ConnectionStatus::Connected,
            ConnectionState::Closed => ConnectionStatus::Closed,
        }
    }

    /// Make sure a healthy connection and channel are available and return exclusive access
    /// to the channel.
    ///
    /// Connection failures are not retried here beyond the transport's own attempt budget:
    /// wrap the call with [`retry`](crate::retry::retry) where that is needed (e.g. at startup).
    #[tracing::instrument(name = "ensure_connection", skip(self), level = "debug")]
    pub async fn ensure_connection(&self) -> Result<ChannelGuard<'_, T>, TransportError> {
        let mut state = self.state.lock().await;

        let current = std::mem::replace(&mut *state, ConnectionState::Disconnected);
        *state = match current {
            ConnectionState::Closed => {
                *state = ConnectionState::Closed;
                return Err(TransportError::Shutdown);
            }
            ConnectionState::Connected {
                connection,
                channel,
            } if connection.status() == HealthStatus::Healthy => {
                if channel.status() == HealthStatus::Healthy {
                    ConnectionState::Connected {
                        connection,
                        channel,
                    }
                } else {
                    warn!("RabbitMQ channel closed, opening a new one");
                    match connection.open_channel().await {
                        Ok(channel) => ConnectionState::Connected {
                            connection,
                            channel,
                        },
                        Err(e) => {
                            warn!(error = %e, "Failed to open a channel on a live connection, reconnecting");
                            self.connect().await?
                        }
                    }
                }
            }
            ConnectionState::Connected { .. } => {
                warn!("RabbitMQ connection closed, reconnecting");
                self.connect().await?
            }
            ConnectionState::Disconnected => self.connect().await?,
        };

        MutexGuard::try_map(state, |state| match state {
            ConnectionState::Connected { channel, .. } => Some(channel),
            _ => None,
        })
        .map_err(|_| TransportError::Closed(anyhow::anyhow!("No channel available after connecting")))
    }

    async fn connect(&self) -> Result<ConnectionState<T::Connection>, TransportError> {
        let connection = self.transport.connect().await?;
        let channel = connection.open_channel().await?;
        info!("Connected to RabbitMQ");
        Ok(ConnectionState::Connected {
            connection,
            channel,
        })
    }

    /// Close the connection, if open, and stop handing out channels.
    ///
    /// If closing fails the manager keeps its state, so the call can be retried.
    #[tracing::instrument(name = "close_connection", skip(self))]
    pub async fn close(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        if let ConnectionState::Connected { connection, .. } = &*state {
            if connection.status() == HealthStatus::Healthy {
                connection.close().await?;
                info!("RabbitMQ connection closed");
            }
        }
        *state = ConnectionState::Closed;
        Ok(())
    }
}
