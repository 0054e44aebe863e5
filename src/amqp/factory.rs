use crate::amqp::configuration::RabbitMqSettings;
use crate::connection::TransportError;
use anyhow::Context;
use lapin::{
    tcp::{AMQPUriTcpExt, NativeTlsConnector},
    uri::{AMQPScheme, AMQPUri},
    ConnectionProperties,
};
use std::{sync::Arc, time::Duration};
use tokio::time::timeout;
use tracing::warn;

#[derive(Clone)]
/// All the information required to connect to a RabbitMq broker.
pub struct ConnectionFactory {
    uri: AMQPUri,
    /// The timeout observed on each attempt to connect to RabbitMq.
    connection_timeout: Duration,
    /// How many attempts we make before surfacing a connection error.
    connection_attempts: u32,
    /// Fixed pause between two attempts.
    retry_delay: Duration,
    /// Channels opened on connections from this factory put the broker in confirm mode.
    pub(crate) publisher_confirms: bool,
    /// TLS configuration for the connection to RabbitMq.
    /// If `None`, the connection will not be encrypted.
    tls: Option<Arc<Tls>>,
}

#[derive(Clone)]
struct Tls {
    connector: NativeTlsConnector,
    domain_name: String,
}

impl ConnectionFactory {
    /// Create a new connection factory from settings.
    ///
    /// If the connection timeout is left unspecified, it will be defaulted to 10 seconds.
    /// A zero attempt budget is bumped to a single attempt.
    pub fn new_from_config(settings: &RabbitMqSettings) -> Result<Self, anyhow::Error> {
        let tls = settings
            .tls
            .as_ref()
            .map::<Result<Tls, anyhow::Error>, _>(|tls_settings| {
                let server_domain_name = tls_settings
                    .domain
                    .clone()
                    .unwrap_or_else(|| settings.host.clone());

                let mut connector_builder = NativeTlsConnector::builder();
                if let Some(certificate) = tls_settings.ca_certificate_chain()? {
                    connector_builder.add_root_certificate(certificate);
                }

                let connector = connector_builder
                    .build()
                    .context("TLS configuration for RabbitMQ failed")?;
                Ok(Tls {
                    domain_name: server_domain_name,
                    connector,
                })
            })
            .transpose()?;
        let connection_timeout = settings
            .connection_timeout()
            .unwrap_or_else(|| Duration::from_secs(10));
        Ok(Self {
            uri: settings.amqp_uri(),
            connection_timeout,
            connection_attempts: settings.connection_attempts.max(1),
            retry_delay: settings.retry_delay(),
            publisher_confirms: true,
            tls: tls.map(Arc::new),
        })
    }

    /// Open channels without publisher confirmations.
    ///
    /// By default, we enable publisher confirmations, but you can opt out using this flag.
    #[must_use]
    pub fn without_publisher_confirms(mut self) -> Self {
        self.publisher_confirms = false;
        self
    }

    /// Replaces the TLS Connector for the connection factory, along with the expected domain name for the certificate
    pub fn set_tls_connector_with_domain(
        &mut self,
        connector: NativeTlsConnector,
        domain_name: String,
    ) {
        self.tls = Some(Arc::new(Tls {
            connector,
            domain_name,
        }));
    }

    /// Create a new connection to a RabbitMq broker.
    ///
    /// Up to `connection_attempts` attempts are made, each bounded by the connection timeout,
    /// with a fixed `retry_delay` pause in between. The last failure is surfaced.
    #[tracing::instrument(name = "rabbitmq_connect", skip(self), fields(host = %self.uri.authority.host))]
    pub async fn new_connection(&self) -> Result<lapin::Connection, TransportError> {
        let mut attempt = 1;
        loop {
            match self.try_connect().await {
                Ok(connection) => return Ok(connection),
                Err(e) if attempt < self.connection_attempts => {
                    warn!(
                        attempt,
                        max_attempts = self.connection_attempts,
                        error = %e,
                        "RabbitMQ connection attempt failed, retrying in {:?}",
                        self.retry_delay
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    attempt += 1;
                }
                Err(source) => {
                    return Err(TransportError::Connect {
                        attempts: attempt,
                        source,
                    })
                }
            }
        }
    }

    /// A single connection attempt, bounded by the connection timeout.
    ///
    /// It establishes an encrypted connection if `self.tls` is `Some`.
    async fn try_connect(&self) -> Result<lapin::Connection, anyhow::Error> {
        let properties =
            ConnectionProperties::default().with_executor(tokio_executor_trait::Tokio::current());
        let connection = timeout(self.connection_timeout, async {
            match &self.tls {
                None => self.connect_without_tls(properties).await,
                Some(tls) => self.connect_with_tls(properties, Arc::clone(tls)).await,
            }
        })
        .await
        .context("Timed out while trying to connect to RabbitMQ.")?
        .context("Failed to connect to RabbitMQ.")?;
        // Register a callback to log connection errors.
        connection.on_error(|e| {
            warn!("RabbitMQ broken connection: {:?}", e);
        });
        Ok(connection)
    }

    /// Establish a new unencrypted connection to a RabbitMq broker.
    async fn connect_without_tls(
        &self,
        properties: ConnectionProperties,
    ) -> Result<lapin::Connection, lapin::Error> {
        lapin::Connection::connect_uri(self.uri.clone(), properties).await
    }

    /// Establish a new TLS connection to a RabbitMq broker.
    async fn connect_with_tls(
        &self,
        properties: ConnectionProperties,
        tls_configuration: Arc<Tls>,
    ) -> Result<lapin::Connection, lapin::Error> {
        lapin::Connection::connector(
            self.uri.clone(),
            Box::new(move |uri| {
                // First establish a plain TCP connection using the AMQP protocol
                let mut amqp_uri = uri.clone();
                amqp_uri.scheme = AMQPScheme::AMQP;
                amqp_uri
                    .connect()
                    // Then perform a TLS handshake with custom settings
                    // including customisation of the expected domain for the server certificate
                    .and_then(|tcp| {
                        tcp.into_native_tls(
                            &tls_configuration.connector,
                            &tls_configuration.domain_name,
                        )
                    })
            }),
            properties,
        )
        .await
    }
}
