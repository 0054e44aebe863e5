//! Bring the broker plumbing up (and down) at process boundaries.
use crate::connection::{ConnectionManager, Transport, TransportError};
use crate::retry::{retry, retry_if, RetryPolicy};
use crate::topology::{declare_topology, QueueTopology, TopologyError};
use std::fmt;

/// The step of the startup (or shutdown) sequence that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartupStage {
    Connect,
    DeclareTopology,
    Shutdown,
}

impl fmt::Display for StartupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            StartupStage::Connect => "connect to RabbitMQ",
            StartupStage::DeclareTopology => "declare the queue topology",
            StartupStage::Shutdown => "close the RabbitMQ connection",
        };
        f.write_str(stage)
    }
}

/// Startup gave up: the host process can decide to exit or to run degraded.
#[derive(thiserror::Error, Debug)]
#[error("Failed to {stage}")]
pub struct StartupError {
    pub stage: StartupStage,
    #[source]
    pub source: anyhow::Error,
}

/// Connect to the broker, then declare `topology`, retrying each step according to `policy`.
///
/// A topology conflict, or a manager that was already shut down, is reported straight away.
#[tracing::instrument(name = "startup", skip_all, fields(queue_name = %topology.queue_name))]
pub async fn connect_with_retry<T: Transport>(
    manager: &ConnectionManager<T>,
    topology: &QueueTopology,
    policy: &RetryPolicy,
) -> Result<(), StartupError> {
    retry_if(
        "Connecting to RabbitMQ",
        policy,
        move || async move { manager.ensure_connection().await.map(drop) },
        |e: &TransportError| !matches!(e, TransportError::Shutdown),
    )
    .await
    .map_err(|e| StartupError {
        stage: StartupStage::Connect,
        source: e.into(),
    })?;

    retry_if(
        "Declaring the queue topology",
        policy,
        move || declare_topology(manager, topology),
        |e: &TopologyError| match e {
            TopologyError::Conflict { .. } => false,
            TopologyError::Transport { source, .. } => !matches!(source, TransportError::Shutdown),
        },
    )
    .await
    .map_err(|e| StartupError {
        stage: StartupStage::DeclareTopology,
        source: e.into(),
    })?;

    tracing::info!("RabbitMQ is ready");
    Ok(())
}

/// Close the connection, retrying according to `policy`.
#[tracing::instrument(name = "shutdown", skip_all)]
pub async fn shutdown_with_retry<T: Transport>(
    manager: &ConnectionManager<T>,
    policy: &RetryPolicy,
) -> Result<(), StartupError> {
    retry("Closing the RabbitMQ connection", policy, move || manager.close())
        .await
        .map_err(|e| StartupError {
            stage: StartupStage::Shutdown,
            source: e.into(),
        })
}
