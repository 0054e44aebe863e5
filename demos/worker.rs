use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use user_onboarding::amqp::{configuration::RabbitMqSettings, ConnectionFactory};
use user_onboarding::connection::ConnectionManager;
use user_onboarding::consumers::Consumer;
use user_onboarding::onboarding::{InMemoryUserStore, PersistOnboarding};
use user_onboarding::retry::RetryPolicy;
use user_onboarding::startup::{connect_with_retry, shutdown_with_retry};
use user_onboarding::topology::QueueTopology;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = RabbitMqSettings::from_env()?;
    let manager = Arc::new(ConnectionManager::new(ConnectionFactory::new_from_config(
        &settings,
    )?));
    let topology = QueueTopology::default();
    let policy = RetryPolicy::default();
    connect_with_retry(&manager, &topology, &policy).await?;

    // Messages are processed one at a time, in delivery order.
    // Successes are acked, failures end up in `user_onboarding_queue_dlq`.
    let store = Arc::new(InMemoryUserStore::new());
    let consumer = Consumer::builder(
        manager.clone(),
        &topology.queue_name,
        PersistOnboarding::new(store.clone()),
    )
    .build();

    // Ctrl+C stops the consumer once the message in flight, if any, has been settled.
    let outcome = consumer
        .run_until_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            }
        })
        .await;
    tracing::info!(users = store.len().await, "Worker stopped");

    // Close the connection even if the consumer failed, then report the failure.
    shutdown_with_retry(&manager, &policy).await?;
    outcome?;
    Ok(())
}
