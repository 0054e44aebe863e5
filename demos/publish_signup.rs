use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use user_onboarding::amqp::{configuration::RabbitMqSettings, ConnectionFactory};
use user_onboarding::connection::ConnectionManager;
use user_onboarding::onboarding::{InMemoryUserStore, OnboardingService, SignupRequest};
use user_onboarding::publishers::Publisher;
use user_onboarding::retry::RetryPolicy;
use user_onboarding::startup::{connect_with_retry, shutdown_with_retry};
use user_onboarding::topology::QueueTopology;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // `RABBITMQ_*` variables can be set in a `.env` file.
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = RabbitMqSettings::from_env()?;
    let manager = Arc::new(ConnectionManager::new(ConnectionFactory::new_from_config(
        &settings,
    )?));

    // The broker may still be booting (e.g. under docker-compose): give it a few attempts.
    let policy = RetryPolicy::default();
    connect_with_retry(&manager, &QueueTopology::default(), &policy).await?;

    // The API side only reads from the store: the worker is the one writing to it.
    let service = OnboardingService::new(
        InMemoryUserStore::new(),
        Publisher::builder(manager.clone()).build(),
    );
    let receipt = service
        .onboard(SignupRequest {
            email: "ada@example.com".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            password: "correct horse battery staple".to_string().into(),
        })
        .await?;
    tracing::info!(
        user_id = %receipt.user_id,
        verification = %receipt.verification,
        "Signup published"
    );

    shutdown_with_retry(&manager, &policy).await?;
    Ok(())
}
