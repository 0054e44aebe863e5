use std::sync::Arc;
use user_onboarding::amqp::configuration::RabbitMqSettings;
use user_onboarding::amqp::ConnectionFactory;
use user_onboarding::connection::ConnectionManager;
use user_onboarding::publishers::Publisher;
use user_onboarding::topology::{declare_topology, QueueTopology};
use uuid::Uuid;

pub fn get_rabbitmq_settings() -> RabbitMqSettings {
    RabbitMqSettings::default()
}

pub fn get_connection_factory() -> ConnectionFactory {
    ConnectionFactory::new_from_config(&get_rabbitmq_settings()).unwrap()
}

pub fn get_manager() -> Arc<ConnectionManager> {
    Arc::new(ConnectionManager::new(get_connection_factory()))
}

pub fn get_publisher(manager: Arc<ConnectionManager>) -> Publisher {
    Publisher::builder(manager)
        .publish_timeout(std::time::Duration::from_secs(3))
        .build()
}

/// Declare a work queue with a random name, and its dead letter queue.
pub async fn temp_topology(manager: &ConnectionManager) -> QueueTopology {
    let topology = QueueTopology::new(format!("onboarding-test-{}", Uuid::new_v4()));
    declare_topology(manager, &topology).await.unwrap();
    topology
}
