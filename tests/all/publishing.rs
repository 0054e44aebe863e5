use crate::helpers::{get_manager, get_publisher, temp_topology};
use user_onboarding::connection::BrokerChannel;
use user_onboarding::publishers::{PublisherError, JSON_CONTENT_TYPE, PERSISTENT};
use user_onboarding::topology::declare_topology;
use uuid::Uuid;

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn published_messages_are_persistent_json() {
    // Arrange
    let manager = get_manager();
    let topology = temp_topology(&manager).await;
    let publisher = get_publisher(manager.clone());

    // Act
    publisher
        .publish(&topology.queue_name, &serde_json::json!({ "user_id": "u1" }))
        .await
        .unwrap();

    // Assert
    let channel = manager.ensure_connection().await.unwrap();
    let delivery = channel.fetch(&topology.queue_name).await.unwrap().unwrap();
    delivery.ack().await.unwrap();
    assert_eq!(
        serde_json::from_slice::<serde_json::Value>(&delivery.data).unwrap(),
        serde_json::json!({ "user_id": "u1" })
    );
    assert_eq!(delivery.properties.delivery_mode(), &Some(PERSISTENT));
    assert_eq!(
        delivery
            .properties
            .content_type()
            .as_ref()
            .map(|c| c.as_str()),
        Some(JSON_CONTENT_TYPE)
    );
    assert!(delivery.message_id().is_some());
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn publishing_to_a_missing_queue_is_unroutable() {
    let manager = get_manager();
    let publisher = get_publisher(manager);

    let outcome = publisher
        .publish(&Uuid::new_v4().to_string(), &serde_json::json!({}))
        .await;

    assert!(matches!(
        outcome,
        Err(PublisherError::Unroutable {
            reply_code: 312,
            ..
        })
    ));
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn redeclaring_the_topology_is_a_no_op() {
    let manager = get_manager();
    let topology = temp_topology(&manager).await;

    declare_topology(&manager, &topology).await.unwrap();

    let channel = manager.ensure_connection().await.unwrap();
    assert_eq!(channel.queue_depth(&topology.queue_name).await.unwrap(), 0);
    assert_eq!(
        channel
            .queue_depth(&topology.dead_letter_queue_name())
            .await
            .unwrap(),
        0
    );
}
