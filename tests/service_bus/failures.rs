//! Bad payloads and broker outages surface as stream errors.

use service_bus::transport::Transport;
use service_bus::{
    AckMode, Address, BusError, DeserializationError, InMemoryBroker, MessageKind, ServiceBus,
    TransportError,
};

use crate::support::{local_bus, next, request, TestMessage, QUIET};

#[tokio::test]
async fn undecodable_payload_does_not_end_the_stream() {
    let broker = InMemoryBroker::new();
    let bus = ServiceBus::<TestMessage>::configure()
        .with_transport_endpoints(broker.clone())
        .named("inbox")
        .using_queue_for(MessageKind::Event)
        .client_acknowledge()
        .connect_to_broker("memory://inbox")
        .serialized_as_json()
        .as_client_and_server()
        .create()
        .await
        .unwrap();
    let mut events = bus.events();

    let raw = broker.connect("memory://raw").await.unwrap();
    raw.send(
        &Address::topic("inbox.events"),
        b"not json".to_vec(),
        AckMode::ClientAcknowledge,
    )
    .await
    .unwrap();
    bus.publish(TestMessage::TestEvent { id: 4 }).await.unwrap();

    assert!(matches!(
        next(&mut events).await,
        Err(BusError::Deserialization(DeserializationError::Malformed {
            kind: MessageKind::Event,
            ..
        }))
    ));
    assert_eq!(
        next(&mut events).await.unwrap(),
        TestMessage::TestEvent { id: 4 }
    );

    let dead = broker.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].queue, "inbox.events");
    assert_eq!(dead[0].payload, b"not json");

    let stats = bus.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.received, 1);
}

#[tokio::test]
async fn message_of_the_wrong_kind_is_reported() {
    let broker = InMemoryBroker::new();
    let bus = local_bus(&broker, "mixed").await;
    let mut commands = bus.commands();

    let raw = broker.connect("memory://raw").await.unwrap();
    let event = serde_json::to_vec(&TestMessage::TestEvent { id: 1 }).unwrap();
    raw.send(&Address::queue("mixed.commands"), event, AckMode::AutoAcknowledge)
        .await
        .unwrap();

    assert_eq!(
        next(&mut commands).await.unwrap_err(),
        BusError::Deserialization(DeserializationError::UnexpectedKind {
            expected: MessageKind::Command,
            actual: MessageKind::Event,
        })
    );
}

#[tokio::test]
async fn connection_loss_reaches_streams_and_callers() {
    let broker = InMemoryBroker::new();
    let bus = local_bus(&broker, "fragile").await;
    let mut events = bus.events();
    let mut answers = bus.get_responses(request(1)).await.unwrap();

    broker.simulate_connection_loss("network partition");

    let error = next(&mut events).await.unwrap_err();
    assert!(error.is_connection_error());
    assert_eq!(
        error,
        BusError::Transport(TransportError::ConnectionLost("network partition".into()))
    );

    let error = next(&mut answers).await.unwrap_err();
    assert!(error.is_connection_error());

    let error = bus.send(TestMessage::TestCommand { id: 1 }).await.unwrap_err();
    assert!(error.is_connection_error());

    bus.dispose().await.unwrap();
}

#[tokio::test]
async fn unreachable_broker_fails_create() {
    let broker = InMemoryBroker::new();
    broker.simulate_connection_loss("maintenance");

    let err = ServiceBus::<TestMessage>::configure()
        .with_transport_endpoints(broker.clone())
        .named("offline")
        .connect_to_broker("memory://offline")
        .serialized_as_json()
        .as_client()
        .create()
        .await
        .unwrap_err();
    assert_eq!(
        err,
        BusError::Transport(TransportError::ConnectionFailed {
            uri: "memory://offline".into(),
            reason: "maintenance".into(),
        })
    );
}

#[tokio::test]
async fn slow_subscriber_is_told_it_lagged() {
    let broker = InMemoryBroker::new();
    let bus = ServiceBus::<TestMessage>::configure()
        .with_transport_endpoints(broker.clone())
        .named("firehose")
        .connect_to_broker("memory://firehose")
        .serialized_as_json()
        .as_client_and_server()
        .with_stream_capacity(2)
        .create()
        .await
        .unwrap();
    let mut events = bus.events();

    for id in 0..10 {
        bus.publish(TestMessage::TestEvent { id }).await.unwrap();
    }
    tokio::time::sleep(QUIET).await;

    assert_eq!(
        next(&mut events).await.unwrap_err(),
        BusError::Lagged { skipped: 8 }
    );
    assert_eq!(next(&mut events).await.unwrap().id(), 8);
    assert_eq!(next(&mut events).await.unwrap().id(), 9);
}
