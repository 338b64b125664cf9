//! Endpoint selection, roles and multiple endpoint groups.

use std::time::Duration;

use service_bus::transport::Transport;
use service_bus::{
    AckMode, Address, BusError, InMemoryBroker, Message, MessageKind, Role, RoutingError,
    ServiceBus,
};

use crate::support::{local_bus, next, request, spawn_responder, stays_quiet, TestMessage};

async fn client(broker: &InMemoryBroker) -> ServiceBus<TestMessage> {
    ServiceBus::<TestMessage>::configure()
        .with_transport_endpoints(broker.clone())
        .named("orders")
        .connect_to_broker("memory://orders")
        .serialized_as_json()
        .as_client()
        .create()
        .await
        .unwrap()
}

async fn server(broker: &InMemoryBroker) -> ServiceBus<TestMessage> {
    ServiceBus::<TestMessage>::configure()
        .with_transport_endpoints(broker.clone())
        .named("orders")
        .connect_to_broker("memory://orders")
        .serialized_as_json()
        .as_server()
        .create()
        .await
        .unwrap()
}

#[tokio::test]
async fn client_and_server_talk_through_shared_queues() {
    let broker = InMemoryBroker::new();
    let server = server(&broker).await;
    let client = client(&broker).await;
    let _responder = spawn_responder(&server);

    let mut server_commands = server.commands();
    let mut client_events = client.events();
    let mut client_commands = client.commands();

    client.send(TestMessage::TestCommand { id: 1 }).await.unwrap();
    assert_eq!(
        next(&mut server_commands).await.unwrap(),
        TestMessage::TestCommand { id: 1 }
    );

    server.publish(TestMessage::TestEvent { id: 1 }).await.unwrap();
    assert_eq!(
        next(&mut client_events).await.unwrap(),
        TestMessage::TestEvent { id: 1 }
    );

    let answer = client
        .get_response(request(8), Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(answer.id(), 8);

    assert!(stays_quiet(&mut client_commands).await);
    assert_ne!(client.requester_id(), server.requester_id());
}

#[tokio::test]
async fn every_client_hears_an_event() {
    let broker = InMemoryBroker::new();
    let server = server(&broker).await;
    let first = client(&broker).await;
    let second = client(&broker).await;
    let mut first_events = first.events();
    let mut second_events = second.events();

    server.publish(TestMessage::TestEvent { id: 1 }).await.unwrap();

    assert_eq!(
        next(&mut first_events).await.unwrap(),
        TestMessage::TestEvent { id: 1 }
    );
    assert_eq!(
        next(&mut second_events).await.unwrap(),
        TestMessage::TestEvent { id: 1 }
    );
    assert!(stays_quiet(&mut first_events).await);
    assert_eq!(broker.subscriber_count("orders.events"), 2);
}

#[tokio::test]
async fn clients_sharing_a_service_get_their_own_responses() {
    let broker = InMemoryBroker::new();
    let server = server(&broker).await;
    let asking = client(&broker).await;
    let bystander = client(&broker).await;
    let _responder = spawn_responder(&server);
    let mut overheard = bystander.responses();

    for id in 0..6 {
        let answer = asking
            .get_response(request(id), Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(answer.id(), id);
        assert_eq!(
            answer.correlation().unwrap().requester_id,
            asking.requester_id()
        );
    }

    assert!(stays_quiet(&mut overheard).await);
    assert_eq!(bystander.pending_requests(), 0);
    assert_eq!(bystander.stats().received, 0);
    assert_eq!(asking.stats().received, 6);
}

#[tokio::test]
async fn servers_sharing_a_service_split_the_work() {
    let broker = InMemoryBroker::new();
    let first = server(&broker).await;
    let second = server(&broker).await;
    let client = client(&broker).await;
    let mut first_commands = first.commands();
    let mut second_commands = second.commands();

    client.send(TestMessage::TestCommand { id: 1 }).await.unwrap();
    client.send(TestMessage::TestCommand { id: 2 }).await.unwrap();

    let mut ids = vec![
        next(&mut first_commands).await.unwrap().id(),
        next(&mut second_commands).await.unwrap().id(),
    ];
    ids.sort();
    assert_eq!(ids, vec![1, 2]);
    assert!(stays_quiet(&mut first_commands).await);
    assert!(stays_quiet(&mut second_commands).await);
}

#[tokio::test]
async fn roles_refuse_the_other_direction() {
    let broker = InMemoryBroker::new();
    let client = client(&broker).await;
    let server = server(&broker).await;

    let err = client
        .publish(TestMessage::TestEvent { id: 1 })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BusError::Routing(RoutingError::NoEndpoint {
            kind: MessageKind::Event,
            ..
        })
    ));

    let err = server
        .send(TestMessage::TestCommand { id: 1 })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BusError::Routing(RoutingError::NoEndpoint {
            kind: MessageKind::Command,
            ..
        })
    ));

    assert!(server.get_responses(request(1)).await.is_err());
    assert_eq!(server.pending_requests(), 0);
}

#[tokio::test]
async fn operations_check_the_message_kind() {
    let broker = InMemoryBroker::new();
    let bus = local_bus(&broker, "kinds").await;

    let err = bus
        .publish(TestMessage::TestCommand { id: 1 })
        .await
        .unwrap_err();
    assert_eq!(
        err,
        BusError::Routing(RoutingError::UnexpectedKind {
            expected: MessageKind::Event,
            actual: MessageKind::Command,
            message_type: "TestCommand".into(),
        })
    );

    let err = bus
        .send(TestMessage::TestEvent { id: 1 })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BusError::Routing(RoutingError::UnexpectedKind { .. })
    ));
}

#[tokio::test]
async fn type_filters_choose_the_queue() {
    let broker = InMemoryBroker::new();
    let bus = ServiceBus::<TestMessage>::configure()
        .with_transport_endpoints(broker.clone())
        .named("orders")
        .using_queue_for(MessageKind::Command)
        .queue("orders.placements")
        .for_types(["TestCommand"])
        .client_acknowledge()
        .using_queue_for(MessageKind::Command)
        .queue("orders.audit")
        .for_types(["AuditCommand"])
        .auto_acknowledge()
        .connect_to_broker("memory://orders")
        .serialized_as_json()
        .as_client()
        .create()
        .await
        .unwrap();

    bus.send(TestMessage::TestCommand { id: 1 }).await.unwrap();
    bus.send(TestMessage::AuditCommand { id: 2 }).await.unwrap();
    bus.send(TestMessage::AuditCommand { id: 3 }).await.unwrap();

    // A client does not consume its commands, so they wait on the broker.
    assert_eq!(broker.queue_len("orders.placements"), 1);
    assert_eq!(broker.queue_len("orders.audit"), 2);
    assert_eq!(broker.queue_len("orders.commands"), 0);

    let commands: Vec<_> = bus
        .endpoints()
        .into_iter()
        .filter(|e| e.kind == MessageKind::Command)
        .map(|e| (e.queue, e.ack_mode, e.role))
        .collect();
    assert_eq!(
        commands,
        vec![
            ("orders.placements".to_string(), AckMode::ClientAcknowledge, Role::Client),
            ("orders.audit".to_string(), AckMode::AutoAcknowledge, Role::Client),
        ]
    );
}

#[tokio::test]
async fn unmatched_type_has_no_endpoint() {
    let broker = InMemoryBroker::new();
    let bus = ServiceBus::<TestMessage>::configure()
        .with_transport_endpoints(broker.clone())
        .named("orders")
        .using_queue_for(MessageKind::Command)
        .for_types(["TestCommand"])
        .auto_acknowledge()
        .connect_to_broker("memory://orders")
        .serialized_as_json()
        .as_client()
        .create()
        .await
        .unwrap();

    let err = bus
        .send(TestMessage::AuditCommand { id: 1 })
        .await
        .unwrap_err();
    assert_eq!(
        err,
        BusError::Routing(RoutingError::NoEndpoint {
            kind: MessageKind::Command,
            message_type: "AuditCommand".into(),
        })
    );
}

#[tokio::test]
async fn streams_merge_every_group() {
    let orders_broker = InMemoryBroker::new();
    let billing_broker = InMemoryBroker::new();
    let bus = ServiceBus::<TestMessage>::configure()
        .with_transport_endpoints(orders_broker.clone())
        .named("orders")
        .connect_to_broker("memory://orders")
        .serialized_as_json()
        .as_client_and_server()
        .with_transport_endpoints(billing_broker.clone())
        .named("billing")
        .connect_to_broker("memory://billing")
        .serialized_as_json()
        .as_server()
        .create()
        .await
        .unwrap();
    assert_eq!(bus.endpoints().len(), 8);
    assert!(bus.requester_id().starts_with("orders-"));

    let mut commands = bus.commands();

    // Routed to the first group that sends commands.
    bus.send(TestMessage::TestCommand { id: 1 }).await.unwrap();

    // Someone else sends straight to the billing queue.
    let outsider = billing_broker.connect("memory://billing").await.unwrap();
    let payload = serde_json::to_vec(&TestMessage::AuditCommand { id: 2 }).unwrap();
    outsider
        .send(&Address::queue("billing.commands"), payload, AckMode::AutoAcknowledge)
        .await
        .unwrap();

    let mut ids = vec![
        next(&mut commands).await.unwrap().id(),
        next(&mut commands).await.unwrap().id(),
    ];
    ids.sort();
    assert_eq!(ids, vec![1, 2]);

    bus.dispose().await.unwrap();
    assert_eq!(orders_broker.open_connections(), 0);
    assert_eq!(billing_broker.open_connections(), 1);
}

#[tokio::test]
async fn of_type_narrows_a_stream() {
    let broker = InMemoryBroker::new();
    let bus = local_bus(&broker, "narrow").await;
    let mut audits = bus.commands().of_type("AuditCommand");

    bus.send(TestMessage::TestCommand { id: 1 }).await.unwrap();
    bus.send(TestMessage::AuditCommand { id: 2 }).await.unwrap();
    bus.send(TestMessage::TestCommand { id: 3 }).await.unwrap();

    assert_eq!(
        next(&mut audits).await.unwrap(),
        TestMessage::AuditCommand { id: 2 }
    );
    assert!(stays_quiet(&mut audits).await);
}
