//! End-to-end: one bus answering its own commands and requests.

use futures::StreamExt;
use service_bus::{InMemoryBroker, Message, MessageKind, ServiceBus};

use crate::support::{init_tracing, next, request, response, stays_quiet, TestMessage};

async fn scenario_bus(broker: &InMemoryBroker) -> ServiceBus<TestMessage> {
    ServiceBus::<TestMessage>::configure()
        .with_transport_endpoints(broker.clone())
        .named("scenario")
        .using_queue_for(MessageKind::Command)
        .client_acknowledge()
        .using_queue_for(MessageKind::Request)
        .auto_acknowledge()
        .connect_to_broker("memory://scenario")
        .serialized_as_json()
        .as_client_and_server()
        .using_logging()
        .create()
        .await
        .unwrap()
}

#[tokio::test]
async fn each_kind_arrives_exactly_once() {
    init_tracing();
    let broker = InMemoryBroker::new();
    let bus = scenario_bus(&broker).await;

    // Command handler publishes an event.
    let mut commands = bus.commands();
    let handler = bus.clone();
    let command_handler = tokio::spawn(async move {
        let mut handled = Vec::new();
        while let Some(Ok(command)) = commands.next().await {
            handler
                .publish(TestMessage::TestEvent { id: command.id() })
                .await
                .unwrap();
            handled.push(command);
        }
        handled
    });

    // Request handler replies.
    let mut requests = bus.requests();
    let handler = bus.clone();
    let request_handler = tokio::spawn(async move {
        let mut handled = Vec::new();
        while let Some(Ok(request)) = requests.next().await {
            handler
                .reply(&request, response(request.id() * 10))
                .await
                .unwrap();
            handled.push(request);
        }
        handled
    });

    let mut events = bus.events();
    let mut responses = bus.responses();

    bus.send(TestMessage::TestCommand { id: 1 }).await.unwrap();
    let mut answers = bus.get_responses(request(2)).await.unwrap();

    let event = next(&mut events).await.unwrap();
    assert_eq!(event, TestMessage::TestEvent { id: 1 });

    let answer = next(&mut answers).await.unwrap();
    assert_eq!(answer.id(), 20);
    assert_eq!(answer.request_id(), Some(answers.request_id()));
    assert_eq!(next(&mut responses).await.unwrap(), answer);

    assert!(stays_quiet(&mut events).await);
    assert!(stays_quiet(&mut responses).await);
    assert!(stays_quiet(&mut answers).await);

    let stats = bus.stats();
    assert_eq!(stats.sent, 4);
    assert_eq!(stats.received, 4);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.acknowledged, 1);
    assert_eq!(stats.pending_requests, 1);
    assert_eq!(broker.acknowledged("scenario.commands"), 1);

    drop(answers);
    assert_eq!(bus.pending_requests(), 0);

    bus.dispose().await.unwrap();

    let commands = command_handler.await.unwrap();
    assert_eq!(commands, vec![TestMessage::TestCommand { id: 1 }]);
    let requests = request_handler.await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].id(), 2);
    assert!(requests[0].request_id().is_some());
}

#[cfg(feature = "bitcode")]
#[tokio::test]
async fn bitcode_carries_the_same_conversation() {
    let broker = InMemoryBroker::new();
    let bus = ServiceBus::<TestMessage>::configure()
        .with_transport_endpoints(broker.clone())
        .named("compact")
        .connect_to_broker("memory://compact")
        .serialized_as_bitcode()
        .as_client_and_server()
        .create()
        .await
        .unwrap();
    let responder = crate::support::spawn_responder(&bus);

    let mut commands = bus.commands();
    bus.send(TestMessage::TestCommand { id: 3 }).await.unwrap();
    assert_eq!(
        next(&mut commands).await.unwrap(),
        TestMessage::TestCommand { id: 3 }
    );

    let answer = bus
        .get_response(request(4), crate::support::WAIT)
        .await
        .unwrap();
    assert_eq!(answer.id(), 4);

    bus.dispose().await.unwrap();
    assert_eq!(responder.await.unwrap(), 1);
}
