//! Correlated request/response.

use std::time::Duration;

use futures::StreamExt;
use service_bus::{BusError, Correlation, InMemoryBroker, Message, RoutingError};

use crate::support::{local_bus, next, request, response, spawn_responder, stays_quiet, TestMessage};

#[tokio::test]
async fn each_caller_sees_only_its_own_responses() {
    let broker = InMemoryBroker::new();
    let bus = local_bus(&broker, "pricing").await;
    let _responder = spawn_responder(&bus);
    let mut all_responses = bus.responses();

    let mut first = bus.get_responses(request(1)).await.unwrap();
    let mut second = bus.get_responses(request(2)).await.unwrap();
    assert_ne!(first.request_id(), second.request_id());

    assert_eq!(next(&mut second).await.unwrap().id(), 2);
    assert_eq!(next(&mut first).await.unwrap().id(), 1);
    assert!(stays_quiet(&mut first).await);
    assert!(stays_quiet(&mut second).await);

    let mut seen = vec![
        next(&mut all_responses).await.unwrap().id(),
        next(&mut all_responses).await.unwrap().id(),
    ];
    seen.sort();
    assert_eq!(seen, vec![1, 2]);
}

#[tokio::test]
async fn several_responses_to_one_request() {
    let broker = InMemoryBroker::new();
    let bus = local_bus(&broker, "auction").await;

    let mut requests = bus.requests();
    let server = bus.clone();
    tokio::spawn(async move {
        while let Some(Ok(request)) = requests.next().await {
            for bid in [100, 120, 150] {
                server.reply(&request, response(bid)).await.unwrap();
            }
        }
    });

    let answers = bus.get_responses(request(7)).await.unwrap();
    let bids: Vec<u32> = tokio::time::timeout(
        crate::support::WAIT,
        answers.take(3).map(|r| r.unwrap().id()).collect::<Vec<_>>(),
    )
    .await
    .unwrap();
    assert_eq!(bids, vec![100, 120, 150]);
    assert_eq!(bus.pending_requests(), 0);
}

#[tokio::test]
async fn reply_copies_the_request_correlation() {
    let broker = InMemoryBroker::new();
    let bus = local_bus(&broker, "echo").await;
    let mut requests = bus.requests();
    let mut responses = bus.responses();

    let pending = bus.get_responses(request(3)).await.unwrap();
    let incoming = next(&mut requests).await.unwrap();
    let correlation = incoming.correlation().cloned().unwrap();
    assert_eq!(correlation.request_id, pending.request_id());
    assert_eq!(correlation.requester_id, bus.requester_id());

    bus.reply(&incoming, response(3)).await.unwrap();
    let answer = next(&mut responses).await.unwrap();
    assert_eq!(answer.correlation(), Some(&correlation));
}

#[tokio::test]
async fn caller_assigned_ids_are_kept_and_must_be_unique() {
    let broker = InMemoryBroker::new();
    let bus = local_bus(&broker, "ids").await;

    let assigned = TestMessage::TestRequest {
        id: 1,
        correlation: Correlation::new("order-42", "checkout"),
    };
    let pending = bus.get_responses(assigned.clone()).await.unwrap();
    assert_eq!(pending.request_id(), "order-42");
    assert_eq!(format!("{pending:?}"), r#"ResponseStream { request_id: "order-42" }"#);

    let err = bus.get_responses(assigned.clone()).await.unwrap_err();
    assert_eq!(
        err,
        BusError::Routing(RoutingError::DuplicateRequestId("order-42".into()))
    );

    drop(pending);
    assert!(bus.get_responses(assigned).await.is_ok());
}

#[tokio::test]
async fn abandoned_requests_leave_nothing_behind() {
    let broker = InMemoryBroker::new();
    let bus = local_bus(&broker, "leaks").await;

    let mut held = Vec::new();
    for id in 0..50 {
        held.push(bus.get_responses(request(id)).await.unwrap());
    }
    assert_eq!(bus.pending_requests(), 50);

    drop(held);
    assert_eq!(bus.pending_requests(), 0);

    // Late responses for abandoned requests are still broadcast.
    let mut responses = bus.responses();
    let late = TestMessage::TestResponse {
        id: 9,
        correlation: Correlation::new("gone", bus.requester_id()),
    };
    bus.reply(
        &TestMessage::TestRequest {
            id: 9,
            correlation: Correlation::new("gone", bus.requester_id()),
        },
        late.clone(),
    )
    .await
    .unwrap();
    assert_eq!(next(&mut responses).await.unwrap(), late);
    assert_eq!(bus.pending_requests(), 0);
}

#[tokio::test]
async fn get_response_times_out_and_cleans_up() {
    let broker = InMemoryBroker::new();
    let bus = local_bus(&broker, "silent").await;

    let err = bus
        .get_response(request(1), Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::Timeout { .. }));
    assert_eq!(bus.pending_requests(), 0);
}

#[tokio::test]
async fn get_response_returns_the_first_answer() {
    let broker = InMemoryBroker::new();
    let bus = local_bus(&broker, "quick").await;
    let _responder = spawn_responder(&bus);

    let answer = bus
        .get_response(request(5), Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(answer.id(), 5);
    assert_eq!(bus.pending_requests(), 0);
}

#[tokio::test]
async fn reply_needs_a_request_and_a_response() {
    let broker = InMemoryBroker::new();
    let bus = local_bus(&broker, "strict").await;

    let err = bus
        .reply(&TestMessage::TestCommand { id: 1 }, response(1))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BusError::Routing(RoutingError::UnexpectedKind { .. })
    ));

    let err = bus
        .reply(&request(1), TestMessage::TestEvent { id: 1 })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BusError::Routing(RoutingError::UnexpectedKind { .. })
    ));

    let err = bus.get_responses(response(1)).await.unwrap_err();
    assert!(matches!(
        err,
        BusError::Routing(RoutingError::UnexpectedKind { .. })
    ));
}

#[tokio::test]
async fn request_456_gets_exactly_its_answer() {
    let broker = InMemoryBroker::new();
    let bus = local_bus(&broker, "lookup").await;
    let _responder = spawn_responder(&bus);

    let mut others = vec![
        bus.get_responses(request(123)).await.unwrap(),
        bus.get_responses(request(789)).await.unwrap(),
    ];
    let mut mine = bus.get_responses(request(456)).await.unwrap();

    let answer = next(&mut mine).await.unwrap();
    assert_eq!(answer.id(), 456);
    assert_eq!(answer.request_id(), Some(mine.request_id()));
    assert!(stays_quiet(&mut mine).await);

    for other in &mut others {
        assert_ne!(next(other).await.unwrap().id(), 456);
    }
}
