mod common;

use apns_courier::error::{ConnectError, SendError, TransportError};
use apns_courier::{ConnectionState, Endpoint, PushNotification, ReconnectionPolicy};
use common::{Behavior, DEVICE_TOKEN, MetricsEvent, RecordingMetricsListener, SimulatedGateway, TOPIC};
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;

fn notification() -> PushNotification {
    PushNotification::new(DEVICE_TOKEN, TOPIC, r#"{"aps":{"alert":"hi"}}"#).unwrap()
}

#[tokio::test]
async fn test_loss_fails_pending_then_reconnects() {
    common::setup_tracing();
    let gateway = SimulatedGateway::new();
    gateway.set_behavior(Behavior::Hold);
    let client = common::client_builder(&gateway).build().unwrap();
    client.connect(Endpoint::development()).await.unwrap();

    let pending: Vec<_> = (0..3).map(|_| client.send_notification(notification())).collect();
    gateway.wait_for_requests(3).await;

    let reconnected = client.reconnection_future();
    gateway.drop_connections();

    for result in futures::future::join_all(pending).await {
        assert!(matches!(result, Err(SendError::ConnectionLost(_))), "unexpected outcome: {result:?}");
    }

    tokio::time::timeout(Duration::from_secs(5), reconnected).await.unwrap().unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(gateway.connect_attempts(), 2);

    // Resubmission after reconnecting is the caller's decision.
    gateway.set_behavior(Behavior::Accept);
    let response = client.send_notification(notification()).await.unwrap();
    assert!(response.is_accepted());

    client.shutdown().await;
}

#[tokio::test]
async fn test_reconnection_future_waits_for_the_next_connection() {
    common::setup_tracing();
    let gateway = SimulatedGateway::new();
    let client = common::client_builder(&gateway).build().unwrap();
    client.connect(Endpoint::development()).await.unwrap();

    // Subscribed after the first connection, so it must not resolve for it.
    let mut reconnected = client.reconnection_future();
    assert!(tokio::time::timeout(Duration::from_millis(50), &mut reconnected).await.is_err());

    gateway.drop_connections();
    tokio::time::timeout(Duration::from_secs(5), reconnected).await.unwrap().unwrap();

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_connect_backs_off_between_attempts() {
    common::setup_tracing();
    let gateway = SimulatedGateway::new();
    gateway.fail_next_connects(2);
    let listener = Arc::new(RecordingMetricsListener::default());
    let policy = ReconnectionPolicy::default()
        .with_initial_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(1))
        .with_jitter(0.0);
    let client = common::client_builder(&gateway)
        .with_reconnection_policy(policy)
        .with_metrics_listener(Arc::clone(&listener) as _)
        .build()
        .unwrap();

    let started = tokio::time::Instant::now();
    client.connect(Endpoint::development()).await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(gateway.connect_attempts(), 3);
    assert_eq!(
        listener.events(),
        vec![
            MetricsEvent::ConnectionAttempt,
            MetricsEvent::ConnectionFailed,
            MetricsEvent::ConnectionAttempt,
            MetricsEvent::ConnectionFailed,
            MetricsEvent::ConnectionAttempt,
            MetricsEvent::ConnectionSucceeded,
        ]
    );

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_connect_gives_up_after_max_attempts() {
    common::setup_tracing();
    let gateway = SimulatedGateway::new();
    gateway.fail_next_connects(usize::MAX);
    let client = common::client_builder(&gateway)
        .with_reconnection_policy(common::fast_policy().with_max_attempts(Some(3)))
        .build()
        .unwrap();

    let result = client.connect(Endpoint::development()).await;

    match result {
        Err(ConnectError::AttemptsExhausted { attempts, last }) => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last, ConnectError::ConnectFailure { cause: TransportError::Io(_), .. }));
        }
        other => panic!("expected AttemptsExhausted, got {other:?}"),
    }
    assert_eq!(gateway.connect_attempts(), 3);
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_reconnection_future_reports_when_reconnecting_gives_up() {
    common::setup_tracing();
    let gateway = SimulatedGateway::new();
    let client = common::client_builder(&gateway)
        .with_reconnection_policy(common::fast_policy().with_max_attempts(Some(2)))
        .build()
        .unwrap();
    client.connect(Endpoint::development()).await.unwrap();

    let reconnected = client.reconnection_future();
    gateway.fail_next_connects(usize::MAX);
    gateway.drop_connections();

    let result = tokio::time::timeout(Duration::from_secs(5), reconnected).await.unwrap();
    match result {
        Err(ConnectError::AttemptsExhausted { attempts, last }) => {
            assert_eq!(attempts, 2);
            assert!(matches!(*last, ConnectError::ConnectFailure { cause: TransportError::Io(_), .. }));
        }
        other => panic!("expected AttemptsExhausted, got {other:?}"),
    }
    assert_eq!(gateway.connect_attempts(), 3);
    assert_eq!(client.state(), ConnectionState::Disconnected);

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_backoff_restarts_from_initial_delay_after_connecting() {
    common::setup_tracing();
    let gateway = SimulatedGateway::new();
    gateway.fail_next_connects(2);
    let policy = ReconnectionPolicy::default()
        .with_initial_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(1))
        .with_jitter(0.0);
    let client = common::client_builder(&gateway).with_reconnection_policy(policy).build().unwrap();
    client.connect(Endpoint::development()).await.unwrap();
    assert_eq!(gateway.connect_attempts(), 3);

    gateway.fail_next_connects(1);
    let reconnected = client.reconnection_future();
    let lost_at = tokio::time::Instant::now();
    gateway.drop_connections();
    reconnected.await.unwrap();

    // One failure, then a single initial delay; a carried-over backoff would wait 400ms.
    let waited = lost_at.elapsed();
    assert!(waited >= Duration::from_millis(100), "waited {waited:?}");
    assert!(waited < Duration::from_millis(200), "waited {waited:?}");
    assert_eq!(gateway.connect_attempts(), 5);

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_connects_share_one_attempt() {
    common::setup_tracing();
    let gateway = SimulatedGateway::new();
    gateway.fail_next_connects(1);
    let client = common::client_builder(&gateway).build().unwrap();

    let (first, second) =
        tokio::join!(client.connect(Endpoint::development()), client.connect(Endpoint::development()));

    assert_eq!(first, Ok(()));
    assert_eq!(second, Ok(()));
    assert_eq!(gateway.connect_attempts(), 2);

    client.shutdown().await;
}

#[tokio::test]
async fn test_state_changes_are_observable() {
    common::setup_tracing();
    let gateway = SimulatedGateway::new();
    let client = common::client_builder(&gateway).build().unwrap();

    let mut states = client.state_changes();
    assert_eq!(states.next().await, Some(ConnectionState::Disconnected));

    client.connect(Endpoint::development()).await.unwrap();
    let connected = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(state) = states.next().await {
            if state == ConnectionState::Connected {
                return true;
            }
        }
        false
    });
    assert!(connected.await.unwrap());

    client.shutdown().await;
    assert_eq!(states.next().await, Some(ConnectionState::Draining));
}

#[tokio::test]
async fn test_shutdown_resolves_every_pending_submission() {
    common::setup_tracing();
    let gateway = SimulatedGateway::new();
    gateway.set_behavior(Behavior::Hold);
    let listener = Arc::new(RecordingMetricsListener::default());
    let client = common::client_builder(&gateway).with_metrics_listener(Arc::clone(&listener) as _).build().unwrap();
    client.connect(Endpoint::development()).await.unwrap();

    let mut pending: Vec<_> = (0..5).map(|_| client.send_notification(notification())).collect();
    gateway.wait_for_requests(5).await;
    let reconnected = client.reconnection_future();

    client.shutdown().await;

    // Already resolved: polling once must be enough.
    for handle in &mut pending {
        let result = futures::FutureExt::now_or_never(handle).expect("pending submission left unresolved");
        assert_eq!(result, Err(SendError::ConnectionClosed));
    }
    let failed = listener.events().iter().filter(|event| matches!(event, MetricsEvent::Failed(_))).count();
    assert_eq!(failed, 5);

    assert_eq!(client.state(), ConnectionState::Draining);
    assert_eq!(reconnected.await, Err(ConnectError::ShuttingDown));
    assert_eq!(client.send_notification(notification()).await, Err(SendError::ClientNotConnected));
    assert_eq!(client.connect(Endpoint::development()).await, Err(ConnectError::ShuttingDown));
    assert_eq!(gateway.connect_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_a_connect_in_progress() {
    common::setup_tracing();
    let gateway = SimulatedGateway::new();
    gateway.fail_next_connects(usize::MAX);
    let client = common::client_builder(&gateway).build().unwrap();

    let connecting = tokio::spawn({
        let client = client.clone();
        async move { client.connect(Endpoint::development()).await }
    });
    tokio::time::sleep(Duration::from_millis(25)).await;

    client.shutdown().await;

    assert_eq!(connecting.await.unwrap(), Err(ConnectError::ShuttingDown));
    assert_eq!(client.state(), ConnectionState::Draining);
}
