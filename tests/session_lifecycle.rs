//! Session lifecycle tests against unusable brokers.
//!
//! These tests exercise the orchestrator's failure and cancellation paths
//! without a real broker: a refused connection, a broker that never
//! answers the CONNECT, and a session cancelled before it starts. Each
//! path must terminate quickly and with the documented outcome.

use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use blast_client::{ProtocolVersion, QosLevel};
use mqtt_blast::{run_session, SessionConfig};

fn session_config(host: &str, port: u16) -> SessionConfig {
    SessionConfig {
        broker_host: host.to_string(),
        broker_port: port,
        topic: "blast/test".to_string(),
        publishers: 3,
        qos: QosLevel::AtMostOnce,
        protocol: ProtocolVersion::V5,
        repeat: 5,
        repeat_delay: Duration::ZERO,
        duration: Duration::from_secs(30),
        grace: Duration::from_secs(5),
        payload_size: 64,
        client_id_prefix: "blast-test".to_string(),
        keep_alive: Duration::from_secs(30),
        clean_session: true,
        connect_timeout: Duration::from_secs(1),
        ack_timeout: Duration::from_secs(1),
        seed: 42,
    }
}

/// Port that was just bound and released, so connections are refused.
async fn refused_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind probe listener");
    let port = listener
        .local_addr()
        .expect("Failed to read probe address")
        .port();
    drop(listener);
    port
}

#[tokio::test]
async fn test_broker_down_terminates_with_subscriber_error() {
    let port = refused_port().await;
    let config = session_config("127.0.0.1", port);

    let start = Instant::now();
    let result = run_session(config, CancellationToken::new()).await;
    let elapsed = start.elapsed();

    let err = result.expect_err("session must fail with no broker");
    assert!(
        format!("{err:#}").contains("subscriber failed to connect"),
        "unexpected error chain: {err:#}"
    );
    // Zero publishers were spawned, so the session ends well within one
    // connect timeout plus teardown.
    assert!(elapsed < Duration::from_secs(8), "took {elapsed:?}");
}

#[tokio::test]
async fn test_unresponsive_broker_hits_connect_timeout() {
    // Accept TCP connections but never speak MQTT.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind silent listener");
    let port = listener
        .local_addr()
        .expect("Failed to read listener address")
        .port();

    let config = session_config("127.0.0.1", port);
    let start = Instant::now();
    let result = run_session(config, CancellationToken::new()).await;
    let elapsed = start.elapsed();

    assert!(result.is_err());
    assert!(elapsed < Duration::from_secs(8), "took {elapsed:?}");
    drop(listener);
}

#[tokio::test]
async fn test_cancellation_before_start_aborts_immediately() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind silent listener");
    let port = listener
        .local_addr()
        .expect("Failed to read listener address")
        .port();

    let cancel = CancellationToken::new();
    cancel.cancel();

    let start = Instant::now();
    let result = run_session(session_config("127.0.0.1", port), cancel).await;
    let elapsed = start.elapsed();

    let err = result.expect_err("cancelled session must not run");
    assert!(
        format!("{err:#}").contains("cancelled"),
        "unexpected error chain: {err:#}"
    );
    assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
}

#[tokio::test]
async fn test_invalid_config_is_rejected_before_connecting() {
    let mut config = session_config("127.0.0.1", 1);
    config.payload_size = 4;

    let result = run_session(config, CancellationToken::new()).await;
    let err = result.expect_err("undersized payload must be rejected");
    assert!(format!("{err:#}").contains("tracking header"));
}
