//! Error types for MQTT client handles.

use std::time::Duration;
use thiserror::Error;

/// Errors establishing a connection. Fatal to the handle, not to the
/// session, unless the handle is the subscriber.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// Broker reachable but rejected the CONNECT (bad client id,
    /// protocol version mismatch, not authorized).
    #[error("broker refused connection: {0}")]
    Refused(String),

    /// Network-level failure before a CONNACK arrived.
    #[error("network error connecting to broker: {0}")]
    Network(String),

    /// No CONNACK within the configured connect timeout.
    #[error("timed out after {0:?} waiting for CONNACK")]
    Timeout(Duration),
}

/// Errors on a single publish. Recorded in the owning run result; the
/// publisher continues with its next repetition.
#[derive(Error, Debug)]
pub enum PublishError {
    /// The client library refused to accept the message.
    #[error("publish not accepted by client: {0}")]
    Channel(String),

    /// QoS 1/2 only: no PUBACK/PUBCOMP within the ack timeout.
    #[error("timed out after {0:?} waiting for broker ack")]
    AckTimeout(Duration),

    /// The connection dropped while the publish was in flight.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

/// Errors on subscription setup. Fatal to the whole session: there is no
/// point running publishers with no listener.
#[derive(Error, Debug)]
pub enum SubscribeError {
    /// The client library refused to accept the subscribe request.
    #[error("subscribe not accepted by client: {0}")]
    Channel(String),

    /// Broker answered the SUBSCRIBE with a failure reason code.
    #[error("subscription rejected: {0}")]
    Rejected(String),

    /// No SUBACK within the configured timeout.
    #[error("timed out after {0:?} waiting for SUBACK")]
    Timeout(Duration),

    /// The connection dropped before the SUBACK arrived.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

/// Errors on disconnect. Logged by callers, never propagated: teardown
/// must always complete.
#[derive(Error, Debug)]
pub enum DisconnectError {
    /// The client library refused to accept the disconnect request.
    #[error("disconnect not accepted by client: {0}")]
    Channel(String),
}
