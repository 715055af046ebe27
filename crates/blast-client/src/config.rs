//! Connection and workload configuration for client handles.

use std::time::Duration;
use thiserror::Error;

use crate::payload;

/// MQTT protocol revision a handle speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// MQTT 3.1.1
    V311,
    /// MQTT 5.0
    V5,
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolVersion::V311 => write!(f, "3.1.1"),
            ProtocolVersion::V5 => write!(f, "5"),
        }
    }
}

/// Delivery guarantee level for publishes and subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum QosLevel {
    /// QoS 0, fire and forget
    AtMostOnce,
    /// QoS 1, PUBACK-acknowledged
    AtLeastOnce,
    /// QoS 2, PUBCOMP-acknowledged
    ExactlyOnce,
}

impl QosLevel {
    /// Numeric level as it appears on the wire and on the CLI.
    pub fn as_u8(self) -> u8 {
        match self {
            QosLevel::AtMostOnce => 0,
            QosLevel::AtLeastOnce => 1,
            QosLevel::ExactlyOnce => 2,
        }
    }

    /// Whether the broker acknowledges publishes at this level.
    pub fn is_acked(self) -> bool {
        !matches!(self, QosLevel::AtMostOnce)
    }
}

/// Rejection of a QoS value outside 0..=2.
#[derive(Error, Debug)]
#[error("invalid QoS level {0}, expected 0, 1 or 2")]
pub struct InvalidQos(pub u8);

impl TryFrom<u8> for QosLevel {
    type Error = InvalidQos;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QosLevel::AtMostOnce),
            1 => Ok(QosLevel::AtLeastOnce),
            2 => Ok(QosLevel::ExactlyOnce),
            other => Err(InvalidQos(other)),
        }
    }
}

/// Configuration for one MQTT connection.
///
/// Client ids must be unique across all simultaneously connected handles
/// against the same broker; the session orchestrator derives them from a
/// per-run nonce.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Broker hostname or IP
    pub host: String,
    /// Broker TCP port
    pub port: u16,
    /// Client identifier, unique per handle
    pub client_id: String,
    /// Protocol revision to speak
    pub protocol: ProtocolVersion,
    /// Keep-alive interval
    pub keep_alive: Duration,
    /// Start with a clean session (3.1.1) / clean start (5.0)
    pub clean_session: bool,
    /// How long to wait for the CONNACK
    pub connect_timeout: Duration,
    /// How long a QoS 1/2 publish waits for its broker ack
    pub ack_timeout: Duration,
}

impl ClientConfig {
    /// Config with the harness defaults for everything but the address
    /// and client id.
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
            protocol: ProtocolVersion::V5,
            keep_alive: Duration::from_secs(30),
            clean_session: true,
            connect_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(5),
        }
    }
}

/// One publisher's workload. Immutable once the publisher starts.
#[derive(Debug, Clone)]
pub struct PublishJob {
    /// Topic every repetition publishes to
    pub topic: String,
    /// QoS level for every repetition
    pub qos: QosLevel,
    /// Total payload size in bytes, including the tracking header
    pub payload_size: usize,
    /// Number of repetitions
    pub repeat: u64,
    /// Minimum spacing between repetitions (zero = as fast as acks allow)
    pub repeat_delay: Duration,
    /// Seed for the deterministic filler bytes
    pub seed: u64,
}

impl PublishJob {
    /// Filler bytes shared by every repetition of this job. The tracking
    /// header is overwritten per message; the filler stays constant.
    pub fn filler(&self) -> Vec<u8> {
        let len = self.payload_size.saturating_sub(payload::HEADER_LEN);
        payload::filler(self.seed, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_round_trip() {
        for level in 0u8..=2 {
            let qos = QosLevel::try_from(level).unwrap();
            assert_eq!(qos.as_u8(), level);
        }
        assert!(QosLevel::try_from(3).is_err());
    }

    #[test]
    fn test_qos_ack_expectation() {
        assert!(!QosLevel::AtMostOnce.is_acked());
        assert!(QosLevel::AtLeastOnce.is_acked());
        assert!(QosLevel::ExactlyOnce.is_acked());
    }

    #[test]
    fn test_job_filler_is_deterministic() {
        let job = PublishJob {
            topic: "blast/load".to_string(),
            qos: QosLevel::AtMostOnce,
            payload_size: 64,
            repeat: 10,
            repeat_delay: Duration::ZERO,
            seed: 42,
        };
        assert_eq!(job.filler(), job.filler());
        assert_eq!(job.filler().len(), 64 - payload::HEADER_LEN);
    }
}
