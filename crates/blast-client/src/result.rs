//! Per-handle run results.
//!
//! Each client handle owns exactly one [`RunResult`] while its session is
//! active; no other task writes to it. After disconnect the result is
//! read-only and safe to aggregate without locking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConnectError;

/// Role a handle plays in the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Publisher,
    Subscriber,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Publisher => write!(f, "publisher"),
            Role::Subscriber => write!(f, "subscriber"),
        }
    }
}

/// Classification of a recorded error event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Connection could not be established
    Connect,
    /// Subscription setup failed
    Subscribe,
    /// A single publish failed
    Publish,
    /// The established connection dropped or misbehaved
    Link,
    /// Messages still in flight when the drain grace period expired
    Drain,
    /// Session cancelled before the workload completed
    Cancel,
    /// The task running the handle failed
    Task,
}

/// One recorded error, ordered by occurrence time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    /// When the error occurred
    pub at: DateTime<Utc>,
    /// Classification
    pub kind: ErrorKind,
    /// Human-readable cause
    pub cause: String,
}

impl ErrorEvent {
    /// Record an error happening now.
    pub fn now(kind: ErrorKind, cause: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            kind,
            cause: cause.into(),
        }
    }
}

/// Receipt for one delivered message, decoded from the tracking header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    /// Sequence number the publisher stamped into the payload
    pub seq: u64,
    /// Send timestamp decoded from the payload
    pub sent_at: DateTime<Utc>,
    /// When the subscriber saw the message
    pub received_at: DateTime<Utc>,
}

impl Receipt {
    /// End-to-end latency in milliseconds. Clock skew can make this
    /// negative on multi-host setups; callers clamp as needed.
    pub fn latency_ms(&self) -> f64 {
        (self.received_at - self.sent_at)
            .num_microseconds()
            .map(|us| us as f64 / 1000.0)
            .unwrap_or(f64::MAX)
    }
}

/// Counters and events for one handle's session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// Client id of the owning handle
    pub client_id: String,
    /// Role the handle played
    pub role: Role,
    /// Messages handed to the client library
    pub sent: u64,
    /// Broker acks observed (QoS 1/2; zero at QoS 0)
    pub acked: u64,
    /// Messages delivered to this handle's subscription
    pub received: u64,
    /// Ordered error events
    pub errors: Vec<ErrorEvent>,
    /// One receipt per delivered message with a decodable header
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub receipts: Vec<Receipt>,
}

impl RunResult {
    /// Empty result for a handle that never got to do anything.
    pub fn empty(client_id: impl Into<String>, role: Role) -> Self {
        Self {
            client_id: client_id.into(),
            role,
            sent: 0,
            acked: 0,
            received: 0,
            errors: Vec::new(),
            receipts: Vec::new(),
        }
    }

    /// Result for a handle whose connect failed.
    pub fn connect_failed(client_id: impl Into<String>, role: Role, err: &ConnectError) -> Self {
        let mut result = Self::empty(client_id, role);
        result
            .errors
            .push(ErrorEvent::now(ErrorKind::Connect, err.to_string()));
        result
    }

    /// Result for a handle whose task died before producing one.
    pub fn task_failed(client_id: impl Into<String>, role: Role, cause: impl Into<String>) -> Self {
        let mut result = Self::empty(client_id, role);
        result.errors.push(ErrorEvent::now(ErrorKind::Task, cause));
        result
    }

    /// Whether this handle recorded a connect failure.
    pub fn has_connect_failure(&self) -> bool {
        self.errors.iter().any(|e| e.kind == ErrorKind::Connect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_failed_records_event() {
        let err = ConnectError::Network("connection refused".to_string());
        let result = RunResult::connect_failed("blast-pub0-abc", Role::Publisher, &err);
        assert_eq!(result.sent, 0);
        assert!(result.has_connect_failure());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].kind, ErrorKind::Connect);
        assert!(result.errors[0].cause.contains("connection refused"));
    }

    #[test]
    fn test_receipt_latency() {
        let sent_at = Utc::now();
        let receipt = Receipt {
            seq: 0,
            sent_at,
            received_at: sent_at + chrono::Duration::milliseconds(12),
        };
        assert_eq!(receipt.latency_ms(), 12.0);
    }

    #[test]
    fn test_error_events_serialize_with_kind() {
        let event = ErrorEvent::now(ErrorKind::Drain, "undelivered at drain: 3 messages");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"drain\""));
        assert!(json.contains("undelivered at drain"));
    }
}
