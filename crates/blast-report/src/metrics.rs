//! Report types and aggregation.
//!
//! Pure aggregation: the builder reads `RunResult`s only after every
//! writer has joined, computes totals, loss and latency, and judges the
//! run against the configured loss threshold.

use blast_client::{ErrorEvent, Receipt, Role, RunResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session facts the orchestrator knows and the results do not carry.
#[derive(Debug, Clone)]
pub struct ReportMeta {
    /// Broker address as given on the command line
    pub broker: String,
    /// Topic under load
    pub topic: String,
    /// QoS level of the run
    pub qos: u8,
    /// Protocol revision ("3.1.1" or "5")
    pub protocol: String,
    /// Number of publishers the session was asked to run
    pub publisher_count: usize,
    /// Maximum tolerated loss percentage
    pub max_loss_pct: f64,
    /// Session start
    pub started_at: DateTime<Utc>,
    /// Session end (teardown complete)
    pub completed_at: DateTime<Utc>,
}

/// Per-handle summary row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSummary {
    pub client_id: String,
    pub role: Role,
    pub sent: u64,
    pub acked: u64,
    pub received: u64,
    pub error_count: u64,
}

impl ClientSummary {
    fn from_result(result: &RunResult) -> Self {
        Self {
            client_id: result.client_id.clone(),
            role: result.role,
            sent: result.sent,
            acked: result.acked,
            received: result.received,
            error_count: result.errors.len() as u64,
        }
    }
}

/// End-to-end latency distribution over all delivered messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyStats {
    pub samples: u64,
    pub min_ms: f64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

impl LatencyStats {
    /// Compute the distribution from subscriber receipts. `None` when no
    /// message carried a decodable tracking header.
    pub fn from_receipts(receipts: &[Receipt]) -> Option<Self> {
        let mut samples: Vec<f64> = receipts
            .iter()
            .map(|r| r.latency_ms().max(0.0))
            .collect();
        if samples.is_empty() {
            return None;
        }
        samples.sort_by(|a, b| a.total_cmp(b));

        let count = samples.len();
        let mean = samples.iter().sum::<f64>() / count as f64;
        Some(Self {
            samples: count as u64,
            min_ms: samples[0],
            mean_ms: mean,
            p50_ms: percentile(&samples, 50.0),
            p95_ms: percentile(&samples, 95.0),
            p99_ms: percentile(&samples, 99.0),
            max_ms: samples[count - 1],
        })
    }
}

/// Nearest-rank percentile over an ascending-sorted slice.
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    let index = ((pct / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[index.min(sorted.len() - 1)]
}

/// Complete report for one load session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub broker: String,
    pub topic: String,
    pub qos: u8,
    pub protocol: String,
    pub publisher_count: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub total_sent: u64,
    pub total_acked: u64,
    pub total_received: u64,
    /// `sent - received`, floored at zero
    pub lost: u64,
    pub loss_pct: f64,
    pub max_loss_pct: f64,
    /// Handles that never established their connection
    pub connect_failures: u64,
    pub error_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<LatencyStats>,
    /// Subscriber first, then publishers in spawn order
    pub clients: Vec<ClientSummary>,
    /// Every recorded error event across all handles, in time order
    pub errors: Vec<ErrorEvent>,
    pub passed: bool,
}

impl RunReport {
    /// Aggregate all handle results into the final report.
    pub fn build(meta: ReportMeta, subscriber: &RunResult, publishers: &[RunResult]) -> Self {
        let total_sent: u64 = publishers.iter().map(|r| r.sent).sum();
        let total_acked: u64 = publishers.iter().map(|r| r.acked).sum();
        let total_received = subscriber.received;

        let lost = total_sent.saturating_sub(total_received);
        let loss_pct = if total_sent > 0 {
            lost as f64 * 100.0 / total_sent as f64
        } else {
            0.0
        };

        let connect_failures = std::iter::once(subscriber)
            .chain(publishers.iter())
            .filter(|r| r.has_connect_failure())
            .count() as u64;

        let mut errors: Vec<ErrorEvent> = std::iter::once(subscriber)
            .chain(publishers.iter())
            .flat_map(|r| r.errors.iter().cloned())
            .collect();
        errors.sort_by_key(|e| e.at);
        let error_count = errors.len() as u64;

        let mut clients = Vec::with_capacity(publishers.len() + 1);
        clients.push(ClientSummary::from_result(subscriber));
        clients.extend(publishers.iter().map(ClientSummary::from_result));

        let passed = connect_failures == 0 && loss_pct <= meta.max_loss_pct;

        Self {
            broker: meta.broker,
            topic: meta.topic,
            qos: meta.qos,
            protocol: meta.protocol,
            publisher_count: meta.publisher_count,
            started_at: meta.started_at,
            completed_at: meta.completed_at,
            duration_secs: (meta.completed_at - meta.started_at).num_milliseconds() as f64
                / 1000.0,
            total_sent,
            total_acked,
            total_received,
            lost,
            loss_pct,
            max_loss_pct: meta.max_loss_pct,
            connect_failures,
            error_count,
            latency: LatencyStats::from_receipts(&subscriber.receipts),
            clients,
            errors,
            passed,
        }
    }

    /// Process exit code for this run: 1 for any connect failure, 2 for a
    /// loss threshold breach, 0 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.connect_failures > 0 {
            1
        } else if !self.passed {
            2
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blast_client::ConnectError;
    use chrono::Duration as ChronoDuration;

    fn meta(max_loss_pct: f64) -> ReportMeta {
        let started_at = Utc::now();
        ReportMeta {
            broker: "localhost:1883".to_string(),
            topic: "blast/load".to_string(),
            qos: 0,
            protocol: "5".to_string(),
            publisher_count: 2,
            max_loss_pct,
            started_at,
            completed_at: started_at + ChronoDuration::seconds(10),
        }
    }

    fn publisher(id: &str, sent: u64, acked: u64) -> RunResult {
        let mut result = RunResult::empty(id, Role::Publisher);
        result.sent = sent;
        result.acked = acked;
        result
    }

    fn subscriber(received: u64) -> RunResult {
        let mut result = RunResult::empty("blast-sub", Role::Subscriber);
        result.received = received;
        result
    }

    #[test]
    fn test_clean_run_passes() {
        let report = RunReport::build(
            meta(0.0),
            &subscriber(200),
            &[publisher("p0", 100, 0), publisher("p1", 100, 0)],
        );
        assert_eq!(report.total_sent, 200);
        assert_eq!(report.total_received, 200);
        assert_eq!(report.lost, 0);
        assert_eq!(report.loss_pct, 0.0);
        assert!(report.passed);
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_loss_is_never_negative() {
        // Duplicate deliveries (QoS 1 redelivery) can push received past sent.
        let report = RunReport::build(meta(0.0), &subscriber(250), &[publisher("p0", 200, 200)]);
        assert_eq!(report.lost, 0);
        assert_eq!(report.loss_pct, 0.0);
        assert!(report.passed);
    }

    #[test]
    fn test_loss_threshold_breach_exits_2() {
        let report = RunReport::build(
            meta(5.0),
            &subscriber(180),
            &[publisher("p0", 100, 0), publisher("p1", 100, 0)],
        );
        assert_eq!(report.lost, 20);
        assert_eq!(report.loss_pct, 10.0);
        assert!(!report.passed);
        assert_eq!(report.exit_code(), 2);
    }

    #[test]
    fn test_loss_within_threshold_passes() {
        let report = RunReport::build(
            meta(15.0),
            &subscriber(180),
            &[publisher("p0", 100, 0), publisher("p1", 100, 0)],
        );
        assert_eq!(report.loss_pct, 10.0);
        assert!(report.passed);
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_connect_failure_exits_1_even_with_zero_loss() {
        let failed = RunResult::connect_failed(
            "p1",
            Role::Publisher,
            &ConnectError::Network("connection refused".to_string()),
        );
        let report = RunReport::build(
            meta(0.0),
            &subscriber(100),
            &[publisher("p0", 100, 0), failed],
        );
        assert_eq!(report.lost, 0);
        assert_eq!(report.connect_failures, 1);
        assert!(!report.passed);
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_zero_sent_has_zero_loss_pct() {
        let report = RunReport::build(meta(0.0), &subscriber(0), &[publisher("p0", 0, 0)]);
        assert_eq!(report.loss_pct, 0.0);
        assert!(report.passed);
    }

    #[test]
    fn test_latency_percentiles() {
        let sorted: Vec<f64> = (1..=100).map(|n| n as f64).collect();
        assert_eq!(percentile(&sorted, 50.0), 51.0);
        assert_eq!(percentile(&sorted, 95.0), 95.0);
        assert_eq!(percentile(&sorted, 99.0), 99.0);
        assert_eq!(percentile(&sorted, 100.0), 100.0);
        assert_eq!(percentile(&[7.0], 99.0), 7.0);
    }

    #[test]
    fn test_latency_stats_from_receipts() {
        let base = Utc::now();
        let receipts: Vec<Receipt> = (0..10)
            .map(|i| Receipt {
                seq: i,
                sent_at: base,
                received_at: base + ChronoDuration::milliseconds(i as i64 + 1),
            })
            .collect();
        let stats = LatencyStats::from_receipts(&receipts).unwrap();
        assert_eq!(stats.samples, 10);
        assert_eq!(stats.min_ms, 1.0);
        assert_eq!(stats.max_ms, 10.0);
        assert_eq!(stats.mean_ms, 5.5);

        assert!(LatencyStats::from_receipts(&[]).is_none());
    }

    #[test]
    fn test_report_serializes_to_json() {
        let report = RunReport::build(meta(0.0), &subscriber(100), &[publisher("p0", 100, 0)]);
        let json = serde_json::to_string_pretty(&report).unwrap();
        assert!(json.contains("\"total_sent\": 100"));
        assert!(json.contains("\"passed\": true"));
    }
}
