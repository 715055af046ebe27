//! Session orchestration.
//!
//! The orchestrator owns the subscriber's lifetime and the pool of
//! publisher lifetimes. It starts them in order (subscriber first, so no
//! publisher can race ahead of the listener), waits for completion or the
//! session deadline, and guarantees that every handle is disconnected
//! exactly once through a single teardown path, whether the session ends
//! normally, by timeout or by cancellation.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use blast_client::{
    payload, ClientConfig, ClientHandle, ErrorKind, ProtocolVersion, PublishError, PublishJob,
    QosLevel, Role, RunResult,
};
use blast_pacer::Pacer;

/// Lifecycle phases of a load session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    SubscriberStarting,
    SubscriberReady,
    PublishersRunning,
    Draining,
    Terminated,
}

impl SessionPhase {
    /// Whether `next` is a legal successor of this phase.
    pub fn can_advance_to(self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        matches!(
            (self, next),
            // Normal lifecycle
            (Idle, SubscriberStarting)
                | (SubscriberStarting, SubscriberReady)
                | (SubscriberReady, PublishersRunning)
                | (PublishersRunning, Draining)
                | (Draining, Terminated)
                // Subscriber setup failure aborts the session outright
                | (SubscriberStarting, Terminated)
                // Cancellation cuts to draining from any live phase
                | (Idle, Draining)
                | (SubscriberStarting, Draining)
                | (SubscriberReady, Draining)
        )
    }
}

/// Phase holder that rejects illegal transitions and logs legal ones.
struct PhaseTracker {
    phase: SessionPhase,
}

impl PhaseTracker {
    fn new() -> Self {
        Self {
            phase: SessionPhase::Idle,
        }
    }

    fn advance(&mut self, next: SessionPhase) -> Result<()> {
        anyhow::ensure!(
            self.phase.can_advance_to(next),
            "invalid session transition {:?} -> {:?}",
            self.phase,
            next
        );
        tracing::info!("Session phase: {:?} -> {:?}", self.phase, next);
        self.phase = next;
        Ok(())
    }
}

/// Everything a session needs to run.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Broker hostname or IP
    pub broker_host: String,
    /// Broker TCP port
    pub broker_port: u16,
    /// Topic all publishers publish to and the subscriber listens on
    pub topic: String,
    /// Number of concurrent publishers
    pub publishers: usize,
    /// QoS level for publishes and the subscription
    pub qos: QosLevel,
    /// Protocol revision for every handle
    pub protocol: ProtocolVersion,
    /// Repetitions per publisher
    pub repeat: u64,
    /// Minimum spacing between a publisher's repetitions
    pub repeat_delay: Duration,
    /// Maximum time publishers may run before being stopped
    pub duration: Duration,
    /// Grace period for in-flight messages after publishers stop
    pub grace: Duration,
    /// Total payload size per message, tracking header included
    pub payload_size: usize,
    /// Client ids are `{prefix}-{role}{index}-{nonce}`
    pub client_id_prefix: String,
    /// MQTT keep-alive interval
    pub keep_alive: Duration,
    /// Clean-session (3.1.1) / clean-start (5.0) flag
    pub clean_session: bool,
    /// How long each handle waits for its CONNACK
    pub connect_timeout: Duration,
    /// How long a QoS 1/2 publish waits for its broker ack
    pub ack_timeout: Duration,
    /// Base seed for payload filler; publisher i uses `seed + i`
    pub seed: u64,
}

impl SessionConfig {
    /// Reject configurations the session cannot run with.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.publishers > 0, "at least one publisher is required");
        anyhow::ensure!(
            self.payload_size >= payload::HEADER_LEN,
            "payload size must be at least {} bytes to carry the tracking header",
            payload::HEADER_LEN
        );
        anyhow::ensure!(
            self.keep_alive >= Duration::from_secs(5),
            "keep-alive must be at least 5 seconds"
        );
        Ok(())
    }

    fn client_config(&self, client_id: String) -> ClientConfig {
        ClientConfig {
            host: self.broker_host.clone(),
            port: self.broker_port,
            client_id,
            protocol: self.protocol,
            keep_alive: self.keep_alive,
            clean_session: self.clean_session,
            connect_timeout: self.connect_timeout,
            ack_timeout: self.ack_timeout,
        }
    }
}

/// All results of a finished session. Owned by the caller once the
/// orchestrator returns; every writer has joined by then.
#[derive(Debug)]
pub struct SessionOutcome {
    /// Final phase, always `Terminated`
    pub phase: SessionPhase,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub subscriber: RunResult,
    pub publishers: Vec<RunResult>,
}

/// Run one load session to completion.
///
/// Returns an error only when the subscriber cannot be set up (nothing to
/// measure without a listener) or when cancellation strikes before it is
/// ready. Publisher failures are contained per task and surface in the
/// outcome's results instead.
pub async fn run_session(
    config: SessionConfig,
    cancel: CancellationToken,
) -> Result<SessionOutcome> {
    config.validate()?;
    let started_at = Utc::now();
    let nonce = run_nonce();
    let mut tracker = PhaseTracker::new();

    tracker.advance(SessionPhase::SubscriberStarting)?;
    let sub_config = config.client_config(format!("{}-sub-{}", config.client_id_prefix, nonce));
    let mut subscriber = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracker.advance(SessionPhase::Draining)?;
            tracker.advance(SessionPhase::Terminated)?;
            anyhow::bail!("session cancelled before the subscriber was ready");
        }
        connected = ClientHandle::connect(sub_config, Role::Subscriber) => match connected {
            Ok(handle) => handle,
            Err(err) => {
                tracker.advance(SessionPhase::Terminated)?;
                return Err(anyhow::Error::new(err).context("subscriber failed to connect"));
            }
        },
    };

    if let Err(err) = subscriber.subscribe(&config.topic, config.qos).await {
        if let Err(derr) = subscriber.disconnect().await {
            tracing::warn!("Subscriber disconnect after failed subscribe: {}", derr);
        }
        tracker.advance(SessionPhase::Terminated)?;
        return Err(anyhow::Error::new(err).context("subscriber failed to subscribe"));
    }
    tracker.advance(SessionPhase::SubscriberReady)?;

    // Publishers observe cancellation through a child token so the session
    // can also stop them on its own deadline.
    tracker.advance(SessionPhase::PublishersRunning)?;
    let stop_publishing = cancel.child_token();
    let publisher_ids: Vec<String> = (0..config.publishers)
        .map(|index| format!("{}-pub{}-{}", config.client_id_prefix, index, nonce))
        .collect();

    let mut tasks = Vec::with_capacity(config.publishers);
    for (index, client_id) in publisher_ids.iter().enumerate() {
        let client_config = config.client_config(client_id.clone());
        let job = PublishJob {
            topic: config.topic.clone(),
            qos: config.qos,
            payload_size: config.payload_size,
            repeat: config.repeat,
            repeat_delay: config.repeat_delay,
            seed: config.seed.wrapping_add(index as u64),
        };
        tasks.push(tokio::spawn(run_publisher(
            client_config,
            job,
            stop_publishing.clone(),
        )));
    }
    tracing::info!(
        "Spawned {} publishers, {} repetitions each",
        config.publishers,
        config.repeat
    );

    let mut joined = std::pin::pin!(futures::future::join_all(tasks));
    let join_results = tokio::select! {
        results = &mut joined => results,
        _ = tokio::time::sleep(config.duration) => {
            tracing::warn!(
                "Session duration of {:?} elapsed, stopping publishers",
                config.duration
            );
            stop_publishing.cancel();
            joined.await
        }
        _ = cancel.cancelled() => {
            tracing::warn!("Cancellation requested, stopping publishers");
            joined.await
        }
    };

    let publishers: Vec<RunResult> = join_results
        .into_iter()
        .zip(publisher_ids)
        .map(|(result, client_id)| match result {
            Ok(result) => result,
            Err(err) => RunResult::task_failed(
                client_id,
                Role::Publisher,
                format!("publisher task failed: {err}"),
            ),
        })
        .collect();

    // Drain: give in-flight messages the grace period to land, ending
    // early once everything the publishers sent has been delivered.
    tracker.advance(SessionPhase::Draining)?;
    let expected: u64 = publishers.iter().map(|r| r.sent).sum();
    let mut received_rx = subscriber.received_watch();
    let received_before = *received_rx.borrow();
    if received_before < expected {
        tracing::info!(
            "Draining: {} of {} messages delivered, waiting up to {:?}",
            received_before,
            expected,
            config.grace
        );
        tokio::select! {
            drained = tokio::time::timeout(config.grace, received_rx.wait_for(|&n| n >= expected)) => {
                match drained {
                    Ok(Ok(_)) => tracing::info!("Drain complete, all sent messages delivered"),
                    Ok(Err(_)) => tracing::warn!("Subscriber link closed during drain"),
                    Err(_) => tracing::warn!("Drain grace period of {:?} expired", config.grace),
                }
            }
            _ = cancel.cancelled() => {
                tracing::warn!("Cancellation requested, cutting drain short");
            }
        }
    }

    let received_total = *subscriber.received_watch().borrow();
    if received_total < expected {
        let missing = expected - received_total;
        subscriber.push_error(
            ErrorKind::Drain,
            format!("undelivered at drain: {missing} of {expected} messages still in flight"),
        );
    }

    if let Err(err) = subscriber.disconnect().await {
        tracing::warn!("Subscriber disconnect failed: {}", err);
    }
    tracker.advance(SessionPhase::Terminated)?;

    let subscriber_result = subscriber.into_result().await;
    tracing::info!(
        "Session terminated: sent={} received={}",
        expected,
        subscriber_result.received
    );

    Ok(SessionOutcome {
        phase: tracker.phase,
        started_at,
        completed_at: Utc::now(),
        subscriber: subscriber_result,
        publishers,
    })
}

/// One publisher's full lifetime: connect, paced publishes, disconnect.
///
/// Publish errors are contained here and recorded in the returned result;
/// only a lost connection stops the loop early.
async fn run_publisher(
    config: ClientConfig,
    job: PublishJob,
    cancel: CancellationToken,
) -> RunResult {
    let client_id = config.client_id.clone();
    let mut handle = match ClientHandle::connect(config, Role::Publisher).await {
        Ok(handle) => handle,
        Err(err) => {
            tracing::error!("Publisher {} failed to connect: {}", client_id, err);
            return RunResult::connect_failed(client_id, Role::Publisher, &err);
        }
    };

    let filler = job.filler();
    let mut pacer = Pacer::new(job.repeat, job.repeat_delay);
    loop {
        let fired = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            seq = pacer.next_fire() => seq,
        };
        let Some(seq) = fired else {
            if cancel.is_cancelled() && pacer.remaining() > 0 {
                handle.push_error(
                    ErrorKind::Cancel,
                    format!("cancelled with {} repetitions remaining", pacer.remaining()),
                );
            }
            break;
        };

        let sent_nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let body = payload::encode(seq, sent_nanos, &filler);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            published = handle.publish(&job.topic, job.qos, body) => Some(published),
        };
        match outcome {
            None => {
                handle.push_error(
                    ErrorKind::Cancel,
                    format!("cancelled with {} repetitions remaining", pacer.remaining()),
                );
                break;
            }
            // Already recorded by the handle; no link left to publish on
            Some(Err(PublishError::ConnectionLost(_))) => break,
            Some(Err(err)) => {
                tracing::warn!(
                    "Publisher {} publish {} failed: {}",
                    handle.client_id(),
                    seq,
                    err
                );
            }
            Some(Ok(())) => {}
        }
    }

    if let Err(err) = handle.disconnect().await {
        tracing::warn!("Publisher {} disconnect failed: {}", handle.client_id(), err);
    }
    handle.into_result().await
}

/// Short per-run nonce keeping client ids unique across runs against the
/// same broker.
fn run_nonce() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_lifecycle_is_legal() {
        use SessionPhase::*;
        let chain = [
            Idle,
            SubscriberStarting,
            SubscriberReady,
            PublishersRunning,
            Draining,
            Terminated,
        ];
        for pair in chain.windows(2) {
            assert!(
                pair[0].can_advance_to(pair[1]),
                "{:?} -> {:?} should be legal",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_cancellation_reaches_draining_from_every_live_phase() {
        use SessionPhase::*;
        for phase in [Idle, SubscriberStarting, SubscriberReady, PublishersRunning] {
            assert!(
                phase.can_advance_to(Draining),
                "{phase:?} -> Draining should be legal"
            );
        }
    }

    #[test]
    fn test_subscriber_failure_aborts_directly() {
        assert!(SessionPhase::SubscriberStarting.can_advance_to(SessionPhase::Terminated));
    }

    #[test]
    fn test_terminated_is_final() {
        use SessionPhase::*;
        for next in [
            Idle,
            SubscriberStarting,
            SubscriberReady,
            PublishersRunning,
            Draining,
            Terminated,
        ] {
            assert!(!Terminated.can_advance_to(next));
        }
    }

    #[test]
    fn test_no_phase_skipping() {
        use SessionPhase::*;
        assert!(!Idle.can_advance_to(PublishersRunning));
        assert!(!Idle.can_advance_to(Terminated));
        assert!(!SubscriberStarting.can_advance_to(PublishersRunning));
        assert!(!SubscriberReady.can_advance_to(Terminated));
        assert!(!PublishersRunning.can_advance_to(Terminated));
        assert!(!Draining.can_advance_to(PublishersRunning));
    }

    #[test]
    fn test_phase_tracker_rejects_illegal_jump() {
        let mut tracker = PhaseTracker::new();
        tracker.advance(SessionPhase::SubscriberStarting).unwrap();
        assert!(tracker.advance(SessionPhase::PublishersRunning).is_err());
        assert_eq!(tracker.phase, SessionPhase::SubscriberStarting);
    }

    #[test]
    fn test_validate_rejects_undersized_payload() {
        let config = test_config();
        assert!(config.validate().is_ok());

        let mut bad = test_config();
        bad.payload_size = payload::HEADER_LEN - 1;
        assert!(bad.validate().is_err());

        let mut bad = test_config();
        bad.publishers = 0;
        assert!(bad.validate().is_err());

        let mut bad = test_config();
        bad.keep_alive = Duration::from_secs(1);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_run_nonce_is_short_and_unique() {
        let a = run_nonce();
        let b = run_nonce();
        assert_eq!(a.len(), 8);
        assert_ne!(a, b);
    }

    fn test_config() -> SessionConfig {
        SessionConfig {
            broker_host: "127.0.0.1".to_string(),
            broker_port: 1883,
            topic: "blast/load".to_string(),
            publishers: 2,
            qos: QosLevel::AtMostOnce,
            protocol: ProtocolVersion::V5,
            repeat: 10,
            repeat_delay: Duration::ZERO,
            duration: Duration::from_secs(60),
            grace: Duration::from_secs(30),
            payload_size: 256,
            client_id_prefix: "blast".to_string(),
            keep_alive: Duration::from_secs(30),
            clean_session: true,
            connect_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(5),
            seed: 42,
        }
    }
}
