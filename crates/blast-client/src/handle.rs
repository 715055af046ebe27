//! One MQTT connection, publisher or subscriber role.
//!
//! A [`ClientHandle`] pairs a `rumqttc` async client with a background
//! driver task that polls the event loop. The driver owns the delivery log
//! (receipts and link-level errors) and publishes cumulative ack/receive
//! counters over watch channels; the handle owns the publish-side counters.
//! The two halves are merged into the final [`RunResult`] when the handle
//! is consumed, so no state is ever shared between live writers.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::{ClientConfig, ProtocolVersion, QosLevel};
use crate::error::{ConnectError, DisconnectError, PublishError, SubscribeError};
use crate::payload;
use crate::result::{ErrorEvent, ErrorKind, Receipt, Role, RunResult};

/// Requests queued between the handle and the event loop.
const REQUEST_CHANNEL_CAPACITY: usize = 100;

/// Upper bound on waiting for the event loop task to stop during teardown.
const DRIVER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// How a QoS 1/2 ack wait ended.
enum AckWait {
    Acked,
    LinkClosed,
    TimedOut,
}

/// Connection state as observed by the driver.
#[derive(Debug, Clone)]
enum LinkStatus {
    Connecting,
    Up,
    Closed(CloseReason),
}

/// Why the link closed.
#[derive(Debug, Clone)]
enum CloseReason {
    /// Local disconnect completed normally
    Clean,
    /// Broker rejected the CONNECT
    Refused(String),
    /// Transport-level failure
    Error(String),
}

impl CloseReason {
    fn describe(&self) -> String {
        match self {
            CloseReason::Clean => "disconnected".to_string(),
            CloseReason::Refused(cause) => format!("broker refused connection: {cause}"),
            CloseReason::Error(cause) => cause.clone(),
        }
    }
}

/// Sender half of the driver's observable state.
struct DriverShared {
    status: watch::Sender<LinkStatus>,
    acked: watch::Sender<u64>,
    received: watch::Sender<u64>,
    subacks: mpsc::UnboundedSender<Result<(), String>>,
}

/// Receive-side records owned exclusively by the driver task.
#[derive(Debug, Default)]
struct DeliveryLog {
    receipts: Vec<Receipt>,
    errors: Vec<ErrorEvent>,
}

impl DeliveryLog {
    fn record_delivery(&mut self, shared: &DriverShared, body: &[u8]) {
        shared.received.send_modify(|n| *n += 1);
        if let Some((seq, sent_nanos)) = payload::decode(body) {
            self.receipts.push(Receipt {
                seq,
                sent_at: DateTime::from_timestamp_nanos(sent_nanos),
                received_at: Utc::now(),
            });
        }
    }
}

/// Protocol-specific client half.
enum ProtoClient {
    V311(rumqttc::AsyncClient),
    V5(rumqttc::v5::AsyncClient),
}

impl ProtoClient {
    async fn publish(&self, topic: &str, qos: QosLevel, body: Vec<u8>) -> Result<(), String> {
        match self {
            ProtoClient::V311(client) => client
                .publish(topic, qos_v311(qos), false, body)
                .await
                .map_err(|e| e.to_string()),
            ProtoClient::V5(client) => client
                .publish(topic, qos_v5(qos), false, body)
                .await
                .map_err(|e| e.to_string()),
        }
    }

    async fn subscribe(&self, topic: &str, qos: QosLevel) -> Result<(), String> {
        match self {
            ProtoClient::V311(client) => client
                .subscribe(topic, qos_v311(qos))
                .await
                .map_err(|e| e.to_string()),
            ProtoClient::V5(client) => client
                .subscribe(topic, qos_v5(qos))
                .await
                .map_err(|e| e.to_string()),
        }
    }

    async fn disconnect(&self) -> Result<(), String> {
        match self {
            ProtoClient::V311(client) => client.disconnect().await.map_err(|e| e.to_string()),
            ProtoClient::V5(client) => client.disconnect().await.map_err(|e| e.to_string()),
        }
    }
}

fn qos_v311(qos: QosLevel) -> rumqttc::QoS {
    match qos {
        QosLevel::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QosLevel::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QosLevel::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

fn qos_v5(qos: QosLevel) -> rumqttc::v5::mqttbytes::QoS {
    match qos {
        QosLevel::AtMostOnce => rumqttc::v5::mqttbytes::QoS::AtMostOnce,
        QosLevel::AtLeastOnce => rumqttc::v5::mqttbytes::QoS::AtLeastOnce,
        QosLevel::ExactlyOnce => rumqttc::v5::mqttbytes::QoS::ExactlyOnce,
    }
}

/// One MQTT connection with its run-result bookkeeping.
pub struct ClientHandle {
    client: ProtoClient,
    driver: JoinHandle<DeliveryLog>,
    client_id: String,
    role: Role,
    status_rx: watch::Receiver<LinkStatus>,
    acked_rx: watch::Receiver<u64>,
    received_rx: watch::Receiver<u64>,
    subacks: mpsc::UnboundedReceiver<Result<(), String>>,
    connect_timeout: Duration,
    ack_timeout: Duration,
    sent: u64,
    awaited_acks: u64,
    errors: Vec<ErrorEvent>,
    disconnected: bool,
}

impl ClientHandle {
    /// Open a connection and wait for the broker's CONNACK.
    ///
    /// The driver task keeps running until [`ClientHandle::disconnect`] or
    /// a connection failure; it does not reconnect, a dropped link is an
    /// error event on this handle's result.
    pub async fn connect(config: ClientConfig, role: Role) -> Result<Self, ConnectError> {
        let (status_tx, status_rx) = watch::channel(LinkStatus::Connecting);
        let (acked_tx, acked_rx) = watch::channel(0u64);
        let (received_tx, received_rx) = watch::channel(0u64);
        let (suback_tx, suback_rx) = mpsc::unbounded_channel();
        let shared = DriverShared {
            status: status_tx,
            acked: acked_tx,
            received: received_tx,
            subacks: suback_tx,
        };

        let (client, driver) = match config.protocol {
            ProtocolVersion::V311 => {
                let mut options =
                    rumqttc::MqttOptions::new(&config.client_id, &config.host, config.port);
                options.set_keep_alive(config.keep_alive);
                options.set_clean_session(config.clean_session);
                let (client, eventloop) =
                    rumqttc::AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
                (
                    ProtoClient::V311(client),
                    tokio::spawn(drive_v311(eventloop, shared)),
                )
            }
            ProtocolVersion::V5 => {
                let mut options =
                    rumqttc::v5::MqttOptions::new(&config.client_id, &config.host, config.port);
                options.set_keep_alive(config.keep_alive);
                options.set_clean_start(config.clean_session);
                let (client, eventloop) =
                    rumqttc::v5::AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
                (
                    ProtoClient::V5(client),
                    tokio::spawn(drive_v5(eventloop, shared)),
                )
            }
        };

        let mut wait_rx = status_rx.clone();
        let status = match timeout(
            config.connect_timeout,
            wait_rx.wait_for(|s| !matches!(s, LinkStatus::Connecting)),
        )
        .await
        {
            Ok(Ok(status)) => status.clone(),
            Ok(Err(_)) => LinkStatus::Closed(CloseReason::Error(
                "event loop terminated before CONNACK".to_string(),
            )),
            Err(_) => {
                driver.abort();
                return Err(ConnectError::Timeout(config.connect_timeout));
            }
        };

        match status {
            LinkStatus::Up => {
                tracing::debug!("Client {} connected to {}:{}", config.client_id, config.host, config.port);
                Ok(Self {
                    client,
                    driver,
                    client_id: config.client_id,
                    role,
                    status_rx,
                    acked_rx,
                    received_rx,
                    subacks: suback_rx,
                    connect_timeout: config.connect_timeout,
                    ack_timeout: config.ack_timeout,
                    sent: 0,
                    awaited_acks: 0,
                    errors: Vec::new(),
                    disconnected: false,
                })
            }
            LinkStatus::Closed(CloseReason::Refused(cause)) => Err(ConnectError::Refused(cause)),
            LinkStatus::Closed(reason) => Err(ConnectError::Network(reason.describe())),
            LinkStatus::Connecting => Err(ConnectError::Network(
                "event loop terminated before CONNACK".to_string(),
            )),
        }
    }

    /// Client id this handle connected with.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Watch over the cumulative count of delivered messages.
    pub fn received_watch(&self) -> watch::Receiver<u64> {
        self.received_rx.clone()
    }

    /// Append an error event to this handle's result.
    pub fn push_error(&mut self, kind: ErrorKind, cause: impl Into<String>) {
        self.errors.push(ErrorEvent::now(kind, cause));
    }

    /// Subscribe and wait for the broker's SUBACK.
    pub async fn subscribe(&mut self, topic: &str, qos: QosLevel) -> Result<(), SubscribeError> {
        if let Err(cause) = self.client.subscribe(topic, qos).await {
            let err = SubscribeError::Channel(cause);
            self.push_error(ErrorKind::Subscribe, err.to_string());
            return Err(err);
        }

        let wait = self.connect_timeout;
        let answer = timeout(wait, self.subacks.recv()).await;
        let err = match answer {
            Ok(Some(Ok(()))) => {
                tracing::debug!("Client {} subscribed to {}", self.client_id, topic);
                return Ok(());
            }
            Ok(Some(Err(reason))) => SubscribeError::Rejected(reason),
            Ok(None) => SubscribeError::ConnectionLost(self.close_cause()),
            Err(_) => SubscribeError::Timeout(wait),
        };
        self.push_error(ErrorKind::Subscribe, err.to_string());
        Err(err)
    }

    /// Publish one message and, for QoS 1/2, wait until the broker
    /// acknowledges it. QoS 0 returns as soon as the client library has
    /// accepted the message; that is a "sent" result, not a delivery
    /// guarantee.
    pub async fn publish(
        &mut self,
        topic: &str,
        qos: QosLevel,
        body: Vec<u8>,
    ) -> Result<(), PublishError> {
        let closed = match &*self.status_rx.borrow() {
            LinkStatus::Closed(reason) => Some(reason.describe()),
            _ => None,
        };
        if let Some(cause) = closed {
            let err = PublishError::ConnectionLost(cause);
            self.push_error(ErrorKind::Publish, err.to_string());
            return Err(err);
        }

        if let Err(cause) = self.client.publish(topic, qos, body).await {
            let err = PublishError::Channel(cause);
            self.push_error(ErrorKind::Publish, err.to_string());
            return Err(err);
        }
        self.sent += 1;

        if !qos.is_acked() {
            return Ok(());
        }

        self.awaited_acks += 1;
        let target = self.awaited_acks;
        let ack_timeout = self.ack_timeout;
        let waited = match timeout(ack_timeout, self.acked_rx.wait_for(|&n| n >= target)).await {
            Ok(Ok(_)) => AckWait::Acked,
            Ok(Err(_)) => AckWait::LinkClosed,
            Err(_) => AckWait::TimedOut,
        };
        let err = match waited {
            AckWait::Acked => return Ok(()),
            AckWait::LinkClosed => PublishError::ConnectionLost(self.close_cause()),
            AckWait::TimedOut => PublishError::AckTimeout(ack_timeout),
        };
        self.push_error(ErrorKind::Publish, err.to_string());
        Err(err)
    }

    /// Disconnect from the broker. Idempotent: a second call, or a call on
    /// a handle whose link already closed, is a no-op and never an error.
    pub async fn disconnect(&mut self) -> Result<(), DisconnectError> {
        if self.disconnected {
            return Ok(());
        }
        self.disconnected = true;

        let already_closed = matches!(&*self.status_rx.borrow(), LinkStatus::Closed(_));
        if already_closed {
            return Ok(());
        }
        self.client
            .disconnect()
            .await
            .map_err(DisconnectError::Channel)
    }

    /// Disconnect if needed, stop the driver and merge both halves of the
    /// bookkeeping into the final, immutable result.
    pub async fn into_result(mut self) -> RunResult {
        if let Err(err) = self.disconnect().await {
            tracing::warn!("Client {} disconnect during teardown: {}", self.client_id, err);
        }

        let joined = timeout(DRIVER_JOIN_TIMEOUT, &mut self.driver).await;
        let log = match joined {
            Ok(Ok(log)) => log,
            Ok(Err(join_err)) => {
                let mut log = DeliveryLog::default();
                log.errors.push(ErrorEvent::now(
                    ErrorKind::Task,
                    format!("event loop task failed: {join_err}"),
                ));
                log
            }
            Err(_) => {
                self.driver.abort();
                let mut log = DeliveryLog::default();
                log.errors.push(ErrorEvent::now(
                    ErrorKind::Task,
                    format!("event loop did not stop within {DRIVER_JOIN_TIMEOUT:?}"),
                ));
                log
            }
        };

        let mut errors = self.errors;
        errors.extend(log.errors);
        errors.sort_by_key(|e| e.at);

        RunResult {
            client_id: self.client_id,
            role: self.role,
            sent: self.sent,
            acked: *self.acked_rx.borrow(),
            received: *self.received_rx.borrow(),
            errors,
            receipts: log.receipts,
        }
    }

    fn close_cause(&self) -> String {
        match &*self.status_rx.borrow() {
            LinkStatus::Closed(reason) => reason.describe(),
            _ => "connection closed".to_string(),
        }
    }
}

/// Event loop driver for MQTT 3.1.1 connections.
async fn drive_v311(mut eventloop: rumqttc::EventLoop, shared: DriverShared) -> DeliveryLog {
    use rumqttc::{ConnectReturnCode, Event, Outgoing, Packet, SubscribeReasonCode};

    let mut log = DeliveryLog::default();
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    shared.status.send_replace(LinkStatus::Up);
                } else {
                    let cause = format!("{:?}", ack.code);
                    log.errors.push(ErrorEvent::now(
                        ErrorKind::Connect,
                        format!("broker refused connection: {cause}"),
                    ));
                    shared
                        .status
                        .send_replace(LinkStatus::Closed(CloseReason::Refused(cause)));
                    break;
                }
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                let outcome = match ack.return_codes.first() {
                    Some(SubscribeReasonCode::Success(_)) => Ok(()),
                    Some(SubscribeReasonCode::Failure) => {
                        Err("broker returned failure reason code".to_string())
                    }
                    None => Err("SUBACK carried no reason code".to_string()),
                };
                let _ = shared.subacks.send(outcome);
            }
            Ok(Event::Incoming(Packet::PubAck(_) | Packet::PubComp(_))) => {
                shared.acked.send_modify(|n| *n += 1);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                log.record_delivery(&shared, &publish.payload);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                shared
                    .status
                    .send_replace(LinkStatus::Closed(CloseReason::Clean));
                break;
            }
            Ok(_) => {}
            Err(err) => {
                let cause = err.to_string();
                log.errors.push(ErrorEvent::now(
                    ErrorKind::Link,
                    format!("connection error: {cause}"),
                ));
                shared
                    .status
                    .send_replace(LinkStatus::Closed(CloseReason::Error(cause)));
                break;
            }
        }
    }
    log
}

/// Event loop driver for MQTT 5.0 connections.
async fn drive_v5(mut eventloop: rumqttc::v5::EventLoop, shared: DriverShared) -> DeliveryLog {
    use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet, SubscribeReasonCode};
    use rumqttc::v5::Event;
    use rumqttc::Outgoing;

    let mut log = DeliveryLog::default();
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    shared.status.send_replace(LinkStatus::Up);
                } else {
                    let cause = format!("{:?}", ack.code);
                    log.errors.push(ErrorEvent::now(
                        ErrorKind::Connect,
                        format!("broker refused connection: {cause}"),
                    ));
                    shared
                        .status
                        .send_replace(LinkStatus::Closed(CloseReason::Refused(cause)));
                    break;
                }
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                let outcome = match ack.return_codes.first() {
                    Some(SubscribeReasonCode::Success(_)) => Ok(()),
                    Some(other) => Err(format!("{other:?}")),
                    None => Err("SUBACK carried no reason code".to_string()),
                };
                let _ = shared.subacks.send(outcome);
            }
            Ok(Event::Incoming(Packet::PubAck(_) | Packet::PubComp(_))) => {
                shared.acked.send_modify(|n| *n += 1);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                log.record_delivery(&shared, &publish.payload);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                shared
                    .status
                    .send_replace(LinkStatus::Closed(CloseReason::Clean));
                break;
            }
            Ok(_) => {}
            Err(err) => {
                let cause = err.to_string();
                log.errors.push(ErrorEvent::now(
                    ErrorKind::Link,
                    format!("connection error: {cause}"),
                ));
                shared
                    .status
                    .send_replace(LinkStatus::Closed(CloseReason::Error(cause)));
                break;
            }
        }
    }
    log
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Handle wired to an event loop that is never polled: requests queue
    /// but nothing answers. The returned event loop must stay alive for
    /// the request channel to accept sends.
    fn stub_handle(status: LinkStatus) -> (ClientHandle, rumqttc::EventLoop) {
        let (status_tx, status_rx) = watch::channel(status);
        let (acked_tx, acked_rx) = watch::channel(0u64);
        let (received_tx, received_rx) = watch::channel(0u64);
        let (_suback_tx, suback_rx) = mpsc::unbounded_channel();

        let options = rumqttc::MqttOptions::new("blast-test", "127.0.0.1", 1883);
        let (client, eventloop) = rumqttc::AsyncClient::new(options, 10);

        // The stub driver exits immediately; watch receivers keep serving
        // the last value after the senders drop.
        let driver = tokio::spawn(async move {
            drop((status_tx, acked_tx, received_tx));
            DeliveryLog::default()
        });

        let handle = ClientHandle {
            client: ProtoClient::V311(client),
            driver,
            client_id: "blast-test".to_string(),
            role: Role::Publisher,
            status_rx,
            acked_rx,
            received_rx,
            subacks: suback_rx,
            connect_timeout: Duration::from_secs(1),
            ack_timeout: Duration::from_secs(1),
            sent: 0,
            awaited_acks: 0,
            errors: Vec::new(),
            disconnected: false,
        };
        (handle, eventloop)
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (mut handle, _eventloop) = stub_handle(LinkStatus::Up);
        assert!(handle.disconnect().await.is_ok());
        assert!(handle.disconnect().await.is_ok());
        assert!(handle.disconnect().await.is_ok());
        let result = handle.into_result().await;
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_after_link_closed_is_noop() {
        let (mut handle, _eventloop) =
            stub_handle(LinkStatus::Closed(CloseReason::Error("gone".to_string())));
        assert!(handle.disconnect().await.is_ok());
        assert!(handle.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn test_publish_on_closed_link_is_recorded() {
        let (mut handle, _eventloop) =
            stub_handle(LinkStatus::Closed(CloseReason::Error("gone".to_string())));
        let err = handle
            .publish("blast/load", QosLevel::AtMostOnce, vec![0u8; 16])
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::ConnectionLost(_)));

        let result = handle.into_result().await;
        assert_eq!(result.sent, 0);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].kind, ErrorKind::Publish);
    }
}
