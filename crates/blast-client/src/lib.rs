//! MQTT client handles for load sessions.
//!
//! Wraps one `rumqttc` connection per handle, publisher or subscriber
//! role, and owns that handle's [`RunResult`] bookkeeping. The MQTT wire
//! protocol itself lives entirely in `rumqttc`; this crate decides when to
//! connect, publish, subscribe and disconnect, and records what happened.

pub mod config;
pub mod error;
pub mod handle;
pub mod payload;
pub mod result;

pub use config::{ClientConfig, InvalidQos, ProtocolVersion, PublishJob, QosLevel};
pub use error::{ConnectError, DisconnectError, PublishError, SubscribeError};
pub use handle::ClientHandle;
pub use result::{ErrorEvent, ErrorKind, Receipt, Role, RunResult};
