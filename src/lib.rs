//! mqtt-blast library
//!
//! A load-test harness for MQTT brokers: one subscriber listens on a topic
//! while a pool of publishers drives paced publish load at it, and every
//! handle's counters are aggregated into a pass/fail run report.
//!
//! # Components
//!
//! - `blast-client` - one MQTT connection per handle, publisher or
//!   subscriber role, built on `rumqttc`
//! - `blast-pacer` - drift-free pacing of publish repetitions
//! - `blast-report` - aggregation of run results into the final report
//! - [`session`] - the orchestrator tying the handles together with a
//!   deterministic teardown path
//!
//! # CLI Usage
//!
//! ```bash
//! # Fifty publishers, a hundred messages each, full speed, QoS 0
//! mqtt-blast run --broker localhost:1883 --topic blast/load
//!
//! # Paced QoS 1 run against an MQTT 3.1.1 broker
//! mqtt-blast run --broker localhost:1883 --publishers 10 --qos 1 \
//!   --repeat 500 --repeat-delay 20 --protocol 3.1.1
//! ```

pub mod config;
pub mod session;

pub use session::{run_session, SessionConfig, SessionOutcome, SessionPhase};
