//! Run report aggregation and rendering.
//!
//! Everything here is pure: results go in after the session's barrier
//! join, a [`RunReport`] comes out, serializable to JSON or rendered as a
//! table.

pub mod metrics;
pub mod table;

pub use metrics::{ClientSummary, LatencyStats, ReportMeta, RunReport};
pub use table::format_table;
