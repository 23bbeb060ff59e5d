//! Alert lifecycle for the Sentra IDS core
//!
//! Deduplicated alert records with a durable JSON-per-line log,
//! acknowledgement and status tracking, realtime subscriber
//! broadcast, rolling statistics, and pluggable delivery sinks.

pub mod manager;
pub mod sinks;
pub mod stats;

pub use manager::{Alert, AlertFilter, AlertManager, AlertManagerConfig, AlertStatus};
pub use sinks::{AlertSink, LogSink, NoopResponseSink, ResponseSink};
pub use stats::{StatisticsTracker, StatsSnapshot, StatsWindow};
