//! Shared types for the Sentra IDS core
//!
//! Error taxonomy, configuration document, flow keys and packet
//! summaries, the class alphabet, and process-wide counters.

pub mod config;
pub mod counters;
pub mod error;
pub mod flow;
pub mod labels;

pub use config::Config;
pub use counters::{CounterSnapshot, EngineCounters};
pub use error::{QueryError, SentraError, SentraResult};
pub use flow::{FlowKey, PacketSummary};
pub use labels::Severity;
