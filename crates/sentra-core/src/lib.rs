//! Sentra IDS core
//!
//! Composition root wiring capture, flow aggregation, model serving,
//! suppression, alerting, and storage into one engine, plus the
//! read-only query/subscribe surface external transports consume.

pub mod engine;
pub mod surface;

pub use engine::{Engine, PacketSender};
pub use surface::{AlertStream, QuerySurface, StatsReport};
