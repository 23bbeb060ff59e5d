//! Alert suppression for the Sentra IDS core
//!
//! The 7-layer filter cascade between raw predictions and alerting,
//! plus the adaptive baseline that learns a site's normal traffic.

pub mod baseline;
pub mod suppressor;

pub use baseline::{AdaptiveBaseline, Fingerprint};
pub use suppressor::{SuppressReason, SuppressionEvent, Suppressor, Verdict};
