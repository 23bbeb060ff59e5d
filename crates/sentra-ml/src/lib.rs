//! Model serving for the Sentra IDS core
//!
//! Loads the frozen training artifacts (scaler, calibrated tree
//! forest, feed-forward network, class mapping) and serves the
//! weighted ensemble over a bounded inference pool. Artifacts are
//! immutable after load and shared freely across workers.

pub mod artifacts;
pub mod ensemble;
pub mod service;

pub use artifacts::{ClassMapping, Forest, Network, Scaler};
pub use ensemble::{Ensemble, ModelVote, Prediction, PredictionMethod};
pub use service::InferenceService;
