//! Flow aggregation and feature extraction
//!
//! Bidirectional flow tracking keyed by canonical 5-tuple, periodic
//! eviction, and the fixed 37-feature vector the models score.

pub mod features;
pub mod flow;
pub mod table;

pub use features::{extract, FeatureVector, FEATURE_NAMES, NUM_FEATURES};
pub use flow::{Flow, FlowCounters, FlowSnapshot, PacketRecord};
pub use table::{FlowOverview, FlowTable, FlowTableConfig};
