//! Durable flow storage
//!
//! Every scored flow persists to SQLite for later training. The
//! write path sits behind a bounded queue so storage latency never
//! touches scoring; persistent failures flip the store into bypass
//! mode instead of crashing the pipeline.

pub mod record;
pub mod store;

pub use record::{FlowRecord, FEATURE_COLUMNS};
pub use store::{ExportFilter, FlowStore, StoreHealth, StoreStatistics};
