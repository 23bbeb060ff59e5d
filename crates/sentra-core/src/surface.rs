//! Query/subscribe surface
//!
//! The read-only shape external transports consume. No transport
//! mechanics here; errors are the tagged enum from `sentra-common`
//! and nothing internal leaks through.

use sentra_alerts::{Alert, AlertFilter, AlertManager, AlertStatus, StatisticsTracker, StatsSnapshot, StatsWindow};
use sentra_common::{CounterSnapshot, EngineCounters, QueryError};
use sentra_detect::{SuppressionEvent, Suppressor};
use sentra_flow::FlowOverview;
use sentra_store::{ExportFilter, FlowRecord, FlowStore};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};

/// Statistics query response: tracker window plus engine counters.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatsReport {
    pub stats: StatsSnapshot,
    pub counters: CounterSnapshot,
}

/// Read-only surface over the running engine.
#[derive(Clone)]
pub struct QuerySurface {
    alerts: Arc<AlertManager>,
    stats: Arc<StatisticsTracker>,
    store: Option<Arc<FlowStore>>,
    suppressor: Arc<Suppressor>,
    flows_rx: watch::Receiver<Vec<FlowOverview>>,
    counters: Arc<EngineCounters>,
}

impl QuerySurface {
    pub(crate) fn new(
        alerts: Arc<AlertManager>,
        stats: Arc<StatisticsTracker>,
        store: Option<Arc<FlowStore>>,
        suppressor: Arc<Suppressor>,
        flows_rx: watch::Receiver<Vec<FlowOverview>>,
        counters: Arc<EngineCounters>,
    ) -> Self {
        Self {
            alerts,
            stats,
            store,
            suppressor,
            flows_rx,
            counters,
        }
    }

    /// Filtered alerts, newest first.
    pub fn list_alerts(&self, filter: &AlertFilter) -> Vec<Alert> {
        self.alerts.query(filter)
    }

    /// One alert by id.
    pub fn alert(&self, id: u64) -> Result<Alert, QueryError> {
        self.alerts.get(id)
    }

    /// Acknowledge an alert.
    pub fn acknowledge(
        &self,
        id: u64,
        user: &str,
        notes: Option<String>,
    ) -> Result<Alert, QueryError> {
        if user.trim().is_empty() {
            return Err(QueryError::InvalidInput("user is required".into()));
        }
        self.alerts.acknowledge(id, user, notes)
    }

    /// Transition an alert's status.
    pub fn set_status(
        &self,
        id: u64,
        status: &str,
        notes: Option<String>,
    ) -> Result<Alert, QueryError> {
        let status = parse_status(status)?;
        self.alerts.set_status(id, status, notes)
    }

    /// Current aggregator snapshot, newest flows first.
    pub fn list_flows(&self, limit: usize) -> Vec<FlowOverview> {
        let mut flows = self.flows_rx.borrow().clone();
        flows.truncate(limit);
        flows
    }

    /// Statistics for one window, plus engine drop counters.
    pub fn statistics(&self, window: StatsWindow) -> StatsReport {
        let now = chrono::Utc::now();
        let now = now.timestamp() as f64 + now.timestamp_subsec_micros() as f64 / 1e6;
        StatsReport {
            stats: self.stats.snapshot(window, now),
            counters: self.counters.snapshot(),
        }
    }

    /// Newest entries of the suppression debug ring.
    pub fn recent_suppressions(&self, limit: usize) -> Vec<SuppressionEvent> {
        self.suppressor.recent_suppressions(limit)
    }

    /// Server-push stream of newly created alerts, in id order.
    pub fn subscribe_alerts(&self) -> AlertStream {
        AlertStream {
            rx: self.alerts.subscribe(),
            counters: self.counters.clone(),
            degraded: false,
        }
    }

    /// Periodic aggregator snapshot stream (one update per eviction
    /// tick).
    pub fn subscribe_flows(&self) -> watch::Receiver<Vec<FlowOverview>> {
        self.flows_rx.clone()
    }

    /// Newest persisted flow records.
    pub async fn recent_flows(
        &self,
        limit: usize,
        since: Option<f64>,
    ) -> Result<Vec<FlowRecord>, QueryError> {
        match &self.store {
            Some(store) => store.recent(limit, since).await,
            None => Err(QueryError::Unavailable),
        }
    }

    /// Persisted flows for one predicted label.
    pub async fn flows_by_attack(
        &self,
        label: &str,
        limit: usize,
    ) -> Result<Vec<FlowRecord>, QueryError> {
        match &self.store {
            Some(store) => store.by_attack(label, limit).await,
            None => Err(QueryError::Unavailable),
        }
    }

    /// Streaming CSV export of persisted flows.
    pub async fn export_flows(
        &self,
        filter: ExportFilter,
    ) -> Result<mpsc::Receiver<String>, QueryError> {
        match &self.store {
            Some(store) => store.export(filter).await,
            None => Err(QueryError::Unavailable),
        }
    }
}

/// Per-subscriber alert stream over a bounded buffer. A subscriber
/// that falls behind loses its oldest alerts and is marked degraded;
/// the producer never blocks.
pub struct AlertStream {
    rx: broadcast::Receiver<Alert>,
    counters: Arc<EngineCounters>,
    degraded: bool,
}

impl AlertStream {
    /// Next alert, skipping over anything lost to buffer overflow.
    /// Returns `None` once the engine is gone.
    pub async fn next(&mut self) -> Option<Alert> {
        use std::sync::atomic::Ordering;
        loop {
            match self.rx.recv().await {
                Ok(alert) => return Some(alert),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    self.degraded = true;
                    self.counters
                        .subscriber_drops
                        .fetch_add(missed, Ordering::Relaxed);
                    tracing::warn!(missed, "alert subscriber lagged, dropping oldest");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Whether this subscriber has ever overflowed its buffer.
    pub fn degraded(&self) -> bool {
        self.degraded
    }
}

fn parse_status(status: &str) -> Result<AlertStatus, QueryError> {
    match status {
        "new" => Ok(AlertStatus::New),
        "investigating" => Ok(AlertStatus::Investigating),
        "resolved" => Ok(AlertStatus::Resolved),
        "false_positive" => Ok(AlertStatus::FalsePositive),
        other => Err(QueryError::InvalidInput(format!(
            "unknown status {other:?}"
        ))),
    }
}
