//! Flow table
//!
//! Single-writer flow table. All mutation happens on the owning
//! aggregator task; readers get copy-on-read snapshots.

use crate::flow::{Flow, FlowSnapshot};
use chrono::{DateTime, Utc};
use sentra_common::{EngineCounters, FlowKey, PacketSummary};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Flow table tuning.
#[derive(Debug, Clone)]
pub struct FlowTableConfig {
    /// Flows idle longer than this are evicted
    pub idle_timeout_secs: u64,
    /// Hard cap on live flows; least-recently-seen evicted beyond it
    pub max_flows: usize,
    /// New packets per flow between scoring passes
    pub score_packet_interval: u64,
}

impl Default for FlowTableConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 60,
            max_flows: 50_000,
            score_packet_interval: 10,
        }
    }
}

/// Row of the UI-facing table snapshot.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FlowOverview {
    pub key: FlowKey,
    pub packet_count: u64,
    pub last_seen_nanos: u64,
}

/// The flow table. Owned by a single aggregator task.
pub struct FlowTable {
    config: FlowTableConfig,
    flows: HashMap<FlowKey, Flow>,
    next_uid: u64,
    counters: Arc<EngineCounters>,
}

impl FlowTable {
    pub fn new(config: FlowTableConfig, counters: Arc<EngineCounters>) -> Self {
        Self {
            config,
            flows: HashMap::new(),
            next_uid: 1,
            counters,
        }
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Ingest one packet. Locates the flow in either direction,
    /// creating it on first sight. Returns the snapshots that are due
    /// for scoring: capacity evictions first, then the ingesting flow
    /// when it crossed the scoring interval.
    pub fn ingest(&mut self, pkt: &PacketSummary, wall: DateTime<Utc>) -> Vec<FlowSnapshot> {
        let mut due = Vec::new();

        let key = pkt.key();
        let (canonical, forward) = if self.flows.contains_key(&key) {
            (key, true)
        } else if self.flows.contains_key(&key.reverse()) {
            (key.reverse(), false)
        } else {
            let flow = Flow::new(self.next_uid, key, wall, pkt.ts_nanos);
            self.next_uid += 1;
            self.flows.insert(key, flow);
            self.counters.flows_created.fetch_add(1, Ordering::Relaxed);
            due.extend(self.evict_to_capacity());
            (key, true)
        };

        // Entry is present in all branches above.
        if let Some(flow) = self.flows.get_mut(&canonical) {
            flow.record(pkt, forward);
            if flow.packets_since_last_score() >= self.config.score_packet_interval {
                flow.mark_scored();
                due.push(flow.snapshot());
            }
        }
        due
    }

    /// Evict flows idle longer than the timeout. Flows with at least
    /// two packets get a final scoring snapshot.
    pub fn evict_idle(&mut self, now_nanos: u64) -> Vec<FlowSnapshot> {
        let timeout_nanos = self.config.idle_timeout_secs * 1_000_000_000;
        let stale: Vec<FlowKey> = self
            .flows
            .iter()
            .filter(|(_, f)| now_nanos.saturating_sub(f.last_seen_nanos()) > timeout_nanos)
            .map(|(k, _)| *k)
            .collect();

        let mut finals = Vec::new();
        for key in stale {
            if let Some(flow) = self.flows.remove(&key) {
                self.counters.flows_evicted.fetch_add(1, Ordering::Relaxed);
                if flow.packet_count() >= 2 {
                    finals.push(flow.snapshot());
                }
            }
        }
        if !finals.is_empty() {
            tracing::debug!(evicted = finals.len(), live = self.flows.len(), "idle flows evicted");
        }
        finals
    }

    /// Evict least-recently-seen flows until the table fits the cap.
    pub fn evict_to_capacity(&mut self) -> Vec<FlowSnapshot> {
        if self.flows.len() <= self.config.max_flows {
            return Vec::new();
        }
        let excess = self.flows.len() - self.config.max_flows;

        let mut by_age: Vec<(u64, FlowKey)> = self
            .flows
            .iter()
            .map(|(k, f)| (f.last_seen_nanos(), *k))
            .collect();
        by_age.sort_unstable_by_key(|(seen, _)| *seen);

        let mut finals = Vec::new();
        for (_, key) in by_age.into_iter().take(excess) {
            if let Some(flow) = self.flows.remove(&key) {
                self.counters.flows_evicted.fetch_add(1, Ordering::Relaxed);
                if flow.packet_count() >= 2 {
                    finals.push(flow.snapshot());
                }
            }
        }
        finals
    }

    /// Remove every flow, returning final scoring snapshots. Used on
    /// shutdown.
    pub fn drain_all(&mut self) -> Vec<FlowSnapshot> {
        let keys: Vec<FlowKey> = self.flows.keys().copied().collect();
        let mut finals = Vec::new();
        for key in keys {
            if let Some(flow) = self.flows.remove(&key) {
                self.counters.flows_evicted.fetch_add(1, Ordering::Relaxed);
                if flow.packet_count() >= 2 {
                    finals.push(flow.snapshot());
                }
            }
        }
        finals
    }

    /// Copy-on-read table overview for the query surface, newest
    /// first.
    pub fn overview(&self) -> Vec<FlowOverview> {
        let mut rows: Vec<FlowOverview> = self
            .flows
            .values()
            .map(|f| FlowOverview {
                key: f.key(),
                packet_count: f.packet_count(),
                last_seen_nanos: f.last_seen_nanos(),
            })
            .collect();
        rows.sort_unstable_by(|a, b| b.last_seen_nanos.cmp(&a.last_seen_nanos));
        rows
    }
}
