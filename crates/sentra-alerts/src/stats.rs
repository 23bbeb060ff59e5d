//! Rolling alert statistics
//!
//! Four windows (hour, day, week, all-time) with per-severity counts
//! and top-K threat labels and source IPs. Windowed counts are exact
//! over retained events; the all-time top-K uses a frequency-count
//! sketch once the key space outgrows its capacity.

use crate::manager::Alert;
use parking_lot::Mutex;
use sentra_common::labels::Severity;
use sentra_common::{SentraError, SentraResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::time::Instant;

const TOP_K: usize = 20;
const WEEK_SECONDS: f64 = 7.0 * 24.0 * 3600.0;

/// Statistics window selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsWindow {
    Hour,
    Day,
    Week,
    All,
}

impl StatsWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::All => "all",
        }
    }

    fn seconds(&self) -> Option<f64> {
        match self {
            Self::Hour => Some(3600.0),
            Self::Day => Some(86400.0),
            Self::Week => Some(WEEK_SECONDS),
            Self::All => None,
        }
    }
}

/// Point-in-time view of one window.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub window: StatsWindow,
    pub total: u64,
    pub by_severity: BTreeMap<String, u64>,
    pub top_threats: Vec<(String, u64)>,
    pub top_sources: Vec<(String, u64)>,
    pub uptime_seconds: u64,
}

/// Frequency-count top-K sketch: exact until `capacity` distinct
/// keys, then decrement-on-overflow in the space-saving style.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TopK {
    capacity: usize,
    counts: HashMap<String, u64>,
}

impl TopK {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            counts: HashMap::new(),
        }
    }

    fn record(&mut self, key: &str) {
        if let Some(count) = self.counts.get_mut(key) {
            *count += 1;
            return;
        }
        if self.counts.len() < self.capacity {
            self.counts.insert(key.to_string(), 1);
            return;
        }
        // Evict the current minimum and inherit its count.
        if let Some((min_key, min_count)) = self
            .counts
            .iter()
            .min_by_key(|(_, c)| **c)
            .map(|(k, c)| (k.clone(), *c))
        {
            self.counts.remove(&min_key);
            self.counts.insert(key.to_string(), min_count + 1);
        }
    }

    fn top(&self, k: usize) -> Vec<(String, u64)> {
        let mut entries: Vec<(String, u64)> =
            self.counts.iter().map(|(key, c)| (key.clone(), *c)).collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries.truncate(k);
        entries
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StatEvent {
    at: f64,
    severity: Severity,
    threat: String,
    src_ip: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct TrackerState {
    events: VecDeque<StatEvent>,
    all_total: u64,
    all_by_severity: BTreeMap<String, u64>,
    all_threats: TopK,
    all_sources: TopK,
}

impl Default for TrackerState {
    fn default() -> Self {
        Self {
            events: VecDeque::new(),
            all_total: 0,
            all_by_severity: BTreeMap::new(),
            all_threats: TopK::new(TOP_K),
            all_sources: TopK::new(TOP_K),
        }
    }
}

/// Alert statistics tracker. Single writer, snapshot reads.
pub struct StatisticsTracker {
    started: Instant,
    state_path: Option<PathBuf>,
    state: Mutex<TrackerState>,
}

impl StatisticsTracker {
    pub fn new(state_path: Option<PathBuf>) -> Self {
        let state = state_path
            .as_ref()
            .and_then(|p| std::fs::read_to_string(p).ok())
            .and_then(|content| serde_json::from_str::<TrackerState>(&content).ok())
            .unwrap_or_default();
        if state.all_total > 0 {
            tracing::info!(total = state.all_total, "statistics restored");
        }
        Self {
            started: Instant::now(),
            state_path,
            state: Mutex::new(state),
        }
    }

    /// Record one emitted alert.
    pub fn record(&self, alert: &Alert) {
        let mut state = self.state.lock();
        let severity_key = alert.severity.as_str().to_string();

        state.all_total += 1;
        *state.all_by_severity.entry(severity_key).or_insert(0) += 1;
        state.all_threats.record(&alert.threat);
        let src = alert.src_ip.to_string();
        state.all_sources.record(&src);

        state.events.push_back(StatEvent {
            at: alert.timestamp,
            severity: alert.severity,
            threat: alert.threat.clone(),
            src_ip: src,
        });
        Self::evict_expired(&mut state, alert.timestamp);
    }

    fn evict_expired(state: &mut TrackerState, now: f64) {
        while let Some(front) = state.events.front() {
            if now - front.at > WEEK_SECONDS {
                state.events.pop_front();
            } else {
                break;
            }
        }
    }

    /// Current view of one window.
    pub fn snapshot(&self, window: StatsWindow, now: f64) -> StatsSnapshot {
        let state = self.state.lock();
        let uptime_seconds = self.started.elapsed().as_secs();

        match window.seconds() {
            None => StatsSnapshot {
                window,
                total: state.all_total,
                by_severity: state.all_by_severity.clone(),
                top_threats: state.all_threats.top(TOP_K),
                top_sources: state.all_sources.top(TOP_K),
                uptime_seconds,
            },
            Some(secs) => {
                let mut total = 0;
                let mut by_severity: BTreeMap<String, u64> = BTreeMap::new();
                let mut threats: HashMap<&str, u64> = HashMap::new();
                let mut sources: HashMap<&str, u64> = HashMap::new();
                for event in state.events.iter().filter(|e| now - e.at <= secs) {
                    total += 1;
                    *by_severity
                        .entry(event.severity.as_str().to_string())
                        .or_insert(0) += 1;
                    *threats.entry(event.threat.as_str()).or_insert(0) += 1;
                    *sources.entry(event.src_ip.as_str()).or_insert(0) += 1;
                }
                StatsSnapshot {
                    window,
                    total,
                    by_severity,
                    top_threats: top_of(threats),
                    top_sources: top_of(sources),
                    uptime_seconds,
                }
            }
        }
    }

    /// Persist to the snapshot file, when one is configured.
    pub fn persist(&self) -> SentraResult<()> {
        let Some(path) = &self.state_path else {
            return Ok(());
        };
        let json = {
            let state = self.state.lock();
            serde_json::to_string(&*state)
                .map_err(|e| SentraError::Storage(format!("statistics serialize: {e}")))?
        };
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn top_of(counts: HashMap<&str, u64>) -> Vec<(String, u64)> {
    let mut entries: Vec<(String, u64)> = counts
        .into_iter()
        .map(|(k, c)| (k.to_string(), c))
        .collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(TOP_K);
    entries
}
