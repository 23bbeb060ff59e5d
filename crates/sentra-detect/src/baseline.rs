//! Adaptive traffic baseline
//!
//! During the learning window every observed flow is reduced to a
//! coarse fingerprint and counted. Afterwards, fingerprints seen
//! often enough become an allow-list of normal patterns. The counts
//! and elapsed window time persist across restarts, so capture gaps
//! never extend the window.

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use sentra_common::config::AdaptiveBaselineConfig;
use sentra_common::{SentraError, SentraResult};
use sentra_flow::FlowSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Coarse traffic pattern identity.
///
/// Rate and mean packet size use base-2 logarithmic buckets, so a
/// fingerprint matches traffic of the same order of magnitude rather
/// than an exact rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub protocol: u8,
    pub dst_port: u16,
    pub rate_bucket: i32,
    pub size_bucket: i32,
}

impl Fingerprint {
    pub fn of(snap: &FlowSnapshot) -> Self {
        Self {
            protocol: snap.key.protocol,
            dst_port: snap.key.dst_port,
            rate_bucket: log2_bucket(snap.rate()),
            size_bucket: log2_bucket(snap.mean_packet_size()),
        }
    }
}

fn log2_bucket(v: f64) -> i32 {
    v.max(1.0).log2().floor() as i32
}

#[derive(Debug, Serialize, Deserialize)]
struct BaselineState {
    elapsed_seconds: u64,
    counts: Vec<(Fingerprint, u32)>,
}

/// Learned traffic baseline with a single writer during learning and
/// an immutable hand-off once the window closes.
pub struct AdaptiveBaseline {
    config: AdaptiveBaselineConfig,
    started: Instant,
    elapsed_offset: Duration,
    counts: Mutex<HashMap<Fingerprint, u32>>,
    learned: ArcSwapOption<HashSet<Fingerprint>>,
}

impl AdaptiveBaseline {
    pub fn new(config: AdaptiveBaselineConfig) -> Self {
        Self {
            config,
            started: Instant::now(),
            elapsed_offset: Duration::ZERO,
            counts: Mutex::new(HashMap::new()),
            learned: ArcSwapOption::empty(),
        }
    }

    /// Resume from persisted state. `elapsed` is learning time already
    /// spent before this process started.
    pub fn from_state(
        config: AdaptiveBaselineConfig,
        elapsed: Duration,
        counts: HashMap<Fingerprint, u32>,
    ) -> Self {
        let baseline = Self {
            config,
            started: Instant::now(),
            elapsed_offset: elapsed,
            counts: Mutex::new(counts),
            learned: ArcSwapOption::empty(),
        };
        baseline.finalize_if_due();
        baseline
    }

    /// Load persisted state from `config.state_path`, falling back to
    /// a fresh window when no snapshot exists.
    pub fn load(config: AdaptiveBaselineConfig) -> Self {
        let path = config.state_path.clone();
        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<BaselineState>(&content) {
                Ok(state) => {
                    tracing::info!(
                        path = %path.display(),
                        elapsed_seconds = state.elapsed_seconds,
                        fingerprints = state.counts.len(),
                        "baseline state restored"
                    );
                    Self::from_state(
                        config,
                        Duration::from_secs(state.elapsed_seconds),
                        state.counts.into_iter().collect(),
                    )
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "baseline state unreadable, relearning");
                    Self::new(config)
                }
            },
            Err(_) => Self::new(config),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Learning time spent so far, including previous runs.
    pub fn elapsed(&self) -> Duration {
        self.elapsed_offset + self.started.elapsed()
    }

    /// True while the learning window is still open.
    pub fn learning_active(&self) -> bool {
        self.config.enabled
            && self.learned.load().is_none()
            && self.elapsed() < Duration::from_secs(self.config.learning_period)
    }

    /// Count a fingerprint during learning. No-op after the window.
    pub fn observe(&self, fingerprint: Fingerprint) {
        if !self.learning_active() {
            return;
        }
        let mut counts = self.counts.lock();
        *counts.entry(fingerprint).or_insert(0) += 1;
    }

    /// Whether a fingerprint matches the learned baseline. Always
    /// false while learning is active or the layer is disabled.
    pub fn matches(&self, fingerprint: &Fingerprint) -> bool {
        if !self.config.enabled {
            return false;
        }
        self.finalize_if_due();
        match self.learned.load().as_ref() {
            Some(set) => set.contains(fingerprint),
            None => false,
        }
    }

    fn finalize_if_due(&self) {
        if self.learned.load().is_some() {
            return;
        }
        if self.elapsed() < Duration::from_secs(self.config.learning_period) {
            return;
        }
        let counts = self.counts.lock();
        let set: HashSet<Fingerprint> = counts
            .iter()
            .filter(|(_, c)| **c >= self.config.baseline_min_occurrences)
            .map(|(fp, _)| *fp)
            .collect();
        tracing::info!(
            learned = set.len(),
            observed = counts.len(),
            "baseline learning window closed"
        );
        self.learned.store(Some(Arc::new(set)));
    }

    /// Persist counts and elapsed time to `config.state_path`.
    pub fn persist(&self) -> SentraResult<()> {
        let state = BaselineState {
            elapsed_seconds: self.elapsed().as_secs(),
            counts: self.counts.lock().iter().map(|(fp, c)| (*fp, *c)).collect(),
        };
        let json = serde_json::to_string(&state)
            .map_err(|e| SentraError::Storage(format!("baseline serialize: {e}")))?;
        write_atomic(&self.config.state_path, &json)?;
        Ok(())
    }
}

fn write_atomic(path: &Path, content: &str) -> SentraResult<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
