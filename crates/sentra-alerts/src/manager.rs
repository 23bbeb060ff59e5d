//! Alert manager
//!
//! Owns the monotonic ID counter and the bounded in-memory alert
//! table. All mutation is serialized through one lock; every change
//! is journaled to a JSON-per-line log and replayed on startup.

use crate::sinks::{AlertSink, ResponseSink};
use chrono::Utc;
use parking_lot::Mutex;
use sentra_common::labels::Severity;
use sentra_common::{FlowKey, QueryError, SentraError, SentraResult};
use sentra_ml::Prediction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Alert acknowledgement status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    New,
    Investigating,
    Resolved,
    FalsePositive,
}

impl AlertStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::FalsePositive)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Investigating => "investigating",
            Self::Resolved => "resolved",
            Self::FalsePositive => "false_positive",
        }
    }
}

/// One alert record. The serialized field set is the wire and log
/// schema; in-memory bookkeeping fields are skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: u64,
    /// Wall time, seconds since epoch
    pub timestamp: f64,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
    pub threat: String,
    pub severity: Severity,
    pub confidence: f64,
    pub context: String,
    pub acknowledged: bool,
    pub ack_user: Option<String>,
    pub ack_time: Option<f64>,
    pub status: AlertStatus,
    pub notes: Option<String>,

    #[serde(skip)]
    pub last_updated: f64,
    #[serde(skip)]
    pub packet_count: u64,
}

impl Alert {
    /// Flow key reconstructed from the record fields.
    pub fn flow_key(&self) -> FlowKey {
        FlowKey {
            src_ip: self.src_ip,
            dst_ip: self.dst_ip,
            protocol: self.protocol,
            src_port: self.src_port,
            dst_port: self.dst_port,
        }
    }

    /// Subscription wire format: the record plus a `new` marker.
    pub fn to_wire(&self, new: bool) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(obj) = value.as_object_mut() {
            obj.insert("new".to_string(), serde_json::Value::Bool(new));
        }
        value
    }
}

/// Query filters for the alert table.
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub severity: Option<Severity>,
    pub threat: Option<String>,
    pub acknowledged: Option<bool>,
    pub status: Option<AlertStatus>,
    pub limit: Option<usize>,
}

/// Alert manager tuning.
#[derive(Debug, Clone)]
pub struct AlertManagerConfig {
    pub max_alerts: usize,
    pub dedupe_window: Duration,
    pub log_path: PathBuf,
    pub broadcast_capacity: usize,
}

impl Default for AlertManagerConfig {
    fn default() -> Self {
        Self {
            max_alerts: 10_000,
            dedupe_window: Duration::from_secs(10),
            log_path: PathBuf::from("alerts.log"),
            broadcast_capacity: 1024,
        }
    }
}

struct Inner {
    next_id: u64,
    alerts: BTreeMap<u64, Alert>,
    /// (flow key, threat) of non-terminal alerts, for deduplication
    dedupe: HashMap<(FlowKey, String), u64>,
    log: File,
}

/// The alert manager. Single writer, copy-on-read queries.
pub struct AlertManager {
    config: AlertManagerConfig,
    inner: Mutex<Inner>,
    tx: broadcast::Sender<Alert>,
    sinks: Vec<Arc<dyn AlertSink>>,
    response: Option<Arc<dyn ResponseSink>>,
}

impl AlertManager {
    /// Open the journal, replay it, and get ready to ingest.
    pub fn new(
        config: AlertManagerConfig,
        sinks: Vec<Arc<dyn AlertSink>>,
        response: Option<Arc<dyn ResponseSink>>,
    ) -> SentraResult<Self> {
        let (alerts, next_id) = replay_log(&config.log_path)?;
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.log_path)
            .map_err(|e| {
                SentraError::Storage(format!(
                    "cannot open alert log {}: {e}",
                    config.log_path.display()
                ))
            })?;

        let mut dedupe = HashMap::new();
        for alert in alerts.values() {
            if !alert.status.is_terminal() {
                dedupe.insert((alert.flow_key(), alert.threat.clone()), alert.id);
            }
        }
        if !alerts.is_empty() {
            tracing::info!(replayed = alerts.len(), next_id, "alert log replayed");
        }

        let (tx, _) = broadcast::channel(config.broadcast_capacity);
        Ok(Self {
            config,
            inner: Mutex::new(Inner {
                next_id,
                alerts,
                dedupe,
                log,
            }),
            tx,
            sinks,
            response,
        })
    }

    /// Ingest one emitted detection. Returns the alert and whether it
    /// was newly created rather than deduplicated.
    pub async fn ingest(
        &self,
        key: FlowKey,
        packet_count: u64,
        prediction: &Prediction,
        context: String,
    ) -> (Alert, bool) {
        let now = now_epoch();
        let (alert, is_new) = {
            let mut inner = self.inner.lock();
            let dedupe_key = (key, prediction.label.clone());

            let existing = inner.dedupe.get(&dedupe_key).copied().and_then(|id| {
                let recent = inner
                    .alerts
                    .get(&id)
                    .map(|a| now - a.last_updated <= self.config.dedupe_window.as_secs_f64())
                    .unwrap_or(false);
                recent.then_some(id)
            });

            match existing.and_then(|id| inner.alerts.get(&id).cloned()) {
                Some(mut alert) => {
                    alert.confidence = alert.confidence.max(prediction.confidence);
                    alert.packet_count = packet_count;
                    alert.last_updated = now;
                    inner.alerts.insert(alert.id, alert.clone());
                    append_log(&mut inner.log, &alert);
                    (alert, false)
                }
                None => {
                    let alert =
                        self.create_alert(&mut inner, key, packet_count, prediction, context, now);
                    (alert, true)
                }
            }
        };

        if is_new {
            let _ = self.tx.send(alert.clone());
            self.deliver(&alert).await;
        }
        (alert, is_new)
    }

    /// Ingest an operational condition (for example storage entering
    /// bypass mode) as a high-severity alert.
    pub async fn ingest_operational(&self, threat: &str, context: String) -> Alert {
        let zero = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
        let key = FlowKey {
            src_ip: zero,
            dst_ip: zero,
            protocol: 0,
            src_port: 0,
            dst_port: 0,
        };
        let now = now_epoch();
        let alert = {
            let mut inner = self.inner.lock();
            let mut alert = self.blank_alert(&mut inner, key, now);
            alert.threat = threat.to_string();
            alert.severity = Severity::High;
            alert.confidence = 1.0;
            alert.context = context;
            inner.alerts.insert(alert.id, alert.clone());
            append_log(&mut inner.log, &alert);
            alert
        };
        let _ = self.tx.send(alert.clone());
        self.deliver(&alert).await;
        alert
    }

    fn blank_alert(&self, inner: &mut Inner, key: FlowKey, now: f64) -> Alert {
        let id = inner.next_id;
        inner.next_id += 1;
        Alert {
            id,
            timestamp: now,
            src_ip: key.src_ip,
            dst_ip: key.dst_ip,
            src_port: key.src_port,
            dst_port: key.dst_port,
            protocol: key.protocol,
            threat: String::new(),
            severity: Severity::Low,
            confidence: 0.0,
            context: String::new(),
            acknowledged: false,
            ack_user: None,
            ack_time: None,
            status: AlertStatus::New,
            notes: None,
            last_updated: now,
            packet_count: 0,
        }
    }

    fn create_alert(
        &self,
        inner: &mut Inner,
        key: FlowKey,
        packet_count: u64,
        prediction: &Prediction,
        context: String,
        now: f64,
    ) -> Alert {
        let mut alert = self.blank_alert(inner, key, now);
        alert.threat = prediction.label.clone();
        alert.severity = prediction.severity;
        alert.confidence = prediction.confidence;
        alert.context = context;
        alert.packet_count = packet_count;

        inner
            .dedupe
            .insert((key, alert.threat.clone()), alert.id);
        inner.alerts.insert(alert.id, alert.clone());
        append_log(&mut inner.log, &alert);
        self.evict_over_capacity(inner);
        alert
    }

    /// Oldest non-new alerts leave first when the table is full.
    fn evict_over_capacity(&self, inner: &mut Inner) {
        while inner.alerts.len() > self.config.max_alerts {
            let victim = inner
                .alerts
                .iter()
                .find(|(_, a)| a.status != AlertStatus::New)
                .map(|(id, _)| *id)
                .or_else(|| inner.alerts.keys().next().copied());
            match victim {
                Some(id) => {
                    if let Some(alert) = inner.alerts.remove(&id) {
                        inner.dedupe.remove(&(alert.flow_key(), alert.threat));
                    }
                }
                None => break,
            }
        }
    }

    async fn deliver(&self, alert: &Alert) {
        for sink in &self.sinks {
            if let Err(e) = sink.deliver(alert).await {
                tracing::warn!(sink = sink.name(), error = %e, "alert sink failed");
            }
        }
        if alert.severity == Severity::High {
            if let Some(response) = &self.response {
                if let Err(e) = response.block_source(alert.src_ip, alert).await {
                    tracing::warn!(sink = response.name(), error = %e, "response sink failed");
                }
            }
        }
    }

    /// Acknowledge an alert. Idempotent.
    pub fn acknowledge(
        &self,
        id: u64,
        user: &str,
        notes: Option<String>,
    ) -> Result<Alert, QueryError> {
        let mut inner = self.inner.lock();
        let mut alert = inner.alerts.get(&id).cloned().ok_or(QueryError::NotFound)?;
        if !alert.acknowledged {
            alert.acknowledged = true;
            alert.ack_user = Some(user.to_string());
            alert.ack_time = Some(now_epoch());
        }
        if let Some(notes) = notes {
            alert.notes = Some(notes);
        }
        alert.last_updated = now_epoch();
        inner.alerts.insert(id, alert.clone());
        append_log(&mut inner.log, &alert);
        Ok(alert)
    }

    /// Transition an alert's status. Idempotent per status; terminal
    /// states only move again through this explicit call, and the
    /// override is recorded in the notes.
    pub fn set_status(
        &self,
        id: u64,
        status: AlertStatus,
        notes: Option<String>,
    ) -> Result<Alert, QueryError> {
        let mut inner = self.inner.lock();
        let mut alert = inner.alerts.get(&id).cloned().ok_or(QueryError::NotFound)?;

        if alert.status == status {
            if let Some(notes) = notes {
                alert.notes = Some(notes);
                inner.alerts.insert(id, alert.clone());
                append_log(&mut inner.log, &alert);
            }
            return Ok(alert);
        }

        let from = alert.status;
        let allowed = match (from, status) {
            (AlertStatus::New, _) => true,
            (AlertStatus::Investigating, AlertStatus::Resolved)
            | (AlertStatus::Investigating, AlertStatus::FalsePositive) => true,
            (f, _) if f.is_terminal() => true,
            _ => false,
        };
        if !allowed {
            return Err(QueryError::InvalidInput(format!(
                "cannot move alert from {} to {}",
                from.as_str(),
                status.as_str()
            )));
        }

        if from.is_terminal() {
            let override_note = format!("reopened from {} by operator", from.as_str());
            alert.notes = Some(match (alert.notes.take(), notes) {
                (Some(prev), Some(new)) => format!("{prev}; {override_note}; {new}"),
                (Some(prev), None) => format!("{prev}; {override_note}"),
                (None, Some(new)) => format!("{override_note}; {new}"),
                (None, None) => override_note,
            });
        } else if let Some(notes) = notes {
            alert.notes = Some(notes);
        }

        alert.status = status;
        alert.last_updated = now_epoch();
        if !status.is_terminal() {
            inner
                .dedupe
                .insert((alert.flow_key(), alert.threat.clone()), id);
        } else {
            inner.dedupe.remove(&(alert.flow_key(), alert.threat.clone()));
        }
        inner.alerts.insert(id, alert.clone());
        append_log(&mut inner.log, &alert);
        Ok(alert)
    }

    /// Fetch one alert.
    pub fn get(&self, id: u64) -> Result<Alert, QueryError> {
        self.inner
            .lock()
            .alerts
            .get(&id)
            .cloned()
            .ok_or(QueryError::NotFound)
    }

    /// Filtered query, newest first.
    pub fn query(&self, filter: &AlertFilter) -> Vec<Alert> {
        let inner = self.inner.lock();
        let mut out: Vec<Alert> = inner
            .alerts
            .values()
            .rev()
            .filter(|a| filter.severity.map_or(true, |s| a.severity == s))
            .filter(|a| filter.threat.as_ref().map_or(true, |t| &a.threat == t))
            .filter(|a| filter.acknowledged.map_or(true, |ack| a.acknowledged == ack))
            .filter(|a| filter.status.map_or(true, |s| a.status == s))
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.inner.lock().alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().alerts.is_empty()
    }

    /// Lossless-per-subscriber stream of newly created alerts, in id
    /// order from the subscription point forward.
    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.tx.subscribe()
    }
}

fn now_epoch() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + now.timestamp_subsec_micros() as f64 / 1e6
}

fn append_log(log: &mut File, alert: &Alert) {
    match serde_json::to_string(alert) {
        Ok(line) => {
            if let Err(e) = log.write_all(line.as_bytes()).and_then(|_| log.write_all(b"\n")) {
                tracing::warn!(error = %e, "alert log write failed");
            } else if let Err(e) = log.flush() {
                tracing::warn!(error = %e, "alert log flush failed");
            }
        }
        Err(e) => tracing::warn!(error = %e, "alert serialize failed"),
    }
}

/// Replay the journal. Later records for an id win; truncated tails
/// from a crash mid-write are skipped with a warning.
fn replay_log(path: &PathBuf) -> SentraResult<(BTreeMap<u64, Alert>, u64)> {
    let mut alerts = BTreeMap::new();
    let mut next_id = 1;

    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((alerts, next_id)),
        Err(e) => {
            return Err(SentraError::Storage(format!(
                "cannot read alert log {}: {e}",
                path.display()
            )))
        }
    };

    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| SentraError::Storage(format!("alert log read: {e}")))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Alert>(&line) {
            Ok(mut alert) => {
                alert.last_updated = alert.timestamp;
                next_id = next_id.max(alert.id + 1);
                alerts.insert(alert.id, alert);
            }
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable alert log line");
            }
        }
    }
    Ok((alerts, next_id))
}
