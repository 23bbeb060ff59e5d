//! Engine
//!
//! Owns every long-lived task and the channels between them. Startup
//! order matters: models load first, then the capture channel opens,
//! and only then does anything touch the filesystem, so a privilege
//! failure leaves no files behind.

use chrono::Utc;
use sentra_alerts::{AlertManager, AlertManagerConfig, AlertSink, LogSink, NoopResponseSink, StatisticsTracker};
use sentra_capture::Capture;
use sentra_common::{Config, EngineCounters, PacketSummary, SentraResult};
use sentra_detect::{AdaptiveBaseline, Suppressor, Verdict};
use sentra_flow::{extract, FlowOverview, FlowSnapshot, FlowTable, FlowTableConfig};
use sentra_ml::{Ensemble, InferenceService};
use sentra_store::{FlowRecord, FlowStore, StoreHealth};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};

const SCORING_QUEUE_SIZE: usize = 1024;
const EVICTION_TICK: Duration = Duration::from_secs(1);
const PERSIST_INTERVAL: Duration = Duration::from_secs(60);
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

/// Handle for feeding packets into the engine, used by capture and
/// by replay-driven tests.
pub type PacketSender = mpsc::UnboundedSender<PacketSummary>;

/// The running engine.
pub struct Engine {
    counters: Arc<EngineCounters>,
    alerts: Arc<AlertManager>,
    stats: Arc<StatisticsTracker>,
    store: Option<Arc<FlowStore>>,
    suppressor: Arc<Suppressor>,
    flows_rx: watch::Receiver<Vec<FlowOverview>>,
    started: Instant,

    packet_tx: Option<PacketSender>,
    stop_capture: Arc<AtomicBool>,
    capture_thread: Option<std::thread::JoinHandle<()>>,
    aggregator: Option<tokio::task::JoinHandle<()>>,
    scorer: Option<tokio::task::JoinHandle<()>>,
    persister: Option<tokio::task::JoinHandle<()>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

impl Engine {
    /// Start against a live capture interface.
    pub async fn start(config: Config) -> SentraResult<Engine> {
        config.validate()?;
        let ensemble = Arc::new(Ensemble::load(&config.models)?);
        let capture = Capture::open(&config.network.interface)?;
        let (engine, _tx) = Self::start_inner(config, ensemble, Some(capture)).await?;
        Ok(engine)
    }

    /// Start without capture; the returned sender feeds packets
    /// directly into the aggregator. Used by replay tooling and
    /// tests.
    pub async fn start_with_source(config: Config) -> SentraResult<(Engine, PacketSender)> {
        config.validate()?;
        let ensemble = Arc::new(Ensemble::load(&config.models)?);
        Self::start_inner(config, ensemble, None).await
    }

    async fn start_inner(
        config: Config,
        ensemble: Arc<Ensemble>,
        capture: Option<Capture>,
    ) -> SentraResult<(Engine, PacketSender)> {
        let counters = Arc::new(EngineCounters::default());
        let epoch = Instant::now();

        let store = if config.database.enabled {
            Some(Arc::new(FlowStore::open(config.database.clone(), counters.clone()).await?))
        } else {
            None
        };

        let sinks: Vec<Arc<dyn AlertSink>> = vec![Arc::new(LogSink)];
        let alerts = Arc::new(AlertManager::new(
            AlertManagerConfig {
                dedupe_window: Duration::from_secs(config.alerts.dedupe_window_seconds),
                log_path: config.alerts.log_path.clone(),
                ..AlertManagerConfig::default()
            },
            sinks,
            Some(Arc::new(NoopResponseSink)),
        )?);

        let stats_path = config
            .database
            .enabled
            .then(|| config.database.directory.join("stats.json"));
        let stats = Arc::new(StatisticsTracker::new(stats_path));

        let baseline = AdaptiveBaseline::load(config.detection.adaptive_baseline.clone());
        let suppressor = Arc::new(Suppressor::new(&config.detection, baseline));

        let inference = InferenceService::new(
            ensemble,
            Duration::from_secs_f64(config.models.inference_timeout),
            counters.clone(),
        );

        let (packet_tx, packet_rx) = mpsc::unbounded_channel();
        let (snap_tx, snap_rx) = mpsc::channel(SCORING_QUEUE_SIZE);
        let (flows_tx, flows_rx) = watch::channel(Vec::new());

        let aggregator = tokio::spawn(aggregator_loop(
            packet_rx,
            snap_tx,
            flows_tx,
            epoch,
            counters.clone(),
        ));

        let scorer = tokio::spawn(scorer_loop(
            snap_rx,
            inference,
            suppressor.clone(),
            alerts.clone(),
            stats.clone(),
            store.clone(),
        ));

        let persister = tokio::spawn(persist_loop(stats.clone(), suppressor.clone()));

        if let Some(store) = &store {
            tokio::spawn(health_watch(store.health(), alerts.clone()));
        }

        let stop_capture = Arc::new(AtomicBool::new(false));
        let capture_thread = match capture {
            Some(capture) => Some(capture.spawn(
                epoch,
                packet_tx.clone(),
                counters.clone(),
                stop_capture.clone(),
            )?),
            None => None,
        };

        tracing::info!("engine started");
        let engine = Engine {
            counters,
            alerts,
            stats,
            store,
            suppressor,
            flows_rx,
            started: epoch,
            packet_tx: Some(packet_tx.clone()),
            stop_capture,
            capture_thread,
            aggregator: Some(aggregator),
            scorer: Some(scorer),
            persister: Some(persister),
        };
        Ok((engine, packet_tx))
    }

    /// Read-only surface for external transports.
    pub fn surface(&self) -> crate::surface::QuerySurface {
        crate::surface::QuerySurface::new(
            self.alerts.clone(),
            self.stats.clone(),
            self.store.clone(),
            self.suppressor.clone(),
            self.flows_rx.clone(),
            self.counters.clone(),
        )
    }

    pub fn counters(&self) -> Arc<EngineCounters> {
        self.counters.clone()
    }

    /// Cooperative shutdown: close capture, finalize all flows
    /// (final scoring), and drain downstream queues, all bounded by
    /// one deadline. Work still in flight at the deadline is dropped
    /// with a counter.
    pub async fn shutdown(mut self) {
        let deadline = Instant::now() + SHUTDOWN_DEADLINE;
        tracing::info!("engine shutting down");

        self.stop_capture.store(true, Ordering::Relaxed);
        if let Some(thread) = self.capture_thread.take() {
            let _ = tokio::task::spawn_blocking(move || thread.join()).await;
        }

        // Closing the packet channel drains the aggregator, which
        // closes the scoring channel behind it.
        self.packet_tx.take();
        for task in [self.aggregator.take(), self.scorer.take()].into_iter().flatten() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, task).await.is_err() {
                self.counters.shutdown_drops.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("pipeline stage did not drain before deadline");
            }
        }

        if let Some(store) = &self.store {
            store
                .shutdown(deadline.saturating_duration_since(Instant::now()))
                .await;
        }
        if let Some(persister) = self.persister.take() {
            persister.abort();
        }
        if let Err(e) = self.stats.persist() {
            tracing::warn!(error = %e, "statistics persist failed at shutdown");
        }
        if let Err(e) = self.suppressor.baseline().persist() {
            tracing::warn!(error = %e, "baseline persist failed at shutdown");
        }

        let snapshot = self.counters.snapshot();
        tracing::info!(
            packets = snapshot.packets_captured,
            flows = snapshot.flows_created,
            scores = snapshot.scores_completed,
            uptime_seconds = self.started.elapsed().as_secs(),
            "engine stopped"
        );
    }
}

/// Single writer for the flow table.
async fn aggregator_loop(
    mut packet_rx: mpsc::UnboundedReceiver<PacketSummary>,
    snap_tx: mpsc::Sender<FlowSnapshot>,
    flows_tx: watch::Sender<Vec<FlowOverview>>,
    epoch: Instant,
    counters: Arc<EngineCounters>,
) {
    let mut table = FlowTable::new(FlowTableConfig::default(), counters.clone());
    let mut tick = tokio::time::interval(EVICTION_TICK);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let submit = |due: Vec<FlowSnapshot>, counters: &EngineCounters| {
        for snap in due {
            if snap_tx.try_send(snap).is_err() {
                counters.scoring_queue_drops.fetch_add(1, Ordering::Relaxed);
            }
        }
    };

    loop {
        tokio::select! {
            maybe_packet = packet_rx.recv() => match maybe_packet {
                Some(packet) => {
                    let due = table.ingest(&packet, Utc::now());
                    submit(due, &counters);
                }
                None => break,
            },
            _ = tick.tick() => {
                let now_nanos = epoch.elapsed().as_nanos() as u64;
                submit(table.evict_idle(now_nanos), &counters);
                let _ = flows_tx.send(table.overview());
            }
        }
    }

    // Shutdown: finalize everything still in the table.
    submit(table.drain_all(), &counters);
    let _ = flows_tx.send(Vec::new());
    tracing::debug!("aggregator drained");
}

/// Sequential scoring worker: extraction, ensemble, suppression,
/// then fan-out. Per-flow scoring order follows submission order.
async fn scorer_loop(
    mut snap_rx: mpsc::Receiver<FlowSnapshot>,
    inference: InferenceService,
    suppressor: Arc<Suppressor>,
    alerts: Arc<AlertManager>,
    stats: Arc<StatisticsTracker>,
    store: Option<Arc<FlowStore>>,
) {
    while let Some(snap) = snap_rx.recv().await {
        let features = extract(&snap);
        let prediction = inference.score(features).await;
        let verdict = suppressor.evaluate(&snap, &prediction);
        let emitted = verdict == Verdict::Emit;

        if emitted {
            let context = format!(
                "{} packets, {:.1} pkt/s, confidence {:.3} via {}",
                snap.packet_count(),
                snap.rate(),
                prediction.confidence,
                prediction.method.as_str(),
            );
            let (alert, is_new) = alerts
                .ingest(snap.key, snap.packet_count(), &prediction, context)
                .await;
            if is_new {
                stats.record(&alert);
            }
        }

        if let Some(store) = &store {
            store.ingest(FlowRecord::from_scored(&snap, &features, &prediction, emitted));
        }
    }
    tracing::debug!("scorer drained");
}

/// Periodic snapshot persistence for statistics and the baseline.
async fn persist_loop(stats: Arc<StatisticsTracker>, suppressor: Arc<Suppressor>) {
    let mut tick = tokio::time::interval(PERSIST_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    tick.tick().await; // immediate first tick is pointless
    loop {
        tick.tick().await;
        if let Err(e) = stats.persist() {
            tracing::warn!(error = %e, "statistics persist failed");
        }
        if let Err(e) = suppressor.baseline().persist() {
            tracing::warn!(error = %e, "baseline persist failed");
        }
    }
}

/// One operational alert when the store degrades to bypass mode.
async fn health_watch(mut health: watch::Receiver<StoreHealth>, alerts: Arc<AlertManager>) {
    while health.changed().await.is_ok() {
        if *health.borrow() == StoreHealth::Bypass {
            alerts
                .ingest_operational(
                    "FlowStoreBypass",
                    "flow store entered bypass mode after repeated write failures".into(),
                )
                .await;
            break;
        }
    }
}
