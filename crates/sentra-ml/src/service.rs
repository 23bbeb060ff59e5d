//! Inference service
//!
//! Bounded worker pool in front of the ensemble so capture never
//! stalls on model calls. Calls that exceed the timeout are
//! abandoned and the flow gets a synthetic benign prediction.

use crate::ensemble::{Ensemble, Prediction};
use sentra_common::EngineCounters;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Inference worker pool. Cheap to clone via `Arc` fields.
#[derive(Clone)]
pub struct InferenceService {
    ensemble: Arc<Ensemble>,
    permits: Arc<Semaphore>,
    timeout: Duration,
    counters: Arc<EngineCounters>,
}

impl InferenceService {
    pub fn new(ensemble: Arc<Ensemble>, timeout: Duration, counters: Arc<EngineCounters>) -> Self {
        let workers = num_cpus::get().clamp(1, 4);
        tracing::info!(workers, timeout_ms = timeout.as_millis() as u64, "inference pool ready");
        Self {
            ensemble,
            permits: Arc::new(Semaphore::new(workers)),
            timeout,
            counters,
        }
    }

    /// Score one feature vector on the pool. Never fails: any
    /// inference problem degrades to a synthetic benign prediction.
    pub async fn score(&self, features: sentra_flow::FeatureVector) -> Prediction {
        let permit = match self.permits.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => return self.ensemble.synthetic_benign(),
        };

        let ensemble = self.ensemble.clone();
        let call = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            ensemble.predict(&features)
        });

        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(prediction)) => {
                self.counters.scores_completed.fetch_add(1, Ordering::Relaxed);
                prediction
            }
            Ok(Err(e)) => {
                self.counters.inference_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "inference worker failed");
                self.ensemble.synthetic_benign()
            }
            Err(_) => {
                self.counters.inference_timeouts.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "inference abandoned");
                self.ensemble.synthetic_benign()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentra_common::config::ModelsConfig;
    use sentra_common::labels::CLASS_LABELS;
    use sentra_flow::NUM_FEATURES;

    fn test_models(dir: &std::path::Path) -> ModelsConfig {
        let entries: Vec<String> = CLASS_LABELS
            .iter()
            .enumerate()
            .map(|(i, l)| format!("\"{l}\": {i}"))
            .collect();
        std::fs::write(dir.join("classes.json"), format!("{{{}}}", entries.join(", "))).unwrap();
        std::fs::write(
            dir.join("scaler.json"),
            serde_json::json!({
                "mean": vec![0.0; NUM_FEATURES],
                "scale": vec![1.0; NUM_FEATURES],
            })
            .to_string(),
        )
        .unwrap();

        let mut benign_leaf = vec![0.0; 34];
        benign_leaf[0] = 1.0;
        std::fs::write(
            dir.join("forest.json"),
            serde_json::json!({
                "n_classes": 34,
                "trees": [{"nodes": [{"leaf": benign_leaf}]}],
            })
            .to_string(),
        )
        .unwrap();

        let rows = vec![vec![0.0; NUM_FEATURES]; 34];
        std::fs::write(
            dir.join("nn.json"),
            serde_json::json!({
                "layers": [{"weights": rows, "bias": vec![0.0; 34], "activation": "softmax"}]
            })
            .to_string(),
        )
        .unwrap();

        ModelsConfig {
            ml_path: dir.join("forest.json"),
            dl_path: dir.join("nn.json"),
            scaler_path: dir.join("scaler.json"),
            class_mapping_path: dir.join("classes.json"),
            ..ModelsConfig::default()
        }
    }

    #[tokio::test]
    async fn test_score_on_pool() {
        let dir = tempfile::tempdir().unwrap();
        let ensemble = Arc::new(Ensemble::load(&test_models(dir.path())).unwrap());
        let counters = Arc::new(EngineCounters::default());
        let service = InferenceService::new(ensemble, Duration::from_secs(2), counters.clone());

        let pred = service.score([0.0; NUM_FEATURES]).await;
        assert_eq!(pred.label, "BenignTraffic");
        assert_eq!(counters.snapshot().scores_completed, 1);
    }

    #[tokio::test]
    async fn test_concurrent_scores_all_complete() {
        let dir = tempfile::tempdir().unwrap();
        let ensemble = Arc::new(Ensemble::load(&test_models(dir.path())).unwrap());
        let counters = Arc::new(EngineCounters::default());
        let service = InferenceService::new(ensemble, Duration::from_secs(2), counters.clone());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let svc = service.clone();
            handles.push(tokio::spawn(async move { svc.score([0.0; NUM_FEATURES]).await }));
        }
        for h in handles {
            assert!(h.await.unwrap().confidence <= 1.0);
        }
        assert_eq!(counters.snapshot().scores_completed, 16);
    }
}
