//! Weighted ensemble
//!
//! Combines the calibrated forest and the network into a single
//! prediction: scale, blend, argmax, benign fallback below the
//! optimal threshold, consensus boost when both models agree.

use crate::artifacts::{ClassMapping, Forest, Network, Scaler};
use sentra_common::config::ModelsConfig;
use sentra_common::labels::{severity_for, Severity};
use sentra_common::SentraResult;
use sentra_flow::FeatureVector;
use serde::Serialize;

/// How a prediction was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionMethod {
    /// Both model argmaxes agree with the blend
    EnsembleConsensus,
    /// Blend only
    EnsembleWeighted,
    /// Inference failed or timed out; benign with zero confidence
    SyntheticBenign,
}

impl PredictionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EnsembleConsensus => "ensemble_consensus",
            Self::EnsembleWeighted => "ensemble_weighted",
            Self::SyntheticBenign => "synthetic_benign",
        }
    }
}

/// One model's vote inside the ensemble.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ModelVote {
    pub class_index: usize,
    pub confidence: f64,
}

/// Scoring result attached to a flow snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub label: String,
    pub class_index: usize,
    pub severity: Severity,
    pub confidence: f64,
    pub method: PredictionMethod,
    pub tree: ModelVote,
    pub nn: ModelVote,
}

impl Prediction {
    pub fn is_benign(&self) -> bool {
        self.severity == Severity::Low
    }
}

/// The loaded ensemble. Stateless after construction.
pub struct Ensemble {
    scaler: Scaler,
    forest: Forest,
    network: Network,
    classes: ClassMapping,
    ml_weight: f64,
    dl_weight: f64,
    optimal_threshold: f64,
}

impl Ensemble {
    /// Load all frozen artifacts. Any missing or malformed artifact
    /// fails here and the core refuses to start.
    pub fn load(cfg: &ModelsConfig) -> SentraResult<Self> {
        let classes = ClassMapping::load(&cfg.class_mapping_path)?;
        let scaler = Scaler::load(&cfg.scaler_path)?;
        let forest = Forest::load(&cfg.ml_path, classes.len())?;
        let network = Network::load(&cfg.dl_path, classes.len())?;
        tracing::info!(
            classes = classes.len(),
            ml_weight = cfg.ml_weight,
            dl_weight = cfg.dl_weight,
            "model artifacts loaded"
        );
        Ok(Self {
            scaler,
            forest,
            network,
            classes,
            ml_weight: cfg.ml_weight,
            dl_weight: cfg.dl_weight,
            optimal_threshold: cfg.optimal_threshold,
        })
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Score one feature vector.
    pub fn predict(&self, features: &FeatureVector) -> Prediction {
        let mut x = *features;
        // Non-finite inputs are zeroed before scaling.
        for v in x.iter_mut() {
            if !v.is_finite() {
                *v = 0.0;
            }
        }
        self.scaler.transform(&mut x);

        let p_tree = self.forest.predict_proba(&x);
        let p_nn = self.network.predict_proba(&x);

        let combined: Vec<f64> = p_tree
            .iter()
            .zip(p_nn.iter())
            .map(|(t, n)| self.ml_weight * t + self.dl_weight * n)
            .collect();

        let best = argmax(&combined);
        let tree_best = argmax(&p_tree);
        let nn_best = argmax(&p_nn);

        let consensus = tree_best == best && nn_best == best;
        let method = if consensus {
            PredictionMethod::EnsembleConsensus
        } else {
            PredictionMethod::EnsembleWeighted
        };

        let benign = self.classes.benign_index();
        let (class_index, confidence) = if combined[best] < self.optimal_threshold {
            // Too uncertain to call an attack.
            (benign, combined[benign])
        } else {
            let mut conf = combined[best];
            if consensus {
                conf = (conf * 1.05).min(1.0);
            }
            (best, conf)
        };

        let label = self.classes.label(class_index).to_string();
        Prediction {
            severity: severity_for(&label),
            label,
            class_index,
            confidence: confidence.clamp(0.0, 1.0),
            method,
            tree: ModelVote {
                class_index: tree_best,
                confidence: p_tree[tree_best],
            },
            nn: ModelVote {
                class_index: nn_best,
                confidence: p_nn[nn_best],
            },
        }
    }

    /// Benign prediction with zero confidence, used when inference
    /// fails so downstream never stalls.
    pub fn synthetic_benign(&self) -> Prediction {
        let benign = self.classes.benign_index();
        let label = self.classes.label(benign).to_string();
        Prediction {
            severity: Severity::Low,
            label,
            class_index: benign,
            confidence: 0.0,
            method: PredictionMethod::SyntheticBenign,
            tree: ModelVote {
                class_index: benign,
                confidence: 0.0,
            },
            nn: ModelVote {
                class_index: benign,
                confidence: 0.0,
            },
        }
    }
}

fn argmax(p: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in p.iter().enumerate() {
        if *v > p[best] {
            best = i;
        }
    }
    best
}
