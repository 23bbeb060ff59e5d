//! Frozen model artifacts
//!
//! JSON documents produced by the training pipeline. Any shape
//! mismatch is fatal at startup; nothing here is reconstructed or
//! repaired at runtime.

use sentra_common::labels::BENIGN_LABEL;
use sentra_common::{SentraError, SentraResult};
use sentra_flow::{FeatureVector, FEATURE_NAMES, NUM_FEATURES};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> SentraResult<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        SentraError::ModelArtifact(format!("{what} missing at {}: {e}", path.display()))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        SentraError::ModelArtifact(format!("{what} unparseable at {}: {e}", path.display()))
    })
}

// =============================================================================
// Standard scaler
// =============================================================================

/// Per-feature affine transform applied before either model.
#[derive(Debug, Clone, Deserialize)]
pub struct Scaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl Scaler {
    pub fn load(path: &Path) -> SentraResult<Self> {
        let scaler: Scaler = read_json(path, "scaler")?;
        if scaler.mean.len() != NUM_FEATURES || scaler.scale.len() != NUM_FEATURES {
            return Err(SentraError::ModelArtifact(format!(
                "scaler expects {NUM_FEATURES} features, got mean={} scale={}",
                scaler.mean.len(),
                scaler.scale.len()
            )));
        }
        Ok(scaler)
    }

    /// `(x - mean) / scale`, in place. A zero scale entry divides by 1.
    pub fn transform(&self, x: &mut FeatureVector) {
        for i in 0..NUM_FEATURES {
            let s = if self.scale[i] == 0.0 { 1.0 } else { self.scale[i] };
            x[i] = (x[i] - self.mean[i]) / s;
        }
    }

    #[cfg(test)]
    pub(crate) fn identity() -> Self {
        Self {
            mean: vec![0.0; NUM_FEATURES],
            scale: vec![1.0; NUM_FEATURES],
        }
    }
}

// =============================================================================
// Calibrated tree forest
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        leaf: Vec<f64>,
    },
}

#[derive(Debug, Clone, Deserialize)]
struct Tree {
    nodes: Vec<TreeNode>,
}

impl Tree {
    fn predict(&self, x: &FeatureVector, out: &mut [f64]) {
        let mut idx = 0usize;
        // Node indices were validated at load; the hop bound guards
        // against cyclic artifacts.
        for _ in 0..=self.nodes.len() {
            match &self.nodes[idx] {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if x[*feature] <= *threshold { *left } else { *right };
                }
                TreeNode::Leaf { leaf } => {
                    for (o, p) in out.iter_mut().zip(leaf.iter()) {
                        *o += p;
                    }
                    return;
                }
            }
        }
    }
}

/// Calibrated multi-class forest; probabilities are the average of
/// per-tree leaf distributions.
#[derive(Debug, Clone, Deserialize)]
pub struct Forest {
    n_classes: usize,
    trees: Vec<Tree>,
}

impl Forest {
    pub fn load(path: &Path, n_classes: usize) -> SentraResult<Self> {
        let forest: Forest = read_json(path, "tree model")?;
        if forest.n_classes != n_classes {
            return Err(SentraError::ModelArtifact(format!(
                "tree model emits {} classes, expected {n_classes}",
                forest.n_classes
            )));
        }
        if forest.trees.is_empty() {
            return Err(SentraError::ModelArtifact("tree model has no trees".into()));
        }
        for (t, tree) in forest.trees.iter().enumerate() {
            for node in &tree.nodes {
                match node {
                    TreeNode::Split {
                        feature,
                        left,
                        right,
                        ..
                    } => {
                        if *feature >= NUM_FEATURES
                            || *left >= tree.nodes.len()
                            || *right >= tree.nodes.len()
                        {
                            return Err(SentraError::ModelArtifact(format!(
                                "tree {t} has an out-of-range node reference"
                            )));
                        }
                    }
                    TreeNode::Leaf { leaf } => {
                        if leaf.len() != n_classes {
                            return Err(SentraError::ModelArtifact(format!(
                                "tree {t} leaf has {} classes, expected {n_classes}",
                                leaf.len()
                            )));
                        }
                    }
                }
            }
        }
        Ok(forest)
    }

    /// Class probabilities for a scaled feature vector.
    pub fn predict_proba(&self, x: &FeatureVector) -> Vec<f64> {
        let mut out = vec![0.0; self.n_classes];
        for tree in &self.trees {
            tree.predict(x, &mut out);
        }
        let inv = 1.0 / self.trees.len() as f64;
        for p in out.iter_mut() {
            *p *= inv;
        }
        out
    }
}

// =============================================================================
// Feed-forward network
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Activation {
    Relu,
    Softmax,
    Linear,
}

#[derive(Debug, Clone, Deserialize)]
struct DenseLayer {
    /// Row-major, one row per output unit
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
    activation: Activation,
}

/// Feed-forward classifier with a softmax output layer.
#[derive(Debug, Clone, Deserialize)]
pub struct Network {
    layers: Vec<DenseLayer>,
}

impl Network {
    pub fn load(path: &Path, n_classes: usize) -> SentraResult<Self> {
        let network: Network = read_json(path, "neural model")?;
        if network.layers.is_empty() {
            return Err(SentraError::ModelArtifact("neural model has no layers".into()));
        }

        let mut dim = NUM_FEATURES;
        for (i, layer) in network.layers.iter().enumerate() {
            if layer.weights.is_empty() || layer.weights.len() != layer.bias.len() {
                return Err(SentraError::ModelArtifact(format!(
                    "neural model layer {i} weight/bias shape mismatch"
                )));
            }
            for row in &layer.weights {
                if row.len() != dim {
                    return Err(SentraError::ModelArtifact(format!(
                        "neural model layer {i} expects input {dim}, got {}",
                        row.len()
                    )));
                }
            }
            dim = layer.weights.len();
        }
        if dim != n_classes {
            return Err(SentraError::ModelArtifact(format!(
                "neural model emits {dim} classes, expected {n_classes}"
            )));
        }
        let last = network
            .layers
            .last()
            .map(|l| l.activation)
            .unwrap_or(Activation::Linear);
        if last != Activation::Softmax {
            return Err(SentraError::ModelArtifact(
                "neural model output layer must be softmax".into(),
            ));
        }
        Ok(network)
    }

    /// Class probabilities for a scaled feature vector.
    pub fn predict_proba(&self, x: &FeatureVector) -> Vec<f64> {
        let mut current: Vec<f64> = x.to_vec();
        for layer in &self.layers {
            let mut next = Vec::with_capacity(layer.weights.len());
            for (row, b) in layer.weights.iter().zip(layer.bias.iter()) {
                let z: f64 = row.iter().zip(current.iter()).map(|(w, v)| w * v).sum::<f64>() + b;
                next.push(z);
            }
            match layer.activation {
                Activation::Relu => {
                    for z in next.iter_mut() {
                        *z = z.max(0.0);
                    }
                }
                Activation::Softmax => softmax(&mut next),
                Activation::Linear => {}
            }
            current = next;
        }
        current
    }
}

/// Numerically stable softmax.
fn softmax(z: &mut [f64]) {
    let max = z.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mut sum = 0.0;
    for v in z.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    if sum > 0.0 {
        for v in z.iter_mut() {
            *v /= sum;
        }
    }
}

// =============================================================================
// Class mapping
// =============================================================================

/// Label alphabet shipped with the models, trusted as-is.
#[derive(Debug, Clone)]
pub struct ClassMapping {
    labels: Vec<String>,
    benign_index: usize,
}

impl ClassMapping {
    /// Load the label-to-index mapping and, when present, the sibling
    /// `feature_info.json` feature list, which must match the
    /// canonical column order exactly.
    pub fn load(path: &Path) -> SentraResult<Self> {
        let raw: HashMap<String, usize> = read_json(path, "class mapping")?;
        if raw.is_empty() {
            return Err(SentraError::ModelArtifact("class mapping is empty".into()));
        }

        let mut labels = vec![String::new(); raw.len()];
        for (label, index) in &raw {
            if *index >= labels.len() || !labels[*index].is_empty() {
                return Err(SentraError::ModelArtifact(format!(
                    "class mapping indices must be unique and contiguous, bad entry {label:?} -> {index}"
                )));
            }
            labels[*index] = label.clone();
        }
        let benign_index = labels
            .iter()
            .position(|l| l == BENIGN_LABEL)
            .ok_or_else(|| {
                SentraError::ModelArtifact(format!("class mapping lacks {BENIGN_LABEL:?}"))
            })?;

        check_feature_info(path)?;
        Ok(Self {
            labels,
            benign_index,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn label(&self, index: usize) -> &str {
        &self.labels[index]
    }

    pub fn benign_index(&self) -> usize {
        self.benign_index
    }
}

#[derive(Debug, Deserialize)]
struct FeatureInfo {
    features: Vec<String>,
}

/// Validate the optional `feature_info.json` next to the class
/// mapping. A list that disagrees with the canonical 37 columns
/// means the artifacts were trained on a different schema.
fn check_feature_info(class_mapping_path: &Path) -> SentraResult<()> {
    let sibling = class_mapping_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("feature_info.json");
    if !sibling.exists() {
        return Ok(());
    }
    let info: FeatureInfo = read_json(&sibling, "feature info")?;
    let expected: Vec<&str> = FEATURE_NAMES.to_vec();
    let actual: Vec<&str> = info.features.iter().map(|s| s.as_str()).collect();
    if actual != expected {
        return Err(SentraError::ModelArtifact(format!(
            "feature_info.json lists {} features that do not match the canonical {} columns",
            actual.len(),
            NUM_FEATURES
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentra_common::labels::CLASS_LABELS;
    use std::io::Write;

    pub(crate) fn write_json(dir: &Path, name: &str, json: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(json.as_bytes()).unwrap();
        path
    }

    pub(crate) fn mapping_json() -> String {
        let entries: Vec<String> = CLASS_LABELS
            .iter()
            .enumerate()
            .map(|(i, l)| format!("\"{l}\": {i}"))
            .collect();
        format!("{{{}}}", entries.join(", "))
    }

    #[test]
    fn test_scaler_transform() {
        let mut scaler = Scaler::identity();
        scaler.mean[0] = 10.0;
        scaler.scale[0] = 2.0;
        scaler.scale[1] = 0.0; // degenerate column divides by 1
        let mut x = [0.0; NUM_FEATURES];
        x[0] = 14.0;
        x[1] = 3.0;
        scaler.transform(&mut x);
        assert_eq!(x[0], 2.0);
        assert_eq!(x[1], 3.0);
    }

    #[test]
    fn test_forest_walk() {
        let dir = tempfile::tempdir().unwrap();
        let mut benign = vec![0.0; 34];
        benign[0] = 1.0;
        let mut attack = vec![0.0; 34];
        attack[7] = 1.0;
        let json = format!(
            r#"{{"n_classes": 34, "trees": [{{"nodes": [
                {{"feature": 12, "threshold": 100.0, "left": 1, "right": 2}},
                {{"leaf": {benign:?}}},
                {{"leaf": {attack:?}}}
            ]}}]}}"#
        );
        let path = write_json(dir.path(), "forest.json", &json);
        let forest = Forest::load(&path, 34).unwrap();

        let mut x = [0.0; NUM_FEATURES];
        x[12] = 500.0;
        let p = forest.predict_proba(&x);
        assert_eq!(p[7], 1.0);

        x[12] = 5.0;
        let p = forest.predict_proba(&x);
        assert_eq!(p[0], 1.0);
    }

    #[test]
    fn test_forest_rejects_bad_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_json(
            dir.path(),
            "forest.json",
            r#"{"n_classes": 34, "trees": [{"nodes": [{"leaf": [1.0, 0.0]}]}]}"#,
        );
        assert!(Forest::load(&path, 34).is_err());
    }

    #[test]
    fn test_network_forward_and_softmax() {
        let dir = tempfile::tempdir().unwrap();
        // One dense layer picking out feature 12 for class 7.
        let mut rows = vec![vec![0.0; NUM_FEATURES]; 34];
        rows[7][12] = 1.0;
        let json = serde_json::json!({
            "layers": [{"weights": rows, "bias": vec![0.0; 34], "activation": "softmax"}]
        });
        let path = write_json(dir.path(), "nn.json", &json.to_string());
        let nn = Network::load(&path, 34).unwrap();

        let mut x = [0.0; NUM_FEATURES];
        x[12] = 50.0;
        let p = nn.predict_proba(&x);
        assert!(p[7] > 0.99);
        let total: f64 = p.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_network_requires_softmax_output() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![vec![0.0; NUM_FEATURES]; 34];
        let json = serde_json::json!({
            "layers": [{"weights": rows, "bias": vec![0.0; 34], "activation": "relu"}]
        });
        let path = write_json(dir.path(), "nn.json", &json.to_string());
        assert!(Network::load(&path, 34).is_err());
    }

    #[test]
    fn test_class_mapping_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_json(dir.path(), "classes.json", &mapping_json());
        let mapping = ClassMapping::load(&path).unwrap();
        assert_eq!(mapping.len(), 34);
        assert_eq!(mapping.label(mapping.benign_index()), BENIGN_LABEL);
        assert_eq!(mapping.label(7), "DDoS-SYN_Flood");
    }

    #[test]
    fn test_class_mapping_rejects_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_json(
            dir.path(),
            "classes.json",
            r#"{"BenignTraffic": 0, "DDoS-SYN_Flood": 2}"#,
        );
        assert!(ClassMapping::load(&path).is_err());
    }

    #[test]
    fn test_feature_info_mismatch_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_json(dir.path(), "classes.json", &mapping_json());
        write_json(
            dir.path(),
            "feature_info.json",
            r#"{"features": ["flow_duration", "something_else"]}"#,
        );
        assert!(ClassMapping::load(&path).is_err());
    }

    #[test]
    fn test_feature_info_match_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_json(dir.path(), "classes.json", &mapping_json());
        let features = serde_json::json!({ "features": &FEATURE_NAMES[..] });
        write_json(dir.path(), "feature_info.json", &features.to_string());
        assert!(ClassMapping::load(&path).is_ok());
    }
}
