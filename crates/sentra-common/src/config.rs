//! Sentra configuration document
//!
//! Single source of truth, loaded from a JSON file and validated
//! before any component starts.

use crate::error::{SentraError, SentraResult};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub network: NetworkConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// System interface name to capture on (required)
    pub interface: String,
}

/// Detection mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMode {
    /// Full suppression cascade
    Threshold,
    /// Layer 1 only, every non-benign prediction emits
    PureMl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub mode: DetectionMode,
    /// Layer 2 minimum confidence to emit
    pub confidence_threshold: f64,
    /// Layer 3 minimum packets per flow to emit
    pub min_packet_threshold: u64,
    pub filter_localhost: bool,
    pub filter_private_networks: bool,
    /// Layer 6 service ports
    pub whitelist_ports: Vec<u16>,
    /// Layer 4.5 CIDR allow-list
    pub whitelist_ips: Vec<String>,
    /// Layer 4 dotted-decimal prefix strings
    pub cloud_prefixes: Vec<String>,
    /// Layer 1 labels never alerted on
    pub ignored_attack_types: Vec<String>,
    pub legitimate_port_packet_threshold: u64,
    pub adaptive_baseline: AdaptiveBaselineConfig,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            mode: DetectionMode::Threshold,
            confidence_threshold: 0.95,
            min_packet_threshold: 200,
            filter_localhost: true,
            filter_private_networks: true,
            whitelist_ports: vec![80, 443, 53, 22, 3389],
            whitelist_ips: Vec::new(),
            cloud_prefixes: Vec::new(),
            ignored_attack_types: Vec::new(),
            legitimate_port_packet_threshold: 500,
            adaptive_baseline: AdaptiveBaselineConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveBaselineConfig {
    pub enabled: bool,
    /// Learning window in seconds of uptime
    pub learning_period: u64,
    /// Occurrences during learning before a fingerprint suppresses
    pub baseline_min_occurrences: u32,
    /// Snapshot file for restart resume
    pub state_path: PathBuf,
}

impl Default for AdaptiveBaselineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            learning_period: 3600,
            baseline_min_occurrences: 3,
            state_path: PathBuf::from("baseline.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub ml_path: PathBuf,
    pub dl_path: PathBuf,
    pub scaler_path: PathBuf,
    pub class_mapping_path: PathBuf,
    /// Ensemble-internal benign fallback threshold
    pub optimal_threshold: f64,
    pub ml_weight: f64,
    pub dl_weight: f64,
    /// Seconds before an inference call is abandoned
    pub inference_timeout: f64,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            ml_path: PathBuf::from("models/tree_model.json"),
            dl_path: PathBuf::from("models/nn_model.json"),
            scaler_path: PathBuf::from("models/scaler.json"),
            class_mapping_path: PathBuf::from("models/class_mapping.json"),
            optimal_threshold: 0.55,
            ml_weight: 0.6,
            dl_weight: 0.4,
            inference_timeout: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseType {
    Sqlite,
    Postgresql,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub enabled: bool,
    #[serde(rename = "type")]
    pub db_type: DatabaseType,
    /// SQLite database directory
    pub directory: PathBuf,
    /// PostgreSQL connection URL
    pub url: Option<String>,
    /// Rows older than this are swept hourly; 0 keeps everything
    pub retention_days: u32,
    pub save_benign_flows: bool,
    pub save_attack_flows: bool,
    pub min_confidence_to_save: f64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            db_type: DatabaseType::Sqlite,
            directory: PathBuf::from("data"),
            url: None,
            retention_days: 30,
            save_benign_flows: true,
            save_attack_flows: true,
            min_confidence_to_save: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// JSON-per-line append log
    pub log_path: PathBuf,
    pub dedupe_window_seconds: u64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("alerts.log"),
            dedupe_window_seconds: 10,
        }
    }
}

impl Config {
    /// Load from file
    pub fn load(path: &Path) -> SentraResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SentraError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|e| SentraError::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field ranges and cross-field constraints.
    pub fn validate(&self) -> SentraResult<()> {
        if self.network.interface.is_empty() {
            return Err(SentraError::Config("network.interface is required".into()));
        }
        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return Err(SentraError::Config(
                "detection.confidence_threshold must be in 0..1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.models.optimal_threshold) {
            return Err(SentraError::Config(
                "models.optimal_threshold must be in 0..1".into(),
            ));
        }
        if self.models.ml_weight < 0.0 || self.models.dl_weight < 0.0 {
            return Err(SentraError::Config("model weights must be non-negative".into()));
        }
        if self.models.inference_timeout <= 0.0 {
            return Err(SentraError::Config(
                "models.inference_timeout must be positive".into(),
            ));
        }
        for cidr in &self.detection.whitelist_ips {
            cidr.parse::<IpNetwork>().map_err(|e| {
                SentraError::Config(format!("invalid CIDR in detection.whitelist_ips {cidr:?}: {e}"))
            })?;
        }
        if !(0.0..=1.0).contains(&self.database.min_confidence_to_save) {
            return Err(SentraError::Config(
                "database.min_confidence_to_save must be in 0..1".into(),
            ));
        }
        if self.database.db_type == DatabaseType::Postgresql && self.database.url.is_none() {
            return Err(SentraError::Config(
                "database.url is required when database.type is postgresql".into(),
            ));
        }
        Ok(())
    }

    /// Parsed whitelist CIDRs. `validate` has already checked them.
    pub fn whitelist_networks(&self) -> Vec<IpNetwork> {
        self.detection
            .whitelist_ips
            .iter()
            .filter_map(|c| c.parse().ok())
            .collect()
    }
}
