//! Configuration management for the mule detection engine

use crate::error::DetectionError;
use crate::models::aggregation::AggregationPreference;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default location of the optional configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Architecture and optimisation hyperparameters.
///
/// Stored in every checkpoint so inference can rebuild the same architecture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Width of the aggregation layers
    pub hidden_channels: usize,
    /// Number of aggregation layers
    pub num_layers: usize,
    /// Dropout probability applied after every activation
    pub dropout: f64,
    pub learning_rate: f64,
    /// Epoch budget
    pub epochs: usize,
    /// Consecutive epochs without validation F1 improvement before stopping
    pub patience: usize,
    /// Aggregation implementation: "auto", "sparse" or "dense"
    pub aggregation: AggregationPreference,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            hidden_channels: 64,
            num_layers: 2,
            dropout: 0.3,
            learning_rate: 0.01,
            epochs: 100,
            patience: 10,
            aggregation: AggregationPreference::Auto,
        }
    }
}

impl ModelConfig {
    /// Reject hyperparameters that cannot build or train an architecture
    pub fn validate(&self) -> std::result::Result<(), DetectionError> {
        let invalid = |msg: String| Err(DetectionError::InvalidConfig(msg));

        if self.num_layers == 0 {
            return invalid("num_layers must be at least 1".to_string());
        }
        if self.hidden_channels < 2 {
            return invalid(format!(
                "hidden_channels must be at least 2, got {}",
                self.hidden_channels
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return invalid(format!("dropout must lie in [0, 1), got {}", self.dropout));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return invalid(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            ));
        }
        if self.epochs == 0 {
            return invalid("epochs must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Node split and reproducibility settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub train_ratio: f64,
    pub val_ratio: f64,
    /// Seed for weight init, dropout, node split and simulated features
    pub seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            train_ratio: 0.6,
            val_ratio: 0.2,
            seed: None,
        }
    }
}

/// File-system locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding `sample_transactions.json`
    pub data_dir: PathBuf,
    /// The single best-model checkpoint slot
    pub checkpoint_path: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            checkpoint_path: PathBuf::from("checkpoints/best_model.json"),
        }
    }
}

impl PathsConfig {
    pub fn dataset_path(&self) -> PathBuf {
        self.data_dir.join("sample_transactions.json")
    }
}

/// Inference thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Fraud probability at or above which an account is labelled "fraud"
    pub threshold: f64,
    /// Minimum risk score (0-100) for the high-risk report
    pub high_risk_min_score: u8,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            high_risk_min_score: 70,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// Load defaults, then `config/config.toml` if present, then `MULE__*` env vars
    pub fn load() -> Result<Self> {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Same layering with an explicit (optional) file
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let defaults = Config::try_from(&AppConfig::default())
            .context("Failed to serialize default configuration")?;

        let config = Config::builder()
            .add_source(defaults)
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(
                Environment::with_prefix("MULE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let app: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        app.model.validate().context("Invalid model configuration")?;
        Ok(app)
    }
}
