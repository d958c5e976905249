//! Mule Detection Engine Library
//!
//! Builds account/transfer graphs, trains a mean-aggregation graph neural
//! network to flag money-mule chains, and scores accounts from the best
//! checkpoint.

pub mod config;
pub mod error;
pub mod feature_extractor;
pub mod graph;
pub mod metrics;
pub mod models;
pub mod synthetic;
pub mod trainer;
pub mod types;

pub use config::{AppConfig, ModelConfig};
pub use error::{DetectionError, Result};
pub use feature_extractor::FeatureExtractor;
pub use graph::{GraphBuilder, GraphInfo, NodeSplit, TransactionGraph};
pub use models::{GraphModel, Predictor};
pub use trainer::{Trainer, TrainingReport};
pub use types::{AccountPrediction, Dataset, RiskLabel, Transfer};
