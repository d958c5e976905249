//! Checkpoint-backed risk predictor

use super::aggregation::AggregationStrategy;
use super::checkpoint::{Checkpoint, CheckpointStore};
use super::gnn::GraphModel;
use crate::config::AppConfig;
use crate::error::{DetectionError, Result};
use crate::feature_extractor::FEATURE_COUNT;
use crate::graph::GraphBuilder;
use crate::types::dataset::parse_transfers;
use crate::types::{AccountPrediction, Transfer};
use std::path::Path;
use tracing::{debug, info, warn};

/// Scores accounts with the model stored in the best-checkpoint slot.
///
/// Construct once and pass by reference; call [`Predictor::reload`] after a
/// training run replaces the checkpoint.
pub struct Predictor {
    store: CheckpointStore,
    strategy: AggregationStrategy,
    model: Option<GraphModel>,
    builder: GraphBuilder,
}

impl Predictor {
    /// Load the checkpoint at `store` if there is one.
    ///
    /// A missing checkpoint leaves the predictor unready; an unreadable or
    /// incompatible one is an error.
    pub fn new(store: CheckpointStore, strategy: AggregationStrategy, builder: GraphBuilder) -> Result<Self> {
        let mut predictor = Self {
            store,
            strategy,
            model: None,
            builder,
        };
        predictor.reload()?;
        Ok(predictor)
    }

    /// Predictor wired from application configuration
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let builder = match config.training.seed {
            Some(seed) => GraphBuilder::seeded(seed),
            None => GraphBuilder::from_entropy(),
        };
        Self::new(
            CheckpointStore::new(&config.paths.checkpoint_path),
            config.model.aggregation.resolve(),
            builder,
        )
    }

    /// Serve an in-memory model without touching the checkpoint slot
    pub fn from_model(model: GraphModel, store: CheckpointStore, builder: GraphBuilder) -> Self {
        Self {
            store,
            strategy: model.strategy(),
            model: Some(model),
            builder,
        }
    }

    /// Re-read the checkpoint slot. Returns whether a model is now loaded.
    pub fn reload(&mut self) -> Result<bool> {
        match self.store.load()? {
            Some(checkpoint) => {
                self.model = Some(self.rebuild(checkpoint)?);
                info!(path = %self.store.path().display(), "Predictor ready");
                Ok(true)
            }
            None => {
                warn!(
                    path = %self.store.path().display(),
                    "No checkpoint found; predictor is not trained"
                );
                self.model = None;
                Ok(false)
            }
        }
    }

    fn rebuild(&self, checkpoint: Checkpoint) -> Result<GraphModel> {
        if checkpoint.in_channels != FEATURE_COUNT {
            return Err(DetectionError::DimensionMismatch {
                expected: FEATURE_COUNT,
                actual: checkpoint.in_channels,
            });
        }
        GraphModel::from_parts(
            checkpoint.in_channels,
            &checkpoint.config,
            self.strategy,
            checkpoint.model_state,
        )
    }

    pub fn is_ready(&self) -> bool {
        self.model.is_some()
    }

    pub fn checkpoint_path(&self) -> &Path {
        self.store.path()
    }

    pub fn model(&self) -> Option<&GraphModel> {
        self.model.as_ref()
    }

    /// Score every account touched by `transfers`, highest probability first
    pub fn predict(&mut self, transfers: &[Transfer], threshold: f64) -> Result<Vec<AccountPrediction>> {
        let model = self.model.as_ref().ok_or_else(|| DetectionError::ModelNotTrained {
            path: self.store.path().to_path_buf(),
        })?;

        let (graph, info) = self.builder.build_graph(transfers, None)?;
        if graph.is_empty() {
            return Ok(Vec::new());
        }

        let mut predictions = Vec::with_capacity(info.num_nodes);
        for node in model.predict(&graph, threshold)? {
            let account = info.account_id(node.node_idx).ok_or_else(|| {
                DetectionError::DimensionMismatch {
                    expected: info.num_nodes,
                    actual: node.node_idx + 1,
                }
            })?;
            predictions.push(node.into_account(account.to_string()));
        }
        predictions.sort_by(|a, b| b.fraud_probability.total_cmp(&a.fraud_probability));

        debug!(
            accounts = predictions.len(),
            threshold = threshold,
            "Prediction batch scored"
        );
        Ok(predictions)
    }

    /// Parse a JSON transfer batch (bare array or `{"transactions": [...]}`) and score it
    pub fn predict_from_json(&mut self, raw: &str, threshold: f64) -> Result<Vec<AccountPrediction>> {
        let transfers = parse_transfers(raw)?;
        self.predict(&transfers, threshold)
    }
}

/// Predictions with `risk_score >= min_score`, order preserved
pub fn get_high_risk_accounts(predictions: &[AccountPrediction], min_score: u8) -> Vec<AccountPrediction> {
    predictions
        .iter()
        .filter(|p| p.risk_score >= min_score)
        .cloned()
        .collect()
}
