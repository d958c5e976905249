//! Best-model checkpoint slot

use super::gnn::{GraphModel, ModelWeights};
use super::optimizer::Adam;
use crate::config::ModelConfig;
use crate::error::{DetectionError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Everything needed to rebuild and serve the best model of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// 1-based epoch the snapshot was taken after
    pub epoch: usize,
    pub model_state: ModelWeights,
    pub optimizer_state: Adam,
    pub best_val_f1: f64,
    /// Architecture hyperparameters
    pub config: ModelConfig,
    /// Input feature width the weights expect
    pub in_channels: usize,
    pub run_id: Uuid,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(
        epoch: usize,
        model: &GraphModel,
        optimizer: &Adam,
        best_val_f1: f64,
        run_id: Uuid,
    ) -> Self {
        Self {
            epoch,
            model_state: model.weights().clone(),
            optimizer_state: optimizer.clone(),
            best_val_f1,
            config: model.config().clone(),
            in_channels: model.in_channels(),
            run_id,
            saved_at: Utc::now(),
        }
    }
}

/// A single file holding the latest best checkpoint; each save replaces it whole
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Write to a sibling temp file, then rename over the slot
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| DetectionError::io(parent, e))?;
        }

        let json = serde_json::to_vec(checkpoint)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| DetectionError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| DetectionError::io(&self.path, e))?;

        debug!(
            path = %self.path.display(),
            epoch = checkpoint.epoch,
            best_val_f1 = checkpoint.best_val_f1,
            "Checkpoint saved"
        );
        Ok(())
    }

    /// `Ok(None)` when the slot is empty
    pub fn load(&self) -> Result<Option<Checkpoint>> {
        if !self.exists() {
            return Ok(None);
        }
        let raw = fs::read(&self.path).map_err(|e| DetectionError::io(&self.path, e))?;
        let checkpoint: Checkpoint = serde_json::from_slice(&raw)?;

        info!(
            path = %self.path.display(),
            epoch = checkpoint.epoch,
            best_val_f1 = checkpoint.best_val_f1,
            run_id = %checkpoint.run_id,
            "Checkpoint loaded"
        );
        Ok(Some(checkpoint))
    }
}
