//! Supervised training loop with checkpoint-on-improve and early stopping

use crate::config::{AppConfig, ModelConfig};
use crate::error::{DetectionError, Result};
use crate::graph::{NodeSplit, TransactionGraph};
use crate::metrics::{ClassificationMetrics, ConfusionCounts, EpochStats};
use crate::models::aggregation::{AggregationStrategy, NeighborAggregator};
use crate::models::checkpoint::{Checkpoint, CheckpointStore};
use crate::models::gnn::{masked_cross_entropy, GraphModel};
use crate::models::optimizer::Adam;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

/// Log a progress line every this many epochs
const LOG_EVERY: usize = 10;

/// Lifecycle of a [`Trainer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TrainerState {
    NotTrained,
    Training { epoch: usize },
    EarlyStopped { epoch: usize },
    EpochsExhausted,
    /// Ended early through a [`StopHandle`]
    Stopped { epoch: usize },
    /// Final test metrics computed on the best weights
    Evaluated,
}

/// Why the epoch loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EarlyStopped,
    EpochsExhausted,
    /// A [`StopHandle`] asked the run to end after the current epoch
    Requested,
    /// The graph had no nodes, so no epoch ran
    EmptyGraph,
}

/// Result of [`EarlyStopping::observe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Strictly better than every earlier score; checkpoint now
    Improved,
    Stalled,
    /// Patience exhausted; stop after this epoch
    Exhausted,
}

/// Patience counter over validation F1.
///
/// The best score starts at 0.0, so an epoch must reach a strictly positive
/// F1 to count as an improvement.
#[derive(Debug, Clone, PartialEq)]
pub struct EarlyStopping {
    patience: usize,
    best: f64,
    counter: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: 0.0,
            counter: 0,
        }
    }

    pub fn observe(&mut self, score: f64) -> Observation {
        if score > self.best {
            self.best = score;
            self.counter = 0;
            return Observation::Improved;
        }
        self.counter += 1;
        if self.counter >= self.patience {
            Observation::Exhausted
        } else {
            Observation::Stalled
        }
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn counter(&self) -> usize {
        self.counter
    }
}

/// Cooperative stop flag, checked once per epoch
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of a full training run
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub run_id: Uuid,
    pub stop_reason: StopReason,
    pub epochs_run: usize,
    /// Epoch of the checkpoint the final metrics were computed from
    pub best_epoch: Option<usize>,
    pub best_val_f1: f64,
    /// Metrics of the reloaded best model on the test partition
    pub test: ClassificationMetrics,
    pub history: Vec<EpochStats>,
}

/// Trains a [`GraphModel`] on one graph and persists the best version
pub struct Trainer {
    config: ModelConfig,
    store: CheckpointStore,
    strategy: AggregationStrategy,
    stop: StopHandle,
    state: TrainerState,
    rng: StdRng,
    run_id: Uuid,
}

impl Trainer {
    /// `seed` drives weight initialisation and dropout
    pub fn new(config: ModelConfig, store: CheckpointStore, seed: Option<u64>) -> Result<Self> {
        config.validate()?;
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            strategy: config.aggregation.resolve(),
            config,
            store,
            stop: StopHandle::default(),
            state: TrainerState::NotTrained,
            rng,
            run_id: Uuid::new_v4(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(
            config.model.clone(),
            CheckpointStore::new(&config.paths.checkpoint_path),
            config.training.seed,
        )
    }

    pub fn state(&self) -> TrainerState {
        self.state
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Handle that ends the run after the epoch in progress
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Train, checkpoint on every strict validation-F1 improvement, then
    /// reload the best checkpoint and score it on the test partition.
    pub fn train(
        &mut self,
        graph: &TransactionGraph,
        split: &NodeSplit,
    ) -> Result<(GraphModel, TrainingReport)> {
        if split.num_nodes() != graph.num_nodes() {
            return Err(DetectionError::DimensionMismatch {
                expected: graph.num_nodes(),
                actual: split.num_nodes(),
            });
        }
        let span = info_span!("train", run_id = %self.run_id);
        let _guard = span.enter();

        if graph.is_empty() {
            warn!("Graph has no nodes; nothing to train, no checkpoint written");
            let model = GraphModel::new(
                graph.features.ncols(),
                &self.config,
                self.strategy,
                &mut self.rng,
            )?;
            self.state = TrainerState::Evaluated;
            let report = TrainingReport {
                run_id: self.run_id,
                stop_reason: StopReason::EmptyGraph,
                epochs_run: 0,
                best_epoch: None,
                best_val_f1: 0.0,
                test: ClassificationMetrics::default(),
                history: Vec::new(),
            };
            return Ok((model, report));
        }

        let train_idx = split.train_indices();
        let val_idx = split.val_indices();
        let test_idx = split.test_indices();
        if train_idx.is_empty() {
            return Err(DetectionError::EmptyPartition("train"));
        }
        if val_idx.is_empty() {
            warn!("Validation partition is empty; no epoch can improve");
        }

        let mut model = GraphModel::new(
            graph.features.ncols(),
            &self.config,
            self.strategy,
            &mut self.rng,
        )?;
        let agg = model.aggregator(graph);
        let mut optimizer = Adam::new(self.config.learning_rate);
        let mut early_stopping = EarlyStopping::new(self.config.patience);

        info!(
            nodes = graph.num_nodes(),
            edges = graph.num_edges(),
            train = train_idx.len(),
            val = val_idx.len(),
            test = test_idx.len(),
            parameters = model.num_parameters(),
            strategy = ?self.strategy,
            "Starting training"
        );

        let total_epochs = self.config.epochs;
        let mut history = Vec::new();
        let mut best_epoch = None;
        let mut stop_reason = StopReason::EpochsExhausted;

        for epoch in 1..=total_epochs {
            self.state = TrainerState::Training { epoch };
            let started = Instant::now();

            let (logits, cache) = model.forward_train(&graph.features, &agg, &mut self.rng)?;
            let (train_loss, grad_logits) = masked_cross_entropy(&logits, &graph.labels, &train_idx);
            if !train_loss.is_finite() {
                self.state = TrainerState::NotTrained;
                return Err(DetectionError::TrainingDivergence {
                    epoch,
                    loss: train_loss,
                });
            }
            let train_accuracy = accuracy(&logits, &graph.labels, &train_idx);

            let grads = model.backward(&cache, &grad_logits, &agg);
            optimizer.step(model.weights_mut().parameters_mut(), grads.tensors())?;

            let val = evaluate(&model, graph, &agg, &val_idx)?;
            if !val.loss.is_finite() {
                self.state = TrainerState::NotTrained;
                return Err(DetectionError::TrainingDivergence {
                    epoch,
                    loss: val.loss,
                });
            }

            let observation = early_stopping.observe(val.f1);
            let improved = observation == Observation::Improved;
            if improved {
                let checkpoint =
                    Checkpoint::new(epoch, &model, &optimizer, val.f1, self.run_id);
                self.store.save(&checkpoint)?;
                best_epoch = Some(epoch);
                debug!(epoch = epoch, val_f1 = val.f1, "Validation F1 improved");
            }

            history.push(EpochStats {
                epoch,
                total_epochs,
                train_loss,
                train_accuracy,
                val,
                improved,
                elapsed_ms: started.elapsed().as_millis() as u64,
            });

            if epoch % LOG_EVERY == 0 || epoch == 1 {
                info!(
                    epoch = epoch,
                    train_loss = %format!("{:.4}", train_loss),
                    train_acc = %format!("{:.4}", train_accuracy),
                    val_loss = %format!("{:.4}", val.loss),
                    val_f1 = %format!("{:.4}", val.f1),
                    "Epoch complete"
                );
            }

            if observation == Observation::Exhausted {
                info!(
                    epoch = epoch,
                    patience = self.config.patience,
                    "Early stopping"
                );
                self.state = TrainerState::EarlyStopped { epoch };
                stop_reason = StopReason::EarlyStopped;
                break;
            }
            if self.stop.is_requested() {
                info!(epoch = epoch, "Stop requested");
                self.state = TrainerState::Stopped { epoch };
                stop_reason = StopReason::Requested;
                break;
            }
        }
        if stop_reason == StopReason::EpochsExhausted {
            self.state = TrainerState::EpochsExhausted;
        }

        match best_epoch {
            Some(_) => {
                let checkpoint = self.store.load()?.ok_or_else(|| DetectionError::ModelNotTrained {
                    path: self.store.path().to_path_buf(),
                })?;
                model = GraphModel::from_parts(
                    checkpoint.in_channels,
                    &checkpoint.config,
                    self.strategy,
                    checkpoint.model_state,
                )?;
                info!(epoch = checkpoint.epoch, "Reloaded best checkpoint");
            }
            None => warn!(
                "Validation F1 never improved; no checkpoint written, evaluating final weights"
            ),
        }

        let test = evaluate(&model, graph, &agg, &test_idx)?;
        self.state = TrainerState::Evaluated;

        info!(
            test_loss = %format!("{:.4}", test.loss),
            test_acc = %format!("{:.4}", test.accuracy),
            test_precision = %format!("{:.4}", test.precision),
            test_recall = %format!("{:.4}", test.recall),
            test_f1 = %format!("{:.4}", test.f1),
            "Training finished"
        );

        let report = TrainingReport {
            run_id: self.run_id,
            stop_reason,
            epochs_run: history.len(),
            best_epoch,
            best_val_f1: early_stopping.best(),
            test,
            history,
        };
        Ok((model, report))
    }
}

/// Class-1-vs-class-0 argmax per node
fn predicted_classes(logits: &Array2<f64>) -> Vec<usize> {
    logits
        .rows()
        .into_iter()
        .map(|row| usize::from(row[1] > row[0]))
        .collect()
}

fn accuracy(logits: &Array2<f64>, labels: &[usize], nodes: &[usize]) -> f64 {
    if nodes.is_empty() {
        return 0.0;
    }
    let predicted = predicted_classes(logits);
    let correct = nodes.iter().filter(|&&n| predicted[n] == labels[n]).count();
    correct as f64 / nodes.len() as f64
}

/// Evaluation-mode metrics of `model` on `nodes`
pub fn evaluate(
    model: &GraphModel,
    graph: &TransactionGraph,
    agg: &NeighborAggregator,
    nodes: &[usize],
) -> Result<ClassificationMetrics> {
    let logits = model.forward(&graph.features, agg)?;
    let (loss, _) = masked_cross_entropy(&logits, &graph.labels, nodes);
    let counts = ConfusionCounts::from_predictions(&predicted_classes(&logits), &graph.labels, nodes);
    Ok(ClassificationMetrics::from_counts(loss, &counts))
}
