//! Graph neural network components

pub mod aggregation;
pub mod checkpoint;
pub mod gnn;
pub mod inference;
pub mod layers;
pub mod optimizer;

pub use aggregation::{AggregationPreference, AggregationStrategy, NeighborAggregator};
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use gnn::GraphModel;
pub use inference::{get_high_risk_accounts, Predictor};
pub use optimizer::Adam;
