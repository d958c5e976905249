//! Type definitions for the mule detection engine

pub mod dataset;
pub mod prediction;
pub mod transfer;

pub use dataset::{AccountRecord, Dataset, DatasetMetadata};
pub use prediction::{AccountPrediction, NodePrediction, PredictionSummary, RiskLabel};
pub use transfer::Transfer;
