//! Transfer graph construction.
//!
//! Accounts become nodes, transfers become directed edges, and every node
//! carries the engineered feature vector from [`crate::feature_extractor`].

mod builder;
mod split;
mod transaction_graph;

pub use builder::GraphBuilder;
pub use split::NodeSplit;
pub use transaction_graph::{GraphInfo, TransactionGraph};
