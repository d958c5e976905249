use ndarray::{Array2, Axis};
use serde::Serialize;
use std::collections::BTreeMap;

/// Typed account graph ready for the model.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionGraph {
    /// Node features, one row per account (`N x FEATURE_COUNT`)
    pub features: Array2<f64>,
    /// Directed edges `(source, destination)` in input order; parallel edges kept
    pub edges: Vec<(usize, usize)>,
    /// Transfer amount per edge (`E x 1`)
    pub edge_amounts: Array2<f64>,
    /// Ground-truth class per node, all zero when no labels were supplied
    pub labels: Vec<usize>,
}

impl TransactionGraph {
    pub fn num_nodes(&self) -> usize {
        self.features.nrows()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.num_nodes() == 0
    }

    /// Incoming edge count per node
    pub fn in_degrees(&self) -> Vec<usize> {
        let mut degrees = vec![0; self.num_nodes()];
        for &(_, dst) in &self.edges {
            degrees[dst] += 1;
        }
        degrees
    }

    /// Outgoing edge count per node
    pub fn out_degrees(&self) -> Vec<usize> {
        let mut degrees = vec![0; self.num_nodes()];
        for &(src, _) in &self.edges {
            degrees[src] += 1;
        }
        degrees
    }

    /// Row-normalised in-neighbour matrix with self-loops, `D^-1 (A^T + I)`.
    ///
    /// Row `i` averages node `i` with every source of an edge into `i`;
    /// parallel edges contribute once per edge.
    pub fn normalized_adjacency(&self) -> Array2<f64> {
        let n = self.num_nodes();
        let mut adj = Array2::<f64>::eye(n);
        for &(src, dst) in &self.edges {
            adj[[dst, src]] += 1.0;
        }

        let degree = adj.sum_axis(Axis(1));
        for (mut row, &d) in adj.rows_mut().into_iter().zip(degree.iter()) {
            row /= d.max(1.0);
        }
        adj
    }
}

/// Node count, edge count and the index <-> account mapping of a built graph
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphInfo {
    pub num_nodes: usize,
    pub num_edges: usize,
    pub account_to_idx: BTreeMap<String, usize>,
    pub idx_to_account: Vec<String>,
}

impl GraphInfo {
    pub fn account_id(&self, idx: usize) -> Option<&str> {
        self.idx_to_account.get(idx).map(String::as_str)
    }

    pub fn index_of(&self, account_id: &str) -> Option<usize> {
        self.account_to_idx.get(account_id).copied()
    }
}
