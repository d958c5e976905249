//! Neighbour aggregation strategies.
//!
//! Both strategies compute the same operator: for every node `i`,
//! `m_i = (x_i + Σ_{j→i} x_j) / (1 + indeg(i))`, i.e. the mean over the node
//! itself and the multiset of its in-neighbours. The sparse form walks the
//! edge list; the dense form multiplies by the `N x N` matrix `D^-1 (A^T + I)`.

use crate::graph::TransactionGraph;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Aggregation implementation, fixed when a model is constructed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationStrategy {
    /// Scatter over the edge list
    Sparse,
    /// Normalised adjacency matrix product
    Dense,
}

/// Configured preference; `Auto` defers to what the build supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationPreference {
    #[default]
    Auto,
    Sparse,
    Dense,
}

impl AggregationStrategy {
    /// Sparse when built with `sparse-aggregation`, dense otherwise
    pub fn detect() -> Self {
        if cfg!(feature = "sparse-aggregation") {
            AggregationStrategy::Sparse
        } else {
            AggregationStrategy::Dense
        }
    }

    /// Precompute the aggregation operator for `graph`
    pub fn prepare(&self, graph: &TransactionGraph) -> NeighborAggregator {
        match self {
            AggregationStrategy::Sparse => NeighborAggregator::sparse(graph.num_nodes(), &graph.edges),
            AggregationStrategy::Dense => NeighborAggregator::Dense {
                matrix: graph.normalized_adjacency(),
            },
        }
    }
}

impl AggregationPreference {
    pub fn resolve(&self) -> AggregationStrategy {
        match self {
            AggregationPreference::Auto => AggregationStrategy::detect(),
            AggregationPreference::Sparse => AggregationStrategy::Sparse,
            AggregationPreference::Dense => AggregationStrategy::Dense,
        }
    }
}

/// Self-inclusive in-neighbour mean operator for one graph
#[derive(Debug, Clone)]
pub enum NeighborAggregator {
    Sparse {
        /// `sources[offsets[i]..offsets[i + 1]]` are the in-neighbours of node `i`
        offsets: Vec<usize>,
        sources: Vec<usize>,
        /// `1 / (1 + indeg(i))`
        scale: Vec<f64>,
    },
    Dense {
        matrix: Array2<f64>,
    },
}

impl NeighborAggregator {
    /// Group edges by destination (counting sort, input order kept within a node)
    pub fn sparse(num_nodes: usize, edges: &[(usize, usize)]) -> Self {
        let mut offsets = vec![0usize; num_nodes + 1];
        for &(_, dst) in edges {
            offsets[dst + 1] += 1;
        }
        for i in 0..num_nodes {
            offsets[i + 1] += offsets[i];
        }

        let mut cursor = offsets.clone();
        let mut sources = vec![0usize; edges.len()];
        for &(src, dst) in edges {
            sources[cursor[dst]] = src;
            cursor[dst] += 1;
        }

        let scale = (0..num_nodes)
            .map(|i| 1.0 / (1 + offsets[i + 1] - offsets[i]) as f64)
            .collect();

        NeighborAggregator::Sparse {
            offsets,
            sources,
            scale,
        }
    }

    pub fn strategy(&self) -> AggregationStrategy {
        match self {
            NeighborAggregator::Sparse { .. } => AggregationStrategy::Sparse,
            NeighborAggregator::Dense { .. } => AggregationStrategy::Dense,
        }
    }

    pub fn num_nodes(&self) -> usize {
        match self {
            NeighborAggregator::Sparse { scale, .. } => scale.len(),
            NeighborAggregator::Dense { matrix } => matrix.nrows(),
        }
    }

    /// Apply the operator to node representations `h` (`N x d`)
    pub fn aggregate(&self, h: &Array2<f64>) -> Array2<f64> {
        match self {
            NeighborAggregator::Sparse {
                offsets,
                sources,
                scale,
            } => {
                let mut out = h.clone();
                for (node, &s) in scale.iter().enumerate() {
                    let mut row = out.row_mut(node);
                    for &src in &sources[offsets[node]..offsets[node + 1]] {
                        row.scaled_add(1.0, &h.row(src));
                    }
                    row.mapv_inplace(|v| v * s);
                }
                out
            }
            NeighborAggregator::Dense { matrix } => matrix.dot(h),
        }
    }

    /// Apply the transposed operator to an upstream gradient
    pub fn aggregate_backward(&self, grad: &Array2<f64>) -> Array2<f64> {
        match self {
            NeighborAggregator::Sparse {
                offsets,
                sources,
                scale,
            } => {
                let mut out = Array2::<f64>::zeros(grad.raw_dim());
                for (node, &s) in scale.iter().enumerate() {
                    let g = grad.row(node);
                    out.row_mut(node).scaled_add(s, &g);
                    for &src in &sources[offsets[node]..offsets[node + 1]] {
                        out.row_mut(src).scaled_add(s, &g);
                    }
                }
                out
            }
            NeighborAggregator::Dense { matrix } => matrix.t().dot(grad),
        }
    }
}
