use crate::error::{DetectionError, Result};
use rand::seq::SliceRandom;
use rand::Rng;

/// Disjoint train/val/test node masks covering every node exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSplit {
    pub train: Vec<bool>,
    pub val: Vec<bool>,
    pub test: Vec<bool>,
}

impl NodeSplit {
    /// Random permutation split: the first `floor(train_ratio * n)` nodes go to
    /// train, the next `floor(val_ratio * n)` to val, the rest to test.
    pub fn random<R: Rng + ?Sized>(
        num_nodes: usize,
        train_ratio: f64,
        val_ratio: f64,
        rng: &mut R,
    ) -> Result<Self> {
        let valid = |r: f64| r.is_finite() && (0.0..=1.0).contains(&r);
        if !valid(train_ratio) || !valid(val_ratio) || train_ratio + val_ratio > 1.0 {
            return Err(DetectionError::InvalidConfig(format!(
                "split ratios must lie in [0, 1] and sum to at most 1 (train={train_ratio}, val={val_ratio})"
            )));
        }

        let mut order: Vec<usize> = (0..num_nodes).collect();
        order.shuffle(rng);

        let train_size = (train_ratio * num_nodes as f64) as usize;
        let val_size = (val_ratio * num_nodes as f64) as usize;

        let mut split = Self {
            train: vec![false; num_nodes],
            val: vec![false; num_nodes],
            test: vec![false; num_nodes],
        };
        for (position, &node) in order.iter().enumerate() {
            if position < train_size {
                split.train[node] = true;
            } else if position < train_size + val_size {
                split.val[node] = true;
            } else {
                split.test[node] = true;
            }
        }
        Ok(split)
    }

    /// Accept caller-supplied masks after checking they partition the node set
    pub fn from_masks(train: Vec<bool>, val: Vec<bool>, test: Vec<bool>) -> Result<Self> {
        let n = train.len();
        if val.len() != n || test.len() != n {
            return Err(DetectionError::InvalidConfig(
                "masks must have equal length".to_string(),
            ));
        }
        for node in 0..n {
            let hits = [train[node], val[node], test[node]]
                .iter()
                .filter(|&&m| m)
                .count();
            if hits != 1 {
                return Err(DetectionError::InvalidConfig(format!(
                    "node {node} is in {hits} masks; masks must partition the nodes"
                )));
            }
        }
        Ok(Self { train, val, test })
    }

    pub fn num_nodes(&self) -> usize {
        self.train.len()
    }

    pub fn train_indices(&self) -> Vec<usize> {
        indices(&self.train)
    }

    pub fn val_indices(&self) -> Vec<usize> {
        indices(&self.val)
    }

    pub fn test_indices(&self) -> Vec<usize> {
        indices(&self.test)
    }

    /// `(train, val, test)` sizes
    pub fn counts(&self) -> (usize, usize, usize) {
        (
            self.train.iter().filter(|&&m| m).count(),
            self.val.iter().filter(|&&m| m).count(),
            self.test.iter().filter(|&&m| m).count(),
        )
    }
}

fn indices(mask: &[bool]) -> Vec<usize> {
    mask.iter()
        .enumerate()
        .filter_map(|(idx, &m)| m.then_some(idx))
        .collect()
}
