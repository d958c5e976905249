use super::transaction_graph::{GraphInfo, TransactionGraph};
use crate::error::{DetectionError, Result};
use crate::feature_extractor::{AccountProfile, AccountStats, FeatureExtractor, FEATURE_COUNT};
use crate::types::transfer::Transfer;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

/// Range for simulated balances when no account profile is supplied
const SIMULATED_BALANCE: std::ops::Range<f64> = 1_000.0..100_000.0;
/// Range for simulated account age in days
const SIMULATED_AGE_DAYS: std::ops::Range<u32> = 30..3_650;

/// Builds [`TransactionGraph`]s from transfer batches.
///
/// Balance and account age are not part of a transfer record. When no
/// profile is supplied for an account they are drawn from the builder's
/// random generator, so two builds agree on those two feature columns only
/// when the generator is seeded identically.
pub struct GraphBuilder<R: Rng = StdRng> {
    rng: R,
    extractor: FeatureExtractor,
}

impl GraphBuilder<StdRng> {
    /// Builder with a reproducible generator
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    /// Builder seeded from OS entropy
    pub fn from_entropy() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }
}

impl<R: Rng> GraphBuilder<R> {
    pub fn with_rng(rng: R) -> Self {
        Self {
            rng,
            extractor: FeatureExtractor::new(),
        }
    }

    /// Build a graph, simulating balance and age for every account.
    pub fn build_graph(
        &mut self,
        transfers: &[Transfer],
        labels: Option<&BTreeMap<String, u8>>,
    ) -> Result<(TransactionGraph, GraphInfo)> {
        self.build_graph_with_profiles(transfers, labels, &HashMap::new())
    }

    /// Build a graph, taking balance and age from `profiles` where present.
    pub fn build_graph_with_profiles(
        &mut self,
        transfers: &[Transfer],
        labels: Option<&BTreeMap<String, u8>>,
        profiles: &HashMap<String, AccountProfile>,
    ) -> Result<(TransactionGraph, GraphInfo)> {
        // Validate every record before touching any state
        let mut endpoints = Vec::with_capacity(transfers.len());
        let mut amounts = Vec::with_capacity(transfers.len());
        for (index, tx) in transfers.iter().enumerate() {
            endpoints.push(tx.endpoints(index)?);
            amounts.push(tx.checked_amount(index)?);
        }

        let accounts: BTreeSet<&str> = endpoints
            .iter()
            .flat_map(|&(from, to)| [from, to])
            .collect();
        let idx_to_account: Vec<String> = accounts.iter().map(|a| a.to_string()).collect();
        let account_to_idx: BTreeMap<String, usize> = idx_to_account
            .iter()
            .enumerate()
            .map(|(idx, acc)| (acc.clone(), idx))
            .collect();
        let num_nodes = idx_to_account.len();

        if num_nodes == 0 {
            warn!("Building graph from an empty transfer list");
        }

        let mut edges = Vec::with_capacity(endpoints.len());
        let mut stats = vec![AccountStats::default(); num_nodes];
        for (&(from, to), &amount) in endpoints.iter().zip(&amounts) {
            let src = account_to_idx[from];
            let dst = account_to_idx[to];
            edges.push((src, dst));
            stats[src].record_outgoing(dst, amount);
            stats[dst].record_incoming(src, amount);
        }
        let edge_amounts = Array2::from_shape_vec((amounts.len(), 1), amounts)
            .map_err(|e| DetectionError::InvalidConfig(e.to_string()))?;

        let mut features = Array2::<f64>::zeros((num_nodes, FEATURE_COUNT));
        for (idx, account) in idx_to_account.iter().enumerate() {
            let profile = match profiles.get(account) {
                Some(profile) => *profile,
                None => self.simulated_profile(),
            };
            let row = self.extractor.extract(&stats[idx], &profile);
            for (col, value) in row.into_iter().enumerate() {
                features[[idx, col]] = value;
            }
        }

        let labels = match labels {
            Some(labels) => resolve_labels(&idx_to_account, labels)?,
            None => vec![0; num_nodes],
        };

        debug!(
            num_nodes = num_nodes,
            num_edges = edges.len(),
            "Transfer graph built"
        );

        let info = GraphInfo {
            num_nodes,
            num_edges: edges.len(),
            account_to_idx,
            idx_to_account,
        };
        let graph = TransactionGraph {
            features,
            edges,
            edge_amounts,
            labels,
        };

        Ok((graph, info))
    }

    fn simulated_profile(&mut self) -> AccountProfile {
        AccountProfile {
            balance: self.rng.gen_range(SIMULATED_BALANCE),
            age_days: self.rng.gen_range(SIMULATED_AGE_DAYS),
        }
    }
}

fn resolve_labels(accounts: &[String], labels: &BTreeMap<String, u8>) -> Result<Vec<usize>> {
    accounts
        .iter()
        .map(|account| match labels.get(account).copied().unwrap_or(0) {
            value @ (0 | 1) => Ok(value as usize),
            value => Err(DetectionError::InvalidLabel {
                account: account.clone(),
                value,
            }),
        })
        .collect()
}
