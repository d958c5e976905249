//! Per-account feature extraction.
//!
//! Folds an account's transfer activity into the fixed-width numeric vector
//! consumed by the graph model. The order of the features is part of the
//! trained architecture and must not change between training and inference.

use std::collections::HashSet;

/// Width of the node feature vector.
pub const FEATURE_COUNT: usize = 7;

/// Divisor for the balance feature
pub const BALANCE_SCALE: f64 = 100_000.0;
/// Divisor for the average transfer amount feature
pub const AMOUNT_SCALE: f64 = 10_000.0;
/// Divisor turning account age in days into years
pub const AGE_SCALE: f64 = 365.0;

/// Static account attributes that do not come from the transfer list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccountProfile {
    pub balance: f64,
    pub age_days: u32,
}

/// Running transfer statistics for a single account.
#[derive(Debug, Clone, Default)]
pub struct AccountStats {
    pub in_amount: f64,
    pub out_amount: f64,
    pub in_count: usize,
    pub out_count: usize,
    /// Node indices of distinct counterparties
    pub counterparties: HashSet<usize>,
}

impl AccountStats {
    /// Record an outgoing transfer to `counterparty`
    pub fn record_outgoing(&mut self, counterparty: usize, amount: f64) {
        self.out_amount += amount;
        self.out_count += 1;
        self.counterparties.insert(counterparty);
    }

    /// Record an incoming transfer from `counterparty`
    pub fn record_incoming(&mut self, counterparty: usize, amount: f64) {
        self.in_amount += amount;
        self.in_count += 1;
        self.counterparties.insert(counterparty);
    }

    pub fn transaction_count(&self) -> usize {
        self.in_count + self.out_count
    }

    pub fn total_amount(&self) -> f64 {
        self.in_amount + self.out_amount
    }
}

/// Turns account statistics into model input features.
pub struct FeatureExtractor;

impl FeatureExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Feature vector in the order given by [`FeatureExtractor::feature_names`].
    pub fn extract(&self, stats: &AccountStats, profile: &AccountProfile) -> [f64; FEATURE_COUNT] {
        let total_tx = stats.transaction_count();
        let avg_amount = stats.total_amount() / total_tx.max(1) as f64;

        [
            profile.balance / BALANCE_SCALE,
            total_tx as f64,
            avg_amount / AMOUNT_SCALE,
            profile.age_days as f64 / AGE_SCALE,
            stats.counterparties.len() as f64,
            stats.in_count as f64,
            stats.out_count as f64,
        ]
    }

    pub fn feature_count(&self) -> usize {
        FEATURE_COUNT
    }

    pub fn feature_names(&self) -> [&'static str; FEATURE_COUNT] {
        [
            "normalized_balance",
            "transaction_count",
            "normalized_avg_amount",
            "normalized_age",
            "unique_counterparties",
            "in_degree",
            "out_degree",
        ]
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}
