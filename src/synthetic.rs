//! Synthetic dataset generator
//!
//! Produces labelled fixtures for training and demos: normal accounts that
//! transfer small amounts to each other, and mule chains that relay a large
//! victim deposit hop by hop while skimming a share at every hop.

use crate::types::{AccountRecord, Dataset, DatasetMetadata, Transfer};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use tracing::info;

pub const DEFAULT_NUM_NORMAL: usize = 50;
pub const DEFAULT_NUM_CHAINS: usize = 8;
pub const DEFAULT_CHAIN_LENGTH: usize = 4;

const BANKS: [&str; 5] = ["SCB", "KBANK", "TTB", "BBL", "BAY"];
const FIRST_NAMES: [&str; 8] = [
    "Somchai", "Somying", "Wichai", "Wipa", "Prasert", "Suda", "Mana", "Nipa",
];
const LAST_NAMES: [&str; 6] = ["Raksa", "Meesuk", "Jaidee", "Somboon", "Thongkam", "Charoen"];

/// Seeded generator; the same seed and reference time give the same dataset
pub struct DatasetGenerator {
    rng: StdRng,
    /// Timestamps and account ages are measured back from here
    reference_time: DateTime<Utc>,
    transaction_counter: u64,
}

impl DatasetGenerator {
    pub fn new(seed: u64) -> Self {
        Self::with_reference_time(seed, Utc::now())
    }

    pub fn with_reference_time(seed: u64, reference_time: DateTime<Utc>) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            reference_time,
            transaction_counter: 0,
        }
    }

    /// Dataset with the default population
    pub fn generate_default(&mut self) -> Dataset {
        self.generate(DEFAULT_NUM_NORMAL, DEFAULT_NUM_CHAINS, DEFAULT_CHAIN_LENGTH)
    }

    pub fn generate(&mut self, num_normal: usize, num_chains: usize, chain_length: usize) -> Dataset {
        let mut accounts = Vec::new();
        let mut labels = BTreeMap::new();
        let mut transactions = Vec::new();

        let normal_ids: Vec<String> = (0..num_normal).map(|i| format!("NORM{:04}", i)).collect();
        for id in &normal_ids {
            let balance = self.rng.gen_range(1_000.0..100_000.0);
            accounts.push(self.account(id, "normal", balance));
            labels.insert(id.clone(), 0);
        }

        let mut chains = Vec::with_capacity(num_chains);
        for chain in 0..num_chains {
            let ids: Vec<String> = (0..chain_length)
                .map(|pos| format!("MULE{:02}{:02}", chain, pos))
                .collect();
            for id in &ids {
                let balance = self.rng.gen_range(0.0..5_000.0);
                accounts.push(self.account(id, "mule", balance));
                labels.insert(id.clone(), 1);
            }
            chains.push(ids);
        }

        // Normal traffic needs two distinct normal accounts
        if normal_ids.len() >= 2 {
            for _ in 0..num_normal * 2 {
                let from = self.rng.gen_range(0..normal_ids.len());
                let mut to = self.rng.gen_range(0..normal_ids.len() - 1);
                if to >= from {
                    to += 1;
                }
                let amount = self.rng.gen_range(100.0..10_000.0);
                transactions.push(self.transfer(&normal_ids[from], &normal_ids[to], amount, "normal"));
            }
        }

        for chain in &chains {
            let Some(first) = chain.first() else {
                continue;
            };
            let mut amount = self.rng.gen_range(200_000.0..500_000.0);
            if !normal_ids.is_empty() {
                let victim = normal_ids[self.rng.gen_range(0..normal_ids.len())].clone();
                amount *= self.hop_retention();
                transactions.push(self.transfer(&victim, first, amount, "suspicious"));
            }
            for hop in chain.windows(2) {
                amount *= self.hop_retention();
                transactions.push(self.transfer(&hop[0], &hop[1], amount, "suspicious"));
            }
        }

        let fraud = labels.values().filter(|&&v| v == 1).count();
        let metadata = DatasetMetadata {
            num_normal,
            num_mule_chains: num_chains,
            chain_length,
            total_accounts: accounts.len(),
            total_transactions: transactions.len(),
            fraud_ratio: if labels.is_empty() {
                0.0
            } else {
                fraud as f64 / labels.len() as f64
            },
        };

        info!(
            accounts = metadata.total_accounts,
            transactions = metadata.total_transactions,
            fraud_ratio = metadata.fraud_ratio,
            "Synthetic dataset generated"
        );

        Dataset {
            accounts,
            transactions,
            labels,
            metadata: Some(metadata),
        }
    }

    /// Share of the amount passed on at each hop (5-15% lost)
    fn hop_retention(&mut self) -> f64 {
        self.rng.gen_range(0.85..0.95)
    }

    fn account(&mut self, id: &str, kind: &str, balance: f64) -> AccountRecord {
        let age_days = self.rng.gen_range(30..3_650);
        AccountRecord {
            id: id.to_string(),
            bank: self.random_choice(&BANKS).to_string(),
            kind: kind.to_string(),
            name: format!(
                "{} {}",
                self.random_choice(&FIRST_NAMES),
                self.random_choice(&LAST_NAMES)
            ),
            balance: round_cents(balance),
            created_at: self.reference_time - Duration::days(age_days),
        }
    }

    fn transfer(&mut self, from: &str, to: &str, amount: f64, kind: &str) -> Transfer {
        self.transaction_counter += 1;
        let hours_ago = self.rng.gen_range(0..168);
        Transfer {
            id: Some(format!("TX{:06}", self.transaction_counter)),
            timestamp: Some(self.reference_time - Duration::hours(hours_ago)),
            currency: Some("THB".to_string()),
            kind: Some(kind.to_string()),
            ..Transfer::new(from, to, round_cents(amount))
        }
    }

    fn random_choice<'a>(&mut self, choices: &[&'a str]) -> &'a str {
        choices[self.rng.gen_range(0..choices.len())]
    }
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}
