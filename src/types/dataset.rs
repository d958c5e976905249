//! Labelled dataset envelope used for training and demos

use crate::error::{DetectionError, Result};
use crate::feature_extractor::AccountProfile;
use crate::types::transfer::Transfer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

/// Account fixture with the static attributes the builder can use
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: String,
    #[serde(default)]
    pub bank: String,
    /// "normal" or "mule"
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    pub balance: f64,
    pub created_at: DateTime<Utc>,
}

impl AccountRecord {
    /// Profile as of `now`; accounts created in the future have age zero
    pub fn profile(&self, now: DateTime<Utc>) -> AccountProfile {
        let age_days = (now - self.created_at).num_days().max(0);
        AccountProfile {
            balance: self.balance,
            age_days: u32::try_from(age_days).unwrap_or(u32::MAX),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub num_normal: usize,
    pub num_mule_chains: usize,
    pub chain_length: usize,
    pub total_accounts: usize,
    pub total_transactions: usize,
    pub fraud_ratio: f64,
}

/// Transfers plus optional ground truth
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub accounts: Vec<AccountRecord>,
    pub transactions: Vec<Transfer>,
    /// account id -> 0 (normal) / 1 (fraud)
    #[serde(default)]
    pub labels: BTreeMap<String, u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<DatasetMetadata>,
}

impl Dataset {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| DetectionError::io(path, e))?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| DetectionError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| DetectionError::io(path, e))
    }

    /// Balance/age profiles keyed by account id
    pub fn account_profiles(&self, now: DateTime<Utc>) -> HashMap<String, AccountProfile> {
        self.accounts
            .iter()
            .map(|a| (a.id.clone(), a.profile(now)))
            .collect()
    }
}

/// Parse a transfer batch given either as `{"transactions": [...]}` or a bare array.
///
/// Invalid JSON or an unexpected top-level shape is a serialization error; a
/// record that does not deserialize is malformed input at its batch index.
pub fn parse_transfers(raw: &str) -> Result<Vec<Transfer>> {
    let records = match serde_json::from_str::<Value>(raw)? {
        Value::Array(records) => records,
        Value::Object(mut map) => match map.remove("transactions") {
            Some(Value::Array(records)) => records,
            _ => {
                return Err(DetectionError::Serialization(serde::de::Error::custom(
                    "expected a `transactions` array",
                )))
            }
        },
        _ => {
            return Err(DetectionError::Serialization(serde::de::Error::custom(
                "expected a transfer array or an object with `transactions`",
            )))
        }
    };

    records
        .into_iter()
        .enumerate()
        .map(|(index, record)| {
            serde_json::from_value(record)
                .map_err(|e| DetectionError::malformed(index, e.to_string()))
        })
        .collect()
}
