//! Per-account risk predictions

use serde::{Deserialize, Serialize};

/// Fixed cutoff for the `is_suspicious` flag.
///
/// Independent of the caller-supplied classification threshold; the two
/// boundaries are kept separate pending product clarification.
pub const SUSPICIOUS_CUTOFF: f64 = 0.5;

/// Classification label for an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLabel {
    Normal,
    Fraud,
}

impl RiskLabel {
    /// Label for a fraud probability against a caller threshold
    pub fn from_probability(fraud_probability: f64, threshold: f64) -> Self {
        if fraud_probability >= threshold {
            RiskLabel::Fraud
        } else {
            RiskLabel::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLabel::Normal => "normal",
            RiskLabel::Fraud => "fraud",
        }
    }
}

/// Risk prediction for one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountPrediction {
    pub account_id: String,

    /// Softmax probability of the fraud class (0.0 - 1.0)
    pub fraud_probability: f64,

    /// `floor(fraud_probability * 100)`
    pub risk_score: u8,

    pub label: RiskLabel,

    /// `fraud_probability >= 0.5`, regardless of the caller threshold
    pub is_suspicious: bool,
}

/// Risk prediction for one graph node, before account ids are attached
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodePrediction {
    pub node_idx: usize,
    pub fraud_probability: f64,
    pub risk_score: u8,
    pub label: RiskLabel,
    pub is_suspicious: bool,
}

impl NodePrediction {
    pub fn new(node_idx: usize, fraud_probability: f64, threshold: f64) -> Self {
        Self {
            node_idx,
            fraud_probability,
            risk_score: risk_score(fraud_probability),
            label: RiskLabel::from_probability(fraud_probability, threshold),
            is_suspicious: fraud_probability >= SUSPICIOUS_CUTOFF,
        }
    }

    /// Tag this prediction with its account identifier
    pub fn into_account(self, account_id: String) -> AccountPrediction {
        AccountPrediction {
            account_id,
            fraud_probability: self.fraud_probability,
            risk_score: self.risk_score,
            label: self.label,
            is_suspicious: self.is_suspicious,
        }
    }
}

/// Integer 0-100 rescaling of a probability
pub fn risk_score(fraud_probability: f64) -> u8 {
    (fraud_probability * 100.0).floor().clamp(0.0, 100.0) as u8
}

/// Aggregate view over a prediction batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionSummary {
    pub total_accounts: usize,
    pub fraud_count: usize,
    pub suspicious_count: usize,
    pub average_risk_score: f64,
}

impl PredictionSummary {
    pub fn from_predictions(predictions: &[AccountPrediction]) -> Self {
        let total_accounts = predictions.len();
        let fraud_count = predictions
            .iter()
            .filter(|p| p.label == RiskLabel::Fraud)
            .count();
        let suspicious_count = predictions.iter().filter(|p| p.is_suspicious).count();
        let average_risk_score = if total_accounts > 0 {
            predictions.iter().map(|p| p.risk_score as f64).sum::<f64>() / total_accounts as f64
        } else {
            0.0
        };

        Self {
            total_accounts,
            fraud_count,
            suspicious_count,
            average_risk_score,
        }
    }
}
