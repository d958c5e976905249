//! Money transfer records between bank accounts

use crate::error::{DetectionError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single transfer from a debtor account to a creditor account.
///
/// Source and destination accept either `from`/`to` or `debtor`/`creditor`;
/// when both spellings are present `from`/`to` wins. All four are optional at
/// the serde level so that a record missing them surfaces as a
/// [`DetectionError::MalformedInput`] during graph construction rather than
/// as an opaque parse failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    /// Source account identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    /// Destination account identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,

    /// Alternate spelling of `from`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debtor: Option<String>,

    /// Alternate spelling of `to`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creditor: Option<String>,

    /// Transferred amount, zero when absent
    #[serde(default)]
    pub amount: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,

    /// Generator annotation ("normal" / "suspicious"), ignored by the model
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl Transfer {
    /// Create a transfer with only the fields the graph needs
    pub fn new(from: impl Into<String>, to: impl Into<String>, amount: f64) -> Self {
        Self {
            from: Some(from.into()),
            to: Some(to.into()),
            debtor: None,
            creditor: None,
            amount,
            id: None,
            timestamp: None,
            currency: None,
            kind: None,
        }
    }

    /// Source and destination identifiers, validated.
    ///
    /// `index` is the record's position in its batch and is only used for
    /// error reporting.
    pub fn endpoints(&self, index: usize) -> Result<(&str, &str)> {
        let from = non_empty(self.from.as_deref())
            .or_else(|| non_empty(self.debtor.as_deref()))
            .ok_or_else(|| DetectionError::malformed(index, "missing `from`/`debtor`"))?;
        let to = non_empty(self.to.as_deref())
            .or_else(|| non_empty(self.creditor.as_deref()))
            .ok_or_else(|| DetectionError::malformed(index, "missing `to`/`creditor`"))?;
        Ok((from, to))
    }

    /// The amount, validated as finite and non-negative.
    pub fn checked_amount(&self, index: usize) -> Result<f64> {
        if self.amount.is_finite() && self.amount >= 0.0 {
            Ok(self.amount)
        } else {
            Err(DetectionError::malformed(
                index,
                format!("amount must be a non-negative number, got {}", self.amount),
            ))
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debtor_creditor_aliases() {
        let json = r#"{"debtor": "ACC001", "creditor": "ACC002", "amount": 1500.5}"#;
        let tx: Transfer = serde_json::from_str(json).unwrap();

        assert_eq!(tx.endpoints(0).unwrap(), ("ACC001", "ACC002"));
        assert_eq!(tx.amount, 1500.5);
    }

    #[test]
    fn test_both_spellings_present() {
        let json = r#"{"from": "A", "debtor": "X", "creditor": "B", "amount": 1}"#;
        let tx: Transfer = serde_json::from_str(json).unwrap();
        assert_eq!(tx.endpoints(0).unwrap(), ("A", "B"));

        // an empty primary spelling falls back to the alternate one
        let json = r#"{"from": "", "debtor": "X", "to": "B", "creditor": "Y"}"#;
        let tx: Transfer = serde_json::from_str(json).unwrap();
        assert_eq!(tx.endpoints(0).unwrap(), ("X", "B"));
    }

    #[test]
    fn test_amount_defaults_to_zero() {
        let tx: Transfer = serde_json::from_str(r#"{"from": "A", "to": "B"}"#).unwrap();
        assert_eq!(tx.checked_amount(0).unwrap(), 0.0);
    }

    #[test]
    fn test_missing_destination_is_malformed() {
        let tx: Transfer = serde_json::from_str(r#"{"from": "A", "amount": 10}"#).unwrap();
        let err = tx.endpoints(3).unwrap_err();
        assert!(matches!(err, DetectionError::MalformedInput { index: 3, .. }));
    }

    #[test]
    fn test_negative_amount_rejected() {
        let tx = Transfer::new("A", "B", -5.0);
        assert!(tx.checked_amount(0).is_err());
    }

    #[test]
    fn test_metadata_fields_parse() {
        let json = r#"{
            "id": "TX123456",
            "from": "NORM0001",
            "to": "NORM0002",
            "amount": 250.0,
            "type": "normal",
            "timestamp": "2026-03-01T10:00:00Z",
            "currency": "THB"
        }"#;
        let tx: Transfer = serde_json::from_str(json).unwrap();

        assert_eq!(tx.id.as_deref(), Some("TX123456"));
        assert_eq!(tx.kind.as_deref(), Some("normal"));
        assert_eq!(tx.currency.as_deref(), Some("THB"));
        assert!(tx.timestamp.is_some());
    }
}
