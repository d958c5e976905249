//! Classification metrics and training history for the detection engine.

use crate::types::AccountPrediction;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Confusion counts for the fraud (positive) class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionCounts {
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
}

impl ConfusionCounts {
    /// Tally `predicted` against `labels` over `nodes`
    pub fn from_predictions(predicted: &[usize], labels: &[usize], nodes: &[usize]) -> Self {
        let mut counts = Self::default();
        for &node in nodes {
            match (predicted[node], labels[node]) {
                (1, 1) => counts.true_positives += 1,
                (1, _) => counts.false_positives += 1,
                (_, 1) => counts.false_negatives += 1,
                _ => counts.true_negatives += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }
}

/// Loss, accuracy, precision, recall and F1 on one node partition.
///
/// Denominators are guarded: precision and recall divide by at least 1, F1 by
/// at least `1e-6`, so a partition with no positives scores 0 rather than NaN.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub loss: f64,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl ClassificationMetrics {
    pub fn from_counts(loss: f64, counts: &ConfusionCounts) -> Self {
        let tp = counts.true_positives as f64;
        let fp = counts.false_positives as f64;
        let fn_ = counts.false_negatives as f64;

        let accuracy = if counts.total() > 0 {
            (counts.true_positives + counts.true_negatives) as f64 / counts.total() as f64
        } else {
            0.0
        };
        let precision = tp / (tp + fp).max(1.0);
        let recall = tp / (tp + fn_).max(1.0);
        let f1 = 2.0 * precision * recall / (precision + recall).max(1e-6);

        Self {
            loss,
            accuracy,
            precision,
            recall,
            f1,
        }
    }
}

/// Per-epoch record of a training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    /// 1-based epoch number
    pub epoch: usize,
    pub total_epochs: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val: ClassificationMetrics,
    /// Validation F1 strictly beat the previous best and a checkpoint was written
    pub improved: bool,
    pub elapsed_ms: u64,
}

/// Histogram of risk scores in ten 10-point buckets; 100 falls in the last bucket
pub fn score_distribution(predictions: &[AccountPrediction]) -> [usize; 10] {
    let mut buckets = [0usize; 10];
    for p in predictions {
        let bucket = (p.risk_score as usize / 10).min(9);
        buckets[bucket] += 1;
    }
    buckets
}

const BOX_TOP: &str = "╔══════════════════════════════════════════════════════════════╗";
const BOX_RULE: &str = "╠══════════════════════════════════════════════════════════════╣";
const BOX_BOTTOM: &str = "╚══════════════════════════════════════════════════════════════╝";

/// Rows of the boxed training summary
pub fn training_summary_lines(history: &[EpochStats], test: &ClassificationMetrics) -> Vec<String> {
    let best = history
        .iter()
        .filter(|s| s.improved)
        .max_by(|a, b| a.val.f1.total_cmp(&b.val.f1));
    let total_ms: u64 = history.iter().map(|s| s.elapsed_ms).sum();

    let mut lines = vec![
        BOX_TOP.to_string(),
        "║              MULE DETECTION - TRAINING SUMMARY               ║".to_string(),
        BOX_RULE.to_string(),
        format!(
            "║ Epochs Run: {:>6}  │  Wall Time: {:>8.1}s                  ║",
            history.len(),
            total_ms as f64 / 1000.0
        ),
    ];
    if let Some(best) = best {
        lines.push(format!(
            "║ Best Epoch: {:>6}  │  Val F1: {:>6.4}                        ║",
            best.epoch, best.val.f1
        ));
    }
    lines.push(BOX_RULE.to_string());
    lines.push(format!(
        "║ Test Loss: {:>7.4}  │  Accuracy: {:>6.4}                      ║",
        test.loss, test.accuracy
    ));
    lines.push(format!(
        "║ Precision: {:>7.4}  │  Recall: {:>6.4}  │  F1: {:>6.4}         ║",
        test.precision, test.recall, test.f1
    ));
    lines.push(BOX_BOTTOM.to_string());
    lines
}

/// Log a boxed summary of a training run
pub fn print_training_summary(history: &[EpochStats], test: &ClassificationMetrics) {
    for line in training_summary_lines(history, test) {
        info!("{}", line);
    }
}

/// Rows of the boxed prediction summary
pub fn prediction_summary_lines(predictions: &[AccountPrediction]) -> Vec<String> {
    let summary = crate::types::PredictionSummary::from_predictions(predictions);
    let dist = score_distribution(predictions);

    let mut lines = vec![
        BOX_TOP.to_string(),
        "║             MULE DETECTION - PREDICTION SUMMARY              ║".to_string(),
        BOX_RULE.to_string(),
        format!(
            "║ Accounts: {:>8}  │  Fraud: {:>6}  │  Suspicious: {:>6}  ║",
            summary.total_accounts, summary.fraud_count, summary.suspicious_count
        ),
        format!(
            "║ Average Risk Score: {:>6.1}                                   ║",
            summary.average_risk_score
        ),
        BOX_RULE.to_string(),
        "║ Risk Score Distribution:                                     ║".to_string(),
    ];
    let total: usize = dist.iter().sum();
    for (i, &count) in dist.iter().enumerate() {
        let pct = if total > 0 {
            (count as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let bar: String = "█".repeat(((pct / 2.0) as usize).min(20));
        lines.push(format!(
            "║   {:>3}-{:<3}: {:>6} ({:>5.1}%) {:<20}              ║",
            i * 10,
            i * 10 + 9,
            count,
            pct,
            bar
        ));
    }
    lines.push(BOX_BOTTOM.to_string());
    lines
}

/// Log a boxed summary of a prediction batch
pub fn print_prediction_summary(predictions: &[AccountPrediction]) {
    for line in prediction_summary_lines(predictions) {
        info!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodePrediction;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_metrics_from_counts() {
        let predicted = [1, 1, 0, 0, 1];
        let labels = [1, 0, 0, 1, 1];
        let counts = ConfusionCounts::from_predictions(&predicted, &labels, &[0, 1, 2, 3, 4]);
        assert_eq!(counts.true_positives, 2);
        assert_eq!(counts.false_positives, 1);
        assert_eq!(counts.false_negatives, 1);
        assert_eq!(counts.true_negatives, 1);

        let m = ClassificationMetrics::from_counts(0.4, &counts);
        assert_abs_diff_eq!(m.accuracy, 0.6);
        assert_abs_diff_eq!(m.precision, 2.0 / 3.0);
        assert_abs_diff_eq!(m.recall, 2.0 / 3.0);
        assert_abs_diff_eq!(m.f1, 2.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_no_positives_scores_zero() {
        let counts = ConfusionCounts::from_predictions(&[0, 0], &[0, 0], &[0, 1]);
        let m = ClassificationMetrics::from_counts(0.1, &counts);
        assert_eq!(m.precision, 0.0);
        assert_eq!(m.recall, 0.0);
        assert_eq!(m.f1, 0.0);
        assert_eq!(m.accuracy, 1.0);
    }

    #[test]
    fn test_empty_partition() {
        let counts = ConfusionCounts::from_predictions(&[1], &[1], &[]);
        let m = ClassificationMetrics::from_counts(0.0, &counts);
        assert_eq!(m, ClassificationMetrics::default());
    }

    fn assert_boxed(lines: &[String]) {
        let width = BOX_TOP.chars().count();
        for line in lines {
            assert_eq!(line.chars().count(), width, "{line}");
            let last = line.chars().last().unwrap();
            assert!(matches!(last, '║' | '╗' | '╣' | '╝'), "{line}");
        }
    }

    #[test]
    fn test_training_summary_rows_are_closed() {
        let counts = ConfusionCounts::from_predictions(&[1, 0, 1], &[1, 0, 0], &[0, 1, 2]);
        let test = ClassificationMetrics::from_counts(0.6931, &counts);
        let history = vec![EpochStats {
            epoch: 1,
            total_epochs: 100,
            train_loss: 0.7,
            train_accuracy: 0.5,
            val: test,
            improved: true,
            elapsed_ms: 12,
        }];

        let lines = training_summary_lines(&history, &test);
        assert_boxed(&lines);
        assert!(lines.iter().any(|l| l.contains("Test Loss:  0.6931")));
        assert!(lines.iter().any(|l| l.starts_with("║ Precision:")));
    }

    #[test]
    fn test_prediction_summary_rows_are_closed() {
        let predictions: Vec<AccountPrediction> = [0.05, 0.55, 0.97, 1.0]
            .iter()
            .map(|&p| NodePrediction::new(0, p, 0.5).into_account("X".to_string()))
            .collect();
        assert_boxed(&prediction_summary_lines(&predictions));
        assert_boxed(&prediction_summary_lines(&[]));
    }

    #[test]
    fn test_score_distribution() {
        let predictions: Vec<AccountPrediction> = [0.05, 0.55, 0.59, 1.0]
            .iter()
            .map(|&p| NodePrediction::new(0, p, 0.5).into_account("X".to_string()))
            .collect();
        let dist = score_distribution(&predictions);
        assert_eq!(dist[0], 1);
        assert_eq!(dist[5], 2);
        assert_eq!(dist[9], 1);
    }
}
