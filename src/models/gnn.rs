//! Mean-aggregation graph network with a two-layer classification head.

use super::aggregation::{AggregationStrategy, NeighborAggregator};
use super::layers::{dropout_mask, relu, relu_backward, Linear, LinearGrad};
use crate::config::ModelConfig;
use crate::error::{DetectionError, Result};
use crate::graph::TransactionGraph;
use crate::types::NodePrediction;
use ndarray::{Array2, ArrayViewD, ArrayViewMutD, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Width of the classifier's hidden layer
pub const HEAD_HIDDEN: usize = 16;
/// normal / fraud
pub const NUM_CLASSES: usize = 2;
/// Logit column of the fraud class
pub const FRAUD_CLASS: usize = 1;

/// One aggregation layer: `mean_agg(x) · W_neigh + b + x · W_root`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SageConv {
    pub neighbor: Linear,
    pub root: Linear,
}

impl SageConv {
    pub fn new<R: Rng + ?Sized>(in_channels: usize, out_channels: usize, rng: &mut R) -> Self {
        Self {
            neighbor: Linear::new(in_channels, out_channels, true, rng),
            root: Linear::new(in_channels, out_channels, false, rng),
        }
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.neighbor.in_features(), self.neighbor.out_features())
    }
}

/// All trainable parameters; the unit persisted in a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelWeights {
    pub convs: Vec<SageConv>,
    pub hidden: Linear,
    pub output: Linear,
}

impl ModelWeights {
    /// Parameter views in a fixed order shared with [`ModelGradients::tensors`]
    pub fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f64>> {
        let mut params = Vec::new();
        for conv in self.convs.iter_mut() {
            params.extend(conv.neighbor.parameters_mut());
            params.extend(conv.root.parameters_mut());
        }
        params.extend(self.hidden.parameters_mut());
        params.extend(self.output.parameters_mut());
        params
    }

    pub fn num_parameters(&self) -> usize {
        self.convs
            .iter()
            .map(|c| c.neighbor.num_parameters() + c.root.num_parameters())
            .sum::<usize>()
            + self.hidden.num_parameters()
            + self.output.num_parameters()
    }
}

/// Gradients matching [`ModelWeights`] field for field
#[derive(Debug, Clone)]
pub struct ModelGradients {
    pub convs: Vec<(LinearGrad, LinearGrad)>,
    pub hidden: LinearGrad,
    pub output: LinearGrad,
}

impl ModelGradients {
    pub fn tensors(&self) -> Vec<ArrayViewD<'_, f64>> {
        let mut tensors = Vec::new();
        for (neighbor, root) in &self.convs {
            tensors.extend(neighbor.tensors());
            tensors.extend(root.tensors());
        }
        tensors.extend(self.hidden.tensors());
        tensors.extend(self.output.tensors());
        tensors
    }
}

struct ConvCache {
    input: Array2<f64>,
    aggregated: Array2<f64>,
    pre_activation: Array2<f64>,
    mask: Option<Array2<f64>>,
}

/// Intermediate activations of a training-mode forward pass
pub struct ForwardCache {
    convs: Vec<ConvCache>,
    head_input: Array2<f64>,
    head_pre_activation: Array2<f64>,
    head_mask: Option<Array2<f64>>,
    head_output: Array2<f64>,
}

/// Node classifier over a transfer graph
#[derive(Debug, Clone, PartialEq)]
pub struct GraphModel {
    config: ModelConfig,
    in_channels: usize,
    strategy: AggregationStrategy,
    weights: ModelWeights,
}

/// `(in, out)` widths of each aggregation layer
pub fn conv_dims(in_channels: usize, config: &ModelConfig) -> Vec<(usize, usize)> {
    let layers = config.num_layers;
    let hidden = config.hidden_channels;
    let mut width = in_channels;
    (0..layers)
        .map(|layer| {
            let out = if layers > 1 && layer == layers - 1 {
                hidden / 2
            } else {
                hidden
            };
            let dims = (width, out);
            width = out;
            dims
        })
        .collect()
}

impl GraphModel {
    /// Freshly initialised model
    pub fn new<R: Rng + ?Sized>(
        in_channels: usize,
        config: &ModelConfig,
        strategy: AggregationStrategy,
        rng: &mut R,
    ) -> Result<Self> {
        config.validate()?;
        let dims = conv_dims(in_channels, config);
        let convs: Vec<SageConv> = dims
            .iter()
            .map(|&(input, output)| SageConv::new(input, output, rng))
            .collect();
        let final_width = dims.last().map_or(in_channels, |&(_, out)| out);

        let weights = ModelWeights {
            convs,
            hidden: Linear::new(final_width, HEAD_HIDDEN, true, rng),
            output: Linear::new(HEAD_HIDDEN, NUM_CLASSES, true, rng),
        };

        Ok(Self {
            config: config.clone(),
            in_channels,
            strategy,
            weights,
        })
    }

    /// Rebuild a model from stored weights, checking every shape against `config`
    pub fn from_parts(
        in_channels: usize,
        config: &ModelConfig,
        strategy: AggregationStrategy,
        weights: ModelWeights,
    ) -> Result<Self> {
        config.validate()?;
        let dims = conv_dims(in_channels, config);
        if weights.convs.len() != dims.len() {
            return Err(DetectionError::DimensionMismatch {
                expected: dims.len(),
                actual: weights.convs.len(),
            });
        }
        for (conv, &expected) in weights.convs.iter().zip(&dims) {
            check_linear(&conv.neighbor, expected, true)?;
            check_linear(&conv.root, expected, false)?;
        }
        let final_width = dims.last().map_or(in_channels, |&(_, out)| out);
        check_linear(&weights.hidden, (final_width, HEAD_HIDDEN), true)?;
        check_linear(&weights.output, (HEAD_HIDDEN, NUM_CLASSES), true)?;

        Ok(Self {
            config: config.clone(),
            in_channels,
            strategy,
            weights,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn strategy(&self) -> AggregationStrategy {
        self.strategy
    }

    pub fn weights(&self) -> &ModelWeights {
        &self.weights
    }

    pub fn weights_mut(&mut self) -> &mut ModelWeights {
        &mut self.weights
    }

    pub fn num_parameters(&self) -> usize {
        self.weights.num_parameters()
    }

    /// Aggregation operator for `graph` using this model's strategy
    pub fn aggregator(&self, graph: &TransactionGraph) -> NeighborAggregator {
        self.strategy.prepare(graph)
    }

    fn check_inputs(&self, features: &Array2<f64>, agg: &NeighborAggregator) -> Result<()> {
        if features.ncols() != self.in_channels {
            return Err(DetectionError::DimensionMismatch {
                expected: self.in_channels,
                actual: features.ncols(),
            });
        }
        if agg.num_nodes() != features.nrows() {
            return Err(DetectionError::DimensionMismatch {
                expected: features.nrows(),
                actual: agg.num_nodes(),
            });
        }
        Ok(())
    }

    /// Evaluation-mode logits (`N x 2`), dropout disabled
    pub fn forward(&self, features: &Array2<f64>, agg: &NeighborAggregator) -> Result<Array2<f64>> {
        self.check_inputs(features, agg)?;

        let mut h = features.clone();
        for conv in &self.weights.convs {
            let aggregated = agg.aggregate(&h);
            h = relu(&(conv.neighbor.forward(&aggregated) + conv.root.forward(&h)));
        }
        let hidden = relu(&self.weights.hidden.forward(&h));
        Ok(self.weights.output.forward(&hidden))
    }

    /// Training-mode forward pass with dropout, keeping what backward needs
    pub fn forward_train<R: Rng + ?Sized>(
        &self,
        features: &Array2<f64>,
        agg: &NeighborAggregator,
        rng: &mut R,
    ) -> Result<(Array2<f64>, ForwardCache)> {
        self.check_inputs(features, agg)?;
        let rate = self.config.dropout;

        let mut h = features.clone();
        let mut convs = Vec::with_capacity(self.weights.convs.len());
        for conv in &self.weights.convs {
            let aggregated = agg.aggregate(&h);
            let pre_activation = conv.neighbor.forward(&aggregated) + conv.root.forward(&h);
            let mut activated = relu(&pre_activation);
            let mask = dropout_mask(activated.dim(), rate, rng);
            if let Some(mask) = &mask {
                activated *= mask;
            }
            convs.push(ConvCache {
                input: h,
                aggregated,
                pre_activation,
                mask,
            });
            h = activated;
        }

        let head_pre_activation = self.weights.hidden.forward(&h);
        let mut head_output = relu(&head_pre_activation);
        let head_mask = dropout_mask(head_output.dim(), rate, rng);
        if let Some(mask) = &head_mask {
            head_output *= mask;
        }
        let logits = self.weights.output.forward(&head_output);

        Ok((
            logits,
            ForwardCache {
                convs,
                head_input: h,
                head_pre_activation,
                head_mask,
                head_output,
            },
        ))
    }

    /// Backpropagate `grad_logits` through the cached forward pass
    pub fn backward(
        &self,
        cache: &ForwardCache,
        grad_logits: &Array2<f64>,
        agg: &NeighborAggregator,
    ) -> ModelGradients {
        let (grad_head_output, output) = self
            .weights
            .output
            .backward(&cache.head_output, grad_logits);
        let grad = apply_mask(grad_head_output, cache.head_mask.as_ref());
        let grad = relu_backward(&cache.head_pre_activation, &grad);
        let (mut grad_h, hidden) = self.weights.hidden.backward(&cache.head_input, &grad);

        let mut convs = Vec::with_capacity(self.weights.convs.len());
        for (conv, layer) in self.weights.convs.iter().zip(&cache.convs).rev() {
            let grad = apply_mask(grad_h, layer.mask.as_ref());
            let grad = relu_backward(&layer.pre_activation, &grad);
            let (grad_aggregated, neighbor) = conv.neighbor.backward(&layer.aggregated, &grad);
            let (grad_root, root) = conv.root.backward(&layer.input, &grad);
            grad_h = grad_root + agg.aggregate_backward(&grad_aggregated);
            convs.push((neighbor, root));
        }
        convs.reverse();

        ModelGradients {
            convs,
            hidden,
            output,
        }
    }

    /// Evaluation-mode softmax over both classes (`N x 2`, columns normal / fraud)
    pub fn predict_proba(&self, graph: &TransactionGraph) -> Result<Array2<f64>> {
        let agg = self.aggregator(graph);
        let logits = self.forward(&graph.features, &agg)?;
        Ok(softmax_rows(&logits))
    }

    /// Per-node fraud probability, risk score, label at `threshold` and the
    /// fixed-cutoff suspicious flag, in node index order
    pub fn predict(&self, graph: &TransactionGraph, threshold: f64) -> Result<Vec<NodePrediction>> {
        let probabilities = self.predict_proba(graph)?;
        Ok(probabilities
            .column(FRAUD_CLASS)
            .iter()
            .enumerate()
            .map(|(node_idx, &p)| NodePrediction::new(node_idx, p, threshold))
            .collect())
    }
}

fn check_linear(layer: &Linear, expected: (usize, usize), with_bias: bool) -> Result<()> {
    let (rows, cols) = expected;
    if layer.in_features() != rows {
        return Err(DetectionError::DimensionMismatch {
            expected: rows,
            actual: layer.in_features(),
        });
    }
    if layer.out_features() != cols {
        return Err(DetectionError::DimensionMismatch {
            expected: cols,
            actual: layer.out_features(),
        });
    }
    match (&layer.bias, with_bias) {
        (Some(bias), true) if bias.len() != cols => Err(DetectionError::DimensionMismatch {
            expected: cols,
            actual: bias.len(),
        }),
        (Some(bias), false) => Err(DetectionError::DimensionMismatch {
            expected: 0,
            actual: bias.len(),
        }),
        (None, true) => Err(DetectionError::DimensionMismatch {
            expected: cols,
            actual: 0,
        }),
        _ => Ok(()),
    }
}

fn apply_mask(grad: Array2<f64>, mask: Option<&Array2<f64>>) -> Array2<f64> {
    match mask {
        Some(mask) => grad * mask,
        None => grad,
    }
}

/// Row-wise softmax, shifted by the row max
pub fn softmax_rows(logits: &Array2<f64>) -> Array2<f64> {
    let mut out = logits.clone();
    for mut row in out.axis_iter_mut(Axis(0)) {
        let max = row.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    out
}

/// Mean cross-entropy over `nodes`, with its gradient w.r.t. the logits.
///
/// Rows outside `nodes` get zero gradient. An empty node set yields zero loss.
pub fn masked_cross_entropy(
    logits: &Array2<f64>,
    labels: &[usize],
    nodes: &[usize],
) -> (f64, Array2<f64>) {
    let mut grad = Array2::<f64>::zeros(logits.raw_dim());
    if nodes.is_empty() {
        return (0.0, grad);
    }
    let count = nodes.len() as f64;
    let probs = softmax_rows(logits);

    let mut loss = 0.0;
    for &node in nodes {
        let row = logits.row(node);
        let max = row.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        let log_sum = row.iter().map(|&v| (v - max).exp()).sum::<f64>().ln() + max;
        let label = labels[node];
        loss += log_sum - row[label];

        let mut g = grad.row_mut(node);
        g.assign(&probs.row(node));
        g[label] -= 1.0;
        g.mapv_inplace(|v| v / count);
    }
    (loss / count, grad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_extractor::FEATURE_COUNT;
    use crate::types::prediction::SUSPICIOUS_CUTOFF;
    use crate::types::RiskLabel;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn random_graph(rng: &mut StdRng, n: usize, e: usize) -> TransactionGraph {
        let edges: Vec<(usize, usize)> = (0..e)
            .map(|_| (rng.gen_range(0..n), rng.gen_range(0..n)))
            .collect();
        TransactionGraph {
            features: Array2::from_shape_fn((n, FEATURE_COUNT), |_| rng.gen_range(-1.0..1.0)),
            edge_amounts: Array2::zeros((edges.len(), 1)),
            edges,
            labels: (0..n).map(|i| i % 2).collect(),
        }
    }

    fn small_config(num_layers: usize, dropout: f64) -> ModelConfig {
        ModelConfig {
            hidden_channels: 8,
            num_layers,
            dropout,
            ..Default::default()
        }
    }

    #[test]
    fn test_layer_widths() {
        let config = ModelConfig::default();
        assert_eq!(conv_dims(7, &config), vec![(7, 64), (64, 32)]);

        let three = ModelConfig { num_layers: 3, ..Default::default() };
        assert_eq!(conv_dims(7, &three), vec![(7, 64), (64, 64), (64, 32)]);

        let one = ModelConfig { num_layers: 1, ..Default::default() };
        assert_eq!(conv_dims(7, &one), vec![(7, 64)]);

        let mut rng = StdRng::seed_from_u64(0);
        let model = GraphModel::new(7, &one, AggregationStrategy::Sparse, &mut rng).unwrap();
        assert_eq!(model.weights().hidden.in_features(), 64);
        assert_eq!(model.weights().output.out_features(), NUM_CLASSES);
    }

    #[test]
    fn test_forward_shape_and_probabilities() {
        let mut rng = StdRng::seed_from_u64(1);
        let graph = random_graph(&mut rng, 10, 20);
        let model =
            GraphModel::new(FEATURE_COUNT, &small_config(2, 0.3), AggregationStrategy::Sparse, &mut rng)
                .unwrap();

        let agg = model.aggregator(&graph);
        assert_eq!(model.forward(&graph.features, &agg).unwrap().dim(), (10, 2));

        let probs = model.predict_proba(&graph).unwrap();
        assert_eq!(probs.dim(), (10, NUM_CLASSES));
        assert!(probs.iter().all(|&p| (0.0..=1.0).contains(&p)));
        for row in probs.rows() {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-12);
        }

        // evaluation mode is deterministic
        assert_eq!(probs, model.predict_proba(&graph).unwrap());
    }

    #[test]
    fn test_predict_applies_both_thresholds() {
        let mut rng = StdRng::seed_from_u64(11);
        let graph = random_graph(&mut rng, 12, 30);
        let model =
            GraphModel::new(FEATURE_COUNT, &small_config(2, 0.3), AggregationStrategy::Sparse, &mut rng)
                .unwrap();
        let probs = model.predict_proba(&graph).unwrap();

        // a caller threshold below every probability labels every node fraud,
        // while the suspicious flag still follows the fixed cutoff
        let min_p = probs.column(FRAUD_CLASS).fold(1.0, |m: f64, &p| m.min(p));
        let predictions = model.predict(&graph, min_p).unwrap();
        assert_eq!(predictions.len(), 12);
        for (i, p) in predictions.iter().enumerate() {
            assert_eq!(p.node_idx, i);
            assert_eq!(p.fraud_probability, probs[[i, FRAUD_CLASS]]);
            assert_eq!(p.risk_score, (p.fraud_probability * 100.0).floor() as u8);
            assert_eq!(p.label, RiskLabel::Fraud);
            assert_eq!(p.is_suspicious, p.fraud_probability >= SUSPICIOUS_CUTOFF);
        }

        let strict = model.predict(&graph, 1.1).unwrap();
        assert!(strict.iter().all(|p| p.label == RiskLabel::Normal));
        let flags: Vec<bool> = predictions.iter().map(|p| p.is_suspicious).collect();
        let strict_flags: Vec<bool> = strict.iter().map(|p| p.is_suspicious).collect();
        assert_eq!(flags, strict_flags);
    }

    #[test]
    fn test_predict_empty_graph() {
        let mut rng = StdRng::seed_from_u64(12);
        let graph = random_graph(&mut rng, 0, 0);
        let model =
            GraphModel::new(FEATURE_COUNT, &small_config(2, 0.0), AggregationStrategy::Dense, &mut rng)
                .unwrap();
        assert!(model.predict(&graph, 0.5).unwrap().is_empty());
    }

    #[test]
    fn test_strategies_are_equivalent() {
        let mut rng = StdRng::seed_from_u64(2);
        let graph = random_graph(&mut rng, 15, 40);
        let config = small_config(3, 0.0);
        let sparse =
            GraphModel::new(FEATURE_COUNT, &config, AggregationStrategy::Sparse, &mut rng).unwrap();
        let dense = GraphModel::from_parts(
            FEATURE_COUNT,
            &config,
            AggregationStrategy::Dense,
            sparse.weights().clone(),
        )
        .unwrap();

        let a = sparse.predict_proba(&graph).unwrap();
        let b = dense.predict_proba(&graph).unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_feature_width_mismatch() {
        let mut rng = StdRng::seed_from_u64(3);
        let graph = random_graph(&mut rng, 4, 4);
        let model = GraphModel::new(9, &small_config(2, 0.0), AggregationStrategy::Dense, &mut rng)
            .unwrap();

        let err = model.predict_proba(&graph).unwrap_err();
        assert!(matches!(
            err,
            DetectionError::DimensionMismatch { expected: 9, actual: 7 }
        ));
    }

    #[test]
    fn test_from_parts_rejects_wrong_architecture() {
        let mut rng = StdRng::seed_from_u64(4);
        let model =
            GraphModel::new(FEATURE_COUNT, &small_config(2, 0.0), AggregationStrategy::Sparse, &mut rng)
                .unwrap();
        let wider = ModelConfig { hidden_channels: 16, ..small_config(2, 0.0) };

        let result = GraphModel::from_parts(
            FEATURE_COUNT,
            &wider,
            AggregationStrategy::Sparse,
            model.weights().clone(),
        );
        assert!(matches!(result, Err(DetectionError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_cross_entropy_gradient() {
        let logits = ndarray::array![[2.0, -1.0], [0.5, 0.5], [-3.0, 1.0]];
        let labels = [0, 1, 1];
        let (loss, grad) = masked_cross_entropy(&logits, &labels, &[0, 2]);

        let p0 = 1.0 / (1.0 + (-3.0f64).exp());
        let p2 = 1.0 / (1.0 + (-4.0f64).exp());
        assert_abs_diff_eq!(loss, -(p0.ln() + p2.ln()) / 2.0, epsilon = 1e-12);
        // masked row untouched
        assert_eq!(grad.row(1).sum(), 0.0);
        assert_abs_diff_eq!(grad[[0, 0]], (p0 - 1.0) / 2.0, epsilon = 1e-12);

        let (empty_loss, empty_grad) = masked_cross_entropy(&logits, &labels, &[]);
        assert_eq!(empty_loss, 0.0);
        assert_eq!(empty_grad.sum(), 0.0);
    }

    #[test]
    fn test_backward_matches_finite_differences() {
        let mut rng = StdRng::seed_from_u64(5);
        let graph = random_graph(&mut rng, 8, 14);
        let nodes: Vec<usize> = (0..8).collect();

        for strategy in [AggregationStrategy::Sparse, AggregationStrategy::Dense] {
            let model = GraphModel::new(FEATURE_COUNT, &small_config(2, 0.0), strategy, &mut rng)
                .unwrap();
            let agg = model.aggregator(&graph);

            let (logits, cache) = model.forward_train(&graph.features, &agg, &mut rng).unwrap();
            let (_, grad_logits) = masked_cross_entropy(&logits, &graph.labels, &nodes);
            let grads = model.backward(&cache, &grad_logits, &agg);
            let analytic: Vec<Vec<f64>> = grads
                .tensors()
                .iter()
                .map(|t| t.iter().copied().collect())
                .collect();

            let loss_of = |m: &GraphModel| {
                let logits = m.forward(&graph.features, &agg).unwrap();
                masked_cross_entropy(&logits, &graph.labels, &nodes).0
            };

            let eps = 1e-6;
            let num_tensors = analytic.len();
            for tensor in 0..num_tensors {
                // check a few entries per tensor
                let len = analytic[tensor].len();
                for entry in [0, len / 2, len - 1] {
                    let mut plus = model.clone();
                    let mut minus = model.clone();
                    bump(&mut plus, tensor, entry, eps);
                    bump(&mut minus, tensor, entry, -eps);
                    let numeric = (loss_of(&plus) - loss_of(&minus)) / (2.0 * eps);
                    assert_abs_diff_eq!(numeric, analytic[tensor][entry], epsilon = 1e-5);
                }
            }
        }
    }

    fn bump(model: &mut GraphModel, tensor: usize, entry: usize, delta: f64) {
        let mut params = model.weights_mut().parameters_mut();
        if let Some(value) = params[tensor].iter_mut().nth(entry) {
            *value += delta;
        }
    }
}
