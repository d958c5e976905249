//! Dense building blocks with explicit backward passes

use ndarray::{Array1, Array2, ArrayViewD, ArrayViewMutD, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Fully connected layer computing `input · weight + bias`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Linear {
    /// Weight matrix (in_features x out_features)
    pub weight: Array2<f64>,
    pub bias: Option<Array1<f64>>,
}

/// Gradients of a [`Linear`] layer
#[derive(Debug, Clone, PartialEq)]
pub struct LinearGrad {
    pub weight: Array2<f64>,
    pub bias: Option<Array1<f64>>,
}

impl Linear {
    /// Xavier/Glorot uniform initialisation, zero bias
    pub fn new<R: Rng + ?Sized>(
        in_features: usize,
        out_features: usize,
        with_bias: bool,
        rng: &mut R,
    ) -> Self {
        let limit = (6.0 / (in_features + out_features).max(1) as f64).sqrt();
        let weight = Array2::from_shape_fn((in_features, out_features), |_| {
            rng.gen_range(-limit..limit)
        });
        let bias = with_bias.then(|| Array1::zeros(out_features));
        Self { weight, bias }
    }

    pub fn in_features(&self) -> usize {
        self.weight.nrows()
    }

    pub fn out_features(&self) -> usize {
        self.weight.ncols()
    }

    pub fn forward(&self, input: &Array2<f64>) -> Array2<f64> {
        let mut output = input.dot(&self.weight);
        if let Some(bias) = &self.bias {
            output += bias;
        }
        output
    }

    /// Returns the gradient w.r.t. `input` and the parameter gradients.
    pub fn backward(
        &self,
        input: &Array2<f64>,
        grad_output: &Array2<f64>,
    ) -> (Array2<f64>, LinearGrad) {
        let grad_input = grad_output.dot(&self.weight.t());
        let grad = LinearGrad {
            weight: input.t().dot(grad_output),
            bias: self.bias.as_ref().map(|_| grad_output.sum_axis(Axis(0))),
        };
        (grad_input, grad)
    }

    pub fn num_parameters(&self) -> usize {
        self.weight.len() + self.bias.as_ref().map_or(0, |b| b.len())
    }

    /// Mutable parameter views, weight first
    pub fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f64>> {
        let mut params = vec![self.weight.view_mut().into_dyn()];
        if let Some(bias) = self.bias.as_mut() {
            params.push(bias.view_mut().into_dyn());
        }
        params
    }
}

impl LinearGrad {
    /// Gradient views in the order of [`Linear::parameters_mut`]
    pub fn tensors(&self) -> Vec<ArrayViewD<'_, f64>> {
        let mut tensors = vec![self.weight.view().into_dyn()];
        if let Some(bias) = &self.bias {
            tensors.push(bias.view().into_dyn());
        }
        tensors
    }
}

/// Element-wise ReLU; NaN passes through so divergence stays visible
pub fn relu(x: &Array2<f64>) -> Array2<f64> {
    x.mapv(|v| if v < 0.0 { 0.0 } else { v })
}

/// Multiply `grad` by the ReLU derivative at `pre_activation`
pub fn relu_backward(pre_activation: &Array2<f64>, grad: &Array2<f64>) -> Array2<f64> {
    let mut out = grad.clone();
    out.zip_mut_with(pre_activation, |g, &z| {
        if z <= 0.0 {
            *g = 0.0;
        }
    });
    out
}

/// Inverted dropout mask: kept entries are scaled by `1 / (1 - rate)`.
///
/// Returns `None` when `rate` is zero.
pub fn dropout_mask<R: Rng + ?Sized>(
    shape: (usize, usize),
    rate: f64,
    rng: &mut R,
) -> Option<Array2<f64>> {
    if rate <= 0.0 {
        return None;
    }
    let keep = 1.0 / (1.0 - rate);
    Some(Array2::from_shape_fn(shape, |_| {
        if rng.gen::<f64>() >= rate {
            keep
        } else {
            0.0
        }
    }))
}
