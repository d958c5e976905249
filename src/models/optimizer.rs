//! Adam optimiser over a flat list of parameter tensors

use crate::error::{DetectionError, Result};
use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, Zip};
use serde::{Deserialize, Serialize};

/// Adam with bias correction.
///
/// Moment buffers are allocated on the first step and must line up with the
/// parameter order on every later step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adam {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    /// Number of completed steps
    pub step: u64,
    first_moments: Vec<ArrayD<f64>>,
    second_moments: Vec<ArrayD<f64>>,
}

impl Adam {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            step: 0,
            first_moments: Vec::new(),
            second_moments: Vec::new(),
        }
    }

    /// Apply one update to `params` using `grads` (same order and shapes)
    pub fn step(
        &mut self,
        params: Vec<ArrayViewMutD<'_, f64>>,
        grads: Vec<ArrayViewD<'_, f64>>,
    ) -> Result<()> {
        if params.len() != grads.len() {
            return Err(DetectionError::DimensionMismatch {
                expected: params.len(),
                actual: grads.len(),
            });
        }
        for (param, grad) in params.iter().zip(&grads) {
            if param.shape() != grad.shape() {
                return Err(DetectionError::DimensionMismatch {
                    expected: param.len(),
                    actual: grad.len(),
                });
            }
        }
        if self.first_moments.is_empty() {
            self.first_moments = grads.iter().map(|g| ArrayD::zeros(g.raw_dim())).collect();
            self.second_moments = self.first_moments.clone();
        }
        if self.first_moments.len() != params.len()
            || self
                .first_moments
                .iter()
                .zip(&grads)
                .any(|(m, g)| m.shape() != g.shape())
        {
            return Err(DetectionError::DimensionMismatch {
                expected: self.first_moments.len(),
                actual: params.len(),
            });
        }

        self.step += 1;
        let t = self.step as i32;
        let bias1 = 1.0 - self.beta1.powi(t);
        let bias2 = 1.0 - self.beta2.powi(t);
        let (beta1, beta2, lr, eps) = (self.beta1, self.beta2, self.learning_rate, self.epsilon);

        for (((mut param, grad), m), v) in params
            .into_iter()
            .zip(grads)
            .zip(self.first_moments.iter_mut())
            .zip(self.second_moments.iter_mut())
        {
            Zip::from(&mut param)
                .and(&grad)
                .and(m)
                .and(v)
                .for_each(|p, &g, m, v| {
                    *m = beta1 * *m + (1.0 - beta1) * g;
                    *v = beta2 * *v + (1.0 - beta2) * g * g;
                    let m_hat = *m / bias1;
                    let v_hat = *v / bias2;
                    *p -= lr * m_hat / (v_hat.sqrt() + eps);
                });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_first_step_moves_by_learning_rate() {
        let mut weights = array![1.0, -2.0].into_dyn();
        let grads = array![0.5, -3.0].into_dyn();
        let mut adam = Adam::new(0.1);

        adam.step(vec![weights.view_mut()], vec![grads.view()]).unwrap();

        // bias-corrected first step is lr * sign(g)
        assert_abs_diff_eq!(weights[[0]], 0.9, epsilon = 1e-6);
        assert_abs_diff_eq!(weights[[1]], -1.9, epsilon = 1e-6);
        assert_eq!(adam.step, 1);
    }

    #[test]
    fn test_step_counter_is_per_step() {
        let mut a = array![[1.0, 1.0]].into_dyn();
        let mut b = array![1.0].into_dyn();
        let ga = array![[1.0, 1.0]].into_dyn();
        let gb = array![1.0].into_dyn();
        let mut adam = Adam::new(0.01);

        for _ in 0..3 {
            adam.step(vec![a.view_mut(), b.view_mut()], vec![ga.view(), gb.view()])
                .unwrap();
        }
        assert_eq!(adam.step, 3);
    }

    #[test]
    fn test_minimises_quadratic() {
        let mut x = array![5.0].into_dyn();
        let mut adam = Adam::new(0.1);
        for _ in 0..500 {
            let grad = x.mapv(|v| 2.0 * v);
            adam.step(vec![x.view_mut()], vec![grad.view()]).unwrap();
        }
        assert!(x[[0]].abs() < 0.5);
    }

    #[test]
    fn test_shape_mismatch() {
        let mut x = array![1.0, 2.0].into_dyn();
        let g = array![1.0].into_dyn();
        let mut adam = Adam::new(0.1);
        assert!(adam.step(vec![x.view_mut()], vec![g.view()]).is_err());
        assert_eq!(adam.step, 0);
        assert_eq!(x, array![1.0, 2.0].into_dyn());
    }

    #[test]
    fn test_state_roundtrip() {
        let mut x = array![1.0].into_dyn();
        let g = array![0.3].into_dyn();
        let mut adam = Adam::new(0.05);
        adam.step(vec![x.view_mut()], vec![g.view()]).unwrap();

        let json = serde_json::to_string(&adam).unwrap();
        let restored: Adam = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, adam);
    }
}
