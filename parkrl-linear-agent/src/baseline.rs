//! Linear state-value baseline.
use crate::{biased, LinearBaselineConfig};
use anyhow::Result;
use parkrl_core::{ActionMask, Baseline, BaselineBatch, DiscreteAction, Obs};

/// A separately parametrized linear state-value function.
///
/// Used as the `baseline` of an agent when the value function should not
/// share parameters with the policy; optimized by mean-squared-error
/// regression towards estimated returns.
pub struct LinearBaseline {
    weights: Vec<f32>,
}

impl LinearBaseline {
    /// Builds a zero-initialized baseline.
    pub fn build(config: &LinearBaselineConfig) -> Self {
        Self {
            weights: vec![0.0; config.obs_dim + 1],
        }
    }

    fn predict(&self, features: &[f32]) -> f32 {
        let x = biased(features);
        self.weights.iter().zip(&x).map(|(w, v)| w * v).sum()
    }
}

impl<O: Obs> Baseline<O> for LinearBaseline {
    type Internals = ();

    fn state_value(&self, obs: &O, _internals: &(), _mask: &ActionMask) -> f32 {
        self.predict(obs.features())
    }

    /// The head is action-independent.
    fn action_value(
        &self,
        obs: &O,
        internals: &(),
        mask: &ActionMask,
        _action: &DiscreteAction,
    ) -> f32 {
        Baseline::state_value(self, obs, internals, mask)
    }

    fn optimize(&mut self, batch: BaselineBatch<O, ()>, learning_rate: f64) -> Result<f32> {
        let n = batch.states.len() as f32;
        let lr = learning_rate as f32;
        let mut mse = 0.0;
        for i in 0..batch.states.len() {
            let x = biased(batch.states[i].features());
            let pred: f32 = self.weights.iter().zip(&x).map(|(w, v)| w * v).sum();
            let err = pred - batch.returns[i];
            mse += err * err / n;
            for (w, &v) in self.weights.iter_mut().zip(&x) {
                *w -= lr * 2.0 * err * v / n;
            }
        }
        Ok(mse)
    }
}
