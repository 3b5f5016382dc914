//! Discounted-return and advantage estimation over episode segments.
//!
//! Three code paths produce return arrays, chosen by horizon configuration
//! and remaining segment length:
//!
//! - full-episode recursion for `horizon = episode`;
//! - the same iterative recursion for a fixed horizon `n` when the remaining
//!   length is at most `n` (the tail behaves like a full episode seeded with
//!   a horizon value);
//! - a horizon-expansion fold when the remaining length exceeds `n`, which
//!   folds right-to-left `n` times over shifted reward windows.
//!
//! The iterative and expansion paths agree numerically on the
//! `remaining_length == n` boundary; the dispatch picks iterative exactly
//! when `remaining_length <= n` so results never depend on the path taken.
use crate::base::Terminal;
use crate::error::ParkrlError;
use crate::params::{Clock, Parameter};
use serde::{Deserialize, Serialize};

/// Return horizon.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Horizon {
    /// Accumulate until the end of the episode.
    Episode,

    /// Accumulate a fixed number of rewards, then bootstrap.
    Steps(usize),
}

/// When horizon values are predicted by the baseline.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValuePrediction {
    /// At experience time, as soon as the segment is flushed.
    Early,

    /// Deferred until the update that consumes the transition.
    Late,
}

/// Whether and when advantages are estimated.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EstimateAdvantage {
    /// Returns are used as-is.
    No,

    /// Advantage uses the baseline as it was before this update's baseline
    /// step; a separate baseline optimizer then runs after the policy step.
    Early,

    /// Advantage uses the freshly updated baseline; a separate baseline
    /// optimizer runs before the policy step.
    Late,
}

impl Default for EstimateAdvantage {
    fn default() -> Self {
        Self::No
    }
}

fn default_discount() -> Parameter {
    Parameter::Constant(1.0)
}

fn default_trace_decay() -> Parameter {
    Parameter::Constant(1.0)
}

fn default_gae_decay() -> Parameter {
    Parameter::Constant(0.0)
}

/// Configuration of return estimation.
///
/// Unknown keys are rejected at deserialization time; invalid key
/// combinations are rejected when the estimator is built.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ReturnConfig {
    /// Return horizon.
    pub horizon: Horizon,

    /// Reward discount per timestep.
    #[serde(default = "default_discount")]
    pub discount: Parameter,

    /// When horizon values are predicted. Defaults to `early` for the
    /// episode horizon, `late` for a fixed horizon, and no prediction at all
    /// when there is no baseline to predict with.
    #[serde(default)]
    pub predict_horizon_values: Option<ValuePrediction>,

    /// Whether to bootstrap natural terminals too (otherwise only aborts).
    #[serde(default)]
    pub predict_terminal_values: bool,

    /// Predict action values instead of state values.
    #[serde(default)]
    pub predict_action_values: bool,

    /// Whether and when advantages are estimated.
    #[serde(default)]
    pub estimate_advantage: EstimateAdvantage,

    /// TD(λ) trace decay; 1.0 disables blending.
    #[serde(default = "default_trace_decay")]
    pub trace_decay: Parameter,

    /// Generalized advantage estimation decay; 0.0 disables GAE.
    #[serde(default = "default_gae_decay")]
    pub gae_decay: Parameter,
}

impl Default for ReturnConfig {
    fn default() -> Self {
        Self {
            horizon: Horizon::Episode,
            discount: default_discount(),
            predict_horizon_values: None,
            predict_terminal_values: false,
            predict_action_values: false,
            estimate_advantage: EstimateAdvantage::No,
            trace_decay: default_trace_decay(),
            gae_decay: default_gae_decay(),
        }
    }
}

impl ReturnConfig {
    /// Sets the horizon.
    pub fn horizon(mut self, v: Horizon) -> Self {
        self.horizon = v;
        self
    }

    /// Sets the discount.
    pub fn discount(mut self, v: impl Into<Parameter>) -> Self {
        self.discount = v.into();
        self
    }

    /// Sets when horizon values are predicted.
    pub fn predict_horizon_values(mut self, v: Option<ValuePrediction>) -> Self {
        self.predict_horizon_values = v;
        self
    }

    /// Sets whether natural terminals are bootstrapped.
    pub fn predict_terminal_values(mut self, v: bool) -> Self {
        self.predict_terminal_values = v;
        self
    }

    /// Sets whether action values are predicted instead of state values.
    pub fn predict_action_values(mut self, v: bool) -> Self {
        self.predict_action_values = v;
        self
    }

    /// Sets advantage estimation.
    pub fn estimate_advantage(mut self, v: EstimateAdvantage) -> Self {
        self.estimate_advantage = v;
        self
    }

    /// Sets the TD(λ) trace decay.
    pub fn trace_decay(mut self, v: impl Into<Parameter>) -> Self {
        self.trace_decay = v.into();
        self
    }

    /// Sets the GAE decay.
    pub fn gae_decay(mut self, v: impl Into<Parameter>) -> Self {
        self.gae_decay = v.into();
        self
    }
}

/// Computes return arrays from reward/terminal segments and baseline
/// predictions.
///
/// All methods are pure with respect to the passed inputs; the estimator
/// itself only holds resolved configuration.
pub struct ReturnEstimator {
    horizon: Horizon,
    discount: Parameter,
    predict: Option<ValuePrediction>,
    predict_terminal_values: bool,
    predict_action_values: bool,
    estimate_advantage: EstimateAdvantage,
    trace_decay: Parameter,
    gae_decay: Parameter,
}

impl ReturnEstimator {
    /// Builds an estimator, validating key combinations.
    ///
    /// `predict` is the resolved prediction time (the caller applies the
    /// baseline-dependent default); `baseline_past_horizon` is the baseline's
    /// recurrent lookback; `recent_memory` tells whether batches preserve
    /// temporal order; `advantage_in_loss` marks the shared-optimizer
    /// advantage mode.
    pub fn build(
        config: &ReturnConfig,
        predict: Option<ValuePrediction>,
        baseline_past_horizon: usize,
        recent_memory: bool,
        advantage_in_loss: bool,
    ) -> Result<Self, ParkrlError> {
        if let (Horizon::Episode, Some(ValuePrediction::Late)) = (config.horizon, predict) {
            return Err(ParkrlError::config(
                "reward_estimation.predict_horizon_values",
                "late value prediction requires a fixed horizon",
            ));
        }
        if !config.trace_decay.is_constant(1.0) {
            if predict != Some(ValuePrediction::Early) {
                return Err(ParkrlError::config(
                    "reward_estimation.trace_decay",
                    "trace decay other than 1.0 requires early horizon-value prediction",
                ));
            }
            if baseline_past_horizon > 0 {
                return Err(ParkrlError::config(
                    "reward_estimation.trace_decay",
                    "trace decay other than 1.0 requires a baseline without recurrent lookback",
                ));
            }
        }
        if !config.gae_decay.is_constant(0.0) {
            if config.estimate_advantage == EstimateAdvantage::No {
                return Err(ParkrlError::config(
                    "reward_estimation.gae_decay",
                    "GAE decay requires advantage estimation",
                ));
            }
            if !recent_memory {
                return Err(ParkrlError::config(
                    "reward_estimation.gae_decay",
                    "GAE decay requires recent memory, so batches stay in temporal order",
                ));
            }
            if advantage_in_loss {
                return Err(ParkrlError::config(
                    "reward_estimation.gae_decay",
                    "GAE decay is incompatible with advantage-in-loss mode",
                ));
            }
        }
        Ok(Self {
            horizon: config.horizon,
            discount: config.discount.clone(),
            predict,
            predict_terminal_values: config.predict_terminal_values,
            predict_action_values: config.predict_action_values,
            estimate_advantage: config.estimate_advantage,
            trace_decay: config.trace_decay.clone(),
            gae_decay: config.gae_decay.clone(),
        })
    }

    /// Return horizon.
    pub fn horizon(&self) -> Horizon {
        self.horizon
    }

    /// Resolved horizon-value prediction time.
    pub fn predict(&self) -> Option<ValuePrediction> {
        self.predict
    }

    /// Whether action values are predicted instead of state values.
    pub fn predict_action_values(&self) -> bool {
        self.predict_action_values
    }

    /// Whether natural terminals are bootstrapped too.
    pub fn predict_terminal_values(&self) -> bool {
        self.predict_terminal_values
    }

    /// Whether and when advantages are estimated.
    pub fn estimate_advantage(&self) -> EstimateAdvantage {
        self.estimate_advantage
    }

    /// Whether GAE post-processing is active under the given clock.
    pub fn gae_enabled(&self, clock: &Clock) -> bool {
        self.gae_decay.value(clock) != 0.0
    }

    /// Whether TD(λ) blending is inactive under the given clock.
    pub fn trace_is_one(&self, clock: &Clock) -> bool {
        self.trace_decay.value(clock) == 1.0
    }

    /// Whether segments need per-position baseline predictions attached
    /// before return computation.
    pub fn wants_values(&self) -> bool {
        self.predict == Some(ValuePrediction::Early)
    }

    /// Computes the return array for a flushed segment ending in a terminal.
    ///
    /// `values[i]` must hold the baseline prediction anchored at segment
    /// position `i` when early prediction is enabled, and may be `None`
    /// otherwise.
    pub fn segment_returns(
        &self,
        reward: &[f32],
        terminal: &[Terminal],
        clock: &Clock,
        values: Option<&[f32]>,
    ) -> Vec<f32> {
        let len = reward.len();
        if len == 0 {
            return Vec::new();
        }
        debug_assert_eq!(len, terminal.len());
        if let Some(values) = values {
            debug_assert_eq!(len, values.len());
        }
        let discount = self.discount.value(clock) as f32;
        let lambda = self.trace_decay.value(clock) as f32;
        match self.horizon {
            Horizon::Episode => self.returns_iterative(reward, terminal, discount, lambda, values),
            Horizon::Steps(n) => {
                // Both paths agree at len == n; iterative iff remaining <= n.
                if len <= n {
                    self.returns_iterative(reward, terminal, discount, lambda, values)
                } else {
                    self.returns_parallel(reward, terminal, n, discount, lambda, values)
                }
            }
        }
    }

    /// Seed of the reverse fold at the terminal position.
    ///
    /// The seed is re-multiplied by the discount during the fold, hence the
    /// division: with a predicted terminal value `v`, the fold reproduces
    /// `return[last] = v`; without prediction the last return collapses to
    /// the raw reward (natural) or zero pending late completion (abort).
    fn terminal_seed(
        &self,
        terminal: Terminal,
        last_reward: f32,
        predicted: Option<f32>,
        discount: f32,
    ) -> f32 {
        if !self.predict_terminal_values && terminal.is_natural() {
            return 0.0;
        }
        if discount == 0.0 {
            return 0.0;
        }
        match predicted {
            Some(v) => (v - last_reward) / discount,
            None => -last_reward / discount,
        }
    }

    /// Iterative recursion `return[t] = reward[t] + γ·return[t+1]`, seeded at
    /// the terminal. Used for the episode horizon and for fixed-horizon
    /// segments no longer than the horizon.
    fn returns_iterative(
        &self,
        reward: &[f32],
        terminal: &[Terminal],
        discount: f32,
        lambda: f32,
        values: Option<&[f32]>,
    ) -> Vec<f32> {
        let len = reward.len();
        let last = len - 1;
        let predicted = match self.predict {
            Some(ValuePrediction::Early) => Some(values.expect("early prediction needs values")[last]),
            _ => None,
        };
        let seed = self.terminal_seed(terminal[last], reward[last], predicted, discount);

        let mut returns = vec![0.0; len];
        let mut acc = seed;
        if lambda == 1.0 {
            for t in (0..len).rev() {
                acc = reward[t] + discount * acc;
                returns[t] = acc;
            }
        } else {
            let values = values.expect("trace decay other than 1.0 needs values");
            for t in (0..len).rev() {
                let next_value = if t == last { seed } else { values[t + 1] };
                let blended = (1.0 - lambda) * next_value + lambda * acc;
                acc = reward[t] + discount * blended;
                returns[t] = acc;
            }
        }
        returns
    }

    /// Horizon-expansion fold for segments longer than the fixed horizon:
    /// rewards and values are expanded by `n` positions and folded
    /// right-to-left `n` times.
    fn returns_parallel(
        &self,
        reward: &[f32],
        terminal: &[Terminal],
        n: usize,
        discount: f32,
        lambda: f32,
        values: Option<&[f32]>,
    ) -> Vec<f32> {
        let len = reward.len();
        let last = len - 1;
        let natural = terminal[last].is_natural();

        // Expanded reward sequence: the last reward is replaced by the
        // terminal value, then padded so every fold window is full.
        let mut expanded_reward = Vec::with_capacity(len + n);
        expanded_reward.extend_from_slice(&reward[..last]);
        // Horizon values aligned with the fold accumulator.
        let horizon_values: Vec<f32>;
        // Per-position next values for TD(λ) blending.
        let mut expanded_values: Vec<f32> = Vec::new();

        match self.predict {
            Some(ValuePrediction::Early) => {
                let values = values.expect("early prediction needs values");
                if lambda == 1.0 {
                    let terminal_value = if !self.predict_terminal_values && natural {
                        reward[last]
                    } else {
                        values[last]
                    };
                    expanded_reward.push(terminal_value);
                    expanded_reward.extend(std::iter::repeat(0.0).take(n - 1));
                    let mut hv = values[n..].to_vec();
                    hv.extend(std::iter::repeat(0.0).take(n));
                    horizon_values = hv;
                } else {
                    let terminal_value = if !self.predict_terminal_values && natural {
                        reward[last]
                    } else {
                        values[last]
                    };
                    expanded_reward.push(terminal_value);
                    expanded_reward.extend(std::iter::repeat(0.0).take(n - 1));
                    expanded_values = values[1..].to_vec();
                    expanded_values.extend(std::iter::repeat(0.0).take(n));
                    horizon_values = expanded_values[n - 1..].to_vec();
                }
            }
            _ => {
                // Values arrive late or not at all; the fold works over
                // rewards alone and the bootstrap is added at update time.
                debug_assert_eq!(lambda, 1.0);
                let terminal_value = if !self.predict_terminal_values && natural {
                    reward[last]
                } else {
                    0.0
                };
                expanded_reward.push(terminal_value);
                expanded_reward.extend(std::iter::repeat(0.0).take(n));
                horizon_values = vec![0.0; len];
            }
        }

        let mut returns = horizon_values;
        for index in (0..n).rev() {
            if lambda == 1.0 {
                for t in 0..len {
                    returns[t] = expanded_reward[index + t] + discount * returns[t];
                }
            } else {
                for t in 0..len {
                    let blended = (1.0 - lambda) * expanded_values[index + t]
                        + lambda * returns[t];
                    returns[t] = expanded_reward[index + t] + discount * blended;
                }
            }
        }
        returns
    }

    /// Computes returns for `num_complete` horizon-complete timesteps of a
    /// still-running episode (circular buffer mode).
    ///
    /// `reward` holds the observed undrained rewards except the newest one.
    /// With early prediction and λ = 1, `values[j]` is the baseline
    /// prediction `horizon` steps after completed position `j`
    /// (`num_complete` entries); with λ ≠ 1 it holds predictions at every
    /// position after the first (`reward.len()` entries).
    pub fn streaming_returns(
        &self,
        reward: &[f32],
        num_complete: usize,
        clock: &Clock,
        values: Option<&[f32]>,
    ) -> Vec<f32> {
        let n = match self.horizon {
            Horizon::Steps(n) => n,
            Horizon::Episode => unreachable!("streaming returns need a fixed horizon"),
        };
        debug_assert!(reward.len() >= num_complete + n - 1);
        let discount = self.discount.value(clock) as f32;
        let lambda = self.trace_decay.value(clock) as f32;

        let (horizon_values, expanded_values): (Vec<f32>, Vec<f32>) = match self.predict {
            Some(ValuePrediction::Early) => {
                let values = values.expect("early prediction needs values");
                if lambda == 1.0 {
                    debug_assert_eq!(values.len(), num_complete);
                    (values.to_vec(), Vec::new())
                } else {
                    debug_assert_eq!(values.len(), reward.len());
                    (values[n - 1..n - 1 + num_complete].to_vec(), values.to_vec())
                }
            }
            _ => {
                debug_assert_eq!(lambda, 1.0);
                (vec![0.0; num_complete], Vec::new())
            }
        };

        let mut returns = horizon_values;
        for index in (0..n).rev() {
            if lambda == 1.0 {
                for j in 0..num_complete {
                    returns[j] = reward[index + j] + discount * returns[j];
                }
            } else {
                for j in 0..num_complete {
                    let blended =
                        (1.0 - lambda) * expanded_values[index + j] + lambda * returns[j];
                    returns[j] = reward[index + j] + discount * blended;
                }
            }
        }
        returns
    }

    /// Adds deferred horizon values to sampled returns.
    ///
    /// `offsets[i]` is the distance to the window's final element (clipped at
    /// the episode boundary); `terminal[i]` is that element's terminal
    /// marker. Windows ending in a natural terminal receive no bootstrap
    /// unless terminal values are predicted.
    pub fn complete_returns(
        &self,
        returns: &mut [f32],
        offsets: &[usize],
        terminal: &[Terminal],
        horizon_values: &[f32],
        clock: &Clock,
    ) {
        debug_assert_eq!(returns.len(), offsets.len());
        debug_assert_eq!(returns.len(), horizon_values.len());
        let discount = self.discount.value(clock) as f32;
        for i in 0..returns.len() {
            if !self.predict_terminal_values && terminal[i].is_natural() {
                continue;
            }
            returns[i] += discount.powi(offsets[i] as i32) * horizon_values[i];
        }
    }

    /// GAE post-processing of an advantage array in temporal order, reset at
    /// episode boundaries.
    pub fn gae_advantages(&self, advantages: &mut [f32], terminal: &[Terminal], clock: &Clock) {
        debug_assert_eq!(advantages.len(), terminal.len());
        let decay = (self.discount.value(clock) * self.gae_decay.value(clock)) as f32;
        let mut acc = 0.0;
        for t in (0..advantages.len()).rev() {
            if terminal[t].is_terminal() {
                acc = 0.0;
            }
            advantages[t] += decay * acc;
            acc = advantages[t];
        }
    }
}
