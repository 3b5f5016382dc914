//! Policy and baseline function contracts.
//!
//! The runtime is polymorphic over whether the baseline is the policy object
//! itself (shared parametrization) or a separate function. That choice changes
//! which loss terms get combined in an update, not the return-estimation math.
use super::{ActionMask, DiscreteAction, Obs};
use anyhow::Result;
use rand::rngs::StdRng;
use std::fmt::Debug;

/// A batch of transitions prepared for an optimization step.
///
/// `rewards` carries estimated returns, or advantages when advantage
/// estimation is enabled.
pub struct PolicyBatch<'a, O: Obs, I> {
    /// States at the batch anchors.
    pub states: &'a [O],

    /// Recurrent carry going into each anchor.
    pub internals: &'a [I],

    /// Action validity masks at each anchor.
    pub masks: &'a [ActionMask],

    /// Actions taken at each anchor.
    pub actions: &'a [DiscreteAction],

    /// Return or advantage targets.
    pub rewards: &'a [f32],
}

/// A batch of transitions prepared for a baseline regression step.
pub struct BaselineBatch<'a, O: Obs, I> {
    /// States at the batch anchors.
    pub states: &'a [O],

    /// Recurrent carry going into each anchor.
    pub internals: &'a [I],

    /// Action validity masks at each anchor.
    pub masks: &'a [ActionMask],

    /// Actions taken at each anchor.
    pub actions: &'a [DiscreteAction],

    /// Estimated returns to regress on.
    pub returns: &'a [f32],
}

/// Scalar inputs of an optimization step, resolved from the agent schedules.
#[derive(Clone, Copy, Debug)]
pub struct OptimizeOpts {
    /// Current learning rate.
    pub learning_rate: f64,

    /// Weight of the entropy bonus (subtracted from the loss).
    pub entropy_weight: f64,

    /// Weight of the L2 penalty on trainable parameters.
    pub l2_weight: f64,

    /// Weight of the baseline loss when the baseline shares the optimizer;
    /// `None` when the baseline is optimized separately or absent.
    pub baseline_loss_weight: Option<f64>,
}

/// Loss components of an optimization step, for tracking.
#[derive(Clone, Copy, Debug)]
pub struct LossReport {
    /// Objective (policy-gradient) loss.
    pub objective_loss: f32,

    /// Entropy and L2 regularization loss.
    pub regularization_loss: f32,

    /// Baseline loss, when folded into the same step.
    pub baseline_loss: Option<f32>,
}

impl LossReport {
    /// Total loss of the step.
    pub fn total(&self) -> f32 {
        self.objective_loss + self.regularization_loss + self.baseline_loss.unwrap_or(0.0)
    }
}

/// A trainable policy.
///
/// Implementations own their parametrization; the runtime only relies on this
/// call contract. All methods are synchronous and deterministic given their
/// inputs and the policy parameters (plus the passed RNG for sampling).
pub trait Policy<O: Obs> {
    /// Recurrent carry threaded through an episode. `()` for feedforward
    /// policies.
    type Internals: Clone + Debug;

    /// Snapshot of the action distribution at a state, used as the fixed
    /// reference of KL-divergence tracking across an update.
    type Dist: Clone;

    /// Carry at the start of an episode.
    fn initial_internals(&self) -> Self::Internals;

    /// Number of previous states the policy depends on.
    fn past_horizon(&self, _on_policy: bool) -> usize {
        0
    }

    /// Samples an action (or takes the mode when `deterministic`) and returns
    /// the carry for the next step. Must never select a masked-out level.
    fn act(
        &mut self,
        obs: &O,
        internals: &Self::Internals,
        mask: &ActionMask,
        deterministic: bool,
        rng: &mut StdRng,
    ) -> (DiscreteAction, Self::Internals);

    /// Snapshot of the action distribution at a state.
    fn distribution(&self, obs: &O, internals: &Self::Internals, mask: &ActionMask) -> Self::Dist;

    /// Entropy of the action distribution at a state.
    fn entropy(&self, obs: &O, internals: &Self::Internals, mask: &ActionMask) -> f32;

    /// KL divergence of the current distribution from a reference snapshot.
    fn kl_divergence(
        &self,
        obs: &O,
        internals: &Self::Internals,
        mask: &ActionMask,
        reference: &Self::Dist,
    ) -> f32;

    /// Performs a gradient step on the batch and reports loss components.
    fn optimize(&mut self, batch: PolicyBatch<O, Self::Internals>, opts: &OptimizeOpts)
        -> Result<LossReport>;

    /// Adds Gaussian noise to the trainable parameters and returns it, so it
    /// can be removed with [`Policy::unperturb`] after acting. Parameterless
    /// policies return an empty vector.
    fn perturb(&mut self, _stddev: f64, _rng: &mut StdRng) -> Vec<f32> {
        Vec::new()
    }

    /// Removes noise previously added by [`Policy::perturb`].
    fn unperturb(&mut self, _noise: &[f32]) {}
}

/// A state- or action-value function.
pub trait Baseline<O: Obs> {
    /// Recurrent carry threaded through an episode.
    type Internals: Clone + Debug;

    /// Number of previous states the baseline depends on.
    fn past_horizon(&self, _on_policy: bool) -> usize {
        0
    }

    /// Predicted value of a state.
    fn state_value(&self, obs: &O, internals: &Self::Internals, mask: &ActionMask) -> f32;

    /// Predicted value of a state-action pair.
    fn action_value(
        &self,
        obs: &O,
        internals: &Self::Internals,
        mask: &ActionMask,
        action: &DiscreteAction,
    ) -> f32;

    /// Performs a regression step towards the returns and reports the loss.
    fn optimize(&mut self, batch: BaselineBatch<O, Self::Internals>, learning_rate: f64)
        -> Result<f32>;
}
