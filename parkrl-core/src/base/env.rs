//! Environment.
use super::{ActionMask, ActionSpec, DiscreteAction, Obs, Terminal};
use crate::record::Record;
use anyhow::Result;

/// Result of a single environment step.
pub struct EnvStep<O: Obs> {
    /// Observation after the step.
    pub obs: O,

    /// Scalar reward of the step.
    pub reward: f32,

    /// Terminal marker of the step.
    pub terminal: Terminal,

    /// Additional values reported by the environment, e.g. for logging.
    pub record: Record,
}

/// Represents an environment, typically an MDP driven through a simulator
/// bridge.
pub trait Env {
    /// Configurations.
    type Config: Clone;

    /// Observation of the environment.
    type Obs: Obs;

    /// Builds an environment with a given random seed.
    fn build(config: &Self::Config, seed: i64) -> Result<Self>
    where
        Self: Sized;

    /// Specification of the action space.
    fn action_spec(&self) -> &ActionSpec;

    /// Validity mask for the next action, given the current state.
    fn action_mask(&self) -> ActionMask;

    /// Resets the environment and returns the initial observation.
    fn reset(&mut self) -> Result<Self::Obs>;

    /// Performs an environment step.
    fn step(&mut self, action: &DiscreteAction) -> Result<EnvStep<Self::Obs>>;
}
