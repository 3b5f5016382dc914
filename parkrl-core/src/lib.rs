#![warn(missing_docs)]
//! Core runtime of the parkrl reinforcement learning library.
//!
//! The crate couples a policy/baseline pair to a stream of
//! state/action/reward/terminal tuples: per-worker act buffers collect
//! pending transitions, a return estimator annotates flushed segments with
//! discounted (or TD(λ)/GAE) returns, a memory store holds them for
//! retrieval, and the agent runtime decides when accumulated experience
//! triggers an optimization step. Policy and baseline parametrizations are
//! external; see the `parkrl-linear-agent` crate for a backend-free pair.
pub mod agent;
pub mod error;
pub mod record;

mod base;
mod buffer;
mod estimator;
mod memory;
mod params;
mod trainer;

pub use base::{
    ActionMask, ActionSpec, Baseline, BaselineBatch, DiscreteAction, Env, EnvStep, LossReport,
    Obs, OptimizeOpts, Policy, PolicyBatch, SubActionSpec, Terminal,
};
pub use buffer::{ActBuffer, Segment};
pub use estimator::{
    EstimateAdvantage, Horizon, ReturnConfig, ReturnEstimator, ValuePrediction,
};
pub use memory::{Memory, MemoryConfig, MemoryKind, Predecessors, SampledBatch, Successors};
pub use params::{Clock, Parameter, ScheduleUnit};
pub use trainer::{evaluate, Trainer, TrainerConfig};
