//! Agent runtime: act/observe/experience/update.
//!
//! Couples the per-worker act buffers, the return estimator, the memory
//! store and the policy/baseline pair into the training-facing surface.
mod base;
mod config;

pub use base::{Agent, NoBaseline};
pub use config::{AgentConfig, BaselineOptimizer, BufferMode, Frequency, UpdateConfig, UpdateUnit};
