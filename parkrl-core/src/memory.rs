//! Storage of return-annotated transitions.
//!
//! Completed, return-annotated transitions are enqueued into a ring store and
//! later retrieved for updates, either as the most recent batch (on-policy)
//! or by uniform sampling (replay). Windowed retrieval around anchor indices
//! supports recurrent-policy lookback and deferred horizon-value completion;
//! windows are clipped at episode boundaries and never cross them.
mod base;
mod config;

pub use base::{Memory, Predecessors, SampledBatch, Successors};
pub use config::{MemoryConfig, MemoryKind};
