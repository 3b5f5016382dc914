//! Recording of training metrics.
//!
//! The agent runtime reports loss components, entropy, KL divergence and
//! episode returns as [`Record`]s; a [`Recorder`] decides where they go.
mod base;
mod buffered_recorder;
mod null_recorder;
mod recorder;

pub use base::{Record, RecordValue};
pub use buffered_recorder::BufferedRecorder;
pub use null_recorder::NullRecorder;
pub use recorder::Recorder;
