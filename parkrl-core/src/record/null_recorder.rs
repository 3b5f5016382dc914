//! A recorder that discards all records.
use super::{Record, Recorder};

/// A recorder that discards all records. Useful for tests.
pub struct NullRecorder {}

impl Recorder for NullRecorder {
    fn write(&mut self, _record: Record) {}
}
