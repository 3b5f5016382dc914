//! Recorder.
use super::Record;

/// Writes records somewhere, e.g. a log, a CSV exporter or nowhere.
pub trait Recorder {
    /// Writes a record.
    fn write(&mut self, record: Record);
}
