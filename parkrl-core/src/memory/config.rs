//! Configuration of [`Memory`](super::Memory).
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Retrieval strategy of the memory store.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    /// Batches are the most recently stored transitions, in temporal order.
    Recent,

    /// Batches are sampled uniformly at random.
    Replay,
}

/// Configuration of [`Memory`](super::Memory).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct MemoryConfig {
    /// Retrieval strategy.
    pub kind: MemoryKind,

    /// Number of transitions the store can hold. When omitted, the minimum
    /// capacity derived from batch size and horizons is used.
    pub capacity: Option<usize>,

    /// Random seed for replay sampling.
    pub seed: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            kind: MemoryKind::Recent,
            capacity: None,
            seed: 42,
        }
    }
}

impl MemoryConfig {
    /// Sets the retrieval strategy.
    pub fn kind(mut self, kind: MemoryKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the capacity.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Sets the sampling seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Constructs [`MemoryConfig`] from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`MemoryConfig`] to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}
