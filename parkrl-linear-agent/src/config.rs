//! Configurations of the linear policy and baseline.
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`LinearSoftmaxPolicy`](crate::LinearSoftmaxPolicy).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct LinearPolicyConfig {
    /// Number of observation features (without the bias).
    pub obs_dim: usize,
}

impl LinearPolicyConfig {
    /// Creates a configuration for the given feature count.
    pub fn new(obs_dim: usize) -> Self {
        Self { obs_dim }
    }

    /// Constructs [`LinearPolicyConfig`] from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`LinearPolicyConfig`] to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

/// Configuration of [`LinearBaseline`](crate::LinearBaseline).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct LinearBaselineConfig {
    /// Number of observation features (without the bias).
    pub obs_dim: usize,
}

impl LinearBaselineConfig {
    /// Creates a configuration for the given feature count.
    pub fn new(obs_dim: usize) -> Self {
        Self { obs_dim }
    }
}
