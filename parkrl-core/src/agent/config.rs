//! Configuration of [`Agent`](super::Agent).
use crate::error::ParkrlError;
use crate::estimator::ReturnConfig;
use crate::memory::MemoryConfig;
use crate::params::Parameter;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Unit in which update accumulation is counted.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UpdateUnit {
    /// Observed environment timesteps.
    Timesteps,

    /// Completed episodes.
    Episodes,
}

/// Update frequency.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    /// Updates are never triggered automatically.
    Never,

    /// Every `n` units.
    Units(usize),

    /// A fraction (0, 1] of the batch size.
    Fraction(f64),
}

/// Update scheduling.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct UpdateConfig {
    /// Unit of batch size, frequency and start.
    pub unit: UpdateUnit,

    /// Batch size per update, in units.
    pub batch_size: usize,

    /// Update frequency; defaults to the batch size.
    #[serde(default)]
    pub frequency: Option<Frequency>,

    /// Number of units to collect before the first update, on top of the
    /// horizon-derived warm-up.
    #[serde(default)]
    pub start: usize,
}

impl UpdateConfig {
    /// Creates an update configuration with the given unit and batch size.
    pub fn new(unit: UpdateUnit, batch_size: usize) -> Self {
        Self {
            unit,
            batch_size,
            frequency: None,
            start: 0,
        }
    }

    /// Sets the frequency.
    pub fn frequency(mut self, v: Frequency) -> Self {
        self.frequency = Some(v);
        self
    }

    /// Sets the start offset.
    pub fn start(mut self, v: usize) -> Self {
        self.start = v;
        self
    }

    /// Resolves the frequency to units; `None` means never.
    pub(super) fn resolved_frequency(&self) -> Result<Option<usize>, ParkrlError> {
        match self.frequency {
            None => Ok(Some(self.batch_size)),
            Some(Frequency::Never) => Ok(None),
            Some(Frequency::Units(u)) => {
                if u == 0 {
                    Err(ParkrlError::config(
                        "update.frequency",
                        "frequency must be at least 1",
                    ))
                } else {
                    Ok(Some(u))
                }
            }
            Some(Frequency::Fraction(f)) => {
                if f <= 0.0 || f > 1.0 {
                    Err(ParkrlError::config(
                        "update.frequency",
                        format!("fraction {} is not in (0.0, 1.0]", f),
                    ))
                } else {
                    Ok(Some(((f * self.batch_size as f64) as usize).max(1)))
                }
            }
        }
    }
}

/// How per-act observations are buffered before return estimation.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BufferMode {
    /// Buffer whole episodes; returns are computed at the terminal.
    Episode,

    /// Buffer a bounded window and drain horizon-complete timesteps while
    /// the episode is still running. Single-worker, fixed-horizon only.
    Steps(usize),
}

impl Default for BufferMode {
    fn default() -> Self {
        Self::Episode
    }
}

/// How the baseline is optimized.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum BaselineOptimizer {
    /// No dedicated baseline optimization. With a separate baseline this
    /// resolves to a unit-weight separate step after the policy update.
    None,

    /// The baseline shares the policy optimizer; its loss enters the policy
    /// loss with this weight. Requires a shared (policy-as-baseline)
    /// parametrization.
    Weight(f64),

    /// A separate regression step on the baseline parameters.
    Separate,
}

impl Default for BaselineOptimizer {
    fn default() -> Self {
        Self::None
    }
}

fn default_parallel() -> usize {
    1
}

fn zero() -> Parameter {
    Parameter::Constant(0.0)
}

fn default_learning_rate() -> Parameter {
    Parameter::Constant(1e-3)
}

fn default_seed() -> u64 {
    42
}

/// Configuration of [`Agent`](super::Agent).
///
/// This is the declarative agent specification consumed at construction
/// time; it can be loaded from and saved to YAML.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct AgentConfig {
    /// Number of parallel environment workers.
    #[serde(default = "default_parallel")]
    pub parallel_interactions: usize,

    /// Upper bound on episode length, when known.
    #[serde(default)]
    pub max_episode_timesteps: Option<usize>,

    /// Observation buffering mode.
    #[serde(default)]
    pub buffer_observe: BufferMode,

    /// Update scheduling.
    pub update: UpdateConfig,

    /// Memory store configuration.
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Return estimation configuration.
    pub reward_estimation: ReturnConfig,

    /// Exploration rate: probability of resampling each sub-action
    /// uniformly over its valid levels.
    #[serde(default = "zero")]
    pub exploration: Parameter,

    /// Standard deviation of Gaussian parameter noise applied while acting.
    #[serde(default = "zero")]
    pub variable_noise: Parameter,

    /// Entropy regularization weight.
    #[serde(default = "zero")]
    pub entropy_regularization: Parameter,

    /// L2 regularization weight.
    #[serde(default = "zero")]
    pub l2_regularization: Parameter,

    /// Learning rate handed to the policy optimizer.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: Parameter,

    /// Baseline optimization mode.
    #[serde(default)]
    pub baseline_optimizer: BaselineOptimizer,

    /// Random seed of the runtime.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl AgentConfig {
    /// Creates a configuration with the given update scheduling and return
    /// estimation, defaults elsewhere.
    pub fn new(update: UpdateConfig, reward_estimation: ReturnConfig) -> Self {
        Self {
            parallel_interactions: default_parallel(),
            max_episode_timesteps: None,
            buffer_observe: BufferMode::default(),
            update,
            memory: MemoryConfig::default(),
            reward_estimation,
            exploration: zero(),
            variable_noise: zero(),
            entropy_regularization: zero(),
            l2_regularization: zero(),
            learning_rate: default_learning_rate(),
            baseline_optimizer: BaselineOptimizer::default(),
            seed: default_seed(),
        }
    }

    /// Sets the number of parallel workers.
    pub fn parallel_interactions(mut self, v: usize) -> Self {
        self.parallel_interactions = v;
        self
    }

    /// Sets the maximum episode length.
    pub fn max_episode_timesteps(mut self, v: usize) -> Self {
        self.max_episode_timesteps = Some(v);
        self
    }

    /// Sets the buffering mode.
    pub fn buffer_observe(mut self, v: BufferMode) -> Self {
        self.buffer_observe = v;
        self
    }

    /// Sets the memory configuration.
    pub fn memory(mut self, v: MemoryConfig) -> Self {
        self.memory = v;
        self
    }

    /// Sets the exploration rate.
    pub fn exploration(mut self, v: impl Into<Parameter>) -> Self {
        self.exploration = v.into();
        self
    }

    /// Sets the variable-noise stddev.
    pub fn variable_noise(mut self, v: impl Into<Parameter>) -> Self {
        self.variable_noise = v.into();
        self
    }

    /// Sets the entropy regularization weight.
    pub fn entropy_regularization(mut self, v: impl Into<Parameter>) -> Self {
        self.entropy_regularization = v.into();
        self
    }

    /// Sets the L2 regularization weight.
    pub fn l2_regularization(mut self, v: impl Into<Parameter>) -> Self {
        self.l2_regularization = v.into();
        self
    }

    /// Sets the learning rate.
    pub fn learning_rate(mut self, v: impl Into<Parameter>) -> Self {
        self.learning_rate = v.into();
        self
    }

    /// Sets the baseline optimization mode.
    pub fn baseline_optimizer(mut self, v: BaselineOptimizer) -> Self {
        self.baseline_optimizer = v;
        self
    }

    /// Sets the random seed.
    pub fn seed(mut self, v: u64) -> Self {
        self.seed = v;
        self
    }

    /// Constructs [`AgentConfig`] from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`AgentConfig`] to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::Horizon;

    #[test]
    fn frequency_resolution() {
        let update = UpdateConfig::new(UpdateUnit::Timesteps, 20);
        assert_eq!(update.resolved_frequency().unwrap(), Some(20));
        let update = update.frequency(Frequency::Never);
        assert_eq!(update.resolved_frequency().unwrap(), None);
        let update = UpdateConfig::new(UpdateUnit::Timesteps, 20).frequency(Frequency::Fraction(0.25));
        assert_eq!(update.resolved_frequency().unwrap(), Some(5));
        let update = UpdateConfig::new(UpdateUnit::Timesteps, 20).frequency(Frequency::Fraction(1.5));
        assert!(update.resolved_frequency().is_err());
        let update = UpdateConfig::new(UpdateUnit::Timesteps, 20).frequency(Frequency::Units(0));
        assert!(update.resolved_frequency().is_err());
    }

    #[test]
    fn yaml_round_trip() {
        let config = AgentConfig::new(
            UpdateConfig::new(UpdateUnit::Episodes, 4),
            ReturnConfig::default().horizon(Horizon::Episode).discount(0.99),
        )
        .max_episode_timesteps(24)
        .exploration(0.1);
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: AgentConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config, parsed);
    }
}
