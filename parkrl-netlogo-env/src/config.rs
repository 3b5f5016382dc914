//! Configuration of [`ParkingEnv`](crate::ParkingEnv).
use crate::{FeeActionSet, RewardFunction, SimulatorLink};
use anyhow::Result;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`ParkingEnv`](crate::ParkingEnv).
#[derive(Debug, Deserialize, Serialize)]
pub struct ParkingEnvConfig<L: SimulatorLink> {
    /// Connection configuration of the simulator link.
    pub sim: L::Config,

    /// Priced zones, in report order.
    pub zones: Vec<String>,

    /// Fee action cardinality variant.
    pub action_set: FeeActionSet,

    /// Reward shaping.
    pub reward: RewardFunction,

    /// Lowest allowed fee.
    pub min_fee: f64,

    /// Highest allowed fee.
    pub max_fee: f64,

    /// Simulated hours per episode.
    pub episode_hours: f64,

    /// The episode ends when the raw vehicle count drops below this.
    pub min_cars: f64,
}

impl<L: SimulatorLink> Clone for ParkingEnvConfig<L> {
    fn clone(&self) -> Self {
        Self {
            sim: self.sim.clone(),
            zones: self.zones.clone(),
            action_set: self.action_set,
            reward: self.reward,
            min_fee: self.min_fee,
            max_fee: self.max_fee,
            episode_hours: self.episode_hours,
            min_cars: self.min_cars,
        }
    }
}

impl<L: SimulatorLink> ParkingEnvConfig<L> {
    /// Creates a configuration with the model's default zones and bounds.
    pub fn new(sim: L::Config) -> Self {
        Self {
            sim,
            zones: crate::ZONES.iter().map(|z| z.to_string()).collect(),
            action_set: FeeActionSet::SmallDelta,
            reward: RewardFunction::Occupancy,
            min_fee: 0.0,
            max_fee: 10.0,
            episode_hours: 12.0,
            min_cars: 100.0,
        }
    }

    /// Sets the action set variant.
    pub fn action_set(mut self, v: FeeActionSet) -> Self {
        self.action_set = v;
        self
    }

    /// Sets the reward function.
    pub fn reward(mut self, v: RewardFunction) -> Self {
        self.reward = v;
        self
    }

    /// Sets the episode length in simulated hours.
    pub fn episode_hours(mut self, v: f64) -> Self {
        self.episode_hours = v;
        self
    }

    /// Sets the vehicle-count stop threshold.
    pub fn min_cars(mut self, v: f64) -> Self {
        self.min_cars = v;
        self
    }
}

impl<L: SimulatorLink> ParkingEnvConfig<L>
where
    L::Config: Serialize + DeserializeOwned,
{
    /// Constructs [`ParkingEnvConfig`] from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`ParkingEnvConfig`] to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}
