//! Bridge to the external simulator process.
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Textual command/report contract of the simulator bridge.
///
/// The real implementation talks to a NetLogo workspace over its scripting
/// interface; the environment only depends on this trait, so tests run
/// against [`MockSimulator`] instead. Commands mutate simulator state,
/// reports read back scalars.
pub trait SimulatorLink {
    /// Connection configuration.
    type Config: Clone;

    /// Opens the link.
    fn connect(config: &Self::Config, seed: i64) -> Result<Self>
    where
        Self: Sized;

    /// Executes a command.
    fn command(&mut self, cmd: &str) -> Result<()>;

    /// Executes a command `n` times.
    fn repeat_command(&mut self, cmd: &str, n: usize) -> Result<()> {
        for _ in 0..n {
            self.command(cmd)?;
        }
        Ok(())
    }

    /// Reads a scalar report.
    fn report(&mut self, reporter: &str) -> Result<f64>;
}

/// Configuration of [`MockSimulator`].
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct MockSimulatorConfig {
    /// Number of simulated vehicles after `setup`.
    pub initial_cars: f64,

    /// Whether the model has a garage.
    pub garage: bool,

    /// Half-hour ticks per simulated hour.
    pub temporal_resolution: f64,
}

impl Default for MockSimulatorConfig {
    fn default() -> Self {
        Self {
            initial_cars: 500.0,
            garage: false,
            temporal_resolution: 24.0,
        }
    }
}

/// A scripted in-process stand-in for the simulator bridge.
///
/// Implements a crude occupancy response to fee changes (higher fees push
/// occupancy down) and a slow decay of the vehicle count, which is enough to
/// exercise the full environment/agent loop in tests.
pub struct MockSimulator {
    config: MockSimulatorConfig,
    rng: fastrand::Rng,
    ticks: f64,
    n_cars: f64,
    fees: Vec<f64>,
    occupancy: Vec<f64>,

    /// Every command received, for inspection in tests.
    pub command_log: Vec<String>,
}

impl MockSimulator {
    fn setup(&mut self) {
        self.ticks = 0.0;
        self.n_cars = self.config.initial_cars;
        self.fees = vec![2.0; super::ZONES.len()];
        self.occupancy = vec![0.7; super::ZONES.len()];
    }

    fn zone_index(name: &str) -> Result<usize> {
        match super::ZONES.iter().position(|z| *z == name) {
            Some(i) => Ok(i),
            None => bail!("unknown zone `{}`", name),
        }
    }

    fn advance(&mut self) {
        self.ticks += 1.0;
        self.n_cars *= 0.999;
        for (i, occ) in self.occupancy.iter_mut().enumerate() {
            let pull = 0.85 - 0.08 * (self.fees[i] - 2.0);
            let noise = (self.rng.f64() - 0.5) * 0.02;
            *occ += 0.2 * (pull - *occ) + noise;
            *occ = occ.max(0.0).min(1.0);
        }
    }

    fn global_occupancy(&self) -> f64 {
        self.occupancy.iter().sum::<f64>() / self.occupancy.len() as f64
    }
}

impl SimulatorLink for MockSimulator {
    type Config = MockSimulatorConfig;

    fn connect(config: &Self::Config, seed: i64) -> Result<Self> {
        let mut sim = Self {
            config: config.clone(),
            rng: fastrand::Rng::with_seed(seed as u64),
            ticks: 0.0,
            n_cars: 0.0,
            fees: Vec::new(),
            occupancy: Vec::new(),
            command_log: Vec::new(),
        };
        sim.setup();
        Ok(sim)
    }

    fn command(&mut self, cmd: &str) -> Result<()> {
        self.command_log.push(cmd.to_string());
        let parts: Vec<&str> = cmd.split_whitespace().collect();
        match parts.as_slice() {
            ["setup"] => self.setup(),
            ["go"] => self.advance(),
            ["change-fee", lot, delta] => {
                let zone = Self::zone_index(lot.trim_end_matches("-lot"))?;
                let delta: f64 = delta.parse()?;
                self.fees[zone] = (self.fees[zone] + delta).max(0.0).min(10.0);
            }
            ["set-fee", lot, fee] => {
                let zone = Self::zone_index(lot.trim_end_matches("-lot"))?;
                self.fees[zone] = fee.parse()?;
            }
            ["display"] | ["no-display"] => {}
            ["set", "dynamic-pricing-baseline", _] => {}
            ["ask", "one-of", "cars", "[record-data]"] => {}
            _ => bail!("unknown command `{}`", cmd),
        }
        Ok(())
    }

    fn report(&mut self, reporter: &str) -> Result<f64> {
        if let Some(zone) = reporter.strip_suffix("-lot-current-fee") {
            return Ok(self.fees[Self::zone_index(zone)?]);
        }
        if let Some(zone) = reporter.strip_suffix("-lot-current-occup") {
            return Ok(self.occupancy[Self::zone_index(zone)?]);
        }
        match reporter {
            "ticks" => Ok(self.ticks),
            "temporal-resolution" => Ok(self.config.temporal_resolution),
            "num-garages" => Ok(if self.config.garage { 1.0 } else { 0.0 }),
            "n-cars" => Ok(self.n_cars),
            "global-occupancy" => Ok(self.global_occupancy()),
            "garages-current-occup" => Ok(self.global_occupancy() * 0.9),
            "income-entropy" => Ok(0.7),
            "mean-speed" => Ok(0.6),
            _ => bail!("unknown reporter `{}`", reporter),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_commands_move_fees_and_occupancy() {
        let mut sim = MockSimulator::connect(&MockSimulatorConfig::default(), 0).unwrap();
        sim.command("change-fee yellow-lot 0.5").unwrap();
        assert_eq!(sim.report("yellow-lot-current-fee").unwrap(), 2.5);
        sim.command("set-fee yellow-lot 9.5").unwrap();
        for _ in 0..50 {
            sim.command("go").unwrap();
        }
        // High fees push occupancy visibly below the default pull.
        let expensive = sim.report("yellow-lot-current-occup").unwrap();
        let cheap = sim.report("orange-lot-current-occup").unwrap();
        assert!(expensive < cheap);
    }

    #[test]
    fn unknown_commands_error() {
        let mut sim = MockSimulator::connect(&MockSimulatorConfig::default(), 0).unwrap();
        assert!(sim.command("launch-rockets").is_err());
        assert!(sim.report("moon-phase").is_err());
    }
}
