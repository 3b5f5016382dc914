//! Parking environment driving the simulator bridge.
use crate::{
    FeeChange, ParkingEnvConfig, ParkingObs, ParkingState, SimulatorLink, ZoneState,
};
use anyhow::Result;
use log::debug;
use parkrl_core::record::{Record, RecordValue};
use parkrl_core::{ActionMask, ActionSpec, DiscreteAction, Env, EnvStep, Terminal};

/// Environment around an agent-based parking simulation.
///
/// Each interaction step advances the simulation by half an hour of model
/// time, applies the selected fee changes, reads the state reports back and
/// computes the shaped reward. The episode ends naturally after the
/// configured number of simulated hours, or early when the vehicle count
/// drops below its threshold.
pub struct ParkingEnv<L: SimulatorLink> {
    config: ParkingEnvConfig<L>,
    link: L,
    spec: ActionSpec,
    temporal_resolution: f64,
    n_garages: f64,
    initial_cars: f64,
    state: ParkingState,
}

impl<L: SimulatorLink> ParkingEnv<L> {
    fn episode_ticks(&self) -> f64 {
        self.temporal_resolution * self.config.episode_hours
    }

    /// Queries the current simulation state.
    fn query_state(&mut self) -> Result<ParkingState> {
        // Refresh the recorded globals before reading them.
        self.link.command("ask one-of cars [record-data]")?;
        let ticks = self.link.report("ticks")?;
        let n_cars = self.link.report("n-cars")?;
        let overall_occupancy = self.link.report("global-occupancy")?;
        let mut zones = Vec::with_capacity(self.config.zones.len());
        for zone in &self.config.zones {
            let fee = self.link.report(&format!("{}-lot-current-fee", zone))?;
            let occupancy = self.link.report(&format!("{}-lot-current-occup", zone))?;
            zones.push(ZoneState {
                name: zone.clone(),
                fee,
                occupancy,
            });
        }
        let garage_occupancy = if self.n_garages > 0.0 {
            Some(self.link.report("garages-current-occup")?)
        } else {
            None
        };
        Ok(ParkingState {
            ticks,
            temporal_resolution: self.temporal_resolution,
            n_cars: n_cars / self.initial_cars.max(1.0),
            overall_occupancy,
            zones,
            garage_occupancy,
            income_entropy: self.link.report("income-entropy").ok(),
            mean_speed: self.link.report("mean-speed").ok(),
        })
    }

    /// Applies the selected fee change of every zone.
    fn adjust_prices(&mut self, action: &DiscreteAction) -> Result<()> {
        for (i, zone) in self.config.zones.clone().iter().enumerate() {
            match self.config.action_set.change(action.level(i)) {
                FeeChange::Keep => {}
                FeeChange::Delta(delta) => {
                    self.link
                        .command(&format!("change-fee {}-lot {}", zone, delta))?;
                }
                FeeChange::Set(fee) => {
                    self.link.command(&format!("set-fee {}-lot {}", zone, fee))?;
                }
            }
        }
        Ok(())
    }

    fn terminal(&self) -> Terminal {
        let episode_over = self.state.ticks >= self.episode_ticks();
        let finished = self.state.n_cars * self.initial_cars < self.config.min_cars;
        if episode_over || finished {
            Terminal::Natural
        } else {
            Terminal::Not
        }
    }

    /// Raw current fees, for mask construction.
    fn current_fees(&self) -> Vec<f64> {
        self.state.zones.iter().map(|z| z.fee).collect()
    }

    /// The most recently queried state.
    pub fn state(&self) -> &ParkingState {
        &self.state
    }
}

impl<L: SimulatorLink> Env for ParkingEnv<L> {
    type Config = ParkingEnvConfig<L>;
    type Obs = ParkingObs;

    fn build(config: &Self::Config, seed: i64) -> Result<Self> {
        let mut link = L::connect(&config.sim, seed)?;
        link.command("setup")?;
        link.command("no-display")?;
        link.command("set dynamic-pricing-baseline false")?;
        link.command("ask one-of cars [record-data]")?;
        let temporal_resolution = link.report("temporal-resolution")?;
        let n_garages = link.report("num-garages")?;
        let initial_cars = link.report("n-cars")?;
        let spec = config.action_set.action_spec(&config.zones);

        let mut env = Self {
            config: config.clone(),
            link,
            spec,
            temporal_resolution,
            n_garages,
            initial_cars,
            state: ParkingState {
                ticks: 0.0,
                temporal_resolution,
                n_cars: 1.0,
                overall_occupancy: 0.0,
                zones: Vec::new(),
                garage_occupancy: None,
                income_entropy: None,
                mean_speed: None,
            },
        };
        env.state = env.query_state()?;
        debug!(
            "connected to simulation: resolution {}, {} garage(s), {} cars",
            temporal_resolution, n_garages, initial_cars
        );
        Ok(env)
    }

    fn action_spec(&self) -> &ActionSpec {
        &self.spec
    }

    fn action_mask(&self) -> ActionMask {
        self.config.action_set.mask(
            &self.current_fees(),
            self.config.min_fee,
            self.config.max_fee,
        )
    }

    fn reset(&mut self) -> Result<Self::Obs> {
        self.link.command("setup")?;
        self.initial_cars = self.link.report("n-cars")?;
        self.state = self.query_state()?;
        Ok(self.state.to_obs(self.episode_ticks(), self.config.max_fee))
    }

    fn step(&mut self, action: &DiscreteAction) -> Result<EnvStep<Self::Obs>> {
        // Half an hour of model time per interaction step.
        self.link
            .repeat_command("go", (self.temporal_resolution / 2.0) as usize)?;
        self.adjust_prices(action)?;
        self.state = self.query_state()?;

        let reward = self.config.reward.compute(&self.state);
        let terminal = self.terminal();
        let obs = self.state.to_obs(self.episode_ticks(), self.config.max_fee);

        let mut record = Record::from_scalar("reward", reward);
        record.insert(
            "occupancy",
            RecordValue::Scalar(self.state.overall_occupancy as f32),
        );
        record.insert(
            "fees",
            RecordValue::Array1(self.state.zones.iter().map(|z| z.fee as f32).collect()),
        );

        Ok(EnvStep {
            obs,
            reward,
            terminal,
            record,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MockSimulator, MockSimulatorConfig, RewardFunction};
    use parkrl_core::Obs;

    fn env() -> ParkingEnv<MockSimulator> {
        let config = ParkingEnvConfig::<MockSimulator>::new(MockSimulatorConfig::default())
            .reward(RewardFunction::Occupancy);
        ParkingEnv::build(&config, 7).unwrap()
    }

    #[test]
    fn observation_has_eleven_features_without_garage() {
        let mut env = env();
        let obs = env.reset().unwrap();
        assert_eq!(obs.features().len(), 11);
    }

    #[test]
    fn garage_adds_a_feature() {
        let config = ParkingEnvConfig::<MockSimulator>::new(MockSimulatorConfig {
            garage: true,
            ..MockSimulatorConfig::default()
        });
        let mut env = ParkingEnv::build(&config, 7).unwrap();
        let obs = env.reset().unwrap();
        assert_eq!(obs.features().len(), 12);
    }

    #[test]
    fn fee_actions_reach_the_simulator() {
        let mut env = env();
        env.reset().unwrap();
        // Lower yellow, keep orange, raise green and blue.
        let step = env.step(&DiscreteAction(vec![0, 1, 2, 2])).unwrap();
        assert!(!step.terminal.is_terminal());
        let commands = &env.link.command_log;
        assert!(commands.iter().any(|c| c == "change-fee yellow-lot -0.5"));
        assert!(commands.iter().any(|c| c == "change-fee green-lot 0.5"));
        assert!(!commands.iter().any(|c| c.starts_with("change-fee orange")));
        assert_eq!(env.state().zones[0].fee, 1.5);
        assert_eq!(env.state().zones[1].fee, 2.0);
    }

    #[test]
    fn mask_tracks_fee_bounds() {
        let mut env = env();
        env.reset().unwrap();
        // Drive the yellow fee to the floor.
        for _ in 0..4 {
            env.step(&DiscreteAction(vec![0, 1, 1, 1])).unwrap();
        }
        assert_eq!(env.state().zones[0].fee, 0.0);
        let mask = env.action_mask();
        assert_eq!(mask.valid_levels(0), vec![1, 2]);
    }

    #[test]
    fn episode_ends_after_twelve_hours() {
        let config = ParkingEnvConfig::<MockSimulator>::new(MockSimulatorConfig::default())
            .episode_hours(1.0);
        let mut env = ParkingEnv::build(&config, 7).unwrap();
        env.reset().unwrap();
        // One simulated hour at resolution 24 is two steps of 12 ticks.
        let keep = DiscreteAction(vec![1, 1, 1, 1]);
        let step = env.step(&keep).unwrap();
        assert!(!step.terminal.is_terminal());
        let step = env.step(&keep).unwrap();
        assert!(step.terminal.is_terminal());
    }

    #[test]
    fn vehicle_exodus_ends_the_episode() {
        let config = ParkingEnvConfig::<MockSimulator>::new(MockSimulatorConfig::default())
            .min_cars(499.0);
        let mut env = ParkingEnv::build(&config, 7).unwrap();
        env.reset().unwrap();
        let step = env.step(&DiscreteAction(vec![1, 1, 1, 1])).unwrap();
        assert!(step.terminal.is_terminal());
    }
}
