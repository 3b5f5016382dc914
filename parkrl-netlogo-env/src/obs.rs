//! Typed simulation state and its observation vector.
use parkrl_core::Obs;

/// Per-zone slice of the simulation state.
#[derive(Clone, Debug, PartialEq)]
pub struct ZoneState {
    /// Zone name, e.g. `yellow`.
    pub name: String,

    /// Current parking fee.
    pub fee: f64,

    /// Occupancy fraction in `[0, 1]`.
    pub occupancy: f64,
}

/// Full simulation state at an interaction step.
///
/// The observation vector is derived from a fixed subset; auxiliary
/// attributes (income entropy, mean speed) only feed reward shaping.
#[derive(Clone, Debug, PartialEq)]
pub struct ParkingState {
    /// Simulated clock ticks since episode start.
    pub ticks: f64,

    /// Ticks per simulated hour.
    pub temporal_resolution: f64,

    /// Vehicle count, as a fraction of the initial count.
    pub n_cars: f64,

    /// Occupancy fraction over all zones.
    pub overall_occupancy: f64,

    /// Per-zone fees and occupancies.
    pub zones: Vec<ZoneState>,

    /// Garage occupancy fraction, when the model has a garage.
    pub garage_occupancy: Option<f64>,

    /// Entropy of the income distribution of parked drivers, normalized.
    pub income_entropy: Option<f64>,

    /// Mean vehicle speed, normalized.
    pub mean_speed: Option<f64>,
}

impl ParkingState {
    /// Builds the observation vector: normalized tick count, vehicle count,
    /// overall occupancy, per-zone fee and occupancy, and the garage
    /// occupancy when present (11 to 13 features for 4 zones).
    pub fn to_obs(&self, episode_ticks: f64, max_fee: f64) -> ParkingObs {
        let mut features = Vec::with_capacity(3 + 2 * self.zones.len() + 1);
        features.push((self.ticks / episode_ticks) as f32);
        features.push(self.n_cars as f32);
        features.push(self.overall_occupancy as f32);
        for zone in &self.zones {
            features.push((zone.fee / max_fee) as f32);
            features.push(zone.occupancy as f32);
        }
        if let Some(garage) = self.garage_occupancy {
            features.push(garage as f32);
        }
        ParkingObs { features }
    }
}

/// Observation handed to the agent: a fixed-length normalized vector.
#[derive(Clone, Debug, PartialEq)]
pub struct ParkingObs {
    features: Vec<f32>,
}

impl Obs for ParkingObs {
    fn features(&self) -> &[f32] {
        &self.features
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(garage: bool) -> ParkingState {
        ParkingState {
            ticks: 144.0,
            temporal_resolution: 24.0,
            n_cars: 0.8,
            overall_occupancy: 0.75,
            zones: crate::ZONES
                .iter()
                .map(|z| ZoneState {
                    name: z.to_string(),
                    fee: 2.5,
                    occupancy: 0.8,
                })
                .collect(),
            garage_occupancy: if garage { Some(0.5) } else { None },
            income_entropy: None,
            mean_speed: None,
        }
    }

    #[test]
    fn observation_length_depends_on_garage() {
        assert_eq!(state(false).to_obs(288.0, 10.0).len(), 11);
        assert_eq!(state(true).to_obs(288.0, 10.0).len(), 12);
    }

    #[test]
    fn features_are_normalized() {
        let obs = state(false).to_obs(288.0, 10.0);
        let f = obs.features();
        assert!((f[0] - 0.5).abs() < 1e-6);
        assert!((f[3] - 0.25).abs() < 1e-6);
        assert!(f.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }
}
