//! Pluggable reward shaping.
//!
//! The study compared several shaping variants; none is the single canonical
//! one, so the function is part of the environment configuration.
use crate::ParkingState;
use serde::{Deserialize, Serialize};

const TARGET_OCCUPANCY: f64 = 0.825;

/// Reward function applied to the simulation state at every step.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RewardFunction {
    /// Per-zone distance to the target occupancy band around 82.5%, with a
    /// 0.4-exponent falloff, averaged over zones.
    Occupancy,

    /// Like [`RewardFunction::Occupancy`], on the overall occupancy only.
    OccupancyGlobal,

    /// Older variant: rewards zone occupancies between 75% and 90%, punishes
    /// deviations with the squared distance to the band (percent scale).
    OccupancyQuadratic,

    /// Rewards a low vehicle count.
    NCars,

    /// Rewards an even income distribution among parked drivers.
    Social,

    /// Rewards high mean traffic speed.
    Speed,

    /// `0.5 · occupancy(global) + 0.25 · n_cars + 0.25 · social`.
    Composite,
}

fn band_score(occupancy: f64) -> f64 {
    let value = 1.0 - ((occupancy - TARGET_OCCUPANCY).abs() / TARGET_OCCUPANCY).powf(0.4);
    if occupancy <= TARGET_OCCUPANCY {
        value
    } else {
        // Rescale the overshoot side so that full occupancy scores zero.
        let min_value = 1.0 - ((1.0 - TARGET_OCCUPANCY) / TARGET_OCCUPANCY).powf(0.4);
        (value - min_value) / (1.0 - min_value)
    }
}

/// Reward for attributes that should be maximized (normalized to `[0, 1]`).
fn maximize(attr: f64) -> f64 {
    attr.powi(2)
}

/// Reward for attributes that should be minimized (normalized to `[0, 1]`).
fn minimize(attr: f64) -> f64 {
    (attr - 1.0).abs().powi(2)
}

impl RewardFunction {
    /// Computes the step reward.
    pub fn compute(&self, state: &ParkingState) -> f32 {
        let reward = match self {
            Self::Occupancy => {
                state
                    .zones
                    .iter()
                    .map(|z| band_score(z.occupancy))
                    .sum::<f64>()
                    / state.zones.len() as f64
            }
            Self::OccupancyGlobal => band_score(state.overall_occupancy),
            Self::OccupancyQuadratic => state
                .zones
                .iter()
                .map(|z| {
                    let percent = z.occupancy * 100.0;
                    if percent > 75.0 && percent < 90.0 {
                        25.0
                    } else if percent <= 75.0 {
                        -(percent - 75.0).powi(2)
                    } else {
                        -(percent - 90.0).powi(2)
                    }
                })
                .sum::<f64>(),
            Self::NCars => minimize(state.n_cars),
            Self::Social => maximize(state.income_entropy.unwrap_or(0.0)),
            Self::Speed => maximize(state.mean_speed.unwrap_or(0.0)),
            Self::Composite => {
                0.5 * band_score(state.overall_occupancy)
                    + 0.25 * minimize(state.n_cars)
                    + 0.25 * maximize(state.income_entropy.unwrap_or(0.0))
            }
        };
        reward as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ZoneState;

    fn state_with_occupancies(occupancies: &[f64]) -> ParkingState {
        ParkingState {
            ticks: 0.0,
            temporal_resolution: 24.0,
            n_cars: 0.5,
            overall_occupancy: occupancies.iter().sum::<f64>() / occupancies.len() as f64,
            zones: occupancies
                .iter()
                .enumerate()
                .map(|(i, &occupancy)| ZoneState {
                    name: crate::ZONES[i].to_string(),
                    fee: 2.0,
                    occupancy,
                })
                .collect(),
            garage_occupancy: None,
            income_entropy: Some(0.8),
            mean_speed: Some(0.6),
        }
    }

    #[test]
    fn occupancy_reward_peaks_at_the_target() {
        let on_target = RewardFunction::Occupancy
            .compute(&state_with_occupancies(&[0.825, 0.825, 0.825, 0.825]));
        let below = RewardFunction::Occupancy
            .compute(&state_with_occupancies(&[0.5, 0.5, 0.5, 0.5]));
        let above = RewardFunction::Occupancy
            .compute(&state_with_occupancies(&[0.99, 0.99, 0.99, 0.99]));
        assert!((on_target - 1.0).abs() < 1e-6);
        assert!(below < on_target);
        assert!(above < on_target);
        // Full occupancy scores zero on the overshoot side.
        let full =
            RewardFunction::Occupancy.compute(&state_with_occupancies(&[1.0, 1.0, 1.0, 1.0]));
        assert!(full.abs() < 1e-6);
    }

    #[test]
    fn quadratic_band_rewards_and_punishes() {
        let inside = RewardFunction::OccupancyQuadratic
            .compute(&state_with_occupancies(&[0.8, 0.8, 0.8, 0.8]));
        assert_eq!(inside, 100.0);
        // Three zones inside the band, one at 50%: 75 - (50 - 75)^2.
        let outside = RewardFunction::OccupancyQuadratic
            .compute(&state_with_occupancies(&[0.5, 0.8, 0.8, 0.8]));
        assert!((outside - (-550.0)).abs() < 1e-3);
    }

    #[test]
    fn composite_mixes_components() {
        let state = state_with_occupancies(&[0.825, 0.825, 0.825, 0.825]);
        let composite = RewardFunction::Composite.compute(&state);
        let expected = 0.5 * 1.0 + 0.25 * 0.25 + 0.25 * 0.64;
        assert!((composite - expected as f32).abs() < 1e-5);
    }
}
