//! Scalar hyperparameters, either constant or decayed over training progress.
use serde::{Deserialize, Serialize};

/// Counters of training progress.
///
/// Owned by the agent runtime and passed to every schedule evaluation,
/// so there is no global step state.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Clock {
    /// Number of observed environment timesteps.
    pub timesteps: i64,

    /// Number of completed episodes.
    pub episodes: i64,

    /// Number of performed optimization steps.
    pub updates: i64,
}

impl Clock {
    /// Resets all counters to zero.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Unit in which a schedule advances.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleUnit {
    /// Environment timesteps.
    Timesteps,

    /// Completed episodes.
    Episodes,

    /// Optimization steps.
    Updates,
}

impl ScheduleUnit {
    fn count(&self, clock: &Clock) -> i64 {
        match self {
            Self::Timesteps => clock.timesteps,
            Self::Episodes => clock.episodes,
            Self::Updates => clock.updates,
        }
    }
}

/// A scalar hyperparameter.
///
/// Wraps values like the learning rate, discount, exploration rate or entropy
/// weight as either a constant or a time-varying schedule. Schedule keys match
/// the agent specification format (`constant`, `linear`, `exponential`).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Parameter {
    /// A fixed value.
    Constant(f64),

    /// Linear interpolation from `initial_value` to `final_value` over
    /// `num_steps` units, then clamped at `final_value`.
    Linear {
        unit: ScheduleUnit,
        num_steps: i64,
        initial_value: f64,
        final_value: f64,
    },

    /// Exponential decay `initial_value * decay_rate^(t / num_steps)`.
    Exponential {
        unit: ScheduleUnit,
        num_steps: i64,
        initial_value: f64,
        decay_rate: f64,
    },
}

impl Parameter {
    /// Current value under the given clock.
    pub fn value(&self, clock: &Clock) -> f64 {
        match self {
            Self::Constant(v) => *v,
            Self::Linear {
                unit,
                num_steps,
                initial_value,
                final_value,
            } => {
                let t = unit.count(clock).max(0) as f64;
                let frac = (t / *num_steps as f64).min(1.0);
                initial_value + (final_value - initial_value) * frac
            }
            Self::Exponential {
                unit,
                num_steps,
                initial_value,
                decay_rate,
            } => {
                let t = unit.count(clock).max(0) as f64;
                initial_value * decay_rate.powf(t / *num_steps as f64)
            }
        }
    }

    /// Value the schedule converges to.
    ///
    /// Used for deterministic/independent action evaluation, where schedules
    /// are frozen at their final value.
    pub fn final_value(&self) -> f64 {
        match self {
            Self::Constant(v) => *v,
            Self::Linear { final_value, .. } => *final_value,
            Self::Exponential {
                initial_value,
                decay_rate,
                ..
            } => initial_value * decay_rate,
        }
    }

    /// Whether this is a constant equal to `v`.
    pub fn is_constant(&self, v: f64) -> bool {
        matches!(self, Self::Constant(c) if *c == v)
    }

    /// Largest value the schedule can take.
    pub fn max_value(&self) -> f64 {
        match self {
            Self::Constant(v) => *v,
            Self::Linear {
                initial_value,
                final_value,
                ..
            } => initial_value.max(*final_value),
            Self::Exponential {
                initial_value,
                decay_rate,
                ..
            } => {
                if *decay_rate <= 1.0 {
                    *initial_value
                } else {
                    f64::INFINITY
                }
            }
        }
    }
}

impl From<f64> for Parameter {
    fn from(v: f64) -> Self {
        Self::Constant(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_decay_over_timesteps() {
        let p = Parameter::Linear {
            unit: ScheduleUnit::Timesteps,
            num_steps: 100,
            initial_value: 1.0,
            final_value: 0.0,
        };
        let mut clock = Clock::default();
        assert_eq!(p.value(&clock), 1.0);
        clock.timesteps = 50;
        assert!((p.value(&clock) - 0.5).abs() < 1e-12);
        clock.timesteps = 100;
        assert_eq!(p.value(&clock), 0.0);
        // Clamped past the end of the schedule.
        clock.timesteps = 1000;
        assert_eq!(p.value(&clock), 0.0);
        assert_eq!(p.final_value(), 0.0);
    }

    #[test]
    fn schedules_follow_their_unit() {
        let p = Parameter::Linear {
            unit: ScheduleUnit::Updates,
            num_steps: 10,
            initial_value: 1.0,
            final_value: 0.0,
        };
        let clock = Clock {
            timesteps: 1000,
            episodes: 100,
            updates: 0,
        };
        assert_eq!(p.value(&clock), 1.0);
    }

    #[test]
    fn constant_predicates() {
        let p = Parameter::Constant(0.0);
        assert!(p.is_constant(0.0));
        assert!(!p.is_constant(1.0));
        assert_eq!(p.max_value(), 0.0);
    }

    #[test]
    fn exponential_decay() {
        let p = Parameter::Exponential {
            unit: ScheduleUnit::Episodes,
            num_steps: 10,
            initial_value: 1.0,
            decay_rate: 0.5,
        };
        let clock = Clock {
            timesteps: 0,
            episodes: 10,
            updates: 0,
        };
        assert!((p.value(&clock) - 0.5).abs() < 1e-12);
    }
}
