//! Fee action sets and their validity masks.
use parkrl_core::{ActionMask, ActionSpec};
use serde::{Deserialize, Serialize};

/// What a selected action level does to a zone's fee.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FeeChange {
    /// Leave the fee unchanged.
    Keep,

    /// Add a (possibly negative) increment.
    Delta(f64),

    /// Set an absolute fee.
    Set(f64),
}

/// Cardinality variant of the per-zone fee action.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeeActionSet {
    /// Three levels: lower by 0.5, keep, raise by 0.5.
    SmallDelta,

    /// Five levels: ±1.0, ±0.5 and keep.
    WideDelta,

    /// Twenty-one absolute fee levels, 0.0 to 10.0 in steps of 0.5.
    Absolute,
}

impl FeeActionSet {
    /// Number of levels per zone.
    pub fn num_values(&self) -> usize {
        match self {
            Self::SmallDelta => 3,
            Self::WideDelta => 5,
            Self::Absolute => 21,
        }
    }

    /// Fee change of a level.
    pub fn change(&self, level: usize) -> FeeChange {
        match self {
            Self::SmallDelta => match level {
                0 => FeeChange::Delta(-0.5),
                1 => FeeChange::Keep,
                2 => FeeChange::Delta(0.5),
                _ => unreachable!("level {} outside the action set", level),
            },
            Self::WideDelta => match level {
                0 => FeeChange::Delta(-1.0),
                1 => FeeChange::Delta(-0.5),
                2 => FeeChange::Keep,
                3 => FeeChange::Delta(0.5),
                4 => FeeChange::Delta(1.0),
                _ => unreachable!("level {} outside the action set", level),
            },
            Self::Absolute => FeeChange::Set(level as f64 * 0.5),
        }
    }

    /// Action spec for the given zones.
    pub fn action_spec(&self, zones: &[String]) -> ActionSpec {
        ActionSpec::new(
            zones
                .iter()
                .map(|z| (z.clone(), self.num_values()))
                .collect(),
        )
    }

    /// Validity mask given the zones' current fees: levels whose resulting
    /// fee would leave `[min_fee, max_fee]` are masked out.
    pub fn mask(&self, current_fees: &[f64], min_fee: f64, max_fee: f64) -> ActionMask {
        ActionMask::new(
            current_fees
                .iter()
                .map(|&fee| {
                    (0..self.num_values())
                        .map(|level| match self.change(level) {
                            FeeChange::Keep => true,
                            FeeChange::Delta(d) => {
                                let next = fee + d;
                                next >= min_fee - 1e-9 && next <= max_fee + 1e-9
                            }
                            FeeChange::Set(f) => f >= min_fee - 1e-9 && f <= max_fee + 1e-9,
                        })
                        .collect()
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_delta_masks_out_of_range_fees() {
        let set = FeeActionSet::SmallDelta;
        // Zone 0 at the floor, zone 1 at the ceiling, zone 2 in between.
        let mask = set.mask(&[0.0, 10.0, 5.0], 0.0, 10.0);
        assert_eq!(mask.valid_levels(0), vec![1, 2]);
        assert_eq!(mask.valid_levels(1), vec![0, 1]);
        assert_eq!(mask.valid_levels(2), vec![0, 1, 2]);
    }

    #[test]
    fn absolute_set_spans_the_fee_range() {
        let set = FeeActionSet::Absolute;
        assert_eq!(set.num_values(), 21);
        assert_eq!(set.change(0), FeeChange::Set(0.0));
        assert_eq!(set.change(20), FeeChange::Set(10.0));
        let mask = set.mask(&[3.0], 0.0, 10.0);
        assert_eq!(mask.valid_levels(0).len(), 21);
    }

    #[test]
    fn wide_delta_near_floor() {
        let set = FeeActionSet::WideDelta;
        let mask = set.mask(&[0.5], 0.0, 10.0);
        // -1.0 is out, -0.5 hits the floor exactly and stays valid.
        assert_eq!(mask.valid_levels(0), vec![1, 2, 3, 4]);
    }
}
