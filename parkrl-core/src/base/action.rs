//! Action space model: named discrete sub-actions with validity masks.
use serde::{Deserialize, Serialize};

/// Specification of a single named discrete sub-action.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct SubActionSpec {
    /// Name of the sub-action, e.g. a priced zone.
    pub name: String,

    /// Number of selectable levels.
    pub num_values: usize,
}

/// Specification of the full action space.
///
/// The action space is a fixed set of named discrete sub-actions, one per
/// controlled entity, each with a small integer cardinality.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ActionSpec {
    /// Sub-action specifications, in a fixed order.
    pub subs: Vec<SubActionSpec>,
}

impl ActionSpec {
    /// Creates a spec from `(name, num_values)` pairs.
    pub fn new<S: Into<String>>(subs: Vec<(S, usize)>) -> Self {
        Self {
            subs: subs
                .into_iter()
                .map(|(name, num_values)| SubActionSpec {
                    name: name.into(),
                    num_values,
                })
                .collect(),
        }
    }

    /// Number of sub-actions.
    pub fn len(&self) -> usize {
        self.subs.len()
    }

    /// Whether the spec has no sub-actions.
    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }

    /// Cardinality of sub-action `i`.
    pub fn num_values(&self, i: usize) -> usize {
        self.subs[i].num_values
    }
}

/// One selected level per sub-action.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct DiscreteAction(pub Vec<usize>);

impl DiscreteAction {
    /// Selected level of sub-action `i`.
    pub fn level(&self, i: usize) -> usize {
        self.0[i]
    }

    /// Number of sub-actions.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the action has no sub-actions.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Per-level validity mask for every sub-action.
///
/// Invalid levels are excluded from exploration and must never be selected;
/// a policy emitting a masked-out level is an environment-bridge bug.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ActionMask {
    valid: Vec<Vec<bool>>,
}

impl ActionMask {
    /// A mask allowing every level of every sub-action.
    pub fn allow_all(spec: &ActionSpec) -> Self {
        Self {
            valid: spec.subs.iter().map(|s| vec![true; s.num_values]).collect(),
        }
    }

    /// Creates a mask from explicit validity flags.
    pub fn new(valid: Vec<Vec<bool>>) -> Self {
        Self { valid }
    }

    /// Number of sub-actions covered by the mask.
    pub fn len(&self) -> usize {
        self.valid.len()
    }

    /// Whether the mask covers no sub-actions.
    pub fn is_empty(&self) -> bool {
        self.valid.is_empty()
    }

    /// Whether `level` of sub-action `i` is selectable.
    pub fn allows(&self, i: usize, level: usize) -> bool {
        self.valid[i][level]
    }

    /// Validity flags of sub-action `i`.
    pub fn levels(&self, i: usize) -> &[bool] {
        &self.valid[i]
    }

    /// Selectable levels of sub-action `i`.
    pub fn valid_levels(&self, i: usize) -> Vec<usize> {
        self.valid[i]
            .iter()
            .enumerate()
            .filter_map(|(l, &v)| if v { Some(l) } else { None })
            .collect()
    }

    /// Whether every sub-action of `action` is selectable.
    pub fn is_valid(&self, action: &DiscreteAction) -> bool {
        action
            .0
            .iter()
            .enumerate()
            .all(|(i, &level)| level < self.valid[i].len() && self.valid[i][level])
    }
}

/// Kind of terminal marker attached to a transition.
///
/// `Abort` marks an episode cut off by an external limit rather than by the
/// environment itself; only aborted episodes get a bootstrapped terminal
/// value during return estimation (when enabled).
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Terminal {
    /// Not a terminal transition.
    Not,

    /// The episode ended naturally.
    Natural,

    /// The episode was cut off externally.
    Abort,
}

impl Terminal {
    /// Whether this marker ends an episode.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Not)
    }

    /// Whether the episode ended naturally.
    pub fn is_natural(&self) -> bool {
        matches!(self, Self::Natural)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ActionSpec {
        ActionSpec::new(vec![("yellow", 3), ("orange", 3)])
    }

    #[test]
    fn allow_all_validates_any_level() {
        let mask = ActionMask::allow_all(&spec());
        assert!(mask.is_valid(&DiscreteAction(vec![0, 2])));
        assert!(!mask.is_valid(&DiscreteAction(vec![0, 3])));
    }

    #[test]
    fn masked_levels_are_invalid() {
        let mask = ActionMask::new(vec![vec![true, false, true], vec![true, true, true]]);
        assert!(!mask.is_valid(&DiscreteAction(vec![1, 0])));
        assert!(mask.is_valid(&DiscreteAction(vec![2, 0])));
        assert_eq!(mask.valid_levels(0), vec![0, 2]);
    }
}
