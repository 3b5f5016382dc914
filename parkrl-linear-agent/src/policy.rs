//! Softmax-linear policy with exact score-function gradients.
use crate::{biased, standard_normal, LinearPolicyConfig};
use anyhow::Result;
use log::debug;
use parkrl_core::{
    ActionMask, ActionSpec, Baseline, BaselineBatch, DiscreteAction, LossReport, Obs,
    OptimizeOpts, Policy, PolicyBatch,
};
use rand::{rngs::StdRng, Rng};

/// Softmax-linear policy over observation features, one head per discrete
/// sub-action, with a shared linear state-value head.
///
/// Gradients are computed in closed form (`∇ log π = onehot − π` per head),
/// so optimization is plain gradient ascent on the weighted log-likelihood,
/// optionally with entropy and L2 regularization and a weighted value-head
/// regression when the baseline shares the optimizer.
pub struct LinearSoftmaxPolicy {
    spec: ActionSpec,
    obs_dim: usize,

    /// `weights[sub][level]` is a feature-plus-bias row.
    weights: Vec<Vec<Vec<f32>>>,

    /// Shared state-value head, feature-plus-bias row.
    value_head: Vec<f32>,
}

impl LinearSoftmaxPolicy {
    /// Builds a zero-initialized (uniform) policy.
    pub fn build(config: &LinearPolicyConfig, spec: ActionSpec) -> Self {
        let weights: Vec<Vec<Vec<f32>>> = spec
            .subs
            .iter()
            .map(|s| vec![vec![0.0; config.obs_dim + 1]; s.num_values])
            .collect();
        debug!(
            "linear policy: {} head(s) over {} features",
            weights.len(),
            config.obs_dim
        );
        Self {
            spec,
            obs_dim: config.obs_dim,
            weights,
            value_head: vec![0.0; config.obs_dim + 1],
        }
    }

    /// Action space specification.
    pub fn spec(&self) -> &ActionSpec {
        &self.spec
    }

    fn logits(&self, sub: usize, x: &[f32]) -> Vec<f32> {
        self.weights[sub]
            .iter()
            .map(|row| row.iter().zip(x).map(|(w, v)| w * v).sum())
            .collect()
    }

    /// Masked softmax: invalid levels get probability zero. An all-masked
    /// sub-action degrades to the unmasked softmax instead of dividing by
    /// zero.
    fn probs(&self, sub: usize, x: &[f32], mask: &ActionMask) -> Vec<f32> {
        let logits = self.logits(sub, x);
        let any_valid = (0..logits.len()).any(|l| mask.allows(sub, l));
        let allows = |l: usize| !any_valid || mask.allows(sub, l);
        let max = logits
            .iter()
            .enumerate()
            .filter(|(l, _)| allows(*l))
            .map(|(_, &v)| v)
            .fold(f32::NEG_INFINITY, f32::max);
        let mut probs: Vec<f32> = logits
            .iter()
            .enumerate()
            .map(|(l, &v)| if allows(l) { (v - max).exp() } else { 0.0 })
            .collect();
        let sum: f32 = probs.iter().sum();
        for p in probs.iter_mut() {
            *p /= sum;
        }
        probs
    }

    fn sub_entropy(probs: &[f32]) -> f32 {
        -probs
            .iter()
            .filter(|&&p| p > 0.0)
            .map(|&p| p * p.ln())
            .sum::<f32>()
    }

    fn sample(probs: &[f32], rng: &mut StdRng) -> usize {
        let r: f32 = rng.gen();
        let mut acc = 0.0;
        let mut chosen = probs.len() - 1;
        for (l, &p) in probs.iter().enumerate() {
            acc += p;
            if r < acc {
                chosen = l;
                break;
            }
        }
        // Guard against rounding drift onto a masked level.
        if probs[chosen] == 0.0 {
            chosen = probs
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
                .map(|(l, _)| l)
                .unwrap();
        }
        chosen
    }

    fn argmax(probs: &[f32]) -> usize {
        probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(l, _)| l)
            .unwrap()
    }
}

impl<O: Obs> Policy<O> for LinearSoftmaxPolicy {
    type Internals = ();
    type Dist = Vec<Vec<f32>>;

    fn initial_internals(&self) -> () {}

    fn act(
        &mut self,
        obs: &O,
        _internals: &(),
        mask: &ActionMask,
        deterministic: bool,
        rng: &mut StdRng,
    ) -> (DiscreteAction, ()) {
        let x = biased(obs.features());
        debug_assert_eq!(x.len(), self.obs_dim + 1);
        let levels = (0..self.spec.len())
            .map(|sub| {
                let probs = self.probs(sub, &x, mask);
                if deterministic {
                    Self::argmax(&probs)
                } else {
                    Self::sample(&probs, rng)
                }
            })
            .collect();
        (DiscreteAction(levels), ())
    }

    fn distribution(&self, obs: &O, _internals: &(), mask: &ActionMask) -> Vec<Vec<f32>> {
        let x = biased(obs.features());
        (0..self.spec.len())
            .map(|sub| self.probs(sub, &x, mask))
            .collect()
    }

    fn entropy(&self, obs: &O, _internals: &(), mask: &ActionMask) -> f32 {
        let x = biased(obs.features());
        (0..self.spec.len())
            .map(|sub| Self::sub_entropy(&self.probs(sub, &x, mask)))
            .sum::<f32>()
            / self.spec.len() as f32
    }

    fn kl_divergence(
        &self,
        obs: &O,
        _internals: &(),
        mask: &ActionMask,
        reference: &Vec<Vec<f32>>,
    ) -> f32 {
        let x = biased(obs.features());
        let mut kl = 0.0;
        for sub in 0..self.spec.len() {
            let probs = self.probs(sub, &x, mask);
            for (l, &r) in reference[sub].iter().enumerate() {
                if r > 0.0 && probs[l] > 0.0 {
                    kl += r * (r / probs[l]).ln();
                }
            }
        }
        kl / self.spec.len() as f32
    }

    fn optimize(
        &mut self,
        batch: PolicyBatch<O, ()>,
        opts: &OptimizeOpts,
    ) -> Result<LossReport> {
        let n = batch.states.len() as f32;
        let lr = opts.learning_rate as f32;
        let entropy_weight = opts.entropy_weight as f32;
        let l2 = opts.l2_weight as f32;

        let mut objective_loss = 0.0;
        let mut entropy_sum = 0.0;

        for i in 0..batch.states.len() {
            let x = biased(batch.states[i].features());
            let advantage = batch.rewards[i];
            let mask = &batch.masks[i];
            for sub in 0..self.spec.len() {
                let probs = self.probs(sub, &x, mask);
                let taken = batch.actions[i].level(sub);
                let entropy = Self::sub_entropy(&probs);
                entropy_sum += entropy / self.spec.len() as f32;
                objective_loss -= advantage * probs[taken].max(1e-12).ln() / n;

                for (level, &p) in probs.iter().enumerate() {
                    if p == 0.0 && level != taken {
                        continue;
                    }
                    // Ascent on advantage-weighted log-likelihood plus the
                    // entropy bonus: ∂H/∂z_k = -p_k (ln p_k + H).
                    let indicator = if level == taken { 1.0 } else { 0.0 };
                    let mut g = advantage * (indicator - p);
                    if entropy_weight != 0.0 && p > 0.0 {
                        g -= entropy_weight * p * (p.ln() + entropy);
                    }
                    let g = g / n;
                    let row = &mut self.weights[sub][level];
                    for (w, &v) in row.iter_mut().zip(&x) {
                        *w += lr * g * v;
                    }
                }
            }
        }

        // L2 shrinkage and loss.
        let mut sum_sq = 0.0;
        if l2 != 0.0 {
            for sub in self.weights.iter_mut() {
                for row in sub.iter_mut() {
                    for w in row.iter_mut() {
                        sum_sq += *w * *w;
                        *w -= lr * l2 * *w;
                    }
                }
            }
        }
        let regularization_loss = l2 * sum_sq - entropy_weight * entropy_sum / n;

        // Weighted value-head regression when the baseline shares the step.
        let baseline_loss = match opts.baseline_loss_weight {
            Some(weight) if weight > 0.0 => {
                let weight = weight as f32;
                let mut mse = 0.0;
                for i in 0..batch.states.len() {
                    let x = biased(batch.states[i].features());
                    let pred: f32 = self.value_head.iter().zip(&x).map(|(w, v)| w * v).sum();
                    let err = pred - batch.rewards[i];
                    mse += err * err / n;
                    for (w, &v) in self.value_head.iter_mut().zip(&x) {
                        *w -= lr * weight * 2.0 * err * v / n;
                    }
                }
                Some(weight * mse)
            }
            _ => None,
        };

        Ok(LossReport {
            objective_loss,
            regularization_loss,
            baseline_loss,
        })
    }

    fn perturb(&mut self, stddev: f64, rng: &mut StdRng) -> Vec<f32> {
        let mut noise = Vec::new();
        for sub in self.weights.iter_mut() {
            for row in sub.iter_mut() {
                for w in row.iter_mut() {
                    let eps = (stddev * standard_normal(rng)) as f32;
                    *w += eps;
                    noise.push(eps);
                }
            }
        }
        noise
    }

    fn unperturb(&mut self, noise: &[f32]) {
        let mut it = noise.iter();
        for sub in self.weights.iter_mut() {
            for row in sub.iter_mut() {
                for w in row.iter_mut() {
                    *w -= it.next().expect("noise length matches parameter count");
                }
            }
        }
    }
}

impl<O: Obs> Baseline<O> for LinearSoftmaxPolicy {
    type Internals = ();

    /// The shared value head is action-independent; `action_value` coincides
    /// with `state_value`.
    fn state_value(&self, obs: &O, _internals: &(), _mask: &ActionMask) -> f32 {
        let x = biased(obs.features());
        self.value_head.iter().zip(&x).map(|(w, v)| w * v).sum()
    }

    fn action_value(
        &self,
        obs: &O,
        internals: &(),
        mask: &ActionMask,
        _action: &DiscreteAction,
    ) -> f32 {
        Baseline::state_value(self, obs, internals, mask)
    }

    fn optimize(&mut self, batch: BaselineBatch<O, ()>, learning_rate: f64) -> Result<f32> {
        let n = batch.states.len() as f32;
        let lr = learning_rate as f32;
        let mut mse = 0.0;
        for i in 0..batch.states.len() {
            let x = biased(batch.states[i].features());
            let pred: f32 = self.value_head.iter().zip(&x).map(|(w, v)| w * v).sum();
            let err = pred - batch.returns[i];
            mse += err * err / n;
            for (w, &v) in self.value_head.iter_mut().zip(&x) {
                *w -= lr * 2.0 * err * v / n;
            }
        }
        Ok(mse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn spec() -> ActionSpec {
        ActionSpec::new(vec![("yellow", 3), ("orange", 3)])
    }

    fn policy() -> LinearSoftmaxPolicy {
        LinearSoftmaxPolicy::build(&LinearPolicyConfig::new(2), spec())
    }

    #[test]
    fn masked_levels_get_zero_probability() {
        let policy = policy();
        let mask = ActionMask::new(vec![vec![true, false, true], vec![true, true, true]]);
        let obs = vec![0.3f32, -0.5];
        let dist = Policy::distribution(&policy, &obs, &(), &mask);
        assert_eq!(dist[0][1], 0.0);
        assert!((dist[0][0] - 0.5).abs() < 1e-6);
        assert!((dist[1].iter().sum::<f32>() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn sampling_respects_the_mask() {
        let mut policy = policy();
        let mask = ActionMask::new(vec![vec![false, true, false], vec![true, false, true]]);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let (action, _) = policy.act(&vec![1.0f32, 2.0], &(), &mask, false, &mut rng);
            assert_eq!(action.level(0), 1);
            assert_ne!(action.level(1), 1);
        }
    }

    #[test]
    fn optimize_shifts_probability_towards_advantaged_actions() {
        let mut policy = policy();
        let mask = ActionMask::allow_all(&spec());
        let obs = vec![1.0f32, 0.5];
        let before = Policy::distribution(&policy, &obs, &(), &mask)[0][2];

        let states = vec![obs.clone()];
        let actions = vec![DiscreteAction(vec![2, 0])];
        let report = Policy::optimize(
                &mut policy,
                PolicyBatch {
                    states: &states,
                    internals: &[()],
                    masks: &[mask.clone()],
                    actions: &actions,
                    rewards: &[1.0],
                },
                &OptimizeOpts {
                    learning_rate: 0.5,
                    entropy_weight: 0.0,
                    l2_weight: 0.0,
                    baseline_loss_weight: None,
                },
            )
            .unwrap();
        let after = Policy::distribution(&policy, &obs, &(), &mask)[0][2];
        assert!(after > before);
        // Uniform over 3 levels: -ln(1/3) per sub-action, two sub-actions.
        assert!((report.objective_loss - 2.0 * (3.0f32).ln()).abs() < 1e-4);
    }

    #[test]
    fn baseline_regression_reduces_error() {
        let mut policy = policy();
        let mask = ActionMask::allow_all(&spec());
        let states: Vec<Vec<f32>> = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let returns = vec![2.0f32, -1.0];
        let mut last = f32::MAX;
        for _ in 0..50 {
            let batch = BaselineBatch {
                states: &states,
                internals: &[(), ()],
                masks: &[mask.clone(), mask.clone()],
                actions: &[DiscreteAction(vec![0, 0]), DiscreteAction(vec![0, 0])],
                returns: &returns,
            };
            let mse = Baseline::optimize(&mut policy, batch, 0.1).unwrap();
            assert!(mse <= last + 1e-6);
            last = mse;
        }
        assert!(last < 0.1);
    }

    #[test]
    fn perturb_then_unperturb_restores_parameters() {
        let mut policy = policy();
        let mask = ActionMask::allow_all(&spec());
        let obs = vec![0.7f32, -0.2];
        let before = Policy::distribution(&policy, &obs, &(), &mask);
        let mut rng = StdRng::seed_from_u64(3);
        let noise = Policy::<Vec<f32>>::perturb(&mut policy, 0.5, &mut rng);
        assert!(!noise.is_empty());
        Policy::<Vec<f32>>::unperturb(&mut policy, &noise);
        let after = Policy::distribution(&policy, &obs, &(), &mask);
        for (a, b) in before.iter().flatten().zip(after.iter().flatten()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn deterministic_act_is_the_masked_argmax() {
        let mut policy = policy();
        // Push sub-action 0 towards level 1, then mask level 1 out.
        let states = vec![vec![1.0f32, 1.0]];
        let full = ActionMask::allow_all(&spec());
        for _ in 0..20 {
            Policy::optimize(
                    &mut policy,
                    PolicyBatch {
                        states: &states,
                        internals: &[()],
                        masks: &[full.clone()],
                        actions: &[DiscreteAction(vec![1, 1])],
                        rewards: &[1.0],
                    },
                    &OptimizeOpts {
                        learning_rate: 0.5,
                        entropy_weight: 0.0,
                        l2_weight: 0.0,
                        baseline_loss_weight: None,
                    },
                )
                .unwrap();
        }
        let mut rng = StdRng::seed_from_u64(1);
        let (action, _) = policy.act(&states[0], &(), &full, true, &mut rng);
        assert_eq!(action.level(0), 1);

        let mask = ActionMask::new(vec![vec![true, false, true], vec![true, true, true]]);
        let (action, _) = policy.act(&states[0], &(), &mask, true, &mut rng);
        assert_ne!(action.level(0), 1);
    }
}
