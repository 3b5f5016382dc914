#![warn(missing_docs)]
//! Linear policy and baseline for parkrl, without an NN backend.
//!
//! The policy is softmax-linear in the observation features, one head per
//! discrete sub-action, optimized with exact score-function gradients; the
//! baseline is a linear state-value regression. Both implement the
//! `parkrl-core` traits, so the full runtime (masked exploration, variable
//! noise, return estimation, separate or shared baseline optimization) can
//! be exercised without a tensor library.
mod baseline;
mod config;
mod policy;

pub use baseline::LinearBaseline;
pub use config::{LinearBaselineConfig, LinearPolicyConfig};
pub use policy::LinearSoftmaxPolicy;

/// Appends the constant bias feature to an observation.
pub(crate) fn biased(features: &[f32]) -> Vec<f32> {
    let mut x = Vec::with_capacity(features.len() + 1);
    x.extend_from_slice(features);
    x.push(1.0);
    x
}

/// Standard-normal sample via the Box-Muller transform.
pub(crate) fn standard_normal(rng: &mut rand::rngs::StdRng) -> f64 {
    use rand::Rng;
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}
