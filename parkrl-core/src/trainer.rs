//! Train [`Agent`] against an [`Env`].
mod config;

use crate::agent::Agent;
use crate::base::{Baseline, Env, Policy, Terminal};
use crate::record::{Record, RecordValue, Recorder};
use anyhow::Result;
pub use config::TrainerConfig;
use log::info;

/// Manages the synchronous training loop.
///
/// One environment instance feeds worker 0 of the agent; parallelism, when
/// used, is process-level replication of whole trainer instances with their
/// own worker indices, not threads sharing one loop.
pub struct Trainer<E: Env> {
    env_config: E::Config,
    config: TrainerConfig,
}

impl<E: Env> Trainer<E> {
    /// Constructs a trainer.
    pub fn build(config: TrainerConfig, env_config: E::Config) -> Self {
        Self { env_config, config }
    }

    /// Runs episodes until the configured limit, driving act/observe and
    /// reporting episode returns and update summaries to the recorder.
    pub fn train<P, B>(
        &mut self,
        agent: &mut Agent<E::Obs, P, B>,
        recorder: &mut dyn Recorder,
    ) -> Result<()>
    where
        P: Policy<E::Obs> + Baseline<E::Obs, Internals = <P as Policy<E::Obs>>::Internals>,
        B: Baseline<E::Obs, Internals = <P as Policy<E::Obs>>::Internals>,
    {
        let mut env = E::build(&self.env_config, self.config.seed)?;
        agent.train();

        for episode in 0..self.config.max_episodes {
            let mut obs = env.reset()?;
            let mut steps = 0;
            loop {
                let mask = env.action_mask();
                let action = agent.act(0, obs.clone(), mask);
                let step = env.step(&action)?;
                steps += 1;

                // An externally imposed step cap cuts the episode off; that
                // is an abort, not a natural ending, so the return estimator
                // may bootstrap past it.
                let terminal = match (step.terminal, self.config.max_episode_steps) {
                    (Terminal::Not, Some(max)) if steps >= max => Terminal::Abort,
                    (t, _) => t,
                };

                if let Some(update_record) = agent.observe(0, step.reward, terminal)? {
                    recorder.write(update_record);
                }
                if !step.record.is_empty() {
                    recorder.write(step.record);
                }

                if terminal.is_terminal() {
                    let episode_return = agent
                        .last_episode_return(0)
                        .expect("a finished episode has a return");
                    let mut record = Record::from_scalar("episode_return", episode_return);
                    record.insert("episode", RecordValue::Scalar(episode as f32));
                    record.insert("episode_steps", RecordValue::Scalar(steps as f32));
                    recorder.write(record);
                    info!(
                        "episode {}: {} steps, return {}",
                        episode, steps, episode_return
                    );
                    break;
                }
                obs = step.obs;
            }
        }
        Ok(())
    }
}

/// Runs evaluation episodes with deterministic acting and returns the
/// cumulative reward of each.
pub fn evaluate<E, P, B>(
    env: &mut E,
    agent: &mut Agent<E::Obs, P, B>,
    n_episodes: usize,
) -> Result<Vec<f32>>
where
    E: Env,
    P: Policy<E::Obs> + Baseline<E::Obs, Internals = <P as Policy<E::Obs>>::Internals>,
    B: Baseline<E::Obs, Internals = <P as Policy<E::Obs>>::Internals>,
{
    agent.eval();
    let mut returns = Vec::with_capacity(n_episodes);
    for _ in 0..n_episodes {
        let mut obs = env.reset()?;
        let mut total = 0.0;
        loop {
            let mask = env.action_mask();
            let action = agent.act(0, obs.clone(), mask);
            let step = env.step(&action)?;
            total += step.reward;
            if step.terminal.is_terminal() {
                break;
            }
            obs = step.obs;
        }
        returns.push(total);
    }
    agent.train();
    Ok(returns)
}
