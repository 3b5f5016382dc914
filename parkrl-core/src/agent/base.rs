//! Agent runtime.
use super::{AgentConfig, BaselineOptimizer, BufferMode, UpdateUnit};
use crate::base::{
    ActionMask, ActionSpec, Baseline, BaselineBatch, DiscreteAction, LossReport, Obs,
    OptimizeOpts, Policy, PolicyBatch, Terminal,
};
use crate::buffer::{ActBuffer, Segment};
use crate::error::ParkrlError;
use crate::estimator::{EstimateAdvantage, Horizon, ReturnEstimator, ValuePrediction};
use crate::memory::{Memory, MemoryKind};
use crate::params::Clock;
use crate::record::{Record, RecordValue};
use anyhow::Result;
use log::{info, trace};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::marker::PhantomData;

type Pi<O, P> = <P as Policy<O>>::Internals;

/// Placeholder baseline for agents whose policy doubles as the baseline (or
/// that never predict values). Its methods are unreachable.
pub struct NoBaseline<I>(PhantomData<I>);

impl<I> Default for NoBaseline<I> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<O, I> Baseline<O> for NoBaseline<I>
where
    O: Obs,
    I: Clone + std::fmt::Debug,
{
    type Internals = I;

    fn state_value(&self, _obs: &O, _internals: &I, _mask: &ActionMask) -> f32 {
        unimplemented!();
    }

    fn action_value(
        &self,
        _obs: &O,
        _internals: &I,
        _mask: &ActionMask,
        _action: &DiscreteAction,
    ) -> f32 {
        unimplemented!();
    }

    fn optimize(&mut self, _batch: BaselineBatch<O, I>, _learning_rate: f64) -> Result<f32> {
        unimplemented!();
    }
}

#[cfg_attr(doc, aquamarine::aquamarine)]
/// The agent runtime: turns a stream of state/action/reward/terminal tuples
/// into policy-gradient and value-function updates.
///
/// Per observed step the update controller moves through the states
///
/// ```mermaid
/// graph LR
///     A[Idle] --> B[Accumulating]
///     B --> C[ReadyToUpdate]
///     C --> D[Updating]
///     D --> A
/// ```
///
/// where `ReadyToUpdate` is entered once
/// `unit_count - start_offset - last_update >= frequency` in the configured
/// unit (timesteps or episodes), with the start offset raised to cover the
/// reward horizon, recurrent lookback and any configured warm-up delay.
/// Terminal and abort markers always flush the worker's buffered experience
/// through the return estimator before the trigger is evaluated.
///
/// Workers are index-segmented: each parallel worker feeds its own act
/// buffer, and only flushed (return-annotated) segments reach the shared
/// memory store, so retrieval never overlaps an episode that is still open.
pub struct Agent<O, P, B = NoBaseline<<P as Policy<O>>::Internals>>
where
    O: Obs,
    P: Policy<O> + Baseline<O, Internals = <P as Policy<O>>::Internals>,
    B: Baseline<O, Internals = <P as Policy<O>>::Internals>,
{
    config: AgentConfig,
    action_spec: ActionSpec,
    policy: P,
    baseline: Option<B>,
    estimator: ReturnEstimator,
    memory: Memory<O, Pi<O, P>>,
    buffers: Vec<ActBuffer<O, Pi<O, P>>>,
    worker_internals: Vec<Pi<O, P>>,
    episode_return_acc: Vec<f32>,
    last_episode_return: Vec<Option<f32>>,

    /// Resolved update frequency in units; `None` disables updates.
    frequency: Option<usize>,

    /// Resolved baseline optimization mode.
    baseline_optimizer: BaselineOptimizer,

    /// Resolved advantage estimation mode.
    estimate_advantage: EstimateAdvantage,

    clock: Clock,
    last_update: i64,
    rng: StdRng,
    train_mode: bool,
}

impl<O, P, B> Agent<O, P, B>
where
    O: Obs,
    P: Policy<O> + Baseline<O, Internals = <P as Policy<O>>::Internals>,
    B: Baseline<O, Internals = <P as Policy<O>>::Internals>,
{
    /// Builds an agent from its declarative configuration, a policy and an
    /// optional separate baseline.
    ///
    /// All configuration validation happens here and is fatal; nothing is
    /// retried at runtime.
    pub fn build(
        config: AgentConfig,
        action_spec: ActionSpec,
        policy: P,
        baseline: Option<B>,
    ) -> Result<Self, ParkrlError> {
        if config.parallel_interactions == 0 {
            return Err(ParkrlError::config(
                "parallel_interactions",
                "at least one worker is required",
            ));
        }
        if config.update.batch_size == 0 {
            return Err(ParkrlError::config(
                "update.batch_size",
                "batch size must be at least 1",
            ));
        }
        if let Horizon::Steps(n) = config.reward_estimation.horizon {
            if n == 0 {
                return Err(ParkrlError::config(
                    "reward_estimation.horizon",
                    "fixed horizon must be at least 1",
                ));
            }
        }
        for &(field, param) in &[
            ("exploration", &config.exploration),
            ("variable_noise", &config.variable_noise),
            ("entropy_regularization", &config.entropy_regularization),
            ("l2_regularization", &config.l2_regularization),
        ] {
            if param.final_value() < 0.0 || param.max_value() < 0.0 {
                return Err(ParkrlError::config(field, "value must be non-negative"));
            }
        }
        if config.exploration.max_value() > 1.0 {
            return Err(ParkrlError::config(
                "exploration",
                "exploration is a probability and cannot exceed 1.0",
            ));
        }

        let separate_baseline = baseline.is_some();
        let frequency = config.update.resolved_frequency()?;

        // Resolve when horizon values are predicted: an explicit setting
        // wins; otherwise no prediction without any baseline involvement,
        // else early for the episode horizon and late for a fixed one.
        let predict = match config.reward_estimation.predict_horizon_values {
            Some(v) => Some(v),
            None => {
                if !separate_baseline
                    && matches!(config.baseline_optimizer, BaselineOptimizer::None)
                {
                    None
                } else {
                    match config.reward_estimation.horizon {
                        Horizon::Episode => Some(ValuePrediction::Early),
                        Horizon::Steps(_) => Some(ValuePrediction::Late),
                    }
                }
            }
        };

        // A separate baseline without a dedicated optimizer trains through
        // the policy step in the original formulation; eagerly this resolves
        // to an early advantage estimate plus a separate regression step
        // after the policy update.
        let advantage_in_loss = separate_baseline
            && matches!(config.baseline_optimizer, BaselineOptimizer::None);
        let mut estimate_advantage = config.reward_estimation.estimate_advantage;
        let mut baseline_optimizer = config.baseline_optimizer;
        if advantage_in_loss {
            if estimate_advantage == EstimateAdvantage::No {
                estimate_advantage = EstimateAdvantage::Early;
            }
            baseline_optimizer = BaselineOptimizer::Separate;
        }
        match baseline_optimizer {
            BaselineOptimizer::Weight(w) => {
                if separate_baseline {
                    return Err(ParkrlError::config(
                        "baseline_optimizer",
                        "a weighted shared baseline loss requires the policy itself to be \
                         the baseline; use `separate` with a separate baseline",
                    ));
                }
                if w < 0.0 {
                    return Err(ParkrlError::config(
                        "baseline_optimizer",
                        "baseline loss weight must be non-negative",
                    ));
                }
                if estimate_advantage == EstimateAdvantage::Early {
                    return Err(ParkrlError::config(
                        "reward_estimation.estimate_advantage",
                        "early advantage estimation requires a separate baseline optimizer",
                    ));
                }
            }
            BaselineOptimizer::None => {
                if estimate_advantage == EstimateAdvantage::Early {
                    return Err(ParkrlError::config(
                        "reward_estimation.estimate_advantage",
                        "early advantage estimation requires a separate baseline optimizer",
                    ));
                }
            }
            BaselineOptimizer::Separate => {}
        }

        // Buffer capacity and circular (streaming) mode.
        let circular = match config.buffer_observe {
            BufferMode::Steps(m) => {
                if m == 0 {
                    return Err(ParkrlError::config(
                        "buffer_observe",
                        "step-mode buffering needs a window of at least 1",
                    ));
                }
                if config.parallel_interactions > 1 {
                    return Err(ParkrlError::config(
                        "buffer_observe",
                        "step-mode buffering supports a single worker only",
                    ));
                }
                if !matches!(config.reward_estimation.horizon, Horizon::Steps(_)) {
                    return Err(ParkrlError::config(
                        "buffer_observe",
                        "step-mode buffering requires a fixed reward horizon",
                    ));
                }
                true
            }
            BufferMode::Episode => false,
        };
        let buffer_capacity = if circular {
            let n = match config.reward_estimation.horizon {
                Horizon::Steps(n) => n,
                Horizon::Episode => unreachable!(),
            };
            let m = match config.buffer_observe {
                BufferMode::Steps(m) => m,
                BufferMode::Episode => unreachable!(),
            };
            let capacity = m + n;
            Some(match config.max_episode_timesteps {
                Some(met) => capacity.min(met),
                None => capacity,
            })
        } else {
            config.max_episode_timesteps
        };

        let baseline_past_horizon = match &baseline {
            Some(b) => b.past_horizon(true),
            None => <P as Baseline<O>>::past_horizon(&policy, true),
        };
        let estimator = ReturnEstimator::build(
            &config.reward_estimation,
            predict,
            baseline_past_horizon,
            config.memory.kind == MemoryKind::Recent,
            separate_baseline && matches!(config.baseline_optimizer, BaselineOptimizer::None),
        )?;

        // Minimum memory capacity: a batch plus the windows around it must
        // always be retrievable without overwriting unconsumed transitions.
        let max_past_horizon = <P as Policy<O>>::past_horizon(&policy, false).max(match &baseline {
            Some(b) => b.past_horizon(false),
            None => <P as Baseline<O>>::past_horizon(&policy, false),
        });
        let mut min_capacity = match config.update.unit {
            UpdateUnit::Timesteps => {
                let horizon_bound = match config.reward_estimation.horizon {
                    Horizon::Episode => config.max_episode_timesteps.ok_or_else(|| {
                        ParkrlError::config(
                            "max_episode_timesteps",
                            "required for timestep-unit updates with an episode horizon",
                        )
                    })?,
                    Horizon::Steps(n) => n,
                };
                let mut min = config.update.batch_size + 1 + max_past_horizon + horizon_bound;
                if let Some(met) = config.max_episode_timesteps {
                    min = min.max(met);
                }
                min
            }
            UpdateUnit::Episodes => {
                let met = config.max_episode_timesteps.ok_or_else(|| {
                    ParkrlError::config(
                        "max_episode_timesteps",
                        "required for episode-unit updates",
                    )
                })?;
                (config.update.batch_size + 1) * met
            }
        };
        match config.buffer_observe {
            BufferMode::Episode => {
                if let Some(met) = config.max_episode_timesteps {
                    min_capacity = min_capacity.max(2 * met);
                }
            }
            BufferMode::Steps(m) => min_capacity = min_capacity.max(2 * m),
        }
        let memory = Memory::build(&config.memory, min_capacity)?;

        let n_workers = config.parallel_interactions;
        let buffers = (0..n_workers)
            .map(|_| ActBuffer::new(buffer_capacity, circular))
            .collect();
        let worker_internals = (0..n_workers)
            .map(|_| <P as Policy<O>>::initial_internals(&policy))
            .collect();
        let last_update = -(frequency.unwrap_or(0) as i64);
        let rng = StdRng::seed_from_u64(config.seed);

        info!(
            "built agent: {} worker(s), memory capacity >= {}, frequency {:?}",
            n_workers, min_capacity, frequency
        );

        Ok(Self {
            config,
            action_spec,
            policy,
            baseline,
            estimator,
            memory,
            buffers,
            worker_internals,
            episode_return_acc: vec![0.0; n_workers],
            last_episode_return: vec![None; n_workers],
            frequency,
            baseline_optimizer,
            estimate_advantage,
            clock: Clock::default(),
            last_update,
            rng,
            train_mode: true,
        })
    }

    /// Sets the runtime to training mode (exploration, noise, updates).
    pub fn train(&mut self) {
        self.train_mode = true;
    }

    /// Sets the runtime to evaluation mode (deterministic acting, no
    /// updates).
    pub fn eval(&mut self) {
        self.train_mode = false;
    }

    /// Whether the runtime is in training mode.
    pub fn is_train(&self) -> bool {
        self.train_mode
    }

    /// Training progress counters.
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Action space specification.
    pub fn action_spec(&self) -> &ActionSpec {
        &self.action_spec
    }

    /// Number of transitions currently stored in memory.
    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    /// The policy.
    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Accumulated reward of the worker's running episode.
    pub fn episode_return(&self, worker: usize) -> f32 {
        self.episode_return_acc[worker]
    }

    /// Accumulated reward of the worker's most recently completed episode.
    pub fn last_episode_return(&self, worker: usize) -> Option<f32> {
        self.last_episode_return[worker]
    }

    /// Clears per-worker buffers, recurrent carries and reward accumulators.
    ///
    /// The clock and the memory store are kept; this resets interaction
    /// state at a run boundary, not training progress.
    pub fn reset(&mut self) {
        for worker in 0..self.buffers.len() {
            assert_eq!(
                self.buffers[worker].cursor(),
                0,
                "reset with worker {} mid-episode",
                worker
            );
            self.worker_internals[worker] = <P as Policy<O>>::initial_internals(&self.policy);
            self.episode_return_acc[worker] = 0.0;
        }
    }

    /// Samples an action for a worker and records the pending transition.
    ///
    /// Panics when a sub-action has no valid level left, or when the policy
    /// emits a masked-out level; both indicate an environment-bridge bug.
    pub fn act(&mut self, worker: usize, obs: O, mask: ActionMask) -> DiscreteAction {
        assert_eq!(mask.len(), self.action_spec.len());
        for i in 0..mask.len() {
            assert!(
                !mask.valid_levels(i).is_empty(),
                "all levels of sub-action `{}` are masked out",
                self.action_spec.subs[i].name
            );
        }
        let deterministic = !self.train_mode;

        // Variable noise perturbs the parameters only while acting.
        let noise_stddev = if deterministic {
            0.0
        } else {
            self.config.variable_noise.value(&self.clock)
        };
        let noise = if noise_stddev > 0.0 {
            <P as Policy<O>>::perturb(&mut self.policy, noise_stddev, &mut self.rng)
        } else {
            Vec::new()
        };

        let internals = self.worker_internals[worker].clone();
        let (mut action, next_internals) =
            self.policy
                .act(&obs, &internals, &mask, deterministic, &mut self.rng);

        if !noise.is_empty() {
            <P as Policy<O>>::unperturb(&mut self.policy, &noise);
        }

        // Masked exploration: with probability ε, resample each sub-action
        // uniformly over its valid levels.
        if !deterministic {
            let epsilon = self.config.exploration.value(&self.clock);
            if epsilon > 0.0 {
                for i in 0..action.len() {
                    if self.rng.gen::<f64>() < epsilon {
                        let valid = mask.valid_levels(i);
                        action.0[i] = valid[self.rng.gen_range(0..valid.len())];
                    }
                }
            }
        }
        assert!(
            mask.is_valid(&action),
            "policy selected a masked-out action level"
        );

        if self.train_mode {
            self.buffers[worker].record(obs, internals, mask, action.clone());
            self.worker_internals[worker] = next_internals;
        }
        action
    }

    /// Feeds the reward and terminal marker of the worker's pending
    /// transition, flushing and updating as configured.
    ///
    /// Returns the update summaries when an update was performed.
    pub fn observe(
        &mut self,
        worker: usize,
        reward: f32,
        terminal: Terminal,
    ) -> Result<Option<Record>> {
        assert!(self.train_mode, "observe called in evaluation mode");
        self.buffers[worker].observe_step(reward, terminal);
        self.episode_return_acc[worker] += reward;
        self.clock.timesteps += 1;

        if terminal.is_terminal() {
            let segment = self.buffers[worker].flush_episode();
            let annotated = self.annotate_segment(segment);
            self.memory.enqueue(annotated);
            self.clock.episodes += 1;
            self.worker_internals[worker] = <P as Policy<O>>::initial_internals(&self.policy);
            self.last_episode_return[worker] = Some(self.episode_return_acc[worker]);
            trace!(
                "worker {} finished an episode with return {}",
                worker,
                self.episode_return_acc[worker]
            );
            self.episode_return_acc[worker] = 0.0;
        } else if self.buffers[worker].is_circular() {
            self.drain_completed(worker);
        }

        if let Some(offset) = self.update_offset() {
            let frequency = self.frequency.expect("offset implies a frequency") as i64;
            if offset >= self.last_update + frequency {
                self.last_update = offset;
                return Ok(Some(self.update()?));
            }
        }
        Ok(None)
    }

    /// Ingests a complete episode of pre-recorded experience.
    ///
    /// The segment must contain exactly one terminal marker, at its last
    /// position, and must not be fed while any worker is mid-episode; both
    /// are asserted. Returns the updated timestep and episode counters.
    pub fn experience(&mut self, segment: Segment<O, Pi<O, P>>) -> (i64, i64) {
        for (worker, buffer) in self.buffers.iter().enumerate() {
            assert_eq!(
                buffer.cursor(),
                0,
                "experience cannot be called while worker {} is mid-episode",
                worker
            );
        }
        assert!(!segment.is_empty(), "experience with an empty segment");
        let terminals = segment
            .terminal
            .iter()
            .filter(|t| t.is_terminal())
            .count();
        assert_eq!(
            terminals, 1,
            "experience segment contains none or more than one terminal"
        );
        assert!(
            segment.terminal.last().unwrap().is_terminal(),
            "experience terminal is not the last timestep"
        );
        for i in 0..segment.len() {
            assert!(
                segment.masks[i].is_valid(&segment.actions[i]),
                "experience action at position {} is outside its mask",
                i
            );
        }

        let len = segment.len() as i64;
        let annotated = self.annotate_segment(segment);
        self.memory.enqueue(annotated);
        self.clock.timesteps += len;
        self.clock.episodes += 1;
        (self.clock.timesteps, self.clock.episodes)
    }

    /// Computes returns for a flushed segment and replaces its rewards.
    fn annotate_segment(&mut self, segment: Segment<O, Pi<O, P>>) -> Segment<O, Pi<O, P>> {
        let values = self.segment_values(&segment);
        let returns = self.estimator.segment_returns(
            &segment.reward,
            &segment.terminal,
            &self.clock,
            values.as_deref(),
        );
        Segment {
            reward: returns,
            ..segment
        }
    }

    /// Early per-position baseline predictions for a segment, when needed.
    fn segment_values(&self, segment: &Segment<O, Pi<O, P>>) -> Option<Vec<f32>> {
        if !self.estimator.wants_values() {
            return None;
        }
        let use_actions = self.estimator.predict_action_values();
        Some(
            (0..segment.len())
                .map(|i| {
                    let action = if use_actions {
                        Some(&segment.actions[i])
                    } else {
                        None
                    };
                    self.predict_value(
                        &segment.states[i],
                        &segment.internals[i],
                        &segment.masks[i],
                        action,
                    )
                })
                .collect(),
        )
    }

    fn predict_value(
        &self,
        obs: &O,
        internals: &Pi<O, P>,
        mask: &ActionMask,
        action: Option<&DiscreteAction>,
    ) -> f32 {
        match (&self.baseline, action) {
            (Some(b), Some(a)) => b.action_value(obs, internals, mask, a),
            (Some(b), None) => b.state_value(obs, internals, mask),
            (None, Some(a)) => Baseline::action_value(&self.policy, obs, internals, mask, a),
            (None, None) => Baseline::state_value(&self.policy, obs, internals, mask),
        }
    }

    /// Streams returns for horizon-complete timesteps of a running episode
    /// out of a circular buffer.
    fn drain_completed(&mut self, worker: usize) {
        let n = match self.estimator.horizon() {
            Horizon::Steps(n) => n,
            Horizon::Episode => unreachable!("circular buffering requires a fixed horizon"),
        };
        let observed = self.buffers[worker].observed_len();
        if observed <= n {
            return;
        }
        let num_complete = observed - n;
        let start = self.buffers[worker].start();

        let rewards = self.buffers[worker].rewards();
        let rewards = &rewards[..observed - 1];
        let values = if self.estimator.wants_values() {
            let use_actions = self.estimator.predict_action_values();
            // With λ = 1 only the bootstrap positions are predicted; TD(λ)
            // blends a value into every step.
            let indices: Vec<usize> = if self.estimator.trace_is_one(&self.clock) {
                (0..num_complete).map(|j| start + n + j).collect()
            } else {
                (1..observed).map(|i| start + i).collect()
            };
            Some(
                indices
                    .into_iter()
                    .map(|i| {
                        let buffer = &self.buffers[worker];
                        let action = if use_actions {
                            Some(buffer.action(i))
                        } else {
                            None
                        };
                        self.predict_value(
                            buffer.state(i),
                            buffer.internals_at(i),
                            buffer.mask(i),
                            action,
                        )
                    })
                    .collect::<Vec<f32>>(),
            )
        } else {
            None
        };

        let returns =
            self.estimator
                .streaming_returns(rewards, num_complete, &self.clock, values.as_deref());
        let segment = self.buffers[worker].drain(num_complete, returns);
        self.memory.enqueue(segment);
    }

    /// Current value of `unit_count - start_offset`, or `None` while updates
    /// are impossible (disabled, or required experience not yet available).
    fn update_offset(&self) -> Option<i64> {
        let frequency = self.frequency? as i64;
        let mut start = self.config.update.start as i64;
        let unit = match self.config.update.unit {
            UpdateUnit::Timesteps => {
                let past = self.max_past_horizon() as i64;
                start = start.max(frequency + past + 1);
                match self.estimator.horizon() {
                    Horizon::Episode => {
                        if self.clock.episodes == 0 {
                            return None;
                        }
                    }
                    Horizon::Steps(n) => start += n as i64,
                }
                match self.config.buffer_observe {
                    BufferMode::Episode => {
                        if self.clock.episodes == 0 {
                            return None;
                        }
                    }
                    BufferMode::Steps(m) => start = start.max(m as i64),
                }
                self.clock.timesteps
            }
            UpdateUnit::Episodes => {
                start = start.max(frequency);
                self.clock.episodes
            }
        };
        Some(unit - start)
    }

    fn max_past_horizon(&self) -> usize {
        <P as Policy<O>>::past_horizon(&self.policy, false).max(match &self.baseline {
            Some(b) => b.past_horizon(false),
            None => <P as Baseline<O>>::past_horizon(&self.policy, false),
        })
    }

    /// Performs one optimization step and returns the tracked summaries.
    pub fn update(&mut self) -> Result<Record> {
        let batch_size = self.config.update.batch_size;
        let indices = match self.config.update.unit {
            UpdateUnit::Timesteps => {
                let past = self.max_past_horizon();
                let future = match self.estimator.predict() {
                    Some(ValuePrediction::Late) => match self.estimator.horizon() {
                        Horizon::Steps(n) => n,
                        Horizon::Episode => unreachable!("late prediction needs a fixed horizon"),
                    },
                    _ => 0,
                };
                self.memory.retrieve_timesteps(batch_size, past, future)
            }
            UpdateUnit::Episodes => self.memory.retrieve_episodes(batch_size),
        };
        let batch = self.memory.retrieve(&indices);
        let mut record = Record::empty();

        // Anchor internals come from the predecessor windows: the window
        // start's carry when a recurrent lookback is configured, the
        // anchor's own otherwise.
        let predecessors = self
            .memory
            .predecessors(&indices, <P as Policy<O>>::past_horizon(&self.policy, false));
        let internals = predecessors.initial_internals;

        let mut returns = batch.reward.clone();

        // Deferred horizon values.
        if self.estimator.predict() == Some(ValuePrediction::Late) {
            let horizon = match self.estimator.horizon() {
                Horizon::Steps(n) => n,
                Horizon::Episode => unreachable!(),
            };
            let successors = self.memory.successors(&indices, horizon);
            let horizon_values: Vec<f32> = if self.estimator.predict_action_values() {
                // Deterministic re-acting at the bootstrap states.
                let mut values = Vec::with_capacity(successors.offsets.len());
                for i in 0..successors.offsets.len() {
                    let (action, _) = self.policy.act(
                        &successors.states[i],
                        &successors.internals[i],
                        &successors.masks[i],
                        true,
                        &mut self.rng,
                    );
                    values.push(self.predict_value(
                        &successors.states[i],
                        &successors.internals[i],
                        &successors.masks[i],
                        Some(&action),
                    ));
                }
                values
            } else {
                (0..successors.offsets.len())
                    .map(|i| {
                        self.predict_value(
                            &successors.states[i],
                            &successors.internals[i],
                            &successors.masks[i],
                            None,
                        )
                    })
                    .collect()
            };
            self.estimator.complete_returns(
                &mut returns,
                &successors.offsets,
                &successors.terminal,
                &horizon_values,
                &self.clock,
            );
        }

        let mean = |xs: &[f32]| xs.iter().sum::<f32>() / xs.len().max(1) as f32;
        record.insert("update_return", RecordValue::Scalar(mean(&returns)));

        // Regression target of any separate baseline step: the completed
        // returns, before they turn into advantages below.
        let completed_returns = returns.clone();
        let learning_rate = self.config.learning_rate.value(&self.clock);

        // A separately optimized baseline steps before the policy unless the
        // advantage is estimated with the pre-update (early) baseline.
        let mut baseline_loss = None;
        if matches!(self.baseline_optimizer, BaselineOptimizer::Separate)
            && self.estimate_advantage != EstimateAdvantage::Early
        {
            baseline_loss = Some(self.baseline_step(
                &batch.states,
                &internals,
                &batch,
                &completed_returns,
                learning_rate,
            )?);
        }

        // Advantage estimation on top of the completed returns.
        if self.estimate_advantage != EstimateAdvantage::No {
            let use_actions = self.estimator.predict_action_values();
            for i in 0..returns.len() {
                let action = if use_actions {
                    Some(&batch.actions[i])
                } else {
                    None
                };
                returns[i] -= self.predict_value(
                    &batch.states[i],
                    &internals[i],
                    &batch.masks[i],
                    action,
                );
            }
            record.insert("update_advantage", RecordValue::Scalar(mean(&returns)));

            if self.estimator.gae_enabled(&self.clock) {
                self.estimator
                    .gae_advantages(&mut returns, &batch.terminal, &self.clock);
                record.insert("update_gae", RecordValue::Scalar(mean(&returns)));
            }
        }

        // Distribution snapshot before the step, as the KL reference.
        let references: Vec<<P as Policy<O>>::Dist> = (0..batch.len())
            .map(|i| {
                self.policy
                    .distribution(&batch.states[i], &internals[i], &batch.masks[i])
            })
            .collect();

        let opts = OptimizeOpts {
            learning_rate,
            entropy_weight: self.config.entropy_regularization.value(&self.clock),
            l2_weight: self.config.l2_regularization.value(&self.clock),
            baseline_loss_weight: match self.baseline_optimizer {
                BaselineOptimizer::Weight(w) => Some(w),
                _ => None,
            },
        };
        let report: LossReport = <P as Policy<O>>::optimize(
            &mut self.policy,
            PolicyBatch {
                states: &batch.states,
                internals: &internals,
                masks: &batch.masks,
                actions: &batch.actions,
                rewards: &returns,
            },
            &opts,
        )?;

        // Early advantage estimation: the baseline catches up afterwards.
        if matches!(self.baseline_optimizer, BaselineOptimizer::Separate)
            && self.estimate_advantage == EstimateAdvantage::Early
        {
            baseline_loss = Some(self.baseline_step(
                &batch.states,
                &internals,
                &batch,
                &completed_returns,
                learning_rate,
            )?);
        }

        // Entropy and KL tracking.
        let entropy = mean(
            &(0..batch.len())
                .map(|i| {
                    self.policy
                        .entropy(&batch.states[i], &internals[i], &batch.masks[i])
                })
                .collect::<Vec<f32>>(),
        );
        let kl = mean(
            &(0..batch.len())
                .map(|i| {
                    self.policy.kl_divergence(
                        &batch.states[i],
                        &internals[i],
                        &batch.masks[i],
                        &references[i],
                    )
                })
                .collect::<Vec<f32>>(),
        );

        record.insert(
            "policy_objective_loss",
            RecordValue::Scalar(report.objective_loss),
        );
        record.insert(
            "policy_regularization_loss",
            RecordValue::Scalar(report.regularization_loss),
        );
        record.insert("policy_loss", RecordValue::Scalar(report.total()));
        if let Some(loss) = report.baseline_loss.or(baseline_loss) {
            record.insert("baseline_loss", RecordValue::Scalar(loss));
        }
        record.insert("entropy", RecordValue::Scalar(entropy));
        record.insert("kl_divergence", RecordValue::Scalar(kl));

        self.clock.updates += 1;
        trace!("update {} done", self.clock.updates);
        Ok(record)
    }

    fn baseline_step(
        &mut self,
        states: &[O],
        internals: &[Pi<O, P>],
        batch: &crate::memory::SampledBatch<O, Pi<O, P>>,
        returns: &[f32],
        learning_rate: f64,
    ) -> Result<f32> {
        let baseline_batch = BaselineBatch {
            states,
            internals,
            masks: &batch.masks,
            actions: &batch.actions,
            returns,
        };
        match &mut self.baseline {
            Some(b) => b.optimize(baseline_batch, learning_rate),
            None => Baseline::optimize(&mut self.policy, baseline_batch, learning_rate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentConfig, Frequency, UpdateConfig};
    use crate::estimator::ReturnConfig;
    use crate::memory::MemoryConfig;

    fn spec() -> ActionSpec {
        ActionSpec::new(vec![("zone", 3)])
    }

    /// Uniform-over-valid-levels policy with a constant baseline head.
    struct TestPolicy {
        spec: ActionSpec,
        optimize_calls: usize,
    }

    impl TestPolicy {
        fn new() -> Self {
            Self {
                spec: spec(),
                optimize_calls: 0,
            }
        }
    }

    impl Policy<Vec<f32>> for TestPolicy {
        type Internals = ();
        type Dist = Vec<Vec<f32>>;

        fn initial_internals(&self) -> () {}

        fn act(
            &mut self,
            _obs: &Vec<f32>,
            _internals: &(),
            mask: &ActionMask,
            deterministic: bool,
            rng: &mut StdRng,
        ) -> (DiscreteAction, ()) {
            let levels = (0..self.spec.len())
                .map(|i| {
                    let valid = mask.valid_levels(i);
                    if deterministic {
                        valid[0]
                    } else {
                        valid[rng.gen_range(0..valid.len())]
                    }
                })
                .collect();
            (DiscreteAction(levels), ())
        }

        fn distribution(
            &self,
            _obs: &Vec<f32>,
            _internals: &(),
            mask: &ActionMask,
        ) -> Vec<Vec<f32>> {
            (0..self.spec.len())
                .map(|i| {
                    let n = mask.valid_levels(i).len() as f32;
                    mask.levels(i)
                        .iter()
                        .map(|&v| if v { 1.0 / n } else { 0.0 })
                        .collect()
                })
                .collect()
        }

        fn entropy(&self, _obs: &Vec<f32>, _internals: &(), mask: &ActionMask) -> f32 {
            (0..self.spec.len())
                .map(|i| (mask.valid_levels(i).len() as f32).ln())
                .sum::<f32>()
                / self.spec.len() as f32
        }

        fn kl_divergence(
            &self,
            _obs: &Vec<f32>,
            _internals: &(),
            _mask: &ActionMask,
            _reference: &Vec<Vec<f32>>,
        ) -> f32 {
            0.0
        }

        fn optimize(
            &mut self,
            batch: PolicyBatch<Vec<f32>, ()>,
            _opts: &OptimizeOpts,
        ) -> Result<LossReport> {
            self.optimize_calls += 1;
            let mean = batch.rewards.iter().sum::<f32>() / batch.rewards.len() as f32;
            Ok(LossReport {
                objective_loss: -mean,
                regularization_loss: 0.0,
                baseline_loss: None,
            })
        }
    }

    impl Baseline<Vec<f32>> for TestPolicy {
        type Internals = ();

        fn state_value(&self, _obs: &Vec<f32>, _internals: &(), _mask: &ActionMask) -> f32 {
            0.5
        }

        fn action_value(
            &self,
            _obs: &Vec<f32>,
            _internals: &(),
            _mask: &ActionMask,
            _action: &DiscreteAction,
        ) -> f32 {
            0.25
        }

        fn optimize(&mut self, _batch: BaselineBatch<Vec<f32>, ()>, _lr: f64) -> Result<f32> {
            Ok(0.0)
        }
    }

    fn episode_config() -> AgentConfig {
        AgentConfig::new(
            UpdateConfig::new(UpdateUnit::Episodes, 1).frequency(Frequency::Never),
            ReturnConfig::default().discount(0.9),
        )
        .max_episode_timesteps(8)
        .memory(MemoryConfig::default().capacity(64))
    }

    type TestAgent = Agent<Vec<f32>, TestPolicy>;

    fn run_episode(agent: &mut TestAgent, rewards: &[f32]) {
        let last = rewards.len() - 1;
        for (i, &r) in rewards.iter().enumerate() {
            let mask = ActionMask::allow_all(&spec());
            agent.act(0, vec![i as f32], mask);
            let terminal = if i == last { Terminal::Natural } else { Terminal::Not };
            agent.observe(0, r, terminal).unwrap();
        }
    }

    #[test]
    fn three_step_episode_returns_are_stored() {
        let mut agent = TestAgent::build(episode_config(), spec(), TestPolicy::new(), None).unwrap();
        run_episode(&mut agent, &[1.0, 1.0, 1.0]);

        let batch = agent.memory.retrieve(&[0, 1, 2]);
        assert!((batch.reward[0] - 2.71).abs() < 1e-6);
        assert!((batch.reward[1] - 1.9).abs() < 1e-6);
        assert!((batch.reward[2] - 1.0).abs() < 1e-6);
        assert_eq!(agent.clock().timesteps, 3);
        assert_eq!(agent.clock().episodes, 1);
        assert_eq!(agent.last_episode_return(0), Some(3.0));
    }

    #[test]
    fn full_exploration_never_selects_masked_levels() {
        let config = episode_config().exploration(1.0);
        let mut agent = TestAgent::build(config, spec(), TestPolicy::new(), None).unwrap();
        let mask = ActionMask::new(vec![vec![true, false, true]]);
        for step in 0..64 {
            let action = agent.act(0, vec![0.0], mask.clone());
            assert_ne!(action.level(0), 1);
            let terminal = if step % 8 == 7 { Terminal::Natural } else { Terminal::Not };
            agent.observe(0, 0.0, terminal).unwrap();
        }
    }

    #[test]
    fn update_triggers_exactly_once_per_frequency() {
        let _ = env_logger::builder().is_test(true).try_init();
        let config = AgentConfig::new(
            UpdateConfig::new(UpdateUnit::Episodes, 2).frequency(Frequency::Units(2)),
            ReturnConfig::default().discount(0.9),
        )
        .max_episode_timesteps(8)
        .memory(MemoryConfig::default().capacity(64));
        let mut agent = TestAgent::build(config, spec(), TestPolicy::new(), None).unwrap();

        let mut updates_at = Vec::new();
        for episode in 1..=10 {
            for i in 0..3 {
                let mask = ActionMask::allow_all(&spec());
                agent.act(0, vec![i as f32], mask);
                let terminal = if i == 2 { Terminal::Natural } else { Terminal::Not };
                if agent.observe(0, 1.0, terminal).unwrap().is_some() {
                    updates_at.push(episode);
                }
            }
        }
        // start = max(0, frequency) = 2, so updates land on every second
        // completed episode from the second on.
        assert_eq!(updates_at, vec![2, 4, 6, 8, 10]);
        assert_eq!(agent.policy().optimize_calls, 5);
        assert_eq!(agent.clock().updates, 5);
    }

    #[test]
    fn update_report_contains_loss_and_entropy() {
        let config = AgentConfig::new(
            UpdateConfig::new(UpdateUnit::Episodes, 1),
            ReturnConfig::default().discount(0.9),
        )
        .max_episode_timesteps(8)
        .memory(MemoryConfig::default().capacity(64))
        .entropy_regularization(0.01);
        let mut agent = TestAgent::build(config, spec(), TestPolicy::new(), None).unwrap();
        run_episode(&mut agent, &[1.0, 1.0, 1.0]);

        let record = agent.update().unwrap();
        let mean_return = (2.71 + 1.9 + 1.0) / 3.0;
        assert!((record.get_scalar("update_return").unwrap() - mean_return).abs() < 1e-4);
        assert!((record.get_scalar("policy_objective_loss").unwrap() + mean_return).abs() < 1e-4);
        assert!((record.get_scalar("entropy").unwrap() - 3.0f32.ln()).abs() < 1e-5);
        assert_eq!(record.get_scalar("kl_divergence").unwrap(), 0.0);
    }

    #[test]
    fn shared_baseline_advantage_subtracts_state_values() {
        let config = AgentConfig::new(
            UpdateConfig::new(UpdateUnit::Episodes, 1),
            ReturnConfig::default()
                .discount(0.9)
                .estimate_advantage(crate::estimator::EstimateAdvantage::Late),
        )
        .max_episode_timesteps(8)
        .memory(MemoryConfig::default().capacity(64))
        .baseline_optimizer(BaselineOptimizer::Weight(0.5));
        let mut agent = TestAgent::build(config, spec(), TestPolicy::new(), None).unwrap();
        run_episode(&mut agent, &[1.0, 1.0, 1.0]);

        let record = agent.update().unwrap();
        // The constant baseline head predicts 0.5 everywhere.
        let mean_adv = (2.71 + 1.9 + 1.0) / 3.0 - 0.5;
        assert!((record.get_scalar("update_advantage").unwrap() - mean_adv).abs() < 1e-4);
    }

    #[test]
    #[should_panic(expected = "none or more than one terminal")]
    fn experience_without_terminal_panics() {
        let mut agent =
            TestAgent::build(episode_config(), spec(), TestPolicy::new(), None).unwrap();
        let mask = ActionMask::allow_all(&spec());
        let segment = Segment {
            states: vec![vec![0.0], vec![1.0]],
            internals: vec![(), ()],
            masks: vec![mask.clone(), mask],
            actions: vec![DiscreteAction(vec![0]), DiscreteAction(vec![0])],
            terminal: vec![Terminal::Not, Terminal::Not],
            reward: vec![1.0, 1.0],
        };
        agent.experience(segment);
    }

    #[test]
    fn experience_ingests_a_complete_episode() {
        let mut agent =
            TestAgent::build(episode_config(), spec(), TestPolicy::new(), None).unwrap();
        let mask = ActionMask::allow_all(&spec());
        let segment = Segment {
            states: vec![vec![0.0], vec![1.0]],
            internals: vec![(), ()],
            masks: vec![mask.clone(), mask],
            actions: vec![DiscreteAction(vec![0]), DiscreteAction(vec![1])],
            terminal: vec![Terminal::Not, Terminal::Natural],
            reward: vec![1.0, 2.0],
        };
        let (timesteps, episodes) = agent.experience(segment);
        assert_eq!((timesteps, episodes), (2, 1));
        let batch = agent.memory.retrieve(&[0, 1]);
        assert!((batch.reward[0] - (1.0 + 0.9 * 2.0)).abs() < 1e-6);
    }

    #[test]
    #[should_panic(expected = "masked out")]
    fn all_masked_sub_action_panics() {
        let mut agent =
            TestAgent::build(episode_config(), spec(), TestPolicy::new(), None).unwrap();
        let mask = ActionMask::new(vec![vec![false, false, false]]);
        agent.act(0, vec![0.0], mask);
    }

    #[test]
    fn streaming_mode_drains_horizon_complete_timesteps() {
        let config = AgentConfig::new(
            UpdateConfig::new(UpdateUnit::Timesteps, 4).frequency(Frequency::Never),
            ReturnConfig::default()
                .horizon(Horizon::Steps(2))
                .discount(0.5)
                .predict_horizon_values(None),
        )
        .max_episode_timesteps(32)
        .buffer_observe(BufferMode::Steps(4))
        .memory(MemoryConfig::default().capacity(64));
        let mut agent = TestAgent::build(config, spec(), TestPolicy::new(), None).unwrap();

        for i in 0..8 {
            let mask = ActionMask::allow_all(&spec());
            agent.act(0, vec![i as f32], mask);
            agent.observe(0, 1.0, Terminal::Not).unwrap();
        }
        // With horizon 2, the first six timesteps are complete and drained.
        assert_eq!(agent.memory.len(), 6);
        let batch = agent.memory.retrieve(&[0]);
        // Two-step return without bootstrap: 1 + 0.5·1.
        assert!((batch.reward[0] - 1.5).abs() < 1e-6);
    }
}
