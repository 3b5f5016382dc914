//! Ring store of return-annotated transitions.
use super::{MemoryConfig, MemoryKind};
use crate::base::{ActionMask, DiscreteAction, Obs, Terminal};
use crate::buffer::Segment;
use crate::error::ParkrlError;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::VecDeque;
use std::fmt::Debug;

#[derive(Clone, Debug)]
struct Slot<O, I> {
    state: O,
    internals: I,
    mask: ActionMask,
    action: DiscreteAction,
    terminal: Terminal,
    reward: f32,
}

/// A batch of transitions retrieved from memory.
///
/// `indices` are global insertion indices, monotonically increasing over the
/// lifetime of the store; they stay valid as anchors for windowed retrieval
/// until their slots are overwritten.
pub struct SampledBatch<O, I> {
    /// Insertion indices of the batch elements.
    pub indices: Vec<usize>,

    /// States.
    pub states: Vec<O>,

    /// Recurrent carry going into each state.
    pub internals: Vec<I>,

    /// Action validity masks.
    pub masks: Vec<ActionMask>,

    /// Taken actions.
    pub actions: Vec<DiscreteAction>,

    /// Terminal markers.
    pub terminal: Vec<Terminal>,

    /// Estimated returns.
    pub reward: Vec<f32>,
}

impl<O, I> SampledBatch<O, I> {
    /// Number of transitions in the batch.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Predecessor windows anchored at batch indices.
pub struct Predecessors<O, I> {
    /// Window length per anchor, at most `horizon + 1` including the anchor.
    pub lengths: Vec<usize>,

    /// State windows in temporal order, ending at the anchor.
    pub states: Vec<Vec<O>>,

    /// Recurrent carry going into the first window element.
    pub initial_internals: Vec<I>,
}

/// Successor window endpoints anchored at batch indices.
pub struct Successors<O, I> {
    /// Distance from each anchor to its window's final element.
    pub offsets: Vec<usize>,

    /// State at the final element.
    pub states: Vec<O>,

    /// Recurrent carry going into the final element.
    pub internals: Vec<I>,

    /// Mask at the final element.
    pub masks: Vec<ActionMask>,

    /// Action at the final element.
    pub actions: Vec<DiscreteAction>,

    /// Terminal marker of the final element.
    pub terminal: Vec<Terminal>,
}

/// Ring store of return-annotated transitions.
///
/// Writes are append-only and single-writer per enqueued segment; retrieval
/// never overlaps an episode that is still being buffered by a worker,
/// because only flushed segments reach the store. Capacity is validated at
/// construction so that no transition is overwritten before the windows that
/// need it become unavailable.
pub struct Memory<O, I> {
    kind: MemoryKind,
    capacity: usize,
    slots: Vec<Option<Slot<O, I>>>,

    /// Total number of transitions ever enqueued; the next insertion index.
    head: usize,

    /// Number of stored transitions, at most `capacity`.
    size: usize,

    /// Complete episodes as `(start, end)` insertion-index pairs.
    episodes: VecDeque<(usize, usize)>,

    /// Start index of the episode currently being appended.
    open_episode_start: usize,

    rng: StdRng,
}

impl<O, I> Memory<O, I>
where
    O: Obs,
    I: Clone + Debug,
{
    /// Builds a memory store.
    ///
    /// Fails when the configured capacity is below `min_capacity`, the bound
    /// derived from batch size, horizons and maximum episode length; a store
    /// below that bound would overwrite transitions before they could be
    /// consumed.
    pub fn build(config: &MemoryConfig, min_capacity: usize) -> Result<Self, ParkrlError> {
        let capacity = config.capacity.unwrap_or(min_capacity);
        if capacity < min_capacity {
            return Err(ParkrlError::config(
                "memory.capacity",
                format!(
                    "capacity {} is below the required minimum of {}",
                    capacity, min_capacity
                ),
            ));
        }
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Ok(Self {
            kind: config.kind,
            capacity,
            slots,
            head: 0,
            size: 0,
            episodes: VecDeque::new(),
            open_episode_start: 0,
            rng: StdRng::seed_from_u64(config.seed),
        })
    }

    /// Retrieval strategy of the store.
    pub fn kind(&self) -> MemoryKind {
        self.kind
    }

    /// Number of stored transitions.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Number of stored complete episodes.
    pub fn num_episodes(&self) -> usize {
        self.episodes.len()
    }

    /// Oldest valid insertion index.
    fn oldest(&self) -> usize {
        self.head - self.size
    }

    fn slot(&self, index: usize) -> &Slot<O, I> {
        debug_assert!(index >= self.oldest() && index < self.head);
        self.slots[index % self.capacity]
            .as_ref()
            .expect("memory slot is populated within the valid range")
    }

    /// Appends a return-annotated segment.
    ///
    /// Single-writer; never blocks. Panics if an episode outgrows the whole
    /// store, which capacity validation is supposed to preclude.
    pub fn enqueue(&mut self, segment: Segment<O, I>) {
        let Segment {
            states,
            internals,
            masks,
            actions,
            terminal,
            reward,
        } = segment;
        let it = states
            .into_iter()
            .zip(internals)
            .zip(masks)
            .zip(actions)
            .zip(terminal)
            .zip(reward);
        for (((((state, internals), mask), action), terminal), reward) in it {
            let index = self.head;
            self.slots[index % self.capacity] = Some(Slot {
                state,
                internals,
                mask,
                action,
                terminal,
                reward,
            });
            self.head += 1;
            if self.size < self.capacity {
                self.size += 1;
            }
            assert!(
                self.open_episode_start >= self.oldest(),
                "memory overwrote an open episode; capacity is undersized"
            );
            if terminal.is_terminal() {
                self.episodes.push_back((self.open_episode_start, index));
                self.open_episode_start = index + 1;
            }
        }
        // Drop episodes whose transitions were overwritten.
        let oldest = self.oldest();
        while matches!(self.episodes.front(), Some(&(start, _)) if start < oldest) {
            self.episodes.pop_front();
        }
    }

    /// Samples `n` anchor indices with at least `past_horizon` predecessors
    /// and `future_horizon` successors available in the store.
    ///
    /// Windows around the anchors are additionally clipped at episode
    /// boundaries on retrieval.
    pub fn retrieve_timesteps(
        &mut self,
        n: usize,
        past_horizon: usize,
        future_horizon: usize,
    ) -> Vec<usize> {
        let lo = self.oldest() + past_horizon;
        assert!(
            self.head >= future_horizon + 1,
            "memory holds too few transitions for the requested horizons"
        );
        let hi = self.head - 1 - future_horizon;
        assert!(hi >= lo, "memory holds too few transitions for the requested horizons");
        match self.kind {
            MemoryKind::Recent => {
                assert!(
                    hi + 1 - lo >= n,
                    "memory holds {} eligible transitions, batch needs {}",
                    hi + 1 - lo,
                    n
                );
                ((hi + 1 - n)..=hi).collect()
            }
            MemoryKind::Replay => (0..n)
                .map(|_| self.rng.gen_range(lo..=hi))
                .collect(),
        }
    }

    /// Samples the indices of `n` complete episodes, concatenated in
    /// temporal order per episode.
    pub fn retrieve_episodes(&mut self, n: usize) -> Vec<usize> {
        assert!(
            self.episodes.len() >= n,
            "memory holds {} complete episodes, batch needs {}",
            self.episodes.len(),
            n
        );
        let picks: Vec<(usize, usize)> = match self.kind {
            MemoryKind::Recent => self
                .episodes
                .iter()
                .skip(self.episodes.len() - n)
                .copied()
                .collect(),
            MemoryKind::Replay => (0..n)
                .map(|_| self.episodes[self.rng.gen_range(0..self.episodes.len())])
                .collect(),
        };
        picks
            .into_iter()
            .flat_map(|(start, end)| start..=end)
            .collect()
    }

    /// Retrieves the transitions at the given indices.
    pub fn retrieve(&self, indices: &[usize]) -> SampledBatch<O, I> {
        let mut batch = SampledBatch {
            indices: indices.to_vec(),
            states: Vec::with_capacity(indices.len()),
            internals: Vec::with_capacity(indices.len()),
            masks: Vec::with_capacity(indices.len()),
            actions: Vec::with_capacity(indices.len()),
            terminal: Vec::with_capacity(indices.len()),
            reward: Vec::with_capacity(indices.len()),
        };
        for &index in indices {
            let slot = self.slot(index);
            batch.states.push(slot.state.clone());
            batch.internals.push(slot.internals.clone());
            batch.masks.push(slot.mask.clone());
            batch.actions.push(slot.action.clone());
            batch.terminal.push(slot.terminal);
            batch.reward.push(slot.reward);
        }
        batch
    }

    /// Retrieves predecessor windows of up to `horizon` elements before each
    /// anchor, clipped at the episode boundary and at the oldest stored
    /// transition. The anchor itself is always included.
    pub fn predecessors(&self, indices: &[usize], horizon: usize) -> Predecessors<O, I> {
        let oldest = self.oldest();
        let mut result = Predecessors {
            lengths: Vec::with_capacity(indices.len()),
            states: Vec::with_capacity(indices.len()),
            initial_internals: Vec::with_capacity(indices.len()),
        };
        for &anchor in indices {
            let mut start = anchor;
            while start > oldest
                && anchor - start < horizon
                && !self.slot(start - 1).terminal.is_terminal()
            {
                start -= 1;
            }
            result.lengths.push(anchor - start + 1);
            result
                .states
                .push((start..=anchor).map(|i| self.slot(i).state.clone()).collect());
            result.initial_internals.push(self.slot(start).internals.clone());
        }
        result
    }

    /// Retrieves the endpoints of successor windows of up to `horizon`
    /// elements after each anchor, clipped at the episode's terminal and at
    /// the newest stored transition.
    pub fn successors(&self, indices: &[usize], horizon: usize) -> Successors<O, I> {
        let newest = self.head - 1;
        let mut result = Successors {
            offsets: Vec::with_capacity(indices.len()),
            states: Vec::with_capacity(indices.len()),
            internals: Vec::with_capacity(indices.len()),
            masks: Vec::with_capacity(indices.len()),
            actions: Vec::with_capacity(indices.len()),
            terminal: Vec::with_capacity(indices.len()),
        };
        for &anchor in indices {
            let mut end = anchor;
            while end < newest && end - anchor < horizon && !self.slot(end).terminal.is_terminal()
            {
                end += 1;
            }
            let slot = self.slot(end);
            result.offsets.push(end - anchor);
            result.states.push(slot.state.clone());
            result.internals.push(slot.internals.clone());
            result.masks.push(slot.mask.clone());
            result.actions.push(slot.action.clone());
            result.terminal.push(slot.terminal);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::ActionSpec;

    fn segment(rewards: Vec<f32>, terminal: Terminal) -> Segment<Vec<f32>, ()> {
        let spec = ActionSpec::new(vec![("zone", 3)]);
        let len = rewards.len();
        let mut terminals = vec![Terminal::Not; len];
        terminals[len - 1] = terminal;
        Segment {
            states: (0..len).map(|i| vec![i as f32]).collect(),
            internals: vec![(); len],
            masks: vec![ActionMask::allow_all(&spec); len],
            actions: vec![DiscreteAction(vec![0]); len],
            terminal: terminals,
            reward: rewards,
        }
    }

    fn memory(kind: MemoryKind, capacity: usize) -> Memory<Vec<f32>, ()> {
        let config = MemoryConfig::default().kind(kind).capacity(capacity);
        Memory::build(&config, capacity).unwrap()
    }

    #[test]
    fn undersized_capacity_is_a_config_error() {
        let config = MemoryConfig::default().capacity(10);
        assert!(Memory::<Vec<f32>, ()>::build(&config, 20).is_err());
        // Omitted capacity falls back to the minimum.
        let config = MemoryConfig::default();
        let memory = Memory::<Vec<f32>, ()>::build(&config, 20).unwrap();
        assert_eq!(memory.len(), 0);
    }

    #[test]
    fn recent_retrieval_returns_latest_in_order() {
        let mut memory = memory(MemoryKind::Recent, 64);
        memory.enqueue(segment(vec![1.0; 5], Terminal::Natural));
        memory.enqueue(segment(vec![2.0; 5], Terminal::Natural));
        let indices = memory.retrieve_timesteps(4, 0, 0);
        assert_eq!(indices, vec![6, 7, 8, 9]);
        let batch = memory.retrieve(&indices);
        assert_eq!(batch.reward, vec![2.0; 4]);
    }

    #[test]
    fn replay_retrieval_respects_horizon_margins() {
        let mut memory = memory(MemoryKind::Replay, 64);
        memory.enqueue(segment(vec![0.0; 20], Terminal::Natural));
        for _ in 0..50 {
            let indices = memory.retrieve_timesteps(8, 3, 4);
            for &i in &indices {
                assert!(i >= 3 && i <= 15);
            }
        }
    }

    #[test]
    fn windows_never_cross_episode_boundaries() {
        let mut memory = memory(MemoryKind::Recent, 64);
        memory.enqueue(segment(vec![1.0; 4], Terminal::Natural));
        memory.enqueue(segment(vec![2.0; 4], Terminal::Abort));

        // Anchor just after the first boundary: lookback clips to itself.
        let pred = memory.predecessors(&[4], 3);
        assert_eq!(pred.lengths, vec![1]);
        assert_eq!(pred.states[0].len(), 1);

        // Anchor mid-second-episode: clips at the boundary, not before.
        let pred = memory.predecessors(&[6], 5);
        assert_eq!(pred.lengths, vec![3]);
        assert_eq!(pred.states[0][0], vec![0.0]);

        // Successors stop at the first episode's terminal.
        let succ = memory.successors(&[1], 10);
        assert_eq!(succ.offsets, vec![2]);
        assert_eq!(succ.terminal, vec![Terminal::Natural]);

        // Successors within the second episode stop at its abort terminal.
        let succ = memory.successors(&[5], 10);
        assert_eq!(succ.offsets, vec![2]);
        assert_eq!(succ.terminal, vec![Terminal::Abort]);
    }

    #[test]
    fn successor_offsets_are_bounded_by_horizon() {
        let mut memory = memory(MemoryKind::Recent, 64);
        memory.enqueue(segment(vec![1.0; 10], Terminal::Natural));
        let succ = memory.successors(&[0, 7], 4);
        assert_eq!(succ.offsets, vec![4, 2]);
    }

    #[test]
    fn episode_retrieval_concatenates_complete_episodes() {
        let mut memory = memory(MemoryKind::Recent, 64);
        memory.enqueue(segment(vec![1.0; 3], Terminal::Natural));
        memory.enqueue(segment(vec![2.0; 2], Terminal::Natural));
        memory.enqueue(segment(vec![3.0; 3], Terminal::Natural));
        assert_eq!(memory.num_episodes(), 3);
        let indices = memory.retrieve_episodes(2);
        assert_eq!(indices, vec![3, 4, 5, 6, 7]);
    }

    #[test]
    fn overwritten_episodes_are_dropped() {
        let mut memory = memory(MemoryKind::Recent, 8);
        for _ in 0..4 {
            memory.enqueue(segment(vec![1.0; 3], Terminal::Natural));
        }
        // 12 transitions through a capacity-8 ring: the first episode is
        // gone, a second one is partially overwritten.
        assert!(memory.num_episodes() <= 2);
        assert_eq!(memory.len(), 8);
    }
}
