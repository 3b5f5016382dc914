//! Per-worker buffering of pending transitions.
//!
//! Every parallel worker owns one [`ActBuffer`]. Acting appends the
//! state/internals/mask/action quadruple at the write cursor; observing
//! appends the matching reward and terminal marker. Depending on the buffer
//! mode, the buffered episode is flushed as a whole at its terminal, or
//! horizon-complete timesteps are drained early while the episode is still
//! running (circular mode).
use crate::base::{ActionMask, DiscreteAction, Obs, Terminal};
use std::collections::VecDeque;
use std::fmt::Debug;

/// An ordered run of transitions from a single worker.
///
/// Holds at most one terminal marker, and if present it is at the last
/// position. `reward` carries raw rewards on the way into the return
/// estimator and estimated returns afterwards.
#[derive(Clone, Debug)]
pub struct Segment<O, I> {
    /// States, in temporal order.
    pub states: Vec<O>,

    /// Recurrent carry going into each state.
    pub internals: Vec<I>,

    /// Action validity masks.
    pub masks: Vec<ActionMask>,

    /// Taken actions.
    pub actions: Vec<DiscreteAction>,

    /// Terminal markers.
    pub terminal: Vec<Terminal>,

    /// Rewards, or estimated returns once annotated.
    pub reward: Vec<f32>,
}

impl<O, I> Segment<O, I> {
    /// Number of transitions.
    pub fn len(&self) -> usize {
        self.terminal.len()
    }

    /// Whether the segment holds no transitions.
    pub fn is_empty(&self) -> bool {
        self.terminal.is_empty()
    }
}

/// Buffer of pending transitions for one parallel worker.
///
/// The write cursor only resets (or wraps past drained entries) after the
/// corresponding transitions were handed to the return estimator; cursors are
/// strictly per-worker and never shared.
pub struct ActBuffer<O, I> {
    capacity: Option<usize>,
    circular: bool,

    /// Insertion index of the oldest undrained entry.
    start: usize,

    /// Write cursor, i.e. insertion index of the next `record`.
    index: usize,

    /// Number of observed (reward, terminal) pairs since episode start.
    observed: usize,

    states: VecDeque<O>,
    internals: VecDeque<I>,
    masks: VecDeque<ActionMask>,
    actions: VecDeque<DiscreteAction>,
    terminal: VecDeque<Terminal>,
    reward: VecDeque<f32>,
}

impl<O, I> ActBuffer<O, I>
where
    O: Obs,
    I: Clone + Debug,
{
    /// Creates a buffer.
    ///
    /// `capacity` bounds the number of live (undrained) entries; `circular`
    /// enables mid-episode draining of horizon-complete timesteps.
    pub fn new(capacity: Option<usize>, circular: bool) -> Self {
        Self {
            capacity,
            circular,
            start: 0,
            index: 0,
            observed: 0,
            states: VecDeque::new(),
            internals: VecDeque::new(),
            masks: VecDeque::new(),
            actions: VecDeque::new(),
            terminal: VecDeque::new(),
            reward: VecDeque::new(),
        }
    }

    /// Whether mid-episode draining is enabled.
    pub fn is_circular(&self) -> bool {
        self.circular
    }

    /// Write cursor position within the current episode.
    pub fn cursor(&self) -> usize {
        self.index
    }

    /// Insertion index of the oldest undrained entry.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Number of observed, undrained timesteps.
    pub fn observed_len(&self) -> usize {
        self.observed - self.start
    }

    /// Appends a pending transition at the write cursor.
    ///
    /// Panics if the previous `record` has not been observed yet, or if the
    /// buffer capacity is exhausted (an episode outgrew
    /// `max_episode_timesteps`).
    pub fn record(&mut self, state: O, internals: I, mask: ActionMask, action: DiscreteAction) {
        assert_eq!(
            self.index, self.observed,
            "act-buffer record without observing the previous step"
        );
        if let Some(capacity) = self.capacity {
            assert!(
                self.index - self.start < capacity,
                "act-buffer overflow: episode exceeds the buffer capacity of {}",
                capacity
            );
        }
        self.states.push_back(state);
        self.internals.push_back(internals);
        self.masks.push_back(mask);
        self.actions.push_back(action);
        self.index += 1;
    }

    /// Appends the reward and terminal marker of the pending transition.
    pub fn observe_step(&mut self, reward: f32, terminal: Terminal) {
        assert_eq!(
            self.index,
            self.observed + 1,
            "act-buffer observe without a pending act"
        );
        self.reward.push_back(reward);
        self.terminal.push_back(terminal);
        self.observed += 1;
    }

    /// Returns all buffered transitions since the last flush, in call order,
    /// and resets the cursors.
    ///
    /// Panics when called with an unobserved pending act.
    pub fn flush_episode(&mut self) -> Segment<O, I> {
        assert_eq!(
            self.index, self.observed,
            "act-buffer flush with an unobserved pending act"
        );
        let segment = Segment {
            states: self.states.drain(..).collect(),
            internals: self.internals.drain(..).collect(),
            masks: self.masks.drain(..).collect(),
            actions: self.actions.drain(..).collect(),
            terminal: self.terminal.drain(..).collect(),
            reward: self.reward.drain(..).collect(),
        };
        self.start = 0;
        self.index = 0;
        self.observed = 0;
        segment
    }

    /// Drains the oldest `n` observed transitions without ending the episode.
    ///
    /// Only valid in circular mode. The drained transitions carry no terminal
    /// marker; their rewards are replaced by the passed estimated returns.
    pub fn drain(&mut self, n: usize, returns: Vec<f32>) -> Segment<O, I> {
        assert!(self.circular, "act-buffer drain in episode mode");
        assert!(n <= self.observed - self.start);
        assert_eq!(n, returns.len());
        let segment = Segment {
            states: self.states.drain(..n).collect(),
            internals: self.internals.drain(..n).collect(),
            masks: self.masks.drain(..n).collect(),
            actions: self.actions.drain(..n).collect(),
            terminal: self.terminal.drain(..n).collect(),
            reward: returns,
        };
        self.reward.drain(..n);
        self.start += n;
        segment
    }

    /// Observed rewards of the undrained region, oldest first.
    pub fn rewards(&self) -> Vec<f32> {
        self.reward.iter().copied().collect()
    }

    /// State at insertion index `i` of the current episode.
    pub fn state(&self, i: usize) -> &O {
        &self.states[i - self.start]
    }

    /// Recurrent carry at insertion index `i` of the current episode.
    pub fn internals_at(&self, i: usize) -> &I {
        &self.internals[i - self.start]
    }

    /// Mask at insertion index `i` of the current episode.
    pub fn mask(&self, i: usize) -> &ActionMask {
        &self.masks[i - self.start]
    }

    /// Action at insertion index `i` of the current episode.
    pub fn action(&self, i: usize) -> &DiscreteAction {
        &self.actions[i - self.start]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{ActionSpec, Terminal};

    fn spec() -> ActionSpec {
        ActionSpec::new(vec![("zone", 3)])
    }

    fn record_step(buffer: &mut ActBuffer<Vec<f32>, ()>, level: usize) {
        let mask = ActionMask::allow_all(&spec());
        buffer.record(vec![level as f32], (), mask, DiscreteAction(vec![level]));
    }

    #[test]
    fn cursor_round_trip() {
        let mut buffer: ActBuffer<Vec<f32>, ()> = ActBuffer::new(Some(16), false);
        for k in 0..5 {
            record_step(&mut buffer, k % 3);
            let terminal = if k == 4 { Terminal::Natural } else { Terminal::Not };
            buffer.observe_step(1.0, terminal);
        }
        assert_eq!(buffer.cursor(), 5);

        let segment = buffer.flush_episode();
        assert_eq!(segment.len(), 5);
        assert_eq!(buffer.cursor(), 0);
        // Call order is preserved.
        let levels: Vec<usize> = segment.actions.iter().map(|a| a.level(0)).collect();
        assert_eq!(levels, vec![0, 1, 2, 0, 1]);
    }

    #[test]
    #[should_panic(expected = "record without observing")]
    fn record_twice_without_observe_panics() {
        let mut buffer: ActBuffer<Vec<f32>, ()> = ActBuffer::new(None, false);
        record_step(&mut buffer, 0);
        record_step(&mut buffer, 1);
    }

    #[test]
    fn drain_keeps_cursor_monotonic() {
        let mut buffer: ActBuffer<Vec<f32>, ()> = ActBuffer::new(Some(8), true);
        for k in 0..6 {
            record_step(&mut buffer, k % 3);
            buffer.observe_step(k as f32, Terminal::Not);
        }
        let segment = buffer.drain(2, vec![10.0, 11.0]);
        assert_eq!(segment.len(), 2);
        assert_eq!(segment.reward, vec![10.0, 11.0]);
        assert_eq!(buffer.start(), 2);
        assert_eq!(buffer.cursor(), 6);
        assert_eq!(buffer.rewards(), vec![2.0, 3.0, 4.0, 5.0]);
        // Index-based accessors keep working after the drain.
        assert_eq!(buffer.state(2), &vec![2.0]);
    }

    #[test]
    #[should_panic(expected = "overflow")]
    fn overflow_panics() {
        let mut buffer: ActBuffer<Vec<f32>, ()> = ActBuffer::new(Some(2), false);
        for _ in 0..3 {
            record_step(&mut buffer, 0);
            buffer.observe_step(0.0, Terminal::Not);
        }
    }
}
