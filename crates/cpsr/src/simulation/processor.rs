use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use crate::input::InputSnapshot;
use crate::timing::FixedTimestep;

use super::history::TickId;

/// Whether a tick is being simulated for the first time or re-executed
/// during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TickMode {
    Live,
    Replay,
}

/// Per-tick simulation step driven by the fixed-frequency processors.
pub trait TickSimulation {
    fn process(&mut self, id: TickId, input: InputSnapshot, dt: f64, mode: TickMode);

    /// Called right before a replayed `process` call for `id`.
    fn on_reprocess_start(&mut self, _id: TickId) {}
}

/// Authoritative fixed-rate processor.
///
/// Inputs received since the last tick are pending; each tick advances the
/// simulation exactly once per pending id, in ascending id order, and then
/// forgets them. Ticks with nothing pending leave the simulation untouched.
#[derive(Debug)]
pub struct FixedFrequencyProcessor {
    timestep: FixedTimestep,
    pending: BTreeSet<TickId>,
    inputs: HashMap<TickId, InputSnapshot>,
    last_processed_id: Option<TickId>,
    stale_dropped: u64,
}

impl FixedFrequencyProcessor {
    pub fn new(tick_rate: u32) -> Self {
        Self {
            timestep: FixedTimestep::new(tick_rate),
            pending: BTreeSet::new(),
            inputs: HashMap::new(),
            last_processed_id: None,
            stale_dropped: 0,
        }
    }

    pub fn dt(&self) -> f64 {
        self.timestep.dt()
    }

    pub fn period(&self) -> Duration {
        self.timestep.period()
    }

    fn is_stale(&self, id: TickId) -> bool {
        self.last_processed_id.is_some_and(|last| id <= last)
    }

    pub fn add_id(&mut self, id: TickId) {
        if self.is_stale(id) {
            self.stale_dropped += 1;
            log::debug!("Ignoring stale id {} (last processed {:?})", id, self.last_processed_id);
            return;
        }
        self.pending.insert(id);
    }

    /// Stores the most recent input for `id`, replacing an unconsumed one.
    pub fn record_input(&mut self, id: TickId, input: InputSnapshot) {
        if self.is_stale(id) {
            return;
        }
        self.inputs.insert(id, input);
    }

    pub fn receive(&mut self, id: TickId, input: InputSnapshot) {
        self.record_input(id, input);
        self.add_id(id);
    }

    pub fn attempt_to_process<S: TickSimulation>(&mut self, sim: &mut S) -> bool {
        self.attempt_to_process_at(Instant::now(), sim)
    }

    /// Runs one server tick if a full period has elapsed by `now`.
    pub fn attempt_to_process_at<S: TickSimulation>(&mut self, now: Instant, sim: &mut S) -> bool {
        self.timestep.accumulate_until(now);
        if !self.timestep.consume_tick() {
            return false;
        }

        let dt = self.timestep.dt();
        for id in std::mem::take(&mut self.pending) {
            let Some(input) = self.inputs.remove(&id) else {
                log::info!("No input for id {}, skipping", id);
                continue;
            };

            sim.process(id, input, dt, TickMode::Live);
            self.last_processed_id = Some(id);
        }

        true
    }

    pub fn last_processed_id(&self) -> Option<TickId> {
        self.last_processed_id
    }

    pub fn processed_at_least_one_id(&self) -> bool {
        self.last_processed_id.is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn stale_dropped(&self) -> u64 {
        self.stale_dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<(TickId, InputSnapshot, TickMode)>,
    }

    impl TickSimulation for Recorder {
        fn process(&mut self, id: TickId, input: InputSnapshot, _dt: f64, mode: TickMode) {
            self.calls.push((id, input, mode));
        }
    }

    fn right() -> InputSnapshot {
        InputSnapshot::new(false, false, false, true)
    }

    #[test]
    fn processes_each_pending_id_once_per_tick() {
        let mut processor = FixedFrequencyProcessor::new(60);
        let mut sim = Recorder::default();
        let start = Instant::now();

        assert!(!processor.attempt_to_process_at(start, &mut sim));

        processor.receive(2, right());
        processor.receive(0, right());
        processor.receive(1, InputSnapshot::IDLE);

        assert!(processor.attempt_to_process_at(start + processor.period(), &mut sim));

        let ids: Vec<TickId> = sim.calls.iter().map(|(id, _, _)| *id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert!(sim.calls.iter().all(|(_, _, mode)| *mode == TickMode::Live));
        assert_eq!(processor.last_processed_id(), Some(2));
        assert_eq!(processor.pending_count(), 0);
    }

    #[test]
    fn does_not_fire_before_a_full_period() {
        let mut processor = FixedFrequencyProcessor::new(60);
        let mut sim = Recorder::default();
        let start = Instant::now();

        processor.attempt_to_process_at(start, &mut sim);
        processor.receive(0, right());

        assert!(!processor.attempt_to_process_at(start + Duration::from_millis(5), &mut sim));
        assert!(sim.calls.is_empty());
        assert!(!processor.processed_at_least_one_id());
    }

    #[test]
    fn pending_id_without_input_is_skipped() {
        let mut processor = FixedFrequencyProcessor::new(60);
        let mut sim = Recorder::default();
        let start = Instant::now();

        processor.attempt_to_process_at(start, &mut sim);
        processor.add_id(4);

        assert!(processor.attempt_to_process_at(start + processor.period(), &mut sim));
        assert!(sim.calls.is_empty());
        assert_eq!(processor.last_processed_id(), None);
    }

    #[test]
    fn stale_ids_are_dropped() {
        let mut processor = FixedFrequencyProcessor::new(60);
        let mut sim = Recorder::default();
        let start = Instant::now();

        processor.attempt_to_process_at(start, &mut sim);
        processor.receive(5, right());
        processor.attempt_to_process_at(start + processor.period(), &mut sim);

        processor.receive(3, right());
        assert_eq!(processor.pending_count(), 0);
        assert_eq!(processor.stale_dropped(), 1);
    }
}
