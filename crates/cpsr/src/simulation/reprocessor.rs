use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use crate::input::InputSnapshot;
use crate::timing::FixedTimestep;

use super::history::{InputHistory, TickId, TickIdSource};
use super::processor::{TickMode, TickSimulation};

/// Outcome of one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub reference: TickId,
    pub replayed: usize,
    /// Processed ticks after `reference` whose input was no longer in history.
    pub missing: usize,
}

/// Client-side fixed-rate processor with replay.
///
/// Owns the tick id source and the input history. Live ticks process every
/// pending id with its recorded input; [`re_process_after_id`] re-runs every
/// already processed id after a reference, ascending, with the same `dt`.
///
/// [`re_process_after_id`]: FixedFrequencyReprocessor::re_process_after_id
#[derive(Debug)]
pub struct FixedFrequencyReprocessor {
    timestep: FixedTimestep,
    ids: TickIdSource,
    history: InputHistory,
    pending: BTreeSet<TickId>,
    last_processed_id: Option<TickId>,
}

impl FixedFrequencyReprocessor {
    pub fn new(tick_rate: u32, history_capacity: usize) -> Self {
        Self {
            timestep: FixedTimestep::new(tick_rate),
            ids: TickIdSource::new(),
            history: InputHistory::new(history_capacity),
            pending: BTreeSet::new(),
            last_processed_id: None,
        }
    }

    pub fn dt(&self) -> f64 {
        self.timestep.dt()
    }

    pub fn period(&self) -> Duration {
        self.timestep.period()
    }

    pub fn history(&self) -> &InputHistory {
        &self.history
    }

    pub fn next_tick_id(&self) -> TickId {
        self.ids.peek()
    }

    /// Records `input` under a freshly allocated tick id and schedules it.
    pub fn record_input(&mut self, input: InputSnapshot) -> TickId {
        let id = self.ids.next_id();
        self.record_input_at(id, input);
        id
    }

    /// Records `input` under an explicit id. Returns false if the id is
    /// already recorded, already processed or was pruned.
    pub fn record_input_at(&mut self, id: TickId, input: InputSnapshot) -> bool {
        if !self.history.record(id, input) {
            log::warn!("Input for tick {} already recorded or pruned, ignoring", id);
            return false;
        }
        self.add_id(id)
    }

    fn is_processed(&self, id: TickId) -> bool {
        self.last_processed_id.is_some_and(|last| id <= last) && !self.pending.contains(&id)
    }

    /// Schedules `id` for the next live tick. Idempotent.
    pub fn add_id(&mut self, id: TickId) -> bool {
        if self.is_processed(id) {
            return false;
        }
        self.pending.insert(id)
    }

    pub fn attempt_to_process<S: TickSimulation>(&mut self, sim: &mut S) -> bool {
        self.attempt_to_process_at(Instant::now(), sim)
    }

    /// Runs one live tick if a full period has elapsed by `now`.
    pub fn attempt_to_process_at<S: TickSimulation>(&mut self, now: Instant, sim: &mut S) -> bool {
        self.timestep.accumulate_until(now);
        if !self.timestep.consume_tick() {
            return false;
        }

        let dt = self.timestep.dt();
        for id in std::mem::take(&mut self.pending) {
            let Some(input) = self.history.get(id) else {
                log::warn!("No recorded input for tick {}, skipping", id);
                continue;
            };

            sim.process(id, input, dt, TickMode::Live);
            self.last_processed_id = Some(self.last_processed_id.map_or(id, |last| last.max(id)));
        }

        true
    }

    /// Replays every processed tick after `reference`, ascending.
    ///
    /// The simulation must already hold the authoritative state as of
    /// `reference`. Pending ticks are left for the next live tick.
    pub fn re_process_after_id<S: TickSimulation>(
        &mut self,
        reference: TickId,
        sim: &mut S,
    ) -> ReplayReport {
        let mut report = ReplayReport {
            reference,
            ..Default::default()
        };

        let Some(newest) = self.last_processed_id else {
            return report;
        };
        if reference >= newest {
            if reference > newest {
                log::debug!(
                    "Reference {} is ahead of newest processed tick {}, nothing to replay",
                    reference,
                    newest
                );
            }
            return report;
        }

        let dt = self.timestep.dt();
        for (id, input) in self.history.range_after(reference) {
            if id > newest {
                break;
            }
            if self.pending.contains(&id) {
                continue;
            }

            sim.on_reprocess_start(id);
            sim.process(id, input, dt, TickMode::Replay);
            report.replayed += 1;
        }

        // Only ids the history has let go of count as missing; gaps that were
        // never recorded are not.
        let pruned = self.history.pruned_through().map(|p| p.min(newest));
        if let Some(pruned) = pruned.filter(|&pruned| pruned > reference) {
            let span = (pruned - reference) as usize;
            let still_pending = self.pending.range(reference + 1..=pruned).count();
            report.missing = span.saturating_sub(still_pending);
        }

        if report.missing > 0 {
            log::warn!(
                "Replay after tick {}: {} processed ticks no longer in history (pruned through {:?})",
                reference,
                report.missing,
                self.history.pruned_through()
            );
        }

        report
    }

    /// Marks everything up to `reference` as covered by authoritative state.
    ///
    /// History through `reference` is pruned, and pending ids at or before it
    /// are dropped since the authoritative state already includes them.
    pub fn acknowledge(&mut self, reference: TickId) -> usize {
        let covered: Vec<TickId> = self.pending.range(..=reference).copied().collect();
        for id in &covered {
            self.pending.remove(id);
        }
        if !covered.is_empty() {
            log::debug!(
                "{} pending ticks already covered by authoritative tick {}",
                covered.len(),
                reference
            );
        }

        self.last_processed_id = Some(
            self.last_processed_id
                .map_or(reference, |last| last.max(reference)),
        );

        self.history.prune_through(reference)
    }

    pub fn last_processed_id(&self) -> Option<TickId> {
        self.last_processed_id
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
