use std::collections::BTreeMap;

use glam::DVec2;

use crate::input::InputSnapshot;

use super::history::TickId;
use super::motion::{EntityState, MotionModel};
use super::processor::{TickMode, TickSimulation};

const POSITION_RECORD_CAPACITY: usize = 1024;

/// Server-side state of one client's entity.
#[derive(Debug, Clone, Default)]
pub struct AuthoritativeEntity {
    motion: MotionModel,
    state: EntityState,
    ticks_processed: u64,
}

impl AuthoritativeEntity {
    pub fn new(motion: MotionModel) -> Self {
        Self {
            motion,
            state: EntityState::default(),
            ticks_processed: 0,
        }
    }

    pub fn state(&self) -> EntityState {
        self.state
    }

    pub fn ticks_processed(&self) -> u64 {
        self.ticks_processed
    }
}

impl TickSimulation for AuthoritativeEntity {
    fn process(&mut self, _id: TickId, input: InputSnapshot, dt: f64, _mode: TickMode) {
        self.motion.advance(&mut self.state, &input, dt);
        self.ticks_processed += 1;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorldCounters {
    pub live_ticks: u64,
    pub replayed_ticks: u64,
}

/// Client-side view of the controlled entity.
///
/// Holds three renditions of the same entity:
/// - `predicted`: live prediction, corrected by reconciliation.
/// - `authoritative`: the latest server state, never simulated locally.
/// - `unreconciled`: pure local prediction that no snapshot ever touches.
#[derive(Debug, Clone)]
pub struct PredictedWorld {
    motion: MotionModel,
    predicted: EntityState,
    authoritative: EntityState,
    unreconciled: EntityState,
    predicted_positions: BTreeMap<TickId, DVec2>,
    counters: WorldCounters,
}

impl PredictedWorld {
    pub fn new(motion: MotionModel) -> Self {
        Self {
            motion,
            predicted: EntityState::default(),
            authoritative: EntityState::default(),
            unreconciled: EntityState::default(),
            predicted_positions: BTreeMap::new(),
            counters: WorldCounters::default(),
        }
    }

    pub fn motion(&self) -> MotionModel {
        self.motion
    }

    pub fn predicted(&self) -> EntityState {
        self.predicted
    }

    pub fn authoritative(&self) -> EntityState {
        self.authoritative
    }

    pub fn unreconciled(&self) -> EntityState {
        self.unreconciled
    }

    pub fn counters(&self) -> WorldCounters {
        self.counters
    }

    /// Position the prediction held right after processing `id`.
    pub fn predicted_position_at(&self, id: TickId) -> Option<DVec2> {
        self.predicted_positions.get(&id).copied()
    }

    pub(crate) fn set_authoritative(&mut self, state: EntityState) {
        self.authoritative = state;
    }

    pub(crate) fn set_predicted(&mut self, state: EntityState) {
        self.predicted = state;
    }

    fn record_position(&mut self, id: TickId) {
        self.predicted_positions.insert(id, self.predicted.position);
        while self.predicted_positions.len() > POSITION_RECORD_CAPACITY {
            self.predicted_positions.pop_first();
        }
    }
}

impl Default for PredictedWorld {
    fn default() -> Self {
        Self::new(MotionModel::default())
    }
}

impl TickSimulation for PredictedWorld {
    fn process(&mut self, id: TickId, input: InputSnapshot, dt: f64, mode: TickMode) {
        self.motion.advance(&mut self.predicted, &input, dt);

        match mode {
            TickMode::Live => {
                self.motion.advance(&mut self.unreconciled, &input, dt);
                self.counters.live_ticks += 1;
            }
            TickMode::Replay => self.counters.replayed_ticks += 1,
        }

        self.record_position(id);
    }
}
