use glam::DVec2;

use crate::net::Snapshot;
use crate::simulation::{
    EntityState, FixedFrequencyReprocessor, PredictedWorld, TickId, TickSimulation,
};

/// A client simulation that can be overridden by authoritative state.
pub trait Reconcile: TickSimulation {
    fn predicted_state(&self) -> EntityState;

    /// Updates the copy of server state kept for display and comparison.
    fn set_authoritative_mirror(&mut self, state: EntityState);

    /// Overwrites the predicted state.
    fn slam(&mut self, state: EntityState);

    fn predicted_position_at(&self, _id: TickId) -> Option<DVec2> {
        None
    }
}

impl Reconcile for PredictedWorld {
    fn predicted_state(&self) -> EntityState {
        self.predicted()
    }

    fn set_authoritative_mirror(&mut self, state: EntityState) {
        self.set_authoritative(state);
    }

    fn slam(&mut self, state: EntityState) {
        self.set_predicted(state);
    }

    fn predicted_position_at(&self, id: TickId) -> Option<DVec2> {
        PredictedWorld::predicted_position_at(self, id)
    }
}

/// What one reconciliation changed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correction {
    pub reference: TickId,
    pub replayed: usize,
    pub missing: usize,
    /// Reconciled minus previously predicted position.
    pub position_delta: DVec2,
    pub velocity_delta: DVec2,
    /// Distance between our own prediction at `reference` and the server's
    /// position for it, when that prediction is still on record.
    pub misprediction: Option<f64>,
}

impl Correction {
    pub fn magnitude(&self) -> f64 {
        self.position_delta.length()
    }
}

/// Applies authoritative snapshots to a predicting client.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    last_reference: Option<TickId>,
    corrections: u64,
    superseded: u64,
    stale_dropped: u64,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconciles against the newest of `snapshots`, given in arrival order.
    ///
    /// The snapshot with the greatest reference wins; on equal references
    /// the later arrival wins. Returns `None` when there is nothing to apply.
    pub fn reconcile<S, I>(
        &mut self,
        snapshots: I,
        reprocessor: &mut FixedFrequencyReprocessor,
        sim: &mut S,
    ) -> Option<Correction>
    where
        S: Reconcile,
        I: IntoIterator<Item = Snapshot>,
    {
        let mut latest: Option<Snapshot> = None;
        for snapshot in snapshots {
            if let Some(current) = latest {
                self.superseded += 1;
                if snapshot.reference_entity_tick_id < current.reference_entity_tick_id {
                    continue;
                }
            }
            latest = Some(snapshot);
        }

        let snapshot = latest?;
        let reference = snapshot.reference_entity_tick_id;

        if let Some(last) = self.last_reference {
            if reference < last {
                self.stale_dropped += 1;
                log::debug!("Ignoring stale snapshot for tick {} (applied {})", reference, last);
                return None;
            }
        }

        Some(self.apply(snapshot, reprocessor, sim))
    }

    fn apply<S: Reconcile>(
        &mut self,
        snapshot: Snapshot,
        reprocessor: &mut FixedFrequencyReprocessor,
        sim: &mut S,
    ) -> Correction {
        let reference = snapshot.reference_entity_tick_id;
        let authoritative = snapshot.entity_state();
        let before = sim.predicted_state();

        let misprediction = sim
            .predicted_position_at(reference)
            .map(|predicted| predicted.distance(authoritative.position));
        if let Some(distance) = misprediction {
            log::trace!(
                "Predicted position at tick {} was off by {:.6}",
                reference,
                distance
            );
        }

        sim.set_authoritative_mirror(authoritative);
        sim.slam(authoritative);
        let report = reprocessor.re_process_after_id(reference, sim);
        reprocessor.acknowledge(reference);

        let after = sim.predicted_state();
        self.last_reference = Some(reference);
        self.corrections += 1;

        let correction = Correction {
            reference,
            replayed: report.replayed,
            missing: report.missing,
            position_delta: after.position - before.position,
            velocity_delta: after.velocity - before.velocity,
            misprediction,
        };

        log::debug!(
            "Reconciled at tick {}: replayed {}, correction {:.6}",
            reference,
            correction.replayed,
            correction.magnitude()
        );

        correction
    }

    pub fn last_reference(&self) -> Option<TickId> {
        self.last_reference
    }

    pub fn corrections(&self) -> u64 {
        self.corrections
    }

    pub fn superseded(&self) -> u64 {
        self.superseded
    }

    pub fn stale_dropped(&self) -> u64 {
        self.stale_dropped
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::input::InputSnapshot;
    use crate::simulation::{AuthoritativeEntity, MotionModel, TickMode};

    const DT: f64 = 1.0 / 60.0;

    fn right() -> InputSnapshot {
        InputSnapshot::new(false, false, false, true)
    }

    /// Records `count` right-pressed ticks and processes them in one live tick.
    fn predicted(count: u32) -> (FixedFrequencyReprocessor, PredictedWorld) {
        let mut reprocessor = FixedFrequencyReprocessor::new(60, 1024);
        let mut world = PredictedWorld::default();
        let start = Instant::now();

        reprocessor.attempt_to_process_at(start, &mut world);
        for _ in 0..count {
            reprocessor.record_input(right());
        }
        reprocessor.attempt_to_process_at(start + reprocessor.period(), &mut world);

        (reprocessor, world)
    }

    fn server_state(ticks: u32) -> EntityState {
        let mut entity = AuthoritativeEntity::new(MotionModel::default());
        for id in 0..ticks {
            entity.process(id, right(), DT, TickMode::Live);
        }
        entity.state()
    }

    #[test]
    fn matching_snapshot_yields_zero_correction() {
        let (mut reprocessor, mut world) = predicted(10);
        let mut reconciler = Reconciler::new();

        let snapshot = Snapshot::from_state(server_state(4), 3);
        let correction = reconciler
            .reconcile([snapshot], &mut reprocessor, &mut world)
            .unwrap();

        assert_eq!(correction.replayed, 6);
        assert_eq!(correction.position_delta, DVec2::ZERO);
        assert_eq!(correction.velocity_delta, DVec2::ZERO);
        assert_eq!(correction.misprediction, Some(0.0));
        assert_eq!(world.authoritative(), server_state(4));
    }

    #[test]
    fn divergent_snapshot_is_replayed_from_authoritative_state() {
        let (mut reprocessor, mut world) = predicted(5);
        let mut reconciler = Reconciler::new();

        let mut state = server_state(3);
        state.position.y += 1.0;
        let snapshot = Snapshot::from_state(state, 2);

        let correction = reconciler
            .reconcile([snapshot], &mut reprocessor, &mut world)
            .unwrap();

        assert_eq!(correction.replayed, 2);
        assert!((correction.position_delta.y - 1.0).abs() < 1e-12);
        assert!(correction.position_delta.x.abs() < 1e-12);
        assert!(world.unreconciled().position.y.abs() < 1e-12);
    }

    #[test]
    fn newest_reference_wins_and_ties_go_to_later_arrival() {
        let (mut reprocessor, mut world) = predicted(6);
        let mut reconciler = Reconciler::new();

        let mut tied = server_state(5);
        tied.position.y = 2.0;
        let snapshots = [
            Snapshot::from_state(server_state(3), 2),
            Snapshot::from_state(server_state(5), 4),
            Snapshot::from_state(server_state(2), 1),
            Snapshot::from_state(tied, 4),
        ];

        let correction = reconciler
            .reconcile(snapshots, &mut reprocessor, &mut world)
            .unwrap();

        assert_eq!(correction.reference, 4);
        assert_eq!(world.authoritative().position.y, 2.0);
        assert_eq!(reconciler.superseded(), 3);
    }

    #[test]
    fn stale_snapshots_are_ignored() {
        let (mut reprocessor, mut world) = predicted(6);
        let mut reconciler = Reconciler::new();

        reconciler.reconcile(
            [Snapshot::from_state(server_state(5), 4)],
            &mut reprocessor,
            &mut world,
        );
        let before = world.predicted();

        let stale = reconciler.reconcile(
            [Snapshot::from_state(EntityState::default(), 1)],
            &mut reprocessor,
            &mut world,
        );

        assert!(stale.is_none());
        assert_eq!(reconciler.stale_dropped(), 1);
        assert_eq!(world.predicted(), before);
        assert_eq!(reconciler.last_reference(), Some(4));
    }

    #[test]
    fn no_snapshots_means_no_correction() {
        let (mut reprocessor, mut world) = predicted(2);
        let mut reconciler = Reconciler::new();

        assert!(
            reconciler
                .reconcile(Vec::new(), &mut reprocessor, &mut world)
                .is_none()
        );
        assert_eq!(reconciler.corrections(), 0);
    }
}
