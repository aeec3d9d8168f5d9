use std::time::Instant;

use crate::config::SimulationConfig;
use crate::input::InputSnapshot;
use crate::net::{ClientChannel, ClientEvent, ClientId, Command, Snapshot};
use crate::reconcile::{Correction, Reconciler};
use crate::simulation::{FixedFrequencyReprocessor, PredictedWorld, TickId};
use crate::timing::PeriodicSignal;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickSummary {
    pub tick_id: TickId,
    /// Whether a live fixed tick ran.
    pub processed: bool,
    pub commands_sent: usize,
    pub correction: Option<Correction>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub outer_ticks: u64,
    pub commands_sent: u64,
    pub snapshots_received: u64,
}

/// The predicting client: records input, simulates it immediately, ships it
/// to the server and reconciles with whatever comes back.
pub struct PredictingClient<C: ClientChannel> {
    channel: C,
    config: SimulationConfig,
    reprocessor: FixedFrequencyReprocessor,
    world: PredictedWorld,
    reconciler: Reconciler,
    send_signal: PeriodicSignal,
    unsent: Vec<Command>,
    client_id: Option<ClientId>,
    last_correction: Option<Correction>,
    stats: ClientStats,
}

impl<C: ClientChannel> PredictingClient<C> {
    pub fn new(channel: C, config: SimulationConfig) -> Self {
        Self {
            channel,
            reprocessor: FixedFrequencyReprocessor::new(config.tick_rate, config.history_capacity),
            world: PredictedWorld::new(config.motion()),
            reconciler: Reconciler::new(),
            send_signal: PeriodicSignal::new(config.send_rate, config.loop_rate),
            unsent: Vec::new(),
            client_id: None,
            last_correction: None,
            stats: ClientStats::default(),
            config,
        }
    }

    pub fn connect(&mut self) {
        self.channel.attempt_to_connect();
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn world(&self) -> &PredictedWorld {
        &self.world
    }

    pub fn reprocessor(&self) -> &FixedFrequencyReprocessor {
        &self.reprocessor
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    pub fn last_correction(&self) -> Option<Correction> {
        self.last_correction
    }

    pub fn stats(&self) -> ClientStats {
        self.stats
    }

    pub fn tick(&mut self, input: InputSnapshot) -> TickSummary {
        self.tick_at(Instant::now(), input)
    }

    /// One outer tick: record, predict, send, reconcile.
    pub fn tick_at(&mut self, now: Instant, input: InputSnapshot) -> TickSummary {
        self.stats.outer_ticks += 1;

        let tick_id = self.record(input);
        let processed = self.process_at(now);
        let commands_sent = if self.send_signal.process_and_get_signal() {
            self.flush()
        } else {
            0
        };
        let correction = self.receive();

        log::trace!(
            "Tick {} done, sending at {:.0} bps",
            tick_id,
            self.channel.average_bits_per_second_sent()
        );

        TickSummary {
            tick_id,
            processed,
            commands_sent,
            correction,
        }
    }

    /// Records `input` under the next tick id and queues its command.
    pub fn record(&mut self, input: InputSnapshot) -> TickId {
        let tick_id = self.reprocessor.record_input(input);
        self.unsent.push(Command::new(tick_id, input));
        log::trace!("Recorded tick {}: {:?}", tick_id, input.direction());
        tick_id
    }

    pub fn process_at(&mut self, now: Instant) -> bool {
        self.reprocessor.attempt_to_process_at(now, &mut self.world)
    }

    /// Hands every queued command to the channel, oldest first.
    pub fn flush(&mut self) -> usize {
        let count = self.unsent.len();
        for command in self.unsent.drain(..) {
            self.channel.send_command(&command);
        }
        self.stats.commands_sent += count as u64;
        count
    }

    /// Drains the channel and reconciles against the newest snapshot.
    pub fn receive(&mut self) -> Option<Correction> {
        let mut snapshots: Vec<Snapshot> = Vec::new();

        for event in self.channel.drain_events() {
            match event {
                ClientEvent::Connected { client_id } => {
                    log::info!("Connected as client {}", client_id);
                    self.client_id = Some(client_id);
                }
                ClientEvent::Snapshot(snapshot) => snapshots.push(snapshot),
                ClientEvent::Disconnected => {
                    log::warn!("Lost connection to server, reconnecting");
                    self.client_id = None;
                    self.channel.attempt_to_connect();
                }
            }
        }

        if snapshots.is_empty() {
            return None;
        }
        self.stats.snapshots_received += snapshots.len() as u64;

        let correction = self
            .reconciler
            .reconcile(snapshots, &mut self.reprocessor, &mut self.world)?;
        self.last_correction = Some(correction);
        Some(correction)
    }
}
