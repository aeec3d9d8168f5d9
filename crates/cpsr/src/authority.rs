use std::collections::BTreeMap;
use std::time::Instant;

use crate::config::SimulationConfig;
use crate::net::{ClientId, ServerChannel, ServerEvent, Snapshot};
use crate::simulation::{AuthoritativeEntity, EntityState, FixedFrequencyProcessor, TickId};
use crate::timing::PeriodicSignal;

struct Session {
    processor: FixedFrequencyProcessor,
    entity: AuthoritativeEntity,
    send_signal: PeriodicSignal,
}

impl Session {
    fn new(config: &SimulationConfig, now: Instant) -> Self {
        let mut session = Self {
            processor: FixedFrequencyProcessor::new(config.tick_rate),
            entity: AuthoritativeEntity::new(config.motion()),
            send_signal: PeriodicSignal::new(config.send_rate, config.loop_rate),
        };
        // Primes the processor clock; nothing is pending yet.
        session
            .processor
            .attempt_to_process_at(now, &mut session.entity);
        session
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub outer_ticks: u64,
    pub commands_received: u64,
    pub snapshots_sent: u64,
    pub orphan_commands: u64,
}

/// The authority: one processor and entity per connected client.
///
/// Call [`tick`](Self::tick) once per outer loop iteration. Each call drains
/// the channel, runs any due fixed ticks and sends rate-limited snapshots.
pub struct AuthoritativeServer<C: ServerChannel> {
    channel: C,
    config: SimulationConfig,
    sessions: BTreeMap<ClientId, Session>,
    stats: ServerStats,
}

impl<C: ServerChannel> AuthoritativeServer<C> {
    pub fn new(channel: C, config: SimulationConfig) -> Self {
        Self {
            channel,
            config,
            sessions: BTreeMap::new(),
            stats: ServerStats::default(),
        }
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

    pub fn stats(&self) -> ServerStats {
        self.stats
    }

    pub fn client_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn clients(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.sessions.keys().copied()
    }

    pub fn entity_state(&self, client_id: ClientId) -> Option<EntityState> {
        self.sessions.get(&client_id).map(|s| s.entity.state())
    }

    pub fn last_processed_id(&self, client_id: ClientId) -> Option<TickId> {
        self.sessions
            .get(&client_id)
            .and_then(|s| s.processor.last_processed_id())
    }

    pub fn tick(&mut self) -> usize {
        self.tick_at(Instant::now())
    }

    /// Returns the number of snapshots sent.
    pub fn tick_at(&mut self, now: Instant) -> usize {
        self.stats.outer_ticks += 1;

        for event in self.channel.drain_events() {
            self.handle_event(event, now);
        }

        let mut sent = 0;
        for (client_id, session) in &mut self.sessions {
            session
                .processor
                .attempt_to_process_at(now, &mut session.entity);

            let due = session.send_signal.process_and_get_signal();
            let Some(reference) = session.processor.last_processed_id() else {
                continue;
            };
            if !due {
                continue;
            }

            let snapshot = Snapshot::from_state(session.entity.state(), reference);
            log::trace!(
                "Snapshot for client {} at tick {}: {:?}",
                client_id,
                reference,
                snapshot.position
            );
            self.channel.send_snapshot(*client_id, &snapshot);
            sent += 1;
        }

        self.stats.snapshots_sent += sent as u64;
        sent
    }

    fn handle_event(&mut self, event: ServerEvent, now: Instant) {
        match event {
            ServerEvent::ClientConnected(client_id) => {
                log::info!("Session opened for client {}", client_id);
                self.sessions
                    .insert(client_id, Session::new(&self.config, now));
            }
            ServerEvent::ClientDisconnected(client_id) => {
                if self.sessions.remove(&client_id).is_some() {
                    log::info!("Session closed for client {}", client_id);
                }
            }
            ServerEvent::Command { client_id, command } => {
                let Some(session) = self.sessions.get_mut(&client_id) else {
                    self.stats.orphan_commands += 1;
                    log::warn!("Command from unknown client {}", client_id);
                    return;
                };

                self.stats.commands_received += 1;
                log::trace!(
                    "Client {} command {}: {:?}",
                    client_id,
                    command.entity_tick_id,
                    command.input.direction()
                );
                session
                    .processor
                    .receive(command.entity_tick_id, command.input);
            }
        }
    }
}
