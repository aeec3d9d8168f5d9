use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;

use super::channel::{
    ClientChannel, ClientEvent, ClientId, ConnectionState, ServerChannel, ServerEvent,
};
use super::protocol::{Command, Snapshot};
use super::stats::{BandwidthMeter, NetworkStats, PacketLossSimulation};

enum Uplink {
    Connected(ClientId),
    Command(ClientId, Vec<u8>),
    Disconnected(ClientId),
}

struct Hub {
    next_client_id: ClientId,
    uplink: VecDeque<Uplink>,
    downlinks: HashMap<ClientId, VecDeque<Vec<u8>>>,
    loss: PacketLossSimulation,
    rng: StdRng,
}

/// In-process server endpoint. Records travel as encoded bytes, so the codec
/// runs exactly as it would over sockets.
pub struct LoopbackServer {
    hub: Arc<Mutex<Hub>>,
    meter: BandwidthMeter,
    stats: NetworkStats,
}

impl LoopbackServer {
    pub fn new() -> Self {
        Self::with_loss(PacketLossSimulation::default(), 0)
    }

    /// Snapshot loss is drawn from an rng seeded with `seed`.
    pub fn with_loss(loss: PacketLossSimulation, seed: u64) -> Self {
        let hub = Hub {
            next_client_id: 0,
            uplink: VecDeque::new(),
            downlinks: HashMap::new(),
            loss,
            rng: StdRng::seed_from_u64(seed),
        };

        Self {
            hub: Arc::new(Mutex::new(hub)),
            meter: BandwidthMeter::default(),
            stats: NetworkStats::default(),
        }
    }

    /// A client endpoint wired to this server. It is not connected yet.
    pub fn client(&self) -> LoopbackClient {
        LoopbackClient {
            hub: Arc::clone(&self.hub),
            state: ConnectionState::Disconnected,
            client_id: None,
            unsent: Vec::new(),
            events: Vec::new(),
            meter: BandwidthMeter::default(),
            stats: NetworkStats::default(),
        }
    }

    pub fn stats(&self) -> NetworkStats {
        self.stats
    }
}

impl Default for LoopbackServer {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerChannel for LoopbackServer {
    fn drain_events(&mut self) -> Vec<ServerEvent> {
        let uplink: Vec<Uplink> = self.hub.lock().uplink.drain(..).collect();
        let mut events = Vec::with_capacity(uplink.len());

        for record in uplink {
            match record {
                Uplink::Connected(client_id) => events.push(ServerEvent::ClientConnected(client_id)),
                Uplink::Disconnected(client_id) => {
                    events.push(ServerEvent::ClientDisconnected(client_id))
                }
                Uplink::Command(client_id, bytes) => match Command::decode(&bytes) {
                    Ok(command) => {
                        self.stats.on_received(bytes.len());
                        events.push(ServerEvent::Command { client_id, command });
                    }
                    Err(err) => {
                        self.stats.malformed_dropped += 1;
                        log::warn!("Dropping malformed command from client {}: {}", client_id, err);
                    }
                },
            }
        }

        events
    }

    fn send_snapshot(&mut self, client_id: ClientId, snapshot: &Snapshot) {
        let bytes = match snapshot.encode() {
            Ok(bytes) => bytes,
            Err(err) => {
                log::warn!("Cannot encode snapshot for client {}: {}", client_id, err);
                return;
            }
        };

        self.meter.record(bytes.len());
        self.stats.on_sent(bytes.len());

        let mut hub = self.hub.lock();
        let hub = &mut *hub;
        if hub.loss.should_drop(&mut hub.rng) {
            self.stats.simulated_losses += 1;
            log::trace!("Simulated loss of snapshot for client {}", client_id);
            return;
        }

        match hub.downlinks.get_mut(&client_id) {
            Some(queue) => queue.push_back(bytes.to_vec()),
            None => log::debug!("Snapshot for unknown client {} discarded", client_id),
        }
    }

    fn average_bits_per_second_sent(&mut self) -> f64 {
        self.meter.bits_per_second()
    }
}

/// In-process client endpoint created by [`LoopbackServer::client`].
pub struct LoopbackClient {
    hub: Arc<Mutex<Hub>>,
    state: ConnectionState,
    client_id: Option<ClientId>,
    unsent: Vec<[u8; Command::SIZE]>,
    events: Vec<ClientEvent>,
    meter: BandwidthMeter,
    stats: NetworkStats,
}

impl LoopbackClient {
    pub fn disconnect(&mut self) {
        let Some(client_id) = self.client_id.take() else {
            return;
        };

        let mut hub = self.hub.lock();
        hub.downlinks.remove(&client_id);
        hub.uplink.push_back(Uplink::Disconnected(client_id));
        self.state = ConnectionState::Disconnected;
        self.events.push(ClientEvent::Disconnected);
    }

    pub fn stats(&self) -> NetworkStats {
        self.stats
    }

    fn transmit(&mut self, client_id: ClientId, bytes: [u8; Command::SIZE]) {
        self.meter.record(bytes.len());
        self.stats.on_sent(bytes.len());
        self.hub
            .lock()
            .uplink
            .push_back(Uplink::Command(client_id, bytes.to_vec()));
    }
}

impl ClientChannel for LoopbackClient {
    fn attempt_to_connect(&mut self) {
        if self.state != ConnectionState::Disconnected {
            return;
        }

        let client_id = {
            let mut hub = self.hub.lock();
            let client_id = hub.next_client_id;
            hub.next_client_id += 1;
            hub.downlinks.insert(client_id, VecDeque::new());
            hub.uplink.push_back(Uplink::Connected(client_id));
            client_id
        };

        log::info!("Loopback client connected as {}", client_id);
        self.client_id = Some(client_id);
        self.state = ConnectionState::Connected;
        self.events.push(ClientEvent::Connected { client_id });

        for bytes in std::mem::take(&mut self.unsent) {
            self.transmit(client_id, bytes);
        }
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    fn send_command(&mut self, command: &Command) {
        let bytes = match command.encode() {
            Ok(bytes) => bytes,
            Err(err) => {
                log::warn!("Cannot encode command {}: {}", command.entity_tick_id, err);
                return;
            }
        };

        match self.client_id {
            Some(client_id) => self.transmit(client_id, bytes),
            None => self.unsent.push(bytes),
        }
    }

    fn drain_events(&mut self) -> Vec<ClientEvent> {
        let mut events = std::mem::take(&mut self.events);

        let Some(client_id) = self.client_id else {
            return events;
        };

        let received: Vec<Vec<u8>> = match self.hub.lock().downlinks.get_mut(&client_id) {
            Some(queue) => queue.drain(..).collect(),
            None => Vec::new(),
        };

        for bytes in received {
            match Snapshot::decode(&bytes) {
                Ok(snapshot) => {
                    self.stats.on_received(bytes.len());
                    events.push(ClientEvent::Snapshot(snapshot));
                }
                Err(err) => {
                    self.stats.malformed_dropped += 1;
                    log::warn!("Dropping malformed snapshot: {}", err);
                }
            }
        }

        events
    }

    fn average_bits_per_second_sent(&mut self) -> f64 {
        self.meter.bits_per_second()
    }
}

#[cfg(test)]
mod tests {
    use glam::DVec2;

    use super::*;
    use crate::input::InputSnapshot;

    fn snapshot(reference: u32) -> Snapshot {
        Snapshot {
            position: DVec2::new(reference as f64, 0.0),
            velocity: DVec2::ZERO,
            reference_entity_tick_id: reference,
        }
    }

    #[test]
    fn commands_before_connect_are_delivered_after() {
        let mut server = LoopbackServer::new();
        let mut client = server.client();

        client.send_command(&Command::new(0, InputSnapshot::IDLE));
        assert!(server.drain_events().is_empty());

        client.attempt_to_connect();
        assert_eq!(client.state(), ConnectionState::Connected);

        let events = server.drain_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], ServerEvent::ClientConnected(0));
        assert!(matches!(
            events[1],
            ServerEvent::Command { client_id: 0, command } if command.entity_tick_id == 0
        ));
    }

    #[test]
    fn snapshots_reach_only_their_client() {
        let mut server = LoopbackServer::new();
        let mut first = server.client();
        let mut second = server.client();
        first.attempt_to_connect();
        second.attempt_to_connect();
        first.drain_events();
        second.drain_events();

        server.send_snapshot(1, &snapshot(4));

        assert!(first.drain_events().is_empty());
        assert_eq!(second.drain_events(), vec![ClientEvent::Snapshot(snapshot(4))]);
    }

    #[test]
    fn total_loss_drops_every_snapshot() {
        let mut server = LoopbackServer::with_loss(PacketLossSimulation::new(100.0), 1);
        let mut client = server.client();
        client.attempt_to_connect();
        client.drain_events();

        for reference in 0..10 {
            server.send_snapshot(0, &snapshot(reference));
        }

        assert!(client.drain_events().is_empty());
        assert_eq!(server.stats().simulated_losses, 10);
    }

    #[test]
    fn disconnect_is_reported_to_the_server() {
        let mut server = LoopbackServer::new();
        let mut client = server.client();
        client.attempt_to_connect();
        client.disconnect();

        let events = server.drain_events();
        assert_eq!(events.last(), Some(&ServerEvent::ClientDisconnected(0)));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }
}
