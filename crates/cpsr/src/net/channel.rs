use super::protocol::{Command, Snapshot};

pub type ClientId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Something the server observed since its last drain.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    ClientConnected(ClientId),
    Command { client_id: ClientId, command: Command },
    ClientDisconnected(ClientId),
}

/// Something the client observed since its last drain.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected { client_id: ClientId },
    Snapshot(Snapshot),
    Disconnected,
}

/// Server side of the message channel.
///
/// Sends never block: snapshots go out on the unreliable path and may be
/// lost. Inbound commands arrive reliably and in order per client.
pub trait ServerChannel {
    /// Everything received since the previous call, in arrival order.
    fn drain_events(&mut self) -> Vec<ServerEvent>;

    fn send_snapshot(&mut self, client_id: ClientId, snapshot: &Snapshot);

    fn average_bits_per_second_sent(&mut self) -> f64;
}

/// Client side of the message channel.
pub trait ClientChannel {
    /// Starts connecting if not already connected or connecting. Retries are
    /// the channel's business.
    fn attempt_to_connect(&mut self);

    fn state(&self) -> ConnectionState;

    fn client_id(&self) -> Option<ClientId>;

    /// Queues a command on the reliable path. Commands sent before the
    /// connection is up are delivered once it is.
    fn send_command(&mut self, command: &Command);

    /// Everything received since the previous call, in arrival order.
    fn drain_events(&mut self) -> Vec<ClientEvent>;

    fn average_bits_per_second_sent(&mut self) -> f64;
}
