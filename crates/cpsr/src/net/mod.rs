mod channel;
mod loopback;
mod protocol;
mod queue;
mod stats;
mod transport;

pub use channel::{
    ClientChannel, ClientEvent, ClientId, ConnectionState, ServerChannel, ServerEvent,
};
pub use loopback::{LoopbackClient, LoopbackServer};
pub use protocol::{
    CONNECT_ACCEPT_SIZE, Command, DEFAULT_LOOP_RATE, DEFAULT_PORT, DEFAULT_SEND_RATE,
    DEFAULT_TICK_RATE, MAX_DATAGRAM_SIZE, REGISTRATION_MAGIC, Snapshot, UdpRegistration,
    WireError, decode_connect_accept, encode_connect_accept,
};
pub use queue::Inbox;
pub use stats::{BANDWIDTH_WINDOW, BandwidthMeter, NetworkStats, PacketLossSimulation};
pub use transport::{ClientTransport, ServerTransport, TransportError};
