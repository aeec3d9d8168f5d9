use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;

use super::channel::{
    ClientChannel, ClientEvent, ClientId, ConnectionState, ServerChannel, ServerEvent,
};
use super::protocol::{
    CONNECT_ACCEPT_SIZE, Command, MAX_DATAGRAM_SIZE, Snapshot, UdpRegistration,
    decode_connect_accept, encode_connect_accept,
};
use super::queue::Inbox;
use super::stats::{BandwidthMeter, NetworkStats, PacketLossSimulation};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

const UDP_ERROR_BACKOFF: Duration = Duration::from_millis(10);

type Peers = Arc<Mutex<HashMap<ClientId, SocketAddr>>>;

/// Tasks aborted together when the group is dropped.
///
/// A group held inside a task's future goes down with that task, so nothing
/// it spawned outlives it.
#[derive(Default)]
struct TaskGroup(Vec<JoinHandle<()>>);

impl TaskGroup {
    fn push(&mut self, task: JoinHandle<()>) {
        self.0.retain(|task| !task.is_finished());
        self.0.push(task);
    }

    fn abort_all(&mut self) {
        for task in self.0.drain(..) {
            task.abort();
        }
    }
}

impl Drop for TaskGroup {
    fn drop(&mut self) {
        self.abort_all();
    }
}

/// Socket server: commands over TCP, snapshots over UDP.
///
/// Every socket is serviced by a task on the given runtime. The simulation
/// thread only touches the inbox and the outbound channel. Dropping the
/// transport stops every task, which closes all client streams.
pub struct ServerTransport {
    tcp_addr: SocketAddr,
    udp_addr: SocketAddr,
    events: Inbox<ServerEvent>,
    outbound: UnboundedSender<(ClientId, [u8; Snapshot::SIZE])>,
    stats: Arc<Mutex<NetworkStats>>,
    meter: BandwidthMeter,
    loss: PacketLossSimulation,
    rng: StdRng,
    tasks: TaskGroup,
}

impl ServerTransport {
    /// Binds TCP and UDP on the same address. Port 0 picks a free TCP port
    /// and binds UDP to that same port number.
    pub fn bind(
        handle: &Handle,
        addr: SocketAddr,
        max_clients: usize,
        loss: PacketLossSimulation,
    ) -> Result<Self, TransportError> {
        let (listener, udp) = handle.block_on(async {
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|source| TransportError::Bind { addr, source })?;
            let tcp_addr = listener.local_addr()?;
            let udp = UdpSocket::bind(tcp_addr)
                .await
                .map_err(|source| TransportError::Bind {
                    addr: tcp_addr,
                    source,
                })?;
            Ok::<_, TransportError>((listener, udp))
        })?;

        let tcp_addr = listener.local_addr()?;
        let udp_addr = udp.local_addr()?;
        let udp = Arc::new(udp);

        let events = Inbox::new();
        let peers: Peers = Arc::new(Mutex::new(HashMap::new()));
        let stats = Arc::new(Mutex::new(NetworkStats::default()));
        let (outbound, outbound_rx) = unbounded_channel();

        let mut tasks = TaskGroup::default();
        tasks.push(handle.spawn(accept_loop(
            listener,
            events.clone(),
            Arc::clone(&peers),
            Arc::clone(&stats),
            max_clients,
        )));
        tasks.push(handle.spawn(registration_loop(
            Arc::clone(&udp),
            Arc::clone(&peers),
            Arc::clone(&stats),
        )));
        tasks.push(handle.spawn(snapshot_sender(udp, peers, outbound_rx)));

        log::info!("Listening on tcp {} / udp {}", tcp_addr, udp_addr);

        Ok(Self {
            tcp_addr,
            udp_addr,
            events,
            outbound,
            stats,
            meter: BandwidthMeter::default(),
            loss,
            rng: StdRng::from_entropy(),
            tasks,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.tcp_addr
    }

    pub fn udp_addr(&self) -> SocketAddr {
        self.udp_addr
    }

    pub fn stats(&self) -> NetworkStats {
        *self.stats.lock()
    }
}

impl Drop for ServerTransport {
    fn drop(&mut self) {
        self.tasks.abort_all();
    }
}

impl ServerChannel for ServerTransport {
    fn drain_events(&mut self) -> Vec<ServerEvent> {
        self.events.drain()
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
        self.stats.lock().on_sent(bytes.len());

        if self.loss.should_drop(&mut self.rng) {
            self.stats.lock().simulated_losses += 1;
            return;
        }

        if self.outbound.send((client_id, bytes)).is_err() {
            log::warn!("Snapshot sender stopped, dropping snapshot for {}", client_id);
        }
    }

    fn average_bits_per_second_sent(&mut self) -> f64 {
        self.meter.bits_per_second()
    }
}

async fn accept_loop(
    listener: TcpListener,
    events: Inbox<ServerEvent>,
    peers: Peers,
    stats: Arc<Mutex<NetworkStats>>,
    max_clients: usize,
) {
    let next_client_id = AtomicU32::new(0);
    let connected = Arc::new(AtomicU32::new(0));
    let mut readers = TaskGroup::default();

    loop {
        let (mut stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                log::warn!("Accept failed: {}", err);
                continue;
            }
        };

        if connected.load(Ordering::Acquire) as usize >= max_clients {
            log::warn!("Refusing {}: server full ({} clients)", addr, max_clients);
            continue;
        }

        if let Err(err) = stream.set_nodelay(true) {
            log::warn!("Unable to disable buffering for {}: {}", addr, err);
        }

        let client_id = next_client_id.fetch_add(1, Ordering::Relaxed);
        if let Err(err) = stream.write_all(&encode_connect_accept(client_id)).await {
            log::warn!("Handshake with {} failed: {}", addr, err);
            continue;
        }

        log::info!("Client {} connected from {}", client_id, addr);
        connected.fetch_add(1, Ordering::AcqRel);
        events.push(ServerEvent::ClientConnected(client_id));

        let events = events.clone();
        let peers = Arc::clone(&peers);
        let stats = Arc::clone(&stats);
        let connected = Arc::clone(&connected);
        let reader = tokio::spawn(async move {
            read_commands(stream, client_id, &events, &stats).await;

            peers.lock().remove(&client_id);
            connected.fetch_sub(1, Ordering::AcqRel);
            log::info!("Client {} disconnected", client_id);
            events.push(ServerEvent::ClientDisconnected(client_id));
        });
        readers.push(reader);
    }
}

async fn read_commands(
    mut stream: TcpStream,
    client_id: ClientId,
    events: &Inbox<ServerEvent>,
    stats: &Mutex<NetworkStats>,
) {
    let mut record = [0u8; Command::SIZE];

    loop {
        if let Err(err) = stream.read_exact(&mut record).await {
            if err.kind() != io::ErrorKind::UnexpectedEof {
                log::warn!("Read from client {} failed: {}", client_id, err);
            }
            return;
        }

        match Command::decode(&record) {
            Ok(command) => {
                stats.lock().on_received(record.len());
                events.push(ServerEvent::Command { client_id, command });
            }
            Err(err) => {
                stats.lock().malformed_dropped += 1;
                log::warn!("Dropping malformed command from client {}: {}", client_id, err);
            }
        }
    }
}

async fn registration_loop(udp: Arc<UdpSocket>, peers: Peers, stats: Arc<Mutex<NetworkStats>>) {
    let mut buf = [0u8; MAX_DATAGRAM_SIZE];

    loop {
        let (len, from) = match udp.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(err) => {
                log::debug!("Udp receive error: {}", err);
                tokio::time::sleep(UDP_ERROR_BACKOFF).await;
                continue;
            }
        };

        match UdpRegistration::decode(&buf[..len]) {
            Ok(registration) => {
                let previous = peers.lock().insert(registration.client_id, from);
                if previous != Some(from) {
                    log::info!("Client {} registered udp {}", registration.client_id, from);
                }
            }
            Err(err) => {
                stats.lock().malformed_dropped += 1;
                log::warn!("Dropping datagram from {}: {}", from, err);
            }
        }
    }
}

async fn snapshot_sender(
    udp: Arc<UdpSocket>,
    peers: Peers,
    mut outbound: UnboundedReceiver<(ClientId, [u8; Snapshot::SIZE])>,
) {
    while let Some((client_id, bytes)) = outbound.recv().await {
        let addr = peers.lock().get(&client_id).copied();
        let Some(addr) = addr else {
            log::trace!("Client {} has no udp address yet", client_id);
            continue;
        };

        if let Err(err) = udp.send_to(&bytes, addr).await {
            log::debug!("Snapshot to client {} failed: {}", client_id, err);
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    client_id: Mutex<Option<ClientId>>,
    connecting: AtomicBool,
    connected: AtomicBool,
    received_snapshot: AtomicBool,
}

/// Socket client. Connects in the background and retries until the server
/// answers; commands queued meanwhile are written once connected. A lost
/// connection is reported and then re-established the same way.
pub struct ClientTransport {
    handle: Handle,
    server: String,
    retry: Duration,
    shared: Arc<Shared>,
    events: Inbox<ClientEvent>,
    outbound: UnboundedSender<[u8; Command::SIZE]>,
    outbound_rx: Option<UnboundedReceiver<[u8; Command::SIZE]>>,
    meter: BandwidthMeter,
    stats: Arc<Mutex<NetworkStats>>,
    tasks: TaskGroup,
}

impl ClientTransport {
    pub fn new(handle: Handle, server: impl Into<String>, retry: Duration) -> Self {
        let (outbound, outbound_rx) = unbounded_channel();

        Self {
            handle,
            server: server.into(),
            retry,
            shared: Arc::new(Shared::default()),
            events: Inbox::new(),
            outbound,
            outbound_rx: Some(outbound_rx),
            meter: BandwidthMeter::default(),
            stats: Arc::new(Mutex::new(NetworkStats::default())),
            tasks: TaskGroup::default(),
        }
    }

    pub fn stats(&self) -> NetworkStats {
        *self.stats.lock()
    }
}

impl ClientChannel for ClientTransport {
    fn attempt_to_connect(&mut self) {
        // The connection task owns the receiver for as long as it runs and
        // reconnects on its own.
        let Some(outbound_rx) = self.outbound_rx.take() else {
            return;
        };
        self.shared.connecting.store(true, Ordering::Release);

        let connection = Connection {
            server: self.server.clone(),
            retry: self.retry,
            shared: Arc::clone(&self.shared),
            events: self.events.clone(),
            stats: Arc::clone(&self.stats),
        };

        let task = self.handle.spawn(connection.run(outbound_rx));
        self.tasks.push(task);
    }

    fn state(&self) -> ConnectionState {
        if self.shared.connected.load(Ordering::Acquire) {
            ConnectionState::Connected
        } else if self.shared.connecting.load(Ordering::Acquire) {
            ConnectionState::Connecting
        } else {
            ConnectionState::Disconnected
        }
    }

    fn client_id(&self) -> Option<ClientId> {
        *self.shared.client_id.lock()
    }

    fn send_command(&mut self, command: &Command) {
        let bytes = match command.encode() {
            Ok(bytes) => bytes,
            Err(err) => {
                log::warn!("Cannot encode command {}: {}", command.entity_tick_id, err);
                return;
            }
        };

        self.meter.record(bytes.len());
        if self.outbound.send(bytes).is_err() {
            log::debug!("Connection closed, command {} dropped", command.entity_tick_id);
        }
    }

    fn drain_events(&mut self) -> Vec<ClientEvent> {
        self.events.drain()
    }

    fn average_bits_per_second_sent(&mut self) -> f64 {
        self.meter.bits_per_second()
    }
}

struct Connection {
    server: String,
    retry: Duration,
    shared: Arc<Shared>,
    events: Inbox<ClientEvent>,
    stats: Arc<Mutex<NetworkStats>>,
}

/// Why a connected session ended.
enum Closed {
    /// The server closed the stream or it failed.
    Lost,
    /// The transport was dropped.
    Released,
}

impl Connection {
    async fn connect(&self) -> (TcpStream, ClientId) {
        loop {
            match self.handshake().await {
                Ok(connected) => return connected,
                Err(err) => {
                    log::warn!(
                        "Connecting to {} failed ({}), retrying in {:?}",
                        self.server,
                        err,
                        self.retry
                    );
                    tokio::time::sleep(self.retry).await;
                }
            }
        }
    }

    async fn handshake(&self) -> io::Result<(TcpStream, ClientId)> {
        let mut stream = TcpStream::connect(self.server.as_str()).await?;
        stream.set_nodelay(true)?;

        let mut accept = [0u8; CONNECT_ACCEPT_SIZE];
        stream.read_exact(&mut accept).await?;
        let client_id = decode_connect_accept(&accept)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

        Ok((stream, client_id))
    }

    /// Connects, serves the session until it ends, and starts over unless
    /// the owning transport is gone.
    async fn run(self, mut outbound: UnboundedReceiver<[u8; Command::SIZE]>) {
        loop {
            let (stream, client_id) = self.connect().await;
            let (udp, server_addr) = match open_udp(&stream).await {
                Ok(opened) => opened,
                Err(err) => {
                    log::warn!(
                        "Unable to open udp path to {} ({}), retrying in {:?}",
                        self.server,
                        err,
                        self.retry
                    );
                    tokio::time::sleep(self.retry).await;
                    continue;
                }
            };
            let udp = Arc::new(udp);

            self.shared.received_snapshot.store(false, Ordering::Release);
            *self.shared.client_id.lock() = Some(client_id);
            self.shared.connected.store(true, Ordering::Release);
            self.events.push(ClientEvent::Connected { client_id });
            log::info!("Connected to {} as client {}", server_addr, client_id);

            let mut session = TaskGroup::default();
            session.push(tokio::spawn(register_udp(
                Arc::clone(&udp),
                client_id,
                self.retry,
                Arc::clone(&self.shared),
            )));
            session.push(tokio::spawn(receive_snapshots(
                udp,
                self.events.clone(),
                Arc::clone(&self.stats),
                Arc::clone(&self.shared),
            )));

            let closed = serve(stream, &mut outbound, &self.stats).await;

            session.abort_all();
            self.shared.connected.store(false, Ordering::Release);
            *self.shared.client_id.lock() = None;

            match closed {
                Closed::Lost => {
                    log::info!("Disconnected from {}, reconnecting", server_addr);
                    self.events.push(ClientEvent::Disconnected);
                }
                Closed::Released => {
                    self.shared.connecting.store(false, Ordering::Release);
                    return;
                }
            }
        }
    }
}

/// Binds a udp socket aimed at the server end of `stream`.
async fn open_udp(stream: &TcpStream) -> io::Result<(UdpSocket, SocketAddr)> {
    let server_addr = stream.peer_addr()?;
    let local: SocketAddr = if server_addr.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    };

    let udp = UdpSocket::bind(local).await?;
    udp.connect(server_addr).await?;
    Ok((udp, server_addr))
}

/// Writes queued commands until the server closes the stream or the
/// outbound channel is closed.
async fn serve(
    stream: TcpStream,
    outbound: &mut UnboundedReceiver<[u8; Command::SIZE]>,
    stats: &Mutex<NetworkStats>,
) -> Closed {
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = [0u8; 64];

    loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => return Closed::Lost,
                Ok(_) => {}
                Err(err) => {
                    log::warn!("Connection error: {}", err);
                    return Closed::Lost;
                }
            },
            queued = outbound.recv() => {
                let Some(bytes) = queued else {
                    return Closed::Released;
                };
                if let Err(err) = writer.write_all(&bytes).await {
                    log::warn!("Sending command failed: {}", err);
                    return Closed::Lost;
                }
                stats.lock().on_sent(bytes.len());
            }
        }
    }
}

async fn register_udp(udp: Arc<UdpSocket>, client_id: ClientId, retry: Duration, shared: Arc<Shared>) {
    let registration = UdpRegistration { client_id }.encode();

    while !shared.received_snapshot.load(Ordering::Acquire) {
        if let Err(err) = udp.send(&registration).await {
            log::debug!("Udp registration failed: {}", err);
        }
        tokio::time::sleep(retry).await;
    }

    log::debug!("Udp path confirmed for client {}", client_id);
}

async fn receive_snapshots(
    udp: Arc<UdpSocket>,
    events: Inbox<ClientEvent>,
    stats: Arc<Mutex<NetworkStats>>,
    shared: Arc<Shared>,
) {
    let mut buf = [0u8; MAX_DATAGRAM_SIZE];

    loop {
        let len = match udp.recv(&mut buf).await {
            Ok(len) => len,
            Err(err) => {
                log::debug!("Udp receive error: {}", err);
                tokio::time::sleep(UDP_ERROR_BACKOFF).await;
                continue;
            }
        };

        match Snapshot::decode(&buf[..len]) {
            Ok(snapshot) => {
                shared.received_snapshot.store(true, Ordering::Release);
                stats.lock().on_received(len);
                events.push(ClientEvent::Snapshot(snapshot));
            }
            Err(err) => {
                stats.lock().malformed_dropped += 1;
                log::warn!("Dropping malformed snapshot: {}", err);
            }
        }
    }
}
