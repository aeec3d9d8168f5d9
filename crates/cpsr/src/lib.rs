pub mod authority;
pub mod config;
pub mod input;
pub mod net;
pub mod prediction;
pub mod reconcile;
pub mod simulation;
pub mod timing;

pub use authority::{AuthoritativeServer, ServerStats};
pub use config::{ConfigError, SimulationConfig};
pub use input::{InputSnapshot, InputSource, MoveKeys, ScriptError, ScriptedInput};
pub use net::{
    ClientChannel, ClientEvent, ClientId, ClientTransport, Command, ConnectionState,
    DEFAULT_LOOP_RATE, DEFAULT_PORT, DEFAULT_SEND_RATE, DEFAULT_TICK_RATE, LoopbackClient,
    LoopbackServer, NetworkStats, PacketLossSimulation, ServerChannel, ServerEvent,
    ServerTransport, Snapshot, TransportError, WireError,
};
pub use prediction::{ClientStats, PredictingClient, TickSummary};
pub use reconcile::{Correction, Reconcile, Reconciler};
pub use simulation::{
    AuthoritativeEntity, EntityState, FixedFrequencyProcessor, FixedFrequencyReprocessor,
    InputHistory, MotionModel, PredictedWorld, ReplayReport, TickId, TickIdSource, TickMode,
    TickSimulation,
};
pub use timing::{
    Clock, FixedFrequencyLoop, FixedTimestep, LoopStats, ManualClock, PeriodicSignal, SystemClock,
};
