mod history;
mod motion;
mod processor;
mod reprocessor;
mod world;

pub use history::{DEFAULT_HISTORY_CAPACITY, InputHistory, TickId, TickIdSource};
pub use motion::{DEFAULT_ACCELERATION, DEFAULT_FRICTION, EntityState, MotionModel};
pub use processor::{FixedFrequencyProcessor, TickMode, TickSimulation};
pub use reprocessor::{FixedFrequencyReprocessor, ReplayReport};
pub use world::{AuthoritativeEntity, PredictedWorld, WorldCounters};
