mod fixed_loop;
mod periodic_signal;
mod timestep;

pub use fixed_loop::{
    Clock, DEFAULT_MAX_CATCH_UP_TICKS, FixedFrequencyLoop, LoopStats, ManualClock, SystemClock,
};
pub use periodic_signal::PeriodicSignal;
pub use timestep::FixedTimestep;
