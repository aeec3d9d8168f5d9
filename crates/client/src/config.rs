use std::time::Duration;

use cpsr::{InputSnapshot, ScriptedInput, SimulationConfig};

pub const DEFAULT_SCRIPT: &str = "right:256,idle:128,left:256,forward+right:128,idle:128";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port` of the server.
    pub server: String,
    pub retry: Duration,
    pub script: ScriptedInput,
    /// How often the three transforms are logged, in Hz.
    pub present_rate: u32,
    pub run_for: Option<Duration>,
    pub simulation: SimulationConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: format!("localhost:{}", cpsr::DEFAULT_PORT),
            retry: Duration::from_millis(500),
            script: DEFAULT_SCRIPT
                .parse()
                .unwrap_or_else(|_| ScriptedInput::held(InputSnapshot::IDLE)),
            present_rate: 4,
            run_for: None,
            simulation: SimulationConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_script_parses() {
        let script: ScriptedInput = DEFAULT_SCRIPT.parse().unwrap();
        assert_eq!(script.cycle_len(), ClientConfig::default().script.cycle_len());
        assert_eq!(script.cycle_len(), 896);
    }

    #[test]
    fn default_targets_local_server() {
        let config = ClientConfig::default();
        assert_eq!(config.server, "localhost:7777");
        assert_eq!(config.retry, Duration::from_millis(500));
    }
}
