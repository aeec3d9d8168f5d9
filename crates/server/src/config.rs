use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use cpsr::{PacketLossSimulation, SimulationConfig};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub max_clients: usize,
    pub packet_loss: PacketLossSimulation,
    /// Stop after this long; run until interrupted when unset.
    pub run_for: Option<Duration>,
    pub simulation: SimulationConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: cpsr::DEFAULT_PORT,
            max_clients: 32,
            packet_loss: PacketLossSimulation::default(),
            run_for: None,
            simulation: SimulationConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> io::Result<SocketAddr> {
        (self.bind.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("{} does not resolve to an address", self.bind),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_every_interface_on_the_default_port() {
        let addr = ServerConfig::default().bind_addr().unwrap();
        assert!(addr.ip().is_unspecified());
        assert_eq!(addr.port(), cpsr::DEFAULT_PORT);
    }

    #[test]
    fn explicit_address_is_used() {
        let config = ServerConfig {
            bind: "127.0.0.1".to_string(),
            port: 9000,
            ..ServerConfig::default()
        };
        assert_eq!(
            config.bind_addr().unwrap(),
            "127.0.0.1:9000".parse::<SocketAddr>().unwrap()
        );
    }
}
