use glam::DVec2;

use crate::input::InputSnapshot;
use crate::simulation::{EntityState, TickId};

pub const DEFAULT_PORT: u16 = 7777;
pub const DEFAULT_TICK_RATE: u32 = 60;
pub const DEFAULT_LOOP_RATE: u32 = 512;
pub const DEFAULT_SEND_RATE: u32 = 60;

/// `"CPSR"` read as a little-endian `u32`.
pub const REGISTRATION_MAGIC: u32 = 0x4353_5052;

/// Largest datagram the socket transport will read.
pub const MAX_DATAGRAM_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("byte {value} at offset {offset} is not a bool")]
    InvalidBool { offset: usize, value: u8 },
    #[error("negative tick id {0}")]
    NegativeTickId(i32),
    #[error("tick id {0} does not fit the wire format")]
    TickIdOverflow(u32),
    #[error("bad registration magic {0:#010x}")]
    BadMagic(u32),
}

fn check_len(bytes: &[u8], expected: usize) -> Result<(), WireError> {
    if bytes.len() != expected {
        return Err(WireError::InvalidLength {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn read_bool(bytes: &[u8], offset: usize) -> Result<bool, WireError> {
    match bytes[offset] {
        0 => Ok(false),
        1 => Ok(true),
        value => Err(WireError::InvalidBool { offset, value }),
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

fn read_f64(bytes: &[u8], offset: usize) -> f64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    f64::from_le_bytes(raw)
}

fn encode_tick_id(id: TickId) -> Result<[u8; 4], WireError> {
    let id = i32::try_from(id).map_err(|_| WireError::TickIdOverflow(id))?;
    Ok(id.to_le_bytes())
}

fn decode_tick_id(bytes: &[u8], offset: usize) -> Result<TickId, WireError> {
    let id = read_u32(bytes, offset) as i32;
    TickId::try_from(id).map_err(|_| WireError::NegativeTickId(id))
}

/// Client to server: the input used for one client tick.
///
/// Layout: `i32 entity_tick_id` followed by one byte each for forward,
/// backward, left and right.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub entity_tick_id: TickId,
    pub input: InputSnapshot,
}

impl Command {
    pub const SIZE: usize = 8;

    pub fn new(entity_tick_id: TickId, input: InputSnapshot) -> Self {
        Self {
            entity_tick_id,
            input,
        }
    }

    pub fn encode(&self) -> Result<[u8; Self::SIZE], WireError> {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&encode_tick_id(self.entity_tick_id)?);
        out[4] = self.input.forward() as u8;
        out[5] = self.input.backward() as u8;
        out[6] = self.input.left() as u8;
        out[7] = self.input.right() as u8;
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        check_len(bytes, Self::SIZE)?;

        let entity_tick_id = decode_tick_id(bytes, 0)?;
        let input = InputSnapshot::new(
            read_bool(bytes, 4)?,
            read_bool(bytes, 5)?,
            read_bool(bytes, 6)?,
            read_bool(bytes, 7)?,
        );

        Ok(Self {
            entity_tick_id,
            input,
        })
    }
}

/// Server to client: authoritative state after processing
/// `reference_entity_tick_id`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub position: DVec2,
    pub velocity: DVec2,
    pub reference_entity_tick_id: TickId,
}

impl Snapshot {
    pub const SIZE: usize = 36;

    pub fn from_state(state: EntityState, reference_entity_tick_id: TickId) -> Self {
        Self {
            position: state.position,
            velocity: state.velocity,
            reference_entity_tick_id,
        }
    }

    pub fn entity_state(&self) -> EntityState {
        EntityState::new(self.position, self.velocity)
    }

    pub fn encode(&self) -> Result<[u8; Self::SIZE], WireError> {
        let mut out = [0u8; Self::SIZE];
        out[0..8].copy_from_slice(&self.position.x.to_le_bytes());
        out[8..16].copy_from_slice(&self.position.y.to_le_bytes());
        out[16..24].copy_from_slice(&self.velocity.x.to_le_bytes());
        out[24..32].copy_from_slice(&self.velocity.y.to_le_bytes());
        out[32..36].copy_from_slice(&encode_tick_id(self.reference_entity_tick_id)?);
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        check_len(bytes, Self::SIZE)?;

        Ok(Self {
            position: DVec2::new(read_f64(bytes, 0), read_f64(bytes, 8)),
            velocity: DVec2::new(read_f64(bytes, 16), read_f64(bytes, 24)),
            reference_entity_tick_id: decode_tick_id(bytes, 32)?,
        })
    }
}

/// Datagram a client sends so the server learns its UDP address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpRegistration {
    pub client_id: u32,
}

impl UdpRegistration {
    pub const SIZE: usize = 8;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&REGISTRATION_MAGIC.to_le_bytes());
        out[4..8].copy_from_slice(&self.client_id.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        check_len(bytes, Self::SIZE)?;

        let magic = read_u32(bytes, 0);
        if magic != REGISTRATION_MAGIC {
            return Err(WireError::BadMagic(magic));
        }

        Ok(Self {
            client_id: read_u32(bytes, 4),
        })
    }
}

/// Reliable-stream greeting carrying the id the server assigned.
pub const CONNECT_ACCEPT_SIZE: usize = 4;

pub fn encode_connect_accept(client_id: u32) -> [u8; CONNECT_ACCEPT_SIZE] {
    client_id.to_le_bytes()
}

pub fn decode_connect_accept(bytes: &[u8]) -> Result<u32, WireError> {
    check_len(bytes, CONNECT_ACCEPT_SIZE)?;
    Ok(read_u32(bytes, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_layout() {
        let command = Command::new(258, InputSnapshot::new(true, false, false, true));
        let bytes = command.encode().unwrap();

        assert_eq!(bytes, [2, 1, 0, 0, 1, 0, 0, 1]);
        assert_eq!(Command::decode(&bytes).unwrap(), command);
    }

    #[test]
    fn command_rejects_bad_records() {
        assert_eq!(
            Command::decode(&[0; 7]),
            Err(WireError::InvalidLength {
                expected: 8,
                actual: 7
            })
        );
        assert!(matches!(
            Command::decode(&[0; 9]),
            Err(WireError::InvalidLength { .. })
        ));
        assert_eq!(
            Command::decode(&[0, 0, 0, 0, 0, 2, 0, 0]),
            Err(WireError::InvalidBool {
                offset: 5,
                value: 2
            })
        );
        assert_eq!(
            Command::decode(&[0xff, 0xff, 0xff, 0xff, 0, 0, 0, 0]),
            Err(WireError::NegativeTickId(-1))
        );
    }

    #[test]
    fn tick_id_overflow_is_an_error() {
        let command = Command::new(u32::MAX, InputSnapshot::IDLE);
        assert_eq!(command.encode(), Err(WireError::TickIdOverflow(u32::MAX)));
    }

    #[test]
    fn snapshot_layout() {
        let snapshot = Snapshot {
            position: DVec2::new(1.5, -2.0),
            velocity: DVec2::new(0.25, 0.0),
            reference_entity_tick_id: 9,
        };
        let bytes = snapshot.encode().unwrap();

        assert_eq!(bytes.len(), Snapshot::SIZE);
        assert_eq!(&bytes[0..8], &1.5f64.to_le_bytes());
        assert_eq!(&bytes[32..36], &[9, 0, 0, 0]);
        assert_eq!(Snapshot::decode(&bytes).unwrap(), snapshot);
        assert!(Snapshot::decode(&bytes[..35]).is_err());
    }

    #[test]
    fn registration_checks_magic() {
        let bytes = UdpRegistration { client_id: 3 }.encode();
        assert_eq!(UdpRegistration::decode(&bytes).unwrap().client_id, 3);

        let mut bad = bytes;
        bad[0] ^= 0xff;
        assert!(matches!(
            UdpRegistration::decode(&bad),
            Err(WireError::BadMagic(_))
        ));
    }
}
