use std::str::FromStr;

use bitflags::bitflags;
use glam::DVec2;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MoveKeys: u8 {
        const FORWARD = 1 << 0;
        const BACKWARD = 1 << 1;
        const LEFT = 1 << 2;
        const RIGHT = 1 << 3;
    }
}

/// Movement intent captured once per tick. Immutable once recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InputSnapshot {
    pub keys: MoveKeys,
}

impl InputSnapshot {
    pub const IDLE: Self = Self {
        keys: MoveKeys::empty(),
    };

    pub fn new(forward: bool, backward: bool, left: bool, right: bool) -> Self {
        let mut keys = MoveKeys::empty();
        keys.set(MoveKeys::FORWARD, forward);
        keys.set(MoveKeys::BACKWARD, backward);
        keys.set(MoveKeys::LEFT, left);
        keys.set(MoveKeys::RIGHT, right);
        Self { keys }
    }

    pub fn from_keys(keys: MoveKeys) -> Self {
        Self { keys }
    }

    #[inline]
    pub fn forward(&self) -> bool {
        self.keys.contains(MoveKeys::FORWARD)
    }

    #[inline]
    pub fn backward(&self) -> bool {
        self.keys.contains(MoveKeys::BACKWARD)
    }

    #[inline]
    pub fn left(&self) -> bool {
        self.keys.contains(MoveKeys::LEFT)
    }

    #[inline]
    pub fn right(&self) -> bool {
        self.keys.contains(MoveKeys::RIGHT)
    }

    /// `(right - left, forward - backward)`, each component in `{-1, 0, 1}`.
    pub fn direction(&self) -> DVec2 {
        DVec2::new(
            (self.right() as i8 - self.left() as i8) as f64,
            (self.forward() as i8 - self.backward() as i8) as f64,
        )
    }
}

/// Something that can be polled once per outer tick for the current intent.
pub trait InputSource {
    fn poll(&mut self) -> InputSnapshot;
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ScriptError {
    #[error("input script is empty")]
    Empty,
    #[error("unknown key '{0}' in input script")]
    UnknownKey(String),
    #[error("invalid tick count in segment '{0}'")]
    InvalidCount(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Segment {
    input: InputSnapshot,
    ticks: u32,
}

/// Replays a fixed sequence of held keys, looping forever.
///
/// Parsed from `keys[:ticks]` segments separated by commas, where `keys` is
/// `idle` or `+`-joined names from `forward`, `backward`, `left`, `right`
/// (`w`, `s`, `a`, `d` also work). A segment without a count lasts one tick.
///
/// ```
/// use cpsr::ScriptedInput;
/// let script: ScriptedInput = "right:120,forward+left:30,idle:60".parse().unwrap();
/// assert_eq!(script.cycle_len(), 210);
/// ```
#[derive(Debug, Clone)]
pub struct ScriptedInput {
    segments: Vec<Segment>,
    segment: usize,
    elapsed: u32,
}

impl ScriptedInput {
    pub fn held(input: InputSnapshot) -> Self {
        Self {
            segments: vec![Segment { input, ticks: 1 }],
            segment: 0,
            elapsed: 0,
        }
    }

    pub fn cycle_len(&self) -> u64 {
        self.segments.iter().map(|s| s.ticks as u64).sum()
    }
}

impl InputSource for ScriptedInput {
    fn poll(&mut self) -> InputSnapshot {
        let current = &self.segments[self.segment];
        let input = current.input;

        self.elapsed += 1;
        if self.elapsed >= current.ticks {
            self.elapsed = 0;
            self.segment = (self.segment + 1) % self.segments.len();
        }

        input
    }
}

fn parse_keys(held: &str) -> Result<MoveKeys, ScriptError> {
    let mut keys = MoveKeys::empty();
    if held.eq_ignore_ascii_case("idle") {
        return Ok(keys);
    }

    for name in held.split('+').map(str::trim) {
        keys |= match name.to_ascii_lowercase().as_str() {
            "forward" | "w" => MoveKeys::FORWARD,
            "backward" | "s" => MoveKeys::BACKWARD,
            "left" | "a" => MoveKeys::LEFT,
            "right" | "d" => MoveKeys::RIGHT,
            _ => return Err(ScriptError::UnknownKey(name.to_string())),
        };
    }

    Ok(keys)
}

impl FromStr for ScriptedInput {
    type Err = ScriptError;

    fn from_str(script: &str) -> Result<Self, Self::Err> {
        let mut segments = Vec::new();

        for raw in script.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (keys, ticks) = match raw.split_once(':') {
                Some((keys, count)) => {
                    let ticks = count
                        .trim()
                        .parse::<u32>()
                        .ok()
                        .filter(|n| *n > 0)
                        .ok_or_else(|| ScriptError::InvalidCount(raw.to_string()))?;
                    (keys, ticks)
                }
                None => (raw, 1),
            };

            segments.push(Segment {
                input: InputSnapshot::from_keys(parse_keys(keys.trim())?),
                ticks,
            });
        }

        if segments.is_empty() {
            return Err(ScriptError::Empty);
        }

        Ok(Self {
            segments,
            segment: 0,
            elapsed: 0,
        })
    }
}
