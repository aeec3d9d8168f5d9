use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::input::InputSnapshot;

pub const DEFAULT_ACCELERATION: f64 = 10.0 * 0.01;
pub const DEFAULT_FRICTION: f64 = 0.99;

/// Kinematic state of one controlled entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub position: DVec2,
    pub velocity: DVec2,
}

impl EntityState {
    pub fn new(position: DVec2, velocity: DVec2) -> Self {
        Self { position, velocity }
    }
}

/// Accelerate-then-damp movement shared by client prediction and the server.
///
/// Both sides must run with identical parameters, otherwise every
/// reconciliation produces a correction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionModel {
    pub acceleration: f64,
    pub friction: f64,
}

impl Default for MotionModel {
    fn default() -> Self {
        Self {
            acceleration: DEFAULT_ACCELERATION,
            friction: DEFAULT_FRICTION,
        }
    }
}

impl MotionModel {
    pub fn new(acceleration: f64, friction: f64) -> Self {
        Self {
            acceleration,
            friction,
        }
    }

    pub fn advance(&self, state: &mut EntityState, input: &InputSnapshot, dt: f64) {
        state.velocity += input.direction() * self.acceleration * dt;
        state.velocity *= self.friction;
        state.position += state.velocity * dt;
    }
}
