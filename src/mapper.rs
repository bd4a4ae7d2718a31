//! Maps decoded controller commands onto steering angle and motor power.

use serde::{Deserialize, Serialize};

use crate::frame::{AndroidCommand, ControlCommand, GamepadCommand};

pub const ANGLE_MIN: i32 = 0;
pub const ANGLE_MAX: i32 = 180;
pub const ANGLE_NEUTRAL: i32 = 90;
pub const MOTOR_MIN: i32 = -100;
pub const MOTOR_MAX: i32 = 100;

/// Tunable thresholds. Defaults match the values the controllers are calibrated for.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    /// Motor percentages with a magnitude below this are forced to zero.
    pub deadzone: i32,
    /// A trigger counts as pressed when its raw value is strictly above this.
    pub trigger_threshold: i8,
}

impl Default for MappingConfig {
    fn default() -> Self {
        MappingConfig {
            deadzone: 5,
            trigger_threshold: -95,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActuatorTarget {
    pub steering_angle: i32,
    pub motor_percent: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorMode {
    Brake,
    Forward,
    Reverse,
    Neutral,
}

/// Affine map of a [-100, 100] axis onto the servo sweep, rounded and clamped.
pub fn steering_angle(axis: i8) -> i32 {
    let scaled = (axis as i32 + 100) * 9;
    // round half up on tenths
    ((scaled + 5).div_euclid(10)).clamp(ANGLE_MIN, ANGLE_MAX)
}

pub fn motor_mode(right_trigger: i8, left_trigger: i8, threshold: i8) -> MotorMode {
    let right = right_trigger > threshold;
    let left = left_trigger > threshold;
    match (right, left) {
        (true, true) => MotorMode::Brake,
        (true, false) => MotorMode::Forward,
        (false, true) => MotorMode::Reverse,
        (false, false) => MotorMode::Neutral,
    }
}

pub fn apply_deadzone(percent: i32, deadzone: i32) -> i32 {
    if percent.abs() < deadzone { 0 } else { percent }
}

fn finish(steering_angle: i32, motor_percent: i32, config: &MappingConfig) -> ActuatorTarget {
    let motor_percent = motor_percent.clamp(MOTOR_MIN, MOTOR_MAX);
    ActuatorTarget {
        steering_angle: steering_angle.clamp(ANGLE_MIN, ANGLE_MAX),
        motor_percent: apply_deadzone(motor_percent, config.deadzone),
    }
}

pub fn map_gamepad(gp: &GamepadCommand, config: &MappingConfig) -> ActuatorTarget {
    let rt = gp.right_trigger as i32;
    let lt = gp.left_trigger as i32;

    let motor = match motor_mode(gp.right_trigger, gp.left_trigger, config.trigger_threshold) {
        MotorMode::Brake | MotorMode::Neutral => 0,
        MotorMode::Forward => (rt + 100) / 2,
        MotorMode::Reverse => (lt + 100) / -2,
    };

    finish(steering_angle(gp.left_x), motor, config)
}

pub fn map_android(cmd: &AndroidCommand, config: &MappingConfig) -> ActuatorTarget {
    finish(steering_angle(cmd.slider_x), cmd.slider_y as i32, config)
}

pub fn map_command(cmd: &ControlCommand, config: &MappingConfig) -> ActuatorTarget {
    match cmd {
        ControlCommand::Gamepad(gp) => map_gamepad(gp, config),
        ControlCommand::Android(a) => map_android(a, config),
    }
}
