//! Remote command surface.
//!
//! Commands arrive either as JSON (`{"cmd": "SET_ANGLE", "angle": 90}`) or
//! as text (`SET_ANGLE 90`, `SET_ANGLE{90}`). Every field is range-checked
//! before the engine is touched.

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

use crate::config::{ChannelId, ChannelTable};
use crate::engine::{ActuationEngine, EngineError, EngineSnapshot};
use crate::led::StatusLed;
use crate::mapper::{ANGLE_MAX, ANGLE_MIN, MOTOR_MAX, MOTOR_MIN};
use crate::pwm::PwmOutput;

pub const MAX_FADE_MS: i64 = 10_000;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("cannot parse command: {0}")]
    Parse(String),
    #[error("{field} must be a number, got {value:?}")]
    NotNumeric { field: &'static str, value: String },
    #[error("{field} = {value} is outside {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },
    #[error("unknown channel {0:?}")]
    UnknownChannel(String),
    #[error("no status LED configured")]
    NoLed,
    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "cmd", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteCommand {
    SetAngle { angle: i64 },
    SetMotor { percent: i64 },
    ServoDuty { duty: i64 },
    MotorDutyFwd { duty: i64 },
    MotorDutyBwd { duty: i64 },
    Fade {
        channel: String,
        duty: i64,
        duration_ms: i64,
    },
    Stop,
    Status,
    LedOn,
    LedOff,
    LedToggle,
}

/// A command whose fields passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    SetAngle(i32),
    SetMotor(i32),
    RawDuty(ChannelId, u32),
    Fade(ChannelId, u32, Duration),
    Stop,
    Status,
    Led(LedAction),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedAction {
    On,
    Off,
    Toggle,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteReply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<EngineSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub led: Option<bool>,
}

impl RemoteReply {
    pub fn ok() -> Self {
        RemoteReply {
            ok: true,
            error: None,
            status: None,
            led: None,
        }
    }

    pub fn failed(err: &RemoteError) -> Self {
        RemoteReply {
            ok: false,
            error: Some(err.to_string()),
            status: None,
            led: None,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from(r#"{"ok":false}"#))
    }
}

fn text_fields(name: &str) -> &'static [&'static str] {
    match name {
        "SET_ANGLE" => &["angle"],
        "SET_MOTOR" => &["percent"],
        "SERVO_DUTY" | "MOTOR_DUTY_FWD" | "MOTOR_DUTY_BWD" => &["duty"],
        "FADE" => &["channel", "duty", "duration_ms"],
        _ => &[],
    }
}

fn parse_text(text: &str) -> Result<RemoteCommand, RemoteError> {
    let normalized: String = text
        .chars()
        .map(|c| if matches!(c, '{' | '}' | '(' | ')' | ',') { ' ' } else { c })
        .collect();
    let mut parts = normalized.split_whitespace();
    let name = parts
        .next()
        .ok_or_else(|| RemoteError::Parse(String::from("empty command")))?
        .to_ascii_uppercase();
    let args: Vec<&str> = parts.collect();

    let fields = text_fields(&name);
    if args.len() != fields.len() {
        return Err(RemoteError::Parse(format!(
            "{} takes {} argument(s), got {}",
            name,
            fields.len(),
            args.len()
        )));
    }

    let mut object = Map::new();
    object.insert(String::from("cmd"), Value::from(name.as_str()));
    for (&field, arg) in fields.iter().zip(args) {
        let value = if field == "channel" {
            Value::from(arg)
        } else {
            let number = arg.parse::<i64>().map_err(|_| RemoteError::NotNumeric {
                field,
                value: arg.to_string(),
            })?;
            Value::from(number)
        };
        object.insert(field.to_string(), value);
    }

    serde_json::from_value(Value::Object(object)).map_err(|e| RemoteError::Parse(e.to_string()))
}

fn in_range(field: &'static str, value: i64, min: i64, max: i64) -> Result<i64, RemoteError> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(RemoteError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

fn duty_for(table: &ChannelTable, channel: ChannelId, duty: i64) -> Result<u32, RemoteError> {
    let spec = table.get(channel);
    if spec.contains(duty) {
        Ok(duty as u32)
    } else {
        Err(RemoteError::OutOfRange {
            field: "duty",
            value: duty,
            min: spec.min_duty as i64,
            max: spec.max_duty as i64,
        })
    }
}

impl RemoteCommand {
    pub fn parse(text: &str) -> Result<Self, RemoteError> {
        let text = text.trim();
        if text.starts_with('{') {
            serde_json::from_str(text).map_err(|e| RemoteError::Parse(e.to_string()))
        } else {
            parse_text(text)
        }
    }

    pub fn validate(&self, table: &ChannelTable) -> Result<Action, RemoteError> {
        let action = match self {
            Self::SetAngle { angle } => Action::SetAngle(in_range(
                "angle",
                *angle,
                ANGLE_MIN as i64,
                ANGLE_MAX as i64,
            )? as i32),
            Self::SetMotor { percent } => Action::SetMotor(in_range(
                "percent",
                *percent,
                MOTOR_MIN as i64,
                MOTOR_MAX as i64,
            )? as i32),
            Self::ServoDuty { duty } => Action::RawDuty(
                ChannelId::Steering,
                duty_for(table, ChannelId::Steering, *duty)?,
            ),
            Self::MotorDutyFwd { duty } => Action::RawDuty(
                ChannelId::MotorForward,
                duty_for(table, ChannelId::MotorForward, *duty)?,
            ),
            Self::MotorDutyBwd { duty } => Action::RawDuty(
                ChannelId::MotorBackward,
                duty_for(table, ChannelId::MotorBackward, *duty)?,
            ),
            Self::Fade {
                channel,
                duty,
                duration_ms,
            } => {
                let channel = ChannelId::from_name(channel)
                    .ok_or_else(|| RemoteError::UnknownChannel(channel.clone()))?;
                let duty = duty_for(table, channel, *duty)?;
                let ms = in_range("duration_ms", *duration_ms, 1, MAX_FADE_MS)?;
                Action::Fade(channel, duty, Duration::from_millis(ms as u64))
            }
            Self::Stop => Action::Stop,
            Self::Status => Action::Status,
            Self::LedOn => Action::Led(LedAction::On),
            Self::LedOff => Action::Led(LedAction::Off),
            Self::LedToggle => Action::Led(LedAction::Toggle),
        };
        Ok(action)
    }
}

impl Action {
    /// Whether the action sets motor power.
    pub fn drives_motor(&self) -> bool {
        match self {
            Action::SetMotor(_) | Action::Stop => true,
            Action::RawDuty(channel, _) | Action::Fade(channel, _, _) => {
                channel.opposite_motor().is_some()
            }
            Action::SetAngle(_) | Action::Status | Action::Led(_) => false,
        }
    }

    pub fn execute<P: PwmOutput>(
        self,
        engine: &ActuationEngine<P>,
        led: Option<&Mutex<StatusLed>>,
    ) -> Result<RemoteReply, RemoteError> {
        let mut reply = RemoteReply::ok();
        match self {
            Action::SetAngle(angle) => engine.set_angle(angle)?,
            Action::SetMotor(percent) => engine.set_motor(percent)?,
            Action::RawDuty(channel, duty) => {
                if let Some(opposite) = channel.opposite_motor() {
                    let off = engine.table().get(opposite).min_duty;
                    if engine.duty(opposite).is_some_and(|d| d > off) && duty > off {
                        warn!("{} raised while {} is driven", channel, opposite);
                    }
                }
                engine.raw_duty_write(channel, duty)?
            }
            Action::Fade(channel, duty, duration) => engine.fade_to(channel, duty, duration)?,
            Action::Stop => engine.stop_motor()?,
            Action::Status => reply.status = Some(engine.snapshot()),
            Action::Led(action) => {
                let led = led.ok_or(RemoteError::NoLed)?;
                let mut led = led.lock().unwrap_or_else(PoisonError::into_inner);
                match action {
                    LedAction::On => led.on(),
                    LedAction::Off => led.off(),
                    LedAction::Toggle => {
                        led.toggle();
                    }
                }
                reply.led = Some(led.is_on());
            }
        }
        Ok(reply)
    }
}
