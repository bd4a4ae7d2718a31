//! PWM actuation engine.
//!
//! Owns the actuator state (cached angle, motor power and per-channel duty)
//! together with the hardware outputs, behind one mutex. Any number of
//! ingress threads may share an engine through an `Arc`.
//!
//! Each channel is either idle or fading. Instant writes need an idle
//! channel and fail with [`EngineError::ChannelBusy`] otherwise; a fade
//! request on a fading channel waits for the running fade to finish. The
//! engine lock is released while a fade is waited on, so other channels stay
//! writable.

use log::{debug, warn};
use serde::Serialize;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

use crate::config::{ChannelId, ChannelTable};
use crate::mapper::{ANGLE_MAX, ANGLE_MIN, MOTOR_MAX, MOTOR_MIN, apply_deadzone};
use crate::pwm::{HardwareError, PwmOutput};
use crate::signal::{FadeOutcome, FadeSignal};

/// Extra time granted to the hardware past the requested fade duration.
pub const FADE_COMPLETION_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Hardware(#[from] HardwareError),
    #[error("channel {0} is fading")]
    ChannelBusy(ChannelId),
    #[error("fade on {0} did not complete within {1:?}")]
    FadeTimeout(ChannelId, Duration),
    #[error("fade on {0} stopped before reaching its target")]
    FadeAborted(ChannelId),
}

#[derive(Debug, Clone, Copy, Default)]
struct ChannelState {
    // last duty written to the hardware, None until the first write
    duty: Option<u32>,
    busy: bool,
}

struct EngineState<P> {
    output: P,
    channels: [ChannelState; 3],
    angle: Option<i32>,
    motor: Option<i32>,
    fade_token: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelSnapshot {
    pub channel: ChannelId,
    pub duty: Option<u32>,
    pub busy: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineSnapshot {
    pub angle: Option<i32>,
    pub motor_percent: Option<i32>,
    pub channels: Vec<ChannelSnapshot>,
}

pub struct ActuationEngine<P: PwmOutput> {
    table: ChannelTable,
    deadzone: i32,
    state: Mutex<EngineState<P>>,
    idle: Condvar,
    signals: [FadeSignal; 3],
}

impl<P: PwmOutput> ActuationEngine<P> {
    pub fn new(output: P, table: ChannelTable, deadzone: i32) -> Self {
        ActuationEngine {
            table,
            deadzone,
            state: Mutex::new(EngineState {
                output,
                channels: [ChannelState::default(); 3],
                angle: None,
                motor: None,
                fade_token: 0,
            }),
            idle: Condvar::new(),
            signals: std::array::from_fn(|_| FadeSignal::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState<P>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn table(&self) -> &ChannelTable {
        &self.table
    }

    /// Clamps, skips the write if the channel already holds that duty,
    /// otherwise writes and caches. Returns whether the hardware was touched.
    fn write_locked(
        &self,
        state: &mut EngineState<P>,
        channel: ChannelId,
        duty: u32,
    ) -> Result<bool, EngineError> {
        let duty = self.table.get(channel).clamp(duty);
        let slot = state.channels[channel.index()];
        if slot.busy {
            return Err(EngineError::ChannelBusy(channel));
        }
        if slot.duty == Some(duty) {
            return Ok(false);
        }
        state.output.write_duty(channel, duty)?;
        state.channels[channel.index()].duty = Some(duty);
        debug!("{} <- {}", channel, duty);
        Ok(true)
    }

    fn invalidate(state: &mut EngineState<P>, channel: ChannelId) {
        match channel {
            ChannelId::Steering => state.angle = None,
            ChannelId::MotorForward | ChannelId::MotorBackward => state.motor = None,
        }
    }

    pub fn angle_duty(&self, degrees: i32) -> u32 {
        let degrees = degrees.clamp(ANGLE_MIN, ANGLE_MAX) as u32;
        self.table
            .get(ChannelId::Steering)
            .scale(degrees, ANGLE_MAX as u32)
    }

    pub fn motor_duty(&self, channel: ChannelId, percent: i32) -> u32 {
        let percent = percent.unsigned_abs().min(MOTOR_MAX as u32);
        self.table.get(channel).scale(percent, MOTOR_MAX as u32)
    }

    pub fn set_angle(&self, degrees: i32) -> Result<(), EngineError> {
        let degrees = degrees.clamp(ANGLE_MIN, ANGLE_MAX);
        let mut state = self.lock();
        if state.angle == Some(degrees) {
            return Ok(());
        }
        self.write_locked(&mut state, ChannelId::Steering, self.angle_duty(degrees))?;
        state.angle = Some(degrees);
        Ok(())
    }

    pub fn set_motor(&self, percent: i32) -> Result<(), EngineError> {
        let percent = apply_deadzone(percent.clamp(MOTOR_MIN, MOTOR_MAX), self.deadzone);
        let mut state = self.lock();
        if state.motor == Some(percent) {
            return Ok(());
        }
        for channel in [ChannelId::MotorForward, ChannelId::MotorBackward] {
            if state.channels[channel.index()].busy {
                return Err(EngineError::ChannelBusy(channel));
            }
        }

        // unknown until both sides are written
        state.motor = None;

        let fwd_off = self.table.get(ChannelId::MotorForward).min_duty;
        let bwd_off = self.table.get(ChannelId::MotorBackward).min_duty;

        // the idle side is always released before the driven side is raised
        if percent > 0 {
            self.write_locked(&mut state, ChannelId::MotorBackward, bwd_off)?;
            let duty = self.motor_duty(ChannelId::MotorForward, percent);
            self.write_locked(&mut state, ChannelId::MotorForward, duty)?;
        } else if percent < 0 {
            self.write_locked(&mut state, ChannelId::MotorForward, fwd_off)?;
            let duty = self.motor_duty(ChannelId::MotorBackward, percent);
            self.write_locked(&mut state, ChannelId::MotorBackward, duty)?;
        } else {
            self.write_locked(&mut state, ChannelId::MotorForward, fwd_off)?;
            self.write_locked(&mut state, ChannelId::MotorBackward, bwd_off)?;
        }

        state.motor = Some(percent);
        Ok(())
    }

    pub fn stop_motor(&self) -> Result<(), EngineError> {
        self.set_motor(0)
    }

    /// Writes a duty directly, bypassing angle and motor semantics.
    pub fn raw_duty_write(&self, channel: ChannelId, duty: u32) -> Result<(), EngineError> {
        let mut state = self.lock();
        if self.write_locked(&mut state, channel, duty)? {
            Self::invalidate(&mut state, channel);
        }
        Ok(())
    }

    /// Fades `channel` to `duty` over `duration` and blocks until the
    /// hardware reports completion.
    pub fn fade_to(
        &self,
        channel: ChannelId,
        duty: u32,
        duration: Duration,
    ) -> Result<(), EngineError> {
        let index = channel.index();
        let duty = self.table.get(channel).clamp(duty);
        let signal = &self.signals[index];

        let token = {
            let mut state = self.lock();
            while state.channels[index].busy {
                state = self
                    .idle
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            if state.channels[index].duty == Some(duty) {
                return Ok(());
            }

            state.fade_token += 1;
            let token = state.fade_token;
            signal.drain();
            state
                .output
                .start_fade(channel, duty, duration, signal.notifier(token))?;
            state.channels[index].busy = true;
            debug!("{} fading to {} over {:?}", channel, duty, duration);
            token
        };

        let limit = duration + FADE_COMPLETION_GRACE;
        let outcome = signal.wait(token, limit);

        let mut state = self.lock();
        state.channels[index].busy = false;
        let result = match outcome {
            Some(FadeOutcome::Completed) => {
                state.channels[index].duty = Some(duty);
                Ok(())
            }
            Some(FadeOutcome::Aborted) => {
                state.channels[index].duty = None;
                Err(EngineError::FadeAborted(channel))
            }
            None => {
                if let Err(e) = state.output.cancel_fade(channel) {
                    warn!("cannot cancel fade on {}: {}", channel, e);
                }
                state.channels[index].duty = None;
                Err(EngineError::FadeTimeout(channel, limit))
            }
        };
        Self::invalidate(&mut state, channel);
        drop(state);
        self.idle.notify_all();
        result
    }

    pub fn angle(&self) -> Option<i32> {
        self.lock().angle
    }

    pub fn motor_percent(&self) -> Option<i32> {
        self.lock().motor
    }

    pub fn duty(&self, channel: ChannelId) -> Option<u32> {
        self.lock().channels[channel.index()].duty
    }

    pub fn is_busy(&self, channel: ChannelId) -> bool {
        self.lock().channels[channel.index()].busy
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let state = self.lock();
        EngineSnapshot {
            angle: state.angle,
            motor_percent: state.motor,
            channels: ChannelId::ALL
                .iter()
                .map(|&channel| ChannelSnapshot {
                    channel,
                    duty: state.channels[channel.index()].duty,
                    busy: state.channels[channel.index()].busy,
                })
                .collect(),
        }
    }
}
