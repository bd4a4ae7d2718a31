//! Ingress dispatch shared by every transport.
//!
//! A transport hands each received buffer to [`Dispatcher::dispatch`] (binary
//! control frames) or [`Dispatcher::remote`] (text commands). Frames are
//! applied synchronously, so a transport never decodes frame N+1 before
//! frame N reached the engine.

use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use crate::engine::{ActuationEngine, EngineError};
use crate::frame::{ControlCommand, FrameError, button_name, decode_frame};
use crate::led::StatusLed;
use crate::mapper::{ActuatorTarget, MappingConfig, map_command};
use crate::pwm::PwmOutput;
use crate::remote::{RemoteCommand, RemoteError, RemoteReply};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("frame dropped: {0}")]
    Frame(#[from] FrameError),
    #[error("actuation failed: {0}")]
    Engine(#[from] EngineError),
}

#[derive(Debug, Default)]
struct DispatchStats {
    accepted: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    pub accepted: u64,
    pub dropped: u64,
    pub failed: u64,
}

pub struct Dispatcher<P: PwmOutput> {
    engine: Arc<ActuationEngine<P>>,
    mapping: MappingConfig,
    led: Option<Mutex<StatusLed>>,
    stats: DispatchStats,
    // source whose command last set motor power
    motor_driver: Mutex<Option<String>>,
}

impl<P: PwmOutput> Dispatcher<P> {
    pub fn new(engine: Arc<ActuationEngine<P>>, mapping: MappingConfig) -> Self {
        Dispatcher {
            engine,
            mapping,
            led: None,
            stats: DispatchStats::default(),
            motor_driver: Mutex::new(None),
        }
    }

    pub fn with_led(mut self, led: StatusLed) -> Self {
        self.led = Some(Mutex::new(led));
        self
    }

    pub fn engine(&self) -> &Arc<ActuationEngine<P>> {
        &self.engine
    }

    fn driver(&self) -> MutexGuard<'_, Option<String>> {
        self.motor_driver.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The source that last commanded motor power, if any.
    pub fn motor_driver(&self) -> Option<String> {
        self.driver().clone()
    }

    /// Decodes, maps and applies one control frame.
    ///
    /// Both the steering and the motor write are attempted even if the first
    /// one fails; the first failure is returned.
    pub fn handle_frame(&self, buf: &[u8]) -> Result<ActuatorTarget, DispatchError> {
        let command = decode_frame(buf)?;
        if let ControlCommand::Gamepad(gp) = &command {
            if gp.buttons != 0 {
                let pressed: Vec<&str> = gp.pressed_buttons().map(button_name).collect();
                debug!("buttons {}", pressed.join(" "));
            }
        }
        let target = map_command(&command, &self.mapping);

        let steering = self.engine.set_angle(target.steering_angle);
        let motor = self.engine.set_motor(target.motor_percent);
        steering?;
        motor?;
        Ok(target)
    }

    /// Applies a frame and logs the outcome. Never fails.
    pub fn dispatch(&self, source: &str, buf: &[u8]) -> Option<ActuatorTarget> {
        // held across the write so a concurrent stop cannot slip in between
        let mut driver = self.driver();
        let result = self.handle_frame(buf);
        if !matches!(result, Err(DispatchError::Frame(_))) {
            *driver = Some(source.to_string());
        }
        drop(driver);

        match result {
            Ok(target) => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "{}: steering {} motor {}",
                    source, target.steering_angle, target.motor_percent
                );
                Some(target)
            }
            Err(DispatchError::Frame(e)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("{}: dropped {} byte frame: {}", source, buf.len(), e);
                None
            }
            Err(DispatchError::Engine(e)) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                error!("{}: {}", source, e);
                None
            }
        }
    }

    pub fn handle_remote(&self, source: &str, text: &str) -> Result<RemoteReply, RemoteError> {
        let command = RemoteCommand::parse(text)?;
        let action = command.validate(self.engine.table())?;
        let result = action.execute(&self.engine, self.led.as_ref());
        if action.drives_motor() {
            *self.driver() = Some(source.to_string());
        }
        result
    }

    /// Runs a remote command and always produces a reply.
    pub fn remote(&self, source: &str, text: &str) -> RemoteReply {
        match self.handle_remote(source, text) {
            Ok(reply) => {
                debug!("{}: {:?} ok", source, text.trim());
                reply
            }
            Err(e) => {
                warn!("{}: {:?} rejected: {}", source, text.trim(), e);
                RemoteReply::failed(&e)
            }
        }
    }

    /// Drops motor power to zero when a transport goes quiet, but only if
    /// that transport is the one currently driving the motor.
    pub fn stop_motor(&self, source: &str) {
        let mut driver = self.driver();
        if driver.as_deref() != Some(source) {
            return;
        }
        match self.engine.stop_motor() {
            Ok(()) => {
                info!("{}: motor stopped", source);
                *driver = None;
            }
            Err(e) => error!("{}: cannot stop motor: {}", source, e),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.stats.accepted.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }
}
