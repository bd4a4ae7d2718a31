//! Hardware PWM outputs.
//!
//! The engine talks to the outputs through [`PwmOutput`]; `gpio` drives real
//! pins through rppal, `mock` records writes for tests and dry runs.

mod gpio;
pub mod mock;

pub use gpio::GpioPwm;
pub use mock::MockPwm;

use std::time::Duration;
use thiserror::Error;

use crate::config::ChannelId;
use crate::signal::FadeNotifier;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HardwareError {
    #[error("no output configured for channel {0}")]
    UnknownChannel(ChannelId),
    #[error("write to {channel} failed: {reason}")]
    Write { channel: ChannelId, reason: String },
    #[error("fade on {channel} failed to start: {reason}")]
    Fade { channel: ChannelId, reason: String },
}

pub trait PwmOutput: Send {
    /// Writes `duty` immediately. `duty` is in the channel's native resolution.
    fn write_duty(&mut self, channel: ChannelId, duty: u32) -> Result<(), HardwareError>;

    /// Starts a transition to `duty` over `duration` and returns without
    /// waiting. `done` must be notified once when the transition ends, with
    /// [`FadeOutcome::Aborted`](crate::signal::FadeOutcome::Aborted) if the
    /// target was not reached.
    fn start_fade(
        &mut self,
        channel: ChannelId,
        duty: u32,
        duration: Duration,
        done: FadeNotifier,
    ) -> Result<(), HardwareError>;

    /// Stops a running fade on `channel`, leaving the output where it is.
    /// No-op when nothing is fading.
    fn cancel_fade(&mut self, channel: ChannelId) -> Result<(), HardwareError>;
}
