//! In-memory PWM outputs.
//!
//! Clones share state, so a test keeps one handle while the engine owns another.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{HardwareError, PwmOutput};
use crate::config::ChannelId;
use crate::signal::{FadeNotifier, FadeOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fade {
    pub channel: ChannelId,
    pub duty: u32,
    pub duration: Duration,
}

#[derive(Default)]
struct MockState {
    duties: [Option<u32>; 3],
    writes: Vec<(ChannelId, u32)>,
    fades: Vec<Fade>,
    failing: HashSet<ChannelId>,
    hold_fades: bool,
    pending: Vec<(Fade, FadeNotifier)>,
    cancelled: Vec<ChannelId>,
}

#[derive(Clone, Default)]
pub struct MockPwm {
    state: Arc<Mutex<MockState>>,
}

impl MockPwm {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every successful instant write, in order.
    pub fn writes(&self) -> Vec<(ChannelId, u32)> {
        self.lock().writes.clone()
    }

    pub fn writes_to(&self, channel: ChannelId) -> Vec<u32> {
        self.lock()
            .writes
            .iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, d)| *d)
            .collect()
    }

    pub fn fades(&self) -> Vec<Fade> {
        self.lock().fades.clone()
    }

    /// Current output level, `None` until the channel is first driven.
    pub fn duty(&self, channel: ChannelId) -> Option<u32> {
        self.lock().duties[channel.index()]
    }

    pub fn set_failing(&self, channel: ChannelId, failing: bool) {
        let mut state = self.lock();
        if failing {
            state.failing.insert(channel);
        } else {
            state.failing.remove(&channel);
        }
    }

    /// When held, fades stay in flight until [`MockPwm::complete_fades`].
    pub fn hold_fades(&self, hold: bool) {
        self.lock().hold_fades = hold;
    }

    pub fn pending_fades(&self) -> usize {
        self.lock().pending.len()
    }

    /// Finishes every held fade and fires its completion. Returns how many.
    pub fn complete_fades(&self) -> usize {
        let pending = {
            let mut state = self.lock();
            let pending = std::mem::take(&mut state.pending);
            for (fade, _) in &pending {
                state.duties[fade.channel.index()] = Some(fade.duty);
            }
            pending
        };
        for (_, done) in &pending {
            done.notify(FadeOutcome::Completed);
        }
        pending.len()
    }

    /// Stops every held fade halfway and reports it aborted. Returns how many.
    pub fn abort_fades(&self) -> usize {
        let pending = {
            let mut state = self.lock();
            let pending = std::mem::take(&mut state.pending);
            for (fade, _) in &pending {
                let slot = &mut state.duties[fade.channel.index()];
                let from = slot.unwrap_or(0);
                *slot = Some(from / 2 + fade.duty / 2);
            }
            pending
        };
        for (_, done) in &pending {
            done.notify(FadeOutcome::Aborted);
        }
        pending.len()
    }

    /// Channels whose fade was cancelled, in order.
    pub fn cancelled(&self) -> Vec<ChannelId> {
        self.lock().cancelled.clone()
    }
}

impl PwmOutput for MockPwm {
    fn write_duty(&mut self, channel: ChannelId, duty: u32) -> Result<(), HardwareError> {
        let mut state = self.lock();
        if state.failing.contains(&channel) {
            return Err(HardwareError::Write {
                channel,
                reason: String::from("injected failure"),
            });
        }
        state.duties[channel.index()] = Some(duty);
        state.writes.push((channel, duty));
        Ok(())
    }

    fn start_fade(
        &mut self,
        channel: ChannelId,
        duty: u32,
        duration: Duration,
        done: FadeNotifier,
    ) -> Result<(), HardwareError> {
        let mut state = self.lock();
        if state.failing.contains(&channel) {
            return Err(HardwareError::Fade {
                channel,
                reason: String::from("injected failure"),
            });
        }
        let fade = Fade {
            channel,
            duty,
            duration,
        };
        state.fades.push(fade);
        if state.hold_fades {
            state.pending.push((fade, done));
        } else {
            state.duties[channel.index()] = Some(duty);
            done.notify(FadeOutcome::Completed);
        }
        Ok(())
    }

    fn cancel_fade(&mut self, channel: ChannelId) -> Result<(), HardwareError> {
        let mut state = self.lock();
        // a cancelled fade never reports
        state.pending.retain(|(fade, _)| fade.channel != channel);
        state.cancelled.push(channel);
        Ok(())
    }
}
