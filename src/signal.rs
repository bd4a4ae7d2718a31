//! Completion signal between a PWM fade and the task waiting for it.
//!
//! The notifying side only ever does a `try_send` on a bounded channel, so it
//! can be called from a completion callback without blocking or allocating.
//! Every fade gets its own token; a completion carrying another token is
//! stale and gets discarded by the waiter.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

const SIGNAL_DEPTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeOutcome {
    /// The output reached the target duty.
    Completed,
    /// The fade stopped early; the output holds some intermediate duty.
    Aborted,
}

#[derive(Debug, Clone)]
pub struct FadeNotifier {
    tx: SyncSender<(u64, FadeOutcome)>,
    token: u64,
}

impl FadeNotifier {
    /// Returns false if the signal is saturated or its waiter is gone.
    pub fn notify(&self, outcome: FadeOutcome) -> bool {
        match self.tx.try_send((self.token, outcome)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

pub struct FadeSignal {
    tx: SyncSender<(u64, FadeOutcome)>,
    rx: Mutex<Receiver<(u64, FadeOutcome)>>,
}

impl FadeSignal {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::sync_channel(SIGNAL_DEPTH);
        FadeSignal {
            tx,
            rx: Mutex::new(rx),
        }
    }

    pub fn notifier(&self, token: u64) -> FadeNotifier {
        FadeNotifier {
            tx: self.tx.clone(),
            token,
        }
    }

    /// Blocks until the completion for `token` arrives. `None` on timeout.
    pub fn wait(&self, token: u64, timeout: Duration) -> Option<FadeOutcome> {
        let deadline = Instant::now() + timeout;
        let rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(left) {
                Ok((t, outcome)) if t == token => return Some(outcome),
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return None;
                }
            }
        }
    }

    /// Discards notifications left over from an earlier fade.
    pub fn drain(&self) -> usize {
        let rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        rx.try_iter().count()
    }
}

impl Default for FadeSignal {
    fn default() -> Self {
        Self::new()
    }
}
