use log::{debug, info, warn};
use rppal::gpio::{Gpio, OutputPin};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use super::{HardwareError, PwmOutput};
use crate::config::{ChannelId, ChannelTable};
use crate::signal::{FadeNotifier, FadeOutcome};

const FADE_STEP: Duration = Duration::from_millis(20);

struct Output {
    pin: OutputPin,
    frequency_hz: f64,
    max_duty: u32,
    duty: u32,
    // bumped on every write so a running fade knows it was superseded
    generation: u64,
}

impl Output {
    fn apply(&mut self, channel: ChannelId, duty: u32) -> Result<(), HardwareError> {
        let duty_cycle = duty as f64 / self.max_duty as f64;
        self.pin
            .set_pwm_frequency(self.frequency_hz, duty_cycle)
            .map_err(|e| HardwareError::Write {
                channel,
                reason: e.to_string(),
            })?;
        self.duty = duty;
        Ok(())
    }
}

type Outputs = Arc<Mutex<HashMap<ChannelId, Output>>>;

/// Software PWM on Raspberry Pi GPIO pins.
pub struct GpioPwm {
    outputs: Outputs,
}

impl GpioPwm {
    pub fn new(table: &ChannelTable) -> Result<Self, rppal::gpio::Error> {
        let gpio = Gpio::new()?;
        let mut outputs = HashMap::new();

        for spec in table.iter() {
            let mut pin = gpio.get(spec.pin)?.into_output();
            pin.set_pwm_frequency(spec.timer.frequency_hz, 0.0)?;
            info!(
                "{} on GPIO {} (timer {}, {} Hz, {}..={})",
                spec.id, spec.pin, spec.timer.id, spec.timer.frequency_hz, spec.min_duty, spec.max_duty
            );
            outputs.insert(
                spec.id,
                Output {
                    pin,
                    frequency_hz: spec.timer.frequency_hz,
                    max_duty: spec.timer.max_duty(),
                    duty: 0,
                    generation: 0,
                },
            );
        }

        Ok(GpioPwm {
            outputs: Arc::new(Mutex::new(outputs)),
        })
    }
}

fn lock(outputs: &Outputs) -> std::sync::MutexGuard<'_, HashMap<ChannelId, Output>> {
    outputs.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PwmOutput for GpioPwm {
    fn write_duty(&mut self, channel: ChannelId, duty: u32) -> Result<(), HardwareError> {
        let mut outputs = lock(&self.outputs);
        let output = outputs
            .get_mut(&channel)
            .ok_or(HardwareError::UnknownChannel(channel))?;
        output.generation += 1;
        output.apply(channel, duty)
    }

    fn start_fade(
        &mut self,
        channel: ChannelId,
        duty: u32,
        duration: Duration,
        done: FadeNotifier,
    ) -> Result<(), HardwareError> {
        let (from, generation) = {
            let mut outputs = lock(&self.outputs);
            let output = outputs
                .get_mut(&channel)
                .ok_or(HardwareError::UnknownChannel(channel))?;
            output.generation += 1;
            (output.duty, output.generation)
        };

        let outputs = Arc::clone(&self.outputs);
        thread::Builder::new()
            .name(format!("fade-{}", channel))
            .spawn(move || run_fade(outputs, channel, from, duty, duration, generation, done))
            .map_err(|e| HardwareError::Fade {
                channel,
                reason: e.to_string(),
            })?;
        Ok(())
    }

    fn cancel_fade(&mut self, channel: ChannelId) -> Result<(), HardwareError> {
        let mut outputs = lock(&self.outputs);
        let output = outputs
            .get_mut(&channel)
            .ok_or(HardwareError::UnknownChannel(channel))?;
        output.generation += 1;
        Ok(())
    }
}

fn run_fade(
    outputs: Outputs,
    channel: ChannelId,
    from: u32,
    to: u32,
    duration: Duration,
    generation: u64,
    done: FadeNotifier,
) {
    let steps = (duration.as_millis() / FADE_STEP.as_millis()).max(1) as u32;
    let tick = duration / steps;

    let mut outcome = FadeOutcome::Completed;
    for step in 1..=steps {
        thread::sleep(tick);
        let mut outputs = lock(&outputs);
        let Some(output) = outputs.get_mut(&channel) else {
            outcome = FadeOutcome::Aborted;
            break;
        };
        if output.generation != generation {
            debug!("fade on {} superseded", channel);
            outcome = FadeOutcome::Aborted;
            break;
        }
        if let Err(e) = output.apply(channel, interpolate(from, to, step, steps)) {
            warn!("fade on {} aborted: {}", channel, e);
            outcome = FadeOutcome::Aborted;
            break;
        }
    }

    done.notify(outcome);
}

fn interpolate(from: u32, to: u32, step: u32, steps: u32) -> u32 {
    let from = from as i64;
    let delta = to as i64 - from;
    (from + delta * step as i64 / steps.max(1) as i64) as u32
}
