use log::info;
use rppal::gpio::{Gpio, OutputPin};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

pub trait LedPin: Send {
    fn set_high(&mut self);
    fn set_low(&mut self);
    fn is_set_high(&self) -> bool;
}

impl LedPin for OutputPin {
    fn set_high(&mut self) {
        OutputPin::set_high(self)
    }

    fn set_low(&mut self) {
        OutputPin::set_low(self)
    }

    fn is_set_high(&self) -> bool {
        OutputPin::is_set_high(self)
    }
}

/// Single status LED, switched by remote commands.
pub struct StatusLed {
    pin: Box<dyn LedPin>,
}

impl StatusLed {
    pub fn new(pin: impl LedPin + 'static) -> Self {
        StatusLed { pin: Box::new(pin) }
    }

    pub fn gpio(pin_number: u8) -> Result<Self, rppal::gpio::Error> {
        let pin = Gpio::new()?.get(pin_number)?.into_output_low();
        info!("status LED on GPIO {}", pin_number);
        Ok(Self::new(pin))
    }

    pub fn on(&mut self) {
        self.pin.set_high();
    }

    pub fn off(&mut self) {
        self.pin.set_low();
    }

    /// Returns the new state.
    pub fn toggle(&mut self) -> bool {
        if self.pin.is_set_high() {
            self.pin.set_low();
            false
        } else {
            self.pin.set_high();
            true
        }
    }

    pub fn is_on(&self) -> bool {
        self.pin.is_set_high()
    }

    /// Startup blink, leaves the LED off.
    pub fn blink(&mut self, times: usize, period: Duration) {
        for _ in 0..times {
            self.on();
            thread::sleep(period / 2);
            self.off();
            thread::sleep(period / 2);
        }
    }
}

/// LED stand-in for tests and dry runs. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MockLed {
    lit: Arc<AtomicBool>,
}

impl MockLed {
    pub fn is_lit(&self) -> bool {
        self.lit.load(Ordering::SeqCst)
    }
}

impl LedPin for MockLed {
    fn set_high(&mut self) {
        self.lit.store(true, Ordering::SeqCst);
    }

    fn set_low(&mut self) {
        self.lit.store(false, Ordering::SeqCst);
    }

    fn is_set_high(&self) -> bool {
        self.is_lit()
    }
}
