use anyhow::{Context, Result};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rcdrive::config::VehicleConfig;
use rcdrive::dispatch::Dispatcher;
use rcdrive::engine::ActuationEngine;
use rcdrive::led::{MockLed, StatusLed};
use rcdrive::logger;
use rcdrive::mapper::ANGLE_NEUTRAL;
use rcdrive::pwm::{GpioPwm, MockPwm, PwmOutput};
use rcdrive::udp::udp_thread;
use rcdrive::websocket::websocket_thread;

const DEFAULT_CONFIG: &str = "vehicle.json";

struct Args {
    dry_run: bool,
    config: PathBuf,
}

fn parse_args() -> Args {
    let mut args = Args {
        dry_run: false,
        config: PathBuf::from(DEFAULT_CONFIG),
    };
    for arg in std::env::args().skip(1) {
        if arg == "--dry-run" {
            args.dry_run = true;
        } else {
            args.config = PathBuf::from(arg);
        }
    }
    args
}

fn load_config(path: &Path) -> VehicleConfig {
    match VehicleConfig::load(path) {
        Ok(config) => {
            info!("loaded {}", path.display());
            config
        }
        Err(e) => {
            warn!("{}, using defaults", e);
            let config = VehicleConfig::default();
            if let Err(e) = config.save(path) {
                warn!("cannot write defaults: {}", e);
            }
            config
        }
    }
}

fn spawn<F>(name: &str, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .with_context(|| format!("cannot spawn {} thread", name))
}

fn run<P: PwmOutput + 'static>(
    config: VehicleConfig,
    output: P,
    led: Option<StatusLed>,
) -> Result<()> {
    let table = config.channel_table()?;
    let engine = Arc::new(ActuationEngine::new(output, table, config.mapping.deadzone));

    engine
        .set_angle(ANGLE_NEUTRAL)
        .context("cannot center steering")?;
    engine.stop_motor().context("cannot stop motor")?;
    info!("actuators at neutral");

    let mut dispatcher = Dispatcher::new(Arc::clone(&engine), config.mapping);
    if let Some(led) = led {
        dispatcher = dispatcher.with_led(led);
    }
    let dispatcher = Arc::new(dispatcher);
    let inactivity = config.inactivity_timeout();

    let udp = {
        let dispatcher = Arc::clone(&dispatcher);
        let port = config.udp_port;
        spawn("udp", move || udp_thread(dispatcher, port, inactivity))?
    };
    let ws = {
        let dispatcher = Arc::clone(&dispatcher);
        let port = config.websocket_port;
        spawn("websocket", move || websocket_thread(dispatcher, port, inactivity))?
    };

    for handle in [udp, ws] {
        if handle.join().is_err() {
            error!("ingress thread panicked");
        }
    }

    engine.stop_motor()?;
    Ok(())
}

fn main() -> Result<()> {
    let args = parse_args();
    let env_level = std::env::var(logger::LEVEL_ENV).ok();
    logger::init(logger::resolve_level("info", env_level.as_deref()))?;

    info!("Starting rcdrive");
    let config = load_config(&args.config);
    logger::set_level(logger::resolve_level(&config.log_level, env_level.as_deref()));

    if args.dry_run {
        info!("dry run, no GPIO access");
        return run(config, MockPwm::new(), Some(StatusLed::new(MockLed::default())));
    }

    let table = config.channel_table()?;
    let output = GpioPwm::new(&table).context("cannot open PWM outputs")?;
    let led = match config.led_pin {
        Some(pin) => {
            let mut led = StatusLed::gpio(pin).context("cannot open status LED")?;
            led.blink(3, Duration::from_millis(80));
            Some(led)
        }
        None => None,
    };

    run(config, output, led)
}
