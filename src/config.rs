use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::mapper::MappingConfig;

pub const MAX_RESOLUTION_BITS: u8 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelId {
    Steering,
    MotorForward,
    MotorBackward,
}

impl ChannelId {
    pub const ALL: [ChannelId; 3] = [
        ChannelId::Steering,
        ChannelId::MotorForward,
        ChannelId::MotorBackward,
    ];

    pub fn index(&self) -> usize {
        match self {
            Self::Steering => 0,
            Self::MotorForward => 1,
            Self::MotorBackward => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Steering => "steering",
            Self::MotorForward => "motor_forward",
            Self::MotorBackward => "motor_backward",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// The other input of the H-bridge, `None` for steering.
    pub fn opposite_motor(&self) -> Option<Self> {
        match self {
            Self::Steering => None,
            Self::MotorForward => Some(Self::MotorBackward),
            Self::MotorBackward => Some(Self::MotorForward),
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("channel {0} is not configured")]
    MissingChannel(ChannelId),
    #[error("channel {0} is configured twice")]
    DuplicateChannel(ChannelId),
    #[error("pin {0} is used by more than one channel")]
    DuplicatePin(u8),
    #[error("channel {channel} references unknown timer {timer}")]
    UnknownTimer { channel: ChannelId, timer: u8 },
    #[error("timer {0}: {1}")]
    InvalidTimer(u8, &'static str),
    #[error("channel {channel}: duty range {min}..={max} does not fit {bits} bit resolution")]
    InvalidDutyRange {
        channel: ChannelId,
        min: u32,
        max: u32,
        bits: u8,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimerConfig {
    pub id: u8,
    pub frequency_hz: f64,
    pub resolution_bits: u8,
}

impl TimerConfig {
    pub fn max_duty(&self) -> u32 {
        (1u32 << self.resolution_bits) - 1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub channel: ChannelId,
    pub pin: u8,
    pub timer: u8,
    pub min_duty: u32,
    pub max_duty: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleConfig {
    pub udp_port: u16,
    pub websocket_port: u16,
    pub inactivity_timeout_ms: u64,
    pub log_level: String,
    pub led_pin: Option<u8>,
    pub timers: Vec<TimerConfig>,
    pub channels: Vec<ChannelConfig>,
    pub mapping: MappingConfig,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        VehicleConfig {
            udp_port: 3333,
            websocket_port: 10013,
            inactivity_timeout_ms: 10_000,
            log_level: String::from("info"),
            led_pin: Some(2),
            timers: vec![
                TimerConfig {
                    id: 0,
                    frequency_hz: 50.0,
                    resolution_bits: 13,
                },
                TimerConfig {
                    id: 1,
                    frequency_hz: 1000.0,
                    resolution_bits: 13,
                },
            ],
            // 1 ms .. 2 ms pulses at 50 Hz with 13 bits
            channels: vec![
                ChannelConfig {
                    channel: ChannelId::Steering,
                    pin: 23,
                    timer: 0,
                    min_duty: 410,
                    max_duty: 819,
                },
                ChannelConfig {
                    channel: ChannelId::MotorForward,
                    pin: 24,
                    timer: 1,
                    min_duty: 0,
                    max_duty: 8191,
                },
                ChannelConfig {
                    channel: ChannelId::MotorBackward,
                    pin: 25,
                    timer: 1,
                    min_duty: 0,
                    max_duty: 8191,
                },
            ],
            mapping: MappingConfig::default(),
        }
    }
}

impl VehicleConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let loaded: VehicleConfig = serde_json::from_str(&content)?;
        loaded.channel_table()?;
        Ok(loaded)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = fs::File::create(path).map_err(io_err)?;
        file.write_all(json.as_bytes()).map_err(io_err)?;
        Ok(())
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.inactivity_timeout_ms)
    }

    /// Validates the hardware wiring and resolves it into a lookup table.
    pub fn channel_table(&self) -> Result<ChannelTable, ConfigError> {
        for timer in &self.timers {
            if !timer.frequency_hz.is_finite() || timer.frequency_hz <= 0.0 {
                return Err(ConfigError::InvalidTimer(timer.id, "frequency must be positive"));
            }
            if timer.resolution_bits == 0 || timer.resolution_bits > MAX_RESOLUTION_BITS {
                return Err(ConfigError::InvalidTimer(timer.id, "resolution out of range"));
            }
        }

        let mut slots: [Option<ChannelSpec>; 3] = [None, None, None];
        let mut pins = Vec::with_capacity(self.channels.len());
        for cfg in &self.channels {
            let slot = &mut slots[cfg.channel.index()];
            if slot.is_some() {
                return Err(ConfigError::DuplicateChannel(cfg.channel));
            }
            if pins.contains(&cfg.pin) {
                return Err(ConfigError::DuplicatePin(cfg.pin));
            }
            pins.push(cfg.pin);
            let timer = self
                .timers
                .iter()
                .find(|t| t.id == cfg.timer)
                .copied()
                .ok_or(ConfigError::UnknownTimer {
                    channel: cfg.channel,
                    timer: cfg.timer,
                })?;
            if cfg.min_duty > cfg.max_duty || cfg.max_duty > timer.max_duty() {
                return Err(ConfigError::InvalidDutyRange {
                    channel: cfg.channel,
                    min: cfg.min_duty,
                    max: cfg.max_duty,
                    bits: timer.resolution_bits,
                });
            }
            *slot = Some(ChannelSpec {
                id: cfg.channel,
                pin: cfg.pin,
                timer,
                min_duty: cfg.min_duty,
                max_duty: cfg.max_duty,
            });
        }

        let [steering, forward, backward] = slots;
        Ok(ChannelTable {
            specs: [
                steering.ok_or(ConfigError::MissingChannel(ChannelId::Steering))?,
                forward.ok_or(ConfigError::MissingChannel(ChannelId::MotorForward))?,
                backward.ok_or(ConfigError::MissingChannel(ChannelId::MotorBackward))?,
            ],
        })
    }
}

/// Resolved wiring of one PWM output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelSpec {
    pub id: ChannelId,
    pub pin: u8,
    pub timer: TimerConfig,
    pub min_duty: u32,
    pub max_duty: u32,
}

impl ChannelSpec {
    pub fn clamp(&self, duty: u32) -> u32 {
        duty.clamp(self.min_duty, self.max_duty)
    }

    pub fn contains(&self, duty: i64) -> bool {
        (self.min_duty as i64..=self.max_duty as i64).contains(&duty)
    }

    /// `min + (max - min) * num / den`, clamped to the range.
    pub fn scale(&self, num: u32, den: u32) -> u32 {
        let span = (self.max_duty - self.min_duty) as u64;
        let offset = span * num as u64 / den.max(1) as u64;
        self.clamp(self.min_duty.saturating_add(offset as u32))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelTable {
    specs: [ChannelSpec; 3],
}

impl ChannelTable {
    pub fn get(&self, id: ChannelId) -> &ChannelSpec {
        &self.specs[id.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelSpec> {
        self.specs.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("rcdrive-{}-{}.json", name, std::process::id()))
    }

    #[test]
    fn default_table_is_valid() {
        let table = VehicleConfig::default().channel_table().unwrap();
        let steering = table.get(ChannelId::Steering);
        assert_eq!(steering.pin, 23);
        assert_eq!(steering.timer.max_duty(), 8191);
        assert_eq!(steering.scale(0, 180), 410);
        assert_eq!(steering.scale(90, 180), 614);
        assert_eq!(steering.scale(180, 180), 819);
        assert_eq!(table.get(ChannelId::MotorBackward).scale(50, 100), 4095);
    }

    #[test]
    fn save_and_load() {
        let path = temp_path("roundtrip");
        let mut cfg = VehicleConfig::default();
        cfg.udp_port = 4444;
        cfg.mapping.deadzone = 7;
        cfg.save(&path).unwrap();
        let loaded = VehicleConfig::load(&path).unwrap();
        assert_eq!(loaded, cfg);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: VehicleConfig = serde_json::from_str(r#"{ "udp_port": 5000 }"#).unwrap();
        assert_eq!(cfg.udp_port, 5000);
        assert_eq!(cfg.websocket_port, 10013);
        assert_eq!(cfg.mapping, MappingConfig::default());
        assert!(cfg.channel_table().is_ok());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = VehicleConfig::load(&temp_path("does-not-exist")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn rejects_bad_tables() {
        let mut cfg = VehicleConfig::default();
        cfg.channels.pop();
        assert!(matches!(
            cfg.channel_table(),
            Err(ConfigError::MissingChannel(ChannelId::MotorBackward))
        ));

        let mut cfg = VehicleConfig::default();
        cfg.channels[2].channel = ChannelId::MotorForward;
        assert!(matches!(
            cfg.channel_table(),
            Err(ConfigError::DuplicateChannel(ChannelId::MotorForward))
        ));

        let mut cfg = VehicleConfig::default();
        cfg.channels[1].pin = 23;
        assert!(matches!(cfg.channel_table(), Err(ConfigError::DuplicatePin(23))));

        let mut cfg = VehicleConfig::default();
        cfg.channels[0].timer = 9;
        assert!(matches!(
            cfg.channel_table(),
            Err(ConfigError::UnknownTimer { timer: 9, .. })
        ));

        let mut cfg = VehicleConfig::default();
        cfg.channels[1].max_duty = 8192;
        assert!(matches!(
            cfg.channel_table(),
            Err(ConfigError::InvalidDutyRange { .. })
        ));

        let mut cfg = VehicleConfig::default();
        cfg.timers[0].resolution_bits = 0;
        assert!(matches!(cfg.channel_table(), Err(ConfigError::InvalidTimer(0, _))));
    }

    #[test]
    fn channel_names() {
        for id in ChannelId::ALL {
            assert_eq!(ChannelId::from_name(id.name()), Some(id));
        }
        assert_eq!(ChannelId::from_name("rudder"), None);
        assert_eq!(ChannelId::Steering.opposite_motor(), None);
        assert_eq!(
            ChannelId::MotorForward.opposite_motor(),
            Some(ChannelId::MotorBackward)
        );
    }
}
