use crate::gpio::Level;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FrontdoorConfig {
    pub gpio: GpioConfig,
    pub sensor: SensorConfig,
    pub presence: PresenceConfig,
    pub doorbell: DoorbellConfig,
    pub lock: LockConfig,
    pub recognition: RecognitionConfig,
    pub camera: CameraConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GpioConfig {
    /// Use the host GPIO controller. When false the door hardware is disabled.
    #[serde(default = "default_gpio_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SensorConfig {
    /// BCM pin driving the sensor trigger
    #[serde(default = "default_trigger_pin")]
    pub trigger_pin: u8,

    /// BCM pin reading the sensor echo
    #[serde(default = "default_echo_pin")]
    pub echo_pin: u8,

    /// Trigger pulse width in microseconds
    #[serde(default = "default_trigger_pulse_us")]
    pub trigger_pulse_us: u64,

    /// Longest wait for the echo to start, in milliseconds
    #[serde(default = "default_echo_timeout_ms")]
    pub echo_timeout_ms: u64,

    /// Longest plausible echo pulse, in microseconds
    #[serde(default = "default_max_echo_duration_us")]
    pub max_echo_duration_us: u64,

    #[serde(default = "default_speed_of_sound")]
    pub speed_of_sound_cm_per_s: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PresenceConfig {
    /// Poll the distance sensor
    #[serde(default = "default_presence_enabled")]
    pub enabled: bool,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// A visitor closer than this is "near"
    #[serde(default = "default_proximity_threshold_cm")]
    pub proximity_threshold_cm: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DoorbellConfig {
    #[serde(default = "default_doorbell_pin")]
    pub pin: u8,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Pause between the press and the photo so the visitor can face the camera
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LockConfig {
    #[serde(default = "default_lock_pin")]
    pub pin: u8,

    /// Pin level that keeps the door locked
    #[serde(default = "default_locked_level")]
    pub locked_level: Level,

    #[serde(default = "default_unlock_duration_secs")]
    pub unlock_duration_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RecognitionConfig {
    /// Base URL of the face recognition service
    #[serde(default = "default_service_url")]
    pub service_url: String,

    #[serde(default = "default_recognition_timeout_secs")]
    pub timeout_secs: u64,

    /// How often the enrolled visitor list is refreshed
    #[serde(default = "default_whitelist_refresh_secs")]
    pub whitelist_refresh_secs: u64,

    /// Optional key sent as a bearer token
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Still capture program writing a JPEG to stdout
    #[serde(default = "default_camera_command")]
    pub command: String,

    #[serde(default = "default_camera_args")]
    pub args: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

impl FrontdoorConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("frontdoor.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("gpio.enabled", default_gpio_enabled())?
            .set_default("sensor.trigger_pin", default_trigger_pin() as i64)?
            .set_default("sensor.echo_pin", default_echo_pin() as i64)?
            .set_default("sensor.trigger_pulse_us", default_trigger_pulse_us())?
            .set_default("sensor.echo_timeout_ms", default_echo_timeout_ms())?
            .set_default("sensor.max_echo_duration_us", default_max_echo_duration_us())?
            .set_default("sensor.speed_of_sound_cm_per_s", default_speed_of_sound())?
            .set_default("presence.enabled", default_presence_enabled())?
            .set_default("presence.poll_interval_ms", default_poll_interval_ms())?
            .set_default(
                "presence.proximity_threshold_cm",
                default_proximity_threshold_cm(),
            )?
            .set_default("doorbell.pin", default_doorbell_pin() as i64)?
            .set_default("doorbell.debounce_ms", default_debounce_ms())?
            .set_default("doorbell.settle_delay_ms", default_settle_delay_ms())?
            .set_default("lock.pin", default_lock_pin() as i64)?
            .set_default("lock.locked_level", default_locked_level().to_string())?
            .set_default("lock.unlock_duration_secs", default_unlock_duration_secs())?
            .set_default("recognition.service_url", default_service_url())?
            .set_default("recognition.timeout_secs", default_recognition_timeout_secs())?
            .set_default(
                "recognition.whitelist_refresh_secs",
                default_whitelist_refresh_secs(),
            )?
            .set_default("camera.command", default_camera_command())?
            .set_default("camera.args", default_camera_args())?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // FRONTDOOR_LOCK__UNLOCK_DURATION_SECS=10 overrides lock.unlock_duration_secs
            .add_source(
                Environment::with_prefix("FRONTDOOR")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: FrontdoorConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pins = [
            ("sensor.trigger_pin", self.sensor.trigger_pin),
            ("sensor.echo_pin", self.sensor.echo_pin),
            ("doorbell.pin", self.doorbell.pin),
            ("lock.pin", self.lock.pin),
        ];
        let mut seen = HashSet::new();
        for (name, pin) in pins {
            if pin > 27 {
                return Err(ConfigError::Message(format!(
                    "{} must be a BCM pin between 0 and 27, got {}",
                    name, pin
                )));
            }
            if !seen.insert(pin) {
                return Err(ConfigError::Message(format!(
                    "{} reuses GPIO pin {}",
                    name, pin
                )));
            }
        }

        if self.sensor.trigger_pulse_us == 0 {
            return Err(ConfigError::Message(
                "Sensor trigger_pulse_us must be greater than 0".to_string(),
            ));
        }

        if self.sensor.echo_timeout_ms == 0 || self.sensor.max_echo_duration_us == 0 {
            return Err(ConfigError::Message(
                "Sensor echo timeouts must be greater than 0".to_string(),
            ));
        }

        if self.sensor.speed_of_sound_cm_per_s <= 0.0 {
            return Err(ConfigError::Message(
                "Speed of sound must be positive".to_string(),
            ));
        }

        if self.presence.poll_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Presence poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.presence.proximity_threshold_cm <= 0.0 {
            return Err(ConfigError::Message(
                "Presence proximity_threshold_cm must be positive".to_string(),
            ));
        }

        if self.lock.unlock_duration_secs == 0 {
            return Err(ConfigError::Message(
                "Lock unlock_duration_secs must be greater than 0".to_string(),
            ));
        }

        if self.recognition.service_url.trim().is_empty() {
            return Err(ConfigError::Message(
                "Recognition service_url must not be empty".to_string(),
            ));
        }

        if self.recognition.timeout_secs == 0 {
            return Err(ConfigError::Message(
                "Recognition timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.camera.command.trim().is_empty() {
            return Err(ConfigError::Message(
                "Camera command must not be empty".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl SensorConfig {
    pub fn trigger_pulse(&self) -> Duration {
        Duration::from_micros(self.trigger_pulse_us)
    }

    pub fn echo_timeout(&self) -> Duration {
        Duration::from_millis(self.echo_timeout_ms)
    }

    pub fn max_echo_duration(&self) -> Duration {
        Duration::from_micros(self.max_echo_duration_us)
    }
}

impl PresenceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl DoorbellConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl LockConfig {
    pub fn unlock_duration(&self) -> Duration {
        Duration::from_secs(self.unlock_duration_secs)
    }
}

impl RecognitionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn whitelist_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.whitelist_refresh_secs)
    }
}

impl Default for FrontdoorConfig {
    fn default() -> Self {
        Self {
            gpio: GpioConfig {
                enabled: default_gpio_enabled(),
            },
            sensor: SensorConfig {
                trigger_pin: default_trigger_pin(),
                echo_pin: default_echo_pin(),
                trigger_pulse_us: default_trigger_pulse_us(),
                echo_timeout_ms: default_echo_timeout_ms(),
                max_echo_duration_us: default_max_echo_duration_us(),
                speed_of_sound_cm_per_s: default_speed_of_sound(),
            },
            presence: PresenceConfig {
                enabled: default_presence_enabled(),
                poll_interval_ms: default_poll_interval_ms(),
                proximity_threshold_cm: default_proximity_threshold_cm(),
            },
            doorbell: DoorbellConfig {
                pin: default_doorbell_pin(),
                debounce_ms: default_debounce_ms(),
                settle_delay_ms: default_settle_delay_ms(),
            },
            lock: LockConfig {
                pin: default_lock_pin(),
                locked_level: default_locked_level(),
                unlock_duration_secs: default_unlock_duration_secs(),
            },
            recognition: RecognitionConfig {
                service_url: default_service_url(),
                timeout_secs: default_recognition_timeout_secs(),
                whitelist_refresh_secs: default_whitelist_refresh_secs(),
                api_key: None,
            },
            camera: CameraConfig {
                command: default_camera_command(),
                args: default_camera_args(),
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
            },
        }
    }
}

// Default value functions
fn default_gpio_enabled() -> bool {
    true
}

fn default_trigger_pin() -> u8 {
    23
}
fn default_echo_pin() -> u8 {
    24
}
fn default_trigger_pulse_us() -> u64 {
    10
}
fn default_echo_timeout_ms() -> u64 {
    30
}
fn default_max_echo_duration_us() -> u64 {
    38_000
} // HC-SR04 holds echo high for ~38ms when nothing is in range
fn default_speed_of_sound() -> f64 {
    34_000.0
}

fn default_presence_enabled() -> bool {
    true
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_proximity_threshold_cm() -> f64 {
    50.0
}

fn default_doorbell_pin() -> u8 {
    5
}
fn default_debounce_ms() -> u64 {
    25
}
fn default_settle_delay_ms() -> u64 {
    2000
}

fn default_lock_pin() -> u8 {
    4
}
fn default_locked_level() -> Level {
    Level::High
}
fn default_unlock_duration_secs() -> u64 {
    5
}

fn default_service_url() -> String {
    "http://127.0.0.1:5000".to_string()
}
fn default_recognition_timeout_secs() -> u64 {
    10
}
fn default_whitelist_refresh_secs() -> u64 {
    300
}

fn default_camera_command() -> String {
    "libcamera-still".to_string()
}
fn default_camera_args() -> Vec<String> {
    ["-n", "-t", "1", "-e", "jpg", "-o", "-"]
        .iter()
        .map(|arg| arg.to_string())
        .collect()
}

fn default_event_bus_capacity() -> usize {
    100
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = FrontdoorConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.presence.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.lock.locked_level, Level::High);
        assert_eq!(config.doorbell.settle_delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_config_validation() {
        let mut config = FrontdoorConfig::default();
        config.doorbell.pin = config.lock.pin;

        // Should fail validation due to the shared pin
        assert!(config.validate().is_err());

        config.doorbell.pin = 6;
        assert!(config.validate().is_ok());

        config.presence.proximity_threshold_cm = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_pin() {
        let mut config = FrontdoorConfig::default();
        config.sensor.echo_pin = 40;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[lock]
pin = 17
locked_level = "low"
unlock_duration_secs = 8

[camera]
command = "fswebcam"
args = ["-", "--no-banner"]
"#
        )
        .unwrap();

        let config = FrontdoorConfig::load_from_file(file.path()).unwrap();

        assert_eq!(config.lock.pin, 17);
        assert_eq!(config.lock.locked_level, Level::Low);
        assert_eq!(config.lock.unlock_duration(), Duration::from_secs(8));
        assert_eq!(config.camera.command, "fswebcam");
        assert_eq!(config.camera.args, vec!["-", "--no-banner"]);
        // Untouched sections keep their defaults
        assert_eq!(config.sensor.trigger_pin, 23);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_environment_variable_override() {
        env::set_var("FRONTDOOR_DOORBELL__SETTLE_DELAY_MS", "750");

        let config = FrontdoorConfig::load_from_file("does-not-exist.toml").unwrap();
        assert_eq!(config.doorbell.settle_delay_ms, 750);

        env::remove_var("FRONTDOOR_DOORBELL__SETTLE_DELAY_MS");
    }

    #[test]
    fn test_default_config_serializes() {
        let rendered = toml::to_string_pretty(&FrontdoorConfig::default()).unwrap();
        assert!(rendered.contains("[presence]"));
        assert!(rendered.contains("locked_level = \"high\""));
    }
}
