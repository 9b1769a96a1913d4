use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrontdoorError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("GPIO error: {0}")]
    Gpio(#[from] GpioError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

/// Pin controller failures. `ControllerUnavailable` means the host has no
/// GPIO at all; everything else is scoped to a single pin.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GpioError {
    #[error("GPIO controller not available: {details}")]
    ControllerUnavailable { details: String },

    #[error("Failed to open GPIO pin {pin}: {details}")]
    PinOpenFailed { pin: u8, details: String },

    #[error("GPIO pin {pin} is already in use")]
    PinBusy { pin: u8 },

    #[error("Failed to configure interrupt on GPIO pin {pin}: {details}")]
    Interrupt { pin: u8, details: String },
}

impl GpioError {
    /// Whether the failure means the hardware is simply not there, as opposed
    /// to being misconfigured.
    pub fn is_hardware_absent(&self) -> bool {
        matches!(self, GpioError::ControllerUnavailable { .. })
    }
}

/// Per-sample sensor failures. They mark a sample invalid and go no further.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SensorError {
    #[error("Echo pulse not observed within {waited:?}")]
    EchoTimeout { waited: Duration },

    #[error("Echo pulse exceeded plausible range after {elapsed:?}")]
    OutOfRange { elapsed: Duration },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecognitionError {
    #[error("No face detected in image")]
    NoFaceDetected,

    #[error("Visitor is not on the whitelist")]
    NotWhitelisted,

    #[error("Recognition service error: {0}")]
    Service(String),

    #[error("Recognition failed: {0}")]
    Other(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error("Camera not available")]
    Unavailable,

    #[error("Image capture failed: {0}")]
    Failed(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Receiver lagged behind by {skipped} events")]
    Lagged { skipped: u64 },

    #[error("Event bus channel closed")]
    ChannelClosed,
}

impl FrontdoorError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FrontdoorError>;
