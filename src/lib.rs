pub mod app;
pub mod config;
pub mod doorbell;
pub mod error;
pub mod events;
pub mod gpio;
pub mod guard;
pub mod keyboard_input;
pub mod lock;
pub mod recognition;
pub mod recovery;
pub mod sensor;

pub use app::{ComponentState, DoorOrchestrator, PresenceMonitor, ShutdownReason};
pub use config::FrontdoorConfig;
pub use doorbell::{DoorbellInput, DoorbellPress};
pub use error::{FrontdoorError, Result};
pub use events::{DoorEvent, EventBus, EventFilter, EventReceiver};
pub use gpio::{Level, MockGpio, PinConfig, PinController, PinHandle};
pub use guard::{CyclePermit, PipelineState, SuppressReason, TriggerSource};
pub use lock::{LockActuator, LockSession};
pub use recognition::{
    Collaborators, CommandCamera, CycleOutcome, HttpRecognizer, LoggingFeedback,
    RecognitionPipeline, ServiceWhitelist,
};
pub use recovery::{retry_with_backoff, RecoveryConfig, RecoveryManager};
pub use sensor::{DistanceSample, RangeFinder, UltrasonicSensor};
