use super::types::{ComponentState, ShutdownReason};
use crate::config::FrontdoorConfig;
use crate::doorbell::DoorbellInput;
use crate::error::GpioError;
use crate::events::EventBus;
use crate::guard::PipelineState;
use crate::gpio::PinController;
use crate::keyboard_input::KeyboardInputHandler;
use crate::lock::LockActuator;
use crate::recognition::{Collaborators, RecognitionPipeline};
use crate::sensor::UltrasonicSensor;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Components that sit on GPIO pins
pub(super) const HARDWARE_COMPONENTS: [&str; 3] = ["sensor", "doorbell", "lock"];

/// Pins opened at initialisation. Each is `None` when its component could
/// not be brought up.
#[derive(Default)]
pub(super) struct DoorHardware {
    pub(super) controller: Option<PinController>,
    pub(super) sensor: Option<UltrasonicSensor>,
    pub(super) doorbell: Option<DoorbellInput>,
    pub(super) lock: Option<LockActuator>,
}

/// Owns the door hardware and wires the presence loop, doorbell and keyboard
/// into the shared recognition pipeline
pub struct DoorOrchestrator {
    pub(super) config: FrontdoorConfig,
    pub(super) event_bus: EventBus,
    pub(super) state: Arc<PipelineState>,
    pub(super) gpio: Option<Result<PinController, GpioError>>,
    pub(super) hardware: DoorHardware,
    pub(super) collaborators: Collaborators,
    pub(super) pipeline: Option<Arc<RecognitionPipeline>>,
    pub(super) keyboard_handler: Option<KeyboardInputHandler>,
    pub(super) keyboard_enabled: bool,
    pub(super) tasks: Vec<(&'static str, JoinHandle<()>)>,

    // Lifecycle management
    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) shutdown_sender: Option<oneshot::Sender<ShutdownReason>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
}

impl DoorOrchestrator {
    /// `gpio` is the outcome of looking for a pin controller. An error
    /// degrades the door to recognition-only operation.
    pub fn new(
        config: FrontdoorConfig,
        gpio: Result<PinController, GpioError>,
        collaborators: Collaborators,
        event_bus: EventBus,
    ) -> Self {
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        Self {
            config,
            event_bus,
            state: PipelineState::new(),
            gpio: Some(gpio),
            hardware: DoorHardware::default(),
            collaborators,
            pipeline: None,
            keyboard_handler: None,
            keyboard_enabled: false, // Disabled by default, enable via set_keyboard_enabled()
            tasks: Vec::new(),
            component_states: Arc::new(Mutex::new(HashMap::new())),
            shutdown_sender: Some(shutdown_sender),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Enable or disable the keyboard doorbell
    pub fn set_keyboard_enabled(&mut self, enabled: bool) {
        self.keyboard_enabled = enabled;
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn pipeline_state(&self) -> &Arc<PipelineState> {
        &self.state
    }

    /// Available after `initialize`
    pub fn pipeline(&self) -> Option<&Arc<RecognitionPipeline>> {
        self.pipeline.as_ref()
    }

    pub fn lock(&self) -> Option<&LockActuator> {
        self.hardware.lock.as_ref()
    }

    /// Cancelled when shutdown begins; background services tie their loops to it
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }
}
