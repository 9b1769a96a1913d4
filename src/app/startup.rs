use super::orchestrator::HARDWARE_COMPONENTS;
use super::presence::PresenceMonitor;
use super::{ComponentState, DoorOrchestrator};
use crate::doorbell::DoorbellInput;
use crate::error::{FrontdoorError, GpioError, Result};
use crate::events::DoorEvent;
use crate::guard::{CyclePermit, TriggerSource};
use crate::keyboard_input::KeyboardInputHandler;
use crate::lock::LockActuator;
use crate::recognition::{CycleSettings, RecognitionPipeline};
use crate::sensor::{UltrasonicSensor, UltrasonicTiming};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

impl DoorOrchestrator {
    /// Open the door hardware and build the recognition pipeline.
    ///
    /// Missing hardware never fails initialisation: a host without a GPIO
    /// controller runs recognition only, and a pin that will not open takes
    /// down just the component that owns it.
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing door components");

        let mut states = self.component_states.lock().await;
        states.insert("gpio".to_string(), ComponentState::Stopped);
        for component in HARDWARE_COMPONENTS {
            states.insert(component.to_string(), ComponentState::Stopped);
        }
        states.insert("presence".to_string(), ComponentState::Stopped);
        states.insert("recognition".to_string(), ComponentState::Stopped);

        // Only register keyboard component if enabled
        if self.keyboard_enabled {
            states.insert("keyboard".to_string(), ComponentState::Stopped);
        }
        drop(states);

        self.open_hardware().await?;

        let pipeline = Arc::new(RecognitionPipeline::new(
            Arc::clone(&self.state),
            self.collaborators.clone(),
            self.hardware.lock.clone(),
            CycleSettings::from(&self.config),
            self.event_bus.clone(),
        ));

        if self.keyboard_enabled {
            self.keyboard_handler = Some(KeyboardInputHandler::new(
                Arc::clone(&pipeline),
                self.event_bus.clone(),
            ));
        }
        self.pipeline = Some(pipeline);

        info!("Door components initialized");
        Ok(())
    }

    async fn open_hardware(&mut self) -> Result<()> {
        let gpio = self
            .gpio
            .take()
            .ok_or_else(|| FrontdoorError::system("Door hardware already initialized"))?;

        let controller = match gpio {
            Ok(controller) => controller,
            Err(e) => {
                // A missing controller is expected on a dev machine; anything
                // else is a broken setup
                let state = if e.is_hardware_absent() {
                    warn!("Door hardware disabled: {}", e);
                    ComponentState::Unavailable
                } else {
                    error!("Door hardware failed: {}", e);
                    ComponentState::Failed
                };
                self.set_hardware_state(state.clone()).await;
                self.set_component_state("gpio", state).await;
                self.publish_hardware_status("gpio", false);
                return Ok(());
            }
        };
        self.set_component_state("gpio", ComponentState::Running)
            .await;
        self.publish_hardware_status("gpio", true);

        let sensor_config = &self.config.sensor;
        match UltrasonicSensor::open(
            &controller,
            sensor_config.trigger_pin,
            sensor_config.echo_pin,
            UltrasonicTiming::from(sensor_config),
        ) {
            Ok(sensor) => {
                self.hardware.sensor = Some(sensor);
                self.set_component_state("sensor", ComponentState::Running)
                    .await;
            }
            Err(e) => self.hardware_failed("sensor", e).await,
        }

        match DoorbellInput::open(
            &controller,
            self.config.doorbell.pin,
            self.config.doorbell.debounce(),
        ) {
            Ok(doorbell) => {
                self.hardware.doorbell = Some(doorbell);
                self.set_component_state("doorbell", ComponentState::Starting)
                    .await;
            }
            Err(e) => self.hardware_failed("doorbell", e).await,
        }

        match LockActuator::open(&controller, self.config.lock.pin, self.config.lock.locked_level) {
            Ok(lock) => {
                self.hardware.lock = Some(lock);
                self.set_component_state("lock", ComponentState::Running)
                    .await;
            }
            Err(e) => self.hardware_failed("lock", e).await,
        }

        self.hardware.controller = Some(controller);
        Ok(())
    }

    async fn hardware_failed(&self, component: &str, error: GpioError) {
        error!("Failed to open {}: {}", component, error);
        self.set_component_state(component, ComponentState::Failed)
            .await;
        if let Err(e) = self.event_bus.publish(DoorEvent::SystemError {
            component: component.to_string(),
            error: error.to_string(),
        }) {
            debug!("Error event not delivered: {}", e);
        }
    }

    pub(super) fn publish_hardware_status(&self, component: &str, available: bool) {
        if let Err(e) = self.event_bus.publish(DoorEvent::HardwareStatusChanged {
            component: component.to_string(),
            available,
            timestamp: Utc::now(),
        }) {
            debug!("Hardware status event not delivered: {}", e);
        }
    }

    /// Start the presence loop, doorbell worker and keyboard handler
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting door system");

        let pipeline = self
            .pipeline
            .clone()
            .ok_or_else(|| FrontdoorError::system("Door system started before initialize"))?;

        self.set_component_state("recognition", ComponentState::Running)
            .await;

        // Presence polling
        match self.hardware.sensor.take() {
            Some(sensor) if self.config.presence.enabled => {
                self.set_component_state("presence", ComponentState::Starting)
                    .await;
                let monitor = PresenceMonitor::new(
                    Box::new(sensor),
                    Arc::clone(&pipeline),
                    self.event_bus.clone(),
                    self.config.presence.poll_interval(),
                    self.config.presence.proximity_threshold_cm,
                );
                let cancel = self.cancellation_token.clone();
                self.tasks
                    .push(("presence", tokio::spawn(monitor.run(cancel))));
                self.set_component_state("presence", ComponentState::Running)
                    .await;
                info!("Presence polling started");
            }
            Some(sensor) => {
                info!("Presence polling disabled in configuration");
                self.hardware.sensor = Some(sensor);
            }
            None => {
                let sensor_state = self.get_component_state("sensor").await;
                let presence_state = match sensor_state {
                    Some(ComponentState::Unavailable) => ComponentState::Unavailable,
                    _ => ComponentState::Failed,
                };
                self.set_component_state("presence", presence_state).await;
            }
        }

        // Physical doorbell
        let event_bus = self.event_bus.clone();
        let listener_pipeline = Arc::clone(&pipeline);
        let registration = self.hardware.doorbell.as_mut().map(|doorbell| {
            let (permit_tx, permit_rx) = mpsc::unbounded_channel();
            let registered = doorbell.on_press(move |press| {
                if let Err(e) = event_bus.publish(DoorEvent::DoorbellPressed {
                    source: TriggerSource::Doorbell,
                    timestamp: press.timestamp,
                }) {
                    debug!("Doorbell event not delivered: {}", e);
                }
                if let Ok(permit) = listener_pipeline.try_begin(TriggerSource::Doorbell) {
                    if permit_tx.send(permit).is_err() {
                        debug!("Doorbell worker gone, press dropped");
                    }
                }
            });
            (doorbell.pin(), registered, permit_rx)
        });

        if let Some((pin, registered, permit_rx)) = registration {
            match registered {
                Ok(()) => {
                    let worker = doorbell_worker(
                        Arc::clone(&pipeline),
                        permit_rx,
                        self.config.doorbell.settle_delay(),
                        self.cancellation_token.clone(),
                    );
                    self.tasks.push(("doorbell", tokio::spawn(worker)));
                    self.set_component_state("doorbell", ComponentState::Running)
                        .await;
                    info!("Doorbell listening on pin {}", pin);
                }
                Err(e) => self.hardware_failed("doorbell", e).await,
            }
        }

        // Start keyboard doorbell for bench testing (only if enabled)
        if self.keyboard_enabled {
            if let Some(keyboard_handler) = &self.keyboard_handler {
                self.set_component_state("keyboard", ComponentState::Starting)
                    .await;

                keyboard_handler.start().await.map_err(|e| {
                    error!("Failed to start keyboard handler: {}", e);
                    e
                })?;

                self.set_component_state("keyboard", ComponentState::Running)
                    .await;
                info!("Keyboard input handler started - press SPACE to ring the doorbell");
            }
        }

        self.log_component_summary().await;
        info!("Door system started");
        Ok(())
    }
}

/// Runs guarded doorbell cycles handed over from the interrupt listener.
/// The guard is already held during the settle delay.
async fn doorbell_worker(
    pipeline: Arc<RecognitionPipeline>,
    mut permits: mpsc::UnboundedReceiver<CyclePermit>,
    settle_delay: Duration,
    cancel: CancellationToken,
) {
    loop {
        let permit = tokio::select! {
            _ = cancel.cancelled() => break,
            permit = permits.recv() => match permit {
                Some(permit) => permit,
                None => break,
            },
        };

        debug!("Doorbell cycle starts in {:?}", settle_delay);
        tokio::time::sleep(settle_delay).await;
        pipeline.run_guarded(permit).await;
    }
    debug!("Doorbell worker stopped");
}
