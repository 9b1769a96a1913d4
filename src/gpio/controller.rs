use super::types::{Direction, EdgeListener, GpioBackend, Level, PinConfig, PinDriver};
use crate::error::GpioError;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Owns access to the host's GPIO controller and hands out exclusive pin handles
#[derive(Clone)]
pub struct PinController {
    backend: Arc<dyn GpioBackend>,
    open_pins: Arc<Mutex<HashSet<u8>>>,
}

impl PinController {
    /// Wrap an explicit backend
    pub fn new(backend: Arc<dyn GpioBackend>) -> Self {
        info!("Using GPIO backend: {}", backend.name());
        Self {
            backend,
            open_pins: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Locate the GPIO controller of the host this process runs on
    #[cfg(all(feature = "gpio", target_os = "linux"))]
    pub fn detect() -> Result<Self, GpioError> {
        let backend = super::RppalBackend::new()?;
        Ok(Self::new(Arc::new(backend)))
    }

    /// Fallback when GPIO support is not compiled in
    #[cfg(not(all(feature = "gpio", target_os = "linux")))]
    pub fn detect() -> Result<Self, GpioError> {
        warn!("GPIO support not compiled for this target");
        Err(GpioError::ControllerUnavailable {
            details: "GPIO support not compiled for this target".to_string(),
        })
    }

    /// Open and configure a pin. Output pins start at their idle level.
    pub fn acquire(&self, config: PinConfig) -> Result<PinHandle, GpioError> {
        {
            let mut open_pins = self.open_pins.lock();
            if !open_pins.insert(config.pin) {
                return Err(GpioError::PinBusy { pin: config.pin });
            }
        }

        let driver = match self.backend.open(&config) {
            Ok(driver) => driver,
            Err(e) => {
                self.open_pins.lock().remove(&config.pin);
                warn!("Failed to acquire GPIO pin {}: {}", config.pin, e);
                return Err(e);
            }
        };

        let mut handle = PinHandle {
            config,
            driver,
            registry: Arc::clone(&self.open_pins),
            listening: false,
        };

        if handle.config.direction == Direction::Output {
            let idle = handle.config.idle_level;
            handle.driver.write(idle);
        }

        debug!(
            "Acquired GPIO pin {} as {:?} (idle {})",
            handle.config.pin, handle.config.direction, handle.config.idle_level
        );

        Ok(handle)
    }

    /// Number of handles currently outstanding
    pub fn open_pin_count(&self) -> usize {
        self.open_pins.lock().len()
    }

    pub fn is_pin_open(&self, pin: u8) -> bool {
        self.open_pins.lock().contains(&pin)
    }
}

/// Exclusive ownership of one pin. Dropping the handle releases the pin.
pub struct PinHandle {
    config: PinConfig,
    driver: Box<dyn PinDriver>,
    registry: Arc<Mutex<HashSet<u8>>>,
    listening: bool,
}

impl PinHandle {
    pub fn pin(&self) -> u8 {
        self.config.pin
    }

    pub fn config(&self) -> &PinConfig {
        &self.config
    }

    pub fn read(&self) -> Level {
        self.driver.read()
    }

    pub fn write(&mut self, level: Level) {
        self.driver.write(level);
    }

    pub fn is_active(&self) -> bool {
        self.read() == self.config.active_level()
    }

    /// Register an edge callback using the pin's configured debounce.
    /// Replaces any listener registered earlier.
    pub fn on_edge(&mut self, listener: EdgeListener) -> Result<(), GpioError> {
        if self.config.direction != Direction::Input {
            return Err(GpioError::Interrupt {
                pin: self.config.pin,
                details: "edge detection requires an input pin".to_string(),
            });
        }

        self.driver
            .set_edge_listener(self.config.debounce, listener)?;
        self.listening = true;
        Ok(())
    }
}

impl Drop for PinHandle {
    fn drop(&mut self) {
        if self.listening {
            self.driver.clear_edge_listener();
        }
        self.registry.lock().remove(&self.config.pin);
        debug!("Released GPIO pin {}", self.config.pin);
    }
}

impl std::fmt::Debug for PinHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinHandle")
            .field("config", &self.config)
            .field("listening", &self.listening)
            .finish()
    }
}
