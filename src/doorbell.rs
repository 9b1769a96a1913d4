use crate::error::GpioError;
use crate::gpio::{Edge, Level, PinConfig, PinController, PinHandle};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info, trace};

/// A single logical press of the doorbell button
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DoorbellPress {
    pub pin: u8,
    pub timestamp: DateTime<Utc>,
}

/// Active-low doorbell button on a debounced interrupt pin
pub struct DoorbellInput {
    pin: PinHandle,
}

impl DoorbellInput {
    pub fn open(controller: &PinController, pin: u8, debounce: Duration) -> Result<Self, GpioError> {
        let config = PinConfig::input(pin, Level::High);
        let config = if debounce.is_zero() {
            config
        } else {
            config.with_debounce(debounce)
        };
        let handle = controller.acquire(config)?;
        info!("Doorbell on pin {} (debounce {:?})", pin, debounce);
        Ok(Self::new(handle))
    }

    pub fn new(pin: PinHandle) -> Self {
        Self { pin }
    }

    pub fn pin(&self) -> u8 {
        self.pin.pin()
    }

    /// Whether an edge represents the button going down
    pub fn is_press(edge: Edge) -> bool {
        edge == Edge::Falling
    }

    /// Register the press listener. It runs on the interrupt thread and must
    /// return quickly.
    pub fn on_press<F>(&mut self, mut listener: F) -> Result<(), GpioError>
    where
        F: FnMut(DoorbellPress) + Send + 'static,
    {
        let pin = self.pin.pin();
        self.pin.on_edge(Box::new(move |edge| {
            if Self::is_press(edge) {
                debug!("Doorbell pressed on pin {}", pin);
                listener(DoorbellPress {
                    pin,
                    timestamp: Utc::now(),
                });
            } else {
                trace!("Doorbell released on pin {}", pin);
            }
        }))
    }
}
