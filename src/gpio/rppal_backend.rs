use super::types::{Direction, Edge, EdgeListener, GpioBackend, Level, PinConfig, PinDriver};
use crate::error::GpioError;
use rppal::gpio::{Event, Gpio, InputPin, OutputPin, Trigger};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Raspberry Pi GPIO through rppal
pub struct RppalBackend {
    gpio: Gpio,
}

impl RppalBackend {
    pub fn new() -> Result<Self, GpioError> {
        let gpio = Gpio::new().map_err(|e| GpioError::ControllerUnavailable {
            details: e.to_string(),
        })?;
        info!("GPIO controller detected");
        Ok(Self { gpio })
    }
}

impl GpioBackend for RppalBackend {
    fn name(&self) -> &'static str {
        "rppal"
    }

    fn open(&self, config: &PinConfig) -> Result<Box<dyn PinDriver>, GpioError> {
        let pin = self
            .gpio
            .get(config.pin)
            .map_err(|e| GpioError::PinOpenFailed {
                pin: config.pin,
                details: e.to_string(),
            })?;

        let driver = match (config.direction, config.idle_level) {
            // Active-low inputs such as buttons rely on the internal pull-up
            (Direction::Input, Level::High) => RppalPin::Input(pin.into_input_pullup()),
            (Direction::Input, Level::Low) => RppalPin::Input(pin.into_input()),
            (Direction::Output, Level::High) => RppalPin::Output(pin.into_output_high()),
            (Direction::Output, Level::Low) => RppalPin::Output(pin.into_output_low()),
        };

        debug!("Opened rppal pin {}", config.pin);
        Ok(Box::new(driver))
    }
}

enum RppalPin {
    Input(InputPin),
    Output(OutputPin),
}

fn from_rppal(level: rppal::gpio::Level) -> Level {
    match level {
        rppal::gpio::Level::Low => Level::Low,
        rppal::gpio::Level::High => Level::High,
    }
}

fn to_rppal(level: Level) -> rppal::gpio::Level {
    match level {
        Level::Low => rppal::gpio::Level::Low,
        Level::High => rppal::gpio::Level::High,
    }
}

impl PinDriver for RppalPin {
    fn read(&self) -> Level {
        match self {
            RppalPin::Input(pin) => from_rppal(pin.read()),
            RppalPin::Output(pin) => {
                if pin.is_set_high() {
                    Level::High
                } else {
                    Level::Low
                }
            }
        }
    }

    fn write(&mut self, level: Level) {
        match self {
            RppalPin::Output(pin) => pin.write(to_rppal(level)),
            RppalPin::Input(pin) => {
                warn!("Ignoring write of {} to input pin {}", level, pin.pin());
            }
        }
    }

    fn set_edge_listener(
        &mut self,
        debounce: Option<Duration>,
        mut listener: EdgeListener,
    ) -> Result<(), GpioError> {
        let RppalPin::Input(pin) = self else {
            return Err(GpioError::Interrupt {
                pin: 0,
                details: "edge detection requires an input pin".to_string(),
            });
        };

        let pin_number = pin.pin();
        pin.set_async_interrupt(Trigger::Both, debounce, move |event: Event| {
            match event.trigger {
                Trigger::RisingEdge => listener(Edge::Rising),
                Trigger::FallingEdge => listener(Edge::Falling),
                _ => {}
            }
        })
        .map_err(|e| GpioError::Interrupt {
            pin: pin_number,
            details: e.to_string(),
        })
    }

    fn clear_edge_listener(&mut self) {
        if let RppalPin::Input(pin) = self {
            if let Err(e) = pin.clear_async_interrupt() {
                warn!("Failed to clear interrupt on pin {}: {}", pin.pin(), e);
            }
        }
    }
}
