use crate::error::GpioError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Logical electrical level of a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn inverse(self) -> Self {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Low => f.write_str("low"),
            Level::High => f.write_str("high"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Signal edge reported by an interrupt-capable input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
}

impl Edge {
    /// Edge produced by a transition into `level`
    pub fn into_level(level: Level) -> Self {
        match level {
            Level::High => Edge::Rising,
            Level::Low => Edge::Falling,
        }
    }
}

/// Everything needed to open one physical pin
#[derive(Debug, Clone, PartialEq)]
pub struct PinConfig {
    /// BCM pin number
    pub pin: u8,
    pub direction: Direction,
    /// Level the pin sits at when nothing is happening
    pub idle_level: Level,
    /// Minimum spacing between reported edges
    pub debounce: Option<Duration>,
}

impl PinConfig {
    pub fn input(pin: u8, idle_level: Level) -> Self {
        Self {
            pin,
            direction: Direction::Input,
            idle_level,
            debounce: None,
        }
    }

    pub fn output(pin: u8, idle_level: Level) -> Self {
        Self {
            pin,
            direction: Direction::Output,
            idle_level,
            debounce: None,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = Some(debounce);
        self
    }

    pub fn active_level(&self) -> Level {
        self.idle_level.inverse()
    }
}

/// Callback invoked from the backend's interrupt context
pub type EdgeListener = Box<dyn FnMut(Edge) + Send + 'static>;

/// A source of pins. Implemented for real hardware and for the in-memory mock.
pub trait GpioBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn open(&self, config: &PinConfig) -> Result<Box<dyn PinDriver>, GpioError>;
}

/// One opened pin as seen by the backend
pub trait PinDriver: Send {
    fn read(&self) -> Level;

    fn write(&mut self, level: Level);

    /// Deliver both edges to `listener`, filtered by `debounce`
    fn set_edge_listener(
        &mut self,
        debounce: Option<Duration>,
        listener: EdgeListener,
    ) -> Result<(), GpioError>;

    fn clear_edge_listener(&mut self);
}
