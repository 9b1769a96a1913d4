use super::types::{Direction, Edge, EdgeListener, GpioBackend, Level, PinConfig, PinDriver};
use crate::error::GpioError;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// How a simulated ultrasonic sensor answers a trigger pulse
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EchoResponse {
    /// Echo never rises (sensor disconnected)
    Silent,
    /// Echo rises after `delay` and stays high for `width`
    Pulse { delay: Duration, width: Duration },
    /// Echo rises after `delay` and never returns to idle
    Stuck { delay: Duration },
}

impl EchoResponse {
    /// Pulse whose width encodes an obstacle at `distance_cm`
    pub fn for_distance(distance_cm: f64, speed_of_sound_cm_per_s: f64) -> Self {
        let width = Duration::from_secs_f64(distance_cm * 2.0 / speed_of_sound_cm_per_s);
        EchoResponse::Pulse {
            delay: Duration::from_micros(200),
            width,
        }
    }

    fn level_after(&self, elapsed: Duration) -> Level {
        match *self {
            EchoResponse::Silent => Level::Low,
            EchoResponse::Pulse { delay, width } => {
                if elapsed >= delay && elapsed < delay + width {
                    Level::High
                } else {
                    Level::Low
                }
            }
            EchoResponse::Stuck { delay } => {
                if elapsed >= delay {
                    Level::High
                } else {
                    Level::Low
                }
            }
        }
    }
}

struct MockPin {
    direction: Direction,
    level: Level,
    open: bool,
    writes: Vec<Level>,
    transitions: Vec<Level>,
    listener: Option<EdgeListener>,
    debounce: Option<Duration>,
    last_delivered: Option<Instant>,
}

struct EchoLink {
    trigger: u8,
    echo: u8,
    response: EchoResponse,
    fired_at: Option<Instant>,
}

#[derive(Default)]
struct MockState {
    pins: HashMap<u8, MockPin>,
    failing: HashSet<u8>,
    echoes: Vec<EchoLink>,
}

/// In-memory GPIO backend used by tests and simulation mode
#[derive(Clone, Default)]
pub struct MockGpio {
    state: Arc<Mutex<MockState>>,
}

impl MockGpio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future open of `pin` fail
    pub fn fail_pin(&self, pin: u8) {
        self.state.lock().failing.insert(pin);
    }

    /// Wire `echo` to answer pulses on `trigger` with `response`
    pub fn attach_echo(&self, trigger: u8, echo: u8, response: EchoResponse) {
        let mut state = self.state.lock();
        state.echoes.retain(|link| link.echo != echo);
        state.echoes.push(EchoLink {
            trigger,
            echo,
            response,
            fired_at: None,
        });
    }

    pub fn is_open(&self, pin: u8) -> bool {
        self.state.lock().pins.get(&pin).map(|p| p.open).unwrap_or(false)
    }

    pub fn level(&self, pin: u8) -> Option<Level> {
        self.state.lock().pins.get(&pin).map(|p| p.level)
    }

    /// Every level written to `pin` since it was opened
    pub fn writes(&self, pin: u8) -> Vec<Level> {
        self.state
            .lock()
            .pins
            .get(&pin)
            .map(|p| p.writes.clone())
            .unwrap_or_default()
    }

    /// Number of writes that actually moved `pin` to `level`
    pub fn transitions_to(&self, pin: u8, level: Level) -> usize {
        self.state
            .lock()
            .pins
            .get(&pin)
            .map(|p| p.transitions.iter().filter(|l| **l == level).count())
            .unwrap_or(0)
    }

    pub fn has_listener(&self, pin: u8) -> bool {
        self.state
            .lock()
            .pins
            .get(&pin)
            .map(|p| p.listener.is_some())
            .unwrap_or(false)
    }

    /// Drive an input externally. A change of level raises the matching edge.
    pub fn set_input_level(&self, pin: u8, level: Level) -> bool {
        let changed = {
            let state = self.state.lock();
            state.pins.get(&pin).map(|p| p.level != level).unwrap_or(false)
        };
        if changed {
            self.simulate_edge(pin, Edge::into_level(level))
        } else {
            false
        }
    }

    /// Raise an edge on an input, honouring its debounce window.
    /// Returns whether the edge reached the listener.
    pub fn simulate_edge(&self, pin: u8, edge: Edge) -> bool {
        let listener = {
            let mut state = self.state.lock();
            let Some(mock_pin) = state.pins.get_mut(&pin) else {
                return false;
            };

            mock_pin.level = match edge {
                Edge::Rising => Level::High,
                Edge::Falling => Level::Low,
            };

            let now = Instant::now();
            let within_debounce = match (mock_pin.debounce, mock_pin.last_delivered) {
                (Some(window), Some(last)) => now.duration_since(last) < window,
                _ => false,
            };
            if within_debounce || !mock_pin.open {
                trace!("Mock pin {} dropped {:?} edge", pin, edge);
                return false;
            }

            match mock_pin.listener.take() {
                Some(listener) => {
                    mock_pin.last_delivered = Some(now);
                    listener
                }
                None => return false,
            }
        };

        let mut listener = listener;
        listener(edge);

        let mut state = self.state.lock();
        if let Some(mock_pin) = state.pins.get_mut(&pin) {
            if mock_pin.open && mock_pin.listener.is_none() {
                mock_pin.listener = Some(listener);
            }
        }
        true
    }
}

impl GpioBackend for MockGpio {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn open(&self, config: &PinConfig) -> Result<Box<dyn PinDriver>, GpioError> {
        let mut state = self.state.lock();
        if state.failing.contains(&config.pin) {
            return Err(GpioError::PinOpenFailed {
                pin: config.pin,
                details: "simulated open failure".to_string(),
            });
        }

        state.pins.insert(
            config.pin,
            MockPin {
                direction: config.direction,
                level: config.idle_level,
                open: true,
                writes: Vec::new(),
                transitions: Vec::new(),
                listener: None,
                debounce: None,
                last_delivered: None,
            },
        );
        debug!("Mock pin {} opened as {:?}", config.pin, config.direction);

        Ok(Box::new(MockPinDriver {
            pin: config.pin,
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockPinDriver {
    pin: u8,
    state: Arc<Mutex<MockState>>,
}

impl PinDriver for MockPinDriver {
    fn read(&self) -> Level {
        let state = self.state.lock();
        if let Some(link) = state.echoes.iter().find(|link| link.echo == self.pin) {
            return match link.fired_at {
                Some(fired_at) => link.response.level_after(fired_at.elapsed()),
                None => Level::Low,
            };
        }
        state
            .pins
            .get(&self.pin)
            .map(|p| p.level)
            .unwrap_or(Level::Low)
    }

    fn write(&mut self, level: Level) {
        let mut state = self.state.lock();
        let previous = match state.pins.get_mut(&self.pin) {
            Some(mock_pin) if mock_pin.direction == Direction::Output => {
                let previous = mock_pin.level;
                mock_pin.level = level;
                mock_pin.writes.push(level);
                if previous != level {
                    mock_pin.transitions.push(level);
                }
                previous
            }
            _ => return,
        };

        // A falling trigger line starts the simulated echo
        if previous == Level::High && level == Level::Low {
            let pin = self.pin;
            for link in state.echoes.iter_mut().filter(|link| link.trigger == pin) {
                link.fired_at = Some(Instant::now());
            }
        }
    }

    fn set_edge_listener(
        &mut self,
        debounce: Option<Duration>,
        listener: EdgeListener,
    ) -> Result<(), GpioError> {
        let mut state = self.state.lock();
        match state.pins.get_mut(&self.pin) {
            Some(mock_pin) if mock_pin.direction == Direction::Input => {
                mock_pin.listener = Some(listener);
                mock_pin.debounce = debounce;
                mock_pin.last_delivered = None;
                Ok(())
            }
            _ => Err(GpioError::Interrupt {
                pin: self.pin,
                details: "not an input pin".to_string(),
            }),
        }
    }

    fn clear_edge_listener(&mut self) {
        if let Some(mock_pin) = self.state.lock().pins.get_mut(&self.pin) {
            mock_pin.listener = None;
        }
    }
}

impl Drop for MockPinDriver {
    fn drop(&mut self) {
        if let Some(mock_pin) = self.state.lock().pins.get_mut(&self.pin) {
            mock_pin.open = false;
            mock_pin.listener = None;
        }
    }
}
