mod controller;
mod mock;
#[cfg(all(feature = "gpio", target_os = "linux"))]
mod rppal_backend;
mod types;

pub use controller::{PinController, PinHandle};
pub use mock::{EchoResponse, MockGpio};
#[cfg(all(feature = "gpio", target_os = "linux"))]
pub use rppal_backend::RppalBackend;
pub use types::{Direction, Edge, EdgeListener, GpioBackend, Level, PinConfig, PinDriver};
