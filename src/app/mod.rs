mod orchestrator;
mod presence;
mod runtime;
mod shutdown;
mod startup;
mod state;
mod types;


pub use orchestrator::DoorOrchestrator;
pub use presence::PresenceMonitor;
pub use types::{ComponentState, ShutdownReason};
