use super::orchestrator::HARDWARE_COMPONENTS;
use super::{ComponentState, DoorOrchestrator};
use std::collections::HashMap;
use tracing::{debug, info, warn};

impl DoorOrchestrator {
    /// Update component state
    pub async fn set_component_state(&self, component: &str, state: ComponentState) {
        let mut states = self.component_states.lock().await;
        states.insert(component.to_string(), state.clone());
        debug!("Component '{}' state changed to: {:?}", component, state);
    }

    /// Set every pin-backed component at once
    pub(super) async fn set_hardware_state(&self, state: ComponentState) {
        let mut states = self.component_states.lock().await;
        for component in HARDWARE_COMPONENTS {
            states.insert(component.to_string(), state.clone());
        }
        debug!("Door hardware state changed to: {:?}", state);
    }

    /// Get component state
    pub async fn get_component_state(&self, component: &str) -> Option<ComponentState> {
        let states = self.component_states.lock().await;
        states.get(component).cloned()
    }

    /// Get all component states
    pub async fn get_all_component_states(&self) -> HashMap<String, ComponentState> {
        let states = self.component_states.lock().await;
        states.clone()
    }

    /// True when at least one pin-backed component is running
    pub async fn hardware_available(&self) -> bool {
        let states = self.component_states.lock().await;
        HARDWARE_COMPONENTS
            .iter()
            .any(|c| states.get(*c) == Some(&ComponentState::Running))
    }

    pub(super) async fn log_component_summary(&self) {
        let mut states: Vec<_> = self.get_all_component_states().await.into_iter().collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));

        for (component, state) in states {
            match state {
                ComponentState::Running => info!("  {}: running", component),
                ComponentState::Failed | ComponentState::Unavailable => {
                    warn!("  {}: {:?}", component, state)
                }
                other => debug!("  {}: {:?}", component, other),
            }
        }
    }
}
