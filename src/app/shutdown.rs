use super::{ComponentState, DoorOrchestrator};
use crate::error::Result;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info};

/// Slack on top of the longest possible cycle when waiting for a loop to stop
const STOP_GRACE: Duration = Duration::from_secs(5);

impl DoorOrchestrator {
    /// Stop triggering new cycles, let an in-flight cycle finish, then
    /// relock the door and release the pins.
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");

        // No trigger source may start a cycle from here on
        self.state.close();

        // Cancel all background loops
        self.cancellation_token.cancel();

        let mut exit_code = 0;

        if self.keyboard_enabled {
            if let Some(keyboard_handler) = &self.keyboard_handler {
                self.set_component_state("keyboard", ComponentState::Stopping)
                    .await;
                match keyboard_handler.stop().await {
                    Ok(()) => {
                        self.set_component_state("keyboard", ComponentState::Stopped)
                            .await
                    }
                    Err(e) => {
                        error!("Error stopping keyboard: {}", e);
                        self.set_component_state("keyboard", ComponentState::Failed)
                            .await;
                        exit_code = 1;
                    }
                }
            }
        }

        let stop_timeout = self.config.doorbell.settle_delay()
            + self.config.recognition.timeout()
            + STOP_GRACE;

        let tasks: Vec<_> = self.tasks.drain(..).collect();
        for (component, task) in tasks {
            info!("Stopping {} component", component);
            self.set_component_state(component, ComponentState::Stopping)
                .await;

            match timeout(stop_timeout, task).await {
                Ok(Ok(())) => {
                    self.set_component_state(component, ComponentState::Stopped)
                        .await;
                    info!("{} component stopped", component);
                }
                Ok(Err(e)) => {
                    self.set_component_state(component, ComponentState::Failed)
                        .await;
                    error!("{} component ended abnormally: {}", component, e);
                    exit_code = 1;
                }
                Err(_) => {
                    self.set_component_state(component, ComponentState::Failed)
                        .await;
                    error!("{} component stop timeout", component);
                    exit_code = 1;
                }
            }
        }

        // Keyboard cycles run outside the task list
        if let Some(source) = self.state.cycle_in_flight() {
            info!("Waiting for the {} recognition cycle to finish", source);
            if timeout(stop_timeout, self.state.wait_idle()).await.is_err() {
                error!("Recognition cycle did not finish before shutdown");
                exit_code = 1;
            }
        }

        // Never leave the door unlocked behind us
        if let Some(lock) = self.hardware.lock.take() {
            lock.release();
            self.set_component_state("lock", ComponentState::Stopped)
                .await;
            info!("Door locked for shutdown");
        }

        // Dropping the handles releases the pins and clears interrupts
        self.keyboard_handler = None;
        self.pipeline = None;
        self.hardware.doorbell = None;
        self.hardware.sensor = None;
        self.hardware.controller = None;
        self.set_component_state("recognition", ComponentState::Stopped)
            .await;

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }
}
