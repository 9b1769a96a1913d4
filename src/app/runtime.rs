use super::{DoorOrchestrator, ShutdownReason};
use crate::error::{EventBusError, FrontdoorError, Result};
use crate::events::{DoorEvent, EventFilter};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{oneshot, Mutex};
use tracing::{error, info};

type ShutdownSender = Arc<Mutex<Option<oneshot::Sender<ShutdownReason>>>>;

impl DoorOrchestrator {
    /// Run the main application loop with signal handling
    pub async fn run(&mut self) -> Result<i32> {
        info!("Door system is running");

        // Set up signal handling for graceful shutdown
        let shutdown_sender = self
            .shutdown_sender
            .take()
            .ok_or_else(|| FrontdoorError::system("Shutdown sender already taken"))?;

        let shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| FrontdoorError::system("Shutdown receiver already taken"))?;

        let shutdown_sender = Arc::new(Mutex::new(Some(shutdown_sender)));
        self.setup_signal_handlers(&shutdown_sender);
        self.listen_for_shutdown_requests(&shutdown_sender);

        // Wait for shutdown signal
        let shutdown_reason = shutdown_receiver
            .await
            .map_err(|_| FrontdoorError::system("Shutdown channel closed unexpectedly"))?;

        info!("Shutdown initiated: {:?}", shutdown_reason);

        // Perform graceful shutdown
        let exit_code = self.shutdown().await?;

        info!("Door system shutdown complete");
        Ok(exit_code)
    }

    /// Set up signal handlers for graceful shutdown
    fn setup_signal_handlers(&self, shutdown_sender: &ShutdownSender) {
        // Handle SIGTERM (systemd stop) - Unix only
        #[cfg(unix)]
        {
            let shutdown_sender_sigterm = Arc::clone(shutdown_sender);
            let cancel = self.cancellation_token.clone();
            tokio::spawn(async move {
                let mut sigterm =
                    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                        Ok(sigterm) => sigterm,
                        Err(e) => {
                            error!("Failed to register SIGTERM handler: {}", e);
                            return;
                        }
                    };
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    Some(()) = sigterm.recv() => {
                        info!("Received SIGTERM signal");
                        send_shutdown(&shutdown_sender_sigterm, ShutdownReason::Signal("SIGTERM".to_string())).await;
                    }
                }
            });
        }

        // Handle SIGINT (Ctrl+C) - Cross-platform
        let shutdown_sender_sigint = Arc::clone(shutdown_sender);
        let cancel = self.cancellation_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                Ok(()) = signal::ctrl_c() => {
                    info!("Received SIGINT signal (Ctrl+C)");
                    send_shutdown(&shutdown_sender_sigint, ShutdownReason::Signal("SIGINT".to_string())).await;
                }
            }
        });
    }

    /// Turn `ShutdownRequested` events (keyboard quit) into a shutdown
    fn listen_for_shutdown_requests(&self, shutdown_sender: &ShutdownSender) {
        let mut receiver = self.event_bus.subscribe_filtered(
            EventFilter::EventTypes(vec!["shutdown_requested"]),
            "shutdown",
        );
        let shutdown_sender = Arc::clone(shutdown_sender);
        let cancel = self.cancellation_token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = receiver.recv() => match event {
                        Ok(DoorEvent::ShutdownRequested { .. }) => {
                            send_shutdown(&shutdown_sender, ShutdownReason::UserRequest).await;
                            break;
                        }
                        Ok(_) => {}
                        Err(EventBusError::ChannelClosed) => break,
                        Err(_) => {}
                    },
                }
            }
        });
    }
}

async fn send_shutdown(sender: &ShutdownSender, reason: ShutdownReason) {
    if let Some(sender) = sender.lock().await.take() {
        let _ = sender.send(reason);
    }
}
