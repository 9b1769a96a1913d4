use crate::error::Result;
use crate::events::{DoorEvent, EventBus};
use crate::guard::TriggerSource;
use crate::recognition::RecognitionPipeline;
use chrono::Utc;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a key press asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    VirtualDoorbell,
    Quit,
    Ignore,
}

impl KeyAction {
    pub fn for_key(code: KeyCode) -> Self {
        match code {
            KeyCode::Char(' ') => KeyAction::VirtualDoorbell,
            KeyCode::Char('q') | KeyCode::Esc => KeyAction::Quit,
            _ => KeyAction::Ignore,
        }
    }
}

/// Terminal stand-in for the on-screen doorbell button
pub struct KeyboardInputHandler {
    pipeline: Arc<RecognitionPipeline>,
    event_bus: EventBus,
    cancellation_token: CancellationToken,
}

impl KeyboardInputHandler {
    pub fn new(pipeline: Arc<RecognitionPipeline>, event_bus: EventBus) -> Self {
        Self {
            pipeline,
            event_bus,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Ring the virtual doorbell. The cycle starts right away, without the
    /// settle delay used for the physical button.
    pub fn ring(&self, runtime: &Handle) {
        publish(
            &self.event_bus,
            DoorEvent::DoorbellPressed {
                source: TriggerSource::VirtualDoorbell,
                timestamp: Utc::now(),
            },
        );

        if let Ok(permit) = self.pipeline.try_begin(TriggerSource::VirtualDoorbell) {
            let pipeline = Arc::clone(&self.pipeline);
            runtime.spawn(async move {
                pipeline.run_guarded(permit).await;
            });
        }
    }

    /// Start listening for keyboard input
    pub async fn start(&self) -> Result<()> {
        info!("Starting keyboard input handler - press SPACE to ring the doorbell, q to quit");

        let handler = Self {
            pipeline: Arc::clone(&self.pipeline),
            event_bus: self.event_bus.clone(),
            cancellation_token: self.cancellation_token.clone(),
        };
        let runtime_handle = Handle::current();

        task::spawn_blocking(move || {
            if let Err(e) = enable_raw_mode() {
                error!("Failed to enable raw mode for keyboard input: {}", e);
                return;
            }

            debug!("Raw mode enabled - keyboard handler active");

            loop {
                if handler.cancellation_token.is_cancelled() {
                    debug!("Keyboard input handler stopping");
                    break;
                }

                match event::poll(Duration::from_millis(100)) {
                    Ok(true) => {
                        let Ok(Event::Key(key_event)) = event::read() else {
                            continue;
                        };
                        if key_event.kind != KeyEventKind::Press {
                            continue;
                        }

                        match KeyAction::for_key(key_event.code) {
                            KeyAction::VirtualDoorbell => {
                                info!("Space bar pressed - ringing virtual doorbell");
                                handler.ring(&runtime_handle);
                            }
                            KeyAction::Quit => {
                                info!("Quit key pressed - requesting shutdown");
                                publish(
                                    &handler.event_bus,
                                    DoorEvent::ShutdownRequested {
                                        timestamp: Utc::now(),
                                        reason: "User requested via keyboard".to_string(),
                                    },
                                );
                                break;
                            }
                            KeyAction::Ignore => {
                                debug!("Key pressed: {:?}", key_event.code);
                            }
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Error polling for keyboard events: {}", e);
                    }
                }
            }

            if let Err(e) = disable_raw_mode() {
                error!("Failed to disable raw mode: {}", e);
            } else {
                debug!("Raw mode disabled");
            }
        });

        Ok(())
    }

    /// Stop the keyboard input handler
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping keyboard input handler");
        self.cancellation_token.cancel();

        // Give the task a moment to clean up and disable raw mode
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = disable_raw_mode();

        Ok(())
    }
}

fn publish(event_bus: &EventBus, event: DoorEvent) {
    if let Err(e) = event_bus.publish(event) {
        warn!("Failed to publish keyboard event: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::PipelineState;
    use crate::recognition::testing::{FakeCamera, FakeWhitelist, RecordingFeedback, ScriptedRecognizer};
    use crate::recognition::{Collaborators, CycleSettings, Identity};

    fn handler() -> (KeyboardInputHandler, Arc<ScriptedRecognizer>, EventBus) {
        let event_bus = EventBus::new(16);
        let recognizer = ScriptedRecognizer::answering(Ok(Identity::new("alice")));
        let pipeline = Arc::new(RecognitionPipeline::new(
            PipelineState::new(),
            Collaborators {
                camera: FakeCamera::ready(),
                recognizer: recognizer.clone(),
                whitelist: FakeWhitelist::ready(),
                feedback: Arc::new(RecordingFeedback::default()),
            },
            None,
            CycleSettings {
                unlock_duration: Duration::from_millis(50),
                recognition_timeout: Duration::from_secs(1),
            },
            event_bus.clone(),
        ));
        (
            KeyboardInputHandler::new(pipeline, event_bus.clone()),
            recognizer,
            event_bus,
        )
    }

    #[test]
    fn test_key_mapping() {
        assert_eq!(KeyAction::for_key(KeyCode::Char(' ')), KeyAction::VirtualDoorbell);
        assert_eq!(KeyAction::for_key(KeyCode::Char('q')), KeyAction::Quit);
        assert_eq!(KeyAction::for_key(KeyCode::Esc), KeyAction::Quit);
        assert_eq!(KeyAction::for_key(KeyCode::Enter), KeyAction::Ignore);
    }

    #[tokio::test]
    async fn test_virtual_doorbell_runs_cycle_without_delay() {
        let (handler, recognizer, event_bus) = handler();
        let mut events = event_bus.subscribe();

        handler.ring(&Handle::current());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(recognizer.calls(), 1);
        assert!(matches!(
            events.recv().await.unwrap(),
            DoorEvent::DoorbellPressed {
                source: TriggerSource::VirtualDoorbell,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_keyboard_handler_stop() {
        let (handler, _, _) = handler();

        handler.stop().await.unwrap();
        assert!(handler.cancellation_token.is_cancelled());
    }
}
