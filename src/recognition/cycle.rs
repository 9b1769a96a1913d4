use super::traits::{Camera, Feedback, FeedbackMessage, Recognizer, WhitelistStore};
use crate::config::FrontdoorConfig;
use crate::error::{CaptureError, RecognitionError};
use crate::events::{DoorEvent, EventBus};
use crate::guard::{CyclePermit, PipelineState, SuppressReason, TriggerSource};
use crate::lock::LockActuator;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Terminal branch a recognition cycle ended in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CycleOutcome {
    Unlocked { identity: String },
    NotRecognized,
    NoFace,
    ServiceError { message: String },
    Failed { reason: String },
    CameraUnavailable,
    RecognizerNotReady,
}

impl CycleOutcome {
    pub fn is_unlock(&self) -> bool {
        matches!(self, CycleOutcome::Unlocked { .. })
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleOutcome::Unlocked { identity } => write!(f, "unlocked for {}", identity),
            CycleOutcome::NotRecognized => f.write_str("visitor not recognized"),
            CycleOutcome::NoFace => f.write_str("no face detected"),
            CycleOutcome::ServiceError { message } => write!(f, "service error: {}", message),
            CycleOutcome::Failed { reason } => write!(f, "failed: {}", reason),
            CycleOutcome::CameraUnavailable => f.write_str("camera unavailable"),
            CycleOutcome::RecognizerNotReady => f.write_str("recognizer not ready"),
        }
    }
}

/// External services a cycle talks to
#[derive(Clone)]
pub struct Collaborators {
    pub camera: Arc<dyn Camera>,
    pub recognizer: Arc<dyn Recognizer>,
    pub whitelist: Arc<dyn WhitelistStore>,
    pub feedback: Arc<dyn Feedback>,
}

#[derive(Debug, Clone, Copy)]
pub struct CycleSettings {
    pub unlock_duration: Duration,
    pub recognition_timeout: Duration,
}

impl From<&FrontdoorConfig> for CycleSettings {
    fn from(config: &FrontdoorConfig) -> Self {
        Self {
            unlock_duration: config.lock.unlock_duration(),
            recognition_timeout: config.recognition.timeout(),
        }
    }
}

/// Capture → identify → unlock or explain. Owns the trigger guard entry
/// points so every trigger source goes through the same checks.
pub struct RecognitionPipeline {
    state: Arc<PipelineState>,
    collaborators: Collaborators,
    lock: Option<LockActuator>,
    settings: CycleSettings,
    event_bus: EventBus,
}

impl RecognitionPipeline {
    pub fn new(
        state: Arc<PipelineState>,
        collaborators: Collaborators,
        lock: Option<LockActuator>,
        settings: CycleSettings,
        event_bus: EventBus,
    ) -> Self {
        Self {
            state,
            collaborators,
            lock,
            settings,
            event_bus,
        }
    }

    pub fn state(&self) -> &Arc<PipelineState> {
        &self.state
    }

    pub fn lock(&self) -> Option<&LockActuator> {
        self.lock.as_ref()
    }

    /// Take the trigger guard for `source`. Never blocks, so it may be
    /// called from an interrupt callback.
    pub fn try_begin(&self, source: TriggerSource) -> Result<CyclePermit, SuppressReason> {
        let result = if self.state.is_closed() {
            Err(SuppressReason::ShuttingDown)
        } else if !self.collaborators.whitelist.accepts_cycles() {
            Err(SuppressReason::StoreNotReady)
        } else {
            match source {
                TriggerSource::Presence => self.state.try_enter_presence(),
                _ => self.state.try_acquire(source),
            }
        };

        if let Err(reason) = result {
            self.report_suppressed(source, reason);
        }
        result
    }

    /// Run a cycle on its own task and release the guard when it ends,
    /// whichever branch it takes. A panicking cycle counts as a failure.
    pub async fn run_guarded(self: &Arc<Self>, permit: CyclePermit) -> CycleOutcome {
        let source = permit.source();
        let cycle_id = Uuid::new_v4();
        info!("Recognition cycle {} started ({})", cycle_id, source);
        self.emit(DoorEvent::CycleStarted {
            cycle_id,
            source,
            timestamp: Utc::now(),
        });

        let pipeline = Arc::clone(self);
        let task = tokio::spawn(async move {
            let _permit = permit;
            pipeline.run_cycle().await
        });

        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Recognition cycle {} aborted: {}", cycle_id, e);
                self.collaborators
                    .feedback
                    .announce(FeedbackMessage::Failure { detail: None });
                CycleOutcome::Failed {
                    reason: "recognition cycle aborted".to_string(),
                }
            }
        };

        info!("Recognition cycle {} finished: {}", cycle_id, outcome);
        self.emit(DoorEvent::CycleCompleted {
            cycle_id,
            source,
            outcome: outcome.clone(),
            timestamp: Utc::now(),
        });
        outcome
    }

    /// `try_begin` followed by `run_guarded`
    pub async fn trigger(self: &Arc<Self>, source: TriggerSource) -> Option<CycleOutcome> {
        let permit = self.try_begin(source).ok()?;
        Some(self.run_guarded(permit).await)
    }

    /// One pass through the collaborators. Callers must hold the guard.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let feedback = &self.collaborators.feedback;

        if !self.collaborators.camera.is_ready() {
            warn!("Unable to analyse visitor, camera not initialised");
            feedback.announce(FeedbackMessage::NoCamera);
            return CycleOutcome::CameraUnavailable;
        }

        if !self.collaborators.recognizer.is_ready() {
            info!("Unable to analyse visitor, recognizer still initialising");
            return CycleOutcome::RecognizerNotReady;
        }

        let image = match self.collaborators.camera.capture_image().await {
            Ok(image) => image,
            Err(CaptureError::Unavailable) => {
                warn!("Camera became unavailable during capture");
                feedback.announce(FeedbackMessage::NoCamera);
                return CycleOutcome::CameraUnavailable;
            }
            Err(e) => {
                error!("Image capture failed: {}", e);
                feedback.announce(FeedbackMessage::Failure { detail: None });
                return CycleOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };
        debug!("Captured {} byte image", image.data.len());

        let result = match timeout(
            self.settings.recognition_timeout,
            self.collaborators.recognizer.identify(&image),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RecognitionError::Other(format!(
                "no answer within {:?}",
                self.settings.recognition_timeout
            ))),
        };

        match result {
            Ok(identity) => {
                match &self.lock {
                    Some(lock) => {
                        if lock.unlock(self.settings.unlock_duration) {
                            self.emit(DoorEvent::DoorUnlocked {
                                identity: identity.name.clone(),
                                duration_secs: self.settings.unlock_duration.as_secs(),
                                timestamp: Utc::now(),
                            });
                        }
                    }
                    None => warn!("No door lock available, cannot unlock for {}", identity),
                }
                let name = identity.name.clone();
                feedback.announce(FeedbackMessage::Greeting(identity));
                CycleOutcome::Unlocked { identity: name }
            }
            Err(RecognitionError::NotWhitelisted) => {
                info!("Visitor not recognized");
                feedback.announce(FeedbackMessage::NotRecognized { no_face: false });
                CycleOutcome::NotRecognized
            }
            Err(RecognitionError::NoFaceDetected) => {
                warn!("No face detected in this image");
                feedback.announce(FeedbackMessage::NotRecognized { no_face: true });
                CycleOutcome::NoFace
            }
            Err(RecognitionError::Service(message)) => {
                warn!("Recognition service error: {}", message);
                feedback.announce(FeedbackMessage::Failure {
                    detail: Some(message.clone()),
                });
                CycleOutcome::ServiceError { message }
            }
            Err(RecognitionError::Other(reason)) => {
                error!("Recognition failed: {}", reason);
                feedback.announce(FeedbackMessage::Failure { detail: None });
                CycleOutcome::Failed { reason }
            }
        }
    }

    fn report_suppressed(&self, source: TriggerSource, reason: SuppressReason) {
        match reason {
            SuppressReason::AlreadyNear => return,
            SuppressReason::ShuttingDown => {
                debug!("{} trigger ignored, shutting down", source);
                return;
            }
            SuppressReason::StoreNotReady | SuppressReason::CycleInFlight => {}
        }

        // Presence re-fires on every poll while the visitor stays in range
        let first = match source {
            TriggerSource::Presence => self.state.hold_back_presence(),
            _ => {
                // try_acquire has already counted a busy guard
                if reason == SuppressReason::StoreNotReady {
                    self.state.record_suppressed();
                }
                true
            }
        };
        if !first {
            trace!("{} trigger still suppressed: {:?}", source, reason);
            return;
        }

        debug!("{} trigger suppressed: {:?}", source, reason);
        self.emit(DoorEvent::TriggerSuppressed {
            source,
            reason,
            timestamp: Utc::now(),
        });
    }

    fn emit(&self, event: DoorEvent) {
        if let Err(e) = self.event_bus.publish(event) {
            debug!("Event not delivered: {}", e);
        }
    }
}
