use super::testing::{FakeCamera, FakeWhitelist, RecordingFeedback, Script, ScriptedRecognizer};
use super::*;
use crate::error::{CaptureError, RecognitionError};
use crate::events::{DoorEvent, EventBus};
use crate::gpio::{Level, MockGpio, PinController};
use crate::guard::{PipelineState, SuppressReason, TriggerSource};
use crate::lock::LockActuator;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

const LOCK_PIN: u8 = 4;

struct Harness {
    mock: MockGpio,
    pipeline: Arc<RecognitionPipeline>,
    camera: Arc<FakeCamera>,
    recognizer: Arc<ScriptedRecognizer>,
    whitelist: Arc<FakeWhitelist>,
    feedback: Arc<RecordingFeedback>,
    event_bus: EventBus,
}

impl Harness {
    fn new(answer: Result<Identity, RecognitionError>) -> Self {
        Self::scripted(Script::Answer(answer))
    }

    fn scripted(script: Script) -> Self {
        let mock = MockGpio::new();
        let controller = PinController::new(Arc::new(mock.clone()));
        let lock = LockActuator::open(&controller, LOCK_PIN, Level::High).unwrap();

        let camera = FakeCamera::ready();
        let recognizer = ScriptedRecognizer::new(script);
        let whitelist = FakeWhitelist::ready();
        let feedback = Arc::new(RecordingFeedback::default());
        let event_bus = EventBus::new(32);

        let collaborators = Collaborators {
            camera: camera.clone(),
            recognizer: recognizer.clone(),
            whitelist: whitelist.clone(),
            feedback: feedback.clone(),
        };
        let settings = CycleSettings {
            unlock_duration: Duration::from_millis(100),
            recognition_timeout: Duration::from_millis(200),
        };
        let pipeline = Arc::new(RecognitionPipeline::new(
            PipelineState::new(),
            collaborators,
            Some(lock),
            settings,
            event_bus.clone(),
        ));

        Self {
            mock,
            pipeline,
            camera,
            recognizer,
            whitelist,
            feedback,
            event_bus,
        }
    }

    async fn doorbell(&self) -> CycleOutcome {
        self.pipeline
            .trigger(TriggerSource::Doorbell)
            .await
            .expect("guard should be clear")
    }

    fn feedback(&self) -> Vec<FeedbackMessage> {
        self.feedback.messages()
    }

    fn guard_clear(&self) -> bool {
        self.pipeline.state().cycle_in_flight().is_none()
    }
}

#[tokio::test]
async fn test_recognised_visitor_unlocks_then_relocks() {
    let harness = Harness::new(Ok(Identity::new("alice")));

    let outcome = harness.doorbell().await;

    assert_eq!(
        outcome,
        CycleOutcome::Unlocked {
            identity: "alice".to_string()
        }
    );
    assert!(harness.guard_clear());
    assert_eq!(harness.mock.level(LOCK_PIN), Some(Level::Low));
    assert_eq!(
        harness.feedback(),
        vec![FeedbackMessage::Greeting(Identity::new("alice"))]
    );

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(harness.mock.level(LOCK_PIN), Some(Level::High));
    assert_eq!(harness.mock.transitions_to(LOCK_PIN, Level::Low), 1);
    assert_eq!(harness.mock.transitions_to(LOCK_PIN, Level::High), 1);
}

#[tokio::test]
async fn test_back_to_back_recognitions_unlock_once() {
    let harness = Harness::new(Ok(Identity::new("alice")));

    harness.doorbell().await;
    harness.doorbell().await;

    assert_eq!(harness.mock.transitions_to(LOCK_PIN, Level::Low), 1);
    assert!(harness.guard_clear());
}

#[tokio::test]
async fn test_no_face_leaves_lock_alone() {
    let harness = Harness::new(Err(RecognitionError::NoFaceDetected));

    let outcome = harness.doorbell().await;

    assert_eq!(outcome, CycleOutcome::NoFace);
    assert_eq!(harness.mock.writes(LOCK_PIN), vec![Level::High]);
    assert_eq!(
        harness.feedback(),
        vec![FeedbackMessage::NotRecognized { no_face: true }]
    );
    assert!(harness.guard_clear());
}

#[tokio::test]
async fn test_stranger_is_not_recognized() {
    let harness = Harness::new(Err(RecognitionError::NotWhitelisted));

    assert_eq!(harness.doorbell().await, CycleOutcome::NotRecognized);
    assert_eq!(
        harness.feedback(),
        vec![FeedbackMessage::NotRecognized { no_face: false }]
    );
    assert_eq!(harness.mock.transitions_to(LOCK_PIN, Level::Low), 0);
}

#[tokio::test]
async fn test_service_error_gives_failure_feedback() {
    let harness = Harness::new(Err(RecognitionError::Service("quota".to_string())));

    let outcome = harness.doorbell().await;

    assert_eq!(
        outcome,
        CycleOutcome::ServiceError {
            message: "quota".to_string()
        }
    );
    assert_eq!(
        harness.feedback(),
        vec![FeedbackMessage::Failure {
            detail: Some("quota".to_string())
        }]
    );
    assert_eq!(harness.mock.transitions_to(LOCK_PIN, Level::Low), 0);
    assert!(harness.guard_clear());
}

#[tokio::test]
async fn test_other_failure_gives_generic_feedback() {
    let harness = Harness::new(Err(RecognitionError::Other("socket reset".to_string())));

    assert!(matches!(
        harness.doorbell().await,
        CycleOutcome::Failed { .. }
    ));
    assert_eq!(
        harness.feedback(),
        vec![FeedbackMessage::Failure { detail: None }]
    );
    assert!(harness.guard_clear());
}

#[tokio::test]
async fn test_recognition_timeout_is_other_failure() {
    let harness = Harness::scripted(Script::Slow(
        Duration::from_secs(5),
        Ok(Identity::new("alice")),
    ));

    let outcome = harness.doorbell().await;

    assert!(matches!(outcome, CycleOutcome::Failed { .. }));
    assert_eq!(harness.mock.transitions_to(LOCK_PIN, Level::Low), 0);
    assert!(harness.guard_clear());
}

#[tokio::test]
async fn test_panicking_recognizer_releases_guard() {
    let harness = Harness::scripted(Script::Panic);

    let outcome = harness.doorbell().await;

    assert!(matches!(outcome, CycleOutcome::Failed { .. }));
    assert_eq!(
        harness.feedback(),
        vec![FeedbackMessage::Failure { detail: None }]
    );
    assert!(harness.guard_clear());

    // The pipeline keeps working afterwards
    *harness.recognizer.script.lock() = Script::Answer(Err(RecognitionError::NoFaceDetected));
    assert_eq!(harness.doorbell().await, CycleOutcome::NoFace);
}

#[tokio::test]
async fn test_camera_not_ready_skips_capture() {
    let harness = Harness::new(Ok(Identity::new("alice")));
    harness.camera.ready.store(false, Ordering::SeqCst);

    assert_eq!(harness.doorbell().await, CycleOutcome::CameraUnavailable);
    assert_eq!(harness.feedback(), vec![FeedbackMessage::NoCamera]);
    assert_eq!(harness.camera.captures.load(Ordering::SeqCst), 0);
    assert_eq!(harness.recognizer.calls(), 0);
    assert!(harness.guard_clear());
}

#[tokio::test]
async fn test_capture_failure_is_other_failure() {
    let harness = Harness::new(Ok(Identity::new("alice")));
    *harness.camera.failure.lock() = Some(CaptureError::Failed("sensor timeout".to_string()));

    assert!(matches!(
        harness.doorbell().await,
        CycleOutcome::Failed { .. }
    ));
    assert_eq!(harness.recognizer.calls(), 0);
    assert_eq!(harness.mock.transitions_to(LOCK_PIN, Level::Low), 0);
}

#[tokio::test]
async fn test_recognizer_initialising_is_silent() {
    let harness = Harness::new(Ok(Identity::new("alice")));
    harness.recognizer.ready.store(false, Ordering::SeqCst);

    assert_eq!(harness.doorbell().await, CycleOutcome::RecognizerNotReady);
    assert!(harness.feedback().is_empty());
    assert_eq!(harness.camera.captures.load(Ordering::SeqCst), 0);
    assert!(harness.guard_clear());
}

#[tokio::test]
async fn test_store_refresh_suppresses_cycles() {
    let harness = Harness::new(Ok(Identity::new("alice")));
    let mut events = harness.event_bus.subscribe();

    harness.whitelist.refreshing.store(true, Ordering::SeqCst);
    assert_eq!(
        harness.pipeline.try_begin(TriggerSource::Doorbell).unwrap_err(),
        SuppressReason::StoreNotReady
    );

    harness.whitelist.refreshing.store(false, Ordering::SeqCst);
    harness.whitelist.ready.store(false, Ordering::SeqCst);
    assert_eq!(
        harness.pipeline.try_begin(TriggerSource::Presence).unwrap_err(),
        SuppressReason::StoreNotReady
    );

    // Presence was never set while suppressed
    assert!(!harness.pipeline.state().person_near());
    assert_eq!(harness.pipeline.state().stats().triggers_suppressed, 2);
    assert!(matches!(
        events.try_recv().unwrap(),
        DoorEvent::TriggerSuppressed {
            reason: SuppressReason::StoreNotReady,
            ..
        }
    ));
}

#[tokio::test]
async fn test_trigger_during_cycle_is_suppressed() {
    let harness = Harness::scripted(Script::Slow(
        Duration::from_millis(100),
        Ok(Identity::new("alice")),
    ));

    let permit = harness.pipeline.try_begin(TriggerSource::Presence).unwrap();
    let pipeline = Arc::clone(&harness.pipeline);
    let running = tokio::spawn(async move { pipeline.run_guarded(permit).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(
        harness.pipeline.try_begin(TriggerSource::Doorbell).unwrap_err(),
        SuppressReason::CycleInFlight
    );
    assert!(harness.pipeline.trigger(TriggerSource::VirtualDoorbell).await.is_none());

    assert!(running.await.unwrap().is_unlock());
    assert!(harness.guard_clear());
    assert_eq!(harness.recognizer.calls(), 1);
}

#[tokio::test]
async fn test_cycle_events_are_published() {
    let harness = Harness::new(Err(RecognitionError::NoFaceDetected));
    let mut events = harness.event_bus.subscribe();

    harness.doorbell().await;

    let started = events.recv().await.unwrap();
    let completed = events.recv().await.unwrap();
    match (started, completed) {
        (
            DoorEvent::CycleStarted { cycle_id: a, .. },
            DoorEvent::CycleCompleted {
                cycle_id: b,
                outcome,
                ..
            },
        ) => {
            assert_eq!(a, b);
            assert_eq!(outcome, CycleOutcome::NoFace);
        }
        other => panic!("unexpected events: {:?}", other),
    }
}
