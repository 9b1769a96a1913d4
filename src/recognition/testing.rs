//! In-memory collaborators for exercising recognition cycles

use super::traits::{Camera, CapturedImage, Feedback, FeedbackMessage, Identity, Recognizer, WhitelistStore};
use crate::error::{CaptureError, RecognitionError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub(crate) struct FakeCamera {
    pub ready: AtomicBool,
    pub failure: Mutex<Option<CaptureError>>,
    pub captures: AtomicUsize,
}

#[async_trait]
impl Camera for FakeCamera {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn capture_image(&self) -> Result<CapturedImage, CaptureError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        match self.failure.lock().clone() {
            Some(error) => Err(error),
            None => Ok(CapturedImage::jpeg(vec![0xff, 0xd8, 0xff])),
        }
    }
}

pub(crate) enum Script {
    Answer(Result<Identity, RecognitionError>),
    Slow(Duration, Result<Identity, RecognitionError>),
    Panic,
}

pub(crate) struct ScriptedRecognizer {
    pub ready: AtomicBool,
    pub script: Mutex<Script>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl Recognizer for ScriptedRecognizer {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn identify(&self, _image: &CapturedImage) -> Result<Identity, RecognitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (delay, answer) = match &*self.script.lock() {
            Script::Answer(answer) => (None, answer.clone()),
            Script::Slow(delay, answer) => (Some(*delay), answer.clone()),
            Script::Panic => panic!("recognizer crashed"),
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        answer
    }
}

pub(crate) struct FakeWhitelist {
    pub ready: AtomicBool,
    pub refreshing: AtomicBool,
}

impl WhitelistStore for FakeWhitelist {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub(crate) struct RecordingFeedback {
    pub messages: Mutex<Vec<FeedbackMessage>>,
}

impl Feedback for RecordingFeedback {
    fn announce(&self, message: FeedbackMessage) {
        self.messages.lock().push(message);
    }
}

impl FakeCamera {
    pub fn ready() -> Arc<Self> {
        Arc::new(Self {
            ready: AtomicBool::new(true),
            failure: Mutex::new(None),
            captures: AtomicUsize::new(0),
        })
    }
}

impl ScriptedRecognizer {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            ready: AtomicBool::new(true),
            script: Mutex::new(script),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn answering(answer: Result<Identity, RecognitionError>) -> Arc<Self> {
        Self::new(Script::Answer(answer))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FakeWhitelist {
    pub fn ready() -> Arc<Self> {
        Arc::new(Self {
            ready: AtomicBool::new(true),
            refreshing: AtomicBool::new(false),
        })
    }
}

impl RecordingFeedback {
    pub fn messages(&self) -> Vec<FeedbackMessage> {
        self.messages.lock().clone()
    }
}
