use crate::error::{CaptureError, RecognitionError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A still image taken at the door
#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub data: Vec<u8>,
    pub content_type: &'static str,
    pub captured_at: DateTime<Utc>,
}

impl CapturedImage {
    pub fn jpeg(data: Vec<u8>) -> Self {
        Self {
            data,
            content_type: "image/jpeg",
            captured_at: Utc::now(),
        }
    }
}

/// An enrolled visitor recognised by the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
}

impl Identity {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self { name: name.into() }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// What the visitor is told at the end of a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackMessage {
    Greeting(Identity),
    NotRecognized { no_face: bool },
    NoCamera,
    Failure { detail: Option<String> },
}

impl fmt::Display for FeedbackMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedbackMessage::Greeting(identity) => write!(f, "Welcome {}", identity),
            FeedbackMessage::NotRecognized { no_face: true } => f.write_str("No face detected"),
            FeedbackMessage::NotRecognized { no_face: false } => {
                f.write_str("Visitor not recognized")
            }
            FeedbackMessage::NoCamera => f.write_str("Camera not available"),
            FeedbackMessage::Failure { detail: Some(detail) } => {
                write!(f, "Visitor not recognized: {}", detail)
            }
            FeedbackMessage::Failure { detail: None } => f.write_str("Visitor not recognized"),
        }
    }
}

/// Image source used by a recognition cycle
#[async_trait]
pub trait Camera: Send + Sync {
    fn is_ready(&self) -> bool;

    async fn capture_image(&self) -> Result<CapturedImage, CaptureError>;
}

/// Face recognition service
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// False until asynchronous initialisation has finished
    fn is_ready(&self) -> bool;

    async fn identify(&self, image: &CapturedImage) -> Result<Identity, RecognitionError>;
}

/// Store of enrolled visitors. Cycles are suppressed until it is ready and
/// while it refreshes.
pub trait WhitelistStore: Send + Sync {
    fn is_ready(&self) -> bool;

    fn is_refreshing(&self) -> bool;

    fn accepts_cycles(&self) -> bool {
        self.is_ready() && !self.is_refreshing()
    }
}

/// Speech or on-screen output. Fire-and-forget.
pub trait Feedback: Send + Sync {
    fn announce(&self, message: FeedbackMessage);
}
