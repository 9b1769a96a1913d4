pub mod camera;
pub mod cycle;
pub mod feedback;
pub mod http;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;
#[cfg(test)]
mod tests;

pub use camera::CommandCamera;
pub use cycle::{Collaborators, CycleOutcome, CycleSettings, RecognitionPipeline};
pub use feedback::LoggingFeedback;
pub use http::{HttpRecognizer, ServiceWhitelist};
pub use traits::{Camera, CapturedImage, Feedback, FeedbackMessage, Identity, Recognizer, WhitelistStore};
