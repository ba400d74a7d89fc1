//! Camera capability.
//!
//! The client never talks to a camera directly; it asks a [`CaptureSource`]
//! for one burst at a time. Production builds wire the platform camera
//! pipeline here, tests and the simulator use [`crate::synthetic`].

use async_trait::async_trait;

use crate::capture::Capture;

/// Errors from acquiring a capture.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("Camera unavailable: {0}")]
    Unavailable(String),

    #[error("No face in frame")]
    NoFace,
}

#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Capture one burst and reduce it to an embedding plus frame signals.
    async fn capture(&self) -> Result<Capture, CaptureError>;
}
