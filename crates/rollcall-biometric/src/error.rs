//! Biometric error types.

use rollcall_crypto::CryptoError;

/// Errors from enrollment, matching and template sealing.
#[derive(Debug, thiserror::Error)]
pub enum BiometricError {
    #[error("Insufficient samples: {passed} passed the liveness pre-check, {required} required")]
    InsufficientSamples { required: usize, passed: usize },

    #[error(
        "Inconsistent samples: sample {sample_index} is {distance:.3} from the centroid (max {threshold:.3})"
    )]
    InconsistentSamples {
        sample_index: usize,
        distance: f32,
        threshold: f32,
    },

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding is degenerate (zero or non-finite)")]
    DegenerateEmbedding,

    #[error("Template belongs to {actual}, expected {expected}")]
    AccountMismatch { expected: String, actual: String },

    #[error("Template sealing error: {0}")]
    Seal(#[from] CryptoError),

    #[error("Template serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
