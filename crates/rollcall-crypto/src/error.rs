//! Crypto error types.

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Template sealing failed: {0}")]
    SealFailed(String),

    /// Wrong key, wrong account or tampered ciphertext.
    #[error("Sealed template could not be opened: {0}")]
    OpenFailed(String),

    #[error("Expected a {expected}-byte key, got {actual} bytes")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Template key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Device key file {path} is readable by others (mode {mode:o}, expected 600)")]
    InsecureKeyFile { path: String, mode: u32 },

    #[error("Device key I/O: {0}")]
    Io(#[from] std::io::Error),
}
