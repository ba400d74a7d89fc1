//! Failure taxonomy shared by host and client errors.

use serde::{Deserialize, Serialize};

/// How a failure is handled.
///
/// - `Transport`: retried locally with bounded attempts
/// - `Protocol`: recorded as rejected, never retried with the same nonce
/// - `Biometric`: surfaced for a fresh capture, bounded per join
/// - `Policy`: terminal for the connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Transport,
    Protocol,
    Biometric,
    Policy,
}

impl FailureClass {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Protocol => "protocol",
            Self::Biometric => "biometric",
            Self::Policy => "policy",
        }
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
