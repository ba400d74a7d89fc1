//! Rollcall Biometric Template Engine
//!
//! Turns enrollment captures into a reference template and scores live
//! captures against it. The engine only measures: acceptance thresholds are
//! applied by the caller.
//!
//! - [`liveness`]: blink and head-turn anti-spoofing checks
//! - [`engine`]: enrollment (centroid + outlier rejection) and matching
//! - [`template`]: the template and its sealed at-rest form
//! - [`source`]: the camera capability consumed by the client
//! - [`synthetic`]: deterministic synthetic faces for simulation and tests

pub mod capture;
pub mod engine;
pub mod error;
pub mod liveness;
pub mod source;
pub mod synthetic;
pub mod template;

pub use capture::{Capture, FrameSignal};
pub use engine::TemplateEngine;
pub use error::BiometricError;
pub use liveness::{LivenessConfig, LivenessReport};
pub use source::{CaptureError, CaptureSource};
pub use synthetic::{Face, Motion, SyntheticCamera};
pub use template::{BiometricTemplate, SealedTemplate};
