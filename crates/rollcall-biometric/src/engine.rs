//! Enrollment and matching.

use std::collections::HashSet;

use tracing::{debug, info};

use rollcall_core::Score;
use rollcall_core::config::EnrollmentConfig;

use crate::capture::{Capture, FrameSignal, distance, dot, normalized};
use crate::error::BiometricError;
use crate::liveness::{LivenessConfig, LivenessReport, assess};
use crate::template::BiometricTemplate;

/// Stateless enrollment/matching engine.
#[derive(Debug, Clone)]
pub struct TemplateEngine {
    config: EnrollmentConfig,
    liveness: LivenessConfig,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new(EnrollmentConfig::default())
    }
}

impl TemplateEngine {
    pub fn new(config: EnrollmentConfig) -> Self {
        let liveness = LivenessConfig::from(&config);
        Self { config, liveness }
    }

    pub const fn config(&self) -> &EnrollmentConfig {
        &self.config
    }

    /// Build a first-version template from enrollment captures.
    pub fn enroll(
        &self,
        account_id: &str,
        samples: &[Capture],
    ) -> Result<BiometricTemplate, BiometricError> {
        self.build_template(account_id, samples, 1)
    }

    /// Build a replacement template. The previous one is superseded, never
    /// edited.
    pub fn reenroll(
        &self,
        previous: &BiometricTemplate,
        samples: &[Capture],
    ) -> Result<BiometricTemplate, BiometricError> {
        self.build_template(previous.account_id(), samples, previous.version() + 1)
    }

    fn build_template(
        &self,
        account_id: &str,
        samples: &[Capture],
        version: u32,
    ) -> Result<BiometricTemplate, BiometricError> {
        let mut seen = HashSet::new();
        let mut accepted = Vec::with_capacity(samples.len());

        for sample in samples {
            self.check_dimension(&sample.embedding)?;
            let key: Vec<u32> = sample.embedding.iter().map(|x| x.to_bits()).collect();
            if !seen.insert(key) {
                debug!(account_id, "Skipping duplicate enrollment capture");
                continue;
            }
            if !assess(&sample.frames, &self.liveness).has_motion() {
                debug!(account_id, "Enrollment capture failed liveness pre-check");
                continue;
            }
            let unit = normalized(&sample.embedding).ok_or(BiometricError::DegenerateEmbedding)?;
            accepted.push(unit);
        }

        if accepted.len() < self.config.min_samples {
            return Err(BiometricError::InsufficientSamples {
                required: self.config.min_samples,
                passed: accepted.len(),
            });
        }

        let centroid = centroid(&accepted).ok_or(BiometricError::DegenerateEmbedding)?;
        for (sample_index, sample) in accepted.iter().enumerate() {
            let d = distance(sample, &centroid);
            if d > self.config.max_centroid_distance {
                return Err(BiometricError::InconsistentSamples {
                    sample_index,
                    distance: d,
                    threshold: self.config.max_centroid_distance,
                });
            }
        }

        info!(account_id, version, samples = accepted.len(), "Biometric template enrolled");
        Ok(BiometricTemplate::new(account_id.to_string(), centroid, version))
    }

    /// Similarity of a live capture to the template, in `[0, 1]`.
    ///
    /// Cosine similarity of the unit embeddings, negative values clamped to
    /// zero. Identical inputs always produce the identical score.
    pub fn match_live(
        &self,
        template: &BiometricTemplate,
        live: &Capture,
    ) -> Result<Score, BiometricError> {
        self.check_dimension(&live.embedding)?;
        if template.embedding().len() != live.embedding.len() {
            return Err(BiometricError::DimensionMismatch {
                expected: template.embedding().len(),
                actual: live.embedding.len(),
            });
        }
        let live_unit = normalized(&live.embedding).ok_or(BiometricError::DegenerateEmbedding)?;
        let reference =
            normalized(template.embedding()).ok_or(BiometricError::DegenerateEmbedding)?;
        Ok(Score::from_f64(dot(&reference, &live_unit)))
    }

    /// Anti-spoofing check over a capture burst: blink and head turn.
    pub fn check_liveness(&self, frames: &[FrameSignal]) -> bool {
        self.liveness_report(frames).passed()
    }

    pub fn liveness_report(&self, frames: &[FrameSignal]) -> LivenessReport {
        assess(frames, &self.liveness)
    }

    const fn check_dimension(&self, embedding: &[f32]) -> Result<(), BiometricError> {
        if embedding.len() != self.config.embedding_dim {
            return Err(BiometricError::DimensionMismatch {
                expected: self.config.embedding_dim,
                actual: embedding.len(),
            });
        }
        Ok(())
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn centroid(units: &[Vec<f32>]) -> Option<Vec<f32>> {
    let dim = units.first()?.len();
    let mut sum = vec![0.0f64; dim];
    for unit in units {
        for (acc, x) in sum.iter_mut().zip(unit) {
            *acc += f64::from(*x);
        }
    }
    let n = units.len() as f64;
    let mean: Vec<f32> = sum.into_iter().map(|s| (s / n) as f32).collect();
    normalized(&mean)
}
