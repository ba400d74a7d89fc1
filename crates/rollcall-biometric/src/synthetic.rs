//! Deterministic synthetic faces.
//!
//! A [`Face`] is a fixed random direction in embedding space; each capture
//! adds a small seeded perturbation. Different faces are close to orthogonal,
//! so genuine and impostor scores are well separated.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::capture::{Capture, FrameSignal};
use crate::source::{CaptureError, CaptureSource};

/// Norm of the per-capture perturbation relative to the unit face vector.
const CAPTURE_NOISE: f32 = 0.15;

/// How the subject behaves during the burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Motion {
    /// Blinks and turns their head.
    Live,
    /// Blinks but holds still.
    BlinkOnly,
    /// A photo held up to the camera.
    Static,
}

#[derive(Debug, Clone)]
pub struct Face {
    seed: u64,
    base: Vec<f32>,
}

impl Face {
    pub fn new(seed: u64, dim: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let base = (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
        Self { seed, base }
    }

    pub fn dim(&self) -> usize {
        self.base.len()
    }

    /// One capture. The same `(face, nonce, motion)` always yields the same
    /// capture.
    #[allow(clippy::cast_precision_loss)]
    pub fn capture(&self, nonce: u64, motion: Motion) -> Capture {
        let mixed = self.seed.rotate_left(32) ^ nonce.wrapping_mul(0x9E37_79B9_7F4A_7C15);
        let mut rng = StdRng::seed_from_u64(mixed);
        let norm = self
            .base
            .iter()
            .map(|x| x * x)
            .sum::<f32>()
            .sqrt()
            .max(f32::EPSILON);
        // Uniform(-a, a) has variance a^2 / 3.
        let amplitude = CAPTURE_NOISE * (3.0 / self.base.len().max(1) as f32).sqrt();
        let embedding = self
            .base
            .iter()
            .map(|x| x / norm + rng.gen_range(-amplitude..=amplitude))
            .collect();
        Capture {
            embedding,
            frames: frames_for(motion),
        }
    }
}

fn frames_for(motion: Motion) -> Vec<FrameSignal> {
    const EYES_BLINKING: [f32; 8] = [0.9, 0.92, 0.4, 0.05, 0.1, 0.85, 0.9, 0.9];
    const YAW_TURNING: [f32; 8] = [-12.0, -8.0, -4.0, 0.0, 4.0, 8.0, 12.0, 10.0];

    match motion {
        Motion::Live => EYES_BLINKING
            .iter()
            .zip(YAW_TURNING)
            .map(|(&eye_openness, head_yaw_deg)| FrameSignal {
                eye_openness,
                head_yaw_deg,
            })
            .collect(),
        Motion::BlinkOnly => EYES_BLINKING
            .iter()
            .map(|&eye_openness| FrameSignal {
                eye_openness,
                head_yaw_deg: 1.0,
            })
            .collect(),
        Motion::Static => vec![
            FrameSignal {
                eye_openness: 0.8,
                head_yaw_deg: 1.0,
            };
            8
        ],
    }
}

/// A [`CaptureSource`] that shows the camera a given face.
#[derive(Debug)]
pub struct SyntheticCamera {
    face: Face,
    motion: Motion,
    counter: AtomicU64,
}

impl SyntheticCamera {
    pub const fn new(face: Face, motion: Motion) -> Self {
        Self {
            face,
            motion,
            counter: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl CaptureSource for SyntheticCamera {
    async fn capture(&self) -> Result<Capture, CaptureError> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        Ok(self.face.capture(n.wrapping_add(1 << 40), self.motion))
    }
}
