//! Capture model.
//!
//! The camera pipeline (out of scope) reduces a short burst of frames to a
//! face embedding plus per-frame anti-spoofing signals. Raw images never
//! reach this crate.

use serde::{Deserialize, Serialize};

/// Anti-spoofing signals extracted from one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameSignal {
    /// 0.0 = eyes fully closed, 1.0 = fully open.
    pub eye_openness: f32,
    /// Head yaw relative to the camera axis, in degrees.
    pub head_yaw_deg: f32,
}

/// One capture: an embedding and the frame sequence it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capture {
    pub embedding: Vec<f32>,
    pub frames: Vec<FrameSignal>,
}

/// L2-normalise a vector. `None` for zero-length, zero or non-finite input.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn normalized(v: &[f32]) -> Option<Vec<f32>> {
    if v.is_empty() || v.iter().any(|x| !x.is_finite()) {
        return None;
    }
    let norm = v.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    if norm <= f64::EPSILON {
        return None;
    }
    Some(v.iter().map(|x| (f64::from(*x) / norm) as f32).collect())
}

/// Euclidean distance between equal-length vectors.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (f64::from(*x) - f64::from(*y)).powi(2))
        .sum::<f64>()
        .sqrt() as f32
}

/// Dot product accumulated in `f64` for deterministic scoring.
pub(crate) fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn normalized_has_unit_length() {
        let n = normalized(&[3.0, 4.0]).unwrap();
        assert!((n[0] - 0.6).abs() < 1e-6);
        assert!((n[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn degenerate_vectors_do_not_normalize() {
        assert!(normalized(&[]).is_none());
        assert!(normalized(&[0.0, 0.0]).is_none());
        assert!(normalized(&[f32::NAN, 1.0]).is_none());
    }

    #[test]
    fn distance_and_dot() {
        assert_eq!(distance(&[0.0, 0.0], &[3.0, 4.0]), 5.0);
        assert_eq!(dot(&[1.0, 2.0], &[3.0, 4.0]), 11.0);
    }
}
