//! Fixed-point similarity/liveness score.
//!
//! Scores travel inside signed packets and are compared against thresholds,
//! so they are carried as integer basis points: one unit is `0.0001`, and
//! `Score::MAX` is `1.0`. Equality at a threshold is therefore exact.

use serde::{Deserialize, Serialize};

/// A score in `[0, 1]` with a resolution of one basis point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Score(u16);

impl Score {
    /// Basis points per whole unit.
    pub const SCALE: u16 = 10_000;
    pub const ZERO: Self = Self(0);
    pub const MAX: Self = Self(Self::SCALE);

    /// Build from basis points, clamping to `[0, SCALE]`.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_basis_points(bp: u32) -> Self {
        if bp > Self::SCALE as u32 {
            Self::MAX
        } else {
            Self(bp as u16)
        }
    }

    /// Round a real value to the nearest basis point. Non-finite input maps
    /// to zero so a broken measurement can never pass a threshold.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_f64(value: f64) -> Self {
        if !value.is_finite() {
            return Self::ZERO;
        }
        let clamped = value.clamp(0.0, 1.0);
        Self((clamped * f64::from(Self::SCALE)).round() as u16)
    }

    pub const fn basis_points(self) -> u32 {
        self.0 as u32
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.0) / f64::from(Self::SCALE)
    }

    /// One basis point lower, saturating at zero.
    #[must_use]
    pub const fn one_unit_below(self) -> Self {
        Self(self.0.saturating_sub(1))
    }

    pub fn meets(self, threshold: Self) -> bool {
        self >= threshold
    }
}

impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}", self.as_f64())
    }
}
