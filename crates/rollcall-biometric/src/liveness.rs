//! Anti-spoofing checks.
//!
//! A live subject blinks and turns their head during the capture burst; a
//! printed photo or a replayed still does neither. These checks look only at
//! the frame signals and are independent of identity matching.

use rollcall_core::config::EnrollmentConfig;

use crate::capture::FrameSignal;

/// Minimum frames in a burst before any signal is trusted.
pub const MIN_FRAMES: usize = 3;

/// Thresholds for the blink and head-turn detectors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LivenessConfig {
    pub blink_closed_below: f32,
    pub blink_open_above: f32,
    pub head_turn_min_deg: f32,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self::from(&EnrollmentConfig::default())
    }
}

impl From<&EnrollmentConfig> for LivenessConfig {
    fn from(config: &EnrollmentConfig) -> Self {
        Self {
            blink_closed_below: config.blink_closed_below,
            blink_open_above: config.blink_open_above,
            head_turn_min_deg: config.head_turn_min_deg,
        }
    }
}

/// What the detectors saw in one burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LivenessReport {
    pub blink: bool,
    pub head_turn: bool,
}

impl LivenessReport {
    /// Full liveness: both signals present.
    pub const fn passed(self) -> bool {
        self.blink && self.head_turn
    }

    /// Enrollment pre-check: at least some intra-sample motion.
    pub const fn has_motion(self) -> bool {
        self.blink || self.head_turn
    }
}

/// Run both detectors over a frame burst.
pub fn assess(frames: &[FrameSignal], config: &LivenessConfig) -> LivenessReport {
    if frames.len() < MIN_FRAMES
        || frames
            .iter()
            .any(|f| !f.eye_openness.is_finite() || !f.head_yaw_deg.is_finite())
    {
        return LivenessReport::default();
    }
    LivenessReport {
        blink: detect_blink(frames, config),
        head_turn: detect_head_turn(frames, config),
    }
}

/// Open → closed → open, in that order.
fn detect_blink(frames: &[FrameSignal], config: &LivenessConfig) -> bool {
    #[derive(Clone, Copy)]
    enum Phase {
        AwaitOpen,
        AwaitClosed,
        AwaitReopen,
    }

    let mut phase = Phase::AwaitOpen;
    for frame in frames {
        phase = match phase {
            Phase::AwaitOpen if frame.eye_openness >= config.blink_open_above => Phase::AwaitClosed,
            Phase::AwaitClosed if frame.eye_openness <= config.blink_closed_below => {
                Phase::AwaitReopen
            }
            Phase::AwaitReopen if frame.eye_openness >= config.blink_open_above => return true,
            other => other,
        };
    }
    false
}

fn detect_head_turn(frames: &[FrameSignal], config: &LivenessConfig) -> bool {
    let (min, max) = frames
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), f| {
            (lo.min(f.head_yaw_deg), hi.max(f.head_yaw_deg))
        });
    max - min >= config.head_turn_min_deg
}
