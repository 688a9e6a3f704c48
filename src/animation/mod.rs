pub mod binder;
pub mod controller;

pub use binder::PlaybackBinder;
pub use controller::AnimationController;

use serde::{Deserialize, Serialize};

/// Behavior mode of the avatar. Exactly one value is active at a time,
/// owned exclusively by the [`AnimationController`]; transitions are driven
/// by playback lifecycle events or explicit listening calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnimationState {
    Idle,
    Listening,
    Speaking,
}

/// The per-frame morph-target vector handed to the renderer.
///
/// Every field is clamped to `0.0..=1.0` and finite before delivery; a
/// validation failure yields `0.0`, never NaN.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AvatarMorphTargets {
    pub mouth_open: f32,
    pub mouth_round: f32,
    pub eyes_look_up: f32,
    pub eyes_close: f32,
}

impl AvatarMorphTargets {
    pub const NEUTRAL: Self = Self {
        mouth_open: 0.0,
        mouth_round: 0.0,
        eyes_look_up: 0.0,
        eyes_close: 0.0,
    };

    /// Clamp every field into the unit interval, mapping non-finite values
    /// to zero.
    pub fn sanitized(self) -> Self {
        fn unit(value: f32) -> f32 {
            if value.is_finite() {
                value.clamp(0.0, 1.0)
            } else {
                0.0
            }
        }
        Self {
            mouth_open: unit(self.mouth_open),
            mouth_round: unit(self.mouth_round),
            eyes_look_up: unit(self.eyes_look_up),
            eyes_close: unit(self.eyes_close),
        }
    }
}

impl Default for AvatarMorphTargets {
    fn default() -> Self {
        Self::NEUTRAL
    }
}
