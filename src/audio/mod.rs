pub mod analyzer;
pub mod playback;
pub mod pool;
pub mod source;

pub use analyzer::{AnalyzerConfig, LipSyncAnalyzer};
pub use playback::WavPlayback;
pub use pool::SnapshotPool;
pub use source::{AudioSource, AudioTap, ListenerHandle, PlaybackEvent};

/// Mouth-shape control values derived from one frequency-domain snapshot.
///
/// Produced fresh on every [`LipSyncAnalyzer::analyze`] call and never
/// persisted; callers copy or discard. All fields are guaranteed finite and
/// within `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MouthTargets {
    /// Jaw aperture, driven by low-frequency energy.
    pub mouth_open: f32,
    /// Lip rounding, driven by mid-frequency energy.
    pub mouth_round: f32,
    /// Overall speech loudness. Reported instantaneously (not smoothed)
    /// and forced to zero on frame-skipped calls.
    pub speech_intensity: f32,
}

impl MouthTargets {
    /// The inert output of a silent or non-ready analyzer.
    pub const ZERO: Self = Self {
        mouth_open: 0.0,
        mouth_round: 0.0,
        speech_intensity: 0.0,
    };
}

impl Default for MouthTargets {
    fn default() -> Self {
        Self::ZERO
    }
}
