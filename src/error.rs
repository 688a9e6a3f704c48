use thiserror::Error;

/// Failures that can occur while setting up the audio pipeline.
///
/// None of these are fatal to the animation system: every per-frame
/// operation stays total and degrades to idle motion when the audio side
/// is unavailable. Setup paths return these so callers can log and move on.
#[derive(Debug, Error)]
pub enum AvatarError {
    /// No audio output device, decoder, or analysis tap could be acquired.
    #[error("audio resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// The underlying audio context is suspended and could not be woken.
    /// Retried opportunistically on the next bind/resume attempt.
    #[error("audio context suspended: {0}")]
    TransientSuspension(String),

    /// Nonsensical analyzer configuration that could not be clamped.
    #[error("invalid analyzer configuration: {0}")]
    InvalidConfiguration(String),
}
