//! Real-time audio-to-morph-target lip-sync engine.
//!
//! Converts a playing audio signal into a small set of morph-target weights
//! (`mouth_open`, `mouth_round`, `eyes_look_up`, `eyes_close`) for a 3D
//! avatar face rig, blending analyzer-driven speech motion with synthetic
//! idle and listening behavior. The renderer consuming the weights is a
//! pure downstream collaborator; any playable source exposing
//! play/pause/ended events and an analysis tap can drive the pipeline.

pub mod animation;
pub mod audio;
pub mod error;
pub mod scheduler;

pub use animation::{AnimationController, AnimationState, AvatarMorphTargets, PlaybackBinder};
pub use audio::{AnalyzerConfig, AudioSource, AudioTap, LipSyncAnalyzer, MouthTargets, WavPlayback};
pub use error::AvatarError;
pub use scheduler::{CancelHandle, FrameLoop};

/// Explicitly-owned composition root for one avatar session.
///
/// Owns the audio source, the animation controller, and the lifecycle
/// binding between them, with an explicit `destroy`. There is no implicit
/// global instance: callers that want one avatar per process hold one
/// context at their top level and pass it down.
pub struct AvatarContext<S: AudioSource> {
    source: S,
    controller: AnimationController,
    binder: PlaybackBinder,
    destroyed: bool,
}

impl<S: AudioSource> AvatarContext<S> {
    /// Bind the pipeline over `source` with the default playback analyzer
    /// configuration.
    pub fn new(source: S) -> Self {
        Self::build(source, None)
    }

    /// Bind with an explicit analyzer configuration.
    pub fn with_config(source: S, config: AnalyzerConfig) -> Self {
        Self::build(source, Some(config))
    }

    fn build(mut source: S, config: Option<AnalyzerConfig>) -> Self {
        let mut controller = AnimationController::new();
        let binder = match config {
            Some(config) => PlaybackBinder::bind_with(&mut source, &mut controller, config),
            None => PlaybackBinder::bind(&mut source, &mut controller),
        };
        Self {
            source,
            controller,
            binder,
            destroyed: false,
        }
    }

    /// One cooperative tick: poll the source, apply pending lifecycle
    /// events, recompute the morph frame. Returns the freshest frame.
    pub fn tick(&mut self, now_ms: f64) -> AvatarMorphTargets {
        if self.destroyed {
            return self.controller.current();
        }
        self.source.poll();
        self.binder.pump(&mut self.controller);
        self.controller.update(now_ms)
    }

    pub fn state(&self) -> AnimationState {
        self.controller.state()
    }

    pub fn current(&self) -> AvatarMorphTargets {
        self.controller.current()
    }

    pub fn start_listening(&mut self) {
        self.controller.start_listening();
    }

    pub fn stop_listening(&mut self) {
        self.controller.stop_listening();
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn controller(&self) -> &AnimationController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut AnimationController {
        &mut self.controller
    }

    /// Tear the binding down: deregister listeners, destroy the analyzer.
    /// Idempotent; the context keeps answering queries with its last frame.
    pub fn destroy(&mut self) {
        if !self.destroyed {
            self.binder.unbind(&mut self.source, &mut self.controller);
            self.destroyed = true;
        }
    }
}

impl<S: AudioSource> Drop for AvatarContext<S> {
    fn drop(&mut self) {
        self.destroy();
    }
}
