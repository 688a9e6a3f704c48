use crossbeam_channel::{bounded, Receiver};
use log::{info, warn};

use super::controller::AnimationController;
use crate::audio::{AnalyzerConfig, AudioSource, LipSyncAnalyzer, ListenerHandle, PlaybackEvent};

/// Events queued between source callbacks and the per-tick pump.
const EVENT_QUEUE: usize = 32;

/// Smoothing used for playback-driven lip-sync. Conservative: responsive
/// enough for speech onsets without visible jitter.
const PLAYBACK_SMOOTHING: f32 = 0.3;

/// Desktop-class resolution for playback analysis.
const PLAYBACK_FFT_SIZE: usize = 256;

/// Wires a playable audio resource's lifecycle events to the controller's
/// state transitions, and owns analyzer construction and teardown.
///
/// Bind acquires a listener registration and the analysis tap; unbind
/// deregisters exactly once and destroys the analyzer. No handles outlive
/// the bound lifetime.
pub struct PlaybackBinder {
    events: Receiver<PlaybackEvent>,
    listener: Option<ListenerHandle>,
}

impl PlaybackBinder {
    /// Bind with the default playback analyzer configuration.
    pub fn bind(source: &mut dyn AudioSource, controller: &mut AnimationController) -> Self {
        let config = AnalyzerConfig {
            fft_size: PLAYBACK_FFT_SIZE,
            smoothing_factor: PLAYBACK_SMOOTHING,
            ..AnalyzerConfig::default()
        };
        Self::bind_with(source, controller, config)
    }

    /// Bind with an explicit analyzer configuration.
    pub fn bind_with(
        source: &mut dyn AudioSource,
        controller: &mut AnimationController,
        config: AnalyzerConfig,
    ) -> Self {
        // Platform wake-up is opportunistic; a still-suspended context just
        // means silence until the next bind attempt.
        if let Err(e) = source.resume() {
            warn!("audio context resume failed (non-fatal): {e}");
        }

        let (tx, events) = bounded(EVENT_QUEUE);
        let listener = source.subscribe(tx);

        let mut analyzer = LipSyncAnalyzer::new(config);
        match source.tap() {
            Some(tap) => analyzer.initialize(tap),
            None => warn!("audio source has no analysis tap"),
        }

        if analyzer.is_ready() {
            controller.attach_analyzer(analyzer);
            info!("playback bound with live lip-sync analyzer");
        } else {
            // Analyzer-less degradation: the avatar keeps idle/listening
            // behavior and playback events still drive state.
            warn!("lip-sync analyzer unavailable; avatar limited to idle motion");
        }

        Self {
            events,
            listener: Some(listener),
        }
    }

    /// Drain pending playback events into controller transitions. Called
    /// once per tick from the frame loop.
    pub fn pump(&mut self, controller: &mut AnimationController) {
        while let Ok(event) = self.events.try_recv() {
            controller.handle_event(event);
        }
    }

    /// Deregister the listener and destroy the analyzer. Idempotent; after
    /// this the binder holds nothing on the source or controller.
    pub fn unbind(&mut self, source: &mut dyn AudioSource, controller: &mut AnimationController) {
        if let Some(handle) = self.listener.take() {
            source.unsubscribe(handle);
        }
        if let Some(mut analyzer) = controller.detach_analyzer() {
            analyzer.destroy();
        }
        // A stale queued event must not resurrect a dead binding.
        while self.events.try_recv().is_ok() {}
    }

    pub fn is_bound(&self) -> bool {
        self.listener.is_some()
    }
}
