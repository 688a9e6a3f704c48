use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, info};

use super::{AnimationState, AvatarMorphTargets};
use crate::audio::{LipSyncAnalyzer, PlaybackEvent};

/// Minimum time between recomputes. The host may tick faster (high-refresh
/// displays); extra ticks return the cached frame.
const MIN_UPDATE_INTERVAL_MS: f64 = 16.0;

/// Gaze rest position, and how far speech pushes it up.
const IDLE_GAZE: f32 = 0.1;
const LISTENING_GAZE: f32 = 0.2;
const SPEAKING_GAZE_GAIN: f32 = 0.2;
/// Extra gaze raise for loud, emphatic speech.
const EMPHASIS_THRESHOLD: f32 = 0.7;
const EMPHASIS_GAZE_BUMP: f32 = 0.1;

/// Mouth aperture held while listening.
const LISTENING_APERTURE: f32 = 0.1;

/// Frames buffered per subscriber before old ones are dropped.
const SUBSCRIBER_QUEUE: usize = 16;

/// Owns the [`AnimationState`] and drives a continuous stream of
/// [`AvatarMorphTargets`] at the render cadence, blending synthetic idle
/// motion with analyzer output.
///
/// Driven by the host's per-frame tick; self-throttles to ~60 recomputes
/// per second. All published frames are clamped and finite.
pub struct AnimationController {
    state: AnimationState,
    analyzer: Option<LipSyncAnalyzer>,
    current: AvatarMorphTargets,
    last_update_ms: Option<f64>,
    callbacks: Vec<Box<dyn FnMut(AvatarMorphTargets)>>,
    subscribers: Vec<Sender<AvatarMorphTargets>>,
}

impl AnimationController {
    pub fn new() -> Self {
        Self {
            state: AnimationState::Idle,
            analyzer: None,
            current: AvatarMorphTargets::NEUTRAL,
            last_update_ms: None,
            callbacks: Vec::new(),
            subscribers: Vec::new(),
        }
    }

    pub fn state(&self) -> AnimationState {
        self.state
    }

    /// The most recently published frame.
    pub fn current(&self) -> AvatarMorphTargets {
        self.current
    }

    /// Explicit caller intent: about to receive user input. Only entered
    /// from idle; active speech is never interrupted visually.
    pub fn start_listening(&mut self) {
        match self.state {
            AnimationState::Idle => self.set_state(AnimationState::Listening),
            other => debug!("start_listening ignored in state {:?}", other),
        }
    }

    /// Leave listening mode. A no-op while speaking, so that mid-playback
    /// stop-listening calls cannot truncate active lip-sync.
    pub fn stop_listening(&mut self) {
        match self.state {
            AnimationState::Listening => self.set_state(AnimationState::Idle),
            other => debug!("stop_listening ignored in state {:?}", other),
        }
    }

    /// Apply a playback lifecycle event from the bound audio source.
    pub fn handle_event(&mut self, event: PlaybackEvent) {
        match event {
            PlaybackEvent::Play => self.set_state(AnimationState::Speaking),
            PlaybackEvent::Pause | PlaybackEvent::Ended => {
                if self.state == AnimationState::Speaking {
                    self.set_state(AnimationState::Idle);
                }
            }
        }
    }

    /// Per-tick update. `now_ms` is the host's monotonic clock; recomputes
    /// are throttled to [`MIN_UPDATE_INTERVAL_MS`].
    pub fn update(&mut self, now_ms: f64) -> AvatarMorphTargets {
        if let Some(last) = self.last_update_ms {
            if now_ms - last < MIN_UPDATE_INTERVAL_MS {
                return self.current;
            }
        }
        self.last_update_ms = Some(now_ms);

        let frame = match self.state {
            AnimationState::Idle => breathing_frame(now_ms),
            AnimationState::Listening => AvatarMorphTargets {
                mouth_open: LISTENING_APERTURE,
                mouth_round: 0.0,
                eyes_look_up: LISTENING_GAZE,
                eyes_close: 0.0,
            },
            AnimationState::Speaking => match self.analyzer.as_mut() {
                Some(analyzer) => speaking_frame(analyzer.analyze(now_ms)),
                // Analyzer-less degradation: keep breathing rather than
                // freezing the face.
                None => breathing_frame(now_ms),
            },
        };

        self.current = frame.sanitized();
        self.publish();
        self.current
    }

    /// Hand the controller an initialized analyzer. Replaces (and destroys)
    /// any previous one.
    pub fn attach_analyzer(&mut self, analyzer: LipSyncAnalyzer) {
        if let Some(mut old) = self.analyzer.replace(analyzer) {
            old.destroy();
        }
    }

    /// Detach the analyzer, handing ownership back to the caller.
    pub fn detach_analyzer(&mut self) -> Option<LipSyncAnalyzer> {
        self.analyzer.take()
    }

    pub fn has_analyzer(&self) -> bool {
        self.analyzer.is_some()
    }

    /// Register a push-delivery callback, invoked on every recompute.
    pub fn on_frame(&mut self, callback: Box<dyn FnMut(AvatarMorphTargets)>) {
        self.callbacks.push(callback);
    }

    /// Subscribe to published frames over a bounded channel. When the
    /// consumer lags, newer frames are dropped until it catches up.
    pub fn subscribe(&mut self) -> Receiver<AvatarMorphTargets> {
        let (tx, rx) = bounded(SUBSCRIBER_QUEUE);
        self.subscribers.push(tx);
        rx
    }

    /// Copy of the analyzer's raw frequency snapshot, for debug overlays.
    /// `None` when no analyzer is bound.
    pub fn frequency_snapshot(&self) -> Option<Vec<u8>> {
        self.analyzer.as_ref().and_then(|a| a.snapshot_copy())
    }

    /// The analyzer's current call-rate estimate, if one is bound.
    pub fn analyzer_frame_rate(&self) -> Option<f32> {
        self.analyzer.as_ref().map(|a| a.frame_rate())
    }

    fn set_state(&mut self, state: AnimationState) {
        if self.state != state {
            info!("animation state {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    fn publish(&mut self) {
        let frame = self.current;
        for callback in self.callbacks.iter_mut() {
            callback(frame);
        }
        self.subscribers.retain(|tx| match tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

impl Default for AnimationController {
    fn default() -> Self {
        Self::new()
    }
}

/// Synthetic idle motion: a slow breathing oscillation of the jaw around a
/// slightly parted rest pose, ~3.14s period, with a constant slight upward
/// gaze. Deterministic in the time source, restartable.
fn breathing_frame(now_ms: f64) -> AvatarMorphTargets {
    let mouth_open = 0.15 + 0.1 * (now_ms * 0.002).sin() as f32;
    AvatarMorphTargets {
        mouth_open,
        mouth_round: 0.0,
        eyes_look_up: IDLE_GAZE,
        eyes_close: 0.0,
    }
}

/// Map analyzer output to the full morph vector, nudging the gaze upward
/// with loudness and bumping it past the emphasis threshold.
fn speaking_frame(mouth: crate::audio::MouthTargets) -> AvatarMorphTargets {
    let mut eyes_look_up = IDLE_GAZE + mouth.speech_intensity * SPEAKING_GAZE_GAIN;
    if mouth.speech_intensity > EMPHASIS_THRESHOLD {
        eyes_look_up += EMPHASIS_GAZE_BUMP;
    }
    AvatarMorphTargets {
        mouth_open: mouth.mouth_open,
        mouth_round: mouth.mouth_round,
        eyes_look_up,
        eyes_close: 0.0,
    }
}
