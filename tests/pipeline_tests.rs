//! End-to-end pipeline tests over an in-memory audio source: lifecycle
//! events drive the state machine while the analyzer shapes the mouth from
//! the tap's signal.

use crossbeam_channel::Sender;
use std::rc::Rc;

use avatar_lipsync::audio::source::ListenerRegistry;
use avatar_lipsync::{
    AnimationState, AudioSource, AudioTap, AvatarContext, AvatarError, MouthTargets,
};
use avatar_lipsync::audio::PlaybackEvent;

/// A 220 Hz tone, loud enough to open the mouth.
struct ToneTap;

impl AudioTap for ToneTap {
    fn sample_rate(&self) -> u32 {
        44_100
    }
    fn fill_window(&self, out: &mut [f32]) -> usize {
        for (i, sample) in out.iter_mut().enumerate() {
            *sample = (2.0 * std::f32::consts::PI * 220.0 * i as f32 / 44_100.0).sin();
        }
        out.len()
    }
}

/// Scriptable in-memory source standing in for real playback.
struct ScriptedSource {
    listeners: ListenerRegistry,
    playing: bool,
    remaining_ticks: u32,
}

impl ScriptedSource {
    fn with_duration(ticks: u32) -> Self {
        Self {
            listeners: ListenerRegistry::new(),
            playing: false,
            remaining_ticks: ticks,
        }
    }

    fn play(&mut self) {
        self.playing = true;
        self.listeners.emit(PlaybackEvent::Play);
    }

    fn pause(&mut self) {
        self.playing = false;
        self.listeners.emit(PlaybackEvent::Pause);
    }
}

impl AudioSource for ScriptedSource {
    fn subscribe(&mut self, sender: Sender<PlaybackEvent>) -> avatar_lipsync::audio::ListenerHandle {
        self.listeners.subscribe(sender)
    }
    fn unsubscribe(&mut self, handle: avatar_lipsync::audio::ListenerHandle) {
        self.listeners.unsubscribe(handle);
    }
    fn tap(&self) -> Option<Rc<dyn AudioTap>> {
        Some(Rc::new(ToneTap))
    }
    fn resume(&mut self) -> Result<(), AvatarError> {
        Ok(())
    }
    fn poll(&mut self) {
        if self.playing {
            if self.remaining_ticks == 0 {
                self.playing = false;
                self.listeners.emit(PlaybackEvent::Ended);
            } else {
                self.remaining_ticks -= 1;
            }
        }
    }
}

#[test]
fn speech_opens_mouth_then_playback_end_returns_to_idle() {
    let mut context = AvatarContext::new(ScriptedSource::with_duration(20));
    assert_eq!(context.state(), AnimationState::Idle);

    context.source_mut().play();

    let mut now = 0.0;
    let mut peak_mouth_open: f32 = 0.0;
    loop {
        let frame = context.tick(now);
        now += 16.7;

        assert!(frame.mouth_open.is_finite() && (0.0..=1.0).contains(&frame.mouth_open));
        assert!(frame.mouth_round.is_finite() && (0.0..=1.0).contains(&frame.mouth_round));
        assert!(frame.eyes_look_up.is_finite() && (0.0..=1.0).contains(&frame.eyes_look_up));

        if context.state() == AnimationState::Speaking {
            peak_mouth_open = peak_mouth_open.max(frame.mouth_open);
        }
        if context.state() == AnimationState::Idle && now > 100.0 {
            break;
        }
        assert!(now < 10_000.0, "playback never ended");
    }

    assert!(
        peak_mouth_open > 0.05,
        "a sustained tone should open the mouth, peak was {peak_mouth_open}"
    );
    assert_eq!(context.state(), AnimationState::Idle);
}

#[test]
fn pause_interrupts_speech() {
    let mut context = AvatarContext::new(ScriptedSource::with_duration(1000));

    context.source_mut().play();
    context.tick(0.0);
    assert_eq!(context.state(), AnimationState::Speaking);

    context.source_mut().pause();
    context.tick(20.0);
    assert_eq!(context.state(), AnimationState::Idle);
}

#[test]
fn listening_is_preserved_across_speech() {
    let mut context = AvatarContext::new(ScriptedSource::with_duration(1000));

    context.start_listening();
    context.tick(0.0);
    assert_eq!(context.state(), AnimationState::Listening);

    // Playback barges in over listening.
    context.source_mut().play();
    context.tick(20.0);
    assert_eq!(context.state(), AnimationState::Speaking);

    // Stopping listening mid-speech must not truncate the lip-sync.
    context.stop_listening();
    context.tick(40.0);
    assert_eq!(context.state(), AnimationState::Speaking);
}

#[test]
fn subscriber_sees_clamped_frames() {
    let mut context = AvatarContext::new(ScriptedSource::with_duration(50));
    let rx = context.controller_mut().subscribe();

    context.source_mut().play();
    for i in 0..10 {
        context.tick(i as f64 * 20.0);
    }

    let mut received = 0;
    while let Ok(frame) = rx.try_recv() {
        received += 1;
        for value in [
            frame.mouth_open,
            frame.mouth_round,
            frame.eyes_look_up,
            frame.eyes_close,
        ] {
            assert!(value.is_finite() && (0.0..=1.0).contains(&value));
        }
    }
    assert!(received > 0);
}

#[test]
fn destroy_is_idempotent_and_ticks_stay_safe() {
    let mut context = AvatarContext::new(ScriptedSource::with_duration(100));
    context.source_mut().play();
    context.tick(0.0);
    assert_eq!(context.state(), AnimationState::Speaking);

    context.destroy();
    context.destroy();

    // Ticks after teardown return the last frame and never panic.
    let frame = context.tick(100.0);
    assert_eq!(frame, context.current());
    assert!(!context.controller().has_analyzer());
}

#[test]
fn silent_signal_keeps_mouth_shut_while_speaking() {
    struct SilentTap;
    impl AudioTap for SilentTap {
        fn sample_rate(&self) -> u32 {
            44_100
        }
        fn fill_window(&self, out: &mut [f32]) -> usize {
            out.fill(0.0);
            out.len()
        }
    }

    struct SilentSource {
        listeners: ListenerRegistry,
    }
    impl AudioSource for SilentSource {
        fn subscribe(
            &mut self,
            sender: Sender<PlaybackEvent>,
        ) -> avatar_lipsync::audio::ListenerHandle {
            self.listeners.subscribe(sender)
        }
        fn unsubscribe(&mut self, handle: avatar_lipsync::audio::ListenerHandle) {
            self.listeners.unsubscribe(handle);
        }
        fn tap(&self) -> Option<Rc<dyn AudioTap>> {
            Some(Rc::new(SilentTap))
        }
        fn resume(&mut self) -> Result<(), AvatarError> {
            Ok(())
        }
        fn poll(&mut self) {}
    }

    let source = SilentSource {
        listeners: ListenerRegistry::new(),
    };
    // Emit Play manually after binding through the context.
    let mut context = AvatarContext::new(source);
    context.source_mut().listeners.emit(PlaybackEvent::Play);

    let first = context.tick(0.0);
    assert_eq!(context.state(), AnimationState::Speaking);
    assert_eq!(
        MouthTargets {
            mouth_open: first.mouth_open,
            mouth_round: first.mouth_round,
            speech_intensity: 0.0
        },
        MouthTargets::ZERO
    );
}
