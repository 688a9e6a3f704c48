use log::{info, warn};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use std::cell::Cell;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::rc::Rc;
use std::time::Instant;

use super::source::{
    AudioSource, AudioTap, ListenerHandle, ListenerRegistry, PlaybackEvent,
};
use crate::error::AvatarError;

/// Wall-clock playhead accounting, shared between playback control and the
/// analysis tap through `Rc<Cell<_>>` (single logical thread, no locks).
#[derive(Debug, Clone, Copy)]
struct Playhead {
    playing: bool,
    /// Samples consumed before the most recent resume.
    base_samples: f64,
    resumed_at: Instant,
}

impl Playhead {
    fn stopped() -> Self {
        Self {
            playing: false,
            base_samples: 0.0,
            resumed_at: Instant::now(),
        }
    }

    fn position(&self, now: Instant, sample_rate: u32) -> f64 {
        if self.playing {
            self.base_samples + now.duration_since(self.resumed_at).as_secs_f64() * sample_rate as f64
        } else {
            self.base_samples
        }
    }
}

/// Rodio-backed playable audio source.
///
/// Decodes a file to a mono buffer at load time (the analysis signal),
/// plays it through a sink, and emits `Play`/`Pause` from the control calls
/// plus `Ended` exactly once when the sink drains.
pub struct WavPlayback {
    #[allow(dead_code)]
    stream: OutputStream,
    stream_handle: OutputStreamHandle,
    sink: Option<Sink>,
    samples: Rc<Vec<f32>>,
    sample_rate: u32,
    playhead: Rc<Cell<Playhead>>,
    listeners: ListenerRegistry,
    ended_emitted: bool,
}

impl WavPlayback {
    pub fn new() -> Result<Self, AvatarError> {
        let (stream, stream_handle) = OutputStream::try_default()
            .map_err(|e| AvatarError::ResourceUnavailable(format!("no audio output: {e}")))?;

        Ok(Self {
            stream,
            stream_handle,
            sink: None,
            samples: Rc::new(Vec::new()),
            sample_rate: 0,
            playhead: Rc::new(Cell::new(Playhead::stopped())),
            listeners: ListenerRegistry::new(),
            ended_emitted: false,
        })
    }

    /// Decode an audio file, keep a mono mixdown for analysis, and queue it
    /// on a paused sink for playback.
    pub fn load_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), AvatarError> {
        let open = |p: &Path| -> Result<Decoder<BufReader<File>>, AvatarError> {
            let file = File::open(p)
                .map_err(|e| AvatarError::ResourceUnavailable(format!("{}: {e}", p.display())))?;
            Decoder::new(BufReader::new(file))
                .map_err(|e| AvatarError::ResourceUnavailable(format!("decode failed: {e}")))
        };

        let source = open(path.as_ref())?;
        self.sample_rate = source.sample_rate();
        let channels = source.channels();

        // Mix down to mono for the analysis buffer.
        let samples: Vec<i16> = source.convert_samples().collect();
        let mono: Vec<f32> = samples
            .chunks_exact(channels as usize)
            .map(|chunk| {
                let sum: f32 = chunk.iter().map(|&s| s as f32 / 32768.0).sum();
                sum / channels as f32
            })
            .collect();
        self.samples = Rc::new(mono);

        // Load again for playback, since analysis consumed the decoder.
        let source = open(path.as_ref())?;
        let sink = Sink::try_new(&self.stream_handle)
            .map_err(|e| AvatarError::ResourceUnavailable(format!("no sink: {e}")))?;
        sink.append(source);
        sink.pause();
        self.sink = Some(sink);

        self.playhead.set(Playhead::stopped());
        self.ended_emitted = false;

        info!(
            "loaded audio file: {:?} ({} Hz, {} samples)",
            path.as_ref(),
            self.sample_rate,
            self.samples.len()
        );
        Ok(())
    }

    pub fn play(&mut self) {
        let Some(sink) = &self.sink else {
            warn!("play called with no audio loaded");
            return;
        };
        sink.play();

        let mut head = self.playhead.get();
        if !head.playing {
            head.playing = true;
            head.resumed_at = Instant::now();
            self.playhead.set(head);
        }
        self.listeners.emit(PlaybackEvent::Play);
        info!("audio playback started");
    }

    pub fn pause(&mut self) {
        let Some(sink) = &self.sink else { return };
        sink.pause();

        let mut head = self.playhead.get();
        if head.playing {
            head.base_samples = head.position(Instant::now(), self.sample_rate);
            head.playing = false;
            self.playhead.set(head);
        }
        self.listeners.emit(PlaybackEvent::Pause);
        info!("audio playback paused");
    }

    pub fn stop(&mut self) {
        if let Some(sink) = &self.sink {
            sink.stop();
        }
        self.playhead.set(Playhead::stopped());
        if !self.ended_emitted {
            self.ended_emitted = true;
            self.listeners.emit(PlaybackEvent::Ended);
        }
        info!("audio playback stopped");
    }

    pub fn set_volume(&self, volume: f32) {
        if let Some(sink) = &self.sink {
            sink.set_volume(volume.clamp(0.0, 1.0));
        }
    }

    pub fn is_playing(&self) -> bool {
        self.sink.as_ref().map_or(false, |sink| !sink.is_paused())
    }

    pub fn is_finished(&self) -> bool {
        self.sink.as_ref().map_or(true, |sink| sink.empty())
    }
}

impl AudioSource for WavPlayback {
    fn subscribe(&mut self, sender: crossbeam_channel::Sender<PlaybackEvent>) -> ListenerHandle {
        self.listeners.subscribe(sender)
    }

    fn unsubscribe(&mut self, handle: ListenerHandle) {
        self.listeners.unsubscribe(handle);
    }

    fn tap(&self) -> Option<Rc<dyn AudioTap>> {
        if self.samples.is_empty() || self.sample_rate == 0 {
            return None;
        }
        Some(Rc::new(WavTap {
            samples: Rc::clone(&self.samples),
            sample_rate: self.sample_rate,
            playhead: Rc::clone(&self.playhead),
        }))
    }

    fn resume(&mut self) -> Result<(), AvatarError> {
        if self.sink.is_some() {
            Ok(())
        } else {
            Err(AvatarError::TransientSuspension(
                "no sink; load an audio file first".into(),
            ))
        }
    }

    /// End-of-playback detection: rodio reports drain only by polling.
    fn poll(&mut self) {
        let drained = self
            .sink
            .as_ref()
            .map_or(false, |sink| sink.empty() && !sink.is_paused());
        if drained && !self.ended_emitted {
            self.ended_emitted = true;
            let mut head = self.playhead.get();
            head.playing = false;
            head.base_samples = self.samples.len() as f64;
            self.playhead.set(head);
            self.listeners.emit(PlaybackEvent::Ended);
            info!("audio playback finished");
        }
    }
}

/// Analysis tap over the decoded mono buffer, positioned by the shared
/// playhead.
struct WavTap {
    samples: Rc<Vec<f32>>,
    sample_rate: u32,
    playhead: Rc<Cell<Playhead>>,
}

impl AudioTap for WavTap {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn fill_window(&self, out: &mut [f32]) -> usize {
        out.fill(0.0);

        let head = self.playhead.get();
        let position = head.position(Instant::now(), self.sample_rate) as usize;
        let position = position.min(self.samples.len());

        let take = position.min(out.len());
        let window = &self.samples[position - take..position];
        let out_len = out.len();
        out[out_len - take..].copy_from_slice(window);
        take
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_playhead_advances_only_while_playing() {
        let start = Instant::now();
        let mut head = Playhead {
            playing: false,
            base_samples: 100.0,
            resumed_at: start,
        };
        let later = start + Duration::from_millis(500);
        assert_eq!(head.position(later, 44_100), 100.0);

        head.playing = true;
        head.resumed_at = start;
        let position = head.position(later, 44_100);
        assert!((position - (100.0 + 22_050.0)).abs() < 1.0);
    }

    #[test]
    fn test_tap_window_zero_pads_early_playback() {
        let playhead = Rc::new(Cell::new(Playhead {
            playing: false,
            base_samples: 4.0,
            resumed_at: Instant::now(),
        }));
        let tap = WavTap {
            samples: Rc::new(vec![0.5; 1000]),
            sample_rate: 44_100,
            playhead,
        };

        let mut out = [1.0f32; 8];
        let filled = tap.fill_window(&mut out);
        assert_eq!(filled, 4);
        assert_eq!(&out[..4], &[0.0; 4]);
        assert_eq!(&out[4..], &[0.5; 4]);
    }

    #[test]
    fn test_tap_window_clamps_past_end() {
        let playhead = Rc::new(Cell::new(Playhead {
            playing: false,
            base_samples: 1e9,
            resumed_at: Instant::now(),
        }));
        let tap = WavTap {
            samples: Rc::new(vec![0.25; 100]),
            sample_rate: 44_100,
            playhead,
        };

        let mut out = [0.0f32; 16];
        let filled = tap.fill_window(&mut out);
        assert_eq!(filled, 16);
        assert_eq!(out, [0.25; 16]);
    }
}
