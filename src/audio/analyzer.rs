use log::{debug, info, warn};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use std::sync::Arc;

use super::pool::SnapshotPool;
use super::source::AudioTap;
use super::MouthTargets;
use crate::error::AvatarError;

/// Sensitivity boosts applied to the band means before clamping.
/// Empirical values tuned for perceptual plausibility; changing them is a
/// product decision, not a bug fix.
const JAW_SENSITIVITY: f32 = 3.0;
const ROUNDING_SENSITIVITY: f32 = 2.5;
const INTENSITY_SENSITIVITY: f32 = 4.0;

/// Fractional band boundaries over the bins, low to high.
const JAW_BAND_END: f32 = 0.2;
const ROUNDING_BAND_END: f32 = 0.8;

/// Below this estimated call rate, full recomputation runs on alternating
/// calls only.
const MIN_FULL_RATE_FPS: f32 = 30.0;

/// Weight of the instantaneous sample in the call-rate moving average.
const FPS_EMA_WEIGHT: f32 = 0.1;

/// Analyzer parameters, immutable after construction.
///
/// To change the configuration, destroy the analyzer and build a new one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Frequency-domain resolution. Must be a power of two; out-of-range or
    /// non-power-of-two values are clamped at construction.
    pub fft_size: usize,
    /// Weight of the newest sample in the mouth-target moving average,
    /// in `(0, 1]`.
    pub smoothing_factor: f32,
    /// Lower bound of the analyzed frequency range, Hz. `None` analyzes
    /// from the first bin.
    #[serde(default)]
    pub min_frequency: Option<f32>,
    /// Upper bound of the analyzed frequency range, Hz. `None` analyzes up
    /// to the last bin.
    #[serde(default)]
    pub max_frequency: Option<f32>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            fft_size: default_fft_size(),
            smoothing_factor: 0.3,
            min_frequency: None,
            max_frequency: None,
        }
    }
}

/// Platform default resolution: constrained targets get the smaller size,
/// roughly halving per-snapshot cost.
fn default_fft_size() -> usize {
    if cfg!(any(target_os = "android", target_os = "ios", target_arch = "wasm32")) {
        128
    } else {
        256
    }
}

impl AnalyzerConfig {
    /// Strict validation for externally supplied configuration. The
    /// analyzer itself clamps bad values instead; this is for callers that
    /// want to reject them up front.
    pub fn validate(&self) -> Result<(), AvatarError> {
        if !self.fft_size.is_power_of_two() || !(32..=16384).contains(&self.fft_size) {
            return Err(AvatarError::InvalidConfiguration(format!(
                "fft_size must be a power of two in 32..=16384, got {}",
                self.fft_size
            )));
        }
        if !self.smoothing_factor.is_finite()
            || self.smoothing_factor <= 0.0
            || self.smoothing_factor > 1.0
        {
            return Err(AvatarError::InvalidConfiguration(format!(
                "smoothing_factor must be in (0, 1], got {}",
                self.smoothing_factor
            )));
        }
        if let (Some(lo), Some(hi)) = (self.min_frequency, self.max_frequency) {
            if lo > hi {
                return Err(AvatarError::InvalidConfiguration(format!(
                    "min_frequency {lo} above max_frequency {hi}"
                )));
            }
        }
        Ok(())
    }

    /// Clamp every field into its valid range, logging each adjustment.
    /// Guarantees the per-frame path can never see a NaN-producing config.
    fn sanitized(mut self) -> Self {
        if !self.fft_size.is_power_of_two() || !(32..=16384).contains(&self.fft_size) {
            let fixed = self.fft_size.next_power_of_two().clamp(32, 16384);
            warn!(
                "fft_size {} is not a valid power of two, using {}",
                self.fft_size, fixed
            );
            self.fft_size = fixed;
        }
        if !self.smoothing_factor.is_finite()
            || self.smoothing_factor <= 0.0
            || self.smoothing_factor > 1.0
        {
            warn!(
                "smoothing_factor {} out of (0, 1], using 0.3",
                self.smoothing_factor
            );
            self.smoothing_factor = 0.3;
        }
        if let (Some(lo), Some(hi)) = (self.min_frequency, self.max_frequency) {
            if lo > hi {
                warn!("min_frequency {lo} above max_frequency {hi}, swapping");
                self.min_frequency = Some(hi);
                self.max_frequency = Some(lo);
            }
        }
        self
    }
}

/// Converts a live audio signal into three `[0, 1]` mouth scalars, once per
/// call, with bounded cost and temporal jitter suppression.
///
/// Construction captures parameters only; [`LipSyncAnalyzer::initialize`]
/// binds the audio tap. A non-ready analyzer degrades every query to
/// [`MouthTargets::ZERO`] rather than failing, so the animation pipeline
/// keeps rendering idle motion when no audio is available.
pub struct LipSyncAnalyzer {
    config: AnalyzerConfig,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    fft_buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    time_window: Vec<f32>,
    pool: SnapshotPool,
    snapshot: Option<Vec<u8>>,
    tap: Option<Rc<dyn AudioTap>>,
    /// Analyzed slice of the snapshot, resolved from the frequency range
    /// and the tap's sample rate at initialization.
    bin_range: (usize, usize),
    smoothed_open: f32,
    smoothed_round: f32,
    fps_estimate: f32,
    last_call_ms: Option<f64>,
    skip_phase: bool,
}

impl LipSyncAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        let config = config.sanitized();
        let fft_size = config.fft_size;
        let bin_count = fft_size / 2;

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);
        let scratch_len = fft.get_inplace_scratch_len();

        let window = hann_window(fft_size);

        Self {
            config,
            fft,
            window,
            fft_buffer: vec![Complex::new(0.0, 0.0); fft_size],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            time_window: vec![0.0; fft_size],
            pool: SnapshotPool::new(bin_count),
            snapshot: None,
            tap: None,
            bin_range: (0, bin_count),
            smoothed_open: 0.0,
            smoothed_round: 0.0,
            fps_estimate: 60.0,
            last_call_ms: None,
            skip_phase: false,
        }
    }

    /// Bind the analyzer to an audio tap. Failure leaves it non-ready and
    /// is logged, never raised; calling again while initialized is a no-op.
    pub fn initialize(&mut self, tap: Rc<dyn AudioTap>) {
        if self.tap.is_some() {
            debug!("analyzer already initialized, ignoring rebind");
            return;
        }

        let sample_rate = tap.sample_rate();
        if sample_rate == 0 {
            warn!("audio tap reports no sample rate; analyzer stays non-ready");
            return;
        }

        self.bin_range = resolve_bin_range(&self.config, sample_rate);
        self.snapshot = Some(self.pool.acquire());
        self.tap = Some(tap);

        info!(
            "lip-sync analyzer bound: fft_size={}, bins {}..{}, {} Hz",
            self.config.fft_size, self.bin_range.0, self.bin_range.1, sample_rate
        );
    }

    /// Whether a tap is bound and snapshots can be captured.
    pub fn is_ready(&self) -> bool {
        self.tap.is_some() && self.snapshot.is_some()
    }

    /// The core per-frame operation. Total: never panics, never returns NaN.
    ///
    /// `now_ms` is the caller's monotonic clock in milliseconds; successive
    /// deltas feed the call-rate estimate that drives the frame-skip policy.
    pub fn analyze(&mut self, now_ms: f64) -> MouthTargets {
        if !self.is_ready() {
            return MouthTargets::ZERO;
        }

        self.update_rate_estimate(now_ms);

        // Congested: halve temporal resolution, returning the previous
        // smoothed mouth shape with intensity forced low so a stale value
        // can never read as loud speech.
        if self.fps_estimate < MIN_FULL_RATE_FPS {
            self.skip_phase = !self.skip_phase;
            if self.skip_phase {
                return MouthTargets {
                    mouth_open: self.smoothed_open,
                    mouth_round: self.smoothed_round,
                    speech_intensity: 0.0,
                };
            }
        } else {
            self.skip_phase = false;
        }

        self.capture_snapshot();
        let raw = self.band_targets();

        let alpha = self.config.smoothing_factor;
        self.smoothed_open = ema(self.smoothed_open, raw.mouth_open, alpha);
        self.smoothed_round = ema(self.smoothed_round, raw.mouth_round, alpha);

        MouthTargets {
            mouth_open: self.smoothed_open,
            mouth_round: self.smoothed_round,
            speech_intensity: raw.speech_intensity,
        }
    }

    /// Release the tap and pooled buffers and return to non-initialized.
    /// Safe to call any number of times.
    pub fn destroy(&mut self) {
        if self.tap.take().is_some() {
            debug!("analyzer released audio tap");
        }
        if let Some(buffer) = self.snapshot.take() {
            self.pool.release(buffer);
        }
        self.smoothed_open = 0.0;
        self.smoothed_round = 0.0;
        self.fps_estimate = 60.0;
        self.last_call_ms = None;
        self.skip_phase = false;
    }

    /// Copy of the current raw frequency snapshot, for debug overlays only.
    /// The live buffer is never exposed.
    pub fn snapshot_copy(&self) -> Option<Vec<u8>> {
        self.snapshot.clone()
    }

    /// Current estimate of the analyze() call rate, calls per second.
    pub fn frame_rate(&self) -> f32 {
        self.fps_estimate
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    fn update_rate_estimate(&mut self, now_ms: f64) {
        if let Some(last) = self.last_call_ms {
            let delta = now_ms - last;
            if delta > 0.0 {
                let instantaneous = (1000.0 / delta) as f32;
                self.fps_estimate =
                    self.fps_estimate * (1.0 - FPS_EMA_WEIGHT) + instantaneous * FPS_EMA_WEIGHT;
            }
        }
        self.last_call_ms = Some(now_ms);
    }

    /// Pull one time-domain window from the tap and write byte magnitudes
    /// into the pooled snapshot.
    fn capture_snapshot(&mut self) {
        let Some(tap) = self.tap.as_ref() else { return };
        let Some(snapshot) = self.snapshot.as_mut() else { return };

        self.time_window.fill(0.0);
        tap.fill_window(&mut self.time_window);

        // A hostile tap can hand back NaN/Inf; scrub before it contaminates
        // the spectrum.
        for sample in self.time_window.iter_mut() {
            if !sample.is_finite() {
                *sample = 0.0;
            }
        }

        for i in 0..self.config.fft_size {
            self.fft_buffer[i] = Complex::new(self.time_window[i] * self.window[i], 0.0);
        }
        self.fft.process_with_scratch(&mut self.fft_buffer, &mut self.scratch);

        let norm = 2.0 / self.config.fft_size as f32;
        for (bin, out) in snapshot.iter_mut().enumerate() {
            let magnitude = self.fft_buffer[bin].norm() * norm;
            *out = (magnitude * 255.0).clamp(0.0, 255.0) as u8;
        }
    }

    /// Band-energy heuristics over the analyzed bins, ascending frequency:
    /// low band tracks jaw aperture, the mid band lip rounding, the full
    /// range overall loudness. Means are normalized, boosted, then clamped
    /// back into the unit interval (the boost may overshoot).
    fn band_targets(&self) -> MouthTargets {
        let Some(snapshot) = self.snapshot.as_deref() else {
            return MouthTargets::ZERO;
        };
        let (lo, hi) = self.bin_range;
        let bins = &snapshot[lo..hi];
        if bins.is_empty() {
            return MouthTargets::ZERO;
        }

        let n = bins.len();
        let jaw_end = ((n as f32 * JAW_BAND_END) as usize).max(1).min(n);
        let rounding_end = ((n as f32 * ROUNDING_BAND_END) as usize).max(jaw_end).min(n);

        let mouth_open = (byte_mean(&bins[..jaw_end]) * JAW_SENSITIVITY).clamp(0.0, 1.0);
        let mouth_round =
            (byte_mean(&bins[jaw_end..rounding_end]) * ROUNDING_SENSITIVITY).clamp(0.0, 1.0);
        let speech_intensity = (byte_mean(bins) * INTENSITY_SENSITIVITY).clamp(0.0, 1.0);

        MouthTargets {
            mouth_open,
            mouth_round,
            speech_intensity,
        }
    }
}

impl Drop for LipSyncAnalyzer {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Exponential moving average: the configured factor weighs the new sample.
fn ema(previous: f32, current: f32, factor: f32) -> f32 {
    previous * (1.0 - factor) + current * factor
}

/// Normalized mean of byte magnitudes. Empty slices are silent, not NaN.
fn byte_mean(bins: &[u8]) -> f32 {
    if bins.is_empty() {
        return 0.0;
    }
    let sum: u32 = bins.iter().map(|&b| b as u32).sum();
    sum as f32 / bins.len() as f32 / 255.0
}

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| {
            let phase = 2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32;
            0.5 * (1.0 - phase.cos())
        })
        .collect()
}

/// Resolve the configured frequency range to snapshot bin indices.
fn resolve_bin_range(config: &AnalyzerConfig, sample_rate: u32) -> (usize, usize) {
    let bin_count = config.fft_size / 2;
    let bin_width = sample_rate as f32 / config.fft_size as f32;

    let lo = config
        .min_frequency
        .map(|f| (f.max(0.0) / bin_width) as usize)
        .unwrap_or(0)
        .min(bin_count);
    let hi = config
        .max_frequency
        .map(|f| (f.max(0.0) / bin_width).ceil() as usize)
        .unwrap_or(bin_count)
        .clamp(lo, bin_count);

    (lo, hi)
}
