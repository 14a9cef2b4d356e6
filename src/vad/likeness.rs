//! Spectral voice-likeness filter for barge-in suppression.
//!
//! While the agent's audio is playing, the microphone picks up speaker
//! feedback, clicks, and table bangs that the energy classifier happily
//! calls speech. Before a frame may count toward a barge-in it must also
//! look like voice: sane energy, a plausible zero-crossing rate, most
//! spectral energy inside the voice bands, and a centroid where vowels
//! live. The filter is not consulted during normal listening.

use crate::audio::frame::{AudioFrame, FRAME_SAMPLES, SAMPLE_RATE};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Mean-squared energy bounds for plausible speech (normalized samples).
const MIN_MEAN_SQ: f32 = 1e-4;
const MAX_MEAN_SQ: f32 = 0.4;

/// Zero-crossing rate bounds.
const MIN_ZCR: f32 = 0.02;
const MAX_ZCR: f32 = 0.40;

/// Voice bands in Hz: fundamental, low formants, mid formants, sibilance.
const VOICE_BANDS: [(f32, f32); 4] = [
    (85.0, 255.0),
    (300.0, 900.0),
    (900.0, 2500.0),
    (2500.0, 3400.0),
];

/// Minimum share of spectral energy inside the combined voice bands.
const MIN_VOICE_BAND_RATIO: f32 = 0.40;
/// Maximum share of spectral energy above 3400 Hz.
const MAX_HIGH_BAND_RATIO: f32 = 0.40;
/// Maximum share of spectral energy below 85 Hz.
const MAX_LOW_BAND_RATIO: f32 = 0.30;

/// Spectral centroid bounds in Hz.
const MIN_CENTROID_HZ: f32 = 500.0;
const MAX_CENTROID_HZ: f32 = 2500.0;

/// Per-frame voice-likeness classifier.
pub struct VoiceLikeness {
    fft: Arc<dyn Fft<f32>>,
    spectrum: Vec<Complex<f32>>,
}

impl VoiceLikeness {
    /// Build the classifier (plans one 480-point FFT).
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FRAME_SAMPLES);
        Self {
            fft,
            spectrum: vec![Complex::default(); FRAME_SAMPLES],
        }
    }

    /// Whether a 30 ms frame plausibly contains voiced speech.
    pub fn is_voice_like(&mut self, frame: &AudioFrame) -> bool {
        let samples: Vec<f32> = frame
            .samples()
            .map(|s| f32::from(s) / f32::from(i16::MAX))
            .collect();
        if samples.len() != FRAME_SAMPLES {
            return false;
        }

        let mean_sq = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
        if !(MIN_MEAN_SQ..=MAX_MEAN_SQ).contains(&mean_sq) {
            return false;
        }

        let zcr = zero_crossing_rate(&samples);
        if !(MIN_ZCR..=MAX_ZCR).contains(&zcr) {
            return false;
        }

        for (i, s) in samples.iter().enumerate() {
            self.spectrum[i] = Complex::new(*s, 0.0);
        }
        self.fft.process(&mut self.spectrum);

        // Single-sided power spectrum, DC excluded.
        let half = FRAME_SAMPLES / 2;
        let bin_hz = SAMPLE_RATE as f32 / FRAME_SAMPLES as f32;
        let mut total = 0.0f32;
        let mut voice = 0.0f32;
        let mut high = 0.0f32;
        let mut low = 0.0f32;
        let mut weighted = 0.0f32;

        for k in 1..half {
            let power = self.spectrum[k].norm_sqr();
            let freq = k as f32 * bin_hz;
            total += power;
            weighted += freq * power;
            if VOICE_BANDS.iter().any(|(lo, hi)| freq >= *lo && freq < *hi) {
                voice += power;
            }
            if freq > 3400.0 {
                high += power;
            }
            if freq < 85.0 {
                low += power;
            }
        }

        if total <= f32::EPSILON {
            return false;
        }
        if voice / total < MIN_VOICE_BAND_RATIO {
            return false;
        }
        if high / total >= MAX_HIGH_BAND_RATIO {
            return false;
        }
        if low / total >= MAX_LOW_BAND_RATIO {
            return false;
        }

        let centroid = weighted / total;
        (MIN_CENTROID_HZ..=MAX_CENTROID_HZ).contains(&centroid)
    }
}

impl Default for VoiceLikeness {
    fn default() -> Self {
        Self::new()
    }
}

fn zero_crossing_rate(samples: &[f32]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let crossings = samples
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    crossings as f32 / (samples.len() - 1) as f32
}
