//! Shared multimode filter
//!
//! One RBJ biquad in low-, band- or high-pass configuration. Coefficients are
//! only recomputed when cutoff, resonance, mode or sample rate change.

use std::f32::consts::PI;

const CUTOFF_MIN_HZ: f32 = 30.0;
const CUTOFF_RANGE_HZ: f32 = 11_970.0;
const Q_MIN: f32 = 0.5;
const Q_RANGE: f32 = 9.5;
/// Keep the cutoff clear of Nyquist at low host sample rates
const NYQUIST_GUARD: f32 = 0.45;

/// Filter response selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    /// Bypass: routed voices pass through unchanged
    #[default]
    Off,
    /// Low-pass
    LowPass,
    /// Band-pass
    BandPass,
    /// High-pass
    HighPass,
}

#[derive(Debug, Clone, Copy, Default)]
struct Coefficients {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

/// Resonant multimode filter with per-voice routing
#[derive(Debug, Clone)]
pub struct Filter {
    mode: FilterMode,
    cutoff: f32,
    resonance: f32,
    routing: [bool; 3],
    sample_rate: f32,
    coeffs: Coefficients,
    dirty: bool,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl Filter {
    /// Create a bypassed filter at the lowest cutoff, matching `$15/$16 = 0`.
    pub fn new(sample_rate: f32) -> Self {
        Filter {
            mode: FilterMode::Off,
            cutoff: 0.0,
            resonance: 0.0,
            routing: [false; 3],
            sample_rate,
            coeffs: Coefficients::default(),
            dirty: true,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    /// Clear history and routing; keep the sample rate.
    pub fn reset(&mut self) {
        *self = Filter::new(self.sample_rate);
    }

    /// Current response
    pub fn mode(&self) -> FilterMode {
        self.mode
    }

    /// Normalized cutoff 0.0..=1.0
    pub fn cutoff(&self) -> f32 {
        self.cutoff
    }

    /// Normalized resonance 0.0..=1.0
    pub fn resonance(&self) -> f32 {
        self.resonance
    }

    /// Whether `voice` is routed through the filter
    pub fn routes(&self, voice: usize) -> bool {
        self.routing.get(voice).copied().unwrap_or(false)
    }

    /// Select the filter response.
    pub fn set_mode(&mut self, mode: FilterMode) {
        if self.mode != mode {
            self.mode = mode;
            self.dirty = true;
        }
    }

    /// Set normalized cutoff (clamped to 0.0..=1.0).
    pub fn set_cutoff(&mut self, cutoff: f32) {
        let cutoff = cutoff.clamp(0.0, 1.0);
        if self.cutoff != cutoff {
            self.cutoff = cutoff;
            self.dirty = true;
        }
    }

    /// Set normalized resonance (clamped to 0.0..=1.0).
    pub fn set_resonance(&mut self, resonance: f32) {
        let resonance = resonance.clamp(0.0, 1.0);
        if self.resonance != resonance {
            self.resonance = resonance;
            self.dirty = true;
        }
    }

    /// Route a voice through (or around) the filter.
    pub fn set_routing(&mut self, voice: usize, enabled: bool) {
        if let Some(slot) = self.routing.get_mut(voice) {
            *slot = enabled;
        }
    }

    /// Change the sample rate used for coefficient design.
    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        if self.sample_rate != sample_rate {
            self.sample_rate = sample_rate;
            self.dirty = true;
        }
    }

    /// Cutoff in Hz for the current settings
    pub fn cutoff_hz(&self) -> f32 {
        let hz = CUTOFF_MIN_HZ + self.cutoff * CUTOFF_RANGE_HZ;
        hz.min(self.sample_rate * NYQUIST_GUARD)
    }

    /// Quality factor for the current resonance
    pub fn q(&self) -> f32 {
        Q_MIN + self.resonance * Q_RANGE
    }

    fn update_coefficients(&mut self) {
        self.dirty = false;
        if self.sample_rate <= 0.0 {
            self.coeffs = Coefficients::default();
            return;
        }
        let w0 = 2.0 * PI * self.cutoff_hz() / self.sample_rate;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * self.q());

        let (b0, b1, b2) = match self.mode {
            FilterMode::Off => return,
            FilterMode::LowPass => ((1.0 - cos_w0) * 0.5, 1.0 - cos_w0, (1.0 - cos_w0) * 0.5),
            FilterMode::BandPass => (alpha, 0.0, -alpha),
            FilterMode::HighPass => ((1.0 + cos_w0) * 0.5, -(1.0 + cos_w0), (1.0 + cos_w0) * 0.5),
        };
        let a0 = 1.0 + alpha;
        self.coeffs = Coefficients {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha) / a0,
        };
    }

    /// Filter one sample.
    pub fn process(&mut self, input: f32) -> f32 {
        if self.mode == FilterMode::Off {
            return input;
        }
        if self.dirty {
            self.update_coefficients();
        }
        let c = self.coeffs;
        let output = c.b0 * input + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;
        output
    }
}
