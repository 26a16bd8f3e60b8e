//! Frame clock
//!
//! Decides, sample by sample, when the song's play routine is due. The
//! accumulator is advanced before the comparison so that after `k` frame
//! periods' worth of samples exactly `k` frames have fired.

pub use crate::psid::FrameTiming;

/// Default host sample rate
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Sample-driven frame scheduler
#[derive(Debug, Clone)]
pub struct FrameClock {
    timing: FrameTiming,
    sample_rate: u32,
    /// Samples accumulated since the last frame
    accumulator: f64,
    /// Frames fired since the last reset
    frame_count: u64,
    /// Play time represented by the fired frames
    elapsed_ms: f64,
}

impl FrameClock {
    /// Create a clock for `timing` at `sample_rate`.
    pub fn new(timing: FrameTiming, sample_rate: u32) -> Self {
        FrameClock {
            timing,
            sample_rate,
            accumulator: 0.0,
            frame_count: 0,
            elapsed_ms: 0.0,
        }
    }

    /// Samples between two frames (fractional)
    pub fn samples_per_frame(&self) -> f64 {
        self.sample_rate as f64 / self.timing.frame_rate()
    }

    /// Clock by one output sample. Returns true when a frame is due.
    pub fn clock(&mut self) -> bool {
        let threshold = self.samples_per_frame();
        if threshold <= 0.0 {
            return false;
        }
        self.accumulator += 1.0;
        if self.accumulator >= threshold {
            self.accumulator -= threshold;
            self.frame_count += 1;
            self.elapsed_ms += 1000.0 / self.timing.frame_rate();
            true
        } else {
            false
        }
    }

    /// Clear accumulator, frame count and elapsed time.
    pub fn reset(&mut self) {
        self.accumulator = 0.0;
        self.frame_count = 0;
        self.elapsed_ms = 0.0;
    }

    /// Active timing
    pub fn timing(&self) -> FrameTiming {
        self.timing
    }

    /// Switch timing; the accumulator carries over.
    pub fn set_timing(&mut self, timing: FrameTiming) {
        self.timing = timing;
    }

    /// Host sample rate the clock counts in
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Change the host sample rate; the accumulator carries over.
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
    }

    /// Frames fired since the last reset
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Elapsed play time in milliseconds
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed_ms
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new(FrameTiming::Pal, DEFAULT_SAMPLE_RATE)
    }
}
