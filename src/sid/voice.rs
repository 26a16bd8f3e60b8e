//! Oscillator voice: 24-bit phase accumulator, waveform generators, noise
//! LFSR and ADSR envelope.

use super::envelope::Envelope;
use bitflags::bitflags;

bitflags! {
    /// Waveform selection. Bit positions match the upper nibble of the
    /// chip's control register shifted down by four.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Waveform: u8 {
        /// Triangle
        const TRIANGLE = 0x01;
        /// Sawtooth
        const SAWTOOTH = 0x02;
        /// Pulse (uses the pulse width)
        const PULSE = 0x04;
        /// Noise, overrides the other bits
        const NOISE = 0x08;
    }
}

/// 24-bit accumulator mask
pub const PHASE_MASK: u32 = 0x00FF_FFFF;
const PHASE_SCALE: f32 = 16_777_216.0;
const PHASE_MSB: u32 = 0x0080_0000;
const NOISE_CLOCK_BIT: u32 = 0x0008_0000;
const LFSR_MASK: u32 = 0x007F_FFFF;
const LFSR_SEED: u32 = 0x007F_FFF8;
const PULSE_WIDTH_MIN: f32 = 0.005;
const PULSE_WIDTH_MAX: f32 = 0.995;
const PITCH_BEND_RANGE: f32 = 1.0;

/// Equal-tempered frequency of a MIDI note
pub fn note_to_hz(note: u8) -> f32 {
    440.0 * 2.0f32.powf((note as f32 - 69.0) / 12.0)
}

/// One of the three synthesizer voices
#[derive(Debug, Clone)]
pub struct Voice {
    pub(crate) waveform: Waveform,
    pub(crate) pulse_width: f32,
    pub(crate) phase: u32,
    increment: u32,
    pub(crate) envelope: Envelope,
    pub(crate) ring_mod: bool,
    pub(crate) sync: bool,
    pub(crate) test: bool,
    note: Option<u8>,
    velocity: u8,
    pitch_bend: f32,
    lfsr: u32,
    pub(crate) muted: bool,
    output: f32,
}

impl Voice {
    /// Create a silent voice.
    pub fn new() -> Self {
        Voice {
            waveform: Waveform::empty(),
            pulse_width: 0.5,
            phase: 0,
            increment: 0,
            envelope: Envelope::new(),
            ring_mod: false,
            sync: false,
            test: false,
            note: None,
            velocity: 0,
            pitch_bend: 0.0,
            lfsr: LFSR_SEED,
            muted: false,
            output: 0.0,
        }
    }

    /// Silence the voice and clear oscillator state. Mute survives.
    pub fn reset(&mut self) {
        let muted = self.muted;
        *self = Voice::new();
        self.muted = muted;
    }

    /// Currently sounding (or releasing) note
    pub fn note(&self) -> Option<u8> {
        self.note
    }

    /// Velocity of the current note
    pub fn velocity(&self) -> u8 {
        self.velocity
    }

    /// Pitch bend in octaves
    pub fn pitch_bend(&self) -> f32 {
        self.pitch_bend
    }

    /// Selected waveforms
    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    /// Phase accumulator (24 bits)
    pub fn phase(&self) -> u32 {
        self.phase
    }

    /// Phase increment per sample
    pub fn increment(&self) -> u32 {
        self.increment
    }

    /// Envelope state
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Last rendered output, post-envelope
    pub fn output(&self) -> f32 {
        self.output
    }

    /// Set pulse width from the 12-bit register value.
    pub fn set_pulse_width(&mut self, raw: u16) {
        self.pulse_width = (raw & 0x0FFF) as f32 / 4096.0;
    }

    /// TEST bit: hold the oscillator at zero and reset noise.
    pub fn set_test(&mut self, test: bool) {
        self.test = test;
        if test {
            self.phase = 0;
            self.lfsr = LFSR_SEED;
        }
    }

    pub(crate) fn note_on(&mut self, note: u8, velocity: u8, sample_rate: f32) {
        self.note = Some(note);
        self.velocity = velocity.min(127);
        self.pitch_bend = 0.0;
        self.retune(sample_rate);
        self.envelope.trigger();
    }

    pub(crate) fn note_off(&mut self) {
        self.envelope.release();
    }

    pub(crate) fn set_pitch_bend(&mut self, octaves: f32, sample_rate: f32) {
        self.pitch_bend = octaves.clamp(-PITCH_BEND_RANGE, PITCH_BEND_RANGE);
        self.retune(sample_rate);
    }

    pub(crate) fn retune(&mut self, sample_rate: f32) {
        self.increment = match self.note {
            Some(note) if sample_rate > 0.0 => {
                let hz = note_to_hz(note) * 2.0f32.powf(self.pitch_bend);
                ((hz * PHASE_SCALE / sample_rate) as u32).min(PHASE_MASK)
            }
            _ => 0,
        };
    }

    /// Advance the accumulator one sample. Returns true when it wrapped.
    pub(crate) fn advance(&mut self) -> bool {
        if self.test {
            self.phase = 0;
            self.lfsr = LFSR_SEED;
            return false;
        }
        let previous = self.phase;
        self.phase = (previous + self.increment) & PHASE_MASK;
        if previous & NOISE_CLOCK_BIT == 0 && self.phase & NOISE_CLOCK_BIT != 0 {
            self.clock_noise();
        }
        self.phase < previous
    }

    pub(crate) fn phase_msb(&self) -> bool {
        self.phase & PHASE_MSB != 0
    }

    fn clock_noise(&mut self) {
        let bit = ((self.lfsr >> 22) ^ (self.lfsr >> 17)) & 1;
        self.lfsr = ((self.lfsr << 1) | bit) & LFSR_MASK;
    }

    /// Render one sample. `ring_source_msb` is the MSB of the modulating
    /// neighbour's accumulator.
    pub(crate) fn render(&mut self, ring_source_msb: bool, dt: f32) -> f32 {
        if self.test {
            self.output = 0.0;
            return 0.0;
        }
        let level = self.envelope.clock(dt);
        if level <= 0.0 {
            self.output = 0.0;
            return 0.0;
        }
        let wave = self.waveform_output(ring_source_msb);
        self.output = wave * level * (self.velocity as f32 / 127.0);
        self.output
    }

    fn waveform_output(&self, ring_source_msb: bool) -> f32 {
        if self.waveform.contains(Waveform::NOISE) {
            return self.noise();
        }

        let mut sum = 0.0;
        let mut count = 0;
        if self.waveform.contains(Waveform::TRIANGLE) {
            let phase = if self.ring_mod && ring_source_msb {
                self.phase ^ PHASE_MSB
            } else {
                self.phase
            };
            sum += triangle(phase);
            count += 1;
        }
        if self.waveform.contains(Waveform::SAWTOOTH) {
            sum += sawtooth(self.phase);
            count += 1;
        }
        if self.waveform.contains(Waveform::PULSE) {
            sum += pulse(self.phase, self.pulse_width);
            count += 1;
        }
        if count == 0 {
            0.0
        } else {
            sum / count as f32
        }
    }

    fn noise(&self) -> f32 {
        // Output bits as wired on the chip: LFSR 20,18,14,11,9,5,2,0 -> D7..D0
        let l = self.lfsr;
        let byte = ((l >> 13) & 0x80)
            | ((l >> 12) & 0x40)
            | ((l >> 9) & 0x20)
            | ((l >> 7) & 0x10)
            | ((l >> 6) & 0x08)
            | ((l >> 3) & 0x04)
            | ((l >> 1) & 0x02)
            | (l & 0x01);
        byte as f32 / 127.5 - 1.0
    }
}

impl Default for Voice {
    fn default() -> Self {
        Self::new()
    }
}

fn triangle(phase: u32) -> f32 {
    if phase < PHASE_MSB {
        (phase as f32 / PHASE_MSB as f32) * 2.0 - 1.0
    } else {
        1.0 - ((phase - PHASE_MSB) as f32 / PHASE_MSB as f32) * 2.0
    }
}

fn sawtooth(phase: u32) -> f32 {
    (phase as f32 / PHASE_SCALE) * 2.0 - 1.0
}

fn pulse(phase: u32, width: f32) -> f32 {
    let threshold = (width.clamp(PULSE_WIDTH_MIN, PULSE_WIDTH_MAX) * PHASE_SCALE) as u32;
    if phase < threshold {
        1.0
    } else {
        -1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_note_frequency() {
        assert_abs_diff_eq!(note_to_hz(69), 440.0, epsilon = 1e-3);
        assert_abs_diff_eq!(note_to_hz(81), 880.0, epsilon = 1e-2);
    }

    #[test]
    fn test_increment_follows_note_and_bend() {
        let mut voice = Voice::new();
        voice.note_on(69, 100, 44_100.0);
        let expected = (440.0 * PHASE_SCALE / 44_100.0) as u32;
        assert!(voice.increment().abs_diff(expected) <= 1);

        voice.set_pitch_bend(1.0, 44_100.0);
        assert!(voice.increment().abs_diff(expected * 2) <= 2);

        voice.set_pitch_bend(5.0, 44_100.0);
        assert_abs_diff_eq!(voice.pitch_bend(), 1.0);
    }

    #[test]
    fn test_test_bit_holds_phase() {
        let mut voice = Voice::new();
        voice.note_on(60, 100, 44_100.0);
        voice.advance();
        assert!(voice.phase() > 0);
        voice.set_test(true);
        assert_eq!(voice.phase(), 0);
        assert!(!voice.advance());
        assert_eq!(voice.phase(), 0);
        assert_eq!(voice.render(false, 1.0 / 44_100.0), 0.0);
    }

    #[test]
    fn test_waveform_shapes() {
        assert_abs_diff_eq!(triangle(0), -1.0);
        assert_abs_diff_eq!(triangle(PHASE_MSB), 1.0);
        assert_abs_diff_eq!(sawtooth(0), -1.0);
        assert_abs_diff_eq!(sawtooth(PHASE_MSB), 0.0);
        assert_eq!(pulse(0x10_0000, 0.5), 1.0);
        assert_eq!(pulse(0xF0_0000, 0.5), -1.0);
        // Clamped: a zero width still produces a sliver of high output
        assert_eq!(pulse(0, 0.0), 1.0);
    }

    #[test]
    fn test_noise_is_exclusive() {
        let mut voice = Voice::new();
        voice.waveform = Waveform::NOISE | Waveform::SAWTOOTH;
        voice.phase = 0;
        let noise = voice.noise();
        assert_eq!(voice.waveform_output(false), noise);
    }

    #[test]
    fn test_noise_clocks_on_bit_19() {
        let mut voice = Voice::new();
        voice.increment = NOISE_CLOCK_BIT;
        let seed = voice.lfsr;
        voice.advance();
        assert_ne!(voice.lfsr, seed);
        let after_first = voice.lfsr;
        voice.advance();
        assert_eq!(voice.lfsr, after_first);
    }

    #[test]
    fn test_ring_mod_inverts_triangle() {
        let mut voice = Voice::new();
        voice.waveform = Waveform::TRIANGLE;
        voice.ring_mod = true;
        voice.phase = 0x20_0000;
        let plain = voice.waveform_output(false);
        let ringed = voice.waveform_output(true);
        assert_abs_diff_eq!(plain, -ringed);
    }
}
