//! ADSR envelope generator
//!
//! Linear ramps whose durations come from the chip's 16-step nibble tables.
//! Attack always ramps from the current level to full scale, decay and
//! release ramp at a rate expressed as "seconds for the full 0..1 range".

/// Attack time in seconds for each attack nibble
pub const ATTACK_SECONDS: [f32; 16] = [
    0.002, 0.008, 0.016, 0.024, 0.038, 0.056, 0.068, 0.080, 0.100, 0.250, 0.500, 0.800, 1.000,
    3.000, 5.000, 8.000,
];

/// Decay and release time in seconds for each nibble
pub const DECAY_RELEASE_SECONDS: [f32; 16] = [
    0.006, 0.024, 0.048, 0.072, 0.114, 0.168, 0.204, 0.240, 0.300, 0.750, 1.500, 2.400, 3.000,
    9.000, 15.000, 24.000,
];

/// Envelope state machine stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvelopeStage {
    /// Rising toward full scale
    Attack,
    /// Falling toward the sustain level
    Decay,
    /// Holding the sustain level while gated
    Sustain,
    /// Falling toward zero after gate-off
    Release,
    /// Silent
    #[default]
    Idle,
}

/// Per-voice ADSR envelope
#[derive(Debug, Clone)]
pub struct Envelope {
    stage: EnvelopeStage,
    level: f32,
    attack: u8,
    decay: u8,
    sustain: u8,
    release: u8,
}

impl Envelope {
    /// Create an idle envelope with all nibbles zero.
    pub fn new() -> Self {
        Envelope {
            stage: EnvelopeStage::Idle,
            level: 0.0,
            attack: 0,
            decay: 0,
            sustain: 0,
            release: 0,
        }
    }

    /// Set attack and decay nibbles (upper bits are ignored).
    pub fn set_attack_decay(&mut self, attack: u8, decay: u8) {
        self.attack = attack & 0x0F;
        self.decay = decay & 0x0F;
    }

    /// Set sustain and release nibbles (upper bits are ignored).
    pub fn set_sustain_release(&mut self, sustain: u8, release: u8) {
        self.sustain = sustain & 0x0F;
        self.release = release & 0x0F;
    }

    /// Sustain level in 0.0..=1.0
    pub fn sustain_level(&self) -> f32 {
        self.sustain as f32 / 15.0
    }

    /// Start a new note: attack from silence.
    pub fn trigger(&mut self) {
        self.level = 0.0;
        self.stage = EnvelopeStage::Attack;
    }

    /// Gate off: always enter release.
    pub fn release(&mut self) {
        self.stage = EnvelopeStage::Release;
    }

    /// Force silence.
    pub fn reset(&mut self) {
        self.level = 0.0;
        self.stage = EnvelopeStage::Idle;
    }

    /// Current stage
    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    /// Current level in 0.0..=1.0
    pub fn level(&self) -> f32 {
        self.level
    }

    /// Advance the envelope by `dt` seconds and return the new level.
    pub fn clock(&mut self, dt: f32) -> f32 {
        match self.stage {
            EnvelopeStage::Attack => {
                self.level += dt / ATTACK_SECONDS[self.attack as usize];
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.stage = EnvelopeStage::Decay;
                }
            }
            EnvelopeStage::Decay => {
                let sustain = self.sustain_level();
                self.level -= dt / DECAY_RELEASE_SECONDS[self.decay as usize];
                if self.level <= sustain {
                    self.level = sustain;
                    self.stage = EnvelopeStage::Sustain;
                }
            }
            EnvelopeStage::Sustain => self.level = self.sustain_level(),
            EnvelopeStage::Release => {
                self.level -= dt / DECAY_RELEASE_SECONDS[self.release as usize];
                if self.level <= 0.0 {
                    self.level = 0.0;
                    self.stage = EnvelopeStage::Idle;
                }
            }
            EnvelopeStage::Idle => self.level = 0.0,
        }
        self.level
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self::new()
    }
}
