//! Three-voice SID synthesizer
//!
//! A floating-point reinterpretation of the MOS 6581: three oscillator voices
//! with ADSR envelopes, hard sync and ring modulation, one shared resonant
//! multimode filter and a 4-bit master volume. The engine is driven by note
//! events and parameter setters rather than raw registers; the register
//! decoding lives in [`crate::memory`].

pub mod envelope;
pub mod filter;
pub mod voice;

pub use envelope::{Envelope, EnvelopeStage, ATTACK_SECONDS, DECAY_RELEASE_SECONDS};
pub use filter::{Filter, FilterMode};
pub use voice::{note_to_hz, Voice, Waveform};

/// Number of voices on the chip
pub const VOICE_COUNT: usize = 3;
/// Output gain applied to the voice sum before the master volume
pub const MIX_GAIN: f32 = 0.33;

/// Synthesizer state: voices, filter, master volume
#[derive(Debug, Clone)]
pub struct SidEngine {
    voices: [Voice; VOICE_COUNT],
    filter: Filter,
    volume: f32,
    voice3_off: bool,
    sample_rate: u32,
}

impl SidEngine {
    /// Create a silent engine rendering at `sample_rate`.
    pub fn new(sample_rate: u32) -> Self {
        SidEngine {
            voices: [Voice::new(), Voice::new(), Voice::new()],
            filter: Filter::new(sample_rate as f32),
            volume: 0.0,
            voice3_off: false,
            sample_rate,
        }
    }

    /// Return to power-on state. Voice mutes and the sample rate survive.
    pub fn reset(&mut self) {
        for voice in &mut self.voices {
            voice.reset();
        }
        self.filter.reset();
        self.volume = 0.0;
        self.voice3_off = false;
    }

    /// Current sample rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Change the render rate; sounding notes are retuned.
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        if self.sample_rate == sample_rate {
            return;
        }
        self.sample_rate = sample_rate;
        self.filter.set_sample_rate(sample_rate as f32);
        for voice in &mut self.voices {
            voice.retune(sample_rate as f32);
        }
    }

    /// Borrow a voice for inspection.
    pub fn voice(&self, voice: usize) -> Option<&Voice> {
        self.voices.get(voice)
    }

    /// Borrow the filter for inspection.
    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Master volume, 0.0..=1.0
    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Start a note on `voice`, restarting its envelope from silence.
    pub fn note_on(&mut self, voice: usize, note: u8, velocity: u8) {
        let sample_rate = self.sample_rate as f32;
        if let Some(v) = self.voices.get_mut(voice) {
            v.note_on(note, velocity, sample_rate);
        }
    }

    /// Release the note on `voice`.
    pub fn note_off(&mut self, voice: usize) {
        if let Some(v) = self.voices.get_mut(voice) {
            v.note_off();
        }
    }

    /// Release every voice.
    pub fn all_notes_off(&mut self) {
        for voice in &mut self.voices {
            voice.note_off();
        }
    }

    /// Bend the sounding note by `octaves` (clamped to one octave either way).
    pub fn set_pitch_bend(&mut self, voice: usize, octaves: f32) {
        let sample_rate = self.sample_rate as f32;
        if let Some(v) = self.voices.get_mut(voice) {
            v.set_pitch_bend(octaves, sample_rate);
        }
    }

    /// Select waveforms for `voice`.
    pub fn set_waveform(&mut self, voice: usize, waveform: Waveform) {
        if let Some(v) = self.voices.get_mut(voice) {
            v.waveform = waveform;
        }
    }

    /// Set the 12-bit pulse width of `voice`.
    pub fn set_pulse_width(&mut self, voice: usize, raw: u16) {
        if let Some(v) = self.voices.get_mut(voice) {
            v.set_pulse_width(raw);
        }
    }

    /// TEST bit of `voice`.
    pub fn set_test(&mut self, voice: usize, test: bool) {
        if let Some(v) = self.voices.get_mut(voice) {
            v.set_test(test);
        }
    }

    /// Hard sync of `voice` to its predecessor.
    pub fn set_sync(&mut self, voice: usize, sync: bool) {
        if let Some(v) = self.voices.get_mut(voice) {
            v.sync = sync;
        }
    }

    /// Ring modulation of `voice` by its predecessor.
    pub fn set_ring_mod(&mut self, voice: usize, ring_mod: bool) {
        if let Some(v) = self.voices.get_mut(voice) {
            v.ring_mod = ring_mod;
        }
    }

    /// Attack and decay nibbles of `voice`.
    pub fn set_attack_decay(&mut self, voice: usize, attack: u8, decay: u8) {
        if let Some(v) = self.voices.get_mut(voice) {
            v.envelope.set_attack_decay(attack, decay);
        }
    }

    /// Sustain and release nibbles of `voice`.
    pub fn set_sustain_release(&mut self, voice: usize, sustain: u8, release: u8) {
        if let Some(v) = self.voices.get_mut(voice) {
            v.envelope.set_sustain_release(sustain, release);
        }
    }

    /// Normalized filter cutoff, 0.0..=1.0
    pub fn set_filter_cutoff(&mut self, cutoff: f32) {
        self.filter.set_cutoff(cutoff);
    }

    /// Normalized filter resonance, 0.0..=1.0
    pub fn set_filter_resonance(&mut self, resonance: f32) {
        self.filter.set_resonance(resonance);
    }

    /// Route `voice` through the filter.
    pub fn set_filter_routing(&mut self, voice: usize, enabled: bool) {
        self.filter.set_routing(voice, enabled);
    }

    /// Select the filter response.
    pub fn set_filter_mode(&mut self, mode: FilterMode) {
        self.filter.set_mode(mode);
    }

    /// Master volume from the 4-bit register nibble.
    pub fn set_volume(&mut self, nibble: u8) {
        self.volume = (nibble & 0x0F) as f32 / 15.0;
    }

    /// Disconnect voice 3 from the direct path (it can still be filtered).
    pub fn set_voice3_off(&mut self, off: bool) {
        self.voice3_off = off;
    }

    /// Exclude a voice from the mix. The voice keeps running so it can
    /// still drive sync and ring modulation.
    pub fn set_voice_mute(&mut self, voice: usize, muted: bool) {
        if let Some(v) = self.voices.get_mut(voice) {
            v.muted = muted;
        }
    }

    /// Whether a voice is excluded from the mix.
    pub fn is_voice_muted(&self, voice: usize) -> bool {
        self.voices.get(voice).is_some_and(|v| v.muted)
    }

    /// Last rendered output of `voice` (post-envelope, pre-filter).
    pub fn voice_output(&self, voice: usize) -> f32 {
        self.voices.get(voice).map_or(0.0, |v| v.output())
    }

    /// Advance every voice by one sample period and return a stereo frame.
    pub fn process_one_sample(&mut self) -> [f32; 2] {
        let dt = if self.sample_rate > 0 {
            1.0 / self.sample_rate as f32
        } else {
            0.0
        };

        let mut wrapped = [false; VOICE_COUNT];
        for (v, voice) in self.voices.iter_mut().enumerate() {
            wrapped[v] = voice.advance();
        }
        // Voice n syncs to, and is ring-modulated by, voice n-1 (circularly)
        for v in 0..VOICE_COUNT {
            let source = (v + VOICE_COUNT - 1) % VOICE_COUNT;
            if self.voices[v].sync && wrapped[source] {
                self.voices[v].phase = 0;
            }
        }
        let msb = [
            self.voices[0].phase_msb(),
            self.voices[1].phase_msb(),
            self.voices[2].phase_msb(),
        ];

        let mut filtered = 0.0;
        let mut direct = 0.0;
        for v in 0..VOICE_COUNT {
            let source = (v + VOICE_COUNT - 1) % VOICE_COUNT;
            let out = self.voices[v].render(msb[source], dt);
            if self.voices[v].muted {
                continue;
            }
            if self.filter.routes(v) {
                filtered += out;
            } else if !(v == 2 && self.voice3_off) {
                direct += out;
            }
        }

        let filtered = self.filter.process(filtered);
        let mix = ((filtered + direct) * MIX_GAIN * self.volume).clamp(-1.0, 1.0);
        [mix, mix]
    }
}

impl Default for SidEngine {
    fn default() -> Self {
        Self::new(44_100)
    }
}
