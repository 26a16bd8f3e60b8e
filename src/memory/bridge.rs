//! SID register bridge
//!
//! Intercepts writes to the SID window, mirrors them into the
//! [`RegisterCache`] and translates them into [`SidEngine`] calls. Frequency
//! and pulse-width registers are only latched; they take effect on the next
//! control-register write, which is also where gate edges become note events.

use super::registers::{
    decode_mode_volume, decode_resonance_routing, freq_to_midi_note, normalize_cutoff,
    ControlFlags, Register, RegisterCache, VoiceRegister,
};
use crate::sid::{SidEngine, VOICE_COUNT};

/// Velocity used for notes triggered by a gate edge
pub const GATE_VELOCITY: u8 = 100;

/// Register cache plus the synthesizer it drives
#[derive(Debug, Clone)]
pub struct SidBridge {
    cache: RegisterCache,
    engine: SidEngine,
    trace_writes: bool,
}

impl SidBridge {
    /// Create a bridge driving a fresh engine.
    pub fn new(sample_rate: u32) -> Self {
        SidBridge {
            cache: RegisterCache::new(),
            engine: SidEngine::new(sample_rate),
            trace_writes: false,
        }
    }

    /// Reset cache and engine together so they stay consistent.
    pub fn reset(&mut self) {
        self.cache.reset();
        self.engine.reset();
    }

    /// Shadow registers
    pub fn cache(&self) -> &RegisterCache {
        &self.cache
    }

    /// Synthesizer
    pub fn engine(&self) -> &SidEngine {
        &self.engine
    }

    /// Mutable synthesizer access for rendering and host-side controls.
    pub fn engine_mut(&mut self) -> &mut SidEngine {
        &mut self.engine
    }

    /// Log every register write at debug level.
    pub fn set_trace_writes(&mut self, enabled: bool) {
        self.trace_writes = enabled;
    }

    /// Read a register: always the last written value.
    pub fn read(&self, offset: u8) -> u8 {
        self.cache.get(offset)
    }

    /// Write a register, update the cache and dispatch to the engine.
    pub fn write(&mut self, offset: u8, value: u8) {
        let register = Register::decode(offset);
        self.cache.set(offset, value);

        match register {
            Register::Voice { voice, register } => self.write_voice(voice, register, value),
            Register::CutoffLo | Register::CutoffHi => {
                let cutoff = self.cache.cutoff();
                self.engine.set_filter_cutoff(normalize_cutoff(cutoff));
            }
            Register::ResonanceRouting => {
                let (resonance, routing) = decode_resonance_routing(value);
                self.engine.set_filter_resonance(resonance);
                for voice in 0..VOICE_COUNT {
                    self.engine.set_filter_routing(voice, routing.routes(voice));
                }
            }
            Register::ModeVolume => {
                let decoded = decode_mode_volume(value);
                self.engine.set_filter_mode(decoded.mode);
                self.engine.set_voice3_off(decoded.voice3_off);
                self.engine.set_volume(decoded.volume);
            }
            Register::Unmapped(_) => {}
        }

        if self.trace_writes {
            match register {
                Register::Voice {
                    voice,
                    register: VoiceRegister::Control,
                } => log::debug!(
                    target: "sidplay::regs",
                    "{} = ${:02X} [{}] freq ${:04X}",
                    register,
                    value,
                    ControlFlags::from_bits_retain(value),
                    self.cache.frequency(voice)
                ),
                _ => log::debug!(target: "sidplay::regs", "{} = ${:02X}", register, value),
            }
        }
    }

    fn write_voice(&mut self, voice: usize, register: VoiceRegister, value: u8) {
        match register {
            // Latched until the next control write
            VoiceRegister::FreqLo
            | VoiceRegister::FreqHi
            | VoiceRegister::PulseLo
            | VoiceRegister::PulseHi => {}
            VoiceRegister::Control => self.write_control(voice, value),
            VoiceRegister::AttackDecay => {
                self.engine
                    .set_attack_decay(voice, value >> 4, value & 0x0F);
            }
            VoiceRegister::SustainRelease => {
                self.engine
                    .set_sustain_release(voice, value >> 4, value & 0x0F);
            }
        }
    }

    fn write_control(&mut self, voice: usize, value: u8) {
        let control = ControlFlags::from_bits_retain(value);
        self.engine.set_waveform(voice, control.waveform());
        self.engine
            .set_test(voice, control.contains(ControlFlags::TEST));
        self.engine
            .set_sync(voice, control.contains(ControlFlags::SYNC));
        self.engine
            .set_ring_mod(voice, control.contains(ControlFlags::RING_MOD));
        self.engine
            .set_pulse_width(voice, self.cache.pulse_width(voice));

        let gate = control.contains(ControlFlags::GATE);
        let was_gated = self.cache.prev_gate[voice];
        let freq = self.cache.frequency(voice);

        match (was_gated, gate) {
            (false, true) => {
                if freq > 0 {
                    self.cache.base_freq[voice] = freq;
                    if let Some(note) = freq_to_midi_note(freq) {
                        self.engine.note_on(voice, note, GATE_VELOCITY);
                    }
                }
            }
            (true, false) => {
                self.engine.note_off(voice);
                self.cache.base_freq[voice] = 0;
            }
            (true, true) => {
                let base = self.cache.base_freq[voice];
                if base > 0 && freq > 0 {
                    let octaves = (freq as f32 / base as f32).log2();
                    self.engine.set_pitch_bend(voice, octaves);
                }
            }
            (false, false) => {}
        }
        self.cache.prev_gate[voice] = gate;
    }
}
