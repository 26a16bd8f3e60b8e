//! SID register layout
//!
//! Decoding of the 29 writable registers at $D400-$D41C and the shadow cache
//! that mirrors every write into the 32-byte window.
//!
//! | Offset | Register |
//! |--------|----------|
//! | v*7+0/1 | frequency lo/hi |
//! | v*7+2/3 | pulse width lo/hi (12 bits) |
//! | v*7+4 | control |
//! | v*7+5 | attack/decay |
//! | v*7+6 | sustain/release |
//! | $15/$16 | cutoff lo (bits 0-2) / hi |
//! | $17 | resonance (bits 4-7), routing (bits 0-3) |
//! | $18 | mode (bits 4-6), voice 3 off (bit 7), volume (bits 0-3) |

use crate::sid::{FilterMode, Waveform, VOICE_COUNT};
use bitflags::bitflags;
use std::fmt;

/// First address of the SID window
pub const SID_BASE: u16 = 0xD400;
/// Size of the SID window in bytes
pub const SID_WINDOW: u16 = 0x20;
/// Register stride between voices
pub const VOICE_STRIDE: u8 = 7;
/// Register value to Hz conversion factor
pub const FREQ_REGISTER_TO_HZ: f32 = 0.0596;
/// Lowest frequency that becomes a note
pub const NOTE_MIN_HZ: f32 = 8.0;
/// Highest frequency that becomes a note
pub const NOTE_MAX_HZ: f32 = 12_543.0;

const NOTE_NAMES: [&str; 12] = [
    "C-", "C#", "D-", "D#", "E-", "F-", "F#", "G-", "G#", "A-", "A#", "B-",
];

bitflags! {
    /// Voice control register
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ControlFlags: u8 {
        /// Gate: note on while set
        const GATE = 0x01;
        /// Hard sync to the previous voice
        const SYNC = 0x02;
        /// Ring modulation by the previous voice
        const RING_MOD = 0x04;
        /// Oscillator test/reset
        const TEST = 0x08;
        /// Triangle waveform
        const TRIANGLE = 0x10;
        /// Sawtooth waveform
        const SAWTOOTH = 0x20;
        /// Pulse waveform
        const PULSE = 0x40;
        /// Noise waveform
        const NOISE = 0x80;
    }
}

impl ControlFlags {
    /// Waveform bits mapped onto the engine's waveform mask.
    pub fn waveform(self) -> Waveform {
        Waveform::from_bits_truncate(self.bits() >> 4)
    }
}

impl fmt::Display for ControlFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (ControlFlags::NOISE, "NOISE"),
            (ControlFlags::PULSE, "PULSE"),
            (ControlFlags::SAWTOOTH, "SAW"),
            (ControlFlags::TRIANGLE, "TRI"),
            (ControlFlags::TEST, "TEST"),
            (ControlFlags::RING_MOD, "RING"),
            (ControlFlags::SYNC, "SYNC"),
            (ControlFlags::GATE, "GATE"),
        ];
        let mut first = true;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    f.write_str(" ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("-")?;
        }
        Ok(())
    }
}

bitflags! {
    /// Filter routing bits of $D417
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FilterRouting: u8 {
        /// Voice 1 through the filter
        const VOICE1 = 0x01;
        /// Voice 2 through the filter
        const VOICE2 = 0x02;
        /// Voice 3 through the filter
        const VOICE3 = 0x04;
        /// External input through the filter (not emulated)
        const EXTERNAL = 0x08;
    }
}

impl FilterRouting {
    /// Whether voice `voice` (0-based) is routed through the filter.
    pub fn routes(self, voice: usize) -> bool {
        voice < VOICE_COUNT && self.bits() & (1 << voice) != 0
    }
}

/// Decoded $D418
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeVolume {
    /// Filter response
    pub mode: FilterMode,
    /// Voice 3 disconnected from the direct path
    pub voice3_off: bool,
    /// Master volume nibble
    pub volume: u8,
}

/// Decode the mode/volume register. When several mode bits are set the
/// highest one wins (HP over BP over LP).
pub fn decode_mode_volume(value: u8) -> ModeVolume {
    let mode = if value & 0x40 != 0 {
        FilterMode::HighPass
    } else if value & 0x20 != 0 {
        FilterMode::BandPass
    } else if value & 0x10 != 0 {
        FilterMode::LowPass
    } else {
        FilterMode::Off
    };
    ModeVolume {
        mode,
        voice3_off: value & 0x80 != 0,
        volume: value & 0x0F,
    }
}

/// Decode the resonance/routing register into normalized resonance and routing.
pub fn decode_resonance_routing(value: u8) -> (f32, FilterRouting) {
    let resonance = (value >> 4) as f32 / 15.0;
    (resonance, FilterRouting::from_bits_truncate(value))
}

/// Assemble the 11-bit cutoff from its two registers.
pub fn decode_cutoff(lo: u8, hi: u8) -> u16 {
    ((hi as u16) << 3) | (lo as u16 & 0x07)
}

/// Normalize an 11-bit cutoff to 0.0..=1.0.
pub fn normalize_cutoff(cutoff: u16) -> f32 {
    (cutoff & 0x07FF) as f32 / 2047.0
}

/// Nearest MIDI note for a 16-bit frequency register value, if it is in the
/// playable range.
pub fn freq_to_midi_note(freq: u16) -> Option<u8> {
    if freq == 0 {
        return None;
    }
    let hz = freq as f32 * FREQ_REGISTER_TO_HZ;
    if !(NOTE_MIN_HZ..=NOTE_MAX_HZ).contains(&hz) {
        return None;
    }
    let note = (12.0 * (hz / 440.0).log2() + 69.0).round();
    if note > 0.0 && note < 128.0 {
        Some(note as u8)
    } else {
        None
    }
}

/// Tracker-style note name, e.g. `A-4`
pub fn note_name(note: u8) -> String {
    format!("{}{}", NOTE_NAMES[note as usize % 12], (note / 12) as i32 - 1)
}

/// Per-voice register within a voice block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceRegister {
    /// Frequency low byte
    FreqLo,
    /// Frequency high byte
    FreqHi,
    /// Pulse width low byte
    PulseLo,
    /// Pulse width high nibble
    PulseHi,
    /// Control
    Control,
    /// Attack/decay
    AttackDecay,
    /// Sustain/release
    SustainRelease,
}

/// A register offset within the SID window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    /// One of the seven registers of a voice
    Voice {
        /// 0-based voice
        voice: usize,
        /// Register within the voice block
        register: VoiceRegister,
    },
    /// Cutoff low bits
    CutoffLo,
    /// Cutoff high byte
    CutoffHi,
    /// Resonance and routing
    ResonanceRouting,
    /// Mode and volume
    ModeVolume,
    /// Read-only or unused offset; cached only
    Unmapped(u8),
}

impl Register {
    /// Decode an offset from $D400. Offsets past the window wrap onto it.
    pub fn decode(offset: u8) -> Register {
        let offset = offset % SID_WINDOW as u8;
        match offset {
            0x00..=0x14 => {
                let voice = (offset / VOICE_STRIDE) as usize;
                let register = match offset % VOICE_STRIDE {
                    0 => VoiceRegister::FreqLo,
                    1 => VoiceRegister::FreqHi,
                    2 => VoiceRegister::PulseLo,
                    3 => VoiceRegister::PulseHi,
                    4 => VoiceRegister::Control,
                    5 => VoiceRegister::AttackDecay,
                    _ => VoiceRegister::SustainRelease,
                };
                Register::Voice { voice, register }
            }
            0x15 => Register::CutoffLo,
            0x16 => Register::CutoffHi,
            0x17 => Register::ResonanceRouting,
            0x18 => Register::ModeVolume,
            other => Register::Unmapped(other),
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::Voice { voice, register } => {
                let name = match register {
                    VoiceRegister::FreqLo => "FREQ_LO",
                    VoiceRegister::FreqHi => "FREQ_HI",
                    VoiceRegister::PulseLo => "PW_LO",
                    VoiceRegister::PulseHi => "PW_HI",
                    VoiceRegister::Control => "CTRL",
                    VoiceRegister::AttackDecay => "AD",
                    VoiceRegister::SustainRelease => "SR",
                };
                write!(f, "V{}.{}", voice + 1, name)
            }
            Register::CutoffLo => f.write_str("FC_LO"),
            Register::CutoffHi => f.write_str("FC_HI"),
            Register::ResonanceRouting => f.write_str("RES_FILT"),
            Register::ModeVolume => f.write_str("MODE_VOL"),
            Register::Unmapped(offset) => write!(f, "${:02X}", offset),
        }
    }
}

/// Shadow copy of the SID window plus the per-voice gate tracking needed to
/// turn register writes into note events.
#[derive(Debug, Clone, Default)]
pub struct RegisterCache {
    regs: [u8; SID_WINDOW as usize],
    pub(crate) prev_gate: [bool; VOICE_COUNT],
    pub(crate) base_freq: [u16; VOICE_COUNT],
}

impl RegisterCache {
    /// Empty cache (all registers zero, all gates low).
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear everything.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// All 32 shadow bytes
    pub fn registers(&self) -> &[u8; SID_WINDOW as usize] {
        &self.regs
    }

    /// Shadow byte at `offset` (wrapped into the window)
    pub fn get(&self, offset: u8) -> u8 {
        self.regs[(offset % SID_WINDOW as u8) as usize]
    }

    pub(crate) fn set(&mut self, offset: u8, value: u8) {
        self.regs[(offset % SID_WINDOW as u8) as usize] = value;
    }

    fn voice_reg(&self, voice: usize, index: u8) -> u8 {
        self.get(voice as u8 * VOICE_STRIDE + index)
    }

    /// Latched 16-bit frequency of `voice`
    pub fn frequency(&self, voice: usize) -> u16 {
        u16::from_le_bytes([self.voice_reg(voice, 0), self.voice_reg(voice, 1)])
    }

    /// Latched 12-bit pulse width of `voice`
    pub fn pulse_width(&self, voice: usize) -> u16 {
        u16::from_le_bytes([self.voice_reg(voice, 2), self.voice_reg(voice, 3) & 0x0F])
    }

    /// Control flags of `voice`
    pub fn control(&self, voice: usize) -> ControlFlags {
        ControlFlags::from_bits_retain(self.voice_reg(voice, 4))
    }

    /// Gate level seen at the last control write
    pub fn gate(&self, voice: usize) -> bool {
        self.prev_gate.get(voice).copied().unwrap_or(false)
    }

    /// Frequency captured when the current note was gated on (0 if none)
    pub fn base_frequency(&self, voice: usize) -> u16 {
        self.base_freq.get(voice).copied().unwrap_or(0)
    }

    /// 11-bit filter cutoff
    pub fn cutoff(&self) -> u16 {
        decode_cutoff(self.get(0x15), self.get(0x16))
    }
}

impl fmt::Display for RegisterCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for voice in 0..VOICE_COUNT {
            let freq = self.frequency(voice);
            let note = freq_to_midi_note(freq).map_or_else(|| "---".to_string(), note_name);
            writeln!(
                f,
                "V{}  freq ${:04X} {:<4} pw ${:03X}  ctrl ${:02X} [{}]  ad ${:02X}  sr ${:02X}  base ${:04X}",
                voice + 1,
                freq,
                note,
                self.pulse_width(voice),
                self.voice_reg(voice, 4),
                self.control(voice),
                self.voice_reg(voice, 5),
                self.voice_reg(voice, 6),
                self.base_frequency(voice),
            )?;
        }
        let (resonance, routing) = decode_resonance_routing(self.get(0x17));
        let mode_volume = decode_mode_volume(self.get(0x18));
        let routed: Vec<String> = (0..VOICE_COUNT)
            .filter(|&v| routing.routes(v))
            .map(|v| format!("V{}", v + 1))
            .collect();
        write!(
            f,
            "FLT  cutoff ${:03X}  res {:.2}  route [{}]  mode {:?}  vol {}{}",
            self.cutoff(),
            resonance,
            routed.join(" "),
            mode_volume.mode,
            mode_volume.volume,
            if mode_volume.voice3_off { "  3OFF" } else { "" },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_register_decode_is_total() {
        for offset in 0u8..=0xFF {
            let _ = Register::decode(offset);
        }
        assert_eq!(
            Register::decode(0x0B),
            Register::Voice {
                voice: 1,
                register: VoiceRegister::Control
            }
        );
        assert_eq!(
            Register::decode(0x14),
            Register::Voice {
                voice: 2,
                register: VoiceRegister::SustainRelease
            }
        );
        assert_eq!(Register::decode(0x18), Register::ModeVolume);
        assert_eq!(Register::decode(0x1B), Register::Unmapped(0x1B));
        assert_eq!(Register::decode(0x38), Register::ModeVolume);
    }

    #[test]
    fn test_control_waveform_mapping() {
        let ctrl = ControlFlags::from_bits_retain(0x41);
        assert_eq!(ctrl.waveform(), Waveform::PULSE);
        assert!(ctrl.contains(ControlFlags::GATE));
        assert_eq!(ctrl.to_string(), "PULSE GATE");
        assert_eq!(
            ControlFlags::from_bits_retain(0x90).waveform(),
            Waveform::NOISE | Waveform::TRIANGLE
        );
        assert_eq!(ControlFlags::empty().to_string(), "-");
    }

    #[test]
    fn test_mode_volume_priority() {
        for value in 0u8..=0xFF {
            let decoded = decode_mode_volume(value);
            assert_eq!(decoded.volume, value & 0x0F);
        }
        assert_eq!(decode_mode_volume(0x1F).mode, FilterMode::LowPass);
        assert_eq!(decode_mode_volume(0x30).mode, FilterMode::BandPass);
        assert_eq!(decode_mode_volume(0x70).mode, FilterMode::HighPass);
        assert_eq!(decode_mode_volume(0x0F).mode, FilterMode::Off);
        assert!(decode_mode_volume(0x80).voice3_off);
    }

    #[test]
    fn test_resonance_routing() {
        let (res, routing) = decode_resonance_routing(0xF5);
        assert_abs_diff_eq!(res, 1.0);
        assert!(routing.routes(0));
        assert!(!routing.routes(1));
        assert!(routing.routes(2));
        assert!(!routing.routes(3));
    }

    #[test]
    fn test_cutoff_assembly() {
        assert_eq!(decode_cutoff(0x07, 0xFF), 0x7FF);
        assert_eq!(decode_cutoff(0xFF, 0x00), 0x007);
        assert_eq!(decode_cutoff(0x00, 0x80), 0x400);
        assert_abs_diff_eq!(normalize_cutoff(0x7FF), 1.0);
        assert_abs_diff_eq!(normalize_cutoff(0), 0.0);
    }

    #[test]
    fn test_freq_to_midi_note() {
        assert_eq!(freq_to_midi_note(0), None);
        // 7383 * 0.0596 = 440.0 Hz
        assert_eq!(freq_to_midi_note(7383), Some(69));
        assert_eq!(freq_to_midi_note(0x1000), Some(59));
        // Below 8 Hz
        assert_eq!(freq_to_midi_note(100), None);
        // 0xFFFF * 0.0596 = 3906 Hz, still in range
        assert!(freq_to_midi_note(0xFFFF).is_some());
        assert_eq!(note_name(69), "A-4");
        assert_eq!(note_name(60), "C-4");
    }

    #[test]
    fn test_cache_accessors() {
        let mut cache = RegisterCache::new();
        cache.set(0x07, 0x34);
        cache.set(0x08, 0x12);
        cache.set(0x09, 0xFF);
        cache.set(0x0A, 0xF8);
        assert_eq!(cache.frequency(1), 0x1234);
        assert_eq!(cache.pulse_width(1), 0x8FF);
        assert_eq!(cache.get(0x27), 0x34);
        let dump = cache.to_string();
        assert!(dump.contains("V2  freq $1234"));
        assert!(dump.contains("FLT"));
    }
}
