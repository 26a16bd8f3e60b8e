//! Diagnostic snapshot of a running player

use super::{FrameTiming, PlaybackState, RoutineExit};
use crate::memory::RegisterCache;
use crate::sid::VOICE_COUNT;
use std::fmt;

/// CPU registers at the time of the snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuSnapshot {
    /// Program counter
    pub pc: u16,
    /// Accumulator
    pub a: u8,
    /// X index
    pub x: u8,
    /// Y index
    pub y: u8,
    /// Stack pointer
    pub sp: u8,
    /// Raw status byte
    pub status: u8,
    /// Total cycles executed
    pub cycles: u64,
}

/// Player state captured by [`SidPlayer::state_dump`](super::SidPlayer::state_dump)
#[derive(Debug, Clone)]
pub struct StateDump {
    /// Playing or stopped
    pub state: PlaybackState,
    /// Current 0-based subsong
    pub subsong: u8,
    /// Number of subsongs (0 when nothing is loaded)
    pub subsong_count: u16,
    /// Active frame timing
    pub timing: FrameTiming,
    /// Frames executed since start
    pub frames: u64,
    /// Elapsed play time
    pub elapsed_ms: u32,
    /// Resolved play routine (0 if none)
    pub play_address: u16,
    /// How the most recent routine call ended
    pub last_exit: Option<RoutineExit>,
    /// Unknown opcodes seen so far
    pub unknown_opcodes: u32,
    /// CPU registers
    pub cpu: CpuSnapshot,
    /// Per-voice mute flags
    pub muted: [bool; VOICE_COUNT],
    /// SID shadow registers
    pub registers: RegisterCache,
}

impl fmt::Display for StateDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:?}  song {}/{}  {}  frame {}  {}.{:03}s",
            self.state,
            self.subsong as u16 + 1,
            self.subsong_count,
            self.timing,
            self.frames,
            self.elapsed_ms / 1000,
            self.elapsed_ms % 1000,
        )?;
        let last = self
            .last_exit
            .map_or_else(|| "-".to_string(), |exit| exit.to_string());
        writeln!(
            f,
            "CPU  PC ${:04X}  A ${:02X}  X ${:02X}  Y ${:02X}  SP ${:02X}  P ${:02X}  cycles {}  play ${:04X}  last {}  unknown {}",
            self.cpu.pc,
            self.cpu.a,
            self.cpu.x,
            self.cpu.y,
            self.cpu.sp,
            self.cpu.status,
            self.cpu.cycles,
            self.play_address,
            last,
            self.unknown_opcodes,
        )?;
        if self.muted.iter().any(|&m| m) {
            let muted: Vec<String> = (0..VOICE_COUNT)
                .filter(|&v| self.muted[v])
                .map(|v| format!("V{}", v + 1))
                .collect();
            writeln!(f, "MUTE {}", muted.join(" "))?;
        }
        write!(f, "{}", self.registers)
    }
}
