//! Playback scheduler
//!
//! [`SidPlayer`] owns the CPU, the memory image (and through it the SID
//! bridge and engine) and the loaded song. The host pulls audio; every time
//! a frame period's worth of samples has been produced the play routine is
//! executed once, under a cycle budget, before the next sample is rendered.
//!
//! # Example
//!
//! ```rust,ignore
//! use sidplay::SidPlayer;
//!
//! let data = std::fs::read("song.sid")?;
//! let mut player = SidPlayer::new();
//! player.load(&data)?;
//! player.start()?;
//!
//! let mut left = vec![0.0f32; 882];
//! let mut right = vec![0.0f32; 882];
//! player.process(&mut left, &mut right, 44_100);
//! ```

mod config;
mod cycle_budget;
mod state;
mod timing;

pub use config::PlayerConfig;
pub use cycle_budget::CycleBudget;
pub use state::{CpuSnapshot, StateDump};
pub use timing::{FrameClock, FrameTiming, DEFAULT_SAMPLE_RATE};

use crate::cpu::Mos6502;
use crate::memory::{ControlFlags, C64Memory, VOICE_STRIDE};
use crate::psid::{SidFile, SongInfo};
use crate::sid::VOICE_COUNT;
use crate::{Result, SidError};
use std::fmt;

/// KERNAL IRQ vector (RAM copy)
pub const KERNAL_IRQ_VECTOR: u16 = 0x0314;
/// Hardware IRQ vector
pub const HARDWARE_IRQ_VECTOR: u16 = 0xFFFE;
/// Start of the KERNAL ROM area
pub const KERNAL_BASE: u16 = 0xE000;

/// Status byte pushed for interrupt-style calls. An RTS that consumes it as
/// an address also lands on the sentinel.
const SENTINEL_STATUS: u8 = 0xFE;

/// Playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// Not calling the play routine; output is silence
    #[default]
    Stopped,
    /// Play routine runs once per frame
    Playing,
}

/// How a routine was entered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    /// Return address only (ends with RTS)
    Subroutine,
    /// Return address plus status byte (ends with RTI)
    Interrupt,
}

/// Why a guarded routine call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutineExit {
    /// Returned to the sentinel address
    Returned,
    /// Jumped into the KERNAL area outside the loaded image
    KernalReturn(u16),
    /// An instruction jumped to itself
    Stalled(u16),
    /// SP sank too far below its entry value
    StackDrift,
    /// Cycle budget spent
    BudgetExhausted,
}

impl RoutineExit {
    /// Whether the call had to be cut short
    pub fn is_runaway(self) -> bool {
        matches!(
            self,
            RoutineExit::Stalled(_) | RoutineExit::StackDrift | RoutineExit::BudgetExhausted
        )
    }
}

impl fmt::Display for RoutineExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutineExit::Returned => f.write_str("returned"),
            RoutineExit::KernalReturn(pc) => write!(f, "kernal ${:04X}", pc),
            RoutineExit::Stalled(pc) => write!(f, "stalled at ${:04X}", pc),
            RoutineExit::StackDrift => f.write_str("stack drift"),
            RoutineExit::BudgetExhausted => f.write_str("cycle budget exhausted"),
        }
    }
}

/// Position callback: `(subsong, elapsed_ms)` once per executed frame
pub type PositionCallback = Box<dyn FnMut(u8, u32) + Send>;

/// PSID/RSID player
pub struct SidPlayer {
    cpu: Mos6502,
    memory: C64Memory,
    song: Option<SidFile>,
    state: PlaybackState,
    subsong: u8,
    timing_override: Option<FrameTiming>,
    clock: FrameClock,
    play_address: u16,
    play_entry: EntryKind,
    config: PlayerConfig,
    boost: f32,
    loop_detection: bool,
    position_callback: Option<PositionCallback>,
    runaway_warnings: u32,
    last_exit: Option<RoutineExit>,
}

impl SidPlayer {
    /// Player with default configuration and nothing loaded.
    pub fn new() -> Self {
        Self::with_config(PlayerConfig::default())
    }

    /// Player with an explicit configuration.
    pub fn with_config(config: PlayerConfig) -> Self {
        let mut cpu = Mos6502::new();
        cpu.set_unknown_opcode_log_limit(config.unknown_opcode_log_limit);
        SidPlayer {
            cpu,
            memory: C64Memory::new(DEFAULT_SAMPLE_RATE),
            song: None,
            state: PlaybackState::Stopped,
            subsong: 0,
            timing_override: None,
            clock: FrameClock::new(config.default_timing, DEFAULT_SAMPLE_RATE),
            play_address: 0,
            play_entry: EntryKind::Subroutine,
            boost: config.boost,
            loop_detection: config.loop_detection,
            config,
            position_callback: None,
            runaway_warnings: 0,
            last_exit: None,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Load a PSID/RSID image. On error the player is left untouched.
    pub fn load(&mut self, data: &[u8]) -> Result<()> {
        let song = SidFile::parse(data)?;

        self.stop();
        self.memory.clear_ram();
        self.memory.sid_mut().reset();
        self.cpu.reset();
        song.copy_into(&mut self.memory);

        let info = &song.info;
        self.subsong = info.default_subsong;
        self.timing_override = None;
        self.clock
            .set_timing(info.timing_for(self.subsong, self.config.default_timing));
        self.clock.reset();
        self.play_address = info.play_address;
        self.play_entry = EntryKind::Subroutine;
        self.last_exit = None;

        log::info!(
            "Loaded {} v{} \"{}\" by {}: load ${:04X}-${:04X} init ${:04X} play ${:04X}, {} song(s), {}",
            info.format,
            info.version,
            info.title,
            info.author,
            info.load_address,
            info.load_end.saturating_sub(1),
            info.init_address,
            info.play_address,
            info.songs,
            self.clock.timing()
        );

        self.song = Some(song);
        Ok(())
    }

    /// Run the init routine for the current subsong and begin playback.
    ///
    /// Does nothing if already playing.
    pub fn start(&mut self) -> Result<()> {
        if self.state == PlaybackState::Playing {
            return Ok(());
        }
        let (init_address, header_play) = match &self.song {
            Some(song) => (song.info.init_address, song.info.play_address),
            None => return Err(SidError::NoSongLoaded),
        };

        self.cpu.reset();
        self.cpu.a = self.subsong;
        let exit = self.call_routine(init_address, EntryKind::Subroutine);
        self.report_exit("init", init_address, exit);

        if header_play != 0 {
            self.play_address = header_play;
            self.play_entry = EntryKind::Subroutine;
        } else if let Some(addr) = self.find_interrupt_play() {
            log::info!("Play routine installed by init at ${:04X}", addr);
            self.play_address = addr;
            self.play_entry = EntryKind::Interrupt;
        } else {
            log::warn!("No play routine found; subsong {} will be silent", self.subsong);
            self.play_address = 0;
        }

        self.clock.reset();
        self.state = PlaybackState::Playing;
        Ok(())
    }

    /// Stop playback, releasing every voice through a gate-off write.
    pub fn stop(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }
        self.state = PlaybackState::Stopped;
        for voice in 0..VOICE_COUNT {
            let control = self.memory.sid().cache().control(voice) - ControlFlags::GATE;
            self.memory
                .sid_mut()
                .write(voice as u8 * VOICE_STRIDE + 4, control.bits());
        }
    }

    /// Playback state
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Whether the play routine is being called
    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    /// Switch to subsong `index` (0-based). Restores the program image and
    /// restarts playback if it was running.
    pub fn select_subsong(&mut self, index: u8) -> Result<()> {
        let songs = match &self.song {
            Some(song) => song.info.songs,
            None => return Err(SidError::NoSongLoaded),
        };
        if index as u16 >= songs {
            return Err(SidError::InvalidSubsong {
                index,
                available: songs as u8,
            });
        }

        let was_playing = self.is_playing();
        self.stop();

        if let Some(song) = &self.song {
            self.memory.clear_ram();
            song.copy_into(&mut self.memory);
            let timing = self
                .timing_override
                .unwrap_or_else(|| song.info.timing_for(index, self.config.default_timing));
            self.clock.set_timing(timing);
        }
        self.subsong = index;
        self.clock.reset();

        if was_playing {
            self.start()?;
        }
        Ok(())
    }

    /// Render into split channel buffers. Writes `min(left.len(), right.len())`
    /// frames.
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32], sample_rate: u32) {
        self.prepare(sample_rate);
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let [sl, sr] = self.next_frame();
            *l = sl;
            *r = sr;
        }
    }

    /// Render interleaved stereo (`buffer.len() / 2` frames). A trailing odd
    /// sample is set to silence.
    pub fn render_interleaved(&mut self, buffer: &mut [f32], sample_rate: u32) {
        self.prepare(sample_rate);
        let mut frames = buffer.chunks_exact_mut(2);
        for frame in &mut frames {
            let [l, r] = self.next_frame();
            frame[0] = l;
            frame[1] = r;
        }
        frames.into_remainder().fill(0.0);
    }

    /// Like [`process`](Self::process), additionally writing each voice's
    /// envelope-shaped output to `voices`.
    pub fn process_voices(
        &mut self,
        left: &mut [f32],
        right: &mut [f32],
        voices: [&mut [f32]; VOICE_COUNT],
        sample_rate: u32,
    ) {
        self.prepare(sample_rate);
        let [v1, v2, v3] = voices;
        let frames = left.len().min(right.len());
        for i in 0..frames {
            let [l, r] = self.next_frame();
            left[i] = l;
            right[i] = r;
            let playing = self.is_playing();
            let engine = self.memory.sid().engine();
            for (v, tap) in [&mut *v1, &mut *v2, &mut *v3].into_iter().enumerate() {
                if let Some(out) = tap.get_mut(i) {
                    *out = if playing { engine.voice_output(v) } else { 0.0 };
                }
            }
        }
    }

    fn prepare(&mut self, sample_rate: u32) {
        if self.clock.sample_rate() != sample_rate {
            self.clock.set_sample_rate(sample_rate);
        }
        if self.memory.sid().engine().sample_rate() != sample_rate {
            self.memory.sid_mut().engine_mut().set_sample_rate(sample_rate);
        }
    }

    fn next_frame(&mut self) -> [f32; 2] {
        if self.state != PlaybackState::Playing {
            return [0.0, 0.0];
        }
        if self.clock.clock() {
            self.run_frame();
        }
        let [l, r] = self.memory.sid_mut().engine_mut().process_one_sample();
        [l * self.boost, r * self.boost]
    }

    fn run_frame(&mut self) {
        if self.play_address != 0 {
            let addr = self.play_address;
            let exit = self.call_routine(addr, self.play_entry);
            self.report_exit("play", addr, exit);
        }
        let elapsed = self.elapsed_ms();
        let subsong = self.subsong;
        if let Some(callback) = self.position_callback.as_mut() {
            callback(subsong, elapsed);
        }
    }

    /// Execute a routine until it returns to the sentinel or a guard trips.
    fn call_routine(&mut self, entry: u16, kind: EntryKind) -> RoutineExit {
        let (load, load_end) = self
            .song
            .as_ref()
            .map_or((0, 0), |s| (s.info.load_address, s.info.load_end));
        let in_image = |addr: u16| addr >= load && (addr as u32) < load_end;

        let saved_sp = self.cpu.sp;
        let saved_status = self.cpu.status;
        self.cpu.push(&mut self.memory, 0xFF);
        self.cpu.push(&mut self.memory, 0xFF);
        if kind == EntryKind::Interrupt {
            self.cpu.push(&mut self.memory, SENTINEL_STATUS);
        }
        // Drift is measured below the sentinel frame
        let entry_sp = self.cpu.sp;
        self.cpu.pc = entry;

        let mut budget = CycleBudget::new(self.config.max_cycles_per_call);
        let exit = loop {
            if budget.exhausted() {
                break RoutineExit::BudgetExhausted;
            }
            let pc = self.cpu.pc;
            budget.charge(self.cpu.step(&mut self.memory));
            let next = self.cpu.pc;

            if next == 0x0000 || next == 0xFFFF {
                break RoutineExit::Returned;
            }
            if next >= KERNAL_BASE && !in_image(next) {
                break RoutineExit::KernalReturn(next);
            }
            if self.loop_detection {
                if next == pc {
                    break RoutineExit::Stalled(pc);
                }
                if entry_sp.wrapping_sub(self.cpu.sp) > self.config.stack_drift_limit
                    && self.cpu.sp < entry_sp
                {
                    break RoutineExit::StackDrift;
                }
            }
        };
        log::trace!(
            "routine ${:04X}: {} of {} cycles, {}",
            entry,
            budget.used(),
            budget.limit(),
            exit
        );

        self.cpu.sp = saved_sp;
        self.cpu.status = saved_status;
        self.last_exit = Some(exit);
        exit
    }

    fn report_exit(&mut self, routine: &str, addr: u16, exit: RoutineExit) {
        if !exit.is_runaway() {
            if let RoutineExit::KernalReturn(pc) = exit {
                log::debug!("{} routine ${:04X} left through KERNAL ${:04X}", routine, addr, pc);
            }
            return;
        }
        self.runaway_warnings = self.runaway_warnings.saturating_add(1);
        if self.runaway_warnings <= self.config.runaway_log_limit {
            log::warn!("{} routine ${:04X} cut short: {}", routine, addr, exit);
            if self.runaway_warnings == self.config.runaway_log_limit {
                log::warn!("Further runaway-routine warnings suppressed");
            }
        }
    }

    /// Play routine installed by init through $0314 or $FFFE, if it points
    /// into the loaded image.
    fn find_interrupt_play(&self) -> Option<u16> {
        let info = &self.song.as_ref()?.info;
        [KERNAL_IRQ_VECTOR, HARDWARE_IRQ_VECTOR]
            .into_iter()
            .map(|vector| self.memory.peek_word(vector))
            .find(|&addr| addr != 0 && info.contains(addr))
    }

    /// Loaded song metadata
    pub fn song_info(&self) -> Option<&SongInfo> {
        self.song.as_ref().map(|s| &s.info)
    }

    /// Song title (empty when nothing is loaded)
    pub fn title(&self) -> &str {
        self.song_info().map_or("", |i| i.title.as_str())
    }

    /// Composer (empty when nothing is loaded)
    pub fn author(&self) -> &str {
        self.song_info().map_or("", |i| i.author.as_str())
    }

    /// Release line (empty when nothing is loaded)
    pub fn released(&self) -> &str {
        self.song_info().map_or("", |i| i.released.as_str())
    }

    /// Elapsed play time in whole milliseconds
    pub fn elapsed_ms(&self) -> u32 {
        self.clock.elapsed_ms() as u32
    }

    /// Frames executed since start
    pub fn frame_count(&self) -> u64 {
        self.clock.frame_count()
    }

    /// Current 0-based subsong
    pub fn current_subsong(&self) -> u8 {
        self.subsong
    }

    /// Number of subsongs (0 when nothing is loaded)
    pub fn subsong_count(&self) -> u16 {
        self.song_info().map_or(0, |i| i.songs)
    }

    /// Active frame timing
    pub fn timing(&self) -> FrameTiming {
        self.clock.timing()
    }

    /// Force PAL or NTSC timing regardless of the header. Cleared by `load`.
    pub fn set_timing(&mut self, timing: FrameTiming) {
        self.timing_override = Some(timing);
        self.clock.set_timing(timing);
    }

    /// Resolved play routine address (0 if none)
    pub fn play_address(&self) -> u16 {
        self.play_address
    }

    /// Exclude a voice from the mix.
    pub fn set_voice_mute(&mut self, voice: usize, muted: bool) {
        self.memory.sid_mut().engine_mut().set_voice_mute(voice, muted);
    }

    /// Whether a voice is excluded from the mix
    pub fn is_voice_muted(&self, voice: usize) -> bool {
        self.memory.sid().engine().is_voice_muted(voice)
    }

    /// Output gain
    pub fn set_boost(&mut self, boost: f32) {
        self.boost = boost;
    }

    /// Output gain
    pub fn boost(&self) -> f32 {
        self.boost
    }

    /// Enable or disable the stall and stack-drift guards. The cycle
    /// budget always applies.
    pub fn set_loop_detection(&mut self, enabled: bool) {
        self.loop_detection = enabled;
    }

    /// Whether the stall and stack-drift guards are active
    pub fn loop_detection(&self) -> bool {
        self.loop_detection
    }

    /// Install a callback invoked once per executed frame.
    pub fn set_position_callback<F>(&mut self, callback: F)
    where
        F: FnMut(u8, u32) + Send + 'static,
    {
        self.position_callback = Some(Box::new(callback));
    }

    /// Remove the position callback.
    pub fn clear_position_callback(&mut self) {
        self.position_callback = None;
    }

    /// Log every SID register write at debug level (target `sidplay::regs`).
    pub fn set_trace_writes(&mut self, enabled: bool) {
        self.memory.sid_mut().set_trace_writes(enabled);
    }

    /// How the most recent init or play call ended
    pub fn last_exit(&self) -> Option<RoutineExit> {
        self.last_exit
    }

    /// Memory image, for inspection
    pub fn memory(&self) -> &C64Memory {
        &self.memory
    }

    /// CPU registers, for inspection
    pub fn cpu(&self) -> &Mos6502 {
        &self.cpu
    }

    /// Snapshot of scheduler, CPU and SID register state.
    pub fn state_dump(&self) -> StateDump {
        let engine = self.memory.sid().engine();
        StateDump {
            state: self.state,
            subsong: self.subsong,
            subsong_count: self.subsong_count(),
            timing: self.timing(),
            frames: self.clock.frame_count(),
            elapsed_ms: self.elapsed_ms(),
            play_address: self.play_address,
            last_exit: self.last_exit,
            unknown_opcodes: self.cpu.unknown_opcode_count(),
            cpu: CpuSnapshot {
                pc: self.cpu.pc,
                a: self.cpu.a,
                x: self.cpu.x,
                y: self.cpu.y,
                sp: self.cpu.sp,
                status: self.cpu.status.bits(),
                cycles: self.cpu.total_cycles(),
            },
            muted: [
                engine.is_voice_muted(0),
                engine.is_voice_muted(1),
                engine.is_voice_muted(2),
            ],
            registers: self.memory.sid().cache().clone(),
        }
    }
}

impl Default for SidPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SidPlayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SidPlayer")
            .field("state", &self.state)
            .field("subsong", &self.subsong)
            .field("timing", &self.clock.timing())
            .field("play_address", &self.play_address)
            .field("boost", &self.boost)
            .finish_non_exhaustive()
    }
}
