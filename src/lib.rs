//! C64 SID music player
//!
//! Plays PSID/RSID chip-music files by running the embedded 6502 player code
//! against a flat 64 KB memory image. Writes to the SID register window
//! ($D400-$D41F) are decoded into parameter changes and note events for a
//! three-voice floating-point synthesizer, and a pull-based scheduler calls
//! the song's play routine at 50 Hz (PAL) or 60 Hz (NTSC) while the host
//! pulls audio samples.
//!
//! # Modules
//! - [`cpu`]: 6502 processor core, generic over a [`cpu::CpuMemory`] bus
//! - [`memory`]: 64 KB memory image and the SID register bridge
//! - [`sid`]: three-voice synthesizer (oscillators, ADSR, multimode filter)
//! - [`psid`]: PSID/RSID header parsing
//! - [`replayer`]: playback scheduler ([`SidPlayer`])
//! - `export` (feature `export-wav`): offline WAV rendering
//!
//! # Quick start
//! ```no_run
//! use sidplay::SidPlayer;
//! let data = std::fs::read("song.sid").unwrap();
//! let mut player = SidPlayer::new();
//! player.load(&data).unwrap();
//! player.start().unwrap();
//! let mut buffer = vec![0.0f32; 2 * 1024];
//! player.render_interleaved(&mut buffer, 44_100);
//! ```

#![warn(missing_docs)]

pub mod cpu;
#[cfg(feature = "export-wav")]
pub mod export;
pub mod memory;
pub mod psid;
pub mod replayer;
pub mod sid;

/// Error types for SID player operations
#[derive(thiserror::Error, Debug)]
pub enum SidError {
    /// Input is smaller than the fixed header
    #[error("Data too short: expected at least {expected} bytes, got {actual}")]
    DataTooShort {
        /// Minimum number of bytes required
        expected: usize,
        /// Number of bytes supplied
        actual: usize,
    },

    /// Magic is neither `PSID` nor `RSID`
    #[error("Invalid magic {0:02X?}: not a PSID/RSID file")]
    InvalidMagic([u8; 4]),

    /// Header fields are inconsistent with the payload
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Requested subsong does not exist
    #[error("Invalid subsong {index}: file has {available} songs")]
    InvalidSubsong {
        /// Requested 0-based subsong
        index: u8,
        /// Number of subsongs in the file
        available: u8,
    },

    /// Operation needs a loaded song
    #[error("No song loaded")]
    NoSongLoaded,

    /// IO error from filesystem
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error writing audio file
    #[error("Audio file write error: {0}")]
    AudioFile(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type for player operations
pub type Result<T> = std::result::Result<T, SidError>;

pub use cpu::{CpuMemory, Mos6502};
pub use memory::C64Memory;
pub use psid::{SidFile, SongInfo};
pub use replayer::{FrameTiming, PlaybackState, PlayerConfig, SidPlayer};
pub use sid::SidEngine;
