//! PSID/RSID file parsing
//!
//! Header layout (big-endian):
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | $00 | 4 | magic `PSID` / `RSID` |
//! | $04 | 2 | version |
//! | $06 | 2 | data offset |
//! | $08 | 2 | load address (0 = first two payload bytes, little-endian) |
//! | $0A | 2 | init address |
//! | $0C | 2 | play address (0 = installed by init via IRQ vector) |
//! | $0E | 2 | song count |
//! | $10 | 2 | start song (1-based) |
//! | $12 | 4 | speed bitmask |
//! | $16 | 32 | name |
//! | $36 | 32 | author |
//! | $56 | 32 | released |
//! | $76 | 2 | flags (v2+) |
//! | $78 | 1 | start page (v2+) |
//! | $79 | 1 | page length (v2+) |

use crate::memory::C64Memory;
use crate::{Result, SidError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of the version 1 header
pub const HEADER_SIZE_V1: usize = 0x76;
/// Size of the version 2+ header
pub const HEADER_SIZE_V2: usize = 0x7C;
/// Length of each metadata string field
pub const STRING_FIELD_LEN: usize = 32;
/// Highest subsong count an index can address
pub const MAX_SONGS: u16 = 256;

const ADDRESS_SPACE: u32 = 0x1_0000;

/// Container flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidFormat {
    /// PlaySID-compatible
    Psid,
    /// Real C64 environment required
    Rsid,
}

impl fmt::Display for SidFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SidFormat::Psid => f.write_str("PSID"),
            SidFormat::Rsid => f.write_str("RSID"),
        }
    }
}

/// Play-routine call rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameTiming {
    /// 50 Hz
    #[default]
    Pal,
    /// 60 Hz
    Ntsc,
}

impl FrameTiming {
    /// Calls per second
    pub fn frame_rate(self) -> f64 {
        match self {
            FrameTiming::Pal => 50.0,
            FrameTiming::Ntsc => 60.0,
        }
    }

    /// Parse `pal`/`ntsc` (case-insensitive).
    pub fn from_name(name: &str) -> Option<FrameTiming> {
        match name.trim().to_ascii_lowercase().as_str() {
            "pal" => Some(FrameTiming::Pal),
            "ntsc" => Some(FrameTiming::Ntsc),
            _ => None,
        }
    }
}

impl fmt::Display for FrameTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameTiming::Pal => f.write_str("PAL 50Hz"),
            FrameTiming::Ntsc => f.write_str("NTSC 60Hz"),
        }
    }
}

/// Song metadata extracted from the header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongInfo {
    /// PSID or RSID
    pub format: SidFormat,
    /// Header version
    pub version: u16,
    /// Song name
    pub title: String,
    /// Composer
    pub author: String,
    /// Release/copyright line
    pub released: String,
    /// Resolved load address
    pub load_address: u16,
    /// Exclusive end of the loaded image (at most $10000)
    pub load_end: u32,
    /// Init routine
    pub init_address: u16,
    /// Play routine (0 if installed by init)
    pub play_address: u16,
    /// Number of subsongs, at least 1
    pub songs: u16,
    /// Default subsong, 0-based
    pub default_subsong: u8,
    /// Speed bitmask, one bit per subsong
    pub speed: u32,
    /// v2+ flags word
    pub flags: Option<u16>,
    /// v2+ start page of free memory
    pub start_page: Option<u8>,
    /// v2+ number of free pages
    pub page_length: Option<u8>,
}

impl SongInfo {
    /// Frame timing for `subsong`. Bit N set means PAL, clear means NTSC;
    /// subsongs past 31 share bit 31. An all-zero mask falls back to the v2+
    /// clock flags, then to `default`.
    pub fn timing_for(&self, subsong: u8, default: FrameTiming) -> FrameTiming {
        if self.speed == 0 {
            return self.preferred_clock().unwrap_or(default);
        }
        let bit = (subsong as u32).min(31);
        if self.speed & (1 << bit) != 0 {
            FrameTiming::Pal
        } else {
            FrameTiming::Ntsc
        }
    }

    /// Video standard requested by the v2+ flags, if any
    pub fn preferred_clock(&self) -> Option<FrameTiming> {
        match self.flags.map(|f| (f >> 2) & 0x03) {
            Some(0b01) => Some(FrameTiming::Pal),
            Some(0b10) => Some(FrameTiming::Ntsc),
            _ => None,
        }
    }

    /// Whether `addr` lies inside the loaded image
    pub fn contains(&self, addr: u16) -> bool {
        addr >= self.load_address && (addr as u32) < self.load_end
    }
}

/// A parsed file: metadata and the program image to copy into memory
#[derive(Debug, Clone)]
pub struct SidFile {
    /// Header metadata
    pub info: SongInfo,
    /// Program image, already truncated to fit the address space
    pub payload: Vec<u8>,
}

/// True when `data` starts with a PSID or RSID magic.
pub fn detect(data: &[u8]) -> bool {
    matches!(data.get(0..4), Some(b"PSID") | Some(b"RSID"))
}

fn read_be_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

fn read_be_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Fixed-width, NUL-terminated Latin-1 field
fn read_string(data: &[u8], offset: usize) -> String {
    let field = &data[offset..offset + STRING_FIELD_LEN];
    let end = field.iter().position(|&b| b == 0).unwrap_or(STRING_FIELD_LEN);
    field[..end].iter().map(|&b| b as char).collect::<String>().trim_end().to_string()
}

impl SidFile {
    /// Parse a PSID/RSID file.
    pub fn parse(data: &[u8]) -> Result<SidFile> {
        if data.len() < HEADER_SIZE_V1 {
            return Err(SidError::DataTooShort {
                expected: HEADER_SIZE_V1,
                actual: data.len(),
            });
        }
        if !detect(data) {
            return Err(SidError::InvalidMagic([data[0], data[1], data[2], data[3]]));
        }
        let format = if &data[0..4] == b"RSID" {
            SidFormat::Rsid
        } else {
            SidFormat::Psid
        };

        let version = read_be_u16(data, 0x04);
        let data_offset = read_be_u16(data, 0x06) as usize;
        let header_load = read_be_u16(data, 0x08);
        let init_address = read_be_u16(data, 0x0A);
        let play_address = read_be_u16(data, 0x0C);
        let songs = read_be_u16(data, 0x0E).clamp(1, MAX_SONGS);
        let start_song = read_be_u16(data, 0x10);
        let speed = read_be_u32(data, 0x12);

        if data_offset > data.len() {
            return Err(SidError::InvalidHeader(format!(
                "data offset ${:04X} beyond end of file ({} bytes)",
                data_offset,
                data.len()
            )));
        }

        let (flags, start_page, page_length) =
            if version >= 2 && data_offset >= HEADER_SIZE_V2 && data.len() >= HEADER_SIZE_V2 {
                (
                    Some(read_be_u16(data, 0x76)),
                    Some(data[0x78]),
                    Some(data[0x79]),
                )
            } else {
                (None, None, None)
            };

        let mut payload = &data[data_offset..];
        let load_address = if header_load == 0 {
            if payload.len() < 2 {
                return Err(SidError::InvalidHeader(
                    "missing embedded load address".to_string(),
                ));
            }
            let addr = u16::from_le_bytes([payload[0], payload[1]]);
            payload = &payload[2..];
            addr
        } else {
            header_load
        };

        let room = (ADDRESS_SPACE - load_address as u32) as usize;
        if payload.len() > room {
            log::warn!(
                "payload of {} bytes at ${:04X} truncated to {} bytes",
                payload.len(),
                load_address,
                room
            );
            payload = &payload[..room];
        }
        let load_end = load_address as u32 + payload.len() as u32;

        let default_subsong = start_song.saturating_sub(1).min(songs - 1) as u8;

        let info = SongInfo {
            format,
            version,
            title: read_string(data, 0x16),
            author: read_string(data, 0x36),
            released: read_string(data, 0x56),
            load_address,
            load_end,
            init_address,
            play_address,
            songs,
            default_subsong,
            speed,
            flags,
            start_page,
            page_length,
        };

        Ok(SidFile {
            info,
            payload: payload.to_vec(),
        })
    }

    /// Copy the program image to its load address and return the exclusive
    /// end address.
    pub fn copy_into(&self, memory: &mut C64Memory) -> u32 {
        memory.load(self.info.load_address, &self.payload)
    }
}
