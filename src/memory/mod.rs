//! C64 memory image
//!
//! A flat 64 KB RAM with the SID window at $D400-$D41F redirected to the
//! [`SidBridge`]. No other I/O chips, ROMs or bank switching are modelled.

pub mod bridge;
pub mod registers;

pub use bridge::{SidBridge, GATE_VELOCITY};
pub use registers::{
    freq_to_midi_note, ControlFlags, FilterRouting, Register, RegisterCache, VoiceRegister,
    SID_BASE, SID_WINDOW, VOICE_STRIDE,
};

use crate::cpu::CpuMemory;

/// Size of the address space
pub const RAM_SIZE: usize = 0x1_0000;

/// 64 KB RAM plus the memory-mapped SID
#[derive(Debug, Clone)]
pub struct C64Memory {
    ram: Box<[u8]>,
    sid: SidBridge,
}

impl C64Memory {
    /// Zeroed RAM and a silent SID rendering at `sample_rate`.
    pub fn new(sample_rate: u32) -> Self {
        C64Memory {
            ram: vec![0u8; RAM_SIZE].into_boxed_slice(),
            sid: SidBridge::new(sample_rate),
        }
    }

    /// Whether `addr` falls inside the SID window
    pub fn is_sid_address(addr: u16) -> bool {
        (SID_BASE..SID_BASE + SID_WINDOW).contains(&addr)
    }

    /// Zero all RAM (the SID is untouched).
    pub fn clear_ram(&mut self) {
        self.ram.fill(0);
    }

    /// Copy `data` to `addr`, truncating at the top of memory. Returns the
    /// exclusive end address as a 32-bit value (can be $10000).
    pub fn load(&mut self, addr: u16, data: &[u8]) -> u32 {
        let start = addr as usize;
        let len = data.len().min(RAM_SIZE - start);
        self.ram[start..start + len].copy_from_slice(&data[..len]);
        (start + len) as u32
    }

    /// Read RAM directly, bypassing the SID window.
    pub fn peek(&self, addr: u16) -> u8 {
        self.ram[addr as usize]
    }

    /// Little-endian word from RAM.
    pub fn peek_word(&self, addr: u16) -> u16 {
        u16::from_le_bytes([self.peek(addr), self.peek(addr.wrapping_add(1))])
    }

    /// SID register bridge
    pub fn sid(&self) -> &SidBridge {
        &self.sid
    }

    /// Mutable SID register bridge
    pub fn sid_mut(&mut self) -> &mut SidBridge {
        &mut self.sid
    }
}

impl CpuMemory for C64Memory {
    fn read(&mut self, addr: u16) -> u8 {
        if Self::is_sid_address(addr) {
            self.sid.read((addr - SID_BASE) as u8)
        } else {
            self.ram[addr as usize]
        }
    }

    fn write(&mut self, addr: u16, value: u8) {
        if Self::is_sid_address(addr) {
            self.sid.write((addr - SID_BASE) as u8, value);
        } else {
            self.ram[addr as usize] = value;
        }
    }
}
