//! MOS 6502 processor core
//!
//! Instruction-level (not cycle-stepped) NMOS 6502 emulation. The core owns
//! only its registers; all memory traffic goes through a [`CpuMemory`]
//! implementation supplied to [`Mos6502::step`], so the same core can drive
//! plain RAM in tests or the C64 memory map with its SID window.
//!
//! Opcodes the core does not execute are logged (rate-limited per instance)
//! and skipped using a best-effort operand length, so a stray byte in a song
//! never aborts playback.

pub mod opcodes;

use bitflags::bitflags;
use opcodes::{decode, guess_operand_len, AddrMode, Mnemonic};

/// Base address of the hardware stack page
pub const STACK_BASE: u16 = 0x0100;
/// IRQ/BRK vector
pub const IRQ_VECTOR: u16 = 0xFFFE;
/// Default number of unknown-opcode diagnostics before going quiet
pub const DEFAULT_UNKNOWN_OPCODE_LOG_LIMIT: u32 = 20;

/// Memory access trait for the processor core.
///
/// Implementations decide what lives behind each address (RAM, memory-mapped
/// chips). Reads take `&mut self` so implementations may track accesses.
pub trait CpuMemory {
    /// Read a byte from memory.
    fn read(&mut self, addr: u16) -> u8;

    /// Write a byte to memory.
    fn write(&mut self, addr: u16, value: u8);
}

impl CpuMemory for [u8; 0x10000] {
    fn read(&mut self, addr: u16) -> u8 {
        self[addr as usize]
    }

    fn write(&mut self, addr: u16, value: u8) {
        self[addr as usize] = value;
    }
}

bitflags! {
    /// Processor status register (P)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StatusFlags: u8 {
        /// Carry
        const CARRY = 0x01;
        /// Zero
        const ZERO = 0x02;
        /// Interrupt disable
        const IRQ_DISABLE = 0x04;
        /// Decimal mode
        const DECIMAL = 0x08;
        /// Break (only meaningful in pushed copies)
        const BREAK = 0x10;
        /// Unused, reads back as 1 when pushed
        const UNUSED = 0x20;
        /// Overflow
        const OVERFLOW = 0x40;
        /// Negative
        const NEGATIVE = 0x80;
    }
}

/// Resolved operand of a decoded instruction
#[derive(Debug, Clone, Copy)]
enum Operand {
    None,
    Accumulator,
    Memory { addr: u16, page_crossed: bool },
    Branch(u16),
}

/// MOS 6502 register file and execution state
#[derive(Debug, Clone)]
pub struct Mos6502 {
    /// Program counter
    pub pc: u16,
    /// Accumulator
    pub a: u8,
    /// X index
    pub x: u8,
    /// Y index
    pub y: u8,
    /// Stack pointer (offset into page $01)
    pub sp: u8,
    /// Status flags
    pub status: StatusFlags,
    total_cycles: u64,
    unknown_opcodes: u32,
    unknown_opcode_log_limit: u32,
}

impl Mos6502 {
    /// Create a CPU in reset state.
    pub fn new() -> Self {
        Mos6502 {
            pc: 0,
            a: 0,
            x: 0,
            y: 0,
            sp: 0xFF,
            status: StatusFlags::IRQ_DISABLE,
            total_cycles: 0,
            unknown_opcodes: 0,
            unknown_opcode_log_limit: DEFAULT_UNKNOWN_OPCODE_LOG_LIMIT,
        }
    }

    /// Reset registers: A/X/Y/PC zero, SP $FF, only interrupt-disable set.
    ///
    /// Diagnostic counters survive a reset.
    pub fn reset(&mut self) {
        self.pc = 0;
        self.a = 0;
        self.x = 0;
        self.y = 0;
        self.sp = 0xFF;
        self.status = StatusFlags::IRQ_DISABLE;
    }

    /// Total cycles executed since construction.
    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    /// Number of unknown opcodes encountered since construction.
    pub fn unknown_opcode_count(&self) -> u32 {
        self.unknown_opcodes
    }

    /// Limit the number of unknown-opcode warnings emitted by this instance.
    pub fn set_unknown_opcode_log_limit(&mut self, limit: u32) {
        self.unknown_opcode_log_limit = limit;
    }

    /// Push a byte onto the stack page. SP wraps within the page.
    pub fn push<M: CpuMemory + ?Sized>(&mut self, memory: &mut M, value: u8) {
        memory.write(STACK_BASE | self.sp as u16, value);
        self.sp = self.sp.wrapping_sub(1);
    }

    /// Pop a byte from the stack page.
    pub fn pop<M: CpuMemory + ?Sized>(&mut self, memory: &mut M) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        memory.read(STACK_BASE | self.sp as u16)
    }

    fn push_word<M: CpuMemory + ?Sized>(&mut self, memory: &mut M, value: u16) {
        self.push(memory, (value >> 8) as u8);
        self.push(memory, value as u8);
    }

    fn pop_word<M: CpuMemory + ?Sized>(&mut self, memory: &mut M) -> u16 {
        let lo = self.pop(memory) as u16;
        let hi = self.pop(memory) as u16;
        (hi << 8) | lo
    }

    fn fetch<M: CpuMemory + ?Sized>(&mut self, memory: &mut M) -> u8 {
        let value = memory.read(self.pc);
        self.pc = self.pc.wrapping_add(1);
        value
    }

    fn fetch_word<M: CpuMemory + ?Sized>(&mut self, memory: &mut M) -> u16 {
        let lo = self.fetch(memory) as u16;
        let hi = self.fetch(memory) as u16;
        (hi << 8) | lo
    }

    /// Execute one instruction and return the cycles it consumed.
    pub fn step<M: CpuMemory + ?Sized>(&mut self, memory: &mut M) -> u32 {
        let opcode_addr = self.pc;
        let opcode = self.fetch(memory);

        let Some(decoded) = decode(opcode) else {
            return self.skip_unknown(opcode_addr, opcode);
        };

        let operand = self.resolve(memory, decoded.mode);
        let mut cycles = decoded.cycles as u32;
        if let Operand::Memory {
            page_crossed: true, ..
        } = operand
        {
            if decoded.mnemonic.has_page_penalty() {
                cycles += 1;
            }
        }
        cycles += self.execute(memory, decoded.mnemonic, operand);

        self.total_cycles += cycles as u64;
        cycles
    }

    fn skip_unknown(&mut self, opcode_addr: u16, opcode: u8) -> u32 {
        self.unknown_opcodes = self.unknown_opcodes.saturating_add(1);
        if self.unknown_opcodes <= self.unknown_opcode_log_limit {
            log::warn!(
                "unsupported opcode ${:02X} at ${:04X}, skipping",
                opcode,
                opcode_addr
            );
            if self.unknown_opcodes == self.unknown_opcode_log_limit {
                log::warn!("further unsupported-opcode warnings suppressed");
            }
        }
        self.pc = self.pc.wrapping_add(guess_operand_len(opcode));
        self.total_cycles += 2;
        2
    }

    fn resolve<M: CpuMemory + ?Sized>(&mut self, memory: &mut M, mode: AddrMode) -> Operand {
        let direct = |addr: u16| Operand::Memory {
            addr,
            page_crossed: false,
        };
        let indexed = |base: u16, index: u8| {
            let addr = base.wrapping_add(index as u16);
            Operand::Memory {
                addr,
                page_crossed: (base & 0xFF00) != (addr & 0xFF00),
            }
        };

        match mode {
            AddrMode::Implied => Operand::None,
            AddrMode::Accumulator => Operand::Accumulator,
            AddrMode::Immediate => {
                let addr = self.pc;
                self.pc = self.pc.wrapping_add(1);
                direct(addr)
            }
            AddrMode::ZeroPage => direct(self.fetch(memory) as u16),
            AddrMode::ZeroPageX => direct(self.fetch(memory).wrapping_add(self.x) as u16),
            AddrMode::ZeroPageY => direct(self.fetch(memory).wrapping_add(self.y) as u16),
            AddrMode::Absolute => direct(self.fetch_word(memory)),
            AddrMode::AbsoluteX => {
                let base = self.fetch_word(memory);
                indexed(base, self.x)
            }
            AddrMode::AbsoluteY => {
                let base = self.fetch_word(memory);
                indexed(base, self.y)
            }
            AddrMode::Indirect => {
                // NMOS bug: the high byte is fetched without carrying into the page
                let ptr = self.fetch_word(memory);
                let lo = memory.read(ptr) as u16;
                let hi = memory.read((ptr & 0xFF00) | (ptr.wrapping_add(1) & 0x00FF)) as u16;
                direct((hi << 8) | lo)
            }
            AddrMode::IndirectX => {
                let zp = self.fetch(memory).wrapping_add(self.x);
                let lo = memory.read(zp as u16) as u16;
                let hi = memory.read(zp.wrapping_add(1) as u16) as u16;
                direct((hi << 8) | lo)
            }
            AddrMode::IndirectY => {
                let zp = self.fetch(memory);
                let lo = memory.read(zp as u16) as u16;
                let hi = memory.read(zp.wrapping_add(1) as u16) as u16;
                indexed((hi << 8) | lo, self.y)
            }
            AddrMode::Relative => {
                let offset = self.fetch(memory) as i8;
                Operand::Branch(self.pc.wrapping_add(offset as i16 as u16))
            }
        }
    }

    fn load<M: CpuMemory + ?Sized>(&mut self, memory: &mut M, operand: Operand) -> u8 {
        match operand {
            Operand::Accumulator => self.a,
            Operand::Memory { addr, .. } => memory.read(addr),
            Operand::None | Operand::Branch(_) => 0,
        }
    }

    fn store<M: CpuMemory + ?Sized>(&mut self, memory: &mut M, operand: Operand, value: u8) {
        match operand {
            Operand::Accumulator => self.a = value,
            Operand::Memory { addr, .. } => memory.write(addr, value),
            Operand::None | Operand::Branch(_) => {}
        }
    }

    fn set_nz(&mut self, value: u8) {
        self.status.set(StatusFlags::ZERO, value == 0);
        self.status.set(StatusFlags::NEGATIVE, value & 0x80 != 0);
    }

    fn carry(&self) -> u8 {
        self.status.contains(StatusFlags::CARRY) as u8
    }

    /// Binary add with carry; sets N, V, Z, C and returns the sum.
    fn add_binary(&mut self, value: u8) -> u8 {
        let sum = self.a as u16 + value as u16 + self.carry() as u16;
        let result = sum as u8;
        self.status.set(StatusFlags::CARRY, sum > 0xFF);
        self.status.set(
            StatusFlags::OVERFLOW,
            (self.a ^ result) & (value ^ result) & 0x80 != 0,
        );
        self.set_nz(result);
        result
    }

    fn adc(&mut self, value: u8) {
        if !self.status.contains(StatusFlags::DECIMAL) {
            self.a = self.add_binary(value);
            return;
        }

        // NMOS decimal mode: Z from the binary sum, N and V from the
        // intermediate high nibble, C from the adjusted result.
        let carry_in = self.carry() as u16;
        let binary = (self.a as u16 + value as u16 + carry_in) as u8;
        let mut lo = (self.a & 0x0F) as u16 + (value & 0x0F) as u16 + carry_in;
        if lo >= 0x0A {
            lo = ((lo + 0x06) & 0x0F) + 0x10;
        }
        let mut sum = (self.a & 0xF0) as u16 + (value & 0xF0) as u16 + lo;
        let intermediate = sum as u8;
        self.status.set(StatusFlags::NEGATIVE, intermediate & 0x80 != 0);
        self.status.set(
            StatusFlags::OVERFLOW,
            (self.a ^ intermediate) & (value ^ intermediate) & 0x80 != 0,
        );
        if sum >= 0xA0 {
            sum += 0x60;
        }
        self.status.set(StatusFlags::CARRY, sum >= 0x100);
        self.status.set(StatusFlags::ZERO, binary == 0);
        self.a = sum as u8;
    }

    fn sbc(&mut self, value: u8) {
        let a = self.a;
        let borrow = 1 - self.carry() as i16;
        // Flags always follow the binary subtraction on NMOS parts
        let binary = self.add_binary(!value);
        if !self.status.contains(StatusFlags::DECIMAL) {
            self.a = binary;
            return;
        }

        let mut lo = (a & 0x0F) as i16 - (value & 0x0F) as i16 - borrow;
        if lo < 0 {
            lo = ((lo - 0x06) & 0x0F) - 0x10;
        }
        let mut result = (a & 0xF0) as i16 - (value & 0xF0) as i16 + lo;
        if result < 0 {
            result -= 0x60;
        }
        self.a = result as u8;
    }

    fn compare(&mut self, register: u8, value: u8) {
        self.status.set(StatusFlags::CARRY, register >= value);
        self.set_nz(register.wrapping_sub(value));
    }

    fn asl(&mut self, value: u8) -> u8 {
        self.status.set(StatusFlags::CARRY, value & 0x80 != 0);
        let result = value << 1;
        self.set_nz(result);
        result
    }

    fn lsr(&mut self, value: u8) -> u8 {
        self.status.set(StatusFlags::CARRY, value & 0x01 != 0);
        let result = value >> 1;
        self.set_nz(result);
        result
    }

    fn rol(&mut self, value: u8) -> u8 {
        let result = (value << 1) | self.carry();
        self.status.set(StatusFlags::CARRY, value & 0x80 != 0);
        self.set_nz(result);
        result
    }

    fn ror(&mut self, value: u8) -> u8 {
        let result = (value >> 1) | (self.carry() << 7);
        self.status.set(StatusFlags::CARRY, value & 0x01 != 0);
        self.set_nz(result);
        result
    }

    /// Take a branch if `condition` holds; returns the extra cycles.
    fn branch(&mut self, operand: Operand, condition: bool) -> u32 {
        let Operand::Branch(target) = operand else {
            return 0;
        };
        if !condition {
            return 0;
        }
        let extra = if (self.pc & 0xFF00) != (target & 0xFF00) {
            2
        } else {
            1
        };
        self.pc = target;
        extra
    }

    fn pushed_status(&self) -> u8 {
        (self.status | StatusFlags::BREAK | StatusFlags::UNUSED).bits()
    }

    fn restore_status(&mut self, value: u8) {
        self.status = StatusFlags::from_bits_retain(value) - StatusFlags::BREAK;
    }

    /// Execute a decoded instruction; returns cycles beyond the base count.
    fn execute<M: CpuMemory + ?Sized>(
        &mut self,
        memory: &mut M,
        mnemonic: Mnemonic,
        operand: Operand,
    ) -> u32 {
        match mnemonic {
            Mnemonic::Adc => {
                let v = self.load(memory, operand);
                self.adc(v);
            }
            Mnemonic::Sbc => {
                let v = self.load(memory, operand);
                self.sbc(v);
            }
            Mnemonic::And => {
                self.a &= self.load(memory, operand);
                self.set_nz(self.a);
            }
            Mnemonic::Ora => {
                self.a |= self.load(memory, operand);
                self.set_nz(self.a);
            }
            Mnemonic::Eor => {
                self.a ^= self.load(memory, operand);
                self.set_nz(self.a);
            }
            Mnemonic::Asl => {
                let v = self.load(memory, operand);
                let r = self.asl(v);
                self.store(memory, operand, r);
            }
            Mnemonic::Lsr => {
                let v = self.load(memory, operand);
                let r = self.lsr(v);
                self.store(memory, operand, r);
            }
            Mnemonic::Rol => {
                let v = self.load(memory, operand);
                let r = self.rol(v);
                self.store(memory, operand, r);
            }
            Mnemonic::Ror => {
                let v = self.load(memory, operand);
                let r = self.ror(v);
                self.store(memory, operand, r);
            }

            Mnemonic::Bcc => {
                let taken = !self.status.contains(StatusFlags::CARRY);
                return self.branch(operand, taken);
            }
            Mnemonic::Bcs => {
                let taken = self.status.contains(StatusFlags::CARRY);
                return self.branch(operand, taken);
            }
            Mnemonic::Bne => {
                let taken = !self.status.contains(StatusFlags::ZERO);
                return self.branch(operand, taken);
            }
            Mnemonic::Beq => {
                let taken = self.status.contains(StatusFlags::ZERO);
                return self.branch(operand, taken);
            }
            Mnemonic::Bpl => {
                let taken = !self.status.contains(StatusFlags::NEGATIVE);
                return self.branch(operand, taken);
            }
            Mnemonic::Bmi => {
                let taken = self.status.contains(StatusFlags::NEGATIVE);
                return self.branch(operand, taken);
            }
            Mnemonic::Bvc => {
                let taken = !self.status.contains(StatusFlags::OVERFLOW);
                return self.branch(operand, taken);
            }
            Mnemonic::Bvs => {
                let taken = self.status.contains(StatusFlags::OVERFLOW);
                return self.branch(operand, taken);
            }

            Mnemonic::Bit => {
                let v = self.load(memory, operand);
                self.status.set(StatusFlags::ZERO, self.a & v == 0);
                self.status.set(StatusFlags::NEGATIVE, v & 0x80 != 0);
                self.status.set(StatusFlags::OVERFLOW, v & 0x40 != 0);
            }
            Mnemonic::Brk => {
                // BRK skips a padding byte
                let ret = self.pc.wrapping_add(1);
                self.push_word(memory, ret);
                let p = self.pushed_status();
                self.push(memory, p);
                self.status.insert(StatusFlags::IRQ_DISABLE);
                let lo = memory.read(IRQ_VECTOR) as u16;
                let hi = memory.read(IRQ_VECTOR.wrapping_add(1)) as u16;
                self.pc = (hi << 8) | lo;
            }

            Mnemonic::Clc => self.status.remove(StatusFlags::CARRY),
            Mnemonic::Cld => self.status.remove(StatusFlags::DECIMAL),
            Mnemonic::Cli => self.status.remove(StatusFlags::IRQ_DISABLE),
            Mnemonic::Clv => self.status.remove(StatusFlags::OVERFLOW),
            Mnemonic::Sec => self.status.insert(StatusFlags::CARRY),
            Mnemonic::Sed => self.status.insert(StatusFlags::DECIMAL),
            Mnemonic::Sei => self.status.insert(StatusFlags::IRQ_DISABLE),

            Mnemonic::Cmp => {
                let v = self.load(memory, operand);
                self.compare(self.a, v);
            }
            Mnemonic::Cpx => {
                let v = self.load(memory, operand);
                self.compare(self.x, v);
            }
            Mnemonic::Cpy => {
                let v = self.load(memory, operand);
                self.compare(self.y, v);
            }

            Mnemonic::Dec => {
                let r = self.load(memory, operand).wrapping_sub(1);
                self.store(memory, operand, r);
                self.set_nz(r);
            }
            Mnemonic::Inc => {
                let r = self.load(memory, operand).wrapping_add(1);
                self.store(memory, operand, r);
                self.set_nz(r);
            }
            Mnemonic::Dex => {
                self.x = self.x.wrapping_sub(1);
                self.set_nz(self.x);
            }
            Mnemonic::Dey => {
                self.y = self.y.wrapping_sub(1);
                self.set_nz(self.y);
            }
            Mnemonic::Inx => {
                self.x = self.x.wrapping_add(1);
                self.set_nz(self.x);
            }
            Mnemonic::Iny => {
                self.y = self.y.wrapping_add(1);
                self.set_nz(self.y);
            }

            Mnemonic::Jmp => {
                if let Operand::Memory { addr, .. } = operand {
                    self.pc = addr;
                }
            }
            Mnemonic::Jsr => {
                if let Operand::Memory { addr, .. } = operand {
                    let ret = self.pc.wrapping_sub(1);
                    self.push_word(memory, ret);
                    self.pc = addr;
                }
            }
            Mnemonic::Rts => {
                self.pc = self.pop_word(memory).wrapping_add(1);
            }
            Mnemonic::Rti => {
                let p = self.pop(memory);
                self.restore_status(p);
                self.pc = self.pop_word(memory);
            }

            Mnemonic::Lda => {
                self.a = self.load(memory, operand);
                self.set_nz(self.a);
            }
            Mnemonic::Ldx => {
                self.x = self.load(memory, operand);
                self.set_nz(self.x);
            }
            Mnemonic::Ldy => {
                self.y = self.load(memory, operand);
                self.set_nz(self.y);
            }
            Mnemonic::Sta => self.store(memory, operand, self.a),
            Mnemonic::Stx => self.store(memory, operand, self.x),
            Mnemonic::Sty => self.store(memory, operand, self.y),

            Mnemonic::Nop => {}

            Mnemonic::Pha => self.push(memory, self.a),
            Mnemonic::Php => {
                let p = self.pushed_status();
                self.push(memory, p);
            }
            Mnemonic::Pla => {
                self.a = self.pop(memory);
                self.set_nz(self.a);
            }
            Mnemonic::Plp => {
                let p = self.pop(memory);
                self.restore_status(p);
            }

            Mnemonic::Tax => {
                self.x = self.a;
                self.set_nz(self.x);
            }
            Mnemonic::Tay => {
                self.y = self.a;
                self.set_nz(self.y);
            }
            Mnemonic::Tsx => {
                self.x = self.sp;
                self.set_nz(self.x);
            }
            Mnemonic::Txa => {
                self.a = self.x;
                self.set_nz(self.a);
            }
            Mnemonic::Txs => self.sp = self.x,
            Mnemonic::Tya => {
                self.a = self.y;
                self.set_nz(self.a);
            }

            Mnemonic::Alr => {
                let v = self.load(memory, operand);
                self.a = self.lsr(self.a & v);
            }
            Mnemonic::Anc => {
                self.a &= self.load(memory, operand);
                self.set_nz(self.a);
                self.status.set(StatusFlags::CARRY, self.a & 0x80 != 0);
            }
            Mnemonic::Dcp => {
                let r = self.load(memory, operand).wrapping_sub(1);
                self.store(memory, operand, r);
                self.compare(self.a, r);
            }
            Mnemonic::Isc => {
                let r = self.load(memory, operand).wrapping_add(1);
                self.store(memory, operand, r);
                self.sbc(r);
            }
            Mnemonic::Lax => {
                self.a = self.load(memory, operand);
                self.x = self.a;
                self.set_nz(self.a);
            }
            Mnemonic::Rla => {
                let v = self.load(memory, operand);
                let r = self.rol(v);
                self.store(memory, operand, r);
                self.a &= r;
                self.set_nz(self.a);
            }
            Mnemonic::Rra => {
                let v = self.load(memory, operand);
                let r = self.ror(v);
                self.store(memory, operand, r);
                self.adc(r);
            }
            Mnemonic::Sax => self.store(memory, operand, self.a & self.x),
            Mnemonic::Slo => {
                let v = self.load(memory, operand);
                let r = self.asl(v);
                self.store(memory, operand, r);
                self.a |= r;
                self.set_nz(self.a);
            }
            Mnemonic::Sre => {
                let v = self.load(memory, operand);
                let r = self.lsr(v);
                self.store(memory, operand, r);
                self.a ^= r;
                self.set_nz(self.a);
            }
        }
        0
    }
}

impl Default for Mos6502 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ram_with(program: &[u8], at: u16) -> Box<[u8; 0x10000]> {
        let mut ram = Box::new([0u8; 0x10000]);
        ram[at as usize..at as usize + program.len()].copy_from_slice(program);
        ram
    }

    fn run(cpu: &mut Mos6502, ram: &mut [u8; 0x10000], steps: usize) {
        for _ in 0..steps {
            cpu.step(ram);
        }
    }

    #[test]
    fn test_reset_state() {
        let mut cpu = Mos6502::new();
        cpu.a = 0x12;
        cpu.pc = 0x1234;
        cpu.sp = 0x80;
        cpu.status = StatusFlags::all();
        cpu.reset();
        assert_eq!(cpu.sp, 0xFF);
        assert_eq!(cpu.status.bits(), 0x04);
        assert_eq!((cpu.a, cpu.x, cpu.y, cpu.pc), (0, 0, 0, 0));
    }

    #[test]
    fn test_push_pop() {
        let mut ram = Box::new([0u8; 0x10000]);
        let mut cpu = Mos6502::new();
        cpu.push(&mut *ram, 0xAB);
        assert_eq!(ram[0x01FF], 0xAB);
        assert_eq!(cpu.sp, 0xFE);
        assert_eq!(cpu.pop(&mut *ram), 0xAB);
        assert_eq!(cpu.sp, 0xFF);
    }

    #[test]
    fn test_jsr_rts() {
        // $1000: JSR $2000 ; $2000: RTS
        let mut ram = ram_with(&[0x20, 0x00, 0x20], 0x1000);
        ram[0x2000] = 0x60;
        let mut cpu = Mos6502::new();
        cpu.pc = 0x1000;
        assert_eq!(cpu.step(&mut *ram), 6);
        assert_eq!(cpu.pc, 0x2000);
        // Return address - 1 on the stack, high byte first
        assert_eq!(ram[0x01FF], 0x10);
        assert_eq!(ram[0x01FE], 0x02);
        cpu.step(&mut *ram);
        assert_eq!(cpu.pc, 0x1003);
        assert_eq!(cpu.sp, 0xFF);
    }

    #[test]
    fn test_adc_overflow() {
        // LDA #$50 ; ADC #$50
        let mut ram = ram_with(&[0xA9, 0x50, 0x69, 0x50], 0);
        let mut cpu = Mos6502::new();
        run(&mut cpu, &mut ram, 2);
        assert_eq!(cpu.a, 0xA0);
        assert!(cpu.status.contains(StatusFlags::OVERFLOW));
        assert!(cpu.status.contains(StatusFlags::NEGATIVE));
        assert!(!cpu.status.contains(StatusFlags::CARRY));
    }

    #[test]
    fn test_adc_carry_and_zero() {
        // SEC ; LDA #$FF ; ADC #$00
        let mut ram = ram_with(&[0x38, 0xA9, 0xFF, 0x69, 0x00], 0);
        let mut cpu = Mos6502::new();
        run(&mut cpu, &mut ram, 3);
        assert_eq!(cpu.a, 0x00);
        assert!(cpu.status.contains(StatusFlags::CARRY));
        assert!(cpu.status.contains(StatusFlags::ZERO));
        assert!(!cpu.status.contains(StatusFlags::OVERFLOW));
    }

    #[test]
    fn test_sbc_borrow() {
        // SEC ; LDA #$10 ; SBC #$20
        let mut ram = ram_with(&[0x38, 0xA9, 0x10, 0xE9, 0x20], 0);
        let mut cpu = Mos6502::new();
        run(&mut cpu, &mut ram, 3);
        assert_eq!(cpu.a, 0xF0);
        assert!(!cpu.status.contains(StatusFlags::CARRY));
        assert!(cpu.status.contains(StatusFlags::NEGATIVE));
    }

    #[test]
    fn test_decimal_mode() {
        // SED ; CLC ; LDA #$15 ; ADC #$27
        let mut ram = ram_with(&[0xF8, 0x18, 0xA9, 0x15, 0x69, 0x27], 0);
        let mut cpu = Mos6502::new();
        run(&mut cpu, &mut ram, 4);
        assert_eq!(cpu.a, 0x42);
        assert!(!cpu.status.contains(StatusFlags::CARRY));

        // SED ; SEC ; LDA #$58 ; ADC #$46 -> $05 carry
        let mut ram = ram_with(&[0xF8, 0x38, 0xA9, 0x58, 0x69, 0x46], 0);
        let mut cpu = Mos6502::new();
        run(&mut cpu, &mut ram, 4);
        assert_eq!(cpu.a, 0x05);
        assert!(cpu.status.contains(StatusFlags::CARRY));

        // SED ; SEC ; LDA #$42 ; SBC #$13 -> $29
        let mut ram = ram_with(&[0xF8, 0x38, 0xA9, 0x42, 0xE9, 0x13], 0);
        let mut cpu = Mos6502::new();
        run(&mut cpu, &mut ram, 4);
        assert_eq!(cpu.a, 0x29);
        assert!(cpu.status.contains(StatusFlags::CARRY));
    }

    #[test]
    fn test_branch_taken_and_not_taken() {
        // LDX #$03 ; loop: DEX ; BNE loop ; NOP
        let mut ram = ram_with(&[0xA2, 0x03, 0xCA, 0xD0, 0xFD, 0xEA], 0x0200);
        let mut cpu = Mos6502::new();
        cpu.pc = 0x0200;
        cpu.step(&mut *ram);
        let mut cycles = 0;
        while cpu.pc != 0x0205 {
            cycles += cpu.step(&mut *ram);
        }
        assert_eq!(cpu.x, 0);
        // 3 x DEX (2) + 2 taken BNE (3) + 1 untaken BNE (2)
        assert_eq!(cycles, 6 + 6 + 2);
    }

    #[test]
    fn test_jmp_indirect_page_wrap() {
        let mut ram = ram_with(&[0x6C, 0xFF, 0x30], 0);
        ram[0x30FF] = 0x80;
        ram[0x3000] = 0x50;
        ram[0x3100] = 0x40;
        let mut cpu = Mos6502::new();
        cpu.step(&mut *ram);
        assert_eq!(cpu.pc, 0x5080);
    }

    #[test]
    fn test_indirect_y_page_cross_penalty() {
        // LDY #$01 ; LDA ($10),Y with pointer $12FF
        let mut ram = ram_with(&[0xA0, 0x01, 0xB1, 0x10], 0x0400);
        ram[0x10] = 0xFF;
        ram[0x11] = 0x12;
        ram[0x1300] = 0x77;
        let mut cpu = Mos6502::new();
        cpu.pc = 0x0400;
        cpu.step(&mut *ram);
        assert_eq!(cpu.step(&mut *ram), 6);
        assert_eq!(cpu.a, 0x77);
    }

    #[test]
    fn test_brk_rti_round_trip() {
        let mut ram = ram_with(&[0x00, 0xEA, 0xEA], 0x0300);
        ram[0xFFFE] = 0x00;
        ram[0xFFFF] = 0x40;
        ram[0x4000] = 0x40; // RTI
        let mut cpu = Mos6502::new();
        cpu.pc = 0x0300;
        cpu.status = StatusFlags::CARRY;
        cpu.step(&mut *ram);
        assert_eq!(cpu.pc, 0x4000);
        assert!(cpu.status.contains(StatusFlags::IRQ_DISABLE));
        assert_eq!(ram[0x01FD] & 0x30, 0x30);
        cpu.step(&mut *ram);
        assert_eq!(cpu.pc, 0x0302);
        assert_eq!(cpu.status, StatusFlags::CARRY | StatusFlags::UNUSED);
    }

    #[test]
    fn test_rmw_illegal_opcodes() {
        // LDA #$01 ; SLO $10 (mem $40 -> $80, A = $81)
        let mut ram = ram_with(&[0xA9, 0x01, 0x07, 0x10], 0);
        ram[0x10] = 0x40;
        let mut cpu = Mos6502::new();
        run(&mut cpu, &mut ram, 2);
        assert_eq!(ram[0x10], 0x80);
        assert_eq!(cpu.a, 0x81);

        // LDA #$05 ; DCP $10 (mem $06 -> $05, compare equal)
        let mut ram = ram_with(&[0xA9, 0x05, 0xC7, 0x10], 0);
        ram[0x10] = 0x06;
        let mut cpu = Mos6502::new();
        run(&mut cpu, &mut ram, 2);
        assert_eq!(ram[0x10], 0x05);
        assert!(cpu.status.contains(StatusFlags::ZERO | StatusFlags::CARRY));

        // LAX $10
        let mut ram = ram_with(&[0xA7, 0x10], 0);
        ram[0x10] = 0x9C;
        let mut cpu = Mos6502::new();
        cpu.step(&mut *ram);
        assert_eq!((cpu.a, cpu.x), (0x9C, 0x9C));
    }

    #[test]
    fn test_unknown_opcode_is_skipped() {
        // $9C (SHY abs,X) is not executed: skip two operand bytes
        let mut ram = ram_with(&[0x9C, 0x34, 0x12, 0xA9, 0x07], 0x0600);
        let mut cpu = Mos6502::new();
        cpu.set_unknown_opcode_log_limit(1);
        cpu.pc = 0x0600;
        assert_eq!(cpu.step(&mut *ram), 2);
        assert_eq!(cpu.pc, 0x0603);
        cpu.step(&mut *ram);
        assert_eq!(cpu.a, 0x07);

        // JAM has no operand
        ram[0x0605] = 0x02;
        cpu.step(&mut *ram);
        assert_eq!(cpu.pc, 0x0606);
        assert_eq!(cpu.unknown_opcode_count(), 2);
    }

    #[test]
    fn test_zero_page_index_wraps() {
        // LDX #$FF ; LDA $10,X -> reads $0F
        let mut ram = ram_with(&[0xA2, 0xFF, 0xB5, 0x10], 0x0200);
        ram[0x0F] = 0x3C;
        let mut cpu = Mos6502::new();
        cpu.pc = 0x0200;
        run(&mut cpu, &mut ram, 2);
        assert_eq!(cpu.a, 0x3C);
    }
}
