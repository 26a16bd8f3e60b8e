//! Opcode decode table
//!
//! Maps each opcode byte to its mnemonic, addressing mode and base cycle
//! count. Every documented NMOS opcode is present, plus the undocumented
//! read-modify-write combos and NOP variants that C64 music drivers rely on.
//! The remaining undocumented opcodes (JAM and the unstable ones) decode to
//! `None` and are skipped by the core.

/// Addressing modes of the 6502
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrMode {
    /// No operand
    Implied,
    /// Operates on the accumulator
    Accumulator,
    /// `#nn`
    Immediate,
    /// `nn`
    ZeroPage,
    /// `nn,X` (wraps within page zero)
    ZeroPageX,
    /// `nn,Y` (wraps within page zero)
    ZeroPageY,
    /// `nnnn`
    Absolute,
    /// `nnnn,X`
    AbsoluteX,
    /// `nnnn,Y`
    AbsoluteY,
    /// `(nnnn)`, JMP only
    Indirect,
    /// `(nn,X)`
    IndirectX,
    /// `(nn),Y`
    IndirectY,
    /// Signed branch offset
    Relative,
}

impl AddrMode {
    /// Number of operand bytes following the opcode
    pub const fn operand_len(self) -> u16 {
        match self {
            AddrMode::Implied | AddrMode::Accumulator => 0,
            AddrMode::Absolute
            | AddrMode::AbsoluteX
            | AddrMode::AbsoluteY
            | AddrMode::Indirect => 2,
            _ => 1,
        }
    }
}

/// Instruction mnemonics understood by the core
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mnemonic {
    Adc,
    And,
    Asl,
    Bcc,
    Bcs,
    Beq,
    Bit,
    Bmi,
    Bne,
    Bpl,
    Brk,
    Bvc,
    Bvs,
    Clc,
    Cld,
    Cli,
    Clv,
    Cmp,
    Cpx,
    Cpy,
    Dec,
    Dex,
    Dey,
    Eor,
    Inc,
    Inx,
    Iny,
    Jmp,
    Jsr,
    Lda,
    Ldx,
    Ldy,
    Lsr,
    Nop,
    Ora,
    Pha,
    Php,
    Pla,
    Plp,
    Rol,
    Ror,
    Rti,
    Rts,
    Sbc,
    Sec,
    Sed,
    Sei,
    Sta,
    Stx,
    Sty,
    Tax,
    Tay,
    Tsx,
    Txa,
    Txs,
    Tya,
    // Undocumented
    Alr,
    Anc,
    Dcp,
    Isc,
    Lax,
    Rla,
    Rra,
    Sax,
    Slo,
    Sre,
}

impl Mnemonic {
    /// Whether an indexed page crossing costs an extra cycle
    pub const fn has_page_penalty(self) -> bool {
        matches!(
            self,
            Mnemonic::Adc
                | Mnemonic::And
                | Mnemonic::Cmp
                | Mnemonic::Eor
                | Mnemonic::Lda
                | Mnemonic::Ldx
                | Mnemonic::Ldy
                | Mnemonic::Ora
                | Mnemonic::Sbc
                | Mnemonic::Lax
                | Mnemonic::Nop
        )
    }
}

/// A decoded opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcode {
    /// Operation
    pub mnemonic: Mnemonic,
    /// Operand addressing
    pub mode: AddrMode,
    /// Base cycle count, before page-cross and branch penalties
    pub cycles: u8,
}

const fn op(mnemonic: Mnemonic, mode: AddrMode, cycles: u8) -> Option<Opcode> {
    Some(Opcode {
        mnemonic,
        mode,
        cycles,
    })
}

/// Decode an opcode byte. Returns `None` for opcodes the core does not execute.
pub const fn decode(opcode: u8) -> Option<Opcode> {
    use AddrMode::*;
    use Mnemonic::*;

    match opcode {
        0x69 => op(Adc, Immediate, 2),
        0x65 => op(Adc, ZeroPage, 3),
        0x75 => op(Adc, ZeroPageX, 4),
        0x6D => op(Adc, Absolute, 4),
        0x7D => op(Adc, AbsoluteX, 4),
        0x79 => op(Adc, AbsoluteY, 4),
        0x61 => op(Adc, IndirectX, 6),
        0x71 => op(Adc, IndirectY, 5),

        0x29 => op(And, Immediate, 2),
        0x25 => op(And, ZeroPage, 3),
        0x35 => op(And, ZeroPageX, 4),
        0x2D => op(And, Absolute, 4),
        0x3D => op(And, AbsoluteX, 4),
        0x39 => op(And, AbsoluteY, 4),
        0x21 => op(And, IndirectX, 6),
        0x31 => op(And, IndirectY, 5),

        0x0A => op(Asl, Accumulator, 2),
        0x06 => op(Asl, ZeroPage, 5),
        0x16 => op(Asl, ZeroPageX, 6),
        0x0E => op(Asl, Absolute, 6),
        0x1E => op(Asl, AbsoluteX, 7),

        0x90 => op(Bcc, Relative, 2),
        0xB0 => op(Bcs, Relative, 2),
        0xF0 => op(Beq, Relative, 2),
        0x30 => op(Bmi, Relative, 2),
        0xD0 => op(Bne, Relative, 2),
        0x10 => op(Bpl, Relative, 2),
        0x50 => op(Bvc, Relative, 2),
        0x70 => op(Bvs, Relative, 2),

        0x24 => op(Bit, ZeroPage, 3),
        0x2C => op(Bit, Absolute, 4),

        0x00 => op(Brk, Implied, 7),

        0x18 => op(Clc, Implied, 2),
        0xD8 => op(Cld, Implied, 2),
        0x58 => op(Cli, Implied, 2),
        0xB8 => op(Clv, Implied, 2),

        0xC9 => op(Cmp, Immediate, 2),
        0xC5 => op(Cmp, ZeroPage, 3),
        0xD5 => op(Cmp, ZeroPageX, 4),
        0xCD => op(Cmp, Absolute, 4),
        0xDD => op(Cmp, AbsoluteX, 4),
        0xD9 => op(Cmp, AbsoluteY, 4),
        0xC1 => op(Cmp, IndirectX, 6),
        0xD1 => op(Cmp, IndirectY, 5),

        0xE0 => op(Cpx, Immediate, 2),
        0xE4 => op(Cpx, ZeroPage, 3),
        0xEC => op(Cpx, Absolute, 4),

        0xC0 => op(Cpy, Immediate, 2),
        0xC4 => op(Cpy, ZeroPage, 3),
        0xCC => op(Cpy, Absolute, 4),

        0xC6 => op(Dec, ZeroPage, 5),
        0xD6 => op(Dec, ZeroPageX, 6),
        0xCE => op(Dec, Absolute, 6),
        0xDE => op(Dec, AbsoluteX, 7),
        0xCA => op(Dex, Implied, 2),
        0x88 => op(Dey, Implied, 2),

        0x49 => op(Eor, Immediate, 2),
        0x45 => op(Eor, ZeroPage, 3),
        0x55 => op(Eor, ZeroPageX, 4),
        0x4D => op(Eor, Absolute, 4),
        0x5D => op(Eor, AbsoluteX, 4),
        0x59 => op(Eor, AbsoluteY, 4),
        0x41 => op(Eor, IndirectX, 6),
        0x51 => op(Eor, IndirectY, 5),

        0xE6 => op(Inc, ZeroPage, 5),
        0xF6 => op(Inc, ZeroPageX, 6),
        0xEE => op(Inc, Absolute, 6),
        0xFE => op(Inc, AbsoluteX, 7),
        0xE8 => op(Inx, Implied, 2),
        0xC8 => op(Iny, Implied, 2),

        0x4C => op(Jmp, Absolute, 3),
        0x6C => op(Jmp, Indirect, 5),
        0x20 => op(Jsr, Absolute, 6),

        0xA9 => op(Lda, Immediate, 2),
        0xA5 => op(Lda, ZeroPage, 3),
        0xB5 => op(Lda, ZeroPageX, 4),
        0xAD => op(Lda, Absolute, 4),
        0xBD => op(Lda, AbsoluteX, 4),
        0xB9 => op(Lda, AbsoluteY, 4),
        0xA1 => op(Lda, IndirectX, 6),
        0xB1 => op(Lda, IndirectY, 5),

        0xA2 => op(Ldx, Immediate, 2),
        0xA6 => op(Ldx, ZeroPage, 3),
        0xB6 => op(Ldx, ZeroPageY, 4),
        0xAE => op(Ldx, Absolute, 4),
        0xBE => op(Ldx, AbsoluteY, 4),

        0xA0 => op(Ldy, Immediate, 2),
        0xA4 => op(Ldy, ZeroPage, 3),
        0xB4 => op(Ldy, ZeroPageX, 4),
        0xAC => op(Ldy, Absolute, 4),
        0xBC => op(Ldy, AbsoluteX, 4),

        0x4A => op(Lsr, Accumulator, 2),
        0x46 => op(Lsr, ZeroPage, 5),
        0x56 => op(Lsr, ZeroPageX, 6),
        0x4E => op(Lsr, Absolute, 6),
        0x5E => op(Lsr, AbsoluteX, 7),

        0xEA => op(Nop, Implied, 2),

        0x09 => op(Ora, Immediate, 2),
        0x05 => op(Ora, ZeroPage, 3),
        0x15 => op(Ora, ZeroPageX, 4),
        0x0D => op(Ora, Absolute, 4),
        0x1D => op(Ora, AbsoluteX, 4),
        0x19 => op(Ora, AbsoluteY, 4),
        0x01 => op(Ora, IndirectX, 6),
        0x11 => op(Ora, IndirectY, 5),

        0x48 => op(Pha, Implied, 3),
        0x08 => op(Php, Implied, 3),
        0x68 => op(Pla, Implied, 4),
        0x28 => op(Plp, Implied, 4),

        0x2A => op(Rol, Accumulator, 2),
        0x26 => op(Rol, ZeroPage, 5),
        0x36 => op(Rol, ZeroPageX, 6),
        0x2E => op(Rol, Absolute, 6),
        0x3E => op(Rol, AbsoluteX, 7),

        0x6A => op(Ror, Accumulator, 2),
        0x66 => op(Ror, ZeroPage, 5),
        0x76 => op(Ror, ZeroPageX, 6),
        0x6E => op(Ror, Absolute, 6),
        0x7E => op(Ror, AbsoluteX, 7),

        0x40 => op(Rti, Implied, 6),
        0x60 => op(Rts, Implied, 6),

        0xE9 | 0xEB => op(Sbc, Immediate, 2),
        0xE5 => op(Sbc, ZeroPage, 3),
        0xF5 => op(Sbc, ZeroPageX, 4),
        0xED => op(Sbc, Absolute, 4),
        0xFD => op(Sbc, AbsoluteX, 4),
        0xF9 => op(Sbc, AbsoluteY, 4),
        0xE1 => op(Sbc, IndirectX, 6),
        0xF1 => op(Sbc, IndirectY, 5),

        0x38 => op(Sec, Implied, 2),
        0xF8 => op(Sed, Implied, 2),
        0x78 => op(Sei, Implied, 2),

        0x85 => op(Sta, ZeroPage, 3),
        0x95 => op(Sta, ZeroPageX, 4),
        0x8D => op(Sta, Absolute, 4),
        0x9D => op(Sta, AbsoluteX, 5),
        0x99 => op(Sta, AbsoluteY, 5),
        0x81 => op(Sta, IndirectX, 6),
        0x91 => op(Sta, IndirectY, 6),

        0x86 => op(Stx, ZeroPage, 3),
        0x96 => op(Stx, ZeroPageY, 4),
        0x8E => op(Stx, Absolute, 4),

        0x84 => op(Sty, ZeroPage, 3),
        0x94 => op(Sty, ZeroPageX, 4),
        0x8C => op(Sty, Absolute, 4),

        0xAA => op(Tax, Implied, 2),
        0xA8 => op(Tay, Implied, 2),
        0xBA => op(Tsx, Implied, 2),
        0x8A => op(Txa, Implied, 2),
        0x9A => op(Txs, Implied, 2),
        0x98 => op(Tya, Implied, 2),

        // Undocumented
        0x4B => op(Alr, Immediate, 2),
        0x0B | 0x2B => op(Anc, Immediate, 2),

        0xC7 => op(Dcp, ZeroPage, 5),
        0xD7 => op(Dcp, ZeroPageX, 6),
        0xCF => op(Dcp, Absolute, 6),
        0xDF => op(Dcp, AbsoluteX, 7),
        0xDB => op(Dcp, AbsoluteY, 7),
        0xC3 => op(Dcp, IndirectX, 8),
        0xD3 => op(Dcp, IndirectY, 8),

        0xE7 => op(Isc, ZeroPage, 5),
        0xF7 => op(Isc, ZeroPageX, 6),
        0xEF => op(Isc, Absolute, 6),
        0xFF => op(Isc, AbsoluteX, 7),
        0xFB => op(Isc, AbsoluteY, 7),
        0xE3 => op(Isc, IndirectX, 8),
        0xF3 => op(Isc, IndirectY, 8),

        0xA7 => op(Lax, ZeroPage, 3),
        0xB7 => op(Lax, ZeroPageY, 4),
        0xAF => op(Lax, Absolute, 4),
        0xBF => op(Lax, AbsoluteY, 4),
        0xA3 => op(Lax, IndirectX, 6),
        0xB3 => op(Lax, IndirectY, 5),

        0x27 => op(Rla, ZeroPage, 5),
        0x37 => op(Rla, ZeroPageX, 6),
        0x2F => op(Rla, Absolute, 6),
        0x3F => op(Rla, AbsoluteX, 7),
        0x3B => op(Rla, AbsoluteY, 7),
        0x23 => op(Rla, IndirectX, 8),
        0x33 => op(Rla, IndirectY, 8),

        0x67 => op(Rra, ZeroPage, 5),
        0x77 => op(Rra, ZeroPageX, 6),
        0x6F => op(Rra, Absolute, 6),
        0x7F => op(Rra, AbsoluteX, 7),
        0x7B => op(Rra, AbsoluteY, 7),
        0x63 => op(Rra, IndirectX, 8),
        0x73 => op(Rra, IndirectY, 8),

        0x87 => op(Sax, ZeroPage, 3),
        0x97 => op(Sax, ZeroPageY, 4),
        0x8F => op(Sax, Absolute, 4),
        0x83 => op(Sax, IndirectX, 6),

        0x07 => op(Slo, ZeroPage, 5),
        0x17 => op(Slo, ZeroPageX, 6),
        0x0F => op(Slo, Absolute, 6),
        0x1F => op(Slo, AbsoluteX, 7),
        0x1B => op(Slo, AbsoluteY, 7),
        0x03 => op(Slo, IndirectX, 8),
        0x13 => op(Slo, IndirectY, 8),

        0x47 => op(Sre, ZeroPage, 5),
        0x57 => op(Sre, ZeroPageX, 6),
        0x4F => op(Sre, Absolute, 6),
        0x5F => op(Sre, AbsoluteX, 7),
        0x5B => op(Sre, AbsoluteY, 7),
        0x43 => op(Sre, IndirectX, 8),
        0x53 => op(Sre, IndirectY, 8),

        0x1A | 0x3A | 0x5A | 0x7A | 0xDA | 0xFA => op(Nop, Implied, 2),
        0x80 | 0x82 | 0x89 | 0xC2 | 0xE2 => op(Nop, Immediate, 2),
        0x04 | 0x44 | 0x64 => op(Nop, ZeroPage, 3),
        0x14 | 0x34 | 0x54 | 0x74 | 0xD4 | 0xF4 => op(Nop, ZeroPageX, 4),
        0x0C => op(Nop, Absolute, 4),
        0x1C | 0x3C | 0x5C | 0x7C | 0xDC | 0xFC => op(Nop, AbsoluteX, 4),

        _ => None,
    }
}

/// Best-effort operand length for an opcode the core does not execute,
/// derived from its column in the opcode matrix.
pub const fn guess_operand_len(opcode: u8) -> u16 {
    match opcode & 0x1F {
        // JAM and control-flow rows, immediate forms in the upper half
        0x00 | 0x02 => {
            if opcode >= 0x80 {
                1
            } else {
                0
            }
        }
        0x08 | 0x0A | 0x12 | 0x18 | 0x1A => 0,
        0x0C..=0x0F | 0x19 | 0x1B..=0x1F => 2,
        _ => 1,
    }
}
