//! The 256-entry instruction descriptor table.
//!
//! Built once at compile time and never mutated. Undocumented encodings map
//! to [`Mnemonic::Ill`].

use crate::addressing::AddressingMode;
use std::fmt;

#[rustfmt::skip]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mnemonic {
    Adc, And, Asl, Bcc, Bcs, Beq, Bit, Bmi, Bne, Bpl, Brk, Bvc, Bvs, Clc,
    Cld, Cli, Clv, Cmp, Cpx, Cpy, Dec, Dex, Dey, Eor, Inc, Inx, Iny, Jmp,
    Jsr, Lda, Ldx, Ldy, Lsr, Nop, Ora, Pha, Php, Pla, Plp, Rol, Ror, Rti,
    Rts, Sbc, Sec, Sed, Sei, Sta, Stx, Sty, Tax, Tay, Tsx, Txa, Txs, Tya,
    /// Illegal encoding.
    Ill,
}

impl Mnemonic {
    #[rustfmt::skip]
    pub fn name(self) -> &'static str {
        use Mnemonic::*;
        match self {
            Adc => "ADC", And => "AND", Asl => "ASL", Bcc => "BCC", Bcs => "BCS",
            Beq => "BEQ", Bit => "BIT", Bmi => "BMI", Bne => "BNE", Bpl => "BPL",
            Brk => "BRK", Bvc => "BVC", Bvs => "BVS", Clc => "CLC", Cld => "CLD",
            Cli => "CLI", Clv => "CLV", Cmp => "CMP", Cpx => "CPX", Cpy => "CPY",
            Dec => "DEC", Dex => "DEX", Dey => "DEY", Eor => "EOR", Inc => "INC",
            Inx => "INX", Iny => "INY", Jmp => "JMP", Jsr => "JSR", Lda => "LDA",
            Ldx => "LDX", Ldy => "LDY", Lsr => "LSR", Nop => "NOP", Ora => "ORA",
            Pha => "PHA", Php => "PHP", Pla => "PLA", Plp => "PLP", Rol => "ROL",
            Ror => "ROR", Rti => "RTI", Rts => "RTS", Sbc => "SBC", Sec => "SEC",
            Sed => "SED", Sei => "SEI", Sta => "STA", Stx => "STX", Sty => "STY",
            Tax => "TAX", Tay => "TAY", Tsx => "TSX", Txa => "TXA", Txs => "TXS",
            Tya => "TYA", Ill => "???",
        }
    }

    pub fn is_branch(self) -> bool {
        use Mnemonic::*;
        matches!(self, Bcc | Bcs | Beq | Bmi | Bne | Bpl | Bvc | Bvs)
    }

    /// Instructions that transfer control somewhere other than the next instruction.
    pub fn is_control_flow(self) -> bool {
        use Mnemonic::*;
        self.is_branch() || matches!(self, Jmp | Jsr | Rts | Rti | Brk)
    }

    /// Read instructions pay the indexed page-crossing cycle only when a carry
    /// into the high byte happens. Stores and read-modify-write forms have the
    /// extra cycle baked into their base cost.
    pub fn pays_page_cross(self) -> bool {
        use Mnemonic::*;
        matches!(self, Adc | And | Cmp | Eor | Lda | Ldx | Ldy | Ora | Sbc)
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Static description of one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub mnemonic: Mnemonic,
    pub mode: AddressingMode,
    /// Base cycle cost, before page-crossing and branch penalties.
    pub cycles: u8,
}

impl Instruction {
    pub const ILLEGAL: Instruction = Instruction {
        mnemonic: Mnemonic::Ill,
        mode: AddressingMode::Implicit,
        cycles: 2,
    };

    /// Encoded length in bytes, 1 to 3.
    pub const fn len(&self) -> u16 {
        self.mode.len()
    }

    pub fn is_valid(&self) -> bool {
        self.mnemonic != Mnemonic::Ill
    }
}

pub static OPCODE_TABLE: [Instruction; 256] = build_table();

/// Looks up the descriptor for `opcode`.
pub fn decode(opcode: u8) -> &'static Instruction {
    &OPCODE_TABLE[opcode as usize]
}

const fn build_table() -> [Instruction; 256] {
    let mut table = [Instruction::ILLEGAL; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = describe(i as u8);
        i += 1;
    }
    table
}

const fn op(mnemonic: Mnemonic, mode: AddressingMode, cycles: u8) -> Instruction {
    Instruction { mnemonic, mode, cycles }
}

const fn describe(opcode: u8) -> Instruction {
    use AddressingMode::*;
    use Mnemonic::*;
    match opcode {
        // Loads
        0xA9 => op(Lda, Immediate, 2),
        0xA5 => op(Lda, ZeroPage, 3),
        0xB5 => op(Lda, ZeroPageX, 4),
        0xAD => op(Lda, Absolute, 4),
        0xBD => op(Lda, AbsoluteX, 4),
        0xB9 => op(Lda, AbsoluteY, 4),
        0xA1 => op(Lda, IndexedIndirect, 6),
        0xB1 => op(Lda, IndirectIndexed, 5),
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

        // Stores
        0x85 => op(Sta, ZeroPage, 3),
        0x95 => op(Sta, ZeroPageX, 4),
        0x8D => op(Sta, Absolute, 4),
        0x9D => op(Sta, AbsoluteX, 5),
        0x99 => op(Sta, AbsoluteY, 5),
        0x81 => op(Sta, IndexedIndirect, 6),
        0x91 => op(Sta, IndirectIndexed, 6),
        0x86 => op(Stx, ZeroPage, 3),
        0x96 => op(Stx, ZeroPageY, 4),
        0x8E => op(Stx, Absolute, 4),
        0x84 => op(Sty, ZeroPage, 3),
        0x94 => op(Sty, ZeroPageX, 4),
        0x8C => op(Sty, Absolute, 4),

        // Arithmetic and logic
        0x69 => op(Adc, Immediate, 2),
        0x65 => op(Adc, ZeroPage, 3),
        0x75 => op(Adc, ZeroPageX, 4),
        0x6D => op(Adc, Absolute, 4),
        0x7D => op(Adc, AbsoluteX, 4),
        0x79 => op(Adc, AbsoluteY, 4),
        0x61 => op(Adc, IndexedIndirect, 6),
        0x71 => op(Adc, IndirectIndexed, 5),
        0xE9 => op(Sbc, Immediate, 2),
        0xE5 => op(Sbc, ZeroPage, 3),
        0xF5 => op(Sbc, ZeroPageX, 4),
        0xED => op(Sbc, Absolute, 4),
        0xFD => op(Sbc, AbsoluteX, 4),
        0xF9 => op(Sbc, AbsoluteY, 4),
        0xE1 => op(Sbc, IndexedIndirect, 6),
        0xF1 => op(Sbc, IndirectIndexed, 5),
        0x29 => op(And, Immediate, 2),
        0x25 => op(And, ZeroPage, 3),
        0x35 => op(And, ZeroPageX, 4),
        0x2D => op(And, Absolute, 4),
        0x3D => op(And, AbsoluteX, 4),
        0x39 => op(And, AbsoluteY, 4),
        0x21 => op(And, IndexedIndirect, 6),
        0x31 => op(And, IndirectIndexed, 5),
        0x09 => op(Ora, Immediate, 2),
        0x05 => op(Ora, ZeroPage, 3),
        0x15 => op(Ora, ZeroPageX, 4),
        0x0D => op(Ora, Absolute, 4),
        0x1D => op(Ora, AbsoluteX, 4),
        0x19 => op(Ora, AbsoluteY, 4),
        0x01 => op(Ora, IndexedIndirect, 6),
        0x11 => op(Ora, IndirectIndexed, 5),
        0x49 => op(Eor, Immediate, 2),
        0x45 => op(Eor, ZeroPage, 3),
        0x55 => op(Eor, ZeroPageX, 4),
        0x4D => op(Eor, Absolute, 4),
        0x5D => op(Eor, AbsoluteX, 4),
        0x59 => op(Eor, AbsoluteY, 4),
        0x41 => op(Eor, IndexedIndirect, 6),
        0x51 => op(Eor, IndirectIndexed, 5),
        0x24 => op(Bit, ZeroPage, 3),
        0x2C => op(Bit, Absolute, 4),

        // Compare
        0xC9 => op(Cmp, Immediate, 2),
        0xC5 => op(Cmp, ZeroPage, 3),
        0xD5 => op(Cmp, ZeroPageX, 4),
        0xCD => op(Cmp, Absolute, 4),
        0xDD => op(Cmp, AbsoluteX, 4),
        0xD9 => op(Cmp, AbsoluteY, 4),
        0xC1 => op(Cmp, IndexedIndirect, 6),
        0xD1 => op(Cmp, IndirectIndexed, 5),
        0xE0 => op(Cpx, Immediate, 2),
        0xE4 => op(Cpx, ZeroPage, 3),
        0xEC => op(Cpx, Absolute, 4),
        0xC0 => op(Cpy, Immediate, 2),
        0xC4 => op(Cpy, ZeroPage, 3),
        0xCC => op(Cpy, Absolute, 4),

        // Shifts and rotates
        0x0A => op(Asl, Accumulator, 2),
        0x06 => op(Asl, ZeroPage, 5),
        0x16 => op(Asl, ZeroPageX, 6),
        0x0E => op(Asl, Absolute, 6),
        0x1E => op(Asl, AbsoluteX, 7),
        0x4A => op(Lsr, Accumulator, 2),
        0x46 => op(Lsr, ZeroPage, 5),
        0x56 => op(Lsr, ZeroPageX, 6),
        0x4E => op(Lsr, Absolute, 6),
        0x5E => op(Lsr, AbsoluteX, 7),
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

        // Increment/Decrement
        0xE6 => op(Inc, ZeroPage, 5),
        0xF6 => op(Inc, ZeroPageX, 6),
        0xEE => op(Inc, Absolute, 6),
        0xFE => op(Inc, AbsoluteX, 7),
        0xC6 => op(Dec, ZeroPage, 5),
        0xD6 => op(Dec, ZeroPageX, 6),
        0xCE => op(Dec, Absolute, 6),
        0xDE => op(Dec, AbsoluteX, 7),
        0xE8 => op(Inx, Implicit, 2),
        0xC8 => op(Iny, Implicit, 2),
        0xCA => op(Dex, Implicit, 2),
        0x88 => op(Dey, Implicit, 2),

        // Transfer
        0xAA => op(Tax, Implicit, 2),
        0xA8 => op(Tay, Implicit, 2),
        0x8A => op(Txa, Implicit, 2),
        0x98 => op(Tya, Implicit, 2),
        0xBA => op(Tsx, Implicit, 2),
        0x9A => op(Txs, Implicit, 2),

        // Stack
        0x48 => op(Pha, Implicit, 3),
        0x08 => op(Php, Implicit, 3),
        0x68 => op(Pla, Implicit, 4),
        0x28 => op(Plp, Implicit, 4),

        // Jump/Call
        0x4C => op(Jmp, Absolute, 3),
        0x6C => op(Jmp, Indirect, 5),
        0x20 => op(Jsr, Absolute, 6),
        0x60 => op(Rts, Implicit, 6),
        0x40 => op(Rti, Implicit, 6),
        0x00 => op(Brk, Implicit, 7),

        // Branch
        0x90 => op(Bcc, Relative, 2),
        0xB0 => op(Bcs, Relative, 2),
        0xF0 => op(Beq, Relative, 2),
        0xD0 => op(Bne, Relative, 2),
        0x30 => op(Bmi, Relative, 2),
        0x10 => op(Bpl, Relative, 2),
        0x50 => op(Bvc, Relative, 2),
        0x70 => op(Bvs, Relative, 2),

        // Flag manipulation
        0x18 => op(Clc, Implicit, 2),
        0x38 => op(Sec, Implicit, 2),
        0x58 => op(Cli, Implicit, 2),
        0x78 => op(Sei, Implicit, 2),
        0xD8 => op(Cld, Implicit, 2),
        0xF8 => op(Sed, Implicit, 2),
        0xB8 => op(Clv, Implicit, 2),

        0xEA => op(Nop, Implicit, 2),

        _ => Instruction::ILLEGAL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documented_opcode_count() {
        let valid = OPCODE_TABLE.iter().filter(|i| i.is_valid()).count();
        assert_eq!(valid, 151);
    }

    #[test]
    fn test_all_mnemonics_present() {
        let mut seen: Vec<Mnemonic> = OPCODE_TABLE
            .iter()
            .filter(|i| i.is_valid())
            .map(|i| i.mnemonic)
            .collect();
        seen.sort_by_key(|m| m.name());
        seen.dedup();
        assert_eq!(seen.len(), 56);
    }

    #[test]
    fn test_lengths_follow_mode() {
        assert_eq!(decode(0xA9).len(), 2);
        assert_eq!(decode(0x8D).len(), 3);
        assert_eq!(decode(0xE8).len(), 1);
        assert_eq!(decode(0x6C).len(), 3);
        assert_eq!(decode(0xD0).len(), 2);
        assert_eq!(decode(0x0A).len(), 1);
        assert_eq!(decode(0x02).len(), 1);
    }

    #[test]
    fn test_illegal_entries() {
        for opcode in [0x02u8, 0x1A, 0x80, 0x89, 0xFF] {
            assert_eq!(decode(opcode).mnemonic, Mnemonic::Ill);
        }
    }

    #[test]
    fn test_base_cycles() {
        assert_eq!(decode(0xA9).cycles, 2);
        assert_eq!(decode(0x85).cycles, 3);
        assert_eq!(decode(0x9D).cycles, 5);
        assert_eq!(decode(0xFE).cycles, 7);
        assert_eq!(decode(0x00).cycles, 7);
    }
}
