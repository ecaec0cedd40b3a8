//! Effective-address computation for the 13 addressing modes.

use crate::cpu::Sim;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressingMode {
    Implicit,
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Relative,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    Indirect,
    IndexedIndirect,
    IndirectIndexed,
}

impl AddressingMode {
    /// Encoded instruction length for this mode, opcode byte included.
    pub const fn len(self) -> u16 {
        use AddressingMode::*;
        match self {
            Implicit | Accumulator => 1,
            Immediate | ZeroPage | ZeroPageX | ZeroPageY | Relative | IndexedIndirect
            | IndirectIndexed => 2,
            Absolute | AbsoluteX | AbsoluteY | Indirect => 3,
        }
    }
}

/// Where an instruction finds its operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    None,
    Accumulator,
    Immediate(u8),
    /// A memory location; `page_cross` is set when indexing carried into the high byte.
    Memory { addr: u16, page_cross: bool },
    /// Branch target, already relative to the following instruction.
    Branch(u16),
}

impl Operand {
    pub fn page_cross(&self) -> bool {
        matches!(self, Operand::Memory { page_cross: true, .. })
    }
}

/// True when adding `index` to the low byte of `base` carries into the next page.
pub fn crosses_page(base: u16, index: u8) -> bool {
    (base & 0x00FF) + index as u16 > 0x00FF
}

/// Target of a relative branch whose displacement byte is `offset`, taken
/// from `next`, the address of the instruction after the branch.
pub fn branch_target(next: u16, offset: u8) -> u16 {
    next.wrapping_add(offset as i8 as u16)
}

impl Sim {
    /// Resolves the operand for `mode`. `arg` holds the raw operand bytes,
    /// little-endian. Pointer fetches for the indirect modes go through the
    /// normal read path and can raise memory diagnostics.
    pub(crate) fn resolve(&mut self, mode: AddressingMode, arg: u16) -> Operand {
        use AddressingMode::*;
        let zp = (arg & 0xFF) as u8;
        match mode {
            Implicit => Operand::None,
            Accumulator => Operand::Accumulator,
            Immediate => Operand::Immediate(zp),
            ZeroPage => Operand::Memory { addr: zp as u16, page_cross: false },
            ZeroPageX => Operand::Memory {
                addr: zp.wrapping_add(self.regs.x) as u16,
                page_cross: false,
            },
            ZeroPageY => Operand::Memory {
                addr: zp.wrapping_add(self.regs.y) as u16,
                page_cross: false,
            },
            Absolute => Operand::Memory { addr: arg, page_cross: false },
            AbsoluteX => Operand::Memory {
                addr: arg.wrapping_add(self.regs.x as u16),
                page_cross: crosses_page(arg, self.regs.x),
            },
            AbsoluteY => Operand::Memory {
                addr: arg.wrapping_add(self.regs.y as u16),
                page_cross: crosses_page(arg, self.regs.y),
            },
            Indirect => {
                let addr = self.read_word(arg);
                Operand::Memory { addr, page_cross: false }
            }
            IndexedIndirect => {
                let ptr = zp.wrapping_add(self.regs.x);
                let addr = self.read_zp_word(ptr);
                Operand::Memory { addr, page_cross: false }
            }
            IndirectIndexed => {
                let base = self.read_zp_word(zp);
                Operand::Memory {
                    addr: base.wrapping_add(self.regs.y as u16),
                    page_cross: crosses_page(base, self.regs.y),
                }
            }
            Relative => Operand::Branch(branch_target(self.regs.pc, zp)),
        }
    }

    fn read_word(&mut self, addr: u16) -> u16 {
        let low = self.read_byte(addr) as u16;
        let high = self.read_byte(addr.wrapping_add(1)) as u16;
        (high << 8) | low
    }

    /// Reads a pointer from zero page; the high byte wraps within page zero.
    fn read_zp_word(&mut self, ptr: u8) -> u16 {
        let low = self.read_byte(ptr as u16) as u16;
        let high = self.read_byte(ptr.wrapping_add(1) as u16) as u16;
        (high << 8) | low
    }
}
