//! Side-effect free instruction inspection and text disassembly.

use std::fmt;

use crate::addressing::{branch_target, AddressingMode};
use crate::memory::Memory;
use crate::opcodes::{decode, Instruction};
use crate::registers::Registers;

/// How far below a target address a label may sit and still be used as `LABEL+n`.
pub const LABEL_RADIUS: u16 = 2;

/// Structural description of the instruction at an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsnInfo {
    pub addr: u16,
    /// `None` if the opcode byte is not readable.
    pub opcode: Option<u8>,
    pub insn: Instruction,
    /// Raw operand bytes, `None` for unreadable ones.
    pub operands: Vec<Option<u8>>,
    pub label: Option<String>,
    /// Address the operand refers to, when known statically.
    pub target: Option<u16>,
    /// Label near `target`, with its offset.
    pub target_label: Option<(String, u16)>,
}

impl InsnInfo {
    pub fn len(&self) -> u16 {
        self.insn.len()
    }

    fn arg(&self) -> Option<u16> {
        let mut value = 0u16;
        for (i, b) in self.operands.iter().enumerate() {
            value |= (((*b)?) as u16) << (8 * i);
        }
        Some(value)
    }

    fn target_text(&self, width: usize) -> String {
        if let Some((name, off)) = &self.target_label {
            if *off == 0 {
                return name.clone();
            }
            return format!("{}+{}", name, off);
        }
        match self.target {
            Some(t) if width == 2 => format!("${:02X}", t),
            Some(t) => format!("${:04X}", t),
            None if width == 2 => "$??".to_string(),
            None => "$????".to_string(),
        }
    }

    /// Assembly text without address or bytes, e.g. `LDA #$05`.
    pub fn text(&self) -> String {
        use AddressingMode::*;
        if self.opcode.is_none() {
            return "???".to_string();
        }
        let name = self.insn.mnemonic.name();
        let operand = match self.insn.mode {
            Implicit => return name.to_string(),
            Accumulator => "A".to_string(),
            Immediate => match self.arg() {
                Some(v) => format!("#${:02X}", v),
                None => "#$??".to_string(),
            },
            ZeroPage => self.target_text(2),
            ZeroPageX => format!("{},X", self.target_text(2)),
            ZeroPageY => format!("{},Y", self.target_text(2)),
            Absolute | Relative => self.target_text(4),
            AbsoluteX => format!("{},X", self.target_text(4)),
            AbsoluteY => format!("{},Y", self.target_text(4)),
            Indirect => format!("({})", self.target_text(4)),
            IndexedIndirect => format!("({},X)", self.target_text(2)),
            IndirectIndexed => format!("({}),Y", self.target_text(2)),
        };
        format!("{} {}", name, operand)
    }

    pub fn bytes_text(&self) -> String {
        let mut parts = vec![match self.opcode {
            Some(b) => format!("{:02X}", b),
            None => "??".to_string(),
        }];
        for b in &self.operands {
            parts.push(match b {
                Some(b) => format!("{:02X}", b),
                None => "??".to_string(),
            });
        }
        parts.join(" ")
    }
}

impl fmt::Display for InsnInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = self.label.as_deref().unwrap_or("");
        write!(f, "{:04X}: {:<8} {:<10} {}", self.addr, self.bytes_text(), label, self.text())
    }
}

impl Memory {
    /// Finds a label at `addr` or up to [`LABEL_RADIUS`] bytes below it.
    pub fn nearest_label(&self, addr: u16) -> Option<(String, u16)> {
        (0..=LABEL_RADIUS).find_map(|off| {
            let base = addr.checked_sub(off)?;
            self.label(base).map(|name| (name.to_string(), off))
        })
    }

    /// Describes the instruction at `addr` without touching memory state.
    pub fn inspect(&self, addr: u16) -> InsnInfo {
        let opcode = self.get_byte(addr);
        let insn = match opcode {
            Some(op) => *decode(op),
            None => Instruction::ILLEGAL,
        };
        let operands: Vec<Option<u8>> = (1..insn.len())
            .map(|i| self.get_byte(addr.wrapping_add(i)))
            .collect();

        let mut info = InsnInfo {
            addr,
            opcode,
            insn,
            operands,
            label: self.label(addr).map(str::to_string),
            target: None,
            target_label: None,
        };
        if let Some(arg) = info.arg() {
            info.target = match insn.mode {
                AddressingMode::Implicit
                | AddressingMode::Accumulator
                | AddressingMode::Immediate => None,
                AddressingMode::Relative => {
                    Some(branch_target(addr.wrapping_add(insn.len()), arg as u8))
                }
                _ => Some(arg),
            };
        }
        info.target_label = info.target.and_then(|t| self.nearest_label(t));
        info
    }

    /// Disassembles `count` instructions starting at `addr`.
    pub fn disassemble(&self, addr: u16, count: usize) -> Vec<InsnInfo> {
        let mut out = Vec::with_capacity(count);
        let mut pc = addr;
        for _ in 0..count {
            let info = self.inspect(pc);
            pc = pc.wrapping_add(info.len());
            out.push(info);
        }
        out
    }
}

/// One trace line: cycle count, registers and the instruction about to run.
pub fn trace_line(mem: &Memory, regs: &Registers, cycles: u64, pc: u16) -> String {
    let info = mem.inspect(pc);
    format!(
        "{:>10} A={:02X} X={:02X} Y={:02X} P={:02X} S={:02X} PC={:04X}: {:<8} {}",
        cycles,
        regs.a,
        regs.x,
        regs.y,
        regs.status,
        regs.sp,
        pc,
        info.bytes_text(),
        info.text()
    )
}
