use serde::{Deserialize, Serialize};
use std::fmt;

// Status register flags
pub const CARRY_FLAG: u8 = 0x01;
pub const ZERO_FLAG: u8 = 0x02;
pub const INTERRUPT_DISABLE: u8 = 0x04;
pub const DECIMAL_MODE: u8 = 0x08;
pub const BREAK_COMMAND: u8 = 0x10;
pub const UNUSED_FLAG: u8 = 0x20;
pub const OVERFLOW_FLAG: u8 = 0x40;
pub const NEGATIVE_FLAG: u8 = 0x80;

/// Flags that start out unknown: nothing has set them deterministically yet.
pub const ARITH_FLAGS: u8 = CARRY_FLAG | ZERO_FLAG | DECIMAL_MODE | OVERFLOW_FLAG | NEGATIVE_FLAG;

/// CPU working registers.
///
/// `unknown` has a bit set for every status flag whose value was never
/// established by the program or the caller. Reading such a flag still yields
/// the stored bit, the engine just reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    pub pc: u16,
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub sp: u8,
    pub status: u8,
    pub unknown: u8,
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

impl Registers {
    pub fn new() -> Self {
        Registers {
            pc: 0,
            a: 0,
            x: 0,
            y: 0,
            sp: 0xFF,
            status: UNUSED_FLAG | BREAK_COMMAND | INTERRUPT_DISABLE,
            unknown: ARITH_FLAGS,
        }
    }

    /// Sets or clears `flag`, which also makes it known.
    pub fn set_flag(&mut self, flag: u8, value: bool) {
        if value {
            self.status |= flag;
        } else {
            self.status &= !flag;
        }
        self.unknown &= !flag;
    }

    /// Raw flag value, regardless of whether it is known.
    pub fn get_flag(&self, flag: u8) -> bool {
        (self.status & flag) != 0
    }

    pub fn is_known(&self, flag: u8) -> bool {
        (self.unknown & flag) == 0
    }

    /// Marks `mask` as unknown again without touching the stored bits.
    pub fn forget_flags(&mut self, mask: u8) {
        self.unknown |= mask;
    }

    /// Loads the whole status register; every flag becomes known.
    pub fn set_status(&mut self, value: u8) {
        self.status = value | UNUSED_FLAG | BREAK_COMMAND;
        self.unknown = 0;
    }

    pub fn update_zero_and_negative_flags(&mut self, value: u8) {
        self.set_flag(ZERO_FLAG, value == 0);
        self.set_flag(NEGATIVE_FLAG, (value & 0x80) != 0);
    }

    /// Compact flag view, `NV-BDIZC` with unknown flags shown as `?`.
    pub fn flags_string(&self) -> String {
        const NAMES: [(u8, char); 8] = [
            (NEGATIVE_FLAG, 'N'),
            (OVERFLOW_FLAG, 'V'),
            (UNUSED_FLAG, '-'),
            (BREAK_COMMAND, 'B'),
            (DECIMAL_MODE, 'D'),
            (INTERRUPT_DISABLE, 'I'),
            (ZERO_FLAG, 'Z'),
            (CARRY_FLAG, 'C'),
        ];
        NAMES
            .iter()
            .map(|&(flag, name)| {
                if !self.is_known(flag) {
                    '?'
                } else if self.get_flag(flag) {
                    name
                } else {
                    '.'
                }
            })
            .collect()
    }
}

impl fmt::Display for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "A={:02X} X={:02X} Y={:02X} P={:02X} S={:02X} PC={:04X}",
            self.a, self.x, self.y, self.status, self.sp, self.pc
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registers_have_unknown_flags() {
        let r = Registers::new();
        assert!(!r.is_known(CARRY_FLAG));
        assert!(!r.is_known(DECIMAL_MODE));
        assert!(r.is_known(INTERRUPT_DISABLE));
        assert_eq!(r.sp, 0xFF);
    }

    #[test]
    fn test_set_flag_makes_it_known() {
        let mut r = Registers::new();
        r.set_flag(CARRY_FLAG, true);
        assert!(r.is_known(CARRY_FLAG));
        assert!(r.get_flag(CARRY_FLAG));
        r.set_flag(CARRY_FLAG, false);
        assert!(!r.get_flag(CARRY_FLAG));
        assert!(!r.is_known(ZERO_FLAG));
    }

    #[test]
    fn test_set_status_and_forget() {
        let mut r = Registers::new();
        r.set_status(0x81);
        assert_eq!(r.unknown, 0);
        assert_eq!(r.status, 0x81 | UNUSED_FLAG | BREAK_COMMAND);
        r.forget_flags(ZERO_FLAG | NEGATIVE_FLAG);
        assert!(!r.is_known(NEGATIVE_FLAG));
        assert!(r.get_flag(NEGATIVE_FLAG));
        assert_eq!(r.flags_string(), "?.-B..?C");
    }

    #[test]
    fn test_display() {
        let mut r = Registers::new();
        r.a = 0x42;
        r.pc = 0x0600;
        assert_eq!(r.to_string(), "A=42 X=00 Y=00 P=34 S=FF PC=0600");
    }
}
