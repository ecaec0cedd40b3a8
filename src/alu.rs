//! Arithmetic and flag computations.
//!
//! Pure functions: the dispatcher reads the input flags and applies the
//! returned ones, so validity tracking stays in one place.

/// Result of an add, subtract or compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AluResult {
    pub value: u8,
    pub carry: bool,
    pub zero: bool,
    pub negative: bool,
    pub overflow: bool,
}

pub fn adc_binary(a: u8, m: u8, carry: bool) -> AluResult {
    let sum = a as u16 + m as u16 + carry as u16;
    let value = sum as u8;
    AluResult {
        value,
        carry: sum > 0xFF,
        zero: value == 0,
        negative: value & 0x80 != 0,
        overflow: (a ^ value) & (m ^ value) & 0x80 != 0,
    }
}

/// Decimal-mode add with NMOS flag behavior: Z comes from the binary sum,
/// N and V from the half-corrected high nibble, C from the corrected result.
pub fn adc_decimal(a: u8, m: u8, carry: bool) -> AluResult {
    let binary = a.wrapping_add(m).wrapping_add(carry as u8);

    let mut lo = (a & 0x0F) as u16 + (m & 0x0F) as u16 + carry as u16;
    let mut hi = (a & 0xF0) as u16 + (m & 0xF0) as u16;
    if lo > 0x09 {
        lo += 0x06;
        hi += 0x10;
    }
    let negative = hi & 0x80 != 0;
    let overflow = (a ^ m) & 0x80 == 0 && (a as u16 ^ hi) & 0x80 != 0;
    if hi > 0x90 {
        hi += 0x60;
    }
    AluResult {
        value: ((hi & 0xF0) | (lo & 0x0F)) as u8,
        carry: hi > 0xFF,
        zero: binary == 0,
        negative,
        overflow,
    }
}

pub fn sbc_binary(a: u8, m: u8, carry: bool) -> AluResult {
    adc_binary(a, !m, carry)
}

/// Decimal-mode subtract. Flags match the binary subtraction; the stored
/// value is corrected nibble by nibble.
pub fn sbc_decimal(a: u8, m: u8, carry: bool) -> AluResult {
    let flags = sbc_binary(a, m, carry);
    let borrow = !carry as i16;

    let mut lo = (a & 0x0F) as i16 - (m & 0x0F) as i16 - borrow;
    let mut hi = (a >> 4) as i16 - (m >> 4) as i16;
    if lo < 0 {
        lo -= 6;
        hi -= 1;
    }
    if hi < 0 {
        hi -= 6;
    }
    AluResult {
        value: (((hi << 4) | (lo & 0x0F)) & 0xFF) as u8,
        ..flags
    }
}

/// CMP/CPX/CPY: `reg + 0x100 - m`. Overflow is not affected and reported as false.
pub fn compare(reg: u8, m: u8) -> AluResult {
    let diff = reg as u16 + 0x100 - m as u16;
    let value = diff as u8;
    AluResult {
        value,
        carry: diff > 0xFF,
        zero: value == 0,
        negative: value & 0x80 != 0,
        overflow: false,
    }
}

/// Returns the shifted value and the bit shifted out.
pub fn asl(v: u8) -> (u8, bool) {
    (v << 1, v & 0x80 != 0)
}

pub fn lsr(v: u8) -> (u8, bool) {
    (v >> 1, v & 0x01 != 0)
}

pub fn rol(v: u8, carry: bool) -> (u8, bool) {
    ((v << 1) | carry as u8, v & 0x80 != 0)
}

pub fn ror(v: u8, carry: bool) -> (u8, bool) {
    ((v >> 1) | ((carry as u8) << 7), v & 0x01 != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adc_binary_flags() {
        let r = adc_binary(0x7F, 0x01, false);
        assert_eq!(r.value, 0x80);
        assert!(r.overflow);
        assert!(r.negative);
        assert!(!r.carry);

        let r = adc_binary(0xFF, 0x02, false);
        assert_eq!(r.value, 0x01);
        assert!(r.carry);
        assert!(!r.overflow);

        let r = adc_binary(0xFF, 0x00, true);
        assert_eq!(r.value, 0x00);
        assert!(r.zero);
        assert!(r.carry);
    }

    #[test]
    fn test_sbc_binary_flags() {
        let r = sbc_binary(0x50, 0xF0, true);
        assert_eq!(r.value, 0x60);
        assert!(!r.carry);
        assert!(!r.overflow);

        let r = sbc_binary(0x80, 0x01, true);
        assert_eq!(r.value, 0x7F);
        assert!(r.carry);
        assert!(r.overflow);

        let r = sbc_binary(0x05, 0x05, true);
        assert!(r.zero);
        assert!(r.carry);
    }

    #[test]
    fn test_adc_decimal() {
        let r = adc_decimal(0x09, 0x01, false);
        assert_eq!(r.value, 0x10);
        assert!(!r.carry);

        let r = adc_decimal(0x58, 0x46, true);
        assert_eq!(r.value, 0x05);
        assert!(r.carry);

        let r = adc_decimal(0x99, 0x01, false);
        assert_eq!(r.value, 0x00);
        assert!(r.carry);
        // zero flag follows the binary sum 0x9A
        assert!(!r.zero);
    }

    #[test]
    fn test_sbc_decimal() {
        let r = sbc_decimal(0x46, 0x12, true);
        assert_eq!(r.value, 0x34);
        assert!(r.carry);

        let r = sbc_decimal(0x40, 0x13, true);
        assert_eq!(r.value, 0x27);
        assert!(r.carry);

        let r = sbc_decimal(0x12, 0x21, true);
        assert_eq!(r.value, 0x91);
        assert!(!r.carry);

        let r = sbc_decimal(0x00, 0x00, false);
        assert_eq!(r.value, 0x99);
        assert!(!r.carry);
    }

    #[test]
    fn test_decimal_round_trip() {
        for a in (0x00..=0x99u8).step_by(0x11) {
            for m in (0x00..=0x99u8).step_by(0x11) {
                let sum = adc_decimal(a, m, false);
                let back = sbc_decimal(sum.value, m, true);
                assert_eq!(back.value, a, "a={:02X} m={:02X}", a, m);
            }
        }
    }

    #[test]
    fn test_compare() {
        let r = compare(0x40, 0x30);
        assert!(r.carry && !r.zero && !r.negative);
        let r = compare(0x40, 0x40);
        assert!(r.carry && r.zero);
        let r = compare(0x30, 0x40);
        assert!(!r.carry && r.negative);
    }

    #[test]
    fn test_shifts_and_rotates() {
        assert_eq!(asl(0x81), (0x02, true));
        assert_eq!(lsr(0x81), (0x40, true));
        assert_eq!(rol(0x80, true), (0x01, true));
        assert_eq!(rol(0x40, false), (0x80, false));
        assert_eq!(ror(0x01, true), (0x80, true));
        assert_eq!(ror(0x02, false), (0x01, false));
    }
}
