//! Flag bit constants and the shared sign/zero/undocumented-bit/parity helper.

pub const SF: u8 = 0x80;
pub const ZF: u8 = 0x40;
pub const YF: u8 = 0x20;
pub const HF: u8 = 0x10;
pub const XF: u8 = 0x08;
pub const PF: u8 = 0x04;
pub const NF: u8 = 0x02;
pub const CF: u8 = 0x01;

/// Sign, zero, and the two undocumented bits (5 and 3), mirrored straight
/// from the result byte. Parity is folded in separately by callers that need
/// it (`sz53p`), since not every instruction that uses `sz53` wants parity.
#[must_use]
pub fn sz53(value: u8) -> u8 {
    value & (SF | YF | XF) | if value == 0 { ZF } else { 0 }
}

/// `sz53` plus even-parity detection of `value`, used by logical ops (AND/OR/XOR)
/// and the CB-prefixed rotate/shift/bit table.
#[must_use]
pub fn sz53p(value: u8) -> u8 {
    sz53(value) | if value.count_ones() % 2 == 0 { PF } else { 0 }
}
