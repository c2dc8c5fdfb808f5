//! 48-bit extended LBA register triad.
//!
//! With LBA48 each address register is written twice: first the high-order
//! ("HOB") byte, then the byte the legacy 8-bit register would hold. Each
//! 16-bit field here keeps the legacy byte in bits 7:0 and the HOB byte in
//! bits 15:8.
//!
//! | Field          | bits 7:0   | bits 15:8  |
//! |----------------|------------|------------|
//! | `lba_low16`    | LBA 7:0    | LBA 31:24  |
//! | `lba_mid16`    | LBA 15:8   | LBA 39:32  |
//! | `lba_high16`   | LBA 23:16  | LBA 47:40  |

use crate::taskfile::{DEVICE_LBA, UnitId};

/// Largest address representable with LBA48.
pub const LBA48_MAX: u64 = (1 << 48) - 1;

/// Extended LBA registers for one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtendedLba {
    lba_low16: u16,
    lba_mid16: u16,
    lba_high16: u16,
    sector_count16: u16,
    features16: u16,
    device: u8,
    command: u8,
}

impl ExtendedLba {
    /// Creates a zeroed register set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            lba_low16: 0,
            lba_mid16: 0,
            lba_high16: 0,
            sector_count16: 0,
            features16: 0,
            device: 0,
            command: 0,
        }
    }

    /// Resets every field to zero.
    pub fn zero_data(&mut self) {
        *self = Self::new();
    }

    /// Loads a 48-bit address split as `lba_hi:lba_lo`, plus count, unit and
    /// command. Only the low 16 bits of `lba_hi` are encodable.
    pub fn set_extended_lba(
        &mut self,
        lba_hi: u32,
        lba_lo: u32,
        unit: UnitId,
        count: u16,
        command: u8,
    ) {
        let lo = lba_lo.to_le_bytes();
        let hi = lba_hi.to_le_bytes();
        self.lba_low16 = u16::from_le_bytes([lo[0], lo[3]]);
        self.lba_mid16 = u16::from_le_bytes([lo[1], hi[0]]);
        self.lba_high16 = u16::from_le_bytes([lo[2], hi[1]]);
        self.sector_count16 = count;
        self.command = command;
        self.device = DEVICE_LBA | unit.select_bits();
    }

    /// Returns the address as `(lba_hi, lba_lo)`.
    #[must_use]
    pub const fn get_extended_lba(&self) -> (u32, u32) {
        let [low_l, low_h] = self.lba_low16.to_le_bytes();
        let [mid_l, mid_h] = self.lba_mid16.to_le_bytes();
        let [high_l, high_h] = self.lba_high16.to_le_bytes();
        let lo = u32::from_le_bytes([low_l, mid_l, high_l, low_h]);
        let hi = u32::from_le_bytes([mid_h, high_h, 0, 0]);
        (hi, lo)
    }

    /// Loads a flat address. Bits above 47 are dropped.
    pub fn set_lba48(&mut self, lba: u64, unit: UnitId, count: u16, command: u8) {
        let [b0, b1, b2, b3, b4, b5, _, _] = lba.to_le_bytes();
        let lo = u32::from_le_bytes([b0, b1, b2, b3]);
        let hi = u32::from_le_bytes([b4, b5, 0, 0]);
        self.set_extended_lba(hi, lo, unit, count, command);
    }

    /// Returns the flat 48-bit address.
    #[must_use]
    pub const fn lba48(&self) -> u64 {
        let (hi, lo) = self.get_extended_lba();
        (hi as u64) << 32 | lo as u64
    }

    /// Packed LBA 7:0 and 31:24.
    #[must_use]
    pub const fn lba_low16(&self) -> u16 {
        self.lba_low16
    }

    /// Sets the packed LBA 7:0 and 31:24 field.
    pub fn set_lba_low16(&mut self, value: u16) {
        self.lba_low16 = value;
    }

    /// Packed LBA 15:8 and 39:32.
    #[must_use]
    pub const fn lba_mid16(&self) -> u16 {
        self.lba_mid16
    }

    /// Sets the packed LBA 15:8 and 39:32 field.
    pub fn set_lba_mid16(&mut self, value: u16) {
        self.lba_mid16 = value;
    }

    /// Packed LBA 23:16 and 47:40.
    #[must_use]
    pub const fn lba_high16(&self) -> u16 {
        self.lba_high16
    }

    /// Sets the packed LBA 23:16 and 47:40 field.
    pub fn set_lba_high16(&mut self, value: u16) {
        self.lba_high16 = value;
    }

    /// 16-bit sector count.
    #[must_use]
    pub const fn sector_count16(&self) -> u16 {
        self.sector_count16
    }

    /// Sets the 16-bit sector count.
    pub fn set_sector_count16(&mut self, value: u16) {
        self.sector_count16 = value;
    }

    /// 16-bit features.
    #[must_use]
    pub const fn features16(&self) -> u16 {
        self.features16
    }

    /// Sets the 16-bit features.
    pub fn set_features16(&mut self, value: u16) {
        self.features16 = value;
    }

    /// Device select byte.
    #[must_use]
    pub const fn device(&self) -> u8 {
        self.device
    }

    /// Sets the device select byte.
    pub fn set_device(&mut self, value: u8) {
        self.device = value;
    }

    /// Extended command opcode.
    #[must_use]
    pub const fn command(&self) -> u8 {
        self.command
    }

    /// Sets the extended command opcode.
    pub fn set_command(&mut self, value: u8) {
        self.command = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn byte_interleaving() {
        let mut ext = ExtendedLba::new();
        ext.set_extended_lba(0x0000_BBAA, 0x4433_2211, UnitId::Device1, 0x0102, 0x25);
        assert_eq!(ext.lba_low16(), 0x4411);
        assert_eq!(ext.lba_mid16(), 0xAA22);
        assert_eq!(ext.lba_high16(), 0xBB33);
        assert_eq!(ext.sector_count16(), 0x0102);
        assert_eq!(ext.command(), 0x25);
        assert_eq!(ext.device(), 0x50);
        assert_eq!(ext.get_extended_lba(), (0xBBAA, 0x4433_2211));
    }

    #[test]
    fn device_always_carries_lba_bit() {
        let mut ext = ExtendedLba::new();
        ext.set_lba48(0, UnitId::Device0, 0, 0);
        assert_eq!(ext.device(), DEVICE_LBA);
    }

    #[test]
    fn zero_data_clears_everything() {
        let mut ext = ExtendedLba::new();
        ext.set_lba48(LBA48_MAX, UnitId::Device1, 0xFFFF, 0x35);
        ext.set_features16(0x00FF);
        ext.zero_data();
        assert_eq!(ext, ExtendedLba::default());
    }

    #[test]
    fn set_lba48_drops_bits_above_47() {
        let mut ext = ExtendedLba::new();
        ext.set_lba48(0xFFFF_0000_0000_0001, UnitId::Device0, 1, 0x25);
        assert_eq!(ext.lba48(), 1);
    }

    proptest! {
        #[test]
        fn extended_lba_roundtrip(hi in 0u32..=0xFFFF, lo: u32, count: u16, cmd: u8, dev1: bool) {
            let unit = if dev1 { UnitId::Device1 } else { UnitId::Device0 };
            let mut ext = ExtendedLba::new();
            ext.set_extended_lba(hi, lo, unit, count, cmd);
            prop_assert_eq!(ext.get_extended_lba(), (hi, lo));
            prop_assert_eq!(ext.sector_count16(), count);
            prop_assert_eq!(ext.command(), cmd);
        }

        #[test]
        fn high_bits_beyond_encoding_are_masked(hi: u32, lo: u32) {
            let mut ext = ExtendedLba::new();
            ext.set_extended_lba(hi, lo, UnitId::Device0, 0, 0);
            prop_assert_eq!(ext.get_extended_lba(), (hi & 0xFFFF, lo));
        }
    }
}
