//! Task-file register image and unit selection.
//!
//! The task file is the set of 8-bit command block registers that describe
//! one ATA operation, plus the 16-bit data register, the alternate
//! status/device control register and the ATAPI command packet.

/// Device/head bit selecting LBA addressing.
pub const DEVICE_LBA: u8 = 0x40;
/// Device/head bit selecting device 1.
pub const DEVICE_SELECT_1: u8 = 0x10;
/// Mask of the LBA 27:24 nibble in the device/head register.
pub const DEVICE_HEAD_MASK: u8 = 0x0F;
/// Obsolete device/head bits 7 and 5, set by legacy CHS-era selects.
pub const DEVICE_LEGACY: u8 = 0xA0;

/// IDENTIFY DEVICE.
pub const CMD_IDENTIFY_DEVICE: u8 = 0xEC;
/// IDENTIFY PACKET DEVICE.
pub const CMD_IDENTIFY_PACKET_DEVICE: u8 = 0xA1;
/// PACKET.
pub const CMD_PACKET: u8 = 0xA0;
/// READ DMA.
pub const CMD_READ_DMA: u8 = 0xC8;
/// READ DMA EXT.
pub const CMD_READ_DMA_EXT: u8 = 0x25;
/// WRITE DMA.
pub const CMD_WRITE_DMA: u8 = 0xCA;
/// WRITE DMA EXT.
pub const CMD_WRITE_DMA_EXT: u8 = 0x35;
/// READ SECTORS.
pub const CMD_READ_SECTORS: u8 = 0x20;
/// WRITE SECTORS.
pub const CMD_WRITE_SECTORS: u8 = 0x30;
/// READ SECTORS EXT.
pub const CMD_READ_SECTORS_EXT: u8 = 0x24;
/// WRITE SECTORS EXT.
pub const CMD_WRITE_SECTORS_EXT: u8 = 0x34;
/// DEVICE RESET (ATAPI).
pub const CMD_DEVICE_RESET: u8 = 0x08;

/// Size of the ATAPI command packet region in bytes.
pub const PACKET_CAPACITY: usize = 16;

/// Device on the channel a command targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnitId {
    /// Device 0 ("master").
    Device0,
    /// Device 1 ("slave").
    Device1,
    /// No valid device selected.
    #[default]
    Invalid,
}

impl UnitId {
    /// Maps a raw unit number to a unit; anything but 0 or 1 is invalid.
    #[must_use]
    pub const fn from_index(index: u8) -> Self {
        match index {
            0 => Self::Device0,
            1 => Self::Device1,
            _ => Self::Invalid,
        }
    }

    /// Returns the unit number, or `None` for [`UnitId::Invalid`].
    #[must_use]
    pub const fn index(self) -> Option<u8> {
        match self {
            Self::Device0 => Some(0),
            Self::Device1 => Some(1),
            Self::Invalid => None,
        }
    }

    /// Returns the device/head select bit for this unit (zero when invalid).
    #[must_use]
    pub const fn select_bits(self) -> u8 {
        match self {
            Self::Device1 => DEVICE_SELECT_1,
            Self::Device0 | Self::Invalid => 0,
        }
    }
}

/// ATAPI command packet and its length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AtapiPacket {
    /// Packet bytes, only the first `size` are meaningful.
    pub bytes: [u8; PACKET_CAPACITY],
    /// Number of valid packet bytes.
    pub size: u8,
}

impl AtapiPacket {
    /// Returns the valid part of the packet.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..usize::from(self.size)]
    }
}

/// Register image for one command.
///
/// Registers shared between directions are named for the value the host
/// writes: `features` reads back as the error register, `command` as status,
/// `device_control` as alternate status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskFile {
    /// Data register (16-bit).
    pub data: u16,
    /// Device control (alternate status on read).
    pub device_control: u8,
    /// Features (error on read).
    pub features: u8,
    /// Sector count.
    pub sector_count: u8,
    /// Sector number, LBA 7:0.
    pub sector_number: u8,
    /// Cylinder low, LBA 15:8.
    pub cylinder_low: u8,
    /// Cylinder high, LBA 23:16.
    pub cylinder_high: u8,
    /// Device/head: LBA mode bit, unit select, LBA 27:24.
    pub device_head: u8,
    /// Command (status on read).
    pub command: u8,
    /// ATAPI command packet.
    pub packet: AtapiPacket,
}

impl TaskFile {
    /// Decodes the LBA28 address held in the address registers.
    #[must_use]
    pub const fn lba28(&self) -> u32 {
        (self.sector_number as u32)
            | (self.cylinder_low as u32) << 8
            | (self.cylinder_high as u32) << 16
            | ((self.device_head & DEVICE_HEAD_MASK) as u32) << 24
    }

    /// Returns the unit selected by the device/head register.
    #[must_use]
    pub const fn selected_unit(&self) -> UnitId {
        if self.device_head & DEVICE_SELECT_1 != 0 {
            UnitId::Device1
        } else {
            UnitId::Device0
        }
    }
}
