//! Channel register addressing and bit definitions.
//!
//! [`ChannelRegisters`] is the raw port/MMIO primitive a platform supplies;
//! everything above it in the driver speaks in terms of the register enums
//! and bitflags defined here.

use bitflags::bitflags;

/// Command block and control block registers of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskFileRegister {
    /// Features on write, error on read.
    Features,
    /// Sector count.
    SectorCount,
    /// Sector number / LBA 7:0.
    SectorNumber,
    /// Cylinder low / LBA 15:8.
    CylinderLow,
    /// Cylinder high / LBA 23:16.
    CylinderHigh,
    /// Device/head select.
    DeviceHead,
    /// Command on write, status on read (reading acknowledges the interrupt).
    Command,
    /// Device control on write, alternate status on read.
    AltStatus,
}

impl TaskFileRegister {
    /// Offset from the command block base, or from the control block base
    /// for [`TaskFileRegister::AltStatus`].
    #[must_use]
    pub const fn offset(self) -> u16 {
        match self {
            Self::Features => 1,
            Self::SectorCount => 2,
            Self::SectorNumber => 3,
            Self::CylinderLow => 4,
            Self::CylinderHigh => 5,
            Self::DeviceHead => 6,
            Self::Command => 7,
            Self::AltStatus => 0,
        }
    }

    /// Returns `true` if the register lives in the control block.
    #[must_use]
    pub const fn is_control_block(self) -> bool {
        matches!(self, Self::AltStatus)
    }
}

/// 8-bit bus-master registers of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusMasterRegister {
    /// Bus-master command.
    Command,
    /// Bus-master status.
    Status,
}

impl BusMasterRegister {
    /// Offset from the channel's bus-master base.
    #[must_use]
    pub const fn offset(self) -> u16 {
        match self {
            Self::Command => 0,
            Self::Status => 2,
        }
    }
}

/// Offset of the 32-bit PRD table address register from the bus-master base.
pub const BM_PRD_ADDRESS_OFFSET: u16 = 4;

/// Raw register access for one channel.
///
/// Implemented by the platform with port I/O or MMIO. Every method is a
/// single access with the side effects the hardware defines for it.
pub trait ChannelRegisters: Send + Sync {
    /// Reads an 8-bit task-file register.
    fn read_taskfile(&self, reg: TaskFileRegister) -> u8;
    /// Writes an 8-bit task-file register.
    fn write_taskfile(&self, reg: TaskFileRegister, value: u8);
    /// Reads the 16-bit data register.
    fn read_data(&self) -> u16;
    /// Writes the 16-bit data register.
    fn write_data(&self, value: u16);
    /// Reads an 8-bit bus-master register.
    fn read_bus_master(&self, reg: BusMasterRegister) -> u8;
    /// Writes an 8-bit bus-master register.
    fn write_bus_master(&self, reg: BusMasterRegister, value: u8);
    /// Writes the PRD table physical address.
    fn write_prd_address(&self, addr: u32);
    /// Orders preceding register writes before following accesses.
    fn io_barrier(&self) {}
}

// ---------------------------------------------------------------------------
// Bitflags
// ---------------------------------------------------------------------------

bitflags! {
    /// ATA status register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AtaStatus: u8 {
        /// Error.
        const ERR = 1 << 0;
        /// Index (obsolete).
        const IDX = 1 << 1;
        /// Corrected data (obsolete).
        const CORR = 1 << 2;
        /// Data request.
        const DRQ = 1 << 3;
        /// Device seek complete.
        const DSC = 1 << 4;
        /// Device fault.
        const DF = 1 << 5;
        /// Device ready.
        const DRDY = 1 << 6;
        /// Busy.
        const BSY = 1 << 7;
    }
}

bitflags! {
    /// Device control register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeviceControl: u8 {
        /// Disable device interrupts.
        const NIEN = 1 << 1;
        /// Software reset.
        const SRST = 1 << 2;
        /// Read back the high-order byte of LBA48 registers.
        const HOB = 1 << 7;
    }
}

bitflags! {
    /// Bus-master command register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BmCommand: u8 {
        /// Start/stop bus-master operation.
        const START = 1 << 0;
        /// Transfer direction: set when the engine writes to memory.
        const READ = 1 << 3;
    }
}

bitflags! {
    /// Bus-master status register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BmStatus: u8 {
        /// Engine active.
        const ACTIVE = 1 << 0;
        /// Transfer error (write 1 to clear).
        const ERROR = 1 << 1;
        /// Interrupt raised (write 1 to clear).
        const INTERRUPT = 1 << 2;
        /// Device 0 is DMA capable.
        const DRIVE0_DMA = 1 << 5;
        /// Device 1 is DMA capable.
        const DRIVE1_DMA = 1 << 6;
        /// Only one channel may DMA at a time.
        const SIMPLEX = 1 << 7;
    }
}

bitflags! {
    /// PRD entry flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PrdFlags: u16 {
        /// Last entry of the table.
        const END_OF_TABLE = 1 << 15;
    }
}
