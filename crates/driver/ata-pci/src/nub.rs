//! Per-device handle.
//!
//! An [`AtaDevice`] is created by probing one unit on a bus. It keeps the
//! identify data and turns sector reads and writes into commands, choosing
//! between 28- and 48-bit addressing and between DMA and PIO opcodes.

use alloc::boxed::Box;
use alloc::sync::Arc;

use ata_core::kinfo;
use ata_core::sync::oneshot;
use ata_driver_api::command::LBA28_MAX;
use ata_driver_api::ext_lba::LBA48_MAX;
use ata_driver_api::taskfile::{
    CMD_READ_DMA, CMD_READ_DMA_EXT, CMD_READ_SECTORS, CMD_READ_SECTORS_EXT, CMD_WRITE_DMA,
    CMD_WRITE_DMA_EXT, CMD_WRITE_SECTORS, CMD_WRITE_SECTORS_EXT,
};
use ata_driver_api::{
    AtaBus, AtaCommand, AtaError, AtaOpcode, CommandFlags, Completion, DeviceType, IoDirection,
    MemoryDescriptor, UnitId,
};

use crate::devconfig::{BusModes, DeviceConfig};
use crate::identify::{IdentifyData, identify_device};

/// Bytes per logical sector.
pub const SECTOR_SIZE: usize = 512;

/// Timeout for sector transfers.
pub const IO_TIMEOUT_MS: u32 = 10_000;

const LBA28_MAX_SECTORS: u32 = 256;
const LBA48_MAX_SECTORS: u32 = 65_536;

/// One probed device on an ATA bus.
pub struct AtaDevice {
    bus: Arc<dyn AtaBus>,
    unit: UnitId,
    kind: DeviceType,
    identify: IdentifyData,
    dma: bool,
}

impl AtaDevice {
    /// Identifies `unit` on `bus`.
    ///
    /// # Errors
    ///
    /// Whatever the identify command fails with.
    pub fn probe(bus: Arc<dyn AtaBus>, unit: UnitId, kind: DeviceType) -> Result<Self, AtaError> {
        let identify = identify_device(bus.as_ref(), unit, kind)?;
        kinfo!(
            "ata: {:?} {:?} \"{}\" serial \"{}\", {} sectors",
            unit,
            kind,
            identify.model(),
            identify.serial_number(),
            identify.capacity()
        );
        Ok(Self {
            bus,
            unit,
            kind,
            identify,
            dma: false,
        })
    }

    /// Unit this device answers on.
    #[must_use]
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    /// ATA or ATAPI.
    #[must_use]
    pub fn kind(&self) -> DeviceType {
        self.kind
    }

    /// Identify data read at probe time.
    #[must_use]
    pub fn identify(&self) -> &IdentifyData {
        &self.identify
    }

    /// Addressable sectors.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.identify.capacity()
    }

    /// Best transfer modes for this device on a controller supporting `bus`.
    ///
    /// # Errors
    ///
    /// [`AtaError::UnknownDeviceType`] for an unrecognized device class.
    pub fn transfer_config(&self, bus: BusModes) -> Result<DeviceConfig, AtaError> {
        DeviceConfig::best_selection(&self.identify, bus)
    }

    /// Selects DMA or PIO opcodes for sector transfers.
    pub fn set_dma_enabled(&mut self, enabled: bool) {
        self.dma = enabled;
    }

    /// `true` if sector transfers use DMA.
    #[must_use]
    pub fn dma_enabled(&self) -> bool {
        self.dma
    }

    /// Submits `cmd` to this device.
    ///
    /// A command carrying a callback is only submitted and `Ok(None)` comes
    /// back at once; the callback receives the command later. Any other
    /// command is waited for and returned with its result filled in.
    ///
    /// # Errors
    ///
    /// The bus refused the command, or the completion was dropped.
    pub fn execute_command(
        &self,
        mut cmd: Box<AtaCommand>,
    ) -> Result<Option<Box<AtaCommand>>, AtaError> {
        cmd.set_unit(self.unit);
        if cmd.completion().is_callback() {
            self.bus.execute_command(cmd).map_err(|rejected| rejected.error)?;
            return Ok(None);
        }

        let (tx, rx) = oneshot::channel();
        cmd.set_completion(Completion::Notify(tx));
        self.bus.execute_command(cmd).map_err(|rejected| rejected.error)?;
        rx.wait().map(Some).map_err(|_| AtaError::Aborted)
    }

    /// Submits `cmd` and resolves once the bus completes it.
    ///
    /// # Errors
    ///
    /// The bus refused the command, or the completion was dropped.
    pub async fn submit(&self, mut cmd: Box<AtaCommand>) -> Result<Box<AtaCommand>, AtaError> {
        cmd.set_unit(self.unit);
        let (tx, rx) = oneshot::channel();
        cmd.set_completion(Completion::Notify(tx));
        self.bus.execute_command(cmd).map_err(|rejected| rejected.error)?;
        rx.await.map_err(|_| AtaError::Aborted)
    }

    /// Reads `count` sectors at `lba` into `buffer`. Returns bytes moved.
    ///
    /// # Errors
    ///
    /// [`AtaError::InvalidArgument`] if the range cannot be addressed or the
    /// buffer is too small, otherwise the command's result.
    pub fn read_sectors(
        &self,
        lba: u64,
        count: u32,
        buffer: &Arc<dyn MemoryDescriptor>,
    ) -> Result<usize, AtaError> {
        self.transfer(lba, count, buffer, IoDirection::In)
    }

    /// Writes `count` sectors at `lba` from `buffer`. Returns bytes moved.
    ///
    /// # Errors
    ///
    /// Same as [`AtaDevice::read_sectors`].
    pub fn write_sectors(
        &self,
        lba: u64,
        count: u32,
        buffer: &Arc<dyn MemoryDescriptor>,
    ) -> Result<usize, AtaError> {
        self.transfer(lba, count, buffer, IoDirection::Out)
    }

    fn transfer(
        &self,
        lba: u64,
        count: u32,
        buffer: &Arc<dyn MemoryDescriptor>,
        direction: IoDirection,
    ) -> Result<usize, AtaError> {
        let cmd = self.sector_command(lba, count, buffer, direction)?;

        buffer.prepare(direction)?;
        let done = self.execute_command(cmd);
        buffer.complete(direction)?;

        let done = done?.ok_or(AtaError::Aborted)?;
        done.result()?;
        Ok(done.actual_transfer())
    }

    /// Builds the READ/WRITE command for a sector range.
    fn sector_command(
        &self,
        lba: u64,
        count: u32,
        buffer: &Arc<dyn MemoryDescriptor>,
        direction: IoDirection,
    ) -> Result<Box<AtaCommand>, AtaError> {
        let bytes = usize::try_from(count)
            .ok()
            .and_then(|n| n.checked_mul(SECTOR_SIZE))
            .ok_or(AtaError::InvalidArgument)?;
        if count == 0 || buffer.len() < bytes {
            return Err(AtaError::InvalidArgument);
        }
        let end = lba
            .checked_add(u64::from(count))
            .ok_or(AtaError::InvalidArgument)?;

        let write = direction == IoDirection::Out;
        let mut flags = if write {
            CommandFlags::IO_WRITE
        } else {
            CommandFlags::IO_READ
        };
        if self.dma {
            flags |= CommandFlags::USE_DMA;
        }

        let mut cmd = AtaCommand::boxed();
        cmd.set_opcode(AtaOpcode::ExecIo);
        cmd.set_unit(self.unit);
        cmd.set_buffer(Some(Arc::clone(buffer)));
        cmd.set_position(0);
        cmd.set_byte_count(bytes);
        cmd.set_timeout_ms(IO_TIMEOUT_MS);

        let [count_lo, count_hi, _, _] = count.to_le_bytes();
        if count <= LBA28_MAX_SECTORS && end <= u64::from(LBA28_MAX) + 1 {
            let opcode = match (write, self.dma) {
                (false, false) => CMD_READ_SECTORS,
                (false, true) => CMD_READ_DMA,
                (true, false) => CMD_WRITE_SECTORS,
                (true, true) => CMD_WRITE_DMA,
            };
            let lba = u32::try_from(lba).map_err(|_| AtaError::InvalidArgument)?;
            cmd.set_lba28(lba, self.unit)?;
            // 256 sectors is encoded as zero.
            cmd.set_sector_count(count_lo);
            cmd.set_command(opcode);
        } else {
            if !self.identify.supports_lba48()
                || count > LBA48_MAX_SECTORS
                || end > LBA48_MAX + 1
            {
                return Err(AtaError::InvalidArgument);
            }
            let opcode = match (write, self.dma) {
                (false, false) => CMD_READ_SECTORS_EXT,
                (false, true) => CMD_READ_DMA_EXT,
                (true, false) => CMD_WRITE_SECTORS_EXT,
                (true, true) => CMD_WRITE_DMA_EXT,
            };
            let count16 = u16::from_le_bytes([count_lo, count_hi]);
            cmd.ext_lba_mut().set_lba48(lba, self.unit, count16, opcode);
            cmd.set_command(opcode);
            flags |= CommandFlags::LBA48;
        }

        cmd.set_flags(flags);
        Ok(cmd)
    }
}

impl core::fmt::Debug for AtaDevice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AtaDevice")
            .field("unit", &self.unit)
            .field("kind", &self.kind)
            .field("identify", &self.identify)
            .field("dma", &self.dma)
            .finish_non_exhaustive()
    }
}
