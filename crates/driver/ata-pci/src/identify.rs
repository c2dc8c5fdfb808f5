//! IDENTIFY (PACKET) DEVICE flow and identify-data decoding.

use alloc::sync::Arc;

use ata_core::kdebug;
use ata_core::sync::oneshot;
use ata_driver_api::taskfile::{CMD_IDENTIFY_DEVICE, CMD_IDENTIFY_PACKET_DEVICE};
use ata_driver_api::{
    AtaBus, AtaCommand, AtaError, AtaOpcode, CommandFlags, DeviceType, IoDirection,
    MemoryDescriptor, UnitId,
};

/// Size of the identify data block in bytes.
pub const IDENTIFY_BLOCK_SIZE: usize = 512;

/// Timeout applied to the identify command.
pub const IDENTIFY_TIMEOUT_MS: u32 = 30_000;

/// Byte ranges holding ATA strings: serial number, firmware revision, model.
const STRING_FIELDS: [core::ops::Range<usize>; 3] = [20..40, 46..54, 54..94];

/// Converts a raw identify block, as it lands in memory, to host order.
///
/// The device sends 16-bit words low byte first with the first character of
/// every string pair in the high byte. On little-endian hosts only the string
/// fields need swapping; on big-endian hosts every word does.
pub fn swap_identify_strings(block: &mut [u8; IDENTIFY_BLOCK_SIZE]) {
    if cfg!(target_endian = "big") {
        for pair in block.chunks_exact_mut(2) {
            pair.swap(0, 1);
        }
    } else {
        for range in STRING_FIELDS {
            for pair in block[range].chunks_exact_mut(2) {
                pair.swap(0, 1);
            }
        }
    }
}

/// Runs IDENTIFY DEVICE (or IDENTIFY PACKET DEVICE for ATAPI units) and
/// blocks until the bus completes it.
///
/// # Errors
///
/// [`AtaError::InvalidArgument`] for an absent or unknown device, any
/// submission or buffer error, and the command's own failure result.
pub fn identify_device(
    bus: &dyn AtaBus,
    unit: UnitId,
    kind: DeviceType,
) -> Result<IdentifyData, AtaError> {
    let opcode = match kind {
        DeviceType::Ata => CMD_IDENTIFY_DEVICE,
        DeviceType::Atapi => CMD_IDENTIFY_PACKET_DEVICE,
        DeviceType::None | DeviceType::Unknown => return Err(AtaError::InvalidArgument),
    };

    let buffer = bus.alloc_dma_buffer(IDENTIFY_BLOCK_SIZE)?;

    let mut cmd = AtaCommand::boxed();
    cmd.set_opcode(AtaOpcode::ExecIo);
    cmd.set_flags(CommandFlags::IO_READ);
    cmd.set_unit(unit);
    cmd.set_timeout_ms(IDENTIFY_TIMEOUT_MS);
    cmd.set_buffer(Some(Arc::clone(&buffer)));
    cmd.set_position(0);
    cmd.set_byte_count(IDENTIFY_BLOCK_SIZE);
    cmd.set_device_head(unit.select_bits());
    cmd.set_command(opcode);

    // The callback only signals; the block is decoded on this thread.
    let (tx, rx) = oneshot::channel();
    cmd.set_callback(move |done| tx.send(done));

    buffer.prepare(IoDirection::In)?;
    if let Err(rejected) = bus.execute_command(cmd) {
        buffer.complete(IoDirection::In)?;
        return Err(rejected.error);
    }

    let done = rx.wait().map_err(|_| AtaError::Aborted);
    buffer.complete(IoDirection::In)?;
    let done = done?;
    done.result()?;

    let mut block = [0u8; IDENTIFY_BLOCK_SIZE];
    buffer.read_at(0, &mut block);
    swap_identify_strings(&mut block);

    let data = IdentifyData::new(block);
    kdebug!(
        "ata: identify {:?}: \"{}\" fw \"{}\" ({} bytes)",
        unit,
        data.model(),
        data.firmware_revision(),
        done.actual_transfer()
    );
    Ok(data)
}

// ---------------------------------------------------------------------------
// IdentifyData
// ---------------------------------------------------------------------------

/// Decoded identify block in host byte order.
#[derive(Clone, PartialEq, Eq)]
pub struct IdentifyData([u8; IDENTIFY_BLOCK_SIZE]);

impl IdentifyData {
    /// Wraps a block already passed through [`swap_identify_strings`].
    #[must_use]
    pub const fn new(block: [u8; IDENTIFY_BLOCK_SIZE]) -> Self {
        Self(block)
    }

    /// The raw block.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; IDENTIFY_BLOCK_SIZE] {
        &self.0
    }

    /// Identify word `n` (0..256). Out-of-range words read as zero.
    #[must_use]
    pub fn word(&self, n: usize) -> u16 {
        self.0
            .get(2 * n..2 * n + 2)
            .map_or(0, |b| u16::from_ne_bytes([b[0], b[1]]))
    }

    fn string(&self, range: core::ops::Range<usize>) -> &str {
        core::str::from_utf8(&self.0[range])
            .unwrap_or("")
            .trim_matches(|c| c == ' ' || c == '\0')
    }

    /// Serial number (words 10..20).
    #[must_use]
    pub fn serial_number(&self) -> &str {
        self.string(STRING_FIELDS[0].clone())
    }

    /// Firmware revision (words 23..27).
    #[must_use]
    pub fn firmware_revision(&self) -> &str {
        self.string(STRING_FIELDS[1].clone())
    }

    /// Model number (words 27..47).
    #[must_use]
    pub fn model(&self) -> &str {
        self.string(STRING_FIELDS[2].clone())
    }

    /// `true` if the 48-bit feature set is supported and enabled.
    #[must_use]
    pub fn supports_lba48(&self) -> bool {
        self.word(83) & (1 << 10) != 0 && self.word(86) & (1 << 10) != 0
    }

    /// Sectors addressable with LBA28 commands.
    #[must_use]
    pub fn lba28_capacity(&self) -> u32 {
        u32::from(self.word(60)) | (u32::from(self.word(61)) << 16)
    }

    /// Sectors addressable with LBA48 commands, zero when unsupported.
    #[must_use]
    pub fn lba48_capacity(&self) -> u64 {
        if !self.supports_lba48() {
            return 0;
        }
        (100..104)
            .rev()
            .fold(0u64, |acc, w| (acc << 16) | u64::from(self.word(w)))
    }

    /// Total addressable sectors.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        match self.lba48_capacity() {
            0 => u64::from(self.lba28_capacity()),
            sectors => sectors,
        }
    }

    /// `true` for a packet (ATAPI) device.
    #[must_use]
    pub fn is_atapi(&self) -> bool {
        self.word(0) & 0xC000 == 0x8000
    }

    /// How an ATAPI device asserts DRQ for the command packet (word 0 bits
    /// 6:5), `None` for ATA devices.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, reason = "two-bit field")]
    pub fn packet_drq_type(&self) -> Option<u8> {
        self.is_atapi().then(|| ((self.word(0) & 0x60) >> 5) as u8)
    }

    /// `true` if the device interrupts before accepting the command packet.
    #[must_use]
    pub fn uses_packet_irq(&self) -> bool {
        self.packet_drq_type() == Some(1)
    }
}

impl core::fmt::Debug for IdentifyData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IdentifyData")
            .field("model", &self.model())
            .field("serial", &self.serial_number())
            .field("firmware", &self.firmware_revision())
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}
