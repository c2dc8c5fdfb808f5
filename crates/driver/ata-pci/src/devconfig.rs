//! Transfer-mode capabilities from identify data.
//!
//! Mode sets are bitmaps: bit `n` set means mode `n` is supported. A
//! selection made with [`DeviceConfig::best_selection`] has at most one bit
//! set per class.

use ata_driver_api::AtaError;

use crate::identify::IdentifyData;

const WORD_CONFIG: usize = 0;
const WORD_PIO_LEGACY: usize = 51;
const WORD_VALID_FIELDS: usize = 53;
const WORD_MWDMA: usize = 63;
const WORD_PIO_ADVANCED: usize = 64;
const WORD_MWDMA_MIN_CYCLE: usize = 65;
const WORD_MWDMA_REC_CYCLE: usize = 66;
const WORD_PIO_CYCLE_IORDY: usize = 68;
const WORD_UDMA: usize = 88;

/// Word 53: words 64..=70 are valid.
const FIELDS_64_70_VALID: u16 = 1 << 1;
/// Word 53: word 88 is valid.
const FIELDS_88_VALID: u16 = 1 << 2;

/// PIO cycle time assumed when the device reports advanced modes but no
/// IORDY cycle time (mode 3 timing).
const DEFAULT_ADVANCED_PIO_CYCLE_NS: u16 = 180;

/// Modes the host controller can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusModes {
    /// PIO mode bitmap.
    pub pio: u8,
    /// Multiword DMA mode bitmap.
    pub mwdma: u8,
    /// Ultra DMA mode bitmap.
    pub udma: u8,
}

impl BusModes {
    /// PIO 0..=4, MWDMA 0..=2, UDMA 0..=5.
    pub const PIIX: Self = Self {
        pio: 0x1F,
        mwdma: 0x07,
        udma: 0x3F,
    };

    /// PIO 0..=4 only.
    pub const PIO_ONLY: Self = Self {
        pio: 0x1F,
        mwdma: 0,
        udma: 0,
    };
}

/// Transfer capabilities of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceConfig {
    /// Supported PIO modes.
    pub pio_modes: u8,
    /// Minimum PIO cycle time in nanoseconds.
    pub pio_cycle_ns: u16,
    /// Supported multiword DMA modes.
    pub mwdma_modes: u8,
    /// Minimum multiword DMA cycle time in nanoseconds.
    pub mwdma_cycle_ns: u16,
    /// Supported Ultra DMA modes.
    pub udma_modes: u8,
    /// ATAPI packet DRQ type, `None` for ATA devices.
    pub packet_drq_type: Option<u8>,
}

/// Index of the most significant set bit, `None` when no bit is set.
fn highest_mode(bitmap: u8) -> Option<u8> {
    bitmap.checked_ilog2().and_then(|n| u8::try_from(n).ok())
}

fn only_highest(bitmap: u8) -> u8 {
    highest_mode(bitmap).map_or(0, |n| 1 << n)
}

fn low_byte(word: u16) -> u8 {
    word.to_le_bytes()[0]
}

impl DeviceConfig {
    /// Decodes everything the device reports.
    ///
    /// # Errors
    ///
    /// [`AtaError::UnknownDeviceType`] if word 0 names neither an ATA nor an
    /// ATAPI device.
    pub fn from_identify(id: &IdentifyData) -> Result<Self, AtaError> {
        if id.word(WORD_CONFIG) & 0xC000 == 0xC000 {
            return Err(AtaError::UnknownDeviceType);
        }

        let valid = id.word(WORD_VALID_FIELDS);
        let mut config = Self {
            packet_drq_type: id.packet_drq_type(),
            ..Self::default()
        };

        let advanced = (id.word(WORD_PIO_ADVANCED) & 0x03) << 3;
        if valid & FIELDS_64_70_VALID != 0 && advanced != 0 {
            config.pio_modes = low_byte(advanced | 0x07);
            config.pio_cycle_ns = match id.word(WORD_PIO_CYCLE_IORDY) {
                0 => DEFAULT_ADVANCED_PIO_CYCLE_NS,
                ns => ns,
            };
        } else {
            (config.pio_modes, config.pio_cycle_ns) = match id.word(WORD_PIO_LEGACY) & 0xFF00 {
                0x0200 => (0x07, 240),
                0x0100 => (0x03, 383),
                _ => (0x01, 600),
            };
        }

        if valid & FIELDS_64_70_VALID != 0 {
            config.mwdma_modes = low_byte(id.word(WORD_MWDMA) & 0x07);
            config.mwdma_cycle_ns = id
                .word(WORD_MWDMA_REC_CYCLE)
                .max(id.word(WORD_MWDMA_MIN_CYCLE));
        }

        if valid & FIELDS_88_VALID != 0 {
            config.udma_modes = low_byte(id.word(WORD_UDMA));
        }

        Ok(config)
    }

    /// The fastest modes both the device and `bus` support.
    ///
    /// Ultra DMA wins over multiword DMA; each class keeps only its highest
    /// mode.
    ///
    /// # Errors
    ///
    /// Same as [`DeviceConfig::from_identify`].
    pub fn best_selection(id: &IdentifyData, bus: BusModes) -> Result<Self, AtaError> {
        let mut config = Self::from_identify(id)?;
        config.pio_modes &= bus.pio;
        config.mwdma_modes &= bus.mwdma;
        config.udma_modes &= bus.udma;

        if config.udma_modes != 0 {
            config.mwdma_modes = 0;
        }

        config.pio_modes = only_highest(config.pio_modes);
        config.mwdma_modes = only_highest(config.mwdma_modes);
        config.udma_modes = only_highest(config.udma_modes);
        Ok(config)
    }

    /// Highest PIO mode number.
    #[must_use]
    pub fn pio_mode(&self) -> Option<u8> {
        highest_mode(self.pio_modes)
    }

    /// Highest multiword DMA mode number.
    #[must_use]
    pub fn mwdma_mode(&self) -> Option<u8> {
        highest_mode(self.mwdma_modes)
    }

    /// Highest Ultra DMA mode number.
    #[must_use]
    pub fn udma_mode(&self) -> Option<u8> {
        highest_mode(self.udma_modes)
    }

    /// `true` if some DMA mode is available.
    #[must_use]
    pub fn supports_dma(&self) -> bool {
        self.mwdma_modes != 0 || self.udma_modes != 0
    }
}
