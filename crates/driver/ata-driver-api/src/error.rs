//! ATA error type.

use core::fmt;

/// Errors reported by command setup, DMA programming and command execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtaError {
    /// A parameter was out of range (LBA too wide, bad unit, oversized packet).
    InvalidArgument,
    /// A data transfer was requested on a command without a buffer.
    NullBuffer,
    /// The transfer needs more PRD entries than the table holds.
    PrdTableExhausted,
    /// The device set ERR in its status register.
    DeviceError,
    /// The bus-master engine reported an error.
    DmaError,
    /// No completion interrupt arrived before the command deadline.
    Timeout,
    /// The command opcode is not handled by this controller.
    UnknownOpcode,
    /// The device never dropped BSY during device selection.
    DeviceBusy,
    /// The command is already submitted and not yet completed.
    CommandInUse,
    /// IDENTIFY data describes a device class this driver does not handle.
    UnknownDeviceType,
    /// The operation is not supported by this backend.
    Unsupported,
    /// The completion route was dropped before delivering a result.
    Aborted,
}

impl AtaError {
    /// Returns the stable non-zero code for this error.
    ///
    /// A command's result reads as zero on success and this code otherwise.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::InvalidArgument => 1,
            Self::NullBuffer => 2,
            Self::PrdTableExhausted => 3,
            Self::DeviceError => 4,
            Self::DmaError => 5,
            Self::Timeout => 6,
            Self::UnknownOpcode => 7,
            Self::DeviceBusy => 8,
            Self::CommandInUse => 9,
            Self::UnknownDeviceType => 10,
            Self::Unsupported => 11,
            Self::Aborted => 12,
        }
    }
}

impl fmt::Display for AtaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => f.write_str("invalid argument"),
            Self::NullBuffer => f.write_str("command has no data buffer"),
            Self::PrdTableExhausted => f.write_str("PRD table exhausted"),
            Self::DeviceError => f.write_str("device reported an error"),
            Self::DmaError => f.write_str("bus-master DMA error"),
            Self::Timeout => f.write_str("command timed out"),
            Self::UnknownOpcode => f.write_str("unknown command opcode"),
            Self::DeviceBusy => f.write_str("device busy"),
            Self::CommandInUse => f.write_str("command already in use"),
            Self::UnknownDeviceType => f.write_str("unknown device type"),
            Self::Unsupported => f.write_str("operation not supported"),
            Self::Aborted => f.write_str("command aborted"),
        }
    }
}

impl core::error::Error for AtaError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [AtaError; 12] = [
        AtaError::InvalidArgument,
        AtaError::NullBuffer,
        AtaError::PrdTableExhausted,
        AtaError::DeviceError,
        AtaError::DmaError,
        AtaError::Timeout,
        AtaError::UnknownOpcode,
        AtaError::DeviceBusy,
        AtaError::CommandInUse,
        AtaError::UnknownDeviceType,
        AtaError::Unsupported,
        AtaError::Aborted,
    ];

    #[test]
    fn display_all_variants() {
        assert_eq!(format!("{}", AtaError::InvalidArgument), "invalid argument");
        assert_eq!(
            format!("{}", AtaError::NullBuffer),
            "command has no data buffer"
        );
        assert_eq!(
            format!("{}", AtaError::PrdTableExhausted),
            "PRD table exhausted"
        );
        assert_eq!(
            format!("{}", AtaError::DeviceError),
            "device reported an error"
        );
        assert_eq!(format!("{}", AtaError::DmaError), "bus-master DMA error");
        assert_eq!(format!("{}", AtaError::Timeout), "command timed out");
        assert_eq!(
            format!("{}", AtaError::UnknownOpcode),
            "unknown command opcode"
        );
        assert_eq!(format!("{}", AtaError::DeviceBusy), "device busy");
        assert_eq!(
            format!("{}", AtaError::CommandInUse),
            "command already in use"
        );
        assert_eq!(
            format!("{}", AtaError::UnknownDeviceType),
            "unknown device type"
        );
        assert_eq!(
            format!("{}", AtaError::Unsupported),
            "operation not supported"
        );
        assert_eq!(format!("{}", AtaError::Aborted), "command aborted");
    }

    #[test]
    fn codes_are_nonzero_and_distinct() {
        for (i, a) in ALL.iter().enumerate() {
            assert_ne!(a.code(), 0);
            for b in &ALL[i + 1..] {
                assert_ne!(a.code(), b.code());
            }
        }
    }
}
