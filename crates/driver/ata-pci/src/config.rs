//! Channel tunables.

use ata_driver_api::AtaError;

use crate::prd::MAX_PRD_ENTRIES;

/// Timing and sizing knobs for one [`AtaChannel`](crate::AtaChannel).
///
/// Poll budgets count status reads; each unsuccessful read is followed by a
/// `poll_delay_us` delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Number of PRD entries in the descriptor table (1..=64).
    pub prd_capacity: usize,
    /// Status polls allowed for BSY/DRQ to clear during device selection.
    pub select_poll_budget: u32,
    /// Status polls allowed while waiting for DRQ or for BSY to drop.
    pub drq_poll_budget: u32,
    /// Delay between status polls, in microseconds.
    pub poll_delay_us: u32,
    /// How long SRST is held asserted, in microseconds.
    pub reset_hold_us: u32,
    /// Settle time after releasing SRST before sampling status, in milliseconds.
    pub reset_settle_ms: u32,
    /// How long devices may stay busy after a reset, in milliseconds.
    pub reset_timeout_ms: u32,
}

impl ChannelConfig {
    /// Hardware defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            prd_capacity: MAX_PRD_ENTRIES,
            select_poll_budget: 1_000,
            drq_poll_budget: 3_000,
            poll_delay_us: 10,
            reset_hold_us: 100,
            reset_settle_ms: 50,
            reset_timeout_ms: 31_000,
        }
    }

    /// Returns a copy with a different PRD table size.
    #[must_use]
    pub const fn with_prd_capacity(mut self, capacity: usize) -> Self {
        self.prd_capacity = capacity;
        self
    }

    /// Checks that the values are usable.
    ///
    /// # Errors
    ///
    /// [`AtaError::InvalidArgument`] if the PRD capacity is zero or larger
    /// than the hardware table, or a poll budget is zero.
    pub const fn validate(&self) -> Result<(), AtaError> {
        if self.prd_capacity == 0
            || self.prd_capacity > MAX_PRD_ENTRIES
            || self.select_poll_budget == 0
            || self.drq_poll_budget == 0
        {
            return Err(AtaError::InvalidArgument);
        }
        Ok(())
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ChannelConfig::default();
        assert_eq!(config.prd_capacity, 64);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn capacity_bounds() {
        let config = ChannelConfig::new();
        assert_eq!(
            config.with_prd_capacity(0).validate(),
            Err(AtaError::InvalidArgument)
        );
        assert_eq!(
            config.with_prd_capacity(65).validate(),
            Err(AtaError::InvalidArgument)
        );
        assert_eq!(config.with_prd_capacity(1).validate(), Ok(()));
    }
}
