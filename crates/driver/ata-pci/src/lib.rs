//! PCI bus-master IDE channel driver.
//!
//! Implements the bus controller side of the ATA driver API for one
//! parallel-ATA channel behind a PCI IDE function:
//!
//! - [`prd`]: Physical Region Descriptor table and chain builder.
//! - [`dma`]: bus-master DMA engine state machine.
//! - [`channel`]: command queue, task-file issue and the interrupt-driven
//!   phase machine.
//! - [`identify`] / [`devconfig`]: IDENTIFY DEVICE flow and decoding.
//! - [`nub`]: per-device handle that probes and submits commands.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod channel;
pub mod config;
pub mod devconfig;
pub mod dma;
pub mod identify;
pub mod nub;
pub mod prd;

#[cfg(test)]
pub(crate) mod sim;

pub use channel::{AtaChannel, ChannelServices};
pub use config::ChannelConfig;
pub use devconfig::{BusModes, DeviceConfig};
pub use dma::{PciBusMaster, PioOnly};
pub use identify::{IdentifyData, identify_device, swap_identify_strings};
pub use nub::AtaDevice;
pub use prd::{PrdEntry, PrdTable, build_chain};
