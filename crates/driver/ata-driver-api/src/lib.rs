//! Driver API for parallel-ATA controllers.
//!
//! Defines the unit of work ([`AtaCommand`]) and everything it carries: the
//! task-file register image, the 48-bit [`ExtendedLba`] register triad, the
//! caller-owned [`MemoryDescriptor`] buffer and the completion route. Bus
//! controllers implement [`AtaBus`] and plug a [`DmaEngine`] backend in over
//! the raw [`ChannelRegisters`] primitive.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod bus;
pub mod command;
pub mod error;
pub mod ext_lba;
pub mod memory;
pub mod regs;
pub mod taskfile;

pub use bus::{AtaBus, DeviceType, DmaEngine, DmaState, Rejected};
pub use command::{AtaCommand, AtaOpcode, CommandFlags, Completion, RegisterMask};
pub use error::AtaError;
pub use ext_lba::ExtendedLba;
pub use memory::{HostBuffer, IoDirection, MemoryDescriptor, PhysSegment};
pub use regs::ChannelRegisters;
pub use taskfile::{TaskFile, UnitId};
