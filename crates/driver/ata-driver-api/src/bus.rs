//! Bus controller and DMA engine capabilities.
//!
//! [`AtaBus`] is what device nubs submit commands to. A concrete channel
//! implements it and drives data movement through a [`DmaEngine`] backend.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;

use crate::command::AtaCommand;
use crate::error::AtaError;
use crate::memory::MemoryDescriptor;
use crate::regs::ChannelRegisters;
use crate::taskfile::UnitId;

/// Class of device attached at a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceType {
    /// Nothing attached.
    #[default]
    None,
    /// ATA disk.
    Ata,
    /// ATAPI packet device.
    Atapi,
    /// Something responded but could not be classified.
    Unknown,
}

/// State of a bus-master DMA engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DmaState {
    /// Stopped.
    #[default]
    Inactive,
    /// Building the descriptor program.
    Starting,
    /// Program built and armed, waiting for the interrupt.
    Status,
    /// Transfer finished without error.
    Complete,
    /// Program could not be built, or the engine reported an error.
    Error,
}

/// A command the bus refused to queue, handed back to the submitter.
pub struct Rejected {
    /// Why the command was refused.
    pub error: AtaError,
    /// The refused command, unchanged.
    pub command: Box<AtaCommand>,
}

impl fmt::Debug for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// A bus controller that executes commands for the devices on one channel.
pub trait AtaBus: Send + Sync {
    /// Queues `cmd` and returns without waiting.
    ///
    /// The command comes back through its completion route once it has
    /// finished, with its result, status and transfer count filled in.
    ///
    /// # Errors
    ///
    /// Returns the command inside [`Rejected`] if it cannot be queued, e.g.
    /// [`AtaError::CommandInUse`].
    fn execute_command(&self, cmd: Box<AtaCommand>) -> Result<(), Rejected>;

    /// Allocates a DMA-capable buffer of `len` bytes.
    ///
    /// # Errors
    ///
    /// Fails if no suitable memory is available.
    fn alloc_dma_buffer(&self, len: usize) -> Result<Arc<dyn MemoryDescriptor>, AtaError>;

    /// Returns what is attached at `unit`.
    fn device_type(&self, unit: UnitId) -> DeviceType;
}

/// A DMA engine backend for one channel.
///
/// The engine owns its descriptor table and state. Every transaction goes
/// `start_dma` → `handle_interrupt` (or `stop_dma` on abort); `stop_dma` is
/// safe from any state.
pub trait DmaEngine: Send {
    /// Builds the descriptor program for `cmd` and arms the engine.
    ///
    /// # Errors
    ///
    /// Propagates descriptor-building failures; the engine is stopped and no
    /// address or start register is written in that case.
    fn start_dma(&mut self, regs: &dyn ChannelRegisters, cmd: &mut AtaCommand)
    -> Result<(), AtaError>;

    /// Halts the engine and returns it to [`DmaState::Inactive`].
    fn stop_dma(&mut self, regs: &dyn ChannelRegisters);

    /// Inspects the engine after a channel interrupt.
    ///
    /// Acts only in [`DmaState::Status`]: returns the outcome it observed
    /// ([`DmaState::Complete`] or [`DmaState::Error`]) after stopping the
    /// engine, or `None` when there was no armed program.
    fn handle_interrupt(
        &mut self,
        regs: &dyn ChannelRegisters,
        cmd: &mut AtaCommand,
    ) -> Option<DmaState>;

    /// Current state.
    fn state(&self) -> DmaState;
}
