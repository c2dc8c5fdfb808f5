//! The ATA command object.
//!
//! An [`AtaCommand`] describes one ATA/ATAPI transaction and carries its
//! outcome. The submitter fills it in and hands ownership to the bus in a
//! `Box`; the bus hands it back through the command's [`Completion`]. A
//! command is either waited on (a oneshot [`Completion::Notify`]) or fires a
//! callback, and the completion is taken out of the command exactly once.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;

use ata_core::sync::oneshot;
use bitflags::bitflags;

use crate::error::AtaError;
use crate::ext_lba::ExtendedLba;
use crate::memory::{IoDirection, MemoryDescriptor};
use crate::taskfile::{DEVICE_LBA, PACKET_CAPACITY, TaskFile, UnitId};

/// Default logical transfer chunk (one sector).
pub const DEFAULT_CHUNK_SIZE: usize = 512;

/// Largest address accepted by [`AtaCommand::set_lba28`].
pub const LBA28_MAX: u32 = 0x0FFF_FFFF;

/// Operation a command asks the bus to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AtaOpcode {
    /// Placeholder for an unfilled command.
    #[default]
    NoOp,
    /// Execute an ATA I/O command.
    ExecIo,
    /// Execute an ATAPI packet command.
    AtapiExecIo,
    /// Read or write task-file registers directly.
    RegAccess,
    /// Soft-reset both devices on the channel.
    BusReset,
    /// Barrier: completes once the commands queued before it have run.
    QueueFlush,
}

bitflags! {
    /// Per-command option bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CommandFlags: u32 {
        /// Data moves from the device into the buffer.
        const IO_READ = 1 << 0;
        /// Data moves from the buffer to the device.
        const IO_WRITE = 1 << 1;
        /// Move data with the bus-master engine rather than PIO.
        const USE_DMA = 1 << 2;
        /// ATAPI packet protocol.
        const PROTOCOL_ATAPI = 1 << 3;
        /// Queue ahead of all pending commands.
        const IMMEDIATE = 1 << 4;
        /// Poll for completion instead of waiting for an interrupt.
        const USE_NO_IRQ = 1 << 5;
        /// Register access writes the selected task-file registers.
        const TF_ACCESS = 1 << 6;
        /// Register access reads the selected registers back on completion.
        const TF_ACCESS_RESULT = 1 << 7;
        /// Use the extended LBA registers and HOB write order.
        const LBA48 = 1 << 8;
    }
}

bitflags! {
    /// Task-file registers touched by a [`AtaOpcode::RegAccess`] command.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RegisterMask: u16 {
        /// Data register.
        const DATA = 1 << 0;
        /// Features / error.
        const FEATURES = 1 << 1;
        /// Sector count.
        const SECTOR_COUNT = 1 << 2;
        /// Sector number.
        const SECTOR_NUMBER = 1 << 3;
        /// Cylinder low.
        const CYLINDER_LOW = 1 << 4;
        /// Cylinder high.
        const CYLINDER_HIGH = 1 << 5;
        /// Device/head.
        const DEVICE_HEAD = 1 << 6;
        /// Command / status.
        const COMMAND = 1 << 7;
        /// Device control / alternate status.
        const ALT_STATUS = 1 << 8;
    }
}

/// Where a finished command goes.
#[derive(Default)]
pub enum Completion {
    /// Nobody is waiting; the command is dropped on completion.
    #[default]
    None,
    /// Run a callback with the finished command.
    Callback(Box<dyn FnOnce(Box<AtaCommand>) + Send>),
    /// Send the finished command to a waiting receiver.
    Notify(oneshot::Sender<Box<AtaCommand>>),
}

impl Completion {
    /// Returns `true` for [`Completion::Callback`].
    #[must_use]
    pub const fn is_callback(&self) -> bool {
        matches!(self, Self::Callback(_))
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Callback(_) => f.write_str("Callback(..)"),
            Self::Notify(_) => f.write_str("Notify(..)"),
        }
    }
}

/// One ATA/ATAPI transaction and its outcome.
pub struct AtaCommand {
    opcode: AtaOpcode,
    unit: UnitId,
    flags: CommandFlags,
    register_mask: RegisterMask,
    task_file: TaskFile,
    ext_lba: ExtendedLba,
    buffer: Option<Arc<dyn MemoryDescriptor>>,
    position: usize,
    byte_count: usize,
    actual_byte_count: usize,
    logical_chunk_size: usize,
    timeout_ms: u32,
    completion: Completion,
    ref_con: usize,
    ref_con2: usize,
    result: Result<(), AtaError>,
    status: u8,
    error_reg: u8,
    in_use: bool,
}

macro_rules! taskfile_accessors {
    ($($(#[$doc:meta])* $field:ident, $setter:ident;)*) => {
        $(
            $(#[$doc])*
            #[must_use]
            pub const fn $field(&self) -> u8 {
                self.task_file.$field
            }

            $(#[$doc])*
            pub fn $setter(&mut self, value: u8) {
                self.task_file.$field = value;
            }
        )*
    };
}

impl AtaCommand {
    /// Creates a command in its reset state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            opcode: AtaOpcode::NoOp,
            unit: UnitId::Invalid,
            flags: CommandFlags::empty(),
            register_mask: RegisterMask::empty(),
            task_file: TaskFile::default(),
            ext_lba: ExtendedLba::new(),
            buffer: None,
            position: 0,
            byte_count: 0,
            actual_byte_count: 0,
            logical_chunk_size: DEFAULT_CHUNK_SIZE,
            timeout_ms: 0,
            completion: Completion::None,
            ref_con: 0,
            ref_con2: 0,
            result: Ok(()),
            status: 0,
            error_reg: 0,
            in_use: false,
        }
    }

    /// Creates a boxed command, ready to hand to a bus.
    #[must_use]
    pub fn boxed() -> Box<Self> {
        Box::new(Self::new())
    }

    /// Returns every field to its reset state so the object can be reused.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    // -----------------------------------------------------------------------
    // Addressing
    // -----------------------------------------------------------------------

    /// Loads a 28-bit LBA and unit into the address registers.
    ///
    /// # Errors
    ///
    /// [`AtaError::InvalidArgument`] if `lba` needs more than 28 bits or
    /// `unit` is [`UnitId::Invalid`]. No register is touched in that case.
    pub fn set_lba28(&mut self, lba: u32, unit: UnitId) -> Result<(), AtaError> {
        if lba > LBA28_MAX || unit.index().is_none() {
            return Err(AtaError::InvalidArgument);
        }
        let [b0, b1, b2, b3] = lba.to_le_bytes();
        self.task_file.sector_number = b0;
        self.task_file.cylinder_low = b1;
        self.task_file.cylinder_high = b2;
        self.task_file.device_head = (b3 & 0x0F) | DEVICE_LBA | unit.select_bits();
        Ok(())
    }

    /// Decodes the address registers back into `(lba, unit)`.
    #[must_use]
    pub const fn lba28(&self) -> (u32, UnitId) {
        (self.task_file.lba28(), self.task_file.selected_unit())
    }

    /// Copies an ATAPI command packet into the packet region.
    ///
    /// # Errors
    ///
    /// [`AtaError::InvalidArgument`] if the packet exceeds 16 bytes. The
    /// packet region is left untouched in that case.
    pub fn set_packet_command(&mut self, packet: &[u8]) -> Result<(), AtaError> {
        if packet.len() > PACKET_CAPACITY {
            return Err(AtaError::InvalidArgument);
        }
        let slot = &mut self.task_file.packet;
        slot.bytes[..packet.len()].copy_from_slice(packet);
        #[allow(clippy::cast_possible_truncation, reason = "bounded by PACKET_CAPACITY")]
        let size = packet.len() as u8;
        slot.size = size;
        Ok(())
    }

    /// Returns the valid ATAPI packet bytes.
    #[must_use]
    pub fn packet(&self) -> &[u8] {
        self.task_file.packet.as_slice()
    }

    /// The extended LBA registers.
    #[must_use]
    pub const fn ext_lba(&self) -> &ExtendedLba {
        &self.ext_lba
    }

    /// Mutable access to the extended LBA registers.
    pub fn ext_lba_mut(&mut self) -> &mut ExtendedLba {
        &mut self.ext_lba
    }

    // -----------------------------------------------------------------------
    // Task file
    // -----------------------------------------------------------------------

    /// The full register image.
    #[must_use]
    pub const fn task_file(&self) -> &TaskFile {
        &self.task_file
    }

    /// Mutable access to the full register image.
    pub fn task_file_mut(&mut self) -> &mut TaskFile {
        &mut self.task_file
    }

    taskfile_accessors! {
        /// Device control / alternate status register.
        device_control, set_device_control;
        /// Features register.
        features, set_features;
        /// Sector count register.
        sector_count, set_sector_count;
        /// Sector number register.
        sector_number, set_sector_number;
        /// Cylinder low register.
        cylinder_low, set_cylinder_low;
        /// Cylinder high register.
        cylinder_high, set_cylinder_high;
        /// Device/head register.
        device_head, set_device_head;
        /// Command register.
        command, set_command;
    }

    /// Data register.
    #[must_use]
    pub const fn data_register(&self) -> u16 {
        self.task_file.data
    }

    /// Sets the data register.
    pub fn set_data_register(&mut self, value: u16) {
        self.task_file.data = value;
    }

    // -----------------------------------------------------------------------
    // Request description
    // -----------------------------------------------------------------------

    /// Operation code.
    #[must_use]
    pub const fn opcode(&self) -> AtaOpcode {
        self.opcode
    }

    /// Sets the operation code.
    pub fn set_opcode(&mut self, opcode: AtaOpcode) {
        self.opcode = opcode;
    }

    /// Target unit.
    #[must_use]
    pub const fn unit(&self) -> UnitId {
        self.unit
    }

    /// Sets the target unit.
    pub fn set_unit(&mut self, unit: UnitId) {
        self.unit = unit;
    }

    /// Option flags.
    #[must_use]
    pub const fn flags(&self) -> CommandFlags {
        self.flags
    }

    /// Replaces the option flags.
    pub fn set_flags(&mut self, flags: CommandFlags) {
        self.flags = flags;
    }

    /// Registers selected for a register-access command.
    #[must_use]
    pub const fn register_mask(&self) -> RegisterMask {
        self.register_mask
    }

    /// Selects registers for a register-access command.
    pub fn set_register_mask(&mut self, mask: RegisterMask) {
        self.register_mask = mask;
    }

    /// Transfer direction implied by the flags, if any data moves.
    #[must_use]
    pub const fn direction(&self) -> Option<IoDirection> {
        if self.flags.contains(CommandFlags::IO_READ) {
            Some(IoDirection::In)
        } else if self.flags.contains(CommandFlags::IO_WRITE) {
            Some(IoDirection::Out)
        } else {
            None
        }
    }

    /// The data buffer.
    #[must_use]
    pub fn buffer(&self) -> Option<&Arc<dyn MemoryDescriptor>> {
        self.buffer.as_ref()
    }

    /// Attaches (or detaches) the data buffer.
    pub fn set_buffer(&mut self, buffer: Option<Arc<dyn MemoryDescriptor>>) {
        self.buffer = buffer;
    }

    /// Offset into the buffer where the transfer starts.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Sets the transfer start offset.
    pub fn set_position(&mut self, position: usize) {
        self.position = position;
    }

    /// Requested transfer length in bytes.
    #[must_use]
    pub const fn byte_count(&self) -> usize {
        self.byte_count
    }

    /// Sets the requested transfer length.
    pub fn set_byte_count(&mut self, count: usize) {
        self.byte_count = count;
    }

    /// Bytes actually moved.
    #[must_use]
    pub const fn actual_transfer(&self) -> usize {
        self.actual_byte_count
    }

    /// Records the bytes actually moved.
    pub fn set_actual_transfer(&mut self, count: usize) {
        self.actual_byte_count = count;
    }

    /// Logical chunk size used by PIO transfers.
    #[must_use]
    pub const fn logical_chunk_size(&self) -> usize {
        self.logical_chunk_size
    }

    /// Sets the logical chunk size.
    pub fn set_logical_chunk_size(&mut self, size: usize) {
        self.logical_chunk_size = size;
    }

    /// Timeout in milliseconds (zero means none).
    #[must_use]
    pub const fn timeout_ms(&self) -> u32 {
        self.timeout_ms
    }

    /// Sets the timeout in milliseconds.
    pub fn set_timeout_ms(&mut self, timeout: u32) {
        self.timeout_ms = timeout;
    }

    /// First opaque context word.
    #[must_use]
    pub const fn ref_con(&self) -> usize {
        self.ref_con
    }

    /// Second opaque context word.
    #[must_use]
    pub const fn ref_con2(&self) -> usize {
        self.ref_con2
    }

    /// Sets both opaque context words.
    pub fn set_ref_cons(&mut self, ref_con: usize, ref_con2: usize) {
        self.ref_con = ref_con;
        self.ref_con2 = ref_con2;
    }

    // -----------------------------------------------------------------------
    // Completion and outcome
    // -----------------------------------------------------------------------

    /// Installs a completion callback.
    pub fn set_callback(&mut self, callback: impl FnOnce(Box<AtaCommand>) + Send + 'static) {
        self.completion = Completion::Callback(Box::new(callback));
    }

    /// Replaces the completion route.
    pub fn set_completion(&mut self, completion: Completion) {
        self.completion = completion;
    }

    /// The completion route.
    #[must_use]
    pub const fn completion(&self) -> &Completion {
        &self.completion
    }

    /// Takes the completion route, leaving [`Completion::None`] behind.
    pub fn take_completion(&mut self) -> Completion {
        core::mem::take(&mut self.completion)
    }

    /// Delivers the command through its completion route.
    pub fn complete(mut self: Box<Self>) {
        match self.take_completion() {
            Completion::None => {}
            Completion::Callback(callback) => callback(self),
            Completion::Notify(sender) => sender.send(self),
        }
    }

    /// Records the final status and error register values.
    pub fn set_end_result(&mut self, status: u8, error: u8) {
        self.status = status;
        self.error_reg = error;
    }

    /// Final status register value.
    #[must_use]
    pub const fn status(&self) -> u8 {
        self.status
    }

    /// Final error register value.
    #[must_use]
    pub const fn error_register(&self) -> u8 {
        self.error_reg
    }

    /// Outcome of the last execution.
    #[must_use]
    pub const fn result(&self) -> Result<(), AtaError> {
        self.result
    }

    /// Outcome as a number: zero on success, [`AtaError::code`] otherwise.
    #[must_use]
    pub const fn result_code(&self) -> u32 {
        match self.result {
            Ok(()) => 0,
            Err(e) => e.code(),
        }
    }

    /// Records the outcome.
    pub fn set_result(&mut self, result: Result<(), AtaError>) {
        self.result = result;
    }

    /// Returns `true` between submission and completion.
    #[must_use]
    pub const fn in_use(&self) -> bool {
        self.in_use
    }

    /// Marks the command submitted.
    ///
    /// # Errors
    ///
    /// [`AtaError::CommandInUse`] if it is already submitted.
    pub fn mark_in_use(&mut self) -> Result<(), AtaError> {
        if self.in_use {
            return Err(AtaError::CommandInUse);
        }
        self.in_use = true;
        Ok(())
    }

    /// Marks the command completed.
    pub fn clear_in_use(&mut self) {
        self.in_use = false;
    }
}

impl Default for AtaCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AtaCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtaCommand")
            .field("opcode", &self.opcode)
            .field("unit", &self.unit)
            .field("flags", &self.flags)
            .field("register_mask", &self.register_mask)
            .field("task_file", &self.task_file)
            .field("ext_lba", &self.ext_lba)
            .field("buffer_len", &self.buffer.as_ref().map(|b| b.len()))
            .field("position", &self.position)
            .field("byte_count", &self.byte_count)
            .field("actual_byte_count", &self.actual_byte_count)
            .field("logical_chunk_size", &self.logical_chunk_size)
            .field("timeout_ms", &self.timeout_ms)
            .field("completion", &self.completion)
            .field("ref_con", &self.ref_con)
            .field("ref_con2", &self.ref_con2)
            .field("result", &self.result)
            .field("status", &self.status)
            .field("error_reg", &self.error_reg)
            .field("in_use", &self.in_use)
            .finish()
    }
}
