//! One ATA channel: command queue and the interrupt-driven phase machine.
//!
//! Commands are queued by [`AtaBus::execute_command`] and run one at a time.
//! An I/O command walks through the phases
//!
//! ```text
//! Started -> [PacketCmd] -> [DataTx]* -> Status
//! ```
//!
//! advancing on each device interrupt ([`AtaChannel::handle_interrupt`]).
//! Commands flagged `USE_NO_IRQ` are polled to completion on the submitting
//! thread instead. A finished command is handed back through its completion
//! route after the channel lock has been released, so a callback may submit
//! follow-up work directly.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;

use ata_core::sync::SpinLock;
use ata_core::{kdebug, kerr, kinfo, ktrace, kwarn};
use ata_driver_api::regs::{AtaStatus, DeviceControl, TaskFileRegister as Tf};
use ata_driver_api::taskfile::{CMD_DEVICE_RESET, DEVICE_LEGACY};
use ata_driver_api::{
    AtaBus, AtaCommand, AtaError, AtaOpcode, ChannelRegisters, CommandFlags, DeviceType,
    DmaEngine, DmaState, ExtendedLba, MemoryDescriptor, RegisterMask, Rejected, TaskFile, UnitId,
};

use crate::config::ChannelConfig;
use crate::dma::PciBusMaster;
use crate::prd::{PRD_ENTRY_SIZE, PrdTable};

/// Platform services a channel needs besides its registers.
pub trait ChannelServices: Send + Sync {
    /// Monotonic time in milliseconds.
    fn now_ms(&self) -> u64;

    /// Busy-waits for `us` microseconds.
    fn delay_us(&self, us: u32);

    /// Allocates physically contiguous DMA memory below 4 GiB.
    ///
    /// # Errors
    ///
    /// Fails if no suitable memory is available.
    fn alloc_dma_buffer(&self, len: usize) -> Result<Arc<dyn MemoryDescriptor>, AtaError>;
}

// ---------------------------------------------------------------------------
// Channel state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Started,
    PacketCmd,
    DataTx,
    Status,
}

/// Phase implied by the ATAPI interrupt reason bits (sector count 1:0).
const ATAPI_REASON_PHASE: [Phase; 4] = [Phase::DataTx, Phase::PacketCmd, Phase::DataTx, Phase::Status];

enum Step {
    Pending,
    Done(Result<(), AtaError>),
}

#[derive(Debug, Clone, Copy, Default)]
struct DeviceInfo {
    kind: DeviceType,
    packet_irq: bool,
}

struct ChannelState<D> {
    queue: VecDeque<Box<AtaCommand>>,
    current: Option<Box<AtaCommand>>,
    phase: Phase,
    deadline_ms: Option<u64>,
    selected: UnitId,
    devices: [DeviceInfo; 2],
    dma: D,
}

/// Address registers, in issue order, that have 16-bit LBA48 counterparts.
const ADDRESS_REGS: [(RegisterMask, Tf); 5] = [
    (RegisterMask::FEATURES, Tf::Features),
    (RegisterMask::SECTOR_COUNT, Tf::SectorCount),
    (RegisterMask::SECTOR_NUMBER, Tf::SectorNumber),
    (RegisterMask::CYLINDER_LOW, Tf::CylinderLow),
    (RegisterMask::CYLINDER_HIGH, Tf::CylinderHigh),
];

fn tf_slot(tf: &mut TaskFile, reg: Tf) -> &mut u8 {
    match reg {
        Tf::Features => &mut tf.features,
        Tf::SectorCount => &mut tf.sector_count,
        Tf::SectorNumber => &mut tf.sector_number,
        Tf::CylinderLow => &mut tf.cylinder_low,
        Tf::CylinderHigh => &mut tf.cylinder_high,
        Tf::DeviceHead => &mut tf.device_head,
        Tf::Command => &mut tf.command,
        Tf::AltStatus => &mut tf.device_control,
    }
}

fn ext_value(ext: &ExtendedLba, reg: Tf) -> u16 {
    match reg {
        Tf::Features => ext.features16(),
        Tf::SectorCount => ext.sector_count16(),
        Tf::SectorNumber => ext.lba_low16(),
        Tf::CylinderLow => ext.lba_mid16(),
        Tf::CylinderHigh => ext.lba_high16(),
        Tf::DeviceHead | Tf::Command | Tf::AltStatus => 0,
    }
}

fn set_ext_value(ext: &mut ExtendedLba, reg: Tf, value: u16) {
    match reg {
        Tf::Features => ext.set_features16(value),
        Tf::SectorCount => ext.set_sector_count16(value),
        Tf::SectorNumber => ext.set_lba_low16(value),
        Tf::CylinderLow => ext.set_lba_mid16(value),
        Tf::CylinderHigh => ext.set_lba_high16(value),
        Tf::DeviceHead | Tf::Command | Tf::AltStatus => {}
    }
}

fn is_packet(cmd: &AtaCommand) -> bool {
    cmd.flags().contains(CommandFlags::PROTOCOL_ATAPI) && !cmd.packet().is_empty()
}

/// ATA-protocol PIO write: the host sends data before the first interrupt.
fn is_pio_write(flags: CommandFlags) -> bool {
    flags & (CommandFlags::IO_WRITE | CommandFlags::USE_DMA | CommandFlags::PROTOCOL_ATAPI)
        == CommandFlags::IO_WRITE
}

fn deliver(done: Vec<Box<AtaCommand>>) {
    for cmd in done {
        cmd.complete();
    }
}

// ---------------------------------------------------------------------------
// AtaChannel
// ---------------------------------------------------------------------------

/// Bus controller for one ATA channel.
pub struct AtaChannel<R, D> {
    regs: R,
    services: Arc<dyn ChannelServices>,
    config: ChannelConfig,
    state: SpinLock<ChannelState<D>>,
}

impl<R: ChannelRegisters> AtaChannel<R, PciBusMaster> {
    /// Creates a channel whose PRD table is allocated from `services`.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid or the table memory cannot be
    /// allocated or is unsuitable.
    pub fn with_bus_master(
        regs: R,
        services: Arc<dyn ChannelServices>,
        config: ChannelConfig,
    ) -> Result<Self, AtaError> {
        config.validate()?;
        let mem = services.alloc_dma_buffer(config.prd_capacity * PRD_ENTRY_SIZE)?;
        let table = PrdTable::new(mem, config.prd_capacity)?;
        Self::new(regs, PciBusMaster::new(table), services, config)
    }
}

impl<R: ChannelRegisters, D: DmaEngine> AtaChannel<R, D> {
    /// Creates an idle channel.
    ///
    /// # Errors
    ///
    /// [`AtaError::InvalidArgument`] if `config` does not validate.
    pub fn new(
        regs: R,
        dma: D,
        services: Arc<dyn ChannelServices>,
        config: ChannelConfig,
    ) -> Result<Self, AtaError> {
        config.validate()?;
        Ok(Self {
            regs,
            services,
            config,
            state: SpinLock::new(ChannelState {
                queue: VecDeque::new(),
                current: None,
                phase: Phase::Idle,
                deadline_ms: None,
                selected: UnitId::Invalid,
                devices: [DeviceInfo::default(); 2],
                dma,
            }),
        })
    }

    /// The channel's registers.
    pub fn regs(&self) -> &R {
        &self.regs
    }

    /// The channel's configuration.
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Records what bus probing found at `unit`.
    ///
    /// `packet_irq` is set for ATAPI devices that raise an interrupt before
    /// accepting the command packet.
    pub fn set_device(&self, unit: UnitId, kind: DeviceType, packet_irq: bool) {
        if let Some(index) = unit.index() {
            self.state.lock().devices[usize::from(index)] = DeviceInfo { kind, packet_irq };
        }
    }

    /// Current DMA engine state.
    pub fn dma_state(&self) -> DmaState {
        self.state.lock().dma.state()
    }

    /// Returns `true` while a command owns the bus.
    pub fn is_busy(&self) -> bool {
        self.state.lock().current.is_some()
    }

    /// Number of commands waiting behind the current one.
    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Services a channel interrupt.
    ///
    /// Returns `false` if no command was active (the status register is
    /// still read to acknowledge the device).
    pub fn handle_interrupt(&self) -> bool {
        let done = {
            let mut st = self.state.lock();
            let Some(mut cmd) = st.current.take() else {
                self.regs.read_taskfile(Tf::Command);
                ktrace!("ata: interrupt with no active command");
                return false;
            };

            let dma = st.dma.handle_interrupt(&self.regs, &mut cmd);
            // Reading status acknowledges the device interrupt.
            self.regs.read_taskfile(Tf::Command);
            self.regs.io_barrier();

            let step = match self.async_io(&mut st, &mut cmd) {
                Step::Done(Ok(())) if dma == Some(DmaState::Error) => {
                    Step::Done(Err(AtaError::DmaError))
                }
                step => step,
            };

            let mut done = Vec::new();
            self.settle(&mut st, cmd, step, &mut done);
            done.extend(self.dispatch_next(&mut st));
            done
        };
        deliver(done);
        true
    }

    /// Fails the current command with [`AtaError::Timeout`] if its deadline
    /// is at or before `now_ms`. Returns `true` if a command timed out.
    pub fn check_timeout(&self, now_ms: u64) -> bool {
        let done = {
            let mut st = self.state.lock();
            match st.deadline_ms {
                Some(deadline) if now_ms >= deadline => {}
                _ => return false,
            }
            let Some(mut cmd) = st.current.take() else {
                return false;
            };

            kwarn!("ata: command {:#04x} timed out", cmd.command());
            if cmd.flags().contains(CommandFlags::USE_DMA) {
                st.dma.stop_dma(&self.regs);
            }
            // Status is recorded for diagnosis; the result stays Timeout.
            let _ = self.async_status(&mut cmd);

            let mut done = Vec::new();
            self.settle(&mut st, cmd, Step::Done(Err(AtaError::Timeout)), &mut done);
            done.extend(self.dispatch_next(&mut st));
            done
        };
        deliver(done);
        true
    }

    // -----------------------------------------------------------------------
    // Queue and dispatch
    // -----------------------------------------------------------------------

    /// Starts queued commands until one is left pending on the hardware.
    /// Returns the commands that finished along the way.
    fn dispatch_next(&self, st: &mut ChannelState<D>) -> Vec<Box<AtaCommand>> {
        let mut done = Vec::new();
        while st.current.is_none() {
            let Some(mut cmd) = st.queue.pop_front() else {
                break;
            };
            let step = match cmd.opcode() {
                AtaOpcode::ExecIo | AtaOpcode::AtapiExecIo => self.handle_exec_io(st, &mut cmd),
                AtaOpcode::RegAccess => self.handle_reg_access(st, &mut cmd),
                AtaOpcode::BusReset => self.handle_bus_reset(st, &cmd),
                AtaOpcode::QueueFlush => Step::Done(Ok(())),
                AtaOpcode::NoOp => Step::Done(Err(AtaError::UnknownOpcode)),
            };
            self.settle(st, cmd, step, &mut done);
        }
        done
    }

    fn settle(
        &self,
        st: &mut ChannelState<D>,
        mut cmd: Box<AtaCommand>,
        step: Step,
        done: &mut Vec<Box<AtaCommand>>,
    ) {
        match step {
            Step::Pending => st.current = Some(cmd),
            Step::Done(result) => {
                self.finish(st, &mut cmd, result);
                done.push(cmd);
            }
        }
    }

    fn finish(&self, st: &mut ChannelState<D>, cmd: &mut AtaCommand, result: Result<(), AtaError>) {
        st.deadline_ms = None;
        st.dma.stop_dma(&self.regs);
        st.phase = Phase::Idle;
        match result {
            Ok(()) => kdebug!(
                "ata: command {:#04x} done, {} of {} bytes",
                cmd.command(),
                cmd.actual_transfer(),
                cmd.byte_count()
            ),
            Err(err) => kwarn!(
                "ata: command {:#04x} failed: {} (status {:#04x}, error {:#04x})",
                cmd.command(),
                err,
                cmd.status(),
                cmd.error_register()
            ),
        }
        cmd.set_result(result);
        cmd.clear_in_use();
    }

    // -----------------------------------------------------------------------
    // Opcode handlers
    // -----------------------------------------------------------------------

    fn handle_exec_io(&self, st: &mut ChannelState<D>, cmd: &mut AtaCommand) -> Step {
        if let Err(err) = self.select_device(st, cmd.unit()) {
            kerr!("ata: cannot select unit {:?}: {}", cmd.unit(), err);
            return Step::Done(Err(err));
        }

        st.deadline_ms = (cmd.timeout_ms() > 0)
            .then(|| self.services.now_ms() + u64::from(cmd.timeout_ms()));
        st.phase = Phase::Started;

        if cmd.flags().contains(CommandFlags::USE_NO_IRQ) {
            self.synchronous_io(st, cmd)
        } else {
            self.async_io(st, cmd)
        }
    }

    fn handle_reg_access(&self, st: &mut ChannelState<D>, cmd: &mut AtaCommand) -> Step {
        if let Err(err) = self.select_device(st, cmd.unit()) {
            return Step::Done(Err(err));
        }
        let write = cmd.flags().contains(CommandFlags::IO_WRITE);
        self.register_access(cmd, write);
        Step::Done(Ok(()))
    }

    fn handle_bus_reset(&self, st: &mut ChannelState<D>, cmd: &AtaCommand) -> Step {
        let atapi_reset = cmd.flags().contains(CommandFlags::PROTOCOL_ATAPI);
        let targets = if atapi_reset {
            match cmd.unit().index() {
                Some(0) => [true, false],
                Some(_) => [false, true],
                None => return Step::Done(Err(AtaError::InvalidArgument)),
            }
        } else {
            [true, true]
        };

        let mut result = Ok(());
        for (index, unit) in [UnitId::Device0, UnitId::Device1].into_iter().enumerate() {
            if targets[index] && st.devices[index].kind == DeviceType::Atapi {
                self.regs.write_taskfile(Tf::DeviceHead, DEVICE_LEGACY | unit.select_bits());
                self.regs.io_barrier();
                self.regs.read_taskfile(Tf::AltStatus);
                result = self.soft_reset(st, true);
            }
        }

        if !atapi_reset {
            result = self.soft_reset(st, false);
        }
        kinfo!("ata: bus reset ({}) done: {:?}", if atapi_reset { "atapi" } else { "ata" }, result);
        Step::Done(result)
    }

    // -----------------------------------------------------------------------
    // Phase machine
    // -----------------------------------------------------------------------

    fn async_io(&self, st: &mut ChannelState<D>, cmd: &mut AtaCommand) -> Step {
        if is_packet(cmd) && st.phase != Phase::Started {
            let reason = self.regs.read_taskfile(Tf::SectorCount) & 0x03;
            st.phase = ATAPI_REASON_PHASE[usize::from(reason)];
        }

        loop {
            match st.phase {
                Phase::Started => {
                    if let Err(err) = self.async_command(st, cmd) {
                        return self.fail_with_status(cmd, err);
                    }
                    let packet_irq = cmd
                        .unit()
                        .index()
                        .is_some_and(|i| st.devices[usize::from(i)].packet_irq);
                    if st.phase != Phase::PacketCmd || packet_irq {
                        return Step::Pending;
                    }
                }
                Phase::PacketCmd => {
                    if let Err(err) = self.write_packet(st, cmd) {
                        return self.fail_with_status(cmd, err);
                    }
                    let flags = cmd.flags();
                    st.phase = if flags.intersects(CommandFlags::IO_READ | CommandFlags::IO_WRITE)
                        && !flags.contains(CommandFlags::USE_DMA)
                    {
                        Phase::DataTx
                    } else {
                        Phase::Status
                    };
                    return Step::Pending;
                }
                Phase::DataTx => {
                    if let Err(err) = self.async_data(st, cmd) {
                        return self.fail_with_status(cmd, err);
                    }
                    if st.phase == Phase::DataTx || is_pio_write(cmd.flags()) || is_packet(cmd) {
                        return Step::Pending;
                    }
                }
                Phase::Status => return Step::Done(self.async_status(cmd)),
                Phase::Idle => return Step::Done(Err(AtaError::Aborted)),
            }
        }
    }

    /// Polls a `USE_NO_IRQ` command to completion with device interrupts
    /// masked.
    fn synchronous_io(&self, st: &mut ChannelState<D>, cmd: &mut AtaCommand) -> Step {
        if cmd.flags().contains(CommandFlags::USE_DMA) {
            return Step::Done(Err(AtaError::Unsupported));
        }

        self.regs.write_taskfile(Tf::AltStatus, DeviceControl::NIEN.bits());
        let mut rounds = self.config.drq_poll_budget;
        let step = loop {
            if let Step::Done(result) = self.async_io(st, cmd) {
                break Step::Done(result);
            }
            if rounds == 0 {
                break self.fail_with_status(cmd, AtaError::Timeout);
            }
            rounds -= 1;
            if let Err(err) = self.wait_status(AtaStatus::BSY, AtaStatus::empty(), self.config.drq_poll_budget, st.deadline_ms) {
                break self.fail_with_status(cmd, err);
            }
            self.regs.read_taskfile(Tf::Command);
        };
        self.regs.write_taskfile(Tf::AltStatus, 0);
        step
    }

    fn fail_with_status(&self, cmd: &mut AtaCommand, err: AtaError) -> Step {
        let _ = self.async_status(cmd);
        Step::Done(Err(err))
    }

    /// Command phase: arms DMA if requested, then issues the task file.
    fn async_command(&self, st: &mut ChannelState<D>, cmd: &mut AtaCommand) -> Result<(), AtaError> {
        let flags = cmd.flags();
        if flags.contains(CommandFlags::USE_DMA) {
            st.dma.start_dma(&self.regs, cmd)?;
        }

        self.issue_command(cmd);

        if is_packet(cmd) {
            st.phase = Phase::PacketCmd;
            return Ok(());
        }
        if flags.contains(CommandFlags::USE_DMA) {
            st.phase = Phase::Status;
            return Ok(());
        }
        if is_pio_write(flags) {
            st.phase = Phase::DataTx;
            return self.async_data(st, cmd);
        }

        st.phase = if flags.contains(CommandFlags::IO_READ) {
            Phase::DataTx
        } else {
            Phase::Status
        };
        Ok(())
    }

    /// Writes the task file and command byte. LBA48 commands write every
    /// address register twice, high-order byte first.
    fn issue_command(&self, cmd: &AtaCommand) {
        if cmd.flags().contains(CommandFlags::LBA48) {
            let ext = cmd.ext_lba();
            self.regs.write_taskfile(Tf::DeviceHead, ext.device());
            self.regs.io_barrier();
            for (_, reg) in ADDRESS_REGS {
                let [_, hob] = ext_value(ext, reg).to_le_bytes();
                self.regs.write_taskfile(reg, hob);
            }
            self.regs.io_barrier();
            for (_, reg) in ADDRESS_REGS {
                let [low, _] = ext_value(ext, reg).to_le_bytes();
                self.regs.write_taskfile(reg, low);
            }
            self.regs.io_barrier();
            self.regs.write_taskfile(Tf::Command, ext.command());
        } else {
            let mut tf = *cmd.task_file();
            self.regs.write_taskfile(Tf::DeviceHead, tf.device_head);
            self.regs.io_barrier();
            for (_, reg) in ADDRESS_REGS {
                self.regs.write_taskfile(reg, *tf_slot(&mut tf, reg));
            }
            self.regs.io_barrier();
            self.regs.write_taskfile(Tf::Command, tf.command);
        }
        self.regs.io_barrier();
        ktrace!("ata: issued command {:#04x}", cmd.command());
    }

    /// Sends the ATAPI command packet once the device asks for it.
    fn write_packet(&self, st: &ChannelState<D>, cmd: &AtaCommand) -> Result<(), AtaError> {
        let packet = cmd.packet();
        if packet.is_empty() {
            return Ok(());
        }

        let mut budget = self.config.drq_poll_budget;
        loop {
            let status = self.alt_status();
            if status & (AtaStatus::BSY | AtaStatus::DRQ) == AtaStatus::DRQ {
                break;
            }
            if status & (AtaStatus::BSY | AtaStatus::ERR) == AtaStatus::ERR {
                return Err(AtaError::DeviceError);
            }
            if budget == 0 || self.deadline_passed(st) {
                return Err(AtaError::Timeout);
            }
            budget -= 1;
            self.services.delay_us(self.config.poll_delay_us);
        }

        let words = if packet.len() > 12 { 8 } else { 6 };
        let mut bytes = [0u8; 16];
        bytes[..packet.len()].copy_from_slice(packet);
        for pair in bytes.chunks_exact(2).take(words) {
            self.regs.write_data(u16::from_le_bytes([pair[0], pair[1]]));
        }
        Ok(())
    }

    /// PIO data phase: moves one chunk between the data register and the
    /// buffer.
    fn async_data(&self, st: &mut ChannelState<D>, cmd: &mut AtaCommand) -> Result<(), AtaError> {
        let remaining = cmd.byte_count().saturating_sub(cmd.actual_transfer());
        if remaining == 0 {
            st.phase = Phase::Status;
            return Ok(());
        }

        let mut budget = self.config.drq_poll_budget;
        loop {
            let status = self.alt_status() & (AtaStatus::BSY | AtaStatus::DRQ | AtaStatus::ERR);
            if status == AtaStatus::ERR {
                st.phase = Phase::Status;
                return Err(AtaError::DeviceError);
            }
            if status == AtaStatus::DRQ {
                break;
            }
            if budget == 0 || self.deadline_passed(st) {
                st.phase = Phase::Status;
                return Err(AtaError::Timeout);
            }
            budget -= 1;
            self.services.delay_us(self.config.poll_delay_us);
        }

        let Some(buffer) = cmd.buffer().cloned() else {
            st.phase = Phase::Status;
            return Err(AtaError::NullBuffer);
        };

        let mut this_pass = remaining.min(cmd.logical_chunk_size().max(2));
        let mut overrun = 0;
        if cmd.flags().contains(CommandFlags::PROTOCOL_ATAPI) {
            let reported = self.atapi_byte_count();
            if reported > remaining {
                overrun = reported - remaining;
                this_pass = remaining;
            } else {
                this_pass = reported;
            }
        }

        let read = cmd.flags().contains(CommandFlags::IO_READ);
        let offset = cmd.position() + cmd.actual_transfer();
        self.transfer_pio(buffer.as_ref(), offset, this_pass, read);
        cmd.set_actual_transfer(cmd.actual_transfer() + this_pass);

        if overrun > 0 {
            kwarn!("ata: device overran transfer by {} bytes", overrun);
            for _ in 0..overrun.div_ceil(2) {
                if read {
                    self.regs.read_data();
                } else {
                    self.regs.write_data(0);
                }
            }
        }

        st.phase = if remaining - this_pass > 1 {
            Phase::DataTx
        } else {
            Phase::Status
        };
        Ok(())
    }

    fn transfer_pio(&self, buffer: &dyn MemoryDescriptor, offset: usize, len: usize, read: bool) {
        let mut chunk = [0u8; 512];
        let mut moved = 0;
        while moved < len {
            let n = (len - moved).min(chunk.len());
            let words = n.div_ceil(2);
            if read {
                for w in 0..words {
                    let [lo, hi] = self.regs.read_data().to_le_bytes();
                    chunk[2 * w] = lo;
                    chunk[2 * w + 1] = hi;
                }
                buffer.write_at(offset + moved, &chunk[..n]);
            } else {
                chunk.fill(0);
                buffer.read_at(offset + moved, &mut chunk[..n]);
                for w in 0..words {
                    self.regs.write_data(u16::from_le_bytes([chunk[2 * w], chunk[2 * w + 1]]));
                }
            }
            moved += n;
        }
    }

    /// Status phase: records status/error and reads back result registers.
    fn async_status(&self, cmd: &mut AtaCommand) -> Result<(), AtaError> {
        let status = self.alt_status();
        let mut error = 0;
        let mut result = Ok(());

        if status.contains(AtaStatus::ERR) {
            error = self.regs.read_taskfile(Tf::Features);
            result = Err(AtaError::DeviceError);
            if cmd
                .flags()
                .intersects(CommandFlags::TF_ACCESS | CommandFlags::TF_ACCESS_RESULT)
            {
                self.register_access(cmd, false);
            }
        } else if cmd.flags().contains(CommandFlags::TF_ACCESS_RESULT) {
            self.register_access(cmd, false);
        }

        cmd.set_end_result(status.bits(), error);
        result
    }

    // -----------------------------------------------------------------------
    // Register helpers
    // -----------------------------------------------------------------------

    fn alt_status(&self) -> AtaStatus {
        AtaStatus::from_bits_retain(self.regs.read_taskfile(Tf::AltStatus))
    }

    fn deadline_passed(&self, st: &ChannelState<D>) -> bool {
        st.deadline_ms
            .is_some_and(|deadline| self.services.now_ms() >= deadline)
    }

    /// Polls alternate status until `status & mask == value`.
    fn wait_status(
        &self,
        mask: AtaStatus,
        value: AtaStatus,
        budget: u32,
        deadline: Option<u64>,
    ) -> Result<AtaStatus, AtaError> {
        let mut budget = budget;
        loop {
            let status = self.alt_status();
            if status & mask == value {
                return Ok(status);
            }
            if budget == 0 || deadline.is_some_and(|d| self.services.now_ms() >= d) {
                return Err(AtaError::Timeout);
            }
            budget -= 1;
            self.services.delay_us(self.config.poll_delay_us);
        }
    }

    fn select_device(&self, st: &mut ChannelState<D>, unit: UnitId) -> Result<(), AtaError> {
        if unit.index().is_none() {
            return Err(AtaError::InvalidArgument);
        }
        let budget = self.config.select_poll_budget;

        if st.selected != unit {
            self.wait_status(AtaStatus::BSY | AtaStatus::DRQ, AtaStatus::empty(), budget, None)
                .map_err(|_| AtaError::DeviceBusy)?;
            st.selected = UnitId::Invalid;
            self.regs.write_taskfile(Tf::DeviceHead, unit.select_bits());
            self.regs.io_barrier();
        }

        self.wait_status(AtaStatus::BSY, AtaStatus::empty(), budget, None)
            .map_err(|_| AtaError::DeviceBusy)?;

        self.regs.write_taskfile(Tf::AltStatus, 0);
        self.regs.io_barrier();
        st.selected = unit;
        Ok(())
    }

    fn soft_reset(&self, st: &mut ChannelState<D>, atapi: bool) -> Result<(), AtaError> {
        if atapi {
            self.regs.write_taskfile(Tf::Command, CMD_DEVICE_RESET);
            self.regs.io_barrier();
        } else {
            self.regs.write_taskfile(Tf::AltStatus, DeviceControl::SRST.bits());
            self.regs.io_barrier();
            self.services.delay_us(self.config.reset_hold_us);
            self.regs.write_taskfile(Tf::AltStatus, 0);
            self.regs.io_barrier();
            st.selected = UnitId::Invalid;
        }

        self.services.delay_us(self.config.reset_settle_ms.saturating_mul(1000));

        let (mask, ready) = if !atapi && st.devices[0].kind == DeviceType::Ata {
            (AtaStatus::BSY | AtaStatus::DRDY, AtaStatus::DRDY)
        } else {
            (AtaStatus::BSY, AtaStatus::empty())
        };

        for _ in 0..(self.config.reset_timeout_ms / 10).max(1) {
            let status = AtaStatus::from_bits_retain(self.regs.read_taskfile(Tf::Command));
            if status & mask == ready {
                return Ok(());
            }
            self.services.delay_us(10_000);
        }
        kerr!("ata: devices still busy after reset");
        Err(AtaError::Timeout)
    }

    fn atapi_byte_count(&self) -> usize {
        let hi = self.regs.read_taskfile(Tf::CylinderHigh);
        let lo = self.regs.read_taskfile(Tf::CylinderLow);
        usize::from(u16::from_le_bytes([lo, hi]))
    }

    fn read_ext(&self, reg: Tf) -> u16 {
        let lo = self.regs.read_taskfile(reg);
        self.regs.write_taskfile(Tf::AltStatus, DeviceControl::HOB.bits());
        self.regs.io_barrier();
        let hi = self.regs.read_taskfile(reg);
        self.regs.write_taskfile(Tf::AltStatus, 0);
        self.regs.io_barrier();
        u16::from_le_bytes([lo, hi])
    }

    fn write_ext(&self, reg: Tf, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.regs.write_taskfile(reg, hi);
        self.regs.io_barrier();
        self.regs.write_taskfile(reg, lo);
        self.regs.io_barrier();
    }

    /// Reads or writes the registers selected by the command's mask.
    fn register_access(&self, cmd: &mut AtaCommand, write: bool) {
        let mask = cmd.register_mask();
        let ext = cmd.flags().contains(CommandFlags::LBA48);

        for (bit, reg) in ADDRESS_REGS {
            if !mask.contains(bit) {
                continue;
            }
            match (write, ext) {
                (true, true) => self.write_ext(reg, ext_value(cmd.ext_lba(), reg)),
                (true, false) => {
                    let mut tf = *cmd.task_file();
                    self.regs.write_taskfile(reg, *tf_slot(&mut tf, reg));
                }
                (false, true) => {
                    let value = self.read_ext(reg);
                    set_ext_value(cmd.ext_lba_mut(), reg, value);
                }
                (false, false) => {
                    let value = self.regs.read_taskfile(reg);
                    *tf_slot(cmd.task_file_mut(), reg) = value;
                }
            }
        }

        if mask.contains(RegisterMask::DEVICE_HEAD) {
            if write {
                let value = if ext { cmd.ext_lba().device() } else { cmd.device_head() };
                self.regs.write_taskfile(Tf::DeviceHead, value);
            } else {
                let value = self.regs.read_taskfile(Tf::DeviceHead);
                cmd.set_device_head(value);
                if ext {
                    cmd.ext_lba_mut().set_device(value);
                }
            }
        }
        if mask.contains(RegisterMask::ALT_STATUS) {
            if write {
                self.regs.write_taskfile(Tf::AltStatus, cmd.device_control());
            } else {
                let value = self.regs.read_taskfile(Tf::AltStatus);
                cmd.set_device_control(value);
            }
        }
        if mask.contains(RegisterMask::DATA) {
            if write {
                self.regs.write_data(cmd.data_register());
            } else {
                let value = self.regs.read_data();
                cmd.set_data_register(value);
            }
        }
        if mask.contains(RegisterMask::COMMAND) {
            if write {
                self.regs.write_taskfile(Tf::Command, cmd.command());
            } else {
                let value = self.regs.read_taskfile(Tf::Command);
                cmd.set_command(value);
            }
        }
        self.regs.io_barrier();
    }
}

impl<R: ChannelRegisters, D: DmaEngine> AtaBus for AtaChannel<R, D> {
    fn execute_command(&self, mut cmd: Box<AtaCommand>) -> Result<(), Rejected> {
        if let Err(error) = cmd.mark_in_use() {
            return Err(Rejected { error, command: cmd });
        }
        let done = {
            let mut st = self.state.lock();
            if cmd.flags().contains(CommandFlags::IMMEDIATE) {
                st.queue.push_front(cmd);
            } else {
                st.queue.push_back(cmd);
            }
            self.dispatch_next(&mut st)
        };
        deliver(done);
        Ok(())
    }

    fn alloc_dma_buffer(&self, len: usize) -> Result<Arc<dyn MemoryDescriptor>, AtaError> {
        self.services.alloc_dma_buffer(len)
    }

    fn device_type(&self, unit: UnitId) -> DeviceType {
        unit.index()
            .map_or(DeviceType::None, |i| self.state.lock().devices[usize::from(i)].kind)
    }
}
