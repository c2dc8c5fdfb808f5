//! Bus-master DMA engine backends.
//!
//! [`PciBusMaster`] programs the SFF-8038i bus-master registers of one
//! channel from a [`PrdTable`]. [`PioOnly`] is the backend for channels
//! without a usable bus master; it refuses every DMA request.

use ata_core::{kdebug, kwarn};
use ata_driver_api::regs::{BmCommand, BmStatus, BusMasterRegister};
use ata_driver_api::{AtaCommand, AtaError, ChannelRegisters, DmaEngine, DmaState, IoDirection};

use crate::prd::{PrdTable, build_chain};

/// Bus-master engine for one channel.
pub struct PciBusMaster {
    table: PrdTable,
    state: DmaState,
}

impl PciBusMaster {
    /// Creates an inactive engine over `table`.
    #[must_use]
    pub const fn new(table: PrdTable) -> Self {
        Self {
            table,
            state: DmaState::Inactive,
        }
    }

    /// The descriptor table.
    #[must_use]
    pub const fn table(&self) -> &PrdTable {
        &self.table
    }

    /// Builds the descriptor program for `cmd`.
    ///
    /// Leaves the engine in [`DmaState::Status`] on success and
    /// [`DmaState::Error`] on failure. No register is touched.
    ///
    /// # Errors
    ///
    /// Whatever [`build_chain`] reports.
    pub fn build_program(&mut self, cmd: &AtaCommand) -> Result<usize, AtaError> {
        match build_chain(&self.table, cmd) {
            Ok(entries) => {
                self.state = DmaState::Status;
                Ok(entries)
            }
            Err(err) => {
                kwarn!("ata-dma: cannot build PRD program: {}", err);
                self.state = DmaState::Error;
                Err(err)
            }
        }
    }

    /// Clears the write-1-to-clear status bits, keeping the drive-capable bits.
    fn clear_status(regs: &dyn ChannelRegisters) {
        let status = BmStatus::from_bits_retain(regs.read_bus_master(BusMasterRegister::Status));
        let keep = status & (BmStatus::DRIVE0_DMA | BmStatus::DRIVE1_DMA);
        regs.write_bus_master(
            BusMasterRegister::Status,
            (keep | BmStatus::ERROR | BmStatus::INTERRUPT).bits(),
        );
    }
}

impl DmaEngine for PciBusMaster {
    fn start_dma(
        &mut self,
        regs: &dyn ChannelRegisters,
        cmd: &mut AtaCommand,
    ) -> Result<(), AtaError> {
        self.stop_dma(regs);
        self.state = DmaState::Starting;

        if let Err(err) = self.build_program(cmd) {
            self.stop_dma(regs);
            return Err(err);
        }

        let start = match cmd.direction() {
            Some(IoDirection::In) => BmCommand::START | BmCommand::READ,
            _ => BmCommand::START,
        };

        Self::clear_status(regs);
        regs.write_prd_address(self.table.phys_base());
        regs.io_barrier();
        regs.write_bus_master(BusMasterRegister::Command, start.bits());
        regs.io_barrier();

        kdebug!(
            "ata-dma: started {:?} at PRD {:#x}",
            start,
            self.table.phys_base()
        );
        Ok(())
    }

    fn stop_dma(&mut self, regs: &dyn ChannelRegisters) {
        if self.state != DmaState::Inactive {
            Self::clear_status(regs);
            regs.write_bus_master(BusMasterRegister::Command, BmCommand::empty().bits());
            regs.io_barrier();
        }
        self.state = DmaState::Inactive;
    }

    fn handle_interrupt(
        &mut self,
        regs: &dyn ChannelRegisters,
        cmd: &mut AtaCommand,
    ) -> Option<DmaState> {
        if self.state != DmaState::Status {
            return None;
        }

        let status = BmStatus::from_bits_retain(regs.read_bus_master(BusMasterRegister::Status));
        if status.contains(BmStatus::ERROR) {
            kwarn!("ata-dma: engine error, status {:?}", status);
            self.state = DmaState::Error;
        } else {
            cmd.set_actual_transfer(cmd.byte_count());
            self.state = DmaState::Complete;
        }

        let outcome = self.state;
        self.stop_dma(regs);
        Some(outcome)
    }

    fn state(&self) -> DmaState {
        self.state
    }
}

/// Backend for channels that only do PIO.
#[derive(Debug, Default)]
pub struct PioOnly;

impl DmaEngine for PioOnly {
    fn start_dma(
        &mut self,
        _regs: &dyn ChannelRegisters,
        _cmd: &mut AtaCommand,
    ) -> Result<(), AtaError> {
        Err(AtaError::Unsupported)
    }

    fn stop_dma(&mut self, _regs: &dyn ChannelRegisters) {}

    fn handle_interrupt(
        &mut self,
        _regs: &dyn ChannelRegisters,
        _cmd: &mut AtaCommand,
    ) -> Option<DmaState> {
        None
    }

    fn state(&self) -> DmaState {
        DmaState::Inactive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{RegWrite, SimRegisters};
    use alloc::sync::Arc;
    use alloc::vec;
    use ata_driver_api::regs::TaskFileRegister;
    use ata_driver_api::{CommandFlags, HostBuffer, PhysSegment};

    fn engine(capacity: usize) -> PciBusMaster {
        let mem = Arc::new(HostBuffer::contiguous(capacity * 8, 0x8000));
        PciBusMaster::new(PrdTable::new(mem, capacity).unwrap())
    }

    fn read_command(len: usize) -> AtaCommand {
        let mut cmd = AtaCommand::new();
        cmd.set_flags(CommandFlags::IO_READ | CommandFlags::USE_DMA);
        cmd.set_buffer(Some(Arc::new(HostBuffer::contiguous(len, 0x20_0000))));
        cmd.set_byte_count(len);
        cmd
    }

    fn bm_writes(regs: &SimRegisters) -> Vec<RegWrite> {
        regs.writes()
            .into_iter()
            .filter(|w| !matches!(w, RegWrite::TaskFile(..) | RegWrite::Data(_)))
            .collect()
    }

    #[test]
    fn start_programs_address_then_command() {
        let regs = SimRegisters::new();
        regs.set_bm_status(BmStatus::DRIVE0_DMA.bits());
        let mut dma = engine(8);
        let mut cmd = read_command(4096);

        assert_eq!(dma.start_dma(&regs, &mut cmd), Ok(()));
        assert_eq!(dma.state(), DmaState::Status);
        assert_eq!(
            bm_writes(&regs),
            vec![
                RegWrite::BusMaster(BusMasterRegister::Status, 0x26),
                RegWrite::PrdAddress(0x8000),
                RegWrite::BusMaster(BusMasterRegister::Command, 0x09),
            ]
        );
    }

    #[test]
    fn write_direction_uses_plain_start() {
        let regs = SimRegisters::new();
        let mut dma = engine(8);
        let mut cmd = read_command(512);
        cmd.set_flags(CommandFlags::IO_WRITE | CommandFlags::USE_DMA);
        dma.start_dma(&regs, &mut cmd).unwrap();
        assert_eq!(
            bm_writes(&regs).last(),
            Some(&RegWrite::BusMaster(BusMasterRegister::Command, 0x01))
        );
    }

    #[test]
    fn build_failure_stops_without_arming() {
        let regs = SimRegisters::new();
        let mut dma = engine(1);
        let mut cmd = AtaCommand::new();
        cmd.set_flags(CommandFlags::IO_READ);
        cmd.set_buffer(Some(Arc::new(HostBuffer::scattered(vec![
            PhysSegment::new(0x1000, 512),
            PhysSegment::new(0x5000, 512),
        ]))));
        cmd.set_byte_count(1024);

        assert_eq!(dma.start_dma(&regs, &mut cmd), Err(AtaError::PrdTableExhausted));
        assert_eq!(dma.state(), DmaState::Inactive);
        let writes = bm_writes(&regs);
        assert!(!writes.iter().any(|w| matches!(w, RegWrite::PrdAddress(_))));
        assert!(!writes.contains(&RegWrite::BusMaster(BusMasterRegister::Command, 0x09)));
    }

    #[test]
    fn exhaustion_leaves_error_state() {
        let mut dma = engine(1);
        let mut cmd = read_command(0x2000);
        cmd.set_buffer(Some(Arc::new(HostBuffer::contiguous(0x2000, 0x1_F000))));
        assert_eq!(dma.build_program(&cmd), Err(AtaError::PrdTableExhausted));
        assert_eq!(dma.state(), DmaState::Error);
    }

    #[test]
    fn interrupt_completes_transfer() {
        let regs = SimRegisters::new();
        let mut dma = engine(8);
        let mut cmd = read_command(512);
        dma.start_dma(&regs, &mut cmd).unwrap();

        regs.set_bm_status(BmStatus::INTERRUPT.bits());
        assert_eq!(dma.handle_interrupt(&regs, &mut cmd), Some(DmaState::Complete));
        assert_eq!(cmd.actual_transfer(), 512);
        assert_eq!(dma.state(), DmaState::Inactive);
        assert_eq!(
            bm_writes(&regs).last(),
            Some(&RegWrite::BusMaster(BusMasterRegister::Command, 0x00))
        );
    }

    #[test]
    fn interrupt_reports_engine_error() {
        let regs = SimRegisters::new();
        let mut dma = engine(8);
        let mut cmd = read_command(512);
        dma.start_dma(&regs, &mut cmd).unwrap();

        regs.set_bm_status((BmStatus::INTERRUPT | BmStatus::ERROR).bits());
        assert_eq!(dma.handle_interrupt(&regs, &mut cmd), Some(DmaState::Error));
        assert_eq!(cmd.actual_transfer(), 0);
        assert_eq!(dma.state(), DmaState::Inactive);
    }

    #[test]
    fn interrupt_ignored_when_not_armed() {
        let regs = SimRegisters::new();
        let mut dma = engine(8);
        let mut cmd = read_command(512);
        assert_eq!(dma.handle_interrupt(&regs, &mut cmd), None);
        assert!(regs.writes().is_empty());
    }

    #[test]
    fn stop_is_idempotent() {
        let regs = SimRegisters::new();
        let mut dma = engine(8);
        dma.stop_dma(&regs);
        dma.stop_dma(&regs);
        assert!(regs.writes().is_empty());
        assert_eq!(dma.state(), DmaState::Inactive);
    }

    #[test]
    fn pio_only_refuses_dma() {
        let regs = SimRegisters::new();
        let mut dma = PioOnly;
        let mut cmd = read_command(512);
        assert_eq!(dma.start_dma(&regs, &mut cmd), Err(AtaError::Unsupported));
        assert_eq!(dma.handle_interrupt(&regs, &mut cmd), None);
        assert_eq!(regs.read_taskfile(TaskFileRegister::AltStatus), 0);
    }
}
