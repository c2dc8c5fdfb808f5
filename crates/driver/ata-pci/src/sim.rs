//! Simulated channel hardware for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::vec::Vec;

use alloc::sync::Arc;

use ata_driver_api::regs::{AtaStatus, BmCommand, BmStatus, BusMasterRegister, TaskFileRegister};
use ata_driver_api::{AtaError, ChannelRegisters, HostBuffer, MemoryDescriptor};

use crate::channel::{AtaChannel, ChannelServices};
use crate::config::ChannelConfig;
use crate::dma::PioOnly;

pub type SimChannel = AtaChannel<SimRegisters, PioOnly>;

/// A PIO-only channel over fresh simulated hardware.
pub fn sim_channel() -> (Arc<SimChannel>, Arc<SimServices>) {
    let services = Arc::new(SimServices::new());
    let channel = AtaChannel::new(
        SimRegisters::new(),
        PioOnly,
        Arc::clone(&services) as Arc<dyn ChannelServices>,
        ChannelConfig::default(),
    )
    .unwrap();
    (Arc::new(channel), services)
}

/// Delivers `count` interrupts, each once a command is pending on the bus.
pub fn spawn_interrupts<R, D>(channel: Arc<AtaChannel<R, D>>, count: usize) -> JoinHandle<()>
where
    R: ChannelRegisters + 'static,
    D: ata_driver_api::DmaEngine + 'static,
{
    thread::spawn(move || {
        for _ in 0..count {
            while !channel.is_busy() {
                thread::yield_now();
            }
            channel.handle_interrupt();
        }
    })
}

/// One register write, in the order the driver issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegWrite {
    TaskFile(TaskFileRegister, u8),
    Data(u16),
    BusMaster(BusMasterRegister, u8),
    PrdAddress(u32),
}

/// How the device answers a command byte.
#[derive(Debug, Clone, Default)]
pub struct Reaction {
    /// Status right after the command is written.
    pub status: u8,
    /// Words the device hands to the host.
    pub data: Vec<u16>,
    /// Words the device accepts from the host.
    pub accept: usize,
    /// Status once all data has moved.
    pub final_status: u8,
}

const TF_COUNT: usize = 8;

fn slot(reg: TaskFileRegister) -> usize {
    match reg {
        TaskFileRegister::Features => 0,
        TaskFileRegister::SectorCount => 1,
        TaskFileRegister::SectorNumber => 2,
        TaskFileRegister::CylinderLow => 3,
        TaskFileRegister::CylinderHigh => 4,
        TaskFileRegister::DeviceHead => 5,
        TaskFileRegister::Command => 6,
        TaskFileRegister::AltStatus => 7,
    }
}

#[derive(Default)]
struct SimState {
    regs: [u8; TF_COUNT],
    hob: [u8; TF_COUNT],
    read_overrides: [Option<u8>; TF_COUNT],
    device_control: u8,
    status: u8,
    busy_reads: u32,
    data_in: VecDeque<u16>,
    accept: usize,
    final_status: u8,
    data_out: Vec<u16>,
    reactions: HashMap<u8, Reaction>,
    bm_status: u8,
    bm_command: u8,
    writes: Vec<RegWrite>,
}

impl SimState {
    fn status_read(&mut self) -> u8 {
        if self.busy_reads > 0 {
            self.busy_reads -= 1;
            return AtaStatus::BSY.bits();
        }
        self.status
    }
}

/// Register file with a scripted device behind it.
#[derive(Default)]
pub struct SimRegisters {
    state: Mutex<SimState>,
}

impl SimRegisters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, status: u8) {
        self.state.lock().unwrap().status = status;
    }

    /// Status reads return BSY this many times before the real status.
    pub fn set_busy_reads(&self, reads: u32) {
        self.state.lock().unwrap().busy_reads = reads;
    }

    /// Makes reads of `reg` return `value` regardless of what was written.
    pub fn set_read(&self, reg: TaskFileRegister, value: u8) {
        self.state.lock().unwrap().read_overrides[slot(reg)] = Some(value);
    }

    pub fn clear_read(&self, reg: TaskFileRegister) {
        self.state.lock().unwrap().read_overrides[slot(reg)] = None;
    }

    pub fn on_command(&self, opcode: u8, reaction: Reaction) {
        self.state.lock().unwrap().reactions.insert(opcode, reaction);
    }

    /// Queues words for the host to read with the device showing DRQ.
    pub fn feed_data(&self, words: &[u16], final_status: u8) {
        let mut st = self.state.lock().unwrap();
        st.data_in.extend(words.iter().copied());
        st.final_status = final_status;
        st.status = (AtaStatus::DRQ | AtaStatus::DRDY).bits();
    }

    pub fn set_bm_status(&self, status: u8) {
        self.state.lock().unwrap().bm_status = status;
    }

    pub fn bm_command(&self) -> u8 {
        self.state.lock().unwrap().bm_command
    }

    pub fn writes(&self) -> Vec<RegWrite> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state.lock().unwrap().writes.clear();
    }

    /// Task-file writes only, without data and bus-master traffic.
    pub fn taskfile_writes(&self) -> Vec<(TaskFileRegister, u8)> {
        self.writes()
            .into_iter()
            .filter_map(|w| match w {
                RegWrite::TaskFile(reg, value) => Some((reg, value)),
                _ => None,
            })
            .collect()
    }

    pub fn data_out(&self) -> Vec<u16> {
        self.state.lock().unwrap().data_out.clone()
    }

    pub fn data_remaining(&self) -> usize {
        self.state.lock().unwrap().data_in.len()
    }
}

impl ChannelRegisters for SimRegisters {
    fn read_taskfile(&self, reg: TaskFileRegister) -> u8 {
        let mut st = self.state.lock().unwrap();
        match reg {
            TaskFileRegister::Command | TaskFileRegister::AltStatus => st.status_read(),
            _ => {
                let i = slot(reg);
                if st.device_control & 0x80 != 0 {
                    st.hob[i]
                } else {
                    st.read_overrides[i].unwrap_or(st.regs[i])
                }
            }
        }
    }

    fn write_taskfile(&self, reg: TaskFileRegister, value: u8) {
        let mut st = self.state.lock().unwrap();
        st.writes.push(RegWrite::TaskFile(reg, value));
        match reg {
            TaskFileRegister::AltStatus => st.device_control = value,
            TaskFileRegister::Command => {
                st.regs[slot(reg)] = value;
                if let Some(reaction) = st.reactions.get(&value).cloned() {
                    st.status = reaction.status;
                    st.data_in.extend(reaction.data);
                    st.accept = reaction.accept;
                    st.final_status = reaction.final_status;
                }
            }
            _ => {
                let i = slot(reg);
                st.hob[i] = st.regs[i];
                st.regs[i] = value;
            }
        }
    }

    fn read_data(&self) -> u16 {
        let mut st = self.state.lock().unwrap();
        let Some(word) = st.data_in.pop_front() else {
            return 0;
        };
        if st.data_in.is_empty() {
            st.status = st.final_status;
        }
        word
    }

    fn write_data(&self, value: u16) {
        let mut st = self.state.lock().unwrap();
        st.writes.push(RegWrite::Data(value));
        st.data_out.push(value);
        if st.accept > 0 {
            st.accept -= 1;
            if st.accept == 0 {
                st.status = st.final_status;
            }
        }
    }

    fn read_bus_master(&self, reg: BusMasterRegister) -> u8 {
        let st = self.state.lock().unwrap();
        match reg {
            BusMasterRegister::Command => st.bm_command,
            BusMasterRegister::Status => st.bm_status,
        }
    }

    fn write_bus_master(&self, reg: BusMasterRegister, value: u8) {
        let mut st = self.state.lock().unwrap();
        st.writes.push(RegWrite::BusMaster(reg, value));
        match reg {
            BusMasterRegister::Command => {
                st.bm_command = value;
                let active = BmStatus::ACTIVE.bits();
                if value & BmCommand::START.bits() != 0 {
                    st.bm_status |= active;
                } else {
                    st.bm_status &= !active;
                }
            }
            BusMasterRegister::Status => {
                let w1c = value & (BmStatus::ERROR | BmStatus::INTERRUPT).bits();
                let drives = (BmStatus::DRIVE0_DMA | BmStatus::DRIVE1_DMA).bits();
                st.bm_status = (st.bm_status & !w1c & !drives) | (value & drives);
            }
        }
    }

    fn write_prd_address(&self, addr: u32) {
        self.state.lock().unwrap().writes.push(RegWrite::PrdAddress(addr));
    }
}

/// Clock and DMA memory for a simulated channel.
///
/// Delays advance the clock, so bounded polls also run out the deadline.
pub struct SimServices {
    clock_us: AtomicU64,
    next_phys: AtomicU64,
}

impl SimServices {
    pub fn new() -> Self {
        Self {
            clock_us: AtomicU64::new(0),
            next_phys: AtomicU64::new(0x10_0000),
        }
    }

    pub fn advance_ms(&self, ms: u64) {
        self.clock_us.fetch_add(ms * 1000, Ordering::Relaxed);
    }
}

impl ChannelServices for SimServices {
    fn now_ms(&self) -> u64 {
        self.clock_us.load(Ordering::Relaxed) / 1000
    }

    fn delay_us(&self, us: u32) {
        self.clock_us.fetch_add(u64::from(us), Ordering::Relaxed);
    }

    fn alloc_dma_buffer(&self, len: usize) -> Result<Arc<dyn MemoryDescriptor>, AtaError> {
        // 64 KiB aligned so no allocation straddles a PRD boundary.
        let span = (len.max(1) as u64).div_ceil(0x1_0000) * 0x1_0000;
        let phys = self.next_phys.fetch_add(span, Ordering::Relaxed);
        Ok(Arc::new(HostBuffer::contiguous(len, phys)))
    }
}

/// Builds a 256-word IDENTIFY response.
pub struct IdentifyBuilder {
    words: [u16; 256],
}

impl IdentifyBuilder {
    pub fn new() -> Self {
        Self { words: [0; 256] }
    }

    pub fn word(mut self, index: usize, value: u16) -> Self {
        self.words[index] = value;
        self
    }

    /// Stores `text` space-padded over `len` words, first character in the
    /// high byte of each word.
    pub fn string(mut self, start: usize, len: usize, text: &str) -> Self {
        let mut bytes = std::vec![b' '; len * 2];
        let n = text.len().min(bytes.len());
        bytes[..n].copy_from_slice(&text.as_bytes()[..n]);
        for (i, pair) in bytes.chunks_exact(2).enumerate() {
            self.words[start + i] = u16::from_be_bytes([pair[0], pair[1]]);
        }
        self
    }

    pub fn to_words(&self) -> Vec<u16> {
        self.words.to_vec()
    }

    /// The block as it lands in host memory, before string swapping.
    pub fn to_bytes(&self) -> [u8; 512] {
        let mut out = [0u8; 512];
        for (i, w) in self.words.iter().enumerate() {
            out[2 * i..2 * i + 2].copy_from_slice(&w.to_le_bytes());
        }
        out
    }
}
