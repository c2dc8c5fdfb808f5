//! Physical Region Descriptor table and chain builder.
//!
//! A PRD table is an array of 8-byte little-endian entries in DMA memory:
//! bytes 0..4 hold the physical address, 4..6 the byte count (0 = 64 KiB)
//! and 6..8 the flags. The bus-master engine walks the table until it
//! reaches an entry with [`PrdFlags::END_OF_TABLE`]. No entry may cross a
//! 64 KiB physical boundary.

use alloc::sync::Arc;
use alloc::vec::Vec;

use ata_core::ktrace;
use ata_driver_api::regs::PrdFlags;
use ata_driver_api::{AtaCommand, AtaError, MemoryDescriptor};

/// Largest PRD table the channel supports.
pub const MAX_PRD_ENTRIES: usize = 64;

/// Size of one PRD entry in bytes.
pub const PRD_ENTRY_SIZE: usize = 8;

/// Physical boundary no single entry may cross.
pub const PRD_BOUNDARY: u64 = 0x1_0000;

/// Largest physical run the builder takes from a buffer in one step.
pub const MAX_SEGMENT: usize = 0x1_0000;

const BOUNDARY_MASK: u64 = PRD_BOUNDARY - 1;

/// One decoded PRD entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrdEntry {
    /// Physical buffer address.
    pub addr: u32,
    /// Raw byte count; zero encodes 64 KiB.
    pub byte_count: u16,
    /// Entry flags.
    pub flags: PrdFlags,
}

impl PrdEntry {
    /// The filler entry every slot holds before a program is built.
    pub const STOP: Self = Self {
        addr: 0,
        byte_count: 1,
        flags: PrdFlags::END_OF_TABLE,
    };

    /// Creates an entry for `len` bytes (1..=64 KiB) at `addr`.
    #[must_use]
    pub const fn new(addr: u32, len: usize, flags: PrdFlags) -> Self {
        #[allow(clippy::cast_possible_truncation, reason = "64 KiB wraps to the 0 encoding")]
        let byte_count = len as u16;
        Self {
            addr,
            byte_count,
            flags,
        }
    }

    /// Number of bytes the entry covers.
    #[must_use]
    pub const fn len(&self) -> usize {
        if self.byte_count == 0 {
            MAX_SEGMENT
        } else {
            self.byte_count as usize
        }
    }

    /// Returns `true` if this entry terminates the table.
    #[must_use]
    pub const fn is_last(&self) -> bool {
        self.flags.contains(PrdFlags::END_OF_TABLE)
    }

    /// Encodes the entry in its little-endian wire format.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; PRD_ENTRY_SIZE] {
        let mut out = [0u8; PRD_ENTRY_SIZE];
        out[0..4].copy_from_slice(&self.addr.to_le_bytes());
        out[4..6].copy_from_slice(&self.byte_count.to_le_bytes());
        out[6..8].copy_from_slice(&self.flags.bits().to_le_bytes());
        out
    }

    /// Decodes an entry from its wire format.
    #[must_use]
    pub fn from_bytes(raw: [u8; PRD_ENTRY_SIZE]) -> Self {
        Self {
            addr: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            byte_count: u16::from_le_bytes([raw[4], raw[5]]),
            flags: PrdFlags::from_bits_retain(u16::from_le_bytes([raw[6], raw[7]])),
        }
    }
}

/// A PRD table living in DMA memory.
pub struct PrdTable {
    mem: Arc<dyn MemoryDescriptor>,
    phys_base: u32,
    capacity: usize,
}

impl PrdTable {
    /// Wraps `mem` as a table of `capacity` entries.
    ///
    /// # Errors
    ///
    /// [`AtaError::InvalidArgument`] if `capacity` is outside 1..=64, or the
    /// memory is too small, not physically contiguous, above 4 GiB, not
    /// dword aligned, or crosses a 64 KiB boundary.
    pub fn new(mem: Arc<dyn MemoryDescriptor>, capacity: usize) -> Result<Self, AtaError> {
        if capacity == 0 || capacity > MAX_PRD_ENTRIES {
            return Err(AtaError::InvalidArgument);
        }
        let bytes = capacity * PRD_ENTRY_SIZE;
        let seg = mem.physical_segment(0).ok_or(AtaError::InvalidArgument)?;
        if seg.len < bytes || seg.addr & 0x3 != 0 || (seg.addr & BOUNDARY_MASK) + bytes as u64 > PRD_BOUNDARY {
            return Err(AtaError::InvalidArgument);
        }
        let phys_base = u32::try_from(seg.addr).map_err(|_| AtaError::InvalidArgument)?;
        let table = Self {
            mem,
            phys_base,
            capacity,
        };
        table.init_chains();
        Ok(table)
    }

    /// Physical address programmed into the bus-master PRD register.
    #[must_use]
    pub const fn phys_base(&self) -> u32 {
        self.phys_base
    }

    /// Number of entries.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Resets every slot to [`PrdEntry::STOP`].
    pub fn init_chains(&self) {
        let stop = PrdEntry::STOP.to_bytes();
        for index in 0..self.capacity {
            self.mem.write_at(index * PRD_ENTRY_SIZE, &stop);
        }
    }

    /// Writes `entry` into slot `index`.
    ///
    /// # Errors
    ///
    /// [`AtaError::PrdTableExhausted`] if `index` is past the last slot.
    pub fn set_entry(&self, index: usize, entry: PrdEntry) -> Result<(), AtaError> {
        if index >= self.capacity {
            return Err(AtaError::PrdTableExhausted);
        }
        self.mem.write_at(index * PRD_ENTRY_SIZE, &entry.to_bytes());
        Ok(())
    }

    /// Reads slot `index` back.
    #[must_use]
    pub fn entry(&self, index: usize) -> Option<PrdEntry> {
        if index >= self.capacity {
            return None;
        }
        let mut raw = [0u8; PRD_ENTRY_SIZE];
        self.mem.read_at(index * PRD_ENTRY_SIZE, &mut raw);
        Some(PrdEntry::from_bytes(raw))
    }

    /// Returns the entries the engine would walk, up to and including the
    /// first end-of-table entry.
    #[must_use]
    pub fn program(&self) -> Vec<PrdEntry> {
        let mut out = Vec::new();
        for entry in (0..self.capacity).filter_map(|i| self.entry(i)) {
            out.push(entry);
            if entry.is_last() {
                break;
            }
        }
        out
    }
}

/// Fills `table` with the descriptor chain for `cmd`'s transfer.
///
/// Walks the buffer's physical runs from `position` for `byte_count` bytes,
/// splitting every run at 64 KiB boundaries. Only the entry that finishes the
/// whole transfer carries the end-of-table flag. Returns the number of
/// entries written.
///
/// # Errors
///
/// - [`AtaError::NullBuffer`] if the command has no buffer.
/// - [`AtaError::InvalidArgument`] for an empty transfer or one that runs
///   past the end of the buffer.
/// - [`AtaError::PrdTableExhausted`] if the table has too few slots.
pub fn build_chain(table: &PrdTable, cmd: &AtaCommand) -> Result<usize, AtaError> {
    let buffer = cmd.buffer().ok_or(AtaError::NullBuffer)?;
    if cmd.byte_count() == 0 {
        return Err(AtaError::InvalidArgument);
    }

    table.init_chains();

    let mut remaining = cmd.byte_count();
    let mut offset = cmd.position();
    let mut index = 0;

    while remaining > 0 {
        let seg = buffer
            .physical_segment(offset)
            .ok_or(AtaError::InvalidArgument)?;
        let mut len = seg.len.min(remaining);
        if len == 0 {
            return Err(AtaError::InvalidArgument);
        }
        remaining -= len;
        offset += len;

        let mut addr = seg.addr;
        loop {
            let boundary = (addr & !BOUNDARY_MASK) + PRD_BOUNDARY;
            #[allow(clippy::cast_possible_truncation, reason = "PRD addresses are 32-bit")]
            let prd_addr = addr as u32;

            if addr + len as u64 > boundary {
                #[allow(clippy::cast_possible_truncation, reason = "bounded by PRD_BOUNDARY")]
                let piece = (boundary - addr) as usize;
                table.set_entry(index, PrdEntry::new(prd_addr, piece, PrdFlags::empty()))?;
                index += 1;
                addr = boundary;
                len -= piece;
            } else {
                let flags = if remaining == 0 {
                    PrdFlags::END_OF_TABLE
                } else {
                    PrdFlags::empty()
                };
                table.set_entry(index, PrdEntry::new(prd_addr, len, flags))?;
                index += 1;
                break;
            }
        }
    }

    ktrace!("prd: {} entries for {} bytes", index, cmd.byte_count());
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use ata_driver_api::{HostBuffer, PhysSegment};
    use proptest::prelude::*;

    fn table(capacity: usize) -> PrdTable {
        PrdTable::new(Arc::new(HostBuffer::contiguous(capacity * 8, 0x8000)), capacity).unwrap()
    }

    fn command(buffer: HostBuffer, position: usize, count: usize) -> AtaCommand {
        let mut cmd = AtaCommand::new();
        cmd.set_buffer(Some(Arc::new(buffer)));
        cmd.set_position(position);
        cmd.set_byte_count(count);
        cmd
    }

    #[test]
    fn entry_wire_format() {
        let entry = PrdEntry::new(0x1234_5678, 0x200, PrdFlags::END_OF_TABLE);
        assert_eq!(
            entry.to_bytes(),
            [0x78, 0x56, 0x34, 0x12, 0x00, 0x02, 0x00, 0x80]
        );
        assert_eq!(PrdEntry::from_bytes(entry.to_bytes()), entry);
    }

    #[test]
    fn full_64k_piece_encodes_as_zero() {
        let entry = PrdEntry::new(0x2_0000, 0x1_0000, PrdFlags::empty());
        assert_eq!(entry.byte_count, 0);
        assert_eq!(entry.len(), 0x1_0000);
    }

    #[test]
    fn new_table_is_all_stop() {
        let t = table(4);
        for i in 0..4 {
            assert_eq!(t.entry(i), Some(PrdEntry::STOP));
        }
        assert_eq!(t.entry(4), None);
        assert_eq!(t.phys_base(), 0x8000);
    }

    #[test]
    fn table_rejects_bad_memory() {
        let crossing: Arc<dyn MemoryDescriptor> = Arc::new(HostBuffer::contiguous(512, 0xFFF0));
        assert!(PrdTable::new(crossing, 64).is_err());
        let high: Arc<dyn MemoryDescriptor> = Arc::new(HostBuffer::contiguous(512, 1 << 32));
        assert!(PrdTable::new(high, 64).is_err());
        let small: Arc<dyn MemoryDescriptor> = Arc::new(HostBuffer::contiguous(8, 0x1000));
        assert!(PrdTable::new(small, 2).is_err());
        let unaligned: Arc<dyn MemoryDescriptor> = Arc::new(HostBuffer::contiguous(64, 0x1002));
        assert!(PrdTable::new(unaligned, 2).is_err());
    }

    #[test]
    fn single_segment_single_entry() {
        let t = table(8);
        let cmd = command(HostBuffer::contiguous(512, 0x10_0000), 0, 512);
        assert_eq!(build_chain(&t, &cmd), Ok(1));
        assert_eq!(
            t.program(),
            [PrdEntry::new(0x10_0000, 512, PrdFlags::END_OF_TABLE)]
        );
    }

    #[test]
    fn segment_crossing_boundary_is_split() {
        let t = table(8);
        let cmd = command(HostBuffer::contiguous(0x2000, 0x1_F000), 0, 0x2000);
        assert_eq!(build_chain(&t, &cmd), Ok(2));
        assert_eq!(
            t.program(),
            [
                PrdEntry::new(0x1_F000, 0x1000, PrdFlags::empty()),
                PrdEntry::new(0x2_0000, 0x1000, PrdFlags::END_OF_TABLE),
            ]
        );
    }

    #[test]
    fn position_offsets_into_buffer() {
        let t = table(8);
        let cmd = command(HostBuffer::contiguous(4096, 0x4_0000), 1024, 512);
        build_chain(&t, &cmd).unwrap();
        assert_eq!(
            t.program(),
            [PrdEntry::new(0x4_0400, 512, PrdFlags::END_OF_TABLE)]
        );
    }

    #[test]
    fn end_marker_only_on_final_segment() {
        let t = table(8);
        let buffer = HostBuffer::scattered(vec![
            PhysSegment::new(0x1000, 512),
            PhysSegment::new(0x9000, 512),
            PhysSegment::new(0x3000, 1024),
        ]);
        let cmd = command(buffer, 0, 2048);
        assert_eq!(build_chain(&t, &cmd), Ok(3));
        let program = t.program();
        assert!(!program[0].is_last());
        assert!(!program[1].is_last());
        assert!(program[2].is_last());
    }

    #[test]
    fn aligned_run_splits_into_full_blocks() {
        let t = table(8);
        let cmd = command(HostBuffer::contiguous(0x2_0000, 0x10_0000), 0, 0x2_0000);
        assert_eq!(build_chain(&t, &cmd), Ok(2));
        assert_eq!(t.program()[0].byte_count, 0);
        assert_eq!(t.program()[1].len(), 0x1_0000);
    }

    #[test]
    fn unaligned_run_crossing_two_boundaries() {
        let t = table(8);
        let cmd = command(HostBuffer::contiguous(0x2_0000, 0x1_8000), 0, 0x2_0000);
        assert_eq!(build_chain(&t, &cmd), Ok(3));
        assert_eq!(
            t.program(),
            [
                PrdEntry::new(0x1_8000, 0x8000, PrdFlags::empty()),
                PrdEntry::new(0x2_0000, 0x1_0000, PrdFlags::empty()),
                PrdEntry::new(0x3_0000, 0x8000, PrdFlags::END_OF_TABLE),
            ]
        );
    }

    #[test]
    fn chain_fills_table_exactly() {
        let t = table(3);
        let cmd = command(HostBuffer::contiguous(0x2_0000, 0x1_8000), 0, 0x2_0000);
        assert_eq!(build_chain(&t, &cmd), Ok(3));
        assert!(t.entry(2).unwrap().is_last());

        let short = table(2);
        assert_eq!(build_chain(&short, &cmd), Err(AtaError::PrdTableExhausted));
    }

    #[test]
    fn exhaustion_is_reported() {
        let t = table(2);
        let buffer = HostBuffer::scattered(vec![
            PhysSegment::new(0x1000, 512),
            PhysSegment::new(0x9000, 512),
            PhysSegment::new(0x3000, 512),
        ]);
        let cmd = command(buffer, 0, 1536);
        assert_eq!(build_chain(&t, &cmd), Err(AtaError::PrdTableExhausted));
    }

    #[test]
    fn missing_buffer_and_empty_transfer() {
        let t = table(2);
        let mut cmd = AtaCommand::new();
        cmd.set_byte_count(512);
        assert_eq!(build_chain(&t, &cmd), Err(AtaError::NullBuffer));

        let cmd = command(HostBuffer::contiguous(512, 0), 0, 0);
        assert_eq!(build_chain(&t, &cmd), Err(AtaError::InvalidArgument));

        let cmd = command(HostBuffer::contiguous(512, 0), 256, 512);
        assert_eq!(build_chain(&t, &cmd), Err(AtaError::InvalidArgument));
    }

    proptest! {
        #[test]
        fn split_entries_stay_inside_one_block(
            addr in 0u64..0x40_0000,
            len in 1usize..=0x4_0000,
        ) {
            let t = table(MAX_PRD_ENTRIES);
            let cmd = command(HostBuffer::contiguous(len, addr), 0, len);
            let used = build_chain(&t, &cmd).unwrap();

            let first_block = addr / PRD_BOUNDARY;
            let last_block = (addr + len as u64 - 1) / PRD_BOUNDARY;
            prop_assert_eq!(used as u64, last_block - first_block + 1);

            let program = t.program();
            prop_assert_eq!(program.len(), used);
            let mut total = 0;
            for entry in &program {
                let start = u64::from(entry.addr);
                let end = start + entry.len() as u64 - 1;
                prop_assert_eq!(start / PRD_BOUNDARY, end / PRD_BOUNDARY);
                total += entry.len();
            }
            prop_assert_eq!(total, len);
        }

        #[test]
        fn exactly_one_end_marker(
            lens in proptest::collection::vec(1usize..0x8000, 1..6),
        ) {
            let mut next = 0x1_0000u64;
            let extents: Vec<_> = lens
                .iter()
                .map(|&len| {
                    let seg = PhysSegment::new(next + 0x100, len);
                    next += 0x2_0000;
                    seg
                })
                .collect();
            let total: usize = lens.iter().sum();
            let t = table(MAX_PRD_ENTRIES);
            let cmd = command(HostBuffer::scattered(extents), 0, total);
            let used = build_chain(&t, &cmd).unwrap();

            let marked: Vec<_> = (0..used).filter(|&i| t.entry(i).unwrap().is_last()).collect();
            prop_assert_eq!(marked, vec![used - 1]);
        }
    }
}
