//! Caller-owned data buffers and their physical layout.
//!
//! A command never owns its buffer; it holds a shared reference to a
//! [`MemoryDescriptor`] whose memory is pinned by whoever created it. DMA
//! programming asks the descriptor for physically contiguous runs, and PIO
//! transfers copy through `read_at` / `write_at`.

use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use ata_core::sync::SpinLock;

use crate::error::AtaError;

/// A physically contiguous run of memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysSegment {
    /// Physical start address.
    pub addr: u64,
    /// Length in bytes.
    pub len: usize,
}

impl PhysSegment {
    /// Creates a segment.
    #[must_use]
    pub const fn new(addr: u64, len: usize) -> Self {
        Self { addr, len }
    }
}

/// Direction of a data transfer, seen from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoDirection {
    /// Device to memory.
    In,
    /// Memory to device.
    Out,
}

/// Memory-mapping primitive for a transfer buffer.
pub trait MemoryDescriptor: Send + Sync {
    /// Total length in bytes.
    fn len(&self) -> usize;

    /// Returns `true` if the buffer holds no bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the physically contiguous run that starts at `offset`, or
    /// `None` if `offset` is past the end.
    fn physical_segment(&self, offset: usize) -> Option<PhysSegment>;

    /// Copies bytes starting at `offset` into `dst`; returns the count copied.
    fn read_at(&self, offset: usize, dst: &mut [u8]) -> usize;

    /// Copies `src` into the buffer at `offset`; returns the count copied.
    fn write_at(&self, offset: usize, src: &[u8]) -> usize;

    /// Wires the buffer for a transfer in `direction`.
    ///
    /// # Errors
    ///
    /// Implementations may fail if the memory cannot be pinned.
    fn prepare(&self, _direction: IoDirection) -> Result<(), AtaError> {
        Ok(())
    }

    /// Releases the wiring taken by [`prepare`](Self::prepare).
    ///
    /// # Errors
    ///
    /// Implementations may fail if the buffer was never prepared.
    fn complete(&self, _direction: IoDirection) -> Result<(), AtaError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HostBuffer
// ---------------------------------------------------------------------------

/// Heap-backed buffer with an explicit physical layout.
///
/// The bytes live in a `Vec`; `extents` says where each consecutive piece of
/// the logical buffer sits in physical memory. Used as the default DMA bounce
/// buffer and for describing scatter lists in tests.
#[derive(Debug)]
pub struct HostBuffer {
    data: SpinLock<Vec<u8>>,
    extents: Vec<PhysSegment>,
    prepared: AtomicBool,
}

impl HostBuffer {
    /// A zeroed buffer of `len` bytes that is contiguous from `phys_base`.
    #[must_use]
    pub fn contiguous(len: usize, phys_base: u64) -> Self {
        Self::scattered(vec![PhysSegment::new(phys_base, len)])
    }

    /// A zeroed buffer laid out over `extents` in order.
    #[must_use]
    pub fn scattered(extents: Vec<PhysSegment>) -> Self {
        let len = extents.iter().map(|e| e.len).sum();
        Self {
            data: SpinLock::new(vec![0; len]),
            extents,
            prepared: AtomicBool::new(false),
        }
    }

    /// Returns a copy of the buffer contents.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// Returns `true` between `prepare` and `complete`.
    #[must_use]
    pub fn is_prepared(&self) -> bool {
        self.prepared.load(Ordering::Acquire)
    }

    /// The physical extents backing this buffer.
    #[must_use]
    pub fn extents(&self) -> &[PhysSegment] {
        &self.extents
    }
}

impl MemoryDescriptor for HostBuffer {
    fn len(&self) -> usize {
        self.data.lock().len()
    }

    fn physical_segment(&self, offset: usize) -> Option<PhysSegment> {
        let mut start = 0;
        for extent in &self.extents {
            if offset < start + extent.len {
                let skip = offset - start;
                return Some(PhysSegment::new(extent.addr + skip as u64, extent.len - skip));
            }
            start += extent.len;
        }
        None
    }

    fn read_at(&self, offset: usize, dst: &mut [u8]) -> usize {
        let data = self.data.lock();
        let Some(src) = data.get(offset..) else {
            return 0;
        };
        let n = src.len().min(dst.len());
        dst[..n].copy_from_slice(&src[..n]);
        n
    }

    fn write_at(&self, offset: usize, src: &[u8]) -> usize {
        let mut data = self.data.lock();
        let Some(dst) = data.get_mut(offset..) else {
            return 0;
        };
        let n = src.len().min(dst.len());
        dst[..n].copy_from_slice(&src[..n]);
        n
    }

    fn prepare(&self, _direction: IoDirection) -> Result<(), AtaError> {
        self.prepared.store(true, Ordering::Release);
        Ok(())
    }

    fn complete(&self, _direction: IoDirection) -> Result<(), AtaError> {
        if self.prepared.swap(false, Ordering::AcqRel) {
            Ok(())
        } else {
            Err(AtaError::InvalidArgument)
        }
    }
}
