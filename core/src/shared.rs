//! Shared statistics region
//!
//! One anonymous `MAP_SHARED` mapping created before the first fork and
//! inherited by every worker. It holds a small header followed by one
//! [`StatsRecord`] per worker instance. Records are only ever addressed by
//! index; the mapping is never resized.

use std::mem::{align_of, size_of};
use std::num::NonZeroUsize;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use nix::sys::mman::{mmap_anonymous, munmap, MapFlags, ProtFlags};

use crate::error::{StressError, StressResult};

/// Per-instance statistics, written only by the owning worker
///
/// Every field is an atomic so the record is plain data that can live in
/// zero-filled shared memory. `counter` is the only field the supervisor may
/// read while the worker is alive; the rest is finalised once at exit.
#[repr(C)]
#[derive(Debug, Default)]
pub struct StatsRecord {
    counter: AtomicU64,
    start_bits: AtomicU64,
    finish_bits: AtomicU64,
    user_ticks: AtomicU64,
    system_ticks: AtomicU64,
    starts: AtomicU32,
    run_ok: AtomicBool,
}

impl StatsRecord {
    /// Bump the ops counter by one
    #[inline]
    pub fn inc(&self) {
        self.counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Bump the ops counter by `n`
    #[inline]
    pub fn add(&self, n: u64) {
        self.counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Current ops count
    #[inline]
    pub fn ops(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    /// Record a (re)start at `now` seconds since the epoch
    ///
    /// The first start wins so wall time spans OOM restarts.
    pub fn mark_started(&self, now: f64) {
        if self.starts.fetch_add(1, Ordering::SeqCst) == 0 {
            self.start_bits.store(now.to_bits(), Ordering::SeqCst);
        }
        self.finish_bits.store(now.to_bits(), Ordering::SeqCst);
    }

    /// Finalise the record at worker exit
    pub fn finalize(&self, now: f64, user_ticks: u64, system_ticks: u64, run_ok: bool) {
        self.finish_bits.store(now.to_bits(), Ordering::SeqCst);
        self.user_ticks.store(user_ticks, Ordering::SeqCst);
        self.system_ticks.store(system_ticks, Ordering::SeqCst);
        self.run_ok.store(run_ok, Ordering::SeqCst);
    }

    /// Wall-clock start (seconds since the epoch)
    pub fn wall_start(&self) -> f64 {
        f64::from_bits(self.start_bits.load(Ordering::SeqCst))
    }

    /// Wall-clock finish (seconds since the epoch)
    pub fn wall_finish(&self) -> f64 {
        f64::from_bits(self.finish_bits.load(Ordering::SeqCst))
    }

    /// Wall time between start and finish, never negative
    pub fn wall_time(&self) -> f64 {
        (self.wall_finish() - self.wall_start()).max(0.0)
    }

    /// User CPU ticks of the worker and its reaped children
    pub fn user_ticks(&self) -> u64 {
        self.user_ticks.load(Ordering::SeqCst)
    }

    /// System CPU ticks of the worker and its reaped children
    pub fn system_ticks(&self) -> u64 {
        self.system_ticks.load(Ordering::SeqCst)
    }

    /// Did the workload entry point return success?
    pub fn completed_ok(&self) -> bool {
        self.run_ok.load(Ordering::SeqCst)
    }

    /// How many times a worker started on this record
    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }
}

#[repr(C)]
struct RegionHeader {
    length: AtomicU64,
    records: AtomicU64,
}

/// The mapped region: header plus `records` stats records
pub struct SharedRegion {
    base: NonNull<u8>,
    length: usize,
    records: usize,
}

// The region is only reached through atomics.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Byte offset of the first record
    const fn records_offset() -> usize {
        let header = size_of::<RegionHeader>();
        let align = align_of::<StatsRecord>();
        (header + align - 1) / align * align
    }

    /// Bytes needed for `records` records
    pub fn required_len(records: usize) -> usize {
        Self::records_offset() + records * size_of::<StatsRecord>()
    }

    /// Map and zero a region for exactly `records` worker instances
    pub fn create(records: usize) -> StressResult<Self> {
        let length = Self::required_len(records);
        let len = NonZeroUsize::new(length)
            .ok_or_else(|| StressError::shared_memory("zero length region"))?;

        // SAFETY: fresh anonymous mapping, no existing memory is aliased.
        let ptr = unsafe {
            mmap_anonymous(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED | MapFlags::MAP_ANONYMOUS,
            )
        }
        .map_err(|e| {
            StressError::shared_memory(format!(
                "cannot mmap {length} bytes of shared memory: {e}"
            ))
        })?;

        let base = ptr.cast::<u8>();
        // SAFETY: we own `length` writable bytes at `base`.
        unsafe { std::ptr::write_bytes(base.as_ptr(), 0, length) };

        let region = Self {
            base,
            length,
            records,
        };
        let header = region.header();
        header.length.store(length as u64, Ordering::SeqCst);
        header.records.store(records as u64, Ordering::SeqCst);

        tracing::debug!(length, records, "Mapped shared statistics region");
        Ok(region)
    }

    fn header(&self) -> &RegionHeader {
        // SAFETY: the mapping starts with a zero-initialised header.
        unsafe { &*(self.base.as_ptr() as *const RegionHeader) }
    }

    /// Mapping size in bytes
    pub fn size(&self) -> usize {
        self.length
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records
    }

    /// Is the region record-less?
    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Record `index`, or `None` when out of range
    pub fn record(&self, index: usize) -> Option<&StatsRecord> {
        if index >= self.records {
            return None;
        }
        // SAFETY: index is in range and records are zero-initialised atomics.
        unsafe {
            let ptr = self
                .base
                .as_ptr()
                .add(Self::records_offset())
                .cast::<StatsRecord>()
                .add(index);
            Some(&*ptr)
        }
    }

    /// Iterate over all records in index order
    pub fn iter(&self) -> impl Iterator<Item = &StatsRecord> {
        (0..self.records).filter_map(move |i| self.record(i))
    }

    /// Unmap the region
    pub fn destroy(self) {
        drop(self)
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        // SAFETY: unmapping exactly what `create` mapped.
        if let Err(e) = unsafe { munmap(self.base.cast(), self.length) } {
            tracing::warn!(error = %e, "Failed to unmap shared statistics region");
        }
    }
}

impl std::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegion")
            .field("length", &self.length)
            .field("records", &self.records)
            .finish()
    }
}
