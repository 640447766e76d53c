//! Histogram segments: one fixed-layout record per device in shared memory.
//!
//! A [`Segment`] is an ownership-tagged handle over a [`SharedMapping`]:
//! - [`Access::Owned`] (writer): created exclusively, mutable through
//!   [`Segment::writer`], unmapped **and unlinked** on drop,
//! - [`Access::Borrowed`] (reader): opened read-only, only unmapped on drop.
//!
//! The record carries no version field. Writer and readers must come from
//! builds with the same [`SegmentRecord`] layout; the reader side only checks
//! that the object size matches before mapping it.
//!
//! Writer and readers do not synchronize. Every shared field is a single
//! aligned 32- or 64-bit word accessed with relaxed atomics, so a reader may
//! see a bucket mid-tick but never a torn value.

use std::mem::size_of;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use log::{debug, warn};

use crate::bucket::{
    CPU_FREQ_BUCKETS, GPU_POWER_BUCKETS, HistogramSpec, RAPL_POWER_BUCKETS,
};
use crate::energy::EnergyTotal;
use crate::error::SegmentError;
use crate::shm::{self, SharedMapping};

/// Bytes in front of the bucket array.
pub const HEADER_SIZE: usize = 56;

/// Deterministic segment name: `/<namespace>_<metric>_<kind>_<NNN>`.
pub fn segment_name(namespace: &str, spec: &HistogramSpec, device_id: u32) -> String {
    format!("/{namespace}_{}_{}_{device_id:03}", spec.metric, spec.kind)
}

/// Shared record layout. All fields start zeroed (`ftruncate`).
#[repr(C)]
pub struct SegmentRecord<const N: usize> {
    device_id: AtomicU32,
    #[allow(dead_code)]
    reserved: AtomicU32,
    /// Static lower bound captured at creation (f64 bits), e.g. min rated kHz.
    min_value: AtomicU64,
    /// Static upper bound captured at creation (f64 bits).
    max_value: AtomicU64,
    /// Last observed instantaneous value (f64 bits).
    last_value: AtomicU64,
    elapsed_s: AtomicU64,
    energy_lo_uj: AtomicU64,
    energy_hi_uj: AtomicU64,
    buckets: [AtomicU32; N],
}

const _: () = assert!(
    size_of::<SegmentRecord<CPU_FREQ_BUCKETS>>()
        == (HEADER_SIZE + 4 * CPU_FREQ_BUCKETS).next_multiple_of(8)
);
const _: () = assert!(
    size_of::<SegmentRecord<RAPL_POWER_BUCKETS>>()
        == (HEADER_SIZE + 4 * RAPL_POWER_BUCKETS).next_multiple_of(8)
);
const _: () = assert!(
    size_of::<SegmentRecord<GPU_POWER_BUCKETS>>()
        == (HEADER_SIZE + 4 * GPU_POWER_BUCKETS).next_multiple_of(8)
);

impl<const N: usize> SegmentRecord<N> {
    pub fn device_id(&self) -> u32 {
        self.device_id.load(Ordering::Relaxed)
    }

    pub fn min_value(&self) -> f64 {
        f64::from_bits(self.min_value.load(Ordering::Relaxed))
    }

    pub fn max_value(&self) -> f64 {
        f64::from_bits(self.max_value.load(Ordering::Relaxed))
    }

    pub fn last_value(&self) -> f64 {
        f64::from_bits(self.last_value.load(Ordering::Relaxed))
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed_s.load(Ordering::Relaxed)
    }

    /// Running energy total. `lo` and `hi` are loaded separately.
    pub fn energy(&self) -> EnergyTotal {
        EnergyTotal::new(
            self.energy_lo_uj.load(Ordering::Relaxed),
            self.energy_hi_uj.load(Ordering::Relaxed),
        )
    }

    /// Tick count of one bucket; out-of-range indices read as 0.
    pub fn ticks(&self, index: usize) -> u32 {
        self.buckets
            .get(index)
            .map_or(0, |b| b.load(Ordering::Relaxed))
    }

    /// Copy of the whole bucket array, one load per bucket.
    pub fn counts(&self) -> [u32; N] {
        std::array::from_fn(|i| self.buckets[i].load(Ordering::Relaxed))
    }

    pub fn total_ticks(&self) -> u64 {
        self.buckets
            .iter()
            .map(|b| u64::from(b.load(Ordering::Relaxed)))
            .sum()
    }
}

/// Who is responsible for a segment's name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// Writer: created it, may mutate it, unlinks it on drop.
    Owned,
    /// Reader: mapped read-only, leaves the name alone.
    Borrowed,
}

impl std::fmt::Display for Access {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Owned => write!(f, "owned"),
            Self::Borrowed => write!(f, "borrowed"),
        }
    }
}

/// Handle to one device's histogram segment.
#[derive(Debug)]
pub struct Segment<const N: usize> {
    name: String,
    access: Access,
    mapping: SharedMapping,
}

pub type FreqSegment = Segment<CPU_FREQ_BUCKETS>;
pub type RaplSegment = Segment<RAPL_POWER_BUCKETS>;
pub type GpuSegment = Segment<GPU_POWER_BUCKETS>;

impl<const N: usize> Segment<N> {
    /// Byte size shared by every segment with `N` buckets.
    pub const SIZE: usize = size_of::<SegmentRecord<N>>();

    /// Create the segment for `device_id` exclusively and take ownership.
    pub fn create(
        namespace: &str,
        spec: &HistogramSpec,
        device_id: u32,
    ) -> Result<Self, SegmentError> {
        debug_assert_eq!(spec.bucket_count(), N);
        let name = segment_name(namespace, spec, device_id);
        let mapping = SharedMapping::create_exclusive(&name, Self::SIZE)?;
        let segment = Self {
            name,
            access: Access::Owned,
            mapping,
        };
        segment
            .record()
            .device_id
            .store(device_id, Ordering::Relaxed);
        debug!("created {} ({} bytes)", segment.name, Self::SIZE);
        Ok(segment)
    }

    /// Attach read-only to the segment a writer created for `device_id`.
    pub fn open(
        namespace: &str,
        spec: &HistogramSpec,
        device_id: u32,
    ) -> Result<Self, SegmentError> {
        debug_assert_eq!(spec.bucket_count(), N);
        let name = segment_name(namespace, spec, device_id);
        let mapping = SharedMapping::open_read_only(&name, Self::SIZE)?;
        Ok(Self {
            name,
            access: Access::Borrowed,
            mapping,
        })
    }

    /// [`create`](Self::create) or [`open`](Self::open) depending on `access`.
    pub fn acquire(
        namespace: &str,
        spec: &HistogramSpec,
        device_id: u32,
        access: Access,
    ) -> Result<Self, SegmentError> {
        match access {
            Access::Owned => Self::create(namespace, spec, device_id),
            Access::Borrowed => Self::open(namespace, spec, device_id),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn record(&self) -> &SegmentRecord<N> {
        // SAFETY: the mapping is page aligned and exactly `SIZE` bytes long
        // (checked on open), every bit pattern is a valid record, and all
        // fields are atomics so shared access from other processes is not a
        // data race. The reference cannot outlive `self.mapping`.
        unsafe { &*self.mapping.as_ptr().cast::<SegmentRecord<N>>() }
    }

    /// Mutating view, available only to the owning writer.
    pub fn writer(&self) -> Option<SegmentWriter<'_, N>> {
        match self.access {
            Access::Owned => Some(SegmentWriter {
                record: self.record(),
            }),
            Access::Borrowed => None,
        }
    }
}

impl<const N: usize> Drop for Segment<N> {
    fn drop(&mut self) {
        if self.access == Access::Owned {
            match shm::unlink(&self.name) {
                Ok(()) => debug!("removed {}", self.name),
                Err(e) => warn!("could not remove {}: {e}", self.name),
            }
        }
    }
}

/// Write access to an owned segment's record.
pub struct SegmentWriter<'a, const N: usize> {
    record: &'a SegmentRecord<N>,
}

impl<const N: usize> SegmentWriter<'_, N> {
    pub fn record(&self) -> &SegmentRecord<N> {
        self.record
    }

    /// Store static metadata captured once at creation.
    pub fn set_limits(&self, min: f64, max: f64) {
        self.record.min_value.store(min.to_bits(), Ordering::Relaxed);
        self.record.max_value.store(max.to_bits(), Ordering::Relaxed);
    }

    /// Add `weight` ticks to a bucket. Indices past the end hit the last
    /// bucket; counters saturate instead of wrapping.
    pub fn add_ticks(&self, index: usize, weight: u32) {
        let Some(bucket) = self.record.buckets.get(index.min(N.saturating_sub(1))) else {
            return;
        };
        let current = bucket.load(Ordering::Relaxed);
        bucket.store(current.saturating_add(weight), Ordering::Relaxed);
    }

    pub fn set_last_value(&self, value: f64) {
        self.record
            .last_value
            .store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn add_elapsed(&self, secs: u64) {
        let current = self.record.elapsed_s.load(Ordering::Relaxed);
        self.record
            .elapsed_s
            .store(current.saturating_add(secs), Ordering::Relaxed);
    }

    /// Add `delta_uj` to the double-width energy total and return the result.
    pub fn add_energy(&self, delta_uj: u64) -> EnergyTotal {
        let mut total = self.record.energy();
        total.add(delta_uj);
        self.record.energy_lo_uj.store(total.lo, Ordering::Relaxed);
        self.record.energy_hi_uj.store(total.hi, Ordering::Relaxed);
        total
    }
}
