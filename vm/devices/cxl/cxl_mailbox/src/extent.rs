// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Dynamic capacity regions and the extents granted out of them.
//!
//! Capacity is offered to the host in groups of extents, which the host
//! accepts (in offer order) or declines. Accepted extents back blocks in
//! their region's bitmap. Every mutation is validated in full before any of
//! it is applied.

use bitvec::order::Lsb0;
use bitvec::vec::BitVec;
use cxl_resources::DcRegionConfig;
use cxl_spec::CAPACITY_MULTIPLIER;
use cxl_spec::ReturnCode;
use cxl_spec::Uuid;
use cxl_spec::dcd::DcExtentRecord;
use cxl_spec::dcd::DcRegionFlags;
use cxl_spec::dcd::DcRegionRecord;
use cxl_spec::dcd::MAX_EXTENTS;
use parking_lot::Mutex;
use std::collections::VecDeque;
use thiserror::Error;

/// A contiguous range of dynamic capacity.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DcExtent {
    /// Starting device physical address.
    pub start: u64,
    /// Length in bytes.
    pub length: u64,
    /// Tag supplied by the fabric manager.
    pub tag: Uuid,
    /// Sequence number for shared capacity.
    pub shared_sequence: u16,
}

impl DcExtent {
    pub(crate) fn new(start: u64, length: u64) -> Self {
        Self {
            start,
            length,
            tag: Uuid::NIL,
            shared_sequence: 0,
        }
    }

    /// One past the last byte.
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.length)
    }

    fn overlaps(&self, start: u64, length: u64) -> bool {
        self.start < start.saturating_add(length) && start < self.end()
    }

    fn contains(&self, start: u64, length: u64) -> bool {
        self.start <= start
            && start
                .checked_add(length)
                .is_some_and(|end| end <= self.end())
    }

    pub(crate) fn to_record(self) -> DcExtentRecord {
        DcExtentRecord {
            start: self.start,
            length: self.length,
            tag: self.tag,
            shared_sequence: self.shared_sequence,
            _reserved: [0; 6],
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum ExtentError {
    #[error("extent {start:#x}+{length:#x} is not inside a region")]
    OutsideRegion { start: u64, length: u64 },
    #[error("extent {start:#x}+{length:#x} is not block aligned")]
    Unaligned { start: u64, length: u64 },
    #[error("extents in the list overlap each other")]
    Overlapping,
    #[error("extent at {0:#x} overlaps accepted capacity")]
    Accepted(u64),
    #[error("extent at {0:#x} overlaps a pending offer")]
    Pending(u64),
    #[error("extent at {0:#x} was not offered")]
    NotOffered(u64),
    #[error("extent at {0:#x} is already backed")]
    AlreadyBacked(u64),
    #[error("range {start:#x}+{length:#x} is not accepted capacity")]
    NotAccepted { start: u64, length: u64 },
    #[error("no capacity offer is pending")]
    NoPendingGroup,
    #[error("extent limit reached")]
    TooManyExtents,
    #[error("region {0} does not exist")]
    UnknownRegion(u8),
    #[error("region {0} has capacity in use")]
    RegionInUse(u8),
    #[error("sanitize on release does not match region {0}")]
    SanitizeMismatch(u8),
    #[error("block size {0:#x} is not supported")]
    UnsupportedBlockSize(u64),
}

impl From<ExtentError> for ReturnCode {
    fn from(err: ExtentError) -> Self {
        match err {
            ExtentError::OutsideRegion { .. }
            | ExtentError::NotOffered(_)
            | ExtentError::AlreadyBacked(_)
            | ExtentError::NotAccepted { .. }
            | ExtentError::NoPendingGroup => ReturnCode::INVALID_PA,
            ExtentError::Unaligned { .. }
            | ExtentError::Overlapping
            | ExtentError::Accepted(_)
            | ExtentError::Pending(_) => ReturnCode::INVALID_EXTENT_LIST,
            ExtentError::TooManyExtents => ReturnCode::RESOURCES_EXHAUSTED,
            ExtentError::UnknownRegion(_) | ExtentError::UnsupportedBlockSize(_) => {
                ReturnCode::INVALID_INPUT
            }
            ExtentError::RegionInUse(_) | ExtentError::SanitizeMismatch(_) => {
                ReturnCode::UNSUPPORTED
            }
        }
    }
}

/// Memory attributes of a region's capacity, for the device's memory
/// attribute tables.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DcRegionCapabilities {
    /// The capacity is persistent.
    pub nonvolatile: bool,
    /// The capacity may be shared between hosts.
    pub sharable: bool,
    /// Coherency is managed by hardware.
    pub hw_managed_coherency: bool,
}

struct RegionBlocks {
    block_size: u64,
    backed: BitVec<u64, Lsb0>,
}

/// One dynamic capacity region.
pub(crate) struct DcRegion {
    pub base: u64,
    pub decode_length: u64,
    pub length: u64,
    pub supported_block_sizes: u64,
    pub dsmad_handle: u32,
    pub sanitize_on_release: bool,
    pub capabilities: DcRegionCapabilities,
    blocks: Mutex<RegionBlocks>,
}

impl DcRegion {
    fn new(base: u64, config: &DcRegionConfig) -> Self {
        Self {
            base,
            decode_length: config.length.next_multiple_of(CAPACITY_MULTIPLIER),
            length: config.length,
            supported_block_sizes: config.supported_block_sizes,
            dsmad_handle: config.dsmad_handle,
            sanitize_on_release: config.sanitize_on_release,
            capabilities: DcRegionCapabilities {
                nonvolatile: config.nonvolatile,
                sharable: config.sharable,
                hw_managed_coherency: config.hw_managed_coherency,
            },
            blocks: Mutex::new(RegionBlocks {
                block_size: config.block_size,
                backed: BitVec::repeat(false, (config.length / config.block_size) as usize),
            }),
        }
    }

    pub fn block_size(&self) -> u64 {
        self.blocks.lock().block_size
    }

    pub fn contains(&self, start: u64, length: u64) -> bool {
        start >= self.base
            && start
                .checked_add(length)
                .is_some_and(|end| end <= self.base + self.length)
    }

    /// Returns whether every block of the range is backed by an accepted
    /// extent. The range must lie within the region.
    pub fn is_backed(&self, start: u64, length: u64) -> bool {
        let blocks = self.blocks.lock();
        let first = ((start - self.base) / blocks.block_size) as usize;
        let last = (start + length - self.base).div_ceil(blocks.block_size) as usize;
        blocks.backed.get(first..last).is_some_and(|bits| bits.all())
    }

    fn set_backed(&self, start: u64, length: u64, value: bool) {
        let mut blocks = self.blocks.lock();
        let first = ((start - self.base) / blocks.block_size) as usize;
        let last = (start + length - self.base).div_ceil(blocks.block_size) as usize;
        if let Some(bits) = blocks.backed.get_mut(first..last) {
            bits.fill(value);
        }
    }

    /// The number of backed blocks.
    pub fn backed_blocks(&self) -> usize {
        self.blocks.lock().backed.count_ones()
    }

    pub fn record(&self) -> DcRegionRecord {
        DcRegionRecord {
            base: self.base,
            decode_length: self.decode_length / CAPACITY_MULTIPLIER,
            length: self.length,
            block_size: self.block_size(),
            dsmad_handle: self.dsmad_handle,
            flags: DcRegionFlags::new().with_sanitize_on_release(self.sanitize_on_release),
            _reserved: [0; 3],
        }
    }
}

#[derive(Default)]
struct ExtentStore {
    accepted: Vec<DcExtent>,
    /// Offers awaiting the host, oldest first.
    pending: VecDeque<Vec<DcExtent>>,
    generation: u32,
}

impl ExtentStore {
    fn pending_count(&self) -> usize {
        self.pending.iter().map(Vec::len).sum()
    }

    fn pending_extents(&self) -> impl Iterator<Item = &DcExtent> {
        self.pending.iter().flatten()
    }
}

/// The dynamic capacity state of a device: its regions and the extents
/// offered or granted out of them.
///
/// Lock order is the extent store, then a region's block bitmap.
pub(crate) struct DynamicCapacity {
    regions: Vec<DcRegion>,
    store: Mutex<ExtentStore>,
}

impl DynamicCapacity {
    /// Lays the regions out back to back starting at `base`.
    pub fn new(base: u64, configs: &[DcRegionConfig]) -> Self {
        let mut next = base.next_multiple_of(CAPACITY_MULTIPLIER);
        let regions = configs
            .iter()
            .map(|config| {
                let region = DcRegion::new(next, config);
                next += region.decode_length;
                region
            })
            .collect();
        Self {
            regions,
            store: Mutex::new(ExtentStore::default()),
        }
    }

    pub fn regions(&self) -> &[DcRegion] {
        &self.regions
    }

    pub fn total_capacity(&self) -> u64 {
        self.regions.iter().map(|r| r.length).sum()
    }

    pub fn region_for(&self, start: u64, length: u64) -> Option<&DcRegion> {
        self.regions.iter().find(|r| r.contains(start, length))
    }

    pub fn accepted(&self) -> Vec<DcExtent> {
        self.store.lock().accepted.clone()
    }

    pub fn generation(&self) -> u32 {
        self.store.lock().generation
    }

    pub fn pending_count(&self) -> usize {
        self.store.lock().pending_count()
    }

    /// Extent slots not taken by accepted or pending extents.
    pub fn available(&self) -> usize {
        let store = self.store.lock();
        MAX_EXTENTS.saturating_sub(store.accepted.len() + store.pending_count())
    }

    /// Checks the structure of a list of ranges: each lies in one region,
    /// is aligned to that region's block size, and overlaps no other range
    /// in the list.
    pub fn check_extent_list(&self, ranges: &[(u64, u64)]) -> Result<(), ExtentError> {
        let (Some(first), Some(last)) = (self.regions.first(), self.regions.last()) else {
            return match ranges.first() {
                Some(&(start, length)) => Err(ExtentError::OutsideRegion { start, length }),
                None => Ok(()),
            };
        };
        let granularity = self
            .regions
            .iter()
            .map(DcRegion::block_size)
            .min()
            .unwrap_or(1);
        let mut scratch: BitVec<u64, Lsb0> = BitVec::repeat(
            false,
            ((last.base + last.length - first.base) / granularity) as usize,
        );

        for &(start, length) in ranges {
            let region = self
                .region_for(start, length)
                .ok_or(ExtentError::OutsideRegion { start, length })?;
            let block_size = region.block_size();
            if length == 0 || (start - region.base) % block_size != 0 || length % block_size != 0
            {
                return Err(ExtentError::Unaligned { start, length });
            }
            let first_bit = ((start - first.base) / granularity) as usize;
            let bits = (length / granularity) as usize;
            let Some(span) = scratch.get_mut(first_bit..first_bit + bits) else {
                return Err(ExtentError::OutsideRegion { start, length });
            };
            if span.any() {
                return Err(ExtentError::Overlapping);
            }
            span.fill(true);
        }
        Ok(())
    }

    /// Records a new capacity offer as the newest pending group.
    pub fn offer(&self, extents: Vec<DcExtent>) -> Result<(), ExtentError> {
        let ranges: Vec<_> = extents.iter().map(|e| (e.start, e.length)).collect();
        let mut store = self.store.lock();
        self.check_extent_list(&ranges)?;
        for extent in &extents {
            if store
                .accepted
                .iter()
                .any(|a| a.overlaps(extent.start, extent.length))
            {
                return Err(ExtentError::Accepted(extent.start));
            }
            if store
                .pending_extents()
                .any(|p| p.overlaps(extent.start, extent.length))
            {
                return Err(ExtentError::Pending(extent.start));
            }
        }
        if store.accepted.len() + store.pending_count() + extents.len() > MAX_EXTENTS {
            return Err(ExtentError::TooManyExtents);
        }
        store.pending.push_back(extents);
        Ok(())
    }

    /// Applies the host's response to the oldest offer. The whole group is
    /// retired whatever the host accepted out of it. An empty response
    /// declines the group.
    pub fn accept(&self, ranges: &[(u64, u64)]) -> Result<Vec<DcExtent>, ExtentError> {
        let mut store = self.store.lock();
        if ranges.is_empty() {
            store.pending.pop_front();
            return Ok(Vec::new());
        }
        let Some(group) = store.pending.front() else {
            return Err(ExtentError::NoPendingGroup);
        };
        self.check_extent_list(ranges)?;

        let mut accepted = Vec::with_capacity(ranges.len());
        for &(start, length) in ranges {
            let offered = group
                .iter()
                .find(|e| e.contains(start, length))
                .ok_or(ExtentError::NotOffered(start))?;
            if store.accepted.iter().any(|a| a.overlaps(start, length)) {
                return Err(ExtentError::AlreadyBacked(start));
            }
            accepted.push(DcExtent {
                start,
                length,
                ..*offered
            });
        }
        if store.accepted.len() + accepted.len() > MAX_EXTENTS {
            return Err(ExtentError::TooManyExtents);
        }

        for extent in &accepted {
            if let Some(region) = self.region_for(extent.start, extent.length) {
                region.set_backed(extent.start, extent.length, true);
            }
        }
        store.accepted.extend_from_slice(&accepted);
        store.pending.pop_front();
        store.generation = store.generation.wrapping_add(1);
        Ok(accepted)
    }

    /// Splits the accepted extents around `ranges` without committing.
    /// Returns the remaining extents and the released pieces.
    fn plan_release(
        &self,
        store: &ExtentStore,
        ranges: &[(u64, u64)],
    ) -> Result<(Vec<DcExtent>, Vec<DcExtent>), ExtentError> {
        self.check_extent_list(ranges)?;
        let pending = store.pending_count();
        let mut remaining = store.accepted.clone();
        let mut released = Vec::new();

        for &(start, length) in ranges {
            let mut dpa = start;
            let end = start + length;
            while dpa < end {
                let index = remaining
                    .iter()
                    .position(|e| e.start <= dpa && dpa < e.end())
                    .ok_or(ExtentError::NotAccepted {
                        start: dpa,
                        length: end - dpa,
                    })?;
                let extent = remaining.remove(index);
                let take_end = end.min(extent.end());

                let mut at = index;
                if dpa > extent.start {
                    remaining.insert(
                        at,
                        DcExtent {
                            length: dpa - extent.start,
                            ..extent
                        },
                    );
                    at += 1;
                }
                if take_end < extent.end() {
                    remaining.insert(
                        at,
                        DcExtent {
                            start: take_end,
                            length: extent.end() - take_end,
                            ..extent
                        },
                    );
                }
                if remaining.len() + pending > MAX_EXTENTS {
                    return Err(ExtentError::TooManyExtents);
                }

                released.push(DcExtent {
                    start: dpa,
                    length: take_end - dpa,
                    ..extent
                });
                dpa = take_end;
            }
        }
        Ok((remaining, released))
    }

    /// Releases accepted capacity, splitting extents that are only partly
    /// released. Returns the released pieces.
    pub fn release(&self, ranges: &[(u64, u64)]) -> Result<Vec<DcExtent>, ExtentError> {
        let mut store = self.store.lock();
        let (remaining, released) = self.plan_release(&store, ranges)?;
        for extent in &released {
            if let Some(region) = self.region_for(extent.start, extent.length) {
                region.set_backed(extent.start, extent.length, false);
            }
        }
        store.accepted = remaining;
        store.generation = store.generation.wrapping_add(1);
        Ok(released)
    }

    /// Validates a release request the host has not yet agreed to. Ranges
    /// still offered in a pending group are refused.
    pub fn check_release(&self, ranges: &[(u64, u64)]) -> Result<Vec<DcExtent>, ExtentError> {
        let store = self.store.lock();
        self.check_extent_list(ranges)?;
        for &(start, length) in ranges {
            if store.pending_extents().any(|p| p.overlaps(start, length)) {
                return Err(ExtentError::Pending(start));
            }
        }
        let (_, released) = self.plan_release(&store, ranges)?;
        Ok(released)
    }

    /// Changes a region's block size. Returns false if the size was already
    /// in effect.
    pub fn reconfigure(
        &self,
        region_id: u8,
        block_size: u64,
        sanitize_on_release: bool,
    ) -> Result<bool, ExtentError> {
        let region = self
            .regions
            .get(region_id as usize)
            .ok_or(ExtentError::UnknownRegion(region_id))?;
        if region.sanitize_on_release != sanitize_on_release {
            return Err(ExtentError::SanitizeMismatch(region_id));
        }

        let store = self.store.lock();
        if store
            .pending_extents()
            .any(|p| region.contains(p.start, p.length))
        {
            return Err(ExtentError::RegionInUse(region_id));
        }
        let mut blocks = region.blocks.lock();
        if blocks.backed.any() {
            return Err(ExtentError::RegionInUse(region_id));
        }
        if !block_size.is_power_of_two()
            || region.supported_block_sizes & block_size == 0
            || region.length % block_size != 0
        {
            return Err(ExtentError::UnsupportedBlockSize(block_size));
        }
        if blocks.block_size == block_size {
            return Ok(false);
        }
        blocks.block_size = block_size;
        blocks.backed = BitVec::repeat(false, (region.length / block_size) as usize);
        Ok(true)
    }
}
