// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Dynamic capacity command set (0x48), as seen by the host.

use crate::Uuid;
use bitfield_struct::bitfield;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// Maximum number of extents, accepted and pending, the device tracks.
pub const MAX_EXTENTS: usize = 512;

/// Maximum number of dynamic capacity regions.
pub const MAX_DC_REGIONS: usize = 8;

#[bitfield(u8)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, PartialEq, Eq)]
pub struct DcRegionFlags {
    pub sanitize_on_release: bool,
    #[bits(7)]
    _reserved: u8,
}

/// Get Dynamic Capacity Configuration input payload.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct GetDcConfigRequest {
    pub region_count: u8,
    pub start_region: u8,
}

/// Get Dynamic Capacity Configuration output header, followed by
/// [`DcRegionRecord`]s and a trailing [`DcExtentCounts`].
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct DcConfigHeader {
    pub available_regions: u8,
    pub regions_returned: u8,
    pub _reserved: [u8; 6],
}

#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct DcRegionRecord {
    pub base: u64,
    /// In units of [`crate::CAPACITY_MULTIPLIER`].
    pub decode_length: u64,
    pub length: u64,
    pub block_size: u64,
    pub dsmad_handle: u32,
    pub flags: DcRegionFlags,
    pub _reserved: [u8; 3],
}

static_assertions::const_assert_eq!(size_of::<DcRegionRecord>(), 40);

#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct DcExtentCounts {
    pub extents_supported: u32,
    pub extents_available: u32,
    pub tags_supported: u32,
    pub tags_available: u32,
}

/// Get Dynamic Capacity Extent List input payload.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct GetExtentListRequest {
    pub count: u32,
    pub start_index: u32,
}

/// Get Dynamic Capacity Extent List output header, followed by
/// [`DcExtentRecord`]s.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct ExtentListHeader {
    pub count: u32,
    pub total_extents: u32,
    pub generation: u32,
    pub _reserved: [u8; 4],
}

static_assertions::const_assert_eq!(size_of::<ExtentListHeader>(), 16);

/// An extent as carried in extent lists and event records.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct DcExtentRecord {
    pub start: u64,
    pub length: u64,
    pub tag: Uuid,
    pub shared_sequence: u16,
    pub _reserved: [u8; 6],
}

static_assertions::const_assert_eq!(size_of::<DcExtentRecord>(), 40);

/// Add Dynamic Capacity Response and Release Dynamic Capacity input header,
/// followed by [`UpdatedExtent`]s.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct UpdateExtentListHeader {
    pub count: u32,
    pub flags: u8,
    pub _reserved: [u8; 3],
}

#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct UpdatedExtent {
    pub start: u64,
    pub length: u64,
    pub _reserved: [u8; 8],
}

static_assertions::const_assert_eq!(size_of::<UpdatedExtent>(), 24);
