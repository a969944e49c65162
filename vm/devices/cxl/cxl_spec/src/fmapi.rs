// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Fabric manager API payloads: tunneling (0x53), multi-headed devices
//! (0x55), and dynamic capacity device management (0x56).

use crate::Uuid;
use crate::dcd::DcRegionFlags;
use bitfield_struct::bitfield;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// Tunnel Management Command input header, followed by a CCI message.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct TunnelRequestHeader {
    pub port_or_ld_id: u8,
    /// Only 0 (port or LD based) is defined.
    pub target_type: u8,
    /// Size of the embedded message, header included.
    pub size: u16,
}

/// Tunnel Management Command output header, followed by a CCI message.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct TunnelResponseHeader {
    pub response_length: u16,
    pub _reserved: [u8; 2],
}

#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct MhdInfoRequest {
    pub start_ld: u8,
    pub ld_map_length: u8,
}

/// Get MHD Info output header, followed by one head id per LD.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct MhdInfoHeader {
    pub ld_count: u8,
    pub head_count: u8,
    pub _reserved1: u16,
    pub start_ld: u8,
    pub ld_map_length: u8,
    pub _reserved2: u16,
}

open_enum! {
    pub enum ExtentSelectionPolicy: u8 {
        FREE = 0,
        CONTIGUOUS = 1,
        PRESCRIPTIVE = 2,
        ENABLE_SHARED_ACCESS = 3,
    }
}

open_enum! {
    pub enum ExtentRemovalPolicy: u8 {
        TAG_BASED = 0,
        PRESCRIPTIVE = 1,
    }
}

/// Get DCD Info output payload.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct DcdInfo {
    pub host_count: u8,
    pub regions_supported: u8,
    pub _reserved1: [u8; 2],
    pub add_policy_mask: u16,
    pub _reserved2: [u8; 2],
    pub release_policy_mask: u16,
    pub sanitize_on_release_mask: u8,
    pub _reserved3: u8,
    /// In units of [`crate::CAPACITY_MULTIPLIER`].
    pub total_dynamic_capacity: u64,
    pub region_block_size_masks: [u64; 8],
}

static_assertions::const_assert_eq!(size_of::<DcdInfo>(), 0x54);

#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct GetHostDcRegionConfigRequest {
    pub host_id: u16,
    pub region_count: u8,
    pub start_region: u8,
}

/// Get Host DC Region Configuration output header, followed by region
/// records and extent counts in the same layout as the host-side command.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct HostDcRegionConfigHeader {
    pub host_id: u16,
    pub region_count: u8,
    pub regions_returned: u8,
}

#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct SetDcRegionConfigRequest {
    pub region_id: u8,
    pub _reserved1: [u8; 3],
    pub block_size: u64,
    pub flags: DcRegionFlags,
    pub _reserved2: [u8; 3],
}

static_assertions::const_assert_eq!(size_of::<SetDcRegionConfigRequest>(), 16);

#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct GetDcRegionExtentListRequest {
    pub host_id: u16,
    pub region_id: u8,
    pub _reserved: u8,
    pub count: u32,
    pub start_index: u32,
}

static_assertions::const_assert_eq!(size_of::<GetDcRegionExtentListRequest>(), 12);

/// Get DC Region Extent List output header, followed by extent records.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct DcRegionExtentListHeader {
    pub host_id: u16,
    pub region_id: u8,
    pub _reserved1: u8,
    pub start_index: u32,
    pub returned: u32,
    pub total_extents: u32,
    pub generation: u32,
    pub _reserved2: [u8; 4],
}

static_assertions::const_assert_eq!(size_of::<DcRegionExtentListHeader>(), 24);

/// Initiate Dynamic Capacity Add input header, followed by extent records.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct InitiateDcAddHeader {
    pub host_id: u16,
    pub selection_policy: ExtentSelectionPolicy,
    pub region_id: u8,
    pub length: u64,
    pub tag: Uuid,
    pub extent_count: u32,
}

static_assertions::const_assert_eq!(size_of::<InitiateDcAddHeader>(), 32);

#[bitfield(u8)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, PartialEq, Eq)]
pub struct ReleaseFlags {
    #[bits(4)]
    pub removal_policy: u8,
    pub forced: bool,
    pub sanitize_on_release: bool,
    #[bits(2)]
    _reserved: u8,
}

/// Initiate Dynamic Capacity Release input header, followed by extent
/// records.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct InitiateDcReleaseHeader {
    pub host_id: u16,
    pub flags: ReleaseFlags,
    pub region_id: u8,
    pub length: u64,
    pub tag: Uuid,
    pub extent_count: u32,
}

static_assertions::const_assert_eq!(size_of::<InitiateDcReleaseHeader>(), 32);
