// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Features command set (0x05) and the layouts of the built-in features.

use crate::Uuid;
use bitfield_struct::bitfield;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// Memory patrol scrub control feature.
pub const PATROL_SCRUB_UUID: Uuid = Uuid::from_fields(
    0x96dad7d6,
    0xfde8,
    0x482b,
    [0xa7, 0x33, 0x75, 0x77, 0x4e, 0x06, 0xdb, 0x8a],
);

/// DDR5 error check scrub control feature.
pub const ECS_UUID: Uuid = Uuid::from_fields(
    0xe5b13f22,
    0x2328,
    0x4a14,
    [0xb8, 0xba, 0xb9, 0x69, 0x1e, 0x89, 0x33, 0x86],
);

/// Number of media FRUs reported by the ECS feature.
pub const ECS_MEDIA_FRU_COUNT: usize = 3;

/// Version of both the get and set layouts of the built-in features.
pub const FEATURE_VERSION: u8 = 1;

/// Get Supported Features input payload.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct GetSupportedFeaturesRequest {
    /// Size of the output buffer the caller provided, in bytes.
    pub count: u32,
    pub start_index: u16,
    pub _reserved: u16,
}

#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct SupportedFeaturesHeader {
    pub device_feature_count: u16,
    pub entries: u16,
    pub _reserved: [u8; 4],
}

#[bitfield(u32)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, PartialEq, Eq)]
pub struct FeatureAttributes {
    pub changeable: bool,
    #[bits(31)]
    _reserved: u32,
}

#[bitfield(u16)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, PartialEq, Eq)]
pub struct SetFeatureEffects {
    pub cold_reset_config_change: bool,
    pub immediate_config_change: bool,
    pub immediate_data_change: bool,
    pub immediate_policy_change: bool,
    pub immediate_log_change: bool,
    pub security_state_change: bool,
    pub background_operation: bool,
    pub secondary_mailbox_supported: bool,
    #[bits(1)]
    _reserved0: u8,
    pub cel_valid: bool,
    pub conventional_reset_config_change: bool,
    pub cxl_reset_config_change: bool,
    #[bits(4)]
    _reserved1: u8,
}

#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct SupportedFeatureEntry {
    pub uuid: Uuid,
    pub index: u16,
    pub get_size: u16,
    pub set_size: u16,
    pub attributes: FeatureAttributes,
    pub get_version: u8,
    pub set_version: u8,
    pub set_effects: SetFeatureEffects,
    pub _reserved: [u8; 18],
}

static_assertions::const_assert_eq!(size_of::<SupportedFeatureEntry>(), 48);

open_enum! {
    pub enum FeatureSelection: u8 {
        CURRENT = 0,
        DEFAULT = 1,
        SAVED = 2,
    }
}

/// Get Feature input payload.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct GetFeatureRequest {
    pub uuid: Uuid,
    pub offset: u16,
    pub count: u16,
    pub selection: FeatureSelection,
}

static_assertions::const_assert_eq!(size_of::<GetFeatureRequest>(), 0x15);

open_enum! {
    pub enum FeatureTransfer: u8 {
        FULL = 0,
        INITIATE = 1,
        CONTINUE = 2,
        FINISH = 3,
        ABORT = 4,
    }
}

#[bitfield(u32)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, PartialEq, Eq)]
pub struct SetFeatureFlags {
    #[bits(3)]
    pub transfer: u8,
    pub saved_across_reset: bool,
    #[bits(28)]
    _reserved: u32,
}

/// Set Feature input header, followed by feature data.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct SetFeatureHeader {
    pub uuid: Uuid,
    pub flags: SetFeatureFlags,
    pub offset: u16,
    pub version: u8,
    pub _reserved: [u8; 9],
}

static_assertions::const_assert_eq!(size_of::<SetFeatureHeader>(), 32);

/// Readable patrol scrub attributes.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct PatrolScrubReadAttributes {
    /// Bit 0: cycle changeable. Bit 1: real-time reporting.
    pub cycle_capability: u8,
    /// Low byte: current cycle in hours. High byte: minimum cycle.
    pub cycle: u16,
    /// Bit 0: scrub enabled.
    pub flags: u8,
}

static_assertions::const_assert_eq!(size_of::<PatrolScrubReadAttributes>(), 4);

/// Writable patrol scrub attributes.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct PatrolScrubWriteAttributes {
    pub cycle_hours: u8,
    pub flags: u8,
}

static_assertions::const_assert_eq!(size_of::<PatrolScrubWriteAttributes>(), 2);

#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct EcsFruReadAttributes {
    pub capability: u8,
    /// Bits 0..3: threshold count. Bit 3: codeword/row mode.
    pub config: u16,
    pub flags: u8,
}

/// Readable ECS attributes.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct EcsReadAttributes {
    pub log_capability: u8,
    pub frus: [EcsFruReadAttributes; ECS_MEDIA_FRU_COUNT],
}

static_assertions::const_assert_eq!(size_of::<EcsReadAttributes>(), 13);

/// Writable ECS attributes.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct EcsWriteAttributes {
    pub log_capability: u8,
    pub fru_config: [u16; ECS_MEDIA_FRU_COUNT],
}

static_assertions::const_assert_eq!(size_of::<EcsWriteAttributes>(), 7);
