// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Media and poison management command set (0x43).

use bitfield_struct::bitfield;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// Maximum number of entries in the poison list.
pub const POISON_LIST_LIMIT: usize = 256;

/// Mask of the source bits in a media error record address.
pub const MEDIA_ERROR_SOURCE_MASK: u64 = 0x7;

open_enum! {
    /// Where a poisoned range came from, encoded in the low address bits of
    /// a media error record.
    pub enum PoisonSource: u8 {
        EXTERNAL = 1,
        INTERNAL = 2,
        INJECTED = 3,
        VENDOR = 7,
    }
}

/// A window of device physical addresses; the length is in cache lines.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct PoisonWindow {
    pub address: u64,
    pub length: u64,
}

#[bitfield(u8)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, PartialEq, Eq)]
pub struct PoisonListFlags {
    pub more_records: bool,
    pub overflow: bool,
    pub scan_in_progress: bool,
    #[bits(5)]
    _reserved: u8,
}

/// Get Poison List output header, followed by [`MediaErrorRecord`]s.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct PoisonListHeader {
    pub flags: PoisonListFlags,
    pub _reserved1: u8,
    pub overflow_timestamp: u64,
    pub count: u16,
    pub _reserved2: [u8; 0x14],
}

static_assertions::const_assert_eq!(size_of::<PoisonListHeader>(), 0x20);

#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct MediaErrorRecord {
    /// Cache-line aligned address ORed with the [`PoisonSource`].
    pub address: u64,
    /// Length in cache lines.
    pub length: u32,
    pub _reserved: u32,
}

static_assertions::const_assert_eq!(size_of::<MediaErrorRecord>(), 16);

#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct InjectPoisonRequest {
    pub address: u64,
}

#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct ClearPoisonRequest {
    pub address: u64,
    /// Data written to the cleared line.
    pub data: [u8; 64],
}

static_assertions::const_assert_eq!(size_of::<ClearPoisonRequest>(), 0x48);

#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct ScanMediaCapabilities {
    pub estimated_runtime_ms: u32,
}

#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct ScanMediaRequest {
    pub window: PoisonWindow,
    /// Bit 0: do not log media errors to the event log.
    pub flags: u8,
}

static_assertions::const_assert_eq!(size_of::<ScanMediaRequest>(), 17);

#[bitfield(u8)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, PartialEq, Eq)]
pub struct ScanMediaResultsFlags {
    pub more_records: bool,
    pub scan_stopped_prematurely: bool,
    #[bits(6)]
    _reserved: u8,
}

/// Get Scan Media Results output header, followed by
/// [`MediaErrorRecord`]s.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct ScanMediaResultsHeader {
    pub restart_address: u64,
    pub restart_length: u64,
    pub flags: ScanMediaResultsFlags,
    pub _reserved1: u8,
    pub count: u16,
    pub _reserved2: [u8; 0xc],
}

static_assertions::const_assert_eq!(size_of::<ScanMediaResultsHeader>(), 0x20);
