// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Event records produced by the command engine.

use crate::Uuid;
use crate::dcd::DcExtentRecord;
use bitfield_struct::bitfield;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// Size of every event record.
pub const EVENT_RECORD_SIZE: usize = 0x80;

/// Identifier of dynamic capacity event records.
pub const DYNAMIC_CAPACITY_EVENT_UUID: Uuid = Uuid::from_fields(
    0xca95afa7,
    0xf183,
    0x4018,
    [0x8c, 0x2f, 0x95, 0x26, 0x8e, 0x10, 0x1a, 0x2a],
);

open_enum! {
    pub enum EventLogType: u8 {
        INFORMATIONAL = 0,
        WARNING = 1,
        FAILURE = 2,
        FATAL = 3,
        DYNAMIC_CAPACITY = 4,
    }
}

#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct EventRecordHeader {
    pub id: Uuid,
    pub length: u8,
    pub flags: [u8; 3],
    pub handle: u16,
    pub related_handle: u16,
    pub timestamp: u64,
    pub maintenance_class: u8,
    pub maintenance_subclass: u8,
    pub _reserved: [u8; 0xe],
}

static_assertions::const_assert_eq!(size_of::<EventRecordHeader>(), 0x30);

open_enum! {
    pub enum DcEventType: u8 {
        ADD_CAPACITY = 0,
        RELEASE_CAPACITY = 1,
        FORCED_CAPACITY_RELEASE = 2,
        REGION_CONFIGURATION_UPDATED = 3,
    }
}

#[bitfield(u8)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, PartialEq, Eq)]
pub struct DcEventFlags {
    /// More records of the same operation follow.
    pub more: bool,
    #[bits(7)]
    _reserved: u8,
}

/// Dynamic capacity event record.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct DynamicCapacityEvent {
    pub header: EventRecordHeader,
    pub event_type: DcEventType,
    pub validity_flags: u8,
    pub host_id: u16,
    pub updated_region_id: u8,
    pub flags: DcEventFlags,
    pub _reserved1: [u8; 2],
    pub extent: DcExtentRecord,
    pub _reserved2: [u8; 0x18],
    pub extents_available: u32,
    pub tags_available: u32,
}

static_assertions::const_assert_eq!(size_of::<DynamicCapacityEvent>(), EVENT_RECORD_SIZE);
