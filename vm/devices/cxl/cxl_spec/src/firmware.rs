// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Firmware update command set (0x02).

use bitfield_struct::bitfield;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// Number of firmware slots the device implements.
pub const FW_SLOT_COUNT: u8 = 2;
/// Largest firmware package accepted.
pub const FW_MAX_SIZE: u64 = 32 * 1024 * 1024;
/// Unit of the transfer offset field.
pub const FW_TRANSFER_ALIGNMENT: u64 = 128;

open_enum! {
    pub enum FwTransferAction: u8 {
        /// The whole package in one transfer.
        FULL = 0,
        INITIATE = 1,
        CONTINUE = 2,
        END = 3,
        ABORT = 4,
    }
}

open_enum! {
    pub enum FwActivateAction: u8 {
        ONLINE = 0,
        ON_RESET = 1,
    }
}

#[bitfield(u8)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, PartialEq, Eq)]
pub struct FwSlotInfo {
    #[bits(3)]
    pub active_slot: u8,
    #[bits(3)]
    pub staged_slot: u8,
    #[bits(2)]
    _reserved: u8,
}

/// Get FW Info output payload.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct FwInfo {
    pub slots_supported: u8,
    pub slot_info: FwSlotInfo,
    /// Bit 0: online activation supported.
    pub activation_caps: u8,
    pub _reserved: [u8; 13],
    pub revisions: [[u8; 16]; 4],
}

static_assertions::const_assert_eq!(size_of::<FwInfo>(), 0x50);

/// Transfer FW input header, followed by package data.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct FwTransferHeader {
    pub action: FwTransferAction,
    pub slot: u8,
    pub _reserved1: [u8; 2],
    /// Offset in units of [`FW_TRANSFER_ALIGNMENT`].
    pub offset: u32,
    pub _reserved2: [u8; 0x78],
}

static_assertions::const_assert_eq!(size_of::<FwTransferHeader>(), 0x80);

/// Activate FW input payload.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct FwActivate {
    pub action: FwActivateAction,
    pub slot: u8,
}
