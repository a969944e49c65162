// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Information and status command set (0x00).

use crate::ComponentType;
use crate::Opcode;
use crate::ReturnCode;
use bitfield_struct::bitfield;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// Smallest response message limit a host may request, as a power of two.
pub const MIN_RESPONSE_MESSAGE_LIMIT: u8 = 8;
/// Largest response message limit a host may request, as a power of two.
pub const MAX_RESPONSE_MESSAGE_LIMIT: u8 = 10;

/// Identify output payload.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct IdentifyResponse {
    pub pcie_vendor_id: u16,
    pub pcie_device_id: u16,
    pub pcie_subsystem_vendor_id: u16,
    pub pcie_subsystem_id: u16,
    pub serial_number: u64,
    /// log2 of the maximum supported message size.
    pub max_message_size: u8,
    pub component_type: ComponentType,
}

static_assertions::const_assert_eq!(size_of::<IdentifyResponse>(), 18);

#[bitfield(u8)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, PartialEq, Eq)]
pub struct BackgroundStatusFlags {
    pub running: bool,
    #[bits(7)]
    pub percent_complete: u8,
}

/// Background Operation Status output payload.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct BackgroundOperationStatus {
    pub status: BackgroundStatusFlags,
    pub _reserved: u8,
    pub opcode: Opcode,
    pub return_code: ReturnCode,
    pub vendor_extended_status: u16,
}

static_assertions::const_assert_eq!(size_of::<BackgroundOperationStatus>(), 8);

/// Get/Set Response Message Limit payload.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct ResponseMessageLimit {
    /// log2 of the response payload limit.
    pub limit: u8,
}
