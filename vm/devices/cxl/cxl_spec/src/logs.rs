// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Logs command set (0x04).

use crate::CommandEffects;
use crate::Opcode;
use crate::Uuid;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// Identifier of the Command Effects Log.
pub const CEL_UUID: Uuid = Uuid::from_fields(
    0x0da9c0b5,
    0xbf41,
    0x4b78,
    [0x8f, 0x79, 0x96, 0xb1, 0x62, 0x3b, 0x3f, 0x17],
);

#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct SupportedLogsHeader {
    pub entries: u16,
    pub _reserved: [u8; 6],
}

#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct SupportedLogEntry {
    pub uuid: Uuid,
    pub size: u32,
}

static_assertions::const_assert_eq!(size_of::<SupportedLogEntry>(), 20);

/// Get Log input payload.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct GetLogRequest {
    pub uuid: Uuid,
    pub offset: u32,
    pub length: u32,
}

static_assertions::const_assert_eq!(size_of::<GetLogRequest>(), 0x18);

/// One Command Effects Log record.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct CelEntry {
    pub opcode: Opcode,
    pub effects: CommandEffects,
}

static_assertions::const_assert_eq!(size_of::<CelEntry>(), 4);
