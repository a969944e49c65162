// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Memory device command sets (0x40 through 0x45), excluding poison.

use bitfield_struct::bitfield;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// Identify Memory Device output payload.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct IdentifyMemoryDevice {
    pub fw_revision: [u8; 16],
    /// In units of [`crate::CAPACITY_MULTIPLIER`].
    pub total_capacity: u64,
    pub volatile_capacity: u64,
    pub persistent_capacity: u64,
    pub partition_align: u64,
    pub info_event_log_size: u16,
    pub warning_event_log_size: u16,
    pub failure_event_log_size: u16,
    pub fatal_event_log_size: u16,
    pub lsa_size: u32,
    /// 24-bit maximum number of poison records.
    pub poison_list_max: [u8; 3],
    pub inject_poison_limit: u16,
    pub poison_caps: u8,
    pub qos_telemetry_caps: u8,
    pub dc_event_log_size: u16,
}

static_assertions::const_assert_eq!(size_of::<IdentifyMemoryDevice>(), 0x45);

/// Get Partition Info output payload, in capacity units.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct PartitionInfo {
    pub active_volatile: u64,
    pub active_persistent: u64,
    pub next_volatile: u64,
    pub next_persistent: u64,
}

static_assertions::const_assert_eq!(size_of::<PartitionInfo>(), 32);

#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct GetLsaRequest {
    pub offset: u32,
    pub length: u32,
}

/// Set LSA input header, followed by the data to write.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct SetLsaHeader {
    pub offset: u32,
    pub _reserved: u32,
}

#[bitfield(u8)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, PartialEq, Eq)]
pub struct AlertFlags {
    pub life_used_warning: bool,
    pub over_temperature_warning: bool,
    pub under_temperature_warning: bool,
    pub corrected_volatile_error_warning: bool,
    pub corrected_persistent_error_warning: bool,
    #[bits(3)]
    _reserved: u8,
}

/// Get Alert Configuration output payload.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct AlertConfig {
    pub valid_alerts: AlertFlags,
    pub enabled_alerts: AlertFlags,
    pub life_used_critical_threshold: u8,
    pub life_used_warning_threshold: u8,
    pub over_temperature_critical_threshold: u16,
    pub under_temperature_critical_threshold: u16,
    pub over_temperature_warning_threshold: u16,
    pub under_temperature_warning_threshold: u16,
    pub corrected_volatile_error_warning_threshold: u16,
    pub corrected_persistent_error_warning_threshold: u16,
}

static_assertions::const_assert_eq!(size_of::<AlertConfig>(), 0x10);

/// Set Alert Configuration input payload.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct SetAlertConfigRequest {
    pub valid_alert_actions: AlertFlags,
    pub enable_alert_actions: AlertFlags,
    pub life_used_warning_threshold: u8,
    pub _reserved: u8,
    pub over_temperature_warning_threshold: u16,
    pub under_temperature_warning_threshold: u16,
    pub corrected_volatile_error_warning_threshold: u16,
    pub corrected_persistent_error_warning_threshold: u16,
}

static_assertions::const_assert_eq!(size_of::<SetAlertConfigRequest>(), 0xc);

open_enum! {
    pub enum MediaOperationClass: u8 {
        GENERAL = 0,
        SANITIZE = 1,
    }
}

open_enum! {
    /// Subclasses of [`MediaOperationClass::GENERAL`].
    pub enum GeneralSubclass: u8 {
        DISCOVERY = 0,
    }
}

open_enum! {
    /// Subclasses of [`MediaOperationClass::SANITIZE`].
    pub enum SanitizeSubclass: u8 {
        SANITIZE = 0,
        ZERO = 1,
    }
}

/// Media Operations input header, followed by DPA ranges or discovery
/// arguments.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct MediaOperationsHeader {
    pub class: MediaOperationClass,
    pub subclass: u8,
    pub _reserved: [u8; 2],
    pub dpa_range_count: u32,
}

#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct DpaRange {
    pub start: u64,
    pub length: u64,
}

#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct MediaOperationsDiscoveryRequest {
    pub start_index: u16,
    pub count: u16,
}

#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct MediaOperationsDiscoveryHeader {
    pub dpa_range_granularity: u64,
    pub total_supported: u16,
    pub returned: u16,
}

static_assertions::const_assert_eq!(size_of::<MediaOperationsDiscoveryHeader>(), 12);

#[repr(C, packed)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct MediaOperation {
    pub class: MediaOperationClass,
    pub subclass: u8,
}
