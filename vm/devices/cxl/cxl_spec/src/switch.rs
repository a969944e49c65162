// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Physical switch command set (0x51).

use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// Identify Switch Device output payload.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct IdentifySwitchResponse {
    pub ingress_port_id: u8,
    pub _reserved: u8,
    pub physical_port_count: u8,
    pub vcs_count: u8,
    pub active_port_mask: [u8; 0x20],
    pub active_vcs_mask: [u8; 0x20],
    pub total_vppbs: u16,
    pub bound_vppbs: u16,
    pub hdm_decoders_per_usp: u8,
}

static_assertions::const_assert_eq!(size_of::<IdentifySwitchResponse>(), 0x49);

/// Get Physical Port State input header, followed by one port id per
/// requested port.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct PortStateRequestHeader {
    pub port_count: u8,
}

/// Get Physical Port State output header, followed by [`PortStateInfo`]s.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct PortStateResponseHeader {
    pub port_count: u8,
    pub _reserved: [u8; 3],
}

open_enum! {
    pub enum PortConfigState: u8 {
        DISABLED = 0,
        BIND_IN_PROGRESS = 1,
        UNBIND_IN_PROGRESS = 2,
        DOWNSTREAM_PORT = 3,
        UPSTREAM_PORT = 4,
    }
}

open_enum! {
    pub enum ConnectedDeviceType: u8 {
        NONE = 0,
        PCIE = 1,
        TYPE1 = 2,
        TYPE2 = 3,
        TYPE3_SLD = 4,
        TYPE3_MLD = 5,
    }
}

#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct PortStateInfo {
    pub port_id: u8,
    pub config_state: PortConfigState,
    pub connected_device_cxl_version: u8,
    pub _reserved: u8,
    pub connected_device_type: ConnectedDeviceType,
    pub port_cxl_version_mask: u8,
    pub max_link_width: u8,
    pub negotiated_link_width: u8,
    pub supported_link_speeds: u8,
    pub max_link_speed: u8,
    pub current_link_speed: u8,
    pub ltssm_state: u8,
    pub first_lane: u8,
    pub link_state: u16,
    pub supported_ld_count: u8,
}

static_assertions::const_assert_eq!(size_of::<PortStateInfo>(), 16);
