// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A CXL switch and its mailbox.
//!
//! The switch mailbox answers the physical switch command set and tunnels
//! commands to the FM-owned logical device of the Type-3 device connected
//! below a downstream port.

use crate::DeviceError;
use crate::cci::Cci;
use crate::cci::CciTarget;
use crate::commands;
use crate::device::Type3Device;
use crate::device::Type3State;
use crate::platform::CciPlatform;
use crate::timestamp::Timestamp;
use cxl_resources::ComponentIdentity;
use cxl_resources::SwitchConfig;
use cxl_resources::SwitchPortConfig;
use cxl_spec::switch::ConnectedDeviceType;
use cxl_spec::switch::PortConfigState;
use cxl_spec::switch::PortStateInfo;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// LTSSM state reported for a trained link.
const LTSSM_L0: u8 = 7;
/// CXL 1.1 and 2.0.
const PORT_CXL_VERSIONS: u8 = 0b11;
const CONNECTED_CXL_VERSION: u8 = 2;
const HDM_DECODERS_PER_USP: u8 = 4;

/// A Type-3 device connected below a downstream port.
struct Connected {
    state: Arc<Type3State>,
    fm_owned_ld: Arc<Cci>,
}

struct DownstreamPort {
    config: SwitchPortConfig,
    device: Option<Connected>,
}

fn link_speeds(max_speed: u8) -> u8 {
    ((1u16 << max_speed.min(8)) - 1) as u8
}

/// State the switch mailbox reports on.
pub(crate) struct SwitchState {
    pub identity: ComponentIdentity,
    pub upstream: SwitchPortConfig,
    downstream: RwLock<BTreeMap<u8, DownstreamPort>>,
    pub timestamp: Timestamp,
}

impl SwitchState {
    /// Physical port count, upstream included.
    pub fn port_count(&self) -> usize {
        1 + self.downstream.read().len()
    }

    /// All physical port numbers.
    pub fn port_numbers(&self) -> Vec<u8> {
        std::iter::once(self.upstream.port_number)
            .chain(self.downstream.read().keys().copied())
            .collect()
    }

    pub fn downstream_count(&self) -> usize {
        self.downstream.read().len()
    }

    /// The FM-owned LD CCI of the device below `port`.
    pub fn attached_cci(&self, port: u8) -> Option<Arc<Cci>> {
        self.downstream
            .read()
            .get(&port)?
            .device
            .as_ref()
            .map(|device| device.fm_owned_ld.clone())
    }

    pub fn port_state(&self, port: u8) -> Option<PortStateInfo> {
        if port == self.upstream.port_number {
            let config = &self.upstream;
            return Some(PortStateInfo {
                port_id: port,
                config_state: PortConfigState::UPSTREAM_PORT,
                connected_device_cxl_version: 0,
                _reserved: 0,
                connected_device_type: ConnectedDeviceType::NONE,
                port_cxl_version_mask: PORT_CXL_VERSIONS,
                max_link_width: config.max_link_width,
                negotiated_link_width: config.max_link_width,
                supported_link_speeds: link_speeds(config.max_link_speed),
                max_link_speed: config.max_link_speed,
                current_link_speed: config.max_link_speed,
                ltssm_state: LTSSM_L0,
                first_lane: 0,
                link_state: 0,
                supported_ld_count: 0,
            });
        }

        let downstream = self.downstream.read();
        let DownstreamPort { config, device } = downstream.get(&port)?;
        let (device_type, ld_count) = match device {
            Some(connected) if connected.state.logical_devices > 1 => (
                ConnectedDeviceType::TYPE3_MLD,
                connected.state.logical_devices,
            ),
            Some(_) => (ConnectedDeviceType::TYPE3_SLD, 1),
            None => (ConnectedDeviceType::NONE, 0),
        };
        let linked = device.is_some();
        Some(PortStateInfo {
            port_id: port,
            config_state: PortConfigState::DOWNSTREAM_PORT,
            connected_device_cxl_version: if linked { CONNECTED_CXL_VERSION } else { 0 },
            _reserved: 0,
            connected_device_type: device_type,
            port_cxl_version_mask: PORT_CXL_VERSIONS,
            max_link_width: config.max_link_width,
            negotiated_link_width: if linked { config.max_link_width } else { 0 },
            supported_link_speeds: link_speeds(config.max_link_speed),
            max_link_speed: config.max_link_speed,
            current_link_speed: if linked { config.max_link_speed } else { 0 },
            ltssm_state: if linked { LTSSM_L0 } else { 0 },
            first_lane: 0,
            link_state: 0,
            supported_ld_count: ld_count,
        })
    }

    pub fn hdm_decoders_per_usp(&self) -> u8 {
        HDM_DECODERS_PER_USP
    }
}

/// An emulated CXL switch with one virtual CXL switch.
pub struct CxlSwitch {
    state: Arc<SwitchState>,
    mailbox: Arc<Cci>,
}

impl CxlSwitch {
    /// Builds a switch with nothing connected below it.
    pub fn new(config: &SwitchConfig, platform: CciPlatform) -> Result<Self, DeviceError> {
        config.validate()?;
        let downstream = config
            .downstream_ports
            .iter()
            .map(|port| {
                (
                    port.port_number,
                    DownstreamPort {
                        config: port.clone(),
                        device: None,
                    },
                )
            })
            .collect();
        let state = Arc::new(SwitchState {
            identity: config.identity.clone(),
            upstream: config.upstream_port.clone(),
            downstream: RwLock::new(downstream),
            timestamp: Timestamp::new(platform.clock.clone()),
        });
        let mailbox = Cci::new(
            "switch",
            CciTarget::Switch(state.clone()),
            Vec::new(),
            &platform,
            config.mailbox_vector,
        );
        commands::register_switch(&mailbox);

        tracing::info!(
            serial = config.identity.serial_number,
            downstream_ports = config.downstream_ports.len(),
            "cxl switch created"
        );
        Ok(Self { state, mailbox })
    }

    /// Connects a Type-3 device below downstream port `port`.
    pub fn connect_device(&self, port: u8, device: &Type3Device) -> Result<(), DeviceError> {
        let mut downstream = self.state.downstream.write();
        let slot = downstream
            .get_mut(&port)
            .ok_or(DeviceError::UnknownPort(port))?;
        if slot.device.is_some() {
            return Err(DeviceError::PortOccupied(port));
        }
        slot.device = Some(Connected {
            state: device.state().clone(),
            fm_owned_ld: device.fm_owned_ld().clone(),
        });
        tracing::info!(port, "type3 device connected");
        Ok(())
    }

    /// The switch mailbox.
    pub fn mailbox(&self) -> &Arc<Cci> {
        &self.mailbox
    }
}
