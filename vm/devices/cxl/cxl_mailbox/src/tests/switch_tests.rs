// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::CxlSwitch;
use crate::DeviceError;
use crate::tests::mocks::TestDevice;
use crate::tests::mocks::TestPlatform;
use crate::tests::mocks::cci_message;
use crate::tests::mocks::new_device;
use crate::tests::mocks::send;
use crate::tests::mocks::tunnel_request;
use crate::tests::mocks::tunnel_response;
use cxl_resources::ConfigError;
use cxl_resources::SwitchConfig;
use cxl_resources::SwitchPortConfig;
use cxl_resources::Type3DeviceConfig;
use cxl_spec::ComponentType;
use cxl_spec::Opcode;
use cxl_spec::ReturnCode;
use cxl_spec::fmapi::DcdInfo;
use cxl_spec::infostat::IdentifyResponse;
use cxl_spec::memdev::IdentifyMemoryDevice;
use cxl_spec::switch::ConnectedDeviceType;
use cxl_spec::switch::IdentifySwitchResponse;
use cxl_spec::switch::PortConfigState;
use cxl_spec::switch::PortStateInfo;
use cxl_spec::switch::PortStateResponseHeader;
use zerocopy::FromBytes;

/// A switch with downstream ports 1 to 3: a single logical device below
/// port 1, a two-LD device below port 2, and nothing below port 3.
struct TestFabric {
    switch: CxlSwitch,
    _devices: Vec<TestDevice>,
}

fn fabric() -> TestFabric {
    let config = SwitchConfig::default()
        .with_downstream_port(SwitchPortConfig::new(1))
        .with_downstream_port(SwitchPortConfig::new(2))
        .with_downstream_port(SwitchPortConfig::new(3));
    let platform = TestPlatform::default();
    let switch = CxlSwitch::new(&config, platform.cci()).unwrap();

    let sld = new_device(Type3DeviceConfig::default());
    let mld = new_device(Type3DeviceConfig::default().with_logical_devices(2, 1));
    switch.connect_device(1, &sld.device).unwrap();
    switch.connect_device(2, &mld.device).unwrap();
    TestFabric {
        switch,
        _devices: vec![sld, mld],
    }
}

fn port_state_request(ports: &[u8]) -> Vec<u8> {
    let mut input = vec![ports.len() as u8];
    input.extend_from_slice(ports);
    input
}

#[test]
fn test_identify_switch() {
    let fabric = fabric();
    let cci = fabric.switch.mailbox();

    let response = send(cci, Opcode::IDENTIFY, &[]);
    assert_eq!(response.return_code, ReturnCode::SUCCESS);
    let id = IdentifyResponse::read_from_bytes(&response.payload).unwrap();
    assert_eq!(id.component_type, ComponentType::SWITCH);
    assert_eq!({ id.pcie_vendor_id }, 0x19e5);
    assert_eq!({ id.pcie_device_id }, 0xa128);

    let response = send(cci, Opcode::IDENTIFY_SWITCH_DEVICE, &[]);
    assert_eq!(response.return_code, ReturnCode::SUCCESS);
    let id = IdentifySwitchResponse::read_from_bytes(&response.payload).unwrap();
    assert_eq!(id.ingress_port_id, 0);
    assert_eq!(id.physical_port_count, 4);
    assert_eq!(id.vcs_count, 1);
    assert_eq!(id.active_port_mask[0], 0b1111);
    assert!(id.active_port_mask[1..].iter().all(|&b| b == 0));
    assert_eq!(id.active_vcs_mask[0], 1);
    assert_eq!({ id.total_vppbs }, 3);
    assert_eq!({ id.bound_vppbs }, 3);
    assert_eq!(id.hdm_decoders_per_usp, 4);

    // Memory device commands are not served by a switch.
    let response = send(cci, Opcode::IDENTIFY_MEMORY_DEVICE, &[]);
    assert_eq!(response.return_code, ReturnCode::UNSUPPORTED);
}

#[test]
fn test_physical_port_state() {
    let fabric = fabric();
    let cci = fabric.switch.mailbox();

    let response = send(
        cci,
        Opcode::GET_PHYSICAL_PORT_STATE,
        &port_state_request(&[0, 1, 2, 3]),
    );
    assert_eq!(response.return_code, ReturnCode::SUCCESS);
    let (header, rest) = PortStateResponseHeader::read_from_prefix(&response.payload).unwrap();
    assert_eq!(header.port_count, 4);
    let ports = <[PortStateInfo]>::ref_from_bytes(rest).unwrap();

    assert_eq!(ports[0].config_state, PortConfigState::UPSTREAM_PORT);
    assert_eq!(ports[0].ltssm_state, 7);

    assert_eq!(ports[1].port_id, 1);
    assert_eq!(ports[1].config_state, PortConfigState::DOWNSTREAM_PORT);
    assert_eq!(ports[1].connected_device_type, ConnectedDeviceType::TYPE3_SLD);
    assert_eq!(ports[1].supported_ld_count, 1);
    assert_eq!(ports[1].negotiated_link_width, 16);
    assert_eq!(ports[1].ltssm_state, 7);

    assert_eq!(ports[2].connected_device_type, ConnectedDeviceType::TYPE3_MLD);
    assert_eq!(ports[2].supported_ld_count, 2);

    assert_eq!(ports[3].connected_device_type, ConnectedDeviceType::NONE);
    assert_eq!(ports[3].negotiated_link_width, 0);
    assert_eq!(ports[3].ltssm_state, 0);
}

#[test]
fn test_physical_port_state_errors() {
    let fabric = fabric();
    let cci = fabric.switch.mailbox();

    let response = send(
        cci,
        Opcode::GET_PHYSICAL_PORT_STATE,
        &port_state_request(&[1, 9]),
    );
    assert_eq!(response.return_code, ReturnCode::INVALID_INPUT);

    let response = send(cci, Opcode::GET_PHYSICAL_PORT_STATE, &[4, 0, 1]);
    assert_eq!(response.return_code, ReturnCode::INVALID_PAYLOAD_LENGTH);

    let response = send(cci, Opcode::GET_PHYSICAL_PORT_STATE, &[]);
    assert_eq!(response.return_code, ReturnCode::INVALID_PAYLOAD_LENGTH);
}

#[test]
fn test_connect_device_errors() {
    let fabric = fabric();
    let dev = new_device(Type3DeviceConfig::default());
    assert!(matches!(
        fabric.switch.connect_device(9, &dev.device),
        Err(DeviceError::UnknownPort(9))
    ));
    assert!(matches!(
        fabric.switch.connect_device(1, &dev.device),
        Err(DeviceError::PortOccupied(1))
    ));
    fabric.switch.connect_device(3, &dev.device).unwrap();
}

#[test]
fn test_duplicate_ports_rejected() {
    let config = SwitchConfig::default().with_downstream_port(SwitchPortConfig::new(0));
    let result = CxlSwitch::new(&config, TestPlatform::default().cci());
    assert!(matches!(
        result,
        Err(DeviceError::Config(ConfigError::DuplicatePort(0)))
    ));
}

#[test]
fn test_tunnel_to_device() {
    let fabric = fabric();
    let cci = fabric.switch.mailbox();

    let input = tunnel_request(1, &cci_message(Opcode::GET_DCD_INFO, 7, &[]));
    let response = send(cci, Opcode::TUNNEL_MANAGEMENT_COMMAND, &input);
    assert_eq!(response.return_code, ReturnCode::SUCCESS);
    let (header, payload) = tunnel_response(&response.payload);
    assert_eq!(header.tag, 7);
    assert_eq!({ header.return_code }, ReturnCode::SUCCESS);
    let info = DcdInfo::read_from_bytes(&payload).unwrap();
    assert_eq!(info.regions_supported, 0);

    // Nothing to reach below an empty port.
    let response = send(cci, Opcode::TUNNEL_MANAGEMENT_COMMAND, &tunnel_request(3, &[]));
    assert_eq!(response.return_code, ReturnCode::INVALID_PAYLOAD_LENGTH);
    let input = tunnel_request(3, &cci_message(Opcode::GET_DCD_INFO, 0, &[]));
    let response = send(cci, Opcode::TUNNEL_MANAGEMENT_COMMAND, &input);
    assert_eq!(response.return_code, ReturnCode::INVALID_INPUT);
}

#[test]
fn test_nested_tunnel_to_logical_device() {
    let fabric = fabric();
    let cci = fabric.switch.mailbox();

    // Switch to the device below port 2, then to its LD 1.
    let inner = tunnel_request(1, &cci_message(Opcode::IDENTIFY_MEMORY_DEVICE, 2, &[]));
    let outer = tunnel_request(
        2,
        &cci_message(Opcode::TUNNEL_MANAGEMENT_COMMAND, 1, &inner),
    );
    let response = send(cci, Opcode::TUNNEL_MANAGEMENT_COMMAND, &outer);
    assert_eq!(response.return_code, ReturnCode::SUCCESS);

    let (header, payload) = tunnel_response(&response.payload);
    assert_eq!(header.tag, 1);
    assert_eq!({ header.return_code }, ReturnCode::SUCCESS);
    let (header, payload) = tunnel_response(&payload);
    assert_eq!(header.tag, 2);
    assert_eq!({ header.return_code }, ReturnCode::SUCCESS);
    let identify = IdentifyMemoryDevice::read_from_bytes(&payload).unwrap();
    assert_eq!({ identify.volatile_capacity }, 1);
}
