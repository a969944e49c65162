// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Physical switch commands.

use super::split_request;
use super::with_records;
use crate::cci::Cci;
use crate::cci::CommandDefinition;
use crate::cci::Completion;
use crate::cci::PayloadLength;
use cxl_spec::CommandEffects;
use cxl_spec::Opcode;
use cxl_spec::ReturnCode;
use cxl_spec::switch::IdentifySwitchResponse;
use cxl_spec::switch::PortStateInfo;
use cxl_spec::switch::PortStateRequestHeader;
use cxl_spec::switch::PortStateResponseHeader;

pub(crate) const COMMANDS: &[CommandDefinition] = &[
    CommandDefinition {
        opcode: Opcode::IDENTIFY_SWITCH_DEVICE,
        name: "identify switch device",
        handler: identify_switch_device,
        input: PayloadLength::Exact(0),
        effects: CommandEffects::new(),
    },
    CommandDefinition {
        opcode: Opcode::GET_PHYSICAL_PORT_STATE,
        name: "get physical port state",
        handler: get_physical_port_state,
        input: PayloadLength::Variable,
        effects: CommandEffects::new(),
    },
];

fn set_bit(mask: &mut [u8; 0x20], bit: u8) {
    mask[(bit / 8) as usize] |= 1 << (bit % 8);
}

fn identify_switch_device(cci: &Cci, _input: &[u8]) -> Result<Completion, ReturnCode> {
    let switch = cci.switch()?;
    let mut active_port_mask = [0; 0x20];
    for port in switch.port_numbers() {
        set_bit(&mut active_port_mask, port);
    }
    let mut active_vcs_mask = [0; 0x20];
    set_bit(&mut active_vcs_mask, 0);
    let vppbs = switch.downstream_count() as u16;

    Ok(Completion::with(&IdentifySwitchResponse {
        ingress_port_id: switch.upstream.port_number,
        _reserved: 0,
        physical_port_count: switch.port_count() as u8,
        vcs_count: 1,
        active_port_mask,
        active_vcs_mask,
        total_vppbs: vppbs,
        bound_vppbs: vppbs,
        hdm_decoders_per_usp: switch.hdm_decoders_per_usp(),
    }))
}

fn get_physical_port_state(cci: &Cci, input: &[u8]) -> Result<Completion, ReturnCode> {
    let (header, rest) = split_request::<PortStateRequestHeader>(input)?;
    let count = header.port_count as usize;
    let ports = rest.get(..count).ok_or(ReturnCode::INVALID_PAYLOAD_LENGTH)?;
    let response_len =
        size_of::<PortStateResponseHeader>() + count * size_of::<PortStateInfo>();
    if response_len > cci.payload_max() {
        return Err(ReturnCode::INVALID_INPUT);
    }

    let switch = cci.switch()?;
    let states = ports
        .iter()
        .map(|&port| switch.port_state(port).ok_or(ReturnCode::INVALID_INPUT))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Completion::Done(with_records(
        &PortStateResponseHeader {
            port_count: states.len() as u8,
            _reserved: [0; 3],
        },
        &states,
    )))
}
