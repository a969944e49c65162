// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Information and status commands.

use super::read_request;
use crate::cci::Cci;
use crate::cci::CommandDefinition;
use crate::cci::Completion;
use crate::cci::PayloadLength;
use cxl_spec::CommandEffects;
use cxl_spec::Opcode;
use cxl_spec::ReturnCode;
use cxl_spec::infostat::IdentifyResponse;
use cxl_spec::infostat::MAX_RESPONSE_MESSAGE_LIMIT;
use cxl_spec::infostat::MIN_RESPONSE_MESSAGE_LIMIT;
use cxl_spec::infostat::ResponseMessageLimit;

const IDENTIFY: CommandDefinition = CommandDefinition {
    opcode: Opcode::IDENTIFY,
    name: "identify",
    handler: identify,
    input: PayloadLength::Exact(0),
    effects: CommandEffects::new(),
};

const GET_RESPONSE_MESSAGE_LIMIT: CommandDefinition = CommandDefinition {
    opcode: Opcode::GET_RESPONSE_MESSAGE_LIMIT,
    name: "get response message limit",
    handler: get_response_message_limit,
    input: PayloadLength::Exact(0),
    effects: CommandEffects::new(),
};

const SET_RESPONSE_MESSAGE_LIMIT: CommandDefinition = CommandDefinition {
    opcode: Opcode::SET_RESPONSE_MESSAGE_LIMIT,
    name: "set response message limit",
    handler: set_response_message_limit,
    input: PayloadLength::Exact(size_of::<ResponseMessageLimit>()),
    effects: CommandEffects::new().with_immediate_config_change(true),
};

pub(crate) const COMMANDS: &[CommandDefinition] = &[
    IDENTIFY,
    CommandDefinition {
        opcode: Opcode::BACKGROUND_OPERATION_STATUS,
        name: "background operation status",
        handler: background_operation_status,
        input: PayloadLength::Exact(0),
        effects: CommandEffects::new(),
    },
    GET_RESPONSE_MESSAGE_LIMIT,
    SET_RESPONSE_MESSAGE_LIMIT,
    CommandDefinition {
        opcode: Opcode::BACKGROUND_OPERATION_ABORT,
        name: "request background operation abort",
        handler: background_operation_abort,
        input: PayloadLength::Exact(0),
        effects: CommandEffects::new(),
    },
];

pub(crate) const FM_OWNED_LD_COMMANDS: &[CommandDefinition] = &[
    IDENTIFY,
    GET_RESPONSE_MESSAGE_LIMIT,
    SET_RESPONSE_MESSAGE_LIMIT,
];

fn identify(cci: &Cci, _input: &[u8]) -> Result<Completion, ReturnCode> {
    let (identity, component_type) = cci.identity();
    Ok(Completion::with(&IdentifyResponse {
        pcie_vendor_id: identity.vendor_id,
        pcie_device_id: identity.device_id,
        pcie_subsystem_vendor_id: identity.subsystem_vendor_id,
        pcie_subsystem_id: identity.subsystem_id,
        serial_number: identity.serial_number,
        max_message_size: cci.payload_max().trailing_zeros() as u8,
        component_type,
    }))
}

fn background_operation_status(cci: &Cci, _input: &[u8]) -> Result<Completion, ReturnCode> {
    Ok(Completion::with(&cci.background_status()))
}

fn get_response_message_limit(cci: &Cci, _input: &[u8]) -> Result<Completion, ReturnCode> {
    Ok(Completion::with(&ResponseMessageLimit {
        limit: cci.payload_max().trailing_zeros() as u8,
    }))
}

fn set_response_message_limit(cci: &Cci, input: &[u8]) -> Result<Completion, ReturnCode> {
    let request: ResponseMessageLimit = read_request(input)?;
    let limit = request.limit;
    if !(MIN_RESPONSE_MESSAGE_LIMIT..=MAX_RESPONSE_MESSAGE_LIMIT).contains(&limit) {
        return Err(ReturnCode::INVALID_INPUT);
    }
    cci.set_payload_max(1 << limit);
    Ok(Completion::with(&ResponseMessageLimit { limit }))
}

fn background_operation_abort(cci: &Cci, _input: &[u8]) -> Result<Completion, ReturnCode> {
    cci.abort_background()?;
    Ok(Completion::empty())
}
