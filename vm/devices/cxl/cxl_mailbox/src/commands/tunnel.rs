// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Tunnel Management Command: forwards an embedded CCI request to a nested
//! CCI and wraps its response.
//!
//! The outer command succeeds whenever the nested request could be
//! delivered. The nested result travels in the embedded response header.

use super::split_request;
use crate::cci::Cci;
use crate::cci::CommandDefinition;
use crate::cci::Completion;
use crate::cci::PayloadLength;
use cxl_spec::CciCategory;
use cxl_spec::CciMessageHeader;
use cxl_spec::CommandEffects;
use cxl_spec::Opcode;
use cxl_spec::ReturnCode;
use cxl_spec::fmapi::TunnelRequestHeader;
use cxl_spec::fmapi::TunnelResponseHeader;
use zerocopy::IntoBytes;

/// The only defined target type: address by port or LD id.
const TARGET_PORT_OR_LD: u8 = 0;

pub(crate) const COMMANDS: &[CommandDefinition] = &[CommandDefinition {
    opcode: Opcode::TUNNEL_MANAGEMENT_COMMAND,
    name: "tunnel management command",
    handler: tunnel_management_command,
    input: PayloadLength::Variable,
    effects: CommandEffects::new(),
}];

fn tunnel_management_command(cci: &Cci, input: &[u8]) -> Result<Completion, ReturnCode> {
    let (header, message) = split_request::<TunnelRequestHeader>(input)?;
    let size = header.size as usize;
    if size != message.len() || size < size_of::<CciMessageHeader>() {
        return Err(ReturnCode::INVALID_PAYLOAD_LENGTH);
    }
    let (request, payload) = split_request::<CciMessageHeader>(message)?;
    if request.payload_len() != payload.len() {
        return Err(ReturnCode::INVALID_PAYLOAD_LENGTH);
    }

    let category = request.category;
    if category != CciCategory::REQUEST || header.target_type != TARGET_PORT_OR_LD {
        return Err(ReturnCode::INVALID_INPUT);
    }
    let target_id = header.port_or_ld_id;
    let Some(target) = cci.tunnel_target(target_id) else {
        tracing::debug!(target_id, "no CCI behind tunnel target");
        return Err(ReturnCode::INVALID_INPUT);
    };

    let opcode = request.opcode();
    tracing::debug!(cci = target.name(), ?opcode, "tunneling command");
    let nested = target.process(request.command_set, request.command, payload);

    let mut response = CciMessageHeader {
        category: CciCategory::RESPONSE,
        tag: request.tag,
        _reserved: 0,
        command: request.command,
        command_set: request.command_set,
        payload_length: [0; 3],
        return_code: nested.return_code,
        vendor_specific: 0,
    };
    response.set_payload_len(nested.payload.len());
    let response_length = size_of::<CciMessageHeader>() + nested.payload.len();

    let mut out = TunnelResponseHeader {
        response_length: response_length as u16,
        _reserved: [0; 2],
    }
    .as_bytes()
    .to_vec();
    out.extend_from_slice(response.as_bytes());
    out.extend_from_slice(&nested.payload);
    Ok(Completion::Done(out))
}
