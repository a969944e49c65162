// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Log commands. The only log is the Command Effects Log.

use super::read_request;
use super::with_records;
use crate::cci::Cci;
use crate::cci::CommandDefinition;
use crate::cci::Completion;
use crate::cci::PayloadLength;
use cxl_spec::CommandEffects;
use cxl_spec::Opcode;
use cxl_spec::ReturnCode;
use cxl_spec::logs::CEL_UUID;
use cxl_spec::logs::CelEntry;
use cxl_spec::logs::GetLogRequest;
use cxl_spec::logs::SupportedLogEntry;
use cxl_spec::logs::SupportedLogsHeader;
use zerocopy::IntoBytes;

pub(crate) const COMMANDS: &[CommandDefinition] = &[
    CommandDefinition {
        opcode: Opcode::GET_SUPPORTED_LOGS,
        name: "get supported logs",
        handler: get_supported_logs,
        input: PayloadLength::Exact(0),
        effects: CommandEffects::new(),
    },
    CommandDefinition {
        opcode: Opcode::GET_LOG,
        name: "get log",
        handler: get_log,
        input: PayloadLength::Exact(size_of::<GetLogRequest>()),
        effects: CommandEffects::new(),
    },
];

fn get_supported_logs(cci: &Cci, _input: &[u8]) -> Result<Completion, ReturnCode> {
    let cel_size = cci.command_effects_log().len() * size_of::<CelEntry>();
    Ok(Completion::Done(with_records(
        &SupportedLogsHeader {
            entries: 1,
            _reserved: [0; 6],
        },
        &[SupportedLogEntry {
            uuid: CEL_UUID,
            size: cel_size as u32,
        }],
    )))
}

fn get_log(cci: &Cci, input: &[u8]) -> Result<Completion, ReturnCode> {
    let request: GetLogRequest = read_request(input)?;
    let uuid = request.uuid;
    let offset = request.offset as usize;
    let length = request.length as usize;

    if length > cci.payload_max() {
        return Err(ReturnCode::INVALID_INPUT);
    }
    if uuid != CEL_UUID {
        tracing::debug!(%uuid, "unknown log");
        return Err(ReturnCode::INVALID_LOG);
    }
    let cel = cci.command_effects_log();
    let data = cel
        .as_bytes()
        .get(offset..offset.saturating_add(length))
        .ok_or(ReturnCode::INVALID_INPUT)?;
    Ok(Completion::Done(data.to_vec()))
}
