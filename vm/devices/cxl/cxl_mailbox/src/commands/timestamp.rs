// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::cci::Cci;
use crate::cci::CommandDefinition;
use crate::cci::Completion;
use crate::cci::PayloadLength;
use cxl_spec::CommandEffects;
use cxl_spec::Opcode;
use cxl_spec::ReturnCode;

pub(crate) const COMMANDS: &[CommandDefinition] = &[
    CommandDefinition {
        opcode: Opcode::GET_TIMESTAMP,
        name: "get timestamp",
        handler: get_timestamp,
        input: PayloadLength::Exact(0),
        effects: CommandEffects::new(),
    },
    CommandDefinition {
        opcode: Opcode::SET_TIMESTAMP,
        name: "set timestamp",
        handler: set_timestamp,
        input: PayloadLength::Exact(8),
        effects: CommandEffects::new().with_immediate_policy_change(true),
    },
];

fn get_timestamp(cci: &Cci, _input: &[u8]) -> Result<Completion, ReturnCode> {
    Ok(Completion::Done(cci.timestamp().get().to_le_bytes().to_vec()))
}

fn set_timestamp(cci: &Cci, input: &[u8]) -> Result<Completion, ReturnCode> {
    let value: [u8; 8] = input
        .try_into()
        .map_err(|_| ReturnCode::INVALID_PAYLOAD_LENGTH)?;
    cci.timestamp().set(u64::from_le_bytes(value));
    Ok(Completion::empty())
}
