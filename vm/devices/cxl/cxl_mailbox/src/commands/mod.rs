// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Command handlers, grouped by command set, and the command tables each
//! kind of CCI is built from.

pub(crate) mod dcd;
pub(crate) mod features;
pub(crate) mod firmware;
pub(crate) mod fmapi;
pub(crate) mod infostat;
pub(crate) mod logs;
pub(crate) mod memdev;
pub(crate) mod poison;
pub(crate) mod switch;
pub(crate) mod timestamp;
pub(crate) mod tunnel;

use crate::cci::Cci;
use cxl_spec::ReturnCode;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// Parses a fixed-size request from the start of the payload.
pub(crate) fn read_request<T: FromBytes + KnownLayout + Immutable>(
    input: &[u8],
) -> Result<T, ReturnCode> {
    split_request(input).map(|(request, _)| request)
}

/// Parses a fixed-size header and returns it with the bytes that follow.
pub(crate) fn split_request<T: FromBytes + KnownLayout + Immutable>(
    input: &[u8],
) -> Result<(T, &[u8]), ReturnCode> {
    T::read_from_prefix(input).map_err(|_| ReturnCode::INVALID_PAYLOAD_LENGTH)
}

/// Parses `count` consecutive records.
pub(crate) fn read_records<T: FromBytes + KnownLayout + Immutable>(
    input: &[u8],
    count: usize,
) -> Result<Vec<T>, ReturnCode> {
    let len = count
        .checked_mul(size_of::<T>())
        .ok_or(ReturnCode::INVALID_PAYLOAD_LENGTH)?;
    let bytes = input.get(..len).ok_or(ReturnCode::INVALID_PAYLOAD_LENGTH)?;
    bytes
        .chunks_exact(size_of::<T>())
        .map(|chunk| T::read_from_bytes(chunk).map_err(|_| ReturnCode::INVALID_PAYLOAD_LENGTH))
        .collect()
}

/// Concatenates a response header and its records.
pub(crate) fn with_records<H, R>(header: &H, records: &[R]) -> Vec<u8>
where
    H: IntoBytes + Immutable,
    R: IntoBytes + Immutable,
{
    let mut out = header.as_bytes().to_vec();
    out.extend_from_slice(records.as_bytes());
    out
}

/// Maps a collaborator failure to a return code.
pub(crate) fn internal_error(err: anyhow::Error) -> ReturnCode {
    tracing::warn!(
        error = err.as_ref() as &dyn std::error::Error,
        "device backend failed"
    );
    ReturnCode::INTERNAL_ERROR
}

/// Commands every CCI answers.
pub(crate) fn register_generic(cci: &Cci) {
    cci.register(infostat::COMMANDS);
    cci.register(timestamp::COMMANDS);
    cci.register(logs::COMMANDS);
}

/// The memory device command sets of the primary mailbox.
pub(crate) fn register_type3(cci: &Cci) {
    cci.register(firmware::COMMANDS);
    cci.register(features::COMMANDS);
    cci.register(memdev::COMMANDS);
    cci.register(poison::COMMANDS);
}

pub(crate) fn register_dynamic_capacity(cci: &Cci) {
    cci.register(dcd::COMMANDS);
}

pub(crate) fn register_logical_device(cci: &Cci) {
    register_generic(cci);
    cci.register(memdev::LOGICAL_DEVICE_COMMANDS);
}

pub(crate) fn register_fm_owned_ld(cci: &Cci) {
    cci.register(infostat::FM_OWNED_LD_COMMANDS);
    cci.register(timestamp::COMMANDS);
    cci.register(logs::COMMANDS);
    cci.register(tunnel::COMMANDS);
    cci.register(fmapi::COMMANDS);
}

pub(crate) fn register_switch(cci: &Cci) {
    register_generic(cci);
    cci.register(switch::COMMANDS);
    cci.register(tunnel::COMMANDS);
}
