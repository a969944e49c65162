// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Dynamic capacity commands issued by the host.

use super::read_records;
use super::read_request;
use super::split_request;
use crate::cci::Cci;
use crate::cci::CommandDefinition;
use crate::cci::Completion;
use crate::cci::PayloadLength;
use crate::device::Type3State;
use crate::extent::DcExtent;
use cxl_spec::CommandEffects;
use cxl_spec::Opcode;
use cxl_spec::ReturnCode;
use cxl_spec::dcd::DcConfigHeader;
use cxl_spec::dcd::DcExtentCounts;
use cxl_spec::dcd::DcExtentRecord;
use cxl_spec::dcd::DcRegionRecord;
use cxl_spec::dcd::ExtentListHeader;
use cxl_spec::dcd::GetDcConfigRequest;
use cxl_spec::dcd::GetExtentListRequest;
use cxl_spec::dcd::MAX_EXTENTS;
use cxl_spec::dcd::UpdateExtentListHeader;
use cxl_spec::dcd::UpdatedExtent;
use zerocopy::IntoBytes;

pub(crate) const COMMANDS: &[CommandDefinition] = &[
    CommandDefinition {
        opcode: Opcode::GET_DC_CONFIG,
        name: "get dynamic capacity config",
        handler: get_dc_config,
        input: PayloadLength::Exact(size_of::<GetDcConfigRequest>()),
        effects: CommandEffects::new(),
    },
    CommandDefinition {
        opcode: Opcode::GET_DC_EXTENT_LIST,
        name: "get dynamic capacity extent list",
        handler: get_dc_extent_list,
        input: PayloadLength::Exact(size_of::<GetExtentListRequest>()),
        effects: CommandEffects::new(),
    },
    CommandDefinition {
        opcode: Opcode::ADD_DC_RESPONSE,
        name: "add dynamic capacity response",
        handler: add_dc_response,
        input: PayloadLength::Variable,
        effects: CommandEffects::new().with_immediate_data_change(true),
    },
    CommandDefinition {
        opcode: Opcode::RELEASE_DC,
        name: "release dynamic capacity",
        handler: release_dc,
        input: PayloadLength::Variable,
        effects: CommandEffects::new().with_immediate_data_change(true),
    },
];

/// Region records starting at `start`, followed by the extent counts.
/// Shared with the fabric manager's view of a host's regions.
pub(super) fn region_config(
    state: &Type3State,
    start: u8,
    count: u8,
) -> Result<(Vec<DcRegionRecord>, DcExtentCounts), ReturnCode> {
    let regions = state
        .dc
        .regions()
        .get(start as usize..)
        .filter(|regions| !regions.is_empty())
        .ok_or(ReturnCode::INVALID_INPUT)?;
    let records = regions
        .iter()
        .take(count as usize)
        .map(|region| region.record())
        .collect();
    let counts = DcExtentCounts {
        extents_supported: MAX_EXTENTS as u32,
        extents_available: state.dc.available() as u32,
        tags_supported: 0,
        tags_available: 0,
    };
    Ok((records, counts))
}

/// Extent records for a page of `extents`, bounded by the request, the
/// list, and the space left in the response.
pub(super) fn extent_page(
    extents: &[DcExtent],
    start: usize,
    count: usize,
    room: usize,
) -> Result<Vec<DcExtentRecord>, ReturnCode> {
    let rest = extents.get(start..).ok_or(ReturnCode::INVALID_INPUT)?;
    Ok(rest
        .iter()
        .take(count.min(room))
        .map(|extent| extent.to_record())
        .collect())
}

/// Parses the extent list of an add response or release.
fn updated_extents(input: &[u8]) -> Result<Vec<(u64, u64)>, ReturnCode> {
    let (header, rest) = split_request::<UpdateExtentListHeader>(input)?;
    let count = header.count as usize;
    if count > MAX_EXTENTS {
        return Err(ReturnCode::INVALID_INPUT);
    }
    Ok(read_records::<UpdatedExtent>(rest, count)?
        .iter()
        .map(|extent| (extent.start, extent.length))
        .collect())
}

fn get_dc_config(cci: &Cci, input: &[u8]) -> Result<Completion, ReturnCode> {
    let request: GetDcConfigRequest = read_request(input)?;
    let state = cci.type3()?;
    let (records, counts) = region_config(state, request.start_region, request.region_count)?;

    let mut out = DcConfigHeader {
        available_regions: state.dc.regions().len() as u8,
        regions_returned: records.len() as u8,
        _reserved: [0; 6],
    }
    .as_bytes()
    .to_vec();
    out.extend_from_slice(records.as_bytes());
    out.extend_from_slice(counts.as_bytes());
    Ok(Completion::Done(out))
}

fn get_dc_extent_list(cci: &Cci, input: &[u8]) -> Result<Completion, ReturnCode> {
    let request: GetExtentListRequest = read_request(input)?;
    let state = cci.type3()?;
    let accepted = state.dc.accepted();
    let room = (cci.payload_max() - size_of::<ExtentListHeader>()) / size_of::<DcExtentRecord>();
    let records = extent_page(
        &accepted,
        request.start_index as usize,
        request.count as usize,
        room,
    )?;

    let mut out = ExtentListHeader {
        count: records.len() as u32,
        total_extents: accepted.len() as u32,
        generation: state.dc.generation(),
        _reserved: [0; 4],
    }
    .as_bytes()
    .to_vec();
    out.extend_from_slice(records.as_bytes());
    Ok(Completion::Done(out))
}

fn add_dc_response(cci: &Cci, input: &[u8]) -> Result<Completion, ReturnCode> {
    let ranges = updated_extents(input)?;
    let state = cci.type3()?;
    let accepted = state.dc.accept(&ranges).map_err(|err| {
        tracing::debug!(error = &err as &dyn std::error::Error, "add response rejected");
        err
    })?;
    tracing::debug!(accepted = accepted.len(), "host accepted dynamic capacity");
    Ok(Completion::empty())
}

fn release_dc(cci: &Cci, input: &[u8]) -> Result<Completion, ReturnCode> {
    let ranges = updated_extents(input)?;
    if ranges.is_empty() {
        return Err(ReturnCode::INVALID_INPUT);
    }
    let state = cci.type3()?;
    let released = state.dc.release(&ranges)?;
    tracing::debug!(released = released.len(), "host released dynamic capacity");
    Ok(Completion::empty())
}
