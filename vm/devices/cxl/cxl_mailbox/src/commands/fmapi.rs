// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Fabric manager commands served by the FM-owned logical device:
//! multi-headed device information and dynamic capacity management.
//!
//! Capacity offers and release requests reach the host as dynamic capacity
//! event records, one per extent, chained with the "more" flag.

use super::dcd::extent_page;
use super::dcd::region_config;
use super::read_records;
use super::read_request;
use super::split_request;
use super::with_records;
use crate::cci::Cci;
use crate::cci::CommandDefinition;
use crate::cci::Completion;
use crate::cci::PayloadLength;
use crate::device::Type3State;
use crate::extent::DcExtent;
use cxl_spec::CAPACITY_MULTIPLIER;
use cxl_spec::CommandEffects;
use cxl_spec::Opcode;
use cxl_spec::ReturnCode;
use cxl_spec::dcd::DcExtentRecord;
use cxl_spec::events::DcEventType;
use cxl_spec::fmapi::DcRegionExtentListHeader;
use cxl_spec::fmapi::DcdInfo;
use cxl_spec::fmapi::ExtentRemovalPolicy;
use cxl_spec::fmapi::ExtentSelectionPolicy;
use cxl_spec::fmapi::GetDcRegionExtentListRequest;
use cxl_spec::fmapi::GetHostDcRegionConfigRequest;
use cxl_spec::fmapi::HostDcRegionConfigHeader;
use cxl_spec::fmapi::InitiateDcAddHeader;
use cxl_spec::fmapi::InitiateDcReleaseHeader;
use cxl_spec::fmapi::MhdInfoHeader;
use cxl_spec::fmapi::MhdInfoRequest;
use cxl_spec::fmapi::SetDcRegionConfigRequest;
use zerocopy::IntoBytes;

pub(crate) const COMMANDS: &[CommandDefinition] = &[
    CommandDefinition {
        opcode: Opcode::GET_MHD_INFO,
        name: "get multi-headed device info",
        handler: get_mhd_info,
        input: PayloadLength::Exact(size_of::<MhdInfoRequest>()),
        effects: CommandEffects::new(),
    },
    CommandDefinition {
        opcode: Opcode::GET_DCD_INFO,
        name: "get dcd info",
        handler: get_dcd_info,
        input: PayloadLength::Exact(0),
        effects: CommandEffects::new(),
    },
    CommandDefinition {
        opcode: Opcode::GET_HOST_DC_REGION_CONFIG,
        name: "get host dc region config",
        handler: get_host_dc_region_config,
        input: PayloadLength::Exact(size_of::<GetHostDcRegionConfigRequest>()),
        effects: CommandEffects::new(),
    },
    CommandDefinition {
        opcode: Opcode::SET_DC_REGION_CONFIG,
        name: "set dc region config",
        handler: set_dc_region_config,
        input: PayloadLength::Exact(size_of::<SetDcRegionConfigRequest>()),
        effects: CommandEffects::new()
            .with_cold_reset_config_change(true)
            .with_conventional_reset_config_change(true)
            .with_cxl_reset_config_change(true)
            .with_immediate_config_change(true)
            .with_immediate_data_change(true),
    },
    CommandDefinition {
        opcode: Opcode::GET_DC_REGION_EXTENT_LIST,
        name: "get dc region extent list",
        handler: get_dc_region_extent_list,
        input: PayloadLength::Exact(size_of::<GetDcRegionExtentListRequest>()),
        effects: CommandEffects::new(),
    },
    CommandDefinition {
        opcode: Opcode::INITIATE_DC_ADD,
        name: "initiate dynamic capacity add",
        handler: initiate_dc_add,
        input: PayloadLength::Variable,
        effects: CommandEffects::new().with_immediate_data_change(true),
    },
    CommandDefinition {
        opcode: Opcode::INITIATE_DC_RELEASE,
        name: "initiate dynamic capacity release",
        handler: initiate_dc_release,
        input: PayloadLength::Variable,
        effects: CommandEffects::new().with_immediate_data_change(true),
    },
];

fn get_mhd_info(cci: &Cci, input: &[u8]) -> Result<Completion, ReturnCode> {
    let request: MhdInfoRequest = read_request(input)?;
    let state = cci.type3()?;
    let (start, length) = (request.start_ld, request.ld_map_length);
    if u16::from(start) + u16::from(length) > u16::from(state.logical_devices) {
        return Err(ReturnCode::INVALID_INPUT);
    }
    let ld_map: Vec<u8> = (start..start + length)
        .map(|ld| ld % state.heads)
        .collect();
    Ok(Completion::Done(with_records(
        &MhdInfoHeader {
            ld_count: state.logical_devices,
            head_count: state.heads,
            _reserved1: 0,
            start_ld: start,
            ld_map_length: length,
            _reserved2: 0,
        },
        &ld_map,
    )))
}

fn get_dcd_info(cci: &Cci, _input: &[u8]) -> Result<Completion, ReturnCode> {
    let state = cci.type3()?;
    let regions = state.dc.regions();
    let mut region_block_size_masks = [0; 8];
    let mut sanitize_on_release_mask = 0;
    for (index, region) in regions.iter().enumerate() {
        if let Some(mask) = region_block_size_masks.get_mut(index) {
            *mask = region.supported_block_sizes;
        }
        if region.sanitize_on_release {
            sanitize_on_release_mask |= 1 << index;
        }
    }
    Ok(Completion::with(&DcdInfo {
        host_count: 1,
        regions_supported: regions.len() as u8,
        _reserved1: [0; 2],
        add_policy_mask: 1 << ExtentSelectionPolicy::PRESCRIPTIVE.0,
        _reserved2: [0; 2],
        release_policy_mask: 1 << ExtentRemovalPolicy::PRESCRIPTIVE.0,
        sanitize_on_release_mask,
        _reserved3: 0,
        total_dynamic_capacity: state.dc.total_capacity() / CAPACITY_MULTIPLIER,
        region_block_size_masks,
    }))
}

fn get_host_dc_region_config(cci: &Cci, input: &[u8]) -> Result<Completion, ReturnCode> {
    let request: GetHostDcRegionConfigRequest = read_request(input)?;
    let state = cci.type3()?;
    let (records, counts) = region_config(state, request.start_region, request.region_count)?;

    let mut out = HostDcRegionConfigHeader {
        host_id: request.host_id,
        region_count: state.dc.regions().len() as u8,
        regions_returned: records.len() as u8,
    }
    .as_bytes()
    .to_vec();
    out.extend_from_slice(records.as_bytes());
    out.extend_from_slice(counts.as_bytes());
    Ok(Completion::Done(out))
}

fn set_dc_region_config(cci: &Cci, input: &[u8]) -> Result<Completion, ReturnCode> {
    let request: SetDcRegionConfigRequest = read_request(input)?;
    let flags = request.flags;
    let (region_id, block_size) = (request.region_id, request.block_size);
    let state = cci.type3()?;
    let changed = state
        .dc
        .reconfigure(region_id, block_size, flags.sanitize_on_release())?;
    if changed {
        tracing::info!(region_id, block_size, "dynamic capacity region reconfigured");
        state.emit_dc_event(DcEventType::REGION_CONFIGURATION_UPDATED, 0, region_id, None, false);
    }
    Ok(Completion::empty())
}

fn get_dc_region_extent_list(cci: &Cci, input: &[u8]) -> Result<Completion, ReturnCode> {
    let request: GetDcRegionExtentListRequest = read_request(input)?;
    let state = cci.type3()?;
    let region = state
        .dc
        .regions()
        .get(request.region_id as usize)
        .ok_or(ReturnCode::INVALID_INPUT)?;
    let extents: Vec<_> = state
        .dc
        .accepted()
        .into_iter()
        .filter(|extent| region.contains(extent.start, extent.length))
        .collect();
    let room = (cci.payload_max() - size_of::<DcRegionExtentListHeader>())
        / size_of::<DcExtentRecord>();
    let start_index = request.start_index;
    let records = extent_page(&extents, start_index as usize, request.count as usize, room)?;

    Ok(Completion::Done(with_records(
        &DcRegionExtentListHeader {
            host_id: request.host_id,
            region_id: request.region_id,
            _reserved1: 0,
            start_index,
            returned: records.len() as u32,
            total_extents: extents.len() as u32,
            generation: state.dc.generation(),
            _reserved2: [0; 4],
        },
        &records,
    )))
}

/// Parses the extent records after an initiate add or release header.
fn requested_extents(input: &[u8], count: u32) -> Result<Vec<DcExtent>, ReturnCode> {
    let records = read_records::<DcExtentRecord>(input, count as usize)?;
    Ok(records
        .iter()
        .map(|record| DcExtent {
            start: record.start,
            length: record.length,
            tag: record.tag,
            shared_sequence: record.shared_sequence,
        })
        .collect())
}

fn notify_host(
    state: &Type3State,
    event_type: DcEventType,
    host_id: u16,
    region_id: u8,
    extents: &[DcExtent],
) {
    for (index, extent) in extents.iter().enumerate() {
        let more = index + 1 < extents.len();
        state.emit_dc_event(event_type, host_id, region_id, Some(*extent), more);
    }
}

fn initiate_dc_add(cci: &Cci, input: &[u8]) -> Result<Completion, ReturnCode> {
    let (header, rest) = split_request::<InitiateDcAddHeader>(input)?;
    let policy = header.selection_policy;
    let (host_id, region_id, count) = (header.host_id, header.region_id, header.extent_count);
    if policy != ExtentSelectionPolicy::PRESCRIPTIVE {
        tracing::debug!(?policy, "unsupported extent selection policy");
        return Err(ReturnCode::UNSUPPORTED);
    }
    let state = cci.type3()?;
    if region_id as usize >= state.dc.regions().len() || count == 0 {
        return Err(ReturnCode::INVALID_INPUT);
    }
    if count as usize > state.dc.available() {
        return Err(ReturnCode::RESOURCES_EXHAUSTED);
    }

    let extents = requested_extents(rest, count)?;
    state.dc.offer(extents.clone())?;
    tracing::info!(host_id, region_id, extents = extents.len(), "dynamic capacity offered");
    notify_host(state, DcEventType::ADD_CAPACITY, host_id, region_id, &extents);
    Ok(Completion::empty())
}

fn initiate_dc_release(cci: &Cci, input: &[u8]) -> Result<Completion, ReturnCode> {
    let (header, rest) = split_request::<InitiateDcReleaseHeader>(input)?;
    let flags = header.flags;
    let (host_id, region_id, count) = (header.host_id, header.region_id, header.extent_count);
    if flags.removal_policy() != ExtentRemovalPolicy::PRESCRIPTIVE.0 {
        tracing::debug!(policy = flags.removal_policy(), "unsupported extent removal policy");
        return Err(ReturnCode::UNSUPPORTED);
    }
    let state = cci.type3()?;
    if region_id as usize >= state.dc.regions().len() || count == 0 {
        return Err(ReturnCode::INVALID_INPUT);
    }

    let ranges: Vec<_> = requested_extents(rest, count)?
        .iter()
        .map(|extent| (extent.start, extent.length))
        .collect();
    if flags.forced() {
        let released = state.dc.release(&ranges)?;
        tracing::info!(host_id, region_id, extents = released.len(), "dynamic capacity force released");
        notify_host(state, DcEventType::FORCED_CAPACITY_RELEASE, host_id, region_id, &released);
    } else {
        let requested = state.dc.check_release(&ranges)?;
        tracing::info!(host_id, region_id, extents = requested.len(), "dynamic capacity release requested");
        notify_host(state, DcEventType::RELEASE_CAPACITY, host_id, region_id, &requested);
    }
    Ok(Completion::empty())
}
