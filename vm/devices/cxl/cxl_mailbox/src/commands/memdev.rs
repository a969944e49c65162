// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Memory device commands: identification, partitioning, the label storage
//! area, health alerts, and sanitize.

use super::internal_error;
use super::read_records;
use super::read_request;
use super::split_request;
use super::with_records;
use crate::background::BackgroundJob;
use crate::background::sanitize_runtime_ms;
use crate::cci::Cci;
use crate::cci::CommandDefinition;
use crate::cci::Completion;
use crate::cci::PayloadLength;
use crate::device::Type3State;
use cxl_spec::CACHE_LINE_SIZE;
use cxl_spec::CAPACITY_MULTIPLIER;
use cxl_spec::CommandEffects;
use cxl_spec::Opcode;
use cxl_spec::ReturnCode;
use cxl_spec::memdev::AlertFlags;
use cxl_spec::memdev::DpaRange;
use cxl_spec::memdev::GeneralSubclass;
use cxl_spec::memdev::GetLsaRequest;
use cxl_spec::memdev::IdentifyMemoryDevice;
use cxl_spec::memdev::MediaOperation;
use cxl_spec::memdev::MediaOperationClass;
use cxl_spec::memdev::MediaOperationsDiscoveryHeader;
use cxl_spec::memdev::MediaOperationsDiscoveryRequest;
use cxl_spec::memdev::MediaOperationsHeader;
use cxl_spec::memdev::PartitionInfo;
use cxl_spec::memdev::SanitizeSubclass;
use cxl_spec::memdev::SetAlertConfigRequest;
use cxl_spec::memdev::SetLsaHeader;
use cxl_spec::poison::POISON_LIST_LIMIT;
use zerocopy::FromZeros;

const FW_REVISION: &[u8] = b"BWFW VERSION 0";
const MEDIA_OPERATION_GRANULARITY: u64 = CACHE_LINE_SIZE;
const SANITIZE_FILL: u8 = 0x0f;
const ZERO_FILL: u8 = 0;

const MEDIA_OPERATIONS: &[MediaOperation] = &[
    MediaOperation {
        class: MediaOperationClass::GENERAL,
        subclass: GeneralSubclass::DISCOVERY.0,
    },
    MediaOperation {
        class: MediaOperationClass::SANITIZE,
        subclass: SanitizeSubclass::SANITIZE.0,
    },
    MediaOperation {
        class: MediaOperationClass::SANITIZE,
        subclass: SanitizeSubclass::ZERO.0,
    },
];

const IDENTIFY_MEMORY_DEVICE: CommandDefinition = CommandDefinition {
    opcode: Opcode::IDENTIFY_MEMORY_DEVICE,
    name: "identify memory device",
    handler: identify_memory_device,
    input: PayloadLength::Exact(0),
    effects: CommandEffects::new(),
};

const GET_PARTITION_INFO: CommandDefinition = CommandDefinition {
    opcode: Opcode::GET_PARTITION_INFO,
    name: "get partition info",
    handler: get_partition_info,
    input: PayloadLength::Exact(0),
    effects: CommandEffects::new(),
};

const MEDIA_EFFECTS: CommandEffects = CommandEffects::new()
    .with_immediate_data_change(true)
    .with_security_state_change(true)
    .with_background_operation(true)
    .with_request_abort_supported(true);

pub(crate) const COMMANDS: &[CommandDefinition] = &[
    IDENTIFY_MEMORY_DEVICE,
    GET_PARTITION_INFO,
    CommandDefinition {
        opcode: Opcode::GET_LSA,
        name: "get lsa",
        handler: get_lsa,
        input: PayloadLength::Exact(size_of::<GetLsaRequest>()),
        effects: CommandEffects::new(),
    },
    CommandDefinition {
        opcode: Opcode::SET_LSA,
        name: "set lsa",
        handler: set_lsa,
        input: PayloadLength::Variable,
        effects: CommandEffects::new()
            .with_immediate_config_change(true)
            .with_immediate_data_change(true),
    },
    CommandDefinition {
        opcode: Opcode::GET_ALERT_CONFIG,
        name: "get alert config",
        handler: get_alert_config,
        input: PayloadLength::Exact(0),
        effects: CommandEffects::new(),
    },
    CommandDefinition {
        opcode: Opcode::SET_ALERT_CONFIG,
        name: "set alert config",
        handler: set_alert_config,
        input: PayloadLength::Exact(size_of::<SetAlertConfigRequest>()),
        effects: CommandEffects::new().with_immediate_policy_change(true),
    },
    CommandDefinition {
        opcode: Opcode::SANITIZE,
        name: "sanitize",
        handler: sanitize,
        input: PayloadLength::Exact(0),
        effects: MEDIA_EFFECTS,
    },
    CommandDefinition {
        opcode: Opcode::MEDIA_OPERATIONS,
        name: "media operations",
        handler: media_operations,
        input: PayloadLength::Variable,
        effects: MEDIA_EFFECTS,
    },
    CommandDefinition {
        opcode: Opcode::GET_SECURITY_STATE,
        name: "get security state",
        handler: get_security_state,
        input: PayloadLength::Exact(0),
        effects: CommandEffects::new(),
    },
];

pub(crate) const LOGICAL_DEVICE_COMMANDS: &[CommandDefinition] =
    &[IDENTIFY_MEMORY_DEVICE, GET_PARTITION_INFO];

/// Converts a static capacity to multiplier units. Static capacity that is
/// not a whole number of units cannot be described to the host.
fn capacity_units(bytes: u64) -> Result<u64, ReturnCode> {
    if bytes % CAPACITY_MULTIPLIER != 0 {
        tracing::warn!(bytes, "capacity is not 256 MiB aligned");
        return Err(ReturnCode::INTERNAL_ERROR);
    }
    Ok(bytes / CAPACITY_MULTIPLIER)
}

fn identify_memory_device(cci: &Cci, _input: &[u8]) -> Result<Completion, ReturnCode> {
    let state = cci.type3()?;
    let volatile = capacity_units(state.volatile_size)?;
    let persistent = capacity_units(state.persistent_size)?;

    let mut id = IdentifyMemoryDevice::new_zeroed();
    id.fw_revision[..FW_REVISION.len()].copy_from_slice(FW_REVISION);
    id.total_capacity = volatile + persistent;
    id.volatile_capacity = volatile;
    id.persistent_capacity = persistent;
    id.lsa_size = state.lsa_size as u32;
    id.poison_list_max = {
        let [a, b, c, _] = (POISON_LIST_LIMIT as u32).to_le_bytes();
        [a, b, c]
    };
    id.dc_event_log_size = 8;
    Ok(Completion::with(&id))
}

fn get_partition_info(cci: &Cci, _input: &[u8]) -> Result<Completion, ReturnCode> {
    let state = cci.type3()?;
    Ok(Completion::with(&PartitionInfo {
        active_volatile: capacity_units(state.volatile_size)?,
        active_persistent: capacity_units(state.persistent_size)?,
        next_volatile: 0,
        next_persistent: 0,
    }))
}

fn get_lsa(cci: &Cci, input: &[u8]) -> Result<Completion, ReturnCode> {
    let request: GetLsaRequest = read_request(input)?;
    let offset = u64::from(request.offset);
    let length = request.length as usize;
    let state = cci.type3()?;
    if offset + length as u64 > state.lsa_size || length > cci.payload_max() {
        return Err(ReturnCode::INVALID_INPUT);
    }
    let mut data = vec![0; length];
    state
        .memory
        .read_lsa(offset, &mut data)
        .map_err(internal_error)?;
    Ok(Completion::Done(data))
}

fn set_lsa(cci: &Cci, input: &[u8]) -> Result<Completion, ReturnCode> {
    let (header, data) = split_request::<SetLsaHeader>(input)?;
    let offset = u64::from(header.offset);
    let state = cci.type3()?;
    if offset + data.len() as u64 > state.lsa_size {
        return Err(ReturnCode::INVALID_INPUT);
    }
    state
        .memory
        .write_lsa(offset, data)
        .map_err(internal_error)?;
    Ok(Completion::empty())
}

fn get_alert_config(cci: &Cci, _input: &[u8]) -> Result<Completion, ReturnCode> {
    let state = cci.type3()?;
    let config = *state.alerts.lock();
    Ok(Completion::with(&config))
}

fn set_alert_config(cci: &Cci, input: &[u8]) -> Result<Completion, ReturnCode> {
    let request: SetAlertConfigRequest = read_request(input)?;
    let valid = request.valid_alert_actions;
    let enable = request.enable_alert_actions;
    let state = cci.type3()?;

    let mut config = state.alerts.lock();
    let mut next = *config;
    if valid.life_used_warning() {
        if request.life_used_warning_threshold >= next.life_used_critical_threshold {
            return Err(ReturnCode::INVALID_INPUT);
        }
        next.life_used_warning_threshold = request.life_used_warning_threshold;
    }
    if valid.over_temperature_warning() {
        let threshold = request.over_temperature_warning_threshold;
        if threshold > next.over_temperature_critical_threshold
            || threshold < next.under_temperature_warning_threshold
        {
            return Err(ReturnCode::INVALID_INPUT);
        }
        next.over_temperature_warning_threshold = threshold;
    }
    if valid.under_temperature_warning() {
        let threshold = request.under_temperature_warning_threshold;
        if threshold < next.under_temperature_critical_threshold
            || threshold > next.over_temperature_warning_threshold
        {
            return Err(ReturnCode::INVALID_INPUT);
        }
        next.under_temperature_warning_threshold = threshold;
    }
    if valid.corrected_volatile_error_warning() {
        next.corrected_volatile_error_warning_threshold =
            request.corrected_volatile_error_warning_threshold;
    }
    if valid.corrected_persistent_error_warning() {
        next.corrected_persistent_error_warning_threshold =
            request.corrected_persistent_error_warning_threshold;
    }

    let (valid, enable) = (valid.into_bits(), enable.into_bits());
    let previously_enabled = next.enabled_alerts.into_bits();
    next.valid_alerts = AlertFlags::from_bits(next.valid_alerts.into_bits() | valid);
    next.enabled_alerts = AlertFlags::from_bits((previously_enabled & !valid) | (enable & valid));
    *config = next;
    Ok(Completion::empty())
}

fn get_security_state(_cci: &Cci, _input: &[u8]) -> Result<Completion, ReturnCode> {
    Ok(Completion::Done(0u32.to_le_bytes().to_vec()))
}

fn sanitize(cci: &Cci, _input: &[u8]) -> Result<Completion, ReturnCode> {
    let state = cci.type3()?;
    state.disable_media();
    Ok(Completion::Background {
        job: BackgroundJob::Sanitize,
        runtime_ms: sanitize_runtime_ms(state.total_size()),
    })
}

fn media_operations(cci: &Cci, input: &[u8]) -> Result<Completion, ReturnCode> {
    let (header, rest) = split_request::<MediaOperationsHeader>(input)?;
    let class = header.class;
    let subclass = header.subclass;
    let range_count = header.dpa_range_count as usize;

    match class {
        MediaOperationClass::GENERAL if subclass == GeneralSubclass::DISCOVERY.0 => {
            if range_count != 0 {
                return Err(ReturnCode::INVALID_INPUT);
            }
            discover_media_operations(rest)
        }
        MediaOperationClass::SANITIZE => {
            let fill = match SanitizeSubclass(subclass) {
                SanitizeSubclass::SANITIZE => SANITIZE_FILL,
                SanitizeSubclass::ZERO => ZERO_FILL,
                _ => return Err(ReturnCode::UNSUPPORTED),
            };
            let ranges = read_records::<DpaRange>(rest, range_count)?;
            if ranges.is_empty() {
                return Ok(Completion::empty());
            }
            let state = cci.type3()?;
            let ranges = validate_dpa_ranges(state, &ranges)?;
            let total = ranges.iter().map(|&(_, length)| length).sum();
            state.disable_media();
            Ok(Completion::Background {
                job: BackgroundJob::MediaSanitize { ranges, fill },
                runtime_ms: sanitize_runtime_ms(total),
            })
        }
        _ => Err(ReturnCode::UNSUPPORTED),
    }
}

fn discover_media_operations(input: &[u8]) -> Result<Completion, ReturnCode> {
    let request: MediaOperationsDiscoveryRequest = read_request(input)?;
    let start = request.start_index as usize;
    let count = request.count as usize;
    let operations = MEDIA_OPERATIONS
        .get(start..start + count)
        .ok_or(ReturnCode::INVALID_INPUT)?;
    Ok(Completion::Done(with_records(
        &MediaOperationsDiscoveryHeader {
            dpa_range_granularity: MEDIA_OPERATION_GRANULARITY,
            total_supported: MEDIA_OPERATIONS.len() as u16,
            returned: operations.len() as u16,
        },
        operations,
    )))
}

/// Checks that each range is granule aligned device capacity. Ranges in
/// dynamic capacity must be backed by accepted extents.
fn validate_dpa_ranges(state: &Type3State, ranges: &[DpaRange]) -> Result<Vec<(u64, u64)>, ReturnCode> {
    ranges
        .iter()
        .map(|range| {
            let (start, length) = (range.start, range.length);
            if length == 0
                || start % MEDIA_OPERATION_GRANULARITY != 0
                || length % MEDIA_OPERATION_GRANULARITY != 0
            {
                return Err(ReturnCode::INVALID_INPUT);
            }
            if !state.contains_dpa(start, length) {
                return Err(ReturnCode::INVALID_PA);
            }
            if let Some(region) = state.dc.region_for(start, length) {
                if !region.is_backed(start, length) {
                    return Err(ReturnCode::INVALID_PA);
                }
            }
            Ok((start, length))
        })
        .collect()
}
