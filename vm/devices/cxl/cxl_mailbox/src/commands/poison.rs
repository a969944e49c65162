// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Media and poison management commands.
//!
//! While a scan is in flight the poison list is frozen: inject and clear
//! still succeed but leave the list alone.

use super::internal_error;
use super::read_request;
use super::with_records;
use crate::background::BackgroundJob;
use crate::background::scan_media_runtime_ms;
use crate::cci::Cci;
use crate::cci::CommandDefinition;
use crate::cci::Completion;
use crate::cci::PayloadLength;
use crate::device::Type3State;
use crate::poison::PoisonRange;
use crate::poison::check_aligned;
use cxl_spec::CACHE_LINE_SIZE;
use cxl_spec::CommandEffects;
use cxl_spec::Opcode;
use cxl_spec::ReturnCode;
use cxl_spec::poison::ClearPoisonRequest;
use cxl_spec::poison::InjectPoisonRequest;
use cxl_spec::poison::MediaErrorRecord;
use cxl_spec::poison::PoisonListFlags;
use cxl_spec::poison::PoisonListHeader;
use cxl_spec::poison::PoisonWindow;
use cxl_spec::poison::ScanMediaCapabilities;
use cxl_spec::poison::ScanMediaRequest;
use cxl_spec::poison::ScanMediaResultsFlags;
use cxl_spec::poison::ScanMediaResultsHeader;

pub(crate) const COMMANDS: &[CommandDefinition] = &[
    CommandDefinition {
        opcode: Opcode::GET_POISON_LIST,
        name: "get poison list",
        handler: get_poison_list,
        input: PayloadLength::Exact(size_of::<PoisonWindow>()),
        effects: CommandEffects::new(),
    },
    CommandDefinition {
        opcode: Opcode::INJECT_POISON,
        name: "inject poison",
        handler: inject_poison,
        input: PayloadLength::Exact(size_of::<InjectPoisonRequest>()),
        effects: CommandEffects::new().with_immediate_data_change(true),
    },
    CommandDefinition {
        opcode: Opcode::CLEAR_POISON,
        name: "clear poison",
        handler: clear_poison,
        input: PayloadLength::Exact(size_of::<ClearPoisonRequest>()),
        effects: CommandEffects::new().with_immediate_data_change(true),
    },
    CommandDefinition {
        opcode: Opcode::GET_SCAN_MEDIA_CAPABILITIES,
        name: "get scan media capabilities",
        handler: get_scan_media_capabilities,
        input: PayloadLength::Exact(size_of::<PoisonWindow>()),
        effects: CommandEffects::new(),
    },
    CommandDefinition {
        opcode: Opcode::SCAN_MEDIA,
        name: "scan media",
        handler: scan_media,
        input: PayloadLength::Exact(size_of::<ScanMediaRequest>()),
        effects: CommandEffects::new().with_background_operation(true),
    },
    CommandDefinition {
        opcode: Opcode::GET_SCAN_MEDIA_RESULTS,
        name: "get scan media results",
        handler: get_scan_media_results,
        input: PayloadLength::Exact(0),
        effects: CommandEffects::new(),
    },
];

/// Output records that fit in one response after a 32-byte header.
fn records_per_response(cci: &Cci) -> usize {
    (cci.payload_max() - size_of::<PoisonListHeader>()) / size_of::<MediaErrorRecord>()
}

/// Resolves a window to a byte range of device capacity.
fn window_range(state: &Type3State, window: PoisonWindow) -> Result<(u64, u64), ReturnCode> {
    let start = window.address;
    let length = window
        .length
        .checked_mul(CACHE_LINE_SIZE)
        .ok_or(ReturnCode::INVALID_INPUT)?;
    if start % CACHE_LINE_SIZE != 0 {
        return Err(ReturnCode::INVALID_INPUT);
    }
    if !state.contains_dpa(start, length) {
        return Err(ReturnCode::INVALID_PA);
    }
    Ok((start, length))
}

/// Validates the target line of an inject or clear.
fn poison_target(state: &Type3State, address: u64) -> Result<(), ReturnCode> {
    check_aligned(address, CACHE_LINE_SIZE)?;
    if !state.contains_dpa(address, CACHE_LINE_SIZE) {
        return Err(ReturnCode::INVALID_PA);
    }
    Ok(())
}

fn to_records(ranges: Vec<PoisonRange>) -> Vec<MediaErrorRecord> {
    ranges.into_iter().map(PoisonRange::to_record).collect()
}

fn get_poison_list(cci: &Cci, input: &[u8]) -> Result<Completion, ReturnCode> {
    let window: PoisonWindow = read_request(input)?;
    let state = cci.type3()?;
    let (start, length) = window_range(state, window)?;
    let scanning = cci.scan_media_running();

    let poison = state.poison.lock();
    let mut entries = poison.list(start, length);
    let room = records_per_response(cci);
    let more = entries.len() > room;
    entries.truncate(room);
    let overflow_timestamp = poison.overflow_timestamp();
    drop(poison);

    let records = to_records(entries);
    Ok(Completion::Done(with_records(
        &PoisonListHeader {
            flags: PoisonListFlags::new()
                .with_more_records(more)
                .with_overflow(overflow_timestamp.is_some())
                .with_scan_in_progress(scanning),
            _reserved1: 0,
            overflow_timestamp: overflow_timestamp.unwrap_or(0),
            count: records.len() as u16,
            _reserved2: [0; 0x14],
        },
        &records,
    )))
}

fn inject_poison(cci: &Cci, input: &[u8]) -> Result<Completion, ReturnCode> {
    let request: InjectPoisonRequest = read_request(input)?;
    let address = request.address;
    let state = cci.type3()?;
    poison_target(state, address)?;
    if cci.scan_media_running() {
        tracing::debug!(address, "poison list frozen by scan, inject ignored");
        return Ok(Completion::empty());
    }
    state.poison.lock().inject(address)?;
    Ok(Completion::empty())
}

fn clear_poison(cci: &Cci, input: &[u8]) -> Result<Completion, ReturnCode> {
    let request: ClearPoisonRequest = read_request(input)?;
    let address = request.address;
    let state = cci.type3()?;
    poison_target(state, address)?;
    state
        .memory
        .write(address, &request.data)
        .map_err(internal_error)?;
    if cci.scan_media_running() {
        tracing::debug!(address, "poison list frozen by scan, clear ignored");
        return Ok(Completion::empty());
    }
    let timestamp = state.timestamp.get();
    state.poison.lock().clear(address, timestamp);
    Ok(Completion::empty())
}

fn get_scan_media_capabilities(cci: &Cci, input: &[u8]) -> Result<Completion, ReturnCode> {
    let window: PoisonWindow = read_request(input)?;
    let state = cci.type3()?;
    let (_, length) = window_range(state, window)?;
    Ok(Completion::with(&ScanMediaCapabilities {
        estimated_runtime_ms: scan_media_runtime_ms(length) as u32,
    }))
}

fn scan_media(cci: &Cci, input: &[u8]) -> Result<Completion, ReturnCode> {
    let request: ScanMediaRequest = read_request(input)?;
    let state = cci.type3()?;
    let (start, length) = window_range(state, request.window)?;
    state.poison.lock().begin_scan();
    Ok(Completion::Background {
        job: BackgroundJob::ScanMedia { start, length },
        runtime_ms: scan_media_runtime_ms(length),
    })
}

fn get_scan_media_results(cci: &Cci, _input: &[u8]) -> Result<Completion, ReturnCode> {
    let state = cci.type3()?;
    if cci.scan_media_running() {
        return Err(ReturnCode::BUSY);
    }
    let (results, more) = state
        .poison
        .lock()
        .drain_results(records_per_response(cci))?;
    let records = to_records(results);
    Ok(Completion::Done(with_records(
        &ScanMediaResultsHeader {
            restart_address: 0,
            restart_length: 0,
            flags: ScanMediaResultsFlags::new().with_more_records(more),
            _reserved1: 0,
            count: records.len() as u16,
            _reserved2: [0; 0xc],
        },
        &records,
    )))
}
