// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Firmware update commands.
//!
//! Packages are transferred either whole or in parts. A partial transfer
//! must continue exactly where the previous part ended, and is dropped if
//! the host goes quiet for more than [`PARTIAL_TRANSFER_TIMEOUT_MS`].

use super::read_request;
use super::split_request;
use crate::background::BackgroundJob;
use crate::cci::Cci;
use crate::cci::CommandDefinition;
use crate::cci::Completion;
use crate::cci::PayloadLength;
use cxl_spec::CommandEffects;
use cxl_spec::Opcode;
use cxl_spec::ReturnCode;
use cxl_spec::firmware::FW_MAX_SIZE;
use cxl_spec::firmware::FW_SLOT_COUNT;
use cxl_spec::firmware::FW_TRANSFER_ALIGNMENT;
use cxl_spec::firmware::FwActivate;
use cxl_spec::firmware::FwActivateAction;
use cxl_spec::firmware::FwInfo;
use cxl_spec::firmware::FwSlotInfo;
use cxl_spec::firmware::FwTransferAction;
use cxl_spec::firmware::FwTransferHeader;

const PARTIAL_TRANSFER_TIMEOUT_MS: u64 = 30_000;
const FULL_TRANSFER_RUNTIME_MS: u64 = 10_000;
const PARTIAL_TRANSFER_RUNTIME_MS: u64 = 2_000;

pub(crate) const COMMANDS: &[CommandDefinition] = &[
    CommandDefinition {
        opcode: Opcode::GET_FW_INFO,
        name: "get fw info",
        handler: get_info,
        input: PayloadLength::Exact(0),
        effects: CommandEffects::new(),
    },
    CommandDefinition {
        opcode: Opcode::TRANSFER_FW,
        name: "transfer fw",
        handler: transfer,
        input: PayloadLength::Variable,
        effects: CommandEffects::new()
            .with_background_operation(true)
            .with_request_abort_supported(true),
    },
    CommandDefinition {
        opcode: Opcode::ACTIVATE_FW,
        name: "activate fw",
        handler: activate,
        input: PayloadLength::Exact(size_of::<FwActivate>()),
        effects: CommandEffects::new().with_background_operation(true),
    },
];

/// Firmware slots and the partial transfer in progress, if any. Slots are
/// numbered from 1.
#[derive(Debug)]
pub(crate) struct FirmwareState {
    occupied: [bool; FW_SLOT_COUNT as usize],
    active_slot: u8,
    staged_slot: u8,
    transferring: bool,
    previous_offset: u64,
    previous_length: u64,
    last_part_ms: u64,
}

impl FirmwareState {
    pub fn new() -> Self {
        Self {
            occupied: [true, false],
            active_slot: 1,
            staged_slot: 0,
            transferring: false,
            previous_offset: 0,
            previous_length: 0,
            last_part_ms: 0,
        }
    }

    fn is_occupied(&self, slot: u8) -> bool {
        slot != 0
            && self
                .occupied
                .get(slot as usize - 1)
                .copied()
                .unwrap_or(false)
    }

    fn check_target_slot(&self, slot: u8) -> Result<(), ReturnCode> {
        if slot == 0 || slot > FW_SLOT_COUNT || slot == self.active_slot {
            return Err(ReturnCode::FW_INVALID_SLOT);
        }
        Ok(())
    }

    fn info(&self) -> FwInfo {
        let mut revisions = [[0; 16]; 4];
        for (slot, revision) in (1..=FW_SLOT_COUNT).zip(revisions.iter_mut()) {
            if self.is_occupied(slot) {
                let name = format!("BWFW VERSION {}", slot - 1);
                revision[..name.len()].copy_from_slice(name.as_bytes());
            }
        }
        FwInfo {
            slots_supported: FW_SLOT_COUNT,
            slot_info: FwSlotInfo::new()
                .with_active_slot(self.active_slot)
                .with_staged_slot(self.staged_slot),
            activation_caps: 1,
            _reserved: [0; 13],
            revisions,
        }
    }

    /// Applies a transfer once its background operation finishes.
    pub fn complete_transfer(&mut self, action: FwTransferAction, slot: u8, now_ms: u64) {
        match action {
            FwTransferAction::FULL | FwTransferAction::END => {
                if let Some(occupied) = (slot as usize)
                    .checked_sub(1)
                    .and_then(|i| self.occupied.get_mut(i))
                {
                    *occupied = true;
                }
                self.transferring = false;
                tracing::info!(slot, "firmware package stored");
            }
            _ => self.last_part_ms = now_ms,
        }
    }
}

fn get_info(cci: &Cci, _input: &[u8]) -> Result<Completion, ReturnCode> {
    Ok(Completion::with(&cci.firmware.lock().info()))
}

fn transfer(cci: &Cci, input: &[u8]) -> Result<Completion, ReturnCode> {
    let (header, data) = split_request::<FwTransferHeader>(input)?;
    let action = header.action;
    let slot = header.slot;
    let mut fw = cci.firmware.lock();

    if action == FwTransferAction::ABORT {
        fw.transferring = false;
        return Ok(Completion::empty());
    }

    let offset = u64::from(header.offset) * FW_TRANSFER_ALIGNMENT;
    let length = data.len() as u64;
    if offset + length > FW_MAX_SIZE {
        return Err(ReturnCode::INVALID_INPUT);
    }

    let now = cci.clock.now_ms();
    match action {
        FwTransferAction::FULL | FwTransferAction::INITIATE => {
            if fw.transferring {
                return Err(ReturnCode::FW_TRANSFER_IN_PROGRESS);
            }
            if offset != 0 {
                return Err(ReturnCode::INVALID_INPUT);
            }
        }
        FwTransferAction::CONTINUE | FwTransferAction::END => {
            if !fw.transferring {
                return Err(ReturnCode::FW_TRANSFER_OUT_OF_ORDER);
            }
            if now.saturating_sub(fw.last_part_ms) > PARTIAL_TRANSFER_TIMEOUT_MS {
                tracing::debug!("partial firmware transfer timed out");
                fw.transferring = false;
                return Err(ReturnCode::FW_TRANSFER_OUT_OF_ORDER);
            }
            // Resending the previous part is allowed.
            if offset != fw.previous_offset + fw.previous_length && offset != fw.previous_offset {
                return Err(ReturnCode::FW_TRANSFER_OUT_OF_ORDER);
            }
        }
        _ => return Err(ReturnCode::INVALID_INPUT),
    }

    if matches!(action, FwTransferAction::FULL | FwTransferAction::END) {
        fw.check_target_slot(slot)?;
    }

    let runtime_ms = if action == FwTransferAction::FULL {
        FULL_TRANSFER_RUNTIME_MS
    } else {
        fw.transferring = true;
        fw.previous_offset = offset;
        fw.previous_length = length;
        fw.last_part_ms = now;
        PARTIAL_TRANSFER_RUNTIME_MS
    };

    tracing::debug!(?action, slot, offset, length, "firmware transfer");
    Ok(Completion::Background {
        job: BackgroundJob::FirmwareTransfer { action, slot },
        runtime_ms,
    })
}

fn activate(cci: &Cci, input: &[u8]) -> Result<Completion, ReturnCode> {
    let request: FwActivate = read_request(input)?;
    let slot = request.slot;
    let mut fw = cci.firmware.lock();
    fw.check_target_slot(slot)?;
    if !fw.is_occupied(slot) {
        return Err(ReturnCode::FW_INVALID_SLOT);
    }
    let action = request.action;
    match action {
        FwActivateAction::ONLINE => fw.active_slot = slot,
        FwActivateAction::ON_RESET => fw.staged_slot = slot,
        _ => return Err(ReturnCode::INVALID_INPUT),
    }
    Ok(Completion::empty())
}
