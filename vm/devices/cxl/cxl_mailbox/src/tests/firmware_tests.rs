// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::Cci;
use crate::tests::mocks::TestDevice;
use crate::tests::mocks::fw_transfer;
use crate::tests::mocks::new_device;
use crate::tests::mocks::send;
use cxl_resources::Type3DeviceConfig;
use cxl_spec::Opcode;
use cxl_spec::ReturnCode;
use cxl_spec::firmware::FwActivate;
use cxl_spec::firmware::FwActivateAction;
use cxl_spec::firmware::FwInfo;
use cxl_spec::firmware::FwTransferAction;
use zerocopy::FromBytes;
use zerocopy::IntoBytes;

fn info(cci: &Cci) -> FwInfo {
    let response = send(cci, Opcode::GET_FW_INFO, &[]);
    assert_eq!(response.return_code, ReturnCode::SUCCESS);
    FwInfo::read_from_bytes(&response.payload).unwrap()
}

fn transfer(cci: &Cci, action: FwTransferAction, slot: u8, offset: u32, len: usize) -> ReturnCode {
    send(
        cci,
        Opcode::TRANSFER_FW,
        &fw_transfer(action, slot, offset, len),
    )
    .return_code
}

fn activate(cci: &Cci, action: FwActivateAction, slot: u8) -> ReturnCode {
    send(
        cci,
        Opcode::ACTIVATE_FW,
        FwActivate { action, slot }.as_bytes(),
    )
    .return_code
}

/// Runs a transfer part and lets its background operation finish.
fn transfer_part(dev: &TestDevice, action: FwTransferAction, slot: u8, offset: u32, len: usize) {
    assert_eq!(
        transfer(dev.mailbox(), action, slot, offset, len),
        ReturnCode::BACKGROUND_STARTED
    );
    dev.advance(if action == FwTransferAction::FULL {
        10_000
    } else {
        2_000
    });
}

#[test]
fn test_initial_slots() {
    let dev = new_device(Type3DeviceConfig::default());
    let info = info(dev.mailbox());
    assert_eq!(info.slots_supported, 2);
    assert_eq!(info.slot_info.active_slot(), 1);
    assert_eq!(info.slot_info.staged_slot(), 0);
    assert_eq!(info.activation_caps, 1);
    assert_eq!(&info.revisions[0][..14], b"BWFW VERSION 0");
    assert_eq!(info.revisions[1], [0; 16]);
}

#[test]
fn test_full_transfer_then_activate() {
    let dev = new_device(Type3DeviceConfig::default());
    let cci = dev.mailbox();

    assert_eq!(
        activate(cci, FwActivateAction::ONLINE, 2),
        ReturnCode::FW_INVALID_SLOT
    );

    transfer_part(&dev, FwTransferAction::FULL, 2, 0, 256);
    assert_eq!(&info(cci).revisions[1][..14], b"BWFW VERSION 1");

    assert_eq!(
        activate(cci, FwActivateAction::ON_RESET, 2),
        ReturnCode::SUCCESS
    );
    assert_eq!(info(cci).slot_info.staged_slot(), 2);
    assert_eq!(info(cci).slot_info.active_slot(), 1);

    assert_eq!(
        activate(cci, FwActivateAction::ONLINE, 2),
        ReturnCode::SUCCESS
    );
    assert_eq!(info(cci).slot_info.active_slot(), 2);

    // The active slot can be neither written nor activated again.
    assert_eq!(
        transfer(cci, FwTransferAction::FULL, 2, 0, 128),
        ReturnCode::FW_INVALID_SLOT
    );
    assert_eq!(
        activate(cci, FwActivateAction::ONLINE, 2),
        ReturnCode::FW_INVALID_SLOT
    );
}

#[test]
fn test_invalid_slots() {
    let dev = new_device(Type3DeviceConfig::default());
    let cci = dev.mailbox();
    for slot in [0, 1, 3] {
        assert_eq!(
            transfer(cci, FwTransferAction::FULL, slot, 0, 128),
            ReturnCode::FW_INVALID_SLOT
        );
    }
    assert_eq!(
        activate(cci, FwActivateAction::ONLINE, 3),
        ReturnCode::FW_INVALID_SLOT
    );
    assert_eq!(
        activate(cci, FwActivateAction(7), 2),
        ReturnCode::FW_INVALID_SLOT
    );
}

#[test]
fn test_partial_transfer() {
    let dev = new_device(Type3DeviceConfig::default());
    let cci = dev.mailbox();

    transfer_part(&dev, FwTransferAction::INITIATE, 0, 0, 256);
    // Offsets are in 128-byte units.
    transfer_part(&dev, FwTransferAction::CONTINUE, 0, 2, 128);
    // Resending the last part is allowed.
    transfer_part(&dev, FwTransferAction::CONTINUE, 0, 2, 128);
    assert_eq!(
        transfer(cci, FwTransferAction::CONTINUE, 0, 10, 128),
        ReturnCode::FW_TRANSFER_OUT_OF_ORDER
    );
    assert_eq!(
        transfer(cci, FwTransferAction::FULL, 2, 0, 128),
        ReturnCode::FW_TRANSFER_IN_PROGRESS
    );

    assert!(info(cci).revisions[1].iter().all(|&b| b == 0));
    transfer_part(&dev, FwTransferAction::END, 2, 3, 64);
    assert_eq!(&info(cci).revisions[1][..14], b"BWFW VERSION 1");

    // The transfer is over.
    assert_eq!(
        transfer(cci, FwTransferAction::CONTINUE, 0, 4, 128),
        ReturnCode::FW_TRANSFER_OUT_OF_ORDER
    );
}

#[test]
fn test_transfer_ordering_errors() {
    let dev = new_device(Type3DeviceConfig::default());
    let cci = dev.mailbox();

    assert_eq!(
        transfer(cci, FwTransferAction::CONTINUE, 0, 0, 128),
        ReturnCode::FW_TRANSFER_OUT_OF_ORDER
    );
    assert_eq!(
        transfer(cci, FwTransferAction::END, 2, 0, 128),
        ReturnCode::FW_TRANSFER_OUT_OF_ORDER
    );
    assert_eq!(
        transfer(cci, FwTransferAction::INITIATE, 0, 1, 128),
        ReturnCode::INVALID_INPUT
    );
    // Past the 32 MiB package limit.
    assert_eq!(
        transfer(cci, FwTransferAction::INITIATE, 0, 0x40000, 128),
        ReturnCode::INVALID_INPUT
    );
    assert_eq!(
        transfer(cci, FwTransferAction(9), 0, 0, 128),
        ReturnCode::INVALID_INPUT
    );
}

#[test]
fn test_partial_transfer_times_out() {
    let dev = new_device(Type3DeviceConfig::default());
    let cci = dev.mailbox();

    transfer_part(&dev, FwTransferAction::INITIATE, 0, 0, 128);
    dev.advance(31_000);
    assert_eq!(
        transfer(cci, FwTransferAction::CONTINUE, 0, 1, 128),
        ReturnCode::FW_TRANSFER_OUT_OF_ORDER
    );
    // The stale transfer was dropped.
    transfer_part(&dev, FwTransferAction::FULL, 2, 0, 128);
}

#[test]
fn test_abort_transfer_action() {
    let dev = new_device(Type3DeviceConfig::default());
    let cci = dev.mailbox();

    transfer_part(&dev, FwTransferAction::INITIATE, 0, 0, 128);
    let response = send(
        cci,
        Opcode::TRANSFER_FW,
        &fw_transfer(FwTransferAction::ABORT, 0, 0, 0),
    );
    assert_eq!(response.return_code, ReturnCode::SUCCESS);
    assert!(!response.background_started);
    assert_eq!(
        transfer(cci, FwTransferAction::CONTINUE, 0, 1, 128),
        ReturnCode::FW_TRANSFER_OUT_OF_ORDER
    );
}
