// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::Cci;
use crate::platform::InterruptMode;
use crate::tests::mocks::fw_transfer;
use crate::tests::mocks::new_device;
use crate::tests::mocks::send;
use cxl_resources::Type3DeviceConfig;
use cxl_spec::Opcode;
use cxl_spec::ReturnCode;
use cxl_spec::firmware::FwTransferAction;
use cxl_spec::infostat::BackgroundOperationStatus;
use cxl_spec::memdev::DpaRange;
use cxl_spec::memdev::MediaOperation;
use cxl_spec::memdev::MediaOperationClass;
use cxl_spec::memdev::MediaOperationsDiscoveryHeader;
use cxl_spec::memdev::MediaOperationsDiscoveryRequest;
use cxl_spec::memdev::MediaOperationsHeader;
use cxl_spec::memdev::SanitizeSubclass;
use cxl_spec::poison::PoisonWindow;
use cxl_spec::poison::ScanMediaRequest;
use std::sync::atomic::Ordering;
use zerocopy::FromBytes;
use zerocopy::IntoBytes;

const MIB: u64 = 1024 * 1024;

fn status(cci: &Cci) -> BackgroundOperationStatus {
    let response = send(cci, Opcode::BACKGROUND_OPERATION_STATUS, &[]);
    assert_eq!(response.return_code, ReturnCode::SUCCESS);
    BackgroundOperationStatus::read_from_bytes(&response.payload).unwrap()
}

fn media_operation(class: MediaOperationClass, subclass: u8, ranges: &[DpaRange]) -> Vec<u8> {
    let mut input = MediaOperationsHeader {
        class,
        subclass,
        _reserved: [0; 2],
        dpa_range_count: ranges.len() as u32,
    }
    .as_bytes()
    .to_vec();
    input.extend_from_slice(ranges.as_bytes());
    input
}

fn scan_request(lines: u64) -> ScanMediaRequest {
    ScanMediaRequest {
        window: PoisonWindow {
            address: 0,
            length: lines,
        },
        flags: 0,
    }
}

#[test]
fn test_idle_status() {
    let dev = new_device(Type3DeviceConfig::default());
    let status = status(dev.mailbox());
    assert!(!status.status.running());
    assert_eq!(status.status.percent_complete(), 0);
    assert_eq!({ status.opcode }, Opcode(0));
}

#[test]
fn test_sanitize_runs_to_completion() {
    let dev = new_device(Type3DeviceConfig::default());
    let cci = dev.mailbox();

    let response = send(cci, Opcode::SANITIZE, &[]);
    assert_eq!(response.return_code, ReturnCode::BACKGROUND_STARTED);
    assert!(response.background_started);
    assert!(dev.device.is_media_disabled());

    let running = status(cci);
    assert!(running.status.running());
    assert_eq!({ running.opcode }, Opcode::SANITIZE);

    // 256 MiB takes four seconds.
    dev.advance(1000);
    assert_eq!(status(cci).status.percent_complete(), 25);
    dev.advance(2000);
    assert_eq!(status(cci).status.percent_complete(), 75);
    assert!(dev.platform.interrupt.signals.lock().is_empty());

    dev.advance(1000);
    let done = status(cci);
    assert!(!done.status.running());
    assert_eq!(done.status.percent_complete(), 100);
    assert_eq!({ done.return_code }, ReturnCode::SUCCESS);
    assert!(!dev.device.is_media_disabled());
    assert_eq!(*dev.platform.memory.fills.lock(), [(0, 256 * MIB, 0)]);
    assert_eq!(
        *dev.platform.interrupt.signals.lock(),
        [(InterruptMode::MsiX, 0)]
    );
    assert_eq!(dev.platform.clock.armed(), 0);
}

#[test]
fn test_failed_sanitize_restores_media() {
    let dev = new_device(Type3DeviceConfig::default());
    let cci = dev.mailbox();
    dev.platform.memory.fail.store(true, Ordering::SeqCst);

    assert_eq!(
        send(cci, Opcode::SANITIZE, &[]).return_code,
        ReturnCode::BACKGROUND_STARTED
    );
    dev.advance(4000);
    let done = status(cci);
    assert!(!done.status.running());
    assert_eq!({ done.return_code }, ReturnCode::INTERNAL_ERROR);
    assert!(!dev.device.is_media_disabled());
    assert_eq!(dev.platform.interrupt.signals.lock().len(), 1);

    // The host can use the media and try again.
    let response = send(cci, Opcode::GET_PARTITION_INFO, &[]);
    assert_eq!(response.return_code, ReturnCode::SUCCESS);
    dev.platform.memory.fail.store(false, Ordering::SeqCst);
    assert_eq!(
        send(cci, Opcode::SANITIZE, &[]).return_code,
        ReturnCode::BACKGROUND_STARTED
    );
    dev.advance(4000);
    assert_eq!({ status(cci).return_code }, ReturnCode::SUCCESS);
    assert_eq!(*dev.platform.memory.fills.lock(), [(0, 256 * MIB, 0)]);
}

#[test]
fn test_failed_media_operation_restores_media() {
    let dev = new_device(Type3DeviceConfig::default());
    let cci = dev.mailbox();
    dev.platform.memory.fail.store(true, Ordering::SeqCst);

    let input = media_operation(
        MediaOperationClass::SANITIZE,
        SanitizeSubclass::ZERO.0,
        &[DpaRange {
            start: 0,
            length: 4096,
        }],
    );
    let response = send(cci, Opcode::MEDIA_OPERATIONS, &input);
    assert_eq!(response.return_code, ReturnCode::BACKGROUND_STARTED);
    dev.advance(4000);
    assert_eq!({ status(cci).return_code }, ReturnCode::INTERNAL_ERROR);
    assert!(!dev.device.is_media_disabled());
}

#[test]
fn test_admission_while_running() {
    let dev = new_device(Type3DeviceConfig::default().with_lsa_size(64));
    let cci = dev.mailbox();
    send(cci, Opcode::SANITIZE, &[]);

    let response = send(cci, Opcode::SANITIZE, &[]);
    assert_eq!(response.return_code, ReturnCode::BUSY);
    let response = send(cci, Opcode::SCAN_MEDIA, scan_request(1).as_bytes());
    assert_eq!(response.return_code, ReturnCode::BUSY);

    // Media gated but not background commands see the disabled media.
    let response = send(cci, Opcode::GET_PARTITION_INFO, &[]);
    assert_eq!(response.return_code, ReturnCode::MEDIA_DISABLED);
    let response = send(
        cci,
        Opcode::GET_POISON_LIST,
        PoisonWindow {
            address: 0,
            length: 1,
        }
        .as_bytes(),
    );
    assert_eq!(response.return_code, ReturnCode::MEDIA_DISABLED);

    // Others are unaffected.
    let response = send(cci, Opcode::IDENTIFY_MEMORY_DEVICE, &[]);
    assert_eq!(response.return_code, ReturnCode::SUCCESS);
    let response = send(cci, Opcode::GET_ALERT_CONFIG, &[]);
    assert_eq!(response.return_code, ReturnCode::SUCCESS);
}

#[test]
fn test_abort_early_job() {
    let dev = new_device(Type3DeviceConfig::default());
    let cci = dev.mailbox();
    send(cci, Opcode::SANITIZE, &[]);
    dev.advance(1000);

    let response = send(cci, Opcode::BACKGROUND_OPERATION_ABORT, &[]);
    assert_eq!(response.return_code, ReturnCode::SUCCESS);

    let aborted = status(cci);
    assert!(!aborted.status.running());
    assert_eq!(aborted.status.percent_complete(), 25);
    assert_eq!({ aborted.opcode }, Opcode::SANITIZE);
    assert_eq!({ aborted.return_code }, ReturnCode::ABORTED);
    assert_eq!({ aborted.vendor_extended_status }, 1);
    assert!(!dev.device.is_media_disabled());
    assert_eq!(dev.platform.clock.armed(), 0);

    dev.advance(10_000);
    assert!(dev.platform.memory.fills.lock().is_empty());
    assert!(dev.platform.interrupt.signals.lock().is_empty());

    // A new job may start right away.
    let response = send(cci, Opcode::SANITIZE, &[]);
    assert_eq!(response.return_code, ReturnCode::BACKGROUND_STARTED);
    assert_eq!({ status(cci).vendor_extended_status }, 0);
}

#[test]
fn test_abort_near_completion_is_ignored() {
    let dev = new_device(Type3DeviceConfig::default());
    let cci = dev.mailbox();
    let response = send(
        cci,
        Opcode::TRANSFER_FW,
        &fw_transfer(FwTransferAction::FULL, 2, 0, 128),
    );
    assert_eq!(response.return_code, ReturnCode::BACKGROUND_STARTED);

    dev.advance(9000);
    assert_eq!(status(cci).status.percent_complete(), 90);
    let response = send(cci, Opcode::BACKGROUND_OPERATION_ABORT, &[]);
    assert_eq!(response.return_code, ReturnCode::SUCCESS);
    assert!(status(cci).status.running());

    dev.advance(1000);
    let done = status(cci);
    assert!(!done.status.running());
    assert_eq!({ done.return_code }, ReturnCode::SUCCESS);
    assert_eq!(dev.platform.interrupt.signals.lock().len(), 1);
}

#[test]
fn test_abort_unsupported_or_idle() {
    let dev = new_device(Type3DeviceConfig::default());
    let cci = dev.mailbox();

    let response = send(cci, Opcode::BACKGROUND_OPERATION_ABORT, &[]);
    assert_eq!(response.return_code, ReturnCode::SUCCESS);

    let response = send(cci, Opcode::SCAN_MEDIA, scan_request(1024).as_bytes());
    assert_eq!(response.return_code, ReturnCode::BACKGROUND_STARTED);
    let response = send(cci, Opcode::BACKGROUND_OPERATION_ABORT, &[]);
    assert_eq!(response.return_code, ReturnCode::REQUEST_ABORT_NOT_SUPPORTED);
    assert!(status(cci).status.running());

    dev.advance(1000);
    assert!(!status(cci).status.running());
}

#[test]
fn test_completion_interrupt_mode() {
    let dev = new_device(Type3DeviceConfig {
        mailbox_vector: 3,
        ..Default::default()
    });
    let cci = dev.mailbox();

    *dev.platform.interrupt.mode.lock() = InterruptMode::Msi;
    send(cci, Opcode::SCAN_MEDIA, scan_request(1024).as_bytes());
    dev.advance(1000);
    assert_eq!(
        *dev.platform.interrupt.signals.lock(),
        [(InterruptMode::Msi, 3)]
    );

    *dev.platform.interrupt.mode.lock() = InterruptMode::Disabled;
    send(cci, Opcode::SCAN_MEDIA, scan_request(1024).as_bytes());
    dev.advance(1000);
    assert!(!status(cci).status.running());
    assert_eq!(dev.platform.interrupt.signals.lock().len(), 1);
}

#[test]
fn test_media_operations_zero() {
    let dev = new_device(Type3DeviceConfig::default());
    let cci = dev.mailbox();

    let input = media_operation(
        MediaOperationClass::SANITIZE,
        SanitizeSubclass::ZERO.0,
        &[
            DpaRange {
                start: 0,
                length: 4096,
            },
            DpaRange {
                start: 8192,
                length: 64,
            },
        ],
    );
    let response = send(cci, Opcode::MEDIA_OPERATIONS, &input);
    assert_eq!(response.return_code, ReturnCode::BACKGROUND_STARTED);
    assert!(dev.device.is_media_disabled());

    dev.advance(4000);
    assert!(!dev.device.is_media_disabled());
    assert_eq!(
        *dev.platform.memory.fills.lock(),
        [(0, 4096, 0), (8192, 64, 0)]
    );
}

#[test]
fn test_media_operations_validation() {
    let dev = new_device(Type3DeviceConfig::default());
    let cci = dev.mailbox();
    let sanitize = |ranges: &[DpaRange]| {
        send(
            cci,
            Opcode::MEDIA_OPERATIONS,
            &media_operation(
                MediaOperationClass::SANITIZE,
                SanitizeSubclass::SANITIZE.0,
                ranges,
            ),
        )
        .return_code
    };

    assert_eq!(sanitize(&[]), ReturnCode::SUCCESS);
    assert_eq!(
        sanitize(&[DpaRange {
            start: 32,
            length: 64
        }]),
        ReturnCode::INVALID_INPUT
    );
    assert_eq!(
        sanitize(&[DpaRange {
            start: 0,
            length: 0
        }]),
        ReturnCode::INVALID_INPUT
    );
    assert_eq!(
        sanitize(&[DpaRange {
            start: 256 * MIB,
            length: 64
        }]),
        ReturnCode::INVALID_PA
    );
    assert!(!dev.device.is_media_disabled());

    let response = send(
        cci,
        Opcode::MEDIA_OPERATIONS,
        &media_operation(MediaOperationClass::SANITIZE, 7, &[]),
    );
    assert_eq!(response.return_code, ReturnCode::UNSUPPORTED);
    let response = send(
        cci,
        Opcode::MEDIA_OPERATIONS,
        &media_operation(MediaOperationClass(5), 0, &[]),
    );
    assert_eq!(response.return_code, ReturnCode::UNSUPPORTED);
}

#[test]
fn test_media_operations_discovery() {
    let dev = new_device(Type3DeviceConfig::default());
    let cci = dev.mailbox();
    let discover = |start_index, count| {
        let mut input = media_operation(MediaOperationClass::GENERAL, 0, &[]);
        input.extend_from_slice(MediaOperationsDiscoveryRequest { start_index, count }.as_bytes());
        send(cci, Opcode::MEDIA_OPERATIONS, &input)
    };

    let response = discover(0, 3);
    assert_eq!(response.return_code, ReturnCode::SUCCESS);
    let (header, rest) =
        MediaOperationsDiscoveryHeader::read_from_prefix(&response.payload).unwrap();
    assert_eq!({ header.dpa_range_granularity }, 64);
    assert_eq!({ header.total_supported }, 3);
    assert_eq!({ header.returned }, 3);
    let operations = <[MediaOperation]>::ref_from_bytes(rest).unwrap();
    assert_eq!(
        operations[2],
        MediaOperation {
            class: MediaOperationClass::SANITIZE,
            subclass: SanitizeSubclass::ZERO.0,
        }
    );

    assert_eq!(discover(2, 2).return_code, ReturnCode::INVALID_INPUT);
}
