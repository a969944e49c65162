// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::Cci;
use crate::CciResponse;
use crate::tests::mocks::new_device;
use crate::tests::mocks::send;
use cxl_resources::Type3DeviceConfig;
use cxl_spec::Opcode;
use cxl_spec::ReturnCode;
use cxl_spec::Uuid;
use cxl_spec::features::ECS_UUID;
use cxl_spec::features::EcsReadAttributes;
use cxl_spec::features::FEATURE_VERSION;
use cxl_spec::features::FeatureSelection;
use cxl_spec::features::FeatureTransfer;
use cxl_spec::features::GetFeatureRequest;
use cxl_spec::features::GetSupportedFeaturesRequest;
use cxl_spec::features::PATROL_SCRUB_UUID;
use cxl_spec::features::PatrolScrubReadAttributes;
use cxl_spec::features::SetFeatureFlags;
use cxl_spec::features::SetFeatureHeader;
use cxl_spec::features::SupportedFeatureEntry;
use cxl_spec::features::SupportedFeaturesHeader;
use zerocopy::FromBytes;
use zerocopy::IntoBytes;

fn supported_features(cci: &Cci, count: u32, start_index: u16) -> CciResponse {
    send(
        cci,
        Opcode::GET_SUPPORTED_FEATURES,
        GetSupportedFeaturesRequest {
            count,
            start_index,
            _reserved: 0,
        }
        .as_bytes(),
    )
}

fn get_feature(
    cci: &Cci,
    uuid: Uuid,
    offset: u16,
    count: u16,
    selection: FeatureSelection,
) -> CciResponse {
    send(
        cci,
        Opcode::GET_FEATURE,
        GetFeatureRequest {
            uuid,
            offset,
            count,
            selection,
        }
        .as_bytes(),
    )
}

fn set_feature_versioned(
    cci: &Cci,
    uuid: Uuid,
    action: FeatureTransfer,
    offset: u16,
    version: u8,
    data: &[u8],
) -> ReturnCode {
    let mut input = SetFeatureHeader {
        uuid,
        flags: SetFeatureFlags::new().with_transfer(action.0),
        offset,
        version,
        _reserved: [0; 9],
    }
    .as_bytes()
    .to_vec();
    input.extend_from_slice(data);
    send(cci, Opcode::SET_FEATURE, &input).return_code
}

fn set_feature(cci: &Cci, uuid: Uuid, action: FeatureTransfer, offset: u16, data: &[u8]) -> ReturnCode {
    set_feature_versioned(cci, uuid, action, offset, FEATURE_VERSION, data)
}

fn patrol_scrub(cci: &Cci) -> PatrolScrubReadAttributes {
    let response = get_feature(cci, PATROL_SCRUB_UUID, 0, 4, FeatureSelection::CURRENT);
    assert_eq!(response.return_code, ReturnCode::SUCCESS);
    PatrolScrubReadAttributes::read_from_bytes(&response.payload).unwrap()
}

fn ecs(cci: &Cci) -> EcsReadAttributes {
    let response = get_feature(cci, ECS_UUID, 0, 13, FeatureSelection::CURRENT);
    assert_eq!(response.return_code, ReturnCode::SUCCESS);
    EcsReadAttributes::read_from_bytes(&response.payload).unwrap()
}

#[test]
fn test_supported_features() {
    let dev = new_device(Type3DeviceConfig::default());
    let cci = dev.mailbox();

    let response = supported_features(cci, 8 + 2 * 48, 0);
    assert_eq!(response.return_code, ReturnCode::SUCCESS);
    let (header, rest) = SupportedFeaturesHeader::read_from_prefix(&response.payload).unwrap();
    assert_eq!({ header.device_feature_count }, 2);
    assert_eq!({ header.entries }, 2);
    let entries = <[SupportedFeatureEntry]>::ref_from_bytes(rest).unwrap();
    assert_eq!(entries[0].uuid, PATROL_SCRUB_UUID);
    assert_eq!({ entries[0].get_size }, 4);
    assert_eq!({ entries[0].set_size }, 2);
    assert_eq!(entries[1].uuid, ECS_UUID);
    assert_eq!({ entries[1].index }, 1);

    // The buffer only has room for one entry.
    let response = supported_features(cci, 8 + 48, 1);
    assert_eq!(response.return_code, ReturnCode::SUCCESS);
    let (header, rest) = SupportedFeaturesHeader::read_from_prefix(&response.payload).unwrap();
    assert_eq!({ header.entries }, 1);
    let entry = SupportedFeatureEntry::read_from_bytes(rest).unwrap();
    assert_eq!(entry.uuid, ECS_UUID);

    assert_eq!(
        supported_features(cci, 4, 0).return_code,
        ReturnCode::INVALID_INPUT
    );
    assert_eq!(
        supported_features(cci, 256, 2).return_code,
        ReturnCode::INVALID_INPUT
    );
}

#[test]
fn test_get_feature() {
    let dev = new_device(Type3DeviceConfig::default());
    let cci = dev.mailbox();

    let scrub = patrol_scrub(cci);
    assert_eq!(scrub.cycle_capability, 0b11);
    assert_eq!({ scrub.cycle }, 12 | (1 << 8));

    let response = get_feature(cci, PATROL_SCRUB_UUID, 1, 16, FeatureSelection::CURRENT);
    assert_eq!(response.return_code, ReturnCode::SUCCESS);
    assert_eq!(response.payload.len(), 3);

    let ecs = ecs(cci);
    assert_eq!(ecs.frus.map(|fru| fru.config), [3; 3]);

    for (uuid, offset, count, selection, rc) in [
        (PATROL_SCRUB_UUID, 0, 4, FeatureSelection::DEFAULT, ReturnCode::UNSUPPORTED),
        (PATROL_SCRUB_UUID, 4, 1, FeatureSelection::CURRENT, ReturnCode::INVALID_INPUT),
        (PATROL_SCRUB_UUID, 0, 4096, FeatureSelection::CURRENT, ReturnCode::INVALID_INPUT),
        (Uuid::NIL, 0, 4, FeatureSelection::CURRENT, ReturnCode::UNSUPPORTED),
    ] {
        assert_eq!(
            get_feature(cci, uuid, offset, count, selection).return_code,
            rc
        );
    }
}

#[test]
fn test_set_feature_full() {
    let dev = new_device(Type3DeviceConfig::default());
    let cci = dev.mailbox();

    assert_eq!(
        set_feature(cci, PATROL_SCRUB_UUID, FeatureTransfer::FULL, 0, &[5, 1]),
        ReturnCode::SUCCESS
    );
    let scrub = patrol_scrub(cci);
    // Only the current cycle changes; the minimum is read-only.
    assert_eq!({ scrub.cycle }, 5 | (1 << 8));
    assert_eq!(scrub.flags, 1);
}

#[test]
fn test_set_feature_multipart() {
    let dev = new_device(Type3DeviceConfig::default());
    let cci = dev.mailbox();

    assert_eq!(
        set_feature(cci, ECS_UUID, FeatureTransfer::INITIATE, 0, &[2]),
        ReturnCode::SUCCESS
    );
    assert_eq!(
        set_feature(cci, ECS_UUID, FeatureTransfer::CONTINUE, 1, &5u16.to_le_bytes()),
        ReturnCode::SUCCESS
    );

    // Nothing is applied before the last part.
    assert_eq!(ecs(cci).log_capability, 1);
    assert_eq!(
        set_feature(cci, PATROL_SCRUB_UUID, FeatureTransfer::FULL, 0, &[5, 1]),
        ReturnCode::FEATURE_TRANSFER_IN_PROGRESS
    );
    assert_eq!(
        set_feature(cci, ECS_UUID, FeatureTransfer::FULL, 0, &[0; 7]),
        ReturnCode::FEATURE_TRANSFER_IN_PROGRESS
    );

    let mut last = 0x21u16.to_le_bytes().to_vec();
    last.extend_from_slice(&4u16.to_le_bytes());
    assert_eq!(
        set_feature(cci, ECS_UUID, FeatureTransfer::FINISH, 3, &last),
        ReturnCode::SUCCESS
    );

    let ecs = ecs(cci);
    assert_eq!(ecs.log_capability, 2);
    // Reserved config bits are dropped.
    assert_eq!(ecs.frus.map(|fru| fru.config), [5, 1, 4]);

    // The transfer is over.
    assert_eq!(
        set_feature(cci, ECS_UUID, FeatureTransfer::CONTINUE, 0, &[1]),
        ReturnCode::FEATURE_TRANSFER_OUT_OF_ORDER
    );
}

#[test]
fn test_set_feature_errors() {
    let dev = new_device(Type3DeviceConfig::default());
    let cci = dev.mailbox();

    assert_eq!(
        set_feature(cci, PATROL_SCRUB_UUID, FeatureTransfer::CONTINUE, 0, &[1]),
        ReturnCode::FEATURE_TRANSFER_OUT_OF_ORDER
    );
    assert_eq!(
        set_feature(cci, PATROL_SCRUB_UUID, FeatureTransfer::FINISH, 0, &[1]),
        ReturnCode::FEATURE_TRANSFER_OUT_OF_ORDER
    );
    assert_eq!(
        set_feature_versioned(
            cci,
            PATROL_SCRUB_UUID,
            FeatureTransfer::FULL,
            0,
            FEATURE_VERSION + 1,
            &[5, 1]
        ),
        ReturnCode::UNSUPPORTED_FEATURE_VERSION
    );
    assert_eq!(
        set_feature(cci, PATROL_SCRUB_UUID, FeatureTransfer::FULL, 0, &[5, 1, 0]),
        ReturnCode::INVALID_PAYLOAD_LENGTH
    );
    assert_eq!(
        set_feature(cci, PATROL_SCRUB_UUID, FeatureTransfer::FULL, 1, &[5, 1]),
        ReturnCode::INVALID_PAYLOAD_LENGTH
    );
    assert_eq!(
        set_feature(cci, Uuid::NIL, FeatureTransfer::FULL, 0, &[1]),
        ReturnCode::UNSUPPORTED
    );
    assert_eq!(
        set_feature(cci, PATROL_SCRUB_UUID, FeatureTransfer(5), 0, &[1]),
        ReturnCode::INVALID_INPUT
    );
    assert_eq!({ patrol_scrub(cci).cycle }, 12 | (1 << 8));
}

#[test]
fn test_set_feature_abort() {
    let dev = new_device(Type3DeviceConfig::default());
    let cci = dev.mailbox();

    assert_eq!(
        set_feature(cci, PATROL_SCRUB_UUID, FeatureTransfer::INITIATE, 0, &[7]),
        ReturnCode::SUCCESS
    );
    // Only the owner of the transfer can abort it.
    assert_eq!(
        set_feature(cci, ECS_UUID, FeatureTransfer::ABORT, 0, &[]),
        ReturnCode::FEATURE_TRANSFER_IN_PROGRESS
    );
    assert_eq!(
        set_feature(cci, PATROL_SCRUB_UUID, FeatureTransfer::ABORT, 0, &[]),
        ReturnCode::SUCCESS
    );
    assert_eq!(
        set_feature(cci, PATROL_SCRUB_UUID, FeatureTransfer::FINISH, 1, &[1]),
        ReturnCode::FEATURE_TRANSFER_OUT_OF_ORDER
    );
    assert_eq!({ patrol_scrub(cci).cycle }, 12 | (1 << 8));

    // Another feature may start once the transfer is gone.
    assert_eq!(
        set_feature(cci, ECS_UUID, FeatureTransfer::FULL, 0, &[0; 7]),
        ReturnCode::SUCCESS
    );
}
