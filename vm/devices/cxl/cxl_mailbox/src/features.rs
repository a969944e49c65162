// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Built-in device features and segmented Set Feature transfers.

use cxl_spec::ReturnCode;
use cxl_spec::Uuid;
use cxl_spec::features::ECS_MEDIA_FRU_COUNT;
use cxl_spec::features::ECS_UUID;
use cxl_spec::features::EcsFruReadAttributes;
use cxl_spec::features::EcsReadAttributes;
use cxl_spec::features::EcsWriteAttributes;
use cxl_spec::features::FEATURE_VERSION;
use cxl_spec::features::FeatureTransfer;
use cxl_spec::features::PATROL_SCRUB_UUID;
use cxl_spec::features::PatrolScrubReadAttributes;
use cxl_spec::features::PatrolScrubWriteAttributes;
use cxl_spec::features::SetFeatureHeader;
use thiserror::Error;
use zerocopy::FromZeros;
use zerocopy::IntoBytes;

const PATROL_SCRUB_CYCLE_CAPABILITY: u8 = 0b11;
const PATROL_SCRUB_DEFAULT_CYCLE_HOURS: u16 = 12;
const PATROL_SCRUB_MIN_CYCLE_HOURS: u16 = 1;
const ECS_LOG_ENTRY_TYPE_DEFAULT: u8 = 1;
const ECS_FRU_CAPABILITY: u8 = 1;
const ECS_THRESHOLD_COUNT_DEFAULT: u16 = 3;
const ECS_CONFIG_MASK: u16 = 0x1f;

/// A feature the device exposes, with its attribute sizes.
pub(crate) struct FeatureDescriptor {
    pub uuid: Uuid,
    pub get_size: usize,
    pub set_size: usize,
}

pub(crate) const FEATURES: &[FeatureDescriptor] = &[
    FeatureDescriptor {
        uuid: PATROL_SCRUB_UUID,
        get_size: size_of::<PatrolScrubReadAttributes>(),
        set_size: size_of::<PatrolScrubWriteAttributes>(),
    },
    FeatureDescriptor {
        uuid: ECS_UUID,
        get_size: size_of::<EcsReadAttributes>(),
        set_size: size_of::<EcsWriteAttributes>(),
    },
];

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum FeatureError {
    #[error("feature {0} is not supported")]
    UnknownFeature(Uuid),
    #[error("a transfer for feature {0} is in progress")]
    TransferInProgress(Uuid),
    #[error("transfer part received out of order")]
    OutOfOrder,
    #[error("feature version {0} is not supported")]
    UnsupportedVersion(u8),
    #[error("data at offset {offset:#x} length {length:#x} exceeds the feature")]
    TooLong { offset: usize, length: usize },
    #[error("invalid transfer action {0:?}")]
    InvalidAction(FeatureTransfer),
}

impl From<FeatureError> for ReturnCode {
    fn from(err: FeatureError) -> Self {
        match err {
            FeatureError::UnknownFeature(_) => ReturnCode::UNSUPPORTED,
            FeatureError::TransferInProgress(_) => ReturnCode::FEATURE_TRANSFER_IN_PROGRESS,
            FeatureError::OutOfOrder => ReturnCode::FEATURE_TRANSFER_OUT_OF_ORDER,
            FeatureError::UnsupportedVersion(_) => ReturnCode::UNSUPPORTED_FEATURE_VERSION,
            FeatureError::TooLong { .. } => ReturnCode::INVALID_PAYLOAD_LENGTH,
            FeatureError::InvalidAction(_) => ReturnCode::INVALID_INPUT,
        }
    }
}

#[derive(Debug)]
struct Transfer {
    uuid: Uuid,
    data_size: usize,
    last_action: FeatureTransfer,
    saved_across_reset: bool,
}

pub(crate) struct FeatureStore {
    patrol_scrub: PatrolScrubReadAttributes,
    ecs: EcsReadAttributes,
    patrol_scrub_staging: PatrolScrubWriteAttributes,
    ecs_staging: EcsWriteAttributes,
    transfer: Option<Transfer>,
}

impl FeatureStore {
    pub fn new() -> Self {
        Self {
            patrol_scrub: PatrolScrubReadAttributes {
                cycle_capability: PATROL_SCRUB_CYCLE_CAPABILITY,
                cycle: PATROL_SCRUB_DEFAULT_CYCLE_HOURS | (PATROL_SCRUB_MIN_CYCLE_HOURS << 8),
                flags: 0,
            },
            ecs: EcsReadAttributes {
                log_capability: ECS_LOG_ENTRY_TYPE_DEFAULT,
                frus: [EcsFruReadAttributes {
                    capability: ECS_FRU_CAPABILITY,
                    config: ECS_THRESHOLD_COUNT_DEFAULT,
                    flags: 0,
                }; ECS_MEDIA_FRU_COUNT],
            },
            patrol_scrub_staging: PatrolScrubWriteAttributes::new_zeroed(),
            ecs_staging: EcsWriteAttributes::new_zeroed(),
            transfer: None,
        }
    }

    /// The current readable attributes of a feature.
    pub fn read(&self, uuid: Uuid) -> Result<&[u8], FeatureError> {
        match uuid {
            PATROL_SCRUB_UUID => Ok(self.patrol_scrub.as_bytes()),
            ECS_UUID => Ok(self.ecs.as_bytes()),
            _ => Err(FeatureError::UnknownFeature(uuid)),
        }
    }

    fn staging(&mut self, uuid: Uuid) -> Result<&mut [u8], FeatureError> {
        match uuid {
            PATROL_SCRUB_UUID => Ok(self.patrol_scrub_staging.as_mut_bytes()),
            ECS_UUID => Ok(self.ecs_staging.as_mut_bytes()),
            _ => Err(FeatureError::UnknownFeature(uuid)),
        }
    }

    fn reset_transfer(&mut self) {
        self.transfer = None;
        self.patrol_scrub_staging.as_mut_bytes().fill(0);
        self.ecs_staging.as_mut_bytes().fill(0);
    }

    /// Applies one part of a Set Feature transfer.
    pub fn write(&mut self, header: &SetFeatureHeader, data: &[u8]) -> Result<(), FeatureError> {
        let uuid = header.uuid;
        let flags = header.flags;
        let action = FeatureTransfer(flags.transfer());
        if let Some(transfer) = &self.transfer {
            if transfer.uuid != uuid {
                return Err(FeatureError::TransferInProgress(transfer.uuid));
            }
        }

        match action {
            FeatureTransfer::ABORT => {
                tracing::debug!(%uuid, "set feature transfer aborted");
                self.reset_transfer();
                return Ok(());
            }
            FeatureTransfer::FULL => {
                if self.transfer.is_some() {
                    return Err(FeatureError::TransferInProgress(uuid));
                }
            }
            FeatureTransfer::INITIATE => self.reset_transfer(),
            FeatureTransfer::CONTINUE | FeatureTransfer::FINISH => {
                if self.transfer.is_none() {
                    return Err(FeatureError::OutOfOrder);
                }
            }
            _ => return Err(FeatureError::InvalidAction(action)),
        }

        if header.version != FEATURE_VERSION {
            return Err(FeatureError::UnsupportedVersion(header.version));
        }
        let offset = header.offset as usize;
        let staging = self.staging(uuid)?;
        let target = staging
            .get_mut(offset..offset + data.len())
            .ok_or(FeatureError::TooLong {
                offset,
                length: data.len(),
            })?;
        target.copy_from_slice(data);

        match action {
            FeatureTransfer::INITIATE | FeatureTransfer::CONTINUE => {
                let transfer = self.transfer.get_or_insert(Transfer {
                    uuid,
                    data_size: 0,
                    last_action: action,
                    saved_across_reset: flags.saved_across_reset(),
                });
                transfer.data_size = transfer.data_size.max(offset + data.len());
                transfer.last_action = action;
            }
            _ => {
                if let Some(transfer) = &self.transfer {
                    tracing::debug!(
                        %uuid,
                        data_size = transfer.data_size.max(offset + data.len()),
                        last_action = ?transfer.last_action,
                        saved_across_reset = transfer.saved_across_reset,
                        "set feature transfer finished"
                    );
                }
                self.commit(uuid);
                self.reset_transfer();
            }
        }
        Ok(())
    }

    /// Promotes the staged writable fields into the live attributes.
    fn commit(&mut self, uuid: Uuid) {
        match uuid {
            PATROL_SCRUB_UUID => {
                let staged = self.patrol_scrub_staging;
                let cycle = self.patrol_scrub.cycle;
                self.patrol_scrub.cycle = (cycle & !0xff) | staged.cycle_hours as u16;
                self.patrol_scrub.flags = (self.patrol_scrub.flags & !1) | (staged.flags & 1);
            }
            ECS_UUID => {
                let staged = self.ecs_staging;
                let fru_config = staged.fru_config;
                self.ecs.log_capability = staged.log_capability;
                for (fru, config) in self.ecs.frus.iter_mut().zip(fru_config) {
                    fru.config = config & ECS_CONFIG_MASK;
                }
            }
            _ => {}
        }
    }
}
