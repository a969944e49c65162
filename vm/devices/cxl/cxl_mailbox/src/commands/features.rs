// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Feature discovery and configuration commands.

use super::read_request;
use super::split_request;
use super::with_records;
use crate::cci::Cci;
use crate::cci::CommandDefinition;
use crate::cci::Completion;
use crate::cci::PayloadLength;
use crate::features::FEATURES;
use cxl_spec::CommandEffects;
use cxl_spec::Opcode;
use cxl_spec::ReturnCode;
use cxl_spec::features::FEATURE_VERSION;
use cxl_spec::features::FeatureAttributes;
use cxl_spec::features::FeatureSelection;
use cxl_spec::features::GetFeatureRequest;
use cxl_spec::features::GetSupportedFeaturesRequest;
use cxl_spec::features::SetFeatureEffects;
use cxl_spec::features::SetFeatureHeader;
use cxl_spec::features::SupportedFeatureEntry;
use cxl_spec::features::SupportedFeaturesHeader;

pub(crate) const COMMANDS: &[CommandDefinition] = &[
    CommandDefinition {
        opcode: Opcode::GET_SUPPORTED_FEATURES,
        name: "get supported features",
        handler: get_supported_features,
        input: PayloadLength::Exact(size_of::<GetSupportedFeaturesRequest>()),
        effects: CommandEffects::new(),
    },
    CommandDefinition {
        opcode: Opcode::GET_FEATURE,
        name: "get feature",
        handler: get_feature,
        input: PayloadLength::Exact(size_of::<GetFeatureRequest>()),
        effects: CommandEffects::new(),
    },
    CommandDefinition {
        opcode: Opcode::SET_FEATURE,
        name: "set feature",
        handler: set_feature,
        input: PayloadLength::Variable,
        effects: CommandEffects::new()
            .with_immediate_config_change(true)
            .with_immediate_data_change(true)
            .with_immediate_policy_change(true)
            .with_immediate_log_change(true)
            .with_security_state_change(true),
    },
];

fn get_supported_features(cci: &Cci, input: &[u8]) -> Result<Completion, ReturnCode> {
    let request: GetSupportedFeaturesRequest = read_request(input)?;
    let count = (request.count as usize).min(cci.payload_max());
    let start = request.start_index as usize;
    if count < size_of::<SupportedFeaturesHeader>() || start >= FEATURES.len() {
        return Err(ReturnCode::INVALID_INPUT);
    }

    let room = (count - size_of::<SupportedFeaturesHeader>()) / size_of::<SupportedFeatureEntry>();
    let entries: Vec<_> = FEATURES
        .iter()
        .enumerate()
        .skip(start)
        .take(room)
        .map(|(index, feature)| SupportedFeatureEntry {
            uuid: feature.uuid,
            index: index as u16,
            get_size: feature.get_size as u16,
            set_size: feature.set_size as u16,
            attributes: FeatureAttributes::new().with_changeable(true),
            get_version: FEATURE_VERSION,
            set_version: FEATURE_VERSION,
            set_effects: SetFeatureEffects::new()
                .with_immediate_config_change(true)
                .with_cel_valid(true),
            _reserved: [0; 18],
        })
        .collect();

    Ok(Completion::Done(with_records(
        &SupportedFeaturesHeader {
            device_feature_count: FEATURES.len() as u16,
            entries: entries.len() as u16,
            _reserved: [0; 4],
        },
        &entries,
    )))
}

fn get_feature(cci: &Cci, input: &[u8]) -> Result<Completion, ReturnCode> {
    let request: GetFeatureRequest = read_request(input)?;
    let selection = request.selection;
    let offset = request.offset as usize;
    let count = request.count as usize;
    if selection != FeatureSelection::CURRENT {
        return Err(ReturnCode::UNSUPPORTED);
    }
    if offset + count > cci.payload_max() {
        return Err(ReturnCode::INVALID_INPUT);
    }

    let state = cci.type3()?;
    let features = state.features.lock();
    let data = features.read(request.uuid)?;
    if offset >= data.len() {
        return Err(ReturnCode::INVALID_INPUT);
    }
    let end = (offset + count).min(data.len());
    Ok(Completion::Done(data[offset..end].to_vec()))
}

fn set_feature(cci: &Cci, input: &[u8]) -> Result<Completion, ReturnCode> {
    let (header, data) = split_request::<SetFeatureHeader>(input)?;
    let state = cci.type3()?;
    state.features.lock().write(&header, data)?;
    Ok(Completion::empty())
}
