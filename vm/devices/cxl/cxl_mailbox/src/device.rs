// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The Type-3 memory device and the CCIs it exposes.

use crate::DeviceError;
use crate::cci::Cci;
use crate::cci::CciTarget;
use crate::commands;
use crate::extent::DcExtent;
use crate::extent::DcRegionCapabilities;
use crate::extent::DynamicCapacity;
use crate::features::FeatureStore;
use crate::platform::EventLog;
use crate::platform::MemoryBackend;
use crate::platform::Type3Platform;
use crate::poison::PoisonError;
use crate::poison::PoisonRange;
use crate::poison::PoisonStore;
use crate::poison::check_aligned;
use crate::timestamp::Timestamp;
use cxl_resources::ComponentIdentity;
use cxl_resources::Type3DeviceConfig;
use cxl_spec::dcd::DcExtentRecord;
use cxl_spec::events::DYNAMIC_CAPACITY_EVENT_UUID;
use cxl_spec::events::DcEventFlags;
use cxl_spec::events::DcEventType;
use cxl_spec::events::DynamicCapacityEvent;
use cxl_spec::events::EVENT_RECORD_SIZE;
use cxl_spec::events::EventLogType;
use cxl_spec::events::EventRecordHeader;
use cxl_spec::memdev::AlertConfig;
use cxl_spec::memdev::AlertFlags;
use cxl_spec::poison::PoisonSource;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use zerocopy::FromZeros;
use zerocopy::IntoBytes;

/// State shared by all CCIs of one Type-3 device.
pub(crate) struct Type3State {
    pub identity: ComponentIdentity,
    pub volatile_size: u64,
    pub persistent_size: u64,
    pub lsa_size: u64,
    pub logical_devices: u8,
    pub heads: u8,
    pub memory: Arc<dyn MemoryBackend>,
    events: Arc<dyn EventLog>,
    pub timestamp: Timestamp,
    media_disabled: AtomicBool,
    pub poison: Mutex<PoisonStore>,
    pub dc: DynamicCapacity,
    pub features: Mutex<FeatureStore>,
    pub alerts: Mutex<AlertConfig>,
}

fn default_alert_config() -> AlertConfig {
    AlertConfig {
        valid_alerts: AlertFlags::new(),
        enabled_alerts: AlertFlags::new(),
        life_used_critical_threshold: 75,
        life_used_warning_threshold: 40,
        over_temperature_critical_threshold: 35,
        under_temperature_critical_threshold: 10,
        over_temperature_warning_threshold: 25,
        under_temperature_warning_threshold: 20,
        corrected_volatile_error_warning_threshold: 0,
        corrected_persistent_error_warning_threshold: 0,
    }
}

impl Type3State {
    pub fn static_size(&self) -> u64 {
        self.volatile_size + self.persistent_size
    }

    /// Static plus dynamic capacity.
    pub fn total_size(&self) -> u64 {
        self.static_size() + self.dc.total_capacity()
    }

    /// Returns whether the range is device capacity, either static or
    /// inside one dynamic capacity region.
    pub fn contains_dpa(&self, start: u64, length: u64) -> bool {
        start
            .checked_add(length)
            .is_some_and(|end| end <= self.static_size())
            || self.dc.region_for(start, length).is_some()
    }

    pub fn media_disabled(&self) -> bool {
        self.media_disabled.load(Ordering::Acquire)
    }

    pub fn disable_media(&self) {
        self.media_disabled.store(true, Ordering::Release);
    }

    pub fn enable_media(&self) {
        self.media_disabled.store(false, Ordering::Release);
    }

    /// Zero-fills all capacity.
    pub fn zero_all(&self) -> anyhow::Result<()> {
        if self.static_size() != 0 {
            self.memory.fill(0, self.static_size(), 0)?;
        }
        for region in self.dc.regions() {
            self.memory.fill(region.base, region.length, 0)?;
        }
        Ok(())
    }

    /// Appends a record to the dynamic capacity event log.
    pub fn emit_dc_event(
        &self,
        event_type: DcEventType,
        host_id: u16,
        region_id: u8,
        extent: Option<DcExtent>,
        more: bool,
    ) {
        let event = DynamicCapacityEvent {
            header: EventRecordHeader {
                id: DYNAMIC_CAPACITY_EVENT_UUID,
                length: EVENT_RECORD_SIZE as u8,
                flags: [0; 3],
                handle: 0,
                related_handle: 0,
                timestamp: self.timestamp.get(),
                maintenance_class: 0,
                maintenance_subclass: 0,
                _reserved: [0; 0xe],
            },
            event_type,
            validity_flags: 1,
            host_id,
            updated_region_id: region_id,
            flags: DcEventFlags::new().with_more(more),
            _reserved1: [0; 2],
            extent: extent.map_or_else(DcExtentRecord::new_zeroed, DcExtent::to_record),
            _reserved2: [0; 0x18],
            extents_available: self.dc.available() as u32,
            tags_available: 0,
        };
        if !self
            .events
            .insert(EventLogType::DYNAMIC_CAPACITY, event.as_bytes())
        {
            tracing::warn!(?event_type, "dynamic capacity event log full, event dropped");
        }
    }
}

/// An emulated CXL Type-3 memory device.
///
/// The device answers commands on three kinds of CCI: the primary mailbox
/// used by the host driver, one CCI per logical device, and the FM-owned
/// logical device that a fabric manager reaches through a tunnel.
pub struct Type3Device {
    state: Arc<Type3State>,
    mailbox: Arc<Cci>,
    fm_owned_ld: Arc<Cci>,
    logical_devices: Vec<Arc<Cci>>,
}

impl Type3Device {
    /// Builds a device from its configuration.
    pub fn new(config: &Type3DeviceConfig, platform: Type3Platform) -> Result<Self, DeviceError> {
        config.validate()?;

        let state = Arc::new(Type3State {
            identity: config.identity.clone(),
            volatile_size: config.volatile_size,
            persistent_size: config.persistent_size,
            lsa_size: config.lsa_size,
            logical_devices: config.logical_devices,
            heads: config.heads,
            memory: platform.memory,
            events: platform.events,
            timestamp: Timestamp::new(platform.cci.clock.clone()),
            media_disabled: AtomicBool::new(false),
            poison: Mutex::new(PoisonStore::default()),
            dc: DynamicCapacity::new(config.static_size(), &config.dc_regions),
            features: Mutex::new(FeatureStore::new()),
            alerts: Mutex::new(default_alert_config()),
        });

        let mailbox = Cci::new(
            "type3",
            CciTarget::Type3(state.clone()),
            Vec::new(),
            &platform.cci,
            config.mailbox_vector,
        );
        commands::register_generic(&mailbox);
        commands::register_type3(&mailbox);
        if !config.dc_regions.is_empty() {
            commands::register_dynamic_capacity(&mailbox);
        }

        let logical_devices: Vec<_> = (0..config.logical_devices)
            .map(|ld| {
                let cci = Cci::new(
                    format!("type3-ld{ld}"),
                    CciTarget::Type3(state.clone()),
                    Vec::new(),
                    &platform.cci,
                    config.mailbox_vector,
                );
                commands::register_logical_device(&cci);
                cci
            })
            .collect();

        let fm_owned_ld = Cci::new(
            "type3-fm-ld",
            CciTarget::Type3(state.clone()),
            logical_devices.clone(),
            &platform.cci,
            config.mailbox_vector,
        );
        commands::register_fm_owned_ld(&fm_owned_ld);

        tracing::info!(
            serial = config.identity.serial_number,
            static_size = state.static_size(),
            dc_regions = config.dc_regions.len(),
            logical_devices = config.logical_devices,
            "cxl type3 device created"
        );

        Ok(Self {
            state,
            mailbox,
            fm_owned_ld,
            logical_devices,
        })
    }

    pub(crate) fn state(&self) -> &Arc<Type3State> {
        &self.state
    }

    /// The primary mailbox.
    pub fn mailbox(&self) -> &Arc<Cci> {
        &self.mailbox
    }

    /// The CCI of the FM-owned logical device.
    pub fn fm_owned_ld(&self) -> &Arc<Cci> {
        &self.fm_owned_ld
    }

    /// The CCI of logical device `index`.
    pub fn logical_device(&self, index: usize) -> Option<&Arc<Cci>> {
        self.logical_devices.get(index)
    }

    /// Records poison found by the device itself, as opposed to injected by
    /// the host.
    pub fn report_media_error(
        &self,
        start: u64,
        length: u64,
        source: PoisonSource,
    ) -> Result<(), PoisonError> {
        check_aligned(start, length)?;
        if length == 0 || !self.state.contains_dpa(start, length) {
            return Err(PoisonError::OutOfRange { start, length });
        }
        let timestamp = self.state.timestamp.get();
        self.state.poison.lock().record_media_error(
            PoisonRange {
                start,
                length,
                source,
            },
            timestamp,
        )
    }

    /// The poison list as Get Poison List would report it over all
    /// capacity.
    pub fn poison_list(&self) -> Vec<PoisonRange> {
        self.state.poison.lock().live().to_vec()
    }

    /// Returns whether the media is disabled, e.g. during a sanitize.
    pub fn is_media_disabled(&self) -> bool {
        self.state.media_disabled()
    }

    /// Extents the host has accepted.
    pub fn accepted_extents(&self) -> Vec<DcExtent> {
        self.state.dc.accepted()
    }

    /// Extents offered to the host and not yet answered.
    pub fn pending_extent_count(&self) -> usize {
        self.state.dc.pending_count()
    }

    /// The number of blocks of a dynamic capacity region backed by accepted
    /// extents.
    pub fn backed_blocks(&self, region: usize) -> Option<usize> {
        self.state.dc.regions().get(region).map(|r| r.backed_blocks())
    }

    /// The memory attributes of a dynamic capacity region.
    pub fn dc_region_capabilities(&self, region: usize) -> Option<DcRegionCapabilities> {
        self.state.dc.regions().get(region).map(|r| r.capabilities)
    }
}
