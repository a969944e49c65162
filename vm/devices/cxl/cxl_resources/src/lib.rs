// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Configuration for emulated CXL Type-3 memory devices and switches.
//!
//! These are plain serializable descriptions. The emulator validates them
//! once when a device is built, so the command engine can rely on the
//! geometry being consistent afterwards.

#![forbid(unsafe_code)]

use cxl_spec::CACHE_LINE_SIZE;
use cxl_spec::dcd::MAX_DC_REGIONS;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

const MIB: u64 = 1024 * 1024;

/// PCI identity reported by Identify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentIdentity {
    /// PCI vendor id.
    pub vendor_id: u16,
    /// PCI device id.
    pub device_id: u16,
    /// PCI subsystem vendor id.
    pub subsystem_vendor_id: u16,
    /// PCI subsystem id.
    pub subsystem_id: u16,
    /// Device serial number.
    pub serial_number: u64,
}

impl Default for ComponentIdentity {
    fn default() -> Self {
        Self {
            vendor_id: 0x8086,
            device_id: 0x0d93,
            subsystem_vendor_id: 0,
            subsystem_id: 0,
            serial_number: 0,
        }
    }
}

/// One dynamic capacity region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DcRegionConfig {
    /// Region length in bytes.
    pub length: u64,
    /// Initial block size in bytes.
    pub block_size: u64,
    /// Mask of the block sizes the region can be reconfigured to. Each set
    /// bit is a supported power-of-two size.
    pub supported_block_sizes: u64,
    /// DSMAD handle reported for the region.
    pub dsmad_handle: u32,
    /// Released capacity is sanitized before reuse.
    pub sanitize_on_release: bool,
    /// Region capacity is persistent.
    pub nonvolatile: bool,
    /// Region capacity may be shared between hosts.
    pub sharable: bool,
    /// Coherency is managed by hardware.
    pub hw_managed_coherency: bool,
}

impl Default for DcRegionConfig {
    fn default() -> Self {
        Self {
            length: 256 * MIB,
            block_size: 2 * MIB,
            supported_block_sizes: 0x3fff_ffc0,
            dsmad_handle: 0,
            sanitize_on_release: false,
            nonvolatile: false,
            sharable: false,
            hw_managed_coherency: false,
        }
    }
}

impl DcRegionConfig {
    /// Creates a region of `length` bytes with the given block size, which
    /// is also the only supported size.
    pub fn new(length: u64, block_size: u64) -> Self {
        Self {
            length,
            block_size,
            supported_block_sizes: block_size,
            ..Default::default()
        }
    }

    /// Sets the mask of supported block sizes.
    pub fn with_supported_block_sizes(mut self, mask: u64) -> Self {
        self.supported_block_sizes = mask;
        self
    }

    /// Sets the sanitize-on-release flag.
    pub fn with_sanitize_on_release(mut self, sanitize: bool) -> Self {
        self.sanitize_on_release = sanitize;
        self
    }
}

/// An emulated CXL Type-3 memory device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Type3DeviceConfig {
    /// PCI identity.
    pub identity: ComponentIdentity,
    /// Volatile capacity in bytes, starting at DPA 0.
    pub volatile_size: u64,
    /// Persistent capacity in bytes, following the volatile capacity.
    pub persistent_size: u64,
    /// Label storage area size in bytes.
    pub lsa_size: u64,
    /// Dynamic capacity regions, laid out after the static capacity.
    pub dc_regions: Vec<DcRegionConfig>,
    /// Number of logical devices exposed behind the FM-owned LD.
    pub logical_devices: u8,
    /// Number of heads of a multi-headed device.
    pub heads: u8,
    /// MSI/MSI-X vector used for mailbox completion interrupts.
    pub mailbox_vector: u16,
}

impl Default for Type3DeviceConfig {
    fn default() -> Self {
        Self {
            identity: ComponentIdentity::default(),
            volatile_size: 256 * MIB,
            persistent_size: 0,
            lsa_size: 0,
            dc_regions: Vec::new(),
            logical_devices: 1,
            heads: 1,
            mailbox_vector: 0,
        }
    }
}

impl Type3DeviceConfig {
    /// Sets the volatile capacity.
    pub fn with_volatile_size(mut self, size: u64) -> Self {
        self.volatile_size = size;
        self
    }

    /// Sets the persistent capacity.
    pub fn with_persistent_size(mut self, size: u64) -> Self {
        self.persistent_size = size;
        self
    }

    /// Sets the label storage area size.
    pub fn with_lsa_size(mut self, size: u64) -> Self {
        self.lsa_size = size;
        self
    }

    /// Appends a dynamic capacity region.
    pub fn with_dc_region(mut self, region: DcRegionConfig) -> Self {
        self.dc_regions.push(region);
        self
    }

    /// Sets the number of logical devices and heads.
    pub fn with_logical_devices(mut self, lds: u8, heads: u8) -> Self {
        self.logical_devices = lds;
        self.heads = heads;
        self
    }

    /// Sets the serial number.
    pub fn with_serial_number(mut self, serial: u64) -> Self {
        self.identity.serial_number = serial;
        self
    }

    /// Size of the static (volatile plus persistent) capacity.
    pub fn static_size(&self) -> u64 {
        self.volatile_size + self.persistent_size
    }

    /// Checks that the described geometry is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.volatile_size % CACHE_LINE_SIZE != 0 || self.persistent_size % CACHE_LINE_SIZE != 0
        {
            return Err(ConfigError::UnalignedCapacity);
        }
        if self.dc_regions.len() > MAX_DC_REGIONS {
            return Err(ConfigError::TooManyRegions(self.dc_regions.len()));
        }
        for (index, region) in self.dc_regions.iter().enumerate() {
            if !region.block_size.is_power_of_two() {
                return Err(ConfigError::InvalidBlockSize {
                    index,
                    block_size: region.block_size,
                });
            }
            if region.supported_block_sizes & region.block_size == 0 {
                return Err(ConfigError::UnsupportedBlockSize {
                    index,
                    block_size: region.block_size,
                });
            }
            if region.length == 0 || region.length % region.block_size != 0 {
                return Err(ConfigError::UnalignedRegion {
                    index,
                    length: region.length,
                });
            }
        }
        if self.logical_devices == 0 {
            return Err(ConfigError::NoLogicalDevices);
        }
        if self.heads == 0 {
            return Err(ConfigError::NoHeads);
        }
        Ok(())
    }
}

/// One port of an emulated switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchPortConfig {
    /// Physical port number.
    pub port_number: u8,
    /// Maximum link width in lanes.
    pub max_link_width: u8,
    /// Maximum link speed, as a PCIe speed index (1 = 2.5 GT/s).
    pub max_link_speed: u8,
}

impl Default for SwitchPortConfig {
    fn default() -> Self {
        Self {
            port_number: 0,
            max_link_width: 16,
            max_link_speed: 5,
        }
    }
}

impl SwitchPortConfig {
    /// Creates a port with default link characteristics.
    pub fn new(port_number: u8) -> Self {
        Self {
            port_number,
            ..Default::default()
        }
    }
}

/// An emulated CXL switch with a switch mailbox CCI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchConfig {
    /// PCI identity of the upstream port.
    pub identity: ComponentIdentity,
    /// The upstream port.
    pub upstream_port: SwitchPortConfig,
    /// The downstream ports.
    pub downstream_ports: Vec<SwitchPortConfig>,
    /// MSI/MSI-X vector used for mailbox completion interrupts.
    pub mailbox_vector: u16,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            identity: ComponentIdentity {
                vendor_id: 0x19e5,
                device_id: 0xa128,
                ..Default::default()
            },
            upstream_port: SwitchPortConfig::new(0),
            downstream_ports: Vec::new(),
            mailbox_vector: 0,
        }
    }
}

impl SwitchConfig {
    /// Appends a downstream port.
    pub fn with_downstream_port(mut self, port: SwitchPortConfig) -> Self {
        self.downstream_ports.push(port);
        self
    }

    /// Checks that port numbers are unique.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = [false; 256];
        for port in std::iter::once(&self.upstream_port).chain(&self.downstream_ports) {
            let slot = &mut seen[port.port_number as usize];
            if *slot {
                return Err(ConfigError::DuplicatePort(port.port_number));
            }
            *slot = true;
        }
        Ok(())
    }
}

/// A configuration that cannot be emulated.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Static capacity is not a multiple of the cache line size.
    #[error("static capacity is not cache line aligned")]
    UnalignedCapacity,
    /// More dynamic capacity regions than the protocol can describe.
    #[error("{0} dynamic capacity regions configured, at most 8 supported")]
    TooManyRegions(usize),
    /// A region block size is zero or not a power of two.
    #[error("region {index} block size {block_size:#x} is not a power of two")]
    InvalidBlockSize {
        /// Region index.
        index: usize,
        /// Offending block size.
        block_size: u64,
    },
    /// A region block size is missing from its supported mask.
    #[error("region {index} block size {block_size:#x} is not in the supported mask")]
    UnsupportedBlockSize {
        /// Region index.
        index: usize,
        /// Offending block size.
        block_size: u64,
    },
    /// A region length is zero or not a multiple of its block size.
    #[error("region {index} length {length:#x} is not a multiple of its block size")]
    UnalignedRegion {
        /// Region index.
        index: usize,
        /// Offending length.
        length: u64,
    },
    /// A device must expose at least one logical device.
    #[error("device has no logical devices")]
    NoLogicalDevices,
    /// A device must have at least one head.
    #[error("device has no heads")]
    NoHeads,
    /// Two switch ports share a number.
    #[error("switch port {0} is configured twice")]
    DuplicatePort(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_type3_from_json() {
        let config: Type3DeviceConfig = serde_json::from_str(
            r#"{
                "volatile_size": 536870912,
                "lsa_size": 1024,
                "dc_regions": [{ "length": 268435456, "block_size": 2097152 }],
                "logical_devices": 2
            }"#,
        )
        .unwrap();
        assert_eq!(config.volatile_size, 512 * MIB);
        assert_eq!(config.persistent_size, 0);
        assert_eq!(config.lsa_size, 1024);
        assert_eq!(config.dc_regions.len(), 1);
        assert_eq!(config.dc_regions[0].supported_block_sizes, 0x3fff_ffc0);
        assert_eq!(config.logical_devices, 2);
        assert_eq!(config.heads, 1);
        config.validate().unwrap();
    }

    #[test]
    fn reject_bad_regions() {
        let config = Type3DeviceConfig::default().with_dc_region(DcRegionConfig::new(4096, 3000));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBlockSize { index: 0, .. })
        ));

        let config = Type3DeviceConfig::default().with_dc_region(
            DcRegionConfig::new(4096, 1024).with_supported_block_sizes(2048),
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnsupportedBlockSize { index: 0, .. })
        ));

        let config = Type3DeviceConfig::default().with_dc_region(DcRegionConfig::new(1536, 1024));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnalignedRegion { index: 0, .. })
        ));

        let config = Type3DeviceConfig::default().with_logical_devices(0, 1);
        assert_eq!(config.validate(), Err(ConfigError::NoLogicalDevices));
    }

    #[test]
    fn reject_duplicate_switch_ports() {
        let config = SwitchConfig::default()
            .with_downstream_port(SwitchPortConfig::new(1))
            .with_downstream_port(SwitchPortConfig::new(1));
        assert_eq!(config.validate(), Err(ConfigError::DuplicatePort(1)));

        let config = SwitchConfig::default().with_downstream_port(SwitchPortConfig::new(2));
        config.validate().unwrap();
    }
}
