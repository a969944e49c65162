// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Definitions from the CXL specification for the Component Command
//! Interface (CCI): mailbox opcodes, return codes, command effects, and the
//! little-endian payload layouts exchanged with host drivers and fabric
//! managers.
//!
//! All payload structures are `#[repr(C, packed)]` so that their in-memory
//! layout is the wire layout. Sizes are checked at compile time.

#![expect(missing_docs)]
#![forbid(unsafe_code)]

/// Defines a transparent newtype over an integer with named constants, so
/// values outside the named set can still be carried and reported.
macro_rules! open_enum {
    (
        $(#[$attr:meta])*
        $vis:vis enum $name:ident: $ty:ty {
            $(
                $(#[$vattr:meta])*
                $variant:ident = $value:expr,
            )*
        }
    ) => {
        $(#[$attr])*
        #[repr(transparent)]
        #[derive(
            Copy,
            Clone,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            zerocopy::IntoBytes,
            zerocopy::FromBytes,
            zerocopy::Immutable,
            zerocopy::KnownLayout,
        )]
        $vis struct $name(pub $ty);

        impl $name {
            $(
                $(#[$vattr])*
                pub const $variant: $name = $name($value);
            )*
        }

        impl core::fmt::Debug for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                match *self {
                    $(Self::$variant => f.pad(stringify!($variant)),)*
                    _ => write!(f, "{}({:#x})", stringify!($name), self.0),
                }
            }
        }
    };
}

pub mod dcd;
pub mod events;
pub mod features;
pub mod firmware;
pub mod fmapi;
pub mod infostat;
pub mod logs;
pub mod memdev;
pub mod poison;
pub mod switch;

use bitfield_struct::bitfield;
use core::fmt;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// Granularity of poison tracking and media operations.
pub const CACHE_LINE_SIZE: u64 = 64;

/// Unit in which capacities are reported to the host.
pub const CAPACITY_MULTIPLIER: u64 = 256 * 1024 * 1024;

/// Default (and largest) mailbox payload size.
pub const MAILBOX_MAX_PAYLOAD_SIZE: usize = 1 << 11;

/// A 16-byte UUID in RFC 4122 byte order, as carried in CXL payloads.
#[repr(transparent)]
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, Default, IntoBytes, FromBytes, Immutable, KnownLayout,
)]
pub struct Uuid(pub [u8; 16]);

impl Uuid {
    /// The all-zero UUID.
    pub const NIL: Self = Self([0; 16]);

    /// Builds a UUID from its textual field groups, e.g.
    /// `0da9c0b5-bf41-4b78-8f79-96b1623b3f17` is
    /// `from_fields(0x0da9c0b5, 0xbf41, 0x4b78, [0x8f, 0x79, 0x96, 0xb1, 0x62, 0x3b, 0x3f, 0x17])`.
    pub const fn from_fields(d1: u32, d2: u16, d3: u16, d4: [u8; 8]) -> Self {
        let a = d1.to_be_bytes();
        let b = d2.to_be_bytes();
        let c = d3.to_be_bytes();
        Self([
            a[0], a[1], a[2], a[3], b[0], b[1], c[0], c[1], d4[0], d4[1], d4[2], d4[3], d4[4],
            d4[5], d4[6], d4[7],
        ])
    }

    /// Returns true if this is the all-zero UUID.
    pub fn is_nil(&self) -> bool {
        *self == Self::NIL
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                f.write_str("-")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

open_enum! {
    /// A mailbox opcode: the command set in the high byte and the command
    /// within the set in the low byte.
    pub enum Opcode: u16 {
        /// Identify the component.
        IDENTIFY = 0x0001,
        /// Report the state of the background operation.
        BACKGROUND_OPERATION_STATUS = 0x0002,
        /// Get the response message size limit.
        GET_RESPONSE_MESSAGE_LIMIT = 0x0003,
        /// Set the response message size limit.
        SET_RESPONSE_MESSAGE_LIMIT = 0x0004,
        /// Request that the background operation be aborted.
        BACKGROUND_OPERATION_ABORT = 0x0005,

        /// Get firmware slot information.
        GET_FW_INFO = 0x0200,
        /// Transfer a firmware package or part of one.
        TRANSFER_FW = 0x0201,
        /// Activate a firmware slot.
        ACTIVATE_FW = 0x0202,

        /// Read the device timestamp.
        GET_TIMESTAMP = 0x0300,
        /// Set the device timestamp.
        SET_TIMESTAMP = 0x0301,

        /// List the logs the component supports.
        GET_SUPPORTED_LOGS = 0x0400,
        /// Read a log.
        GET_LOG = 0x0401,

        /// List the features the component supports.
        GET_SUPPORTED_FEATURES = 0x0500,
        /// Read a feature's attributes.
        GET_FEATURE = 0x0501,
        /// Write a feature's attributes.
        SET_FEATURE = 0x0502,

        /// Identify the memory device.
        IDENTIFY_MEMORY_DEVICE = 0x4000,
        /// Get the capacity partitioning.
        GET_PARTITION_INFO = 0x4100,
        /// Read the label storage area.
        GET_LSA = 0x4102,
        /// Write the label storage area.
        SET_LSA = 0x4103,
        /// Read the health alert configuration.
        GET_ALERT_CONFIG = 0x4201,
        /// Write the health alert configuration.
        SET_ALERT_CONFIG = 0x4202,
        /// List poisoned ranges.
        GET_POISON_LIST = 0x4300,
        /// Inject poison at a cache line.
        INJECT_POISON = 0x4301,
        /// Clear poison at a cache line.
        CLEAR_POISON = 0x4302,
        /// Estimate the runtime of a scan.
        GET_SCAN_MEDIA_CAPABILITIES = 0x4303,
        /// Scan a media range for errors.
        SCAN_MEDIA = 0x4304,
        /// Retrieve the results of the last scan.
        GET_SCAN_MEDIA_RESULTS = 0x4305,
        /// Sanitize all media.
        SANITIZE = 0x4400,
        /// Discover or run range-based media operations.
        MEDIA_OPERATIONS = 0x4402,
        /// Read the persistent memory security state.
        GET_SECURITY_STATE = 0x4500,

        /// Get the dynamic capacity region configuration.
        GET_DC_CONFIG = 0x4800,
        /// List accepted dynamic capacity extents.
        GET_DC_EXTENT_LIST = 0x4801,
        /// Host response to an add capacity offer.
        ADD_DC_RESPONSE = 0x4802,
        /// Host release of dynamic capacity.
        RELEASE_DC = 0x4803,

        /// Identify a switch.
        IDENTIFY_SWITCH_DEVICE = 0x5100,
        /// Report the state of physical switch ports.
        GET_PHYSICAL_PORT_STATE = 0x5101,

        /// Forward a command to a nested CCI.
        TUNNEL_MANAGEMENT_COMMAND = 0x5300,

        /// Report multi-headed device information.
        GET_MHD_INFO = 0x5500,

        /// Report dynamic capacity device information.
        GET_DCD_INFO = 0x5600,
        /// Get the dynamic capacity configuration seen by a host.
        GET_HOST_DC_REGION_CONFIG = 0x5601,
        /// Reconfigure a dynamic capacity region.
        SET_DC_REGION_CONFIG = 0x5602,
        /// List the extents of one region.
        GET_DC_REGION_EXTENT_LIST = 0x5603,
        /// Offer dynamic capacity to a host.
        INITIATE_DC_ADD = 0x5604,
        /// Withdraw dynamic capacity from a host.
        INITIATE_DC_RELEASE = 0x5605,
    }
}

impl Opcode {
    /// Builds an opcode from its command set and command.
    pub const fn new(command_set: u8, command: u8) -> Self {
        Self(((command_set as u16) << 8) | command as u16)
    }

    /// The command set (high byte).
    pub const fn command_set(self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// The command within the set (low byte).
    pub const fn command(self) -> u8 {
        self.0 as u8
    }
}

open_enum! {
    /// The result of a mailbox command.
    pub enum ReturnCode: u16 {
        SUCCESS = 0x0,
        BACKGROUND_STARTED = 0x1,
        INVALID_INPUT = 0x2,
        UNSUPPORTED = 0x3,
        INTERNAL_ERROR = 0x4,
        RETRY_REQUIRED = 0x5,
        BUSY = 0x6,
        MEDIA_DISABLED = 0x7,
        FW_TRANSFER_IN_PROGRESS = 0x8,
        FW_TRANSFER_OUT_OF_ORDER = 0x9,
        FW_AUTH_FAILED = 0xa,
        FW_INVALID_SLOT = 0xb,
        FW_ROLLED_BACK = 0xc,
        FW_RESET_REQUIRED = 0xd,
        INVALID_HANDLE = 0xe,
        INVALID_PA = 0xf,
        INJECT_POISON_LIMIT = 0x10,
        PERMANENT_MEDIA_FAILURE = 0x11,
        ABORTED = 0x12,
        INVALID_SECURITY_STATE = 0x13,
        INCORRECT_PASSPHRASE = 0x14,
        UNSUPPORTED_MAILBOX = 0x15,
        INVALID_PAYLOAD_LENGTH = 0x16,
        INVALID_LOG = 0x17,
        INTERRUPTED = 0x18,
        UNSUPPORTED_FEATURE_VERSION = 0x19,
        UNSUPPORTED_FEATURE_SELECTION_VALUE = 0x1a,
        FEATURE_TRANSFER_IN_PROGRESS = 0x1b,
        FEATURE_TRANSFER_OUT_OF_ORDER = 0x1c,
        RESOURCES_EXHAUSTED = 0x1d,
        INVALID_EXTENT_LIST = 0x1e,
        TRANSFER_OUT_OF_ORDER = 0x1f,
        REQUEST_ABORT_NOT_SUPPORTED = 0x20,
    }
}

/// Side effects of a command, as reported in the Command Effects Log.
///
/// Warm reset has no bit of its own; commands requiring one set
/// `conventional_reset_config_change`.
#[bitfield(u16)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, PartialEq, Eq)]
pub struct CommandEffects {
    pub cold_reset_config_change: bool,
    pub immediate_config_change: bool,
    pub immediate_data_change: bool,
    pub immediate_policy_change: bool,
    pub immediate_log_change: bool,
    pub security_state_change: bool,
    pub background_operation: bool,
    pub secondary_mailbox_supported: bool,
    pub request_abort_supported: bool,
    pub conventional_reset_config_change: bool,
    pub cxl_reset_config_change: bool,
    #[bits(5)]
    _reserved: u8,
}

open_enum! {
    /// Category of a CCI message.
    pub enum CciCategory: u8 {
        REQUEST = 0,
        RESPONSE = 1,
    }
}

open_enum! {
    /// Component type reported by Identify.
    pub enum ComponentType: u8 {
        SWITCH = 0x00,
        TYPE3 = 0x03,
    }
}

/// Header of a CCI message, as embedded in a tunneled command.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct CciMessageHeader {
    pub category: CciCategory,
    pub tag: u8,
    pub _reserved: u8,
    pub command: u8,
    pub command_set: u8,
    /// 24-bit little-endian payload length.
    pub payload_length: [u8; 3],
    pub return_code: ReturnCode,
    pub vendor_specific: u16,
}

static_assertions::const_assert_eq!(size_of::<CciMessageHeader>(), 12);

impl CciMessageHeader {
    /// The decoded 24-bit payload length.
    pub fn payload_len(&self) -> usize {
        let [a, b, c] = self.payload_length;
        u32::from_le_bytes([a, b, c, 0]) as usize
    }

    /// Encodes `len` into the 24-bit payload length field.
    pub fn set_payload_len(&mut self, len: usize) {
        let [a, b, c, _] = (len as u32).to_le_bytes();
        self.payload_length = [a, b, c];
    }

    /// The opcode this message carries.
    pub fn opcode(&self) -> Opcode {
        Opcode::new(self.command_set, self.command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::FromZeros;

    #[test]
    fn uuid_formats_in_canonical_order() {
        let uuid = Uuid::from_fields(
            0x0da9c0b5,
            0xbf41,
            0x4b78,
            [0x8f, 0x79, 0x96, 0xb1, 0x62, 0x3b, 0x3f, 0x17],
        );
        assert_eq!(uuid.to_string(), "0da9c0b5-bf41-4b78-8f79-96b1623b3f17");
        assert_eq!(uuid.0[0], 0x0d);
        assert!(!uuid.is_nil());
        assert!(Uuid::NIL.is_nil());
    }

    #[test]
    fn opcode_split() {
        let op = Opcode::new(0x48, 0x02);
        assert_eq!(op, Opcode::ADD_DC_RESPONSE);
        assert_eq!(op.command_set(), 0x48);
        assert_eq!(op.command(), 0x02);
        assert_eq!(format!("{:?}", op), "ADD_DC_RESPONSE");
        assert_eq!(format!("{:?}", Opcode(0x7777)), "Opcode(0x7777)");
    }

    #[test]
    fn effects_bit_positions() {
        let effects = CommandEffects::new()
            .with_background_operation(true)
            .with_request_abort_supported(true);
        assert_eq!(effects.into_bits(), (1 << 6) | (1 << 8));
        assert_eq!(
            CommandEffects::new()
                .with_cxl_reset_config_change(true)
                .into_bits(),
            1 << 10
        );
    }

    #[test]
    fn message_header_payload_length() {
        let mut header = CciMessageHeader::new_zeroed();
        header.set_payload_len(0x012345);
        assert_eq!(header.payload_length, [0x45, 0x23, 0x01]);
        assert_eq!(header.payload_len(), 0x012345);
        assert_eq!(header.as_bytes().len(), 12);
    }
}
