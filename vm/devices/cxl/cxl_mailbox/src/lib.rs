// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Mailbox command engine for emulated CXL memory devices and switches.
//!
//! A CXL component is managed through one or more Component Command
//! Interfaces (CCIs). Each [`Cci`] owns a command table, at most one
//! background operation, and the firmware update state. Commands are
//! submitted with [`Cci::process`], which runs the admission checks, calls
//! the handler, and either returns the output payload or hands the command
//! off to the background operation. Background completions are reported
//! through the [`platform::MailboxInterrupt`] the CCI was built with.
//!
//! Two components are provided:
//! - [`Type3Device`], a memory expander with static and dynamic capacity,
//!   a poison list, and label storage. It exposes a primary mailbox, one
//!   CCI per logical device, and an FM-owned logical device CCI.
//! - [`CxlSwitch`], whose mailbox tunnels fabric manager commands to the
//!   devices connected below its downstream ports.
//!
//! Guest memory, virtual time, interrupts, and the event log are supplied
//! by the host through the traits in [`platform`].

#![forbid(unsafe_code)]

mod background;
mod cci;
mod commands;
mod device;
mod extent;
mod features;
pub mod platform;
mod poison;
mod switch;
mod timestamp;

#[cfg(test)]
mod tests;

pub use cci::Cci;
pub use cci::CciResponse;
pub use device::Type3Device;
pub use extent::DcExtent;
pub use extent::DcRegionCapabilities;
pub use poison::PoisonError;
pub use poison::PoisonRange;
pub use switch::CxlSwitch;

use cxl_resources::ConfigError;
use thiserror::Error;

/// Failure to build or wire up a component.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The configuration was rejected.
    #[error("invalid device configuration")]
    Config(#[from] ConfigError),
    /// The switch has no downstream port with this number.
    #[error("downstream port {0} is not configured")]
    UnknownPort(u8),
    /// A device is already connected below the port.
    #[error("downstream port {0} already has a device connected")]
    PortOccupied(u8),
}
