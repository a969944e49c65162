// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Services the command engine consumes from the surrounding device model.

use cxl_spec::events::EventLogType;
use std::sync::Arc;

/// Access to the device's backing memory and label storage area, addressed
/// by device physical address.
pub trait MemoryBackend: Send + Sync {
    /// Writes `data` at `dpa`.
    fn write(&self, dpa: u64, data: &[u8]) -> anyhow::Result<()>;

    /// Fills `len` bytes starting at `dpa` with `value`.
    fn fill(&self, dpa: u64, len: u64, value: u8) -> anyhow::Result<()>;

    /// Reads from the label storage area.
    fn read_lsa(&self, offset: u64, data: &mut [u8]) -> anyhow::Result<()>;

    /// Writes to the label storage area.
    fn write_lsa(&self, offset: u64, data: &[u8]) -> anyhow::Result<()>;
}

/// The virtual clock background jobs and timestamps are measured against.
pub trait VirtualClock: Send + Sync {
    /// Current time in milliseconds.
    fn now_ms(&self) -> u64;

    /// Current time in nanoseconds.
    fn now_ns(&self) -> u64 {
        self.now_ms() * 1_000_000
    }
}

/// A one-shot timer on the virtual clock.
pub trait BackgroundTimer: Send + Sync {
    /// Arms the timer to run `callback` once the clock reaches
    /// `deadline_ms`, replacing any previously armed callback.
    ///
    /// The callback must not be invoked from within `arm`.
    fn arm(&self, deadline_ms: u64, callback: Box<dyn FnOnce() + Send>);

    /// Disarms the timer. A callback that has not run yet never will.
    fn cancel(&self);
}

/// Creates timers for CCIs.
pub trait TimerSource: Send + Sync {
    /// Creates a new, disarmed timer.
    fn new_timer(&self) -> Box<dyn BackgroundTimer>;
}

/// The interrupt mechanism currently enabled on the function.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InterruptMode {
    /// No interrupts are enabled.
    Disabled,
    /// MSI is enabled.
    Msi,
    /// MSI-X is enabled.
    MsiX,
}

/// Raises the mailbox completion interrupt.
pub trait MailboxInterrupt: Send + Sync {
    /// The currently enabled mode.
    fn mode(&self) -> InterruptMode;

    /// Signals `vector` using `mode`.
    fn signal(&self, mode: InterruptMode, vector: u16);
}

/// The device's event logs.
pub trait EventLog: Send + Sync {
    /// Appends a raw event record to `log`. Returns false if the log is
    /// full and the record was dropped.
    fn insert(&self, log: EventLogType, record: &[u8]) -> bool;
}

/// Services shared by every CCI.
#[derive(Clone)]
pub struct CciPlatform {
    /// Clock for timestamps and job progress.
    pub clock: Arc<dyn VirtualClock>,
    /// Source of background job timers.
    pub timers: Arc<dyn TimerSource>,
    /// Mailbox completion interrupt.
    pub interrupt: Arc<dyn MailboxInterrupt>,
}

/// Services used by a Type-3 memory device.
#[derive(Clone)]
pub struct Type3Platform {
    /// Services for the device's CCIs.
    pub cci: CciPlatform,
    /// Backing memory.
    pub memory: Arc<dyn MemoryBackend>,
    /// Event logs.
    pub events: Arc<dyn EventLog>,
}
