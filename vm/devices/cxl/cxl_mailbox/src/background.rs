// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The per-CCI background operation.
//!
//! At most one long-running command is in flight per CCI. Its progress is
//! recomputed once per second of virtual time until the planned runtime has
//! elapsed, at which point the job's completion action runs and the mailbox
//! interrupt is raised.

use crate::cci::Cci;
use crate::cci::CciTarget;
use crate::device::Type3State;
use cxl_spec::Opcode;
use cxl_spec::ReturnCode;
use cxl_spec::firmware::FwTransferAction;
use cxl_spec::infostat::BackgroundOperationStatus;
use cxl_spec::infostat::BackgroundStatusFlags;
use std::sync::Arc;
use tracing::instrument;

const UPDATE_INTERVAL_MS: u64 = 1000;

/// Jobs this far along are left to finish when an abort is requested.
const ABORT_CUTOFF_PERCENT: u8 = 85;

/// Sanitize runtime by total capacity: (upper bound in MiB, seconds).
const SANITIZE_RUNTIME_BUCKETS: &[(u64, u64)] = &[
    (512, 4),
    (1024, 8),
    (2048, 15),
    (4096, 30),
    (8192, 60),
    (16384, 120),
    (32768, 240),
    (65536, 480),
    (131072, 900),
    (262144, 1800),
    (524288, 3600),
    (1048576, 7200),
];
const SANITIZE_MAX_RUNTIME_SECS: u64 = 14400;

/// A long-running command, carrying what its completion needs.
#[derive(Debug)]
pub(crate) enum BackgroundJob {
    FirmwareTransfer {
        action: FwTransferAction,
        slot: u8,
    },
    Sanitize,
    MediaSanitize {
        /// (start, length) pairs.
        ranges: Vec<(u64, u64)>,
        fill: u8,
    },
    ScanMedia {
        start: u64,
        length: u64,
    },
}

struct RunningJob {
    job: BackgroundJob,
    start_ms: u64,
    runtime_ms: u64,
}

pub(crate) struct BackgroundState {
    opcode: Opcode,
    percent: u8,
    return_code: ReturnCode,
    aborted: bool,
    running: Option<RunningJob>,
}

impl BackgroundState {
    pub fn new() -> Self {
        Self {
            opcode: Opcode(0),
            percent: 0,
            return_code: ReturnCode::SUCCESS,
            aborted: false,
            running: None,
        }
    }
}

pub(crate) fn sanitize_runtime_ms(capacity: u64) -> u64 {
    let mib = capacity >> 20;
    let secs = SANITIZE_RUNTIME_BUCKETS
        .iter()
        .find(|&&(limit, _)| mib <= limit)
        .map_or(SANITIZE_MAX_RUNTIME_SECS, |&(_, secs)| secs);
    secs * 1000
}

/// Roughly half a microsecond per cache line.
pub(crate) fn scan_media_runtime_ms(length: u64) -> u64 {
    (length / 128_000).max(1)
}

impl Cci {
    pub(crate) fn background_running(&self) -> bool {
        self.background.lock().running.is_some()
    }

    pub(crate) fn scan_media_running(&self) -> bool {
        matches!(
            self.background.lock().running,
            Some(RunningJob {
                job: BackgroundJob::ScanMedia { .. },
                ..
            })
        )
    }

    pub(crate) fn start_background(&self, opcode: Opcode, job: BackgroundJob, runtime_ms: u64) {
        let now = self.clock.now_ms();
        let mut bg = self.background.lock();
        bg.opcode = opcode;
        bg.percent = 0;
        bg.return_code = ReturnCode::SUCCESS;
        bg.aborted = false;
        bg.running = Some(RunningJob {
            job,
            start_ms: now,
            runtime_ms: runtime_ms.max(1),
        });
        self.arm_tick(now + UPDATE_INTERVAL_MS);
        tracing::info!(cci = %self.name(), ?opcode, runtime_ms, "background operation started");
    }

    fn arm_tick(&self, deadline_ms: u64) {
        let this = self.this.clone();
        self.timer.arm(
            deadline_ms,
            Box::new(move || {
                if let Some(cci) = this.upgrade() {
                    cci.background_tick();
                }
            }),
        );
    }

    #[instrument(level = "trace", skip_all, fields(cci = %self.name()))]
    fn background_tick(&self) {
        let now = self.clock.now_ms();
        let mut bg = self.background.lock();
        let (start_ms, runtime_ms) = match &bg.running {
            Some(running) => (running.start_ms, running.runtime_ms),
            // Aborted after the tick was queued.
            None => return,
        };

        let elapsed = now.saturating_sub(start_ms);
        if elapsed < runtime_ms {
            let percent = (elapsed * 100 / runtime_ms) as u8;
            bg.percent = bg.percent.max(percent);
            self.arm_tick(now + UPDATE_INTERVAL_MS);
            return;
        }

        bg.percent = 100;
        let Some(running) = bg.running.take() else {
            return;
        };
        bg.return_code = match self.complete_job(running.job) {
            Ok(()) => ReturnCode::SUCCESS,
            Err(err) => {
                tracing::warn!(
                    error = err.as_ref() as &dyn std::error::Error,
                    "background operation failed"
                );
                ReturnCode::INTERNAL_ERROR
            }
        };
        let opcode = bg.opcode;
        let return_code = bg.return_code;
        drop(bg);

        tracing::info!(?opcode, ?return_code, "background operation complete");
        self.raise_interrupt();
    }

    fn complete_job(&self, job: BackgroundJob) -> anyhow::Result<()> {
        match job {
            BackgroundJob::FirmwareTransfer { action, slot } => {
                self.firmware
                    .lock()
                    .complete_transfer(action, slot, self.clock.now_ms());
            }
            BackgroundJob::Sanitize => {
                let state = self.media_device()?;
                let result = state.zero_all();
                // Media returns even if the fill failed.
                state.enable_media();
                result?;
            }
            BackgroundJob::MediaSanitize { ranges, fill } => {
                let state = self.media_device()?;
                let result = ranges
                    .into_iter()
                    .try_for_each(|(start, length)| state.memory.fill(start, length, fill));
                state.enable_media();
                result?;
            }
            BackgroundJob::ScanMedia { start, length } => {
                let state = self.media_device()?;
                state.poison.lock().complete_scan(start, length);
            }
        }
        Ok(())
    }

    fn media_device(&self) -> anyhow::Result<&Arc<Type3State>> {
        match self.target() {
            CciTarget::Type3(state) => Ok(state),
            CciTarget::Switch(_) => anyhow::bail!("media operation on a switch"),
        }
    }

    /// Requests that the running job stop.
    pub(crate) fn abort_background(&self) -> Result<(), ReturnCode> {
        let mut bg = self.background.lock();
        if bg.running.is_none() {
            return Ok(());
        }
        let abortable = self
            .effects(bg.opcode)
            .is_some_and(|effects| effects.request_abort_supported());
        if !abortable {
            return Err(ReturnCode::REQUEST_ABORT_NOT_SUPPORTED);
        }
        if bg.percent < ABORT_CUTOFF_PERCENT {
            self.timer.cancel();
            // A half-sanitized device must still accept a new sanitize.
            if let Some(RunningJob {
                job: BackgroundJob::Sanitize | BackgroundJob::MediaSanitize { .. },
                ..
            }) = bg.running.take()
            {
                if let CciTarget::Type3(state) = self.target() {
                    state.enable_media();
                }
            }
            bg.return_code = ReturnCode::ABORTED;
            bg.aborted = true;
            tracing::info!(cci = %self.name(), opcode = ?bg.opcode, percent = bg.percent, "background operation aborted");
        }
        Ok(())
    }

    pub(crate) fn background_status(&self) -> BackgroundOperationStatus {
        let bg = self.background.lock();
        BackgroundOperationStatus {
            status: BackgroundStatusFlags::new()
                .with_running(bg.running.is_some())
                .with_percent_complete(bg.percent),
            _reserved: 0,
            opcode: bg.opcode,
            return_code: bg.return_code,
            vendor_extended_status: if bg.aborted { 1 } else { 0 },
        }
    }
}
