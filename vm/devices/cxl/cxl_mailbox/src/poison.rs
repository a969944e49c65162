// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Tracking of poisoned media.
//!
//! The live list holds what Get Poison List reports. Once it fills, further
//! poison is parked in a backup list and the list is marked overflowed until
//! a scan of the media accounts for every parked entry.

use cxl_spec::CACHE_LINE_SIZE;
use cxl_spec::ReturnCode;
use cxl_spec::poison::MediaErrorRecord;
use cxl_spec::poison::POISON_LIST_LIMIT;
use cxl_spec::poison::PoisonSource;
use std::collections::VecDeque;
use thiserror::Error;

/// A poisoned range of device physical address space.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PoisonRange {
    /// Starting device physical address, cache line aligned.
    pub start: u64,
    /// Length in bytes, a multiple of the cache line size.
    pub length: u64,
    /// How the poison came about.
    pub source: PoisonSource,
}

impl PoisonRange {
    pub(crate) fn end(&self) -> u64 {
        self.start.saturating_add(self.length)
    }

    fn overlaps(&self, start: u64, length: u64) -> bool {
        self.start < start.saturating_add(length) && start < self.end()
    }

    /// The part of this range inside the window.
    fn clip(&self, start: u64, length: u64) -> Self {
        let clipped_start = self.start.max(start);
        let clipped_end = self.end().min(start.saturating_add(length));
        Self {
            start: clipped_start,
            length: clipped_end.saturating_sub(clipped_start),
            source: self.source,
        }
    }

    pub(crate) fn to_record(self) -> MediaErrorRecord {
        MediaErrorRecord {
            address: self.start | self.source.0 as u64,
            length: (self.length / CACHE_LINE_SIZE) as u32,
            _reserved: 0,
        }
    }
}

/// Errors from poison bookkeeping.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoisonError {
    /// The live list has no room.
    #[error("poison list is full")]
    ListFull,
    /// The range is not cache line aligned.
    #[error("range {start:#x}+{length:#x} is not cache line aligned")]
    Unaligned {
        /// Start of the range.
        start: u64,
        /// Length of the range.
        length: u64,
    },
    /// The range is not device capacity.
    #[error("range {start:#x}+{length:#x} is outside the device")]
    OutOfRange {
        /// Start of the range.
        start: u64,
        /// Length of the range.
        length: u64,
    },
    /// The range overlaps recorded poison.
    #[error("range at {0:#x} overlaps recorded poison")]
    Overlapping(u64),
    /// No media scan has been requested.
    #[error("media has not been scanned")]
    NoScanResults,
}

impl From<PoisonError> for ReturnCode {
    fn from(err: PoisonError) -> Self {
        match err {
            PoisonError::ListFull => ReturnCode::INJECT_POISON_LIMIT,
            PoisonError::Unaligned { .. } | PoisonError::Overlapping(_) => {
                ReturnCode::INVALID_INPUT
            }
            PoisonError::OutOfRange { .. } => ReturnCode::INVALID_PA,
            PoisonError::NoScanResults => ReturnCode::UNSUPPORTED,
        }
    }
}

pub(crate) fn check_aligned(start: u64, length: u64) -> Result<(), PoisonError> {
    if start % CACHE_LINE_SIZE != 0 || length % CACHE_LINE_SIZE != 0 {
        return Err(PoisonError::Unaligned { start, length });
    }
    Ok(())
}

#[derive(Default)]
pub(crate) struct PoisonStore {
    live: Vec<PoisonRange>,
    backup: Vec<PoisonRange>,
    results: VecDeque<PoisonRange>,
    overflow_timestamp: Option<u64>,
    scan_has_run: bool,
}

impl PoisonStore {
    pub fn live(&self) -> &[PoisonRange] {
        &self.live
    }

    pub fn overflow_timestamp(&self) -> Option<u64> {
        self.overflow_timestamp
    }

    fn covered(&self, start: u64, length: u64) -> bool {
        self.live.iter().any(|p| p.overlaps(start, length))
    }

    fn push_or_park(&mut self, range: PoisonRange, timestamp: u64) {
        if self.live.len() < POISON_LIST_LIMIT {
            self.live.push(range);
        } else {
            self.backup.push(range);
            self.overflow_timestamp.get_or_insert(timestamp);
        }
    }

    /// Records injected poison on one cache line. Already poisoned lines
    /// are left alone.
    pub fn inject(&mut self, address: u64) -> Result<(), PoisonError> {
        if self.covered(address, CACHE_LINE_SIZE) {
            return Ok(());
        }
        if self.live.len() >= POISON_LIST_LIMIT {
            return Err(PoisonError::ListFull);
        }
        self.live.push(PoisonRange {
            start: address,
            length: CACHE_LINE_SIZE,
            source: PoisonSource::INJECTED,
        });
        Ok(())
    }

    /// Removes one cache line from the poison list, splitting the entry
    /// that covers it.
    pub fn clear(&mut self, address: u64, timestamp: u64) {
        let Some(index) = self
            .live
            .iter()
            .position(|p| p.overlaps(address, CACHE_LINE_SIZE))
        else {
            return;
        };
        let entry = self.live.swap_remove(index);
        if address > entry.start {
            self.live.push(PoisonRange {
                length: address - entry.start,
                ..entry
            });
        }
        let line_end = address + CACHE_LINE_SIZE;
        if line_end < entry.end() {
            self.push_or_park(
                PoisonRange {
                    start: line_end,
                    length: entry.end() - line_end,
                    ..entry
                },
                timestamp,
            );
        }
    }

    /// Records poison the device discovered on its own.
    pub fn record_media_error(
        &mut self,
        range: PoisonRange,
        timestamp: u64,
    ) -> Result<(), PoisonError> {
        if self.covered(range.start, range.length)
            || self
                .backup
                .iter()
                .any(|p| p.overlaps(range.start, range.length))
        {
            return Err(PoisonError::Overlapping(range.start));
        }
        self.push_or_park(range, timestamp);
        Ok(())
    }

    /// Live entries intersecting the window, clipped to it.
    pub fn list(&self, start: u64, length: u64) -> Vec<PoisonRange> {
        self.live
            .iter()
            .filter(|p| p.overlaps(start, length))
            .map(|p| p.clip(start, length))
            .collect()
    }

    pub fn begin_scan(&mut self) {
        self.results.clear();
        self.scan_has_run = true;
        if self.overflow_timestamp.is_some() {
            self.backup.append(&mut self.live);
        }
    }

    pub fn complete_scan(&mut self, start: u64, length: u64) {
        let found = self
            .live
            .iter()
            .chain(&self.backup)
            .filter(|p| p.overlaps(start, length))
            .map(|p| p.clip(start, length));
        self.results.extend(found);

        let mut index = 0;
        while index < self.backup.len() && self.live.len() < POISON_LIST_LIMIT {
            if self.backup[index].overlaps(start, length) {
                let entry = self.backup.remove(index);
                self.live.push(entry);
            } else {
                index += 1;
            }
        }

        if self.backup.is_empty() {
            self.overflow_timestamp = None;
        } else {
            tracing::debug!(
                parked = self.backup.len(),
                "poison list still overflowed after scan"
            );
        }
    }

    /// Takes up to `max` scan results. Also returns whether more remain.
    pub fn drain_results(&mut self, max: usize) -> Result<(Vec<PoisonRange>, bool), PoisonError> {
        if !self.scan_has_run {
            return Err(PoisonError::NoScanResults);
        }
        let count = max.min(self.results.len());
        let taken = self.results.drain(..count).collect();
        Ok((taken, !self.results.is_empty()))
    }
}
