// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::platform::VirtualClock;
use parking_lot::Mutex;
use std::sync::Arc;

/// The host-settable device timestamp, in nanoseconds.
///
/// Reads return the last value the host set, advanced by the virtual time
/// elapsed since, or zero if the host never set one.
pub(crate) struct Timestamp {
    clock: Arc<dyn VirtualClock>,
    // (host value, virtual time when it was set)
    set: Mutex<Option<(u64, u64)>>,
}

impl Timestamp {
    pub fn new(clock: Arc<dyn VirtualClock>) -> Self {
        Self {
            clock,
            set: Mutex::new(None),
        }
    }

    pub fn get(&self) -> u64 {
        match *self.set.lock() {
            Some((host, set_at)) => {
                host.wrapping_add(self.clock.now_ns().saturating_sub(set_at))
            }
            None => 0,
        }
    }

    pub fn set(&self, host: u64) {
        *self.set.lock() = Some((host, self.clock.now_ns()));
    }
}
