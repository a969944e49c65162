// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Unit tests driving the command engine through its mailboxes.



/// Background operations: progress, completion, and abort.
pub mod background_tests;

/// Firmware slot management and transfers.
pub mod firmware_tests;



/// Get and Set Feature.
pub mod features_tests;


/// The switch mailbox.
pub mod switch_tests;

use tracing_subscriber::EnvFilter;

/// Routes trace output to the test harness. Set `RUST_LOG` to see it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
