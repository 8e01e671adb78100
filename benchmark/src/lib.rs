// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Shared fixtures for the shmcom benchmarks.

use std::sync::Arc;

use shmcom_core::shm::{EventControl, TransactionLogRegistrationGuard};
use shmcom_core::types::TransactionLogId;

/// Slot counts the slot cycle benchmarks run with.
pub const SLOT_COUNTS: &[u16] = &[4, 16, 64, 256];

/// Subscriber counts the subscription benchmarks run with.
pub const SUBSCRIBER_COUNTS: &[u8] = &[1, 3, 8, 32];

/// Event control with one registered consumer log.
pub fn event_with_consumer(max_slots: u16) -> (Arc<EventControl>, TransactionLogRegistrationGuard) {
    let control = Arc::new(EventControl::new(max_slots, 1, true));
    let guard = TransactionLogRegistrationGuard::create(&control, TransactionLogId::new(1))
        .expect("Failed to register transaction log");
    (control, guard)
}

/// Name for a benchmark shared memory segment, unique per process.
pub fn region_name(tag: &str) -> String {
    format!("shmcom-bench-{}-{}", tag, std::process::id())
}
