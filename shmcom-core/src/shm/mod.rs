// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Shared control and data structures of the event binding.
//!
//! Everything in here is accessed lock-free by several processes. Mutation
//! goes through compare-exchange loops with bounded retries; exhausted
//! retries are either reported or fatal, never blocking.

mod data_storage;
mod event_control;
mod event_data_control;
mod pid_mapping;
mod region;
mod subscription_control;
mod transaction_log;

pub use data_storage::{EventDataStorage, ServiceDataStorage, MAX_SAMPLE_ALIGNMENT};
pub use event_control::{EventControl, ServiceDataControl, TransactionLogRegistrationGuard};
pub use event_data_control::{ContentionCounters, EventDataControl, EventSlotStatus};
pub use pid_mapping::{
    register_pid, register_pid_with, ApplicationIdPidMapping, ApplicationIdPidMappingEntry,
    MappingEntryStatus, DEFAULT_PID_REGISTRATION_RETRIES,
};
pub use region::{SharedMemoryLayout, SharedMemoryRegion};
pub use subscription_control::{
    EventSubscriptionControl, SubscribeResult, SubscriptionCounters,
    DEFAULT_SUBSCRIBE_RETRY_FACTOR, DEFAULT_UNSUBSCRIBE_RETRY_FACTOR,
};
pub use transaction_log::{TransactionLog, TransactionLogSet};
