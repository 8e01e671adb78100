// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Samples handed out to consumers and the bound on how many are in flight.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::shm::{EventControl, EventDataStorage};
use crate::types::{EventTimeStamp, SlotIndex, TransactionLogIndex};

#[derive(Debug)]
struct TrackerState {
    available: AtomicUsize,
    capacity: usize,
}

/// Bounds the number of samples a consumer holds at once.
#[derive(Debug, Clone)]
pub struct SampleReferenceTracker {
    state: Arc<TrackerState>,
}

impl SampleReferenceTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            state: Arc::new(TrackerState {
                available: AtomicUsize::new(max_samples),
                capacity: max_samples,
            }),
        }
    }

    /// Reserve up to `requested` references.
    pub fn allocate(&self, requested: usize) -> TrackerGuardFactory {
        let mut current = self.state.available.load(Ordering::Acquire);
        loop {
            let granted = requested.min(current);
            match self.state.available.compare_exchange_weak(
                current,
                current - granted,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return TrackerGuardFactory {
                        state: Arc::clone(&self.state),
                        remaining: granted,
                    }
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub fn num_available(&self) -> usize {
        self.state.available.load(Ordering::Acquire)
    }

    /// Whether any reference is reserved.
    pub fn is_used(&self) -> bool {
        self.num_available() != self.state.capacity
    }
}

/// Reserved references not yet bound to a sample. Unused ones are returned on
/// drop.
#[derive(Debug)]
pub struct TrackerGuardFactory {
    state: Arc<TrackerState>,
    remaining: usize,
}

impl TrackerGuardFactory {
    pub fn num_available_guards(&self) -> usize {
        self.remaining
    }

    pub fn take_guard(&mut self) -> Option<SampleReferenceGuard> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(SampleReferenceGuard {
            state: Arc::clone(&self.state),
        })
    }
}

impl Drop for TrackerGuardFactory {
    fn drop(&mut self) {
        self.state
            .available
            .fetch_add(self.remaining, Ordering::AcqRel);
    }
}

/// One reserved reference. Returned on drop.
#[derive(Debug)]
pub struct SampleReferenceGuard {
    state: Arc<TrackerState>,
}

impl Drop for SampleReferenceGuard {
    fn drop(&mut self) {
        self.state.available.fetch_add(1, Ordering::AcqRel);
    }
}

/// A referenced sample slot.
///
/// Holds one slot reference and one tracker reference. Dropping it releases
/// both.
#[derive(Debug)]
pub struct SamplePtr {
    storage: Arc<EventDataStorage>,
    event_control: Arc<EventControl>,
    offset: usize,
    slot: SlotIndex,
    transaction_log_index: TransactionLogIndex,
    timestamp: EventTimeStamp,
    _guard: SampleReferenceGuard,
}

impl SamplePtr {
    pub(crate) fn new(
        storage: Arc<EventDataStorage>,
        event_control: Arc<EventControl>,
        offset: usize,
        slot: SlotIndex,
        transaction_log_index: TransactionLogIndex,
        guard: SampleReferenceGuard,
    ) -> Self {
        let timestamp = event_control.data_control().status(slot).timestamp();
        Self {
            storage,
            event_control,
            offset,
            slot,
            transaction_log_index,
            timestamp,
            _guard: guard,
        }
    }

    /// Raw sample bytes.
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: the slot is referenced, so the producer will not reallocate
        // it; offset + sample_size lies inside the slot array.
        unsafe {
            std::slice::from_raw_parts(
                self.storage.base_ptr().add(self.offset),
                self.storage.sample_size(),
            )
        }
    }

    pub fn slot(&self) -> SlotIndex {
        self.slot
    }

    pub fn timestamp(&self) -> EventTimeStamp {
        self.timestamp
    }
}

impl Drop for SamplePtr {
    fn drop(&mut self) {
        self.event_control
            .data_control()
            .dereference_event(self.slot, self.transaction_log_index);
    }
}
