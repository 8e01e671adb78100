// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Raw sample slots of a service instance.
//!
//! Slot contents are not synchronized here. Access follows the slot status
//! protocol of [`super::EventDataControl`]: a slot is written only while it
//! is allocated for writing and read only while it is referenced.

use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use crate::config::{DeploymentConfig, EventConfig};
use crate::types::{checked_align_up, ElementFqId, Pid, SlotIndex};

/// Largest supported sample alignment.
pub const MAX_SAMPLE_ALIGNMENT: usize = 16;

#[repr(C, align(16))]
struct AlignedBlock([u8; MAX_SAMPLE_ALIGNMENT]);

/// Raw slot array of one event.
pub struct EventDataStorage {
    blocks: Box<[UnsafeCell<AlignedBlock>]>,
    sample_size: usize,
    sample_alignment: usize,
    max_slots: usize,
}

// SAFETY: concurrent slot access is serialized by the slot status protocol;
// the storage itself never hands out overlapping mutable views.
unsafe impl Sync for EventDataStorage {}
unsafe impl Send for EventDataStorage {}

impl std::fmt::Debug for EventDataStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDataStorage")
            .field("sample_size", &self.sample_size)
            .field("sample_alignment", &self.sample_alignment)
            .field("max_slots", &self.max_slots)
            .finish()
    }
}

impl EventDataStorage {
    pub fn new(sample_size: usize, sample_alignment: usize, max_slots: usize) -> Self {
        ensure_contract!(
            sample_alignment.is_power_of_two() && sample_alignment <= MAX_SAMPLE_ALIGNMENT,
            "unsupported sample alignment {}",
            sample_alignment
        );
        let Some(total) = checked_align_up(sample_size, sample_alignment)
            .and_then(|aligned| aligned.checked_mul(max_slots))
        else {
            contract_violation!(
                "slot array size overflows: {} slots of {} bytes",
                max_slots,
                sample_size
            );
        };
        let block_count = total.div_ceil(MAX_SAMPLE_ALIGNMENT);
        Self {
            blocks: (0..block_count)
                .map(|_| UnsafeCell::new(AlignedBlock([0; MAX_SAMPLE_ALIGNMENT])))
                .collect(),
            sample_size,
            sample_alignment,
            max_slots,
        }
    }

    pub fn from_config(event: &EventConfig) -> Self {
        Self::new(
            event.sample_size,
            event.sample_alignment,
            usize::from(event.max_samples),
        )
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    pub fn sample_alignment(&self) -> usize {
        self.sample_alignment
    }

    pub fn max_slots(&self) -> usize {
        self.max_slots
    }

    /// Size of the raw slot array in bytes.
    pub fn raw_size(&self) -> usize {
        self.blocks.len() * MAX_SAMPLE_ALIGNMENT
    }

    /// Start of the raw slot array.
    pub fn base_ptr(&self) -> *mut u8 {
        UnsafeCell::raw_get(self.blocks.as_ptr()) as *mut u8
    }

    /// Pointer to the first byte of `slot`.
    pub(crate) fn slot_ptr(&self, slot: SlotIndex) -> *mut u8 {
        ensure_contract!(
            usize::from(slot) < self.max_slots,
            "slot {} out of range ({} slots)",
            slot,
            self.max_slots
        );
        let offset = checked_align_up(self.sample_size, self.sample_alignment)
            .and_then(|aligned| aligned.checked_mul(usize::from(slot)));
        match offset {
            // SAFETY: slot < max_slots and the array spans aligned * max_slots.
            Some(offset) => unsafe { self.base_ptr().add(offset) },
            None => contract_violation!("slot offset overflows for slot {}", slot),
        }
    }
}

/// Data side of a provided service instance.
#[derive(Debug)]
pub struct ServiceDataStorage {
    skeleton_pid: AtomicI32,
    events: HashMap<ElementFqId, Arc<EventDataStorage>>,
}

impl ServiceDataStorage {
    pub fn new() -> Self {
        Self {
            skeleton_pid: AtomicI32::new(0),
            events: HashMap::new(),
        }
    }

    pub fn from_config(config: &DeploymentConfig) -> Self {
        let mut storage = Self::new();
        for event in &config.events {
            storage.insert_event(
                config.service.element_fq_id(event),
                EventDataStorage::from_config(event),
            );
        }
        storage
    }

    pub fn insert_event(&mut self, id: ElementFqId, storage: EventDataStorage) -> Arc<EventDataStorage> {
        let storage = Arc::new(storage);
        self.events.insert(id, Arc::clone(&storage));
        storage
    }

    pub fn event_storage(&self, id: &ElementFqId) -> Option<&Arc<EventDataStorage>> {
        self.events.get(id)
    }

    /// Pid of the skeleton currently providing the service.
    pub fn skeleton_pid(&self) -> Pid {
        self.skeleton_pid.load(Ordering::Acquire)
    }

    pub fn set_skeleton_pid(&self, pid: Pid) {
        self.skeleton_pid.store(pid, Ordering::Release);
    }
}

impl Default for ServiceDataStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::expect_termination;

    #[test]
    fn test_slots_are_aligned_and_disjoint() {
        let storage = EventDataStorage::new(5, 8, 4);
        assert_eq!(storage.raw_size(), 32);

        let base = storage.base_ptr() as usize;
        for slot in 0..4u16 {
            let ptr = storage.slot_ptr(slot) as usize;
            assert_eq!(ptr % 8, 0);
            assert_eq!(ptr - base, 8 * usize::from(slot));
        }
    }

    #[test]
    fn test_slot_out_of_range_terminates() {
        expect_termination(module_path!(), "test_slot_out_of_range_terminates", || {
            let storage = EventDataStorage::new(4, 4, 2);
            storage.slot_ptr(2);
        });
    }

    #[test]
    fn test_size_overflow_terminates() {
        expect_termination(module_path!(), "test_size_overflow_terminates", || {
            EventDataStorage::new(usize::MAX / 2, 8, 4);
        });
    }

    #[test]
    fn test_skeleton_pid_round_trip() {
        let storage = ServiceDataStorage::new();
        assert_eq!(storage.skeleton_pid(), 0);
        storage.set_skeleton_pid(4711);
        assert_eq!(storage.skeleton_pid(), 4711);
    }
}
