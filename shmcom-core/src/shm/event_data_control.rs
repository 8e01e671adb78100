// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Slot status words of one event and the lock-free protocols on them.
//!
//! The producer allocates a slot (marks it in writing), fills the matching
//! data slot, then publishes it with a timestamp. Consumers reference the
//! newest slot in a timestamp window by incrementing its reference count and
//! dereference it when done. A slot with a non-zero reference count is never
//! reallocated.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::atomics::{AtomicIndirector, RealAtomics};
use crate::types::{EventTimeStamp, SlotIndex, TransactionLogIndex};

use super::transaction_log::TransactionLogSet;

const MAX_ALLOCATE_RETRIES: u32 = 100;
const MAX_REFERENCE_RETRIES: u32 = 100;

/// Decoded slot status word: timestamp in the upper half, reference count in
/// the lower half.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventSlotStatus(u64);

impl EventSlotStatus {
    /// Timestamp value reserved for slots being written.
    pub const TIMESTAMP_IN_WRITING: EventTimeStamp = EventTimeStamp::MAX;

    pub const fn new(timestamp: EventTimeStamp, reference_count: u32) -> Self {
        Self(((timestamp as u64) << 32) | reference_count as u64)
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn in_writing() -> Self {
        Self::new(Self::TIMESTAMP_IN_WRITING, 0)
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }

    pub const fn timestamp(&self) -> EventTimeStamp {
        (self.0 >> 32) as EventTimeStamp
    }

    pub const fn reference_count(&self) -> u32 {
        self.0 as u32
    }

    pub const fn is_invalid(&self) -> bool {
        self.0 == 0
    }

    pub const fn is_in_writing(&self) -> bool {
        self.timestamp() == Self::TIMESTAMP_IN_WRITING
    }

    /// Readable and strictly between `min` and `max`.
    pub const fn is_timestamp_between(&self, min: EventTimeStamp, max: EventTimeStamp) -> bool {
        !self.is_invalid()
            && !self.is_in_writing()
            && self.timestamp() > min
            && self.timestamp() < max
    }
}

/// Snapshot of allocation and reference contention.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContentionCounters {
    pub allocation_misses: u64,
    pub allocation_retries: u64,
    pub reference_misses: u64,
    pub reference_retries: u64,
}

#[derive(Debug, Default)]
struct Counters {
    allocation_misses: AtomicU64,
    allocation_retries: AtomicU64,
    reference_misses: AtomicU64,
    reference_retries: AtomicU64,
}

/// Control data of one event: slot status words plus consumer transaction
/// logs.
#[derive(Debug)]
pub struct EventDataControl {
    state_slots: Box<[AtomicU64]>,
    transaction_log_set: TransactionLogSet,
    counters: Counters,
}

impl EventDataControl {
    pub fn new(max_slots: SlotIndex, max_subscribers: u8) -> Self {
        Self {
            state_slots: (0..max_slots).map(|_| AtomicU64::new(0)).collect(),
            transaction_log_set: TransactionLogSet::new(
                usize::from(max_subscribers),
                usize::from(max_slots),
            ),
            counters: Counters::default(),
        }
    }

    pub fn max_slots(&self) -> usize {
        self.state_slots.len()
    }

    pub fn transaction_log_set(&self) -> &TransactionLogSet {
        &self.transaction_log_set
    }

    fn slot(&self, index: SlotIndex) -> &AtomicU64 {
        match self.state_slots.get(usize::from(index)) {
            Some(slot) => slot,
            None => contract_violation!(
                "slot index {} out of range ({} slots)",
                index,
                self.state_slots.len()
            ),
        }
    }

    pub fn status(&self, index: SlotIndex) -> EventSlotStatus {
        EventSlotStatus::from_raw(self.slot(index).load(Ordering::Acquire))
    }

    fn find_oldest_unused_slot(&self) -> Option<(SlotIndex, EventSlotStatus)> {
        let mut oldest: Option<(SlotIndex, EventSlotStatus)> = None;
        for (index, slot) in self.state_slots.iter().enumerate() {
            let status = EventSlotStatus::from_raw(slot.load(Ordering::Acquire));
            if status.is_invalid() {
                return Some((index as SlotIndex, status));
            }
            if status.reference_count() == 0
                && !status.is_in_writing()
                && oldest.map_or(true, |(_, o)| status.timestamp() < o.timestamp())
            {
                oldest = Some((index as SlotIndex, status));
            }
        }
        oldest
    }

    /// Claim the oldest unreferenced slot for writing.
    pub fn allocate_next_slot(&self) -> Option<SlotIndex> {
        self.allocate_next_slot_with(&RealAtomics)
    }

    pub fn allocate_next_slot_with<A: AtomicIndirector>(&self, atomics: &A) -> Option<SlotIndex> {
        let mut retries = 0u64;
        let mut claimed = None;
        for _ in 0..MAX_ALLOCATE_RETRIES {
            let Some((index, status)) = self.find_oldest_unused_slot() else {
                retries += 1;
                continue;
            };
            if atomics
                .compare_exchange_u64(
                    self.slot(index),
                    status.raw(),
                    EventSlotStatus::in_writing().raw(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                claimed = Some(index);
                break;
            }
            retries += 1;
        }

        self.counters
            .allocation_retries
            .fetch_add(retries, Ordering::Relaxed);
        if claimed.is_none() {
            self.counters
                .allocation_misses
                .fetch_add(1, Ordering::Relaxed);
            tracing::debug!(max_slots = self.state_slots.len(), "No slot available for writing");
        }
        claimed
    }

    /// Publish a written slot. Only the single producer calls this.
    pub fn event_ready(&self, index: SlotIndex, timestamp: EventTimeStamp) {
        ensure_contract!(
            self.status(index).is_in_writing(),
            "event_ready on slot {} which is not in writing",
            index
        );
        self.slot(index)
            .store(EventSlotStatus::new(timestamp, 0).raw(), Ordering::Release);
    }

    /// Give up a slot allocated for writing. Other slots are left alone.
    pub fn discard(&self, index: SlotIndex) {
        if self.status(index).is_in_writing() {
            self.slot(index).store(0, Ordering::Release);
        }
    }

    /// Reference the newest readable slot with a timestamp in
    /// `(last_search_time, upper_limit)`.
    pub fn reference_next_event(
        &self,
        last_search_time: EventTimeStamp,
        transaction_log_index: TransactionLogIndex,
        upper_limit: EventTimeStamp,
    ) -> Option<SlotIndex> {
        self.reference_next_event_with(
            last_search_time,
            transaction_log_index,
            upper_limit,
            &RealAtomics,
        )
    }

    pub fn reference_next_event_with<A: AtomicIndirector>(
        &self,
        last_search_time: EventTimeStamp,
        transaction_log_index: TransactionLogIndex,
        upper_limit: EventTimeStamp,
        atomics: &A,
    ) -> Option<SlotIndex> {
        let log = self.transaction_log_set.transaction_log(transaction_log_index);

        for attempt in 0..MAX_REFERENCE_RETRIES {
            let mut candidate: Option<(SlotIndex, EventSlotStatus)> = None;
            for (index, slot) in self.state_slots.iter().enumerate() {
                let status = EventSlotStatus::from_raw(slot.load(Ordering::Relaxed));
                let lower = candidate.map_or(last_search_time, |(_, c)| c.timestamp());
                if status.is_timestamp_between(lower, upper_limit) {
                    candidate = Some((index as SlotIndex, status));
                }
            }

            let (index, status) = candidate?;
            ensure_contract!(
                status.reference_count() != u32::MAX,
                "reference count of slot {} would overflow",
                index
            );

            log.reference_transaction_begin(index);
            if atomics
                .compare_exchange_u64(
                    self.slot(index),
                    status.raw(),
                    status.raw() + 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                log.reference_transaction_commit(index);
                self.counters
                    .reference_retries
                    .fetch_add(u64::from(attempt), Ordering::Relaxed);
                return Some(index);
            }
            log.reference_transaction_abort(index);
        }

        self.counters
            .reference_retries
            .fetch_add(u64::from(MAX_REFERENCE_RETRIES), Ordering::Relaxed);
        self.counters.reference_misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Number of readable slots newer than `reference_time`.
    pub fn num_new_events(&self, reference_time: EventTimeStamp) -> usize {
        self.state_slots
            .iter()
            .filter(|slot| {
                EventSlotStatus::from_raw(slot.load(Ordering::Relaxed))
                    .is_timestamp_between(reference_time, EventTimeStamp::MAX)
            })
            .count()
    }

    /// Newest published timestamp, 0 if nothing was published.
    pub fn latest_timestamp(&self) -> EventTimeStamp {
        self.state_slots
            .iter()
            .map(|slot| EventSlotStatus::from_raw(slot.load(Ordering::Acquire)))
            .filter(|status| !status.is_invalid() && !status.is_in_writing())
            .map(|status| status.timestamp())
            .max()
            .unwrap_or(0)
    }

    /// Drop one reference taken through `transaction_log_index`.
    pub fn dereference_event(&self, index: SlotIndex, transaction_log_index: TransactionLogIndex) {
        let log = self.transaction_log_set.transaction_log(transaction_log_index);
        log.dereference_transaction_begin(index);
        self.slot(index).fetch_sub(1, Ordering::AcqRel);
        log.dereference_transaction_commit(index);
    }

    /// Drop one reference during rollback, where the log is replayed by the
    /// caller.
    pub fn dereference_event_without_transaction_logging(&self, index: SlotIndex) {
        self.slot(index).fetch_sub(1, Ordering::AcqRel);
    }

    /// Release every slot a crashed producer left in writing.
    pub fn remove_allocations_for_writing(&self) {
        for (index, slot) in self.state_slots.iter().enumerate() {
            let status = EventSlotStatus::from_raw(slot.load(Ordering::Acquire));
            if !status.is_in_writing() {
                continue;
            }
            if slot
                .compare_exchange(status.raw(), 0, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                contract_violation!("slot {} changed while removing stale writer allocation", index);
            }
        }
    }

    pub fn contention_counters(&self) -> ContentionCounters {
        ContentionCounters {
            allocation_misses: self.counters.allocation_misses.load(Ordering::Relaxed),
            allocation_retries: self.counters.allocation_retries.load(Ordering::Relaxed),
            reference_misses: self.counters.reference_misses.load(Ordering::Relaxed),
            reference_retries: self.counters.reference_retries.load(Ordering::Relaxed),
        }
    }
}
