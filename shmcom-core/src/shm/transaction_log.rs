// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Per-consumer transaction logs for crash-safe restart.
//!
//! Every mutation a consumer makes on shared control data (subscribe, slot
//! reference, slot dereference, unsubscribe) is bracketed by a begin/end
//! flag pair in its log. After a crash, a restarted consumer with the same
//! [`TransactionLogId`] replays its log backwards: completed references are
//! dereferenced and a completed subscription is unsubscribed. A transaction
//! interrupted half-way cannot be undone safely and makes the restart fail.
//!
//! Flag pair meaning:
//!
//! | begin | end   | state                              |
//! |-------|-------|------------------------------------|
//! | false | false | idle                               |
//! | true  | false | increment (reference/subscribe) in flight |
//! | true  | true  | increment committed                |
//! | false | true  | decrement (dereference/unsubscribe) in flight |

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::error::ComError;
use crate::types::{SlotIndex, TransactionLogId, TransactionLogIndex};

const NO_SAMPLE_COUNT: u32 = u32::MAX;

#[derive(Debug, Default)]
struct TransactionEnds {
    begin: AtomicBool,
    end: AtomicBool,
}

impl TransactionEnds {
    fn get(&self) -> (bool, bool) {
        (
            self.begin.load(Ordering::Acquire),
            self.end.load(Ordering::Acquire),
        )
    }

    fn set_begin(&self, value: bool) {
        self.begin.store(value, Ordering::Release);
    }

    fn set_end(&self, value: bool) {
        self.end.store(value, Ordering::Release);
    }

    fn is_idle(&self) -> bool {
        self.get() == (false, false)
    }
}

/// Transaction record of one consumer for one event.
#[derive(Debug)]
pub struct TransactionLog {
    reference_count_slots: Box<[TransactionEnds]>,
    subscribe_transactions: TransactionEnds,
    subscription_max_sample_count: AtomicU32,
}

impl TransactionLog {
    pub fn new(number_of_slots: usize) -> Self {
        Self {
            reference_count_slots: (0..number_of_slots)
                .map(|_| TransactionEnds::default())
                .collect(),
            subscribe_transactions: TransactionEnds::default(),
            subscription_max_sample_count: AtomicU32::new(NO_SAMPLE_COUNT),
        }
    }

    fn slot(&self, slot_index: SlotIndex) -> &TransactionEnds {
        match self.reference_count_slots.get(usize::from(slot_index)) {
            Some(slot) => slot,
            None => contract_violation!(
                "slot index {} out of range for transaction log with {} slots",
                slot_index,
                self.reference_count_slots.len()
            ),
        }
    }

    pub fn subscribe_transaction_begin(&self, max_sample_count: u16) {
        ensure_contract!(
            self.subscribe_transactions.is_idle(),
            "subscribe begin on a log with a recorded subscription"
        );
        self.subscribe_transactions.set_begin(true);
        self.subscription_max_sample_count
            .store(u32::from(max_sample_count), Ordering::Release);
    }

    pub fn subscribe_transaction_commit(&self) {
        ensure_contract!(
            self.subscribe_transactions.get() == (true, false),
            "subscribe commit without begin"
        );
        self.subscribe_transactions.set_end(true);
    }

    pub fn subscribe_transaction_abort(&self) {
        ensure_contract!(
            self.subscribe_transactions.get() == (true, false),
            "subscribe abort without begin"
        );
        self.subscribe_transactions.set_begin(false);
    }

    pub fn unsubscribe_transaction_begin(&self) {
        ensure_contract!(
            self.subscribe_transactions.get() == (true, true),
            "unsubscribe begin without committed subscription"
        );
        self.subscribe_transactions.set_begin(false);
    }

    pub fn unsubscribe_transaction_commit(&self) {
        ensure_contract!(
            self.subscribe_transactions.get() == (false, true),
            "unsubscribe commit without begin"
        );
        self.subscription_max_sample_count
            .store(NO_SAMPLE_COUNT, Ordering::Release);
        self.subscribe_transactions.set_end(false);
    }

    pub fn reference_transaction_begin(&self, slot_index: SlotIndex) {
        let slot = self.slot(slot_index);
        ensure_contract!(
            slot.is_idle(),
            "reference begin on slot {} which already has a transaction",
            slot_index
        );
        slot.set_begin(true);
    }

    pub fn reference_transaction_commit(&self, slot_index: SlotIndex) {
        let slot = self.slot(slot_index);
        ensure_contract!(
            slot.get() == (true, false),
            "reference commit on slot {} without begin",
            slot_index
        );
        slot.set_end(true);
    }

    pub fn reference_transaction_abort(&self, slot_index: SlotIndex) {
        let slot = self.slot(slot_index);
        ensure_contract!(
            slot.get() == (true, false),
            "reference abort on slot {} without begin",
            slot_index
        );
        slot.set_begin(false);
    }

    pub fn dereference_transaction_begin(&self, slot_index: SlotIndex) {
        let slot = self.slot(slot_index);
        ensure_contract!(
            slot.get() == (true, true),
            "dereference begin on slot {} without committed reference",
            slot_index
        );
        slot.set_begin(false);
    }

    pub fn dereference_transaction_commit(&self, slot_index: SlotIndex) {
        let slot = self.slot(slot_index);
        ensure_contract!(
            slot.get() == (false, true),
            "dereference commit on slot {} without begin",
            slot_index
        );
        slot.set_end(false);
    }

    /// Undo everything this log records.
    ///
    /// `dereference` is called for each committed slot reference, then
    /// `unsubscribe` with the recorded max sample count if a subscription was
    /// committed.
    pub fn rollback_proxy_element_log(
        &self,
        dereference: &mut impl FnMut(SlotIndex),
        unsubscribe: &mut impl FnMut(u16),
    ) -> Result<(), ComError> {
        if self.subscribe_transactions.is_idle() {
            ensure_contract!(
                !self.has_slot_transactions(),
                "slot transactions recorded without a subscription"
            );
        }
        self.rollback_increment_transactions(dereference)?;
        self.rollback_subscribe_transactions(unsubscribe)
    }

    fn rollback_increment_transactions(
        &self,
        dereference: &mut impl FnMut(SlotIndex),
    ) -> Result<(), ComError> {
        for index in 0..self.reference_count_slots.len() {
            let slot_index = index as SlotIndex;
            match self.reference_count_slots[index].get() {
                (true, true) => {
                    self.dereference_transaction_begin(slot_index);
                    dereference(slot_index);
                    self.dereference_transaction_commit(slot_index);
                }
                (true, false) => {
                    tracing::error!(slot = slot_index, "Previous consumer crashed while referencing a slot");
                    return Err(ComError::CouldNotRestartProxy {
                        reason: format!("crash while incrementing slot {}", slot_index),
                    });
                }
                (false, true) => {
                    tracing::error!(slot = slot_index, "Previous consumer crashed while dereferencing a slot");
                    return Err(ComError::CouldNotRestartProxy {
                        reason: format!("crash while decrementing slot {}", slot_index),
                    });
                }
                (false, false) => {}
            }
        }
        Ok(())
    }

    fn rollback_subscribe_transactions(
        &self,
        unsubscribe: &mut impl FnMut(u16),
    ) -> Result<(), ComError> {
        match self.subscribe_transactions.get() {
            (true, true) => {
                let count = self.subscription_max_sample_count.load(Ordering::Acquire);
                ensure_contract!(
                    count != NO_SAMPLE_COUNT,
                    "committed subscription without recorded sample count"
                );
                self.unsubscribe_transaction_begin();
                unsubscribe(count as u16);
                self.unsubscribe_transaction_commit();
                Ok(())
            }
            (true, false) => {
                tracing::error!("Previous consumer crashed while subscribing");
                Err(ComError::CouldNotRestartProxy {
                    reason: "crash during subscribe".to_string(),
                })
            }
            (false, true) => {
                tracing::error!("Previous consumer crashed while unsubscribing");
                Err(ComError::CouldNotRestartProxy {
                    reason: "crash during unsubscribe".to_string(),
                })
            }
            (false, false) => Ok(()),
        }
    }

    fn has_slot_transactions(&self) -> bool {
        self.reference_count_slots.iter().any(|slot| !slot.is_idle())
    }

    pub fn contains_transactions(&self) -> bool {
        !self.subscribe_transactions.is_idle() || self.has_slot_transactions()
    }

    /// Max sample count of the recorded subscription, if any.
    pub fn subscription_max_sample_count(&self) -> Option<u16> {
        match self.subscription_max_sample_count.load(Ordering::Acquire) {
            NO_SAMPLE_COUNT => None,
            count => Some(count as u16),
        }
    }
}

#[derive(Debug)]
struct TransactionLogNode {
    needs_rollback: AtomicBool,
    transaction_log_id: AtomicU32,
    transaction_log: TransactionLog,
}

impl TransactionLogNode {
    fn new(number_of_slots: usize) -> Self {
        Self {
            needs_rollback: AtomicBool::new(false),
            transaction_log_id: AtomicU32::new(TransactionLogId::INVALID),
            transaction_log: TransactionLog::new(number_of_slots),
        }
    }

    fn is_active(&self) -> bool {
        self.transaction_log_id.load(Ordering::Acquire) != TransactionLogId::INVALID
    }

    fn belongs_to(&self, id: TransactionLogId) -> bool {
        self.transaction_log_id.load(Ordering::Acquire) == id.value()
    }

    fn try_acquire(&self, id: TransactionLogId) -> bool {
        ensure_contract!(
            id.value() != TransactionLogId::INVALID,
            "acquire with the invalid transaction log id"
        );
        self.transaction_log_id
            .compare_exchange(
                TransactionLogId::INVALID,
                id.value(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn reset(&self) {
        ensure_contract!(
            !self.transaction_log.contains_transactions(),
            "reset of a transaction log that still records transactions"
        );
        ensure_contract!(self.is_active(), "reset of a transaction log that was never acquired");
        self.needs_rollback.store(false, Ordering::Release);
        self.transaction_log_id
            .store(TransactionLogId::INVALID, Ordering::Release);
    }
}

/// Fixed pool of transaction logs, one node per possible subscriber.
#[derive(Debug)]
pub struct TransactionLogSet {
    proxy_transaction_logs: Box<[TransactionLogNode]>,
}

impl TransactionLogSet {
    pub fn new(max_number_of_logs: usize, number_of_slots: usize) -> Self {
        Self {
            proxy_transaction_logs: (0..max_number_of_logs)
                .map(|_| TransactionLogNode::new(number_of_slots))
                .collect(),
        }
    }

    /// Claim a free log for `id`.
    pub fn register_proxy_element(
        &self,
        id: TransactionLogId,
    ) -> Result<TransactionLogIndex, ComError> {
        for _ in 0..self.proxy_transaction_logs.len() {
            for (index, node) in self.proxy_transaction_logs.iter().enumerate() {
                if node.try_acquire(id) {
                    node.needs_rollback.store(false, Ordering::Release);
                    ensure_contract!(
                        !node.transaction_log.contains_transactions(),
                        "acquired transaction log still records transactions"
                    );
                    return Ok(index);
                }
            }
        }
        tracing::warn!(
            transaction_log_id = %id,
            capacity = self.proxy_transaction_logs.len(),
            "No free transaction log, max subscribers exceeded"
        );
        Err(ComError::MaxSubscribersExceeded)
    }

    /// Release a log. It must not record any transaction.
    pub fn unregister(&self, index: TransactionLogIndex) {
        self.node(index).reset();
    }

    pub fn transaction_log(&self, index: TransactionLogIndex) -> &TransactionLog {
        let node = self.node(index);
        ensure_contract!(
            node.is_active(),
            "transaction log {} accessed before registration",
            index
        );
        &node.transaction_log
    }

    /// Flag every active log of `id` as left over from a previous run.
    pub fn mark_transaction_logs_need_rollback(&self, id: TransactionLogId) {
        for node in self.proxy_transaction_logs.iter() {
            if node.is_active() && node.belongs_to(id) {
                node.needs_rollback.store(true, Ordering::Release);
            }
        }
    }

    /// Roll back and free the first marked log of `id` that rolls back
    /// cleanly. Returns the last rollback error if none did.
    pub fn rollback_proxy_transactions(
        &self,
        id: TransactionLogId,
        mut dereference: impl FnMut(SlotIndex),
        mut unsubscribe: impl FnMut(u16),
    ) -> Result<(), ComError> {
        let mut result = Ok(());
        for node in self.proxy_transaction_logs.iter() {
            if !(node.belongs_to(id) && node.needs_rollback.load(Ordering::Acquire)) {
                continue;
            }
            result = node
                .transaction_log
                .rollback_proxy_element_log(&mut dereference, &mut unsubscribe);
            if result.is_ok() {
                node.reset();
                return Ok(());
            }
        }
        result
    }

    pub fn capacity(&self) -> usize {
        self.proxy_transaction_logs.len()
    }

    fn node(&self, index: TransactionLogIndex) -> &TransactionLogNode {
        match self.proxy_transaction_logs.get(index) {
            Some(node) => node,
            None => contract_violation!(
                "transaction log index {} out of range ({})",
                index,
                self.proxy_transaction_logs.len()
            ),
        }
    }

    #[cfg(test)]
    pub(crate) fn needs_rollback(&self, index: TransactionLogIndex) -> bool {
        self.node(index).needs_rollback.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::expect_termination;

    const ID: TransactionLogId = TransactionLogId::new(7);

    #[test]
    fn test_full_cycle_leaves_log_empty() {
        let log = TransactionLog::new(4);
        log.subscribe_transaction_begin(3);
        log.subscribe_transaction_commit();
        assert_eq!(log.subscription_max_sample_count(), Some(3));

        log.reference_transaction_begin(2);
        log.reference_transaction_commit(2);
        log.dereference_transaction_begin(2);
        log.dereference_transaction_commit(2);

        log.unsubscribe_transaction_begin();
        log.unsubscribe_transaction_commit();
        assert!(!log.contains_transactions());
        assert_eq!(log.subscription_max_sample_count(), None);
    }

    #[test]
    fn test_aborted_transactions_leave_log_empty() {
        let log = TransactionLog::new(2);
        log.subscribe_transaction_begin(1);
        log.subscribe_transaction_abort();
        assert!(!log.contains_transactions());

        log.subscribe_transaction_begin(1);
        log.subscribe_transaction_commit();
        log.reference_transaction_begin(0);
        log.reference_transaction_abort(0);
        log.unsubscribe_transaction_begin();
        log.unsubscribe_transaction_commit();
        assert!(!log.contains_transactions());
    }

    #[test]
    fn test_rollback_undoes_committed_work() {
        let log = TransactionLog::new(4);
        log.subscribe_transaction_begin(5);
        log.subscribe_transaction_commit();
        for slot in [1, 3] {
            log.reference_transaction_begin(slot);
            log.reference_transaction_commit(slot);
        }

        let mut dereferenced = Vec::new();
        let mut unsubscribed = Vec::new();
        log.rollback_proxy_element_log(
            &mut |slot| dereferenced.push(slot),
            &mut |count| unsubscribed.push(count),
        )
        .unwrap();

        assert_eq!(dereferenced, vec![1, 3]);
        assert_eq!(unsubscribed, vec![5]);
        assert!(!log.contains_transactions());
    }

    #[test]
    fn test_rollback_fails_on_interrupted_reference() {
        let log = TransactionLog::new(2);
        log.subscribe_transaction_begin(1);
        log.subscribe_transaction_commit();
        log.reference_transaction_begin(1);

        let result = log.rollback_proxy_element_log(&mut |_| {}, &mut |_| {});
        assert!(matches!(result, Err(ComError::CouldNotRestartProxy { .. })));
    }

    #[test]
    fn test_rollback_fails_on_interrupted_subscribe() {
        let log = TransactionLog::new(2);
        log.subscribe_transaction_begin(1);

        let mut unsubscribed = false;
        let result = log.rollback_proxy_element_log(&mut |_| {}, &mut |_| unsubscribed = true);
        assert!(matches!(result, Err(ComError::CouldNotRestartProxy { .. })));
        assert!(!unsubscribed);
    }

    #[test]
    fn test_double_reference_begin_terminates() {
        expect_termination(module_path!(), "test_double_reference_begin_terminates", || {
            let log = TransactionLog::new(2);
            log.reference_transaction_begin(0);
            log.reference_transaction_begin(0);
        });
    }

    #[test]
    fn test_out_of_range_slot_terminates() {
        expect_termination(module_path!(), "test_out_of_range_slot_terminates", || {
            let log = TransactionLog::new(2);
            log.reference_transaction_begin(2);
        });
    }

    #[test]
    fn test_register_until_exhausted() {
        let set = TransactionLogSet::new(2, 4);
        assert_eq!(set.register_proxy_element(ID), Ok(0));
        assert_eq!(set.register_proxy_element(TransactionLogId::new(8)), Ok(1));
        assert_eq!(
            set.register_proxy_element(ID),
            Err(ComError::MaxSubscribersExceeded)
        );

        set.unregister(0);
        assert_eq!(set.register_proxy_element(ID), Ok(0));
    }

    #[test]
    fn test_rollback_only_touches_marked_logs_of_id() {
        let set = TransactionLogSet::new(3, 4);
        let mine = set.register_proxy_element(ID).unwrap();
        let other = set.register_proxy_element(TransactionLogId::new(99)).unwrap();
        for index in [mine, other] {
            let log = set.transaction_log(index);
            log.subscribe_transaction_begin(2);
            log.subscribe_transaction_commit();
        }

        set.mark_transaction_logs_need_rollback(ID);
        assert!(set.needs_rollback(mine));
        assert!(!set.needs_rollback(other));

        let mut unsubscribed = Vec::new();
        set.rollback_proxy_transactions(ID, |_| {}, |count| unsubscribed.push(count))
            .unwrap();

        assert_eq!(unsubscribed, vec![2]);
        // The rolled back node is free again, the other one untouched.
        assert_eq!(set.register_proxy_element(ID), Ok(mine));
        assert!(set.transaction_log(other).contains_transactions());
    }

    #[test]
    fn test_rollback_without_marked_logs_is_noop() {
        let set = TransactionLogSet::new(2, 2);
        let mut dereferenced = false;
        let mut unsubscribed = false;
        assert!(set
            .rollback_proxy_transactions(ID, |_| dereferenced = true, |_| unsubscribed = true)
            .is_ok());
        assert!(!dereferenced && !unsubscribed);
    }

    #[test]
    fn test_rollback_error_keeps_node() {
        let set = TransactionLogSet::new(1, 2);
        let index = set.register_proxy_element(ID).unwrap();
        set.transaction_log(index).subscribe_transaction_begin(1);
        set.mark_transaction_logs_need_rollback(ID);

        let result = set.rollback_proxy_transactions(ID, |_| {}, |_| {});
        assert!(matches!(result, Err(ComError::CouldNotRestartProxy { .. })));
        assert_eq!(
            set.register_proxy_element(ID),
            Err(ComError::MaxSubscribersExceeded)
        );
    }

    #[test]
    fn test_unregister_with_open_transactions_terminates() {
        expect_termination(
            module_path!(),
            "test_unregister_with_open_transactions_terminates",
            || {
                let set = TransactionLogSet::new(1, 2);
                let index = set.register_proxy_element(ID).unwrap();
                set.transaction_log(index).subscribe_transaction_begin(1);
                set.unregister(index);
            },
        );
    }
}
