// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Collects the slots a consumer has not seen yet.

use std::sync::Arc;

use crate::shm::EventControl;
use crate::types::{EventTimeStamp, SlotIndex, TransactionLogIndex};

/// Per-consumer cursor over the slots of one event.
#[derive(Debug)]
pub struct SlotCollector {
    event_control: Arc<EventControl>,
    max_slots: usize,
    last_ts: EventTimeStamp,
    transaction_log_index: TransactionLogIndex,
}

impl SlotCollector {
    /// `max_slots` is the subscribed max sample count and must be positive.
    pub fn new(
        event_control: Arc<EventControl>,
        max_slots: usize,
        transaction_log_index: TransactionLogIndex,
    ) -> Self {
        ensure_contract!(max_slots > 0, "slot collector needs at least one slot");
        Self {
            event_control,
            max_slots,
            last_ts: 0,
            transaction_log_index,
        }
    }

    /// Readable slots newer than the last delivered one.
    pub fn get_num_new_samples_available(&self) -> usize {
        self.event_control.data_control().num_new_events(self.last_ts)
    }

    /// Reference up to `max_count` unseen slots, returned oldest first.
    ///
    /// Every returned slot holds one reference taken through this
    /// collector's transaction log. The caller must dereference each.
    pub fn get_new_samples_slot_indices(&mut self, max_count: usize) -> Vec<SlotIndex> {
        let data_control = self.event_control.data_control();
        let limit = max_count.min(self.max_slots);
        let mut collected = Vec::with_capacity(limit);
        let mut upper_limit = EventTimeStamp::MAX;

        while collected.len() < limit {
            let Some(index) =
                data_control.reference_next_event(self.last_ts, self.transaction_log_index, upper_limit)
            else {
                break;
            };
            upper_limit = data_control.status(index).timestamp();
            collected.push(index);
        }

        if let Some(&newest) = collected.first() {
            self.last_ts = data_control.status(newest).timestamp();
        }
        collected.reverse();
        collected
    }

    pub fn last_timestamp(&self) -> EventTimeStamp {
        self.last_ts
    }

    pub fn transaction_log_index(&self) -> TransactionLogIndex {
        self.transaction_log_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::{EventControl, TransactionLogRegistrationGuard};
    use crate::testing::expect_termination;
    use crate::types::TransactionLogId;

    fn publish(control: &EventControl, timestamp: EventTimeStamp) -> SlotIndex {
        let slot = control.data_control().allocate_next_slot().unwrap();
        control.data_control().event_ready(slot, timestamp);
        slot
    }

    #[test]
    fn test_collects_in_ascending_order() {
        let control = Arc::new(EventControl::new(5, 1, true));
        let guard = TransactionLogRegistrationGuard::create(&control, TransactionLogId::new(1)).unwrap();
        let mut collector = SlotCollector::new(Arc::clone(&control), 5, guard.index());

        let first = publish(&control, 1);
        let second = publish(&control, 2);
        let third = publish(&control, 3);
        assert_eq!(collector.get_num_new_samples_available(), 3);

        let slots = collector.get_new_samples_slot_indices(10);
        assert_eq!(slots, vec![first, second, third]);
        assert_eq!(collector.last_timestamp(), 3);
        assert_eq!(collector.get_num_new_samples_available(), 0);

        for slot in slots {
            control.data_control().dereference_event(slot, guard.index());
        }
    }

    #[test]
    fn test_limited_count_delivers_newest() {
        let control = Arc::new(EventControl::new(5, 1, true));
        let guard = TransactionLogRegistrationGuard::create(&control, TransactionLogId::new(1)).unwrap();
        let mut collector = SlotCollector::new(Arc::clone(&control), 2, guard.index());

        publish(&control, 1);
        let second = publish(&control, 2);
        let third = publish(&control, 3);

        // Limited by the collector's own max slots.
        let slots = collector.get_new_samples_slot_indices(10);
        assert_eq!(slots, vec![second, third]);

        // Older samples are skipped once newer ones were delivered.
        assert!(collector.get_new_samples_slot_indices(10).is_empty());

        for slot in slots {
            control.data_control().dereference_event(slot, guard.index());
        }
    }

    #[test]
    fn test_zero_max_slots_terminates() {
        expect_termination(module_path!(), "test_zero_max_slots_terminates", || {
            let control = Arc::new(EventControl::new(5, 1, true));
            SlotCollector::new(control, 0, 0);
        });
    }
}
