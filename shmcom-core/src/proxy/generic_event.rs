// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Untyped proxy event: delivers raw sample bytes.

use std::sync::{Arc, Weak};

use crate::error::ComError;
use crate::messaging::EventUpdateHandler;
use crate::shm::EventDataStorage;
use crate::types::{checked_align_up, ElementFqId, EventTimeStamp, Pid, SubscriptionState};

use super::event_common::ProxyEventCommon;
use super::sample::{SamplePtr, SampleReferenceTracker};
use super::Proxy;

/// Consumer end of one event, without knowledge of the sample type.
#[derive(Debug)]
pub struct GenericProxyEvent {
    proxy: Arc<Proxy>,
    common: Arc<ProxyEventCommon>,
    storage: Arc<EventDataStorage>,
}

impl GenericProxyEvent {
    /// Bind to event `element` of `proxy`. The event must be provided.
    pub fn new(proxy: &Arc<Proxy>, element: ElementFqId, event_name: &str) -> Self {
        let storage = Arc::clone(proxy.event_storage(&element));
        let common = proxy.register_event_binding(element, event_name);
        Self {
            proxy: Arc::clone(proxy),
            common,
            storage,
        }
    }

    /// Like [`Self::new`], but reports an element the instance does not provide.
    pub fn try_new(proxy: &Arc<Proxy>, element: ElementFqId, event_name: &str) -> Result<Self, ComError> {
        if !proxy.is_event_provided(&element) {
            return Err(ComError::ServiceElementNotFound { element });
        }
        Ok(Self::new(proxy, element, event_name))
    }

    pub fn subscribe(&self, max_sample_count: usize) -> Result<(), ComError> {
        self.common.subscribe(max_sample_count)
    }

    /// All samples obtained from this event must be dropped first.
    pub fn unsubscribe(&self) {
        self.common.unsubscribe();
    }

    pub fn subscription_state(&self) -> SubscriptionState {
        self.common.subscription_state()
    }

    pub fn get_num_new_samples_available(&self) -> Result<usize, ComError> {
        if self.subscription_state() == SubscriptionState::NotSubscribed {
            return Err(ComError::NotSubscribed);
        }
        self.common.get_num_new_samples_available()
    }

    /// Hand every new sample to `receiver`, oldest first, bounded by the free
    /// references of `tracker`. Returns the number delivered.
    pub fn get_new_samples<F>(&self, mut receiver: F, tracker: &SampleReferenceTracker) -> Result<usize, ComError>
    where
        F: FnMut(SamplePtr, EventTimeStamp),
    {
        if self.subscription_state() == SubscriptionState::NotSubscribed {
            return Err(ComError::NotSubscribed);
        }

        let mut guards = tracker.allocate(self.common.max_sample_count().map_or(0, usize::from));
        let slots = self
            .common
            .get_new_samples_slot_indices(guards.num_available_guards());

        let Some(transaction_log_index) = self.common.transaction_log_index() else {
            contract_violation!("{} delivers samples without a transaction log", self.common.event_name());
        };

        let sample_size = self.storage.sample_size();
        let Some(aligned_size) = checked_align_up(sample_size, self.storage.sample_alignment()) else {
            contract_violation!("aligned size of {} overflows", self.common.event_name());
        };
        let max_slots = self.common.event_control().data_control().max_slots();
        let Some(raw_array_size) = aligned_size.checked_mul(max_slots) else {
            contract_violation!("slot array size of {} overflows", self.common.event_name());
        };
        ensure_contract!(
            raw_array_size <= self.storage.raw_size(),
            "slot array of {} needs {} bytes, storage has {}",
            self.common.event_name(),
            raw_array_size,
            self.storage.raw_size()
        );

        let delivered = slots.len();
        for slot in slots {
            let Some(guard) = guards.take_guard() else {
                contract_violation!("more slots collected than tracker references");
            };
            let offset = aligned_size * usize::from(slot);
            let sample = SamplePtr::new(
                Arc::clone(&self.storage),
                Arc::clone(self.common.event_control()),
                offset,
                slot,
                transaction_log_index,
                guard,
            );
            let timestamp = sample.timestamp();
            receiver(sample, timestamp);
        }
        Ok(delivered)
    }

    pub fn sample_size(&self) -> usize {
        self.storage.sample_size()
    }

    pub fn set_receive_handler(&self, handler: Weak<EventUpdateHandler>) {
        self.common.set_receive_handler(handler);
    }

    pub fn unset_receive_handler(&self) {
        self.common.unset_receive_handler();
    }

    pub fn event_source_pid(&self) -> Pid {
        self.common.event_source_pid()
    }

    pub fn element(&self) -> ElementFqId {
        self.common.element()
    }

    pub fn max_sample_count(&self) -> Option<u16> {
        self.common.max_sample_count()
    }
}

impl Drop for GenericProxyEvent {
    fn drop(&mut self) {
        self.proxy.unregister_event_binding(&self.common);
        self.common.unsubscribe();
    }
}
