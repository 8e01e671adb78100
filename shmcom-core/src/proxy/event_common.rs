// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Subscription plumbing shared by every proxy event flavour.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::error::ComError;
use crate::messaging::EventUpdateHandler;
use crate::runtime::ShmComRuntime;
use crate::shm::EventControl;
use crate::subscription::SubscriptionStateMachine;
use crate::types::{ElementFqId, Pid, SlotIndex, SubscriptionState, TransactionLogIndex};

/// Largest max sample count a consumer may subscribe with.
pub const MAX_SUBSCRIBE_SAMPLE_COUNT: usize = u8::MAX as usize;

/// Consumer state of one event of one proxy.
#[derive(Debug)]
pub struct ProxyEventCommon {
    element: ElementFqId,
    event_name: String,
    event_control: Arc<EventControl>,
    state_machine: Mutex<SubscriptionStateMachine>,
}

impl ProxyEventCommon {
    pub fn new(
        runtime: Arc<ShmComRuntime>,
        element: ElementFqId,
        event_name: impl Into<String>,
        event_control: Arc<EventControl>,
        provider_pid: Pid,
        provider_available: bool,
    ) -> Self {
        Self {
            state_machine: Mutex::new(SubscriptionStateMachine::new(
                runtime,
                element,
                Arc::clone(&event_control),
                provider_pid,
                provider_available,
            )),
            element,
            event_name: event_name.into(),
            event_control,
        }
    }

    fn state_machine(&self) -> MutexGuard<'_, SubscriptionStateMachine> {
        self.state_machine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self, max_sample_count: usize) -> Result<(), ComError> {
        ensure_contract!(
            max_sample_count <= MAX_SUBSCRIBE_SAMPLE_COUNT,
            "max sample count {} of {} exceeds {}",
            max_sample_count,
            self.event_name,
            MAX_SUBSCRIBE_SAMPLE_COUNT
        );
        self.state_machine().subscribe_event(max_sample_count as u16)
    }

    pub fn unsubscribe(&self) {
        self.state_machine().unsubscribe_event();
    }

    pub fn subscription_state(&self) -> SubscriptionState {
        self.state_machine().subscription_state()
    }

    pub fn get_num_new_samples_available(&self) -> Result<usize, ComError> {
        match self
            .state_machine()
            .with_slot_collector(|collector| collector.get_num_new_samples_available())
        {
            Some(count) => Ok(count),
            None => contract_violation!("{} queried for new samples before subscribe", self.event_name),
        }
    }

    /// Reference up to `max_count` new slots, oldest first.
    pub fn get_new_samples_slot_indices(&self, max_count: usize) -> Vec<SlotIndex> {
        match self
            .state_machine()
            .with_slot_collector(|collector| collector.get_new_samples_slot_indices(max_count))
        {
            Some(slots) => slots,
            None => contract_violation!("{} asked for new slots before subscribe", self.event_name),
        }
    }

    /// Set the handler called on new samples. Only a weak reference is kept.
    pub fn set_receive_handler(&self, handler: Weak<EventUpdateHandler>) {
        self.state_machine().set_receive_handler(handler);
    }

    pub fn unset_receive_handler(&self) {
        self.state_machine().unset_receive_handler();
    }

    pub fn notify_service_instance_changed_availability(&self, is_available: bool, new_pid: Pid) {
        let mut state_machine = self.state_machine();
        if is_available {
            state_machine.re_offer_event(new_pid);
        } else {
            state_machine.stop_offer_event();
        }
    }

    pub fn max_sample_count(&self) -> Option<u16> {
        self.state_machine().max_sample_count()
    }

    pub fn transaction_log_index(&self) -> Option<TransactionLogIndex> {
        self.state_machine().transaction_log_index()
    }

    pub fn event_source_pid(&self) -> Pid {
        self.state_machine().event_source_pid()
    }

    pub fn event_control(&self) -> &Arc<EventControl> {
        &self.event_control
    }

    pub fn element(&self) -> ElementFqId {
        self.element
    }

    pub fn event_name(&self) -> &str {
        &self.event_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{EventUpdateHandler, LocalMessagePassing, MessagePassingService};
    use crate::testing::expect_termination;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use crate::types::{ElementType, QualityType};

    const ELEMENT: ElementFqId = ElementFqId::new(2, 4, 1, ElementType::Event);

    fn common(max_slots: u16) -> ProxyEventCommon {
        let runtime = Arc::new(ShmComRuntime::new(
            1,
            QualityType::AsilQm,
            LocalMessagePassing::new_shared(),
        ));
        ProxyEventCommon::new(
            runtime,
            ELEMENT,
            "speed",
            Arc::new(EventControl::new(max_slots, 2, true)),
            99,
            true,
        )
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let event = common(10);
        assert_eq!(event.subscription_state(), SubscriptionState::NotSubscribed);

        event.subscribe(3).unwrap();
        assert_eq!(event.subscription_state(), SubscriptionState::Subscribed);
        assert_eq!(event.max_sample_count(), Some(3));
        assert_eq!(event.get_num_new_samples_available().unwrap(), 0);

        event.unsubscribe();
        event.unsubscribe();
        assert_eq!(event.subscription_state(), SubscriptionState::NotSubscribed);
    }

    #[test]
    fn test_unrealizable_count_is_reported() {
        let event = common(2);
        assert_eq!(
            event.subscribe(3).unwrap_err(),
            ComError::MaxSampleCountNotRealizable
        );
    }

    #[test]
    fn test_availability_drives_state() {
        let event = common(10);
        event.subscribe(1).unwrap();

        event.notify_service_instance_changed_availability(false, 0);
        assert_eq!(event.subscription_state(), SubscriptionState::SubscriptionPending);

        event.notify_service_instance_changed_availability(true, 123);
        assert_eq!(event.subscription_state(), SubscriptionState::Subscribed);
        assert_eq!(event.event_source_pid(), 123);
    }

    #[test]
    fn test_set_receive_handler_replaces_existing() {
        let messaging = LocalMessagePassing::new_shared();
        let runtime = Arc::new(ShmComRuntime::new(1, QualityType::AsilQm, messaging.clone()));
        let event = ProxyEventCommon::new(
            runtime,
            ELEMENT,
            "speed",
            Arc::new(EventControl::new(10, 2, true)),
            99,
            true,
        );
        event.subscribe(2).unwrap();

        let hits = Arc::new([AtomicUsize::new(0), AtomicUsize::new(0)]);
        let handler = |i: usize| -> Arc<EventUpdateHandler> {
            let hits = Arc::clone(&hits);
            Arc::new(move || {
                hits[i].fetch_add(1, Ordering::SeqCst);
            })
        };
        let first = handler(0);
        let second = handler(1);
        event.set_receive_handler(Arc::downgrade(&first));
        event.set_receive_handler(Arc::downgrade(&second));

        assert_eq!(messaging.registration_count(QualityType::AsilQm, ELEMENT), 1);
        messaging.notify_event(QualityType::AsilQm, ELEMENT);
        assert_eq!(hits[0].load(Ordering::SeqCst), 0);
        assert_eq!(hits[1].load(Ordering::SeqCst), 1);

        event.unset_receive_handler();
        assert_eq!(messaging.registration_count(QualityType::AsilQm, ELEMENT), 0);
    }

    #[test]
    fn test_oversized_sample_count_terminates() {
        expect_termination(module_path!(), "test_oversized_sample_count_terminates", || {
            let _ = common(10).subscribe(256);
        });
    }

    #[test]
    fn test_samples_before_subscribe_terminate() {
        expect_termination(module_path!(), "test_samples_before_subscribe_terminate", || {
            common(10).get_new_samples_slot_indices(1);
        });
    }
}
