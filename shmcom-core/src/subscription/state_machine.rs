// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Subscription lifecycle of one proxy event.
//!
//! NotSubscribed → SubscriptionPending / Subscribed on subscribe, depending
//! on provider availability. Subscribed ⇄ SubscriptionPending follows the
//! provider's stop-offer and re-offer. Unsubscribe returns to NotSubscribed
//! from either subscribed state.

use std::sync::{Arc, Weak};

use crate::error::ComError;
use crate::messaging::EventUpdateHandler;
use crate::runtime::ShmComRuntime;
use crate::shm::{EventControl, SubscribeResult, TransactionLogRegistrationGuard};
use crate::types::{ElementFqId, Pid, SubscriptionState, TransactionLogIndex};

use super::handler_manager::EventReceiveHandlerManager;
use super::slot_collector::SlotCollector;

/// Data that only exists while subscribed.
#[derive(Debug)]
struct SubscriptionData {
    // Declared before the guard: the collector's references go through the
    // guarded log.
    slot_collector: SlotCollector,
    max_sample_count: u16,
    log_guard: TransactionLogRegistrationGuard,
}

/// Drives subscribe, unsubscribe and provider availability of one event.
///
/// Not synchronized. Owners serialize access.
#[derive(Debug)]
pub struct SubscriptionStateMachine {
    element: ElementFqId,
    event_control: Arc<EventControl>,
    runtime: Arc<ShmComRuntime>,
    state: SubscriptionState,
    provider_available: bool,
    subscription: Option<SubscriptionData>,
    pending_handler: Option<Weak<EventUpdateHandler>>,
    handler_manager: EventReceiveHandlerManager,
}

impl SubscriptionStateMachine {
    pub fn new(
        runtime: Arc<ShmComRuntime>,
        element: ElementFqId,
        event_control: Arc<EventControl>,
        provider_pid: Pid,
        provider_available: bool,
    ) -> Self {
        Self {
            element,
            event_control,
            handler_manager: EventReceiveHandlerManager::new(Arc::clone(&runtime), element, provider_pid),
            runtime,
            state: SubscriptionState::NotSubscribed,
            provider_available,
            subscription: None,
            pending_handler: None,
        }
    }

    pub fn subscription_state(&self) -> SubscriptionState {
        self.state
    }

    pub fn max_sample_count(&self) -> Option<u16> {
        self.subscription.as_ref().map(|s| s.max_sample_count)
    }

    pub fn transaction_log_index(&self) -> Option<TransactionLogIndex> {
        self.subscription.as_ref().map(|s| s.log_guard.index())
    }

    pub fn event_source_pid(&self) -> Pid {
        self.handler_manager.event_source_pid()
    }

    pub fn is_provider_available(&self) -> bool {
        self.provider_available
    }

    /// Run `f` on the slot collector, if subscribed.
    pub fn with_slot_collector<R>(&mut self, f: impl FnOnce(&mut SlotCollector) -> R) -> Option<R> {
        self.subscription.as_mut().map(|s| f(&mut s.slot_collector))
    }

    pub fn subscribe_event(&mut self, max_sample_count: u16) -> Result<(), ComError> {
        match self.state {
            SubscriptionState::NotSubscribed => self.subscribe_from_not_subscribed(max_sample_count),
            SubscriptionState::SubscriptionPending | SubscriptionState::Subscribed => {
                if self.max_sample_count() == Some(max_sample_count) {
                    tracing::warn!(element = %self.element, state = %self.state, "Subscribe while already subscribed has no effect");
                    Ok(())
                } else {
                    tracing::error!(
                        element = %self.element,
                        state = %self.state,
                        requested = max_sample_count,
                        "Subscribe with a different max sample count while subscribed"
                    );
                    Err(ComError::MaxSampleCountNotRealizable)
                }
            }
        }
    }

    fn subscribe_from_not_subscribed(&mut self, max_sample_count: u16) -> Result<(), ComError> {
        if max_sample_count == 0 {
            tracing::error!(element = %self.element, "Subscribe with a max sample count of zero");
            return Err(ComError::MaxSampleCountNotRealizable);
        }

        let log_guard = TransactionLogRegistrationGuard::create(
            &self.event_control,
            self.runtime.transaction_log_id(),
        )
        .map_err(|e| {
            tracing::error!(element = %self.element, error = %e, "Subscribe rejected, no transaction log available");
            ComError::MaxSubscribersExceeded
        })?;

        let log = self
            .event_control
            .data_control()
            .transaction_log_set()
            .transaction_log(log_guard.index());
        log.subscribe_transaction_begin(max_sample_count);

        let result = self
            .event_control
            .subscription_control()
            .subscribe(max_sample_count);
        if result != SubscribeResult::Success {
            ensure_contract!(
                result != SubscribeResult::MaxSubscribersOverflow,
                "subscriber overflow after a transaction log was registered"
            );
            log.subscribe_transaction_abort();
            tracing::error!(element = %self.element, %result, "Subscribe rejected by subscription control");
            return Err(ComError::MaxSampleCountNotRealizable);
        }
        log.subscribe_transaction_commit();

        let slot_collector = SlotCollector::new(
            Arc::clone(&self.event_control),
            usize::from(max_sample_count),
            log_guard.index(),
        );
        if let Some(handler) = self.pending_handler.take() {
            self.handler_manager.register(handler);
        }
        self.subscription = Some(SubscriptionData {
            slot_collector,
            max_sample_count,
            log_guard,
        });

        let target = if self.provider_available {
            SubscriptionState::Subscribed
        } else {
            SubscriptionState::SubscriptionPending
        };
        self.transition_to(target);
        Ok(())
    }

    pub fn unsubscribe_event(&mut self) {
        match self.state {
            SubscriptionState::NotSubscribed => {}
            SubscriptionState::SubscriptionPending | SubscriptionState::Subscribed => {
                self.transition_to(SubscriptionState::NotSubscribed);
                self.enter_not_subscribed();
            }
        }
    }

    fn enter_not_subscribed(&mut self) {
        let Some(subscription) = self.subscription.take() else {
            contract_violation!("{} left a subscribed state without subscription data", self.element);
        };
        let log = self
            .event_control
            .data_control()
            .transaction_log_set()
            .transaction_log(subscription.log_guard.index());

        log.unsubscribe_transaction_begin();
        self.event_control
            .subscription_control()
            .unsubscribe(subscription.max_sample_count);
        log.unsubscribe_transaction_commit();

        self.handler_manager.unregister();
        drop(subscription);
    }

    pub fn stop_offer_event(&mut self) {
        match self.state {
            SubscriptionState::NotSubscribed => self.provider_available = false,
            SubscriptionState::SubscriptionPending => {
                contract_violation!("{} stop-offered while subscription is pending", self.element);
            }
            SubscriptionState::Subscribed => {
                self.provider_available = false;
                self.transition_to(SubscriptionState::SubscriptionPending);
            }
        }
    }

    pub fn re_offer_event(&mut self, new_pid: Pid) {
        match self.state {
            SubscriptionState::NotSubscribed => {
                self.handler_manager.update_pid(new_pid);
                self.provider_available = true;
            }
            SubscriptionState::SubscriptionPending => {
                self.provider_available = true;
                self.handler_manager.update_pid(new_pid);
                self.handler_manager.reregister(self.pending_handler.take());
                self.transition_to(SubscriptionState::Subscribed);
            }
            SubscriptionState::Subscribed => {
                tracing::warn!(element = %self.element, new_pid, "Re-offer while already subscribed");
            }
        }
    }

    pub fn set_receive_handler(&mut self, handler: Weak<EventUpdateHandler>) {
        match self.state {
            SubscriptionState::Subscribed => self.handler_manager.register(handler),
            _ => self.pending_handler = Some(handler),
        }
    }

    pub fn unset_receive_handler(&mut self) {
        match self.state {
            SubscriptionState::Subscribed => self.handler_manager.unregister(),
            _ => self.pending_handler = None,
        }
    }

    fn transition_to(&mut self, target: SubscriptionState) {
        tracing::debug!(element = %self.element, from = self.state.name(), to = target.name(), "Subscription state transition");
        self.state = target;
    }
}

impl Drop for SubscriptionStateMachine {
    fn drop(&mut self) {
        self.unsubscribe_event();
    }
}
