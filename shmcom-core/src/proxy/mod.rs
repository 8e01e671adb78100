// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Consumer side of a provided service instance.

mod event_common;
mod generic_event;
mod rollback_executor;
mod sample;

pub use event_common::{ProxyEventCommon, MAX_SUBSCRIBE_SAMPLE_COUNT};
pub use generic_event::GenericProxyEvent;
pub use rollback_executor::TransactionLogRollbackExecutor;
pub use sample::{SamplePtr, SampleReferenceGuard, SampleReferenceTracker, TrackerGuardFactory};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use dashmap::DashMap;

use crate::config::ServiceConfig;
use crate::error::ComError;
use crate::runtime::ShmComRuntime;
use crate::shm::{EventControl, EventDataStorage, ServiceDataControl, ServiceDataStorage};
use crate::state::{OfferedState, OfferedStateMachine};
use crate::types::{ElementFqId, ElementType};

/// Connection of one consumer process to one provided service instance.
///
/// Event bindings register here so provider availability changes reach them.
#[derive(Debug)]
pub struct Proxy {
    runtime: Arc<ShmComRuntime>,
    service: ServiceConfig,
    control: Arc<ServiceDataControl>,
    storage: Arc<ServiceDataStorage>,
    // Held while notifying bindings, and while a binding registers.
    offered_state: Mutex<OfferedStateMachine>,
    // Keyed by binding address: several bindings may share an event name.
    event_bindings: DashMap<usize, Weak<ProxyEventCommon>>,
}

fn binding_key(binding: &Arc<ProxyEventCommon>) -> usize {
    Arc::as_ptr(binding) as usize
}

impl Proxy {
    /// Attach to an offered service instance, rolling back whatever a
    /// previous incarnation of this process left behind.
    pub fn create(
        runtime: Arc<ShmComRuntime>,
        service: ServiceConfig,
        control: Arc<ServiceDataControl>,
        storage: Arc<ServiceDataStorage>,
    ) -> Result<Arc<Self>, ComError> {
        let provider_pid = storage.skeleton_pid();
        TransactionLogRollbackExecutor::new(
            &control,
            &runtime,
            provider_pid,
            runtime.transaction_log_id(),
        )
        .rollback_transaction_logs()
        .map_err(|e| {
            tracing::error!(
                service_id = service.service_id,
                instance_id = service.instance_id,
                error = %e,
                "Could not roll back transaction logs"
            );
            ComError::BindingFailure {
                reason: format!("transaction log rollback failed: {e}"),
            }
        })?;

        tracing::info!(
            service_id = service.service_id,
            instance_id = service.instance_id,
            provider_pid,
            "Proxy created"
        );

        Ok(Arc::new(Self {
            runtime,
            service,
            control,
            storage,
            offered_state: Mutex::new(OfferedStateMachine::new()),
            event_bindings: DashMap::new(),
        }))
    }

    fn offered_state(&self) -> MutexGuard<'_, OfferedStateMachine> {
        self.offered_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn runtime(&self) -> &Arc<ShmComRuntime> {
        &self.runtime
    }

    pub fn service(&self) -> &ServiceConfig {
        &self.service
    }

    /// Element id of event `element_id` of this instance.
    pub fn event_id(&self, element_id: u16) -> ElementFqId {
        ElementFqId::new(
            self.service.service_id,
            element_id,
            self.service.instance_id,
            ElementType::Event,
        )
    }

    /// Control block of `element`. The element must be provided.
    pub fn event_control(&self, element: &ElementFqId) -> &Arc<EventControl> {
        match self.control.event_control(element) {
            Some(control) => control,
            None => contract_violation!("no event control for {}", element),
        }
    }

    /// Slot storage of `element`. The element must be provided.
    pub fn event_storage(&self, element: &ElementFqId) -> &Arc<EventDataStorage> {
        match self.storage.event_storage(element) {
            Some(storage) => storage,
            None => contract_violation!("no event storage for {}", element),
        }
    }

    pub fn is_event_provided(&self, element: &ElementFqId) -> bool {
        self.control.event_control(element).is_some() && self.storage.event_storage(element).is_some()
    }

    pub fn offered_state_value(&self) -> OfferedState {
        self.offered_state().state()
    }

    /// Create the consumer state of an event binding and register it for
    /// availability notifications.
    pub(crate) fn register_event_binding(
        &self,
        element: ElementFqId,
        event_name: &str,
    ) -> Arc<ProxyEventCommon> {
        let offered_state = self.offered_state();
        let common = Arc::new(ProxyEventCommon::new(
            Arc::clone(&self.runtime),
            element,
            event_name,
            Arc::clone(self.event_control(&element)),
            self.storage.skeleton_pid(),
            offered_state.is_available(),
        ));
        self.event_bindings
            .insert(binding_key(&common), Arc::downgrade(&common));
        drop(offered_state);
        common
    }

    /// Stop notifying `binding`. Other bindings of the same event stay.
    pub(crate) fn unregister_event_binding(&self, binding: &Arc<ProxyEventCommon>) {
        let _offered_state = self.offered_state();
        self.event_bindings
            .remove_if(&binding_key(binding), |_, registered| {
                std::ptr::eq(registered.as_ptr(), Arc::as_ptr(binding))
            });
    }

    /// Event bindings currently registered for availability notifications.
    pub fn event_binding_count(&self) -> usize {
        self.event_bindings
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .count()
    }

    /// React to the provider appearing or disappearing.
    pub fn service_availability_changed(&self, is_available: bool) {
        let mut offered_state = self.offered_state();
        let provider_pid = self.storage.skeleton_pid();

        let bindings: Vec<Arc<ProxyEventCommon>> = self
            .event_bindings
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect();
        for binding in &bindings {
            binding.notify_service_instance_changed_availability(is_available, provider_pid);
        }

        if is_available {
            offered_state.offer();
        } else {
            offered_state.stop_offer();
        }
        tracing::info!(
            service_id = self.service.service_id,
            instance_id = self.service.instance_id,
            is_available,
            provider_pid,
            bindings = bindings.len(),
            "Service availability changed"
        );
    }
}
