// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Producer side of a provided service instance.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::config::{DeploymentConfig, ServiceConfig};
use crate::error::ComError;
use crate::runtime::ShmComRuntime;
use crate::shm::{EventControl, EventDataStorage, EventSlotStatus, ServiceDataControl, ServiceDataStorage};
use crate::types::{ElementFqId, EventTimeStamp, Pid, SlotIndex};

/// Offers one service instance.
#[derive(Debug)]
pub struct Skeleton {
    runtime: Arc<ShmComRuntime>,
    service: ServiceConfig,
    control: Arc<ServiceDataControl>,
    storage: Arc<ServiceDataStorage>,
}

impl Skeleton {
    pub fn new(
        runtime: Arc<ShmComRuntime>,
        service: ServiceConfig,
        control: Arc<ServiceDataControl>,
        storage: Arc<ServiceDataStorage>,
    ) -> Self {
        Self {
            runtime,
            service,
            control,
            storage,
        }
    }

    /// Build fresh control and data blocks for every configured event.
    pub fn from_config(runtime: Arc<ShmComRuntime>, config: &DeploymentConfig) -> Self {
        Self::new(
            runtime,
            config.service,
            Arc::new(ServiceDataControl::from_config(config)),
            Arc::new(ServiceDataStorage::from_config(config)),
        )
    }

    /// Publish this process as provider. If a previous provider left the
    /// blocks behind, its unfinished writes are dropped. Returns that
    /// provider's pid.
    pub fn prepare_offer(&self) -> Option<Pid> {
        let pid = self.runtime.pid();
        let previous = self.storage.skeleton_pid();
        let restarted = previous != 0 && previous != pid;

        if restarted {
            tracing::warn!(
                service_id = self.service.service_id,
                instance_id = self.service.instance_id,
                previous_pid = previous,
                pid,
                "Previous provider left service data behind, cleaning up"
            );
            for (_, event_control) in self.control.event_controls() {
                event_control.data_control().remove_allocations_for_writing();
            }
        }
        self.storage.set_skeleton_pid(pid);

        tracing::info!(
            service_id = self.service.service_id,
            instance_id = self.service.instance_id,
            pid,
            "Service offer prepared"
        );
        restarted.then_some(previous)
    }

    pub fn runtime(&self) -> &Arc<ShmComRuntime> {
        &self.runtime
    }

    pub fn service(&self) -> &ServiceConfig {
        &self.service
    }

    pub fn control(&self) -> &Arc<ServiceDataControl> {
        &self.control
    }

    pub fn storage(&self) -> &Arc<ServiceDataStorage> {
        &self.storage
    }
}

/// Producer end of one event.
#[derive(Debug)]
pub struct SkeletonEvent {
    runtime: Arc<ShmComRuntime>,
    element: ElementFqId,
    event_name: String,
    event_control: Arc<EventControl>,
    storage: Arc<EventDataStorage>,
    next_timestamp: AtomicU32,
}

impl SkeletonEvent {
    /// Bind to event `element` of `skeleton`. The event must be configured.
    pub fn new(skeleton: &Skeleton, element: ElementFqId, event_name: impl Into<String>) -> Self {
        let event_name = event_name.into();
        let Some(event_control) = skeleton.control.event_control(&element) else {
            contract_violation!("no event control for {} ({})", element, event_name);
        };
        let Some(storage) = skeleton.storage.event_storage(&element) else {
            contract_violation!("no event storage for {} ({})", element, event_name);
        };
        // Continue after whatever a previous provider published.
        let latest = event_control.data_control().latest_timestamp();
        Self {
            runtime: Arc::clone(&skeleton.runtime),
            element,
            event_name,
            event_control: Arc::clone(event_control),
            storage: Arc::clone(storage),
            next_timestamp: AtomicU32::new(latest + 1),
        }
    }

    /// Claim a free slot for writing.
    pub fn allocate(&self) -> Result<SampleAllocation<'_>, ComError> {
        match self.event_control.data_control().allocate_next_slot() {
            Some(slot) => Ok(SampleAllocation {
                event: self,
                slot,
                sent: false,
            }),
            None => {
                tracing::warn!(element = %self.element, event = %self.event_name, "No free slot for a new sample");
                Err(ComError::SampleAllocationFailure)
            }
        }
    }

    /// Publish `allocation` and notify consumers. Returns its timestamp.
    pub fn send(&self, mut allocation: SampleAllocation<'_>) -> EventTimeStamp {
        ensure_contract!(
            std::ptr::eq(allocation.event, self),
            "allocation sent through a different event than {}",
            self.event_name
        );
        let timestamp = self.next_timestamp.fetch_add(1, Ordering::Relaxed);
        ensure_contract!(
            timestamp != EventSlotStatus::TIMESTAMP_IN_WRITING,
            "timestamps of {} exhausted",
            self.event_name
        );

        self.event_control
            .data_control()
            .event_ready(allocation.slot, timestamp);
        allocation.sent = true;

        self.runtime
            .messaging()
            .notify_event(self.runtime.quality(), self.element);
        timestamp
    }

    pub fn element(&self) -> ElementFqId {
        self.element
    }

    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    pub fn sample_size(&self) -> usize {
        self.storage.sample_size()
    }
}

/// A slot allocated for writing. Discarded on drop unless sent.
#[derive(Debug)]
pub struct SampleAllocation<'a> {
    event: &'a SkeletonEvent,
    slot: SlotIndex,
    sent: bool,
}

impl SampleAllocation<'_> {
    pub fn slot(&self) -> SlotIndex {
        self.slot
    }

    /// Sample bytes to fill before sending.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        let storage = &self.event.storage;
        // SAFETY: the slot is allocated for writing by this allocation only,
        // and the slot holds sample_size bytes.
        unsafe { std::slice::from_raw_parts_mut(storage.slot_ptr(self.slot), storage.sample_size()) }
    }
}

impl Drop for SampleAllocation<'_> {
    fn drop(&mut self) {
        if !self.sent {
            self.event.event_control.data_control().discard(self.slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{EventUpdateHandler, LocalMessagePassing, MessagePassingService};
    use crate::types::{ElementType, QualityType};
    use std::sync::atomic::AtomicUsize;

    const ELEMENT: ElementFqId = ElementFqId::new(3, 1, 1, ElementType::Event);

    fn skeleton_with(
        messaging: Arc<LocalMessagePassing>,
        pid: Pid,
        control: Arc<ServiceDataControl>,
        storage: Arc<ServiceDataStorage>,
    ) -> Skeleton {
        let runtime = ShmComRuntime::new(1, QualityType::AsilQm, messaging).with_pid(pid);
        Skeleton::new(
            Arc::new(runtime),
            ServiceConfig {
                service_id: 3,
                instance_id: 1,
            },
            control,
            storage,
        )
    }

    fn blocks(max_slots: u16) -> (Arc<ServiceDataControl>, Arc<ServiceDataStorage>) {
        let mut control = ServiceDataControl::new(2);
        control.insert_event(ELEMENT, EventControl::new(max_slots, 1, true));
        let mut storage = ServiceDataStorage::new();
        storage.insert_event(ELEMENT, EventDataStorage::new(8, 8, usize::from(max_slots)));
        (Arc::new(control), Arc::new(storage))
    }

    #[test]
    fn test_send_stamps_monotonic_timestamps() {
        let (control, storage) = blocks(3);
        let skeleton = skeleton_with(LocalMessagePassing::new_shared(), 10, control.clone(), storage);
        assert_eq!(skeleton.prepare_offer(), None);
        let event = SkeletonEvent::new(&skeleton, ELEMENT, "speed");

        let mut allocation = event.allocate().unwrap();
        allocation.as_bytes_mut().copy_from_slice(&42u64.to_ne_bytes());
        assert_eq!(event.send(allocation), 1);
        assert_eq!(event.send(event.allocate().unwrap()), 2);

        let data = control.event_control(&ELEMENT).unwrap().data_control();
        assert_eq!(data.latest_timestamp(), 2);
    }

    #[test]
    fn test_send_notifies_consumers() {
        let messaging = LocalMessagePassing::new_shared();
        let (control, storage) = blocks(2);
        let skeleton = skeleton_with(messaging.clone(), 10, control, storage);
        let event = SkeletonEvent::new(&skeleton, ELEMENT, "speed");

        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        let handler: Arc<EventUpdateHandler> = Arc::new(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        messaging.register_event_notification(QualityType::AsilQm, ELEMENT, Arc::downgrade(&handler), 10);

        event.send(event.allocate().unwrap());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_exhausted_slots_fail_allocation() {
        let (control, storage) = blocks(1);
        let skeleton = skeleton_with(LocalMessagePassing::new_shared(), 10, control, storage);
        let event = SkeletonEvent::new(&skeleton, ELEMENT, "speed");

        let held = event.allocate().unwrap();
        assert_eq!(event.allocate().unwrap_err(), ComError::SampleAllocationFailure);

        // Dropping an unsent allocation frees the slot.
        drop(held);
        assert!(event.allocate().is_ok());
    }

    #[test]
    fn test_restarted_provider_cleans_up() {
        let (control, storage) = blocks(2);
        let crashed = skeleton_with(LocalMessagePassing::new_shared(), 10, control.clone(), storage.clone());
        crashed.prepare_offer();
        let event = SkeletonEvent::new(&crashed, ELEMENT, "speed");
        event.send(event.allocate().unwrap());
        std::mem::forget(event.allocate().unwrap());

        let restarted = skeleton_with(LocalMessagePassing::new_shared(), 20, control.clone(), storage.clone());
        assert_eq!(restarted.prepare_offer(), Some(10));
        assert_eq!(storage.skeleton_pid(), 20);

        let data = control.event_control(&ELEMENT).unwrap().data_control();
        assert!(!data.status(1).is_in_writing());

        let event = SkeletonEvent::new(&restarted, ELEMENT, "speed");
        assert_eq!(event.send(event.allocate().unwrap()), 2);
    }
}
