// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Event notification between producers and consumers.
//!
//! Consumers register a weakly held handler per event with the producer's
//! node. The producer notifies after each published sample. Transport
//! internals are behind [`MessagePassingService`]; [`LocalMessagePassing`]
//! delivers within one process.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;

use crate::types::{ElementFqId, Pid, QualityType};

/// Callback invoked when new samples of an event are available.
pub type EventUpdateHandler = dyn Fn() + Send + Sync;

/// Identifies one handler registration for later removal.
pub type HandlerRegistrationNo = u64;

/// Notification transport consumed by the binding.
pub trait MessagePassingService: Send + Sync {
    fn register_event_notification(
        &self,
        quality: QualityType,
        element: ElementFqId,
        handler: Weak<EventUpdateHandler>,
        target_pid: Pid,
    ) -> HandlerRegistrationNo;

    /// Re-send existing registrations after the producer restarted.
    fn reregister_event_notification(
        &self,
        quality: QualityType,
        element: ElementFqId,
        target_pid: Pid,
    );

    fn unregister_event_notification(
        &self,
        quality: QualityType,
        element: ElementFqId,
        registration: HandlerRegistrationNo,
        target_pid: Pid,
    );

    /// Invoke every live handler registered for `element`.
    fn notify_event(&self, quality: QualityType, element: ElementFqId);

    /// Tell `target_pid` that `outdated_pid` belonged to a previous
    /// incarnation of this node.
    fn notify_outdated_node_id(&self, quality: QualityType, outdated_pid: Pid, target_pid: Pid);
}

type HandlerKey = (QualityType, ElementFqId);

struct Registration {
    number: HandlerRegistrationNo,
    handler: Weak<EventUpdateHandler>,
}

/// In-process notification service.
#[derive(Default)]
pub struct LocalMessagePassing {
    handlers: DashMap<HandlerKey, Vec<Registration>>,
    outdated_nodes: DashMap<Pid, Vec<Pid>>,
    next_registration: AtomicU64,
    reregistrations: AtomicUsize,
}

impl LocalMessagePassing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Registered handlers for `element`, live or not.
    pub fn registration_count(&self, quality: QualityType, element: ElementFqId) -> usize {
        self.handlers
            .get(&(quality, element))
            .map_or(0, |registrations| registrations.len())
    }

    /// Outdated pids reported to `target_pid`.
    pub fn outdated_node_ids(&self, target_pid: Pid) -> Vec<Pid> {
        self.outdated_nodes
            .get(&target_pid)
            .map(|pids| pids.clone())
            .unwrap_or_default()
    }

    pub fn reregistration_count(&self) -> usize {
        self.reregistrations.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for LocalMessagePassing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMessagePassing")
            .field("elements", &self.handlers.len())
            .field("reregistrations", &self.reregistration_count())
            .finish()
    }
}

impl MessagePassingService for LocalMessagePassing {
    fn register_event_notification(
        &self,
        quality: QualityType,
        element: ElementFqId,
        handler: Weak<EventUpdateHandler>,
        target_pid: Pid,
    ) -> HandlerRegistrationNo {
        let number = self.next_registration.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .entry((quality, element))
            .or_default()
            .push(Registration { number, handler });
        tracing::debug!(%element, %quality, target_pid, registration = number, "Registered event notification");
        number
    }

    fn reregister_event_notification(
        &self,
        quality: QualityType,
        element: ElementFqId,
        target_pid: Pid,
    ) {
        // Registrations are process-local, so they survive a provider restart.
        self.reregistrations.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(%element, %quality, target_pid, "Re-registered event notification");
    }

    fn unregister_event_notification(
        &self,
        quality: QualityType,
        element: ElementFqId,
        registration: HandlerRegistrationNo,
        target_pid: Pid,
    ) {
        if let Some(mut registrations) = self.handlers.get_mut(&(quality, element)) {
            registrations.retain(|r| r.number != registration);
        }
        tracing::debug!(%element, %quality, target_pid, registration, "Unregistered event notification");
    }

    fn notify_event(&self, quality: QualityType, element: ElementFqId) {
        // Upgrade under the shard lock, invoke after releasing it: handlers may
        // register or unregister.
        let live: Vec<Arc<EventUpdateHandler>> = match self.handlers.get_mut(&(quality, element)) {
            Some(mut registrations) => {
                registrations.retain(|r| r.handler.strong_count() > 0);
                registrations
                    .iter()
                    .filter_map(|r| r.handler.upgrade())
                    .collect()
            }
            None => return,
        };
        for handler in live {
            handler();
        }
    }

    fn notify_outdated_node_id(&self, quality: QualityType, outdated_pid: Pid, target_pid: Pid) {
        tracing::warn!(%quality, outdated_pid, target_pid, "Notifying outdated node id");
        self.outdated_nodes
            .entry(target_pid)
            .or_default()
            .push(outdated_pid);
    }
}
