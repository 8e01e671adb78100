// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Registration of a consumer's receive handler with the producer.

use std::sync::{Arc, Weak};

use crate::messaging::{EventUpdateHandler, HandlerRegistrationNo};
use crate::runtime::ShmComRuntime;
use crate::types::{ElementFqId, Pid};

/// Tracks at most one handler registration against the event source.
#[derive(Debug)]
pub struct EventReceiveHandlerManager {
    runtime: Arc<ShmComRuntime>,
    element: ElementFqId,
    event_source_pid: Pid,
    registration: Option<HandlerRegistrationNo>,
}

impl EventReceiveHandlerManager {
    pub fn new(runtime: Arc<ShmComRuntime>, element: ElementFqId, event_source_pid: Pid) -> Self {
        Self {
            runtime,
            element,
            event_source_pid,
            registration: None,
        }
    }

    /// Register `handler`, replacing any previous registration.
    pub fn register(&mut self, handler: Weak<EventUpdateHandler>) {
        self.unregister();
        let number = self.runtime.messaging().register_event_notification(
            self.runtime.quality(),
            self.element,
            handler,
            self.event_source_pid,
        );
        self.registration = Some(number);
    }

    /// Re-register after the event source restarted. A handler set while the
    /// source was away replaces the existing registration.
    pub fn reregister(&mut self, handler: Option<Weak<EventUpdateHandler>>) {
        match handler {
            Some(handler) => self.register(handler),
            None if self.registration.is_some() => {
                self.runtime.messaging().reregister_event_notification(
                    self.runtime.quality(),
                    self.element,
                    self.event_source_pid,
                );
            }
            None => {}
        }
    }

    pub fn unregister(&mut self) {
        if let Some(number) = self.registration.take() {
            self.runtime.messaging().unregister_event_notification(
                self.runtime.quality(),
                self.element,
                number,
                self.event_source_pid,
            );
        }
    }

    pub fn update_pid(&mut self, pid: Pid) {
        self.event_source_pid = pid;
    }

    pub fn event_source_pid(&self) -> Pid {
        self.event_source_pid
    }

    pub fn is_registered(&self) -> bool {
        self.registration.is_some()
    }
}
