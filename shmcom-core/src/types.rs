// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Identifiers and small value types shared across the binding.
//!
//! Plain aliases are used where the value is an ABI field in shared memory.
//! Newtypes are used where mixing two integers up would be a logic error.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Process id, as seen by the operating system.
pub type Pid = libc::pid_t;

/// Index of a slot inside an event's slot array.
pub type SlotIndex = u16;

/// Timestamp of a published sample. Monotonic per event, starting at 1.
pub type EventTimeStamp = u32;

/// Opaque identifier of an application, unique per deployment.
pub type ApplicationId = u32;

/// Index of a node inside a [`crate::shm::TransactionLogSet`].
pub type TransactionLogIndex = usize;

/// Kind of a service element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    Event,
    Field,
}

impl ElementType {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Event => "Event",
            Self::Field => "Field",
        }
    }
}

/// Fully-qualified identifier of one event or field of a service instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementFqId {
    pub service_id: u16,
    pub element_id: u16,
    pub instance_id: u16,
    pub element_type: ElementType,
}

impl ElementFqId {
    pub const fn new(
        service_id: u16,
        element_id: u16,
        instance_id: u16,
        element_type: ElementType,
    ) -> Self {
        Self {
            service_id,
            element_id,
            instance_id,
            element_type,
        }
    }
}

impl fmt::Display for ElementFqId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SID:{},EID:{},IID:{},TYPE:{}",
            self.service_id,
            self.element_id,
            self.instance_id,
            self.element_type.name()
        )
    }
}

/// Safety quality of a communication partner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityType {
    #[default]
    AsilQm,
    AsilB,
}

impl fmt::Display for QualityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AsilQm => write!(f, "QM"),
            Self::AsilB => write!(f, "ASIL-B"),
        }
    }
}

/// Identity of one proxy binding inside transaction log sets.
///
/// Derived from the application id, so a restarted consumer finds the logs
/// its previous incarnation left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionLogId(u32);

impl TransactionLogId {
    /// Sentinel marking an unclaimed transaction log node.
    pub const INVALID: u32 = u32::MAX;

    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn from_application_id(application_id: ApplicationId) -> Self {
        Self(application_id)
    }

    pub const fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TransactionLogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Public subscription state of a proxy event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionState {
    NotSubscribed,
    SubscriptionPending,
    Subscribed,
}

impl SubscriptionState {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NotSubscribed => "NotSubscribed",
            Self::SubscriptionPending => "SubscriptionPending",
            Self::Subscribed => "Subscribed",
        }
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Round `value` up to the next multiple of `align` (a power of two).
///
/// Returns `None` on overflow.
pub fn checked_align_up(value: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    value
        .checked_add(align - 1)
        .map(|v| v & !(align - 1))
}
