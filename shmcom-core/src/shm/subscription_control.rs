// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Per-event subscription accounting.
//!
//! One 32-bit word holds the subscriber count and the number of slots those
//! subscribers reserved. Both change together in one compare-exchange.
//!
//! Word layout (cross-process ABI):
//!
//! ```text
//!  31        24 23        16 15                      0
//! +------------+------------+-------------------------+
//! |  (zero)    | subscribers|     subscribed slots    |
//! +------------+------------+-------------------------+
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::atomics::{AtomicIndirector, RealAtomics};

use super::region::SharedMemoryLayout;

/// Subscribe retry budget per configured subscriber.
pub const DEFAULT_SUBSCRIBE_RETRY_FACTOR: u16 = 2;
/// Unsubscribe retry budget per configured subscriber.
pub const DEFAULT_UNSUBSCRIBE_RETRY_FACTOR: u16 = 3;

const SUBSCRIBER_SHIFT: u32 = 16;
const SLOT_MASK: u32 = 0xFFFF;

#[inline]
fn pack(subscribers: u16, slots: u16) -> u32 {
    (u32::from(subscribers) << SUBSCRIBER_SHIFT) | u32::from(slots)
}

#[inline]
fn unpack(state: u32) -> SubscriptionCounters {
    SubscriptionCounters {
        subscribers: (state >> SUBSCRIBER_SHIFT) as u16,
        slots: (state & SLOT_MASK) as u16,
    }
}

/// Outcome of [`EventSubscriptionControl::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeResult {
    Success,
    MaxSubscribersOverflow,
    SlotOverflow,
    UpdateRetryFailure,
}

impl fmt::Display for SubscribeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Success => "success",
            Self::MaxSubscribersOverflow => "max subscribers overflow",
            Self::SlotOverflow => "slot overflow",
            Self::UpdateRetryFailure => "update retry failure",
        };
        f.write_str(text)
    }
}

/// Decoded subscription word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionCounters {
    pub subscribers: u16,
    pub slots: u16,
}

/// Subscription accounting for one event.
#[repr(C)]
#[derive(Debug)]
pub struct EventSubscriptionControl {
    current_subscription_state: AtomicU32,
    max_subscribable_slots: u16,
    max_subscribers: u8,
    enforce_max_samples: bool,
    subscribe_retries: u16,
    unsubscribe_retries: u16,
}

// SAFETY: repr(C), atomics and plain integers only, no pointers.
unsafe impl SharedMemoryLayout for EventSubscriptionControl {}

impl EventSubscriptionControl {
    pub fn new(max_subscribable_slots: u16, max_subscribers: u8, enforce_max_samples: bool) -> Self {
        Self::with_retry_factors(
            max_subscribable_slots,
            max_subscribers,
            enforce_max_samples,
            DEFAULT_SUBSCRIBE_RETRY_FACTOR,
            DEFAULT_UNSUBSCRIBE_RETRY_FACTOR,
        )
    }

    pub fn with_retry_factors(
        max_subscribable_slots: u16,
        max_subscribers: u8,
        enforce_max_samples: bool,
        subscribe_factor: u16,
        unsubscribe_factor: u16,
    ) -> Self {
        let subscribers = u16::from(max_subscribers);
        Self {
            current_subscription_state: AtomicU32::new(0),
            max_subscribable_slots,
            max_subscribers,
            enforce_max_samples,
            subscribe_retries: subscribers.saturating_mul(subscribe_factor),
            unsubscribe_retries: subscribers.saturating_mul(unsubscribe_factor),
        }
    }

    /// Register one subscriber reserving `slot_count` slots.
    pub fn subscribe(&self, slot_count: u16) -> SubscribeResult {
        self.subscribe_with(slot_count, &RealAtomics)
    }

    pub fn subscribe_with<A: AtomicIndirector>(&self, slot_count: u16, atomics: &A) -> SubscribeResult {
        for _ in 0..self.subscribe_retries {
            let observed = self.current_subscription_state.load(Ordering::Acquire);
            let current = unpack(observed);

            if current.subscribers >= u16::from(self.max_subscribers) {
                tracing::info!(
                    subscribers = current.subscribers,
                    max_subscribers = self.max_subscribers,
                    "Subscribe rejected: max subscribers reached"
                );
                return SubscribeResult::MaxSubscribersOverflow;
            }
            let new_slots = current
                .slots
                .checked_add(slot_count)
                .filter(|&slots| !self.enforce_max_samples || slots <= self.max_subscribable_slots);
            let Some(new_slots) = new_slots else {
                tracing::info!(
                    slots = current.slots,
                    requested = slot_count,
                    max_slots = self.max_subscribable_slots,
                    "Subscribe rejected: slot overflow"
                );
                return SubscribeResult::SlotOverflow;
            };

            let desired = pack(current.subscribers + 1, new_slots);
            if atomics
                .compare_exchange_u32(
                    &self.current_subscription_state,
                    observed,
                    desired,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return SubscribeResult::Success;
            }
        }
        SubscribeResult::UpdateRetryFailure
    }

    /// Release one subscriber and its `slot_count` slots.
    ///
    /// Must pair with a successful [`Self::subscribe`] of the same count.
    /// Anything else aborts the process.
    pub fn unsubscribe(&self, slot_count: u16) {
        self.unsubscribe_with(slot_count, &RealAtomics)
    }

    pub fn unsubscribe_with<A: AtomicIndirector>(&self, slot_count: u16, atomics: &A) {
        for _ in 0..self.unsubscribe_retries {
            let observed = self.current_subscription_state.load(Ordering::Acquire);
            let current = unpack(observed);

            ensure_contract!(
                current.subscribers > 0,
                "unsubscribe without any subscriber"
            );
            ensure_contract!(
                slot_count <= current.slots,
                "unsubscribe of {} slots with only {} subscribed",
                slot_count,
                current.slots
            );

            let desired = pack(current.subscribers - 1, current.slots - slot_count);
            if atomics
                .compare_exchange_u32(
                    &self.current_subscription_state,
                    observed,
                    desired,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return;
            }
        }
        contract_violation!(
            "unsubscribe exhausted {} retries, subscription state is stuck",
            self.unsubscribe_retries
        );
    }

    /// Decoded snapshot of the subscription word.
    pub fn counters(&self) -> SubscriptionCounters {
        unpack(self.current_subscription_state.load(Ordering::Acquire))
    }

    pub fn max_subscribable_slots(&self) -> u16 {
        self.max_subscribable_slots
    }

    pub fn max_subscribers(&self) -> u8 {
        self.max_subscribers
    }

    pub fn enforces_max_samples(&self) -> bool {
        self.enforce_max_samples
    }
}
