// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Provider availability as seen by one proxy.
//!
//! Lifecycle: Offered → StopOffered → ReOffered → StopOffered → ...
//! A proxy is only created for an offered service, so the machine starts in
//! Offered. Transitions that cannot happen under correct availability
//! notifications terminate the process.

/// Provider availability states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OfferedState {
    /// Provider offered the service when the proxy was created.
    #[default]
    Offered,

    /// Provider withdrew the service or crashed.
    StopOffered,

    /// Provider offers the service again after a stop.
    ReOffered,
}

/// Availability notification driving [`OfferedStateMachine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferEvent {
    Offer,
    StopOffer,
}

impl OfferedState {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Offered => "OFFERED",
            Self::StopOffered => "STOP_OFFERED",
            Self::ReOffered => "RE_OFFERED",
        }
    }

    /// Successor of `self` on `event`, or `None` if the transition is invalid.
    pub const fn next(self, event: OfferEvent) -> Option<OfferedState> {
        match (self, event) {
            (Self::Offered, OfferEvent::Offer) => Some(Self::Offered),
            (Self::Offered, OfferEvent::StopOffer) => Some(Self::StopOffered),
            (Self::StopOffered, OfferEvent::Offer) => Some(Self::ReOffered),
            (Self::StopOffered, OfferEvent::StopOffer) => None,
            (Self::ReOffered, OfferEvent::Offer) => None,
            (Self::ReOffered, OfferEvent::StopOffer) => Some(Self::StopOffered),
        }
    }
}

impl std::fmt::Display for OfferedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Single-threaded availability tracker of one proxy.
#[derive(Debug, Default)]
pub struct OfferedStateMachine {
    current_state: OfferedState,
    transition_count: u64,
}

impl OfferedStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> OfferedState {
        self.current_state
    }

    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    pub fn offer(&mut self) {
        self.apply(OfferEvent::Offer);
    }

    pub fn stop_offer(&mut self) {
        self.apply(OfferEvent::StopOffer);
    }

    /// Apply `event`. An invalid transition terminates the process.
    pub fn apply(&mut self, event: OfferEvent) {
        let Some(target) = self.current_state.next(event) else {
            contract_violation!(
                "invalid offered state transition: {:?} in state {}",
                event,
                self.current_state
            );
        };

        tracing::debug!(from = self.current_state.name(), to = target.name(), ?event, "Offered state transition");

        self.current_state = target;
        self.transition_count += 1;
    }

    /// Whether the provider currently offers the service.
    pub fn is_available(&self) -> bool {
        matches!(
            self.current_state,
            OfferedState::Offered | OfferedState::ReOffered
        )
    }
}
