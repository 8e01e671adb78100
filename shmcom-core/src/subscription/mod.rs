// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Consumer-side subscription handling of one event.

mod handler_manager;
mod slot_collector;
mod state_machine;

pub use handler_manager::EventReceiveHandlerManager;
pub use slot_collector::SlotCollector;
pub use state_machine::SubscriptionStateMachine;
