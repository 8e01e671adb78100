// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Control blocks of a provided service instance.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{DeploymentConfig, EventConfig, RetryPolicy};
use crate::error::ComError;
use crate::types::{ElementFqId, TransactionLogId, TransactionLogIndex};

use super::event_data_control::EventDataControl;
use super::pid_mapping::ApplicationIdPidMapping;
use super::subscription_control::EventSubscriptionControl;

/// All shared control data of one event.
#[derive(Debug)]
pub struct EventControl {
    data_control: EventDataControl,
    subscription_control: EventSubscriptionControl,
}

impl EventControl {
    pub fn new(max_slots: u16, max_subscribers: u8, enforce_max_samples: bool) -> Self {
        Self::with_retry_policy(
            max_slots,
            max_subscribers,
            enforce_max_samples,
            &RetryPolicy::default(),
        )
    }

    pub fn with_retry_policy(
        max_slots: u16,
        max_subscribers: u8,
        enforce_max_samples: bool,
        retry: &RetryPolicy,
    ) -> Self {
        Self {
            data_control: EventDataControl::new(max_slots, max_subscribers),
            subscription_control: EventSubscriptionControl::with_retry_factors(
                max_slots,
                max_subscribers,
                enforce_max_samples,
                retry.subscribe_factor,
                retry.unsubscribe_factor,
            ),
        }
    }

    pub fn from_config(event: &EventConfig, retry: &RetryPolicy) -> Self {
        Self::with_retry_policy(
            event.max_samples,
            event.max_subscribers,
            event.enforce_max_samples,
            retry,
        )
    }

    pub fn data_control(&self) -> &EventDataControl {
        &self.data_control
    }

    pub fn subscription_control(&self) -> &EventSubscriptionControl {
        &self.subscription_control
    }
}

/// Control data of a whole service instance.
#[derive(Debug)]
pub struct ServiceDataControl {
    event_controls: HashMap<ElementFqId, Arc<EventControl>>,
    application_id_pid_mapping: ApplicationIdPidMapping,
}

impl ServiceDataControl {
    pub fn new(max_application_id_mappings: usize) -> Self {
        Self {
            event_controls: HashMap::new(),
            application_id_pid_mapping: ApplicationIdPidMapping::new(max_application_id_mappings),
        }
    }

    pub fn from_config(config: &DeploymentConfig) -> Self {
        let mut control = Self {
            event_controls: HashMap::with_capacity(config.events.len()),
            application_id_pid_mapping: ApplicationIdPidMapping::with_retries(
                config.application.max_application_id_mappings,
                config.retry.pid_registration,
            ),
        };
        for event in &config.events {
            control.insert_event(
                config.service.element_fq_id(event),
                EventControl::from_config(event, &config.retry),
            );
        }
        control
    }

    pub fn insert_event(&mut self, id: ElementFqId, control: EventControl) -> Arc<EventControl> {
        let control = Arc::new(control);
        self.event_controls.insert(id, Arc::clone(&control));
        control
    }

    pub fn event_control(&self, id: &ElementFqId) -> Option<&Arc<EventControl>> {
        self.event_controls.get(id)
    }

    pub fn event_controls(&self) -> impl Iterator<Item = (&ElementFqId, &Arc<EventControl>)> {
        self.event_controls.iter()
    }

    pub fn application_id_pid_mapping(&self) -> &ApplicationIdPidMapping {
        &self.application_id_pid_mapping
    }
}

/// A claimed transaction log, released when dropped.
#[derive(Debug)]
pub struct TransactionLogRegistrationGuard {
    event_control: Arc<EventControl>,
    index: TransactionLogIndex,
}

impl TransactionLogRegistrationGuard {
    pub fn create(
        event_control: &Arc<EventControl>,
        id: TransactionLogId,
    ) -> Result<Self, ComError> {
        let index = event_control
            .data_control()
            .transaction_log_set()
            .register_proxy_element(id)?;
        Ok(Self {
            event_control: Arc::clone(event_control),
            index,
        })
    }

    pub fn index(&self) -> TransactionLogIndex {
        self.index
    }
}

impl Drop for TransactionLogRegistrationGuard {
    fn drop(&mut self) {
        self.event_control
            .data_control()
            .transaction_log_set()
            .unregister(self.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigLoader;
    use crate::types::ElementType;

    const YAML: &str = r#"
application_id: 5
max_application_id_mappings: 4
service:
  service_id: 3
  instance_id: 1
  events:
    - name: speed
      element_id: 1
      max_samples: 6
      max_subscribers: 2
      sample_size: 4
"#;

    #[test]
    fn test_from_config_builds_every_event() {
        let config = ConfigLoader::load_string(YAML).unwrap();
        let control = ServiceDataControl::from_config(&config);

        let id = ElementFqId::new(3, 1, 1, ElementType::Event);
        let event = control.event_control(&id).unwrap();
        assert_eq!(event.data_control().max_slots(), 6);
        assert_eq!(event.subscription_control().max_subscribers(), 2);
        assert!(event.subscription_control().enforces_max_samples());
        assert_eq!(control.application_id_pid_mapping().capacity(), 4);
        assert_eq!(control.event_controls().count(), 1);
    }

    #[test]
    fn test_registration_guard_releases_log() {
        let event = Arc::new(EventControl::new(4, 1, true));
        let id = TransactionLogId::new(9);

        let guard = TransactionLogRegistrationGuard::create(&event, id).unwrap();
        assert_eq!(guard.index(), 0);
        assert_eq!(
            TransactionLogRegistrationGuard::create(&event, id).unwrap_err(),
            ComError::MaxSubscribersExceeded
        );

        drop(guard);
        assert!(TransactionLogRegistrationGuard::create(&event, id).is_ok());
    }
}
