// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! YAML deployment model with strict validation.
//!
//! Slot counts, subscriber limits and retry budgets are read once at startup.
//! Any invalid field results in a HardValidationError that prevents startup.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::error::{HardValidationError, ShmComError, ShmComResult};
use crate::shm::{
    DEFAULT_PID_REGISTRATION_RETRIES, DEFAULT_SUBSCRIBE_RETRY_FACTOR,
    DEFAULT_UNSUBSCRIBE_RETRY_FACTOR, MAX_SAMPLE_ALIGNMENT,
};
use crate::types::{ApplicationId, ElementFqId, ElementType, QualityType, TransactionLogId};

/// Raw event deployment as parsed from YAML (before validation).
#[derive(Debug, Deserialize)]
struct RawEventConfig {
    name: String,
    element_id: u64,
    max_samples: u64,
    max_subscribers: u64,
    #[serde(default = "default_enforce_max_samples")]
    enforce_max_samples: bool,
    sample_size: u64,
    #[serde(default = "default_sample_alignment")]
    sample_alignment: u64,
}

fn default_enforce_max_samples() -> bool {
    true
}

fn default_sample_alignment() -> u64 {
    8
}

#[derive(Debug, Deserialize)]
struct RawServiceConfig {
    service_id: u64,
    instance_id: u64,
    events: Vec<RawEventConfig>,
}

#[derive(Debug, Deserialize)]
struct RawRetryPolicy {
    #[serde(default = "default_pid_registration")]
    pid_registration: u64,
    #[serde(default = "default_subscribe_factor")]
    subscribe_factor: u64,
    #[serde(default = "default_unsubscribe_factor")]
    unsubscribe_factor: u64,
}

fn default_pid_registration() -> u64 {
    u64::from(DEFAULT_PID_REGISTRATION_RETRIES)
}

fn default_subscribe_factor() -> u64 {
    u64::from(DEFAULT_SUBSCRIBE_RETRY_FACTOR)
}

fn default_unsubscribe_factor() -> u64 {
    u64::from(DEFAULT_UNSUBSCRIBE_RETRY_FACTOR)
}

impl Default for RawRetryPolicy {
    fn default() -> Self {
        Self {
            pid_registration: default_pid_registration(),
            subscribe_factor: default_subscribe_factor(),
            unsubscribe_factor: default_unsubscribe_factor(),
        }
    }
}

/// Raw root deployment file.
#[derive(Debug, Deserialize)]
struct RawConfig {
    application_id: Option<u64>,
    #[serde(default = "default_max_mappings")]
    max_application_id_mappings: u64,
    #[serde(default)]
    quality: QualityType,
    #[serde(default)]
    retry: RawRetryPolicy,
    service: RawServiceConfig,
}

fn default_max_mappings() -> u64 {
    32
}

/// Identity of the local application.
#[derive(Debug, Clone)]
pub struct ApplicationConfig {
    pub application_id: ApplicationId,
    pub max_application_id_mappings: usize,
    pub quality: QualityType,
}

/// CAS retry budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Full rescans of the pid mapping before registration fails.
    pub pid_registration: u32,
    /// Subscribe attempts per configured subscriber.
    pub subscribe_factor: u16,
    /// Unsubscribe attempts per configured subscriber.
    pub unsubscribe_factor: u16,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            pid_registration: DEFAULT_PID_REGISTRATION_RETRIES,
            subscribe_factor: DEFAULT_SUBSCRIBE_RETRY_FACTOR,
            unsubscribe_factor: DEFAULT_UNSUBSCRIBE_RETRY_FACTOR,
        }
    }
}

/// Identity of the provided service instance.
#[derive(Debug, Clone, Copy)]
pub struct ServiceConfig {
    pub service_id: u16,
    pub instance_id: u16,
}

impl ServiceConfig {
    pub fn element_fq_id(&self, event: &EventConfig) -> ElementFqId {
        ElementFqId::new(
            self.service_id,
            event.element_id,
            self.instance_id,
            ElementType::Event,
        )
    }
}

/// Validated event deployment.
#[derive(Debug, Clone)]
pub struct EventConfig {
    pub name: String,
    pub element_id: u16,
    pub max_samples: u16,
    pub max_subscribers: u8,
    pub enforce_max_samples: bool,
    pub sample_size: usize,
    pub sample_alignment: usize,
}

/// Complete validated deployment.
#[derive(Debug, Clone)]
pub struct DeploymentConfig {
    pub application: ApplicationConfig,
    pub retry: RetryPolicy,
    pub service: ServiceConfig,
    pub events: Vec<EventConfig>,
}

impl DeploymentConfig {
    pub fn event(&self, name: &str) -> Option<&EventConfig> {
        self.events.iter().find(|event| event.name == name)
    }
}

fn invalid(field: &'static str, value: impl ToString, reason: impl Into<String>) -> HardValidationError {
    HardValidationError::InvalidFieldValue {
        field,
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn bounded<T: TryFrom<u64>>(field: &'static str, value: u64, min: u64, max: u64) -> Result<T, HardValidationError> {
    if value < min || value > max {
        return Err(invalid(field, value, format!("Must be between {} and {}", min, max)));
    }
    T::try_from(value).map_err(|_| invalid(field, value, "Out of range"))
}

/// Deployment loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate a deployment from a YAML file.
    pub fn load_file(path: impl AsRef<Path>) -> ShmComResult<DeploymentConfig> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ShmComError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| ShmComError::Io {
            context: "reading deployment file",
            source: e,
        })?;

        Self::load_string(&content)
    }

    /// Load and validate a deployment from a YAML string.
    pub fn load_string(content: &str) -> ShmComResult<DeploymentConfig> {
        let raw: RawConfig =
            serde_yaml::from_str(content).map_err(|e| ShmComError::ConfigParse {
                message: format!("YAML parse error: {}", e),
            })?;

        Ok(Self::validate(raw)?)
    }

    fn validate(raw: RawConfig) -> Result<DeploymentConfig, HardValidationError> {
        let application = Self::validate_application(&raw)?;
        let retry = Self::validate_retry(&raw.retry)?;

        let service = ServiceConfig {
            service_id: bounded("service_id", raw.service.service_id, 0, u64::from(u16::MAX))?,
            instance_id: bounded("instance_id", raw.service.instance_id, 0, u64::from(u16::MAX))?,
        };

        if raw.service.events.is_empty() {
            return Err(HardValidationError::SchemaValidation {
                message: "At least one event must be defined".to_string(),
            });
        }

        let mut events = Vec::with_capacity(raw.service.events.len());
        let mut seen_names = HashSet::new();
        let mut seen_element_ids = HashSet::new();

        for (index, raw_event) in raw.service.events.into_iter().enumerate() {
            let event = Self::validate_event(raw_event, index)?;

            if !seen_names.insert(event.name.clone()) {
                return Err(HardValidationError::DuplicateEventName { name: event.name });
            }
            if !seen_element_ids.insert(event.element_id) {
                return Err(HardValidationError::DuplicateElementId {
                    element_id: event.element_id,
                    name: event.name,
                });
            }

            events.push(event);
        }

        Ok(DeploymentConfig {
            application,
            retry,
            service,
            events,
        })
    }

    fn validate_application(raw: &RawConfig) -> Result<ApplicationConfig, HardValidationError> {
        let application_id = raw
            .application_id
            .ok_or_else(|| HardValidationError::MissingRequiredField {
                field: "application_id",
                context: "deployment root".to_string(),
            })?;
        // u32::MAX marks a free transaction log and cannot identify a consumer.
        let application_id: ApplicationId = bounded(
            "application_id",
            application_id,
            0,
            u64::from(TransactionLogId::INVALID) - 1,
        )?;

        Ok(ApplicationConfig {
            application_id,
            max_application_id_mappings: bounded(
                "max_application_id_mappings",
                raw.max_application_id_mappings,
                1,
                4096,
            )?,
            quality: raw.quality,
        })
    }

    fn validate_retry(raw: &RawRetryPolicy) -> Result<RetryPolicy, HardValidationError> {
        Ok(RetryPolicy {
            pid_registration: bounded("retry.pid_registration", raw.pid_registration, 1, 10_000)?,
            subscribe_factor: bounded("retry.subscribe_factor", raw.subscribe_factor, 1, 64)?,
            unsubscribe_factor: bounded("retry.unsubscribe_factor", raw.unsubscribe_factor, 1, 64)?,
        })
    }

    fn validate_event(raw: RawEventConfig, index: usize) -> Result<EventConfig, HardValidationError> {
        if raw.name.is_empty() {
            return Err(HardValidationError::MissingRequiredField {
                field: "name",
                context: format!("event at index {}", index),
            });
        }
        if !raw
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(invalid(
                "name",
                &raw.name,
                "Event names must contain only alphanumeric characters, hyphens, and underscores",
            ));
        }

        if !raw.sample_alignment.is_power_of_two()
            || raw.sample_alignment > MAX_SAMPLE_ALIGNMENT as u64
        {
            return Err(invalid(
                "sample_alignment",
                raw.sample_alignment,
                format!("Must be a power of two not above {}", MAX_SAMPLE_ALIGNMENT),
            ));
        }

        Ok(EventConfig {
            element_id: bounded("element_id", raw.element_id, 0, u64::from(u16::MAX))?,
            max_samples: bounded("max_samples", raw.max_samples, 1, u64::from(u16::MAX))?,
            max_subscribers: bounded("max_subscribers", raw.max_subscribers, 1, u64::from(u8::MAX))?,
            enforce_max_samples: raw.enforce_max_samples,
            sample_size: bounded("sample_size", raw.sample_size, 1, 16 * 1024 * 1024)?,
            sample_alignment: raw.sample_alignment as usize,
            name: raw.name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_CONFIG: &str = r#"
application_id: 4242
max_application_id_mappings: 16
quality: asil_b
retry:
  pid_registration: 80
service:
  service_id: 17
  instance_id: 1
  events:
    - name: temperature
      element_id: 1
      max_samples: 20
      max_subscribers: 3
      sample_size: 8
    - name: pressure
      element_id: 2
      max_samples: 10
      max_subscribers: 2
      enforce_max_samples: false
      sample_size: 12
      sample_alignment: 4
"#;

    fn with_event(event: &str) -> String {
        format!(
            "application_id: 1\nservice:\n  service_id: 1\n  instance_id: 1\n  events:\n{}",
            event
        )
    }

    #[test]
    fn test_valid_config() {
        let config = ConfigLoader::load_string(VALID_CONFIG).unwrap();
        assert_eq!(config.application.application_id, 4242);
        assert_eq!(config.application.max_application_id_mappings, 16);
        assert_eq!(config.application.quality, QualityType::AsilB);
        assert_eq!(config.events.len(), 2);

        let pressure = config.event("pressure").unwrap();
        assert!(!pressure.enforce_max_samples);
        assert_eq!(pressure.sample_alignment, 4);
        assert_eq!(
            config.service.element_fq_id(pressure).to_string(),
            "SID:17,EID:2,IID:1,TYPE:Event"
        );
    }

    #[test]
    fn test_defaults_applied() {
        let config = ConfigLoader::load_string(VALID_CONFIG).unwrap();
        let temperature = config.event("temperature").unwrap();
        assert!(temperature.enforce_max_samples);
        assert_eq!(temperature.sample_alignment, 8);
        assert_eq!(config.retry.pid_registration, 80);
        assert_eq!(config.retry.subscribe_factor, 2);
        assert_eq!(config.retry.unsubscribe_factor, 3);
    }

    #[test]
    fn test_default_retry_policy_matches_constants() {
        let yaml = with_event(
            "    - name: a\n      element_id: 1\n      max_samples: 1\n      max_subscribers: 1\n      sample_size: 1\n",
        );
        let config = ConfigLoader::load_string(&yaml).unwrap();
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.application.max_application_id_mappings, 32);
        assert_eq!(config.application.quality, QualityType::AsilQm);
    }

    #[test]
    fn test_missing_application_id() {
        let yaml = "service:\n  service_id: 1\n  instance_id: 1\n  events: []\n";
        let result = ConfigLoader::load_string(yaml);
        assert!(matches!(
            result,
            Err(ShmComError::HardValidation(
                HardValidationError::MissingRequiredField { field: "application_id", .. }
            ))
        ));
    }

    #[test]
    fn test_missing_events() {
        let yaml = "application_id: 1\nservice:\n  service_id: 1\n  instance_id: 1\n  events: []\n";
        assert!(ConfigLoader::load_string(yaml).is_err());
    }

    #[test]
    fn test_reserved_application_id() {
        let yaml = format!(
            "application_id: {}\nservice:\n  service_id: 1\n  instance_id: 1\n  events: []\n",
            u32::MAX
        );
        assert!(ConfigLoader::load_string(&yaml).is_err());
    }

    #[test]
    fn test_element_id_spans_sixteen_bits() {
        let event = |id: u64| {
            with_event(&format!(
                "    - name: a\n      element_id: {}\n      max_samples: 4\n      max_subscribers: 1\n      sample_size: 4\n",
                id
            ))
        };
        let config = ConfigLoader::load_string(&event(300)).unwrap();
        assert_eq!(config.events[0].element_id, 300);
        assert_eq!(config.service.element_fq_id(&config.events[0]).element_id, 300);

        assert!(ConfigLoader::load_string(&event(u64::from(u16::MAX))).is_ok());
        assert!(matches!(
            ConfigLoader::load_string(&event(u64::from(u16::MAX) + 1)),
            Err(ShmComError::HardValidation(
                HardValidationError::InvalidFieldValue { field: "element_id", .. }
            ))
        ));
    }

    #[test]
    fn test_too_many_subscribers() {
        let yaml = with_event(
            "    - name: a\n      element_id: 1\n      max_samples: 4\n      max_subscribers: 256\n      sample_size: 4\n",
        );
        assert!(ConfigLoader::load_string(&yaml).is_err());
    }

    #[test]
    fn test_zero_max_samples() {
        let yaml = with_event(
            "    - name: a\n      element_id: 1\n      max_samples: 0\n      max_subscribers: 1\n      sample_size: 4\n",
        );
        assert!(ConfigLoader::load_string(&yaml).is_err());
    }

    #[test]
    fn test_invalid_alignment() {
        for alignment in [3, 32] {
            let yaml = with_event(&format!(
                "    - name: a\n      element_id: 1\n      max_samples: 4\n      max_subscribers: 1\n      sample_size: 4\n      sample_alignment: {}\n",
                alignment
            ));
            assert!(ConfigLoader::load_string(&yaml).is_err(), "alignment {}", alignment);
        }
    }

    #[test]
    fn test_duplicate_names() {
        let yaml = with_event(
            "    - name: a\n      element_id: 1\n      max_samples: 4\n      max_subscribers: 1\n      sample_size: 4\n    - name: a\n      element_id: 2\n      max_samples: 4\n      max_subscribers: 1\n      sample_size: 4\n",
        );
        assert!(matches!(
            ConfigLoader::load_string(&yaml),
            Err(ShmComError::HardValidation(HardValidationError::DuplicateEventName { .. }))
        ));
    }

    #[test]
    fn test_duplicate_element_ids() {
        let yaml = with_event(
            "    - name: a\n      element_id: 1\n      max_samples: 4\n      max_subscribers: 1\n      sample_size: 4\n    - name: b\n      element_id: 1\n      max_samples: 4\n      max_subscribers: 1\n      sample_size: 4\n",
        );
        assert!(matches!(
            ConfigLoader::load_string(&yaml),
            Err(ShmComError::HardValidation(HardValidationError::DuplicateElementId { element_id: 1, .. }))
        ));
    }

    #[test]
    fn test_zero_retry_budget_rejected() {
        let yaml = format!(
            "retry:\n  subscribe_factor: 0\n{}",
            with_event(
                "    - name: a\n      element_id: 1\n      max_samples: 4\n      max_subscribers: 1\n      sample_size: 4\n"
            )
        );
        assert!(ConfigLoader::load_string(&yaml).is_err());
    }
}
