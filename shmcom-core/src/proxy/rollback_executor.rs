// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Undo what a crashed previous incarnation of this consumer left in shared
//! memory.

use std::sync::PoisonError;

use crate::error::ComError;
use crate::runtime::ShmComRuntime;
use crate::shm::ServiceDataControl;
use crate::types::{Pid, TransactionLogId};

/// Rolls back the transaction logs of one consumer identity on one provided
/// service instance.
#[derive(Debug)]
pub struct TransactionLogRollbackExecutor<'a> {
    service_data_control: &'a ServiceDataControl,
    runtime: &'a ShmComRuntime,
    provider_pid: Pid,
    transaction_log_id: TransactionLogId,
}

impl<'a> TransactionLogRollbackExecutor<'a> {
    pub fn new(
        service_data_control: &'a ServiceDataControl,
        runtime: &'a ShmComRuntime,
        provider_pid: Pid,
        transaction_log_id: TransactionLogId,
    ) -> Self {
        Self {
            service_data_control,
            runtime,
            provider_pid,
            transaction_log_id,
        }
    }

    /// Prepare once per process and control block, then roll back one log of
    /// this identity per event.
    pub fn rollback_transaction_logs(&self) -> Result<(), ComError> {
        let (mutex, existed) = self
            .runtime
            .rollback_synchronization()
            .get_mutex(self.service_data_control);
        let _lock = mutex.lock().unwrap_or_else(PoisonError::into_inner);

        // Another proxy of this process already prepared this control block.
        if !existed {
            self.prepare_rollback();
        }

        for (element, event_control) in self.service_data_control.event_controls() {
            let data_control = event_control.data_control();
            let subscription_control = event_control.subscription_control();
            data_control
                .transaction_log_set()
                .rollback_proxy_transactions(
                    self.transaction_log_id,
                    |slot| data_control.dereference_event_without_transaction_logging(slot),
                    |max_sample_count| subscription_control.unsubscribe(max_sample_count),
                )
                .inspect_err(|e| {
                    tracing::error!(%element, error = %e, "Transaction log rollback failed");
                })?;
        }
        Ok(())
    }

    /// Register our pid, report an outdated one to the provider, and flag our
    /// logs as left over.
    pub fn prepare_rollback(&self) {
        let pid = self.runtime.pid();
        let Some(previous_pid) = self
            .service_data_control
            .application_id_pid_mapping()
            .register_pid(self.transaction_log_id.value(), pid)
        else {
            contract_violation!(
                "could not register pid {} for application id {}",
                pid,
                self.transaction_log_id
            );
        };

        if previous_pid != pid {
            tracing::info!(previous_pid, pid, provider_pid = self.provider_pid, "Found outdated pid of a previous incarnation");
            self.runtime.messaging().notify_outdated_node_id(
                self.runtime.quality(),
                previous_pid,
                self.provider_pid,
            );
        }

        for (_, event_control) in self.service_data_control.event_controls() {
            event_control
                .data_control()
                .transaction_log_set()
                .mark_transaction_logs_need_rollback(self.transaction_log_id);
        }
    }
}
