// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Binding runtime: process identity and shared services.
//!
//! Proxies and skeletons take an `Arc<ShmComRuntime>` explicitly. A process
//! may additionally [`install`] one as its default and [`shutdown`] it before
//! exit.

use std::sync::{Arc, PoisonError, RwLock};

use crate::config::ApplicationConfig;
use crate::messaging::MessagePassingService;
use crate::rollback::RollbackSynchronization;
use crate::types::{ApplicationId, Pid, QualityType, TransactionLogId};

/// Pid of the calling process.
pub fn current_pid() -> Pid {
    nix::unistd::getpid().as_raw()
}

/// Per-process binding state.
pub struct ShmComRuntime {
    application_id: ApplicationId,
    pid: Pid,
    quality: QualityType,
    messaging: Arc<dyn MessagePassingService>,
    rollback_synchronization: Arc<RollbackSynchronization>,
}

impl ShmComRuntime {
    pub fn new(
        application_id: ApplicationId,
        quality: QualityType,
        messaging: Arc<dyn MessagePassingService>,
    ) -> Self {
        Self {
            application_id,
            pid: current_pid(),
            quality,
            messaging,
            rollback_synchronization: RollbackSynchronization::global(),
        }
    }

    pub fn from_config(config: &ApplicationConfig, messaging: Arc<dyn MessagePassingService>) -> Self {
        Self::new(config.application_id, config.quality, messaging)
    }

    /// Override the pid, e.g. to act as a restarted incarnation.
    pub fn with_pid(mut self, pid: Pid) -> Self {
        self.pid = pid;
        self
    }

    /// Use a private rollback registry instead of the process-wide one.
    pub fn with_rollback_synchronization(mut self, sync: Arc<RollbackSynchronization>) -> Self {
        self.rollback_synchronization = sync;
        self
    }

    pub fn application_id(&self) -> ApplicationId {
        self.application_id
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn quality(&self) -> QualityType {
        self.quality
    }

    pub fn transaction_log_id(&self) -> TransactionLogId {
        TransactionLogId::from_application_id(self.application_id)
    }

    pub fn messaging(&self) -> &Arc<dyn MessagePassingService> {
        &self.messaging
    }

    pub fn rollback_synchronization(&self) -> &RollbackSynchronization {
        &self.rollback_synchronization
    }
}

impl std::fmt::Debug for ShmComRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmComRuntime")
            .field("application_id", &self.application_id)
            .field("pid", &self.pid)
            .field("quality", &self.quality)
            .finish()
    }
}

static INSTALLED: RwLock<Option<Arc<ShmComRuntime>>> = RwLock::new(None);

/// Make `runtime` the process default. Returns the previous one.
pub fn install(runtime: Arc<ShmComRuntime>) -> Option<Arc<ShmComRuntime>> {
    tracing::debug!(application_id = runtime.application_id, pid = runtime.pid, "Installing runtime");
    INSTALLED
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .replace(runtime)
}

/// The installed process default, if any.
pub fn current() -> Option<Arc<ShmComRuntime>> {
    INSTALLED
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Remove the process default.
pub fn shutdown() -> Option<Arc<ShmComRuntime>> {
    INSTALLED
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
}
