//! Shmcom Core Library
//!
//! Shared-memory publish/subscribe event binding. Provides slot control,
//! lock-free subscription accounting, crash takeover of application id
//! registrations, transaction log rollback, and the proxy and skeleton
//! event bindings built on them.

#[macro_use]
pub mod fatal;

pub mod atomics;
pub mod config;
pub mod error;
pub mod messaging;
pub mod proxy;
pub mod rollback;
pub mod runtime;
pub mod shm;
pub mod skeleton;
pub mod state;
pub mod subscription;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use atomics::{AtomicIndirector, RealAtomics};
pub use config::{ConfigLoader, DeploymentConfig, EventConfig, RetryPolicy, ServiceConfig};
pub use error::{ComError, HardValidationError, SharedMemoryError, ShmComError, ShmComResult};
pub use messaging::{LocalMessagePassing, MessagePassingService};
pub use proxy::{GenericProxyEvent, Proxy, ProxyEventCommon, SamplePtr, SampleReferenceTracker};
pub use rollback::RollbackSynchronization;
pub use runtime::ShmComRuntime;
pub use shm::{
    ApplicationIdPidMapping, EventControl, EventSubscriptionControl, ServiceDataControl,
    ServiceDataStorage, SubscribeResult,
};
pub use skeleton::{SampleAllocation, Skeleton, SkeletonEvent};
pub use state::{OfferedState, OfferedStateMachine};
pub use types::{ElementFqId, ElementType, Pid, QualityType, SubscriptionState};
