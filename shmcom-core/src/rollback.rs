// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Process-wide serialization of transaction log rollback.
//!
//! Several proxies of one process may attach to the same provided service.
//! Only the first one rolls back the transaction logs a previous incarnation
//! of this process left behind; the others wait on the same mutex and skip.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// Registry of one mutex per shared control block identity.
///
/// Entries are created on demand and live as long as the registry.
#[derive(Debug, Default)]
pub struct RollbackSynchronization {
    mutexes: Mutex<HashMap<usize, Arc<Mutex<()>>>>,
}

static GLOBAL: OnceLock<Arc<RollbackSynchronization>> = OnceLock::new();

impl RollbackSynchronization {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry. Initialized on first use, released at
    /// process exit.
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::new())))
    }

    /// Mutex for the control block at `control`'s address, and whether it
    /// already existed.
    pub fn get_mutex<T>(&self, control: &T) -> (Arc<Mutex<()>>, bool) {
        let key = control as *const T as usize;
        let mut mutexes = self.mutexes.lock().unwrap_or_else(PoisonError::into_inner);
        match mutexes.get(&key) {
            Some(mutex) => (Arc::clone(mutex), true),
            None => {
                let mutex = Arc::new(Mutex::new(()));
                mutexes.insert(key, Arc::clone(&mutex));
                (mutex, false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_caller_creates_mutex() {
        let sync = RollbackSynchronization::new();
        let control_a = 1u64;
        let control_b = 2u64;

        let (first, existed) = sync.get_mutex(&control_a);
        assert!(!existed);
        let (again, existed) = sync.get_mutex(&control_a);
        assert!(existed);
        assert!(Arc::ptr_eq(&first, &again));

        let (other, existed) = sync.get_mutex(&control_b);
        assert!(!existed);
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[test]
    fn test_concurrent_callers_see_one_creator() {
        let sync = RollbackSynchronization::new();
        let control = [0u8; 64];

        let creators: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| usize::from(!sync.get_mutex(&control).1)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(creators, 1);
    }

    #[test]
    fn test_global_is_shared() {
        assert!(Arc::ptr_eq(
            &RollbackSynchronization::global(),
            &RollbackSynchronization::global()
        ));
    }
}
