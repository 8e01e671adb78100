// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Application id to pid mapping, resident in shared memory.
//!
//! A fixed array of entries, each with a packed `(status, application_id)` key
//! that is the sole arbiter of ownership. Registration is lock-free. An entry
//! left in `Updating` for the caller's own application id is taken over,
//! since only a crash during registration can leave it there.
//!
//! Key layout (cross-process ABI):
//!
//! ```text
//!  63        48 47        32 31                      0
//! +------------+------------+-------------------------+
//! |  reserved  |   status   |     application_id      |
//! +------------+------------+-------------------------+
//! ```

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

use crate::atomics::{AtomicIndirector, RealAtomics};
use crate::types::{ApplicationId, Pid};

use super::region::SharedMemoryLayout;

/// Full rescans of the entry array before registration gives up.
pub const DEFAULT_PID_REGISTRATION_RETRIES: u32 = 50;

/// Ownership status of a mapping entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MappingEntryStatus {
    Unused = 0,
    Used = 1,
    Updating = 2,
    /// Decoded from a key whose status bits are not a known value.
    Invalid = 3,
}

impl MappingEntryStatus {
    fn from_bits(bits: u16) -> Self {
        match bits {
            0 => Self::Unused,
            1 => Self::Used,
            2 => Self::Updating,
            _ => Self::Invalid,
        }
    }
}

const STATUS_SHIFT: u32 = 32;

#[inline]
fn pack_key(status: MappingEntryStatus, application_id: ApplicationId) -> u64 {
    ((status as u16 as u64) << STATUS_SHIFT) | u64::from(application_id)
}

#[inline]
fn unpack_key(key: u64) -> (MappingEntryStatus, ApplicationId) {
    let status = MappingEntryStatus::from_bits((key >> STATUS_SHIFT) as u16);
    (status, key as u32)
}

/// One slot of the mapping.
#[repr(C)]
#[derive(Debug, Default)]
pub struct ApplicationIdPidMappingEntry {
    key: AtomicU64,
    pid: AtomicI32,
}

// SAFETY: only atomics, repr(C), all-zero is the valid Unused state.
unsafe impl SharedMemoryLayout for ApplicationIdPidMappingEntry {}

impl ApplicationIdPidMappingEntry {
    pub const fn new() -> Self {
        Self {
            key: AtomicU64::new(0),
            pid: AtomicI32::new(0),
        }
    }

    /// Snapshot of `(status, application_id)`.
    pub fn key(&self) -> (MappingEntryStatus, ApplicationId) {
        unpack_key(self.key.load(Ordering::Acquire))
    }

    pub fn pid(&self) -> Pid {
        self.pid.load(Ordering::Acquire)
    }

    fn publish(&self, status: MappingEntryStatus, application_id: ApplicationId) {
        self.key
            .store(pack_key(status, application_id), Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn force_state(
        &self,
        status: MappingEntryStatus,
        application_id: ApplicationId,
        pid: Pid,
    ) {
        self.pid.store(pid, Ordering::Relaxed);
        self.publish(status, application_id);
    }
}

/// Register `pid` for `application_id` using real atomics and the default
/// retry budget.
///
/// Returns the pid previously registered for the id, the new pid on a fresh
/// claim or crash takeover, or `None` if no entry could be claimed.
pub fn register_pid(
    entries: &[ApplicationIdPidMappingEntry],
    application_id: ApplicationId,
    pid: Pid,
) -> Option<Pid> {
    register_pid_with(
        entries,
        application_id,
        pid,
        &RealAtomics,
        DEFAULT_PID_REGISTRATION_RETRIES,
    )
}

/// [`register_pid`] with an explicit atomic indirection and retry budget.
pub fn register_pid_with<A: AtomicIndirector>(
    entries: &[ApplicationIdPidMappingEntry],
    application_id: ApplicationId,
    pid: Pid,
    atomics: &A,
    max_retries: u32,
) -> Option<Pid> {
    for entry in entries {
        let (status, owner) = entry.key();
        if owner != application_id {
            continue;
        }
        match status {
            MappingEntryStatus::Used => {
                // Already ours: the Used status guards the pid field.
                let previous = entry.pid.swap(pid, Ordering::AcqRel);
                return Some(previous);
            }
            MappingEntryStatus::Updating => {
                tracing::warn!(
                    application_id,
                    stale_pid = entry.pid(),
                    pid,
                    "Found pid mapping entry in Updating state, taking over after crash"
                );
                entry.pid.store(pid, Ordering::Release);
                entry.publish(MappingEntryStatus::Used, application_id);
                return Some(pid);
            }
            MappingEntryStatus::Unused | MappingEntryStatus::Invalid => {}
        }
    }

    for _ in 0..max_retries {
        for entry in entries {
            let observed = entry.key.load(Ordering::Acquire);
            let (status, _) = unpack_key(observed);
            if status != MappingEntryStatus::Unused {
                continue;
            }
            let claimed = pack_key(MappingEntryStatus::Updating, application_id);
            if atomics
                .compare_exchange_u64(
                    &entry.key,
                    observed,
                    claimed,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                entry.pid.store(pid, Ordering::Release);
                entry.publish(MappingEntryStatus::Used, application_id);
                tracing::debug!(application_id, pid, "Registered pid mapping");
                return Some(pid);
            }
        }
    }

    tracing::warn!(
        application_id,
        pid,
        capacity = entries.len(),
        "Pid registration failed: no free mapping entry"
    );
    None
}

/// Process-owned array of mapping entries.
#[derive(Debug)]
pub struct ApplicationIdPidMapping {
    entries: Box<[ApplicationIdPidMappingEntry]>,
    max_retries: u32,
}

impl ApplicationIdPidMapping {
    pub fn new(capacity: usize) -> Self {
        Self::with_retries(capacity, DEFAULT_PID_REGISTRATION_RETRIES)
    }

    pub fn with_retries(capacity: usize, max_retries: u32) -> Self {
        let entries = (0..capacity)
            .map(|_| ApplicationIdPidMappingEntry::new())
            .collect();
        Self {
            entries,
            max_retries,
        }
    }

    pub fn register_pid(&self, application_id: ApplicationId, pid: Pid) -> Option<Pid> {
        register_pid_with(
            &self.entries,
            application_id,
            pid,
            &RealAtomics,
            self.max_retries,
        )
    }

    /// Pid currently registered as `Used` for `application_id`.
    pub fn lookup(&self, application_id: ApplicationId) -> Option<Pid> {
        self.entries.iter().find_map(|entry| match entry.key() {
            (MappingEntryStatus::Used, owner) if owner == application_id => Some(entry.pid()),
            _ => None,
        })
    }

    pub fn entries(&self) -> &[ApplicationIdPidMappingEntry] {
        &self.entries
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }
}
