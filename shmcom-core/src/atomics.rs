// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Injectable atomic operations.
//!
//! Every compare-exchange on a shared control word goes through an
//! [`AtomicIndirector`], so tests can script contention deterministically.
//! Production code uses [`RealAtomics`].

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Compare-exchange operations on shared control words.
pub trait AtomicIndirector {
    fn compare_exchange_u32(
        &self,
        atomic: &AtomicU32,
        current: u32,
        new: u32,
        success: Ordering,
        failure: Ordering,
    ) -> Result<u32, u32>;

    fn compare_exchange_u64(
        &self,
        atomic: &AtomicU64,
        current: u64,
        new: u64,
        success: Ordering,
        failure: Ordering,
    ) -> Result<u64, u64>;
}

/// Forwards straight to the platform atomics.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealAtomics;

impl AtomicIndirector for RealAtomics {
    #[inline]
    fn compare_exchange_u32(
        &self,
        atomic: &AtomicU32,
        current: u32,
        new: u32,
        success: Ordering,
        failure: Ordering,
    ) -> Result<u32, u32> {
        atomic.compare_exchange(current, new, success, failure)
    }

    #[inline]
    fn compare_exchange_u64(
        &self,
        atomic: &AtomicU64,
        current: u64,
        new: u64,
        success: Ordering,
        failure: Ordering,
    ) -> Result<u64, u64> {
        atomic.compare_exchange(current, new, success, failure)
    }
}
