// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Test support: death tests, scripted atomics and log capture.

use std::io;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::atomics::AtomicIndirector;

const DEATH_TEST_ENV: &str = "SHMCOM_DEATH_TEST";

/// Run `body` in a re-executed copy of this test binary and assert that the
/// child terminated abnormally.
///
/// `module` is `module_path!()` of the calling test module and `test` the
/// test function's name.
pub(crate) fn expect_termination<F: FnOnce()>(module: &str, test: &str, body: F) {
    let module = module.split_once("::").map_or(module, |(_, rest)| rest);
    let full_name = format!("{module}::{test}");

    if std::env::var(DEATH_TEST_ENV).as_deref() == Ok(full_name.as_str()) {
        body();
        // Survived: report success so the parent assertion fails.
        std::process::exit(0);
    }

    let exe = std::env::current_exe().expect("current test executable");
    let status = Command::new(exe)
        .args([full_name.as_str(), "--exact", "--test-threads=1"])
        .env(DEATH_TEST_ENV, &full_name)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .expect("spawn death test child");

    assert!(
        !status.success(),
        "{full_name} was expected to terminate the process"
    );
}

/// Atomic indirection that fails the first `failures` compare-exchanges
/// without touching the value, then forwards to the real operation.
#[derive(Debug, Default)]
pub(crate) struct ScriptedAtomics {
    failures: usize,
    calls: AtomicUsize,
}

impl ScriptedAtomics {
    pub(crate) fn failing(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn always_failing() -> Self {
        Self::failing(usize::MAX)
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn should_fail(&self) -> bool {
        self.calls.fetch_add(1, Ordering::Relaxed) < self.failures
    }
}

impl AtomicIndirector for ScriptedAtomics {
    fn compare_exchange_u32(
        &self,
        atomic: &AtomicU32,
        current: u32,
        new: u32,
        success: Ordering,
        failure: Ordering,
    ) -> Result<u32, u32> {
        if self.should_fail() {
            return Err(atomic.load(failure));
        }
        atomic.compare_exchange(current, new, success, failure)
    }

    fn compare_exchange_u64(
        &self,
        atomic: &AtomicU64,
        current: u64,
        new: u64,
        success: Ordering,
        failure: Ordering,
    ) -> Result<u64, u64> {
        if self.should_fail() {
            return Err(atomic.load(failure));
        }
        atomic.compare_exchange(current, new, success, failure)
    }
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("log buffer").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `body` with a thread-local subscriber and return everything it
/// logged at `debug` or above, without ANSI colors.
pub(crate) fn capture_logs<F: FnOnce()>(body: F) -> String {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    tracing::subscriber::with_default(subscriber, body);

    let bytes = buffer.0.lock().expect("log buffer").clone();
    String::from_utf8_lossy(&bytes).into_owned()
}
