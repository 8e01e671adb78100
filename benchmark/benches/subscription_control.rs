// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Subscription accounting and pid registration microbenchmarks.
//!
//! Measures the uncontended compare-exchange paths and a contended
//! subscribe/unsubscribe round trip.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use shmcom_benchmark::{region_name, SUBSCRIBER_COUNTS};
use shmcom_core::shm::{
    register_pid, ApplicationIdPidMappingEntry, EventSubscriptionControl, SharedMemoryRegion,
    SubscribeResult,
};

/// Benchmark a subscribe/unsubscribe pair on a process-local control.
fn bench_subscribe_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("subscribe_round_trip");
    group.measurement_time(Duration::from_secs(5));

    for &subscribers in SUBSCRIBER_COUNTS {
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &subscribers,
            |b, &subscribers| {
                let control = EventSubscriptionControl::new(u16::MAX, subscribers, true);
                b.iter(|| {
                    let result = control.subscribe(black_box(5));
                    assert_eq!(result, SubscribeResult::Success);
                    control.unsubscribe(5);
                });
            },
        );
    }

    group.finish();
}

/// Same round trip on a control living in a POSIX shared memory segment.
fn bench_subscribe_in_segment(c: &mut Criterion) {
    let region = SharedMemoryRegion::create(&region_name("subscribe"), 4096)
        .expect("Failed to create SHM region");
    let control = region
        .emplace(0, EventSubscriptionControl::new(u16::MAX, 8, true))
        .expect("Failed to place control");

    c.bench_function("subscribe_round_trip_shm", |b| {
        b.iter(|| {
            control.subscribe(black_box(5));
            control.unsubscribe(5);
        });
    });
}

/// Round trip while another thread keeps changing the same word.
fn bench_subscribe_contended(c: &mut Criterion) {
    let control = EventSubscriptionControl::with_retry_factors(u16::MAX, 8, true, 8, 1_000);
    let stop = AtomicBool::new(false);

    std::thread::scope(|s| {
        s.spawn(|| {
            while !stop.load(Ordering::Relaxed) {
                if control.subscribe(1) == SubscribeResult::Success {
                    control.unsubscribe(1);
                }
            }
        });

        c.bench_function("subscribe_round_trip_contended", |b| {
            b.iter(|| {
                if control.subscribe(black_box(5)) == SubscribeResult::Success {
                    control.unsubscribe(5);
                }
            });
        });

        stop.store(true, Ordering::Relaxed);
    });
}

/// Benchmark re-registration of an already registered application id.
fn bench_register_pid(c: &mut Criterion) {
    let mut group = c.benchmark_group("register_pid");

    for &capacity in &[8usize, 64, 512] {
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, &capacity| {
            let entries: Vec<ApplicationIdPidMappingEntry> =
                (0..capacity).map(|_| ApplicationIdPidMappingEntry::new()).collect();
            // Fill all but the last entry so the lookup scans the whole array.
            for id in 0..capacity as u32 - 1 {
                register_pid(&entries, id, 1);
            }
            let target = capacity as u32 - 1;
            b.iter(|| black_box(register_pid(&entries, black_box(target), 2)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_subscribe_round_trip,
    bench_subscribe_in_segment,
    bench_subscribe_contended,
    bench_register_pid,
);
criterion_main!(benches);
