// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shmcom demo` command - Skeleton and proxies over one in-process deployment.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use shmcom_core::messaging::EventUpdateHandler;
use shmcom_core::{
    ConfigLoader, GenericProxyEvent, LocalMessagePassing, Proxy, SampleReferenceTracker,
    ShmComRuntime, Skeleton, SkeletonEvent,
};
use tokio::sync::Notify;
use tokio::task::JoinSet;

use super::CommandError;

const DRAIN_POLL: Duration = Duration::from_millis(50);

struct Consumer {
    proxy_index: usize,
    event: Arc<GenericProxyEvent>,
    max_sample_count: usize,
}

pub async fn execute(
    file: &str,
    samples: usize,
    subscribers: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    if subscribers == 0 {
        return Err(CommandError::NoSubscribers.into());
    }
    let config = ConfigLoader::load_file(file)?;
    let messaging = LocalMessagePassing::new_shared();
    let runtime = Arc::new(ShmComRuntime::from_config(
        &config.application,
        messaging.clone(),
    ));

    let skeleton = Skeleton::from_config(Arc::clone(&runtime), &config);
    skeleton.prepare_offer();
    let producers: Vec<Arc<SkeletonEvent>> = config
        .events
        .iter()
        .map(|event| {
            Arc::new(SkeletonEvent::new(
                &skeleton,
                config.service.element_fq_id(event),
                event.name.clone(),
            ))
        })
        .collect();
    tracing::info!(events = producers.len(), "Skeleton offered");

    let mut proxies = Vec::with_capacity(subscribers);
    let mut consumers = Vec::new();
    for proxy_index in 0..subscribers {
        let proxy = Proxy::create(
            Arc::clone(&runtime),
            config.service,
            Arc::clone(skeleton.control()),
            Arc::clone(skeleton.storage()),
        )?;
        for event in &config.events {
            let consumer =
                GenericProxyEvent::try_new(&proxy, config.service.element_fq_id(event), &event.name)?;
            // Share the slots fairly so every proxy fits when enforced.
            let max_sample_count = (usize::from(event.max_samples) / subscribers)
                .clamp(1, shmcom_core::proxy::MAX_SUBSCRIBE_SAMPLE_COUNT);
            match consumer.subscribe(max_sample_count) {
                Ok(()) => consumers.push(Consumer {
                    proxy_index,
                    event: Arc::new(consumer),
                    max_sample_count,
                }),
                Err(e) => {
                    println!("  proxy {} could not subscribe to {}: {}", proxy_index, event.name, e);
                }
            }
        }
        proxies.push(proxy);
    }

    let publishing_done = Arc::new(AtomicBool::new(false));
    let mut drains = JoinSet::new();
    for consumer in &consumers {
        let notify = Arc::new(Notify::new());
        let handler: Arc<EventUpdateHandler> = {
            let notify = Arc::clone(&notify);
            Arc::new(move || notify.notify_one())
        };
        consumer.event.set_receive_handler(Arc::downgrade(&handler));

        let event = Arc::clone(&consumer.event);
        let done = Arc::clone(&publishing_done);
        let tracker = SampleReferenceTracker::new(consumer.max_sample_count);
        let proxy_index = consumer.proxy_index;
        drains.spawn(async move {
            // Keeps the weakly registered handler alive.
            let _handler = handler;
            let mut received = 0usize;
            loop {
                let woken = tokio::time::timeout(DRAIN_POLL, notify.notified()).await.is_ok();
                let finished = done.load(Ordering::Acquire);
                received += event
                    .get_new_samples(|_sample, _timestamp| {}, &tracker)
                    .unwrap_or(0);
                if !woken && finished {
                    break;
                }
            }
            (proxy_index, event.element(), received)
        });
    }

    let publisher = {
        let producers = producers.clone();
        tokio::spawn(async move {
            let mut published = 0usize;
            let mut failed = 0usize;
            for sequence in 0..samples {
                for producer in &producers {
                    match producer.allocate() {
                        Ok(mut allocation) => {
                            let bytes = allocation.as_bytes_mut();
                            let value = (sequence as u64).to_le_bytes();
                            let len = bytes.len().min(value.len());
                            bytes[..len].copy_from_slice(&value[..len]);
                            producer.send(allocation);
                            published += 1;
                        }
                        Err(e) => {
                            tracing::warn!(event = producer.event_name(), error = %e, "Sample dropped");
                            failed += 1;
                        }
                    }
                }
                tokio::task::yield_now().await;
            }
            (published, failed)
        })
    };

    let (published, failed) = publisher.await.map_err(CommandError::from)?;
    publishing_done.store(true, Ordering::Release);
    println!("Published {} samples ({} allocation failures)", published, failed);

    while let Some(result) = drains.join_next().await {
        let (proxy_index, element, received) = result.map_err(CommandError::from)?;
        println!("  proxy {} received {:>5} samples of {}", proxy_index, received, element);
    }

    // Provider restart: every subscription goes pending, then follows the
    // re-offered instance.
    for proxy in &proxies {
        proxy.service_availability_changed(false);
    }
    skeleton.prepare_offer();
    for proxy in &proxies {
        proxy.service_availability_changed(true);
    }
    for consumer in &consumers {
        println!(
            "  proxy {} {} after re-offer: {}",
            consumer.proxy_index,
            consumer.event.element(),
            consumer.event.subscription_state()
        );
    }

    Ok(())
}
