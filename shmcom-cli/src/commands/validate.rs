// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shmcom validate` command - Validate a deployment file.

use shmcom_core::ConfigLoader;

pub async fn execute(file: &str) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(file = %file, "Validating deployment");

    match ConfigLoader::load_file(file) {
        Ok(config) => {
            println!("✓ Deployment is valid");
            println!();
            println!("Application:");
            println!("  Application ID:     {}", config.application.application_id);
            println!("  Quality:            {}", config.application.quality);
            println!(
                "  Pid Mappings:       {}",
                config.application.max_application_id_mappings
            );
            println!(
                "  Retry Budgets:      pid {} / subscribe {}x / unsubscribe {}x",
                config.retry.pid_registration,
                config.retry.subscribe_factor,
                config.retry.unsubscribe_factor
            );
            println!();
            println!(
                "Service {} instance {} ({} events):",
                config.service.service_id,
                config.service.instance_id,
                config.events.len()
            );
            for event in &config.events {
                println!(
                    "  - {} [{}] (slots: {}, subscribers: {}, enforce: {}, sample: {}B align {})",
                    event.name,
                    config.service.element_fq_id(event),
                    event.max_samples,
                    event.max_subscribers,
                    event.enforce_max_samples,
                    event.sample_size,
                    event.sample_alignment
                );
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Deployment validation failed:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}
