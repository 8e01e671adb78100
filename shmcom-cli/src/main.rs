// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Shmcom CLI
//!
//! Command-line interface for the shmcom shared-memory event binding.

use clap::{Parser, Subcommand};

mod commands;

/// Shmcom - shared-memory publish/subscribe event binding
#[derive(Parser)]
#[command(name = "shmcom")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a deployment file
    Validate {
        /// Path to the deployment YAML file
        file: String,
    },

    /// Run a skeleton and proxies in-process over one deployment
    Demo {
        /// Path to the deployment YAML file
        file: String,

        /// Samples to publish per event
        #[arg(short, long, default_value_t = 16)]
        samples: usize,

        /// Number of subscribing proxies
        #[arg(long, default_value_t = 2)]
        subscribers: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    match cli.command {
        Commands::Validate { file } => commands::validate::execute(&file).await,
        Commands::Demo {
            file,
            samples,
            subscribers,
        } => commands::demo::execute(&file, samples, subscribers).await,
    }
}
