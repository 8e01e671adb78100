// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! CLI command modules.

pub mod demo;
pub mod validate;

/// Failures of CLI commands that are not library errors.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Demo needs at least one subscriber")]
    NoSubscribers,
}
