// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! wems Environment - Execution Dispatch Server
//!
//! Runs the execution engine against the configured store:
//! - Deploys start-up packages from `WEMS_PROCESS_DIR`
//! - Executes submitted jobs through the matching adapter
//! - Fails stale jobs left over from a previous run

use std::sync::Arc;
use tracing::{info, warn};

use wems_core::{MemoryRepository, SqliteRepository};
use wems_environment::config::Config;
use wems_environment::runtime::EnvironmentRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wems_environment=info,wems_core=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        database_url = %config.database_url,
        data_dir = %config.data_dir.display(),
        container_runtime = %config.container_runtime,
        "Starting wems Environment"
    );

    let builder = EnvironmentRuntime::builder().config(config.clone());
    let builder = if config.uses_memory_store() {
        warn!("Using the in-memory store; jobs are lost on exit");
        builder.repository(Arc::new(MemoryRepository::new()))
    } else {
        if let Some(parent) = config
            .database_url
            .strip_prefix("sqlite:")
            .map(|rest| rest.split('?').next().unwrap_or(rest))
            .and_then(|path| std::path::Path::new(path).parent())
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let repository = SqliteRepository::connect(&config.database_url).await?;
        info!("Connected to database");
        builder.repository(Arc::new(repository))
    };

    let runtime = builder.build()?.start().await?;
    info!("wems Environment ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("wems Environment shut down");

    Ok(())
}
