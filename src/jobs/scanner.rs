//! Registry scan job
//!
//! Wraps [`RegistryScanner`] with a single permit so at most one cycle is in
//! flight. A run that finds the permit taken is skipped, never queued.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::services::{RegistryScanner, ScanSummary};

pub struct ScanJob {
    scanner: Arc<RegistryScanner>,
    permit: Arc<Semaphore>,
}

impl ScanJob {
    pub fn new(scanner: Arc<RegistryScanner>) -> Self {
        Self {
            scanner,
            permit: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn scanner(&self) -> &Arc<RegistryScanner> {
        &self.scanner
    }

    /// Whether a cycle currently holds the permit
    pub fn is_running(&self) -> bool {
        self.permit.available_permits() == 0
    }

    /// Run one cycle. `Ok(None)` when another cycle is already running.
    pub async fn run(&self) -> Result<Option<ScanSummary>> {
        let Ok(_permit) = self.permit.clone().try_acquire_owned() else {
            info!("Registry scan already in progress, skipping this run");
            return Ok(None);
        };

        self.scanner.scan().await.map(Some)
    }

    /// Run one cycle and log the outcome instead of returning it
    pub async fn run_logged(&self) {
        if let Err(e) = self.run().await {
            error!(error = %e, "Registry scan failed");
        }
    }

    /// Start a cycle on a background task
    pub fn trigger(self: &Arc<Self>) -> JoinHandle<()> {
        let job = self.clone();
        tokio::spawn(async move { job.run_logged().await })
    }
}
