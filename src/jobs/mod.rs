//! Background job scheduling

pub mod scanner;

use std::sync::Arc;
use std::time::Duration;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

pub use scanner::ScanJob;

/// Start the scheduler with the registry scan repeating every `interval`.
///
/// The first cycle starts immediately; later ticks that land while a cycle is
/// still running are skipped by the job's permit.
pub async fn start_scheduler(
    scan_job: Arc<ScanJob>,
    interval: Duration,
) -> anyhow::Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let job = scan_job.clone();
    let repeated = Job::new_repeated_async(interval, move |_uuid, _l| {
        let job = job.clone();
        Box::pin(async move {
            info!("Running registry scan");
            job.run_logged().await;
        })
    })?;
    scheduler.add(repeated).await?;

    scheduler.start().await?;
    scan_job.trigger();

    info!(interval_secs = interval.as_secs(), "Job scheduler started");
    Ok(scheduler)
}
