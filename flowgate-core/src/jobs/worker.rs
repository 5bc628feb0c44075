//! Single-threaded import queue: one job runs at a time, the rest stay
//! queued until the worker comes back around.

use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::jobs::processor::{ImportContext, process_ingest_job};
use crate::jobs::store;

pub const POLL_INTERVAL: Duration = Duration::from_millis(1500);

/// Run until shutdown: sweep stalled jobs, pick the oldest queued job,
/// process it, repeat.
pub async fn run_worker_loop(ctx: ImportContext, mut shutdown: broadcast::Receiver<()>) {
    info!("Import worker started");
    loop {
        if let Err(e) = store::mark_stalled_running_jobs(&ctx.pool).await {
            error!(error = %e, "Stall sweep failed");
        }

        let job = match store::claim_next_queued(&ctx.pool).await {
            Ok(job) => job,
            Err(e) => {
                error!(error = %e, "Worker failed to pick job");
                None
            }
        };

        let Some(job) = job else {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(POLL_INTERVAL) => continue,
            }
        };

        info!(
            job_id = %job.id,
            filename = job.filename.as_deref().unwrap_or(""),
            "Job started"
        );

        if let Err(e) = process_ingest_job(&ctx, &job.id).await {
            // The processor handles its own terminal transitions; reaching
            // here means even the error write failed.
            error!(job_id = %job.id, error = %e, "Import job processing failed");
            let _ = store::set_error(
                &ctx.pool,
                &job.id,
                &e.to_string(),
                Some(e.kind_name()),
                Some(e.stage()),
                0,
                None,
            )
            .await;
        }

        match store::get_job(&ctx.pool, &job.id).await {
            Ok(Some(finished)) => info!(
                job_id = %job.id,
                state = %finished.status,
                events_inserted = finished.events_inserted,
                error = finished.error_message.as_deref().unwrap_or(""),
                "Job finished"
            ),
            Ok(None) => {}
            Err(e) => error!(job_id = %job.id, error = %e, "Failed to read finished job"),
        }

        if shutdown.try_recv().is_ok() {
            break;
        }
    }
    info!("Import worker stopped");
}
