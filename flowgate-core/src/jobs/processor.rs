//! Background processing for one import job: stream the upload file
//! through the ingest pipeline, heartbeat the job row, honor cancellation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{error, info, warn};

use crate::enrichment::classification::Classifier;
use crate::error::{CoreError, Result};
use crate::ha::canonical_firewall_key_import;
use crate::ingest::ingestor::{SyslogIngestor, UploadCollector};
use crate::jobs::store;
use crate::resolve::device_display_label;
use crate::storage::firewall_source::upsert_firewall_import;
use crate::storage::writer::BatchSink;
use sqlx::PgPool;

/// Cancellation and heartbeat cadence, in processed lines.
pub const CHECK_CANCEL_EVERY: i64 = 5000;

const READ_CHUNK_BYTES: usize = 65536;

/// Everything a worker needs to run import jobs.
#[derive(Clone)]
pub struct ImportContext {
    pub pool: PgPool,
    pub sink: Arc<dyn BatchSink>,
    pub classifier: Arc<Classifier>,
    pub uploads_dir: PathBuf,
    pub batch_size: usize,
}

impl std::fmt::Debug for ImportContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportContext")
            .field("uploads_dir", &self.uploads_dir)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl ImportContext {
    pub fn upload_file_path(&self, job_id: &str) -> PathBuf {
        self.uploads_dir.join(format!("{job_id}.log"))
    }
}

async fn remove_upload_file(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to delete upload file");
        }
    }
}

async fn set_canceled_and_cleanup(
    pool: &PgPool,
    job_id: &str,
    file_path: &Path,
    lines_processed: i64,
    collector: Option<&UploadCollector>,
) {
    if let Err(e) = store::set_canceled(pool, job_id, lines_processed, collector).await {
        error!(job_id, error = %e, "Failed to set job canceled");
    }
    remove_upload_file(file_path).await;
}

/// Push the detected firewall onto the job row as soon as it is known.
async fn maybe_update_job_device(pool: &PgPool, job_id: &str, collector: &UploadCollector) {
    let primary = collector.primary_device(None);
    if primary == "unknown" {
        return;
    }
    let device_key = canonical_firewall_key_import(&primary);
    let display = device_display_label(pool, &primary)
        .await
        .unwrap_or_else(|_| primary.clone());
    if let Err(e) =
        store::maybe_set_job_device(pool, job_id, &primary, &device_key, &display).await
    {
        warn!(job_id, error = %e, "Failed to update job device");
    }
}

/// Run one import job to a terminal state. The caller has already moved
/// the job to `running`.
pub async fn process_ingest_job(ctx: &ImportContext, job_id: &str) -> Result<()> {
    let file_path = ctx.upload_file_path(job_id);

    match run_pipeline(ctx, job_id, &file_path).await {
        Ok(PipelineOutcome::Canceled) => Ok(()),
        Ok(PipelineOutcome::Done) => {
            remove_upload_file(&file_path).await;
            Ok(())
        }
        Err((e, lines_processed, collector)) => {
            error!(job_id, error = %e, "Ingest job failed");
            let message = match &e {
                CoreError::FlowAggregation(_) => format!(
                    "Flow table cannot upsert by identity; ensure the flows unique \
                     index exists and merge duplicate rows first ({e})"
                ),
                other => other.to_string(),
            };
            store::set_error(
                &ctx.pool,
                job_id,
                &message,
                Some(e.kind_name()),
                Some(e.stage()),
                lines_processed,
                collector.as_ref(),
            )
            .await?;
            remove_upload_file(&file_path).await;
            Ok(())
        }
    }
}

enum PipelineOutcome {
    Done,
    Canceled,
}

type PipelineError = (CoreError, i64, Option<UploadCollector>);

async fn run_pipeline(
    ctx: &ImportContext,
    job_id: &str,
    file_path: &Path,
) -> std::result::Result<PipelineOutcome, PipelineError> {
    let mut lines_processed: i64 = 0;

    if !tokio::fs::try_exists(file_path).await.unwrap_or(false) {
        return Err((
            CoreError::Upload(format!("Upload file not found: {}", file_path.display())),
            0,
            None,
        ));
    }

    let mut ingestor =
        SyslogIngestor::import(ctx.sink.clone(), ctx.classifier.clone(), ctx.batch_size);

    let wrap = |e: CoreError, lines: i64, ing: &SyslogIngestor| -> PipelineError {
        (e, lines, ing.collector.clone())
    };

    if store::cancel_requested(&ctx.pool, job_id)
        .await
        .map_err(|e| wrap(e, 0, &ingestor))?
    {
        set_canceled_and_cleanup(&ctx.pool, job_id, file_path, 0, None).await;
        return Ok(PipelineOutcome::Canceled);
    }

    let mut file = tokio::fs::File::open(file_path)
        .await
        .map_err(|e| wrap(e.into(), 0, &ingestor))?;

    // Stream from disk; split on newline and carriage return so wrapped
    // records survive either line discipline.
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];
    let mut line_buffer = String::new();
    loop {
        if lines_processed > 0 && lines_processed % CHECK_CANCEL_EVERY == 0 {
            let collector = ingestor.collector.clone().unwrap_or_default();
            maybe_update_job_device(&ctx.pool, job_id, &collector).await;
            if let Err(e) =
                store::update_running_counters(&ctx.pool, job_id, lines_processed, &collector)
                    .await
            {
                warn!(job_id, error = %e, "Job heartbeat update failed");
            }
            if store::cancel_requested(&ctx.pool, job_id)
                .await
                .map_err(|e| wrap(e, lines_processed, &ingestor))?
            {
                ingestor
                    .flush()
                    .await
                    .map_err(|e| wrap(e, lines_processed, &ingestor))?;
                set_canceled_and_cleanup(
                    &ctx.pool,
                    job_id,
                    file_path,
                    lines_processed,
                    ingestor.collector.as_ref(),
                )
                .await;
                return Ok(PipelineOutcome::Canceled);
            }
            info!(job_id, lines_processed, "Job progress");
        }

        let read = file
            .read(&mut chunk)
            .await
            .map_err(|e| wrap(e.into(), lines_processed, &ingestor))?;
        if read == 0 {
            break;
        }
        line_buffer.push_str(&String::from_utf8_lossy(&chunk[..read]));
        while let Some(sep) = line_buffer.find(['\n', '\r']) {
            let line: String = line_buffer.drain(..=sep).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if line.trim().is_empty() {
                continue;
            }
            lines_processed += 1;
            ingestor
                .handle_line(line)
                .await
                .map_err(|e| wrap(e, lines_processed, &ingestor))?;
        }
    }
    if !line_buffer.trim().is_empty() {
        lines_processed += 1;
        let trailing = line_buffer.clone();
        ingestor
            .handle_line(&trailing)
            .await
            .map_err(|e| wrap(e, lines_processed, &ingestor))?;
    }

    if store::cancel_requested(&ctx.pool, job_id)
        .await
        .map_err(|e| wrap(e, lines_processed, &ingestor))?
    {
        ingestor
            .flush()
            .await
            .map_err(|e| wrap(e, lines_processed, &ingestor))?;
        set_canceled_and_cleanup(
            &ctx.pool,
            job_id,
            file_path,
            lines_processed,
            ingestor.collector.as_ref(),
        )
        .await;
        return Ok(PipelineOutcome::Canceled);
    }

    ingestor
        .flush()
        .await
        .map_err(|e| wrap(e, lines_processed, &ingestor))?;

    // Surface 100% + finalizing before the terminal transition lands.
    if let Err(e) = store::set_phase(&ctx.pool, job_id, Some("finalizing")).await {
        warn!(job_id, error = %e, "Failed to set finalizing phase");
    }

    let collector = ingestor.collector.clone().unwrap_or_default();
    let device_detected = collector.primary_device(None);
    let device_key = canonical_firewall_key_import(&device_detected);
    let device_display = device_display_label(&ctx.pool, &device_detected)
        .await
        .unwrap_or_else(|_| device_detected.clone());

    if !device_key.is_empty() {
        info!(
            job_id,
            device_detected,
            firewall_key = %device_key,
            events_inserted = collector.events_inserted,
            "Import marking firewall"
        );
        upsert_firewall_import(
            &ctx.pool,
            &device_key,
            collector.time_min(),
            collector.time_max(),
        )
        .await
        .map_err(|e| wrap(e.into(), lines_processed, &ingestor))?;
    }

    store::set_done(
        &ctx.pool,
        job_id,
        lines_processed,
        &collector,
        &device_detected,
        &device_key,
        &device_display,
    )
    .await
    .map_err(|e| wrap(e, lines_processed, &ingestor))?;

    info!(
        job_id,
        events_inserted = collector.events_inserted,
        device_key = %device_key,
        "Job finished state=done"
    );
    Ok(PipelineOutcome::Done)
}
