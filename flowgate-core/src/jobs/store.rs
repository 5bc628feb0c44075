//! Persistence helpers for ingest-job rows: lifecycle transitions, the
//! atomic queue pop, and recovery sweeps.

use chrono::{Duration, Utc};
use sqlx::PgPool;
use tracing::warn;

use crate::error::Result;
use crate::ingest::ingestor::UploadCollector;
use flowgate_model::{ErrorStage, IngestJob, IngestJobStatus};

/// A `running` job whose heartbeat is older than this is declared stalled.
pub const STALL_THRESHOLD_MINUTES: i64 = 5;

pub async fn create_uploading(pool: &PgPool, job_id: &str, filename: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO ingest_jobs (id, status, filename, created_at, updated_at)
        VALUES ($1, 'uploading', $2, $3, $3)
        "#,
    )
    .bind(job_id)
    .bind(filename)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_bytes_received(pool: &PgPool, job_id: &str, bytes: i64) -> Result<()> {
    sqlx::query("UPDATE ingest_jobs SET bytes_received = $2, updated_at = $3 WHERE id = $1")
        .bind(job_id)
        .bind(bytes)
        .bind(Utc::now())
        .execute(pool)
        .await?;
    Ok(())
}

/// Upload finished: record the size and hand the job to the worker queue.
pub async fn set_queued(pool: &PgPool, job_id: &str, bytes_total: i64) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE ingest_jobs
        SET status = 'queued', bytes_total = $2, bytes_received = $2, updated_at = $3
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .bind(bytes_total)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_job(pool: &PgPool, job_id: &str) -> Result<Option<IngestJob>> {
    let job = sqlx::query_as("SELECT * FROM ingest_jobs WHERE id = $1")
        .bind(job_id)
        .fetch_optional(pool)
        .await?;
    Ok(job)
}

pub async fn list_jobs(
    pool: &PgPool,
    states: &[IngestJobStatus],
    limit: i64,
) -> Result<Vec<IngestJob>> {
    let jobs = if states.is_empty() {
        sqlx::query_as("SELECT * FROM ingest_jobs ORDER BY created_at DESC LIMIT $1")
            .bind(limit)
            .fetch_all(pool)
            .await?
    } else {
        let state_strs: Vec<String> =
            states.iter().map(|s| s.as_str().to_string()).collect();
        sqlx::query_as(
            r#"
            SELECT * FROM ingest_jobs
            WHERE status = ANY($1)
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(&state_strs)
        .bind(limit)
        .fetch_all(pool)
        .await?
    };
    Ok(jobs)
}

pub async fn delete_job_row(pool: &PgPool, job_id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM ingest_jobs WHERE id = $1")
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Atomic FIFO dispatch: flip the oldest eligible queued job to running.
/// The conditional update is the queue's mutual exclusion.
pub async fn claim_next_queued(pool: &PgPool) -> Result<Option<IngestJob>> {
    let job = sqlx::query_as(
        r#"
        UPDATE ingest_jobs
        SET status = 'running', started_at = $1, updated_at = $1
        WHERE id = (
            SELECT id FROM ingest_jobs
            WHERE status = 'queued' AND cancel_requested = FALSE
            ORDER BY created_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING *
        "#,
    )
    .bind(Utc::now())
    .fetch_optional(pool)
    .await?;
    Ok(job)
}

pub async fn cancel_requested(pool: &PgPool, job_id: &str) -> Result<bool> {
    let flagged: Option<bool> =
        sqlx::query_scalar("SELECT cancel_requested FROM ingest_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(pool)
            .await?;
    Ok(flagged.unwrap_or(false))
}

pub async fn request_cancel(pool: &PgPool, job_id: &str) -> Result<()> {
    sqlx::query(
        "UPDATE ingest_jobs SET cancel_requested = TRUE, updated_at = $2 WHERE id = $1",
    )
    .bind(job_id)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

/// Heartbeat + counter refresh while a job streams its file.
pub async fn update_running_counters(
    pool: &PgPool,
    job_id: &str,
    lines_processed: i64,
    collector: &UploadCollector,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE ingest_jobs SET
            lines_processed = $2,
            parse_ok = $3,
            parse_err = $4,
            filtered_id = $5,
            raw_logs_inserted = $6,
            events_inserted = $7,
            time_min = $8,
            time_max = $9,
            updated_at = $10
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .bind(lines_processed)
    .bind(collector.parse_ok)
    .bind(collector.parse_err)
    .bind(collector.filtered_id)
    .bind(collector.raw_logs_inserted)
    .bind(collector.events_inserted)
    .bind(collector.time_min_iso())
    .bind(collector.time_max_iso())
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

/// Record the detected firewall once, as soon as the collector knows it.
pub async fn maybe_set_job_device(
    pool: &PgPool,
    job_id: &str,
    device_detected: &str,
    device_key: &str,
    device_display: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE ingest_jobs
        SET device_detected = $2, device_key = $3, device_display = $4, updated_at = $5
        WHERE id = $1 AND device_key IS NULL
        "#,
    )
    .bind(job_id)
    .bind(device_detected)
    .bind(device_key)
    .bind(device_display)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_phase(pool: &PgPool, job_id: &str, phase: Option<&str>) -> Result<()> {
    sqlx::query("UPDATE ingest_jobs SET phase = $2, updated_at = $3 WHERE id = $1")
        .bind(job_id)
        .bind(phase)
        .bind(Utc::now())
        .execute(pool)
        .await?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn set_done(
    pool: &PgPool,
    job_id: &str,
    lines_processed: i64,
    collector: &UploadCollector,
    device_detected: &str,
    device_key: &str,
    device_display: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE ingest_jobs SET
            status = 'done',
            phase = NULL,
            finished_at = $10,
            lines_total = $2,
            lines_processed = $2,
            parse_ok = $3,
            parse_err = $4,
            filtered_id = $5,
            raw_logs_inserted = $6,
            events_inserted = $7,
            time_min = $8,
            time_max = $9,
            device_detected = $11,
            device_key = $12,
            device_display = $13,
            updated_at = $10
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .bind(lines_processed)
    .bind(collector.parse_ok)
    .bind(collector.parse_err)
    .bind(collector.filtered_id)
    .bind(collector.raw_logs_inserted)
    .bind(collector.events_inserted)
    .bind(collector.time_min_iso())
    .bind(collector.time_max_iso())
    .bind(Utc::now())
    .bind(device_detected)
    .bind(device_key)
    .bind(device_display)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_canceled(
    pool: &PgPool,
    job_id: &str,
    lines_processed: i64,
    collector: Option<&UploadCollector>,
) -> Result<()> {
    let collector = collector.cloned().unwrap_or_default();
    sqlx::query(
        r#"
        UPDATE ingest_jobs SET
            status = 'canceled',
            phase = NULL,
            finished_at = $8,
            lines_processed = $2,
            parse_ok = $3,
            parse_err = $4,
            filtered_id = $5,
            raw_logs_inserted = $6,
            events_inserted = $7,
            updated_at = $8
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .bind(lines_processed)
    .bind(collector.parse_ok)
    .bind(collector.parse_err)
    .bind(collector.filtered_id)
    .bind(collector.raw_logs_inserted)
    .bind(collector.events_inserted)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

/// Transition a job to error. The first 1000 characters of the message are
/// kept; counters reflect whatever was processed before the failure.
pub async fn set_error(
    pool: &PgPool,
    job_id: &str,
    message: &str,
    error_type: Option<&str>,
    error_stage: Option<ErrorStage>,
    lines_processed: i64,
    collector: Option<&UploadCollector>,
) -> Result<()> {
    let collector = collector.cloned().unwrap_or_default();
    let message: String = message.chars().take(1000).collect();
    sqlx::query(
        r#"
        UPDATE ingest_jobs SET
            status = 'error',
            phase = NULL,
            error_message = $2,
            error_type = $3,
            error_stage = $4,
            lines_processed = $5,
            parse_ok = $6,
            parse_err = $7,
            filtered_id = $8,
            raw_logs_inserted = $9,
            events_inserted = $10,
            finished_at = $11,
            updated_at = $11
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .bind(if message.is_empty() {
        "Unknown error".to_string()
    } else {
        message
    })
    .bind(error_type)
    .bind(error_stage.map(|s| s.as_str()))
    .bind(lines_processed)
    .bind(collector.parse_ok)
    .bind(collector.parse_err)
    .bind(collector.filtered_id)
    .bind(collector.raw_logs_inserted)
    .bind(collector.events_inserted)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

/// Startup recovery: anything left non-terminal did not survive the
/// restart.
pub async fn mark_stale_jobs_error(pool: &PgPool) -> Result<u64> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        UPDATE ingest_jobs
        SET status = 'error', error_message = 'Server restarted',
            finished_at = $1, updated_at = $1
        WHERE status IN ('uploading', 'queued', 'running')
        "#,
    )
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Periodic sweep: running jobs whose heartbeat went quiet are errored so
/// the queue can move on.
pub async fn mark_stalled_running_jobs(pool: &PgPool) -> Result<u64> {
    let now = Utc::now();
    let cutoff = now - Duration::minutes(STALL_THRESHOLD_MINUTES);
    let result = sqlx::query(
        r#"
        UPDATE ingest_jobs
        SET status = 'error', error_message = 'job stalled',
            finished_at = $1, updated_at = $1
        WHERE status = 'running' AND updated_at < $2
        "#,
    )
    .bind(now)
    .bind(cutoff)
    .execute(pool)
    .await?;
    let n = result.rows_affected();
    if n > 0 {
        warn!(count = n, "Marked stalled running job(s) as error");
    }
    Ok(n)
}

/// True when any import job is queued or running (used to defer retention).
pub async fn any_job_active(pool: &PgPool) -> Result<bool> {
    let id: Option<String> = sqlx::query_scalar(
        "SELECT id FROM ingest_jobs WHERE status IN ('queued', 'running') LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    Ok(id.is_some())
}

/// True when an upload or import is in flight (used to reject purges).
pub async fn any_job_uploading_or_running(pool: &PgPool) -> Result<bool> {
    let id: Option<String> = sqlx::query_scalar(
        "SELECT id FROM ingest_jobs WHERE status IN ('uploading', 'running') LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    Ok(id.is_some())
}
