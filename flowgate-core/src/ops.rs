//! Typed operational surface the surrounding services call into: live
//! ingest, import lifecycle, retention, purge, and device resolution.

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use sqlx::PgPool;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::enrichment::classification::Classifier;
use crate::error::{CoreError, Result};
use crate::ingest::ingestor::{DEFAULT_BATCH_SIZE, SyslogIngestor};
use crate::ingest::stats::{INGEST_STATS, IngestStatsSnapshot};
use crate::jobs::maintenance;
use crate::jobs::processor::ImportContext;
use crate::jobs::retention;
use crate::jobs::store;
use crate::resolve;
use crate::storage::settings::{self, LAST_CLEANUP_KEY};
use crate::storage::writer::Writer;
use flowgate_model::{ErrorStage, IngestJob, IngestJobStatus, MaintenanceJob};

/// Max accepted upload size (1 GiB).
pub const UPLOAD_MAX_BYTES: i64 = 1024 * 1024 * 1024;
const UPLOAD_CHUNK_BYTES: usize = 4 * 1024 * 1024;

/// Aggregate row counts and time ranges for the store.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub raw_logs_count: i64,
    pub events_count: i64,
    pub oldest_event_ts: Option<DateTime<Utc>>,
    pub newest_event_ts: Option<DateTime<Utc>>,
    pub oldest_raw_ts: Option<DateTime<Utc>>,
    pub newest_raw_ts: Option<DateTime<Utc>>,
    pub last_cleanup: Option<Value>,
}

/// Bundle of everything the operational surface needs. One per process.
pub struct Ops {
    pool: PgPool,
    writer: Arc<Writer>,
    classifier: Arc<Classifier>,
    live_ingestor: Mutex<SyslogIngestor>,
    uploads_dir: PathBuf,
    batch_size: usize,
}

impl std::fmt::Debug for Ops {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ops")
            .field("uploads_dir", &self.uploads_dir)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl Ops {
    pub fn new(
        pool: PgPool,
        writer: Arc<Writer>,
        classifier: Arc<Classifier>,
        uploads_dir: PathBuf,
        batch_size: Option<usize>,
    ) -> Self {
        let live_ingestor = SyslogIngestor::live(writer.clone(), classifier.clone());
        Self {
            pool,
            writer,
            classifier,
            live_ingestor: Mutex::new(live_ingestor),
            uploads_dir,
            batch_size: batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Context handed to the import worker loop.
    pub fn import_context(&self) -> ImportContext {
        ImportContext {
            pool: self.pool.clone(),
            sink: self.writer.clone(),
            classifier: self.classifier.clone(),
            uploads_dir: self.uploads_dir.clone(),
            batch_size: self.batch_size,
        }
    }

    /// Live UDP path: one line in, short transaction out.
    pub async fn ingest_line(&self, line: &str) -> Result<()> {
        let mut ingestor = self.live_ingestor.lock().await;
        ingestor.handle_line(line).await
    }

    fn upload_file_path(&self, job_id: &str) -> PathBuf {
        self.uploads_dir.join(format!("{job_id}.log"))
    }

    /// Stream an upload to a per-job temp file and queue it for the import
    /// worker. Returns the job id.
    pub async fn enqueue_import<R>(&self, mut content: R, filename: &str) -> Result<String>
    where
        R: AsyncRead + Unpin + Send,
    {
        if filename.trim().is_empty() {
            return Err(CoreError::InvalidRequest("Missing filename".into()));
        }
        tokio::fs::create_dir_all(&self.uploads_dir).await?;

        let job_id = Uuid::new_v4().to_string();
        store::create_uploading(&self.pool, &job_id, filename).await?;
        let file_path = self.upload_file_path(&job_id);

        let upload_result = self.stream_upload(&mut content, &file_path, &job_id).await;
        let total_bytes = match upload_result {
            Ok(total) => total,
            Err(e) => {
                let _ = tokio::fs::remove_file(&file_path).await;
                store::set_error(
                    &self.pool,
                    &job_id,
                    &e.to_string(),
                    Some(e.kind_name()),
                    Some(ErrorStage::Upload),
                    0,
                    None,
                )
                .await?;
                return Err(e);
            }
        };

        if total_bytes == 0 {
            let _ = tokio::fs::remove_file(&file_path).await;
            store::set_error(
                &self.pool,
                &job_id,
                "Empty file",
                Some("Upload"),
                Some(ErrorStage::Upload),
                0,
                None,
            )
            .await?;
            return Err(CoreError::Upload("Empty file".into()));
        }

        store::set_queued(&self.pool, &job_id, total_bytes).await?;
        Ok(job_id)
    }

    async fn stream_upload<R>(
        &self,
        content: &mut R,
        file_path: &std::path::Path,
        job_id: &str,
    ) -> Result<i64>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut out = tokio::fs::File::create(file_path).await?;
        let mut chunk = vec![0u8; UPLOAD_CHUNK_BYTES];
        let mut total_bytes: i64 = 0;
        loop {
            let read = content.read(&mut chunk).await?;
            if read == 0 {
                break;
            }
            total_bytes += read as i64;
            if total_bytes > UPLOAD_MAX_BYTES {
                return Err(CoreError::Upload("File too large (max 1 GB)".into()));
            }
            out.write_all(&chunk[..read]).await?;
            store::set_bytes_received(&self.pool, job_id, total_bytes).await?;
        }
        out.flush().await?;
        Ok(total_bytes)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<IngestJob> {
        store::get_job(&self.pool, job_id)
            .await?
            .ok_or_else(|| CoreError::JobNotFound(job_id.to_string()))
    }

    pub async fn list_jobs(
        &self,
        states: &[IngestJobStatus],
        limit: i64,
    ) -> Result<Vec<IngestJob>> {
        store::list_jobs(&self.pool, states, limit.clamp(1, 200)).await
    }

    /// Cancel a queued or running job. Queued jobs cancel immediately and
    /// drop their upload file; running jobs get the cooperative flag.
    pub async fn cancel_job(&self, job_id: &str) -> Result<IngestJobStatus> {
        let job = self.get_job(job_id).await?;
        match job.status_parsed() {
            Some(IngestJobStatus::Queued) => {
                store::set_canceled(&self.pool, job_id, 0, None).await?;
                let _ = tokio::fs::remove_file(self.upload_file_path(job_id)).await;
                Ok(IngestJobStatus::Canceled)
            }
            Some(IngestJobStatus::Running) => {
                store::request_cancel(&self.pool, job_id).await?;
                Ok(IngestJobStatus::Running)
            }
            _ => Err(CoreError::InvalidRequest(format!(
                "Job cannot be canceled (status={})",
                job.status
            ))),
        }
    }

    /// Delete a job record and its upload file. Refused mid-flight.
    pub async fn delete_job(&self, job_id: &str) -> Result<()> {
        let job = self.get_job(job_id).await?;
        let deletable = matches!(
            job.status_parsed(),
            Some(IngestJobStatus::Queued)
                | Some(IngestJobStatus::Done)
                | Some(IngestJobStatus::Error)
                | Some(IngestJobStatus::Canceled)
        );
        if !deletable {
            return Err(CoreError::InvalidRequest(format!(
                "Cannot delete job while running or uploading (status={})",
                job.status
            )));
        }
        store::delete_job_row(&self.pool, job_id).await?;
        let _ = tokio::fs::remove_file(self.upload_file_path(job_id)).await;
        Ok(())
    }

    /// Manual retention trigger.
    pub async fn run_cleanup(&self) -> Result<Value> {
        retention::run_cleanup(&self.pool).await
    }

    /// Start a background purge of all data for a firewall key.
    pub async fn purge_firewall(&self, device_key: &str, confirm: bool) -> Result<String> {
        maintenance::start_purge_firewall(&self.pool, device_key, confirm).await
    }

    pub async fn get_maintenance_job(&self, job_id: &str) -> Result<MaintenanceJob> {
        maintenance::get_maintenance_job(&self.pool, job_id)
            .await?
            .ok_or_else(|| CoreError::JobNotFound(job_id.to_string()))
    }

    /// Resolve a device key to member device names and a display label.
    pub async fn resolve_device(&self, device_key: &str) -> Result<(Vec<String>, String)> {
        resolve::resolve_device(&self.pool, device_key).await
    }

    pub fn ingest_stats_snapshot(&self) -> IngestStatsSnapshot {
        INGEST_STATS.snapshot()
    }

    /// Store-level row counts and time ranges for the status surface.
    pub async fn db_stats(&self) -> Result<DbStats> {
        let (raw_logs_count, oldest_raw_ts, newest_raw_ts): (
            i64,
            Option<DateTime<Utc>>,
            Option<DateTime<Utc>>,
        ) = sqlx::query_as("SELECT COUNT(id), MIN(ts_utc), MAX(ts_utc) FROM raw_logs")
            .fetch_one(&self.pool)
            .await?;
        let (events_count, oldest_event_ts, newest_event_ts): (
            i64,
            Option<DateTime<Utc>>,
            Option<DateTime<Utc>>,
        ) = sqlx::query_as("SELECT COUNT(id), MIN(ts_utc), MAX(ts_utc) FROM events")
            .fetch_one(&self.pool)
            .await?;
        let last_cleanup = settings::get_setting(&self.pool, LAST_CLEANUP_KEY).await?;

        Ok(DbStats {
            raw_logs_count,
            events_count,
            oldest_event_ts,
            newest_event_ts,
            oldest_raw_ts,
            newest_raw_ts,
            last_cleanup,
        })
    }

    /// Job view assembled for status consumers.
    pub fn job_status_json(job: &IngestJob) -> Value {
        let discarded = job.filtered_id + job.parse_err;
        json!({
            "job_id": job.id,
            "state": job.status,
            "phase": job.phase_effective().as_str(),
            "progress": (job.progress() * 10_000.0).round() / 10_000.0,
            "filename": job.filename,
            "bytes_total": job.bytes_total,
            "bytes_received": job.bytes_received,
            "lines_total": job.lines_total,
            "lines_processed": job.lines_processed,
            "parse_ok": job.parse_ok,
            "parse_err": job.parse_err,
            "filtered_id": job.filtered_id,
            "raw_logs_inserted": job.raw_logs_inserted,
            "events_inserted": job.events_inserted,
            "discarded": discarded,
            "time_min": job.time_min,
            "time_max": job.time_max,
            "device_detected": job.device_detected,
            "device_key": job.device_key,
            "device_display": job.device_display,
            "error_message": job.error_message,
            "error_type": job.error_type,
            "error_stage": job.error_stage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_json_includes_progress_and_discarded() {
        let job = IngestJob {
            id: "j1".into(),
            status: "running".into(),
            phase: None,
            filename: Some("fw.log".into()),
            bytes_total: 1000,
            bytes_received: 500,
            started_at: None,
            cancel_requested: false,
            device_key: None,
            lines_total: 0,
            lines_processed: 0,
            parse_ok: 10,
            parse_err: 2,
            filtered_id: 3,
            raw_logs_inserted: 12,
            events_inserted: 9,
            time_min: None,
            time_max: None,
            device_detected: None,
            device_display: None,
            error_message: None,
            error_type: None,
            error_stage: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            finished_at: None,
        };
        let view = Ops::job_status_json(&job);
        assert_eq!(view["progress"], json!(0.5));
        assert_eq!(view["discarded"], json!(5));
        assert_eq!(view["phase"], json!("parsing"));
    }
}
