//! Time-based retention for live syslog data. Imported snapshots are
//! operator intent and are never deleted by time.

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{Value, json};
use sqlx::PgPool;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::error::Result;
use crate::jobs::store;
use crate::storage::firewall_source::{expand_device_keys_to_members, syslog_only_device_keys};
use crate::storage::settings::{self, LAST_CLEANUP_KEY, LOG_RETENTION_KEY};
use flowgate_model::LogRetention;

pub const CLEANUP_BATCH_SIZE: i64 = 10_000;
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);
pub const CLEANUP_STARTUP_DELAY: Duration = Duration::from_secs(60);

async fn delete_old_rows_batched(
    pool: &PgPool,
    table: &str,
    devices: &[String],
    cutoff: chrono::DateTime<Utc>,
) -> Result<i64> {
    // Table name comes from a fixed internal set, never user input.
    let sql = format!(
        "DELETE FROM {table} WHERE id IN (
             SELECT id FROM {table}
             WHERE device = ANY($1) AND ts_utc < $2
             LIMIT {CLEANUP_BATCH_SIZE}
         )"
    );
    let mut deleted: i64 = 0;
    loop {
        let result = sqlx::query(&sql)
            .bind(devices)
            .bind(cutoff)
            .execute(pool)
            .await?;
        let batch = result.rows_affected() as i64;
        deleted += batch;
        if batch < CLEANUP_BATCH_SIZE {
            break;
        }
        // Each DELETE commits on its own; yield between batches.
        tokio::task::yield_now().await;
    }
    Ok(deleted)
}

/// Execute one cleanup pass. Only data for syslog-only firewalls is
/// deleted; the pass is skipped entirely while an import is active.
pub async fn run_cleanup(pool: &PgPool) -> Result<Value> {
    let t0 = Instant::now();

    let retention: LogRetention = settings::get_setting(pool, LOG_RETENTION_KEY)
        .await?
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();
    if !retention.enabled {
        return Ok(json!({ "skipped": true, "reason": "retention disabled" }));
    }

    let cutoff = Utc::now() - ChronoDuration::days(retention.keep_days);

    if store::any_job_active(pool).await? {
        return Ok(json!({
            "skipped": true,
            "reason": "ingest job in progress",
            "cutoff": cutoff.to_rfc3339(),
        }));
    }

    let syslog_only_keys = syslog_only_device_keys(pool).await?;
    let allowed_devices = expand_device_keys_to_members(pool, &syslog_only_keys).await?;
    if allowed_devices.is_empty() {
        return Ok(json!({
            "skipped": true,
            "reason": "no syslog-only firewalls (imported firewalls are excluded)",
            "cutoff": cutoff.to_rfc3339(),
        }));
    }

    let deleted_events =
        delete_old_rows_batched(pool, "events", &allowed_devices, cutoff).await?;
    let deleted_raw_logs =
        delete_old_rows_batched(pool, "raw_logs", &allowed_devices, cutoff).await?;

    // Space reuse after large deletions is autovacuum's job on Postgres.
    let duration_ms = t0.elapsed().as_millis() as i64;
    let summary = json!({
        "last_run": Utc::now().to_rfc3339(),
        "duration_ms": duration_ms,
        "deleted_events": deleted_events,
        "deleted_raw_logs": deleted_raw_logs,
        "keep_days": retention.keep_days,
        "cutoff": cutoff.to_rfc3339(),
    });
    settings::set_setting(pool, LAST_CLEANUP_KEY, &summary).await?;

    info!(
        deleted_events,
        deleted_raw_logs,
        cutoff = %cutoff.to_rfc3339(),
        duration_ms,
        "Cleanup done"
    );
    Ok(summary)
}

/// Hourly cleanup loop with a startup delay.
pub async fn run_retention_loop(pool: PgPool, mut shutdown: broadcast::Receiver<()>) {
    tokio::select! {
        _ = shutdown.recv() => return,
        _ = tokio::time::sleep(CLEANUP_STARTUP_DELAY) => {}
    }

    loop {
        match run_cleanup(&pool).await {
            Ok(summary) => info!(summary = %summary, "Scheduled cleanup"),
            Err(e) => error!(error = %e, "Scheduled cleanup failed"),
        }
        tokio::select! {
            _ = shutdown.recv() => return,
            _ = tokio::time::sleep(CLEANUP_INTERVAL) => {}
        }
    }
}
