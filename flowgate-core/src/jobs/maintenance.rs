//! Operator-initiated firewall purge, executed in the background with
//! per-step row counts recorded on the maintenance job.

use chrono::Utc;
use serde_json::{Map, Value, json};
use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::ha::HA_PREFIX;
use crate::jobs::store;
use crate::resolve::resolve_device;
use flowgate_model::MaintenanceJob;

pub const PURGE_JOB_TYPE: &str = "purge_firewall";

pub async fn get_maintenance_job(pool: &PgPool, job_id: &str) -> Result<Option<MaintenanceJob>> {
    let job = sqlx::query_as(
        "SELECT id, job_type, status, device_key, result_counts, error_message, \
         created_at, started_at, finished_at FROM maintenance_jobs WHERE id = $1",
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await?;
    Ok(job)
}

/// Queue a purge and run it in a background task. Rejected while an upload
/// or import is in flight.
pub async fn start_purge_firewall(
    pool: &PgPool,
    device_key: &str,
    confirm: bool,
) -> Result<String> {
    if !confirm {
        return Err(CoreError::InvalidRequest(
            "confirm is required and must be true".into(),
        ));
    }
    if store::any_job_uploading_or_running(pool).await? {
        return Err(CoreError::Busy("Import in progress; try again later.".into()));
    }

    let job_id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO maintenance_jobs (id, job_type, status, device_key, result_counts, created_at)
        VALUES ($1, $2, 'queued', $3, '{}'::jsonb, $4)
        "#,
    )
    .bind(&job_id)
    .bind(PURGE_JOB_TYPE)
    .bind(device_key)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    let pool = pool.clone();
    let device_key = device_key.to_string();
    let task_job_id = job_id.clone();
    tokio::spawn(async move {
        run_purge_firewall(&pool, &task_job_id, &device_key).await;
    });

    Ok(job_id)
}

async fn set_job_running(pool: &PgPool, job_id: &str) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE maintenance_jobs SET status = 'running', started_at = $2 \
         WHERE id = $1 AND status = 'queued'",
    )
    .bind(job_id)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

async fn set_job_done(pool: &PgPool, job_id: &str, counts: &Map<String, Value>) -> Result<()> {
    sqlx::query(
        "UPDATE maintenance_jobs SET status = 'done', result_counts = $2, finished_at = $3 \
         WHERE id = $1",
    )
    .bind(job_id)
    .bind(Value::Object(counts.clone()))
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

async fn set_job_error(
    pool: &PgPool,
    job_id: &str,
    message: &str,
    counts: &Map<String, Value>,
) {
    let message: String = message.chars().take(1000).collect();
    if let Err(e) = sqlx::query(
        "UPDATE maintenance_jobs SET status = 'error', error_message = $2, \
         result_counts = $3, finished_at = $4 WHERE id = $1",
    )
    .bind(job_id)
    .bind(&message)
    .bind(Value::Object(counts.clone()))
    .bind(Utc::now())
    .execute(pool)
    .await
    {
        error!(job_id, error = %e, "Failed to set purge job error");
    }
}

async fn delete_where_device_in(
    pool: &PgPool,
    table: &str,
    column: &str,
    members: &[String],
) -> Result<i64> {
    // Table and column names come from a fixed internal list.
    let sql = format!("DELETE FROM {table} WHERE {column} = ANY($1)");
    let result = sqlx::query(&sql).bind(members).execute(pool).await?;
    Ok(result.rows_affected() as i64)
}

/// Resolve the key to member devices and delete everything they own, one
/// committed step per table. Partial counts survive a mid-way failure.
async fn run_purge_firewall(pool: &PgPool, job_id: &str, device_key: &str) {
    match set_job_running(pool, job_id).await {
        Ok(true) => {}
        Ok(false) => return,
        Err(e) => {
            error!(job_id, error = %e, "Purge job failed to start");
            return;
        }
    }

    let mut members = match resolve_device(pool, device_key).await {
        Ok((members, _label)) => members,
        Err(e) => {
            set_job_error(pool, job_id, &format!("Resolve failed: {e}"), &Map::new()).await;
            return;
        }
    };
    if members.is_empty() && !device_key.starts_with(HA_PREFIX) {
        members = vec![device_key.to_string()];
    }

    let bare_key = device_key
        .strip_prefix(HA_PREFIX)
        .map(str::trim)
        .unwrap_or(device_key)
        .to_string();

    // Events and raw logs carry raw member names; endpoints and flows are
    // grouped under the canonical key. Cover both.
    let mut targets = members.clone();
    if !targets.iter().any(|m| m == device_key) {
        targets.push(device_key.to_string());
    }
    let members = targets;

    let mut counts = Map::new();
    let steps: [(&str, &str, &str); 9] = [
        ("flows_deleted", "flows", "device"),
        ("endpoints_deleted", "endpoints", "device"),
        ("events_deleted", "events", "device"),
        ("raw_logs_deleted", "raw_logs", "device"),
        ("unclassified_endpoints_deleted", "unclassified_endpoints", "device"),
        ("classifications_deleted", "classifications", "device"),
        ("device_identifications_deleted", "device_identifications", "firewall_device"),
        ("device_overrides_deleted", "device_overrides", "firewall_device"),
        ("router_macs_deleted", "router_macs", "device"),
    ];

    for (count_key, table, column) in steps {
        match delete_where_device_in(pool, table, column, &members).await {
            Ok(n) => {
                counts.insert(count_key.to_string(), json!(n));
            }
            Err(e) => {
                error!(job_id, table, error = %e, "Purge step failed");
                set_job_error(pool, job_id, &e.to_string(), &counts).await;
                return;
            }
        }
    }

    // Overrides may exist under both the canonical and the legacy bare key.
    let override_keys = vec![device_key.to_string(), bare_key];
    match delete_where_device_in(pool, "firewall_overrides", "device_key", &override_keys).await
    {
        Ok(n) => {
            counts.insert("firewall_overrides_deleted".to_string(), json!(n));
        }
        Err(e) => {
            set_job_error(pool, job_id, &e.to_string(), &counts).await;
            return;
        }
    }

    let inventory_keys = vec![device_key.to_string()];
    match delete_where_device_in(pool, "firewalls", "device_key", &inventory_keys).await {
        Ok(n) => {
            counts.insert("firewall_inventory_deleted".to_string(), json!(n));
        }
        Err(e) => {
            set_job_error(pool, job_id, &e.to_string(), &counts).await;
            return;
        }
    }

    if let Err(e) = set_job_done(pool, job_id, &counts).await {
        error!(job_id, error = %e, "Failed to finish purge job");
        return;
    }
    info!(job_id, device_key, "Firewall purge done");
}
