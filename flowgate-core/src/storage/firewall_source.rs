//! Firewall inventory provenance (syslog vs import) for retention and
//! display. Only syslog-sourced firewalls are ever purged by retention.

use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool};

use crate::error::Result;
use crate::ha::HA_PREFIX;
use flowgate_model::HaCluster;

/// Mark a firewall as having received live syslog; min/max-merge the seen
/// range. The import flag is left untouched.
pub async fn upsert_firewall_syslog<'e, E>(
    executor: E,
    device_key: &str,
    first_ts: DateTime<Utc>,
    last_ts: DateTime<Utc>,
) -> std::result::Result<(), sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO firewalls
            (device_key, source_syslog, source_import, first_seen_ts, last_seen_ts,
             last_import_ts, updated_at)
        VALUES ($1, 1, 0, $2, $3, NULL, $4)
        ON CONFLICT (device_key) DO UPDATE SET
            source_syslog = 1,
            first_seen_ts = LEAST(COALESCE(firewalls.first_seen_ts, EXCLUDED.first_seen_ts), EXCLUDED.first_seen_ts),
            last_seen_ts = GREATEST(COALESCE(firewalls.last_seen_ts, EXCLUDED.last_seen_ts), EXCLUDED.last_seen_ts),
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(device_key)
    .bind(first_ts)
    .bind(last_ts)
    .bind(Utc::now())
    .execute(executor)
    .await?;
    Ok(())
}

/// Mark a firewall as having imported data; set last_import_ts and widen
/// the seen range when the upload carried timestamps.
pub async fn upsert_firewall_import<'e, E>(
    executor: E,
    device_key: &str,
    first_ts: Option<DateTime<Utc>>,
    last_ts: Option<DateTime<Utc>>,
) -> std::result::Result<(), sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO firewalls
            (device_key, source_syslog, source_import, first_seen_ts, last_seen_ts,
             last_import_ts, updated_at)
        VALUES ($1, 0, 1, $2, $3, $4, $4)
        ON CONFLICT (device_key) DO UPDATE SET
            source_import = 1,
            last_import_ts = EXCLUDED.last_import_ts,
            first_seen_ts = LEAST(
                COALESCE(firewalls.first_seen_ts, EXCLUDED.first_seen_ts),
                COALESCE(EXCLUDED.first_seen_ts, firewalls.first_seen_ts)),
            last_seen_ts = GREATEST(
                COALESCE(firewalls.last_seen_ts, EXCLUDED.last_seen_ts),
                COALESCE(EXCLUDED.last_seen_ts, firewalls.last_seen_ts)),
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(device_key)
    .bind(first_ts)
    .bind(last_ts)
    .bind(now)
    .execute(executor)
    .await?;
    Ok(())
}

/// Device keys eligible for retention: seen via syslog and never imported.
pub async fn syslog_only_device_keys(pool: &PgPool) -> Result<Vec<String>> {
    let keys: Vec<String> = sqlx::query_scalar(
        "SELECT device_key FROM firewalls WHERE source_syslog = 1 AND source_import = 0",
    )
    .fetch_all(pool)
    .await?;
    Ok(keys)
}

/// Expand canonical device keys to the concrete device names found in the
/// events/raw_logs device column: `ha:<base>` becomes the cluster members,
/// anything else passes through. A key with no cluster row is kept as-is.
pub async fn expand_device_keys_to_members(
    pool: &PgPool,
    device_keys: &[String],
) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for key in device_keys {
        if let Some(base) = key.strip_prefix(HA_PREFIX) {
            let base = base.trim();
            let cluster: Option<HaCluster> =
                sqlx::query_as("SELECT * FROM ha_clusters WHERE base = $1")
                    .bind(base)
                    .fetch_optional(pool)
                    .await?;
            match cluster {
                Some(c) if !c.member_names().is_empty() => {
                    out.extend(c.member_names());
                }
                _ => out.push(key.clone()),
            }
        } else {
            out.push(key.clone());
        }
    }
    Ok(out)
}
