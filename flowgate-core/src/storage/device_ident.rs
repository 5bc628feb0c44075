//! DEVICE-record identity persistence and endpoint enrichment.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use tracing::{debug, warn};

use crate::error::Result;
use crate::storage::retry::execute_with_retry;
use flowgate_model::DeviceFields;

/// One DEVICE record pending persistence.
#[derive(Debug, Clone)]
pub struct DeviceIdentUpdate {
    pub firewall_device: String,
    pub srcmac: String,
    pub ts_utc: DateTime<Utc>,
    pub fields: DeviceFields,
    pub raw_event_json: Value,
}

/// Upsert the identification row keyed by (firewall_device, srcmac).
/// Populated attributes win over NULL, never the other way around.
async fn upsert_identification(
    pool: &PgPool,
    update: &DeviceIdentUpdate,
) -> std::result::Result<(), sqlx::Error> {
    let f = &update.fields;
    sqlx::query(
        r#"
        INSERT INTO device_identifications
            (firewall_device, srcmac, hostname, if_name, zone, device_ip4, device_ip6,
             device_vendor, device_type, device_type_name, device_type_group_name,
             device_os_name, device_brand, device_model, device_rank,
             first_seen, last_seen, raw_event_json)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $16, $17)
        ON CONFLICT (firewall_device, srcmac) DO UPDATE SET
            hostname = COALESCE(EXCLUDED.hostname, device_identifications.hostname),
            if_name = COALESCE(EXCLUDED.if_name, device_identifications.if_name),
            zone = COALESCE(EXCLUDED.zone, device_identifications.zone),
            device_ip4 = COALESCE(EXCLUDED.device_ip4, device_identifications.device_ip4),
            device_ip6 = COALESCE(EXCLUDED.device_ip6, device_identifications.device_ip6),
            device_vendor = COALESCE(EXCLUDED.device_vendor, device_identifications.device_vendor),
            device_type = COALESCE(EXCLUDED.device_type, device_identifications.device_type),
            device_type_name = COALESCE(EXCLUDED.device_type_name, device_identifications.device_type_name),
            device_type_group_name = COALESCE(EXCLUDED.device_type_group_name, device_identifications.device_type_group_name),
            device_os_name = COALESCE(EXCLUDED.device_os_name, device_identifications.device_os_name),
            device_brand = COALESCE(EXCLUDED.device_brand, device_identifications.device_brand),
            device_model = COALESCE(EXCLUDED.device_model, device_identifications.device_model),
            device_rank = COALESCE(EXCLUDED.device_rank, device_identifications.device_rank),
            last_seen = EXCLUDED.last_seen,
            raw_event_json = EXCLUDED.raw_event_json
        "#,
    )
    .bind(&update.firewall_device)
    .bind(&update.srcmac)
    .bind(&f.hostname)
    .bind(&f.if_name)
    .bind(&f.zone)
    .bind(&f.device_ip4)
    .bind(&f.device_ip6)
    .bind(&f.device_vendor)
    .bind(&f.device_type)
    .bind(&f.device_type_name)
    .bind(&f.device_type_group_name)
    .bind(&f.device_os_name)
    .bind(&f.device_brand)
    .bind(&f.device_model)
    .bind(f.device_rank)
    .bind(update.ts_utc)
    .bind(&update.raw_event_json)
    .execute(pool)
    .await?;
    Ok(())
}

/// Propagate identification attributes onto endpoints matching
/// (device, ip, mac); only non-NULL attributes are written.
async fn sync_endpoints(
    pool: &PgPool,
    update: &DeviceIdentUpdate,
) -> std::result::Result<u64, sqlx::Error> {
    let f = &update.fields;
    let Some(ip4) = f.device_ip4.as_deref() else {
        return Ok(0);
    };
    let result = sqlx::query(
        r#"
        UPDATE endpoints SET
            hostname = COALESCE($4, hostname),
            device_ip4 = COALESCE($5, device_ip4),
            device_ip6 = COALESCE($6, device_ip6),
            device_vendor = COALESCE($7, device_vendor),
            device_type = COALESCE($8, device_type),
            device_type_name = COALESCE($9, device_type_name),
            device_type_group_name = COALESCE($10, device_type_group_name),
            device_os_name = COALESCE($11, device_os_name),
            device_brand = COALESCE($12, device_brand),
            device_model = COALESCE($13, device_model),
            device_rank = COALESCE($14, device_rank)
        WHERE device = $1 AND ip = $2 AND mac = $3
        "#,
    )
    .bind(&update.firewall_device)
    .bind(ip4)
    .bind(&update.srcmac)
    .bind(&f.hostname)
    .bind(&f.device_ip4)
    .bind(&f.device_ip6)
    .bind(&f.device_vendor)
    .bind(&f.device_type)
    .bind(&f.device_type_name)
    .bind(&f.device_type_group_name)
    .bind(&f.device_os_name)
    .bind(&f.device_brand)
    .bind(&f.device_model)
    .bind(f.device_rank)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Apply a DEVICE update best-effort: transient lock errors are retried and
/// exhausted retries only warn. Never fails the surrounding batch.
pub async fn apply_device_identification(
    pool: &PgPool,
    update: &DeviceIdentUpdate,
) -> Result<()> {
    let applied = execute_with_retry(|| upsert_identification(pool, update)).await?;
    if applied.is_none() {
        warn!(
            device = %update.firewall_device,
            mac = %update.srcmac,
            "Device identification upsert gave up after retries"
        );
        return Ok(());
    }
    let synced = execute_with_retry(|| sync_endpoints(pool, update)).await?;
    if let Some(rows) = synced {
        debug!(
            device = %update.firewall_device,
            mac = %update.srcmac,
            rows,
            "Device identification propagated to endpoints"
        );
    }
    Ok(())
}
