//! Resolve a device parameter (raw name or `ha:<base>`) to concrete member
//! device names and a display label.

use sqlx::PgPool;

use crate::error::Result;
use crate::ha::{HA_MASTER_SUFFIX, HA_PREFIX, HA_SLAVE_SUFFIX};
use flowgate_model::HaCluster;

async fn override_label(
    pool: &PgPool,
    device_key: &str,
    default_label: &str,
) -> Result<String> {
    let display: Option<String> = sqlx::query_scalar(
        "SELECT display_name FROM firewall_overrides WHERE device_key = $1",
    )
    .bind(device_key)
    .fetch_optional(pool)
    .await?;
    Ok(display
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| default_label.to_string()))
}

async fn cluster_by_base(pool: &PgPool, base: &str) -> Result<Option<HaCluster>> {
    let cluster = sqlx::query_as("SELECT * FROM ha_clusters WHERE base = $1")
        .bind(base)
        .fetch_optional(pool)
        .await?;
    Ok(cluster)
}

/// Display label for a raw device name: override > HA cluster label > raw.
pub async fn device_display_label(pool: &PgPool, device: &str) -> Result<String> {
    let device = device.trim();
    if device.is_empty() {
        return Ok(String::new());
    }
    let base = device
        .strip_suffix(HA_MASTER_SUFFIX)
        .or_else(|| device.strip_suffix(HA_SLAVE_SUFFIX));
    let Some(base) = base.filter(|b| !b.is_empty()) else {
        return override_label(pool, device, device).await;
    };
    match cluster_by_base(pool, base).await? {
        Some(cluster) if cluster.is_enabled => {
            let default = if cluster.label.is_empty() {
                format!("{base} (HA)")
            } else {
                cluster.label.clone()
            };
            override_label(pool, base, &default).await
        }
        _ => Ok(device.to_string()),
    }
}

/// Resolve a device key to (member device names, display label).
///
/// `ha:<base>` resolves through the cluster when one is configured and
/// enabled; otherwise the expected Master/Slave pair is assumed. A plain
/// device resolves to itself.
pub async fn resolve_device(pool: &PgPool, device: &str) -> Result<(Vec<String>, String)> {
    let device = device.trim();
    if device.is_empty() {
        return Ok((Vec::new(), String::new()));
    }

    let Some(base) = device.strip_prefix(HA_PREFIX) else {
        let label = override_label(pool, device, device).await?;
        return Ok((vec![device.to_string()], label));
    };
    let base = base.trim();
    if base.is_empty() {
        return Ok((Vec::new(), String::new()));
    }

    let default_label = format!("{base} (HA)");
    match cluster_by_base(pool, base).await? {
        Some(cluster) if cluster.is_enabled && !cluster.member_names().is_empty() => {
            let label_default = if cluster.label.is_empty() {
                default_label
            } else {
                cluster.label.clone()
            };
            let label = override_label(pool, base, &label_default).await?;
            Ok((cluster.member_names(), label))
        }
        _ => {
            let label = override_label(pool, base, &default_label).await?;
            Ok((
                vec![
                    format!("{base}{HA_MASTER_SUFFIX}"),
                    format!("{base}{HA_SLAVE_SUFFIX}"),
                ],
                label,
            ))
        }
    }
}
