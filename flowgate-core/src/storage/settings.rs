//! Key/value settings store backed by the `app_settings` table.

use chrono::Utc;
use once_cell::sync::Lazy;
use serde_json::{Value, json};
use sqlx::PgPool;
use std::collections::BTreeMap;

use crate::error::Result;

pub const LOG_RETENTION_KEY: &str = "log_retention";
pub const LOCAL_NETWORKS_KEY: &str = "local_networks";
pub const LAST_CLEANUP_KEY: &str = "maintenance_last_cleanup";

static DEFAULTS: Lazy<BTreeMap<&'static str, Value>> = Lazy::new(|| {
    BTreeMap::from([
        (
            LOG_RETENTION_KEY,
            json!({ "enabled": true, "keep_days": 3 }),
        ),
        (
            LOCAL_NETWORKS_KEY,
            json!({
                "enabled": true,
                "cidrs": ["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16"],
            }),
        ),
    ])
});

/// Return the value for `key`, falling back to the compiled-in defaults.
pub async fn get_setting(pool: &PgPool, key: &str) -> Result<Option<Value>> {
    let stored: Option<Value> =
        sqlx::query_scalar("SELECT value_json FROM app_settings WHERE key = $1")
            .bind(key)
            .fetch_optional(pool)
            .await?;
    if stored.is_some() {
        return Ok(stored);
    }
    Ok(DEFAULTS.get(key).cloned())
}

/// Upsert a setting.
pub async fn set_setting(pool: &PgPool, key: &str, value: &Value) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO app_settings (key, value_json, updated_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (key) DO UPDATE
        SET value_json = EXCLUDED.value_json, updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(key)
    .bind(value)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

/// All settings with defaults applied for missing keys.
pub async fn all_settings(pool: &PgPool) -> Result<BTreeMap<String, Value>> {
    let rows: Vec<(String, Value)> =
        sqlx::query_as("SELECT key, value_json FROM app_settings")
            .fetch_all(pool)
            .await?;
    let mut merged: BTreeMap<String, Value> = DEFAULTS
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    for (key, value) in rows {
        merged.insert(key, value);
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_include_retention_policy() {
        let retention = DEFAULTS.get(LOG_RETENTION_KEY).unwrap();
        assert_eq!(retention["enabled"], json!(true));
        assert_eq!(retention["keep_days"], json!(3));
    }
}
