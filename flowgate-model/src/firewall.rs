use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-firewall data-source provenance.
///
/// Retention only ever purges firewalls that were seen via live syslog and
/// never imported; operator-uploaded snapshots are exempt.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FirewallInventory {
    pub device_key: String,
    pub source_syslog: i32,
    pub source_import: i32,
    pub first_seen_ts: Option<DateTime<Utc>>,
    pub last_seen_ts: Option<DateTime<Utc>>,
    pub last_import_ts: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Operator-confirmed HA cluster: members share one logical identity.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct HaCluster {
    pub id: i64,
    pub base: String,
    pub label: String,
    /// JSON array of raw member device names.
    pub members: Value,
    pub is_enabled: bool,
}

impl HaCluster {
    pub fn member_names(&self) -> Vec<String> {
        self.members
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Display name and comment overrides per canonical firewall key.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FirewallOverride {
    pub device_key: String,
    pub display_name: String,
    pub comment: Option<String>,
    pub updated_at: DateTime<Utc>,
}
