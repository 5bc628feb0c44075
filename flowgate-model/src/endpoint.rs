use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Distinct `(firewall_key, ip, mac)` triple observed in events.
///
/// Identity columns are immutable; the fingerprint attributes are enriched
/// from DEVICE records after the fact.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Endpoint {
    pub id: i64,
    pub device: String,
    pub ip: String,
    pub mac: Option<String>,
    pub device_name: Option<String>,

    pub hostname: Option<String>,
    pub device_ip4: Option<String>,
    pub device_ip6: Option<String>,
    pub device_vendor: Option<String>,
    pub device_type: Option<String>,
    pub device_type_name: Option<String>,
    pub device_type_group_name: Option<String>,
    pub device_os_name: Option<String>,
    pub device_brand: Option<String>,
    pub device_model: Option<String>,
    pub device_rank: Option<i32>,
}

/// Mutable fingerprint attributes carried by DEVICE records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceFields {
    pub hostname: Option<String>,
    pub if_name: Option<String>,
    pub zone: Option<String>,
    pub device_ip4: Option<String>,
    pub device_ip6: Option<String>,
    pub device_vendor: Option<String>,
    pub device_type: Option<String>,
    pub device_type_name: Option<String>,
    pub device_type_group_name: Option<String>,
    pub device_os_name: Option<String>,
    pub device_brand: Option<String>,
    pub device_model: Option<String>,
    pub device_rank: Option<i32>,
}

impl DeviceFields {
    /// True when no attribute carries a value (nothing to propagate).
    pub fn is_empty(&self) -> bool {
        self.hostname.is_none()
            && self.if_name.is_none()
            && self.zone.is_none()
            && self.device_ip4.is_none()
            && self.device_ip6.is_none()
            && self.device_vendor.is_none()
            && self.device_type.is_none()
            && self.device_type_name.is_none()
            && self.device_type_group_name.is_none()
            && self.device_os_name.is_none()
            && self.device_brand.is_none()
            && self.device_model.is_none()
            && self.device_rank.is_none()
    }
}

/// Persisted DEVICE identification, keyed by (firewall_device, srcmac).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeviceIdentification {
    pub id: i64,
    pub firewall_device: String,
    pub srcmac: String,
    pub hostname: Option<String>,
    pub if_name: Option<String>,
    pub zone: Option<String>,
    pub device_ip4: Option<String>,
    pub device_ip6: Option<String>,
    pub device_vendor: Option<String>,
    pub device_type: Option<String>,
    pub device_type_name: Option<String>,
    pub device_type_group_name: Option<String>,
    pub device_os_name: Option<String>,
    pub device_brand: Option<String>,
    pub device_model: Option<String>,
    pub device_rank: Option<i32>,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub raw_event_json: Value,
}
