use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One parsed CONN record, fully persisted.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Event {
    pub id: i64,

    pub ts_utc: DateTime<Utc>,
    /// Raw device hostname as seen on the wire.
    pub device: String,
    /// Raw HA member name when the device is part of a cluster.
    pub device_member: Option<String>,
    /// Canonical grouping key (`ha:<base>` or the raw device name).
    pub firewall_key: String,
    pub event_type: Option<String>,
    pub action: Option<String>,

    pub rule: Option<String>,
    pub satsrcrule: Option<String>,
    pub satdestrule: Option<String>,
    pub srcusername: Option<String>,
    pub destusername: Option<String>,

    // Original tuple
    pub proto: Option<String>,
    pub recv_if: Option<String>,
    pub recv_zone: Option<String>,
    pub src_ip: Option<String>,
    pub src_port: Option<i32>,
    pub src_mac: Option<String>,
    pub src_device: Option<String>,
    pub dest_if: Option<String>,
    pub dest_zone: Option<String>,
    pub dest_ip: Option<String>,
    pub dest_port: Option<i32>,
    pub dest_mac: Option<String>,
    pub dest_device: Option<String>,

    // Translated (NAT/SAT)
    pub xlat_src_ip: Option<String>,
    pub xlat_src_port: Option<i32>,
    pub xlat_dest_ip: Option<String>,
    pub xlat_dest_port: Option<i32>,

    pub bytes_orig: Option<i64>,
    pub bytes_term: Option<i64>,
    pub duration_s: Option<i64>,

    pub app_name: Option<String>,
    pub app_risk: Option<String>,
    pub app_family: Option<String>,

    // IP reputation (flattened for convenience)
    pub iprep_ip: Option<String>,
    pub iprep_score: Option<i32>,
    pub iprep_categories: Option<String>,
    pub iprep_src: Option<String>,
    pub iprep_dest: Option<String>,
    pub iprep_src_score: Option<i32>,
    pub iprep_dest_score: Option<i32>,

    pub recv_side: Option<String>,
    pub dest_side: Option<String>,
    pub direction_bucket: Option<String>,

    pub extra_json: Value,
}

/// Event row pending insertion (no id yet). Field set mirrors [`Event`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewEvent {
    pub ts_utc: Option<DateTime<Utc>>,
    pub device: String,
    pub device_member: Option<String>,
    pub firewall_key: String,
    pub event_type: Option<String>,
    pub action: Option<String>,

    pub rule: Option<String>,
    pub satsrcrule: Option<String>,
    pub satdestrule: Option<String>,
    pub srcusername: Option<String>,
    pub destusername: Option<String>,

    pub proto: Option<String>,
    pub recv_if: Option<String>,
    pub recv_zone: Option<String>,
    pub src_ip: Option<String>,
    pub src_port: Option<i32>,
    pub src_mac: Option<String>,
    pub src_device: Option<String>,
    pub dest_if: Option<String>,
    pub dest_zone: Option<String>,
    pub dest_ip: Option<String>,
    pub dest_port: Option<i32>,
    pub dest_mac: Option<String>,
    pub dest_device: Option<String>,

    pub xlat_src_ip: Option<String>,
    pub xlat_src_port: Option<i32>,
    pub xlat_dest_ip: Option<String>,
    pub xlat_dest_port: Option<i32>,

    pub bytes_orig: Option<i64>,
    pub bytes_term: Option<i64>,
    pub duration_s: Option<i64>,

    pub app_name: Option<String>,
    pub app_risk: Option<String>,
    pub app_family: Option<String>,

    pub iprep_ip: Option<String>,
    pub iprep_score: Option<i32>,
    pub iprep_categories: Option<String>,
    pub iprep_src: Option<String>,
    pub iprep_dest: Option<String>,
    pub iprep_src_score: Option<i32>,
    pub iprep_dest_score: Option<i32>,

    pub recv_side: Option<String>,
    pub dest_side: Option<String>,
    pub direction_bucket: Option<String>,

    pub extra_json: Value,
}

impl NewEvent {
    /// True for the connection-open variants that feed flow aggregation.
    pub fn is_open(&self) -> bool {
        matches!(
            self.event_type.as_deref(),
            Some("conn_open") | Some("conn_open_natsat")
        )
    }
}
