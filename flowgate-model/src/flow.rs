use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Categorical axis a flow is aggregated along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowBasis {
    Side,
    Zone,
    Interface,
}

impl FlowBasis {
    pub const ALL: [FlowBasis; 3] =
        [FlowBasis::Side, FlowBasis::Zone, FlowBasis::Interface];

    pub fn as_str(&self) -> &'static str {
        match self {
            FlowBasis::Side => "side",
            FlowBasis::Zone => "zone",
            FlowBasis::Interface => "interface",
        }
    }
}

impl fmt::Display for FlowBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a flow row was derived from original or NAT-translated addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewKind {
    Original,
    Translated,
}

impl ViewKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewKind::Original => "original",
            ViewKind::Translated => "translated",
        }
    }
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The nine identity columns that make a flow row unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowIdentity {
    pub device: String,
    pub basis: FlowBasis,
    pub from_value: String,
    pub to_value: String,
    pub proto: Option<String>,
    pub dest_port: Option<i32>,
    pub src_endpoint_id: i64,
    pub dst_endpoint_id: i64,
    pub view_kind: ViewKind,
}

/// Aggregated traffic grouping. One row per [`FlowIdentity`].
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Flow {
    pub id: i64,

    pub device: String,
    pub basis: String,
    pub from_value: String,
    pub to_value: String,

    pub proto: Option<String>,
    pub dest_port: Option<i32>,

    pub src_endpoint_id: i64,
    pub dst_endpoint_id: i64,

    pub view_kind: String,

    pub count_open: i64,
    pub count_close: i64,
    pub bytes_src_to_dst: i64,
    pub bytes_dst_to_src: i64,
    pub duration_total_s: i64,

    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,

    pub top_rules: Value,
    pub top_apps: Value,
}
