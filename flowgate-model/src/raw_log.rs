use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of parsing one reconstructed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseStatus {
    Ok,
    Error,
}

impl ParseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseStatus::Ok => "ok",
            ParseStatus::Error => "error",
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ParseStatus::Ok)
    }
}

impl fmt::Display for ParseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit copy of every record accepted for parsing.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RawLog {
    pub id: i64,
    pub ts_utc: DateTime<Utc>,
    pub device: String,
    pub raw_record: String,
    pub parse_status: String,
    pub parse_error: Option<String>,
}

/// Raw-log row pending insertion (no id yet).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRawLog {
    pub ts_utc: DateTime<Utc>,
    pub device: String,
    pub raw_record: String,
    pub parse_status: ParseStatus,
    pub parse_error: Option<String>,
}
