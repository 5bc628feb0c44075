use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Lifecycle states of a file-import job.
///
/// `uploading → queued → running → done | error | canceled`; a queued job
/// may be canceled directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestJobStatus {
    Uploading,
    Queued,
    Running,
    Done,
    Error,
    Canceled,
}

impl IngestJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestJobStatus::Uploading => "uploading",
            IngestJobStatus::Queued => "queued",
            IngestJobStatus::Running => "running",
            IngestJobStatus::Done => "done",
            IngestJobStatus::Error => "error",
            IngestJobStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IngestJobStatus::Done
                | IngestJobStatus::Error
                | IngestJobStatus::Canceled
        )
    }
}

impl fmt::Display for IngestJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IngestJobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploading" => Ok(IngestJobStatus::Uploading),
            "queued" => Ok(IngestJobStatus::Queued),
            "running" => Ok(IngestJobStatus::Running),
            "done" => Ok(IngestJobStatus::Done),
            "error" => Ok(IngestJobStatus::Error),
            "canceled" => Ok(IngestJobStatus::Canceled),
            other => Err(format!("unknown ingest job status: {other}")),
        }
    }
}

/// Pipeline phase reported alongside the job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    Upload,
    Parsing,
    Finalizing,
    Error,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Upload => "upload",
            JobPhase::Parsing => "parsing",
            JobPhase::Finalizing => "finalizing",
            JobPhase::Error => "error",
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage an import error was attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStage {
    Upload,
    Parse,
    Persist,
    FlowAggregation,
    Processing,
}

impl ErrorStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorStage::Upload => "upload",
            ErrorStage::Parse => "parse",
            ErrorStage::Persist => "persist",
            ErrorStage::FlowAggregation => "flow_aggregation",
            ErrorStage::Processing => "processing",
        }
    }
}

impl fmt::Display for ErrorStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of one file-import lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IngestJob {
    pub id: String,
    pub status: String,
    pub phase: Option<String>,
    pub filename: Option<String>,
    pub bytes_total: i64,
    pub bytes_received: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub cancel_requested: bool,
    pub device_key: Option<String>,

    pub lines_total: i64,
    pub lines_processed: i64,
    pub parse_ok: i64,
    pub parse_err: i64,
    pub filtered_id: i64,
    pub raw_logs_inserted: i64,
    pub events_inserted: i64,

    pub time_min: Option<String>,
    pub time_max: Option<String>,
    pub device_detected: Option<String>,
    pub device_display: Option<String>,
    pub error_message: Option<String>,
    pub error_type: Option<String>,
    pub error_stage: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl IngestJob {
    pub fn status_parsed(&self) -> Option<IngestJobStatus> {
        self.status.parse().ok()
    }

    /// Progress ratio in [0, 1]; running jobs cap at 0.99 until a terminal
    /// transition lands.
    pub fn progress(&self) -> f64 {
        let by_bytes = (self.bytes_total > 0)
            .then(|| self.bytes_received as f64 / self.bytes_total as f64);
        let by_lines = (self.lines_total > 0)
            .then(|| self.lines_processed as f64 / self.lines_total as f64);
        let ratio = by_bytes.or(by_lines).unwrap_or(0.0);
        if self.status == "running" {
            ratio.min(0.99)
        } else {
            ratio.min(1.0)
        }
    }

    /// Effective phase: explicit override wins, else derived from status.
    pub fn phase_effective(&self) -> JobPhase {
        if let Some(phase) = self.phase.as_deref() {
            match phase {
                "upload" => return JobPhase::Upload,
                "parsing" => return JobPhase::Parsing,
                "finalizing" => return JobPhase::Finalizing,
                "error" => return JobPhase::Error,
                _ => {}
            }
        }
        match self.status.as_str() {
            "uploading" => JobPhase::Upload,
            "queued" | "running" => JobPhase::Parsing,
            "done" => JobPhase::Finalizing,
            _ => JobPhase::Error,
        }
    }
}

/// Status of a background maintenance job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaintenanceJobStatus {
    Queued,
    Running,
    Done,
    Error,
}

impl MaintenanceJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaintenanceJobStatus::Queued => "queued",
            MaintenanceJobStatus::Running => "running",
            MaintenanceJobStatus::Done => "done",
            MaintenanceJobStatus::Error => "error",
        }
    }
}

impl fmt::Display for MaintenanceJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of a background purge.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MaintenanceJob {
    pub id: String,
    pub job_type: String,
    pub status: String,
    pub device_key: Option<String>,
    pub result_counts: Value,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(status: &str, bytes_total: i64, bytes_received: i64) -> IngestJob {
        IngestJob {
            id: "j1".into(),
            status: status.into(),
            phase: None,
            filename: None,
            bytes_total,
            bytes_received,
            started_at: None,
            cancel_requested: false,
            device_key: None,
            lines_total: 0,
            lines_processed: 0,
            parse_ok: 0,
            parse_err: 0,
            filtered_id: 0,
            raw_logs_inserted: 0,
            events_inserted: 0,
            time_min: None,
            time_max: None,
            device_detected: None,
            device_display: None,
            error_message: None,
            error_type: None,
            error_stage: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            finished_at: None,
        }
    }

    #[test]
    fn running_progress_caps_at_99_percent() {
        let j = job("running", 100, 100);
        assert_eq!(j.progress(), 0.99);
    }

    #[test]
    fn done_progress_reaches_one() {
        let j = job("done", 100, 100);
        assert_eq!(j.progress(), 1.0);
    }

    #[test]
    fn progress_falls_back_to_lines_when_no_bytes() {
        let mut j = job("running", 0, 0);
        j.lines_total = 200;
        j.lines_processed = 50;
        assert_eq!(j.progress(), 0.25);
    }

    #[test]
    fn phase_override_wins_over_status() {
        let mut j = job("running", 0, 0);
        j.phase = Some("finalizing".into());
        assert_eq!(j.phase_effective(), JobPhase::Finalizing);
    }

    #[test]
    fn phase_derived_from_status() {
        assert_eq!(job("uploading", 0, 0).phase_effective(), JobPhase::Upload);
        assert_eq!(job("queued", 0, 0).phase_effective(), JobPhase::Parsing);
        assert_eq!(job("error", 0, 0).phase_effective(), JobPhase::Error);
    }
}
