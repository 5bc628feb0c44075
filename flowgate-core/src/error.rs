use flowgate_model::ErrorStage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Upload rejected: {0}")]
    Upload(String),

    #[error("Flow aggregation error: {0}")]
    FlowAggregation(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Operation rejected: {0}")]
    Busy(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Variant name stored as the job row's error_type.
    pub fn kind_name(&self) -> &'static str {
        match self {
            CoreError::Io(_) => "Io",
            CoreError::Database(_) => "Database",
            CoreError::Serialization(_) => "Serialization",
            CoreError::Upload(_) => "Upload",
            CoreError::FlowAggregation(_) => "FlowAggregation",
            CoreError::JobNotFound(_) => "JobNotFound",
            CoreError::Busy(_) => "Busy",
            CoreError::InvalidRequest(_) => "InvalidRequest",
            CoreError::Cancelled(_) => "Cancelled",
            CoreError::Internal(_) => "Internal",
        }
    }

    /// Map an import-pipeline failure to the stage reported on the job row.
    pub fn stage(&self) -> ErrorStage {
        match self {
            CoreError::Upload(_) | CoreError::Io(_) => ErrorStage::Upload,
            CoreError::Database(_) => ErrorStage::Persist,
            CoreError::FlowAggregation(_) => ErrorStage::FlowAggregation,
            CoreError::Serialization(_) => ErrorStage::Parse,
            _ => ErrorStage::Processing,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_stage_mapping() {
        assert_eq!(
            CoreError::Upload("too large".into()).stage(),
            ErrorStage::Upload
        );
        assert_eq!(
            CoreError::FlowAggregation("dup".into()).stage(),
            ErrorStage::FlowAggregation
        );
        assert_eq!(
            CoreError::Internal("boom".into()).stage(),
            ErrorStage::Processing
        );
    }
}
