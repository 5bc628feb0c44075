use serde::{Deserialize, Serialize};

/// Time-based retention policy for live syslog data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRetention {
    pub enabled: bool,
    pub keep_days: i64,
}

impl Default for LogRetention {
    fn default() -> Self {
        Self {
            enabled: true,
            keep_days: 3,
        }
    }
}
