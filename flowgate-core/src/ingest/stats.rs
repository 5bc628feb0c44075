//! Ingest pipeline counters for troubleshooting (UDP packets, lines,
//! records, DB writes). One process-wide instance; all counters are atomics
//! so the hot paths never lock.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Max length of the sample line kept in stats.
pub const SAMPLE_RAW_LINE_MAX: usize = 600;

#[derive(Debug, Default)]
pub struct IngestStats {
    // UDP layer
    pub udp_packets: AtomicU64,
    pub udp_bytes: AtomicU64,
    pub lines_received: AtomicU64,

    // Reconstruction: complete records handed to the pipeline
    pub records_processed: AtomicU64,
    pub records_parse_ok: AtomicU64,
    pub records_parse_error: AtomicU64,
    pub records_filtered_id: AtomicU64,
    pub raw_logs_saved: AtomicU64,
    pub events_saved: AtomicU64,

    // Persistence errors (batch rollback)
    pub batch_errors: AtomicU64,

    // Last received line (truncated), so the device format is visible even
    // when no records assemble.
    sample_raw_line: RwLock<Option<String>>,
    last_updated: RwLock<Option<DateTime<Utc>>>,
}

/// Read-only snapshot for the operational surface.
#[derive(Debug, Clone, Serialize)]
pub struct IngestStatsSnapshot {
    pub udp_packets: u64,
    pub udp_bytes: u64,
    pub lines: u64,
    pub records_total: u64,
    pub records_ok: u64,
    pub parse_err: u64,
    pub filtered_id: u64,
    pub db_raw_logs: u64,
    pub db_events: u64,
    pub batch_errors: u64,
    pub sample_raw_line: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl IngestStats {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Update last_updated; call whenever counters change meaningfully.
    pub fn touch(&self) {
        *self.last_updated.write() = Some(Utc::now());
    }

    pub fn set_sample_line(&self, line: &str) {
        let truncated = if line.len() > SAMPLE_RAW_LINE_MAX {
            let mut end = SAMPLE_RAW_LINE_MAX;
            while !line.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &line[..end])
        } else {
            line.to_string()
        };
        *self.sample_raw_line.write() = Some(truncated);
    }

    pub fn reset(&self) {
        for counter in [
            &self.udp_packets,
            &self.udp_bytes,
            &self.lines_received,
            &self.records_processed,
            &self.records_parse_ok,
            &self.records_parse_error,
            &self.records_filtered_id,
            &self.raw_logs_saved,
            &self.events_saved,
            &self.batch_errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *self.sample_raw_line.write() = None;
        *self.last_updated.write() = None;
    }

    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            udp_packets: self.udp_packets.load(Ordering::Relaxed),
            udp_bytes: self.udp_bytes.load(Ordering::Relaxed),
            lines: self.lines_received.load(Ordering::Relaxed),
            records_total: self.records_processed.load(Ordering::Relaxed),
            records_ok: self.records_parse_ok.load(Ordering::Relaxed),
            parse_err: self.records_parse_error.load(Ordering::Relaxed),
            filtered_id: self.records_filtered_id.load(Ordering::Relaxed),
            db_raw_logs: self.raw_logs_saved.load(Ordering::Relaxed),
            db_events: self.events_saved.load(Ordering::Relaxed),
            batch_errors: self.batch_errors.load(Ordering::Relaxed),
            sample_raw_line: self.sample_raw_line.read().clone(),
            last_updated: *self.last_updated.read(),
        }
    }
}

/// Shared instance used by the UDP receiver and the ingestors.
pub static INGEST_STATS: Lazy<IngestStats> = Lazy::new(IngestStats::default);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let stats = IngestStats::default();
        IngestStats::incr(&stats.udp_packets);
        IngestStats::add(&stats.udp_bytes, 1500);
        IngestStats::incr(&stats.records_processed);
        stats.touch();

        let snap = stats.snapshot();
        assert_eq!(snap.udp_packets, 1);
        assert_eq!(snap.udp_bytes, 1500);
        assert_eq!(snap.records_total, 1);
        assert!(snap.last_updated.is_some());
    }

    #[test]
    fn reset_clears_everything() {
        let stats = IngestStats::default();
        IngestStats::incr(&stats.lines_received);
        stats.set_sample_line("hello");
        stats.reset();

        let snap = stats.snapshot();
        assert_eq!(snap.lines, 0);
        assert_eq!(snap.sample_raw_line, None);
    }

    #[test]
    fn long_sample_lines_are_truncated() {
        let stats = IngestStats::default();
        stats.set_sample_line(&"x".repeat(2 * SAMPLE_RAW_LINE_MAX));
        let snap = stats.snapshot();
        let sample = snap.sample_raw_line.unwrap();
        assert!(sample.len() <= SAMPLE_RAW_LINE_MAX + 3);
        assert!(sample.ends_with("..."));
    }
}
