//! Shared ingest pipeline for the UDP and file-import paths:
//! reconstruct -> parse -> filter -> classify -> batch -> sink.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::enrichment::classification::Classifier;
use crate::error::Result;
use crate::ha::{canonical_firewall_key, canonical_firewall_key_import};
use crate::ingest::parser::{self, ParsedRecord};
use crate::ingest::reconstruct::RecordReconstructor;
use crate::ingest::stats::{INGEST_STATS, IngestStats};
use crate::storage::device_ident::DeviceIdentUpdate;
use crate::storage::writer::{BatchSink, IngestSource, ParsedBatch};
use flowgate_model::NewRawLog;

/// Batch threshold for file imports.
pub const DEFAULT_BATCH_SIZE: usize = 5000;

/// Per-upload statistics for the job row and the upload response.
#[derive(Debug, Default, Clone)]
pub struct UploadCollector {
    device_counts: HashMap<String, u64>,
    pub raw_logs_inserted: i64,
    pub events_inserted: i64,
    pub parse_ok: i64,
    pub parse_err: i64,
    pub filtered_id: i64,
    time_min: Option<DateTime<Utc>>,
    time_max: Option<DateTime<Utc>>,
}

impl UploadCollector {
    fn observe_time(&mut self, ts_utc: DateTime<Utc>) {
        if self.time_min.is_none_or(|min| ts_utc < min) {
            self.time_min = Some(ts_utc);
        }
        if self.time_max.is_none_or(|max| ts_utc > max) {
            self.time_max = Some(ts_utc);
        }
    }

    pub fn record_raw(&mut self, device: &str, ts_utc: DateTime<Utc>) {
        *self.device_counts.entry(device.to_string()).or_insert(0) += 1;
        self.raw_logs_inserted += 1;
        self.observe_time(ts_utc);
    }

    pub fn record_event(&mut self, ts_utc: DateTime<Utc>) {
        self.events_inserted += 1;
        self.observe_time(ts_utc);
    }

    /// Most frequently seen device, unless the operator named one.
    pub fn primary_device(&self, user_provided: Option<&str>) -> String {
        if let Some(given) = user_provided.map(str::trim).filter(|s| !s.is_empty()) {
            return given.to_string();
        }
        self.device_counts
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(device, _)| device.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn time_min(&self) -> Option<DateTime<Utc>> {
        self.time_min
    }

    pub fn time_max(&self) -> Option<DateTime<Utc>> {
        self.time_max
    }

    pub fn time_min_iso(&self) -> Option<String> {
        self.time_min
            .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
    }

    pub fn time_max_iso(&self) -> Option<String> {
        self.time_max
            .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
    }
}

/// Stateful pipeline shared by live UDP ingest and batch imports.
///
/// Live mode flushes after every completed record (short transaction per
/// arrival, HA-collapsed keys); import mode accumulates `batch_size`
/// records per transaction and never collapses HA pairs.
pub struct SyslogIngestor {
    reconstructor: RecordReconstructor,
    sink: Arc<dyn BatchSink>,
    classifier: Arc<Classifier>,
    source: IngestSource,
    batch: ParsedBatch,
    batch_size: usize,
    pub collector: Option<UploadCollector>,
}

impl std::fmt::Debug for SyslogIngestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyslogIngestor")
            .field("source", &self.source)
            .field("batch_size", &self.batch_size)
            .field("pending_records", &self.batch.record_count())
            .finish()
    }
}

impl SyslogIngestor {
    /// Live UDP pipeline: one short transaction per completed record.
    pub fn live(sink: Arc<dyn BatchSink>, classifier: Arc<Classifier>) -> Self {
        Self {
            reconstructor: RecordReconstructor::new(),
            sink,
            classifier,
            source: IngestSource::Syslog,
            batch: ParsedBatch::new(IngestSource::Syslog),
            batch_size: 1,
            collector: None,
        }
    }

    /// Batch import pipeline with an upload collector attached.
    pub fn import(
        sink: Arc<dyn BatchSink>,
        classifier: Arc<Classifier>,
        batch_size: usize,
    ) -> Self {
        Self {
            reconstructor: RecordReconstructor::new(),
            sink,
            classifier,
            source: IngestSource::Import,
            batch: ParsedBatch::new(IngestSource::Import),
            batch_size: batch_size.max(1),
            collector: Some(UploadCollector::default()),
        }
    }

    /// Feed one line; completed records run through the pipeline.
    pub async fn handle_line(&mut self, line: &str) -> Result<()> {
        if let Some(record) = self.reconstructor.feed_line(line) {
            self.process_record(&record).await?;
        }
        Ok(())
    }

    /// Emit any buffered record and persist the in-flight batch.
    pub async fn flush(&mut self) -> Result<()> {
        if let Some(record) = self.reconstructor.flush() {
            self.process_record(&record).await?;
        }
        self.flush_batch().await
    }

    async fn process_record(&mut self, raw_text: &str) -> Result<()> {
        IngestStats::incr(&INGEST_STATS.records_processed);
        let parsed = parser::parse_record(raw_text);

        // Filter before the raw-log write: only CONN and DEVICE families.
        if !parsed.is_accepted_id() {
            IngestStats::incr(&INGEST_STATS.records_filtered_id);
            if let Some(collector) = &mut self.collector {
                collector.filtered_id += 1;
            }
            return Ok(());
        }

        if parsed.parse_status.is_ok() {
            IngestStats::incr(&INGEST_STATS.records_parse_ok);
            if let Some(collector) = &mut self.collector {
                collector.parse_ok += 1;
            }
        } else {
            IngestStats::incr(&INGEST_STATS.records_parse_error);
            if let Some(collector) = &mut self.collector {
                collector.parse_err += 1;
            }
        }

        let (firewall_key, device_member) = match self.source {
            IngestSource::Syslog => canonical_firewall_key(&parsed.device),
            IngestSource::Import => (canonical_firewall_key_import(&parsed.device), None),
        };

        self.batch.raw_logs.push(NewRawLog {
            ts_utc: parsed.ts_utc,
            device: parsed.device.clone(),
            raw_record: raw_text.to_string(),
            parse_status: parsed.parse_status,
            parse_error: parsed.parse_error.clone(),
        });
        IngestStats::incr(&INGEST_STATS.raw_logs_saved);
        self.batch.mark_firewall(&firewall_key, parsed.ts_utc);
        if let Some(collector) = &mut self.collector {
            collector.record_raw(&parsed.device, parsed.ts_utc);
        }

        if parsed.parse_status.is_ok() {
            if parsed.is_device_record() {
                self.queue_device_identification(&parsed);
            } else if parsed.is_conn_record() {
                self.queue_event(&parsed, firewall_key, device_member).await;
            }
        }

        if self.batch.record_count() >= self.batch_size {
            self.flush_batch().await?;
        }
        Ok(())
    }

    fn queue_device_identification(&mut self, parsed: &ParsedRecord) {
        let raw_mac = parsed
            .kv
            .get("srcmac")
            .map(super::parser::KvValue::to_text)
            .unwrap_or_default();
        let Some(mac) = parser::normalize_mac(&raw_mac) else {
            warn!("DEVICE log had no usable srcmac, skipped");
            return;
        };
        let fields = parser::device_fields_from_kv(&parsed.kv);
        info!(
            device = %parsed.device,
            mac = %mac,
            ip = fields.device_ip4.as_deref().unwrap_or(""),
            vendor = fields.device_vendor.as_deref().unwrap_or(""),
            hostname = fields.hostname.as_deref().unwrap_or(""),
            "DEVICE log"
        );
        let raw_event_json = serde_json::to_value(&parsed.kv)
            .unwrap_or_else(|_| serde_json::Value::Object(Default::default()));
        self.batch.device_idents.push(DeviceIdentUpdate {
            firewall_device: parsed.device.clone(),
            srcmac: mac,
            ts_utc: parsed.ts_utc,
            fields,
            raw_event_json,
        });
    }

    async fn queue_event(
        &mut self,
        parsed: &ParsedRecord,
        firewall_key: String,
        device_member: Option<String>,
    ) {
        let mut event = parser::normalize_to_event(parsed);
        event.firewall_key = firewall_key;
        event.device_member = device_member;

        // Classification misses must not stall ingest; unresolved lookups
        // degrade to unknown sides.
        if let Err(e) = self.classifier.apply(&mut event).await {
            warn!(device = %event.device, error = %e, "Classification lookup failed");
            event.recv_side = Some("unknown".to_string());
            event.dest_side = Some("unknown".to_string());
            event.direction_bucket = Some("unknown".to_string());
        }

        IngestStats::incr(&INGEST_STATS.events_saved);
        if let Some(collector) = &mut self.collector {
            collector.record_event(parsed.ts_utc);
        }
        self.batch.events.push(event);
    }

    async fn flush_batch(&mut self) -> Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let batch = std::mem::replace(&mut self.batch, ParsedBatch::new(self.source));
        match self.sink.write_batch(&batch).await {
            Ok(()) => {
                self.classifier.flush_unclassified().await;
                INGEST_STATS.touch();
                Ok(())
            }
            Err(e) => {
                IngestStats::incr(&INGEST_STATS.batch_errors);
                INGEST_STATS.touch();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::writer::MockBatchSink;
    use flowgate_model::ClassificationPrecedence;
    use sqlx::PgPool;

    fn classifier() -> Arc<Classifier> {
        // Lazy pool: never actually connects in these tests.
        let pool = PgPool::connect_lazy("postgres://localhost/flowgate").unwrap();
        Arc::new(Classifier::new(pool, ClassificationPrecedence::ZoneFirst))
    }

    const CONN_LINE: &str =
        "<134>Feb 10 17:37:13 gw-x_Master EFW: CONN: id=00600004 event=conn_open connsrcip=10.0.0.1 conndestip=10.0.0.2";
    const DEVICE_LINE: &str =
        "<134>Feb 10 17:37:13 fw1 EFW: DEVICE: id=08900001 srcmac=aa:bb:cc:dd:ee:ff deviceip4=10.0.0.9 devicevendor=Acme";
    const FILTERED_LINE: &str =
        "<134>Feb 10 17:37:13 fw1 EFW: ALG: id=00200001 event=alg_session_open";

    #[tokio::test]
    async fn import_batches_until_threshold() {
        let mut sink = MockBatchSink::new();
        sink.expect_write_batch()
            .times(1)
            .withf(|batch: &ParsedBatch| {
                batch.raw_logs.len() == 2 && batch.events.len() == 2
            })
            .returning(|_| Ok(()));

        let mut ingestor = SyslogIngestor::import(Arc::new(sink), classifier(), 2);
        ingestor.handle_line(CONN_LINE).await.unwrap();
        ingestor.handle_line(CONN_LINE).await.unwrap();
        // Third record-start completes the second; threshold fires inside.
        ingestor.handle_line(CONN_LINE).await.unwrap();
    }

    #[tokio::test]
    async fn flush_persists_the_buffered_record() {
        let mut sink = MockBatchSink::new();
        sink.expect_write_batch()
            .times(1)
            .withf(|batch: &ParsedBatch| {
                batch.raw_logs.len() == 1
                    && batch.events.len() == 1
                    && batch.events[0].firewall_key == "gw-x_Master"
            })
            .returning(|_| Ok(()));

        let mut ingestor = SyslogIngestor::import(Arc::new(sink), classifier(), 100);
        ingestor.handle_line(CONN_LINE).await.unwrap();
        ingestor.flush().await.unwrap();
    }

    #[tokio::test]
    async fn live_mode_collapses_ha_and_flushes_per_record() {
        let mut sink = MockBatchSink::new();
        sink.expect_write_batch()
            .times(1)
            .withf(|batch: &ParsedBatch| {
                batch.events.len() == 1
                    && batch.events[0].firewall_key == "ha:gw-x"
                    && batch.events[0].device_member.as_deref() == Some("gw-x_Master")
                    && batch.firewall_marks.contains_key("ha:gw-x")
            })
            .returning(|_| Ok(()));

        let mut ingestor = SyslogIngestor::live(Arc::new(sink), classifier());
        ingestor.handle_line(CONN_LINE).await.unwrap();
        // Live batch size is 1: the second start-line flushes the first.
        ingestor.handle_line(CONN_LINE).await.unwrap();
        // Drop the pending second record silently.
    }

    #[tokio::test]
    async fn device_records_route_to_identifications() {
        let mut sink = MockBatchSink::new();
        sink.expect_write_batch()
            .times(1)
            .withf(|batch: &ParsedBatch| {
                batch.events.is_empty()
                    && batch.device_idents.len() == 1
                    && batch.device_idents[0].srcmac == "AA-BB-CC-DD-EE-FF"
                    && batch.device_idents[0].fields.device_vendor.as_deref() == Some("Acme")
            })
            .returning(|_| Ok(()));

        let mut ingestor = SyslogIngestor::import(Arc::new(sink), classifier(), 100);
        ingestor.handle_line(DEVICE_LINE).await.unwrap();
        ingestor.flush().await.unwrap();
    }

    #[tokio::test]
    async fn filtered_ids_never_reach_the_sink() {
        let mut sink = MockBatchSink::new();
        sink.expect_write_batch().times(0);

        let mut ingestor = SyslogIngestor::import(Arc::new(sink), classifier(), 100);
        ingestor.handle_line(FILTERED_LINE).await.unwrap();
        ingestor.flush().await.unwrap();
        assert_eq!(ingestor.collector.as_ref().unwrap().filtered_id, 1);
    }

    #[test]
    fn collector_primary_device_is_most_common() {
        let mut collector = UploadCollector::default();
        let now = Utc::now();
        collector.record_raw("fw1", now);
        collector.record_raw("fw2", now);
        collector.record_raw("fw2", now);
        assert_eq!(collector.primary_device(None), "fw2");
        assert_eq!(collector.primary_device(Some("override")), "override");
        assert_eq!(UploadCollector::default().primary_device(None), "unknown");
    }

    #[test]
    fn collector_tracks_time_range() {
        let mut collector = UploadCollector::default();
        let t1 = Utc::now();
        let t2 = t1 + chrono::Duration::hours(1);
        collector.record_raw("fw1", t2);
        collector.record_event(t1);
        assert_eq!(collector.time_min(), Some(t1));
        assert_eq!(collector.time_max(), Some(t2));
        let iso = collector.time_min_iso().unwrap();
        assert!(iso.ends_with('Z'));
    }
}
