//! Single-writer batched persistence. One transaction per batch; all
//! dialect-specific upsert text lives here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::aggregation::flows::{self, EndpointKey};
use crate::error::{CoreError, Result};
use crate::storage::device_ident::{DeviceIdentUpdate, apply_device_identification};
use crate::storage::firewall_source::{upsert_firewall_import, upsert_firewall_syslog};
use crate::storage::retry::{BASE_SLEEP_MS, MAX_ATTEMPTS, is_transient_locking_error};
use flowgate_model::{NewEvent, NewRawLog};

/// Where a batch came from; decides HA canonicalization and which
/// inventory provenance flag gets set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestSource {
    Syslog,
    Import,
}

/// Min/max event time per firewall key, tracked while a batch accumulates.
pub type FirewallMarks = BTreeMap<String, (DateTime<Utc>, DateTime<Utc>)>;

/// One batch of parsed records to persist.
#[derive(Debug)]
pub struct ParsedBatch {
    pub source: IngestSource,
    pub raw_logs: Vec<NewRawLog>,
    pub events: Vec<NewEvent>,
    pub device_idents: Vec<DeviceIdentUpdate>,
    pub firewall_marks: FirewallMarks,
}

impl ParsedBatch {
    pub fn new(source: IngestSource) -> Self {
        Self {
            source,
            raw_logs: Vec::new(),
            events: Vec::new(),
            device_idents: Vec::new(),
            firewall_marks: FirewallMarks::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.raw_logs.is_empty() && self.events.is_empty() && self.device_idents.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.raw_logs.len()
    }

    /// Widen the seen-range mark for a firewall key.
    pub fn mark_firewall(&mut self, key: &str, ts: DateTime<Utc>) {
        if key.is_empty() {
            return;
        }
        self.firewall_marks
            .entry(key.to_string())
            .and_modify(|(min, max)| {
                if ts < *min {
                    *min = ts;
                }
                if ts > *max {
                    *max = ts;
                }
            })
            .or_insert((ts, ts));
    }
}

/// Persistence seam between the ingestor and the store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn write_batch(&self, batch: &ParsedBatch) -> Result<()>;
}

/// The only component that mutates the store during ingest.
#[derive(Debug)]
pub struct Writer {
    pool: PgPool,
    single_writer: bool,
    write_lock: Mutex<()>,
}

// Keep bulk inserts well under the Postgres bind-parameter limit.
const RAW_LOG_INSERT_CHUNK: usize = 2000;
const EVENT_INSERT_CHUNK: usize = 500;

impl Writer {
    pub fn new(pool: PgPool, single_writer: bool) -> Self {
        Self {
            pool,
            single_writer,
            write_lock: Mutex::new(()),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn write_batch_inner(&self, batch: &ParsedBatch) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        insert_raw_logs(&mut tx, &batch.raw_logs).await?;
        insert_events(&mut tx, &batch.events).await?;

        for (key, (min_ts, max_ts)) in &batch.firewall_marks {
            match batch.source {
                IngestSource::Syslog => {
                    upsert_firewall_syslog(&mut *tx, key, *min_ts, *max_ts).await?;
                }
                IngestSource::Import => {
                    upsert_firewall_import(&mut *tx, key, Some(*min_ts), Some(*max_ts))
                        .await?;
                }
            }
        }

        let endpoint_ids = upsert_endpoints(&mut tx, &batch.events).await?;
        upsert_flows(&mut tx, &batch.events, &endpoint_ids).await?;

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl BatchSink for Writer {
    /// Persist one batch transactionally. Deadlocks retry with exponential
    /// backoff; in single-writer mode batches are serialized by a mutex.
    async fn write_batch(&self, batch: &ParsedBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let _guard = if self.single_writer {
            Some(self.write_lock.lock().await)
        } else {
            None
        };

        let mut attempt = 0u32;
        loop {
            match self.write_batch_inner(batch).await {
                Ok(()) => break,
                Err(CoreError::Database(e))
                    if is_transient_locking_error(&e) && attempt < MAX_ATTEMPTS - 1 =>
                {
                    let sleep_ms = BASE_SLEEP_MS * 2u64.pow(attempt)
                        + rand::rng().random_range(0..BASE_SLEEP_MS);
                    warn!(
                        attempt = attempt + 1,
                        sleep_ms,
                        error = %e,
                        "write_batch hit transient lock; retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
                    attempt += 1;
                }
                Err(e) => return Err(map_flow_error(e)),
            }
        }

        // Best-effort side writes: a failure here must not drop the batch.
        for update in &batch.device_idents {
            if let Err(e) = apply_device_identification(&self.pool, update).await {
                warn!(
                    device = %update.firewall_device,
                    mac = %update.srcmac,
                    error = %e,
                    "Device identification write failed; continuing"
                );
            }
        }

        debug!(
            raw_logs = batch.raw_logs.len(),
            events = batch.events.len(),
            device_idents = batch.device_idents.len(),
            "Batch persisted"
        );
        Ok(())
    }
}

/// Re-tag upsert failures caused by a missing/duplicated flow identity
/// index so the job surface can point at the remediation path.
fn map_flow_error(err: CoreError) -> CoreError {
    if let CoreError::Database(db) = &err {
        let msg = db.to_string();
        if msg.contains("ON CONFLICT") && msg.contains("flows") {
            return CoreError::FlowAggregation(format!(
                "flows unique index ux_flows_identity is missing or duplicated: {msg}"
            ));
        }
    }
    err
}

async fn insert_raw_logs(
    tx: &mut Transaction<'_, Postgres>,
    raw_logs: &[NewRawLog],
) -> Result<()> {
    for chunk in raw_logs.chunks(RAW_LOG_INSERT_CHUNK) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO raw_logs (ts_utc, device, raw_record, parse_status, parse_error) ",
        );
        builder.push_values(chunk, |mut b, row| {
            b.push_bind(row.ts_utc)
                .push_bind(&row.device)
                .push_bind(&row.raw_record)
                .push_bind(row.parse_status.as_str())
                .push_bind(&row.parse_error);
        });
        builder.build().execute(&mut **tx).await?;
    }
    Ok(())
}

async fn insert_events(
    tx: &mut Transaction<'_, Postgres>,
    events: &[NewEvent],
) -> Result<()> {
    for chunk in events.chunks(EVENT_INSERT_CHUNK) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO events (ts_utc, device, device_member, firewall_key, event_type, \
             action, rule, satsrcrule, satdestrule, srcusername, destusername, proto, \
             recv_if, recv_zone, src_ip, src_port, src_mac, src_device, dest_if, dest_zone, \
             dest_ip, dest_port, dest_mac, dest_device, xlat_src_ip, xlat_src_port, \
             xlat_dest_ip, xlat_dest_port, bytes_orig, bytes_term, duration_s, app_name, \
             app_risk, app_family, iprep_ip, iprep_score, iprep_categories, iprep_src, \
             iprep_dest, iprep_src_score, iprep_dest_score, recv_side, dest_side, \
             direction_bucket, extra_json) ",
        );
        builder.push_values(chunk, |mut b, e| {
            b.push_bind(e.ts_utc.unwrap_or_else(Utc::now))
                .push_bind(&e.device)
                .push_bind(&e.device_member)
                .push_bind(&e.firewall_key)
                .push_bind(&e.event_type)
                .push_bind(&e.action)
                .push_bind(&e.rule)
                .push_bind(&e.satsrcrule)
                .push_bind(&e.satdestrule)
                .push_bind(&e.srcusername)
                .push_bind(&e.destusername)
                .push_bind(&e.proto)
                .push_bind(&e.recv_if)
                .push_bind(&e.recv_zone)
                .push_bind(&e.src_ip)
                .push_bind(e.src_port)
                .push_bind(&e.src_mac)
                .push_bind(&e.src_device)
                .push_bind(&e.dest_if)
                .push_bind(&e.dest_zone)
                .push_bind(&e.dest_ip)
                .push_bind(e.dest_port)
                .push_bind(&e.dest_mac)
                .push_bind(&e.dest_device)
                .push_bind(&e.xlat_src_ip)
                .push_bind(e.xlat_src_port)
                .push_bind(&e.xlat_dest_ip)
                .push_bind(e.xlat_dest_port)
                .push_bind(e.bytes_orig)
                .push_bind(e.bytes_term)
                .push_bind(e.duration_s)
                .push_bind(&e.app_name)
                .push_bind(&e.app_risk)
                .push_bind(&e.app_family)
                .push_bind(&e.iprep_ip)
                .push_bind(e.iprep_score)
                .push_bind(&e.iprep_categories)
                .push_bind(&e.iprep_src)
                .push_bind(&e.iprep_dest)
                .push_bind(e.iprep_src_score)
                .push_bind(e.iprep_dest_score)
                .push_bind(&e.recv_side)
                .push_bind(&e.dest_side)
                .push_bind(&e.direction_bucket)
                .push_bind(&e.extra_json);
        });
        builder.build().execute(&mut **tx).await?;
    }
    Ok(())
}

/// Upsert every endpoint the batch references, then resolve their ids.
/// Insert is idempotent (conflict backfills device_name only when the row
/// had none); id recovery is a follow-up lookup, newest row wins.
async fn upsert_endpoints(
    tx: &mut Transaction<'_, Postgres>,
    events: &[NewEvent],
) -> Result<HashMap<EndpointKey, i64>> {
    let mut specs = Vec::new();
    let mut seen: Vec<EndpointKey> = Vec::new();
    for event in events {
        for spec in flows::endpoint_specs(event) {
            let key = spec.key();
            if !seen.contains(&key) {
                seen.push(key);
                specs.push(spec);
            }
        }
    }

    let mut ids = HashMap::new();
    for spec in &specs {
        sqlx::query(
            r#"
            INSERT INTO endpoints (device, ip, mac, device_name)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (device, ip, (COALESCE(mac, ''))) DO UPDATE
            SET device_name = COALESCE(endpoints.device_name, EXCLUDED.device_name)
            "#,
        )
        .bind(&spec.firewall_key)
        .bind(&spec.ip)
        .bind(&spec.mac)
        .bind(&spec.device_name)
        .execute(&mut **tx)
        .await?;

        let id: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM endpoints
            WHERE device = $1 AND ip = $2 AND COALESCE(mac, '') = COALESCE($3, '')
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(&spec.firewall_key)
        .bind(&spec.ip)
        .bind(&spec.mac)
        .fetch_optional(&mut **tx)
        .await?;
        if let Some(id) = id {
            ids.insert(spec.key(), id);
        }
    }
    Ok(ids)
}

async fn upsert_flows(
    tx: &mut Transaction<'_, Postgres>,
    events: &[NewEvent],
    endpoint_ids: &HashMap<EndpointKey, i64>,
) -> Result<()> {
    for event in events {
        for row in flows::flow_rows(event, endpoint_ids) {
            let id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO flows
                    (device, basis, from_value, to_value, proto, dest_port,
                     src_endpoint_id, dst_endpoint_id, view_kind,
                     count_open, count_close, bytes_src_to_dst, bytes_dst_to_src,
                     duration_total_s, first_seen, last_seen, top_rules, top_apps)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9,
                        1, 0, 0, 0, 0, $10, $10, '{}'::jsonb, '{}'::jsonb)
                ON CONFLICT (device, basis, from_value, to_value,
                             (COALESCE(proto, '')), (COALESCE(dest_port, -1)),
                             src_endpoint_id, dst_endpoint_id, view_kind)
                DO UPDATE SET
                    count_open = flows.count_open + 1,
                    first_seen = LEAST(flows.first_seen, EXCLUDED.first_seen),
                    last_seen = GREATEST(flows.last_seen, EXCLUDED.last_seen)
                RETURNING id
                "#,
            )
            .bind(&row.identity.device)
            .bind(row.identity.basis.as_str())
            .bind(&row.identity.from_value)
            .bind(&row.identity.to_value)
            .bind(&row.identity.proto)
            .bind(row.identity.dest_port)
            .bind(row.identity.src_endpoint_id)
            .bind(row.identity.dst_endpoint_id)
            .bind(row.identity.view_kind.as_str())
            .bind(row.event_ts)
            .fetch_one(&mut **tx)
            .await?;

            // Rule/app counters are maps; the increment is not expressible
            // in the upsert SET clause.
            if let Some(rule) = &row.rule {
                bump_json_counter(tx, id, "top_rules", rule).await?;
            }
            if let Some(app) = &row.app_name {
                bump_json_counter(tx, id, "top_apps", app).await?;
            }
        }
    }
    Ok(())
}

async fn bump_json_counter(
    tx: &mut Transaction<'_, Postgres>,
    flow_id: i64,
    column: &str,
    key: &str,
) -> Result<()> {
    // Column name comes from a fixed internal set, never user input.
    let sql = format!(
        "UPDATE flows SET {column} = jsonb_set({column}, ARRAY[$2], \
         to_jsonb(COALESCE(({column}->>$2)::bigint, 0) + 1)) WHERE id = $1"
    );
    sqlx::query(&sql)
        .bind(flow_id)
        .bind(key)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgate_model::ParseStatus;

    fn raw(device: &str) -> NewRawLog {
        NewRawLog {
            ts_utc: Utc::now(),
            device: device.to_string(),
            raw_record: "line".to_string(),
            parse_status: ParseStatus::Ok,
            parse_error: None,
        }
    }

    #[test]
    fn empty_batch_detection() {
        let batch = ParsedBatch::new(IngestSource::Import);
        assert!(batch.is_empty());
        let mut batch = ParsedBatch::new(IngestSource::Import);
        batch.raw_logs.push(raw("fw1"));
        assert!(!batch.is_empty());
        assert_eq!(batch.record_count(), 1);
    }

    #[test]
    fn firewall_marks_track_min_and_max() {
        let mut batch = ParsedBatch::new(IngestSource::Syslog);
        let t1 = Utc::now();
        let t2 = t1 + chrono::Duration::seconds(60);
        batch.mark_firewall("ha:gw", t2);
        batch.mark_firewall("ha:gw", t1);
        batch.mark_firewall("", t1);
        assert_eq!(batch.firewall_marks.len(), 1);
        let (min, max) = batch.firewall_marks["ha:gw"];
        assert_eq!(min, t1);
        assert_eq!(max, t2);
    }

    #[test]
    fn flow_error_retagged_with_remediation() {
        let err = CoreError::FlowAggregation("x".into());
        assert!(matches!(
            map_flow_error(err),
            CoreError::FlowAggregation(_)
        ));
    }
}
