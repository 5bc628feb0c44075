//! Direction classification: (device, zone, interface) -> side, plus
//! exposure tracking for names nobody has classified yet.

use parking_lot::Mutex;
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::warn;

use crate::error::Result;
use crate::storage::retry::execute_with_retry;
use flowgate_model::{ClassificationKind, ClassificationPrecedence, ClassificationSide, NewEvent};

type UnclassifiedKey = (String, ClassificationKind, String);

/// Resolves sides through the `classifications` table and accumulates
/// unclassified-name counts for a single flush per batch commit.
#[derive(Debug)]
pub struct Classifier {
    pool: PgPool,
    precedence: ClassificationPrecedence,
    pending_unclassified: Mutex<HashMap<UnclassifiedKey, i64>>,
}

impl Classifier {
    pub fn new(pool: PgPool, precedence: ClassificationPrecedence) -> Self {
        Self {
            pool,
            precedence,
            pending_unclassified: Mutex::new(HashMap::new()),
        }
    }

    fn lookup_order<'a>(
        &self,
        zone: Option<&'a str>,
        iface: Option<&'a str>,
    ) -> [(ClassificationKind, Option<&'a str>); 2] {
        match self.precedence {
            ClassificationPrecedence::ZoneFirst => [
                (ClassificationKind::Zone, zone),
                (ClassificationKind::Interface, iface),
            ],
            ClassificationPrecedence::InterfaceFirst => [
                (ClassificationKind::Interface, iface),
                (ClassificationKind::Zone, zone),
            ],
        }
    }

    async fn lookup_side(
        &self,
        device: &str,
        kind: ClassificationKind,
        name: &str,
    ) -> Result<Option<ClassificationSide>> {
        let side: Option<String> = sqlx::query_scalar(
            r#"
            SELECT side FROM classifications
            WHERE device = $1 AND kind = $2 AND name = $3
            ORDER BY priority DESC
            LIMIT 1
            "#,
        )
        .bind(device)
        .bind(kind.as_str())
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(side.and_then(|s| s.parse().ok()))
    }

    fn record_unclassified(&self, device: &str, kind: ClassificationKind, name: &str) {
        if name.is_empty() {
            return;
        }
        let mut pending = self.pending_unclassified.lock();
        *pending
            .entry((device.to_string(), kind, name.to_string()))
            .or_insert(0) += 1;
    }

    /// Derive the side for one endpoint of an event. A miss records every
    /// name in the lookup order for later operator labelling.
    pub async fn derive_side(
        &self,
        device: &str,
        zone: Option<&str>,
        iface: Option<&str>,
    ) -> Result<ClassificationSide> {
        let order = self.lookup_order(zone, iface);
        for (kind, name) in order {
            let Some(name) = name.filter(|n| !n.is_empty()) else {
                continue;
            };
            if let Some(side) = self.lookup_side(device, kind, name).await? {
                if side.is_known() {
                    return Ok(side);
                }
            }
        }
        for (kind, name) in self.lookup_order(zone, iface) {
            if let Some(name) = name {
                self.record_unclassified(device, kind, name);
            }
        }
        Ok(ClassificationSide::Unknown)
    }

    /// Populate recv_side, dest_side, and direction_bucket on an event.
    pub async fn apply(&self, event: &mut NewEvent) -> Result<()> {
        let recv_side = self
            .derive_side(
                &event.device,
                event.recv_zone.as_deref(),
                event.recv_if.as_deref(),
            )
            .await?;
        let dest_side = self
            .derive_side(
                &event.device,
                event.dest_zone.as_deref(),
                event.dest_if.as_deref(),
            )
            .await?;

        event.recv_side = Some(recv_side.to_string());
        event.dest_side = Some(dest_side.to_string());
        event.direction_bucket = Some(direction_bucket(recv_side, dest_side));
        Ok(())
    }

    /// Flush accumulated unclassified counts in one idempotent upsert per
    /// key. Retries transient locks and never fails the caller; on
    /// exhausted retries the counts are re-queued for the next flush.
    pub async fn flush_unclassified(&self) {
        let drained: Vec<(UnclassifiedKey, i64)> = {
            let mut pending = self.pending_unclassified.lock();
            pending.drain().collect()
        };
        for ((device, kind, name), count) in drained {
            let result = execute_with_retry(|| {
                let pool = self.pool.clone();
                let device = device.clone();
                let name = name.clone();
                async move {
                    sqlx::query(
                        r#"
                        INSERT INTO unclassified_endpoints (device, kind, name, count)
                        VALUES ($1, $2, $3, $4)
                        ON CONFLICT (device, kind, name)
                        DO UPDATE SET count = unclassified_endpoints.count + EXCLUDED.count
                        "#,
                    )
                    .bind(&device)
                    .bind(kind.as_str())
                    .bind(&name)
                    .bind(count)
                    .execute(&pool)
                    .await
                }
            })
            .await;

            match result {
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => {
                    warn!(
                        device,
                        kind = kind.as_str(),
                        name,
                        "Unclassified upsert gave up; re-queueing counts"
                    );
                    self.record_unclassified(&device, kind, &name);
                }
            }
        }
    }

    /// Number of keys waiting for the next flush.
    pub fn pending_unclassified_len(&self) -> usize {
        self.pending_unclassified.lock().len()
    }
}

/// Cross-product label used for quick filtering.
pub fn direction_bucket(recv: ClassificationSide, dest: ClassificationSide) -> String {
    if recv.is_known() && dest.is_known() {
        format!("{recv}_to_{dest}")
    } else {
        "unknown".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_requires_both_sides_known() {
        assert_eq!(
            direction_bucket(ClassificationSide::Inside, ClassificationSide::Outside),
            "inside_to_outside"
        );
        assert_eq!(
            direction_bucket(ClassificationSide::Inside, ClassificationSide::Unknown),
            "unknown"
        );
        assert_eq!(
            direction_bucket(ClassificationSide::Unknown, ClassificationSide::Unknown),
            "unknown"
        );
    }

    #[tokio::test]
    async fn unclassified_counts_accumulate_per_key() {
        let pool = PgPool::connect_lazy("postgres://localhost/flowgate").unwrap();
        let classifier = Classifier::new(pool, ClassificationPrecedence::ZoneFirst);
        classifier.record_unclassified("gw1", ClassificationKind::Interface, "ocvpn_if");
        classifier.record_unclassified("gw1", ClassificationKind::Interface, "ocvpn_if");
        classifier.record_unclassified("gw1", ClassificationKind::Zone, "untrust");
        classifier.record_unclassified("gw1", ClassificationKind::Zone, "");

        let pending = classifier.pending_unclassified.lock();
        assert_eq!(pending.len(), 2);
        assert_eq!(
            pending[&(
                "gw1".to_string(),
                ClassificationKind::Interface,
                "ocvpn_if".to_string()
            )],
            2
        );
    }
}
