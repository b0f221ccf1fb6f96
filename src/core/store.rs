use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::error::{BotError, BotResult};
use crate::core::persist::DocumentStore;

const PREVIEW_CHARS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Pending,
    Delivered,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRecord {
    pub id: String,
    /// Monotonic creation counter, the tie-break for equal fire times.
    pub seq: u64,
    pub fire_at: DateTime<FixedOffset>,
    pub body: String,
    pub status: Status,
}

/// Truncated row for the list view; the full body is never needed there.
#[derive(Debug, Clone)]
pub struct ScheduleSummary {
    pub id: String,
    pub fire_at: DateTime<FixedOffset>,
    pub preview: String,
    pub status: Status,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ScheduleDocument {
    next_seq: u64,
    records: Vec<ScheduleRecord>,
}

/// Result of one delivery scan. Claimed records are already marked
/// `Delivered` in memory; a persist failure is reported alongside instead of
/// un-claiming them (memory is never rolled back).
pub struct ClaimOutcome {
    pub claimed: Vec<ScheduleRecord>,
    pub persist_error: Option<BotError>,
}

/// The durable schedule collection. One coarse lock guards the whole
/// document; every mutation rewrites the full document through the backend,
/// so a reader can never observe a half-updated record.
pub struct ScheduleStore {
    inner: Mutex<ScheduleDocument>,
    backend: Arc<dyn DocumentStore>,
}

impl ScheduleStore {
    /// Restores the collection from the backend. Pending records whose time
    /// has already passed are kept as-is and fire on the next tick.
    pub async fn load(backend: Arc<dyn DocumentStore>) -> BotResult<Self> {
        let doc = match backend.read_document().await? {
            Some(value) => serde_json::from_value::<ScheduleDocument>(value)
                .map_err(|e| BotError::Persistence(format!("corrupt schedule document: {}", e)))?,
            None => {
                info!("No schedule document in backend, starting empty");
                ScheduleDocument::default()
            }
        };
        let pending = doc
            .records
            .iter()
            .filter(|r| r.status == Status::Pending)
            .count();
        info!(
            "Schedule store loaded: {} records ({} pending)",
            doc.records.len(),
            pending
        );
        Ok(Self {
            inner: Mutex::new(doc),
            backend,
        })
    }

    pub async fn create(
        &self,
        fire_at: DateTime<FixedOffset>,
        body: &str,
        now: DateTime<FixedOffset>,
    ) -> BotResult<ScheduleRecord> {
        let body = body.trim();
        if body.is_empty() {
            return Err(BotError::Validation("the message text is empty".into()));
        }
        if fire_at <= now {
            return Err(BotError::Validation(format!(
                "{} is already in the past",
                fire_at.format("%Y-%m-%d %H:%M")
            )));
        }

        let mut doc = self.inner.lock().await;
        let record = ScheduleRecord {
            id: Uuid::new_v4().to_string(),
            seq: doc.next_seq,
            fire_at,
            body: body.to_string(),
            status: Status::Pending,
        };
        doc.next_seq += 1;
        doc.records.push(record.clone());
        info!(
            "Scheduled {} for {}",
            record.id,
            record.fire_at.to_rfc3339()
        );
        self.persist(&doc).await?;
        Ok(record)
    }

    /// Summaries ordered by fire time ascending, creation order as tie-break.
    pub async fn list(&self, filter: Option<Status>) -> Vec<ScheduleSummary> {
        let doc = self.inner.lock().await;
        let mut rows: Vec<&ScheduleRecord> = doc
            .records
            .iter()
            .filter(|r| filter.is_none_or(|f| r.status == f))
            .collect();
        rows.sort_by_key(|r| (r.fire_at, r.seq));
        rows.iter()
            .map(|r| ScheduleSummary {
                id: r.id.clone(),
                fire_at: r.fire_at,
                preview: preview_of(&r.body),
                status: r.status,
            })
            .collect()
    }

    pub async fn get(&self, id: &str) -> BotResult<ScheduleRecord> {
        let doc = self.inner.lock().await;
        doc.records
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| BotError::NotFound(id.to_string()))
    }

    pub async fn update_time(
        &self,
        id: &str,
        new_fire_at: DateTime<FixedOffset>,
        now: DateTime<FixedOffset>,
    ) -> BotResult<ScheduleRecord> {
        if new_fire_at <= now {
            return Err(BotError::Validation(format!(
                "{} is already in the past",
                new_fire_at.format("%Y-%m-%d %H:%M")
            )));
        }
        let mut doc = self.inner.lock().await;
        let record = find_pending(&mut doc.records, id)?;
        record.fire_at = new_fire_at;
        let updated = record.clone();
        self.persist(&doc).await?;
        Ok(updated)
    }

    pub async fn update_body(&self, id: &str, new_body: &str) -> BotResult<ScheduleRecord> {
        let new_body = new_body.trim();
        if new_body.is_empty() {
            return Err(BotError::Validation("the message text is empty".into()));
        }
        let mut doc = self.inner.lock().await;
        let record = find_pending(&mut doc.records, id)?;
        record.body = new_body.to_string();
        let updated = record.clone();
        self.persist(&doc).await?;
        Ok(updated)
    }

    /// Cancels one pending record. A no-op (`Ok(false)`) when no pending
    /// record matches, never an error.
    pub async fn delete_one(&self, id: &str) -> BotResult<bool> {
        let mut doc = self.inner.lock().await;
        let Some(record) = doc
            .records
            .iter_mut()
            .find(|r| r.id == id && r.status == Status::Pending)
        else {
            return Ok(false);
        };
        record.status = Status::Cancelled;
        info!("Cancelled schedule {}", id);
        self.persist(&doc).await?;
        Ok(true)
    }

    /// Cancels every pending record, returning how many were affected.
    pub async fn delete_all(&self) -> BotResult<usize> {
        let mut doc = self.inner.lock().await;
        let mut cancelled = 0;
        for record in doc
            .records
            .iter_mut()
            .filter(|r| r.status == Status::Pending)
        {
            record.status = Status::Cancelled;
            cancelled += 1;
        }
        if cancelled > 0 {
            info!("Cancelled {} pending schedules", cancelled);
            self.persist(&doc).await?;
        }
        Ok(cancelled)
    }

    /// The delivery linearization point: `Pending -> Delivered` only if the
    /// record is still pending. Returns `Ok(false)` (a silent no-op) when it
    /// is already `Delivered` or `Cancelled`, which is what makes overlapping
    /// ticker scans safe.
    pub async fn mark_delivered(&self, id: &str) -> BotResult<bool> {
        let mut doc = self.inner.lock().await;
        let record = doc
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| BotError::NotFound(id.to_string()))?;
        if record.status != Status::Pending {
            return Ok(false);
        }
        record.status = Status::Delivered;
        self.persist(&doc).await?;
        Ok(true)
    }

    /// One ticker scan: marks every due pending record `Delivered` inside a
    /// single critical section and hands the claimed records back for
    /// dispatch, in `(fire_at, seq)` order.
    pub async fn claim_due(&self, now: DateTime<FixedOffset>) -> ClaimOutcome {
        let mut doc = self.inner.lock().await;
        let mut claimed: Vec<ScheduleRecord> = Vec::new();
        for record in doc
            .records
            .iter_mut()
            .filter(|r| r.status == Status::Pending && r.fire_at <= now)
        {
            record.status = Status::Delivered;
            claimed.push(record.clone());
        }
        claimed.sort_by_key(|r| (r.fire_at, r.seq));

        let persist_error = if claimed.is_empty() {
            None
        } else {
            self.persist(&doc).await.err()
        };
        if let Some(ref e) = persist_error {
            warn!("Claimed {} records but persist failed: {}", claimed.len(), e);
        }
        ClaimOutcome {
            claimed,
            persist_error,
        }
    }

    async fn persist(&self, doc: &ScheduleDocument) -> BotResult<()> {
        let value = serde_json::to_value(doc)
            .map_err(|e| BotError::Persistence(e.to_string()))?;
        self.backend.write_document(&value).await
    }
}

fn find_pending<'a>(
    records: &'a mut [ScheduleRecord],
    id: &str,
) -> BotResult<&'a mut ScheduleRecord> {
    let record = records
        .iter_mut()
        .find(|r| r.id == id)
        .ok_or_else(|| BotError::NotFound(id.to_string()))?;
    if record.status != Status::Pending {
        return Err(BotError::InvalidState(id.to_string()));
    }
    Ok(record)
}

fn preview_of(body: &str) -> String {
    if body.chars().count() <= PREVIEW_CHARS {
        return body.to_string();
    }
    let head: String = body.chars().take(PREVIEW_CHARS).collect();
    format!("{}…", head.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::persist::MemoryDocumentStore;
    use chrono::TimeZone;

    fn tz() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    fn at(h: u32, m: u32) -> DateTime<FixedOffset> {
        tz().with_ymd_and_hms(2026, 9, 1, h, m, 0).unwrap()
    }

    async fn empty_store() -> (Arc<MemoryDocumentStore>, ScheduleStore) {
        let backend = Arc::new(MemoryDocumentStore::new());
        let store = ScheduleStore::load(backend.clone()).await.unwrap();
        (backend, store)
    }

    #[tokio::test]
    async fn create_then_get_roundtrips() {
        let (_, store) = empty_store().await;
        let rec = store.create(at(18, 30), "hello love", at(8, 0)).await.unwrap();
        let got = store.get(&rec.id).await.unwrap();
        assert_eq!(got.status, Status::Pending);
        assert_eq!(got.body, "hello love");
        assert_eq!(got.fire_at, at(18, 30));
    }

    #[tokio::test]
    async fn create_rejects_empty_body_and_past_time() {
        let (_, store) = empty_store().await;
        assert!(matches!(
            store.create(at(18, 0), "   ", at(8, 0)).await,
            Err(BotError::Validation(_))
        ));
        assert!(matches!(
            store.create(at(7, 0), "hi", at(8, 0)).await,
            Err(BotError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn list_orders_by_time_then_creation() {
        let (_, store) = empty_store().await;
        let b = store.create(at(20, 0), "second slot", at(8, 0)).await.unwrap();
        let a = store.create(at(18, 0), "first slot", at(8, 0)).await.unwrap();
        let tie1 = store.create(at(21, 0), "tie one", at(8, 0)).await.unwrap();
        let tie2 = store.create(at(21, 0), "tie two", at(8, 0)).await.unwrap();

        let ids: Vec<String> = store
            .list(Some(Status::Pending))
            .await
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![a.id, b.id, tie1.id, tie2.id]);
    }

    #[tokio::test]
    async fn list_previews_are_truncated() {
        let (_, store) = empty_store().await;
        let long = "a".repeat(100);
        store.create(at(18, 0), &long, at(8, 0)).await.unwrap();
        let rows = store.list(None).await;
        assert!(rows[0].preview.chars().count() <= PREVIEW_CHARS + 1);
        assert!(rows[0].preview.ends_with('…'));
    }

    #[tokio::test]
    async fn mark_delivered_is_idempotent() {
        let (_, store) = empty_store().await;
        let rec = store.create(at(18, 0), "hi", at(8, 0)).await.unwrap();
        assert!(store.mark_delivered(&rec.id).await.unwrap());
        assert!(!store.mark_delivered(&rec.id).await.unwrap());
        assert_eq!(store.get(&rec.id).await.unwrap().status, Status::Delivered);
    }

    #[tokio::test]
    async fn claim_due_claims_each_record_once() {
        let (_, store) = empty_store().await;
        let due = store.create(at(9, 0), "due", at(8, 0)).await.unwrap();
        let later = store.create(at(23, 0), "later", at(8, 0)).await.unwrap();

        let first = store.claim_due(at(10, 0)).await;
        assert_eq!(first.claimed.len(), 1);
        assert_eq!(first.claimed[0].id, due.id);

        // An overlapping second scan must not re-claim.
        let second = store.claim_due(at(10, 0)).await;
        assert!(second.claimed.is_empty());
        assert_eq!(store.get(&later.id).await.unwrap().status, Status::Pending);
    }

    #[tokio::test]
    async fn claim_due_orders_same_tick_by_time_then_creation() {
        let (_, store) = empty_store().await;
        let b = store.create(at(9, 30), "b", at(8, 0)).await.unwrap();
        let a1 = store.create(at(9, 0), "a1", at(8, 0)).await.unwrap();
        let a2 = store.create(at(9, 0), "a2", at(8, 0)).await.unwrap();

        let out = store.claim_due(at(10, 0)).await;
        let ids: Vec<String> = out.claimed.into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![a1.id, a2.id, b.id]);
    }

    #[tokio::test]
    async fn edits_touch_only_the_edited_field() {
        let (_, store) = empty_store().await;
        let rec = store.create(at(18, 0), "original", at(8, 0)).await.unwrap();

        store.update_time(&rec.id, at(19, 0), at(8, 0)).await.unwrap();
        let after_time = store.get(&rec.id).await.unwrap();
        assert_eq!(after_time.body, "original");
        assert_eq!(after_time.fire_at, at(19, 0));
        assert_eq!(after_time.status, Status::Pending);

        store.update_body(&rec.id, "rewritten").await.unwrap();
        let after_body = store.get(&rec.id).await.unwrap();
        assert_eq!(after_body.fire_at, at(19, 0));
        assert_eq!(after_body.body, "rewritten");
    }

    #[tokio::test]
    async fn editing_a_delivered_record_is_invalid_state() {
        let (_, store) = empty_store().await;
        let rec = store.create(at(18, 0), "hi", at(8, 0)).await.unwrap();
        store.mark_delivered(&rec.id).await.unwrap();

        assert!(matches!(
            store.update_body(&rec.id, "new").await,
            Err(BotError::InvalidState(_))
        ));
        assert!(matches!(
            store.update_time(&rec.id, at(20, 0), at(8, 0)).await,
            Err(BotError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn delete_all_spares_delivered_records() {
        let (_, store) = empty_store().await;
        let done = store.create(at(9, 0), "done", at(8, 0)).await.unwrap();
        store.mark_delivered(&done.id).await.unwrap();
        store.create(at(18, 0), "p1", at(8, 0)).await.unwrap();
        store.create(at(19, 0), "p2", at(8, 0)).await.unwrap();

        assert_eq!(store.delete_all().await.unwrap(), 2);
        assert_eq!(store.get(&done.id).await.unwrap().status, Status::Delivered);
        assert!(store.list(Some(Status::Pending)).await.is_empty());
        // Nothing left to cancel: still a no-op, not an error.
        assert_eq!(store.delete_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_one_is_a_noop_for_unknown_or_settled_ids() {
        let (_, store) = empty_store().await;
        assert!(!store.delete_one("nope").await.unwrap());
        let rec = store.create(at(18, 0), "hi", at(8, 0)).await.unwrap();
        store.mark_delivered(&rec.id).await.unwrap();
        assert!(!store.delete_one(&rec.id).await.unwrap());
    }

    #[tokio::test]
    async fn survives_reload_from_backend() {
        let backend = Arc::new(MemoryDocumentStore::new());
        let store = ScheduleStore::load(backend.clone()).await.unwrap();
        let rec = store.create(at(18, 0), "persist me", at(8, 0)).await.unwrap();

        let reloaded = ScheduleStore::load(backend).await.unwrap();
        let got = reloaded.get(&rec.id).await.unwrap();
        assert_eq!(got.body, "persist me");
        assert_eq!(got.status, Status::Pending);
        // The seq counter keeps advancing after a restart.
        let next = reloaded.create(at(19, 0), "next", at(8, 0)).await.unwrap();
        assert!(next.seq > rec.seq);
    }

    #[tokio::test]
    async fn persist_failure_is_surfaced_without_rollback() {
        let (backend, store) = empty_store().await;
        backend.set_fail_writes(true);
        let err = store.create(at(18, 0), "hi", at(8, 0)).await.unwrap_err();
        assert!(matches!(err, BotError::Persistence(_)));
        // The record stays in memory; consistency risk is documented.
        assert_eq!(store.list(Some(Status::Pending)).await.len(), 1);
    }
}
