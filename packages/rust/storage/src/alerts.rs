//! Alert ledger operations.
//!
//! One row per (company, fingerprint). Status moves `pending` → `sent`, or
//! `pending` → `failed` → `sent` across runs; `sent` is terminal.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use libsql::params;
use radar_shared::{
    AlertEvent, AlertRecordOutcome, ChangeKind, CompanyId, DispatchOutcome, Fingerprint,
    RadarError, Result,
};
use uuid::Uuid;

use crate::{Storage, db_err, parse_timestamp, timestamp};

/// An alert decided for the current fingerprint but not yet delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAlert {
    pub company_id: CompanyId,
    pub fingerprint: Fingerprint,
    pub kind: ChangeKind,
    pub subject: String,
    pub body: String,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl Storage {
    /// Atomically mark the alert for `(id, fingerprint)` as sent.
    ///
    /// Returns [`AlertRecordOutcome::AlreadySent`] when another writer got
    /// there first; the ledger is left untouched in that case.
    pub async fn record_alert(
        &self,
        id: &CompanyId,
        fingerprint: &Fingerprint,
        event: &AlertEvent,
    ) -> Result<AlertRecordOutcome> {
        self.check_writable()?;
        let at = timestamp(event.dispatched_at);

        let changed = self
            .conn
            .execute(
                "INSERT INTO alerts (id, company_id, fingerprint, kind, subject, body, status,
                     attempts, created_at, dispatched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'sent', 1, ?7, ?7)
                 ON CONFLICT(company_id, fingerprint) DO UPDATE SET
                     id = excluded.id,
                     kind = excluded.kind,
                     subject = excluded.subject,
                     body = excluded.body,
                     status = 'sent',
                     attempts = alerts.attempts + 1,
                     last_error = NULL,
                     dispatched_at = excluded.dispatched_at
                 WHERE alerts.status != 'sent'",
                params![
                    event.id.as_str(),
                    id.as_str(),
                    fingerprint.as_str(),
                    event.kind.as_str(),
                    event.subject.as_str(),
                    event.body.as_str(),
                    at.as_str()
                ],
            )
            .await
            .map_err(db_err)?;

        if changed == 0 {
            tracing::debug!(company = %id, fingerprint = fingerprint.short(), "alert already sent");
            Ok(AlertRecordOutcome::AlreadySent)
        } else {
            Ok(AlertRecordOutcome::Recorded)
        }
    }

    /// Whether an alert for `(id, fingerprint)` has been delivered.
    pub async fn alert_sent(&self, id: &CompanyId, fingerprint: &Fingerprint) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM alerts
                 WHERE company_id = ?1 AND fingerprint = ?2 AND status = 'sent'",
                params![id.as_str(), fingerprint.as_str()],
            )
            .await
            .map_err(db_err)?;
        Ok(rows.next().await.map_err(db_err)?.is_some())
    }

    /// Persist the decision to alert before sending, so a crash or a failed
    /// transport leaves a retryable row behind. A `sent` row is never touched.
    pub async fn mark_alert_pending(
        &self,
        id: &CompanyId,
        fingerprint: &Fingerprint,
        kind: ChangeKind,
        subject: &str,
        body: &str,
    ) -> Result<()> {
        self.check_writable()?;
        let now = timestamp(Utc::now());
        let row_id = Uuid::now_v7().to_string();

        self.conn
            .execute(
                "INSERT INTO alerts (id, company_id, fingerprint, kind, subject, body, status,
                     attempts, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', 0, ?7)
                 ON CONFLICT(company_id, fingerprint) DO UPDATE SET
                     kind = excluded.kind,
                     subject = excluded.subject,
                     body = excluded.body
                 WHERE alerts.status != 'sent'",
                params![
                    row_id.as_str(),
                    id.as_str(),
                    fingerprint.as_str(),
                    kind.as_str(),
                    subject,
                    body,
                    now.as_str()
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Record a failed delivery attempt. The row stays retryable.
    pub async fn mark_alert_failed(
        &self,
        id: &CompanyId,
        fingerprint: &Fingerprint,
        reason: &str,
    ) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "UPDATE alerts SET status = 'failed', attempts = attempts + 1, last_error = ?3
                 WHERE company_id = ?1 AND fingerprint = ?2 AND status != 'sent'",
                params![id.as_str(), fingerprint.as_str(), reason],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// The undelivered alert at the company's current fingerprint, if any.
    /// Alerts left behind at superseded fingerprints are not returned.
    pub async fn pending_alert(&self, id: &CompanyId) -> Result<Option<PendingAlert>> {
        let mut rows = self
            .conn
            .query(
                "SELECT a.fingerprint, a.kind, a.subject, a.body, a.attempts, a.last_error
                 FROM alerts a
                 JOIN companies c ON c.id = a.company_id AND c.fingerprint = a.fingerprint
                 WHERE a.company_id = ?1 AND a.status != 'sent'",
                params![id.as_str()],
            )
            .await
            .map_err(db_err)?;

        let Some(row) = rows.next().await.map_err(db_err)? else {
            return Ok(None);
        };
        let kind: String = row.get(1).map_err(db_err)?;

        Ok(Some(PendingAlert {
            company_id: id.clone(),
            fingerprint: Fingerprint::from_hex(row.get::<String>(0).map_err(db_err)?),
            kind: parse_kind(&kind)?,
            subject: row.get::<String>(2).map_err(db_err)?,
            body: row.get::<String>(3).map_err(db_err)?,
            attempts: row.get::<i64>(4).unwrap_or(0) as u32,
            last_error: row.get::<String>(5).ok(),
        }))
    }

    /// Pending kinds of all companies, keyed by company.
    pub(crate) async fn pending_kinds(&self) -> Result<HashMap<CompanyId, ChangeKind>> {
        let mut rows = self
            .conn
            .query(
                "SELECT a.company_id, a.kind
                 FROM alerts a
                 JOIN companies c ON c.id = a.company_id AND c.fingerprint = a.fingerprint
                 WHERE a.status != 'sent'",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut pending = HashMap::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let id = CompanyId::new(row.get::<String>(0).map_err(db_err)?)?;
            let kind: String = row.get(1).map_err(db_err)?;
            pending.insert(id, parse_kind(&kind)?);
        }
        Ok(pending)
    }

    /// Delivered alerts, oldest first, grouped by company. `only` narrows the
    /// query to one company.
    pub(crate) async fn sent_alerts(
        &self,
        only: Option<&CompanyId>,
    ) -> Result<HashMap<CompanyId, Vec<AlertEvent>>> {
        let sql = "SELECT id, company_id, fingerprint, kind, subject, body, dispatched_at
                   FROM alerts
                   WHERE status = 'sent' AND (?1 IS NULL OR company_id = ?1)
                   ORDER BY dispatched_at, id";
        let mut rows = self
            .conn
            .query(sql, params![only.map(CompanyId::as_str)])
            .await
            .map_err(db_err)?;

        let mut grouped: HashMap<CompanyId, Vec<AlertEvent>> = HashMap::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let company_id = CompanyId::new(row.get::<String>(1).map_err(db_err)?)?;
            let kind: String = row.get(3).map_err(db_err)?;
            let dispatched_at: DateTime<Utc> = match row.get::<String>(6) {
                Ok(s) => parse_timestamp(&s)?,
                Err(_) => Utc::now(),
            };

            grouped
                .entry(company_id.clone())
                .or_default()
                .push(AlertEvent {
                    id: row.get::<String>(0).map_err(db_err)?,
                    company_id,
                    fingerprint: Fingerprint::from_hex(row.get::<String>(2).map_err(db_err)?),
                    kind: parse_kind(&kind)?,
                    subject: row.get::<String>(4).map_err(db_err)?,
                    body: row.get::<String>(5).map_err(db_err)?,
                    dispatched_at,
                    outcome: DispatchOutcome::Sent,
                });
        }
        Ok(grouped)
    }
}

fn parse_kind(kind: &str) -> Result<ChangeKind> {
    ChangeKind::parse(kind)
        .ok_or_else(|| RadarError::Storage(format!("unknown alert kind '{kind}' in store")))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::tests::{test_storage, update};
    use radar_shared::MaturityTier;

    fn event(id: &CompanyId, fingerprint: &Fingerprint) -> AlertEvent {
        AlertEvent {
            id: Uuid::now_v7().to_string(),
            company_id: id.clone(),
            fingerprint: fingerprint.clone(),
            kind: ChangeKind::New,
            subject: "New: acme GmbH".into(),
            body: "body".into(),
            dispatched_at: Utc::now(),
            outcome: DispatchOutcome::Sent,
        }
    }

    #[tokio::test]
    async fn record_alert_is_check_and_set() {
        let storage = test_storage().await;
        let id = CompanyId::new("acme").unwrap();
        let fp = Fingerprint::of_text("v1");
        storage
            .upsert(update("acme", "v1", MaturityTier::ProductionUse))
            .await
            .unwrap();

        assert!(!storage.alert_sent(&id, &fp).await.unwrap());
        let first = storage.record_alert(&id, &fp, &event(&id, &fp)).await.unwrap();
        assert_eq!(first, AlertRecordOutcome::Recorded);
        assert!(storage.alert_sent(&id, &fp).await.unwrap());

        let second = storage.record_alert(&id, &fp, &event(&id, &fp)).await.unwrap();
        assert_eq!(second, AlertRecordOutcome::AlreadySent);

        let record = storage.get(&id).await.unwrap().unwrap();
        assert_eq!(record.alerts.len(), 1);
        assert_eq!(record.pending_alert, None);
    }

    #[tokio::test]
    async fn concurrent_record_alert_sends_once() {
        let storage = Arc::new(test_storage().await);
        let id = CompanyId::new("acme").unwrap();
        let fp = Fingerprint::of_text("v1");
        storage
            .upsert(update("acme", "v1", MaturityTier::ProductionUse))
            .await
            .unwrap();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let storage = Arc::clone(&storage);
                let id = id.clone();
                let fp = fp.clone();
                tokio::spawn(async move {
                    let ev = event(&id, &fp);
                    storage.record_alert(&id, &fp, &ev).await
                })
            })
            .collect();

        let recorded = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .filter(|o| *o == AlertRecordOutcome::Recorded)
            .count();
        assert_eq!(recorded, 1);
    }

    #[tokio::test]
    async fn failed_alert_stays_pending_until_sent() {
        let storage = test_storage().await;
        let id = CompanyId::new("acme").unwrap();
        let fp = Fingerprint::of_text("v1");
        storage
            .upsert(update("acme", "v1", MaturityTier::ProductionUse))
            .await
            .unwrap();

        storage
            .mark_alert_pending(&id, &fp, ChangeKind::New, "subject", "body")
            .await
            .unwrap();
        storage
            .mark_alert_failed(&id, &fp, "connection refused")
            .await
            .unwrap();

        let pending = storage.pending_alert(&id).await.unwrap().expect("pending");
        assert_eq!(pending.kind, ChangeKind::New);
        assert_eq!(pending.attempts, 1);
        assert_eq!(pending.last_error.as_deref(), Some("connection refused"));
        assert_eq!(pending.subject, "subject");

        let record = storage.get(&id).await.unwrap().unwrap();
        assert_eq!(record.pending_alert, Some(ChangeKind::New));
        assert!(record.alerts.is_empty());

        storage.record_alert(&id, &fp, &event(&id, &fp)).await.unwrap();
        assert!(storage.pending_alert(&id).await.unwrap().is_none());

        // a sent row is never reopened
        storage
            .mark_alert_pending(&id, &fp, ChangeKind::Reanalyzed, "s", "b")
            .await
            .unwrap();
        storage.mark_alert_failed(&id, &fp, "late").await.unwrap();
        assert!(storage.alert_sent(&id, &fp).await.unwrap());
        assert!(storage.pending_alert(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn superseded_pending_alert_is_not_returned() {
        let storage = test_storage().await;
        let id = CompanyId::new("acme").unwrap();
        storage
            .upsert(update("acme", "v1", MaturityTier::ProductionUse))
            .await
            .unwrap();
        storage
            .mark_alert_pending(&id, &Fingerprint::of_text("v1"), ChangeKind::New, "s", "b")
            .await
            .unwrap();

        storage
            .upsert(update("acme", "v2", MaturityTier::ProductionUse))
            .await
            .unwrap();
        assert!(storage.pending_alert(&id).await.unwrap().is_none());
        assert_eq!(storage.stats().await.unwrap().alerts_pending, 1);
    }
}
