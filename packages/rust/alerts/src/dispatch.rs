//! Exactly-once delivery on top of the alert ledger.

use std::sync::Arc;

use chrono::Utc;
use radar_shared::{
    AlertEvent, AlertRecordOutcome, ChangeKind, CompanyId, DispatchOutcome, Fingerprint,
    RadarError, Result,
};
use radar_storage::{PendingAlert, Storage};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::decide::RenderedMessage;
use crate::transport::NotificationTransport;

/// What happened to one dispatch request.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Sent now and recorded in the ledger.
    Sent(AlertEvent),
    /// An earlier dispatch already delivered this alert.
    AlreadySent,
    /// The transport refused the message. The alert stays pending.
    Failed(AlertEvent),
}

/// Sends alerts so that each (company, fingerprint) is notified at most once.
///
/// The per-company lock from [`Storage::lock_identity`] is held from the
/// ledger check to the ledger write. A transport failure is reported as
/// [`Delivery::Failed`] and leaves the alert pending for the next run.
pub struct AlertDispatcher {
    transport: Arc<dyn NotificationTransport>,
    recipient: String,
}

impl AlertDispatcher {
    pub fn new(transport: Arc<dyn NotificationTransport>, recipient: impl Into<String>) -> Self {
        Self {
            transport,
            recipient: recipient.into(),
        }
    }

    #[instrument(skip_all, fields(company = %company_id, kind = %kind))]
    pub async fn dispatch(
        &self,
        storage: &Storage,
        company_id: &CompanyId,
        fingerprint: &Fingerprint,
        kind: ChangeKind,
        message: &RenderedMessage,
    ) -> Result<Delivery> {
        let _guard = storage.lock_identity(company_id).await;

        if storage.alert_sent(company_id, fingerprint).await? {
            return Ok(Delivery::AlreadySent);
        }

        storage
            .mark_alert_pending(company_id, fingerprint, kind, &message.subject, &message.body)
            .await?;

        self.deliver(storage, company_id, fingerprint, kind, message)
            .await
    }

    /// Resend an alert that an earlier run could not deliver.
    #[instrument(skip_all, fields(company = %pending.company_id, attempts = pending.attempts))]
    pub async fn retry(&self, storage: &Storage, pending: &PendingAlert) -> Result<Delivery> {
        let _guard = storage.lock_identity(&pending.company_id).await;

        if storage
            .alert_sent(&pending.company_id, &pending.fingerprint)
            .await?
        {
            return Ok(Delivery::AlreadySent);
        }

        let message = RenderedMessage {
            subject: pending.subject.clone(),
            body: pending.body.clone(),
        };
        self.deliver(
            storage,
            &pending.company_id,
            &pending.fingerprint,
            pending.kind,
            &message,
        )
        .await
    }

    /// Send and record. Caller holds the identity lock.
    async fn deliver(
        &self,
        storage: &Storage,
        company_id: &CompanyId,
        fingerprint: &Fingerprint,
        kind: ChangeKind,
        message: &RenderedMessage,
    ) -> Result<Delivery> {
        let sent = self
            .transport
            .send(&self.recipient, &message.subject, &message.body)
            .await;

        let mut event = AlertEvent {
            id: Uuid::now_v7().to_string(),
            company_id: company_id.clone(),
            fingerprint: fingerprint.clone(),
            kind,
            subject: message.subject.clone(),
            body: message.body.clone(),
            dispatched_at: Utc::now(),
            outcome: DispatchOutcome::Sent,
        };

        if let Err(e) = sent {
            let reason = match e {
                RadarError::DispatchFailed(reason) => reason,
                other => other.to_string(),
            };
            warn!(error = %reason, "alert delivery failed, will retry next run");
            storage
                .mark_alert_failed(company_id, fingerprint, &reason)
                .await?;
            event.outcome = DispatchOutcome::Failed { reason };
            return Ok(Delivery::Failed(event));
        }

        match storage.record_alert(company_id, fingerprint, &event).await? {
            AlertRecordOutcome::Recorded => {
                info!(subject = %event.subject, "alert sent");
                Ok(Delivery::Sent(event))
            }
            AlertRecordOutcome::AlreadySent => {
                warn!("alert was recorded by another writer during delivery");
                Ok(Delivery::AlreadySent)
            }
        }
    }
}
