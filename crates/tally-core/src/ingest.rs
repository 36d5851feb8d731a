//! Ingestion lifecycle tracking for raw inbound payloads
//!
//! Drives one payload from arrival through classification to a terminal
//! disposition:
//!
//! ```text
//! pending -> processing -> processed | failed | ignored
//! failed  -> pending (explicit retry)
//! ```
//!
//! Every transition appends to the payload's event log; the log is the
//! audit trail and is never truncated or rewritten. Classification itself
//! is an external collaborator: `process_with` only records that it ran and
//! what it linked.

use chrono::Utc;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::db::{Database, PayloadInsert};
use crate::error::{Error, Result};
use crate::models::{
    EventLevel, EventLogEntry, FeedbackEntry, FeedbackKind, IngestEvent, NewRawPayload,
    PayloadStatus, RawPayload,
};

/// Derive a stable message identifier for payloads that arrive without a
/// natural key (manual uploads). Same source, sender, and body always hash
/// to the same id, so re-uploads dedupe like any other message.
pub fn derive_message_id(source: &str, sender: Option<&str>, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    if let Some(sender) = sender {
        hasher.update(sender.as_bytes());
    }
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}

fn event(level: EventLevel, message: impl Into<String>) -> EventLogEntry {
    EventLogEntry {
        at: Utc::now(),
        level,
        message: message.into(),
        extra: None,
    }
}

/// Tracks the processing lifecycle of raw inbound payloads
pub struct IngestTracker<'a> {
    db: &'a Database,
}

impl<'a> IngestTracker<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Persist an inbound payload. Idempotent on the message id: the same
    /// message arriving twice yields the existing row.
    pub fn ingest(&self, payload: &NewRawPayload) -> Result<PayloadInsert> {
        if payload.message_id.trim().is_empty() {
            return Err(Error::InvalidData(
                "payload message_id must not be empty".to_string(),
            ));
        }

        let inserted = self.db.insert_payload(payload)?;
        match &inserted {
            PayloadInsert::Inserted(id) => {
                debug!("Ingested payload {} ({})", id, payload.message_id)
            }
            PayloadInsert::Existing(id) => {
                debug!(
                    "Payload {} already ingested as {}, skipping",
                    payload.message_id, id
                )
            }
        }
        Ok(inserted)
    }

    /// Claim a pending payload for processing.
    ///
    /// Conditional on the row still being `pending`, so concurrent workers
    /// cannot both win the same payload. Returns false when the claim was
    /// lost. Claiming increments the attempt counter and stamps the
    /// attempt time.
    pub fn claim(&self, payload_id: i64) -> Result<bool> {
        let payload = self.db.get_payload(payload_id)?;
        let entry = EventLogEntry {
            at: Utc::now(),
            level: EventLevel::Info,
            message: "processing started".to_string(),
            extra: Some(json!({ "attempt": payload.attempts + 1 })),
        };
        self.db.claim_payload(payload_id, &entry)
    }

    /// Move a pending payload to `processing`.
    ///
    /// Like `claim`, but losing the transition is an error; use this when
    /// the caller knows it is the only worker.
    pub fn mark_processing(&self, payload_id: i64) -> Result<()> {
        let payload = self.db.get_payload(payload_id)?;
        if !payload.status.can_transition_to(PayloadStatus::Processing) {
            return Err(Error::InvalidTransition {
                from: payload.status,
                to: PayloadStatus::Processing,
            });
        }
        if !self.claim(payload_id)? {
            return Err(Error::InvalidTransition {
                from: self.db.get_payload(payload_id)?.status,
                to: PayloadStatus::Processing,
            });
        }
        Ok(())
    }

    /// Settle a payload as `processed`, linking the records the
    /// classification collaborator produced and clearing any stored error.
    ///
    /// Linked ids are loose references, appended and deduplicated; they are
    /// kept even if the records are deleted later.
    pub fn mark_processed(&self, payload_id: i64, linked_record_ids: &[i64]) -> Result<()> {
        let mut payload = self.load_for_transition(payload_id, PayloadStatus::Processed)?;

        for record_id in linked_record_ids {
            if !payload.linked_record_ids.contains(record_id) {
                payload.linked_record_ids.push(*record_id);
            }
        }
        payload.status = PayloadStatus::Processed;
        payload.last_error = None;
        payload.event_log.push(EventLogEntry {
            at: Utc::now(),
            level: EventLevel::Info,
            message: format!(
                "processing completed, {} record(s) linked",
                linked_record_ids.len()
            ),
            extra: Some(json!({ "linked_record_ids": linked_record_ids })),
        });

        self.db.save_payload_state(&payload)?;
        info!(
            "Payload {} processed, {} record(s) linked",
            payload_id,
            payload.linked_record_ids.len()
        );
        Ok(())
    }

    /// Settle a processing attempt as `failed`, storing the error text.
    /// Linked record ids accumulated so far are kept.
    pub fn mark_failed(&self, payload_id: i64, error_text: &str) -> Result<()> {
        let mut payload = self.load_for_transition(payload_id, PayloadStatus::Failed)?;

        payload.status = PayloadStatus::Failed;
        payload.last_error = Some(error_text.to_string());
        payload.event_log.push(event(
            EventLevel::Error,
            format!("processing failed: {}", error_text),
        ));

        self.db.save_payload_state(&payload)
    }

    /// Dispose of a payload as `ignored` without linking any record
    pub fn mark_ignored(&self, payload_id: i64, reason: &str) -> Result<()> {
        let mut payload = self.load_for_transition(payload_id, PayloadStatus::Ignored)?;

        payload.status = PayloadStatus::Ignored;
        payload
            .event_log
            .push(event(EventLevel::Info, format!("ignored: {}", reason)));

        self.db.save_payload_state(&payload)
    }

    /// Reset a failed payload to `pending` for another attempt. Clears the
    /// stored error; the attempt counter is only incremented when
    /// processing is re-entered.
    pub fn retry(&self, payload_id: i64) -> Result<()> {
        let mut payload = self.load_for_transition(payload_id, PayloadStatus::Pending)?;

        payload.status = PayloadStatus::Pending;
        payload.last_error = None;
        payload
            .event_log
            .push(event(EventLevel::Info, "reset to pending for retry"));

        self.db.save_payload_state(&payload)
    }

    /// Claim a payload and run the classification collaborator over it.
    ///
    /// The collaborator returns the record ids it created, or an error
    /// message. Either way the outcome is captured as payload state
    /// (`processed`/`failed`) and never raised to the caller, so one bad
    /// payload cannot take down an ingestion batch. Returns the payload's
    /// resulting status; a lost claim is a no-op returning the current
    /// status.
    pub fn process_with<F>(&self, payload_id: i64, classify: F) -> Result<PayloadStatus>
    where
        F: FnOnce(&RawPayload) -> std::result::Result<Vec<i64>, String>,
    {
        if !self.claim(payload_id)? {
            return Ok(self.db.get_payload(payload_id)?.status);
        }

        let payload = self.db.get_payload(payload_id)?;
        match classify(&payload) {
            Ok(linked) => {
                self.mark_processed(payload_id, &linked)?;
                Ok(PayloadStatus::Processed)
            }
            Err(message) => {
                self.mark_failed(payload_id, &message)?;
                Ok(PayloadStatus::Failed)
            }
        }
    }

    /// Append a fetch/upload provenance event to the ingest log. Allowed in
    /// any status; provenance is orthogonal to the lifecycle.
    pub fn append_ingest_event(
        &self,
        payload_id: i64,
        action: &str,
        detail: Option<String>,
    ) -> Result<()> {
        let mut payload = self.db.get_payload(payload_id)?;
        payload.ingest_log.push(IngestEvent {
            at: Utc::now(),
            action: action.to_string(),
            detail,
        });
        self.db.save_payload_state(&payload)
    }

    /// Append a user-feedback entry. Allowed in any status; feedback is
    /// post-hoc and never rewrites history.
    pub fn record_feedback(
        &self,
        payload_id: i64,
        kind: FeedbackKind,
        note: Option<String>,
    ) -> Result<()> {
        let mut payload = self.db.get_payload(payload_id)?;
        payload.feedback_log.push(FeedbackEntry {
            at: Utc::now(),
            kind,
            note,
        });
        self.db.save_payload_state(&payload)
    }

    fn load_for_transition(&self, payload_id: i64, to: PayloadStatus) -> Result<RawPayload> {
        let payload = self.db.get_payload(payload_id)?;
        if !payload.status.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: payload.status,
                to,
            });
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TrainingLabel;

    fn new_payload(message_id: &str) -> NewRawPayload {
        NewRawPayload {
            user_id: 1,
            message_id: message_id.to_string(),
            source: "email".to_string(),
            sender: Some("orders@shop.example".to_string()),
            subject: Some("Your order".to_string()),
            body: "Order total EUR 42.50".to_string(),
            raw_blob: None,
            received_at: Utc::now(),
        }
    }

    fn ingest_one(db: &Database, message_id: &str) -> i64 {
        IngestTracker::new(db)
            .ingest(&new_payload(message_id))
            .unwrap()
            .id()
    }

    #[test]
    fn test_failed_attempt_and_retry() {
        let db = Database::in_memory().unwrap();
        let tracker = IngestTracker::new(&db);
        let id = ingest_one(&db, "msg-1");

        tracker.mark_processing(id).unwrap();
        tracker.mark_failed(id, "timeout").unwrap();

        let failed = db.get_payload(id).unwrap();
        assert_eq!(failed.status, PayloadStatus::Failed);
        assert_eq!(failed.last_error.as_deref(), Some("timeout"));

        tracker.retry(id).unwrap();

        let retried = db.get_payload(id).unwrap();
        assert_eq!(retried.status, PayloadStatus::Pending);
        assert!(retried.last_error.is_none());
        // processing + failed + retry
        assert_eq!(retried.event_log.len(), 3);
        // Attempts only increment when processing is re-entered
        assert_eq!(retried.attempts, 1);

        tracker.mark_processing(id).unwrap();
        assert_eq!(db.get_payload(id).unwrap().attempts, 2);
    }

    #[test]
    fn test_processed_links_and_clears_error() {
        let db = Database::in_memory().unwrap();
        let tracker = IngestTracker::new(&db);
        let id = ingest_one(&db, "msg-1");

        tracker.mark_processing(id).unwrap();
        tracker.mark_failed(id, "parse error").unwrap();
        tracker.retry(id).unwrap();
        tracker.mark_processing(id).unwrap();
        tracker.mark_processed(id, &[7, 7, 9]).unwrap();

        let payload = db.get_payload(id).unwrap();
        assert_eq!(payload.status, PayloadStatus::Processed);
        assert!(payload.last_error.is_none());
        // Deduplicated
        assert_eq!(payload.linked_record_ids, vec![7, 9]);
    }

    #[test]
    fn test_terminal_states_reject_transitions() {
        let db = Database::in_memory().unwrap();
        let tracker = IngestTracker::new(&db);

        let done = ingest_one(&db, "msg-done");
        tracker.mark_processing(done).unwrap();
        tracker.mark_processed(done, &[1]).unwrap();
        assert!(matches!(
            tracker.mark_processing(done),
            Err(Error::InvalidTransition { .. })
        ));
        assert!(matches!(
            tracker.retry(done),
            Err(Error::InvalidTransition { .. })
        ));

        let spam = ingest_one(&db, "msg-spam");
        tracker.mark_ignored(spam, "newsletter").unwrap();
        assert!(matches!(
            tracker.mark_processing(spam),
            Err(Error::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_retry_requires_failed() {
        let db = Database::in_memory().unwrap();
        let tracker = IngestTracker::new(&db);
        let id = ingest_one(&db, "msg-1");

        assert!(matches!(
            tracker.retry(id),
            Err(Error::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_event_log_only_grows() {
        let db = Database::in_memory().unwrap();
        let tracker = IngestTracker::new(&db);
        let id = ingest_one(&db, "msg-1");

        let mut last_len = db.get_payload(id).unwrap().event_log.len();
        tracker.mark_processing(id).unwrap();
        for step in 0..3 {
            match step {
                0 => tracker.mark_failed(id, "boom").unwrap(),
                1 => tracker.retry(id).unwrap(),
                _ => tracker.mark_processing(id).unwrap(),
            }
            let len = db.get_payload(id).unwrap().event_log.len();
            assert!(len > last_len);
            last_len = len;
        }
    }

    #[test]
    fn test_process_with_captures_collaborator_failure() {
        let db = Database::in_memory().unwrap();
        let tracker = IngestTracker::new(&db);
        let id = ingest_one(&db, "msg-1");

        // The collaborator blowing up never reaches the caller as an error
        let status = tracker
            .process_with(id, |_| Err("model unavailable".to_string()))
            .unwrap();
        assert_eq!(status, PayloadStatus::Failed);
        assert_eq!(
            db.get_payload(id).unwrap().last_error.as_deref(),
            Some("model unavailable")
        );
    }

    #[test]
    fn test_process_with_success_links_records() {
        let db = Database::in_memory().unwrap();
        let tracker = IngestTracker::new(&db);
        let id = ingest_one(&db, "msg-1");

        let status = tracker.process_with(id, |_| Ok(vec![42])).unwrap();
        assert_eq!(status, PayloadStatus::Processed);

        let payload = db.get_payload(id).unwrap();
        assert_eq!(payload.linked_record_ids, vec![42]);
        assert_eq!(payload.attempts, 1);
    }

    #[test]
    fn test_process_with_on_settled_payload_is_a_no_op() {
        let db = Database::in_memory().unwrap();
        let tracker = IngestTracker::new(&db);
        let id = ingest_one(&db, "msg-1");

        tracker.process_with(id, |_| Ok(vec![1])).unwrap();
        let status = tracker
            .process_with(id, |_| panic!("must not run"))
            .unwrap();
        assert_eq!(status, PayloadStatus::Processed);
    }

    #[test]
    fn test_training_labels() {
        let db = Database::in_memory().unwrap();
        let tracker = IngestTracker::new(&db);

        // Linked record: transaction
        let linked = ingest_one(&db, "msg-linked");
        tracker.process_with(linked, |_| Ok(vec![5])).unwrap();
        assert_eq!(
            db.get_payload(linked).unwrap().training_label(),
            Some(TrainingLabel::Transaction)
        );

        // Spam feedback: non-transaction
        let spam = ingest_one(&db, "msg-spam");
        tracker.mark_ignored(spam, "spam").unwrap();
        tracker
            .record_feedback(spam, FeedbackKind::Spam, None)
            .unwrap();
        assert_eq!(
            db.get_payload(spam).unwrap().training_label(),
            Some(TrainingLabel::NonTransaction)
        );

        // Correction alone is no signal either way
        let unclear = ingest_one(&db, "msg-unclear");
        tracker
            .record_feedback(unclear, FeedbackKind::Correction, Some("amount".to_string()))
            .unwrap();
        assert_eq!(db.get_payload(unclear).unwrap().training_label(), None);
    }

    #[test]
    fn test_ingest_log_is_separate_and_appendable() {
        let db = Database::in_memory().unwrap();
        let tracker = IngestTracker::new(&db);
        let id = ingest_one(&db, "msg-1");

        tracker
            .append_ingest_event(id, "fetched", Some("imap poll".to_string()))
            .unwrap();

        let payload = db.get_payload(id).unwrap();
        assert_eq!(payload.ingest_log.len(), 2);
        assert!(payload.event_log.is_empty());
    }

    #[test]
    fn test_empty_message_id_rejected() {
        let db = Database::in_memory().unwrap();
        let tracker = IngestTracker::new(&db);

        let mut payload = new_payload("  ");
        payload.message_id = "  ".to_string();
        assert!(matches!(
            tracker.ingest(&payload),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn test_derive_message_id_is_stable() {
        let a = derive_message_id("manual", None, "lunch 12.50");
        let b = derive_message_id("manual", None, "lunch 12.50");
        let c = derive_message_id("manual", None, "lunch 13.50");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
