//! Raw payload operations
//!
//! Storage for the ingestion inbox. Rows are insert-only; the lifecycle
//! tracker mutates status and the append-only logs through
//! `save_payload_state` with last-writer-wins semantics per row.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::{fmt_datetime, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{EventLogEntry, IngestEvent, NewRawPayload, PayloadStatus, RawPayload};

/// Result of inserting a payload
#[derive(Debug, Clone)]
pub enum PayloadInsert {
    /// Payload was inserted, contains the new payload id
    Inserted(i64),
    /// The message id was already ingested, contains the existing payload id
    Existing(i64),
}

impl PayloadInsert {
    pub fn id(&self) -> i64 {
        match self {
            Self::Inserted(id) | Self::Existing(id) => *id,
        }
    }
}

const PAYLOAD_COLUMNS: &str = "id, user_id, message_id, source, sender, subject, body, raw_blob, \
     received_at, status, attempts, last_attempt_at, last_error, event_log, ingest_log, \
     linked_record_ids, feedback_log, created_at, updated_at";

/// Map one `raw_payloads` row. Column order must match PAYLOAD_COLUMNS.
fn payload_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawPayload> {
    let received_at_str: String = row.get(8)?;
    let status_str: String = row.get(9)?;
    let last_attempt_at_str: Option<String> = row.get(11)?;
    let event_log_json: String = row.get(13)?;
    let ingest_log_json: String = row.get(14)?;
    let linked_ids_json: String = row.get(15)?;
    let feedback_log_json: String = row.get(16)?;
    let created_at_str: String = row.get(17)?;
    let updated_at_str: String = row.get(18)?;

    Ok(RawPayload {
        id: row.get(0)?,
        user_id: row.get(1)?,
        message_id: row.get(2)?,
        source: row.get(3)?,
        sender: row.get(4)?,
        subject: row.get(5)?,
        body: row.get(6)?,
        raw_blob: row.get(7)?,
        received_at: parse_datetime(&received_at_str),
        status: status_str.parse().unwrap_or_default(),
        attempts: row.get(10)?,
        last_attempt_at: last_attempt_at_str.map(|s| parse_datetime(&s)),
        last_error: row.get(12)?,
        event_log: serde_json::from_str(&event_log_json).unwrap_or_default(),
        ingest_log: serde_json::from_str(&ingest_log_json).unwrap_or_default(),
        linked_record_ids: serde_json::from_str(&linked_ids_json).unwrap_or_default(),
        feedback_log: serde_json::from_str(&feedback_log_json).unwrap_or_default(),
        created_at: parse_datetime(&created_at_str),
        updated_at: parse_datetime(&updated_at_str),
    })
}

impl Database {
    /// Insert a payload, keyed on its message id.
    ///
    /// Re-ingesting a message id that already exists is a no-op returning
    /// the existing row; the unique natural key is what prevents
    /// double-ingestion of the same inbound message.
    pub fn insert_payload(&self, payload: &NewRawPayload) -> Result<PayloadInsert> {
        let conn = self.conn()?;

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM raw_payloads WHERE message_id = ?",
                params![payload.message_id],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(existing_id) = existing {
            return Ok(PayloadInsert::Existing(existing_id));
        }

        // Arrival provenance goes to the ingest log; the event log records
        // only lifecycle transitions
        let initial_ingest_log = vec![IngestEvent {
            at: Utc::now(),
            action: "received".to_string(),
            detail: Some(format!("via {}", payload.source)),
        }];

        conn.execute(
            r#"
            INSERT INTO raw_payloads
                (user_id, message_id, source, sender, subject, body, raw_blob,
                 received_at, ingest_log)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                payload.user_id,
                payload.message_id,
                payload.source,
                payload.sender,
                payload.subject,
                payload.body,
                payload.raw_blob,
                fmt_datetime(payload.received_at),
                serde_json::to_string(&initial_ingest_log)?,
            ],
        )?;

        Ok(PayloadInsert::Inserted(conn.last_insert_rowid()))
    }

    /// Get a payload by id
    pub fn get_payload(&self, id: i64) -> Result<RawPayload> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM raw_payloads WHERE id = ?", PAYLOAD_COLUMNS);
        conn.query_row(&sql, params![id], payload_from_row)
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("payload {}", id)))
    }

    /// Get a payload by its message id
    pub fn get_payload_by_message_id(&self, message_id: &str) -> Result<Option<RawPayload>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM raw_payloads WHERE message_id = ?",
            PAYLOAD_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![message_id], payload_from_row)
            .optional()?)
    }

    /// List a user's payloads, newest arrivals first, optionally filtered
    /// by status
    pub fn list_payloads(
        &self,
        user_id: i64,
        status: Option<PayloadStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RawPayload>> {
        let conn = self.conn()?;

        let mut sql = format!(
            "SELECT {} FROM raw_payloads WHERE user_id = ?",
            PAYLOAD_COLUMNS
        );
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(user_id)];

        if let Some(s) = status {
            sql.push_str(" AND status = ?");
            params_vec.push(Box::new(s.as_str().to_string()));
        }

        sql.push_str(" ORDER BY received_at DESC, id DESC LIMIT ? OFFSET ?");
        params_vec.push(Box::new(limit));
        params_vec.push(Box::new(offset));

        let params_refs: Vec<&dyn rusqlite::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let payloads = stmt
            .query_map(params_refs.as_slice(), payload_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(payloads)
    }

    /// Persist a payload's mutable state (status, attempt bookkeeping, and
    /// the append-only logs). Last writer wins per row; concurrent
    /// processing of the same payload id is a caller error avoided via
    /// `claim_payload`.
    pub fn save_payload_state(&self, payload: &RawPayload) -> Result<()> {
        let conn = self.conn()?;

        let n = conn.execute(
            r#"
            UPDATE raw_payloads
            SET status = ?, attempts = ?, last_attempt_at = ?, last_error = ?,
                event_log = ?, ingest_log = ?, linked_record_ids = ?, feedback_log = ?,
                updated_at = ?
            WHERE id = ?
            "#,
            params![
                payload.status.as_str(),
                payload.attempts,
                payload.last_attempt_at.map(fmt_datetime),
                payload.last_error,
                serde_json::to_string(&payload.event_log)?,
                serde_json::to_string(&payload.ingest_log)?,
                serde_json::to_string(&payload.linked_record_ids)?,
                serde_json::to_string(&payload.feedback_log)?,
                fmt_datetime(Utc::now()),
                payload.id,
            ],
        )?;

        if n == 0 {
            return Err(Error::NotFound(format!("payload {}", payload.id)));
        }
        Ok(())
    }

    /// Conditionally move a payload from `pending` to `processing`,
    /// incrementing its attempt counter and stamping the attempt time.
    ///
    /// Returns false when the payload was not in `pending` (someone else
    /// claimed it, or it is already settled).
    pub fn claim_payload(&self, id: i64, event: &EventLogEntry) -> Result<bool> {
        let payload = self.get_payload(id)?;
        if payload.status != PayloadStatus::Pending {
            return Ok(false);
        }

        let mut event_log = payload.event_log;
        event_log.push(event.clone());

        let conn = self.conn()?;
        let now = fmt_datetime(Utc::now());
        let n = conn.execute(
            r#"
            UPDATE raw_payloads
            SET status = 'processing', attempts = attempts + 1, last_attempt_at = ?,
                event_log = ?, updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
            params![now, serde_json::to_string(&event_log)?, now, id],
        )?;

        Ok(n > 0)
    }
}
