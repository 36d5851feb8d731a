//! Inbound payload command implementations

use anyhow::Result;
use chrono::Utc;

use tally_core::db::{Database, PayloadInsert};
use tally_core::ingest::{derive_message_id, IngestTracker};
use tally_core::models::{FeedbackKind, NewRawPayload, PayloadStatus};

use super::truncate;

pub fn cmd_payload_ingest(
    db: &Database,
    user: i64,
    source: &str,
    message_id: Option<String>,
    sender: Option<String>,
    subject: Option<String>,
    body: &str,
) -> Result<()> {
    let message_id =
        message_id.unwrap_or_else(|| derive_message_id(source, sender.as_deref(), body));

    let tracker = IngestTracker::new(db);
    let result = tracker.ingest(&NewRawPayload {
        user_id: user,
        message_id: message_id.clone(),
        source: source.to_string(),
        sender,
        subject,
        body: body.to_string(),
        raw_blob: None,
        received_at: Utc::now(),
    })?;

    match result {
        PayloadInsert::Inserted(id) => {
            println!("📨 Ingested payload {} ({})", id, truncate(&message_id, 24));
            println!("   Status: pending, waiting for classification");
        }
        PayloadInsert::Existing(id) => {
            println!(
                "Payload {} was already ingested as {}, skipping.",
                truncate(&message_id, 24),
                id
            );
        }
    }

    Ok(())
}

pub fn cmd_payload_list(
    db: &Database,
    user: i64,
    status: Option<&str>,
    limit: i64,
) -> Result<()> {
    let status = status
        .map(|s| s.parse::<PayloadStatus>())
        .transpose()
        .map_err(|e| anyhow::anyhow!(e))?;

    let payloads = db.list_payloads(user, status, limit, 0)?;

    if payloads.is_empty() {
        println!("No payloads found.");
        return Ok(());
    }

    println!();
    println!("📥 Inbound Payloads (user {})", user);
    println!("   ─────────────────────────────────────────────────────────────");

    for payload in payloads {
        let subject = payload.subject.as_deref().unwrap_or("(no subject)");
        println!(
            "   [{}] {:>10} │ {:>9} │ {} │ {}",
            payload.id,
            payload.status.to_string(),
            payload.source,
            payload.received_at.format("%Y-%m-%d"),
            truncate(subject, 32)
        );
    }

    Ok(())
}

pub fn cmd_payload_show(db: &Database, id: i64) -> Result<()> {
    let payload = db.get_payload(id)?;

    println!();
    println!("📥 Payload {} ({})", payload.id, payload.message_id);
    println!("   Source:     {}", payload.source);
    if let Some(sender) = &payload.sender {
        println!("   Sender:     {}", sender);
    }
    if let Some(subject) = &payload.subject {
        println!("   Subject:    {}", subject);
    }
    println!("   Received:   {}", payload.received_at);
    println!("   Status:     {}", payload.status);
    println!("   Attempts:   {}", payload.attempts);
    if let Some(error) = &payload.last_error {
        println!("   Last error: {}", error);
    }
    match payload.training_label() {
        Some(label) => println!("   Label:      {}", label.as_str()),
        None => println!("   Label:      (indeterminate)"),
    }

    if !payload.linked_record_ids.is_empty() {
        println!();
        println!("   Linked records:");
        for record_id in &payload.linked_record_ids {
            // Loose references: the record may be gone or merged away
            match db.find_record(*record_id)? {
                Some(record) if record.deleted => {
                    println!("   - [{}] {} (merged/deleted)", record_id, truncate(&record.description, 32))
                }
                Some(record) => {
                    println!("   - [{}] {}", record_id, truncate(&record.description, 32))
                }
                None => println!("   - [{}] (no longer exists)", record_id),
            }
        }
    }

    if !payload.event_log.is_empty() {
        println!();
        println!("   Event log:");
        for entry in &payload.event_log {
            println!(
                "   {} [{}] {}",
                entry.at.format("%Y-%m-%d %H:%M:%S"),
                entry.level.as_str(),
                entry.message
            );
        }
    }

    if !payload.ingest_log.is_empty() {
        println!();
        println!("   Ingest log:");
        for event in &payload.ingest_log {
            let detail = event.detail.as_deref().unwrap_or("");
            println!(
                "   {} {} {}",
                event.at.format("%Y-%m-%d %H:%M:%S"),
                event.action,
                detail
            );
        }
    }

    if !payload.feedback_log.is_empty() {
        println!();
        println!("   Feedback:");
        for entry in &payload.feedback_log {
            let note = entry.note.as_deref().unwrap_or("");
            println!(
                "   {} {} {}",
                entry.at.format("%Y-%m-%d %H:%M:%S"),
                entry.kind,
                note
            );
        }
    }

    Ok(())
}

pub fn cmd_payload_retry(db: &Database, id: i64) -> Result<()> {
    let tracker = IngestTracker::new(db);
    tracker.retry(id)?;

    println!("✅ Payload {} reset to pending for retry.", id);
    Ok(())
}

pub fn cmd_payload_ignore(db: &Database, id: i64, reason: &str) -> Result<()> {
    let tracker = IngestTracker::new(db);
    tracker.mark_ignored(id, reason)?;

    println!("✅ Payload {} ignored: {}", id, reason);
    Ok(())
}

pub fn cmd_payload_feedback(
    db: &Database,
    id: i64,
    kind: &str,
    note: Option<String>,
) -> Result<()> {
    let kind: FeedbackKind = kind.parse().map_err(|e: String| anyhow::anyhow!(e))?;

    let tracker = IngestTracker::new(db);
    tracker.record_feedback(id, kind, note)?;

    println!("✅ Feedback recorded on payload {} ({})", id, kind);
    Ok(())
}
