//! Integration tests for tally-core
//!
//! These tests exercise the full ingest -> classify -> annotate -> detect ->
//! auto-merge workflow.

use tally_core::{
    create_record_checked, db::Database, dedup::DuplicateDetector, ingest::IngestTracker,
    merge::Merger, models::{Direction, NewFinancialRecord, NewRawPayload, PayloadStatus,
    RecordMetadata, TrainingLabel}, score::MatchConfig, DetectionFilter,
};

use chrono::Utc;

fn email_payload(message_id: &str, body: &str) -> NewRawPayload {
    NewRawPayload {
        user_id: 1,
        message_id: message_id.to_string(),
        source: "email".to_string(),
        sender: Some("orders@amazon.example".to_string()),
        subject: Some("Your order has shipped".to_string()),
        body: body.to_string(),
        raw_blob: None,
        received_at: Utc::now(),
    }
}

fn purchase(description: &str, source: &str) -> NewFinancialRecord {
    NewFinancialRecord {
        user_id: 1,
        account_id: 10,
        amount: "500.00".parse().unwrap(),
        currency: "USD".to_string(),
        direction: Direction::Debit,
        date: "2024-03-01".parse().unwrap(),
        description: description.to_string(),
        category: None,
        external_id: None,
        source: source.to_string(),
        metadata: RecordMetadata::default(),
    }
}

#[test]
fn test_full_reconciliation_workflow() {
    let db = Database::in_memory().expect("Failed to create test database");
    let config = MatchConfig::default();
    config.validate().expect("default config must be valid");

    let tracker = IngestTracker::new(&db);

    // One purchase arrives twice: an email notification and a statement row
    let email_id = tracker
        .ingest(&email_payload("msg-amazon-1", "Amazon order, total 500.00"))
        .unwrap()
        .id();
    let statement_id = tracker
        .ingest(&email_payload("stmt-2024-03-01-7", "AMAZON.IN 500.00"))
        .unwrap()
        .id();

    // Re-delivery of the same message is a no-op
    let again = tracker
        .ingest(&email_payload("msg-amazon-1", "Amazon order, total 500.00"))
        .unwrap();
    assert_eq!(again.id(), email_id);
    assert_eq!(db.list_payloads(1, None, 10, 0).unwrap().len(), 2);

    // The classification collaborator turns each payload into a record;
    // the duplicate guard is the explicit second step of each insert
    let status = tracker
        .process_with(email_id, |_| {
            create_record_checked(&db, &config, &purchase("Amazon", "email"))
                .map(|(id, _)| vec![id])
                .map_err(|e| e.to_string())
        })
        .unwrap();
    assert_eq!(status, PayloadStatus::Processed);

    let status = tracker
        .process_with(statement_id, |_| {
            create_record_checked(&db, &config, &purchase("AMAZON.IN", "statement"))
                .map(|(id, _)| vec![id])
                .map_err(|e| e.to_string())
        })
        .unwrap();
    assert_eq!(status, PayloadStatus::Processed);

    // The second arrival was annotated as a likely duplicate on creation
    let statement_payload = db.get_payload(statement_id).unwrap();
    let second_record_id = statement_payload.linked_record_ids[0];
    let suspicion = db
        .get_record(second_record_id)
        .unwrap()
        .metadata
        .duplicate_suspicion
        .expect("creation-time guard should have annotated the record");
    assert!(suspicion.likely_duplicate);

    // Batch detection sees exactly one group
    let detector = DuplicateDetector::with_config(&db, config.clone());
    let report = detector
        .find_duplicate_groups(1, &DetectionFilter::default())
        .unwrap();
    assert_eq!(report.groups.len(), 1);
    assert_eq!(report.stats.duplicates_found, 1);

    // Auto-merge folds it and the ledger is clean
    let merger = Merger::with_config(&db, config);
    let merge_report = merger.auto_merge(1, &DetectionFilter::default()).unwrap();
    assert_eq!(merge_report.groups_processed, 1);
    assert_eq!(merge_report.records_merged, 1);
    assert_eq!(merge_report.groups_skipped_low_confidence, 0);

    let active = db.list_active_records(1, None, None, None).unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].metadata.merge_history.len(), 1);

    // The loser is soft-deleted, never erased, and the payload's loose
    // reference to it still resolves
    let email_payload_row = db.get_payload(email_id).unwrap();
    let merged_away = email_payload_row
        .linked_record_ids
        .iter()
        .chain(statement_payload.linked_record_ids.iter())
        .find(|id| **id != active[0].id)
        .copied()
        .unwrap();
    let loser = db.find_record(merged_away).unwrap().unwrap();
    assert!(loser.deleted);

    // Both payloads now carry a transaction training label
    assert_eq!(
        db.get_payload(email_id).unwrap().training_label(),
        Some(TrainingLabel::Transaction)
    );
}

#[test]
fn test_failed_classification_does_not_poison_the_batch() {
    let db = Database::in_memory().expect("Failed to create test database");
    let tracker = IngestTracker::new(&db);

    let bad = tracker
        .ingest(&email_payload("msg-bad", "unparseable"))
        .unwrap()
        .id();
    let good = tracker
        .ingest(&email_payload("msg-good", "Amazon order, total 500.00"))
        .unwrap()
        .id();

    for id in [bad, good] {
        let result = tracker.process_with(id, |payload| {
            if payload.body == "unparseable" {
                Err("no transaction found".to_string())
            } else {
                create_record_checked(
                    &db,
                    &MatchConfig::default(),
                    &purchase("Amazon", "email"),
                )
                .map(|(id, _)| vec![id])
                .map_err(|e| e.to_string())
            }
        });
        // Classification failures surface as payload state, not errors
        assert!(result.is_ok());
    }

    assert_eq!(
        db.get_payload(bad).unwrap().status,
        PayloadStatus::Failed
    );
    assert_eq!(
        db.get_payload(good).unwrap().status,
        PayloadStatus::Processed
    );

    // The failed payload can be retried
    tracker.retry(bad).unwrap();
    assert_eq!(
        db.get_payload(bad).unwrap().status,
        PayloadStatus::Pending
    );
}
