//! Creation-time duplicate annotation
//!
//! A best-effort side channel that runs once, synchronously, right after a
//! new record is persisted. It only annotates: suspected duplicates are
//! flagged in the record's metadata for review, nothing is merged or
//! deleted. Failures are logged and swallowed so the record creation that
//! triggered the guard always stands.

use chrono::Utc;
use tracing::warn;

use crate::db::Database;
use crate::dedup::DuplicateDetector;
use crate::error::Result;
use crate::models::{DuplicateSuspicion, NewFinancialRecord};
use crate::score::MatchConfig;

/// Annotates newly created records with duplicate suspicion
pub struct DuplicateGuard<'a> {
    db: &'a Database,
    config: MatchConfig,
}

impl<'a> DuplicateGuard<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self {
            db,
            config: MatchConfig::default(),
        }
    }

    pub fn with_config(db: &'a Database, config: MatchConfig) -> Self {
        Self { db, config }
    }

    /// Check a just-persisted record against the existing ledger.
    ///
    /// Call once after insert, never on updates. Returns the annotation
    /// written, if any. Infallible by design: any internal error is logged
    /// and reported as "no annotation".
    pub fn annotate_new_record(&self, record_id: i64) -> Option<DuplicateSuspicion> {
        match self.try_annotate(record_id) {
            Ok(suspicion) => suspicion,
            Err(e) => {
                warn!("Duplicate guard failed for record {}: {}", record_id, e);
                None
            }
        }
    }

    fn try_annotate(&self, record_id: i64) -> Result<Option<DuplicateSuspicion>> {
        let record = self.db.get_record(record_id)?;
        if record.deleted {
            return Ok(None);
        }

        let detector = DuplicateDetector::with_config(self.db, self.config.clone());
        let best = detector
            .candidates_for(&record)?
            .into_iter()
            .filter(|c| c.confidence >= self.config.merge_threshold)
            .max_by(|x, y| {
                x.confidence
                    .partial_cmp(&y.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    // Prefer the lower id on equal confidence
                    .then(y.record.id.cmp(&x.record.id))
            });

        let Some(best) = best else {
            return Ok(None);
        };

        let suspicion = DuplicateSuspicion {
            candidate_id: best.record.id,
            confidence: best.confidence,
            reasons: best.reasons,
            requires_user_review: true,
            likely_duplicate: best.confidence >= self.config.likely_duplicate_threshold,
            detected_at: Utc::now(),
        };

        // Direct metadata write: this must not re-enter the creation path
        // that triggered the guard
        let mut metadata = record.metadata;
        metadata.duplicate_suspicion = Some(suspicion.clone());
        self.db.update_record_metadata(record.id, &metadata)?;

        Ok(Some(suspicion))
    }
}

/// Insert a record and immediately run the duplicate guard over it.
///
/// The guard is an explicit second step of the write path, kept visible at
/// the call site; the insert succeeds regardless of what the guard does.
pub fn create_record_checked(
    db: &Database,
    config: &MatchConfig,
    record: &NewFinancialRecord,
) -> Result<(i64, Option<DuplicateSuspicion>)> {
    let id = db.insert_record(record)?;
    let guard = DuplicateGuard::with_config(db, config.clone());
    Ok((id, guard.annotate_new_record(id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, RecordMetadata};

    fn new_record(amount: &str, date: &str, description: &str, source: &str) -> NewFinancialRecord {
        NewFinancialRecord {
            user_id: 1,
            account_id: 10,
            amount: amount.parse().unwrap(),
            currency: "USD".to_string(),
            direction: Direction::Debit,
            date: date.parse().unwrap(),
            description: description.to_string(),
            category: None,
            external_id: None,
            source: source.to_string(),
            metadata: RecordMetadata::default(),
        }
    }

    #[test]
    fn test_annotates_likely_duplicate() {
        let db = Database::in_memory().unwrap();

        let existing = db
            .insert_record(&new_record("500.00", "2024-03-01", "Amazon", "email"))
            .unwrap();
        let (id, suspicion) = create_record_checked(
            &db,
            &MatchConfig::default(),
            &new_record("500.00", "2024-03-01", "Amazon", "statement"),
        )
        .unwrap();

        let suspicion = suspicion.expect("expected a duplicate annotation");
        assert_eq!(suspicion.candidate_id, existing);
        assert_eq!(suspicion.confidence, 1.0);
        assert!(suspicion.requires_user_review);
        assert!(suspicion.likely_duplicate);

        // The annotation is persisted on the new record
        let stored = db.get_record(id).unwrap();
        let stored_suspicion = stored.metadata.duplicate_suspicion.unwrap();
        assert_eq!(stored_suspicion.candidate_id, existing);

        // Nothing was merged or deleted
        assert!(!db.get_record(existing).unwrap().deleted);
        assert!(!stored.deleted);
    }

    #[test]
    fn test_suspicion_below_likely_bar_still_requires_review() {
        let db = Database::in_memory().unwrap();

        // Pair scoring 0.90: exact amount/date/account + similar
        // description, differing direction, same source
        let mut existing = new_record("75.00", "2024-04-01", "amazon", "email");
        existing.direction = Direction::Debit;
        db.insert_record(&existing).unwrap();

        let mut incoming = new_record("75.00", "2024-04-01", "amazon.in", "email");
        incoming.direction = Direction::Credit;
        let (_, suspicion) =
            create_record_checked(&db, &MatchConfig::default(), &incoming).unwrap();

        let suspicion = suspicion.unwrap();
        assert_eq!(suspicion.confidence, 0.90);
        assert!(suspicion.requires_user_review);
        assert!(!suspicion.likely_duplicate);
    }

    #[test]
    fn test_no_annotation_below_merge_threshold() {
        let db = Database::in_memory().unwrap();

        db.insert_record(&new_record("500.00", "2024-03-01", "Amazon", "email"))
            .unwrap();
        let (id, suspicion) = create_record_checked(
            &db,
            &MatchConfig::default(),
            &new_record("9.99", "2024-03-01", "Bus ticket", "email"),
        )
        .unwrap();

        assert!(suspicion.is_none());
        assert!(db
            .get_record(id)
            .unwrap()
            .metadata
            .duplicate_suspicion
            .is_none());
    }

    #[test]
    fn test_guard_never_fails_the_caller() {
        let db = Database::in_memory().unwrap();
        let guard = DuplicateGuard::new(&db);

        // Nonexistent record: logged, not raised
        assert!(guard.annotate_new_record(9999).is_none());
    }

    #[test]
    fn test_annotation_preserves_existing_metadata() {
        let db = Database::in_memory().unwrap();

        db.insert_record(&new_record("500.00", "2024-03-01", "Amazon", "email"))
            .unwrap();

        let mut incoming = new_record("500.00", "2024-03-01", "Amazon", "statement");
        incoming
            .metadata
            .extra
            .insert("order_no".to_string(), serde_json::json!("A-1"));
        let (id, suspicion) =
            create_record_checked(&db, &MatchConfig::default(), &incoming).unwrap();
        assert!(suspicion.is_some());

        let stored = db.get_record(id).unwrap();
        assert_eq!(
            stored.metadata.extra.get("order_no"),
            Some(&serde_json::json!("A-1"))
        );
    }
}
