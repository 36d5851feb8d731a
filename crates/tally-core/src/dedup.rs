//! Duplicate detection over a user's ledger
//!
//! Scans active records newest-first, narrows each to a candidate window
//! (same account, amount tolerance, date window, or identical external id)
//! and scores the window, partitioning matches into groups with a single
//! primary. Pure scoring over a read-only snapshot: results are
//! reproducible for a fixed record set and configuration.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::info;

use crate::db::Database;
use crate::error::Result;
use crate::models::{DuplicateCandidate, DuplicateGroup, FinancialRecord};
use crate::score::{score_pair, MatchConfig};

/// Bounds for a detection run. Batch runs over large ledgers should set a
/// date range or row limit rather than scanning everything.
#[derive(Debug, Clone, Default)]
pub struct DetectionFilter {
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub limit: Option<i64>,
}

/// Aggregate statistics of one detection run
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DetectionStats {
    pub records_scanned: usize,
    pub groups_found: usize,
    pub duplicates_found: usize,
    /// Sum of duplicate amounts: what the ledger would slim down by if
    /// every group merged
    pub potential_savings: Decimal,
}

/// Result of one detection run
#[derive(Debug, Clone, serde::Serialize)]
pub struct DetectionReport {
    pub groups: Vec<DuplicateGroup>,
    pub stats: DetectionStats,
}

/// Finds duplicate groups in a user's active records
pub struct DuplicateDetector<'a> {
    db: &'a Database,
    config: MatchConfig,
}

impl<'a> DuplicateDetector<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self {
            db,
            config: MatchConfig::default(),
        }
    }

    pub fn with_config(db: &'a Database, config: MatchConfig) -> Self {
        Self { db, config }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Score every record in the reference's candidate window.
    ///
    /// Returns all scored candidates regardless of confidence; callers
    /// apply their own thresholds.
    pub fn candidates_for(&self, reference: &FinancialRecord) -> Result<Vec<DuplicateCandidate>> {
        let rows = self.db.find_candidate_rows(reference, &self.config)?;

        Ok(rows
            .into_iter()
            .map(|record| {
                let score = score_pair(reference, &record, &self.config);
                DuplicateCandidate {
                    record,
                    confidence: score.confidence,
                    reasons: score.reasons,
                }
            })
            .collect())
    }

    /// Partition a user's active records into duplicate groups.
    ///
    /// Records are visited newest-first; a processed set guarantees a
    /// record lands in at most one group per run.
    pub fn find_duplicate_groups(
        &self,
        user_id: i64,
        filter: &DetectionFilter,
    ) -> Result<DetectionReport> {
        let records =
            self.db
                .list_active_records(user_id, filter.date_from, filter.date_to, filter.limit)?;

        let mut processed: HashSet<i64> = HashSet::new();
        let mut groups = Vec::new();
        let mut stats = DetectionStats {
            records_scanned: records.len(),
            ..Default::default()
        };

        for record in &records {
            if processed.contains(&record.id) {
                continue;
            }

            let mut kept: Vec<DuplicateCandidate> = self
                .candidates_for(record)?
                .into_iter()
                .filter(|c| c.confidence >= self.config.merge_threshold)
                .filter(|c| !processed.contains(&c.record.id))
                .collect();

            if kept.is_empty() {
                continue;
            }

            // Descending confidence; id breaks ties so runs are reproducible
            kept.sort_by(|x, y| {
                y.confidence
                    .partial_cmp(&x.confidence)
                    .unwrap_or(Ordering::Equal)
                    .then(x.record.id.cmp(&y.record.id))
            });

            processed.insert(record.id);
            for candidate in &kept {
                processed.insert(candidate.record.id);
                stats.duplicates_found += 1;
                stats.potential_savings += candidate.record.amount;
            }

            groups.push(DuplicateGroup {
                primary: record.clone(),
                duplicates: kept,
            });
        }

        stats.groups_found = groups.len();

        info!(
            "Duplicate detection for user {}: {} records scanned, {} groups, {} duplicates",
            user_id, stats.records_scanned, stats.groups_found, stats.duplicates_found
        );

        Ok(DetectionReport { groups, stats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, NewFinancialRecord, RecordMetadata};

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
    fn test_cross_source_pair_is_grouped() {
        let db = Database::in_memory().unwrap();

        let a = db
            .insert_record(&new_record("500.00", "2024-03-01", "Amazon", "email"))
            .unwrap();
        let b = db
            .insert_record(&new_record("500.00", "2024-03-01", "AMAZON.IN", "statement"))
            .unwrap();
        // Unrelated noise
        db.insert_record(&new_record("12.99", "2024-02-15", "Coffee Corner", "manual"))
            .unwrap();

        let detector = DuplicateDetector::new(&db);
        let report = detector
            .find_duplicate_groups(1, &DetectionFilter::default())
            .unwrap();

        assert_eq!(report.groups.len(), 1);
        let group = &report.groups[0];
        let ids = [group.primary.id, group.duplicates[0].record.id];
        assert!(ids.contains(&a) && ids.contains(&b));
        assert_eq!(report.stats.records_scanned, 3);
        assert_eq!(report.stats.duplicates_found, 1);
    }

    #[test]
    fn test_weak_match_is_not_grouped() {
        let db = Database::in_memory().unwrap();

        // Near-tolerance amounts, same date and account, but no
        // descriptions: 0.65 confidence, below the 0.75 threshold
        let mut first = new_record("500.00", "2024-03-01", "", "email");
        first.direction = Direction::Debit;
        let mut second = new_record("502.00", "2024-03-01", "", "email");
        second.direction = Direction::Credit;

        db.insert_record(&first).unwrap();
        db.insert_record(&second).unwrap();

        let detector = DuplicateDetector::new(&db);
        let report = detector
            .find_duplicate_groups(1, &DetectionFilter::default())
            .unwrap();

        assert!(report.groups.is_empty());
        assert_eq!(report.stats.duplicates_found, 0);
    }

    #[test]
    fn test_threshold_boundary() {
        let db = Database::in_memory().unwrap();

        // amount exact (0.35) + date exact (0.30) + same account (0.10)
        // with differing direction and same source: exactly 0.75
        let mut first = new_record("500.00", "2024-03-01", "", "email");
        first.direction = Direction::Debit;
        let mut second = new_record("500.00", "2024-03-01", "", "email");
        second.direction = Direction::Credit;

        db.insert_record(&first).unwrap();
        db.insert_record(&second).unwrap();

        let detector = DuplicateDetector::new(&db);
        let report = detector
            .find_duplicate_groups(1, &DetectionFilter::default())
            .unwrap();

        // A pair scoring exactly at the threshold is included
        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.groups[0].duplicates[0].confidence, 0.75);
    }

    #[test]
    fn test_each_record_lands_in_one_group() {
        let db = Database::in_memory().unwrap();

        // Three copies of the same purchase
        for source in ["email", "sms", "statement"] {
            db.insert_record(&new_record("500.00", "2024-03-01", "Amazon", source))
                .unwrap();
        }

        let detector = DuplicateDetector::new(&db);
        let report = detector
            .find_duplicate_groups(1, &DetectionFilter::default())
            .unwrap();

        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.groups[0].duplicates.len(), 2);
        assert_eq!(report.stats.duplicates_found, 2);
        assert_eq!(
            report.stats.potential_savings,
            "1000.00".parse::<Decimal>().unwrap()
        );
    }

    #[test]
    fn test_detection_is_deterministic() {
        let db = Database::in_memory().unwrap();

        for source in ["email", "sms", "statement"] {
            db.insert_record(&new_record("500.00", "2024-03-01", "Amazon", source))
                .unwrap();
        }
        db.insert_record(&new_record("75.00", "2024-03-05", "Grocer", "email"))
            .unwrap();
        db.insert_record(&new_record("75.50", "2024-03-05", "Grocer", "statement"))
            .unwrap();

        let detector = DuplicateDetector::new(&db);
        let first = detector
            .find_duplicate_groups(1, &DetectionFilter::default())
            .unwrap();
        let second = detector
            .find_duplicate_groups(1, &DetectionFilter::default())
            .unwrap();

        assert_eq!(first.groups.len(), second.groups.len());
        for (x, y) in first.groups.iter().zip(second.groups.iter()) {
            assert_eq!(x.primary.id, y.primary.id);
            let x_ids: Vec<i64> = x.duplicates.iter().map(|d| d.record.id).collect();
            let y_ids: Vec<i64> = y.duplicates.iter().map(|d| d.record.id).collect();
            assert_eq!(x_ids, y_ids);
        }
        assert_eq!(
            first.stats.potential_savings,
            second.stats.potential_savings
        );
    }

    #[test]
    fn test_filter_bounds_the_scan() {
        let db = Database::in_memory().unwrap();

        db.insert_record(&new_record("500.00", "2024-03-01", "Amazon", "email"))
            .unwrap();
        db.insert_record(&new_record("500.00", "2024-03-01", "Amazon", "sms"))
            .unwrap();

        let detector = DuplicateDetector::new(&db);
        let report = detector
            .find_duplicate_groups(
                1,
                &DetectionFilter {
                    date_from: Some("2024-04-01".parse().unwrap()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(report.stats.records_scanned, 0);
        assert!(report.groups.is_empty());
    }
}
