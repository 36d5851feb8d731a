//! Merge strategies for folding duplicate records into a primary
//!
//! Every fold is one database transaction: the duplicate's soft-delete and
//! the primary's update either both land or neither does. Candidates are
//! re-scored against the primary immediately before folding, so a stale
//! candidate list (another merge got there first, or the record changed)
//! degrades to a logged skip instead of a bad merge.
//!
//! Callers should serialize merge invocations per user; two concurrent runs
//! over overlapping groups can otherwise race each other to the same
//! duplicate, and the re-score check narrows but does not close that window.

use chrono::Utc;
use rusqlite::Transaction;
use tracing::{info, warn};

use crate::db::{self, Database};
use crate::dedup::{DetectionFilter, DuplicateDetector};
use crate::error::{Error, Result};
use crate::models::{
    DuplicateCandidate, FinancialRecord, MergeHistoryEntry, MergeStrategy,
};
use crate::score::{score_pair, MatchConfig};

/// Outcome status of one merge call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStatus {
    Merged,
    /// Empty candidate list; nothing was touched
    NoDuplicates,
}

/// Result of one merge call
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub status: MergeStatus,
    pub merged_count: usize,
    pub merged_ids: Vec<i64>,
    /// Candidates skipped by the pre-fold safety re-check
    pub skipped_ids: Vec<i64>,
}

/// Aggregate result of an unattended merge run
#[derive(Debug, Clone, Default)]
pub struct AutoMergeReport {
    pub groups_processed: usize,
    pub records_merged: usize,
    pub groups_skipped_low_confidence: usize,
}

enum Fold {
    Merged,
    Skipped(String),
}

/// Applies merge strategies to duplicate groups
pub struct Merger<'a> {
    db: &'a Database,
    config: MatchConfig,
}

impl<'a> Merger<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self {
            db,
            config: MatchConfig::default(),
        }
    }

    pub fn with_config(db: &'a Database, config: MatchConfig) -> Self {
        Self { db, config }
    }

    /// Fold duplicate candidates into the primary record.
    ///
    /// Returns `NoDuplicates` without side effects when the candidate list
    /// is empty. Each candidate folds in its own transaction; a candidate
    /// that no longer clears the merge threshold is skipped and logged
    /// while the rest of the group is still processed.
    pub fn merge(
        &self,
        primary_id: i64,
        candidates: &[DuplicateCandidate],
        strategy: MergeStrategy,
    ) -> Result<MergeOutcome> {
        if candidates.is_empty() {
            return Ok(MergeOutcome {
                status: MergeStatus::NoDuplicates,
                merged_count: 0,
                merged_ids: Vec::new(),
                skipped_ids: Vec::new(),
            });
        }

        let primary = self.db.get_record(primary_id)?;
        if primary.deleted {
            return Err(Error::InvalidData(format!(
                "cannot merge into soft-deleted record {}",
                primary_id
            )));
        }

        let mut merged_ids = Vec::new();
        let mut skipped_ids = Vec::new();
        let mut conn = self.db.conn()?;

        for candidate in candidates {
            if candidate.record.id == primary_id {
                return Err(Error::InvalidData(format!(
                    "record {} cannot be merged into itself",
                    primary_id
                )));
            }

            let tx = conn.transaction()?;
            match self.fold_candidate(&tx, &primary, candidate, strategy)? {
                Fold::Merged => {
                    tx.commit()?;
                    merged_ids.push(candidate.record.id);
                }
                Fold::Skipped(reason) => {
                    // Dropping the transaction rolls it back
                    warn!(
                        "Skipping candidate {} for primary {}: {}",
                        candidate.record.id, primary_id, reason
                    );
                    skipped_ids.push(candidate.record.id);
                }
            }
        }

        info!(
            "Merged {} of {} candidates into record {} ({})",
            merged_ids.len(),
            candidates.len(),
            primary_id,
            strategy
        );

        Ok(MergeOutcome {
            status: MergeStatus::Merged,
            merged_count: merged_ids.len(),
            merged_ids,
            skipped_ids,
        })
    }

    /// Fold one candidate inside `tx`. Either every write lands or the
    /// caller rolls the transaction back.
    fn fold_candidate(
        &self,
        tx: &Transaction<'_>,
        primary: &FinancialRecord,
        candidate: &DuplicateCandidate,
        strategy: MergeStrategy,
    ) -> Result<Fold> {
        // Fresh load: the candidate list may be stale
        let duplicate = match db::records::fetch_record(tx, candidate.record.id)? {
            Some(r) => r,
            None => return Ok(Fold::Skipped("record no longer exists".to_string())),
        };
        if duplicate.deleted {
            return Ok(Fold::Skipped("record already soft-deleted".to_string()));
        }

        let score = score_pair(primary, &duplicate, &self.config);
        if score.confidence < self.config.merge_threshold {
            return Ok(Fold::Skipped(format!(
                "score fell to {:.2}, below merge threshold {:.2}",
                score.confidence, self.config.merge_threshold
            )));
        }

        if db::records::soft_delete(tx, duplicate.id)? == 0 {
            return Err(Error::InvalidData(format!(
                "record {} vanished mid-merge",
                duplicate.id
            )));
        }

        match strategy {
            MergeStrategy::KeepPrimary => {}
            MergeStrategy::MergeDetails => {
                db::records::reassign_items(tx, duplicate.id, primary.id)?;
            }
            MergeStrategy::MergeMetadata => {
                // Reload the primary's metadata inside the transaction so
                // earlier folds in this group are not overwritten
                let current = db::records::fetch_record(tx, primary.id)?
                    .ok_or_else(|| Error::NotFound(format!("record {}", primary.id)))?;

                let mut metadata = current.metadata;
                for (key, value) in &duplicate.metadata.extra {
                    let absent = match metadata.extra.get(key) {
                        None => true,
                        Some(existing) => {
                            existing.is_null()
                                || existing.as_str().is_some_and(|s| s.is_empty())
                        }
                    };
                    if absent {
                        metadata.extra.insert(key.clone(), value.clone());
                    }
                }

                metadata.merge_history.push(MergeHistoryEntry {
                    merged_id: duplicate.id,
                    merged_at: Utc::now(),
                    confidence: score.confidence,
                    reasons: score.reasons.clone(),
                    strategy,
                });

                if db::records::write_metadata(tx, primary.id, &metadata)? == 0 {
                    return Err(Error::NotFound(format!("record {}", primary.id)));
                }
            }
        }

        Ok(Fold::Merged)
    }

    /// Unattended reconciliation: detect groups, then fold only duplicates
    /// clearing the auto-merge bar, which is stricter than the general
    /// merge threshold to suppress false positives. Ambiguous groups are
    /// left for human review and counted as skipped.
    pub fn auto_merge(&self, user_id: i64, filter: &DetectionFilter) -> Result<AutoMergeReport> {
        let detector = DuplicateDetector::with_config(self.db, self.config.clone());
        let detection = detector.find_duplicate_groups(user_id, filter)?;

        let mut report = AutoMergeReport::default();

        for group in detection.groups {
            report.groups_processed += 1;

            let qualifying: Vec<DuplicateCandidate> = group
                .duplicates
                .into_iter()
                .filter(|c| c.confidence >= self.config.auto_merge_threshold)
                .collect();

            if qualifying.is_empty() {
                report.groups_skipped_low_confidence += 1;
                continue;
            }

            let outcome = self.merge(group.primary.id, &qualifying, MergeStrategy::MergeMetadata)?;
            report.records_merged += outcome.merged_count;
        }

        info!(
            "Auto-merge for user {}: {} groups processed, {} records merged, {} skipped for low confidence",
            user_id, report.groups_processed, report.records_merged,
            report.groups_skipped_low_confidence
        );

        Ok(report)
    }
}
