//! Duplicate detection and merge command implementations

use anyhow::{Context, Result};

use tally_core::db::Database;
use tally_core::dedup::{DetectionFilter, DuplicateDetector};
use tally_core::merge::{MergeStatus, Merger};
use tally_core::models::{DuplicateCandidate, MergeStrategy};
use tally_core::score::{score_pair, MatchConfig};

use super::truncate;

fn parse_filter(
    from: Option<&str>,
    to: Option<&str>,
    limit: Option<i64>,
) -> Result<DetectionFilter> {
    Ok(DetectionFilter {
        date_from: from
            .map(|s| s.parse())
            .transpose()
            .context("Invalid --from date (expected YYYY-MM-DD)")?,
        date_to: to
            .map(|s| s.parse())
            .transpose()
            .context("Invalid --to date (expected YYYY-MM-DD)")?,
        limit,
    })
}

pub fn cmd_dedup_find(
    db: &Database,
    user: i64,
    from: Option<&str>,
    to: Option<&str>,
    limit: Option<i64>,
    json: bool,
    config: &MatchConfig,
) -> Result<()> {
    let filter = parse_filter(from, to, limit)?;
    let detector = DuplicateDetector::with_config(db, config.clone());
    let report = detector.find_duplicate_groups(user, &filter)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if report.groups.is_empty() {
        println!(
            "No duplicate groups found ({} records scanned).",
            report.stats.records_scanned
        );
        return Ok(());
    }

    println!();
    println!("🔍 Duplicate Groups (user {})", user);
    println!("   ─────────────────────────────────────────────────────────────");

    for (index, group) in report.groups.iter().enumerate() {
        println!(
            "   Group {} │ primary [{}] {} │ {} {} │ {}",
            index + 1,
            group.primary.id,
            group.primary.date,
            group.primary.amount,
            group.primary.currency,
            truncate(&group.primary.description, 28)
        );
        for duplicate in &group.duplicates {
            println!(
                "     └ [{}] score {:.2} │ {}",
                duplicate.record.id,
                duplicate.confidence,
                duplicate.reasons.join(", ")
            );
        }
    }

    println!();
    println!(
        "   {} records scanned, {} groups, {} duplicates, potential savings {}",
        report.stats.records_scanned,
        report.stats.groups_found,
        report.stats.duplicates_found,
        report.stats.potential_savings
    );
    println!();
    println!("   Merge a group:     tally dedup merge --primary <id> --duplicates <id,id>");
    println!("   Merge unattended:  tally dedup auto --user {}", user);

    Ok(())
}

pub fn cmd_dedup_merge(
    db: &Database,
    primary_id: i64,
    duplicate_ids: &[i64],
    strategy: &str,
    config: &MatchConfig,
) -> Result<()> {
    let strategy: MergeStrategy = strategy.parse().map_err(|e: String| anyhow::anyhow!(e))?;

    let primary = db.get_record(primary_id)?;
    let candidates: Vec<DuplicateCandidate> = duplicate_ids
        .iter()
        .map(|id| {
            let record = db.get_record(*id)?;
            let score = score_pair(&primary, &record, config);
            Ok(DuplicateCandidate {
                record,
                confidence: score.confidence,
                reasons: score.reasons,
            })
        })
        .collect::<Result<_>>()?;

    let merger = Merger::with_config(db, config.clone());
    let outcome = merger.merge(primary_id, &candidates, strategy)?;

    if outcome.status == MergeStatus::NoDuplicates {
        println!("No duplicates to merge.");
        return Ok(());
    }

    println!(
        "✅ Merged {} record(s) into [{}] using {}.",
        outcome.merged_count, primary_id, strategy
    );
    if !outcome.skipped_ids.is_empty() {
        println!(
            "   Skipped (no longer clear the merge threshold): {:?}",
            outcome.skipped_ids
        );
    }

    Ok(())
}

pub fn cmd_dedup_auto(
    db: &Database,
    user: i64,
    from: Option<&str>,
    to: Option<&str>,
    limit: Option<i64>,
    config: &MatchConfig,
) -> Result<()> {
    let filter = parse_filter(from, to, limit)?;
    let merger = Merger::with_config(db, config.clone());
    let report = merger.auto_merge(user, &filter)?;

    println!();
    println!("🤖 Auto-merge complete (user {})", user);
    println!("   Groups processed:            {}", report.groups_processed);
    println!("   Records merged:              {}", report.records_merged);
    println!(
        "   Skipped (low confidence):    {}",
        report.groups_skipped_low_confidence
    );

    if report.groups_skipped_low_confidence > 0 {
        println!();
        println!("   Ambiguous groups were left for review:");
        println!("     tally dedup find --user {}", user);
    }

    Ok(())
}
