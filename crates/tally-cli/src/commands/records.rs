//! Ledger record command implementations

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;

use tally_core::db::Database;
use tally_core::guard::create_record_checked;
use tally_core::models::{Direction, NewFinancialRecord, RecordMetadata};
use tally_core::score::MatchConfig;

use super::truncate;

#[allow(clippy::too_many_arguments)]
pub fn cmd_record_add(
    db: &Database,
    user: i64,
    account: i64,
    amount: &str,
    date: &str,
    description: &str,
    direction: &str,
    currency: &str,
    category: Option<String>,
    external_id: Option<String>,
    source: &str,
    config: &MatchConfig,
) -> Result<()> {
    let amount: Decimal = amount.parse().context("Invalid amount")?;
    let date: NaiveDate = date.parse().context("Invalid date (expected YYYY-MM-DD)")?;
    let direction: Direction = direction.parse().map_err(|e: String| anyhow::anyhow!(e))?;

    let record = NewFinancialRecord {
        user_id: user,
        account_id: account,
        amount,
        currency: currency.to_string(),
        direction,
        date,
        description: description.to_string(),
        category,
        external_id,
        source: source.to_string(),
        metadata: RecordMetadata::default(),
    };

    let (id, suspicion) = create_record_checked(db, config, &record)?;

    println!(
        "✅ Added record {}: {} │ {} {} │ {}",
        id,
        date,
        amount,
        currency,
        truncate(description, 40)
    );

    if let Some(s) = suspicion {
        println!();
        if s.likely_duplicate {
            println!(
                "⚠️  Likely duplicate of record {} (score {:.2})",
                s.candidate_id, s.confidence
            );
        } else {
            println!(
                "⚠️  Possible duplicate of record {} (score {:.2})",
                s.candidate_id, s.confidence
            );
        }
        println!("   Signals: {}", s.reasons.join(", "));
        println!("   Review with: tally dedup find --user {}", user);
    }

    Ok(())
}

pub fn cmd_record_list(db: &Database, user: i64, limit: i64) -> Result<()> {
    let records = db.list_active_records(user, None, None, Some(limit))?;

    if records.is_empty() {
        println!("No records found. Add one with:");
        println!("  tally record add --account 1 --amount 12.50 --date 2024-05-01");
        return Ok(());
    }

    println!();
    println!("📝 Active Records (user {})", user);
    println!("   ─────────────────────────────────────────────────────────────");

    for record in records {
        let amount_str = match record.direction {
            Direction::Debit => format!("\x1b[31m-{} {}\x1b[0m", record.amount, record.currency),
            Direction::Credit => format!("\x1b[32m+{} {}\x1b[0m", record.amount, record.currency),
        };

        let flag = if record.metadata.duplicate_suspicion.is_some() {
            " ⚠"
        } else {
            ""
        };

        println!(
            "   [{}] {} │ {:>16} │ {}{}",
            record.id,
            record.date,
            amount_str,
            truncate(&record.description, 36),
            flag
        );
    }

    Ok(())
}
