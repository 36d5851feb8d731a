//! Ledger and inbox summary

use anyhow::Result;

use tally_core::db::Database;
use tally_core::models::PayloadStatus;

pub fn cmd_status(db: &Database, user: i64) -> Result<()> {
    let records = db.list_active_records(user, None, None, None)?;
    let flagged = records
        .iter()
        .filter(|r| r.metadata.duplicate_suspicion.is_some())
        .count();

    println!();
    println!("📊 Tally status (user {})", user);
    println!("   ─────────────────────────────────────────────");
    println!("   Active records:      {}", records.len());
    println!("   Flagged as suspect:  {}", flagged);

    println!();
    println!("   Inbox:");
    for status in [
        PayloadStatus::Pending,
        PayloadStatus::Processing,
        PayloadStatus::Processed,
        PayloadStatus::Failed,
        PayloadStatus::Ignored,
    ] {
        let count = db.list_payloads(user, Some(status), 10000, 0)?.len();
        if count > 0 {
            println!("   {:>12}: {}", status.as_str(), count);
        }
    }

    let failed = db.list_payloads(user, Some(PayloadStatus::Failed), 1, 0)?;
    if !failed.is_empty() {
        println!();
        println!("   Some payloads failed. Inspect and retry with:");
        println!("     tally payload show --id <id>");
        println!("     tally payload retry --id <id>");
    }

    Ok(())
}
