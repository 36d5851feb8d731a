//! Tally CLI - Personal finance ledger with duplicate reconciliation
//!
//! Usage:
//!   tally init                        Initialize database
//!   tally payload ingest --body ...   Store an inbound payload
//!   tally dedup find --user 1         Report duplicate groups
//!   tally dedup auto --user 1         Merge high-confidence duplicates

mod cli;
mod commands;


use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;
use commands::open_db;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    match cli.command {
        Commands::Init => commands::cmd_init(&cli.db),
        Commands::Status { user } => {
            let db = open_db(&cli.db)?;
            commands::cmd_status(&db, user)
        }
        Commands::Record { command } => {
            let db = open_db(&cli.db)?;
            match command {
                RecordCommands::Add {
                    user,
                    account,
                    amount,
                    date,
                    description,
                    direction,
                    currency,
                    category,
                    external_id,
                    source,
                    matching,
                } => commands::cmd_record_add(
                    &db,
                    user,
                    account,
                    &amount,
                    &date,
                    &description,
                    &direction,
                    &currency,
                    category,
                    external_id,
                    &source,
                    &matching.to_config()?,
                ),
                RecordCommands::List { user, limit } => commands::cmd_record_list(&db, user, limit),
            }
        }
        Commands::Payload { command } => {
            let db = open_db(&cli.db)?;
            match command {
                PayloadCommands::Ingest {
                    user,
                    source,
                    message_id,
                    sender,
                    subject,
                    body,
                } => commands::cmd_payload_ingest(
                    &db, user, &source, message_id, sender, subject, &body,
                ),
                PayloadCommands::List {
                    user,
                    status,
                    limit,
                } => commands::cmd_payload_list(&db, user, status.as_deref(), limit),
                PayloadCommands::Show { id } => commands::cmd_payload_show(&db, id),
                PayloadCommands::Retry { id } => commands::cmd_payload_retry(&db, id),
                PayloadCommands::Ignore { id, reason } => {
                    commands::cmd_payload_ignore(&db, id, &reason)
                }
                PayloadCommands::Feedback { id, kind, note } => {
                    commands::cmd_payload_feedback(&db, id, &kind, note)
                }
            }
        }
        Commands::Dedup { command } => {
            let db = open_db(&cli.db)?;
            match command {
                DedupCommands::Find {
                    user,
                    from,
                    to,
                    limit,
                    json,
                    matching,
                } => commands::cmd_dedup_find(
                    &db,
                    user,
                    from.as_deref(),
                    to.as_deref(),
                    limit,
                    json,
                    &matching.to_config()?,
                ),
                DedupCommands::Merge {
                    primary,
                    duplicates,
                    strategy,
                    matching,
                } => commands::cmd_dedup_merge(
                    &db,
                    primary,
                    &duplicates,
                    &strategy,
                    &matching.to_config()?,
                ),
                DedupCommands::Auto {
                    user,
                    from,
                    to,
                    limit,
                    matching,
                } => commands::cmd_dedup_auto(
                    &db,
                    user,
                    from.as_deref(),
                    to.as_deref(),
                    limit,
                    &matching.to_config()?,
                ),
            }
        }
    }
}
