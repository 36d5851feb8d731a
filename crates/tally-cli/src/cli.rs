//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI
//! arguments. The actual command implementations are in the `commands`
//! module.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tally_core::score::MatchConfig;

/// Tally - Keep one clean ledger out of messy, duplicated sources
#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Personal finance ledger with duplicate reconciliation", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, default_value = "tally.db", global = true)]
    pub db: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Matching tunables, overriding the built-in defaults.
///
/// Validated once up front; invalid values abort before any work happens.
#[derive(Args)]
pub struct MatchArgs {
    /// Minimum score to consider two records duplicates (default 0.75)
    #[arg(long)]
    pub merge_threshold: Option<f64>,

    /// Relative amount tolerance, 0.01 = 1% (default 0.01)
    #[arg(long)]
    pub amount_tolerance: Option<f64>,

    /// Date window in days (default 1)
    #[arg(long)]
    pub date_window: Option<i64>,

    /// Score required for unattended merging (default 0.95)
    #[arg(long)]
    pub auto_threshold: Option<f64>,

    /// Score at which a new record is flagged likely_duplicate (default 0.98)
    #[arg(long)]
    pub likely_threshold: Option<f64>,
}

impl MatchArgs {
    pub fn to_config(&self) -> Result<MatchConfig> {
        let mut config = MatchConfig::default();
        if let Some(v) = self.merge_threshold {
            config.merge_threshold = v;
        }
        if let Some(v) = self.amount_tolerance {
            config.amount_tolerance = v;
        }
        if let Some(v) = self.date_window {
            config.date_window_days = v;
        }
        if let Some(v) = self.auto_threshold {
            config.auto_merge_threshold = v;
        }
        if let Some(v) = self.likely_threshold {
            config.likely_duplicate_threshold = v;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database
    Init,

    /// Show ledger and inbox status
    Status {
        /// User id
        #[arg(long, default_value_t = 1)]
        user: i64,
    },

    /// Manage ledger records
    Record {
        #[command(subcommand)]
        command: RecordCommands,
    },

    /// Manage inbound payloads
    Payload {
        #[command(subcommand)]
        command: PayloadCommands,
    },

    /// Find and merge duplicate records
    Dedup {
        #[command(subcommand)]
        command: DedupCommands,
    },
}

#[derive(Subcommand)]
pub enum RecordCommands {
    /// Add a record manually (runs the duplicate check after insert)
    Add {
        /// User id
        #[arg(long, default_value_t = 1)]
        user: i64,

        /// Account id
        #[arg(long)]
        account: i64,

        /// Amount, non-negative (e.g. 12.50)
        #[arg(long)]
        amount: String,

        /// Occurrence date (YYYY-MM-DD)
        #[arg(long)]
        date: String,

        /// Free-text description
        #[arg(short, long, default_value = "")]
        description: String,

        /// debit or credit
        #[arg(long, default_value = "debit")]
        direction: String,

        /// Currency code
        #[arg(long, default_value = "USD")]
        currency: String,

        /// Category label
        #[arg(long)]
        category: Option<String>,

        /// Identifier from an upstream source
        #[arg(long)]
        external_id: Option<String>,

        /// Source tag (email, sms, manual, statement)
        #[arg(long, default_value = "manual")]
        source: String,

        #[command(flatten)]
        matching: MatchArgs,
    },

    /// List active records
    List {
        /// User id
        #[arg(long, default_value_t = 1)]
        user: i64,

        /// Maximum rows to show
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
}

#[derive(Subcommand)]
pub enum PayloadCommands {
    /// Store an inbound payload (idempotent on message id)
    Ingest {
        /// User id
        #[arg(long, default_value_t = 1)]
        user: i64,

        /// Source tag (email, sms, manual)
        #[arg(long, default_value = "manual")]
        source: String,

        /// Natural message id; derived from the content when omitted
        #[arg(long)]
        message_id: Option<String>,

        /// Sender address or number
        #[arg(long)]
        sender: Option<String>,

        /// Subject or snippet
        #[arg(long)]
        subject: Option<String>,

        /// Body text
        #[arg(long)]
        body: String,
    },

    /// List payloads
    List {
        /// User id
        #[arg(long, default_value_t = 1)]
        user: i64,

        /// Filter by status (pending, processing, processed, failed, ignored)
        #[arg(long)]
        status: Option<String>,

        /// Maximum rows to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Show one payload with its audit trail
    Show {
        /// Payload id
        #[arg(long)]
        id: i64,
    },

    /// Reset a failed payload to pending
    Retry {
        /// Payload id
        #[arg(long)]
        id: i64,
    },

    /// Dispose of a payload without linking a record
    Ignore {
        /// Payload id
        #[arg(long)]
        id: i64,

        /// Why it is being ignored
        #[arg(long, default_value = "not a transaction")]
        reason: String,
    },

    /// Record user feedback on a payload
    Feedback {
        /// Payload id
        #[arg(long)]
        id: i64,

        /// not_transaction, spam, ignored, correction, other
        #[arg(long)]
        kind: String,

        /// Optional note
        #[arg(long)]
        note: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum DedupCommands {
    /// Find duplicate groups and report them
    Find {
        /// User id
        #[arg(long, default_value_t = 1)]
        user: i64,

        /// Only scan records on or after this date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,

        /// Only scan records on or before this date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,

        /// Scan at most this many records
        #[arg(long)]
        limit: Option<i64>,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        matching: MatchArgs,
    },

    /// Merge listed duplicates into a primary record
    Merge {
        /// Primary record id (the survivor)
        #[arg(long)]
        primary: i64,

        /// Duplicate record ids, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        duplicates: Vec<i64>,

        /// keep_primary, merge_details, or merge_metadata
        #[arg(long, default_value = "merge_metadata")]
        strategy: String,

        #[command(flatten)]
        matching: MatchArgs,
    },

    /// Merge every group clearing the auto-merge bar
    Auto {
        /// User id
        #[arg(long, default_value_t = 1)]
        user: i64,

        /// Only scan records on or after this date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,

        /// Only scan records on or before this date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,

        /// Scan at most this many records
        #[arg(long)]
        limit: Option<i64>,

        #[command(flatten)]
        matching: MatchArgs,
    },
}
