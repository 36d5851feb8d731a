//! Tally Core Library
//!
//! Shared functionality for the Tally personal finance ledger:
//! - Database access and migrations
//! - Fuzzy similarity scoring between financial records
//! - Duplicate group detection over a user's ledger
//! - Merge strategies with transactional folds and soft deletion
//! - Creation-time duplicate annotation
//! - Ingestion lifecycle tracking for raw inbound payloads

pub mod db;
pub mod dedup;
pub mod error;
pub mod guard;
pub mod ingest;
pub mod merge;
pub mod models;
pub mod score;

pub use db::{Database, PayloadInsert};
pub use dedup::{DetectionFilter, DetectionReport, DetectionStats, DuplicateDetector};
pub use error::{Error, Result};
pub use guard::{create_record_checked, DuplicateGuard};
pub use ingest::{derive_message_id, IngestTracker};
pub use merge::{AutoMergeReport, MergeOutcome, MergeStatus, Merger};
pub use models::{
    Direction, DuplicateCandidate, DuplicateGroup, DuplicateSuspicion, EventLevel, EventLogEntry,
    FeedbackEntry, FeedbackKind, FinancialRecord, IngestEvent, MergeHistoryEntry, MergeStrategy,
    NewFinancialRecord, NewRawPayload, NewRecordItem, PayloadStatus, RawPayload, RecordItem,
    RecordMetadata, TrainingLabel,
};
pub use score::{score_pair, similarity_ratio, Fingerprint, MatchConfig, MatchScore};
