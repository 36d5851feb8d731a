//! Domain models for Tally

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Money flow direction. Amounts are stored non-negative; the direction
/// carries the sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Debit,
    Credit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debit" => Ok(Self::Debit),
            "credit" => Ok(Self::Credit),
            _ => Err(format!("Unknown direction: {}", s)),
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single ledger entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialRecord {
    pub id: i64,
    pub user_id: i64,
    pub account_id: i64,
    /// Always non-negative; see `direction`
    pub amount: Decimal,
    pub currency: String,
    pub direction: Direction,
    /// Occurrence date (calendar date, no time component)
    pub date: NaiveDate,
    pub description: String,
    pub category: Option<String>,
    /// Identifier assigned by an upstream source such as a bank feed
    pub external_id: Option<String>,
    /// Channel the record arrived through (email, sms, manual, statement)
    pub source: String,
    pub metadata: RecordMetadata,
    /// Soft-deleted records are excluded from matching and reporting but
    /// never physically erased
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A new ledger entry to be persisted (before DB insertion)
#[derive(Debug, Clone)]
pub struct NewFinancialRecord {
    pub user_id: i64,
    pub account_id: i64,
    pub amount: Decimal,
    pub currency: String,
    pub direction: Direction,
    pub date: NaiveDate,
    pub description: String,
    pub category: Option<String>,
    pub external_id: Option<String>,
    pub source: String,
    pub metadata: RecordMetadata,
}

/// Audit metadata stored in the record's single JSON column.
///
/// Merge history and duplicate suspicion are typed so the audit trail is
/// append-only by construction; `extra` holds the free-form key/value map
/// that upstream sources attach and that the merge-metadata strategy copies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merge_history: Vec<MergeHistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_suspicion: Option<DuplicateSuspicion>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, Value>,
}

impl RecordMetadata {
    pub fn is_empty(&self) -> bool {
        self.merge_history.is_empty() && self.duplicate_suspicion.is_none() && self.extra.is_empty()
    }
}

/// One merge recorded on the surviving primary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeHistoryEntry {
    /// Id of the soft-deleted duplicate folded into this record
    pub merged_id: i64,
    pub merged_at: DateTime<Utc>,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub strategy: MergeStrategy,
}

/// Annotation written by the creation-time duplicate guard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateSuspicion {
    /// Best-scoring existing record
    pub candidate_id: i64,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub requires_user_review: bool,
    pub likely_duplicate: bool,
    pub detected_at: DateTime<Utc>,
}

/// Child line item of a record (receipt lines, order positions)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordItem {
    pub id: i64,
    pub record_id: i64,
    pub label: String,
    pub amount: Decimal,
    pub quantity: Option<f64>,
}

/// A new line item to attach to a record
#[derive(Debug, Clone)]
pub struct NewRecordItem {
    pub label: String,
    pub amount: Decimal,
    pub quantity: Option<f64>,
}

/// A scored match against a reference record. Transient, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateCandidate {
    pub record: FinancialRecord,
    /// 0.0 - 1.0
    pub confidence: f64,
    /// Matched-signal reason codes, in check order
    pub reasons: Vec<String>,
}

/// One primary record plus its matched duplicates from a detection pass.
/// Transient, discarded after merge or manual review.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroup {
    pub primary: FinancialRecord,
    /// Sorted descending by confidence
    pub duplicates: Vec<DuplicateCandidate>,
}

/// How duplicate records are folded into a primary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Soft-delete duplicates, copy nothing
    KeepPrimary,
    /// Reassign line items from duplicate to primary, then soft-delete
    MergeDetails,
    /// Copy metadata keys absent on the primary, record merge history,
    /// then soft-delete
    MergeMetadata,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeepPrimary => "keep_primary",
            Self::MergeDetails => "merge_details",
            Self::MergeMetadata => "merge_metadata",
        }
    }
}

impl std::str::FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "keep_primary" => Ok(Self::KeepPrimary),
            "merge_details" => Ok(Self::MergeDetails),
            "merge_metadata" => Ok(Self::MergeMetadata),
            _ => Err(format!("Unknown merge strategy: {}", s)),
        }
    }
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Processing status of a raw inbound payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PayloadStatus {
    #[default]
    Pending,
    Processing,
    Processed,
    Failed,
    Ignored,
}

impl PayloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Failed => "failed",
            Self::Ignored => "ignored",
        }
    }

    /// Terminal states admit no further status change
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Processed | Self::Ignored)
    }

    /// Allowed transitions of the ingestion lifecycle.
    ///
    /// pending -> processing | ignored
    /// processing -> processed | failed | ignored
    /// failed -> pending (explicit retry)
    pub fn can_transition_to(&self, to: PayloadStatus) -> bool {
        use PayloadStatus::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Pending, Ignored)
                | (Processing, Processed)
                | (Processing, Failed)
                | (Processing, Ignored)
                | (Failed, Pending)
        )
    }
}

impl std::str::FromStr for PayloadStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "processed" => Ok(Self::Processed),
            "failed" => Ok(Self::Failed),
            "ignored" => Ok(Self::Ignored),
            _ => Err(format!("Unknown payload status: {}", s)),
        }
    }
}

impl std::fmt::Display for PayloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One inbound message (email/SMS/manual upload) before classification.
///
/// Never deleted; retained for training and audit. `linked_record_ids` are
/// loose references: a record may be deleted later without invalidating the
/// payload, so lookups must tolerate dangling ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPayload {
    pub id: i64,
    pub user_id: i64,
    /// Natural key, globally unique; prevents double-ingestion
    pub message_id: String,
    pub source: String,
    pub sender: Option<String>,
    pub subject: Option<String>,
    pub body: String,
    /// Opaque full payload kept for audit/training
    pub raw_blob: Option<String>,
    pub received_at: DateTime<Utc>,
    pub status: PayloadStatus,
    pub attempts: i64,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Append-only; never truncated or rewritten
    pub event_log: Vec<EventLogEntry>,
    /// Append-only fetch/upload provenance, distinct from the event log
    pub ingest_log: Vec<IngestEvent>,
    pub linked_record_ids: Vec<i64>,
    /// Append-only post-hoc human corrections
    pub feedback_log: Vec<FeedbackEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RawPayload {
    /// Coarse training label: `transaction` when any record was linked,
    /// `non_transaction` when feedback explicitly marked the payload as
    /// ignored/spam/not-a-transaction, indeterminate otherwise.
    pub fn training_label(&self) -> Option<TrainingLabel> {
        if !self.linked_record_ids.is_empty() {
            return Some(TrainingLabel::Transaction);
        }
        if self
            .feedback_log
            .iter()
            .any(|f| f.kind.marks_non_transaction())
        {
            return Some(TrainingLabel::NonTransaction);
        }
        None
    }
}

/// A new inbound payload to be persisted
#[derive(Debug, Clone)]
pub struct NewRawPayload {
    pub user_id: i64,
    pub message_id: String,
    pub source: String,
    pub sender: Option<String>,
    pub subject: Option<String>,
    pub body: String,
    pub raw_blob: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// Severity of a lifecycle event-log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warning,
    Error,
}

impl EventLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// One entry of a payload's processing audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub at: DateTime<Utc>,
    pub level: EventLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

/// One fetch/upload provenance entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestEvent {
    pub at: DateTime<Utc>,
    /// e.g. "fetched", "uploaded"
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Kind of post-hoc user feedback on a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    /// User marked the payload as not describing a transaction
    NotTransaction,
    Spam,
    Ignored,
    /// User corrected an extracted field
    Correction,
    Other,
}

impl FeedbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotTransaction => "not_transaction",
            Self::Spam => "spam",
            Self::Ignored => "ignored",
            Self::Correction => "correction",
            Self::Other => "other",
        }
    }

    /// Feedback kinds that mark the payload as non-transactional for
    /// training-label purposes
    pub fn marks_non_transaction(&self) -> bool {
        matches!(self, Self::NotTransaction | Self::Spam | Self::Ignored)
    }
}

impl std::str::FromStr for FeedbackKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "not_transaction" => Ok(Self::NotTransaction),
            "spam" => Ok(Self::Spam),
            "ignored" => Ok(Self::Ignored),
            "correction" => Ok(Self::Correction),
            "other" => Ok(Self::Other),
            _ => Err(format!("Unknown feedback kind: {}", s)),
        }
    }
}

impl std::fmt::Display for FeedbackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One user-feedback entry on a payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub at: DateTime<Utc>,
    pub kind: FeedbackKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Coarse training label derived from a payload's outcome and feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingLabel {
    Transaction,
    NonTransaction,
}

impl TrainingLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transaction => "transaction",
            Self::NonTransaction => "non_transaction",
        }
    }
}
