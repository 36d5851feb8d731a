//! Similarity scoring between financial records
//!
//! A pure, deterministic scorer that decides whether two already-structured
//! records describe the same real-world event. Signals are checked in a
//! fixed order and their weights are additive; only an external-identifier
//! match short-circuits.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::error::{Error, Result};
use crate::models::{Direction, FinancialRecord};

/// Matching tunables
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Minimum confidence to consider two records duplicates
    pub merge_threshold: f64,
    /// Relative amount tolerance (0.01 = 1%)
    pub amount_tolerance: f64,
    /// Date window in days for the near-date signal
    pub date_window_days: i64,
    /// Description similarity ratio counted as a near match
    pub description_similar_threshold: f64,
    /// Description similarity ratio counted as an exact match
    pub description_exact_threshold: f64,
    /// Stricter bar required for unattended merging
    pub auto_merge_threshold: f64,
    /// Bar at which the creation-time guard flags `likely_duplicate`
    pub likely_duplicate_threshold: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            merge_threshold: 0.75,
            amount_tolerance: 0.01,          // 1% relative difference
            date_window_days: 1,             // +/- 1 day
            description_similar_threshold: 0.80,
            description_exact_threshold: 0.95,
            auto_merge_threshold: 0.95,      // stricter than merge_threshold
            likely_duplicate_threshold: 0.98,
        }
    }
}

impl MatchConfig {
    /// Check tunables once at startup. Invalid values are configuration
    /// errors, not per-call failures.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("merge_threshold", self.merge_threshold),
            (
                "description_similar_threshold",
                self.description_similar_threshold,
            ),
            (
                "description_exact_threshold",
                self.description_exact_threshold,
            ),
            ("auto_merge_threshold", self.auto_merge_threshold),
            ("likely_duplicate_threshold", self.likely_duplicate_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(Error::Config(format!(
                    "{} must be in (0.0, 1.0], got {}",
                    name, value
                )));
            }
        }

        if !(0.0..1.0).contains(&self.amount_tolerance) {
            return Err(Error::Config(format!(
                "amount_tolerance must be in [0.0, 1.0), got {}",
                self.amount_tolerance
            )));
        }

        if self.date_window_days < 0 {
            return Err(Error::Config(format!(
                "date_window_days must be non-negative, got {}",
                self.date_window_days
            )));
        }

        if self.auto_merge_threshold < self.merge_threshold {
            return Err(Error::Config(format!(
                "auto_merge_threshold ({}) must not be below merge_threshold ({})",
                self.auto_merge_threshold, self.merge_threshold
            )));
        }

        Ok(())
    }
}

/// The comparable attributes of a record. Missing optional fields become
/// None/empty; extraction never fails.
#[derive(Debug, Clone)]
pub struct Fingerprint<'a> {
    pub amount: Decimal,
    pub date: NaiveDate,
    pub account_id: i64,
    /// Lower-cased, trimmed
    pub description: String,
    /// None when absent or blank
    pub external_id: Option<&'a str>,
    pub direction: Direction,
    pub category: Option<&'a str>,
    pub source: &'a str,
}

impl<'a> Fingerprint<'a> {
    pub fn of(record: &'a FinancialRecord) -> Self {
        Self {
            amount: record.amount,
            date: record.date,
            account_id: record.account_id,
            description: record.description.trim().to_lowercase(),
            external_id: record
                .external_id
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty()),
            direction: record.direction,
            category: record.category.as_deref().filter(|s| !s.is_empty()),
            source: record.source.as_str(),
        }
    }
}

/// Result of scoring one pair of records
#[derive(Debug, Clone, PartialEq)]
pub struct MatchScore {
    /// 0.0 - 1.0
    pub confidence: f64,
    /// Matched-signal reason codes, in check order
    pub reasons: Vec<String>,
}

// Signal weights in hundredths of a confidence point. Integer accumulation
// keeps sums exact so threshold comparisons behave at the boundary.
const W_AMOUNT_EXACT: u32 = 35;
const W_AMOUNT_TOLERANCE: u32 = 25;
const W_DATE_EXACT: u32 = 30;
const W_DATE_WINDOW: u32 = 15;
const W_SAME_ACCOUNT: u32 = 10;
const W_DESC_EXACT: u32 = 20;
const W_DESC_SIMILAR: u32 = 15;
const W_SAME_DIRECTION: u32 = 5;
const W_SAME_CATEGORY: u32 = 5;
const W_DIFFERENT_SOURCES: u32 = 10;

/// Score the confidence that `a` and `b` describe the same event.
///
/// `a` is the reference record, `b` the candidate. Checks run in a fixed
/// order and short-circuit only on the external-identifier match; the final
/// confidence is capped at 1.0.
pub fn score_pair(a: &FinancialRecord, b: &FinancialRecord, config: &MatchConfig) -> MatchScore {
    let fa = Fingerprint::of(a);
    let fb = Fingerprint::of(b);

    // 1. External identifier: the strongest signal, conclusive on its own
    if let (Some(ea), Some(eb)) = (fa.external_id, fb.external_id) {
        if ea == eb {
            return MatchScore {
                confidence: 1.0,
                reasons: vec!["external_id_exact_match".to_string()],
            };
        }
    }

    let mut points: u32 = 0;
    let mut reasons = Vec::new();

    // 2. Amount
    if fa.amount == fb.amount {
        points += W_AMOUNT_EXACT;
        reasons.push("amount_exact_match".to_string());
    } else if !fb.amount.is_zero() {
        let tolerance = Decimal::try_from(config.amount_tolerance).unwrap_or(Decimal::ZERO);
        let relative = ((fa.amount - fb.amount) / fb.amount).abs();
        if relative <= tolerance {
            points += W_AMOUNT_TOLERANCE;
            reasons.push("amount_within_tolerance".to_string());
        }
    }

    // 3. Date
    if fa.date == fb.date {
        points += W_DATE_EXACT;
        reasons.push("date_exact_match".to_string());
    } else {
        let days_apart = (fa.date - fb.date).num_days().abs();
        if days_apart <= config.date_window_days {
            points += W_DATE_WINDOW;
            reasons.push(format!("date_within_window_{}d", config.date_window_days));
        }
    }

    // 4. Account
    if fa.account_id == fb.account_id {
        points += W_SAME_ACCOUNT;
        reasons.push("same_account".to_string());
    }

    // 5. Description similarity (case-folded by the fingerprint)
    if !fa.description.is_empty() && !fb.description.is_empty() {
        let ratio = similarity_ratio(&fa.description, &fb.description);
        if ratio >= config.description_exact_threshold {
            points += W_DESC_EXACT;
            reasons.push("description_exact_match".to_string());
        } else if ratio >= config.description_similar_threshold {
            points += W_DESC_SIMILAR;
            reasons.push(format!(
                "description_similar_{}%",
                (ratio * 100.0).round() as i64
            ));
        }
    }

    // 6. Direction
    if fa.direction == fb.direction {
        points += W_SAME_DIRECTION;
        reasons.push("same_transaction_type".to_string());
    }

    // 7. Category
    if let (Some(ca), Some(cb)) = (fa.category, fb.category) {
        if ca == cb {
            points += W_SAME_CATEGORY;
            reasons.push("same_category".to_string());
        }
    }

    // 8. Source diversity: two channels reporting the same event is itself
    //    positive duplicate evidence
    if !fa.source.is_empty() && !fb.source.is_empty() && fa.source != fb.source {
        points += W_DIFFERENT_SOURCES;
        reasons.push(format!("different_sources_{}+{}", fa.source, fb.source));
    }

    MatchScore {
        confidence: points.min(100) as f64 / 100.0,
        reasons,
    }
}

/// Sequence similarity ratio between two strings, 0.0 - 1.0.
///
/// Ratcliff/Obershelp: twice the number of matching characters over the total
/// length, where matches are found by recursing around the longest common
/// substring. Operates on chars, so multi-byte text is safe.
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let matches = matching_chars(&a, &b);
    2.0 * matches as f64 / total as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let (ai, bi, len) = longest_common_substring(a, b);
    if len == 0 {
        return 0;
    }
    len + matching_chars(&a[..ai], &b[..bi]) + matching_chars(&a[ai + len..], &b[bi + len..])
}

fn longest_common_substring(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0usize, 0usize, 0usize);
    let mut prev = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        let mut cur = vec![0usize; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            if ca == cb {
                let run = prev[j] + 1;
                cur[j + 1] = run;
                if run > best.2 {
                    best = (i + 1 - run, j + 1 - run, run);
                }
            }
        }
        prev = cur;
    }
    best
}
