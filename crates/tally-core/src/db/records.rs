//! Financial record operations

use chrono::{Duration, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use super::{fmt_datetime, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{FinancialRecord, NewFinancialRecord, NewRecordItem, RecordItem, RecordMetadata};
use crate::score::MatchConfig;

const RECORD_COLUMNS: &str = "id, user_id, account_id, amount, currency, direction, date, \
     description, category, external_id, source, metadata, deleted, created_at, updated_at";

/// Map one `financial_records` row. Column order must match RECORD_COLUMNS.
fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FinancialRecord> {
    let amount_str: String = row.get(3)?;
    let amount = amount_str.parse::<Decimal>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let date_str: String = row.get(6)?;
    let date = date_str.parse::<NaiveDate>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let direction_str: String = row.get(5)?;
    let metadata_json: Option<String> = row.get(11)?;
    let created_at_str: String = row.get(13)?;
    let updated_at_str: String = row.get(14)?;

    Ok(FinancialRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        account_id: row.get(2)?,
        amount,
        currency: row.get(4)?,
        direction: direction_str.parse().unwrap_or_default(),
        date,
        description: row.get(7)?,
        category: row.get(8)?,
        external_id: row.get(9)?,
        source: row.get(10)?,
        metadata: metadata_json
            .and_then(|j| serde_json::from_str(&j).ok())
            .unwrap_or_default(),
        deleted: row.get(12)?,
        created_at: parse_datetime(&created_at_str),
        updated_at: parse_datetime(&updated_at_str),
    })
}

/// Load one record by id on an explicit connection, for use inside merge
/// transactions.
pub(crate) fn fetch_record(conn: &Connection, id: i64) -> Result<Option<FinancialRecord>> {
    let sql = format!(
        "SELECT {} FROM financial_records WHERE id = ?",
        RECORD_COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![id], record_from_row)
        .optional()?)
}

/// Write a record's metadata column on an explicit connection. Returns the
/// number of rows affected so callers can detect a vanished row.
pub(crate) fn write_metadata(
    conn: &Connection,
    record_id: i64,
    metadata: &RecordMetadata,
) -> Result<usize> {
    let json = serde_json::to_string(metadata)?;
    let n = conn.execute(
        "UPDATE financial_records SET metadata = ?, updated_at = ? WHERE id = ?",
        params![json, fmt_datetime(Utc::now()), record_id],
    )?;
    Ok(n)
}

/// Soft-delete a record on an explicit connection, only if still active.
/// Returns the number of rows affected.
pub(crate) fn soft_delete(conn: &Connection, record_id: i64) -> Result<usize> {
    let n = conn.execute(
        "UPDATE financial_records SET deleted = 1, updated_at = ? WHERE id = ? AND deleted = 0",
        params![fmt_datetime(Utc::now()), record_id],
    )?;
    Ok(n)
}

/// Reassign all line items from one record to another on an explicit
/// connection.
pub(crate) fn reassign_items(conn: &Connection, from_record: i64, to_record: i64) -> Result<usize> {
    let n = conn.execute(
        "UPDATE record_items SET record_id = ? WHERE record_id = ?",
        params![to_record, from_record],
    )?;
    Ok(n)
}

impl Database {
    /// Insert a financial record, returning its id.
    ///
    /// Amounts must be non-negative; the money-flow sign lives in
    /// `direction`.
    pub fn insert_record(&self, record: &NewFinancialRecord) -> Result<i64> {
        if record.amount.is_sign_negative() {
            return Err(Error::InvalidData(format!(
                "record amount must be non-negative, got {}",
                record.amount
            )));
        }

        let conn = self.conn()?;
        let metadata_json = if record.metadata.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&record.metadata)?)
        };

        conn.execute(
            r#"
            INSERT INTO financial_records
                (user_id, account_id, amount, currency, direction, date, description,
                 category, external_id, source, metadata)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                record.user_id,
                record.account_id,
                record.amount.to_string(),
                record.currency,
                record.direction.as_str(),
                record.date.to_string(),
                record.description,
                record.category,
                record.external_id,
                record.source,
                metadata_json,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Get a record by id
    pub fn get_record(&self, id: i64) -> Result<FinancialRecord> {
        let conn = self.conn()?;
        fetch_record(&conn, id)?.ok_or_else(|| Error::NotFound(format!("record {}", id)))
    }

    /// Look up a record by id, tolerating absence.
    ///
    /// This is the lookup used for loose references (payload linked ids):
    /// a dangling id yields None, never an error.
    pub fn find_record(&self, id: i64) -> Result<Option<FinancialRecord>> {
        let conn = self.conn()?;
        fetch_record(&conn, id)
    }

    /// List a user's active (non-deleted) records, newest first.
    ///
    /// Optional date bounds and a row limit keep long batch runs boundable.
    pub fn list_active_records(
        &self,
        user_id: i64,
        date_from: Option<NaiveDate>,
        date_to: Option<NaiveDate>,
        limit: Option<i64>,
    ) -> Result<Vec<FinancialRecord>> {
        let conn = self.conn()?;

        let mut sql = format!(
            "SELECT {} FROM financial_records WHERE user_id = ? AND deleted = 0",
            RECORD_COLUMNS
        );
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(user_id)];

        if let Some(from) = date_from {
            sql.push_str(" AND date >= ?");
            params_vec.push(Box::new(from.to_string()));
        }
        if let Some(to) = date_to {
            sql.push_str(" AND date <= ?");
            params_vec.push(Box::new(to.to_string()));
        }

        sql.push_str(" ORDER BY date DESC, id DESC");

        if let Some(n) = limit {
            sql.push_str(" LIMIT ?");
            params_vec.push(Box::new(n));
        }

        let params_refs: Vec<&dyn rusqlite::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_refs.as_slice(), record_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Soft-delete a record. The row is never physically erased.
    pub fn soft_delete_record(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        let n = soft_delete(&conn, id)?;
        if n == 0 {
            return Err(Error::NotFound(format!("active record {}", id)));
        }
        Ok(())
    }

    /// Overwrite a record's metadata directly, bypassing the creation path.
    pub fn update_record_metadata(&self, id: i64, metadata: &RecordMetadata) -> Result<()> {
        let conn = self.conn()?;
        let n = write_metadata(&conn, id, metadata)?;
        if n == 0 {
            return Err(Error::NotFound(format!("record {}", id)));
        }
        Ok(())
    }

    /// Narrow the record set to a candidate window around a reference record.
    ///
    /// Active records of the same user and account whose amount lies within
    /// the tolerance band and date within the window, or whose external id
    /// exactly matches the reference's. The reference itself is excluded.
    ///
    /// The SQL amount band goes through CAST(... AS REAL) and is padded, so
    /// it is a coarse pre-filter only; the scorer re-checks amounts in
    /// fixed-point. This window exists for performance and never replaces
    /// scoring.
    pub fn find_candidate_rows(
        &self,
        reference: &FinancialRecord,
        config: &MatchConfig,
    ) -> Result<Vec<FinancialRecord>> {
        let conn = self.conn()?;

        let center = reference.amount.to_f64().unwrap_or(0.0);
        // |a - b| / b <= tol  =>  b in [a/(1+tol), a/(1-tol)]; padded for
        // REAL rounding
        let amount_low = center / (1.0 + config.amount_tolerance) - 0.01;
        let amount_high = center / (1.0 - config.amount_tolerance) + 0.01;

        let window = Duration::days(config.date_window_days);
        let date_low = (reference.date - window).to_string();
        let date_high = (reference.date + window).to_string();

        let external_id = reference
            .external_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let sql = format!(
            r#"
            SELECT {}
            FROM financial_records
            WHERE user_id = ?
              AND account_id = ?
              AND deleted = 0
              AND id != ?
              AND (
                (CAST(amount AS REAL) BETWEEN ? AND ? AND date BETWEEN ? AND ?)
                OR (? IS NOT NULL AND external_id = ?)
              )
            ORDER BY date DESC, id DESC
            "#,
            RECORD_COLUMNS
        );

        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(
                params![
                    reference.user_id,
                    reference.account_id,
                    reference.id,
                    amount_low,
                    amount_high,
                    date_low,
                    date_high,
                    external_id,
                    external_id,
                ],
                record_from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Attach a line item to a record
    pub fn add_record_item(&self, record_id: i64, item: &NewRecordItem) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO record_items (record_id, label, amount, quantity) VALUES (?, ?, ?, ?)",
            params![record_id, item.label, item.amount.to_string(), item.quantity],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// List a record's line items
    pub fn list_record_items(&self, record_id: i64) -> Result<Vec<RecordItem>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, record_id, label, amount, quantity FROM record_items \
             WHERE record_id = ? ORDER BY id",
        )?;

        let items = stmt
            .query_map(params![record_id], |row| {
                let amount_str: String = row.get(3)?;
                let amount = amount_str.parse::<Decimal>().map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        3,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?;
                Ok(RecordItem {
                    id: row.get(0)?,
                    record_id: row.get(1)?,
                    label: row.get(2)?,
                    amount,
                    quantity: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(items)
    }
}
