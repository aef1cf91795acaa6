use std::str::FromStr;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::Row;
use thiserror::Error;

use phasequote_core::domain::quotation::{Quotation, QuotationId, QuotationStatus};

pub mod memory;
pub mod product;
pub mod quotation;
pub mod rate_card;

pub use memory::InMemoryQuotationRepository;
pub use product::SqlProductRepository;
pub use quotation::SqlQuotationRepository;
pub use rate_card::SqlRateCardRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Identity and status of a quotation as stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SavedQuotation {
    pub id: QuotationId,
    pub status: QuotationStatus,
}

#[async_trait]
pub trait QuotationRepository: Send + Sync {
    async fn find_by_id(&self, id: &QuotationId) -> Result<Option<Quotation>, RepositoryError>;

    /// Replaces the stored tree with `quotation`, computed totals included.
    async fn save(&self, quotation: &Quotation) -> Result<SavedQuotation, RepositoryError>;
}

pub(crate) fn get_text(row: &sqlx::sqlite::SqliteRow, column: &str) -> Result<String, RepositoryError> {
    row.try_get(column).map_err(|e| RepositoryError::Decode(e.to_string()))
}

pub(crate) fn get_optional_text(
    row: &sqlx::sqlite::SqliteRow,
    column: &str,
) -> Result<Option<String>, RepositoryError> {
    row.try_get(column).map_err(|e| RepositoryError::Decode(e.to_string()))
}

pub(crate) fn get_decimal(
    row: &sqlx::sqlite::SqliteRow,
    column: &str,
) -> Result<Decimal, RepositoryError> {
    let raw = get_text(row, column)?;
    Decimal::from_str(raw.trim())
        .map_err(|e| RepositoryError::Decode(format!("invalid decimal in `{column}`: {e}")))
}

pub(crate) fn get_u32(row: &sqlx::sqlite::SqliteRow, column: &str) -> Result<u32, RepositoryError> {
    let value: i64 = row.try_get(column).map_err(|e| RepositoryError::Decode(e.to_string()))?;
    u32::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("`{column}` out of range: {value}")))
}

pub(crate) fn parse_date(column: &str, raw: &str) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| RepositoryError::Decode(format!("invalid date in `{column}`: {e}")))
}

pub(crate) fn get_date(
    row: &sqlx::sqlite::SqliteRow,
    column: &str,
) -> Result<NaiveDate, RepositoryError> {
    parse_date(column, &get_text(row, column)?)
}

pub(crate) fn get_optional_date(
    row: &sqlx::sqlite::SqliteRow,
    column: &str,
) -> Result<Option<NaiveDate>, RepositoryError> {
    get_optional_text(row, column)?.map(|raw| parse_date(column, &raw)).transpose()
}
