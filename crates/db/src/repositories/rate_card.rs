use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::Row;

use phasequote_core::cpq::catalog::{CatalogError, PriceEntry, RateCardSource};
use phasequote_core::cpq::refresh::{
    PriceLookup, PriceLookupError, PriceLookupOutcome, PriceLookupRequest, PriceQuote,
};
use phasequote_core::domain::product::ProductId;
use phasequote_core::domain::rate_card::{RateCard, RateCardId};

use super::{get_date, get_decimal, get_optional_date, get_text, RepositoryError};
use crate::DbPool;

/// Rate cards and their dated price rows.
pub struct SqlRateCardRepository {
    pool: DbPool,
}

impl SqlRateCardRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn save_rate_card(&self, rate_card: &RateCard) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO rate_card (id, name, is_default, valid_from, valid_to)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 is_default = excluded.is_default,
                 valid_from = excluded.valid_from,
                 valid_to = excluded.valid_to",
        )
        .bind(&rate_card.id.0)
        .bind(&rate_card.name)
        .bind(rate_card.is_default)
        .bind(rate_card.valid_from.to_string())
        .bind(rate_card.valid_to.map(|date| date.to_string()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn add_price(
        &self,
        rate_card_id: &RateCardId,
        product_id: &ProductId,
        entry: &PriceEntry,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO rate_card_price (rate_card_id, product_id, one_time_price,
                                          recurring_price, effective_from, effective_to)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&rate_card_id.0)
        .bind(&product_id.0)
        .bind(entry.one_time_price.to_string())
        .bind(entry.recurring_price.to_string())
        .bind(entry.effective_from.to_string())
        .bind(entry.effective_to.map(|date| date.to_string()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn default_rate_card_id(&self) -> Result<Option<RateCardId>, RepositoryError> {
        let id: Option<String> =
            sqlx::query_scalar("SELECT id FROM rate_card WHERE is_default = 1 LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;
        Ok(id.map(RateCardId))
    }

    async fn find_price(
        &self,
        rate_card_id: &RateCardId,
        request: &PriceLookupRequest,
    ) -> Result<Option<PriceEntry>, RepositoryError> {
        let as_of = request.as_of.to_string();
        let row = sqlx::query(
            "SELECT CAST(one_time_price AS TEXT) AS one_time_price,
                    CAST(recurring_price AS TEXT) AS recurring_price,
                    effective_from, effective_to
             FROM rate_card_price
             WHERE rate_card_id = ? AND product_id = ?
               AND effective_from <= ?
               AND (effective_to IS NULL OR effective_to >= ?)
             ORDER BY effective_from DESC, id DESC
             LIMIT 1",
        )
        .bind(&rate_card_id.0)
        .bind(&request.product_id.0)
        .bind(&as_of)
        .bind(&as_of)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(PriceEntry {
                one_time_price: get_decimal(&row, "one_time_price")?,
                recurring_price: get_decimal(&row, "recurring_price")?,
                effective_from: get_date(&row, "effective_from")?,
                effective_to: get_optional_date(&row, "effective_to")?,
            })
        })
        .transpose()
    }
}

fn lookup_error(error: RepositoryError) -> PriceLookupError {
    match error {
        RepositoryError::Database(error) => PriceLookupError::Transport(error.to_string()),
        RepositoryError::Decode(message) => PriceLookupError::Decode(message),
    }
}

fn row_to_rate_card(row: &sqlx::sqlite::SqliteRow) -> Result<RateCard, RepositoryError> {
    let is_default: bool =
        row.try_get("is_default").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    Ok(RateCard {
        id: RateCardId(get_text(row, "id")?),
        name: get_text(row, "name")?,
        is_default,
        valid_from: get_date(row, "valid_from")?,
        valid_to: get_optional_date(row, "valid_to")?,
    })
}

#[async_trait]
impl PriceLookup for SqlRateCardRepository {
    async fn lookup(
        &self,
        request: &PriceLookupRequest,
    ) -> Result<PriceLookupOutcome, PriceLookupError> {
        let rate_card_id = match &request.rate_card_id {
            Some(id) => id.clone(),
            None => match self.default_rate_card_id().await.map_err(lookup_error)? {
                Some(id) => id,
                None => {
                    return Ok(PriceLookupOutcome::NotFound {
                        reason: Some("no default rate card configured".to_string()),
                    })
                }
            },
        };

        let entry = self.find_price(&rate_card_id, request).await.map_err(lookup_error)?;
        Ok(match entry {
            Some(entry) => PriceLookupOutcome::Found(PriceQuote {
                one_time_price: entry.one_time_price,
                recurring_price: entry.recurring_price,
                rate_card_id: Some(rate_card_id),
            }),
            None => PriceLookupOutcome::NotFound { reason: None },
        })
    }
}

#[async_trait]
impl RateCardSource for SqlRateCardRepository {
    async fn list_rate_cards(
        &self,
        active_on: Option<NaiveDate>,
    ) -> Result<Vec<RateCard>, CatalogError> {
        let active_on = active_on.map(|date| date.to_string());
        let rows = sqlx::query(
            "SELECT id, name, is_default, valid_from, valid_to
             FROM rate_card
             WHERE ?1 IS NULL OR (valid_from <= ?1 AND (valid_to IS NULL OR valid_to >= ?1))
             ORDER BY is_default DESC, name ASC",
        )
        .bind(active_on)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CatalogError::Unavailable(e.to_string()))?;

        rows.iter()
            .map(row_to_rate_card)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CatalogError::Decode(e.to_string()))
    }
}
