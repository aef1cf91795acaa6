use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use tracing::debug;

use phasequote_core::domain::product::{ProductId, ProductRef};
use phasequote_core::domain::quotation::{
    GroupDocument, GroupId, ItemDocument, ItemId, PhaseDocument, PhaseId, PriceWarning,
    PricingProvenance, Quotation, QuotationDocument, QuotationId, QuotationStatus,
};
use phasequote_core::domain::rate_card::RateCardId;

use super::{
    get_date, get_decimal, get_optional_date, get_optional_text, get_text, get_u32,
    QuotationRepository, RepositoryError, SavedQuotation,
};
use crate::DbPool;

pub struct SqlQuotationRepository {
    pool: DbPool,
}

impl SqlQuotationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Ids of every stored quotation, newest first.
    pub async fn list_ids(&self) -> Result<Vec<QuotationId>, RepositoryError> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM quotation ORDER BY created_at DESC, id ASC")
                .fetch_all(&self.pool)
                .await?;
        Ok(ids.into_iter().map(QuotationId).collect())
    }
}

fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("invalid timestamp in `{column}`: {e}")))
}

fn position(index: usize) -> i64 {
    i64::try_from(index).unwrap_or(i64::MAX)
}

fn row_to_item(row: &SqliteRow) -> Result<(GroupId, ItemDocument), RepositoryError> {
    let group_id = GroupId(get_text(row, "group_id")?);
    let warning = get_optional_text(row, "price_warning_json")?
        .map(|raw| serde_json::from_str::<PriceWarning>(&raw))
        .transpose()
        .map_err(|e| RepositoryError::Decode(format!("invalid price warning: {e}")))?;

    let item = ItemDocument {
        id: ItemId(get_text(row, "id")?),
        product: ProductRef {
            id: ProductId(get_text(row, "product_id")?),
            name: get_text(row, "product_name")?,
            sku: get_optional_text(row, "product_sku")?,
        },
        quantity: get_u32(row, "quantity")?,
        hrs_units: get_decimal(row, "hrs_units")?,
        one_time_price: get_decimal(row, "one_time_price")?,
        otp_discount_pct: get_decimal(row, "otp_discount_pct")?,
        recurring_price_monthly: get_decimal(row, "recurring_price_monthly")?,
        recurring_discount_pct: get_decimal(row, "recurring_discount_pct")?,
        location: get_text(row, "location")?,
        stock_status: get_text(row, "stock_status")?,
        note: get_text(row, "note")?,
        pricing: PricingProvenance {
            rate_card_id: get_optional_text(row, "priced_rate_card_id")?.map(RateCardId),
            as_of: get_optional_date(row, "priced_as_of")?,
            warning,
        },
        totals: None,
    };
    Ok((group_id, item))
}

fn row_to_group(
    row: &SqliteRow,
    items: &mut HashMap<GroupId, Vec<ItemDocument>>,
) -> Result<(PhaseId, GroupDocument), RepositoryError> {
    let id = GroupId(get_text(row, "id")?);
    let group = GroupDocument {
        items: items.remove(&id).unwrap_or_default(),
        id,
        name: get_text(row, "name")?,
        description: get_text(row, "description")?,
        quantity: get_u32(row, "quantity")?,
        totals: None,
    };
    Ok((PhaseId(get_text(row, "phase_id")?), group))
}

fn row_to_phase(
    row: &SqliteRow,
    groups: &mut HashMap<PhaseId, Vec<GroupDocument>>,
) -> Result<PhaseDocument, RepositoryError> {
    let id = PhaseId(get_text(row, "id")?);
    Ok(PhaseDocument {
        groups: groups.remove(&id).unwrap_or_default(),
        id,
        name: get_text(row, "name")?,
        description: get_text(row, "description")?,
        start_date: get_date(row, "start_date")?,
        tenure_months: get_u32(row, "tenure_months")?,
        escalation_pct: get_decimal(row, "escalation_pct")?,
        totals: None,
    })
}

#[async_trait::async_trait]
impl QuotationRepository for SqlQuotationRepository {
    async fn find_by_id(&self, id: &QuotationId) -> Result<Option<Quotation>, RepositoryError> {
        let Some(header) = sqlx::query(
            "SELECT id, customer_ref, currency, valid_until, rate_card_id, status, created_at
             FROM quotation WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let item_rows = sqlx::query(
            "SELECT i.id, i.group_id, i.product_id, i.product_name, i.product_sku, i.quantity,
                    i.hrs_units, i.one_time_price, i.otp_discount_pct,
                    i.recurring_price_monthly, i.recurring_discount_pct,
                    i.location, i.stock_status, i.note,
                    i.priced_rate_card_id, i.priced_as_of, i.price_warning_json
             FROM quotation_item i
             JOIN quotation_group g ON g.id = i.group_id
             JOIN quotation_phase p ON p.id = g.phase_id
             WHERE p.quotation_id = ?
             ORDER BY p.position, g.position, i.position",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut items: HashMap<GroupId, Vec<ItemDocument>> = HashMap::new();
        for row in &item_rows {
            let (group_id, item) = row_to_item(row)?;
            items.entry(group_id).or_default().push(item);
        }

        let group_rows = sqlx::query(
            "SELECT g.id, g.phase_id, g.name, g.description, g.quantity
             FROM quotation_group g
             JOIN quotation_phase p ON p.id = g.phase_id
             WHERE p.quotation_id = ?
             ORDER BY p.position, g.position",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut groups: HashMap<PhaseId, Vec<GroupDocument>> = HashMap::new();
        for row in &group_rows {
            let (phase_id, group) = row_to_group(row, &mut items)?;
            groups.entry(phase_id).or_default().push(group);
        }

        let phase_rows = sqlx::query(
            "SELECT id, name, description, start_date, tenure_months, escalation_pct
             FROM quotation_phase
             WHERE quotation_id = ?
             ORDER BY position",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        let phases = phase_rows
            .iter()
            .map(|row| row_to_phase(row, &mut groups))
            .collect::<Result<Vec<_>, _>>()?;

        let status_str = get_text(&header, "status")?;
        let status = QuotationStatus::parse(&status_str)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown quotation status `{status_str}`")))?;

        let document = QuotationDocument {
            id: QuotationId(get_text(&header, "id")?),
            customer_ref: get_text(&header, "customer_ref")?,
            currency: get_text(&header, "currency")?,
            valid_until: get_optional_date(&header, "valid_until")?,
            rate_card_id: get_optional_text(&header, "rate_card_id")?.map(RateCardId),
            status,
            created_at: Some(parse_timestamp("created_at", &get_text(&header, "created_at")?)?),
            phases,
            totals: None,
        };

        Quotation::from_document(document)
            .map(Some)
            .map_err(|e| RepositoryError::Decode(e.to_string()))
    }

    async fn save(&self, quotation: &Quotation) -> Result<SavedQuotation, RepositoryError> {
        let document = quotation.to_document();
        let totals = quotation.totals();
        let now = Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO quotation (id, customer_ref, currency, valid_until, rate_card_id, status,
                                    one_time_total, recurring_monthly_total,
                                    recurring_tenure_total, grand_total, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 customer_ref = excluded.customer_ref,
                 currency = excluded.currency,
                 valid_until = excluded.valid_until,
                 rate_card_id = excluded.rate_card_id,
                 status = excluded.status,
                 one_time_total = excluded.one_time_total,
                 recurring_monthly_total = excluded.recurring_monthly_total,
                 recurring_tenure_total = excluded.recurring_tenure_total,
                 grand_total = excluded.grand_total,
                 updated_at = excluded.updated_at",
        )
        .bind(&document.id.0)
        .bind(&document.customer_ref)
        .bind(&document.currency)
        .bind(document.valid_until.map(|date| date.to_string()))
        .bind(document.rate_card_id.as_ref().map(|id| id.0.as_str()))
        .bind(document.status.as_str())
        .bind(totals.one_time.to_string())
        .bind(totals.recurring_monthly.to_string())
        .bind(totals.recurring_tenure.to_string())
        .bind(totals.grand_total.to_string())
        .bind(quotation.created_at.to_rfc3339())
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM quotation_phase WHERE quotation_id = ?")
            .bind(&document.id.0)
            .execute(&mut *tx)
            .await?;

        for (phase_index, phase) in document.phases.iter().enumerate() {
            let phase_totals = phase.totals.unwrap_or_default();
            sqlx::query(
                "INSERT INTO quotation_phase (id, quotation_id, position, name, description,
                                              start_date, tenure_months, escalation_pct,
                                              one_time_total, recurring_monthly_total,
                                              recurring_tenure_total)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&phase.id.0)
            .bind(&document.id.0)
            .bind(position(phase_index))
            .bind(&phase.name)
            .bind(&phase.description)
            .bind(phase.start_date.to_string())
            .bind(i64::from(phase.tenure_months))
            .bind(phase.escalation_pct.to_string())
            .bind(phase_totals.one_time.to_string())
            .bind(phase_totals.recurring_monthly.to_string())
            .bind(phase_totals.recurring_tenure.to_string())
            .execute(&mut *tx)
            .await?;

            for (group_index, group) in phase.groups.iter().enumerate() {
                let group_totals = group.totals.unwrap_or_default();
                sqlx::query(
                    "INSERT INTO quotation_group (id, phase_id, position, name, description,
                                                  quantity, one_time_total,
                                                  recurring_monthly_total, recurring_tenure_total)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&group.id.0)
                .bind(&phase.id.0)
                .bind(position(group_index))
                .bind(&group.name)
                .bind(&group.description)
                .bind(i64::from(group.quantity))
                .bind(group_totals.one_time.to_string())
                .bind(group_totals.recurring_monthly.to_string())
                .bind(group_totals.recurring_tenure.to_string())
                .execute(&mut *tx)
                .await?;

                for (item_index, item) in group.items.iter().enumerate() {
                    let item_totals = item.totals.unwrap_or_default();
                    let warning_json = item
                        .pricing
                        .warning
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()
                        .map_err(|e| RepositoryError::Decode(e.to_string()))?;

                    sqlx::query(
                        "INSERT INTO quotation_item (id, group_id, position, product_id,
                                                     product_name, product_sku, quantity,
                                                     hrs_units, one_time_price, otp_discount_pct,
                                                     recurring_price_monthly,
                                                     recurring_discount_pct, location,
                                                     stock_status, note, priced_rate_card_id,
                                                     priced_as_of, price_warning_json, total_otp,
                                                     total_recurring_monthly,
                                                     total_recurring_tenure)
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    )
                    .bind(&item.id.0)
                    .bind(&group.id.0)
                    .bind(position(item_index))
                    .bind(&item.product.id.0)
                    .bind(&item.product.name)
                    .bind(item.product.sku.as_deref())
                    .bind(i64::from(item.quantity))
                    .bind(item.hrs_units.to_string())
                    .bind(item.one_time_price.to_string())
                    .bind(item.otp_discount_pct.to_string())
                    .bind(item.recurring_price_monthly.to_string())
                    .bind(item.recurring_discount_pct.to_string())
                    .bind(&item.location)
                    .bind(&item.stock_status)
                    .bind(&item.note)
                    .bind(item.pricing.rate_card_id.as_ref().map(|id| id.0.as_str()))
                    .bind(item.pricing.as_of.map(|date| date.to_string()))
                    .bind(warning_json)
                    .bind(item_totals.total_otp.to_string())
                    .bind(item_totals.total_recurring_monthly.to_string())
                    .bind(item_totals.total_recurring_tenure.to_string())
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;

        debug!(
            event_name = "db.quotation.saved",
            quote_id = %document.id,
            status = document.status.as_str(),
            phases = document.phases.len(),
            "quotation saved"
        );

        Ok(SavedQuotation { id: document.id, status: document.status })
    }
}
