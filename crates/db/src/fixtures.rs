use std::str::FromStr;

use rust_decimal::Decimal;
use sqlx::Executor;

use phasequote_core::domain::quotation::QuotationId;

use crate::connection::DbPool;
use crate::repositories::{QuotationRepository, RepositoryError, SqlQuotationRepository};

const DEMO_QUOTATION_ID: &str = "QT-DEMO-0001";
const DEMO_PRODUCT_IDS: &[&str] = &["router", "switch", "firewall", "install", "support", "modem"];
const DEMO_RATE_CARD_IDS: &[&str] = &["std", "enterprise"];
const DEMO_PHASE_COUNT: i64 = 2;
const DEMO_ITEM_COUNT: i64 = 4;

/// Demo catalog, rate cards and one priced two-phase quotation.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_seed_data.sql");

    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;

        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        Ok(SeedResult {
            quotation_ids: vec![DEMO_QUOTATION_ID],
            product_count: DEMO_PRODUCT_IDS.len(),
            rate_card_count: DEMO_RATE_CARD_IDS.len(),
        })
    }

    /// Checks the seeded rows, and that the stored quotation totals agree
    /// with a fresh recompute of the stored tree.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        let quoted_products = sql_array_from_ids(DEMO_PRODUCT_IDS);
        let product_count: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(1) FROM product WHERE id IN {quoted_products}"))
                .fetch_one(pool)
                .await?;
        checks.push(("products", product_count == DEMO_PRODUCT_IDS.len() as i64));

        let default_card: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM rate_card WHERE id = 'std' AND is_default = 1)",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("default-rate-card", default_card == 1));

        let quotation_exists: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM quotation WHERE id = ?1 AND status = 'draft')",
        )
        .bind(DEMO_QUOTATION_ID)
        .fetch_one(pool)
        .await?;
        checks.push(("demo-quotation", quotation_exists == 1));

        let phase_count: i64 =
            sqlx::query_scalar("SELECT COUNT(1) FROM quotation_phase WHERE quotation_id = ?1")
                .bind(DEMO_QUOTATION_ID)
                .fetch_one(pool)
                .await?;
        checks.push(("demo-phase-count", phase_count == DEMO_PHASE_COUNT));

        let item_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(1)
             FROM quotation_item i
             JOIN quotation_group g ON g.id = i.group_id
             JOIN quotation_phase p ON p.id = g.phase_id
             WHERE p.quotation_id = ?1",
        )
        .bind(DEMO_QUOTATION_ID)
        .fetch_one(pool)
        .await?;
        checks.push(("demo-item-count", item_count == DEMO_ITEM_COUNT));

        checks.push(("demo-totals-consistent", Self::verify_stored_totals(pool).await?));

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }

    async fn verify_stored_totals(pool: &DbPool) -> Result<bool, RepositoryError> {
        let stored: Option<String> =
            sqlx::query_scalar("SELECT grand_total FROM quotation WHERE id = ?1")
                .bind(DEMO_QUOTATION_ID)
                .fetch_optional(pool)
                .await?;
        let Some(stored) = stored else {
            return Ok(false);
        };
        let stored = Decimal::from_str(stored.trim())
            .map_err(|e| RepositoryError::Decode(format!("invalid grand_total: {e}")))?;

        let repo = SqlQuotationRepository::new(pool.clone());
        let loaded = repo.find_by_id(&QuotationId(DEMO_QUOTATION_ID.to_string())).await?;
        Ok(loaded.is_some_and(|quotation| quotation.totals().grand_total == stored))
    }

    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        let quoted_products = sql_array_from_ids(DEMO_PRODUCT_IDS);
        let quoted_cards = sql_array_from_ids(DEMO_RATE_CARD_IDS);

        sqlx::query("DELETE FROM quotation WHERE id = ?1")
            .bind(DEMO_QUOTATION_ID)
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM rate_card_price WHERE rate_card_id IN {quoted_cards}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM rate_card WHERE id IN {quoted_cards}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM product WHERE id IN {quoted_products}"))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{}'", id)).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug)]
pub struct SeedResult {
    pub quotation_ids: Vec<&'static str>,
    pub product_count: usize,
    pub rate_card_count: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{connect_with_settings, migrations};

    #[test]
    fn sql_fixture_is_valid() {
        assert!(DemoSeedDataset::SQL.contains(DEMO_QUOTATION_ID));
    }

    #[tokio::test]
    async fn verify_seed_contract_and_idempotency() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30)
            .await
            .expect("connect to test database");
        migrations::run_pending(&pool).await.expect("run migrations");

        let first = DemoSeedDataset::load(&pool).await.expect("load seed fixtures");
        let first_verification = DemoSeedDataset::verify(&pool).await.expect("verify seed");
        assert!(first_verification.all_present, "{:?}", first_verification.checks);
        assert_eq!(first.quotation_ids, vec![DEMO_QUOTATION_ID]);

        DemoSeedDataset::load(&pool).await.expect("reload seed fixtures");
        let second_verification = DemoSeedDataset::verify(&pool).await.expect("re-verify seed");
        assert!(second_verification.all_present);
        assert_eq!(first_verification.checks, second_verification.checks);
    }

    #[tokio::test]
    async fn clean_removes_seeded_rows() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30)
            .await
            .expect("connect to test database");
        migrations::run_pending(&pool).await.expect("run migrations");
        DemoSeedDataset::load(&pool).await.expect("load seed fixtures");

        DemoSeedDataset::clean(&pool).await.expect("clean seed fixtures");

        let items: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM quotation_item")
            .fetch_one(&pool)
            .await
            .expect("count items");
        assert_eq!(items, 0, "items cascade with their quotation");
        let verification = DemoSeedDataset::verify(&pool).await.expect("verify");
        assert!(!verification.all_present);
    }
}
