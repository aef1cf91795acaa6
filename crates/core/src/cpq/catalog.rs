use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::cpq::refresh::{
    PriceLookup, PriceLookupError, PriceLookupOutcome, PriceLookupRequest, PriceQuote,
};
use crate::domain::product::{Product, ProductId};
use crate::domain::rate_card::{RateCard, RateCardId};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("catalog source unavailable: {0}")]
    Unavailable(String),
    #[error("catalog response could not be decoded: {0}")]
    Decode(String),
}

#[async_trait]
pub trait RateCardSource: Send + Sync {
    /// Rate cards, optionally only those active on `active_on`.
    async fn list_rate_cards(
        &self,
        active_on: Option<NaiveDate>,
    ) -> Result<Vec<RateCard>, CatalogError>;
}

#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Product>, CatalogError>;
}

/// Case-insensitive match on name, SKU or category.
pub fn product_matches(product: &Product, query: &str) -> bool {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }
    product.name.to_lowercase().contains(&needle)
        || product.sku.to_lowercase().contains(&needle)
        || product
            .category
            .as_deref()
            .is_some_and(|category| category.to_lowercase().contains(&needle))
}

#[derive(Default)]
pub struct Catalog {
    products: Vec<Product>,
}

impl Catalog {
    pub fn new(products: Vec<Product>) -> Self {
        Self { products }
    }
}

#[async_trait]
impl ProductCatalog for Catalog {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Product>, CatalogError> {
        Ok(self
            .products
            .iter()
            .filter(|product| product.active && product_matches(product, query))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PriceEntry {
    pub one_time_price: Decimal,
    pub recurring_price: Decimal,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
}

/// In-memory rate cards and their price entries.
///
/// A request without a rate card resolves against the default card. Among
/// entries whose window contains the as-of date, the latest
/// `effective_from` wins.
#[derive(Default)]
pub struct PriceBook {
    rate_cards: Vec<RateCard>,
    prices: HashMap<(RateCardId, ProductId), Vec<PriceEntry>>,
}

impl PriceBook {
    pub fn new(rate_cards: Vec<RateCard>) -> Self {
        Self { rate_cards, prices: HashMap::new() }
    }

    pub fn with_price(mut self, rate_card_id: &str, product_id: &str, entry: PriceEntry) -> Self {
        self.prices
            .entry((RateCardId(rate_card_id.to_string()), ProductId(product_id.to_string())))
            .or_default()
            .push(entry);
        self
    }

    fn default_rate_card(&self) -> Option<&RateCard> {
        self.rate_cards.iter().find(|card| card.is_default)
    }
}

#[async_trait]
impl PriceLookup for PriceBook {
    async fn lookup(
        &self,
        request: &PriceLookupRequest,
    ) -> Result<PriceLookupOutcome, PriceLookupError> {
        let rate_card_id = match &request.rate_card_id {
            Some(id) => id.clone(),
            None => match self.default_rate_card() {
                Some(card) => card.id.clone(),
                None => {
                    return Ok(PriceLookupOutcome::NotFound {
                        reason: Some("no default rate card configured".to_string()),
                    })
                }
            },
        };

        let entry = self
            .prices
            .get(&(rate_card_id.clone(), request.product_id.clone()))
            .into_iter()
            .flatten()
            .filter(|entry| {
                entry.effective_from <= request.as_of
                    && entry.effective_to.map_or(true, |end| request.as_of <= end)
            })
            .max_by_key(|entry| entry.effective_from);

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
impl RateCardSource for PriceBook {
    async fn list_rate_cards(
        &self,
        active_on: Option<NaiveDate>,
    ) -> Result<Vec<RateCard>, CatalogError> {
        Ok(self
            .rate_cards
            .iter()
            .filter(|card| active_on.map_or(true, |date| card.is_active_on(date)))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use super::{Catalog, PriceBook, PriceEntry, ProductCatalog, RateCardSource};
    use crate::cpq::refresh::{PriceLookup, PriceLookupOutcome, PriceLookupRequest};
    use crate::domain::product::{Product, ProductId};
    use crate::domain::rate_card::{RateCard, RateCardId};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn book() -> PriceBook {
        PriceBook::new(vec![
            RateCard {
                id: RateCardId("std".to_string()),
                name: "Standard".to_string(),
                is_default: true,
                valid_from: date(2026, 1, 1),
                valid_to: None,
            },
            RateCard {
                id: RateCardId("promo".to_string()),
                name: "Promo".to_string(),
                is_default: false,
                valid_from: date(2026, 1, 1),
                valid_to: Some(date(2026, 3, 31)),
            },
        ])
        .with_price(
            "std",
            "router",
            PriceEntry {
                one_time_price: Decimal::from(100),
                recurring_price: Decimal::from(10),
                effective_from: date(2026, 1, 1),
                effective_to: None,
            },
        )
        .with_price(
            "std",
            "router",
            PriceEntry {
                one_time_price: Decimal::from(120),
                recurring_price: Decimal::from(12),
                effective_from: date(2027, 1, 1),
                effective_to: None,
            },
        )
    }

    #[tokio::test]
    async fn default_card_and_latest_effective_entry_win() {
        let request = PriceLookupRequest {
            product_id: ProductId("router".to_string()),
            as_of: date(2027, 2, 1),
            rate_card_id: None,
        };

        let outcome = book().lookup(&request).await.expect("lookup succeeds");
        let PriceLookupOutcome::Found(quote) = outcome else {
            panic!("expected a price");
        };
        assert_eq!(quote.one_time_price, Decimal::from(120));
        assert_eq!(quote.rate_card_id, Some(RateCardId("std".to_string())));
    }

    #[tokio::test]
    async fn unknown_product_reports_not_found() {
        let request = PriceLookupRequest {
            product_id: ProductId("router".to_string()),
            as_of: date(2026, 2, 1),
            rate_card_id: Some(RateCardId("promo".to_string())),
        };

        let outcome = book().lookup(&request).await.expect("lookup succeeds");
        assert!(matches!(outcome, PriceLookupOutcome::NotFound { .. }));
    }

    #[tokio::test]
    async fn rate_cards_filter_by_active_date() {
        let cards = book().list_rate_cards(Some(date(2026, 6, 1))).await.expect("listing");
        let ids: Vec<_> = cards.into_iter().map(|card| card.id.0).collect();
        assert_eq!(ids, vec!["std".to_string()]);
    }

    #[tokio::test]
    async fn catalog_search_matches_sku_and_category() {
        let catalog = Catalog::new(vec![
            Product {
                id: ProductId("router".to_string()),
                sku: "NET-RTR-01".to_string(),
                name: "Managed router".to_string(),
                category: Some("Network".to_string()),
                active: true,
            },
            Product {
                id: ProductId("legacy".to_string()),
                sku: "NET-OLD".to_string(),
                name: "Legacy modem".to_string(),
                category: Some("Network".to_string()),
                active: false,
            },
        ]);

        let by_sku = catalog.search("rtr", 10).await.expect("search");
        assert_eq!(by_sku.len(), 1);
        let by_category = catalog.search("network", 10).await.expect("search");
        assert_eq!(by_category.len(), 1, "inactive products are excluded");
        assert!(catalog.search("modem", 10).await.expect("search").is_empty());
    }
}
