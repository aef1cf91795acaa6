//! Re-pricing items against an authoritative rate card.
//!
//! A refresh runs in three steps: [`plan_refresh`] snapshots one lookup per
//! item, [`execute_plan`] runs every lookup and waits for all of them to
//! settle, and [`apply_results`] writes each outcome back by item id. The
//! tree is only touched in the last, synchronous step, so abandoning the
//! future halfway leaves it exactly as it was.

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::cpq::aggregation;
use crate::domain::product::{ProductId, ProductRef};
use crate::domain::quotation::{Item, ItemId, PriceWarning, PricingProvenance, Quotation};
use crate::domain::rate_card::RateCardId;
use crate::errors::DomainError;

pub const DEFAULT_MAX_CONCURRENT_LOOKUPS: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLookupRequest {
    pub product_id: ProductId,
    pub as_of: NaiveDate,
    pub rate_card_id: Option<RateCardId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub one_time_price: Decimal,
    pub recurring_price: Decimal,
    /// Rate card that actually supplied the price, e.g. the default card
    /// when the request named none.
    pub rate_card_id: Option<RateCardId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceLookupOutcome {
    Found(PriceQuote),
    NotFound { reason: Option<String> },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PriceLookupError {
    #[error("pricing service unreachable: {0}")]
    Transport(String),
    #[error("pricing service returned status {status}: {message}")]
    Service { status: u16, message: String },
    #[error("pricing response could not be decoded: {0}")]
    Decode(String),
}

#[async_trait]
pub trait PriceLookup: Send + Sync {
    async fn lookup(
        &self,
        request: &PriceLookupRequest,
    ) -> Result<PriceLookupOutcome, PriceLookupError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemRefreshStatus {
    Updated,
    NoPrice,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRefreshEntry {
    pub item_id: ItemId,
    pub product_id: ProductId,
    pub status: ItemRefreshStatus,
    pub warning: Option<String>,
}

/// Per-item outcome of a refresh; partial failure is never collapsed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshReport {
    pub rate_card_id: Option<RateCardId>,
    pub entries: Vec<ItemRefreshEntry>,
}

impl RefreshReport {
    fn count(&self, status: ItemRefreshStatus) -> usize {
        self.entries.iter().filter(|entry| entry.status == status).count()
    }

    pub fn updated(&self) -> usize {
        self.count(ItemRefreshStatus::Updated)
    }

    pub fn not_found(&self) -> usize {
        self.count(ItemRefreshStatus::NoPrice)
    }

    pub fn failed(&self) -> usize {
        self.count(ItemRefreshStatus::Failed)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedLookup {
    pub item_id: ItemId,
    pub product: ProductRef,
    pub request: PriceLookupRequest,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefreshPlan {
    pub rate_card_id: Option<RateCardId>,
    pub lookups: Vec<PlannedLookup>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LookupResult {
    pub planned: PlannedLookup,
    pub result: Result<PriceLookupOutcome, PriceLookupError>,
}

/// One lookup per item, dated at the owning phase's start date, in tree order.
pub fn plan_refresh(quotation: &Quotation, rate_card_id: Option<&RateCardId>) -> RefreshPlan {
    let mut lookups = Vec::with_capacity(quotation.item_count());
    for phase in quotation.phases() {
        for group in quotation.groups_of(&phase.id) {
            for item in quotation.items_of(&group.id) {
                lookups.push(PlannedLookup {
                    item_id: item.id.clone(),
                    product: item.product.clone(),
                    request: PriceLookupRequest {
                        product_id: item.product.id.clone(),
                        as_of: phase.start_date,
                        rate_card_id: rate_card_id.cloned(),
                    },
                });
            }
        }
    }

    RefreshPlan { rate_card_id: rate_card_id.cloned(), lookups }
}

/// Runs every planned lookup with at most `max_concurrent` in flight.
///
/// Waits for all of them; a failing lookup never cancels the others. Results
/// come back in plan order.
pub async fn execute_plan<L>(
    lookup: &L,
    plan: &RefreshPlan,
    max_concurrent: usize,
) -> Vec<LookupResult>
where
    L: PriceLookup + ?Sized,
{
    let mut results: Vec<(usize, LookupResult)> = stream::iter(plan.lookups.iter().enumerate())
        .map(|(index, planned)| async move {
            let result = lookup.lookup(&planned.request).await;
            (index, LookupResult { planned: planned.clone(), result })
        })
        .buffer_unordered(max_concurrent.max(1))
        .collect()
        .await;

    results.sort_by_key(|(index, _)| *index);
    results.into_iter().map(|(_, result)| result).collect()
}

/// Writes lookup outcomes back into the tree, then recomputes everything.
///
/// Items deleted since the plan was taken are skipped. If the new prices
/// push the totals out of range, every price stays as it was and each
/// reported item is marked failed.
pub fn apply_results(
    quotation: &mut Quotation,
    rate_card_id: Option<RateCardId>,
    results: Vec<LookupResult>,
) -> RefreshReport {
    let mut report = RefreshReport { rate_card_id, entries: Vec::with_capacity(results.len()) };
    let snapshot = quotation.clone();

    for LookupResult { planned, result } in results {
        let Some(item) = quotation.items.get_mut(&planned.item_id) else {
            continue;
        };
        let status = apply_lookup(item, &planned.request, result);
        if let Some(warning) = item.warning() {
            warn!(
                event_name = "cpq.refresh.item_warning",
                quote_id = %quotation.id,
                item_id = %planned.item_id,
                product_id = %planned.request.product_id,
                warning = %warning,
                "item price could not be refreshed"
            );
        }
        report.entries.push(ItemRefreshEntry {
            item_id: planned.item_id,
            product_id: planned.request.product_id,
            status,
            warning: item.warning().map(|warning| warning.message().to_string()),
        });
    }

    if let Err(error) = aggregation::recompute(quotation) {
        *quotation = snapshot;
        reject_refresh(quotation, &mut report, &error);
    }
    info!(
        event_name = "cpq.refresh.completed",
        quote_id = %quotation.id,
        updated = report.updated(),
        not_found = report.not_found(),
        failed = report.failed(),
        "price refresh applied"
    );
    report
}

fn reject_refresh(quotation: &mut Quotation, report: &mut RefreshReport, error: &DomainError) {
    warn!(
        event_name = "cpq.refresh.rejected",
        quote_id = %quotation.id,
        error = %error,
        "refreshed prices rolled back"
    );
    for entry in &mut report.entries {
        let Some(item) = quotation.items.get_mut(&entry.item_id) else {
            continue;
        };
        let warning = PriceWarning::LookupFailed {
            message: format!("Refreshed price for {} was not applied: {error}", item.product.label()),
        };
        entry.status = ItemRefreshStatus::Failed;
        entry.warning = Some(warning.message().to_string());
        item.pricing.warning = Some(warning);
    }
}

/// Applies one lookup outcome to one item.
///
/// Found prices overwrite the base prices and clear the warning. No price
/// resets both prices to zero. A failed lookup keeps the prices it had.
pub fn apply_lookup(
    item: &mut Item,
    request: &PriceLookupRequest,
    result: Result<PriceLookupOutcome, PriceLookupError>,
) -> ItemRefreshStatus {
    match result {
        Ok(PriceLookupOutcome::Found(quote)) => {
            item.one_time_price = quote.one_time_price;
            item.recurring_price_monthly = quote.recurring_price;
            item.pricing = PricingProvenance {
                rate_card_id: quote.rate_card_id.or_else(|| request.rate_card_id.clone()),
                as_of: Some(request.as_of),
                warning: None,
            };
            ItemRefreshStatus::Updated
        }
        Ok(PriceLookupOutcome::NotFound { reason }) => {
            item.one_time_price = Decimal::ZERO;
            item.recurring_price_monthly = Decimal::ZERO;
            item.pricing = PricingProvenance {
                rate_card_id: request.rate_card_id.clone(),
                as_of: Some(request.as_of),
                warning: Some(PriceWarning::NoPriceFound {
                    message: no_price_message(&item.product, request, reason.as_deref()),
                }),
            };
            ItemRefreshStatus::NoPrice
        }
        Err(error) => {
            item.pricing.warning = Some(PriceWarning::LookupFailed {
                message: format!("Error fetching price for {}: {error}", item.product.label()),
            });
            ItemRefreshStatus::Failed
        }
    }
}

fn no_price_message(
    product: &ProductRef,
    request: &PriceLookupRequest,
    reason: Option<&str>,
) -> String {
    let rate_card =
        request.rate_card_id.as_ref().map(|id| id.0.as_str()).unwrap_or("the default rate card");
    let mut message =
        format!("No price found for {} on {rate_card} as of {}", product.label(), request.as_of);
    if let Some(reason) = reason.filter(|reason| !reason.trim().is_empty()) {
        message.push_str(": ");
        message.push_str(reason.trim());
    }
    message
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use super::{
        apply_results, execute_plan, plan_refresh, ItemRefreshStatus, PriceLookup,
        PriceLookupError, PriceLookupOutcome, PriceLookupRequest, PriceQuote,
    };
    use crate::cpq::aggregation::{self, DirtySet};
    use crate::cpq::mutation::{apply_command, MutationContext, TreeCommand};
    use crate::domain::product::ProductRef;
    use crate::domain::quotation::{Item, PriceWarning, Quotation, QuotationId};
    use crate::domain::rate_card::RateCardId;

    struct ScriptedLookup {
        answers: HashMap<String, Result<PriceLookupOutcome, PriceLookupError>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PriceLookup for ScriptedLookup {
        async fn lookup(
            &self,
            request: &PriceLookupRequest,
        ) -> Result<PriceLookupOutcome, PriceLookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answers
                .get(&request.product_id.0)
                .cloned()
                .unwrap_or(Ok(PriceLookupOutcome::NotFound { reason: None }))
        }
    }

    fn found(otp: i64, recurring: i64) -> Result<PriceLookupOutcome, PriceLookupError> {
        Ok(PriceLookupOutcome::Found(PriceQuote {
            one_time_price: Decimal::from(otp),
            recurring_price: Decimal::from(recurring),
            rate_card_id: Some(RateCardId("rc-2027".to_string())),
        }))
    }

    fn quotation_with(products: &[&str]) -> Quotation {
        let context = MutationContext::new(NaiveDate::from_ymd_opt(2026, 10, 19).expect("date"));
        let mut quotation = Quotation::new(QuotationId("QT-1".to_string()), "ACME", "USD");
        let mut dirty = DirtySet::default();
        let phase_id = apply_command(&mut quotation, TreeCommand::AddPhase, &context, &mut dirty)
            .created_phase()
            .cloned()
            .expect("phase");
        let group_id = apply_command(
            &mut quotation,
            TreeCommand::AddGroup { phase_id: phase_id.clone() },
            &context,
            &mut dirty,
        )
        .created_group()
        .cloned()
        .expect("group");

        for product in products {
            let mut item = Item::stub(group_id.clone(), ProductRef::new(*product, *product));
            item.one_time_price = Decimal::from(70);
            item.recurring_price_monthly = Decimal::from(7);
            apply_command(
                &mut quotation,
                TreeCommand::InsertItem { phase_id: phase_id.clone(), item: Box::new(item) },
                &context,
                &mut dirty,
            );
        }
        aggregation::recompute(&mut quotation).expect("totals fit");
        quotation
    }

    #[tokio::test]
    async fn mixed_outcomes_are_reported_per_item() {
        let mut quotation = quotation_with(&["router", "retired", "flaky"]);
        let lookup = ScriptedLookup {
            answers: HashMap::from([
                ("router".to_string(), found(100, 20)),
                (
                    "retired".to_string(),
                    Ok(PriceLookupOutcome::NotFound { reason: Some("end of sale".to_string()) }),
                ),
                (
                    "flaky".to_string(),
                    Err(PriceLookupError::Transport("connection reset".to_string())),
                ),
            ]),
            calls: AtomicUsize::new(0),
        };
        let rate_card = RateCardId("rc-2027".to_string());

        let plan = plan_refresh(&quotation, Some(&rate_card));
        let results = execute_plan(&lookup, &plan, 2).await;
        let report = apply_results(&mut quotation, Some(rate_card), results);

        assert_eq!(lookup.calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.updated(), 1);
        assert_eq!(report.not_found(), 1);
        assert_eq!(report.failed(), 1);
        let statuses: Vec<_> = report.entries.iter().map(|entry| entry.status).collect();
        assert_eq!(
            statuses,
            vec![ItemRefreshStatus::Updated, ItemRefreshStatus::NoPrice, ItemRefreshStatus::Failed]
        );

        let by_product = |product: &str| {
            quotation
                .items
                .values()
                .find(|item| item.product.id.0 == product)
                .cloned()
                .expect("item present")
        };

        let router = by_product("router");
        assert_eq!(router.one_time_price, Decimal::from(100));
        assert!(router.warning().is_none());
        assert_eq!(router.pricing.rate_card_id, Some(RateCardId("rc-2027".to_string())));

        let retired = by_product("retired");
        assert_eq!(retired.one_time_price, Decimal::ZERO);
        assert_eq!(retired.recurring_price_monthly, Decimal::ZERO);
        assert!(matches!(
            retired.warning(),
            Some(PriceWarning::NoPriceFound { message }) if message.contains("end of sale")
        ));

        let flaky = by_product("flaky");
        assert_eq!(flaky.one_time_price, Decimal::from(70));
        assert_eq!(flaky.recurring_price_monthly, Decimal::from(7));
        assert!(matches!(flaky.warning(), Some(PriceWarning::LookupFailed { .. })));

        // router 100 + flaky 70 one-time; router 20 + flaky 7 monthly over 12 months
        assert_eq!(quotation.totals().one_time, Decimal::from(170));
        assert_eq!(quotation.totals().recurring_tenure, Decimal::from(27 * 12));
        assert_eq!(
            quotation.totals().grand_total,
            quotation.totals().one_time + quotation.totals().recurring_tenure
        );
    }

    #[tokio::test]
    async fn prices_beyond_decimal_range_are_not_applied() {
        let mut quotation = quotation_with(&["router", "switch"]);
        let before = *quotation.totals();
        let lookup = ScriptedLookup {
            answers: HashMap::from([
                ("router".to_string(), found(100, 20)),
                (
                    "switch".to_string(),
                    Ok(PriceLookupOutcome::Found(PriceQuote {
                        one_time_price: Decimal::ZERO,
                        recurring_price: Decimal::MAX,
                        rate_card_id: None,
                    })),
                ),
            ]),
            calls: AtomicUsize::new(0),
        };

        let plan = plan_refresh(&quotation, None);
        let results = execute_plan(&lookup, &plan, 2).await;
        let report = apply_results(&mut quotation, None, results);

        assert_eq!(report.failed(), 2);
        assert_eq!(*quotation.totals(), before);
        for item in quotation.items.values() {
            assert_eq!(item.one_time_price, Decimal::from(70));
            assert!(matches!(
                item.warning(),
                Some(PriceWarning::LookupFailed { message }) if message.contains("not applied")
            ));
        }
    }

    #[tokio::test]
    async fn items_deleted_before_apply_are_skipped() {
        let mut quotation = quotation_with(&["router"]);
        let lookup = ScriptedLookup {
            answers: HashMap::from([("router".to_string(), found(100, 20))]),
            calls: AtomicUsize::new(0),
        };

        let plan = plan_refresh(&quotation, None);
        let results = execute_plan(&lookup, &plan, 4).await;
        let item_id = plan.lookups[0].item_id.clone();
        quotation.remove_item(&item_id);

        let report = apply_results(&mut quotation, None, results);
        assert!(report.entries.is_empty());
        assert_eq!(quotation.totals().grand_total, Decimal::ZERO);
    }

    #[test]
    fn plan_dates_lookups_at_the_phase_start() {
        let quotation = quotation_with(&["router", "switch"]);
        let plan = plan_refresh(&quotation, None);

        assert_eq!(plan.lookups.len(), 2);
        assert!(plan.lookups.iter().all(|planned| {
            planned.request.as_of == NaiveDate::from_ymd_opt(2026, 10, 20).expect("date")
                && planned.request.rate_card_id.is_none()
        }));
    }
}
