//! Bottom-up recomputation of every derived figure in a quotation.
//!
//! Item figures feed group sums, group sums feed phase sums, phase sums feed
//! the quotation totals:
//!
//! ```text
//! multiplier        = group.quantity * item.quantity * item.hrs_units
//! total_otp         = one_time_price * (1 - otp_discount_pct / 100) * multiplier
//! recurring_monthly = recurring_price_monthly * (1 - recurring_discount_pct / 100) * multiplier
//! recurring_tenure  = recurring_monthly * phase.tenure_months
//! grand_total       = sum(phase one_time) + sum(phase recurring_tenure)
//! ```
//!
//! Everything is `Decimal` at full precision; `round_display` is applied only
//! when figures are presented. Arithmetic is checked: a figure outside the
//! `Decimal` range fails the pass with [`DomainError::InvariantViolation`]
//! and nothing is written back.

use std::collections::BTreeSet;

use rust_decimal::{Decimal, RoundingStrategy};

use crate::domain::quotation::{
    GroupId, Item, ItemId, ItemTotals, PhaseId, Quotation, QuotationTotals, Totals,
};
use crate::errors::DomainError;

pub const DISPLAY_SCALE: u32 = 2;

/// Clamps a percentage into `[0, 100]`.
pub fn clamp_pct(pct: Decimal) -> Decimal {
    pct.clamp(Decimal::ZERO, Decimal::ONE_HUNDRED)
}

pub fn clamp_non_negative(value: Decimal) -> Decimal {
    value.max(Decimal::ZERO)
}

pub fn round_display(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(DISPLAY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// The discount factor lies in `[0, 1]`, so the result never exceeds `price`.
pub fn discounted_unit_price(price: Decimal, discount_pct: Decimal) -> Decimal {
    price * (Decimal::ONE - clamp_pct(discount_pct) / Decimal::ONE_HUNDRED)
}

fn overflow(figure: &str) -> DomainError {
    DomainError::InvariantViolation(format!("{figure} exceeds the representable amount"))
}

fn mul(lhs: Decimal, rhs: Decimal, figure: &str) -> Result<Decimal, DomainError> {
    lhs.checked_mul(rhs).ok_or_else(|| overflow(figure))
}

fn add(lhs: Decimal, rhs: Decimal, figure: &str) -> Result<Decimal, DomainError> {
    lhs.checked_add(rhs).ok_or_else(|| overflow(figure))
}

pub fn compute_item(
    item: &Item,
    group_quantity: u32,
    tenure_months: u32,
) -> Result<ItemTotals, DomainError> {
    let multiplier = mul(
        mul(Decimal::from(group_quantity), Decimal::from(item.quantity), "item multiplier")?,
        clamp_non_negative(item.hrs_units),
        "item multiplier",
    )?;

    let discounted_otp_unit = discounted_unit_price(item.one_time_price, item.otp_discount_pct);
    let discounted_recurring_unit =
        discounted_unit_price(item.recurring_price_monthly, item.recurring_discount_pct);
    let total_recurring_monthly =
        mul(discounted_recurring_unit, multiplier, "item recurring monthly total")?;

    Ok(ItemTotals {
        discounted_otp_unit,
        total_otp: mul(discounted_otp_unit, multiplier, "item one-time total")?,
        discounted_recurring_unit,
        total_recurring_monthly,
        total_recurring_tenure: mul(
            total_recurring_monthly,
            Decimal::from(tenure_months),
            "item recurring tenure total",
        )?,
    })
}

/// Phases whose figures are stale, plus whether the quotation sums are.
///
/// Deleting a phase leaves nothing to recompute underneath, only the
/// quotation-level sums.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirtySet {
    phases: BTreeSet<PhaseId>,
    quotation: bool,
}

impl DirtySet {
    pub fn mark_phase(&mut self, phase_id: PhaseId) {
        self.phases.insert(phase_id);
        self.quotation = true;
    }

    pub fn mark_quotation(&mut self) {
        self.quotation = true;
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty() && !self.quotation
    }
}

/// Freshly computed figures for one phase, not yet written to the tree.
struct StagedPhase {
    phase_id: PhaseId,
    totals: Totals,
    groups: Vec<(GroupId, Totals)>,
    items: Vec<(ItemId, ItemTotals)>,
}

/// Full recompute of every item, group, phase and the quotation totals.
pub fn recompute(quotation: &mut Quotation) -> Result<(), DomainError> {
    let mut staged = Vec::with_capacity(quotation.phase_ids.len());
    for phase_id in &quotation.phase_ids {
        if let Some(phase) = stage_phase(quotation, phase_id)? {
            staged.push(phase);
        }
    }
    let totals = sum_quotation(staged.iter().map(|phase| &phase.totals))?;

    for phase in staged {
        commit_phase(quotation, phase);
    }
    quotation.totals = totals;
    Ok(())
}

/// Recomputes only the phases marked in `dirty`, then the quotation sums.
///
/// The result is identical to [`recompute`] as long as every mutation since
/// the last pass was recorded in `dirty`. On failure `dirty` keeps its marks.
pub fn recompute_dirty(quotation: &mut Quotation, dirty: &mut DirtySet) -> Result<(), DomainError> {
    if dirty.is_empty() {
        return Ok(());
    }

    let mut staged = Vec::with_capacity(dirty.phases.len());
    for phase_id in &dirty.phases {
        if let Some(phase) = stage_phase(quotation, phase_id)? {
            staged.push(phase);
        }
    }
    let totals = sum_quotation(quotation.phase_ids.iter().filter_map(|phase_id| {
        staged
            .iter()
            .find(|phase| &phase.phase_id == phase_id)
            .map(|phase| &phase.totals)
            .or_else(|| quotation.phases.get(phase_id).map(|phase| &phase.totals))
    }))?;

    for phase in staged {
        commit_phase(quotation, phase);
    }
    quotation.totals = totals;
    *dirty = DirtySet::default();
    Ok(())
}

fn stage_phase(quotation: &Quotation, phase_id: &PhaseId) -> Result<Option<StagedPhase>, DomainError> {
    let Some(phase) = quotation.phases.get(phase_id) else {
        return Ok(None);
    };
    let tenure = Decimal::from(phase.tenure_months);
    let mut staged = StagedPhase {
        phase_id: phase_id.clone(),
        totals: Totals::default(),
        groups: Vec::with_capacity(phase.group_ids.len()),
        items: Vec::new(),
    };

    for group in phase.group_ids.iter().filter_map(|id| quotation.groups.get(id)) {
        let mut group_totals = Totals::default();
        for item in group.item_ids.iter().filter_map(|id| quotation.items.get(id)) {
            let item_totals = compute_item(item, group.quantity, phase.tenure_months)?;
            group_totals.one_time =
                add(group_totals.one_time, item_totals.total_otp, "group one-time total")?;
            group_totals.recurring_monthly = add(
                group_totals.recurring_monthly,
                item_totals.total_recurring_monthly,
                "group recurring monthly total",
            )?;
            staged.items.push((item.id.clone(), item_totals));
        }
        group_totals.recurring_tenure =
            mul(group_totals.recurring_monthly, tenure, "group recurring tenure total")?;

        staged.totals.one_time =
            add(staged.totals.one_time, group_totals.one_time, "phase one-time total")?;
        staged.totals.recurring_monthly = add(
            staged.totals.recurring_monthly,
            group_totals.recurring_monthly,
            "phase recurring monthly total",
        )?;
        staged.groups.push((group.id.clone(), group_totals));
    }
    staged.totals.recurring_tenure =
        mul(staged.totals.recurring_monthly, tenure, "phase recurring tenure total")?;

    Ok(Some(staged))
}

fn commit_phase(quotation: &mut Quotation, staged: StagedPhase) {
    for (item_id, totals) in staged.items {
        if let Some(item) = quotation.items.get_mut(&item_id) {
            item.totals = totals;
        }
    }
    for (group_id, totals) in staged.groups {
        if let Some(group) = quotation.groups.get_mut(&group_id) {
            group.totals = totals;
        }
    }
    if let Some(phase) = quotation.phases.get_mut(&staged.phase_id) {
        phase.totals = staged.totals;
    }
}

fn sum_quotation<'a>(
    phase_totals: impl Iterator<Item = &'a Totals>,
) -> Result<QuotationTotals, DomainError> {
    let mut totals = QuotationTotals::default();
    for phase in phase_totals {
        totals.one_time = add(totals.one_time, phase.one_time, "quotation one-time total")?;
        totals.recurring_monthly = add(
            totals.recurring_monthly,
            phase.recurring_monthly,
            "quotation recurring monthly total",
        )?;
        totals.recurring_tenure = add(
            totals.recurring_tenure,
            phase.recurring_tenure,
            "quotation recurring tenure total",
        )?;
    }
    totals.grand_total = add(totals.one_time, totals.recurring_tenure, "grand total")?;
    Ok(totals)
}
