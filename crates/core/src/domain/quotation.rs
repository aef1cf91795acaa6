use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cpq::aggregation::{self, clamp_non_negative, clamp_pct};
use crate::domain::product::ProductRef;
use crate::domain::rate_card::RateCardId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuotationId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PhaseId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub String);

impl QuotationId {
    pub fn generate() -> Self {
        Self(format!("QT-{}", Uuid::new_v4().simple()))
    }
}

impl PhaseId {
    pub fn generate() -> Self {
        Self(format!("phase-{}", Uuid::new_v4()))
    }
}

impl GroupId {
    pub fn generate() -> Self {
        Self(format!("group-{}", Uuid::new_v4()))
    }
}

impl ItemId {
    pub fn generate() -> Self {
        Self(format!("item-{}", Uuid::new_v4()))
    }
}

macro_rules! display_as_inner {
    ($($ty:ty),+) => {
        $(impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        })+
    };
}

display_as_inner!(QuotationId, PhaseId, GroupId, ItemId);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotationStatus {
    #[default]
    Draft,
    Unapproved,
    Approved,
}

impl QuotationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Unapproved => "unapproved",
            Self::Approved => "approved",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "unapproved" => Some(Self::Unapproved),
            "approved" => Some(Self::Approved),
            _ => None,
        }
    }
}

/// Aggregated figures for a phase or a group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub one_time: Decimal,
    pub recurring_monthly: Decimal,
    pub recurring_tenure: Decimal,
}

impl Totals {
    pub fn rounded(&self) -> Self {
        Self {
            one_time: aggregation::round_display(self.one_time),
            recurring_monthly: aggregation::round_display(self.recurring_monthly),
            recurring_tenure: aggregation::round_display(self.recurring_tenure),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotationTotals {
    pub one_time: Decimal,
    pub recurring_monthly: Decimal,
    pub recurring_tenure: Decimal,
    pub grand_total: Decimal,
}

impl QuotationTotals {
    pub fn rounded(&self) -> Self {
        Self {
            one_time: aggregation::round_display(self.one_time),
            recurring_monthly: aggregation::round_display(self.recurring_monthly),
            recurring_tenure: aggregation::round_display(self.recurring_tenure),
            grand_total: aggregation::round_display(self.grand_total),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemTotals {
    pub discounted_otp_unit: Decimal,
    pub total_otp: Decimal,
    pub discounted_recurring_unit: Decimal,
    pub total_recurring_monthly: Decimal,
    pub total_recurring_tenure: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PriceWarning {
    /// The pricing source answered, but has no applicable price.
    NoPriceFound { message: String },
    /// The pricing source could not be reached or answered with a fault.
    LookupFailed { message: String },
}

impl PriceWarning {
    pub fn message(&self) -> &str {
        match self {
            Self::NoPriceFound { message } | Self::LookupFailed { message } => message,
        }
    }
}

impl std::fmt::Display for PriceWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Where an item's current base prices came from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingProvenance {
    #[serde(default)]
    pub rate_card_id: Option<RateCardId>,
    #[serde(default)]
    pub as_of: Option<NaiveDate>,
    #[serde(default)]
    pub warning: Option<PriceWarning>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub id: PhaseId,
    pub name: String,
    pub description: String,
    pub start_date: NaiveDate,
    pub tenure_months: u32,
    /// Recorded with the phase and persisted, not applied to any total.
    pub escalation_pct: Decimal,
    pub(crate) group_ids: Vec<GroupId>,
    pub(crate) totals: Totals,
}

impl Phase {
    pub fn group_ids(&self) -> &[GroupId] {
        &self.group_ids
    }

    pub fn totals(&self) -> &Totals {
        &self.totals
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub phase_id: PhaseId,
    pub name: String,
    pub description: String,
    pub quantity: u32,
    pub(crate) item_ids: Vec<ItemId>,
    pub(crate) totals: Totals,
}

impl Group {
    pub fn item_ids(&self) -> &[ItemId] {
        &self.item_ids
    }

    pub fn totals(&self) -> &Totals {
        &self.totals
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub group_id: GroupId,
    pub product: ProductRef,
    pub quantity: u32,
    pub hrs_units: Decimal,
    pub one_time_price: Decimal,
    pub otp_discount_pct: Decimal,
    pub recurring_price_monthly: Decimal,
    pub recurring_discount_pct: Decimal,
    pub location: String,
    pub stock_status: String,
    pub note: String,
    pub pricing: PricingProvenance,
    pub(crate) totals: ItemTotals,
}

impl Item {
    /// Unpriced stub for `product`; every multiplier starts at one.
    pub fn stub(group_id: GroupId, product: ProductRef) -> Self {
        Self {
            id: ItemId::generate(),
            group_id,
            product,
            quantity: 1,
            hrs_units: Decimal::ONE,
            one_time_price: Decimal::ZERO,
            otp_discount_pct: Decimal::ZERO,
            recurring_price_monthly: Decimal::ZERO,
            recurring_discount_pct: Decimal::ZERO,
            location: String::new(),
            stock_status: String::new(),
            note: String::new(),
            pricing: PricingProvenance::default(),
            totals: ItemTotals::default(),
        }
    }

    pub fn totals(&self) -> &ItemTotals {
        &self.totals
    }

    pub fn warning(&self) -> Option<&PriceWarning> {
        self.pricing.warning.as_ref()
    }
}

/// Quotation aggregate, stored as an arena of nodes keyed by id.
///
/// Parent to child edges are ordered id lists; every child also records its
/// parent. Nodes are only created or removed through the crate's mutation
/// commands, so the arena is always a strict tree.
#[derive(Clone, Debug, PartialEq)]
pub struct Quotation {
    pub id: QuotationId,
    pub customer_ref: String,
    pub currency: String,
    pub valid_until: Option<NaiveDate>,
    pub rate_card_id: Option<RateCardId>,
    pub created_at: DateTime<Utc>,
    pub(crate) status: QuotationStatus,
    pub(crate) phase_ids: Vec<PhaseId>,
    pub(crate) phases: HashMap<PhaseId, Phase>,
    pub(crate) groups: HashMap<GroupId, Group>,
    pub(crate) items: HashMap<ItemId, Item>,
    pub(crate) totals: QuotationTotals,
}

impl Quotation {
    pub fn new(id: QuotationId, customer_ref: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            id,
            customer_ref: customer_ref.into(),
            currency: currency.into(),
            valid_until: None,
            rate_card_id: None,
            created_at: Utc::now(),
            status: QuotationStatus::Draft,
            phase_ids: Vec::new(),
            phases: HashMap::new(),
            groups: HashMap::new(),
            items: HashMap::new(),
            totals: QuotationTotals::default(),
        }
    }

    pub fn status(&self) -> QuotationStatus {
        self.status
    }

    pub fn totals(&self) -> &QuotationTotals {
        &self.totals
    }

    pub fn phase_ids(&self) -> &[PhaseId] {
        &self.phase_ids
    }

    pub fn phase(&self, id: &PhaseId) -> Option<&Phase> {
        self.phases.get(id)
    }

    pub fn group(&self, id: &GroupId) -> Option<&Group> {
        self.groups.get(id)
    }

    pub fn item(&self, id: &ItemId) -> Option<&Item> {
        self.items.get(id)
    }

    /// Phases in display order.
    pub fn phases(&self) -> impl Iterator<Item = &Phase> + '_ {
        self.phase_ids.iter().filter_map(|id| self.phases.get(id))
    }

    /// Groups of `phase_id` in display order; empty when the phase is absent.
    pub fn groups_of<'a>(&'a self, phase_id: &PhaseId) -> impl Iterator<Item = &'a Group> + 'a {
        let ids = self.phases.get(phase_id).map(|phase| phase.group_ids.as_slice()).unwrap_or(&[]);
        ids.iter().filter_map(|id| self.groups.get(id))
    }

    /// Items of `group_id` in display order; empty when the group is absent.
    pub fn items_of<'a>(&'a self, group_id: &GroupId) -> impl Iterator<Item = &'a Item> + 'a {
        let ids = self.groups.get(group_id).map(|group| group.item_ids.as_slice()).unwrap_or(&[]);
        ids.iter().filter_map(|id| self.items.get(id))
    }

    /// Owning phase of an item, resolved through its group.
    pub fn phase_of_item(&self, item_id: &ItemId) -> Option<&Phase> {
        let group = self.groups.get(&self.items.get(item_id)?.group_id)?;
        self.phases.get(&group.phase_id)
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn can_transition_to(&self, next: QuotationStatus) -> bool {
        matches!(
            (self.status, next),
            (QuotationStatus::Draft, QuotationStatus::Unapproved)
                | (QuotationStatus::Unapproved, QuotationStatus::Approved)
                | (QuotationStatus::Unapproved, QuotationStatus::Draft)
                | (QuotationStatus::Approved, QuotationStatus::Draft)
        )
    }

    pub fn transition_to(&mut self, next: QuotationStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidQuotationTransition { from: self.status, to: next })
    }

    pub(crate) fn insert_phase(&mut self, phase: Phase) {
        self.phase_ids.push(phase.id.clone());
        self.phases.insert(phase.id.clone(), phase);
    }

    pub(crate) fn insert_group(&mut self, group: Group) -> bool {
        let Some(phase) = self.phases.get_mut(&group.phase_id) else {
            return false;
        };
        phase.group_ids.push(group.id.clone());
        self.groups.insert(group.id.clone(), group);
        true
    }

    pub(crate) fn insert_item(&mut self, item: Item) -> bool {
        let Some(group) = self.groups.get_mut(&item.group_id) else {
            return false;
        };
        group.item_ids.push(item.id.clone());
        self.items.insert(item.id.clone(), item);
        true
    }

    pub(crate) fn remove_phase(&mut self, phase_id: &PhaseId) -> Option<Phase> {
        let phase = self.phases.remove(phase_id)?;
        self.phase_ids.retain(|id| id != phase_id);
        for group_id in &phase.group_ids {
            if let Some(group) = self.groups.remove(group_id) {
                for item_id in &group.item_ids {
                    self.items.remove(item_id);
                }
            }
        }
        Some(phase)
    }

    pub(crate) fn remove_group(&mut self, group_id: &GroupId) -> Option<Group> {
        let group = self.groups.remove(group_id)?;
        if let Some(phase) = self.phases.get_mut(&group.phase_id) {
            phase.group_ids.retain(|id| id != group_id);
        }
        for item_id in &group.item_ids {
            self.items.remove(item_id);
        }
        Some(group)
    }

    pub(crate) fn remove_item(&mut self, item_id: &ItemId) -> Option<Item> {
        let item = self.items.remove(item_id)?;
        if let Some(group) = self.groups.get_mut(&item.group_id) {
            group.item_ids.retain(|id| id != item_id);
        }
        Some(item)
    }

    /// Builds the arena from the nested persistence shape, normalizing values
    /// and recomputing every derived total.
    ///
    /// Fails when the document reuses an id, i.e. it is not a tree, or when
    /// its figures overflow the `Decimal` range.
    pub fn from_document(document: QuotationDocument) -> Result<Self, DomainError> {
        let mut seen = HashSet::new();
        let mut quotation = Self {
            id: document.id,
            customer_ref: document.customer_ref,
            currency: document.currency,
            valid_until: document.valid_until,
            rate_card_id: document.rate_card_id,
            created_at: document.created_at.unwrap_or_else(Utc::now),
            status: document.status,
            phase_ids: Vec::new(),
            phases: HashMap::new(),
            groups: HashMap::new(),
            items: HashMap::new(),
            totals: QuotationTotals::default(),
        };

        for phase_doc in document.phases {
            claim_id(&mut seen, &phase_doc.id.0)?;
            let phase_id = phase_doc.id.clone();
            quotation.insert_phase(Phase {
                id: phase_doc.id,
                name: phase_doc.name,
                description: phase_doc.description,
                start_date: phase_doc.start_date,
                tenure_months: phase_doc.tenure_months,
                escalation_pct: phase_doc.escalation_pct,
                group_ids: Vec::new(),
                totals: Totals::default(),
            });

            for group_doc in phase_doc.groups {
                claim_id(&mut seen, &group_doc.id.0)?;
                let group_id = group_doc.id.clone();
                quotation.insert_group(Group {
                    id: group_doc.id,
                    phase_id: phase_id.clone(),
                    name: group_doc.name,
                    description: group_doc.description,
                    quantity: group_doc.quantity,
                    item_ids: Vec::new(),
                    totals: Totals::default(),
                });

                for item_doc in group_doc.items {
                    claim_id(&mut seen, &item_doc.id.0)?;
                    quotation.insert_item(Item {
                        id: item_doc.id,
                        group_id: group_id.clone(),
                        product: item_doc.product,
                        quantity: item_doc.quantity,
                        hrs_units: clamp_non_negative(item_doc.hrs_units),
                        one_time_price: item_doc.one_time_price,
                        otp_discount_pct: clamp_pct(item_doc.otp_discount_pct),
                        recurring_price_monthly: item_doc.recurring_price_monthly,
                        recurring_discount_pct: clamp_pct(item_doc.recurring_discount_pct),
                        location: item_doc.location,
                        stock_status: item_doc.stock_status,
                        note: item_doc.note,
                        pricing: item_doc.pricing,
                        totals: ItemTotals::default(),
                    });
                }
            }
        }

        aggregation::recompute(&mut quotation)?;
        Ok(quotation)
    }

    /// Nested view of the arena, computed totals included.
    pub fn to_document(&self) -> QuotationDocument {
        QuotationDocument {
            id: self.id.clone(),
            customer_ref: self.customer_ref.clone(),
            currency: self.currency.clone(),
            valid_until: self.valid_until,
            rate_card_id: self.rate_card_id.clone(),
            status: self.status,
            created_at: Some(self.created_at),
            phases: self
                .phases()
                .map(|phase| PhaseDocument {
                    id: phase.id.clone(),
                    name: phase.name.clone(),
                    description: phase.description.clone(),
                    start_date: phase.start_date,
                    tenure_months: phase.tenure_months,
                    escalation_pct: phase.escalation_pct,
                    groups: self
                        .groups_of(&phase.id)
                        .map(|group| GroupDocument {
                            id: group.id.clone(),
                            name: group.name.clone(),
                            description: group.description.clone(),
                            quantity: group.quantity,
                            items: self
                                .items_of(&group.id)
                                .map(|item| ItemDocument {
                                    id: item.id.clone(),
                                    product: item.product.clone(),
                                    quantity: item.quantity,
                                    hrs_units: item.hrs_units,
                                    one_time_price: item.one_time_price,
                                    otp_discount_pct: item.otp_discount_pct,
                                    recurring_price_monthly: item.recurring_price_monthly,
                                    recurring_discount_pct: item.recurring_discount_pct,
                                    location: item.location.clone(),
                                    stock_status: item.stock_status.clone(),
                                    note: item.note.clone(),
                                    pricing: item.pricing.clone(),
                                    totals: Some(item.totals),
                                })
                                .collect(),
                            totals: Some(group.totals),
                        })
                        .collect(),
                    totals: Some(phase.totals),
                })
                .collect(),
            totals: Some(self.totals),
        }
    }
}

fn claim_id(seen: &mut HashSet<String>, id: &str) -> Result<(), DomainError> {
    if seen.insert(id.to_string()) {
        Ok(())
    } else {
        Err(DomainError::MalformedTree(format!("node id `{id}` appears more than once")))
    }
}

fn default_one() -> u32 {
    1
}

fn default_one_decimal() -> Decimal {
    Decimal::ONE
}

/// Nested persistence and wire shape of a quotation.
///
/// Computed totals are written out for consumers and ignored on the way in.
/// Missing numeric fields default to zero, or to one for multipliers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuotationDocument {
    pub id: QuotationId,
    #[serde(default)]
    pub customer_ref: String,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub valid_until: Option<NaiveDate>,
    #[serde(default)]
    pub rate_card_id: Option<RateCardId>,
    #[serde(default)]
    pub status: QuotationStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub phases: Vec<PhaseDocument>,
    #[serde(default)]
    pub totals: Option<QuotationTotals>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhaseDocument {
    pub id: PhaseId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub start_date: NaiveDate,
    #[serde(default = "default_one")]
    pub tenure_months: u32,
    #[serde(default)]
    pub escalation_pct: Decimal,
    #[serde(default)]
    pub groups: Vec<GroupDocument>,
    #[serde(default)]
    pub totals: Option<Totals>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupDocument {
    pub id: GroupId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_one")]
    pub quantity: u32,
    #[serde(default)]
    pub items: Vec<ItemDocument>,
    #[serde(default)]
    pub totals: Option<Totals>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemDocument {
    pub id: ItemId,
    pub product: ProductRef,
    #[serde(default = "default_one")]
    pub quantity: u32,
    #[serde(default = "default_one_decimal")]
    pub hrs_units: Decimal,
    #[serde(default)]
    pub one_time_price: Decimal,
    #[serde(default)]
    pub otp_discount_pct: Decimal,
    #[serde(default)]
    pub recurring_price_monthly: Decimal,
    #[serde(default)]
    pub recurring_discount_pct: Decimal,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub stock_status: String,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub pricing: PricingProvenance,
    #[serde(default)]
    pub totals: Option<ItemTotals>,
}
