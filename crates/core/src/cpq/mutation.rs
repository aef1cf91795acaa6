use chrono::{Days, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::cpq::aggregation::{clamp_non_negative, clamp_pct, DirtySet};
use crate::domain::quotation::{
    Group, GroupId, Item, ItemId, ItemTotals, Phase, PhaseId, Quotation, Totals,
};
use crate::errors::DomainError;

pub const DEFAULT_TENURE_MONTHS: u32 = 12;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PhasePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub tenure_months: Option<u32>,
    pub escalation_pct: Option<Decimal>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub quantity: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemPatch {
    pub quantity: Option<u32>,
    pub hrs_units: Option<Decimal>,
    pub one_time_price: Option<Decimal>,
    pub otp_discount_pct: Option<Decimal>,
    pub recurring_price_monthly: Option<Decimal>,
    pub recurring_discount_pct: Option<Decimal>,
    pub location: Option<String>,
    pub stock_status: Option<String>,
    pub note: Option<String>,
}

/// Structural edit of the phase/group/item tree.
///
/// Addressing a node that does not exist, or a child through a parent that
/// does not own it, is a no-op.
#[derive(Clone, Debug, PartialEq)]
pub enum TreeCommand {
    AddPhase,
    UpdatePhase { phase_id: PhaseId, patch: PhasePatch },
    DeletePhase { phase_id: PhaseId },
    AddGroup { phase_id: PhaseId },
    UpdateGroup { phase_id: PhaseId, group_id: GroupId, patch: GroupPatch },
    DeleteGroup { phase_id: PhaseId, group_id: GroupId },
    InsertItem { phase_id: PhaseId, item: Box<Item> },
    UpdateItem { phase_id: PhaseId, group_id: GroupId, item_id: ItemId, patch: ItemPatch },
    DeleteItem { phase_id: PhaseId, group_id: GroupId, item_id: ItemId },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeRef {
    Phase(PhaseId),
    Group(GroupId),
    Item(ItemId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandOutcome {
    Unchanged,
    Updated,
    Created(NodeRef),
    Deleted,
    /// Rolled back because the resulting totals could not be computed.
    Rejected(DomainError),
}

impl CommandOutcome {
    pub fn changed(&self) -> bool {
        !matches!(self, Self::Unchanged | Self::Rejected(_))
    }

    pub fn rejection(&self) -> Option<&DomainError> {
        match self {
            Self::Rejected(error) => Some(error),
            _ => None,
        }
    }

    pub fn created_phase(&self) -> Option<&PhaseId> {
        match self {
            Self::Created(NodeRef::Phase(id)) => Some(id),
            _ => None,
        }
    }

    pub fn created_group(&self) -> Option<&GroupId> {
        match self {
            Self::Created(NodeRef::Group(id)) => Some(id),
            _ => None,
        }
    }

    pub fn created_item(&self) -> Option<&ItemId> {
        match self {
            Self::Created(NodeRef::Item(id)) => Some(id),
            _ => None,
        }
    }
}

/// Values a command needs from outside the tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MutationContext {
    pub today: NaiveDate,
    pub default_tenure_months: u32,
}

impl MutationContext {
    pub fn new(today: NaiveDate) -> Self {
        Self { today, default_tenure_months: DEFAULT_TENURE_MONTHS }
    }
}

/// Applies `command` and records the phases whose totals went stale.
///
/// Totals are not recomputed here; callers batch commands and recompute once.
pub fn apply_command(
    quotation: &mut Quotation,
    command: TreeCommand,
    context: &MutationContext,
    dirty: &mut DirtySet,
) -> CommandOutcome {
    match command {
        TreeCommand::AddPhase => {
            let phase = new_phase(quotation, context);
            let phase_id = phase.id.clone();
            quotation.insert_phase(phase);
            dirty.mark_phase(phase_id.clone());
            CommandOutcome::Created(NodeRef::Phase(phase_id))
        }
        TreeCommand::UpdatePhase { phase_id, patch } => {
            let Some(phase) = quotation.phases.get_mut(&phase_id) else {
                return CommandOutcome::Unchanged;
            };
            apply_phase_patch(phase, patch);
            dirty.mark_phase(phase_id);
            CommandOutcome::Updated
        }
        TreeCommand::DeletePhase { phase_id } => {
            if quotation.remove_phase(&phase_id).is_none() {
                return CommandOutcome::Unchanged;
            }
            dirty.mark_quotation();
            CommandOutcome::Deleted
        }
        TreeCommand::AddGroup { phase_id } => {
            let Some(phase) = quotation.phases.get(&phase_id) else {
                return CommandOutcome::Unchanged;
            };
            let group = Group {
                id: GroupId::generate(),
                phase_id: phase_id.clone(),
                name: format!("Group {}", phase.group_ids.len() + 1),
                description: String::new(),
                quantity: 1,
                item_ids: Vec::new(),
                totals: Totals::default(),
            };
            let group_id = group.id.clone();
            quotation.insert_group(group);
            dirty.mark_phase(phase_id);
            CommandOutcome::Created(NodeRef::Group(group_id))
        }
        TreeCommand::UpdateGroup { phase_id, group_id, patch } => {
            let Some(group) = owned_group_mut(quotation, &phase_id, &group_id) else {
                return CommandOutcome::Unchanged;
            };
            apply_group_patch(group, patch);
            dirty.mark_phase(phase_id);
            CommandOutcome::Updated
        }
        TreeCommand::DeleteGroup { phase_id, group_id } => {
            if owned_group_mut(quotation, &phase_id, &group_id).is_none() {
                return CommandOutcome::Unchanged;
            }
            quotation.remove_group(&group_id);
            dirty.mark_phase(phase_id);
            CommandOutcome::Deleted
        }
        TreeCommand::InsertItem { phase_id, item } => {
            let mut item = *item;
            if owned_group_mut(quotation, &phase_id, &item.group_id).is_none()
                || quotation.items.contains_key(&item.id)
            {
                return CommandOutcome::Unchanged;
            }
            normalize_item(&mut item);
            let item_id = item.id.clone();
            quotation.insert_item(item);
            dirty.mark_phase(phase_id);
            CommandOutcome::Created(NodeRef::Item(item_id))
        }
        TreeCommand::UpdateItem { phase_id, group_id, item_id, patch } => {
            let Some(item) = owned_item_mut(quotation, &phase_id, &group_id, &item_id) else {
                return CommandOutcome::Unchanged;
            };
            apply_item_patch(item, patch);
            dirty.mark_phase(phase_id);
            CommandOutcome::Updated
        }
        TreeCommand::DeleteItem { phase_id, group_id, item_id } => {
            if owned_item_mut(quotation, &phase_id, &group_id, &item_id).is_none() {
                return CommandOutcome::Unchanged;
            }
            quotation.remove_item(&item_id);
            dirty.mark_phase(phase_id);
            CommandOutcome::Deleted
        }
    }
}

fn new_phase(quotation: &Quotation, context: &MutationContext) -> Phase {
    let start_date = context.today.checked_add_days(Days::new(1)).unwrap_or(context.today);
    Phase {
        id: PhaseId::generate(),
        name: format!("Phase {}", quotation.phase_ids.len() + 1),
        description: String::new(),
        start_date,
        tenure_months: context.default_tenure_months,
        escalation_pct: Decimal::ZERO,
        group_ids: Vec::new(),
        totals: Totals::default(),
    }
}

fn owned_group_mut<'a>(
    quotation: &'a mut Quotation,
    phase_id: &PhaseId,
    group_id: &GroupId,
) -> Option<&'a mut Group> {
    quotation.groups.get_mut(group_id).filter(|group| &group.phase_id == phase_id)
}

fn owned_item_mut<'a>(
    quotation: &'a mut Quotation,
    phase_id: &PhaseId,
    group_id: &GroupId,
    item_id: &ItemId,
) -> Option<&'a mut Item> {
    let owned = quotation.groups.get(group_id).is_some_and(|group| &group.phase_id == phase_id);
    if !owned {
        return None;
    }
    quotation.items.get_mut(item_id).filter(|item| &item.group_id == group_id)
}

fn apply_phase_patch(phase: &mut Phase, patch: PhasePatch) {
    if let Some(name) = patch.name {
        phase.name = name;
    }
    if let Some(description) = patch.description {
        phase.description = description;
    }
    if let Some(start_date) = patch.start_date {
        phase.start_date = start_date;
    }
    if let Some(tenure_months) = patch.tenure_months {
        phase.tenure_months = tenure_months;
    }
    if let Some(escalation_pct) = patch.escalation_pct {
        phase.escalation_pct = escalation_pct;
    }
}

fn apply_group_patch(group: &mut Group, patch: GroupPatch) {
    if let Some(name) = patch.name {
        group.name = name;
    }
    if let Some(description) = patch.description {
        group.description = description;
    }
    if let Some(quantity) = patch.quantity {
        group.quantity = quantity;
    }
}

fn apply_item_patch(item: &mut Item, patch: ItemPatch) {
    if let Some(quantity) = patch.quantity {
        item.quantity = quantity;
    }
    if let Some(hrs_units) = patch.hrs_units {
        item.hrs_units = clamp_non_negative(hrs_units);
    }
    if let Some(one_time_price) = patch.one_time_price {
        item.one_time_price = one_time_price;
    }
    if let Some(otp_discount_pct) = patch.otp_discount_pct {
        item.otp_discount_pct = clamp_pct(otp_discount_pct);
    }
    if let Some(recurring_price_monthly) = patch.recurring_price_monthly {
        item.recurring_price_monthly = recurring_price_monthly;
    }
    if let Some(recurring_discount_pct) = patch.recurring_discount_pct {
        item.recurring_discount_pct = clamp_pct(recurring_discount_pct);
    }
    if let Some(location) = patch.location {
        item.location = location;
    }
    if let Some(stock_status) = patch.stock_status {
        item.stock_status = stock_status;
    }
    if let Some(note) = patch.note {
        item.note = note;
    }
}

fn normalize_item(item: &mut Item) {
    item.hrs_units = clamp_non_negative(item.hrs_units);
    item.otp_discount_pct = clamp_pct(item.otp_discount_pct);
    item.recurring_discount_pct = clamp_pct(item.recurring_discount_pct);
    item.totals = ItemTotals::default();
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use super::{apply_command, GroupPatch, ItemPatch, MutationContext, PhasePatch, TreeCommand};
    use crate::cpq::aggregation::DirtySet;
    use crate::domain::product::ProductRef;
    use crate::domain::quotation::{GroupId, Item, ItemId, PhaseId, Quotation, QuotationId};

    fn context() -> MutationContext {
        MutationContext::new(NaiveDate::from_ymd_opt(2026, 10, 19).expect("date"))
    }

    fn quotation() -> Quotation {
        Quotation::new(QuotationId("QT-1".to_string()), "ACME", "USD")
    }

    fn seeded() -> (Quotation, PhaseId, GroupId) {
        let mut quotation = quotation();
        let mut dirty = DirtySet::default();
        let phase_id = apply_command(&mut quotation, TreeCommand::AddPhase, &context(), &mut dirty)
            .created_phase()
            .cloned()
            .expect("phase created");
        let group_id = apply_command(
            &mut quotation,
            TreeCommand::AddGroup { phase_id: phase_id.clone() },
            &context(),
            &mut dirty,
        )
        .created_group()
        .cloned()
        .expect("group created");
        (quotation, phase_id, group_id)
    }

    #[test]
    fn new_phase_uses_defaults() {
        let (quotation, phase_id, _) = seeded();
        let phase = quotation.phase(&phase_id).expect("phase");

        assert_eq!(phase.tenure_months, 12);
        assert_eq!(phase.escalation_pct, Decimal::ZERO);
        assert_eq!(phase.start_date, NaiveDate::from_ymd_opt(2026, 10, 20).expect("date"));
        assert!(phase.id.0.starts_with("phase-"));
    }

    #[test]
    fn missing_ids_are_noops() {
        let (mut quotation, phase_id, group_id) = seeded();
        let before = quotation.clone();
        let mut dirty = DirtySet::default();

        let outcomes = [
            apply_command(
                &mut quotation,
                TreeCommand::DeletePhase { phase_id: PhaseId("nope".to_string()) },
                &context(),
                &mut dirty,
            ),
            apply_command(
                &mut quotation,
                TreeCommand::UpdatePhase {
                    phase_id: PhaseId("nope".to_string()),
                    patch: PhasePatch { tenure_months: Some(3), ..PhasePatch::default() },
                },
                &context(),
                &mut dirty,
            ),
            apply_command(
                &mut quotation,
                TreeCommand::AddGroup { phase_id: PhaseId("nope".to_string()) },
                &context(),
                &mut dirty,
            ),
            apply_command(
                &mut quotation,
                TreeCommand::UpdateGroup {
                    phase_id: PhaseId("other".to_string()),
                    group_id: group_id.clone(),
                    patch: GroupPatch { quantity: Some(9), ..GroupPatch::default() },
                },
                &context(),
                &mut dirty,
            ),
            apply_command(
                &mut quotation,
                TreeCommand::DeleteItem {
                    phase_id,
                    group_id,
                    item_id: ItemId("nope".to_string()),
                },
                &context(),
                &mut dirty,
            ),
        ];

        assert!(outcomes.iter().all(|outcome| !outcome.changed()));
        assert!(dirty.is_empty());
        assert_eq!(quotation, before);
    }

    #[test]
    fn deleting_a_phase_removes_all_descendants() {
        let (mut quotation, phase_id, group_id) = seeded();
        let mut dirty = DirtySet::default();
        let item = Item::stub(group_id.clone(), ProductRef::new("sku-1", "Router"));
        apply_command(
            &mut quotation,
            TreeCommand::InsertItem { phase_id: phase_id.clone(), item: Box::new(item) },
            &context(),
            &mut dirty,
        );
        assert_eq!(quotation.item_count(), 1);

        let outcome = apply_command(
            &mut quotation,
            TreeCommand::DeletePhase { phase_id: phase_id.clone() },
            &context(),
            &mut dirty,
        );

        assert!(outcome.changed());
        assert!(quotation.phase(&phase_id).is_none());
        assert!(quotation.group(&group_id).is_none());
        assert_eq!(quotation.item_count(), 0);
        assert!(quotation.phase_ids().is_empty());
    }

    #[test]
    fn item_patch_clamps_discounts_and_hours() {
        let (mut quotation, phase_id, group_id) = seeded();
        let mut dirty = DirtySet::default();
        let item_id = apply_command(
            &mut quotation,
            TreeCommand::InsertItem {
                phase_id: phase_id.clone(),
                item: Box::new(Item::stub(group_id.clone(), ProductRef::new("sku-1", "Router"))),
            },
            &context(),
            &mut dirty,
        )
        .created_item()
        .cloned()
        .expect("item created");

        apply_command(
            &mut quotation,
            TreeCommand::UpdateItem {
                phase_id,
                group_id,
                item_id: item_id.clone(),
                patch: ItemPatch {
                    otp_discount_pct: Some(Decimal::new(1250, 1)),
                    recurring_discount_pct: Some(Decimal::new(-5, 0)),
                    hrs_units: Some(Decimal::new(-2, 0)),
                    ..ItemPatch::default()
                },
            },
            &context(),
            &mut dirty,
        );

        let item = quotation.item(&item_id).expect("item");
        assert_eq!(item.otp_discount_pct, Decimal::ONE_HUNDRED);
        assert_eq!(item.recurring_discount_pct, Decimal::ZERO);
        assert_eq!(item.hrs_units, Decimal::ZERO);
    }

    #[test]
    fn insert_into_group_of_another_phase_is_rejected() {
        let (mut quotation, _, group_id) = seeded();
        let mut dirty = DirtySet::default();
        let other_phase = apply_command(&mut quotation, TreeCommand::AddPhase, &context(), &mut dirty)
            .created_phase()
            .cloned()
            .expect("phase created");
        let mut dirty = DirtySet::default();

        let outcome = apply_command(
            &mut quotation,
            TreeCommand::InsertItem {
                phase_id: other_phase,
                item: Box::new(Item::stub(group_id, ProductRef::new("sku-1", "Router"))),
            },
            &context(),
            &mut dirty,
        );

        assert!(!outcome.changed());
        assert_eq!(quotation.item_count(), 0);
        assert!(dirty.is_empty());
    }
}
