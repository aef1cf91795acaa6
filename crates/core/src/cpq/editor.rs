use chrono::{NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::cpq::aggregation::{self, DirtySet};
use crate::cpq::mutation::{
    apply_command, CommandOutcome, GroupPatch, ItemPatch, MutationContext, PhasePatch,
    TreeCommand, DEFAULT_TENURE_MONTHS,
};
use crate::cpq::refresh::{
    self, apply_lookup, ItemRefreshStatus, PriceLookup, PriceLookupRequest, RefreshReport,
    DEFAULT_MAX_CONCURRENT_LOOKUPS,
};
use crate::cpq::validation;
use crate::domain::product::ProductRef;
use crate::domain::quotation::{
    GroupId, Item, ItemId, PhaseId, Quotation, QuotationStatus,
};
use crate::domain::rate_card::RateCardId;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EditorSettings {
    pub default_tenure_months: u32,
    pub max_concurrent_lookups: usize,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            default_tenure_months: DEFAULT_TENURE_MONTHS,
            max_concurrent_lookups: DEFAULT_MAX_CONCURRENT_LOOKUPS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddedItem {
    pub item_id: ItemId,
    pub status: ItemRefreshStatus,
}

/// Single-owner editing session over one quotation.
///
/// Every public mutation leaves the totals current before it returns.
/// `apply_batch` defers the recompute to the end of the batch.
pub struct QuotationEditor {
    quotation: Quotation,
    dirty: DirtySet,
    settings: EditorSettings,
}

impl QuotationEditor {
    /// Totals are taken as current; `Quotation::from_document` and every
    /// editor mutation keep them so.
    pub fn new(quotation: Quotation, settings: EditorSettings) -> Self {
        Self { quotation, dirty: DirtySet::default(), settings }
    }

    pub fn quotation(&self) -> &Quotation {
        &self.quotation
    }

    pub fn into_quotation(self) -> Quotation {
        self.quotation
    }

    fn context(&self, today: NaiveDate) -> MutationContext {
        MutationContext { today, default_tenure_months: self.settings.default_tenure_months }
    }

    pub fn apply(&mut self, command: TreeCommand) -> CommandOutcome {
        self.apply_on(command, today())
    }

    /// A command whose totals cannot be computed is rolled back and reported
    /// as [`CommandOutcome::Rejected`].
    pub fn apply_on(&mut self, command: TreeCommand, today: NaiveDate) -> CommandOutcome {
        let context = self.context(today);
        let snapshot = self.quotation.clone();
        let outcome = apply_command(&mut self.quotation, command, &context, &mut self.dirty);
        match self.recompute_dirty() {
            Ok(()) => outcome,
            Err(error) => {
                self.roll_back(snapshot, &error);
                CommandOutcome::Rejected(error)
            }
        }
    }

    /// Applies all commands, then recomputes once against the final state.
    ///
    /// The batch is all or nothing: if the final totals cannot be computed,
    /// every command that changed the tree comes back rejected.
    pub fn apply_batch(&mut self, commands: Vec<TreeCommand>) -> Vec<CommandOutcome> {
        let context = self.context(today());
        let snapshot = self.quotation.clone();
        let outcomes = commands
            .into_iter()
            .map(|command| apply_command(&mut self.quotation, command, &context, &mut self.dirty))
            .collect::<Vec<_>>();
        debug!(
            event_name = "cpq.editor.batch_applied",
            quote_id = %self.quotation.id,
            commands = outcomes.len(),
            changed = outcomes.iter().filter(|outcome| outcome.changed()).count(),
            "batch applied"
        );
        match self.recompute_dirty() {
            Ok(()) => outcomes,
            Err(error) => {
                self.roll_back(snapshot, &error);
                outcomes
                    .into_iter()
                    .map(|outcome| {
                        if outcome.changed() {
                            CommandOutcome::Rejected(error.clone())
                        } else {
                            outcome
                        }
                    })
                    .collect()
            }
        }
    }

    fn recompute_dirty(&mut self) -> Result<(), DomainError> {
        aggregation::recompute_dirty(&mut self.quotation, &mut self.dirty)
    }

    fn roll_back(&mut self, snapshot: Quotation, error: &DomainError) {
        warn!(
            event_name = "cpq.editor.change_rejected",
            quote_id = %self.quotation.id,
            error = %error,
            "change rolled back"
        );
        self.quotation = snapshot;
        self.dirty = DirtySet::default();
    }

    /// Full recompute of every derived figure.
    pub fn recompute(&mut self) -> Result<(), DomainError> {
        aggregation::recompute(&mut self.quotation)?;
        self.dirty = DirtySet::default();
        Ok(())
    }

    pub fn add_phase(&mut self) -> Option<PhaseId> {
        self.add_phase_on(today())
    }

    /// New phase starting the day after `today`.
    pub fn add_phase_on(&mut self, today: NaiveDate) -> Option<PhaseId> {
        self.apply_on(TreeCommand::AddPhase, today).created_phase().cloned()
    }

    pub fn update_phase(&mut self, phase_id: &PhaseId, patch: PhasePatch) -> bool {
        self.apply(TreeCommand::UpdatePhase { phase_id: phase_id.clone(), patch }).changed()
    }

    pub fn delete_phase(&mut self, phase_id: &PhaseId) -> bool {
        self.apply(TreeCommand::DeletePhase { phase_id: phase_id.clone() }).changed()
    }

    pub fn add_group(&mut self, phase_id: &PhaseId) -> Option<GroupId> {
        self.apply(TreeCommand::AddGroup { phase_id: phase_id.clone() }).created_group().cloned()
    }

    pub fn update_group(&mut self, phase_id: &PhaseId, group_id: &GroupId, patch: GroupPatch) -> bool {
        self.apply(TreeCommand::UpdateGroup {
            phase_id: phase_id.clone(),
            group_id: group_id.clone(),
            patch,
        })
        .changed()
    }

    pub fn delete_group(&mut self, phase_id: &PhaseId, group_id: &GroupId) -> bool {
        self.apply(TreeCommand::DeleteGroup { phase_id: phase_id.clone(), group_id: group_id.clone() })
            .changed()
    }

    pub fn update_item(
        &mut self,
        phase_id: &PhaseId,
        group_id: &GroupId,
        item_id: &ItemId,
        patch: ItemPatch,
    ) -> bool {
        self.apply(TreeCommand::UpdateItem {
            phase_id: phase_id.clone(),
            group_id: group_id.clone(),
            item_id: item_id.clone(),
            patch,
        })
        .changed()
    }

    pub fn delete_item(&mut self, phase_id: &PhaseId, group_id: &GroupId, item_id: &ItemId) -> bool {
        self.apply(TreeCommand::DeleteItem {
            phase_id: phase_id.clone(),
            group_id: group_id.clone(),
            item_id: item_id.clone(),
        })
        .changed()
    }

    /// Prices `product` as of the phase start date and inserts it.
    ///
    /// The item is inserted whatever the lookup says; a missing price or a
    /// failed lookup leaves a warning on it. Returns `None` without calling
    /// the lookup when the group does not belong to the phase, and `None`
    /// when the priced item pushes the totals out of range.
    pub async fn add_item_to_group<L>(
        &mut self,
        lookup: &L,
        phase_id: &PhaseId,
        group_id: &GroupId,
        product: ProductRef,
    ) -> Option<AddedItem>
    where
        L: PriceLookup + ?Sized,
    {
        let as_of = self.quotation.phase(phase_id)?.start_date;
        let owned = self.quotation.group(group_id).is_some_and(|group| &group.phase_id == phase_id);
        if !owned {
            return None;
        }

        let request = PriceLookupRequest {
            product_id: product.id.clone(),
            as_of,
            rate_card_id: self.quotation.rate_card_id.clone(),
        };
        let mut item = Item::stub(group_id.clone(), product);
        let result = lookup.lookup(&request).await;
        let status = apply_lookup(&mut item, &request, result);

        let outcome = self.apply(TreeCommand::InsertItem { phase_id: phase_id.clone(), item: Box::new(item) });
        outcome.created_item().cloned().map(|item_id| AddedItem { item_id, status })
    }

    /// Re-prices every item against the quotation's current rate card.
    pub async fn refresh_all<L>(&mut self, lookup: &L) -> RefreshReport
    where
        L: PriceLookup + ?Sized,
    {
        let rate_card_id = self.quotation.rate_card_id.clone();
        let plan = refresh::plan_refresh(&self.quotation, rate_card_id.as_ref());
        info!(
            event_name = "cpq.refresh.started",
            quote_id = %self.quotation.id,
            items = plan.lookups.len(),
            rate_card_id = rate_card_id.as_ref().map(|id| id.0.as_str()).unwrap_or("default"),
            "refreshing item prices"
        );
        let results =
            refresh::execute_plan(lookup, &plan, self.settings.max_concurrent_lookups).await;

        self.dirty = DirtySet::default();
        refresh::apply_results(&mut self.quotation, rate_card_id, results)
    }

    /// Switches rate card and re-prices everything against it.
    pub async fn change_rate_card<L>(
        &mut self,
        lookup: &L,
        rate_card_id: Option<RateCardId>,
    ) -> RefreshReport
    where
        L: PriceLookup + ?Sized,
    {
        self.quotation.rate_card_id = rate_card_id;
        self.refresh_all(lookup).await
    }

    /// Runs the submission gate and moves Draft to Unapproved.
    pub fn submit(&mut self, today: NaiveDate) -> Result<(), DomainError> {
        if !self.quotation.can_transition_to(QuotationStatus::Unapproved) {
            return Err(DomainError::InvalidQuotationTransition {
                from: self.quotation.status(),
                to: QuotationStatus::Unapproved,
            });
        }
        validation::ensure_submittable(&self.quotation, today)?;
        self.quotation.transition_to(QuotationStatus::Unapproved)
    }

    pub fn approve(&mut self) -> Result<(), DomainError> {
        self.quotation.transition_to(QuotationStatus::Approved)
    }

    pub fn revert_to_draft(&mut self) -> Result<(), DomainError> {
        self.quotation.transition_to(QuotationStatus::Draft)
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}
