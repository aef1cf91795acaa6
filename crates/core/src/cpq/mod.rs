//! Pricing engine for phased quotations.
//!
//! Commands in [`mutation`] edit the tree and mark phases dirty,
//! [`aggregation`] rolls item figures up to the quotation, [`refresh`]
//! re-prices items through a [`refresh::PriceLookup`], and [`validation`]
//! gates submission. [`editor::QuotationEditor`] ties them together.

pub mod aggregation;
pub mod catalog;
pub mod editor;
pub mod mutation;
pub mod refresh;
pub mod validation;

pub use aggregation::{recompute, recompute_dirty, DirtySet};
pub use catalog::{Catalog, CatalogError, PriceBook, PriceEntry, ProductCatalog, RateCardSource};
pub use editor::{AddedItem, EditorSettings, QuotationEditor};
pub use mutation::{
    apply_command, CommandOutcome, GroupPatch, ItemPatch, MutationContext, NodeRef, PhasePatch,
    TreeCommand,
};
pub use refresh::{
    ItemRefreshEntry, ItemRefreshStatus, PriceLookup, PriceLookupError, PriceLookupOutcome,
    PriceLookupRequest, PriceQuote, RefreshReport,
};
pub use validation::{validate_for_submission, PhaseRule, PhaseViolation};
