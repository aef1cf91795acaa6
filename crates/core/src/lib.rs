pub mod config;
pub mod cpq;
pub mod domain;
pub mod errors;

pub use cpq::editor::{EditorSettings, QuotationEditor};
pub use domain::product::{Product, ProductId, ProductRef};
pub use domain::quotation::{
    GroupId, ItemId, PhaseId, Quotation, QuotationDocument, QuotationId, QuotationStatus,
    QuotationTotals, Totals,
};
pub use domain::rate_card::{RateCard, RateCardId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
