pub mod product;
pub mod quotation;
pub mod rate_card;
