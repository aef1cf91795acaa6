//! HTTP adapter for an external pricing service.
//!
//! [`HttpPricingClient`] implements the core lookup and catalog traits so the
//! editor can price items against a remote service instead of the local
//! SQLite rate cards.

pub mod client;
mod wire;

pub use client::{HttpPricingClient, HttpPricingClientBuilder, PricingClientError};
