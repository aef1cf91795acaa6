use rust_decimal::Decimal;
use serde::Deserialize;

use phasequote_core::cpq::refresh::{PriceLookupError, PriceLookupOutcome, PriceQuote};
use phasequote_core::domain::rate_card::RateCardId;

/// Body of `GET /prices`.
///
/// `found` defaults to true so a bare price object is accepted.
#[derive(Debug, Deserialize)]
pub(crate) struct PriceResponse {
    #[serde(default = "default_found")]
    pub found: bool,
    #[serde(default)]
    pub one_time_price: Option<Decimal>,
    #[serde(default)]
    pub recurring_price: Option<Decimal>,
    #[serde(default)]
    pub rate_card_id: Option<RateCardId>,
    #[serde(default)]
    pub reason: Option<String>,
}

fn default_found() -> bool {
    true
}

impl PriceResponse {
    pub fn into_outcome(
        self,
        requested: Option<&RateCardId>,
    ) -> Result<PriceLookupOutcome, PriceLookupError> {
        if !self.found {
            return Ok(PriceLookupOutcome::NotFound { reason: self.reason });
        }

        let (Some(one_time_price), Some(recurring_price)) =
            (self.one_time_price, self.recurring_price)
        else {
            return Err(PriceLookupError::Decode(
                "price response is missing one_time_price or recurring_price".to_string(),
            ));
        };

        Ok(PriceLookupOutcome::Found(PriceQuote {
            one_time_price,
            recurring_price,
            rate_card_id: self.rate_card_id.or_else(|| requested.cloned()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use phasequote_core::cpq::refresh::{PriceLookupError, PriceLookupOutcome};
    use phasequote_core::domain::rate_card::RateCardId;

    use super::PriceResponse;

    #[test]
    fn bare_price_object_counts_as_found() {
        let body: PriceResponse =
            serde_json::from_str(r#"{"one_time_price":"99.50","recurring_price":"10"}"#)
                .expect("decode");
        let requested = RateCardId("std".to_string());

        let outcome = body.into_outcome(Some(&requested)).expect("outcome");
        let PriceLookupOutcome::Found(quote) = outcome else {
            panic!("expected a price");
        };
        assert_eq!(quote.one_time_price, Decimal::new(9950, 2));
        assert_eq!(quote.rate_card_id, Some(requested));
    }

    #[test]
    fn found_without_prices_is_a_decode_error() {
        let body: PriceResponse =
            serde_json::from_str(r#"{"found":true,"one_time_price":"1"}"#).expect("decode");
        assert!(matches!(body.into_outcome(None), Err(PriceLookupError::Decode(_))));
    }
}
