use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RateCardId(pub String);

impl std::fmt::Display for RateCardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named, time-bounded price list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateCard {
    pub id: RateCardId,
    pub name: String,
    pub is_default: bool,
    pub valid_from: NaiveDate,
    pub valid_to: Option<NaiveDate>,
}

impl RateCard {
    /// Both window bounds are inclusive; an open `valid_to` never expires.
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.valid_from <= date && self.valid_to.map_or(true, |end| date <= end)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{RateCard, RateCardId};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn active_window_is_inclusive_on_both_ends() {
        let card = RateCard {
            id: RateCardId("rc-2026".to_string()),
            name: "2026 list".to_string(),
            is_default: true,
            valid_from: date(2026, 1, 1),
            valid_to: Some(date(2026, 12, 31)),
        };

        assert!(card.is_active_on(date(2026, 1, 1)));
        assert!(card.is_active_on(date(2026, 12, 31)));
        assert!(!card.is_active_on(date(2025, 12, 31)));
        assert!(!card.is_active_on(date(2027, 1, 1)));
    }

    #[test]
    fn open_ended_card_stays_active() {
        let card = RateCard {
            id: RateCardId("rc-open".to_string()),
            name: "Evergreen".to_string(),
            is_default: false,
            valid_from: date(2024, 6, 1),
            valid_to: None,
        };

        assert!(card.is_active_on(date(2040, 1, 1)));
    }
}
