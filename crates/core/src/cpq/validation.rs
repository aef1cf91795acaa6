use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::quotation::{PhaseId, Quotation};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum PhaseRule {
    StartDateNotInFuture { start_date: NaiveDate, today: NaiveDate },
    TenureNotPositive { tenure_months: u32 },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseViolation {
    pub phase_id: PhaseId,
    pub phase_name: String,
    pub rule: PhaseRule,
}

impl std::fmt::Display for PhaseViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.rule {
            PhaseRule::StartDateNotInFuture { start_date, today } => write!(
                f,
                "phase `{}` starts on {start_date}, which is not after {today}",
                self.phase_name
            ),
            PhaseRule::TenureNotPositive { tenure_months } => write!(
                f,
                "phase `{}` has tenure of {tenure_months} months; at least 1 is required",
                self.phase_name
            ),
        }
    }
}

/// Every rule violation across all phases, in phase order.
pub fn validate_for_submission(quotation: &Quotation, today: NaiveDate) -> Vec<PhaseViolation> {
    let mut violations = Vec::new();
    for phase in quotation.phases() {
        if phase.start_date <= today {
            violations.push(PhaseViolation {
                phase_id: phase.id.clone(),
                phase_name: phase.name.clone(),
                rule: PhaseRule::StartDateNotInFuture { start_date: phase.start_date, today },
            });
        }
        if phase.tenure_months == 0 {
            violations.push(PhaseViolation {
                phase_id: phase.id.clone(),
                phase_name: phase.name.clone(),
                rule: PhaseRule::TenureNotPositive { tenure_months: phase.tenure_months },
            });
        }
    }
    violations
}

pub fn ensure_submittable(quotation: &Quotation, today: NaiveDate) -> Result<(), DomainError> {
    let violations = validate_for_submission(quotation, today);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(DomainError::SubmissionBlocked(violations))
    }
}
