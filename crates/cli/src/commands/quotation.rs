//! Quotation workflow commands: show, reprice, submit, approve, revert.
//!
//! Each command loads the stored tree into an editor session, applies one
//! operation and saves the result. Failures carry a correlation id that also
//! appears on the matching log events.

use chrono::{NaiveDate, Utc};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use phasequote_core::config::{AppConfig, PricingSource};
use phasequote_core::cpq::refresh::{PriceLookup, RefreshReport};
use phasequote_core::domain::quotation::{QuotationId, QuotationStatus};
use phasequote_core::domain::rate_card::RateCardId;
use phasequote_core::{ApplicationError, DomainError, EditorSettings, QuotationEditor};
use phasequote_db::repositories::{QuotationRepository, SqlQuotationRepository, SqlRateCardRepository};
use phasequote_db::DbPool;
use phasequote_pricing::{HttpPricingClient, PricingClientError};

use crate::commands::{build_runtime, load_config, open_pool, CommandResult, StepFailure};

/// Rate card handling for `reprice`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RateCardChoice {
    Keep,
    Default,
    Switch(String),
}

pub fn show(quotation_id: &str) -> CommandResult {
    run_session("show", quotation_id, |session| {
        Box::pin(async move {
            let editor = session.load().await?;
            let document = editor.quotation().to_document();
            let data = serde_json::to_value(&document)
                .map_err(|error| ("serialization", error.to_string(), 5u8))?;
            Ok(CommandResult::success_with_data(
                "show",
                format!("quotation {} ({})", document.id, document.status.as_str()),
                Some(data),
            ))
        })
    })
}

pub fn reprice(quotation_id: &str, choice: RateCardChoice) -> CommandResult {
    run_session("reprice", quotation_id, |session| {
        Box::pin(async move {
            let mut editor = session.load().await?;
            if editor.quotation().status() != QuotationStatus::Draft {
                return Err((
                    "validation",
                    format!(
                        "only draft quotations can be re-priced; {} is {}",
                        session.quotation_id,
                        editor.quotation().status().as_str()
                    ),
                    6u8,
                ));
            }

            let lookup = session.price_lookup()?;
            let report = match choice {
                RateCardChoice::Keep => editor.refresh_all(&*lookup).await,
                RateCardChoice::Default => editor.change_rate_card(&*lookup, None).await,
                RateCardChoice::Switch(id) => {
                    editor.change_rate_card(&*lookup, Some(RateCardId(id))).await
                }
            };
            log_report(session, &report);

            session.save(&editor).await?;
            let data = json!({
                "report": report,
                "totals": editor.quotation().totals(),
            });
            Ok(CommandResult::success_with_data(
                "reprice",
                format!(
                    "re-priced {}: {} updated, {} without price, {} failed",
                    session.quotation_id,
                    report.updated(),
                    report.not_found(),
                    report.failed()
                ),
                Some(data),
            ))
        })
    })
}

pub fn submit(quotation_id: &str, today: Option<NaiveDate>) -> CommandResult {
    let today = today.unwrap_or_else(|| Utc::now().date_naive());
    transition("submit", quotation_id, move |editor| editor.submit(today))
}

pub fn approve(quotation_id: &str) -> CommandResult {
    transition("approve", quotation_id, QuotationEditor::approve)
}

pub fn revert(quotation_id: &str) -> CommandResult {
    transition("revert", quotation_id, QuotationEditor::revert_to_draft)
}

fn transition<F>(command: &'static str, quotation_id: &str, step: F) -> CommandResult
where
    F: FnOnce(&mut QuotationEditor) -> Result<(), DomainError> + Send + 'static,
{
    run_session(command, quotation_id, move |session| {
        Box::pin(async move {
            let mut editor = session.load().await?;
            step(&mut editor).map_err(|error| {
                warn!(
                    event_name = "cli.quotation.transition_rejected",
                    command,
                    quote_id = %session.quotation_id,
                    correlation_id = %session.correlation_id,
                    error = %error,
                    "quotation transition rejected"
                );
                session.failure(ApplicationError::Domain(error))
            })?;

            let saved = session.save(&editor).await?;
            info!(
                event_name = "cli.quotation.transitioned",
                command,
                quote_id = %saved.id,
                status = saved.status.as_str(),
                correlation_id = %session.correlation_id,
                "quotation status changed"
            );
            Ok(CommandResult::success_with_data(
                command,
                format!("quotation {} is now {}", saved.id, saved.status.as_str()),
                Some(json!({ "id": saved.id, "status": saved.status })),
            ))
        })
    })
}

type SessionFuture<'a> =
    std::pin::Pin<Box<dyn std::future::Future<Output = Result<CommandResult, StepFailure>> + 'a>>;

/// Loads config, opens a migrated pool, runs `work`, then closes the pool.
fn run_session<F>(command: &'static str, quotation_id: &str, work: F) -> CommandResult
where
    F: for<'a> FnOnce(&'a Session) -> SessionFuture<'a>,
{
    let config = match load_config(command) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match build_runtime(command) {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;
        let session = Session {
            quotation_id: QuotationId(quotation_id.trim().to_string()),
            correlation_id: format!("cli-{}", Uuid::new_v4()),
            repository: SqlQuotationRepository::new(pool.clone()),
            pool: pool.clone(),
            config,
        };
        let outcome = work(&session).await;
        pool.close().await;
        outcome
    });

    match result {
        Ok(output) => output,
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(command, error_class, message, exit_code)
        }
    }
}

struct Session {
    quotation_id: QuotationId,
    correlation_id: String,
    repository: SqlQuotationRepository,
    pool: DbPool,
    config: AppConfig,
}

impl Session {
    fn settings(&self) -> EditorSettings {
        EditorSettings {
            default_tenure_months: self.config.quotation.default_tenure_months,
            max_concurrent_lookups: self.config.pricing.max_concurrent_lookups,
        }
    }

    async fn load(&self) -> Result<QuotationEditor, StepFailure> {
        let quotation = self
            .repository
            .find_by_id(&self.quotation_id)
            .await
            .map_err(|error| self.failure(ApplicationError::Persistence(error.to_string())))?
            .ok_or_else(|| {
                self.failure(ApplicationError::NotFound(format!(
                    "quotation {}",
                    self.quotation_id
                )))
            })?;
        Ok(QuotationEditor::new(quotation, self.settings()))
    }

    async fn save(
        &self,
        editor: &QuotationEditor,
    ) -> Result<phasequote_db::repositories::SavedQuotation, StepFailure> {
        self.repository
            .save(editor.quotation())
            .await
            .map_err(|error| self.failure(ApplicationError::Persistence(error.to_string())))
    }

    fn price_lookup(&self) -> Result<Box<dyn PriceLookup>, StepFailure> {
        match self.config.pricing.source {
            PricingSource::Sqlite => Ok(Box::new(SqlRateCardRepository::new(self.pool.clone()))),
            PricingSource::Http => HttpPricingClient::from_config(&self.config.pricing)
                .map(|client| Box::new(client) as Box<dyn PriceLookup>)
                .map_err(|error| self.failure(pricing_client_error(error))),
        }
    }

    fn failure(&self, error: ApplicationError) -> StepFailure {
        let exit_code = exit_code_for(&error);
        let interface = error.into_interface(self.correlation_id.clone());
        (
            interface.error_class(),
            format!("{} (correlation_id: {})", interface.message(), self.correlation_id),
            exit_code,
        )
    }
}

fn pricing_client_error(error: PricingClientError) -> ApplicationError {
    match error {
        PricingClientError::MissingBaseUrl => ApplicationError::Configuration(error.to_string()),
        PricingClientError::Build(_) => ApplicationError::Integration(error.to_string()),
    }
}

fn exit_code_for(error: &ApplicationError) -> u8 {
    match error {
        ApplicationError::Configuration(_) => 2,
        ApplicationError::Persistence(_) | ApplicationError::Integration(_) => 5,
        ApplicationError::Domain(_) | ApplicationError::NotFound(_) => 6,
    }
}

fn log_report(session: &Session, report: &RefreshReport) {
    info!(
        event_name = "cli.quotation.repriced",
        quote_id = %session.quotation_id,
        correlation_id = %session.correlation_id,
        updated = report.updated(),
        not_found = report.not_found(),
        failed = report.failed(),
        "quotation re-priced"
    );
}
