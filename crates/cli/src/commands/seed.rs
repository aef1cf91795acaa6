use crate::commands::{build_runtime, load_config, open_pool, CommandResult, StepFailure};
use phasequote_db::{DemoSeedDataset, SeedResult};

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match build_runtime("seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;

        let seed_result = DemoSeedDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        let verification = DemoSeedDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        let run_result: Result<SeedResult, StepFailure> = if verification.all_present {
            Ok(seed_result)
        } else {
            let failed_checks = verification
                .checks
                .iter()
                .filter_map(|(check, passed)| (!passed).then_some(*check))
                .collect::<Vec<_>>();
            Err(("seed_verification", verification_message(&failed_checks), 6u8))
        };

        pool.close().await;
        run_result
    });

    match result {
        Ok(seeded) => CommandResult::success("seed", seed_summary(&seeded)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn seed_summary(seeded: &SeedResult) -> String {
    format!(
        "demo dataset loaded: {} products, {} rate cards, quotations: {}",
        seeded.product_count,
        seeded.rate_card_count,
        seeded.quotation_ids.join(", ")
    )
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use phasequote_db::SeedResult;

    use super::{seed_summary, verification_message};

    #[test]
    fn verification_error_message_targets_failed_checks() {
        assert_eq!(
            verification_message(&["demo-phase-count", "demo-totals-consistent"]),
            "Seed verification failed for checks: demo-phase-count, demo-totals-consistent"
        );
    }

    #[test]
    fn verification_error_message_falls_back_to_generic_when_no_labels() {
        assert_eq!(verification_message(&[]), "Some seed data failed to load");
    }

    #[test]
    fn summary_lists_seeded_quotations() {
        let seeded =
            SeedResult { quotation_ids: vec!["QT-DEMO-0001"], product_count: 6, rate_card_count: 2 };
        assert_eq!(
            seed_summary(&seeded),
            "demo dataset loaded: 6 products, 2 rate cards, quotations: QT-DEMO-0001"
        );
    }
}
