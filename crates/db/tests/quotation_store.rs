use chrono::NaiveDate;
use rust_decimal::Decimal;
use tempfile::TempDir;

use phasequote_core::cpq::editor::{EditorSettings, QuotationEditor};
use phasequote_core::cpq::mutation::{GroupPatch, ItemPatch, PhasePatch};
use phasequote_core::cpq::refresh::ItemRefreshStatus;
use phasequote_core::domain::product::ProductRef;
use phasequote_core::domain::quotation::{
    PhaseId, PriceWarning, Quotation, QuotationId, QuotationStatus,
};
use phasequote_core::domain::rate_card::RateCardId;
use phasequote_core::errors::DomainError;
use phasequote_db::repositories::{QuotationRepository, SqlQuotationRepository, SqlRateCardRepository};
use phasequote_db::{connect_with_settings, migrations, DbPool, DemoSeedDataset};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

async fn seeded_file_pool(dir: &TempDir) -> DbPool {
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("phasequote.db").display());
    let pool = connect_with_settings(&url, 4, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrations");
    DemoSeedDataset::load(&pool).await.expect("seed");
    pool
}

#[tokio::test]
async fn demo_quotation_loads_with_recomputed_totals() {
    let dir = TempDir::new().expect("tempdir");
    let pool = seeded_file_pool(&dir).await;
    let repo = SqlQuotationRepository::new(pool);

    let quotation = repo
        .find_by_id(&QuotationId("QT-DEMO-0001".to_string()))
        .await
        .expect("find")
        .expect("demo quotation exists");

    let totals = quotation.totals();
    assert_eq!(totals.one_time, Decimal::from(4820));
    assert_eq!(totals.recurring_monthly, Decimal::from(594));
    assert_eq!(totals.recurring_tenure, Decimal::from(13176));
    assert_eq!(totals.grand_total, totals.one_time + totals.recurring_tenure);

    let run = quotation.phase(&PhaseId("phase-demo-run".to_string())).expect("run phase");
    assert_eq!(run.escalation_pct, Decimal::from(3), "escalation is stored but not applied");
    assert_eq!(run.totals().recurring_tenure, Decimal::from(12096));
}

#[tokio::test]
async fn edit_price_save_and_reload_through_sqlite() {
    let dir = TempDir::new().expect("tempdir");
    let pool = seeded_file_pool(&dir).await;
    let prices = SqlRateCardRepository::new(pool.clone());
    let repo = SqlQuotationRepository::new(pool);

    let mut editor = QuotationEditor::new(
        Quotation::new(QuotationId("QT-INT-1".to_string()), "Globex", "USD"),
        EditorSettings::default(),
    );
    let phase_id = editor.add_phase_on(date(2026, 10, 19)).expect("phase");
    let group_id = editor.add_group(&phase_id).expect("group");
    editor.update_group(&phase_id, &group_id, GroupPatch { quantity: Some(2), ..GroupPatch::default() });

    let router = editor
        .add_item_to_group(&prices, &phase_id, &group_id, ProductRef::new("router", "Managed Router"))
        .await
        .expect("router added");
    assert_eq!(router.status, ItemRefreshStatus::Updated);

    let firewall = editor
        .add_item_to_group(&prices, &phase_id, &group_id, ProductRef::new("firewall", "Edge Firewall"))
        .await
        .expect("firewall added");
    assert_eq!(firewall.status, ItemRefreshStatus::NoPrice);

    editor.update_item(
        &phase_id,
        &group_id,
        &router.item_id,
        ItemPatch { otp_discount_pct: Some(Decimal::from(150)), ..ItemPatch::default() },
    );
    // 100% discount after clamping; recurring 45 x 2 over 12 months
    assert_eq!(editor.quotation().totals().one_time, Decimal::ZERO);
    assert_eq!(editor.quotation().totals().recurring_tenure, Decimal::from(1080));

    repo.save(editor.quotation()).await.expect("save draft");
    let reloaded = repo
        .find_by_id(&QuotationId("QT-INT-1".to_string()))
        .await
        .expect("find")
        .expect("saved quotation exists");
    assert_eq!(reloaded.to_document().phases, editor.quotation().to_document().phases);

    let warned = reloaded.item(&firewall.item_id).expect("firewall item");
    assert!(matches!(warned.warning(), Some(PriceWarning::NoPriceFound { .. })));

    let mut editor = QuotationEditor::new(reloaded, EditorSettings::default());
    let report = editor.change_rate_card(&prices, Some(RateCardId("enterprise".to_string()))).await;
    assert_eq!(report.updated(), 1);
    assert_eq!(report.not_found(), 1);
    // 40 x 2 monthly over 12 months
    assert_eq!(editor.quotation().totals().recurring_tenure, Decimal::from(960));

    editor.submit(date(2026, 10, 19)).expect("future phase with tenure passes the gate");
    let saved = repo.save(editor.quotation()).await.expect("save submitted");
    assert_eq!(saved.status, QuotationStatus::Unapproved);
}

#[tokio::test]
async fn blocked_submission_keeps_stored_status_draft() {
    let dir = TempDir::new().expect("tempdir");
    let pool = seeded_file_pool(&dir).await;
    let repo = SqlQuotationRepository::new(pool);

    let demo = repo
        .find_by_id(&QuotationId("QT-DEMO-0001".to_string()))
        .await
        .expect("find")
        .expect("demo quotation exists");
    let mut editor = QuotationEditor::new(demo, EditorSettings::default());
    editor.update_phase(
        &PhaseId("phase-demo-build".to_string()),
        PhasePatch { tenure_months: Some(0), ..PhasePatch::default() },
    );

    let error = editor.submit(date(2026, 10, 19)).expect_err("tenure 0 is blocked");
    assert!(matches!(error, DomainError::SubmissionBlocked(ref violations) if violations.len() == 1));

    let saved = repo.save(editor.quotation()).await.expect("draft save skips the gate");
    assert_eq!(saved.status, QuotationStatus::Draft);
}
