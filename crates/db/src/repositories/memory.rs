use std::collections::HashMap;

use tokio::sync::RwLock;

use phasequote_core::domain::quotation::{Quotation, QuotationId};

use super::{QuotationRepository, RepositoryError, SavedQuotation};

#[derive(Default)]
pub struct InMemoryQuotationRepository {
    quotations: RwLock<HashMap<String, Quotation>>,
}

#[async_trait::async_trait]
impl QuotationRepository for InMemoryQuotationRepository {
    async fn find_by_id(&self, id: &QuotationId) -> Result<Option<Quotation>, RepositoryError> {
        let quotations = self.quotations.read().await;
        Ok(quotations.get(&id.0).cloned())
    }

    async fn save(&self, quotation: &Quotation) -> Result<SavedQuotation, RepositoryError> {
        let mut quotations = self.quotations.write().await;
        quotations.insert(quotation.id.0.clone(), quotation.clone());
        Ok(SavedQuotation { id: quotation.id.clone(), status: quotation.status() })
    }
}

#[cfg(test)]
mod tests {
    use phasequote_core::cpq::editor::{EditorSettings, QuotationEditor};
    use phasequote_core::domain::quotation::{Quotation, QuotationId, QuotationStatus};

    use crate::repositories::{InMemoryQuotationRepository, QuotationRepository};

    #[tokio::test]
    async fn in_memory_quotation_repo_round_trip() {
        let repo = InMemoryQuotationRepository::default();
        let mut editor = QuotationEditor::new(
            Quotation::new(QuotationId("QT-1".to_string()), "ACME", "USD"),
            EditorSettings::default(),
        );
        let phase_id = editor.add_phase().expect("phase");
        editor.add_group(&phase_id).expect("group");
        let quotation = editor.into_quotation();

        let saved = repo.save(&quotation).await.expect("save quotation");
        assert_eq!(saved.status, QuotationStatus::Draft);

        let found = repo.find_by_id(&quotation.id).await.expect("find quotation");
        assert_eq!(found, Some(quotation));
    }

    #[tokio::test]
    async fn unknown_id_is_none() {
        let repo = InMemoryQuotationRepository::default();
        let found = repo.find_by_id(&QuotationId("QT-404".to_string())).await.expect("find");
        assert!(found.is_none());
    }
}
