use service_core::error::AppError;
use std::sync::Arc;
use tracing::warn;

use crate::models::{AuditEntry, AuditFilter, NewAuditEntry};
use crate::services::repository::BookingRepository;

/// Best-effort audit trail. Recording never fails the calling operation.
#[derive(Clone)]
pub struct AuditService {
    repo: Arc<dyn BookingRepository>,
}

impl AuditService {
    pub fn new(repo: Arc<dyn BookingRepository>) -> Self {
        Self { repo }
    }

    pub async fn record(&self, entry: NewAuditEntry) {
        let action = entry.action.clone();
        let table = entry.table_name.clone();
        if let Err(e) = self.repo.insert_audit(entry).await {
            warn!(action = %action, table = %table, error = %e, "Failed to record audit entry");
        }
    }

    pub async fn logs(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, AppError> {
        self.repo.list_audit(filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AuditAction;
    use crate::services::memory::InMemoryRepository;

    #[tokio::test]
    async fn recorded_entries_are_listed_newest_first_with_defaults() {
        let service = AuditService::new(Arc::new(InMemoryRepository::new()));
        service
            .record(NewAuditEntry::new(AuditAction::Create, "booking").record(1))
            .await;
        service
            .record(
                NewAuditEntry::new(AuditAction::Delete, "reserva")
                    .actor("u-1", Some("Ana"), Some("SUPER_USER"))
                    .record(2),
            )
            .await;

        let all = service.logs(&AuditFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].action, "DELETE");
        assert_eq!(all[1].user_name, "Sistema");
        assert_eq!(all[1].user_role, "SYSTEM");

        let only_deletes = service
            .logs(&AuditFilter {
                action: Some("DELETE".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(only_deletes.len(), 1);
        assert_eq!(only_deletes[0].user_id, "u-1");
    }
}
