use std::collections::BTreeMap;

use tokio::sync::RwLock;

use idguard_core::domain::identity::{IdentityNumber, IdentityRecord};

use super::{IdentityRepository, RepositoryError};

/// Process-local identity store. `insert` holds the write lock across the
/// existence check so it enforces the same uniqueness contract as the SQL
/// table constraint.
#[derive(Default)]
pub struct InMemoryIdentityRepository {
    records: RwLock<BTreeMap<IdentityNumber, (u64, IdentityRecord)>>,
}

impl InMemoryIdentityRepository {
    pub async fn with_records(records: Vec<IdentityRecord>) -> Result<Self, RepositoryError> {
        let repo = Self::default();
        for record in records {
            repo.insert(record).await?;
        }
        Ok(repo)
    }
}

#[async_trait::async_trait]
impl IdentityRepository for InMemoryIdentityRepository {
    async fn find_by_number(
        &self,
        identity_number: &IdentityNumber,
    ) -> Result<Option<IdentityRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.get(identity_number).map(|(_, record)| record.clone()))
    }

    async fn insert(&self, record: IdentityRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.identity_number) {
            return Err(RepositoryError::UniquenessViolation {
                identity_number: record.identity_number,
            });
        }
        let sequence = records.len() as u64;
        records.insert(record.identity_number.clone(), (sequence, record));
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<IdentityRecord>, RepositoryError> {
        let records = self.records.read().await;
        let mut ordered = records.values().cloned().collect::<Vec<_>>();
        ordered.sort_by_key(|(sequence, _)| *sequence);
        Ok(ordered.into_iter().map(|(_, record)| record).collect())
    }
}
