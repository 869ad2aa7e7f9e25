use async_trait::async_trait;
use thiserror::Error;

use idguard_core::domain::identity::{IdentityNumber, IdentityRecord};

pub mod identity;
pub mod memory;

pub use identity::SqlIdentityRepository;
pub use memory::InMemoryIdentityRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("identity number {identity_number} already exists")]
    UniquenessViolation { identity_number: IdentityNumber },
}

/// Storage for identity records. Records are append-only: `insert` must
/// reject an identity number that already exists with
/// [`RepositoryError::UniquenessViolation`], and that check must hold under
/// concurrent inserts.
#[async_trait]
pub trait IdentityRepository: Send + Sync {
    async fn find_by_number(
        &self,
        identity_number: &IdentityNumber,
    ) -> Result<Option<IdentityRecord>, RepositoryError>;

    async fn insert(&self, record: IdentityRecord) -> Result<(), RepositoryError>;

    async fn list_all(&self) -> Result<Vec<IdentityRecord>, RepositoryError>;
}
