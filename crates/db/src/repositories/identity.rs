use chrono::{DateTime, Utc};
use sqlx::Row;

use idguard_core::domain::identity::{IdentityNumber, IdentityRecord};

use super::{IdentityRepository, RepositoryError};
use crate::DbPool;

pub struct SqlIdentityRepository {
    pool: DbPool,
}

impl SqlIdentityRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_identity(row: &sqlx::sqlite::SqliteRow) -> Result<IdentityRecord, RepositoryError> {
    let identity_number: String =
        row.try_get("identity_number").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let full_name: String =
        row.try_get("full_name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let date_of_birth: String =
        row.try_get("date_of_birth").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let inserted_at_str: String =
        row.try_get("inserted_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let inserted_at = DateTime::parse_from_rfc3339(&inserted_at_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("inserted_at `{inserted_at_str}`: {e}")))?;

    Ok(IdentityRecord {
        identity_number: IdentityNumber(identity_number),
        full_name,
        date_of_birth,
        inserted_at,
    })
}

#[async_trait::async_trait]
impl IdentityRepository for SqlIdentityRepository {
    async fn find_by_number(
        &self,
        identity_number: &IdentityNumber,
    ) -> Result<Option<IdentityRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT identity_number, full_name, date_of_birth, inserted_at
             FROM identity_record WHERE identity_number = ?",
        )
        .bind(&identity_number.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_identity(r)?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, record: IdentityRecord) -> Result<(), RepositoryError> {
        // Plain INSERT, no upsert: the UNIQUE constraint is what arbitrates
        // two runs racing on the same identity number.
        let result = sqlx::query(
            "INSERT INTO identity_record (identity_number, full_name, date_of_birth, inserted_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&record.identity_number.0)
        .bind(&record.full_name)
        .bind(&record.date_of_birth)
        .bind(record.inserted_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(error)) if error.is_unique_violation() => {
                Err(RepositoryError::UniquenessViolation {
                    identity_number: record.identity_number,
                })
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn list_all(&self) -> Result<Vec<IdentityRecord>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT identity_number, full_name, date_of_birth, inserted_at
             FROM identity_record ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_identity).collect::<Result<Vec<_>, _>>()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use idguard_core::domain::identity::{IdentityFields, IdentityNumber, IdentityRecord};

    use super::SqlIdentityRepository;
    use crate::repositories::{IdentityRepository, RepositoryError};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn sample_record(identity_number: &str, full_name: &str) -> IdentityRecord {
        IdentityFields::new(identity_number, full_name, "2001-01-01").into_record(Utc::now())
    }

    #[tokio::test]
    async fn insert_and_find_by_number() {
        let repo = SqlIdentityRepository::new(setup().await);
        let record = sample_record("3273220107000099", "Test User");

        repo.insert(record.clone()).await.expect("insert");
        let found = repo
            .find_by_number(&IdentityNumber("3273220107000099".to_string()))
            .await
            .expect("find")
            .expect("record should exist");

        assert_eq!(found.fields(), record.fields());
    }

    #[tokio::test]
    async fn find_returns_none_for_unknown_number() {
        let repo = SqlIdentityRepository::new(setup().await);

        let found =
            repo.find_by_number(&IdentityNumber("0000".to_string())).await.expect("find");

        assert!(found.is_none());
    }

    #[tokio::test]
    async fn second_insert_surfaces_uniqueness_violation_and_keeps_original() {
        let repo = SqlIdentityRepository::new(setup().await);
        repo.insert(sample_record("3273220107000099", "Test User")).await.expect("insert");

        let error = repo
            .insert(sample_record("3273220107000099", "Someone Else"))
            .await
            .expect_err("duplicate insert must fail");

        assert!(matches!(
            error,
            RepositoryError::UniquenessViolation { ref identity_number }
                if identity_number.as_str() == "3273220107000099"
        ));
        let stored = repo
            .find_by_number(&IdentityNumber("3273220107000099".to_string()))
            .await
            .expect("find")
            .expect("record should exist");
        assert_eq!(stored.full_name, "Test User");
    }

    #[tokio::test]
    async fn concurrent_inserts_admit_exactly_one_record() {
        let repo = Arc::new(SqlIdentityRepository::new(setup().await));

        let handles = (0..4)
            .map(|attempt| {
                let repo = Arc::clone(&repo);
                tokio::spawn(async move {
                    repo.insert(sample_record("3273220107000099", &format!("Racer {attempt}")))
                        .await
                })
            })
            .collect::<Vec<_>>();

        let mut accepted = 0;
        let mut rejected = 0;
        for handle in handles {
            match handle.await.expect("task should not panic") {
                Ok(()) => accepted += 1,
                Err(RepositoryError::UniquenessViolation { .. }) => rejected += 1,
                Err(other) => panic!("unexpected repository error: {other}"),
            }
        }

        assert_eq!(accepted, 1);
        assert_eq!(rejected, 3);
        assert_eq!(repo.list_all().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn list_all_returns_records_in_insertion_order() {
        let repo = SqlIdentityRepository::new(setup().await);
        repo.insert(sample_record("2", "Second Inserted First")).await.expect("insert");
        repo.insert(sample_record("1", "First Inserted Second")).await.expect("insert");

        let records = repo.list_all().await.expect("list");

        let numbers = records.iter().map(|r| r.identity_number.as_str()).collect::<Vec<_>>();
        assert_eq!(numbers, vec!["2", "1"]);
    }
}
