use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

/// Whether the identity table exists, without applying anything.
pub async fn schema_ready(pool: &DbPool) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'identity_record'",
    )
    .fetch_one(pool)
    .await?;
    Ok(count == 1)
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::{run_pending, schema_ready};
    use crate::connect_with_settings;

    const MANAGED_SCHEMA_OBJECTS: &[&str] =
        &["identity_record", "idx_identity_record_inserted_at"];

    #[tokio::test]
    async fn migrations_create_identity_schema() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrations");

        let rows = sqlx::query("SELECT name FROM sqlite_master WHERE name NOT LIKE 'sqlite_%'")
            .fetch_all(&pool)
            .await
            .expect("schema listing");
        let names = rows
            .iter()
            .map(|row| row.try_get::<String, _>("name").expect("name column"))
            .collect::<Vec<_>>();

        for object in MANAGED_SCHEMA_OBJECTS {
            assert!(names.iter().any(|name| name == object), "missing schema object {object}");
        }
    }

    #[tokio::test]
    async fn schema_ready_reflects_applied_migrations() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        assert!(!schema_ready(&pool).await.expect("lookup before"));

        run_pending(&pool).await.expect("migrations");
        assert!(schema_ready(&pool).await.expect("lookup after"));
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("first run");
        run_pending(&pool).await.expect("second run is a no-op");
    }

    #[tokio::test]
    async fn identity_number_uniqueness_is_enforced_by_schema() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrations");

        let insert = "INSERT INTO identity_record (identity_number, full_name, date_of_birth, inserted_at)
                      VALUES ('3273220107000099', 'Test User', '2001-01-01', '2026-01-01T00:00:00Z')";
        sqlx::query(insert).execute(&pool).await.expect("first insert");
        let second = sqlx::query(insert).execute(&pool).await;

        let is_unique_violation = match second {
            Err(sqlx::Error::Database(error)) => error.is_unique_violation(),
            _ => false,
        };
        assert!(is_unique_violation, "second insert must hit the unique constraint");
    }
}
