use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// Identity numbers loaded by the seed fixture, with the holder's name.
const SEED_IDENTITIES: &[SeedIdentity] = &[
    SeedIdentity { identity_number: "3273220107000001", full_name: "Johnny Paylater" },
    SeedIdentity { identity_number: "3273220107000000", full_name: "Jane Smith" },
    SeedIdentity { identity_number: "3273220107000003", full_name: "Bob Wilson" },
];

struct SeedIdentity {
    identity_number: &'static str,
    full_name: &'static str,
}

/// Deterministic starter identities so a fresh deployment can demonstrate
/// the duplicate path without a first upload.
pub struct SeedIdentities;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedResult {
    pub identities_seeded: Vec<&'static str>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

impl SeedIdentities {
    pub const SQL: &str = include_str!("../../../config/fixtures/seed_identities.sql");

    /// Loads the seed rows. Existing identity numbers are left untouched, so
    /// repeated loads are no-ops.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        Ok(SeedResult {
            identities_seeded: SEED_IDENTITIES.iter().map(|seed| seed.identity_number).collect(),
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::with_capacity(SEED_IDENTITIES.len());

        for seed in SEED_IDENTITIES {
            let present: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM identity_record WHERE identity_number = ?1 AND full_name = ?2)",
            )
            .bind(seed.identity_number)
            .bind(seed.full_name)
            .fetch_one(pool)
            .await?;
            checks.push((seed.identity_number, present == 1));
        }

        let all_present = checks.iter().all(|(_, passed)| *passed);
        Ok(VerificationResult { all_present, checks })
    }
}

#[cfg(test)]
mod tests {
    use super::SeedIdentities;
    use crate::repositories::{IdentityRepository, SqlIdentityRepository};
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn seed_load_is_idempotent_and_verifiable() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let first = SeedIdentities::load(&pool).await.expect("first load");
        let second = SeedIdentities::load(&pool).await.expect("second load");
        assert_eq!(first, second);

        let verification = SeedIdentities::verify(&pool).await.expect("verify");
        assert!(verification.all_present, "checks: {:?}", verification.checks);

        let records = SqlIdentityRepository::new(pool).list_all().await.expect("list");
        assert_eq!(records.len(), 3);
    }

    #[tokio::test]
    async fn verify_reports_missing_seed_rows() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let verification = SeedIdentities::verify(&pool).await.expect("verify");

        assert!(!verification.all_present);
        assert!(verification.checks.iter().all(|(_, passed)| !passed));
    }
}
