use crate::commands::{block_on, load_config, CommandResult, StageError};
use idguard_db::{connect_with_settings, migrations, SeedIdentities};

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let result = block_on("seed", async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        let seeded = seed_and_verify(&pool).await;
        pool.close().await;
        seeded
    });

    match result {
        Ok(Ok(identities)) => CommandResult::success(
            "seed",
            format!("seed identities present: {}", identities.join(", ")),
        ),
        Ok(Err(stage)) => CommandResult::from_stage("seed", stage),
        Err(failure) => failure,
    }
}

async fn seed_and_verify(pool: &idguard_db::DbPool) -> Result<Vec<&'static str>, StageError> {
    migrations::run_pending(pool).await.map_err(|error| ("migration", error.to_string(), 5u8))?;

    let seeded = SeedIdentities::load(pool)
        .await
        .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
    let verification = SeedIdentities::verify(pool)
        .await
        .map_err(|error| ("seed_verification", error.to_string(), 5u8))?;

    if !verification.all_present {
        let missing = missing_checks(&verification.checks);
        return Err(("seed_verification", verification_message(&missing), 5u8));
    }
    Ok(seeded.identities_seeded)
}

fn missing_checks(checks: &[(&'static str, bool)]) -> Vec<&'static str> {
    checks.iter().filter_map(|(check, passed)| (!passed).then_some(*check)).collect()
}

fn verification_message(missing: &[&str]) -> String {
    if missing.is_empty() {
        "some seed identities failed to load".to_string()
    } else {
        format!("seed verification failed for identity numbers: {}", missing.join(", "))
    }
}
