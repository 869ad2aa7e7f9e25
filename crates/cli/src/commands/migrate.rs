use crate::commands::{block_on, load_config, CommandResult, StageError};
use idguard_db::{connect_with_settings, migrations};

pub fn run() -> CommandResult {
    let config = match load_config("migrate") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let result = block_on("migrate", async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        let applied = migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8));
        pool.close().await;
        applied?;
        Ok::<(), StageError>(())
    });

    match result {
        Ok(Ok(())) => CommandResult::success("migrate", "applied pending migrations"),
        Ok(Err(stage)) => CommandResult::from_stage("migrate", stage),
        Err(failure) => failure,
    }
}
