use std::sync::Arc;
use std::time::Duration;

use idguard_agent::notify::notifier_from_config;
use idguard_agent::vision::ModelIdCardAnalyzer;
use idguard_agent::workflows::WorkflowError;
use idguard_agent::{
    chat_workflow, clients_from_config, fraud_workflow, AgentRuntime, GuardrailPolicy, ModelError,
    RuntimeLimits, ToolDependencies,
};
#[cfg(test)]
use idguard_core::config::LoadOptions;
use idguard_core::config::{AppConfig, ConfigError};
use idguard_db::{connect_with_settings, migrations, DbPool, SqlIdentityRepository};
use thiserror::Error;
use tracing::info;

use crate::routes::AppState;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub state: AppState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("model client initialisation failed: {0}")]
    Model(#[from] ModelError),
    #[error("workflow construction failed: {0}")]
    Workflow(#[from] WorkflowError),
}

#[cfg(test)]
pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        provider = ?config.llm.provider,
        model = %config.llm.model,
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let clients = clients_from_config(&config.llm)?;
    let dependencies = ToolDependencies {
        identities: Arc::new(SqlIdentityRepository::new(db_pool.clone())),
        analyzer: Arc::new(ModelIdCardAnalyzer::new(clients.vision)),
        notifier: notifier_from_config(
            &config.notification,
            Duration::from_secs(config.agent.tool_timeout_secs),
        ),
    };
    let guardrails = if config.agent.enforce_duplicate_notification {
        GuardrailPolicy::duplicate_notification()
    } else {
        GuardrailPolicy::prompt_only()
    };

    let state = AppState {
        runtime: AgentRuntime::new(clients.decision, RuntimeLimits::from(&config.agent)),
        fraud: Arc::new(fraud_workflow(&dependencies, guardrails)?),
        chat: Arc::new(chat_workflow(&dependencies)?),
        upload_dir: config.server.upload_dir.clone(),
    };
    info!(
        event_name = "system.bootstrap.workflows_ready",
        correlation_id = "bootstrap",
        enforce_duplicate_notification = config.agent.enforce_duplicate_notification,
        notification_enabled = config.notification.enabled,
        "pipelines constructed"
    );

    Ok(Application { config, db_pool, state })
}

#[cfg(test)]
mod tests {
    use idguard_core::config::{ConfigOverrides, LlmProvider, LoadOptions};

    use crate::bootstrap::bootstrap;

    fn overrides(database_url: &str, api_key: Option<&str>) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                llm_provider: Some(LlmProvider::Gemini),
                llm_api_key: api_key.map(str::to_string),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_model_credentials() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                llm_provider: Some(LlmProvider::OpenAi),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("error").to_string();
        assert!(message.contains("llm.api_key"));
    }

    #[tokio::test]
    async fn bootstrap_applies_schema_and_builds_both_pipelines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("idguard.db").display());
        let app = bootstrap(overrides(&url, Some("test-key")))
            .await
            .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'identity_record'",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("schema query");
        assert_eq!(table_count, 1);

        assert_eq!(app.state.fraud.tools.names().len(), 3);
        assert_eq!(app.state.chat.tools.names(), vec!["query_database_tool"]);
        assert!(app.state.fraud.guardrails.enforce_duplicate_notification);

        app.db_pool.close().await;
    }
}
