use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};

use idguard_core::domain::identity::IdentityFields;
use idguard_db::{IdentityRepository, RepositoryError};

use super::{
    identity_fields_schema, parse_arguments, Tool, ToolError, ToolOutput, DATABASE_CHECK_TOOL,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Duplicate,
    NewRecordAdded,
    Error,
}

impl CheckStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate",
            Self::NewRecordAdded => "new_record_added",
            Self::Error => "error",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CheckOutcome {
    pub status: CheckStatus,
    pub message: String,
}

impl CheckOutcome {
    fn error(error: impl std::fmt::Display) -> Self {
        Self { status: CheckStatus::Error, message: format!("Database operation failed: {error}") }
    }
}

/// Looks the identity number up and inserts the record when absent.
///
/// The storage uniqueness constraint is the guard against concurrent
/// callers: losing the race surfaces as [`CheckStatus::Error`], never as a
/// second `new_record_added`.
pub async fn check_and_insert(
    repository: &dyn IdentityRepository,
    fields: IdentityFields,
) -> CheckOutcome {
    if let Err(error) = fields.validate() {
        return CheckOutcome::error(error);
    }

    match repository.find_by_number(&fields.identity_number).await {
        Ok(Some(_)) => {
            tracing::warn!(
                event_name = "db.identity.duplicate",
                identity_number = %fields.identity_number,
                "duplicate identity number detected"
            );
            return CheckOutcome {
                status: CheckStatus::Duplicate,
                message: format!(
                    "An identical record with ID number {} already exists.",
                    fields.identity_number
                ),
            };
        }
        Ok(None) => {}
        Err(error) => return CheckOutcome::error(error),
    }

    let full_name = fields.full_name.clone();
    match repository.insert(fields.into_record(Utc::now())).await {
        Ok(()) => {
            tracing::info!(event_name = "db.identity.inserted", "new identity record stored");
            CheckOutcome {
                status: CheckStatus::NewRecordAdded,
                message: format!(
                    "New identity record for {full_name} has been successfully added to the database."
                ),
            }
        }
        Err(error @ RepositoryError::UniquenessViolation { .. }) => {
            tracing::warn!(
                event_name = "db.identity.insert_race",
                error = %error,
                "concurrent insert lost the uniqueness race"
            );
            CheckOutcome::error(error)
        }
        Err(error) => CheckOutcome::error(error),
    }
}

pub struct DatabaseCheckTool {
    repository: Arc<dyn IdentityRepository>,
}

impl DatabaseCheckTool {
    pub fn new(repository: Arc<dyn IdentityRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl Tool for DatabaseCheckTool {
    fn name(&self) -> &'static str {
        DATABASE_CHECK_TOOL
    }

    fn description(&self) -> &'static str {
        "Checks if an identity number already exists in the database. If it does not exist, \
         the new record is inserted. Returns status 'duplicate', 'new_record_added' or 'error'."
    }

    fn input_schema(&self) -> Value {
        identity_fields_schema()
    }

    async fn execute(&self, arguments: Map<String, Value>) -> Result<ToolOutput, ToolError> {
        let fields: IdentityFields = parse_arguments(DATABASE_CHECK_TOOL, arguments)?;
        let outcome = check_and_insert(self.repository.as_ref(), fields).await;
        let value = serde_json::to_value(&outcome).map_err(|error| ToolError::Execution {
            tool: DATABASE_CHECK_TOOL.to_owned(),
            reason: error.to_string(),
        })?;
        Ok(ToolOutput::value(value))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use idguard_core::domain::identity::{IdentityFields, IdentityNumber, IdentityRecord};
    use idguard_db::{IdentityRepository, InMemoryIdentityRepository, RepositoryError};

    use super::{check_and_insert, CheckStatus};

    /// Sees no existing record, then loses the insert to a concurrent writer.
    struct LostRace;

    #[async_trait]
    impl IdentityRepository for LostRace {
        async fn find_by_number(
            &self,
            _identity_number: &IdentityNumber,
        ) -> Result<Option<IdentityRecord>, RepositoryError> {
            Ok(None)
        }

        async fn insert(&self, record: IdentityRecord) -> Result<(), RepositoryError> {
            Err(RepositoryError::UniquenessViolation { identity_number: record.identity_number })
        }

        async fn list_all(&self) -> Result<Vec<IdentityRecord>, RepositoryError> {
            Ok(Vec::new())
        }
    }

    fn fields() -> IdentityFields {
        IdentityFields::new("3273220107000099", "Test User", "2001-01-01")
    }

    #[tokio::test]
    async fn first_call_inserts_and_repeat_reports_duplicate() {
        let repository = InMemoryIdentityRepository::default();

        let first = check_and_insert(&repository, fields()).await;
        assert_eq!(first.status, CheckStatus::NewRecordAdded);
        assert_eq!(
            first.message,
            "New identity record for Test User has been successfully added to the database."
        );
        let stored = repository
            .find_by_number(&IdentityNumber("3273220107000099".to_owned()))
            .await
            .expect("find")
            .expect("record");

        let second = check_and_insert(
            &repository,
            IdentityFields::new("3273220107000099", "Someone Else", "1999-09-09"),
        )
        .await;
        assert_eq!(second.status, CheckStatus::Duplicate);
        assert_eq!(
            second.message,
            "An identical record with ID number 3273220107000099 already exists."
        );

        let after = repository
            .find_by_number(&IdentityNumber("3273220107000099".to_owned()))
            .await
            .expect("find")
            .expect("record");
        assert_eq!(after, stored);
        assert_eq!(repository.list_all().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn blank_fields_are_an_error_and_store_nothing() {
        let repository = InMemoryIdentityRepository::default();

        let outcome = check_and_insert(&repository, IdentityFields::new("", "x", "y")).await;

        assert_eq!(outcome.status, CheckStatus::Error);
        assert!(outcome.message.starts_with("Database operation failed:"));
        assert!(repository.list_all().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn concurrent_checks_admit_exactly_one_insert() {
        let repository = Arc::new(InMemoryIdentityRepository::default());

        let handles = (0..8)
            .map(|_| {
                let repository = Arc::clone(&repository);
                tokio::spawn(async move { check_and_insert(repository.as_ref(), fields()).await })
            })
            .collect::<Vec<_>>();

        let mut added = 0;
        for handle in handles {
            let outcome = handle.await.expect("join");
            match outcome.status {
                CheckStatus::NewRecordAdded => added += 1,
                CheckStatus::Duplicate | CheckStatus::Error => {}
            }
        }

        assert_eq!(added, 1);
        assert_eq!(repository.list_all().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn uniqueness_violation_on_insert_is_an_error_not_a_duplicate() {
        let outcome = check_and_insert(&LostRace, fields()).await;

        assert_eq!(outcome.status, CheckStatus::Error);
        assert!(outcome.message.starts_with("Database operation failed:"), "{}", outcome.message);
        assert!(outcome.message.contains("3273220107000099"));
    }
}
