use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityNumber(pub String);

impl IdentityNumber {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdentityNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The three fields read off an identity card. These travel verbatim from the
/// image analysis result through the duplicate check and into fraud alerts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityFields {
    pub identity_number: IdentityNumber,
    pub full_name: String,
    pub date_of_birth: String,
}

impl IdentityFields {
    pub fn new(
        identity_number: impl Into<String>,
        full_name: impl Into<String>,
        date_of_birth: impl Into<String>,
    ) -> Self {
        Self {
            identity_number: IdentityNumber(identity_number.into()),
            full_name: full_name.into(),
            date_of_birth: date_of_birth.into(),
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        let missing = [
            ("identity_number", self.identity_number.0.trim().is_empty()),
            ("full_name", self.full_name.trim().is_empty()),
            ("date_of_birth", self.date_of_birth.trim().is_empty()),
        ]
        .into_iter()
        .filter_map(|(field, empty)| empty.then_some(field))
        .collect::<Vec<_>>();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(DomainError::InvariantViolation(format!(
                "identity fields must not be empty: {}",
                missing.join(", ")
            )))
        }
    }

    pub fn into_record(self, inserted_at: DateTime<Utc>) -> IdentityRecord {
        IdentityRecord {
            identity_number: self.identity_number,
            full_name: self.full_name,
            date_of_birth: self.date_of_birth,
            inserted_at,
        }
    }
}

/// Stored identity. Created once by the duplicate check, never updated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub identity_number: IdentityNumber,
    pub full_name: String,
    pub date_of_birth: String,
    pub inserted_at: DateTime<Utc>,
}

impl IdentityRecord {
    pub fn fields(&self) -> IdentityFields {
        IdentityFields {
            identity_number: self.identity_number.clone(),
            full_name: self.full_name.clone(),
            date_of_birth: self.date_of_birth.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::IdentityFields;
    use crate::errors::DomainError;

    #[test]
    fn validate_lists_every_blank_field() {
        let fields = IdentityFields::new("3273220107000099", " ", "");

        let error = fields.validate().expect_err("blank fields should be rejected");

        assert_eq!(
            error,
            DomainError::InvariantViolation(
                "identity fields must not be empty: full_name, date_of_birth".to_string()
            )
        );
    }

    #[test]
    fn record_keeps_fields_verbatim() {
        let fields = IdentityFields::new("3273220107000099", "Test User", "2001-01-01");
        let record = fields.clone().into_record(Utc::now());

        assert_eq!(record.fields(), fields);
        assert_eq!(record.identity_number.to_string(), "3273220107000099");
    }
}
