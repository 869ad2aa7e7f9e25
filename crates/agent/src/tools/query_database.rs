use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use idguard_core::domain::identity::IdentityRecord;
use idguard_db::IdentityRepository;

use super::{Tool, ToolError, ToolOutput, QUERY_DATABASE_TOOL};

pub const EMPTY_DATABASE_MESSAGE: &str = "The database is currently empty. No records found.";

pub struct QueryDatabaseTool {
    repository: Arc<dyn IdentityRepository>,
}

impl QueryDatabaseTool {
    pub fn new(repository: Arc<dyn IdentityRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl Tool for QueryDatabaseTool {
    fn name(&self) -> &'static str {
        QUERY_DATABASE_TOOL
    }

    fn description(&self) -> &'static str {
        "Lists every identity record stored in the database. Use this whenever the user asks \
         to see, list, show, or query the stored data."
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _arguments: Map<String, Value>) -> Result<ToolOutput, ToolError> {
        let text = match self.repository.list_all().await {
            Ok(records) if records.is_empty() => EMPTY_DATABASE_MESSAGE.to_owned(),
            Ok(records) => render_table(&records),
            Err(error) => format!("An error occurred while querying the database: {error}"),
        };
        Ok(ToolOutput::value(Value::String(text)))
    }
}

const HEADERS: [&str; 4] = ["Identity Number", "Full Name", "Date of Birth", "Inserted At"];

/// Fixed-width text table, one row per record in insertion order.
pub fn render_table(records: &[IdentityRecord]) -> String {
    let rows = records
        .iter()
        .map(|record| {
            [
                record.identity_number.to_string(),
                record.full_name.clone(),
                record.date_of_birth.clone(),
                record.inserted_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            ]
        })
        .collect::<Vec<_>>();

    let mut widths = HEADERS.map(|header| header.chars().count());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |cells: [&str; 4]| {
        cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join(" | ")
    };

    let header = line(HEADERS);
    let separator = "-".repeat(header.chars().count());
    let mut table = vec!["Identity Records in Database".to_owned(), separator.clone(), header, separator];
    for row in &rows {
        table.push(line([&row[0], &row[1], &row[2], &row[3]]).trim_end().to_owned());
    }
    table.join("\n")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use serde_json::Map;

    use idguard_core::domain::identity::IdentityFields;
    use idguard_db::InMemoryIdentityRepository;

    use super::{QueryDatabaseTool, EMPTY_DATABASE_MESSAGE};
    use crate::tools::Tool;

    #[tokio::test]
    async fn empty_storage_has_a_fixed_message() {
        let tool = QueryDatabaseTool::new(Arc::new(InMemoryIdentityRepository::default()));
        let output = tool.execute(Map::new()).await.expect("output");
        assert_eq!(output.render(), EMPTY_DATABASE_MESSAGE);
    }

    #[tokio::test]
    async fn records_are_listed_in_aligned_columns() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).single().expect("timestamp");
        let repository = InMemoryIdentityRepository::with_records(vec![
            IdentityFields::new("3273220107000001", "Johnny Paylater", "2000-01-07").into_record(at),
            IdentityFields::new("3273220107000000", "Jane Smith", "1995-03-15").into_record(at),
        ])
        .await
        .expect("seed");
        let tool = QueryDatabaseTool::new(Arc::new(repository));

        let text = tool.execute(Map::new()).await.expect("output").render();
        let lines = text.lines().collect::<Vec<_>>();

        assert_eq!(lines[0], "Identity Records in Database");
        assert!(lines[2].starts_with("Identity Number  | Full Name       | Date of Birth"));
        assert!(lines[4].starts_with("3273220107000001 | Johnny Paylater | 2000-01-07"));
        assert!(lines[5].starts_with("3273220107000000 | Jane Smith      | 1995-03-15"));
        assert!(lines[5].ends_with("2026-03-01 08:00:00"));
        assert_eq!(lines.len(), 6);
    }
}
