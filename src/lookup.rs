//! Student record lookup in BigQuery.
//!
//! Rows are keyed by the base64 encoding of the student id, not the id
//! itself. That encoding is a configuration hazard: the table's key column
//! must have been written with the same transform (standard alphabet,
//! padded). Nothing here tries to detect or repair a mismatch; a table
//! keyed differently simply reports every student as not found.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{AppConfig, keys};
use crate::error::{CollaboratorError, ConfigError, Result};

const BIGQUERY_BASE_URL: &str = "https://bigquery.googleapis.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const ID_COLUMN: &str = "student_id";

static TABLE_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_\-]+\.[A-Za-z0-9_]+\.[A-Za-z0-9_\-]+$")
        .expect("table id pattern is valid")
});

/// Key under which a student's row is stored.
pub fn encode_student_id(student_id: &str) -> String {
    BASE64_STANDARD.encode(student_id.as_bytes())
}

/// What the lookup knows about one student.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StudentRecord {
    /// First and second major, in that order, blanks removed.
    pub majors: Vec<String>,
    pub course_history: Vec<String>,
}

/// Finds a student record by encoded id.
#[async_trait]
pub trait StudentLookup: Send + Sync {
    /// `Ok(None)` when no row matches.
    async fn find(&self, encoded_id: &str) -> Result<Option<StudentRecord>>;
}

/// `jobs.query` client against the configured student table.
pub struct BigQueryStudentLookup {
    client: reqwest::Client,
    base_url: String,
    table: Option<String>,
    project: Option<String>,
    access_token: Option<SecretString>,
}

impl BigQueryStudentLookup {
    pub fn new(config: &AppConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: BIGQUERY_BASE_URL.to_string(),
            table: config.student_table.clone(),
            project: config.google.project.clone(),
            access_token: config.google.access_token.clone(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn table(&self) -> Result<&str> {
        let table = self
            .table
            .as_deref()
            .ok_or_else(|| ConfigError::MissingRequired {
                key: keys::STUDENT_TABLE.to_string(),
                hint: "Student verification is not configured.".into(),
            })?;
        if !TABLE_ID.is_match(table) {
            return Err(ConfigError::InvalidValue {
                key: keys::STUDENT_TABLE.to_string(),
                message: format!("expected project.dataset.table, got {table:?}"),
            }
            .into());
        }
        Ok(table)
    }

    /// The billing project: explicit config, else the table's own project.
    fn project<'a>(&'a self, table: &'a str) -> &'a str {
        self.project
            .as_deref()
            .unwrap_or_else(|| table.split('.').next().unwrap_or(table))
    }
}

#[async_trait]
impl StudentLookup for BigQueryStudentLookup {
    async fn find(&self, encoded_id: &str) -> Result<Option<StudentRecord>> {
        let table = self.table()?;
        let token = self
            .access_token
            .as_ref()
            .ok_or_else(|| ConfigError::MissingRequired {
                key: keys::ACCESS_TOKEN.to_string(),
                hint: "BigQuery needs an OAuth access token.".into(),
            })?;

        let url = format!(
            "{}/bigquery/v2/projects/{}/queries",
            self.base_url,
            self.project(table)
        );
        let body = serde_json::json!({
            "query": format!(
                "SELECT first_major, second_major, course_history FROM `{table}` WHERE {ID_COLUMN} = @student_id LIMIT 1"
            ),
            "useLegacySql": false,
            "parameterMode": "NAMED",
            "queryParameters": [{
                "name": "student_id",
                "parameterType": { "type": "STRING" },
                "parameterValue": { "value": encoded_id },
            }],
        });

        debug!(table, "Querying student record");
        let response = self
            .client
            .post(&url)
            .bearer_auth(token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| CollaboratorError::LookupUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(status = %status, "BigQuery query failed");
            return Err(CollaboratorError::LookupUnavailable(format!(
                "HTTP {status}: {}",
                text.trim()
            ))
            .into());
        }

        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| CollaboratorError::LookupUnavailable(format!("bad response: {e}")))?;

        if !parsed.job_complete {
            return Err(
                CollaboratorError::LookupUnavailable("query did not complete in time".into())
                    .into(),
            );
        }
        Ok(parsed.first_record())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    schema: Option<Schema>,
    #[serde(default)]
    rows: Vec<Row>,
}

#[derive(Debug, Deserialize)]
struct Schema {
    #[serde(default)]
    fields: Vec<Field>,
}

#[derive(Debug, Deserialize)]
struct Field {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Row {
    #[serde(default)]
    f: Vec<Cell>,
}

#[derive(Debug, Deserialize)]
struct Cell {
    #[serde(default)]
    v: Value,
}

impl QueryResponse {
    fn first_record(&self) -> Option<StudentRecord> {
        let row = self.rows.first()?;
        let fields = self.schema.as_ref().map(|s| s.fields.as_slice()).unwrap_or(&[]);
        let column = |name: &str| {
            fields
                .iter()
                .position(|f| f.name.eq_ignore_ascii_case(name))
                .and_then(|i| row.f.get(i))
                .map(|c| &c.v)
        };

        let mut majors: Vec<String> = Vec::new();
        for name in ["first_major", "second_major"] {
            if let Some(Value::String(m)) = column(name) {
                let m = m.trim();
                if !m.is_empty()
                    && !m.eq_ignore_ascii_case("none")
                    && !m.eq_ignore_ascii_case("null")
                    && !majors.iter().any(|x| x == m)
                {
                    majors.push(m.to_string());
                }
            }
        }

        let course_history = match column("course_history") {
            Some(Value::String(s)) => split_courses(s),
            // REPEATED fields arrive as [{"v": "CS010A"}, ...]
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.get("v").and_then(Value::as_str))
                .flat_map(split_courses)
                .collect(),
            _ => Vec::new(),
        };

        Some(StudentRecord {
            majors,
            course_history,
        })
    }
}

fn split_courses(raw: &str) -> Vec<String> {
    raw.split([',', ';', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
