//! Configuration types.
//!
//! Everything is read from environment variables. `from_lookup` takes any
//! key → value function so tests never have to touch the process env.

use std::time::Duration;

use secrecy::SecretString;
use serde::Serialize;

use crate::error::ConfigError;

/// Application name used as the agent-runner namespace.
pub const APP_NAME: &str = "schedule_recommender_ui";

/// Default Gemini model.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Default Vertex AI location.
pub const DEFAULT_LOCATION: &str = "us-central1";

/// Environment keys reported by [`env_status`].
pub mod keys {
    pub const GOOGLE_API_KEY: &str = "GOOGLE_API_KEY";
    pub const USE_VERTEXAI: &str = "GOOGLE_GENAI_USE_VERTEXAI";
    pub const CLOUD_PROJECT: &str = "GOOGLE_CLOUD_PROJECT";
    pub const CLOUD_LOCATION: &str = "GOOGLE_CLOUD_LOCATION";
    pub const ACCESS_TOKEN: &str = "GOOGLE_CLOUD_ACCESS_TOKEN";
    pub const CS_CORPUS: &str = "CS_CORPUS";
    pub const ME_CORPUS: &str = "ME_CORPUS";
    pub const STUDENT_TABLE: &str = "BIGQUERY_STUDENT_INFO_TABLE";
    pub const MODEL: &str = "SCHEDULE_RECOMMENDER_MODEL";
    pub const PORT: &str = "SCHEDULE_RECOMMENDER_PORT";
    pub const SESSION_IDLE_MIN: &str = "SCHEDULE_RECOMMENDER_SESSION_IDLE_MIN";
    pub const TOP_K: &str = "SCHEDULE_RECOMMENDER_TOP_K";
}

/// Keys whose values must never be previewed.
const SECRET_KEYS: &[&str] = &[keys::GOOGLE_API_KEY, keys::ACCESS_TOKEN];

/// Keys shown on the environment status panel, in display order.
const STATUS_KEYS: &[&str] = &[
    keys::GOOGLE_API_KEY,
    keys::USE_VERTEXAI,
    keys::CLOUD_PROJECT,
    keys::CLOUD_LOCATION,
    keys::ACCESS_TOKEN,
    keys::CS_CORPUS,
    keys::ME_CORPUS,
    keys::STUDENT_TABLE,
];

/// Which inference backend to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    /// Gemini API with an API key.
    GeminiApi,
    /// Vertex AI with project, location and a bearer token.
    VertexAi,
}

impl std::fmt::Display for LlmBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GeminiApi => write!(f, "gemini-api"),
            Self::VertexAi => write!(f, "vertex-ai"),
        }
    }
}

/// Google Cloud settings shared by Vertex AI, RAG retrieval and BigQuery.
#[derive(Debug, Clone)]
pub struct GoogleCloudConfig {
    pub project: Option<String>,
    pub location: String,
    pub access_token: Option<SecretString>,
}

/// Inference settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: Option<SecretString>,
    pub model: String,
}

/// Corpus resource names, one per major.
#[derive(Debug, Clone, Default)]
pub struct CorpusConfig {
    pub cs: Option<String>,
    pub me: Option<String>,
}

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub port: u16,
    pub llm: LlmConfig,
    pub google: GoogleCloudConfig,
    pub corpora: CorpusConfig,
    /// Fully qualified `project.dataset.table` holding student records.
    pub student_table: Option<String>,
    /// Sessions idle longer than this are dropped.
    pub session_idle_timeout: Duration,
    /// Passages retrieved per course-planning turn.
    pub retrieval_top_k: usize,
}

impl AppConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let backend = if get(keys::USE_VERTEXAI).is_some_and(|v| is_truthy(&v)) {
            LlmBackend::VertexAi
        } else {
            LlmBackend::GeminiApi
        };

        let api_key = get(keys::GOOGLE_API_KEY).map(SecretString::from);
        let google = GoogleCloudConfig {
            project: get(keys::CLOUD_PROJECT),
            location: get(keys::CLOUD_LOCATION).unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
            access_token: get(keys::ACCESS_TOKEN).map(SecretString::from),
        };

        match backend {
            LlmBackend::GeminiApi if api_key.is_none() => {
                return Err(ConfigError::MissingRequired {
                    key: keys::GOOGLE_API_KEY.to_string(),
                    hint: "Set it, or set GOOGLE_GENAI_USE_VERTEXAI=1 to use Vertex AI.".into(),
                });
            }
            LlmBackend::VertexAi if google.project.is_none() => {
                return Err(ConfigError::MissingRequired {
                    key: keys::CLOUD_PROJECT.to_string(),
                    hint: "Vertex AI mode needs a Google Cloud project.".into(),
                });
            }
            LlmBackend::VertexAi if google.access_token.is_none() => {
                return Err(ConfigError::MissingRequired {
                    key: keys::ACCESS_TOKEN.to_string(),
                    hint: "e.g. export GOOGLE_CLOUD_ACCESS_TOKEN=$(gcloud auth print-access-token)"
                        .into(),
                });
            }
            _ => {}
        }

        let port = parse_or(get(keys::PORT), keys::PORT, 8080u16)?;
        let idle_min = parse_or(get(keys::SESSION_IDLE_MIN), keys::SESSION_IDLE_MIN, 60u64)?;
        let idle_secs = idle_min
            .checked_mul(60)
            .ok_or_else(|| ConfigError::InvalidValue {
                key: keys::SESSION_IDLE_MIN.to_string(),
                message: "too large".into(),
            })?;
        let top_k = parse_or(get(keys::TOP_K), keys::TOP_K, 5usize)?;
        if top_k == 0 {
            return Err(ConfigError::InvalidValue {
                key: keys::TOP_K.to_string(),
                message: "must be at least 1".into(),
            });
        }

        Ok(Self {
            app_name: APP_NAME.to_string(),
            port,
            llm: LlmConfig {
                backend,
                api_key,
                model: get(keys::MODEL).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            },
            google,
            corpora: CorpusConfig {
                cs: get(keys::CS_CORPUS),
                me: get(keys::ME_CORPUS),
            },
            student_table: get(keys::STUDENT_TABLE),
            session_idle_timeout: Duration::from_secs(idle_secs),
            retrieval_top_k: top_k,
        })
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

fn parse_or<T: std::str::FromStr>(
    raw: Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(v) => v.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("could not parse {v:?}"),
        }),
    }
}

/// One row of the environment status panel.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EnvStatus {
    pub env: String,
    pub set: bool,
    pub value_preview: String,
}

/// Report which settings are present. Secret values are never previewed.
pub fn env_status<F>(get: F) -> Vec<EnvStatus>
where
    F: Fn(&str) -> Option<String>,
{
    STATUS_KEYS
        .iter()
        .map(|key| {
            let value = get(key).filter(|v| !v.is_empty());
            let value_preview = match (&value, SECRET_KEYS.contains(key)) {
                (Some(_), true) => "(hidden)".to_string(),
                (Some(v), false) => {
                    let head: String = v.chars().take(6).collect();
                    if v.chars().count() > 6 { format!("{head}…") } else { head }
                }
                (None, _) => String::new(),
            };
            EnvStatus {
                env: key.to_string(),
                set: value.is_some(),
                value_preview,
            }
        })
        .collect()
}
