//! Error types for the schedule recommender.

use std::time::Duration;

use crate::session::StageKind;

/// Top-level error type.
///
/// Every gate in the onboarding flow mutates the session only after its
/// input check and remote call both succeed, so any of these variants
/// leaves the session exactly as it was.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid {field}: {reason}")]
    InputValidation { field: String, reason: String },

    #[error("Action requires stage {expected}, session is at {actual}")]
    WrongStage {
        expected: StageKind,
        actual: StageKind,
    },

    #[error("Student ID not recognized: {student_id}")]
    NotFound { student_id: String },

    #[error("Session {user_id}/{session_id} does not exist")]
    SessionNotFound { user_id: String, session_id: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Collaborator(#[from] CollaboratorError),
}

impl Error {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InputValidation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable name for the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InputValidation { .. } => "input_validation",
            Self::WrongStage { .. } => "wrong_stage",
            Self::NotFound { .. } => "not_found",
            Self::SessionNotFound { .. } => "session_not_found",
            Self::Config(_) => "configuration",
            Self::Collaborator(_) => "collaborator_unavailable",
        }
    }

    /// Whether re-submitting the same action may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Collaborator(_))
    }

    /// Message suitable for a chat bubble or form hint.
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound { .. } => "Student ID not recognized.".to_string(),
            Self::Config(ConfigError::UnsupportedMajor(major)) => {
                format!("Unsupported major: {major}. Only CS and ME are available.")
            }
            Self::Collaborator(e) => format!("{e}. Please try again."),
            other => other.to_string(),
        }
    }
}

impl From<LlmError> for Error {
    fn from(e: LlmError) -> Self {
        Self::Collaborator(CollaboratorError::Llm(e))
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Unsupported major: {0}")]
    UnsupportedMajor(String),

    #[error("No document corpus configured for persona {persona}")]
    MissingCorpus { persona: String },
}

/// Failures of a remote dependency. Always transient from the user's
/// point of view.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("Student lookup unavailable: {0}")]
    LookupUnavailable(String),

    #[error("Course document retrieval failed: {0}")]
    Retrieval(String),

    #[error("Assistant unavailable: {0}")]
    Llm(#[from] LlmError),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
