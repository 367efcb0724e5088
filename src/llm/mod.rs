//! LLM integration.
//!
//! Supports:
//! - **Gemini API**: `generativelanguage.googleapis.com` with an API key
//! - **Vertex AI**: regional Vertex endpoint with a bearer token
//!
//! Both speak the same `generateContent` wire format, so one
//! [`GeminiProvider`] covers them.

pub mod gemini;
pub mod provider;

pub use gemini::{GeminiAuth, GeminiProvider};
pub use provider::*;

use std::sync::Arc;

use crate::config::{AppConfig, LlmBackend, keys};
use crate::error::ConfigError;

/// Create an LLM provider from configuration.
pub fn create_provider(config: &AppConfig) -> Result<Arc<dyn LlmProvider>, ConfigError> {
    let auth = match config.llm.backend {
        LlmBackend::GeminiApi => {
            let key = config
                .llm
                .api_key
                .clone()
                .ok_or_else(|| ConfigError::MissingRequired {
                    key: keys::GOOGLE_API_KEY.to_string(),
                    hint: "Set it to a Gemini API key.".to_string(),
                })?;
            GeminiAuth::ApiKey(key)
        }
        LlmBackend::VertexAi => {
            let project =
                config
                    .google
                    .project
                    .clone()
                    .ok_or_else(|| ConfigError::MissingRequired {
                        key: keys::CLOUD_PROJECT.to_string(),
                        hint: "Vertex AI needs a project id.".to_string(),
                    })?;
            let access_token =
                config
                    .google
                    .access_token
                    .clone()
                    .ok_or_else(|| ConfigError::MissingRequired {
                        key: keys::ACCESS_TOKEN.to_string(),
                        hint: "Vertex AI needs an OAuth access token.".to_string(),
                    })?;
            GeminiAuth::Vertex {
                project,
                location: config.google.location.clone(),
                access_token,
            }
        }
    };

    tracing::info!(
        backend = %config.llm.backend,
        model = %config.llm.model,
        "Using Gemini provider"
    );
    Ok(Arc::new(GeminiProvider::new(auth, config.llm.model.clone())))
}
