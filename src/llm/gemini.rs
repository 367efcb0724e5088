//! Gemini `generateContent` client.
//!
//! Two auth modes:
//! - **Gemini API**: `generativelanguage.googleapis.com`, API key header
//! - **Vertex AI**: `{location}-aiplatform.googleapis.com`, bearer token

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role,
};
use crate::error::LlmError;

const PROVIDER: &str = "gemini";
const GEMINI_API_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// How to authenticate against Gemini.
#[derive(Debug, Clone)]
pub enum GeminiAuth {
    ApiKey(SecretString),
    Vertex {
        project: String,
        location: String,
        access_token: SecretString,
    },
}

/// Gemini provider.
pub struct GeminiProvider {
    client: reqwest::Client,
    auth: GeminiAuth,
    model: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(auth: GeminiAuth, model: impl Into<String>) -> Self {
        let base_url = match &auth {
            GeminiAuth::ApiKey(_) => GEMINI_API_BASE_URL.to_string(),
            GeminiAuth::Vertex { location, .. } => {
                format!("https://{location}-aiplatform.googleapis.com")
            }
        };
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            auth,
            model: model.into(),
            base_url,
        }
    }

    /// Point the provider at a different host (proxies, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        match &self.auth {
            GeminiAuth::ApiKey(_) => format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, self.model
            ),
            GeminiAuth::Vertex {
                project, location, ..
            } => format!(
                "{}/v1/projects/{project}/locations/{location}/publishers/google/models/{}:generateContent",
                self.base_url, self.model
            ),
        }
    }

    fn build_body(request: &CompletionRequest) -> GenerateContentRequest {
        let system: Vec<Part> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| Part::text(&m.content))
            .collect();

        let contents = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m: &ChatMessage| Content {
                role: Some(
                    match m.role {
                        Role::Assistant => "model",
                        _ => "user",
                    }
                    .to_string(),
                ),
                parts: vec![Part::text(&m.content)],
            })
            .collect();

        let generation_config = (request.max_tokens.is_some() || request.temperature.is_some())
            .then(|| GenerationConfig {
                max_output_tokens: request.max_tokens,
                temperature: request.temperature,
            });

        let tools = if request.web_search {
            vec![serde_json::json!({ "google_search": {} })]
        } else {
            Vec::new()
        };

        GenerateContentRequest {
            contents,
            system_instruction: (!system.is_empty()).then_some(Content {
                role: None,
                parts: system,
            }),
            generation_config,
            tools,
        }
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = Self::build_body(&request);
        let mut http = self.client.post(self.endpoint()).json(&body);
        http = match &self.auth {
            GeminiAuth::ApiKey(key) => http.header("x-goog-api-key", key.expose_secret()),
            GeminiAuth::Vertex { access_token, .. } => {
                http.bearer_auth(access_token.expose_secret())
            }
        };

        debug!(
            model = %self.model,
            messages = request.messages.len(),
            web_search = request.web_search,
            "Sending generateContent request"
        );

        let response = http.send().await.map_err(|e| LlmError::RequestFailed {
            provider: PROVIDER.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            let text = response.text().await.unwrap_or_default();
            warn!(status = %status, "Gemini request failed");
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::AuthFailed {
                    provider: PROVIDER.to_string(),
                },
                StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited {
                    provider: PROVIDER.to_string(),
                    retry_after,
                },
                _ => LlmError::RequestFailed {
                    provider: PROVIDER.to_string(),
                    reason: format!("HTTP {status}: {}", truncate(&text, 300)),
                },
            });
        }

        let text = response.text().await.map_err(|e| LlmError::RequestFailed {
            provider: PROVIDER.to_string(),
            reason: e.to_string(),
        })?;
        let parsed: GenerateContentResponse =
            serde_json::from_str(&text).map_err(|e| LlmError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            })?;

        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: "response contained no candidates".to_string(),
            })?;

        let content = candidate
            .content
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let finish_reason = match candidate.finish_reason.as_deref() {
            Some("STOP") | None => FinishReason::Stop,
            Some("MAX_TOKENS") => FinishReason::Length,
            Some("SAFETY") | Some("BLOCKLIST") | Some("PROHIBITED_CONTENT") => {
                FinishReason::Safety
            }
            Some(_) => FinishReason::Other,
        };

        let sources = candidate
            .grounding_metadata
            .map(|g| {
                g.grounding_chunks
                    .into_iter()
                    .filter_map(|c| c.web.and_then(|w| w.uri))
                    .collect()
            })
            .unwrap_or_default();

        let usage = parsed.usage_metadata.unwrap_or_default();
        Ok(CompletionResponse {
            content: content.trim().to_string(),
            input_tokens: usage.prompt_token_count.unwrap_or(0),
            output_tokens: usage.candidates_token_count.unwrap_or(0),
            finish_reason,
            sources,
        })
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}…", s.chars().take(max).collect::<String>())
    }
}

// ── Wire types ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

impl Part {
    fn text(s: &str) -> Self {
        Self {
            text: Some(s.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Deserialize)]
struct GroundingChunk {
    web: Option<WebSource>,
}

#[derive(Debug, Deserialize)]
struct WebSource {
    uri: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn ok_body(text: &str) -> serde_json::Value {
        serde_json::json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": text }] },
                "finishReason": "STOP"
            }],
            "usageMetadata": { "promptTokenCount": 12, "candidatesTokenCount": 5 }
        })
    }

    fn api_key_provider(server: &MockServer) -> GeminiProvider {
        GeminiProvider::new(
            GeminiAuth::ApiKey(SecretString::from("test-key")),
            "gemini-2.5-flash",
        )
        .with_base_url(server.uri())
    }

    #[tokio::test]
    async fn api_key_request_shape_and_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.5-flash:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(serde_json::json!({
                "systemInstruction": { "parts": [{ "text": "You are an advisor." }] },
                "contents": [
                    { "role": "user", "parts": [{ "text": "Hi" }] },
                    { "role": "model", "parts": [{ "text": "Hello!" }] },
                    { "role": "user", "parts": [{ "text": "Plan my fall" }] }
                ],
                "generationConfig": { "maxOutputTokens": 512 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("Take CS111.")))
            .expect(1)
            .mount(&server)
            .await;

        let request = CompletionRequest::new(vec![
            ChatMessage::system("You are an advisor."),
            ChatMessage::user("Hi"),
            ChatMessage::assistant("Hello!"),
            ChatMessage::user("Plan my fall"),
        ])
        .with_max_tokens(512);

        let response = api_key_provider(&server).complete(request).await.unwrap();
        assert_eq!(response.content, "Take CS111.");
        assert_eq!(response.input_tokens, 12);
        assert_eq!(response.output_tokens, 5);
        assert_eq!(response.finish_reason, FinishReason::Stop);
        assert!(response.sources.is_empty());
    }

    #[tokio::test]
    async fn web_search_adds_tool_and_collects_sources() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "tools": [{ "google_search": {} }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{
                    "content": { "parts": [{ "text": "Dr. Lee teaches it." }] },
                    "finishReason": "STOP",
                    "groundingMetadata": {
                        "groundingChunks": [
                            { "web": { "uri": "https://example.edu/cs153", "title": "CS153" } },
                            { "retrievedContext": {} }
                        ]
                    }
                }]
            })))
            .mount(&server)
            .await;

        let request =
            CompletionRequest::new(vec![ChatMessage::user("Who teaches CS153?")]).with_web_search(true);
        let response = api_key_provider(&server).complete(request).await.unwrap();
        assert_eq!(response.content, "Dr. Lee teaches it.");
        assert_eq!(response.sources, vec!["https://example.edu/cs153".to_string()]);
        assert_eq!(response.input_tokens, 0);
    }

    #[tokio::test]
    async fn vertex_mode_uses_bearer_and_project_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(
                "/v1/projects/my-proj/locations/us-central1/publishers/google/models/gemini-2.5-flash:generateContent",
            ))
            .and(header("authorization", "Bearer ya29.token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("ok")))
            .expect(1)
            .mount(&server)
            .await;

        let provider = GeminiProvider::new(
            GeminiAuth::Vertex {
                project: "my-proj".into(),
                location: "us-central1".into(),
                access_token: SecretString::from("ya29.token"),
            },
            "gemini-2.5-flash",
        )
        .with_base_url(server.uri());

        let response = provider
            .complete(CompletionRequest::new(vec![ChatMessage::user("hi")]))
            .await
            .unwrap();
        assert_eq!(response.content, "ok");
    }

    #[tokio::test]
    async fn status_codes_map_to_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("denied"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let provider = api_key_provider(&server);
        let request = || CompletionRequest::new(vec![ChatMessage::user("hi")]);

        match provider.complete(request()).await.unwrap_err() {
            LlmError::RateLimited { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
        assert!(matches!(
            provider.complete(request()).await.unwrap_err(),
            LlmError::AuthFailed { .. }
        ));
        match provider.complete(request()).await.unwrap_err() {
            LlmError::RequestFailed { reason, .. } => assert!(reason.contains("boom")),
            other => panic!("expected RequestFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_candidates_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "candidates": [] })),
            )
            .mount(&server)
            .await;

        let err = api_key_provider(&server)
            .complete(CompletionRequest::new(vec![ChatMessage::user("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse { .. }));
    }

    #[test]
    fn body_omits_empty_sections() {
        let body = GeminiProvider::build_body(&CompletionRequest::new(vec![ChatMessage::user("x")]));
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("systemInstruction").is_none());
        assert!(json.get("generationConfig").is_none());
        assert!(json.get("tools").is_none());
    }
}
