//! Course-document retrieval from a Vertex AI RAG corpus.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{GoogleCloudConfig, keys};
use crate::error::{CollaboratorError, ConfigError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// One retrieved chunk of a course document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    pub source_uri: Option<String>,
    pub score: Option<f64>,
}

/// Finds the passages of a corpus most relevant to a query.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, corpus: &str, query: &str, top_k: usize) -> Result<Vec<Passage>>;
}

/// `retrieveContexts` client.
///
/// Built from whatever is configured; missing project or token surfaces as
/// a configuration error on the first retrieval, not at startup.
pub struct VertexRagRetriever {
    client: reqwest::Client,
    base_url: String,
    project: Option<String>,
    location: String,
    access_token: Option<SecretString>,
}

impl VertexRagRetriever {
    pub fn new(google: &GoogleCloudConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: format!("https://{}-aiplatform.googleapis.com", google.location),
            project: google.project.clone(),
            location: google.location.clone(),
            access_token: google.access_token.clone(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl Retriever for VertexRagRetriever {
    async fn retrieve(&self, corpus: &str, query: &str, top_k: usize) -> Result<Vec<Passage>> {
        let project = self
            .project
            .as_deref()
            .ok_or_else(|| ConfigError::MissingRequired {
                key: keys::CLOUD_PROJECT.to_string(),
                hint: "RAG retrieval needs a Google Cloud project.".into(),
            })?;
        let token = self
            .access_token
            .as_ref()
            .ok_or_else(|| ConfigError::MissingRequired {
                key: keys::ACCESS_TOKEN.to_string(),
                hint: "RAG retrieval needs an OAuth access token.".into(),
            })?;

        let url = format!(
            "{}/v1/projects/{project}/locations/{}:retrieveContexts",
            self.base_url, self.location
        );
        let body = serde_json::json!({
            "vertexRagStore": { "ragResources": [{ "ragCorpus": corpus }] },
            "query": {
                "text": query,
                "ragRetrievalConfig": { "topK": top_k },
            },
        });

        debug!(corpus, top_k, "Retrieving course documents");
        let response = self
            .client
            .post(&url)
            .bearer_auth(token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| CollaboratorError::Retrieval(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(status = %status, corpus, "retrieveContexts failed");
            return Err(
                CollaboratorError::Retrieval(format!("HTTP {status}: {}", text.trim())).into(),
            );
        }

        let parsed: RetrieveContextsResponse = response
            .json()
            .await
            .map_err(|e| CollaboratorError::Retrieval(format!("bad response: {e}")))?;

        let passages: Vec<Passage> = parsed
            .contexts
            .map(|c| c.contexts)
            .unwrap_or_default()
            .into_iter()
            .filter(|c| !c.text.trim().is_empty())
            .take(top_k)
            .map(|c| Passage {
                text: c.text,
                source_uri: c.source_uri,
                score: c.score,
            })
            .collect();
        debug!(corpus, found = passages.len(), "Retrieved passages");
        Ok(passages)
    }
}

/// Render passages as a numbered context block for a prompt.
pub fn format_passages(passages: &[Passage]) -> String {
    if passages.is_empty() {
        return "(no matching course documents)".to_string();
    }
    passages
        .iter()
        .enumerate()
        .map(|(i, p)| match &p.source_uri {
            Some(uri) => format!("[{}] ({uri})\n{}", i + 1, p.text.trim()),
            None => format!("[{}]\n{}", i + 1, p.text.trim()),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[derive(Debug, Deserialize)]
struct RetrieveContextsResponse {
    contexts: Option<RagContexts>,
}

#[derive(Debug, Deserialize)]
struct RagContexts {
    #[serde(default)]
    contexts: Vec<RagContext>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RagContext {
    #[serde(default)]
    text: String,
    source_uri: Option<String>,
    score: Option<f64>,
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::error::Error;

    const CORPUS: &str = "projects/p1/locations/us-central1/ragCorpora/42";

    fn google(project: Option<&str>, token: Option<&str>) -> GoogleCloudConfig {
        GoogleCloudConfig {
            project: project.map(String::from),
            location: "us-central1".into(),
            access_token: token.map(SecretString::from),
        }
    }

    #[tokio::test]
    async fn retrieves_ranked_passages() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/projects/p1/locations/us-central1:retrieveContexts"))
            .and(header("authorization", "Bearer tok"))
            .and(body_partial_json(serde_json::json!({
                "vertexRagStore": { "ragResources": [{ "ragCorpus": CORPUS }] },
                "query": { "text": "CS111 prerequisites", "ragRetrievalConfig": { "topK": 2 } }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "contexts": { "contexts": [
                    { "sourceUri": "gs://catalog/cs111.pdf", "text": "CS111 requires CS010B.", "score": 0.91 },
                    { "sourceUri": "gs://catalog/cs141.pdf", "text": "CS141 requires CS111.", "score": 0.74 },
                    { "text": "   " }
                ]}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let retriever =
            VertexRagRetriever::new(&google(Some("p1"), Some("tok"))).with_base_url(server.uri());
        let passages = retriever.retrieve(CORPUS, "CS111 prerequisites", 2).await.unwrap();

        assert_eq!(passages.len(), 2);
        assert_eq!(passages[0].text, "CS111 requires CS010B.");
        assert_eq!(passages[0].source_uri.as_deref(), Some("gs://catalog/cs111.pdf"));
        assert_eq!(passages[1].score, Some(0.74));
    }

    #[tokio::test]
    async fn empty_result_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let retriever =
            VertexRagRetriever::new(&google(Some("p1"), Some("tok"))).with_base_url(server.uri());
        assert!(retriever.retrieve(CORPUS, "anything", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn server_error_is_collaborator_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("backend unavailable"))
            .mount(&server)
            .await;

        let retriever =
            VertexRagRetriever::new(&google(Some("p1"), Some("tok"))).with_base_url(server.uri());
        let err = retriever.retrieve(CORPUS, "q", 5).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("backend unavailable"));
    }

    #[tokio::test]
    async fn missing_credentials_are_configuration_errors() {
        let err = VertexRagRetriever::new(&google(None, Some("tok")))
            .retrieve(CORPUS, "q", 5)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::MissingRequired { ref key, .. }) if key == keys::CLOUD_PROJECT));

        let err = VertexRagRetriever::new(&google(Some("p1"), None))
            .retrieve(CORPUS, "q", 5)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::MissingRequired { ref key, .. }) if key == keys::ACCESS_TOKEN));
    }

    #[test]
    fn passages_format_with_sources() {
        let text = format_passages(&[
            Passage {
                text: "CS111 requires CS010B.".into(),
                source_uri: Some("gs://catalog/cs111.pdf".into()),
                score: None,
            },
            Passage {
                text: "Labs are weekly.".into(),
                source_uri: None,
                score: None,
            },
        ]);
        assert_eq!(
            text,
            "[1] (gs://catalog/cs111.pdf)\nCS111 requires CS010B.\n\n[2]\nLabs are weekly."
        );
        assert_eq!(format_passages(&[]), "(no matching course documents)");
    }
}
