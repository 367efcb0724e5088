//! In-process agent runner: one shared conversation per identifier pair,
//! answered by whichever persona the router picked for the turn.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::runner::{AgentRunner, EventSender, TurnEvent, TurnRequest, TurnResult, emit};
use crate::config::CorpusConfig;
use crate::error::{ConfigError, Result};
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::onboarding::prompts::system_prompt;
use crate::retrieval::{Retriever, format_passages};
use crate::router::Persona;
use crate::session::SessionKey;

/// Messages kept per conversation (user and assistant each count as one).
pub const DEFAULT_MAX_HISTORY: usize = 40;

const RETRIEVAL_TOOL: &str = "retrieve_course_documents";
const WEB_SEARCH_TOOL: &str = "google_search";
const EMPTY_REPLY: &str = "(No text response produced.)";

pub struct PersonaRunner {
    llm: Arc<dyn LlmProvider>,
    retriever: Arc<dyn Retriever>,
    corpora: CorpusConfig,
    top_k: usize,
    max_history: usize,
    conversations: RwLock<HashMap<SessionKey, Vec<ChatMessage>>>,
}

impl PersonaRunner {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        retriever: Arc<dyn Retriever>,
        corpora: CorpusConfig,
        top_k: usize,
    ) -> Self {
        Self {
            llm,
            retriever,
            corpora,
            top_k,
            max_history: DEFAULT_MAX_HISTORY,
            conversations: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history.max(2);
        self
    }

    fn corpus_for(&self, persona: Persona) -> Result<Option<&str>> {
        let corpus = match persona {
            Persona::Cs => self.corpora.cs.as_deref(),
            Persona::Me => self.corpora.me.as_deref(),
            Persona::Online | Persona::Student => return Ok(None),
        };
        corpus.map(Some).ok_or_else(|| {
            ConfigError::MissingCorpus {
                persona: persona.to_string(),
            }
            .into()
        })
    }

    /// Number of stored messages for `key` (tests and debug view).
    pub async fn history_len(&self, key: &SessionKey) -> usize {
        self.conversations
            .read()
            .await
            .get(key)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl AgentRunner for PersonaRunner {
    async fn ensure_session(&self, key: &SessionKey) -> Result<()> {
        let mut conversations = self.conversations.write().await;
        if !conversations.contains_key(key) {
            debug!(session = %key, "Runner conversation created");
            conversations.insert(key.clone(), Vec::new());
        }
        Ok(())
    }

    async fn run_turn(
        &self,
        request: TurnRequest,
        events: Option<&EventSender>,
    ) -> Result<TurnResult> {
        let TurnRequest {
            key,
            persona,
            message,
        } = request;
        let mut result = TurnResult::default();

        emit(
            events,
            TurnEvent::Thinking {
                message: format!("{persona} agent is working on it…"),
            },
        );

        let mut messages = vec![ChatMessage::system(system_prompt(persona))];

        if let Some(corpus) = self.corpus_for(persona)? {
            let args = json!({ "corpus": corpus, "query": message, "top_k": self.top_k });
            emit(
                events,
                TurnEvent::ToolCall {
                    name: RETRIEVAL_TOOL.to_string(),
                    args: args.clone(),
                },
            );
            result
                .tool_calls
                .push(json!({ "name": RETRIEVAL_TOOL, "args": args }));

            let passages = self.retriever.retrieve(corpus, &message, self.top_k).await?;
            emit(
                events,
                TurnEvent::ToolResult {
                    name: RETRIEVAL_TOOL.to_string(),
                    preview: format!("{} passage(s)", passages.len()),
                },
            );
            result.tool_responses.push(json!({
                "name": RETRIEVAL_TOOL,
                "response": { "passages": passages },
            }));
            messages.push(ChatMessage::system(format!(
                "Relevant course documents:\n\n{}",
                format_passages(&passages)
            )));
        }

        let history = self
            .conversations
            .read()
            .await
            .get(&key)
            .cloned()
            .unwrap_or_default();
        messages.extend(history);
        messages.push(ChatMessage::user(message.clone()));

        let web_search = persona == Persona::Online;
        if web_search {
            let args = json!({ "query": message });
            emit(
                events,
                TurnEvent::ToolCall {
                    name: WEB_SEARCH_TOOL.to_string(),
                    args: args.clone(),
                },
            );
            result
                .tool_calls
                .push(json!({ "name": WEB_SEARCH_TOOL, "args": args }));
        }

        let response = self
            .llm
            .complete(CompletionRequest::new(messages).with_web_search(web_search))
            .await?;

        if web_search {
            emit(
                events,
                TurnEvent::ToolResult {
                    name: WEB_SEARCH_TOOL.to_string(),
                    preview: format!("{} source(s)", response.sources.len()),
                },
            );
            result.tool_responses.push(json!({
                "name": WEB_SEARCH_TOOL,
                "response": { "sources": response.sources },
            }));
        }

        let final_text = if response.content.trim().is_empty() {
            EMPTY_REPLY.to_string()
        } else {
            response.content
        };

        {
            let mut conversations = self.conversations.write().await;
            let history = conversations.entry(key.clone()).or_default();
            history.push(ChatMessage::user(message));
            history.push(ChatMessage::assistant(final_text.clone()));
            if history.len() > self.max_history {
                let excess = history.len() - self.max_history;
                history.drain(..excess);
            }
        }

        info!(
            session = %key,
            persona = %persona,
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "Persona turn finished"
        );
        emit(
            events,
            TurnEvent::Response {
                content: final_text.clone(),
                persona,
            },
        );
        result.final_text = final_text;
        Ok(result)
    }

    async fn reset(&self, key: &SessionKey) -> Result<()> {
        if self.conversations.write().await.remove(key).is_some() {
            debug!(session = %key, "Runner conversation cleared");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::{CollaboratorError, Error, LlmError};
    use crate::llm::{CompletionResponse, FinishReason, Role};
    use crate::retrieval::Passage;

    /// Records each request and answers from a script.
    #[derive(Default)]
    struct ScriptedLlm {
        requests: Mutex<Vec<CompletionRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> std::result::Result<CompletionResponse, LlmError> {
            let n = {
                let mut requests = self.requests.lock().unwrap();
                requests.push(request.clone());
                requests.len()
            };
            if self.fail {
                return Err(LlmError::RequestFailed {
                    provider: "scripted".into(),
                    reason: "offline".into(),
                });
            }
            Ok(CompletionResponse {
                content: format!("reply {n}"),
                input_tokens: 10,
                output_tokens: 3,
                finish_reason: FinishReason::Stop,
                sources: if request.web_search {
                    vec!["https://example.edu".into()]
                } else {
                    vec![]
                },
            })
        }
    }

    struct FixedRetriever {
        fail: bool,
    }

    #[async_trait]
    impl Retriever for FixedRetriever {
        async fn retrieve(&self, corpus: &str, _query: &str, top_k: usize) -> Result<Vec<Passage>> {
            if self.fail {
                return Err(CollaboratorError::Retrieval("rag down".into()).into());
            }
            Ok(vec![Passage {
                text: format!("CS111 requires CS010B ({corpus}, k={top_k})"),
                source_uri: Some("gs://catalog/cs111.pdf".into()),
                score: Some(0.9),
            }])
        }
    }

    fn corpora() -> CorpusConfig {
        CorpusConfig {
            cs: Some("corpora/cs".into()),
            me: None,
        }
    }

    fn runner(llm: Arc<ScriptedLlm>, retrieval_fails: bool) -> PersonaRunner {
        PersonaRunner::new(
            llm,
            Arc::new(FixedRetriever {
                fail: retrieval_fails,
            }),
            corpora(),
            3,
        )
    }

    fn turn(persona: Persona, message: &str) -> TurnRequest {
        TurnRequest {
            key: SessionKey::new("u", "s"),
            persona,
            message: message.into(),
        }
    }

    #[tokio::test]
    async fn cs_turn_retrieves_and_injects_documents() {
        let llm = Arc::new(ScriptedLlm::default());
        let runner = runner(llm.clone(), false);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let result = runner
            .run_turn(turn(Persona::Cs, "Can I take CS111?"), Some(&tx))
            .await
            .unwrap();

        assert_eq!(result.final_text, "reply 1");
        assert_eq!(result.tool_calls[0]["name"], RETRIEVAL_TOOL);
        assert_eq!(result.tool_calls[0]["args"]["top_k"], 3);

        let requests = llm.requests.lock().unwrap();
        let context = &requests[0].messages[1];
        assert_eq!(context.role, Role::System);
        assert!(context.content.contains("CS111 requires CS010B (corpora/cs, k=3)"));
        assert!(!requests[0].web_search);
        drop(requests);

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                TurnEvent::Thinking { .. } => "thinking",
                TurnEvent::ToolCall { .. } => "tool_call",
                TurnEvent::ToolResult { .. } => "tool_result",
                TurnEvent::Response { .. } => "response",
            });
        }
        assert_eq!(kinds, ["thinking", "tool_call", "tool_result", "response"]);
    }

    #[tokio::test]
    async fn online_turn_enables_web_search() {
        let llm = Arc::new(ScriptedLlm::default());
        let runner = runner(llm.clone(), false);
        let result = runner
            .run_turn(turn(Persona::Online, "Who teaches CS153?"), None)
            .await
            .unwrap();

        assert!(llm.requests.lock().unwrap()[0].web_search);
        assert_eq!(result.tool_calls[0]["name"], WEB_SEARCH_TOOL);
        assert_eq!(
            result.tool_responses[0]["response"]["sources"][0],
            "https://example.edu"
        );
    }

    #[tokio::test]
    async fn history_is_shared_across_personas() {
        let llm = Arc::new(ScriptedLlm::default());
        let runner = runner(llm.clone(), false);
        let key = SessionKey::new("u", "s");
        runner.ensure_session(&key).await.unwrap();

        runner
            .run_turn(turn(Persona::Student, "I confirm my major is CS."), None)
            .await
            .unwrap();
        runner
            .run_turn(turn(Persona::Cs, "Plan my fall"), None)
            .await
            .unwrap();

        let requests = llm.requests.lock().unwrap();
        let second: Vec<&str> = requests[1]
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(second, ["I confirm my major is CS.", "reply 1", "Plan my fall"]);
        drop(requests);
        assert_eq!(runner.history_len(&key).await, 4);
    }

    #[tokio::test]
    async fn failed_turns_leave_history_untouched() {
        let key = SessionKey::new("u", "s");

        let llm = Arc::new(ScriptedLlm {
            fail: true,
            ..Default::default()
        });
        let failing = runner(llm, false);
        let err = failing.run_turn(turn(Persona::Student, "hi"), None).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(failing.history_len(&key).await, 0);

        let llm = Arc::new(ScriptedLlm::default());
        let no_rag = runner(llm.clone(), true);
        let err = no_rag.run_turn(turn(Persona::Cs, "plan"), None).await.unwrap_err();
        assert!(matches!(err, Error::Collaborator(CollaboratorError::Retrieval(_))));
        assert!(llm.requests.lock().unwrap().is_empty());
        assert_eq!(no_rag.history_len(&key).await, 0);
    }

    #[tokio::test]
    async fn persona_without_corpus_is_configuration_error() {
        let runner = runner(Arc::new(ScriptedLlm::default()), false);
        let err = runner.run_turn(turn(Persona::Me, "plan"), None).await.unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::MissingCorpus { ref persona }) if persona == "ME"));
    }

    #[tokio::test]
    async fn history_is_capped_and_reset_clears_it() {
        let runner = runner(Arc::new(ScriptedLlm::default()), false).with_max_history(4);
        let key = SessionKey::new("u", "s");
        for i in 0..5 {
            runner
                .run_turn(turn(Persona::Student, &format!("m{i}")), None)
                .await
                .unwrap();
        }
        assert_eq!(runner.history_len(&key).await, 4);

        runner.reset(&key).await.unwrap();
        assert_eq!(runner.history_len(&key).await, 0);
    }
}
