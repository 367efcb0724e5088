//! Agent-runner contract: what the bridge needs from whatever executes a
//! persona turn.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::Error;
use crate::router::Persona;
use crate::session::SessionKey;

/// Progress reported while a turn runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    Thinking { message: String },
    ToolCall { name: String, args: serde_json::Value },
    ToolResult { name: String, preview: String },
    Response { content: String, persona: Persona },
}

/// Receiving end is owned by whoever relays events to the display layer.
pub type EventSender = mpsc::UnboundedSender<TurnEvent>;

/// Send an event if anyone is listening. A closed receiver is not an error.
pub fn emit(events: Option<&EventSender>, event: TurnEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

/// One turn as handed to the runner.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub key: SessionKey,
    pub persona: Persona,
    pub message: String,
}

/// Outcome of a turn.
#[derive(Debug, Clone, Default)]
pub struct TurnResult {
    pub final_text: String,
    pub tool_calls: Vec<serde_json::Value>,
    pub tool_responses: Vec<serde_json::Value>,
}

/// Executes persona turns and owns per-identifier-pair conversation memory.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Create the conversation context for `key` if it does not exist yet.
    async fn ensure_session(&self, key: &SessionKey) -> Result<(), Error>;

    /// Run one turn. Memory for `request.key` is only extended on success.
    async fn run_turn(
        &self,
        request: TurnRequest,
        events: Option<&EventSender>,
    ) -> Result<TurnResult, Error>;

    /// Forget the conversation for `key`.
    async fn reset(&self, key: &SessionKey) -> Result<(), Error>;
}
